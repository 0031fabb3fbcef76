#![no_main]

use libfuzzer_sys::fuzz_target;
use vestnik::Message;

// Любая нагрузка декодируется, а повторное кодирование даёт валидный UTF-8.
fuzz_target!(|data: &[u8]| {
    let message = Message::decode_from_broker(data);
    let encoded = message.encode_for_broker();
    assert!(std::str::from_utf8(&encoded).is_ok());
    assert_eq!(Message::decode_from_broker(&encoded), message);
});
