#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use vestnik::broker::resp;

// Декодер не должен паниковать и не должен потреблять вход без фрейма.
fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);
    loop {
        let before = buf.len();
        match resp::decode(&mut buf) {
            Ok(Some(_)) => assert!(buf.len() < before),
            Ok(None) => {
                assert_eq!(buf.len(), before);
                break;
            }
            Err(_) => break,
        }
    }
});
