use std::hint::black_box;

use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use vestnik::{broker::resp, Message};

fn bench_encode_publish(c: &mut Criterion) {
    let payload = Message::structured(serde_json::json!({"type": "x", "data": [1, 2, 3]}))
        .encode_for_broker();
    c.bench_function("encode_publish_command", |b| {
        b.iter(|| {
            black_box(resp::encode_command(&[
                b"PUBLISH".as_slice(),
                b"mcp_agent:topic".as_slice(),
                &payload[..],
            ]))
        })
    });
}

fn bench_decode_message_push(c: &mut Criterion) {
    let input: &[u8] = b"*3\r\n$7\r\nmessage\r\n$15\r\nmcp_agent:topic\r\n$12\r\n{\"type\":\"x\"}\r\n";
    c.benchmark_group("decode_message_push")
        .throughput(Throughput::Bytes(input.len() as u64))
        .bench_function("message_push", |b| {
            b.iter(|| {
                let mut buf = BytesMut::from(input);
                black_box(resp::decode(&mut buf).unwrap().unwrap());
            })
        });
}

fn bench_decode_broker_payload(c: &mut Criterion) {
    let json = br#"{"type":"progress","step":3,"total":10}"#;
    let text = b"plain text that is not json";
    c.bench_function("decode_from_broker_json", |b| {
        b.iter(|| black_box(Message::decode_from_broker(black_box(json))))
    });
    c.bench_function("decode_from_broker_text", |b| {
        b.iter(|| black_box(Message::decode_from_broker(black_box(text))))
    });
}

criterion_group!(
    benches,
    bench_encode_publish,
    bench_decode_message_push,
    bench_decode_broker_payload
);
criterion_main!(benches);
