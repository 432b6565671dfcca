//! Hot-path benchmarks for the relay
//!
//! Run with: cargo bench
//! Or for specific benchmarks: cargo bench -- <filter>

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;

use call_bridge::core::realtime::openai::ServerEvent;
use call_bridge::core::relay::{MediaStreamEvent, MediaStreamOutgoing};
use call_bridge::core::router::CallRouter;

/// About 20 ms of 8 kHz mu-law, base64 encoded
fn media_payload() -> String {
    "f/9/".repeat(54)
}

/// Benchmark parsing of inbound telephony frames
fn bench_media_stream_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("media_stream_parsing");
    group.measurement_time(Duration::from_secs(5));

    let media = json!({
        "event": "media",
        "streamSid": "MZ0123456789",
        "media": {"track": "inbound", "chunk": "42", "timestamp": "840", "payload": media_payload()}
    })
    .to_string();

    let start = json!({
        "event": "start",
        "streamSid": "MZ0123456789",
        "start": {
            "streamSid": "MZ0123456789",
            "callSid": "CA0123456789",
            "tracks": ["inbound"],
            "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1},
            "customParameters": {"bot": "inhoustontx", "to": "+17135550100"}
        }
    })
    .to_string();

    let mark = r#"{"event":"mark","streamSid":"MZ0123456789","mark":{"name":"response-7"}}"#.to_string();

    for (name, frame) in [("media", &media), ("start", &start), ("mark", &mark)] {
        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_with_input(BenchmarkId::new(name, frame.len()), frame, |b, frame| {
            b.iter(|| {
                let _: Result<MediaStreamEvent, _> = serde_json::from_str(black_box(frame));
            });
        });
    }

    group.finish();
}

/// Benchmark parsing of upstream model events
fn bench_upstream_event_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("upstream_event_parsing");
    group.measurement_time(Duration::from_secs(5));

    let delta = json!({
        "type": "response.audio.delta",
        "event_id": "event_1",
        "response_id": "resp_1",
        "item_id": "item_1",
        "output_index": 0,
        "content_index": 0,
        "delta": media_payload()
    })
    .to_string();

    // Events the relay ignores still have to be parsed
    let transcript = json!({
        "type": "response.audio_transcript.delta",
        "response_id": "resp_1",
        "delta": "Hola, gracias por llamar"
    })
    .to_string();

    for (name, event) in [("audio_delta", &delta), ("ignored", &transcript)] {
        group.throughput(Throughput::Bytes(event.len() as u64));
        group.bench_with_input(BenchmarkId::new(name, event.len()), event, |b, event| {
            b.iter(|| {
                let _: Result<ServerEvent, _> = serde_json::from_str(black_box(event));
            });
        });
    }

    group.finish();
}

/// Benchmark serialization of outbound telephony frames
fn bench_outgoing_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("outgoing_serialization");
    group.measurement_time(Duration::from_secs(5));

    let media = MediaStreamOutgoing::media("MZ0123456789", media_payload());
    let mark = MediaStreamOutgoing::response_mark("MZ0123456789", 7);
    let clear = MediaStreamOutgoing::clear("MZ0123456789");

    group.bench_function("media", |b| {
        b.iter(|| serde_json::to_string(black_box(&media)));
    });
    group.bench_function("mark", |b| {
        b.iter(|| serde_json::to_string(black_box(&mark)));
    });
    group.bench_function("clear", |b| {
        b.iter(|| serde_json::to_string(black_box(&clear)));
    });

    group.finish();
}

/// Benchmark persona routing
fn bench_routing(c: &mut Criterion) {
    let mut group = c.benchmark_group("routing");

    let routes: HashMap<String, String> = (0..200)
        .map(|i| (format!("+1713555{i:04}"), format!("bot-{i}")))
        .collect();
    let router = CallRouter::new(&routes, "inhoustontx");

    let by_number: HashMap<String, Value> =
        HashMap::from([("to".to_string(), json!("+1 (713) 555-0150"))]);
    let unmatched: HashMap<String, Value> =
        HashMap::from([("to".to_string(), json!("+44 20 7946 0000"))]);

    group.bench_function("selector", |b| {
        b.iter(|| router.route(black_box(Some("Sales")), black_box(&unmatched)));
    });
    group.bench_function("called_number", |b| {
        b.iter(|| router.route(black_box(None), black_box(&by_number)));
    });
    group.bench_function("default", |b| {
        b.iter(|| router.route(black_box(None), black_box(&unmatched)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_media_stream_parsing,
    bench_upstream_event_parsing,
    bench_outgoing_serialization,
    bench_routing,
);

criterion_main!(benches);
