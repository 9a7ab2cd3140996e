use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use pitwall::protocol::{decode, ProtocolVersion};
use pitwall::session::RigSession;
use pitwall::simulator::{LapPlan, LapSample, SyntheticRig};
use chrono::Utc;
use std::time::Duration;

fn decode_packets(c: &mut Criterion) {
    let mut rig = SyntheticRig::new(ProtocolVersion::F1_25, 1);
    let mut bench = c.benchmark_group("decoding");
    bench.throughput(Throughput::Elements(1));

    let input = rig
        .lap_data(LapSample::default())
        .to_bytes()
        .unwrap();
    bench.bench_function("decode_lap_data", |b| {
        b.iter(|| decode(&input).unwrap());
    });

    let input = rig.car_telemetry(300, 8).to_bytes().unwrap();
    bench.bench_function("decode_car_telemetry", |b| {
        b.iter(|| decode(&input).unwrap());
    });

    let input = rig.car_damage().to_bytes().unwrap();
    bench.bench_function("decode_car_damage", |b| {
        b.iter(|| decode(&input).unwrap());
    });
}

fn ingest_laps(c: &mut Criterion) {
    let plans = vec![
        LapPlan {
            lap_time_ms: 90_000,
            invalid: false,
        };
        5
    ];
    let mut rig = SyntheticRig::new(ProtocolVersion::F1_24, 2);
    let frames: Vec<Vec<u8>> = rig
        .script(&plans, 100, Duration::from_millis(16))
        .into_iter()
        .map(|timed| timed.packet.to_bytes().unwrap())
        .collect();

    let mut bench = c.benchmark_group("ingestion");
    bench.throughput(Throughput::Elements(frames.len() as u64));
    bench.bench_function("decode_and_apply_script", |b| {
        b.iter(|| {
            let mut session = RigSession::new("RIG_A", 20777);
            session.register_driver("Bench").unwrap();
            let now = Utc::now();
            for frame in &frames {
                let packet = decode(frame).unwrap();
                session.on_packet(&packet, now);
            }
            session
        });
    });
}

criterion_group!(decode_group, decode_packets, ingest_laps);
criterion_main!(decode_group);
