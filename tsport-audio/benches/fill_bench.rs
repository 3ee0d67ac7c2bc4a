//! Fill Loop Performance Benchmark
//!
//! Measures the per-buffer cost of `fill_buffer` against an in-memory
//! demultiplexer, with and without slow-motion compensation active.
//!
//! **Goal:** Per-buffer overhead well below one audio frame (24 ms)

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::sync::{Arc, Weak};
use tsport_audio::allocator::MemoryAllocator;
use tsport_audio::config::AudioSettings;
use tsport_audio::connection::PeerInfo;
use tsport_audio::media::{AudioFormat, MediaBuffer, MediaType};
use tsport_audio::upstream::{synthetic_units, MemoryDemux};
use tsport_audio::{AudioPort, FilterContext, FilterHandle, PullSource, SharedSection};

const FRAME: i64 = 240_000;
const UNITS: usize = 1_000;

fn connected_port(filter: &Arc<dyn FilterContext>, slow_motion: bool) -> AudioPort {
    let demux = Arc::new(MemoryDemux::with_units(
        MediaType::new(AudioFormat::Ac3, 48_000, 6),
        synthetic_units(UNITS, 0, FRAME, 1536),
    ));
    let weak: Weak<dyn FilterContext> = Arc::downgrade(filter);
    let port = AudioPort::new(
        weak,
        SharedSection::new(),
        demux,
        AudioSettings {
            slow_motion_on_zap: slow_motion,
            slow_motion_window_buffers: UNITS as u32,
            ..Default::default()
        },
    );
    let peer = PeerInfo::new("bench");
    port.check_connect(&peer).unwrap();
    port.complete_connect(&peer, Arc::new(MemoryAllocator::new(4, 8192)))
        .unwrap();
    port
}

fn drain(port: &AudioPort) -> usize {
    let mut buffer = MediaBuffer::with_capacity(8192);
    let mut delivered = 0;
    while port.fill_buffer(black_box(&mut buffer)).is_ok() {
        delivered += 1;
    }
    delivered
}

fn bench_fill_loop(c: &mut Criterion) {
    let filter: Arc<dyn FilterContext> = Arc::new(FilterHandle::new("bench"));
    let mut group = c.benchmark_group("fill_loop");

    group.bench_function("fill_1000_units", |b| {
        b.iter_batched(
            || connected_port(&filter, false),
            |port| black_box(drain(&port)),
            BatchSize::SmallInput,
        );
    });

    group.bench_function("fill_1000_units_slow_motion", |b| {
        b.iter_batched(
            || {
                let port = connected_port(&filter, true);
                port.set_discontinuity(true);
                port
            },
            |port| black_box(drain(&port)),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_fill_loop);
criterion_main!(benches);
