use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::Duration;
use uttercut::audio::vad::{Vad, VadConfig, peak_level};

fn make_window(amplitude: i16) -> Vec<i16> {
    let mut samples = vec![0i16; 256];
    for (i, sample) in samples.iter_mut().enumerate() {
        // Rough sawtooth so the window isn't constant.
        *sample = amplitude.saturating_mul((i % 8) as i16) / 8;
    }
    samples
}

fn bench_peak_level(c: &mut Criterion) {
    let window = make_window(3000);
    c.bench_function("peak_level_256", |b| {
        b.iter(|| peak_level(black_box(&window)))
    });
}

fn bench_vad_process(c: &mut Criterion) {
    let speech = make_window(3000);
    let silence = vec![0i16; 256];

    c.bench_function("vad_process_alternating", |b| {
        let config = VadConfig {
            silence_threshold: 0.01,
            silence_delay: Duration::from_millis(1000),
        };
        let mut vad = Vad::new(config);
        let mut tick = 0u64;
        b.iter(|| {
            tick += 1;
            let window = if tick % 50 < 25 { &speech } else { &silence };
            black_box(vad.process(black_box(window)))
        })
    });
}

criterion_group!(benches, bench_peak_level, bench_vad_process);
criterion_main!(benches);
