//! Full-engine performance benchmarks: polyphonic block rendering under
//! different voice loads and flavors.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use modsynth::audio::engine::{create_parameter_buffer, SynthEngine, SynthProcessInfo};
use modsynth::midi::MidiEvent;
use modsynth::params::{SynthFlavor, SynthParams};

const FS: f64 = 48000.0;
const BLOCK: usize = 64;

fn engine_for(flavor: SynthFlavor) -> SynthEngine {
    let (mut input, output) = create_parameter_buffer();
    input.write(SynthParams::default());
    SynthEngine::new(FS, BLOCK, flavor, output)
}

fn bench_poly_voices(c: &mut Criterion) {
    let mut group = c.benchmark_group("poly_voice_load");
    for voices in [1usize, 4, 8, 16] {
        let mut engine = engine_for(SynthFlavor::Wavetable);
        let mut info = SynthProcessInfo::new(BLOCK);
        for i in 0..voices {
            info.midi_events
                .push(MidiEvent::note_on(48 + (i as u8 * 3), 100));
        }
        engine.render(&mut info);
        info.midi_events.clear();

        group.bench_function(format!("{voices}_voices"), |b| {
            b.iter(|| {
                engine.render(&mut info);
                black_box(info.outputs().left()[0]);
            })
        });
    }
    group.finish();
}

fn bench_flavors(c: &mut Criterion) {
    let mut group = c.benchmark_group("flavor_block");
    for flavor in [
        SynthFlavor::Wavetable,
        SynthFlavor::Fm,
        SynthFlavor::WaveSequence,
        SynthFlavor::Pluck,
    ] {
        let mut engine = engine_for(flavor);
        let mut info = SynthProcessInfo::new(BLOCK);
        info.midi_events.push(MidiEvent::note_on(57, 100));
        engine.render(&mut info);
        info.midi_events.clear();

        group.bench_function(format!("{flavor:?}"), |b| {
            b.iter(|| {
                engine.render(&mut info);
                black_box(info.outputs().left()[0]);
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_poly_voices, bench_flavors);
criterion_main!(benches);
