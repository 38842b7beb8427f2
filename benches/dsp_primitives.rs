//! Benchmarks for the core DSP building blocks: oscillator cores,
//! envelope generators, the filter, and the wave sequencer.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use modsynth::dsp::envelope::EnvelopeGenerator;
use modsynth::dsp::filter::SynthFilter;
use modsynth::dsp::lfo::Lfo;
use modsynth::dsp::modulation::ModArray;
use modsynth::dsp::oscillators::{OscSharedContext, Oscillator};
use modsynth::dsp::sequencer::WaveSequencer;
use modsynth::dsp::synthesis::{build_standard_database, PcmSampleDatabase};
use modsynth::midi::{MidiInputData, MidiNoteEvent};
use modsynth::params::{
    EgCoreKind, EgParams, FilterCoreKind, FilterParams, LfoCoreKind, LfoParams, OscCoreKind,
    OscParams, WaveSequencerParams,
};

const FS: f64 = 48000.0;
const BLOCK: usize = 64;

fn bench_oscillator_cores(c: &mut Criterion) {
    let (wavetables, morph_banks) = build_standard_database(FS);
    let samples = PcmSampleDatabase::new();
    let midi = MidiInputData::default();

    let mut group = c.benchmark_group("oscillator_cores");
    for core in [
        OscCoreKind::ClassicWt,
        OscCoreKind::MorphWt,
        OscCoreKind::FourierWt,
        OscCoreKind::FmOp,
        OscCoreKind::KarplusStrong,
    ] {
        let params = OscParams {
            core,
            ..OscParams::default()
        };
        let mut osc = Oscillator::new(core, BLOCK);
        osc.reset(&params, FS);
        let shared = OscSharedContext {
            midi: &midi,
            wavetables: &wavetables,
            samples: &samples,
            morph_banks: &morph_banks,
            unison_detune_cents: 0.0,
            unison_start_phase: 0.0,
            samples_to_process: BLOCK,
        };
        osc.note_on(&params, &shared, &MidiNoteEvent::new(220.0, 57, 100));

        group.bench_function(format!("{core}"), |b| {
            b.iter(|| {
                osc.render(&params, &shared, None);
                black_box(osc.buffers().left()[0]);
            })
        });
    }
    group.finish();
}

fn bench_envelopes(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelopes");
    for core in [EgCoreKind::LinearEg, EgCoreKind::DxEg] {
        let params = EgParams {
            core,
            ..EgParams::default()
        };
        let mut eg = EnvelopeGenerator::new(core);
        eg.reset(&params, FS);
        eg.note_on(&params, &MidiNoteEvent::new(220.0, 57, 100));

        group.bench_function(format!("{core:?}"), |b| {
            b.iter(|| {
                eg.render(&params, BLOCK);
                black_box(eg.output());
            })
        });
    }
    group.finish();
}

fn bench_lfos(c: &mut Criterion) {
    let mut group = c.benchmark_group("lfos");
    for core in [LfoCoreKind::Classic, LfoCoreKind::Fm] {
        let params = LfoParams {
            core,
            ..LfoParams::default()
        };
        let mut lfo = Lfo::new(core);
        lfo.reset(&params, FS);
        lfo.note_on(&params);

        group.bench_function(format!("{core:?}"), |b| {
            b.iter(|| {
                lfo.update(&params, 120.0);
                lfo.render(&params, BLOCK);
            })
        });
    }
    group.finish();
}

fn bench_filter(c: &mut Criterion) {
    let params = FilterParams::default();
    let mut filter = SynthFilter::new(FilterCoreKind::Svf, BLOCK);
    filter.reset(FS);
    for i in 0..BLOCK {
        filter.buffers_mut().left_mut()[i] = (i as f64 * 0.1).sin();
        filter.buffers_mut().right_mut()[i] = (i as f64 * 0.1).cos();
    }

    c.bench_function("svf_filter_block", |b| {
        b.iter(|| {
            filter.render(&params, BLOCK);
            black_box(filter.buffers().left()[0]);
        })
    });
}

fn bench_wave_sequencer(c: &mut Criterion) {
    let params = WaveSequencerParams::default();
    let mut sequencer = WaveSequencer::new();
    sequencer.reset(FS);
    sequencer.note_on(&params, 120.0);

    c.bench_function("wave_sequencer_block", |b| {
        b.iter(|| {
            sequencer.render(&params, 120.0, BLOCK);
            black_box(sequencer.mod_out().value(0));
        })
    });
}

criterion_group!(
    benches,
    bench_oscillator_cores,
    bench_envelopes,
    bench_lfos,
    bench_filter,
    bench_wave_sequencer
);
criterion_main!(benches);
