//! The per-voice modulation matrix.
//!
//! Rows are sources, columns are destinations. The routing program
//! (intensities, enables, hardwired cells, per-column defaults) lives in
//! [`ModMatrixParams`] and is part of the voice parameters; the matrix
//! itself only holds the slot bindings and the per-block value arrays.
//!
//! Per block the owning voice gathers every bound source slot into
//! `source_values`, calls [`ModMatrix::run`], then scatters `dest_values`
//! back into the bound destination slots. A destination without a binding
//! still gets its column computed (handy when debugging a routing) but is
//! never written anywhere.

use super::ModSlotRef;
use serde::{Deserialize, Serialize};

pub const NUM_MOD_SOURCES: usize = 22;
pub const NUM_MOD_DESTINATIONS: usize = 62;

/// Matrix source rows. WS rows are only wired in the wave-sequence flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(usize)]
pub enum ModSource {
    Lfo1Norm = 0,
    Lfo1Inv = 1,
    Lfo2Norm = 2,
    Lfo2Inv = 3,
    AmpEgNorm = 4,
    AmpEgBias = 5,
    FilterEgNorm = 6,
    FilterEgBias = 7,
    AuxEgNorm = 8,
    AuxEgBias = 9,
    WsWaveMixA = 10,
    WsWaveMixB = 11,
    WsWaveIndexA = 12,
    WsWaveIndexB = 13,
    WsWaveAmpA = 14,
    WsWaveAmpB = 15,
    WsPitchA = 16,
    WsPitchB = 17,
    WsStepSeqMod = 18,
    WsXfadeDone = 19,
    WsStepNumberA = 20,
    WsStepNumberB = 21,
}

/// Matrix destination columns. Osc5-8 address the second WS oscillator's
/// internal wavetable oscillators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(usize)]
pub enum ModDestination {
    Osc1Fo = 0,
    Osc2Fo = 1,
    Osc3Fo = 2,
    Osc4Fo = 3,
    Osc5Fo = 4,
    Osc6Fo = 5,
    Osc7Fo = 6,
    Osc8Fo = 7,
    Osc1Mod = 8,
    Osc2Mod = 9,
    Osc3Mod = 10,
    Osc4Mod = 11,
    Osc5Mod = 12,
    Osc6Mod = 13,
    Osc7Mod = 14,
    Osc8Mod = 15,
    Osc1Morph = 16,
    Osc2Morph = 17,
    Osc3Morph = 18,
    Osc4Morph = 19,
    Osc5Morph = 20,
    Osc6Morph = 21,
    Osc7Morph = 22,
    Osc8Morph = 23,
    Osc1Shape = 24,
    Osc2Shape = 25,
    Osc3Shape = 26,
    Osc4Shape = 27,
    Lfo1Fo = 28,
    Lfo2Fo = 29,
    Filter1FcEg = 30,
    Filter1FcBipolar = 31,
    Filter2FcEg = 32,
    Filter2FcBipolar = 33,
    DcaEgMod = 34,
    DcaAmpMod = 35,
    DcaPanMod = 36,
    AmpEgRetrigger = 37,
    FilterEgRetrigger = 38,
    AuxEgRetrigger = 39,
    Osc1WsWaveMixA = 40,
    Osc1WsWaveMixB = 41,
    Osc1WsWaveIndexA = 42,
    Osc1WsWaveIndexB = 43,
    Osc1WsWaveAmpA = 44,
    Osc1WsWaveAmpB = 45,
    Osc1WsWavePitchA = 46,
    Osc1WsWavePitchB = 47,
    Osc1WsXFadeDone = 48,
    Osc2WsWaveMixA = 49,
    Osc2WsWaveMixB = 50,
    Osc2WsWaveIndexA = 51,
    Osc2WsWaveIndexB = 52,
    Osc2WsWaveAmpA = 53,
    Osc2WsWaveAmpB = 54,
    Osc2WsWavePitchA = 55,
    Osc2WsWavePitchB = 56,
    Osc2WsXFadeDone = 57,
    WsStepNumberA1 = 58,
    WsStepNumberA2 = 59,
    WsStepNumberB1 = 60,
    WsStepNumberB2 = 61,
}

/// Value transform applied while summing a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModTransform {
    #[default]
    None,
    /// bipolar [-1,1] -> unipolar [0,1]
    BipolarToUnipolar,
    /// unipolar [0,1] -> bipolar [-1,1]
    UnipolarToBipolar,
}

impl ModTransform {
    #[inline]
    fn apply(self, value: f64) -> f64 {
        match self {
            ModTransform::None => value,
            ModTransform::BipolarToUnipolar => 0.5 * value + 0.5,
            ModTransform::UnipolarToBipolar => 2.0 * value - 1.0,
        }
    }
}

/// One enabled cell of the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModRouting {
    pub source: ModSource,
    pub destination: ModDestination,
    /// Hardwired cells ignore the row intensity and apply a fixed scalar.
    pub hardwired: bool,
    pub hardwire_intensity: f64,
}

/// The routing program: row/column intensities, column defaults, and the
/// set of enabled cells. Shared across voices via the parameter snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModMatrixParams {
    pub source_intensity: Vec<f64>,
    pub dest_intensity: Vec<f64>,
    pub dest_default_value: Vec<f64>,
    pub routings: Vec<ModRouting>,
}

impl Default for ModMatrixParams {
    fn default() -> Self {
        Self {
            source_intensity: vec![1.0; NUM_MOD_SOURCES],
            dest_intensity: vec![1.0; NUM_MOD_DESTINATIONS],
            dest_default_value: vec![0.0; NUM_MOD_DESTINATIONS],
            routings: Vec::new(),
        }
    }
}

impl ModMatrixParams {
    /// Enable a user routing; duplicate calls are idempotent.
    pub fn set_routing(&mut self, source: ModSource, destination: ModDestination) {
        if self.find(source, destination).is_none() {
            self.routings.push(ModRouting {
                source,
                destination,
                hardwired: false,
                hardwire_intensity: 1.0,
            });
        }
    }

    /// Enable a hardwired routing with a fixed unity scalar.
    pub fn set_hardwired_routing(&mut self, source: ModSource, destination: ModDestination) {
        self.set_hardwired_routing_with(source, destination, 1.0);
    }

    pub fn set_hardwired_routing_with(
        &mut self,
        source: ModSource,
        destination: ModDestination,
        hardwire_intensity: f64,
    ) {
        match self.find_mut(source, destination) {
            Some(routing) => {
                routing.hardwired = true;
                routing.hardwire_intensity = hardwire_intensity;
            }
            None => self.routings.push(ModRouting {
                source,
                destination,
                hardwired: true,
                hardwire_intensity,
            }),
        }
    }

    pub fn clear_routing(&mut self, source: ModSource, destination: ModDestination) {
        self.routings
            .retain(|r| !(r.source == source && r.destination == destination));
    }

    pub fn set_source_intensity(&mut self, source: ModSource, intensity: f64) {
        self.source_intensity[source as usize] = intensity.clamp(-1.0, 1.0);
    }

    pub fn set_dest_intensity(&mut self, destination: ModDestination, intensity: f64) {
        self.dest_intensity[destination as usize] = intensity.clamp(-1.0, 1.0);
    }

    pub fn set_dest_default_value(&mut self, destination: ModDestination, value: f64) {
        self.dest_default_value[destination as usize] = value;
    }

    fn find(&self, source: ModSource, destination: ModDestination) -> Option<&ModRouting> {
        self.routings
            .iter()
            .find(|r| r.source == source && r.destination == destination)
    }

    fn find_mut(
        &mut self,
        source: ModSource,
        destination: ModDestination,
    ) -> Option<&mut ModRouting> {
        self.routings
            .iter_mut()
            .find(|r| r.source == source && r.destination == destination)
    }
}

#[derive(Debug, Clone, Copy)]
struct DestBinding {
    slot: ModSlotRef,
    transform: ModTransform,
}

/// Row/column modulation router; one per voice.
pub struct ModMatrix {
    sources: [Option<ModSlotRef>; NUM_MOD_SOURCES],
    destinations: [Option<DestBinding>; NUM_MOD_DESTINATIONS],
    source_values: [f64; NUM_MOD_SOURCES],
    dest_values: [f64; NUM_MOD_DESTINATIONS],
}

impl Default for ModMatrix {
    fn default() -> Self {
        Self::new()
    }
}

impl ModMatrix {
    pub fn new() -> Self {
        Self {
            sources: [None; NUM_MOD_SOURCES],
            destinations: [None; NUM_MOD_DESTINATIONS],
            source_values: [0.0; NUM_MOD_SOURCES],
            dest_values: [0.0; NUM_MOD_DESTINATIONS],
        }
    }

    pub fn clear_matrix_arrays(&mut self) {
        self.sources = [None; NUM_MOD_SOURCES];
        self.destinations = [None; NUM_MOD_DESTINATIONS];
        self.source_values = [0.0; NUM_MOD_SOURCES];
        self.dest_values = [0.0; NUM_MOD_DESTINATIONS];
    }

    pub fn add_mod_source(&mut self, source: ModSource, slot: ModSlotRef) {
        self.sources[source as usize] = Some(slot);
    }

    pub fn clear_mod_source(&mut self, source: ModSource) {
        self.sources[source as usize] = None;
    }

    pub fn add_mod_destination(
        &mut self,
        destination: ModDestination,
        slot: ModSlotRef,
        transform: ModTransform,
    ) {
        self.destinations[destination as usize] = Some(DestBinding { slot, transform });
    }

    pub fn clear_mod_destination(&mut self, destination: ModDestination) {
        self.destinations[destination as usize] = None;
    }

    /// Binding for one source row, if registered.
    pub fn source_slot(&self, row: usize) -> Option<ModSlotRef> {
        self.sources.get(row).copied().flatten()
    }

    /// Binding for one destination column, if registered.
    pub fn dest_slot(&self, col: usize) -> Option<ModSlotRef> {
        self.destinations.get(col).copied().flatten().map(|b| b.slot)
    }

    #[inline]
    pub fn dest_value_by_col(&self, col: usize) -> f64 {
        self.dest_values[col]
    }

    /// Bound source rows, for the owning voice's gather pass.
    pub fn bound_sources(&self) -> impl Iterator<Item = (usize, ModSlotRef)> + '_ {
        self.sources
            .iter()
            .enumerate()
            .filter_map(|(row, slot)| slot.map(|s| (row, s)))
    }

    /// Bound destination columns with their computed values, for scatter.
    pub fn bound_destinations(&self) -> impl Iterator<Item = (ModSlotRef, f64)> + '_ {
        self.destinations
            .iter()
            .enumerate()
            .filter_map(|(col, binding)| binding.map(|b| (b.slot, self.dest_values[col])))
    }

    #[inline]
    pub fn set_source_value(&mut self, row: usize, value: f64) {
        self.source_values[row] = value;
    }

    #[inline]
    pub fn dest_value(&self, destination: ModDestination) -> f64 {
        self.dest_values[destination as usize]
    }

    /// Single O(rows x cols) pass: every column's value becomes its default
    /// plus the sum of enabled row contributions.
    pub fn run(&mut self, params: &ModMatrixParams) {
        self.dest_values
            .copy_from_slice(&params.dest_default_value[..NUM_MOD_DESTINATIONS]);

        for routing in &params.routings {
            let row = routing.source as usize;
            let col = routing.destination as usize;

            // a routing with no bound source row contributes nothing
            if self.sources[row].is_none() {
                continue;
            }

            let mut value = self.source_values[row];
            if !routing.hardwired {
                value *= params.source_intensity[row];
            }

            if let Some(binding) = self.destinations[col] {
                value = binding.transform.apply(value);
            }

            self.dest_values[col] += if routing.hardwired {
                value * routing.hardwire_intensity
            } else {
                params.dest_intensity[col] * value
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::modulation::{ModModule, BIPOLAR_MOD, LFO_NORMAL_OUTPUT};
    use approx::assert_relative_eq;

    fn lfo_slot() -> ModSlotRef {
        ModSlotRef::new(ModModule::Lfo(0), LFO_NORMAL_OUTPUT)
    }

    fn osc_slot() -> ModSlotRef {
        ModSlotRef::new(ModModule::Osc(0), BIPOLAR_MOD)
    }

    #[test]
    fn test_unrouted_matrix_outputs_defaults() {
        let mut matrix = ModMatrix::new();
        let mut params = ModMatrixParams::default();
        params.set_dest_default_value(ModDestination::DcaAmpMod, 1.0);
        matrix.run(&params);
        assert_relative_eq!(matrix.dest_value(ModDestination::DcaAmpMod), 1.0);
        assert_relative_eq!(matrix.dest_value(ModDestination::Osc1Fo), 0.0);
    }

    #[test]
    fn test_routing_applies_intensities() {
        let mut matrix = ModMatrix::new();
        let mut params = ModMatrixParams::default();

        matrix.add_mod_source(ModSource::Lfo1Norm, lfo_slot());
        matrix.add_mod_destination(ModDestination::Osc1Fo, osc_slot(), ModTransform::None);
        params.set_routing(ModSource::Lfo1Norm, ModDestination::Osc1Fo);
        params.set_source_intensity(ModSource::Lfo1Norm, 0.5);
        params.set_dest_intensity(ModDestination::Osc1Fo, 0.5);

        matrix.set_source_value(ModSource::Lfo1Norm as usize, 0.8);
        matrix.run(&params);
        assert_relative_eq!(matrix.dest_value(ModDestination::Osc1Fo), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_hardwired_bypasses_intensity() {
        let mut matrix = ModMatrix::new();
        let mut params = ModMatrixParams::default();

        matrix.add_mod_source(ModSource::AmpEgNorm, lfo_slot());
        matrix.add_mod_destination(ModDestination::DcaEgMod, osc_slot(), ModTransform::None);
        params.set_hardwired_routing(ModSource::AmpEgNorm, ModDestination::DcaEgMod);
        // user intensities must not matter for a hardwired cell
        params.set_source_intensity(ModSource::AmpEgNorm, 0.0);
        params.set_dest_intensity(ModDestination::DcaEgMod, 0.0);

        matrix.set_source_value(ModSource::AmpEgNorm as usize, 0.5);
        matrix.run(&params);
        assert_relative_eq!(matrix.dest_value(ModDestination::DcaEgMod), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_unbound_source_row_is_skipped() {
        let mut matrix = ModMatrix::new();
        let mut params = ModMatrixParams::default();
        params.set_routing(ModSource::Lfo1Norm, ModDestination::Osc1Fo);
        matrix.set_source_value(ModSource::Lfo1Norm as usize, 1.0);
        matrix.run(&params);
        assert_relative_eq!(matrix.dest_value(ModDestination::Osc1Fo), 0.0);
    }

    #[test]
    fn test_transforms() {
        let mut matrix = ModMatrix::new();
        let mut params = ModMatrixParams::default();
        matrix.add_mod_source(ModSource::Lfo1Norm, lfo_slot());
        matrix.add_mod_destination(
            ModDestination::AmpEgRetrigger,
            osc_slot(),
            ModTransform::UnipolarToBipolar,
        );
        params.set_routing(ModSource::Lfo1Norm, ModDestination::AmpEgRetrigger);
        matrix.set_source_value(ModSource::Lfo1Norm as usize, 0.75);
        matrix.run(&params);
        assert_relative_eq!(
            matrix.dest_value(ModDestination::AmpEgRetrigger),
            0.5,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_one_source_many_destinations() {
        let mut matrix = ModMatrix::new();
        let mut params = ModMatrixParams::default();
        matrix.add_mod_source(ModSource::AuxEgNorm, lfo_slot());
        for dest in [
            ModDestination::Osc1Morph,
            ModDestination::Osc2Morph,
            ModDestination::Osc3Morph,
            ModDestination::Osc4Morph,
        ] {
            matrix.add_mod_destination(dest, osc_slot(), ModTransform::None);
            params.set_hardwired_routing(ModSource::AuxEgNorm, dest);
        }
        matrix.set_source_value(ModSource::AuxEgNorm as usize, 0.33);
        matrix.run(&params);
        for dest in [
            ModDestination::Osc1Morph,
            ModDestination::Osc2Morph,
            ModDestination::Osc3Morph,
            ModDestination::Osc4Morph,
        ] {
            assert_relative_eq!(matrix.dest_value(dest), 0.33, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_run_is_deterministic() {
        let mut matrix = ModMatrix::new();
        let mut params = ModMatrixParams::default();
        matrix.add_mod_source(ModSource::Lfo1Norm, lfo_slot());
        matrix.add_mod_destination(ModDestination::Osc1Fo, osc_slot(), ModTransform::None);
        params.set_routing(ModSource::Lfo1Norm, ModDestination::Osc1Fo);
        matrix.set_source_value(ModSource::Lfo1Norm as usize, 0.123456789);

        matrix.run(&params);
        let first = matrix.dest_value(ModDestination::Osc1Fo);
        matrix.run(&params);
        assert_eq!(first.to_bits(), matrix.dest_value(ModDestination::Osc1Fo).to_bits());
    }
}
