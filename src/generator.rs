//! Transmit waveform synthesis and upload.
//!
//! The excitation is a single sine period stored as an arbitrary-waveform
//! table of `decimation * samples_per_tx_period` entries; phase shifts are
//! applied by rebuilding the table rather than through the generator's phase
//! register, which does not retune a running arbitrary waveform.

use std::f64::consts::PI;

use crate::hardware::{DaqBoard, HalError};

/// The arbitrary-waveform table. Allocated once per session and rebuilt in
/// place on every phase change.
pub struct TxWaveform {
    samples: Vec<f32>,
}

impl TxWaveform {
    pub fn new(length: usize) -> Self {
        TxWaveform {
            samples: vec![0.0; length],
        }
    }

    /// Rebuild the table as one sine period with the given phase offset.
    pub fn fill(&mut self, phase_deg: f64) {
        let length = self.samples.len() as f64;
        let phase = phase_deg.to_radians();
        for (i, sample) in self.samples.iter_mut().enumerate() {
            *sample = (2.0 * PI * i as f64 / length + phase).sin() as f32;
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Push a new amplitude and phase to the generator: amplitude register
    /// first, then the rebuilt table.
    pub fn upload<B: DaqBoard>(
        &mut self,
        board: &B,
        amplitude: f64,
        phase_deg: f64,
    ) -> Result<(), HalError> {
        board.gen_set_amp(amplitude)?;
        self.fill(phase_deg);
        board.gen_set_waveform(self.samples())
    }
}

/// Configure and enable the generator at session start.
pub fn start<B: DaqBoard>(
    board: &B,
    waveform: &mut TxWaveform,
    amplitude: f64,
    phase_deg: f64,
    carrier_hz: f64,
) -> Result<(), HalError> {
    board.gen_reset()?;
    waveform.fill(phase_deg);
    board.gen_set_waveform(waveform.samples())?;
    board.gen_set_freq(carrier_hz)?;
    board.gen_set_amp(amplitude)?;
    board.gen_enable()
}

pub fn stop<B: DaqBoard>(board: &B) -> Result<(), HalError> {
    board.gen_disable()
}
