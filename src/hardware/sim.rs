//! Simulated acquisition board.
//!
//! Backs the test suite and host-side development: the hardware ring is an
//! in-memory buffer fed by the test (or by a free-running synthetic clock),
//! and every generator, trigger and analog-output call is recorded so tests
//! can assert on the exact call sequence the firmware produced.

use std::sync::Mutex;
use std::time::Instant;

use super::design_parameters::HW_RING;
use super::{
    DaqBoard, HalError, InputChannel, PinDirection, PinState, TriggerSource, TriggerState,
};

/// Recorded generator state.
#[derive(Debug, Clone, Default)]
pub struct GeneratorSnapshot {
    pub enabled: bool,
    pub amplitude: f64,
    pub frequency: f64,
    pub waveform: Vec<f32>,
    pub resets: u32,
    /// Every amplitude passed to `gen_set_amp`, in call order.
    pub amp_calls: Vec<f64>,
    /// Number of `gen_set_waveform` uploads.
    pub uploads: u32,
}

#[derive(Debug)]
struct SimState {
    reference: Vec<i16>,
    measurement: Vec<i16>,
    write_pointer: u32,
    write_pointer_reads: u64,
    trigger_source: Option<TriggerSource>,
    decimation: u32,
    trigger_delay: u32,
    acq_started: bool,
    acq_stopped: bool,
    generator: GeneratorSnapshot,
    ao_writes: Vec<(u32, f64)>,
    fail_ao: bool,
    free_run: Option<FreeRun>,
}

#[derive(Debug)]
struct FreeRun {
    started: Instant,
    samples_per_second: f64,
}

/// In-memory stand-in for the acquisition board.
pub struct SimBoard {
    state: Mutex<SimState>,
}

impl Default for SimBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBoard {
    pub fn new() -> Self {
        SimBoard {
            state: Mutex::new(SimState {
                reference: vec![0; HW_RING as usize],
                measurement: vec![0; HW_RING as usize],
                write_pointer: 0,
                write_pointer_reads: 0,
                trigger_source: None,
                decimation: 0,
                trigger_delay: 0,
                acq_started: false,
                acq_stopped: false,
                generator: GeneratorSnapshot::default(),
                ao_writes: Vec::new(),
                fail_ao: false,
                free_run: None,
            }),
        }
    }

    /// A board whose write pointer advances in real time over a pre-filled
    /// sine pattern. Lets the daemon run end-to-end on a development host
    /// where no vendor driver exists.
    pub fn free_running(samples_per_second: f64) -> Self {
        let board = Self::new();
        {
            let mut state = board.lock();
            for k in 0..HW_RING as usize {
                // 64-sample period; HW_RING is an integer number of periods.
                let phase = 2.0 * std::f64::consts::PI * (k % 64) as f64 / 64.0;
                let sample = (2000.0 * phase.sin()) as i16;
                state.reference[k] = sample;
                state.measurement[k] = sample;
            }
            state.free_run = Some(FreeRun {
                started: Instant::now(),
                samples_per_second,
            });
        }
        board
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append samples to the hardware ring and advance the write pointer,
    /// as the DMA engine would.
    pub fn feed(&self, reference: &[i16], measurement: &[i16]) {
        assert_eq!(reference.len(), measurement.len());
        let mut state = self.lock();
        assert!(state.free_run.is_none(), "feeding a free-running board");
        let mut pos = state.write_pointer as usize;
        for (&r, &m) in reference.iter().zip(measurement) {
            state.reference[pos] = r;
            state.measurement[pos] = m;
            pos = (pos + 1) % HW_RING as usize;
        }
        state.write_pointer = pos as u32;
    }

    /// Make subsequent `ao_set` calls fail (or succeed again).
    pub fn set_ao_fault(&self, fail: bool) {
        self.lock().fail_ao = fail;
    }

    pub fn generator(&self) -> GeneratorSnapshot {
        self.lock().generator.clone()
    }

    pub fn ao_writes(&self) -> Vec<(u32, f64)> {
        self.lock().ao_writes.clone()
    }

    /// Number of times the firmware sampled the write pointer. Tests use
    /// this to wait until the acquisition engine has taken its baseline.
    pub fn write_pointer_reads(&self) -> u64 {
        self.lock().write_pointer_reads
    }

    pub fn acq_running(&self) -> bool {
        let state = self.lock();
        state.acq_started && !state.acq_stopped
    }

    pub fn decimation(&self) -> u32 {
        self.lock().decimation
    }
}

impl DaqBoard for SimBoard {
    fn gen_reset(&self) -> Result<(), HalError> {
        let mut state = self.lock();
        let resets = state.generator.resets + 1;
        state.generator = GeneratorSnapshot {
            resets,
            ..GeneratorSnapshot::default()
        };
        Ok(())
    }

    fn gen_set_waveform(&self, samples: &[f32]) -> Result<(), HalError> {
        let mut state = self.lock();
        state.generator.waveform = samples.to_vec();
        state.generator.uploads += 1;
        Ok(())
    }

    fn gen_set_freq(&self, hz: f64) -> Result<(), HalError> {
        self.lock().generator.frequency = hz;
        Ok(())
    }

    fn gen_set_amp(&self, volts: f64) -> Result<(), HalError> {
        let mut state = self.lock();
        state.generator.amplitude = volts;
        state.generator.amp_calls.push(volts);
        Ok(())
    }

    fn gen_set_phase_deg(&self, _degrees: f64) -> Result<(), HalError> {
        Ok(())
    }

    fn gen_enable(&self) -> Result<(), HalError> {
        self.lock().generator.enabled = true;
        Ok(())
    }

    fn gen_disable(&self) -> Result<(), HalError> {
        self.lock().generator.enabled = false;
        Ok(())
    }

    fn acq_reset(&self) -> Result<(), HalError> {
        let mut state = self.lock();
        state.acq_started = false;
        state.acq_stopped = false;
        Ok(())
    }

    fn acq_set_decimation(&self, decimation: u32) -> Result<(), HalError> {
        self.lock().decimation = decimation;
        Ok(())
    }

    fn acq_set_trigger_delay(&self, samples: u32) -> Result<(), HalError> {
        self.lock().trigger_delay = samples;
        Ok(())
    }

    fn acq_set_trigger_src(&self, source: TriggerSource) -> Result<(), HalError> {
        self.lock().trigger_source = Some(source);
        Ok(())
    }

    fn acq_start(&self) -> Result<(), HalError> {
        self.lock().acq_started = true;
        Ok(())
    }

    fn acq_stop(&self) -> Result<(), HalError> {
        self.lock().acq_stopped = true;
        Ok(())
    }

    fn acq_get_write_pointer(&self) -> Result<u32, HalError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.write_pointer_reads += 1;
        if let Some(free_run) = &state.free_run {
            let elapsed = free_run.started.elapsed().as_secs_f64();
            state.write_pointer =
                ((elapsed * free_run.samples_per_second) as u64 % u64::from(HW_RING)) as u32;
        }
        Ok(state.write_pointer)
    }

    fn acq_get_trigger_state(&self) -> Result<TriggerState, HalError> {
        // The simulated board auto-arms.
        Ok(TriggerState::Triggered)
    }

    fn acq_read_raw(
        &self,
        channel: InputChannel,
        start_pos: u32,
        dst: &mut [i16],
    ) -> Result<(), HalError> {
        if dst.len() > HW_RING as usize {
            return Err(HalError::ReadTooLong {
                count: dst.len() as u32,
            });
        }
        let state = self.lock();
        let source = match channel {
            InputChannel::Reference => &state.reference,
            InputChannel::Measurement => &state.measurement,
        };
        for (offset, slot) in dst.iter_mut().enumerate() {
            *slot = source[(start_pos as usize + offset) % HW_RING as usize];
        }
        Ok(())
    }

    fn dio_set_direction(&self, _pin: u8, _direction: PinDirection) -> Result<(), HalError> {
        Ok(())
    }

    fn dio_set(&self, _pin: u8, _level: PinState) -> Result<(), HalError> {
        Ok(())
    }

    fn ao_set(&self, channel: u32, volts: f64) -> Result<(), HalError> {
        let mut state = self.lock();
        if state.fail_ao {
            return Err(HalError::Driver {
                call: "ao_set",
                code: -1,
            });
        }
        if channel >= super::design_parameters::AO_CHANNELS {
            return Err(HalError::AoChannel(channel));
        }
        state.ao_writes.push((channel, volts));
        Ok(())
    }
}
