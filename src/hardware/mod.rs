//! Hardware abstraction for the acquisition board.
//!
//! # Design
//! Every hardware interaction of the firmware goes through the [`DaqBoard`]
//! trait: the waveform generator, the ADC acquisition unit, the digital pins
//! used for the shared trigger line, and the slow analog outputs. The trait
//! mirrors the vendor driver one call per operation so that failures can be
//! attributed precisely, and takes `&self` throughout — the vendor driver is
//! process-global and serialises access internally, and the simulated board
//! guards its state with a mutex.
//!
//! Two implementations exist: [`sim::SimBoard`] for the test suite and
//! host-side development, and the vendor FFI adapter behind the `hardware`
//! feature for the real board.

pub mod design_parameters;
#[cfg(feature = "hardware")]
pub mod rp;
pub mod sim;

use thiserror::Error;

/// The two acquisition inputs. The reference input carries the pick-up coil
/// signal used by the lock-in controller; the measurement input carries the
/// signal of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputChannel {
    Reference,
    Measurement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Now,
    ExternalPositiveEdge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    Triggered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinDirection {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinState {
    Low,
    High,
}

/// Faults reported by the board. Any of these ends the running session; only
/// the feed-forward sequencer deliberately swallows [`HalError`] from its AO
/// writes (a late output is worse than a skipped one).
#[derive(Debug, Error)]
pub enum HalError {
    #[error("driver call {call} failed with status {code}")]
    Driver { call: &'static str, code: i32 },
    #[error("analog output channel {0} does not exist")]
    AoChannel(u32),
    #[error("raw read of {count} samples exceeds the hardware ring")]
    ReadTooLong { count: u32 },
}

/// Operations of the acquisition board.
///
/// All calls are synchronous and non-blocking; `acq_read_raw` copies out of
/// the DMA ring and wraps transparently past the end of the hardware ring.
pub trait DaqBoard {
    fn gen_reset(&self) -> Result<(), HalError>;
    /// Upload an arbitrary waveform table. The generator replays the table
    /// at the carrier frequency configured with [`DaqBoard::gen_set_freq`].
    fn gen_set_waveform(&self, samples: &[f32]) -> Result<(), HalError>;
    fn gen_set_freq(&self, hz: f64) -> Result<(), HalError>;
    fn gen_set_amp(&self, volts: f64) -> Result<(), HalError>;
    fn gen_set_phase_deg(&self, degrees: f64) -> Result<(), HalError>;
    fn gen_enable(&self) -> Result<(), HalError>;
    fn gen_disable(&self) -> Result<(), HalError>;

    fn acq_reset(&self) -> Result<(), HalError>;
    fn acq_set_decimation(&self, decimation: u32) -> Result<(), HalError>;
    fn acq_set_trigger_delay(&self, samples: u32) -> Result<(), HalError>;
    fn acq_set_trigger_src(&self, source: TriggerSource) -> Result<(), HalError>;
    fn acq_start(&self) -> Result<(), HalError>;
    fn acq_stop(&self) -> Result<(), HalError>;
    fn acq_get_write_pointer(&self) -> Result<u32, HalError>;
    fn acq_get_trigger_state(&self) -> Result<TriggerState, HalError>;
    /// Copy `dst.len()` samples of `channel` out of the hardware ring,
    /// starting at `start_pos` and wrapping past the end of the ring.
    fn acq_read_raw(
        &self,
        channel: InputChannel,
        start_pos: u32,
        dst: &mut [i16],
    ) -> Result<(), HalError>;

    fn dio_set_direction(&self, pin: u8, direction: PinDirection) -> Result<(), HalError>;
    fn dio_set(&self, pin: u8, level: PinState) -> Result<(), HalError>;
    /// Drive one of the slow analog outputs.
    fn ao_set(&self, channel: u32, volts: f64) -> Result<(), HalError>;
}
