//! Per-session parameters and shared state.
//!
//! Everything a session owns — the ring, the transmit state, the run flag —
//! lives in one [`Context`] that is created after the handshake and borrowed
//! by the acquisition and sequencer tasks for the lifetime of the session.
//! Nothing survives across sessions except the board handle.

use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::ring::Ring;
use crate::Config;

/// Parameters received in the session handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    pub samples_per_period: u32,
    pub samples_per_tx_period: u32,
    pub periods_per_frame: u32,
    pub num_ff_channels: u32,
    pub tx_enabled: bool,
    pub ff_enabled: bool,
    /// Reserved for multi-board synchronisation; received and logged but not
    /// acted upon.
    pub is_master: bool,
}

impl SessionParams {
    /// Samples per channel in one frame, the unit of host read requests.
    pub fn samples_per_frame(&self) -> u64 {
        u64::from(self.samples_per_period) * u64::from(self.periods_per_frame)
    }
}

/// Transmit amplitude and phase. Mutated by the session server on command 3
/// and by the lock-in controller between corrections; the lock is never held
/// across a waveform upload.
#[derive(Debug, Clone, Copy)]
pub struct TxState {
    pub amplitude: f64,
    pub phase_deg: f64,
}

/// Shared state of one session.
pub struct Context {
    pub params: SessionParams,
    pub config: Config,
    pub ring: Ring,
    /// Feed-forward table, `periods_per_frame` rows of `num_ff_channels`
    /// values. Empty unless feed-forward is enabled; immutable after the
    /// handshake.
    pub ff_table: Vec<f32>,
    tx: Mutex<TxState>,
    running: AtomicBool,
    searching: AtomicBool,
    wake: Mutex<Option<TcpStream>>,
}

impl Context {
    pub fn new(params: SessionParams, config: Config, ring: Ring, ff_table: Vec<f32>) -> Self {
        Context {
            params,
            config,
            ring,
            ff_table,
            tx: Mutex::new(TxState {
                amplitude: crate::hardware::design_parameters::DEFAULT_TX_AMPLITUDE,
                phase_deg: 0.0,
            }),
            running: AtomicBool::new(true),
            searching: AtomicBool::new(false),
            wake: Mutex::new(None),
        }
    }

    pub fn tx(&self) -> MutexGuard<'_, TxState> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// End the session: all tasks observe the flag between iterations, and
    /// the socket is shut down so a session server blocked in a read wakes
    /// up too.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        let wake = self.wake.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stream) = wake.as_ref() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Register the session socket so `stop` can wake a blocked read.
    pub fn register_wake(&self, stream: TcpStream) {
        *self.wake.lock().unwrap_or_else(PoisonError::into_inner) = Some(stream);
    }

    pub fn set_searching(&self, searching: bool) {
        self.searching.store(searching, Ordering::Relaxed);
    }

    /// True while the lock-in controller has not reached its error bands.
    /// Always false in sessions without the controller.
    pub fn is_searching(&self) -> bool {
        self.searching.load(Ordering::Relaxed)
    }

    /// Index of the newest fully-acquired excitation period, `-1` before the
    /// first period completes. Derived from the ring's published counter, so
    /// a reader that sees frame `f` here can read all its samples.
    pub fn current_frame(&self) -> i64 {
        (self.ring.samples_written() / u64::from(self.params.samples_per_period)) as i64 - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> Context {
        let params = SessionParams {
            samples_per_period: 8,
            samples_per_tx_period: 8,
            periods_per_frame: 1,
            num_ff_channels: 0,
            tx_enabled: false,
            ff_enabled: false,
            is_master: false,
        };
        Context::new(params, Config::default(), Ring::new(4, 8), Vec::new())
    }

    #[test]
    fn frame_counter_tracks_whole_periods() {
        let ctx = context();
        assert_eq!(ctx.current_frame(), -1);

        let samples = [0i16; 8];
        ctx.ring.append(&samples[..5], &samples[..5]);
        assert_eq!(ctx.current_frame(), -1);

        ctx.ring.append(&samples[..3], &samples[..3]);
        assert_eq!(ctx.current_frame(), 0);

        ctx.ring.append(&samples, &samples);
        assert_eq!(ctx.current_frame(), 1);
    }

    #[test]
    fn stop_is_sticky() {
        let ctx = context();
        assert!(ctx.is_running());
        ctx.stop();
        assert!(!ctx.is_running());
    }
}
