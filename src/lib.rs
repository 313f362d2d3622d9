//! Firmware process for a dual-channel RF acquisition board.
//!
//! # Design
//! The board excites a coil through its waveform generator, samples two
//! inputs into a host-RAM ring, and serves a single host client over TCP.
//! One session at a time: the server accepts a connection, reads the
//! session parameters, then runs three cooperating tasks until the host
//! asks for teardown —
//!
//! * the [`acquisition`] engine copies completed samples from the on-device
//!   DMA ring into the memory [`ring`] and announces each completed
//!   excitation period,
//! * a [`sequencer`] variant reacts to period boundaries: either replaying
//!   a feed-forward table on the slow analog outputs, or locking the
//!   transmit amplitude and phase onto the reference channel,
//! * the [`net`] session server answers frame-counter polls, streams
//!   arbitrary resident frames back to the host, and applies transmit
//!   updates, all concurrent with acquisition.
//!
//! All hardware access goes through the [`hardware::DaqBoard`] trait; the
//! simulated board in [`hardware::sim`] runs the full firmware on any host.

pub mod acquisition;
pub mod generator;
pub mod hardware;
pub mod net;
pub mod ring;
pub mod sequencer;
pub mod session;

use hardware::design_parameters;
use thiserror::Error;

/// Session-fatal faults. Each one unwinds to the session server, which
/// tears the tasks down, closes the socket and returns to the accept loop.
#[derive(Debug, Error)]
pub enum Error {
    #[error("hardware fault: {0}")]
    Hal(#[from] hardware::HalError),
    #[error("session socket failed: {0}")]
    Socket(#[from] std::io::Error),
    #[error("refused frame read: {0}")]
    StaleRead(#[from] ring::StaleRead),
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
}

/// Process-level tunables. The defaults describe the production board; the
/// test suite shrinks the ring budget to exercise wrap-around quickly.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Memory-ring budget per input channel, in bytes.
    pub ring_bytes_per_channel: usize,
    pub decimation: u32,
    /// Logical DIO pin wired to the shared acquisition trigger line.
    pub trigger_pin: u8,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: design_parameters::TCP_PORT,
            ring_bytes_per_channel: design_parameters::RING_BYTES_PER_CHANNEL,
            decimation: design_parameters::DECIMATION,
            trigger_pin: design_parameters::TRIGGER_PIN,
        }
    }
}
