//! Frame-boundary sequencers.
//!
//! At most one variant runs per session, chosen from the handshake flags:
//! the feed-forward sequencer when `ff_enabled` is set, otherwise the
//! lock-in controller when `tx_enabled` is set. The feed-forward variant is
//! invoked synchronously from the acquisition task so its AO writes land
//! within the period that just completed; the lock-in controller runs on its
//! own thread because a correction blocks for the waveform settle time.

pub mod feedforward;
pub mod lockin;

pub use feedforward::FeedForward;
pub use lockin::LockIn;
