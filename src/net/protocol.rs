//! On-the-wire records of the host protocol.
//!
//! The protocol has no framing beyond these fixed-size records; server and
//! host stay in lock-step by construction. All fields are little-endian,
//! which is also the native order of the target board, so bulk sample
//! payloads go out as raw `int16` memory.

use num_enum::TryFromPrimitive;
use zerocopy::byteorder::little_endian::{F64, I64, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::session::SessionParams;

/// Command codes of the per-session request stream. Any other code tears
/// the session down; the original host treats that as the regular shutdown
/// path rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum Command {
    /// Poll the lock-in controller: responds 1 while it is still searching.
    ControlState = 0,
    /// Respond with the newest complete frame index.
    CurrentFrame = 1,
    /// Stream frames out of the ring.
    ReadFrames = 2,
    /// Update transmit amplitude and phase.
    SetTx = 3,
}

/// The fixed-layout parameter record opening every session. Followed, iff
/// `ff_enabled`, by `num_ff_channels * periods_per_frame` consecutive `f32`
/// feed-forward values in channel-major order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct Handshake {
    pub samples_per_period: U32,
    pub samples_per_tx_period: U32,
    pub periods_per_frame: U32,
    pub num_ff_channels: U32,
    pub tx_enabled: u8,
    pub ff_enabled: u8,
    pub is_master: u8,
    pub _padding: u8,
}

impl Handshake {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn params(&self) -> SessionParams {
        SessionParams {
            samples_per_period: self.samples_per_period.get(),
            samples_per_tx_period: self.samples_per_tx_period.get(),
            periods_per_frame: self.periods_per_frame.get(),
            num_ff_channels: self.num_ff_channels.get(),
            tx_enabled: self.tx_enabled != 0,
            ff_enabled: self.ff_enabled != 0,
            is_master: self.is_master != 0,
        }
    }

    pub fn from_params(params: &SessionParams) -> Self {
        Handshake {
            samples_per_period: U32::new(params.samples_per_period),
            samples_per_tx_period: U32::new(params.samples_per_tx_period),
            periods_per_frame: U32::new(params.periods_per_frame),
            num_ff_channels: U32::new(params.num_ff_channels),
            tx_enabled: params.tx_enabled.into(),
            ff_enabled: params.ff_enabled.into(),
            is_master: params.is_master.into(),
            _padding: 0,
        }
    }
}

/// Payload of [`Command::ReadFrames`].
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct ReadFramesRequest {
    pub frame: I64,
    pub count: I64,
    pub reserved: I64,
    /// 1 selects the measurement channel, anything else the reference.
    pub channel: I64,
}

impl ReadFramesRequest {
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

/// Payload of [`Command::SetTx`].
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct TxUpdateRequest {
    pub amplitude: F64,
    pub phase_deg: F64,
}

impl TxUpdateRequest {
    pub const SIZE: usize = std::mem::size_of::<Self>();
}
