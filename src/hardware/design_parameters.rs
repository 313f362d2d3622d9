//! Fixed electrical and sizing parameters of the acquisition board.

/// Sample clock of the ADC and of the waveform generator.
pub const ADC_CLOCK_HZ: f64 = 125_000_000.0;

/// Number of samples per channel in the on-device DMA ring.
pub const HW_RING: u32 = 16 * 1024;

/// ADC decimation used for every session.
pub const DECIMATION: u32 = 64;

/// The generator steps through its arbitrary-waveform table once every
/// `CARRIER_DIVISOR` decimated samples; together with [`DECIMATION`] this
/// fixes the excitation carrier frequency.
pub const CARRIER_DIVISOR: u32 = 256;

/// Conversion factor from raw ADC counts (correlated over one period) to
/// volts. Calibration value of the current analog front end.
pub const INT_TO_VOLT: f32 = 0.5 / 200_222.109_375;

/// Number of slow analog outputs available for feed-forward tables.
pub const AO_CHANNELS: u32 = 4;

/// Logical DIO pin wired to the acquisition trigger line of all boards.
pub const TRIGGER_PIN: u8 = 1;

/// TCP port of the session server.
pub const TCP_PORT: u16 = 7777;

/// Memory-ring budget per input channel, in bytes.
pub const RING_BYTES_PER_CHANNEL: usize = 64 << 20;

/// Transmit amplitude in volts before the host (or the lock-in controller)
/// provides a better value.
pub const DEFAULT_TX_AMPLITUDE: f64 = 0.1;

/// Excitation carrier frequency for a given ADC decimation.
pub fn carrier_hz(decimation: u32) -> f64 {
    ADC_CLOCK_HZ / f64::from(decimation) / f64::from(CARRIER_DIVISOR)
}
