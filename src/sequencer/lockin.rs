//! Lock-in amplitude/phase controller for the transmit chain.
//!
//! # Design
//! Once per newly-completed excitation period the controller correlates the
//! reference channel against one period of cosine and sine (lookup tables
//! computed at session start), turning the period into a single
//! amplitude/phase measurement. A PI loop per quantity then drives the
//! generator amplitude and the waveform phase toward the setpoints, and a
//! small state machine tracks whether both measurements sit inside their
//! error bands (`LOCKED`) or not (`SEARCHING`).
//!
//! # Phase convention
//! The phase is recovered as `atan2(a, b)` — arguments deliberately swapped
//! relative to the usual `atan2(y, x)`. For a reference `A·sin(θ + φ)` the
//! correlation sums are `a = (N/2)·A·sin φ` and `b = (N/2)·A·cos φ`, so this
//! argument order returns `φ` directly, with zero meaning a pure sine in
//! phase with the excitation table.

use std::thread;
use std::time::Duration;

use log::{debug, error, warn};

use crate::generator::TxWaveform;
use crate::hardware::design_parameters::INT_TO_VOLT;
use crate::hardware::{DaqBoard, HalError, InputChannel};
use crate::session::Context;

/// Loop gains, error bands and setpoints.
#[derive(Debug, Clone, Copy)]
pub struct Gains {
    pub kp: f32,
    pub ki: f32,
    pub kp_phase: f32,
    pub ki_phase: f32,
    /// Relative amplitude error band.
    pub eps_amplitude: f32,
    /// Absolute phase error band in degrees.
    pub eps_phase: f32,
    pub target_amplitude: f32,
    pub target_phase: f32,
}

impl Default for Gains {
    fn default() -> Self {
        Gains {
            kp: 0.2,
            ki: 0.8,
            kp_phase: 0.05,
            ki_phase: 0.95,
            eps_amplitude: 0.001,
            eps_phase: 0.3,
            target_amplitude: 0.5,
            target_phase: 0.0,
        }
    }
}

/// Wrap an angle to [-180, 180] degrees.
pub fn wrap_degrees(degrees: f32) -> f32 {
    (degrees + 180.0).rem_euclid(360.0) - 180.0
}

/// Correlate one period of the reference channel against the lookup tables.
pub fn fourier_coefficients(period: &[i16], cos_lut: &[f32], sin_lut: &[f32]) -> (f32, f32) {
    let mut a = 0.0f32;
    let mut b = 0.0f32;
    for ((&sample, &cos), &sin) in period.iter().zip(cos_lut).zip(sin_lut) {
        a += f32::from(sample) * cos;
        b += f32::from(sample) * sin;
    }
    (a, b)
}

/// Amplitude in counts and phase in degrees from the correlation sums.
pub fn amplitude_phase(a: f32, b: f32) -> (f32, f32) {
    (a.hypot(b), a.atan2(b).to_degrees())
}

/// The PI loop pair with its lock state machine. Pure arithmetic, no
/// hardware: one `update` per measured period.
pub struct Controller {
    gains: Gains,
    esum: f32,
    epsum: f32,
    locked: bool,
}

impl Controller {
    pub fn new(gains: Gains, initial_amplitude: f32) -> Self {
        Controller {
            gains,
            // Seed the integrator so the first correction continues from the
            // amplitude the generator is already producing.
            esum: initial_amplitude / gains.ki,
            epsum: 0.0,
            locked: false,
        }
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    /// Feed one measurement. Returns the next transmit amplitude and phase,
    /// or `None` when both errors are inside their bands and the generator
    /// should be left alone.
    pub fn update(&mut self, amplitude_v: f32, phase_deg: f32) -> Option<(f32, f32)> {
        let g = &self.gains;
        let e = g.target_amplitude - amplitude_v;
        let ep = g.target_phase - phase_deg;

        if e.abs() / g.target_amplitude <= g.eps_amplitude && ep.abs() <= g.eps_phase {
            self.locked = true;
            return None;
        }
        self.locked = false;

        let amplitude = g.kp * e + g.ki * self.esum;
        self.esum += e;

        let phase = wrap_degrees(g.kp_phase * ep + g.ki_phase * self.epsum);
        self.epsum += ep;
        // Anti-windup: the integral branch alone may never command more
        // than the wrap limit.
        let clamp = 180.0 / g.ki_phase;
        self.epsum = self.epsum.clamp(-clamp, clamp);

        Some((amplitude, phase))
    }
}

/// Thread body of the lock-in sequencer variant.
pub struct LockIn<'a, B: DaqBoard> {
    board: &'a B,
    ctx: &'a Context,
    cos_lut: Vec<f32>,
    sin_lut: Vec<f32>,
    period: Vec<i16>,
    waveform: TxWaveform,
    controller: Controller,
    last_frame: i64,
}

impl<'a, B: DaqBoard> LockIn<'a, B> {
    pub fn new(board: &'a B, ctx: &'a Context) -> Self {
        let n = ctx.params.samples_per_period as usize;
        let mut cos_lut = Vec::with_capacity(n);
        let mut sin_lut = Vec::with_capacity(n);
        for k in 0..n {
            let theta = 2.0 * std::f64::consts::PI * k as f64 / n as f64;
            cos_lut.push(theta.cos() as f32);
            sin_lut.push(theta.sin() as f32);
        }
        let tx_length =
            ctx.config.decimation as usize * ctx.params.samples_per_tx_period as usize;
        let initial_amplitude = ctx.tx().amplitude as f32;
        LockIn {
            board,
            ctx,
            cos_lut,
            sin_lut,
            period: vec![0; n],
            waveform: TxWaveform::new(tx_length),
            controller: Controller::new(Gains::default(), initial_amplitude),
            last_frame: -1,
        }
    }

    /// Poll the frame counter and correct once per new period until the
    /// session ends. A hardware fault ends the session.
    pub fn run(&mut self) {
        while self.ctx.is_running() {
            let current = self.ctx.current_frame();
            if current < 0 || current == self.last_frame {
                thread::yield_now();
                continue;
            }
            self.last_frame = current;
            if let Err(err) = self.process_frame(current) {
                error!("lock-in controller stopped: {err}");
                self.ctx.stop();
                return;
            }
        }
    }

    fn process_frame(&mut self, frame: i64) -> Result<(), HalError> {
        let n = self.period.len() as u64;
        let first = frame as u64 * n;
        if let Err(err) = self
            .ctx
            .ring
            .read_span(first, InputChannel::Reference, &mut self.period)
        {
            // The acquisition engine lapped this period before we got to it;
            // the next one will be picked up on time.
            warn!("lock-in skipped period {frame}: {err}");
            return Ok(());
        }

        let (a, b) = fourier_coefficients(&self.period, &self.cos_lut, &self.sin_lut);
        let (amplitude_counts, phase) = amplitude_phase(a, b);
        let amplitude_v = amplitude_counts * INT_TO_VOLT;

        let correction = self.controller.update(amplitude_v, phase);
        self.ctx.set_searching(!self.controller.locked());
        if let Some((amplitude, phase_deg)) = correction {
            debug!(
                "period {frame}: measured {amplitude_v:.4} V / {phase:.2} deg, \
                 commanding {amplitude:.4} V / {phase_deg:.2} deg"
            );
            {
                let mut tx = self.ctx.tx();
                tx.amplitude = f64::from(amplitude);
                tx.phase_deg = f64::from(phase_deg);
            }
            // The tx lock is released before touching the generator.
            self.waveform
                .upload(self.board, f64::from(amplitude), f64::from(phase_deg))?;
            // Let the generator settle before the next period is analysed.
            thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }
}
