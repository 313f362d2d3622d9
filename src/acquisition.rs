//! Acquisition engine.
//!
//! # Design
//! One long-lived task per session keeps the memory ring in lock-step with
//! the on-device DMA ring. Each poll reads the hardware write pointer,
//! computes how many samples are safe to consume, copies them out channel by
//! channel in at most two extents around the memory ring's wrap point, and
//! publishes the new sample count. Whenever the published count completes a
//! new excitation period, the feed-forward sequencer (if any) is invoked
//! synchronously; the lock-in variant observes the published counter from
//! its own thread instead.
//!
//! The sample under the DMA cursor is still being written, so each poll
//! consumes `distance - 1` samples and leaves the cursor one short of the
//! observed write pointer; the held-back sample is picked up by the next
//! poll. Consuming up to the write pointer itself would be off by one the
//! other way and silently drop a sample per poll.

use std::thread;

use log::{info, warn};

use crate::hardware::design_parameters::HW_RING;
use crate::hardware::{
    DaqBoard, HalError, InputChannel, PinDirection, PinState, TriggerSource, TriggerState,
};
use crate::sequencer::FeedForward;
use crate::session::Context;

pub struct Acquirer<'a, B: DaqBoard> {
    board: &'a B,
    ctx: &'a Context,
    sequencer: Option<FeedForward<'a, B>>,
    /// Hardware-ring index of the next sample to consume.
    cursor: u32,
    /// Newest period index already dispatched to the sequencer.
    previous: i64,
    reference: Vec<i16>,
    measurement: Vec<i16>,
}

impl<'a, B: DaqBoard> Acquirer<'a, B> {
    pub fn new(board: &'a B, ctx: &'a Context, sequencer: Option<FeedForward<'a, B>>) -> Self {
        Acquirer {
            board,
            ctx,
            sequencer,
            cursor: 0,
            previous: -1,
            reference: vec![0; HW_RING as usize],
            measurement: vec![0; HW_RING as usize],
        }
    }

    /// Arm the trigger, then poll the hardware until the session ends.
    pub fn run(&mut self) -> Result<(), HalError> {
        self.wait_for_trigger()?;
        self.cursor = self.board.acq_get_write_pointer()?;
        while self.ctx.is_running() {
            if self.poll()? == 0 {
                thread::yield_now();
            }
        }
        info!(
            "acquisition finished after {} samples",
            self.ctx.ring.samples_written()
        );
        Ok(())
    }

    /// Drive the shared trigger line and wait for the board to trigger.
    ///
    /// The line is driven regardless of the `is_master` flag; on a
    /// single-board setup the board triggers off its own edge.
    fn wait_for_trigger(&self) -> Result<(), HalError> {
        let pin = self.ctx.config.trigger_pin;
        self.board.dio_set_direction(pin, PinDirection::Output)?;
        self.board.dio_set(pin, PinState::Low)?;
        self.board
            .acq_set_trigger_src(TriggerSource::ExternalPositiveEdge)?;
        self.board.dio_set(pin, PinState::High)?;
        while self.ctx.is_running() {
            if self.board.acq_get_trigger_state()? == TriggerState::Triggered {
                return Ok(());
            }
            thread::yield_now();
        }
        Ok(())
    }

    /// One poll: consume whatever the hardware has completed, publish it and
    /// dispatch new frame boundaries. Returns the number of samples
    /// consumed.
    pub fn poll(&mut self) -> Result<u32, HalError> {
        let write_pointer = self.board.acq_get_write_pointer()?;
        let distance = write_pointer.wrapping_sub(self.cursor) % HW_RING;
        let available = distance.saturating_sub(1);
        if available == 0 {
            return Ok(0);
        }

        // Split at the memory ring's wrap point; the hardware read itself
        // wraps transparently.
        let mut remaining = available as usize;
        while remaining > 0 {
            let extent = remaining.min(self.ctx.ring.extent_to_wrap());
            let measurement = &mut self.measurement[..extent];
            let reference = &mut self.reference[..extent];
            self.board
                .acq_read_raw(InputChannel::Measurement, self.cursor, measurement)?;
            self.board
                .acq_read_raw(InputChannel::Reference, self.cursor, reference)?;
            self.ctx.ring.append(reference, measurement);
            self.cursor = (self.cursor + extent as u32) % HW_RING;
            remaining -= extent;
        }

        self.dispatch_frames();
        Ok(available)
    }

    fn dispatch_frames(&mut self) {
        let current = self.ctx.current_frame();
        if current <= self.previous {
            return;
        }
        if current - self.previous > 1 {
            // The consumer side stays aligned with real time: late frames
            // are dropped, only the newest boundary fires.
            warn!(
                "frames {}..{} completed within one poll, sequencing only {}",
                self.previous + 1,
                current,
                current
            );
        }
        if let Some(sequencer) = &mut self.sequencer {
            sequencer.on_frame_complete(current);
        }
        self.previous = current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::sim::SimBoard;
    use crate::ring::Ring;
    use crate::session::SessionParams;
    use crate::Config;

    fn context(samples_per_period: u32, frames: usize, ff_table: Vec<f32>) -> Context {
        let ff_enabled = !ff_table.is_empty();
        let params = SessionParams {
            samples_per_period,
            samples_per_tx_period: samples_per_period,
            periods_per_frame: if ff_enabled { 4 } else { 1 },
            num_ff_channels: if ff_enabled { 2 } else { 0 },
            tx_enabled: false,
            ff_enabled,
            is_master: false,
        };
        let ring = Ring::new(frames, samples_per_period as usize);
        Context::new(params, Config::default(), ring, ff_table)
    }

    /// Samples 0, 1, 2, ... on the measurement channel, negated on the
    /// reference channel.
    fn feed_counting(board: &SimBoard, start: i16, len: usize) {
        let measurement: Vec<i16> = (0..len).map(|k| start.wrapping_add(k as i16)).collect();
        let reference: Vec<i16> = measurement.iter().map(|&s| s.wrapping_neg()).collect();
        board.feed(&reference, &measurement);
    }

    #[test]
    fn poll_holds_back_the_in_flight_sample() {
        let board = SimBoard::new();
        let ctx = context(4, 8, Vec::new());
        let mut acquirer = Acquirer::new(&board, &ctx, None);

        feed_counting(&board, 0, 8);
        assert_eq!(acquirer.poll().unwrap(), 7);
        assert_eq!(ctx.ring.samples_written(), 7);

        // The next poll with no new data must not consume the guard slot.
        assert_eq!(acquirer.poll().unwrap(), 0);

        // One more sample releases it.
        feed_counting(&board, 8, 1);
        assert_eq!(acquirer.poll().unwrap(), 1);
        assert_eq!(ctx.ring.samples_written(), 8);

        let mut out = [0i16; 8];
        ctx.ring
            .read_span(0, InputChannel::Measurement, &mut out)
            .unwrap();
        assert_eq!(out, [0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn consumes_across_the_hardware_ring_wrap() {
        let board = SimBoard::new();
        // Ring large enough to hold more than one trip around the hardware
        // ring without lapping.
        let ctx = context(100, 200, Vec::new());
        let mut acquirer = Acquirer::new(&board, &ctx, None);

        let mut fed = 0usize;
        while fed < HW_RING as usize + 600 {
            feed_counting(&board, (fed % 1000) as i16, 200);
            fed += 200;
            acquirer.poll().unwrap();
        }
        assert_eq!(ctx.ring.samples_written(), fed as u64 - 1);

        // Spot-check a span that crossed the hardware wrap.
        let first = HW_RING as u64 - 3;
        let mut out = [0i16; 6];
        ctx.ring
            .read_span(first, InputChannel::Measurement, &mut out)
            .unwrap();
        let expected: Vec<i16> = (0..6).map(|k| (((first as usize + k) % 1000) % 200) as i16
            + (((first as usize + k) / 200 * 200) % 1000) as i16)
            .collect();
        // Each fed chunk restarts its count at (fed % 1000).
        assert_eq!(&out[..], &expected[..]);
    }

    #[test]
    fn wrapped_memory_append_is_split_into_two_extents() {
        let board = SimBoard::new();
        let ctx = context(4, 3, Vec::new()); // 12-sample memory ring
        let mut acquirer = Acquirer::new(&board, &ctx, None);

        feed_counting(&board, 0, 10);
        acquirer.poll().unwrap(); // 9 consumed, tail at 9
        feed_counting(&board, 10, 8);
        acquirer.poll().unwrap(); // 8 consumed: extents of 3 and 5

        assert_eq!(ctx.ring.samples_written(), 17);
        let mut out = [0i16; 8];
        ctx.ring
            .read_span(9, InputChannel::Measurement, &mut out)
            .unwrap();
        assert_eq!(out, [9, 10, 11, 12, 13, 14, 15, 16]);
    }

    #[test]
    fn each_completed_period_fires_the_sequencer_once() {
        let board = SimBoard::new();
        let table = vec![0.0, 0.0, 0.25, 0.5, 0.5, 1.0, 0.75, 1.5];
        let ctx = context(32, 8, table);
        let sequencer = FeedForward::new(&board, &ctx);
        let mut acquirer = Acquirer::new(&board, &ctx, Some(sequencer));

        // Ten periods, fed one period at a time, plus the guard sample.
        for _ in 0..10 {
            feed_counting(&board, 0, 32);
            acquirer.poll().unwrap();
        }
        feed_counting(&board, 0, 1);
        acquirer.poll().unwrap();

        let ao0: Vec<f64> = board
            .ao_writes()
            .iter()
            .filter(|(channel, _)| *channel == 0)
            .map(|&(_, volts)| volts)
            .collect();
        assert_eq!(
            ao0,
            vec![0.0, 0.25, 0.5, 0.75, 0.0, 0.25, 0.5, 0.75, 0.0, 0.25]
        );
    }

    #[test]
    fn overrun_skips_to_the_newest_frame() {
        let board = SimBoard::new();
        let table = vec![0.0, 0.0, 0.25, 0.5, 0.5, 1.0, 0.75, 1.5];
        let ctx = context(32, 8, table);
        let sequencer = FeedForward::new(&board, &ctx);
        let mut acquirer = Acquirer::new(&board, &ctx, Some(sequencer));

        // Three periods arrive in a single poll: only the newest boundary
        // (frame 2, table row 2) may fire.
        feed_counting(&board, 0, 3 * 32 + 1);
        acquirer.poll().unwrap();

        let writes = board.ao_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], (0, 0.5));
    }
}
