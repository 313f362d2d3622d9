//! Feed-forward sequencer: replays a host-supplied table of DC levels on the
//! slow analog outputs, one table row per excitation period, repeating every
//! frame.

use log::warn;

use crate::hardware::DaqBoard;
use crate::session::Context;

pub struct FeedForward<'a, B: DaqBoard> {
    board: &'a B,
    ctx: &'a Context,
}

impl<'a, B: DaqBoard> FeedForward<'a, B> {
    pub fn new(board: &'a B, ctx: &'a Context) -> Self {
        FeedForward { board, ctx }
    }

    /// Write the table row for `frame` to the analog outputs.
    ///
    /// A failed AO write is logged and skipped: the level has to land within
    /// the current period to stay phase-locked with the excitation, and a
    /// late write corrupts the next step as well.
    pub fn on_frame_complete(&mut self, frame: i64) {
        let channels = self.ctx.params.num_ff_channels as usize;
        let step = (frame % i64::from(self.ctx.params.periods_per_frame)) as usize;
        let row = &self.ctx.ff_table[step * channels..(step + 1) * channels];
        for (channel, &volts) in row.iter().enumerate() {
            if let Err(err) = self.board.ao_set(channel as u32, f64::from(volts)) {
                warn!("feed-forward write to AO{channel} skipped: {err}");
            }
        }
    }
}
