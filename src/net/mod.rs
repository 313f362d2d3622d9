//! Session server.
//!
//! # Design
//! One session at a time: the accept loop hands a connected socket to
//! [`serve`], which reads the handshake, sizes and allocates the ring,
//! brings up the transmit and acquisition chains, then runs the command
//! loop on its own thread while the acquisition engine (and, for lock-in
//! sessions, the controller) run on scoped threads borrowing the same
//! session context. Teardown is cooperative: the first party that wants the
//! session gone clears the run flag and shuts the socket down, which wakes
//! everyone else out of their blocking points.

pub mod protocol;

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use log::{error, info, warn};
use zerocopy::byteorder::little_endian::F32;
use zerocopy::{FromBytes, IntoBytes};

use crate::acquisition::Acquirer;
use crate::generator::{self, TxWaveform};
use crate::hardware::{design_parameters, DaqBoard, InputChannel};
use crate::ring::Ring;
use crate::sequencer::{FeedForward, LockIn};
use crate::session::{Context, SessionParams};
use crate::{Config, Error};
use protocol::{Command, Handshake, ReadFramesRequest, TxUpdateRequest};

/// Accept and serve sessions forever. Only a failure to bind (or accept)
/// returns; per-session faults are logged and the next session is accepted.
pub fn listen<B: DaqBoard + Sync>(board: &B, config: &Config) -> Result<(), Error> {
    // std sets SO_REUSEADDR on Unix listeners, so a restarted daemon
    // rebinds without waiting out TIME_WAIT.
    let listener = TcpListener::bind(("0.0.0.0", config.port))?;
    info!("listening on port {}", config.port);
    loop {
        let (stream, peer) = listener.accept()?;
        info!("session accepted from {peer}");
        match serve(board, stream, config) {
            Ok(()) => info!("session closed"),
            Err(err) => error!("session aborted: {err}"),
        }
    }
}

/// Run one complete session on an accepted socket: handshake, setup,
/// command loop, teardown.
pub fn serve<B: DaqBoard + Sync>(
    board: &B,
    mut stream: TcpStream,
    config: &Config,
) -> Result<(), Error> {
    let (params, ff_table) = read_handshake(&mut stream)?;
    info!(
        "session: {} samples/period, {} periods/frame, tx {}, feed-forward {} ({} channels), master {}",
        params.samples_per_period,
        params.periods_per_frame,
        params.tx_enabled,
        params.ff_enabled,
        params.num_ff_channels,
        params.is_master,
    );

    let samples_per_frame = params.samples_per_frame();
    let frames_in_memory = config.ring_bytes_per_channel as u64 / (samples_per_frame * 2);
    if frames_in_memory < 2 {
        return Err(Error::InvalidRequest("frame too large for the ring budget"));
    }
    let ring = Ring::new(frames_in_memory as usize, samples_per_frame as usize);
    info!(
        "ring: {} frames of {} samples per channel",
        frames_in_memory, samples_per_frame
    );

    let ctx = Context::new(params, config.clone(), ring, ff_table);
    ctx.register_wake(stream.try_clone()?);

    let mut tx_waveform = TxWaveform::new(
        config.decimation as usize * params.samples_per_tx_period as usize,
    );
    if params.tx_enabled {
        let tx = *ctx.tx();
        generator::start(
            board,
            &mut tx_waveform,
            tx.amplitude,
            tx.phase_deg,
            design_parameters::carrier_hz(config.decimation),
        )?;
    }

    board.acq_reset()?;
    board.acq_set_decimation(config.decimation)?;
    board.acq_set_trigger_delay(0)?;
    board.acq_start()?;

    // Exactly one sequencer variant per session: feed-forward wins when both
    // flags are set, the lock-in controller needs the transmit chain.
    let lockin_selected = params.tx_enabled && !params.ff_enabled;
    ctx.set_searching(lockin_selected);

    let result = thread::scope(|scope| {
        let acquisition_task = scope.spawn(|| {
            let sequencer = params.ff_enabled.then(|| FeedForward::new(board, &ctx));
            let result = Acquirer::new(board, &ctx, sequencer).run();
            if result.is_err() {
                // Without samples the session is dead; wake the server out
                // of its blocking read.
                ctx.stop();
            }
            result
        });
        let lockin_task =
            lockin_selected.then(|| scope.spawn(|| LockIn::new(board, &ctx).run()));

        let result = command_loop(board, &mut stream, &ctx, &mut tx_waveform);
        ctx.stop();

        match acquisition_task.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!("acquisition task failed: {err}"),
            Err(_) => error!("acquisition task panicked"),
        }
        if let Some(task) = lockin_task {
            if task.join().is_err() {
                error!("lock-in task panicked");
            }
        }
        result
    });

    // Best-effort hardware teardown; a fault here must not mask the
    // session's own outcome.
    if params.tx_enabled {
        if let Err(err) = generator::stop(board) {
            warn!("generator disable failed during teardown: {err}");
        }
    }
    if let Err(err) = board.acq_stop() {
        warn!("acquisition stop failed during teardown: {err}");
    }
    result
}

fn read_handshake(stream: &mut TcpStream) -> Result<(SessionParams, Vec<f32>), Error> {
    let mut buffer = [0u8; Handshake::SIZE];
    stream.read_exact(&mut buffer)?;
    let record = Handshake::read_from_bytes(&buffer)
        .map_err(|_| Error::InvalidRequest("malformed handshake record"))?;
    let params = record.params();
    validate(&params)?;

    let mut ff_table = Vec::new();
    if params.ff_enabled {
        let values = params.num_ff_channels as usize * params.periods_per_frame as usize;
        let mut bytes = vec![0u8; values * std::mem::size_of::<f32>()];
        stream.read_exact(&mut bytes)?;
        let table = <[F32]>::ref_from_bytes(&bytes)
            .map_err(|_| Error::InvalidRequest("malformed feed-forward table"))?;
        ff_table = table.iter().map(|value| value.get()).collect();
    }
    Ok((params, ff_table))
}

fn validate(params: &SessionParams) -> Result<(), Error> {
    if params.samples_per_period == 0
        || params.samples_per_tx_period == 0
        || params.periods_per_frame == 0
    {
        return Err(Error::InvalidRequest("sample counts must be non-zero"));
    }
    if params.ff_enabled {
        if params.num_ff_channels == 0 {
            return Err(Error::InvalidRequest("feed-forward enabled without channels"));
        }
        if params.num_ff_channels > design_parameters::AO_CHANNELS {
            return Err(Error::InvalidRequest(
                "more feed-forward channels than analog outputs",
            ));
        }
    }
    Ok(())
}

/// Service the request stream until the host requests teardown (any unknown
/// command code) or the session faults.
fn command_loop<B: DaqBoard>(
    board: &B,
    stream: &mut TcpStream,
    ctx: &Context,
    tx_waveform: &mut TxWaveform,
) -> Result<(), Error> {
    // Span scratch, reused across read requests; grows once to the largest
    // span the host asks for and is bounded by the ring capacity.
    let mut span_buffer: Vec<i16> = Vec::with_capacity(ctx.ring.samples_per_frame());
    loop {
        let mut code = [0u8; 4];
        stream.read_exact(&mut code)?;
        let code = u32::from_le_bytes(code);
        let Ok(command) = Command::try_from(code) else {
            info!("command {code:#x}: host requested teardown");
            return Ok(());
        };
        match command {
            Command::ControlState => {
                let searching = i32::from(ctx.is_searching());
                stream.write_all(&searching.to_le_bytes())?;
            }
            Command::CurrentFrame => {
                stream.write_all(&ctx.current_frame().to_le_bytes())?;
            }
            Command::ReadFrames => {
                let mut buffer = [0u8; ReadFramesRequest::SIZE];
                stream.read_exact(&mut buffer)?;
                let request = ReadFramesRequest::read_from_bytes(&buffer)
                    .map_err(|_| Error::InvalidRequest("malformed read request"))?;
                stream_frames(stream, ctx, &request, &mut span_buffer)?;
            }
            Command::SetTx => {
                let mut buffer = [0u8; TxUpdateRequest::SIZE];
                stream.read_exact(&mut buffer)?;
                let request = TxUpdateRequest::read_from_bytes(&buffer)
                    .map_err(|_| Error::InvalidRequest("malformed transmit update"))?;
                let amplitude = request.amplitude.get();
                let phase_deg = (request.phase_deg.get() + 180.0).rem_euclid(360.0) - 180.0;
                {
                    let mut tx = ctx.tx();
                    tx.amplitude = amplitude;
                    tx.phase_deg = phase_deg;
                }
                info!("transmit update: {amplitude:.4} V, {phase_deg:.2} deg");
                // The lock is released before the upload; the lock-in
                // controller follows the same rule.
                tx_waveform.upload(board, amplitude, phase_deg)?;
            }
        }
    }
}

fn stream_frames(
    stream: &mut TcpStream,
    ctx: &Context,
    request: &ReadFramesRequest,
    span_buffer: &mut Vec<i16>,
) -> Result<(), Error> {
    let count = request.count.get();
    if count == 0 {
        return Ok(());
    }
    let first = request.frame.get();
    if count < 0 || first < 0 {
        return Err(Error::InvalidRequest("negative frame request"));
    }
    let samples = (count as u64).saturating_mul(ctx.ring.samples_per_frame() as u64);
    if samples > ctx.ring.capacity() as u64 {
        // Longer than the ring: the span can never be fully resident.
        return Err(Error::InvalidRequest(
            "read spans more frames than the ring holds",
        ));
    }
    let channel = if request.channel.get() == 1 {
        InputChannel::Measurement
    } else {
        InputChannel::Reference
    };
    // All-or-nothing: the whole span is copied out and validated against
    // the resident window (again after the copy, in case the writer lapped
    // it meanwhile) before a single byte goes onto the socket.
    span_buffer.resize(samples as usize, 0);
    ctx.ring.read_frames(first, count as u64, channel, span_buffer)?;
    stream.write_all(span_buffer.as_bytes())?;
    Ok(())
}
