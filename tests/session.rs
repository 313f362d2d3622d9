//! End-to-end session scenarios: a host client on loopback TCP against the
//! full server running on the simulated board.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use zerocopy::byteorder::little_endian::{F64, I64};
use zerocopy::IntoBytes;

use rfdaq::hardware::sim::SimBoard;
use rfdaq::net::protocol::{Handshake, ReadFramesRequest, TxUpdateRequest};
use rfdaq::session::SessionParams;
use rfdaq::{Config, Error};

const TIMEOUT: Duration = Duration::from_secs(5);

fn base_params() -> SessionParams {
    SessionParams {
        samples_per_period: 4,
        samples_per_tx_period: 4,
        periods_per_frame: 1,
        num_ff_channels: 0,
        tx_enabled: false,
        ff_enabled: false,
        is_master: false,
    }
}

/// A config whose ring holds exactly `frames` frames.
fn small_config(params: &SessionParams, frames: usize) -> Config {
    Config {
        ring_bytes_per_channel: frames * params.samples_per_frame() as usize * 2,
        ..Config::default()
    }
}

struct Harness {
    board: Arc<SimBoard>,
    client: TcpStream,
    server: thread::JoinHandle<Result<(), Error>>,
    params: SessionParams,
}

fn start_session(params: SessionParams, ff_table: &[f32], config: Config) -> Harness {
    let board = Arc::new(SimBoard::new());
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();
    let server_board = board.clone();
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        rfdaq::net::serve(&*server_board, stream, &config)
    });

    let mut client = TcpStream::connect(address).unwrap();
    client.set_read_timeout(Some(TIMEOUT)).unwrap();
    client
        .write_all(Handshake::from_params(&params).as_bytes())
        .unwrap();
    if params.ff_enabled {
        let bytes: Vec<u8> = ff_table.iter().flat_map(|v| v.to_le_bytes()).collect();
        client.write_all(&bytes).unwrap();
    }

    let harness = Harness {
        board,
        client,
        server,
        params,
    };
    harness.wait_for_baseline();
    harness
}

impl Harness {
    /// Block until the acquisition engine has taken its write-pointer
    /// baseline; samples fed before that would be invisible to the session.
    fn wait_for_baseline(&self) {
        let deadline = Instant::now() + TIMEOUT;
        while self.board.write_pointer_reads() == 0 {
            assert!(Instant::now() < deadline, "acquisition engine never started");
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Feed whole frames of identifiable samples: measurement sample `k` of
    /// frame `f` is `f * 100 + k`, reference is offset by 1000.
    fn feed_frames(&self, first_frame: i64, count: i64) {
        let samples_per_frame = self.params.samples_per_frame() as i64;
        for frame in first_frame..first_frame + count {
            let measurement: Vec<i16> = (0..samples_per_frame)
                .map(|k| (frame * 100 + k) as i16)
                .collect();
            let reference: Vec<i16> = measurement.iter().map(|&s| s + 1000).collect();
            self.board.feed(&reference, &measurement);
        }
        // One extra sample releases the slot held back as the in-flight
        // guard, completing the last frame.
        self.board.feed(&[0], &[0]);
    }

    fn command(&mut self, code: u32) {
        self.client.write_all(&code.to_le_bytes()).unwrap();
    }

    fn control_state(&mut self) -> i32 {
        self.command(0);
        let mut bytes = [0u8; 4];
        self.client.read_exact(&mut bytes).unwrap();
        i32::from_le_bytes(bytes)
    }

    fn current_frame(&mut self) -> i64 {
        self.command(1);
        let mut bytes = [0u8; 8];
        self.client.read_exact(&mut bytes).unwrap();
        i64::from_le_bytes(bytes)
    }

    fn wait_for_frame(&mut self, frame: i64) {
        let deadline = Instant::now() + TIMEOUT;
        while self.current_frame() < frame {
            assert!(Instant::now() < deadline, "frame {frame} never completed");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn read_frames(&mut self, frame: i64, count: i64, channel: i64) -> std::io::Result<Vec<i16>> {
        self.command(2);
        let request = ReadFramesRequest {
            frame: I64::new(frame),
            count: I64::new(count),
            reserved: I64::new(0),
            channel: I64::new(channel),
        };
        self.client.write_all(request.as_bytes()).unwrap();
        let mut bytes =
            vec![0u8; count as usize * self.params.samples_per_frame() as usize * 2];
        self.client.read_exact(&mut bytes)?;
        Ok(bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }

    fn set_tx(&mut self, amplitude: f64, phase_deg: f64) {
        self.command(3);
        let request = TxUpdateRequest {
            amplitude: F64::new(amplitude),
            phase_deg: F64::new(phase_deg),
        };
        self.client.write_all(request.as_bytes()).unwrap();
    }

    /// Send an unknown command code and join the server.
    fn shutdown(mut self) -> Result<(), Error> {
        self.command(0xff);
        self.server.join().unwrap()
    }
}

fn expected_frame(frame: i64, samples_per_frame: i64, channel_offset: i16) -> Vec<i16> {
    (0..samples_per_frame)
        .map(|k| (frame * 100 + k) as i16 + channel_offset)
        .collect()
}

#[test]
fn frame_fetch_with_wrap() {
    let params = base_params();
    let mut harness = start_session(params, &[], small_config(&params, 3));

    harness.feed_frames(0, 5);
    harness.wait_for_frame(4);

    // Frames 3 and 4 sit across the ring's wrap point.
    let samples = harness.read_frames(3, 2, 1).unwrap();
    let mut expected = expected_frame(3, 4, 0);
    expected.extend(expected_frame(4, 4, 0));
    assert_eq!(samples, expected);

    // The reference channel is selected by any other channel id.
    let reference = harness.read_frames(4, 1, 0).unwrap();
    assert_eq!(reference, expected_frame(4, 4, 1000));

    harness.shutdown().unwrap();
}

#[test]
fn stale_read_is_rejected_and_closes_the_session() {
    let params = base_params();
    let mut harness = start_session(params, &[], small_config(&params, 3));

    harness.feed_frames(0, 6);
    harness.wait_for_frame(5);

    // Frame 0 was lapped three frames ago; the server writes nothing and
    // tears the session down.
    let result = harness.read_frames(0, 1, 1);
    assert!(result.is_err());

    let outcome = harness.server.join().unwrap();
    assert!(matches!(outcome, Err(Error::StaleRead(_))));
}

#[test]
fn partially_stale_read_writes_nothing() {
    let params = base_params();
    let mut harness = start_session(params, &[], small_config(&params, 3));

    harness.feed_frames(0, 6);
    harness.wait_for_frame(5);

    // Frames 2 and 3 straddle the window edge: 2 is lapped, 3 is resident.
    // The refusal is all-or-nothing, so not even frame 3's bytes may
    // precede the close.
    harness.command(2);
    let request = ReadFramesRequest {
        frame: I64::new(2),
        count: I64::new(2),
        reserved: I64::new(0),
        channel: I64::new(1),
    };
    harness.client.write_all(request.as_bytes()).unwrap();

    let mut buffer = [0u8; 64];
    assert_eq!(harness.client.read(&mut buffer).unwrap(), 0);

    let outcome = harness.server.join().unwrap();
    assert!(matches!(outcome, Err(Error::StaleRead(_))));
}

#[test]
fn empty_read_does_not_advance_the_socket() {
    let params = base_params();
    let mut harness = start_session(params, &[], small_config(&params, 3));

    harness.feed_frames(0, 2);
    harness.wait_for_frame(1);

    let samples = harness.read_frames(1, 0, 1).unwrap();
    assert!(samples.is_empty());

    // The command stream is still in lock-step.
    assert_eq!(harness.current_frame(), 1);
    harness.shutdown().unwrap();
}

#[test]
fn frame_counter_is_stable_while_acquisition_is_paused() {
    let params = base_params();
    let mut harness = start_session(params, &[], small_config(&params, 4));

    harness.feed_frames(0, 3);
    harness.wait_for_frame(2);

    harness.set_tx(0.2, 0.0);
    let first = harness.current_frame();
    let second = harness.current_frame();
    assert_eq!(first, 2);
    assert_eq!(first, second);

    harness.shutdown().unwrap();
}

#[test]
fn feedforward_session_steps_the_analog_outputs() {
    let params = SessionParams {
        samples_per_period: 32,
        samples_per_tx_period: 32,
        periods_per_frame: 4,
        num_ff_channels: 2,
        tx_enabled: false,
        ff_enabled: true,
        is_master: false,
    };
    let table = [0.0f32, 0.0, 0.25, 0.5, 0.5, 1.0, 0.75, 1.5];
    let mut harness = start_session(params, &table, small_config(&params, 4));

    // Ten periods; the counter and the sequencer advance per period even
    // though reads are addressed in four-period frames.
    for period in 0..10 {
        let samples: Vec<i16> = (0..32).map(|k| (period * 32 + k) as i16).collect();
        harness.board.feed(&samples, &samples);
        // Pace the feed so every period boundary is observed on time.
        harness.wait_for_frame(period - 1);
    }
    harness.board.feed(&[0], &[0]);
    harness.wait_for_frame(9);

    let board = harness.board.clone();
    harness.shutdown().unwrap();

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
fn tx_update_reaches_the_generator() {
    let params = SessionParams {
        samples_per_period: 4,
        samples_per_tx_period: 4,
        periods_per_frame: 1,
        num_ff_channels: 1,
        tx_enabled: true,
        ff_enabled: true,
        is_master: false,
    };
    let mut harness = start_session(params, &[0.0], small_config(&params, 4));

    let generator = harness.board.generator();
    assert!(generator.enabled);
    assert_eq!(generator.amplitude, 0.1);
    assert_eq!(generator.uploads, 1);
    // Feed-forward variant selected: the controller never reports searching.
    assert_eq!(harness.control_state(), 0);

    harness.set_tx(0.2, 45.0);
    // The update is applied before the next command is serviced.
    let _ = harness.current_frame();

    let generator = harness.board.generator();
    assert_eq!(*generator.amp_calls.last().unwrap(), 0.2);
    assert_eq!(generator.uploads, 2);
    let expected = 45.0f64.to_radians().sin() as f32;
    assert!((generator.waveform[0] - expected).abs() < 1e-6);

    let board = harness.board.clone();
    harness.shutdown().unwrap();
    assert!(!board.generator().enabled);
}

#[test]
fn lockin_session_reports_searching_until_locked() {
    let params = SessionParams {
        tx_enabled: true,
        ..base_params()
    };
    let mut harness = start_session(params, &[], small_config(&params, 4));

    // No samples yet: the controller is searching.
    assert_eq!(harness.control_state(), 1);

    let board = harness.board.clone();
    harness.shutdown().unwrap();
    assert!(!board.generator().enabled);
}

#[test]
fn unknown_command_tears_the_session_down_promptly() {
    let params = base_params();
    let harness = start_session(params, &[], small_config(&params, 3));
    let board = harness.board.clone();

    let started = Instant::now();
    harness.shutdown().unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!board.acq_running());
}
