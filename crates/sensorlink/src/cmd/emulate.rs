use std::io::Read;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ndarray::{ArrayD, IxDyn};
use sensorlink_frame::{FrameError, FrameWriter};
use sensorlink_session::InboundMessage;
use sensorlink_transport::IpcStream;
use tracing::{debug, info};

use crate::cmd::{install_ctrlc_handler, EmulateArgs};
use crate::exit::{frame_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};

pub fn run(args: EmulateArgs) -> CliResult<i32> {
    let period = send_period(&args)?;
    if let Some(license) = &args.license {
        debug!(license = %license.display(), "license accepted");
    }

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;
    watch_stdin(running.clone());

    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, args.port));
    let stream = IpcStream::connect(addr).map_err(|err| transport_error("connect failed", err))?;
    let mut writer = FrameWriter::new(stream);
    info!(%addr, channels = args.channels, rate = args.rate, "emulated driver connected");

    let generator = SignalGenerator::new(&args);
    let mut sent = 0u64;

    while running.load(Ordering::SeqCst) {
        let remaining = args.count.map_or(u64::MAX, |count| count.saturating_sub(sent));
        if remaining == 0 {
            break;
        }
        let rows = remaining.min(args.chunk as u64) as usize;
        let message = generator.message(sent, rows);
        if !push(&mut writer, &message)? {
            return Ok(SUCCESS);
        }
        sent += rows as u64;
        std::thread::sleep(period);
    }

    if let Some(text) = &args.fault {
        if running.load(Ordering::SeqCst) {
            push(&mut writer, &InboundMessage::event(text.as_str()))?;
            info!(sent, fault = %text, "emulated driver sent event");
            return Ok(SUCCESS);
        }
    }

    // Keep the connection open like an idle device until told to stop.
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(20));
    }
    info!(sent, "emulated driver stopped");
    Ok(SUCCESS)
}

/// Validate the generator settings and return the pause between messages.
fn send_period(args: &EmulateArgs) -> CliResult<Duration> {
    if args.channels == 0 {
        return Err(CliError::new(USAGE, "--channels must be at least 1"));
    }
    if args.chunk == 0 {
        return Err(CliError::new(USAGE, "--chunk must be at least 1"));
    }
    if !args.rate.is_finite() || args.rate <= 0.0 {
        return Err(CliError::new(USAGE, "--rate must be a positive number"));
    }
    Duration::try_from_secs_f64(args.chunk as f64 / args.rate).map_err(|err| {
        CliError::new(
            USAGE,
            format!("--rate {} is too low for --chunk {}: {err}", args.rate, args.chunk),
        )
    })
}

/// Send one message. Returns false if the session already hung up.
fn push(writer: &mut FrameWriter<IpcStream>, message: &InboundMessage) -> CliResult<bool> {
    let payload = message
        .to_vec()
        .map_err(|err| CliError::new(INTERNAL, format!("encode failed: {err}")))?;
    match writer.send(&payload) {
        Ok(()) => Ok(true),
        Err(FrameError::ConnectionClosed) => {
            debug!("session closed the channel");
            Ok(false)
        }
        Err(FrameError::Io(err))
            if matches!(
                err.kind(),
                std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset
            ) =>
        {
            debug!(error = %err, "session closed the channel");
            Ok(false)
        }
        Err(err) => Err(frame_error("send failed", err)),
    }
}

/// Closing our stdin is the session's stop request.
fn watch_stdin(running: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 256];
        while let Ok(n) = stdin.read(&mut buf) {
            if n == 0 {
                break;
            }
        }
        debug!("stdin closed, stopping");
        running.store(false, Ordering::SeqCst);
    });
}

/// Deterministic per-channel sine waves.
struct SignalGenerator {
    channels: usize,
    leads: usize,
    rate: f64,
    chunked: bool,
    epoch: f64,
}

impl SignalGenerator {
    fn new(args: &EmulateArgs) -> Self {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        Self {
            channels: args.channels,
            leads: args.leads,
            rate: args.rate,
            chunked: args.chunk > 1,
            epoch,
        }
    }

    fn value(&self, sample: u64, channel: usize, lead: usize) -> f64 {
        let t = sample as f64 / self.rate;
        let freq = 1.0 + channel as f64;
        (std::f64::consts::TAU * freq * t).sin() * 10.0 + lead as f64 * 100.0
    }

    fn sample_shape(&self) -> Vec<usize> {
        if self.leads == 0 {
            vec![self.channels]
        } else {
            vec![self.channels, self.leads]
        }
    }

    /// `rows` samples starting at `first`: a single frame, or a chunk with
    /// one timestamp row per sample.
    fn message(&self, first: u64, rows: usize) -> InboundMessage {
        let sample_shape = self.sample_shape();
        let lead_count = self.leads.max(1);

        let mut frame_shape = Vec::with_capacity(sample_shape.len() + 1);
        if self.chunked {
            frame_shape.push(rows);
        }
        frame_shape.extend_from_slice(&sample_shape);

        let mut values = Vec::with_capacity(rows * self.channels * lead_count);
        let mut clocks = Vec::with_capacity(rows);
        for row in 0..rows as u64 {
            let sample = first + row;
            for channel in 0..self.channels {
                for lead in 0..lead_count {
                    values.push(self.value(sample, channel, lead));
                }
            }
            clocks.push(self.epoch + sample as f64 / self.rate);
        }

        let timestamp_shape = if self.chunked {
            vec![rows, 1]
        } else {
            vec![1]
        };
        let frame = ArrayD::from_shape_vec(IxDyn(&frame_shape), values)
            .unwrap_or_else(|_| ArrayD::zeros(IxDyn(&frame_shape)));
        let timestamp = ArrayD::from_shape_vec(IxDyn(&timestamp_shape), clocks)
            .unwrap_or_else(|_| ArrayD::zeros(IxDyn(&timestamp_shape)));
        InboundMessage::data(frame, timestamp)
    }
}
