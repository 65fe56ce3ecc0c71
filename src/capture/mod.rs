//! Capture sessions.
//!
//! A [`CaptureController`] runs at most one session at a time. The session
//! reads frames on a dedicated worker thread, strips each to its retained
//! header prefix, and hands it over an unbounded channel to an async pump
//! that owns the [`BufferedForwarder`]. Stopping is cooperative: the worker
//! checks a `watch` signal before every frame.
//!
//! State machine: `Idle -> Running -> Stopping -> Idle`. A session that
//! reaches end of file goes from `Running` straight back to `Idle`.

#[cfg(feature = "live-capture")]
pub mod live;
pub mod replay;

pub use replay::Recording;

use crate::classifier::Dissection;
use crate::core::config::CaptureConfig;
use crate::core::{Origin, PktwatchError, RawFrame, Result};
use crate::forwarder::{BufferedForwarder, Transport};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify};

/// A frame as read from the wire or a file, before stripping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observed {
    pub timestamp: DateTime<Utc>,
    /// Length on the wire
    pub length: u32,
    pub link_type: u16,
    pub data: Vec<u8>,
}

impl Observed {
    /// Build the frame handed downstream. Bytes past the retained prefix
    /// never leave this function.
    pub fn into_raw_frame(self, origin: Origin) -> RawFrame {
        let dissection = Dissection::walk(self.link_type, &self.data);
        let retained = dissection.retained_len.min(self.data.len());
        RawFrame::from_bytes(
            self.timestamp,
            self.length,
            self.link_type,
            &self.data[..retained],
            origin,
        )
        .with_summary(dissection.summary())
    }
}

/// Result of asking a source for its next frame.
#[derive(Debug)]
pub enum Next {
    Frame(Observed),
    /// Nothing arrived within the read timeout
    Idle,
    End,
}

/// Blocking producer of frames, driven by the capture worker.
pub trait FrameSource: Send {
    fn next(&mut self) -> Result<Next>;

    /// Human-readable name for log lines.
    fn describe(&self) -> String;
}

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    Idle,
    Running,
    Stopping,
}

/// Parameters of a start request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureRequest {
    /// `LIVE` or `PCAP`, case-insensitive; live when absent
    #[serde(default)]
    pub mode: Option<String>,
    /// Recording name inside the recordings directory
    #[serde(default, alias = "pcap")]
    pub file: Option<String>,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub interface: Option<String>,
}

impl CaptureRequest {
    pub fn live() -> Self {
        Self::default()
    }

    pub fn replay(file: impl Into<String>) -> Self {
        Self {
            mode: Some(Origin::Pcap.as_str().to_string()),
            file: Some(file.into()),
            ..Self::default()
        }
    }

    pub fn mode(&self) -> Result<Origin> {
        match self.mode.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            Some(mode) => mode.parse(),
            None => Ok(Origin::Live),
        }
    }
}

/// Answer to a successful start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Started {
    pub mode: Origin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pcap: Option<String>,
}

/// Answer to a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopping,
    NotRunning,
}

impl StopOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopOutcome::Stopping => "stopping",
            StopOutcome::NotRunning => "not running",
        }
    }
}

/// Snapshot of the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStatus {
    pub state: CaptureState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<Origin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pcap: Option<String>,
    /// Frames emitted by the current or last session
    pub frames_emitted: u64,
}

struct Session {
    state: CaptureState,
    mode: Option<Origin>,
    pcap: Option<String>,
    frames: Arc<AtomicU64>,
    stop: Option<watch::Sender<bool>>,
}

/// Start/stop surface over the capture worker.
#[derive(Clone)]
pub struct CaptureController {
    config: Arc<CaptureConfig>,
    transport: Arc<dyn Transport>,
    session: Arc<Mutex<Session>>,
    idle: Arc<Notify>,
}

impl CaptureController {
    pub fn new(config: CaptureConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config: Arc::new(config),
            transport,
            session: Arc::new(Mutex::new(Session {
                state: CaptureState::Idle,
                mode: None,
                pcap: None,
                frames: Arc::new(AtomicU64::new(0)),
                stop: None,
            })),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Open the requested source and start a session.
    ///
    /// Must be called within a Tokio runtime. Fails without side effects if
    /// a session is already running or stopping, or if the source cannot be
    /// opened.
    pub fn start(&self, request: &CaptureRequest) -> Result<Started> {
        let mode = request.mode()?;

        // Holding the lock across the open keeps concurrent starts out
        let session = self.session.lock();
        if session.state != CaptureState::Idle {
            return Err(PktwatchError::CaptureAlreadyRunning);
        }

        let (source, pcap): (Box<dyn FrameSource>, Option<String>) = match mode {
            Origin::Pcap => {
                let name = request
                    .file
                    .as_deref()
                    .ok_or_else(|| PktwatchError::invalid_request("PCAP mode requires a file"))?;
                let path = replay::resolve(&self.config.pcap_dir, name)?;
                (Box::new(Recording::open(path)?), Some(name.trim().to_string()))
            },
            Origin::Live => (self.open_live(request)?, None),
        };

        self.launch(session, source, mode, pcap)
    }

    /// Run `source` as a new session, bypassing request handling.
    #[cfg(test)]
    pub(crate) fn start_source(&self, source: Box<dyn FrameSource>, mode: Origin) -> Result<Started> {
        let session = self.session.lock();
        if session.state != CaptureState::Idle {
            return Err(PktwatchError::CaptureAlreadyRunning);
        }
        self.launch(session, source, mode, None)
    }

    /// Mark the session running and start its worker thread and pump.
    fn launch(
        &self,
        mut session: MutexGuard<'_, Session>,
        source: Box<dyn FrameSource>,
        mode: Origin,
        pcap: Option<String>,
    ) -> Result<Started> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let frames = Arc::new(AtomicU64::new(0));
        *session = Session {
            state: CaptureState::Running,
            mode: Some(mode),
            pcap: pcap.clone(),
            frames: Arc::clone(&frames),
            stop: Some(stop_tx),
        };
        drop(session);

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let forwarder = BufferedForwarder::new(
            Arc::clone(&self.transport),
            self.config.batch_size,
            self.config.flush_interval,
        );

        let description = source.describe();
        tracing::info!("Capture started: {} ({})", description, mode);

        let worker_frames = Arc::clone(&frames);
        let spawned = std::thread::Builder::new()
            .name("pktwatch-capture".to_string())
            .spawn(move || run_worker(source, stop_rx, frame_tx, worker_frames, mode));
        if let Err(e) = spawned {
            self.finish();
            return Err(PktwatchError::capture(format!("failed to spawn capture thread: {e}")));
        }

        let controller = self.clone();
        tokio::spawn(async move {
            pump(frame_rx, forwarder).await;
            tracing::info!(
                "Capture finished: {} ({} frames)",
                description,
                frames.load(Ordering::Relaxed)
            );
            controller.finish();
        });

        Ok(Started { mode, pcap })
    }

    /// Ask the running session to stop.
    pub fn stop(&self) -> StopOutcome {
        let mut session = self.session.lock();
        match session.state {
            CaptureState::Running => {
                session.state = CaptureState::Stopping;
                if let Some(stop) = &session.stop {
                    let _ = stop.send(true);
                }
                tracing::info!("Capture stop requested");
                StopOutcome::Stopping
            },
            CaptureState::Stopping => StopOutcome::Stopping,
            CaptureState::Idle => StopOutcome::NotRunning,
        }
    }

    pub fn status(&self) -> CaptureStatus {
        let session = self.session.lock();
        CaptureStatus {
            state: session.state,
            mode: session.mode,
            pcap: session.pcap.clone(),
            frames_emitted: session.frames.load(Ordering::Relaxed),
        }
    }

    /// Wait until no session is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.status().state == CaptureState::Idle {
                return;
            }
            notified.await;
        }
    }

    fn finish(&self) {
        let mut session = self.session.lock();
        session.state = CaptureState::Idle;
        session.stop = None;
        drop(session);
        self.idle.notify_waiters();
    }

    #[cfg(feature = "live-capture")]
    fn open_live(&self, request: &CaptureRequest) -> Result<Box<dyn FrameSource>> {
        let interface = request.interface.as_deref().or(self.config.interface.as_deref());
        let filter = request.filter.as_deref().or(self.config.filter.as_deref());
        Ok(Box::new(live::LiveSource::open(
            interface,
            filter,
            self.config.snaplen,
            self.config.read_timeout,
        )?))
    }

    #[cfg(not(feature = "live-capture"))]
    fn open_live(&self, _request: &CaptureRequest) -> Result<Box<dyn FrameSource>> {
        Err(PktwatchError::capture(
            "live capture is not available in this build, enable the live-capture feature",
        ))
    }
}

fn run_worker(
    mut source: Box<dyn FrameSource>,
    stop: watch::Receiver<bool>,
    frames_tx: mpsc::UnboundedSender<RawFrame>,
    frames: Arc<AtomicU64>,
    origin: Origin,
) {
    loop {
        if *stop.borrow() {
            tracing::debug!("Stop signal seen by capture worker");
            break;
        }

        match source.next() {
            Ok(Next::Frame(observed)) => {
                if frames_tx.send(observed.into_raw_frame(origin)).is_err() {
                    break;
                }
                frames.fetch_add(1, Ordering::Relaxed);
            },
            Ok(Next::Idle) => {},
            Ok(Next::End) => {
                tracing::info!("End of {}", source.describe());
                break;
            },
            Err(e) => {
                tracing::error!("Capture from {} failed: {}", source.describe(), e);
                break;
            },
        }
    }
}

async fn pump(mut frames: mpsc::UnboundedReceiver<RawFrame>, mut forwarder: BufferedForwarder) {
    let mut ticker = tokio::time::interval(forwarder.flush_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = forwarder.push(&frame).await {
                        tracing::warn!("Skipping frame that failed to serialize: {}", e);
                    }
                },
                None => break,
            },
            _ = ticker.tick() => forwarder.tick().await,
        }
    }

    forwarder.flush().await;
    let stats = forwarder.stats();
    tracing::debug!(
        "Capture forwarder: {} delivered, {} dropped",
        stats.delivered,
        stats.dropped
    );
}
