//! Recorder assembly: source, encoder session, sink and optional remote control

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::RecorderConfig;
use crate::driver::{PipelineDriver, PipelineProgress, RunSummary};
use crate::encoder::{Encoder, EncoderSession};
use crate::remote::{CommandSource, RemoteListener};
use crate::sink::{RecordSink, RecordingNaming};
use crate::source::FrameSource;
use crate::types::EncoderConfig;
use crate::{RecorderError, Result};

/// Entry point wiring a frame source and an encoder into a recording run.
///
/// Setup failures (encoder start, opening the first file in local mode) are
/// returned as errors before any frame is read. Once the loop runs, every
/// exit is reported through the [`RunSummary`].
///
/// ```rust,no_run
/// use shmrec::encoder::SyntheticEncoder;
/// use shmrec::sink::RecordingNaming;
/// use shmrec::sources::YuvFileSource;
/// use shmrec::types::{EncoderConfig, FrameGeometry};
/// use shmrec::Recorder;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() -> shmrec::Result<()> {
/// let geometry = FrameGeometry::i420(640, 480)?;
/// let source = YuvFileSource::open("/dev/shm/video0.i420", geometry, 30)?;
/// let summary = Recorder::new(RecordingNaming::default())
///     .record(source, SyntheticEncoder::new(4096), &EncoderConfig::new(geometry), CancellationToken::new())
///     .await?;
/// println!("{} records written", summary.records);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    naming: RecordingNaming,
    sender_stamp: u32,
    report_latency: bool,
    progress: Option<Arc<PipelineProgress>>,
    sink: Option<Arc<RecordSink>>,
}

impl Recorder {
    pub fn new(naming: RecordingNaming) -> Self {
        Self { naming, ..Self::default() }
    }

    /// Recorder set up from validated startup options
    pub fn from_config(config: &RecorderConfig) -> Self {
        Self::new(config.naming()).sender_stamp(config.id).report_latency(config.verbose)
    }

    pub fn sender_stamp(mut self, stamp: u32) -> Self {
        self.sender_stamp = stamp;
        self
    }

    pub fn report_latency(mut self, enabled: bool) -> Self {
        self.report_latency = enabled;
        self
    }

    /// Share counters with the caller instead of creating fresh ones
    pub fn with_progress(mut self, progress: Arc<PipelineProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Record into a sink the caller also holds
    pub fn with_sink(mut self, sink: Arc<RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Record from the first frame into a file named now.
    pub async fn record<S, E>(
        self,
        source: S,
        encoder: E,
        config: &EncoderConfig,
        cancel: CancellationToken,
    ) -> Result<RunSummary>
    where
        S: FrameSource + 'static,
        E: Encoder + 'static,
    {
        let session = start_session(encoder, config)?;
        let sink = match &self.sink {
            Some(sink) => {
                sink.rotate(self.naming.next_path())?;
                Arc::clone(sink)
            }
            None => Arc::new(RecordSink::open(self.naming.next_path())?),
        };
        self.run(source, session, sink, cancel).await
    }

    /// Record only between remote start and stop commands.
    pub async fn record_remote<S, E, C>(
        self,
        source: S,
        encoder: E,
        config: &EncoderConfig,
        commands: C,
        cancel: CancellationToken,
    ) -> Result<RunSummary>
    where
        S: FrameSource + 'static,
        E: Encoder + 'static,
        C: CommandSource,
    {
        let session = start_session(encoder, config)?;
        let sink = self.sink.clone().unwrap_or_else(|| Arc::new(RecordSink::closed()));
        let listener = RemoteListener::spawn(
            commands,
            Arc::clone(&sink),
            self.naming.clone(),
            cancel.child_token(),
        );
        info!("Waiting for remote start command");

        let summary = self.run(source, session, Arc::clone(&sink), cancel).await;
        listener.shutdown().await;
        // A start applied after the loop closed the sink would leave a file open.
        if sink.close() {
            debug!("Closed recording opened after the capture loop ended");
        }
        summary
    }

    async fn run<S, E>(
        self,
        source: S,
        session: EncoderSession<E>,
        sink: Arc<RecordSink>,
        cancel: CancellationToken,
    ) -> Result<RunSummary>
    where
        S: FrameSource + 'static,
        E: Encoder + 'static,
    {
        let mut driver = PipelineDriver::new(source, session, sink, cancel)
            .sender_stamp(self.sender_stamp)
            .report_latency(self.report_latency);
        if let Some(progress) = self.progress {
            driver = driver.with_progress(progress);
        }

        match driver.spawn().await {
            Ok(summary) => Ok(summary),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(RecorderError::TaskFailed { reason: e.to_string() }),
        }
    }
}

/// Configure and start an encoder session.
///
/// Rejected parameters are only warnings; a failed start is fatal.
pub fn start_session<E: Encoder>(encoder: E, config: &EncoderConfig) -> Result<EncoderSession<E>> {
    let mut session = EncoderSession::new(encoder);
    session.configure(config)?;
    session.start()?;
    Ok(session)
}
