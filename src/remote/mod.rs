//! Remote start/stop control of the record sink
//!
//! A [`CommandSource`] delivers decoded commands; [`RemoteListener`] runs on
//! its own task, independent of the capture loop, and applies each command to
//! the shared [`RecordSink`]: start rotates into a freshly named file, stop
//! closes the current one.

mod udp;

pub use udp::{CONTROL_PORT, UdpCommandSource, multicast_group};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::sink::{RecordSink, RecordingNaming};
use crate::types::RemoteCommand;

/// Push-driven stream of remote commands
#[async_trait::async_trait]
pub trait CommandSource: Send + 'static {
    /// Wait for the next command
    ///
    /// Returns:
    /// - `Ok(Some(command))` - Command received
    /// - `Ok(None)` - Channel closed (normal termination)
    /// - `Err(e)` - Transport error; the listener backs off and retries
    async fn next_command(&mut self) -> Result<Option<RemoteCommand>>;
}

/// In-process command source fed through a tokio channel
pub struct ChannelCommandSource {
    receiver: mpsc::Receiver<RemoteCommand>,
}

impl ChannelCommandSource {
    /// Create a source and the sender that feeds it
    pub fn channel(capacity: usize) -> (mpsc::Sender<RemoteCommand>, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (sender, Self { receiver })
    }
}

#[async_trait::async_trait]
impl CommandSource for ChannelCommandSource {
    async fn next_command(&mut self) -> Result<Option<RemoteCommand>> {
        Ok(self.receiver.recv().await)
    }
}

/// Handle to a running listener task
pub struct ListenerHandle {
    task: JoinHandle<()>,
    cancel: CancellationToken,
    applied: Arc<AtomicU64>,
}

impl ListenerHandle {
    /// Number of commands applied to the sink so far
    pub fn commands_applied(&self) -> u64 {
        self.applied.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the listener and wait for it to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Remote listener task failed: {}", e);
        }
    }
}

/// Applies remote commands to a shared sink
pub struct RemoteListener;

impl RemoteListener {
    /// Spawn the listener task on the current tokio runtime
    ///
    /// The task ends when `cancel` fires or the source closes.
    pub fn spawn<C>(
        source: C,
        sink: Arc<RecordSink>,
        naming: RecordingNaming,
        cancel: CancellationToken,
    ) -> ListenerHandle
    where
        C: CommandSource,
    {
        let applied = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn(Self::listen(
            source,
            sink,
            naming,
            cancel.clone(),
            Arc::clone(&applied),
        ));
        ListenerHandle { task, cancel, applied }
    }

    /// Apply one command to the sink
    ///
    /// A failed rotation leaves the sink closed; frames are dropped until the
    /// next start command succeeds.
    pub fn apply(command: RemoteCommand, sink: &RecordSink, naming: &RecordingNaming) {
        match command {
            RemoteCommand::Start => {
                let path = naming.next_path();
                match sink.rotate(&path) {
                    Ok(path) => info!(path = %path.display(), "Remote start"),
                    Err(e) => warn!(
                        path = %path.display(),
                        error = %e,
                        "Remote start could not open recording, frames will be dropped"
                    ),
                }
            }
            RemoteCommand::Stop => {
                if sink.close() {
                    info!("Remote stop");
                } else {
                    debug!("Remote stop with no recording open");
                }
            }
        }
    }

    async fn listen<C>(
        mut source: C,
        sink: Arc<RecordSink>,
        naming: RecordingNaming,
        cancel: CancellationToken,
        applied: Arc<AtomicU64>,
    ) where
        C: CommandSource,
    {
        info!("Remote listener started");
        let mut error_count = 0u32;
        const MAX_ERRORS: u32 = 10;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Remote listener cancelled");
                    break;
                }
                result = source.next_command() => result,
            };

            match result {
                Ok(Some(command)) => {
                    error_count = 0;
                    debug!(?command, "Remote command received");
                    Self::apply(command, &sink, &naming);
                    applied.fetch_add(1, Ordering::AcqRel);
                }
                Ok(None) => {
                    info!("Control channel closed");
                    break;
                }
                Err(e) => {
                    error_count += 1;
                    error!("Control channel error ({}/{}): {}", error_count, MAX_ERRORS, e);
                    if error_count >= MAX_ERRORS {
                        error!("Too many control channel errors, remote control disabled");
                        break;
                    }
                    // 50ms, 100ms, 200ms, ...
                    let backoff = std::time::Duration::from_millis(50 * (1 << error_count.min(5)));
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        info!(commands = applied.load(Ordering::Acquire), "Remote listener ended");
    }
}
