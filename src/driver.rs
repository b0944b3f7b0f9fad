//! Pipeline driver: the capture, encode and record loop

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::RecorderError;
use crate::encoder::{Encoder, EncoderSession};
use crate::rec::format::image_envelope;
use crate::sink::{AppendOutcome, RecordSink};
use crate::source::{FrameAccess, FrameSource};
use crate::types::{ImageReading, Timestamp};

/// Why the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The cancellation token fired
    Cancelled,
    /// The frame source went away
    SourceInvalidated,
    EncodeFailed,
    RetrieveFailed,
}

/// Live counters, readable from other threads while the loop runs
#[derive(Debug, Default)]
pub struct PipelineProgress {
    frames: AtomicU64,
    records: AtomicU64,
    dropped: AtomicU64,
    bytes: AtomicU64,
}

impl PipelineProgress {
    /// Frames taken from the source
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    /// Records written to the sink
    pub fn records(&self) -> u64 {
        self.records.load(Ordering::Acquire)
    }

    /// Encoded frames the sink did not take
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Acquire)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Acquire)
    }
}

/// Outcome of one [`PipelineDriver::run`]
#[derive(Debug)]
pub struct RunSummary {
    pub exit: LoopExit,
    /// The error that ended the loop, if any
    pub error: Option<RecorderError>,
    pub frames: u64,
    pub records: u64,
    pub dropped: u64,
    pub bytes: u64,
    /// Mean submit-to-retrieve latency
    pub mean_latency: Option<Duration>,
    pub max_latency: Duration,
}

/// Single-threaded loop moving frames from a source through an encoder into
/// a record sink
///
/// Cancellation is cooperative: the token is checked once per iteration, so
/// an in-flight wait or encode completes first. Whatever ends the loop, the
/// encoder is stopped and released and the sink is closed.
pub struct PipelineDriver<S, E>
where
    S: FrameSource,
    E: Encoder,
{
    source: S,
    session: EncoderSession<E>,
    sink: Arc<RecordSink>,
    cancel: CancellationToken,
    sender_stamp: u32,
    report_latency: bool,
    progress: Arc<PipelineProgress>,
}

impl<S, E> PipelineDriver<S, E>
where
    S: FrameSource,
    E: Encoder,
{
    /// `session` must already be started.
    pub fn new(
        source: S,
        session: EncoderSession<E>,
        sink: Arc<RecordSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            session,
            sink,
            cancel,
            sender_stamp: 0,
            report_latency: false,
            progress: Arc::new(PipelineProgress::default()),
        }
    }

    /// Stream identifier written into every record
    pub fn sender_stamp(mut self, stamp: u32) -> Self {
        self.sender_stamp = stamp;
        self
    }

    /// Log the latency of every frame at info level
    pub fn report_latency(mut self, enabled: bool) -> Self {
        self.report_latency = enabled;
        self
    }

    /// Report into counters the caller already holds
    pub fn with_progress(mut self, progress: Arc<PipelineProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn progress(&self) -> Arc<PipelineProgress> {
        Arc::clone(&self.progress)
    }

    /// Run the loop on the blocking thread pool
    pub fn spawn(self) -> JoinHandle<RunSummary>
    where
        S: 'static,
        E: 'static,
    {
        tokio::task::spawn_blocking(move || self.run())
    }

    /// Run the loop on the calling thread until it exits, then tear down.
    pub fn run(mut self) -> RunSummary {
        info!(
            source = self.source.name(),
            codec = %self.session.codec(),
            sender = self.sender_stamp,
            "Pipeline started"
        );

        let mut latency_total = Duration::ZERO;
        let mut max_latency = Duration::ZERO;
        let (exit, error) = self.capture_loop(&mut latency_total, &mut max_latency);

        // Reverse acquisition order: encoder first, then the recording.
        self.session.shutdown();
        self.sink.close();

        let frames = self.progress.frames();
        let records = self.progress.records();
        let summary = RunSummary {
            exit,
            error,
            frames,
            records,
            dropped: self.progress.dropped(),
            bytes: self.progress.bytes(),
            mean_latency: mean_latency(latency_total, records),
            max_latency,
        };

        match &summary.error {
            Some(e) => error!(exit = ?summary.exit, frames, records, "Pipeline stopped: {}", e),
            None => info!(exit = ?summary.exit, frames, records, "Pipeline stopped"),
        }
        summary
    }

    fn capture_loop(
        &mut self,
        latency_total: &mut Duration,
        max_latency: &mut Duration,
    ) -> (LoopExit, Option<RecorderError>) {
        let geometry = self.source.geometry();
        let codec = self.session.codec();
        let mut last_sent = Timestamp::default();

        loop {
            if self.cancel.is_cancelled() {
                return (LoopExit::Cancelled, None);
            }

            if let Err(e) = self.source.wait_for_frame() {
                return (LoopExit::SourceInvalidated, Some(e));
            }
            let frame = self.progress.frames.fetch_add(1, Ordering::AcqRel);

            // Held until output is retrieved: the encoder reads the frame in place.
            let access = match self.source.begin_access() {
                Ok(access) => access,
                Err(e) => return (LoopExit::SourceInvalidated, Some(e)),
            };
            let sample = access.capture_timestamp();

            let submitted = Instant::now();
            if let Err(e) = self.session.encode(access.data()) {
                return (LoopExit::EncodeFailed, Some(e));
            }

            let output = match self.session.retrieve_output(true) {
                Ok(output) => output,
                Err(e) => return (LoopExit::RetrieveFailed, Some(e)),
            };
            let latency = submitted.elapsed();

            let Some(output) = output.filter(|o| !o.data.is_empty()) else {
                trace!(frame, "Encoder produced no data");
                continue;
            };

            let reading = ImageReading {
                fourcc: codec,
                width: geometry.width,
                height: geometry.height,
                data: output.data.to_vec(),
            };
            drop(access);

            let sent = Timestamp::now().max(last_sent);
            last_sent = sent;
            let envelope = image_envelope(&reading, sent, sample, self.sender_stamp);

            match self.sink.append(&envelope) {
                AppendOutcome::Written { bytes } => {
                    self.progress.records.fetch_add(1, Ordering::AcqRel);
                    self.progress.bytes.fetch_add(bytes as u64, Ordering::AcqRel);
                    *latency_total += latency;
                    *max_latency = (*max_latency).max(latency);
                }
                AppendOutcome::Dropped => {
                    self.progress.dropped.fetch_add(1, Ordering::AcqRel);
                }
            }

            if self.report_latency {
                info!(
                    frame,
                    bytes = reading.data.len(),
                    latency_ms = latency.as_secs_f64() * 1000.0,
                    "Frame encoded"
                );
            } else {
                debug!(
                    frame,
                    bytes = reading.data.len(),
                    latency_us = latency.as_micros() as u64,
                    "Frame encoded"
                );
            }
        }
    }
}

fn mean_latency(total: Duration, records: u64) -> Option<Duration> {
    let nanos = total.as_nanos().checked_div(u128::from(records))?;
    Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::SyntheticEncoder;
    use crate::rec::RecordReader;
    use crate::sources::MemoryRegion;
    use crate::types::{EncoderConfig, FrameGeometry};

    fn started(encoder: SyntheticEncoder, geometry: FrameGeometry) -> EncoderSession<SyntheticEncoder> {
        let mut session = EncoderSession::new(encoder);
        session.configure(&EncoderConfig::new(geometry)).unwrap();
        session.start().unwrap();
        session
    }

    #[test]
    fn records_every_frame_until_source_ends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.rec");
        let geometry = FrameGeometry::i420(4, 2).unwrap();
        let (writer, reader) = MemoryRegion::create("video0", geometry);
        let sink = Arc::new(RecordSink::open(&path).unwrap());

        let driver = PipelineDriver::new(
            reader,
            started(SyntheticEncoder::new(16), geometry),
            Arc::clone(&sink),
            CancellationToken::new(),
        )
        .sender_stamp(3);
        let progress = driver.progress();
        let handle = std::thread::spawn(move || driver.run());

        for i in 0..5u8 {
            while progress.frames() < u64::from(i) {
                std::thread::yield_now();
            }
            writer.publish(&[i; 12], Some(Timestamp::from_micros(1000 + i64::from(i)))).unwrap();
            while progress.records() + progress.dropped() < u64::from(i) + 1 {
                std::thread::yield_now();
            }
        }
        drop(writer);

        let summary = handle.join().unwrap();
        assert_eq!(summary.exit, LoopExit::SourceInvalidated);
        assert_eq!(summary.records, 5);
        assert!(!sink.is_open());

        let mut reader = RecordReader::open(&path).unwrap();
        let mut count = 0;
        while let Some((envelope, image)) = reader.next_image().unwrap() {
            assert_eq!(envelope.sender_stamp, 3);
            assert_eq!(envelope.sample, Timestamp::from_micros(1000 + count));
            assert_eq!(image.data.len(), 16);
            assert_eq!((image.width, image.height), (4, 2));
            count += 1;
        }
        assert_eq!(count, 5);
    }

    #[test]
    fn closed_sink_drops_frames_but_keeps_running() {
        let geometry = FrameGeometry::i420(4, 2).unwrap();
        let (writer, reader) = MemoryRegion::create("video0", geometry);
        let driver = PipelineDriver::new(
            reader,
            started(SyntheticEncoder::new(16), geometry),
            Arc::new(RecordSink::closed()),
            CancellationToken::new(),
        );
        let progress = driver.progress();
        let handle = std::thread::spawn(move || driver.run());

        for _ in 0..3 {
            let before = progress.dropped();
            writer.publish(&[0; 12], None).unwrap();
            while progress.dropped() == before {
                std::thread::yield_now();
            }
        }
        drop(writer);

        let summary = handle.join().unwrap();
        assert_eq!(summary.records, 0);
        assert_eq!(summary.dropped, 3);
        assert_eq!(summary.mean_latency, None);
    }

    #[test]
    fn cancelled_before_start_runs_no_iterations() {
        let geometry = FrameGeometry::i420(4, 2).unwrap();
        let (_writer, reader) = MemoryRegion::create("video0", geometry);
        let encoder = SyntheticEncoder::new(16);
        let log = encoder.call_log();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary =
            PipelineDriver::new(reader, started(encoder, geometry), Arc::new(RecordSink::closed()), cancel)
                .run();
        assert_eq!(summary.exit, LoopExit::Cancelled);
        assert!(summary.error.is_none());
        assert_eq!(summary.frames, 0);
        assert_eq!(log.count("stop"), 1);
        assert_eq!(log.count("release"), 1);
    }

    #[test]
    fn mean_latency_survives_any_record_count() {
        assert_eq!(mean_latency(Duration::from_secs(1), 0), None);
        assert_eq!(mean_latency(Duration::from_millis(30), 3), Some(Duration::from_millis(10)));
        // Record count above u32::MAX.
        let records = 1u64 << 32;
        let total = Duration::from_nanos(records * 2);
        assert_eq!(mean_latency(total, records), Some(Duration::from_nanos(2)));
    }

    #[test]
    fn encode_failure_stops_the_loop() {
        let geometry = FrameGeometry::i420(4, 2).unwrap();
        let (writer, reader) = MemoryRegion::create("video0", geometry);
        let encoder = SyntheticEncoder::new(16).fail_encode_at(0);
        let log = encoder.call_log();
        writer.publish(&[0; 12], None).unwrap();

        let summary = PipelineDriver::new(
            reader,
            started(encoder, geometry),
            Arc::new(RecordSink::closed()),
            CancellationToken::new(),
        )
        .run();
        assert_eq!(summary.exit, LoopExit::EncodeFailed);
        assert!(matches!(summary.error, Some(RecorderError::Encode { frame: 0, .. })));
        assert_eq!(log.count("retrieve"), 0);
        assert_eq!(log.count("release"), 1);
    }
}
