//! Record sink: the active output file and its open/closed state
//!
//! One mutex guards both the state tag and the stream handle. `append`
//! serializes outside the lock and re-checks the state under it, so a record
//! lands wholly in the stream that was open at that moment or is dropped.
//! `rotate` flushes and closes the old stream before the new one exists.

use chrono::Local;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

use crate::rec::format::{MAX_BODY_SIZE, encode_envelope, record_body_len};
use crate::types::Envelope;
use crate::{RecorderError, Result};

/// Extension appended to auto-generated file names.
pub const RECORDING_EXTENSION: &str = ".rec";

enum SinkState {
    Closed { last: Option<PathBuf> },
    Open { path: PathBuf, writer: BufWriter<File> },
}

/// What happened to a record handed to [`RecordSink::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Written { bytes: usize },
    /// No file was open, or writing failed and the sink closed itself
    Dropped,
}

/// Owner of the current recording file.
pub struct RecordSink {
    state: Mutex<SinkState>,
}

impl std::fmt::Debug for RecordSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordSink").field("path", &self.current_path()).finish()
    }
}

impl RecordSink {
    /// A sink with no file open.
    pub fn closed() -> Self {
        Self { state: Mutex::new(SinkState::Closed { last: None }) }
    }

    /// Create a sink and open `path` right away.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let sink = Self::closed();
        sink.rotate(path)?;
        Ok(sink)
    }

    /// Write one record and flush it before returning.
    ///
    /// A closed sink drops the record. A write failure closes the sink and
    /// drops the record; recording resumes at the next successful rotation.
    /// A record too large to read back is dropped and the file stays open.
    pub fn append(&self, envelope: &Envelope) -> AppendOutcome {
        let body_len = record_body_len(envelope);
        if body_len > MAX_BODY_SIZE {
            warn!(body_len, max = MAX_BODY_SIZE, "Record too large, dropped");
            return AppendOutcome::Dropped;
        }
        let record = encode_envelope(envelope);

        let mut state = self.state.lock();
        let SinkState::Open { path, writer } = &mut *state else {
            trace!("Sink closed, record dropped");
            return AppendOutcome::Dropped;
        };

        let result = writer.write_all(&record).and_then(|()| writer.flush());
        match result {
            Ok(()) => AppendOutcome::Written { bytes: record.len() },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Write failed, closing recording");
                let last = Some(path.clone());
                *state = SinkState::Closed { last };
                AppendOutcome::Dropped
            }
        }
    }

    /// Close the current file, if any, then create `path`, truncating it.
    ///
    /// On failure the sink stays closed and the error is returned for
    /// reporting; it is not fatal to a running pipeline.
    pub fn rotate(&self, path: impl Into<PathBuf>) -> Result<PathBuf> {
        let path = path.into();
        let mut state = self.state.lock();

        let last = match std::mem::replace(&mut *state, SinkState::Closed { last: None }) {
            SinkState::Open { path: old, writer } => {
                finish(&old, writer);
                Some(old)
            }
            SinkState::Closed { last } => last,
        };

        if last.as_deref() == Some(path.as_path()) {
            warn!(path = %path.display(), "Reopening the file just closed, earlier contents are truncated");
        }

        match File::create(&path) {
            Ok(file) => {
                info!(path = %path.display(), "Recording to file");
                *state = SinkState::Open { path: path.clone(), writer: BufWriter::new(file) };
                Ok(path)
            }
            Err(e) => {
                *state = SinkState::Closed { last };
                Err(RecorderError::storage(path, e))
            }
        }
    }

    /// Flush and close the current file; returns whether one was open.
    pub fn close(&self) -> bool {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, SinkState::Closed { last: None }) {
            SinkState::Open { path, writer } => {
                finish(&path, writer);
                info!(path = %path.display(), "Recording closed");
                *state = SinkState::Closed { last: Some(path) };
                true
            }
            closed => {
                *state = closed;
                false
            }
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock(), SinkState::Open { .. })
    }

    /// Path of the file currently being written
    pub fn current_path(&self) -> Option<PathBuf> {
        match &*self.state.lock() {
            SinkState::Open { path, .. } => Some(path.clone()),
            SinkState::Closed { .. } => None,
        }
    }
}

impl Default for RecordSink {
    fn default() -> Self {
        Self::closed()
    }
}

fn finish(path: &Path, mut writer: BufWriter<File>) {
    if let Err(e) = writer.flush() {
        warn!(path = %path.display(), error = %e, "Flush on close failed");
    }
    debug!(path = %path.display(), "Closed recording file");
}

/// Chooses the file a start command records into.
#[derive(Debug, Clone, Default)]
pub struct RecordingNaming {
    /// Used verbatim, plus the suffix, when set
    pub explicit: Option<String>,
    pub suffix: String,
    /// Directory for auto-generated names; the working directory when unset
    pub dir: Option<PathBuf>,
}

impl RecordingNaming {
    /// Name for the next rotation.
    ///
    /// Auto-generated names use local time with one-second resolution, so two
    /// rotations within the same second yield the same path.
    pub fn next_path(&self) -> PathBuf {
        match &self.explicit {
            Some(name) => PathBuf::from(format!("{}{}", name, self.suffix)),
            None => {
                let stamp = Local::now().format("%Y-%m-%d_%H%M%S");
                let file = format!("{}{}{}", stamp, self.suffix, RECORDING_EXTENSION);
                match &self.dir {
                    Some(dir) => dir.join(file),
                    None => PathBuf::from(file),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rec::RecordReader;
    use crate::types::{IMAGE_READING_TYPE, Timestamp};
    use std::sync::Arc;

    fn envelope(fill: u8, len: usize) -> Envelope {
        Envelope {
            data_type: IMAGE_READING_TYPE,
            sent: Timestamp::from_micros(i64::from(fill)),
            sample: Timestamp::from_micros(i64::from(fill)),
            sender_stamp: 7,
            payload: vec![fill; len],
        }
    }

    #[test]
    fn closed_sink_drops_records() {
        let sink = RecordSink::closed();
        assert!(!sink.is_open());
        assert_eq!(sink.append(&envelope(1, 4)), AppendOutcome::Dropped);
    }

    #[test]
    fn oversized_record_is_dropped_and_file_stays_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.rec");
        let sink = RecordSink::open(&path).unwrap();

        assert_eq!(sink.append(&envelope(1, MAX_BODY_SIZE)), AppendOutcome::Dropped);
        assert!(sink.is_open());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

        assert!(matches!(sink.append(&envelope(2, 10)), AppendOutcome::Written { .. }));
    }

    #[test]
    fn appended_records_are_on_disk_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.rec");
        let sink = RecordSink::open(&path).unwrap();

        assert!(matches!(sink.append(&envelope(1, 10)), AppendOutcome::Written { .. }));
        assert!(matches!(sink.append(&envelope(2, 10)), AppendOutcome::Written { .. }));

        // Read while still open: nothing is left in the buffer.
        let records = RecordReader::open(&path).unwrap().read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].payload, vec![2; 10]);
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let sink = RecordSink::open(dir.path().join("a.rec")).unwrap();
        assert!(sink.close());
        assert!(!sink.close());
        assert!(!sink.is_open());
        assert_eq!(sink.current_path(), None);
    }

    #[test]
    fn rotation_switches_files() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.rec");
        let second = dir.path().join("second.rec");
        let sink = RecordSink::open(&first).unwrap();
        sink.append(&envelope(1, 3));
        sink.rotate(&second).unwrap();
        sink.append(&envelope(2, 3));
        assert_eq!(sink.current_path(), Some(second.clone()));

        assert_eq!(RecordReader::open(&first).unwrap().read_all().unwrap().len(), 1);
        assert_eq!(RecordReader::open(&second).unwrap().read_all().unwrap().len(), 1);
    }

    #[test]
    fn rotating_onto_same_path_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("same.rec");
        let sink = RecordSink::open(&path).unwrap();
        sink.append(&envelope(1, 3));
        sink.rotate(&path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn failed_rotation_leaves_sink_closed() {
        let dir = tempfile::tempdir().unwrap();
        let sink = RecordSink::open(dir.path().join("ok.rec")).unwrap();
        let err = sink.rotate(dir.path().join("missing").join("x.rec")).unwrap_err();
        assert!(matches!(err, RecorderError::Storage { .. }));
        assert!(!err.is_fatal());
        assert!(!sink.is_open());
        assert_eq!(sink.append(&envelope(1, 3)), AppendOutcome::Dropped);
    }

    #[test]
    fn concurrent_appends_never_tear_during_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..20).map(|i| dir.path().join(format!("{i}.rec"))).collect();
        let sink = Arc::new(RecordSink::open(&paths[0]).unwrap());

        let writer = {
            let sink = Arc::clone(&sink);
            std::thread::spawn(move || {
                let mut written = 0usize;
                for i in 0..2000u32 {
                    let fill = (i % 251) as u8;
                    if let AppendOutcome::Written { .. } = sink.append(&envelope(fill, 512)) {
                        written += 1;
                    }
                }
                written
            })
        };
        for path in &paths[1..] {
            sink.rotate(path).unwrap();
            std::thread::yield_now();
        }
        let written = writer.join().unwrap();
        sink.close();

        let mut total = 0;
        for path in &paths {
            let mut reader = RecordReader::open(path).unwrap();
            for record in reader.read_all().unwrap() {
                let fill = record.payload[0];
                assert!(record.payload.iter().all(|b| *b == fill));
                total += 1;
            }
            assert_eq!(reader.truncated_bytes(), 0);
        }
        assert_eq!(total, written);
    }

    #[test]
    fn explicit_name_gets_suffix_only() {
        let naming = RecordingNaming {
            explicit: Some("run".into()),
            suffix: "-cam0".into(),
            dir: None,
        };
        assert_eq!(naming.next_path(), PathBuf::from("run-cam0"));
    }

    #[test]
    fn auto_name_is_timestamped() {
        let dir = tempfile::tempdir().unwrap();
        let naming = RecordingNaming { explicit: None, suffix: "-x".into(), dir: Some(dir.path().into()) };
        let path = naming.next_path();
        assert_eq!(path.parent(), Some(dir.path()));
        let name = path.file_name().unwrap().to_str().unwrap();
        // YYYY-MM-DD_HHMMSS-x.rec
        assert_eq!(name.len(), 17 + 2 + 4);
        assert!(name.ends_with("-x.rec"));
        assert_eq!(&name[4..5], "-");
        assert_eq!(&name[10..11], "_");
    }
}
