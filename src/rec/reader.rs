//! Record file reader for replaying recordings
//!
//! ```rust,no_run
//! use shmrec::rec::RecordReader;
//!
//! fn dump() -> shmrec::Result<()> {
//!     let mut reader = RecordReader::open("2019-10-01_120000.rec")?;
//!     while let Some((envelope, image)) = reader.next_image()? {
//!         println!("{} {}x{} {} bytes at {:?}",
//!             image.fourcc, image.width, image.height, image.data.len(), envelope.sample);
//!     }
//!     if reader.truncated_bytes() > 0 {
//!         println!("{} trailing bytes were incomplete", reader.truncated_bytes());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! The file is loaded into memory at construction time.

use super::format::{decode_envelope, decode_image_reading};
use crate::types::{Envelope, IMAGE_READING_TYPE, ImageReading};
use crate::{RecorderError, Result};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Sequential reader over a `.rec` byte stream.
pub struct RecordReader {
    data: Vec<u8>,
    position: usize,
    path: PathBuf,
    records_read: usize,
}

impl RecordReader {
    /// Open a record file for reading
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| RecorderError::storage(path, e))?;

        let mut data = Vec::new();
        file.read_to_end(&mut data).map_err(|e| RecorderError::storage(path, e))?;

        debug!(path = %path.display(), bytes = data.len(), "Opened record file");
        Ok(Self::from_bytes_with_path(data, path.to_path_buf()))
    }

    /// Create a reader over bytes already in memory
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::from_bytes_with_path(data.into(), PathBuf::from("<memory>"))
    }

    fn from_bytes_with_path(data: Vec<u8>, path: PathBuf) -> Self {
        Self { data, position: 0, path, records_read: 0 }
    }

    /// Read the next record, `None` at end of data or at an incomplete tail.
    pub fn next_envelope(&mut self) -> Result<Option<Envelope>> {
        if self.position >= self.data.len() {
            return Ok(None);
        }

        match decode_envelope(&self.data[self.position..])? {
            Some((envelope, consumed)) => {
                self.position += consumed;
                self.records_read += 1;
                Ok(Some(envelope))
            }
            None => {
                warn!(
                    path = %self.path.display(),
                    offset = self.position,
                    trailing = self.truncated_bytes(),
                    "Record stream ends with an incomplete record"
                );
                Ok(None)
            }
        }
    }

    /// Read the next image reading, skipping records of other types.
    pub fn next_image(&mut self) -> Result<Option<(Envelope, ImageReading)>> {
        while let Some(envelope) = self.next_envelope()? {
            if envelope.data_type != IMAGE_READING_TYPE {
                debug!(data_type = envelope.data_type, "Skipping non-image record");
                continue;
            }
            let image = decode_image_reading(&envelope.payload)?;
            return Ok(Some((envelope, image)));
        }
        Ok(None)
    }

    /// Read every remaining complete record.
    pub fn read_all(&mut self) -> Result<Vec<Envelope>> {
        let mut envelopes = Vec::new();
        while let Some(envelope) = self.next_envelope()? {
            envelopes.push(envelope);
        }
        Ok(envelopes)
    }

    /// Bytes after the last complete record that do not form a full record.
    ///
    /// Only meaningful once [`next_envelope`](Self::next_envelope) returned `None`.
    pub fn truncated_bytes(&self) -> usize {
        match decode_envelope(&self.data[self.position.min(self.data.len())..]) {
            Ok(None) => self.data.len() - self.position.min(self.data.len()),
            _ => 0,
        }
    }

    pub fn records_read(&self) -> usize {
        self.records_read
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rec::format::{command_envelope, encode_envelope, image_envelope};
    use crate::types::{FourCc, RemoteCommand, Timestamp};

    fn image(n: u8) -> ImageReading {
        ImageReading { fourcc: FourCc::VP9, width: 4, height: 2, data: vec![n; n as usize + 1] }
    }

    fn stream(count: u8) -> Vec<u8> {
        let mut bytes = Vec::new();
        for n in 0..count {
            let ts = Timestamp::from_micros(i64::from(n) * 1000);
            bytes.extend(encode_envelope(&image_envelope(&image(n), ts, ts, 1)));
        }
        bytes
    }

    #[test]
    fn reads_records_in_order() {
        let mut reader = RecordReader::from_bytes(stream(5));
        let mut seen = Vec::new();
        while let Some((envelope, reading)) = reader.next_image().unwrap() {
            seen.push((envelope.sample.as_micros(), reading.data.len()));
        }
        assert_eq!(seen, vec![(0, 1), (1000, 2), (2000, 3), (3000, 4), (4000, 5)]);
        assert_eq!(reader.records_read(), 5);
        assert_eq!(reader.truncated_bytes(), 0);
    }

    #[test]
    fn stops_cleanly_at_truncated_tail() {
        let mut bytes = stream(3);
        let full = bytes.len();
        bytes.truncate(full - 2);

        let mut reader = RecordReader::from_bytes(bytes);
        let records = reader.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert!(reader.truncated_bytes() > 0);
    }

    #[test]
    fn skips_commands_when_reading_images() {
        let mut bytes = encode_envelope(&command_envelope(RemoteCommand::Start, Timestamp::now(), 0));
        bytes.extend(stream(1));
        let mut reader = RecordReader::from_bytes(bytes);
        let (_, reading) = reader.next_image().unwrap().unwrap();
        assert_eq!(reading, image(0));
        assert!(reader.next_image().unwrap().is_none());
    }

    #[test]
    fn corrupt_header_surfaces_parse_error() {
        let mut bytes = stream(2);
        let first_len = bytes.len() / 2;
        bytes[first_len] = 0x00;
        let mut reader = RecordReader::from_bytes(bytes);
        assert!(reader.next_envelope().unwrap().is_some());
        assert!(matches!(reader.next_envelope(), Err(RecorderError::Parse { .. })));
    }

    #[test]
    fn missing_file_is_a_storage_error() {
        let err = RecordReader::open("/nonexistent/dir/none.rec").err().unwrap();
        assert!(matches!(err, RecorderError::Storage { .. }));
    }
}
