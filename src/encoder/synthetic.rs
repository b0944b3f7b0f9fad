//! Deterministic encoder producing fixed-size synthetic output

use parking_lot::Mutex;
use std::sync::Arc;

use super::{Encoder, OutputInfo, OutputStatus};
use crate::EncoderError;
use crate::types::{EncoderConfig, FourCc, RawFrame};

/// Smallest output unit: the frame index plus room for the checksum byte
const MIN_OUTPUT_SIZE: usize = 9;

/// Shared log of the calls an encoder received
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl CallLog {
    fn record(&self, call: &'static str) {
        self.calls.lock().push(call);
    }

    /// Every call so far, oldest first
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| **c == call).count()
    }
}

/// Encoder stand-in for dry runs and tests.
///
/// Each submitted frame yields one output unit of `output_size` bytes: the
/// frame index as little-endian `u64` followed by a byte derived from the
/// frame contents, repeated. Failures can be injected per operation.
///
/// ```rust
/// use shmrec::encoder::{EncoderSession, SyntheticEncoder};
/// use shmrec::types::{EncoderConfig, FrameGeometry};
///
/// let geometry = FrameGeometry::i420(4, 2).unwrap();
/// let mut session = EncoderSession::new(SyntheticEncoder::new(16));
/// session.configure(&EncoderConfig::new(geometry)).unwrap();
/// session.start().unwrap();
/// session.encode(&[0u8; 12]).unwrap();
/// let output = session.retrieve_output(true).unwrap().unwrap();
/// assert_eq!(output.data.len(), 16);
/// ```
#[derive(Debug)]
pub struct SyntheticEncoder {
    output_size: usize,
    log: CallLog,
    pending: Option<(u64, u8)>,
    frames: u64,
    running: bool,
    fail_configure: bool,
    fail_start: bool,
    fail_encode_at: Option<u64>,
    fail_retrieve_at: Option<u64>,
    oversize_at: Option<u64>,
}

impl SyntheticEncoder {
    pub fn new(output_size: usize) -> Self {
        Self {
            output_size: output_size.max(MIN_OUTPUT_SIZE),
            log: CallLog::default(),
            pending: None,
            frames: 0,
            running: false,
            fail_configure: false,
            fail_start: false,
            fail_encode_at: None,
            fail_retrieve_at: None,
            oversize_at: None,
        }
    }

    /// Handle onto this encoder's call log
    pub fn call_log(&self) -> CallLog {
        self.log.clone()
    }

    pub fn fail_configure(mut self) -> Self {
        self.fail_configure = true;
        self
    }

    pub fn fail_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Fail the submission of frame `index` (zero-based)
    pub fn fail_encode_at(mut self, index: u64) -> Self {
        self.fail_encode_at = Some(index);
        self
    }

    /// Fail the retrieval of frame `index`'s output
    pub fn fail_retrieve_at(mut self, index: u64) -> Self {
        self.fail_retrieve_at = Some(index);
        self
    }

    /// Report more output than the buffer holds for frame `index`
    pub fn oversize_at(mut self, index: u64) -> Self {
        self.oversize_at = Some(index);
        self
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }
}

fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

impl Encoder for SyntheticEncoder {
    fn codec(&self) -> FourCc {
        FourCc::SYNTHETIC
    }

    fn configure(&mut self, _config: &EncoderConfig) -> Result<(), EncoderError> {
        self.log.record("configure");
        if self.fail_configure {
            return Err(EncoderError::new("set_parameters", 2, "injected parameter rejection"));
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), EncoderError> {
        self.log.record("start");
        if self.fail_start {
            return Err(EncoderError::new("start", -1, "injected start failure"));
        }
        self.running = true;
        Ok(())
    }

    fn encode(&mut self, frame: &RawFrame<'_>) -> Result<(), EncoderError> {
        self.log.record("encode");
        let index = self.frames;
        if !self.running {
            return Err(EncoderError::new("encode", -2, "encoder not started"));
        }
        if self.fail_encode_at == Some(index) {
            return Err(EncoderError::new("encode", -1, format!("injected failure on frame {}", index)));
        }
        self.pending = Some((index, checksum(frame.data)));
        self.frames += 1;
        Ok(())
    }

    fn retrieve_output(
        &mut self,
        buffer: &mut [u8],
        wait: bool,
    ) -> Result<OutputStatus, EncoderError> {
        self.log.record("retrieve");
        let Some((index, sum)) = self.pending.take() else {
            if wait {
                return Err(EncoderError::new("get_output", -3, "no frame submitted"));
            }
            return Ok(OutputStatus::NotReady);
        };

        if self.fail_retrieve_at == Some(index) {
            return Err(EncoderError::new(
                "get_output",
                -1,
                format!("injected failure on frame {}", index),
            ));
        }
        if self.oversize_at == Some(index) {
            return Ok(OutputStatus::Ready(OutputInfo {
                size: buffer.len() + 1,
                temporal_id: 0,
                keyframe: index == 0,
            }));
        }
        if buffer.len() < self.output_size {
            return Ok(OutputStatus::Ready(OutputInfo {
                size: self.output_size,
                temporal_id: 0,
                keyframe: index == 0,
            }));
        }

        let out = &mut buffer[..self.output_size];
        out[..8].copy_from_slice(&index.to_le_bytes());
        out[8..].fill(sum);
        Ok(OutputStatus::Ready(OutputInfo {
            size: self.output_size,
            temporal_id: 0,
            keyframe: index == 0,
        }))
    }

    fn stop(&mut self) {
        self.log.record("stop");
        self.running = false;
        self.pending = None;
    }

    fn release(&mut self) {
        self.log.record("release");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FrameGeometry;

    fn started(encoder: SyntheticEncoder) -> SyntheticEncoder {
        let mut encoder = encoder;
        encoder.configure(&EncoderConfig::new(FrameGeometry::i420(4, 2).unwrap())).unwrap();
        encoder.start().unwrap();
        encoder
    }

    fn frame(data: &[u8]) -> RawFrame<'_> {
        RawFrame::new(FrameGeometry::i420(4, 2).unwrap(), data)
    }

    #[test]
    fn output_encodes_index_and_checksum() {
        let mut encoder = started(SyntheticEncoder::new(12));
        let mut buffer = [0u8; 24];

        for index in 0..3u64 {
            encoder.encode(&frame(&[2u8; 12])).unwrap();
            match encoder.retrieve_output(&mut buffer, true).unwrap() {
                OutputStatus::Ready(info) => {
                    assert_eq!(info.size, 12);
                    assert_eq!(info.keyframe, index == 0);
                    assert_eq!(&buffer[..8], &index.to_le_bytes());
                    assert!(buffer[8..12].iter().all(|b| *b == 24));
                }
                OutputStatus::NotReady => panic!("expected output"),
            }
        }
    }

    #[test]
    fn output_size_has_a_floor() {
        assert_eq!(SyntheticEncoder::new(0).output_size(), MIN_OUTPUT_SIZE);
    }

    #[test]
    fn injected_failures_fire_on_the_chosen_frame() {
        let mut encoder = started(SyntheticEncoder::new(8).fail_retrieve_at(1));
        let mut buffer = [0u8; 24];
        encoder.encode(&frame(&[0u8; 12])).unwrap();
        assert!(encoder.retrieve_output(&mut buffer, true).is_ok());
        encoder.encode(&frame(&[0u8; 12])).unwrap();
        let err = encoder.retrieve_output(&mut buffer, true).unwrap_err();
        assert_eq!(err.operation, "get_output");
    }

    #[test]
    fn encode_before_start_fails() {
        let mut encoder = SyntheticEncoder::new(8);
        assert!(encoder.encode(&frame(&[0u8; 12])).is_err());
    }

    #[test]
    fn call_log_is_shared_across_clones() {
        let encoder = SyntheticEncoder::new(8);
        let log = encoder.call_log();
        let mut encoder = started(encoder);
        encoder.stop();
        encoder.release();
        assert_eq!(log.calls(), vec!["configure", "start", "stop", "release"]);
        assert_eq!(log.count("start"), 1);
    }
}
