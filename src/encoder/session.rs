//! Encoder session state machine

use tracing::{debug, info, trace, warn};

use super::{Encoder, OutputStatus};
use crate::types::{EncoderConfig, FourCc, FrameGeometry, RawFrame};
use crate::{RecorderError, Result};

/// Lifecycle state of an [`EncoderSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconfigured,
    Configured,
    Running,
    Released,
}

impl SessionState {
    fn name(self) -> &'static str {
        match self {
            SessionState::Unconfigured => "unconfigured",
            SessionState::Configured => "configured",
            SessionState::Running => "running",
            SessionState::Released => "released",
        }
    }
}

/// One retrieved unit of compressed output, borrowed from the session buffer
#[derive(Debug, Clone, Copy)]
pub struct EncodedOutput<'a> {
    pub data: &'a [u8],
    pub temporal_id: u8,
    pub keyframe: bool,
}

/// Owns an encoder through its lifecycle.
///
/// Stop and release run exactly once, in that order, either through
/// [`shutdown`](Self::shutdown) or when the session is dropped.
pub struct EncoderSession<E: Encoder> {
    encoder: E,
    state: SessionState,
    geometry: Option<FrameGeometry>,
    output: Vec<u8>,
    warnings: Vec<RecorderError>,
    frames_submitted: u64,
}

impl<E: Encoder> EncoderSession<E> {
    pub fn new(encoder: E) -> Self {
        Self {
            encoder,
            state: SessionState::Unconfigured,
            geometry: None,
            output: Vec::new(),
            warnings: Vec::new(),
            frames_submitted: 0,
        }
    }

    /// Hand the parameters to the encoder and size the output buffer.
    ///
    /// A rejected parameter set is logged and kept in
    /// [`warnings`](Self::warnings); the session still becomes configured.
    pub fn configure(&mut self, config: &EncoderConfig) -> Result<()> {
        if self.state != SessionState::Unconfigured {
            return Err(self.invalid_state("configure"));
        }

        if let Err(source) = self.encoder.configure(config) {
            warn!(group = "common", error = %source, "Encoder rejected parameters");
            self.warnings.push(RecorderError::Configuration { group: "common".to_string(), source });
        }

        // Capacity is a multiple of the raw frame area, not a codec bound.
        self.output = vec![0; config.geometry.output_capacity()];
        self.geometry = Some(config.geometry);
        self.state = SessionState::Configured;

        debug!(
            codec = %self.encoder.codec(),
            width = config.geometry.width,
            height = config.geometry.height,
            fps = config.fps,
            gop = config.gop,
            bitrate = config.bitrate,
            rc_mode = ?config.rc_mode,
            qp_min = config.qp_min,
            qp_max = config.qp_max,
            output_capacity = self.output.len(),
            "Encoder configured"
        );
        Ok(())
    }

    /// Start the encoder; failure here is fatal to the run.
    pub fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Configured {
            return Err(self.invalid_state("start"));
        }
        self.encoder.start().map_err(|source| RecorderError::EncoderStart { source })?;
        self.state = SessionState::Running;
        info!(codec = %self.encoder.codec(), "Encoder started");
        Ok(())
    }

    /// Submit one raw frame by reference.
    pub fn encode(&mut self, data: &[u8]) -> Result<()> {
        let geometry = self.running_geometry("encode")?;
        if data.len() < geometry.frame_size() {
            return Err(RecorderError::invalid_input(
                "frame",
                format!("{} bytes", data.len()),
                format!("expected {} bytes", geometry.frame_size()),
            ));
        }

        let frame = RawFrame::new(geometry, &data[..geometry.frame_size()]);
        let index = self.frames_submitted;
        self.encoder
            .encode(&frame)
            .map_err(|source| RecorderError::Encode { frame: index, source })?;
        self.frames_submitted += 1;
        trace!(frame = index, "Submitted frame");
        Ok(())
    }

    /// Fetch compressed output into the session buffer.
    ///
    /// `Ok(None)` means no data yet and only happens when `wait` is false. An
    /// output larger than the buffer is rejected rather than truncated.
    pub fn retrieve_output(&mut self, wait: bool) -> Result<Option<EncodedOutput<'_>>> {
        self.running_geometry("retrieve output")?;
        let frame = self.frames_submitted.saturating_sub(1);

        let status = self
            .encoder
            .retrieve_output(&mut self.output, wait)
            .map_err(|source| RecorderError::Retrieve { frame, source })?;

        match status {
            OutputStatus::NotReady => Ok(None),
            OutputStatus::Ready(info) => {
                if info.size > self.output.len() {
                    return Err(RecorderError::OutputOverflow {
                        reported: info.size,
                        capacity: self.output.len(),
                    });
                }
                Ok(Some(EncodedOutput {
                    data: &self.output[..info.size],
                    temporal_id: info.temporal_id,
                    keyframe: info.keyframe,
                }))
            }
        }
    }

    /// Stop and release the encoder; later calls do nothing.
    pub fn shutdown(&mut self) {
        if self.state == SessionState::Released {
            return;
        }
        self.encoder.stop();
        self.encoder.release();
        debug!(from = self.state.name(), frames = self.frames_submitted, "Encoder stopped and released");
        self.state = SessionState::Released;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn codec(&self) -> FourCc {
        self.encoder.codec()
    }

    pub fn geometry(&self) -> Option<FrameGeometry> {
        self.geometry
    }

    /// Parameter rejections collected during configuration
    pub fn warnings(&self) -> &[RecorderError] {
        &self.warnings
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    pub fn output_capacity(&self) -> usize {
        self.output.len()
    }

    fn running_geometry(&self, operation: &'static str) -> Result<FrameGeometry> {
        match (self.state, self.geometry) {
            (SessionState::Running, Some(geometry)) => Ok(geometry),
            _ => Err(self.invalid_state(operation)),
        }
    }

    fn invalid_state(&self, operation: &'static str) -> RecorderError {
        RecorderError::InvalidState { operation, state: self.state.name() }
    }
}

impl<E: Encoder> Drop for EncoderSession<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::SyntheticEncoder;

    fn config() -> EncoderConfig {
        EncoderConfig::new(FrameGeometry::i420(4, 2).unwrap())
    }

    fn running(encoder: SyntheticEncoder) -> EncoderSession<SyntheticEncoder> {
        let mut session = EncoderSession::new(encoder);
        session.configure(&config()).unwrap();
        session.start().unwrap();
        session
    }

    #[test]
    fn walks_the_lifecycle() {
        let encoder = SyntheticEncoder::new(16);
        let log = encoder.call_log();
        let mut session = EncoderSession::new(encoder);
        assert_eq!(session.state(), SessionState::Unconfigured);

        session.configure(&config()).unwrap();
        assert_eq!(session.state(), SessionState::Configured);
        assert_eq!(session.output_capacity(), 4 * 2 * 3);

        session.start().unwrap();
        session.encode(&[1u8; 12]).unwrap();
        let output = session.retrieve_output(true).unwrap().unwrap();
        assert_eq!(output.data.len(), 16);

        session.shutdown();
        assert_eq!(session.state(), SessionState::Released);
        assert_eq!(log.calls(), vec!["configure", "start", "encode", "retrieve", "stop", "release"]);
    }

    #[test]
    fn rejects_out_of_order_calls() {
        let mut session = EncoderSession::new(SyntheticEncoder::new(8));
        assert!(matches!(session.start(), Err(RecorderError::InvalidState { .. })));
        assert!(matches!(session.encode(&[0u8; 12]), Err(RecorderError::InvalidState { .. })));

        session.configure(&config()).unwrap();
        assert!(session.configure(&config()).is_err());
        assert!(session.retrieve_output(true).is_err());
    }

    #[test]
    fn configuration_rejection_is_only_a_warning() {
        let mut session = EncoderSession::new(SyntheticEncoder::new(8).fail_configure());
        session.configure(&config()).unwrap();
        assert_eq!(session.warnings().len(), 1);
        assert!(matches!(session.warnings()[0], RecorderError::Configuration { .. }));
        session.start().unwrap();
    }

    #[test]
    fn start_failure_is_fatal_setup() {
        let mut session = EncoderSession::new(SyntheticEncoder::new(8).fail_start());
        session.configure(&config()).unwrap();
        let err = session.start().unwrap_err();
        assert!(matches!(err, RecorderError::EncoderStart { .. }));
        assert_eq!(err.severity(), crate::ErrorSeverity::FatalSetup);
    }

    #[test]
    fn oversized_output_is_rejected_not_truncated() {
        let mut session = running(SyntheticEncoder::new(8).oversize_at(0));
        session.encode(&[0u8; 12]).unwrap();
        let err = session.retrieve_output(true).unwrap_err();
        assert!(matches!(err, RecorderError::OutputOverflow { reported, capacity: 24 } if reported > 24));
    }

    #[test]
    fn encode_failure_reports_frame_index() {
        let mut session = running(SyntheticEncoder::new(8).fail_encode_at(1));
        session.encode(&[0u8; 12]).unwrap();
        session.retrieve_output(true).unwrap();
        match session.encode(&[0u8; 12]) {
            Err(RecorderError::Encode { frame, .. }) => assert_eq!(frame, 1),
            other => panic!("expected encode failure, got {other:?}"),
        }
    }

    #[test]
    fn short_frames_are_refused() {
        let mut session = running(SyntheticEncoder::new(8));
        assert!(matches!(session.encode(&[0u8; 5]), Err(RecorderError::InvalidInput { .. })));
    }

    #[test]
    fn non_blocking_retrieve_without_frame_is_not_ready() {
        let mut session = running(SyntheticEncoder::new(8));
        assert!(session.retrieve_output(false).unwrap().is_none());
    }

    #[test]
    fn stop_and_release_happen_once_even_when_dropped() {
        let encoder = SyntheticEncoder::new(8);
        let log = encoder.call_log();
        {
            let mut session = running(encoder);
            session.shutdown();
            session.shutdown();
        }
        assert_eq!(log.count("stop"), 1);
        assert_eq!(log.count("release"), 1);

        let encoder = SyntheticEncoder::new(8);
        let log = encoder.call_log();
        drop(running(encoder));
        assert_eq!(log.count("stop"), 1);
        assert_eq!(log.count("release"), 1);
    }
}
