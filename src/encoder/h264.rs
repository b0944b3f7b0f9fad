//! Software H.264 backend built on `openh264`

use openh264::OpenH264API;
use openh264::encoder::{
    BitRate, Encoder as H264Encoder, EncoderConfig as H264Config, FrameRate, IntraFramePeriod,
    QpRange, RateControlMode as H264RateControl,
};
use openh264::formats::YUVSlices;
use tracing::{debug, trace};

use super::{Encoder, OutputInfo, OutputStatus};
use crate::EncoderError;
use crate::types::{EncoderConfig, FourCc, FrameGeometry, RateControlMode, RawFrame};

/// H.264 encoder running in-process
///
/// Produces one Annex B access unit per submitted frame. Bitrate, frame
/// rate, intra period, quantizer range and frame skipping are applied. Only
/// bitrate driven rate control is available. Every other tunable that differs
/// from the recorder default is reported back as rejected, and the encoder
/// runs without it.
pub struct OpenH264Encoder {
    config: Option<(FrameGeometry, H264Config)>,
    encoder: Option<H264Encoder>,
    pending: Option<Vec<u8>>,
    frames: u64,
    intra_period: u32,
}

impl OpenH264Encoder {
    pub fn new() -> Self {
        Self { config: None, encoder: None, pending: None, frames: 0, intra_period: 0 }
    }
}

/// Tunables this backend cannot honour, described for the operator.
fn ignored_parameters(config: &EncoderConfig) -> Vec<String> {
    let defaults = EncoderConfig::new(config.geometry);
    let mut ignored = Vec::new();

    match config.rc_mode {
        RateControlMode::ConstantBitrate | RateControlMode::VariableBitrate => {}
        other => ignored.push(format!("rc-mode {:?} (using bitrate mode)", other)),
    }
    if config.qp_min > config.qp_max {
        ignored.push(format!("qpmin {} above qpmax {}", config.qp_min, config.qp_max));
    }
    if config.ip_period > 1 {
        ignored.push(format!("ip-period {} (no B frames)", config.ip_period));
    }
    if config.init_qp != defaults.init_qp {
        ignored.push(format!("init-qp {}", config.init_qp));
    }
    if config.diff_qp_ip != defaults.diff_qp_ip {
        ignored.push(format!("diff-qp-ip {}", config.diff_qp_ip));
    }
    if config.diff_qp_ib != defaults.diff_qp_ib {
        ignored.push(format!("diff-qp-ib {}", config.diff_qp_ib));
    }
    if config.num_ref_frames != defaults.num_ref_frames {
        ignored.push(format!("num-ref-frame {}", config.num_ref_frames));
    }
    if config.reference_mode != defaults.reference_mode {
        ignored.push(format!("reference-mode {:?}", config.reference_mode));
    }
    ignored
}

impl Default for OpenH264Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for OpenH264Encoder {
    fn codec(&self) -> FourCc {
        FourCc::H264
    }

    fn configure(&mut self, config: &EncoderConfig) -> Result<(), EncoderError> {
        // ip-period 0 means intra only, whatever the gop says.
        self.intra_period = if config.ip_period == 0 { 1 } else { config.gop };

        let mut h264 = H264Config::new()
            .bitrate(BitRate::from_bps(config.bitrate))
            .max_frame_rate(FrameRate::from_hz(config.fps as f32))
            .rate_control_mode(H264RateControl::Bitrate)
            .intra_frame_period(IntraFramePeriod::from_num_frames(self.intra_period))
            .skip_frames(!config.disable_frame_skip);
        if config.qp_min <= config.qp_max {
            h264 = h264.qp(QpRange::new(config.qp_min as u8, config.qp_max as u8));
        }
        self.config = Some((config.geometry, h264));

        let ignored = ignored_parameters(config);
        if ignored.is_empty() {
            return Ok(());
        }
        Err(EncoderError::new(
            "set_parameters",
            ignored.len() as i32,
            format!("not supported by openh264: {}", ignored.join(", ")),
        ))
    }

    fn start(&mut self) -> Result<(), EncoderError> {
        let (_, config) = self
            .config
            .take()
            .ok_or_else(|| EncoderError::new("start", -1, "encoder was not configured"))?;
        let encoder = H264Encoder::with_api_config(OpenH264API::from_source(), config)
            .map_err(|e| EncoderError::new("start", -1, e.to_string()))?;
        self.encoder = Some(encoder);
        debug!("OpenH264 encoder created");
        Ok(())
    }

    fn encode(&mut self, frame: &RawFrame<'_>) -> Result<(), EncoderError> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| EncoderError::new("encode", -1, "encoder not started"))?;
        let geometry = frame.geometry;
        let (y, u, v) = geometry
            .planes(frame.data)
            .ok_or_else(|| EncoderError::new("encode", -2, "frame shorter than its geometry"))?;

        let width = geometry.width as usize;
        let height = geometry.height as usize;
        let yuv = YUVSlices::new((y, u, v), (width, height), (width, width / 2, width / 2));

        let bitstream = encoder
            .encode(&yuv)
            .map_err(|e| EncoderError::new("encode", -1, e.to_string()))?;
        let bytes = bitstream.to_vec();
        trace!(frame = self.frames, bytes = bytes.len(), "Encoded H.264 access unit");

        self.pending = Some(bytes);
        self.frames += 1;
        Ok(())
    }

    fn retrieve_output(
        &mut self,
        buffer: &mut [u8],
        _wait: bool,
    ) -> Result<OutputStatus, EncoderError> {
        // Encoding is synchronous; output is either pending or there is none.
        let Some(bytes) = self.pending.take() else {
            return Ok(OutputStatus::NotReady);
        };

        let index = self.frames.saturating_sub(1);
        let keyframe = match self.intra_period {
            0 => index == 0,
            period => index % u64::from(period) == 0,
        };
        let info = OutputInfo { size: bytes.len(), temporal_id: 0, keyframe };
        if let Some(dest) = buffer.get_mut(..bytes.len()) {
            dest.copy_from_slice(&bytes);
        }
        Ok(OutputStatus::Ready(info))
    }

    fn stop(&mut self) {
        self.pending = None;
    }

    fn release(&mut self) {
        self.encoder = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecorderError;
    use crate::encoder::EncoderSession;

    fn config() -> EncoderConfig {
        EncoderConfig::new(FrameGeometry::i420(64, 48).unwrap()).rc_mode(1)
    }

    #[test]
    fn supported_tunables_configure_cleanly() {
        let mut session = EncoderSession::new(OpenH264Encoder::new());
        session.configure(&config().gop(30).qp_min(10).qp_max(40).disable_frame_skip(0)).unwrap();
        assert!(session.warnings().is_empty());
    }

    #[test]
    fn unsupported_tunables_become_a_configuration_warning() {
        let mut session = EncoderSession::new(OpenH264Encoder::new());
        session.configure(&config().init_qp(30).diff_qp_ip(2).num_ref_frames(3)).unwrap();

        assert_eq!(session.warnings().len(), 1);
        let RecorderError::Configuration { source, .. } = &session.warnings()[0] else {
            panic!("expected a configuration warning, got {:?}", session.warnings()[0]);
        };
        assert_eq!(source.status, 3);
        assert!(source.message.contains("init-qp 30"));
        assert!(source.message.contains("diff-qp-ip 2"));
        assert!(source.message.contains("num-ref-frame 3"));
    }

    #[test]
    fn quantizer_rate_control_is_reported() {
        let ignored = ignored_parameters(&config().rc_mode(4).qp_min(40).qp_max(10));
        assert_eq!(ignored.len(), 2);
        assert!(ignored[0].starts_with("rc-mode ConstantQuantizer"));
        assert!(ignored[1].contains("qpmin 40 above qpmax 10"));
    }
}
