//! Encoder parameters fixed at session start

use serde::{Deserialize, Serialize};

use super::FrameGeometry;

/// Quantizer range defined by the codec.
pub const QP_MIN: u32 = 0;
pub const QP_MAX: u32 = 51;

/// Frame rate used when none is requested.
pub const DEFAULT_FPS: u32 = 30;
/// Target bitrate in kbit/s used when none is requested.
pub const DEFAULT_BITRATE_KBPS: u32 = 8000;

/// Rate-control strategy of the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateControlMode {
    Disabled,
    ConstantBitrate,
    VariableBitrate,
    VideoConferencing,
    ConstantQuantizer,
}

impl RateControlMode {
    /// Map the numeric command-line index, clamped to `0..=4`.
    pub fn from_index(index: i64) -> Self {
        match index.clamp(0, 4) {
            0 => RateControlMode::Disabled,
            1 => RateControlMode::ConstantBitrate,
            2 => RateControlMode::VariableBitrate,
            3 => RateControlMode::VideoConferencing,
            _ => RateControlMode::ConstantQuantizer,
        }
    }

    pub fn index(self) -> u32 {
        match self {
            RateControlMode::Disabled => 0,
            RateControlMode::ConstantBitrate => 1,
            RateControlMode::VariableBitrate => 2,
            RateControlMode::VideoConferencing => 3,
            RateControlMode::ConstantQuantizer => 4,
        }
    }
}

/// Which earlier frames serve as references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceMode {
    /// last = previous frame, golden/alt = previous key frame
    PreviousAndKey,
    /// last = previous, golden = one before last, alt = one before golden
    RollingHistory,
}

impl ReferenceMode {
    /// Map the numeric command-line index, clamped to `0..=1`.
    pub fn from_index(index: i64) -> Self {
        if index.clamp(0, 1) == 0 { ReferenceMode::PreviousAndKey } else { ReferenceMode::RollingHistory }
    }

    pub fn index(self) -> u32 {
        match self {
            ReferenceMode::PreviousAndKey => 0,
            ReferenceMode::RollingHistory => 1,
        }
    }
}

/// Effective encoder configuration.
///
/// Every setter clamps its input into the range the encoder accepts instead
/// of rejecting it. Bounds are clamped independently: a requested minimum
/// quantizer above the maximum is passed through as given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub geometry: FrameGeometry,
    pub fps: u32,
    /// Group-of-pictures (intra period) length
    pub gop: u32,
    /// 0 = intra only, 1 = I and P, N = I, P and N-1 B frames
    pub ip_period: u32,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    pub rc_mode: RateControlMode,
    pub init_qp: u32,
    pub qp_min: u32,
    pub qp_max: u32,
    pub disable_frame_skip: bool,
    pub diff_qp_ip: i8,
    pub diff_qp_ib: i8,
    pub num_ref_frames: u32,
    pub reference_mode: ReferenceMode,
}

impl EncoderConfig {
    /// Configuration with the recorder's defaults for a given frame layout.
    pub fn new(geometry: FrameGeometry) -> Self {
        Self {
            geometry,
            fps: DEFAULT_FPS,
            gop: 1,
            ip_period: 1,
            bitrate: DEFAULT_BITRATE_KBPS * 1024,
            rc_mode: RateControlMode::ConstantQuantizer,
            init_qp: 26,
            qp_min: QP_MIN,
            qp_max: QP_MAX,
            disable_frame_skip: true,
            diff_qp_ip: 0,
            diff_qp_ib: 0,
            num_ref_frames: 1,
            reference_mode: ReferenceMode::PreviousAndKey,
        }
    }

    pub fn fps(mut self, fps: i64) -> Self {
        self.fps = clamp_u32(fps, 1, 240);
        self
    }

    pub fn gop(mut self, gop: i64) -> Self {
        self.gop = clamp_u32(gop, 0, i64::from(u32::MAX));
        self
    }

    pub fn ip_period(mut self, ip_period: i64) -> Self {
        self.ip_period = clamp_u32(ip_period, 0, i64::from(u32::MAX));
        self
    }

    /// Target bitrate given in kbit/s (1 kbit = 1024 bits).
    pub fn bitrate_kbps(mut self, kbps: i64) -> Self {
        self.bitrate = clamp_u32(kbps, 0, i64::from(u32::MAX / 1024)) * 1024;
        self
    }

    pub fn rc_mode(mut self, index: i64) -> Self {
        self.rc_mode = RateControlMode::from_index(index);
        self
    }

    pub fn init_qp(mut self, qp: i64) -> Self {
        self.init_qp = clamp_qp(qp);
        self
    }

    pub fn qp_min(mut self, qp: i64) -> Self {
        self.qp_min = clamp_qp(qp);
        self
    }

    pub fn qp_max(mut self, qp: i64) -> Self {
        self.qp_max = clamp_qp(qp);
        self
    }

    pub fn disable_frame_skip(mut self, flag: i64) -> Self {
        self.disable_frame_skip = flag.clamp(0, 1) == 1;
        self
    }

    pub fn diff_qp_ip(mut self, delta: i64) -> Self {
        self.diff_qp_ip = clamp_i8(delta);
        self
    }

    pub fn diff_qp_ib(mut self, delta: i64) -> Self {
        self.diff_qp_ib = clamp_i8(delta);
        self
    }

    pub fn num_ref_frames(mut self, count: i64) -> Self {
        self.num_ref_frames = clamp_u32(count, 0, 16);
        self
    }

    pub fn reference_mode(mut self, index: i64) -> Self {
        self.reference_mode = ReferenceMode::from_index(index);
        self
    }
}

fn clamp_qp(value: i64) -> u32 {
    clamp_u32(value, i64::from(QP_MIN), i64::from(QP_MAX))
}

fn clamp_u32(value: i64, min: i64, max: i64) -> u32 {
    value.clamp(min, max) as u32
}

fn clamp_i8(value: i64) -> i8 {
    value.clamp(i64::from(i8::MIN), i64::from(i8::MAX)) as i8
}
