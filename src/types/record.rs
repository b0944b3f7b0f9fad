//! Record payloads and the envelope that timestamps them

use serde::{Deserialize, Serialize};
use std::fmt;

use super::Timestamp;

/// Data type tag of an encoded image reading.
pub const IMAGE_READING_TYPE: u32 = 1055;
/// Data type tag of a remote recorder command.
pub const RECORDER_COMMAND_TYPE: u32 = 11;

/// Four-character codec tag, e.g. `VP90` or `H264`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const VP9: FourCc = FourCc(*b"VP90");
    pub const H264: FourCc = FourCc(*b"H264");
    /// Tag written by the synthetic test encoder.
    pub const SYNTHETIC: FourCc = FourCc(*b"SYN0");
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({})", self)
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// One compressed image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReading {
    pub fourcc: FourCc,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Start/rotate or stop the recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteCommand {
    Start,
    Stop,
}

impl RemoteCommand {
    pub fn code(self) -> u8 {
        match self {
            RemoteCommand::Start => 1,
            RemoteCommand::Stop => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(RemoteCommand::Start),
            2 => Some(RemoteCommand::Stop),
            _ => None,
        }
    }
}

/// Timestamped, typed container around one serialized payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub data_type: u32,
    pub sent: Timestamp,
    pub sample: Timestamp,
    pub sender_stamp: u32,
    pub payload: Vec<u8>,
}
