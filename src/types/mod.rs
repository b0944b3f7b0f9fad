//! Core data types shared by the capture, encode and record stages.
//!
//! - [`FrameGeometry`] derives the fixed I420 plane layout from width and height
//! - [`RawFrame`] borrows one raw frame for submission to the encoder
//! - [`EncoderConfig`] holds the clamped encoder tunables
//! - [`Envelope`], [`ImageReading`] and [`RemoteCommand`] are what the record
//!   stream and the control channel carry
//! - [`Timestamp`] is a wall-clock instant with microsecond resolution
//!
//! ```rust
//! use shmrec::types::{EncoderConfig, FrameGeometry};
//!
//! let geometry = FrameGeometry::i420(640, 480).unwrap();
//! assert_eq!(geometry.frame_size(), 640 * 480 * 3 / 2);
//!
//! let config = EncoderConfig::new(geometry).qp_min(-3).qp_max(80);
//! assert_eq!((config.qp_min, config.qp_max), (0, 51));
//! ```

mod encoder_config;
mod frame;
mod record;
mod timestamp;

pub use encoder_config::{
    DEFAULT_BITRATE_KBPS, DEFAULT_FPS, EncoderConfig, QP_MAX, QP_MIN, RateControlMode,
    ReferenceMode,
};
pub use frame::{FrameGeometry, RawFrame};
pub use record::{
    Envelope, FourCc, IMAGE_READING_TYPE, ImageReading, RECORDER_COMMAND_TYPE, RemoteCommand,
};
pub use timestamp::Timestamp;
