//! Encoder capability and session lifecycle.
//!
//! The compressor itself is opaque: anything that can be configured, started,
//! fed raw frames by reference and drained into a caller-owned buffer
//! implements [`Encoder`]. [`EncoderSession`] wraps one encoder and enforces
//! the lifecycle
//!
//! ```text
//! Unconfigured -> Configured -> Running -> Released
//! ```
//!
//! including the obligation to stop and release it exactly once.
//!
//! # Backends
//!
//! - [`SyntheticEncoder`]: deterministic fixed-size output with injectable
//!   failures, for dry runs and tests
//! - `OpenH264Encoder` (feature `openh264`): software H.264

mod session;
mod synthetic;

#[cfg(feature = "openh264")]
mod h264;

pub use session::{EncodedOutput, EncoderSession, SessionState};
pub use synthetic::{CallLog, SyntheticEncoder};

#[cfg(feature = "openh264")]
pub use h264::OpenH264Encoder;

use crate::EncoderError;
use crate::types::{EncoderConfig, FourCc, RawFrame};

/// Metadata of one retrieved output unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputInfo {
    /// Bytes the encoder produced; may exceed the buffer it was given
    pub size: usize,
    pub temporal_id: u8,
    pub keyframe: bool,
}

/// Outcome of asking the encoder for output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStatus {
    /// Output was written to the front of the buffer
    Ready(OutputInfo),
    /// Nothing available yet; only returned for non-blocking calls
    NotReady,
}

/// Capability interface of an opaque video compressor
pub trait Encoder: Send {
    /// Codec tag written into each record
    fn codec(&self) -> FourCc;

    /// Apply the session parameters
    ///
    /// A rejection is not fatal by itself; the session logs it and keeps
    /// whatever the encoder retained.
    fn configure(&mut self, config: &EncoderConfig) -> Result<(), EncoderError>;

    fn start(&mut self) -> Result<(), EncoderError>;

    /// Submit one raw frame; the encoder must not keep the borrow
    fn encode(&mut self, frame: &RawFrame<'_>) -> Result<(), EncoderError>;

    /// Copy available output into `buffer`
    ///
    /// With `wait` set the call blocks until the submitted frame is done.
    fn retrieve_output(&mut self, buffer: &mut [u8], wait: bool)
    -> Result<OutputStatus, EncoderError>;

    fn stop(&mut self);

    fn release(&mut self);
}

impl<E: Encoder + ?Sized> Encoder for Box<E> {
    fn codec(&self) -> FourCc {
        (**self).codec()
    }

    fn configure(&mut self, config: &EncoderConfig) -> Result<(), EncoderError> {
        (**self).configure(config)
    }

    fn start(&mut self) -> Result<(), EncoderError> {
        (**self).start()
    }

    fn encode(&mut self, frame: &RawFrame<'_>) -> Result<(), EncoderError> {
        (**self).encode(frame)
    }

    fn retrieve_output(
        &mut self,
        buffer: &mut [u8],
        wait: bool,
    ) -> Result<OutputStatus, EncoderError> {
        (**self).retrieve_output(buffer, wait)
    }

    fn stop(&mut self) {
        (**self).stop()
    }

    fn release(&mut self) {
        (**self).release()
    }
}
