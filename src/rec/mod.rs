//! Record stream format and replay support
//!
//! [`format`] defines how envelopes are framed on disk and on the control
//! channel; [`reader`] replays a recording as an ordered sequence.

pub mod format;
pub mod reader;

pub use reader::RecordReader;
