//! Shared-memory frame recorder.
//!
//! shmrec attaches to a region holding one raw I420 frame, waits for each new
//! frame, hands it to an encoder and appends the compressed output to a
//! `.rec` file as a timestamped record. Recording can run from startup or be
//! switched on and off by remote start/stop commands.
//!
//! # Features
//!
//! - **Scoped encoder lifecycle**: configure, start, encode, retrieve, then
//!   stop and release exactly once however the loop ends
//! - **Atomic rotation**: a record lands wholly in one file or is dropped,
//!   even while a remote command rotates or closes the file
//! - **Self-framed records**: files replay up to the last complete record
//!   after a crash
//! - **Pluggable backends**: any [`encoder::Encoder`] and any
//!   [`source::FrameSource`]
//!
//! # Architecture
//!
//! ```text
//! FrameSource --> PipelineDriver --> EncoderSession --> PipelineDriver --> RecordSink
//!                                                                            ^
//!                                       CommandSource --> RemoteListener ----+
//! ```
//!
//! The driver loop runs on a blocking thread; the remote listener runs as a
//! tokio task. They share only the [`RecordSink`](sink::RecordSink).
//!
//! # Example
//!
//! ```rust
//! use shmrec::encoder::{EncoderSession, SyntheticEncoder};
//! use shmrec::rec::RecordReader;
//! use shmrec::sink::RecordSink;
//! use shmrec::sources::MemoryRegion;
//! use shmrec::types::{EncoderConfig, FrameGeometry};
//! use shmrec::driver::{LoopExit, PipelineDriver};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # fn main() -> shmrec::Result<()> {
//! let dir = std::env::temp_dir().join(format!("shmrec-doc-{}", std::process::id()));
//! std::fs::create_dir_all(&dir)?;
//! let path = dir.join("doc.rec");
//!
//! let geometry = FrameGeometry::i420(4, 2)?;
//! let (writer, reader) = MemoryRegion::create("video0.i420", geometry);
//! writer.publish(&[0u8; 12], None)?;
//!
//! // Output must fit the 4 x 2 x 3 byte buffer the session reserves.
//! let mut session = EncoderSession::new(SyntheticEncoder::new(16));
//! session.configure(&EncoderConfig::new(geometry))?;
//! session.start()?;
//!
//! let sink = Arc::new(RecordSink::open(&path)?);
//! let driver = PipelineDriver::new(reader, session, sink, CancellationToken::new());
//! let progress = driver.progress();
//! let handle = std::thread::spawn(move || driver.run());
//! while progress.records() < 1 && !handle.is_finished() {
//!     std::thread::yield_now();
//! }
//! drop(writer);
//!
//! let summary = handle.join().expect("driver thread");
//! assert_eq!(summary.exit, LoopExit::SourceInvalidated);
//! assert_eq!(RecordReader::open(&path)?.read_all()?.len(), 1);
//! # std::fs::remove_dir_all(&dir)?;
//! # Ok(())
//! # }
//! ```

mod error;
pub mod types;

pub mod config;
pub mod driver;
pub mod encoder;
pub mod rec;
pub mod recorder;
pub mod remote;
pub mod sink;
pub mod source;
pub mod sources;

pub use error::*;

pub use driver::{LoopExit, PipelineDriver, PipelineProgress, RunSummary};
pub use rec::RecordReader;
pub use recorder::Recorder;
pub use sink::{RecordSink, RecordingNaming};
