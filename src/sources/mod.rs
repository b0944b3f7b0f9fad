//! Concrete frame sources
//!
//! - [`memory`]: in-process region with notification, for embedding and tests
//! - [`yuv_file`]: raw I420 file replay, attached by region name or path

pub mod memory;
pub mod yuv_file;

pub use memory::{MemoryRegion, RegionReader, RegionWriter};
pub use yuv_file::{YuvFileSource, resolve_region_path};
