//! Frame source trait for raw frame producers

use crate::Result;
use crate::types::{FrameGeometry, Timestamp};

/// Trait for regions holding one reusable raw frame buffer
///
/// The producer overwrites the buffer in place between waits. A consumer
/// calls [`wait_for_frame`](FrameSource::wait_for_frame), then holds the
/// region exclusively through the guard returned by
/// [`begin_access`](FrameSource::begin_access) while it reads the frame.
/// Dropping the guard ends the access, including on early exits.
///
/// Once a source reports invalidation (producer gone, end of input) every
/// later call fails with [`RecorderError::SourceInvalidated`](crate::RecorderError::SourceInvalidated).
pub trait FrameSource: Send {
    /// Exclusive view of the current frame
    type Access<'a>: FrameAccess
    where
        Self: 'a;

    /// Name of the attached region
    fn name(&self) -> &str;

    /// Plane layout of the frames this source delivers
    fn geometry(&self) -> FrameGeometry;

    /// Block until the producer signals a new frame
    ///
    /// There is no timeout; the producer going away is the only way out of a
    /// wait that never sees a frame.
    fn wait_for_frame(&mut self) -> Result<()>;

    /// Take exclusive access to the frame buffer
    fn begin_access(&mut self) -> Result<Self::Access<'_>>;

    /// Whether the region is still usable
    fn is_valid(&self) -> bool;
}

/// Scoped exclusive access to a frame; released on drop
pub trait FrameAccess {
    /// Raw I420 bytes of the current frame
    fn data(&self) -> &[u8];

    /// Best-known capture time of the current frame
    ///
    /// The producer-supplied timestamp when there is one, otherwise the time
    /// the preceding wait returned.
    fn capture_timestamp(&self) -> Timestamp;
}
