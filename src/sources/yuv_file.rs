//! Raw I420 file source for replaying captured frames
//!
//! Reads a headerless `.yuv` file one frame at a time, paced at the
//! configured frame rate. The end of the file invalidates the source unless
//! looping is enabled.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::source::{FrameAccess, FrameSource};
use crate::types::{FrameGeometry, Timestamp};
use crate::{RecorderError, Result};

/// Location of POSIX shared memory objects on Linux.
pub const SHM_DIR: &str = "/dev/shm";

/// Resolve a region name to a path: the name itself if it exists, else the
/// entry of the same name under [`SHM_DIR`].
pub fn resolve_region_path(name: &str) -> PathBuf {
    let direct = PathBuf::from(name);
    if direct.exists() {
        return direct;
    }
    Path::new(SHM_DIR).join(name.trim_start_matches('/'))
}

/// Frame source replaying a raw I420 file
pub struct YuvFileSource {
    name: String,
    path: PathBuf,
    reader: BufReader<File>,
    geometry: FrameGeometry,
    buffer: Vec<u8>,
    interval: Duration,
    next_due: Option<Instant>,
    looping: bool,
    valid: bool,
    frames_read: u64,
    woke_at: Timestamp,
}

impl YuvFileSource {
    /// Attach to `path`, which must hold at least one full frame.
    pub fn open<P: AsRef<Path>>(path: P, geometry: FrameGeometry, fps: u32) -> Result<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();

        let file = File::open(path).map_err(|e| {
            RecorderError::attach_failed_with_source(name.clone(), "cannot open region", Box::new(e))
        })?;
        let len = file
            .metadata()
            .map_err(|e| {
                RecorderError::attach_failed_with_source(name.clone(), "cannot stat region", Box::new(e))
            })?
            .len();

        let frame_size = geometry.frame_size();
        if len < frame_size as u64 {
            return Err(RecorderError::attach_failed(
                name,
                format!("region holds {} bytes, one frame needs {}", len, frame_size),
            ));
        }

        info!(
            path = %path.display(),
            bytes = len,
            frames = len / frame_size as u64,
            "Attached to raw frame file"
        );

        Ok(Self {
            name,
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            geometry,
            buffer: vec![0; frame_size],
            interval: Duration::from_secs_f64(1.0 / f64::from(fps.max(1))),
            next_due: None,
            looping: false,
            valid: true,
            frames_read: 0,
            woke_at: Timestamp::default(),
        })
    }

    /// Rewind to the first frame instead of ending at end of file
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_frame(&mut self) -> std::io::Result<()> {
        match self.reader.read_exact(&mut self.buffer) {
            Err(e) if e.kind() == ErrorKind::UnexpectedEof && self.looping => {
                debug!("Reached end of raw frame file, rewinding");
                self.reader.seek(SeekFrom::Start(0))?;
                self.reader.read_exact(&mut self.buffer)
            }
            other => other,
        }
    }

    fn invalid(&self, reason: &str) -> RecorderError {
        RecorderError::source_invalidated(format!("{}: {}", self.name, reason))
    }
}

/// View of the most recently read frame
pub struct YuvAccess<'a> {
    data: &'a [u8],
    woke_at: Timestamp,
}

impl FrameAccess for YuvAccess<'_> {
    fn data(&self) -> &[u8] {
        self.data
    }

    fn capture_timestamp(&self) -> Timestamp {
        self.woke_at
    }
}

impl FrameSource for YuvFileSource {
    type Access<'a> = YuvAccess<'a>;

    fn name(&self) -> &str {
        &self.name
    }

    fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    fn wait_for_frame(&mut self) -> Result<()> {
        if !self.valid {
            return Err(self.invalid("source already ended"));
        }

        if let Some(due) = self.next_due {
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
        }

        if let Err(e) = self.read_frame() {
            self.valid = false;
            return Err(if e.kind() == ErrorKind::UnexpectedEof {
                info!(frames = self.frames_read, "Raw frame file exhausted");
                self.invalid("end of file")
            } else {
                self.invalid(&e.to_string())
            });
        }

        self.frames_read += 1;
        self.next_due = Some(self.next_due.unwrap_or_else(Instant::now) + self.interval);
        self.woke_at = Timestamp::now();
        Ok(())
    }

    fn begin_access(&mut self) -> Result<YuvAccess<'_>> {
        if !self.valid {
            return Err(self.invalid("source already ended"));
        }
        Ok(YuvAccess { data: &self.buffer, woke_at: self.woke_at })
    }

    fn is_valid(&self) -> bool {
        self.valid
    }
}
