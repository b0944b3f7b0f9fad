//! Planar I420 frame geometry and borrowed raw frames

use serde::{Deserialize, Serialize};

use crate::{RecorderError, Result};

/// Plane layout of a planar YUV 4:2:0 (I420) frame.
///
/// Derived once from width and height; never changes for the lifetime of a
/// frame region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    /// Row pitch of the Y, U and V planes in bytes
    pub pitch: [u32; 3],
    /// Byte offset of the Y, U and V planes from the start of the buffer
    pub offset: [usize; 3],
}

impl FrameGeometry {
    /// Derive the I420 layout for a `width` x `height` frame.
    ///
    /// Both dimensions must be non-zero and even so the chroma planes cover
    /// whole 2x2 blocks.
    pub fn i420(width: u32, height: u32) -> Result<Self> {
        if width == 0 || width % 2 != 0 {
            return Err(RecorderError::invalid_input(
                "width",
                width.to_string(),
                "must be even and non-zero",
            ));
        }
        if height == 0 || height % 2 != 0 {
            return Err(RecorderError::invalid_input(
                "height",
                height.to_string(),
                "must be even and non-zero",
            ));
        }

        let luma = width as usize * height as usize;
        let u_offset = luma;
        let v_offset = u_offset + luma / 4;

        Ok(Self {
            width,
            height,
            pitch: [width, width / 2, width / 2],
            offset: [0, u_offset, v_offset],
        })
    }

    /// Size of one raw frame in bytes (width x height x 3/2).
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * 3 / 2
    }

    /// Capacity reserved for one frame of compressed output.
    ///
    /// Three bytes per pixel, i.e. an uncompressed RGB frame. Encoders are not
    /// expected to exceed it for a single frame; the encoder session rejects
    /// any output that does.
    pub fn output_capacity(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Split a full I420 buffer into its Y, U and V planes.
    pub fn planes<'a>(&self, data: &'a [u8]) -> Option<(&'a [u8], &'a [u8], &'a [u8])> {
        if data.len() < self.frame_size() {
            return None;
        }
        let y = &data[self.offset[0]..self.offset[1]];
        let u = &data[self.offset[1]..self.offset[2]];
        let v = &data[self.offset[2]..self.frame_size()];
        Some((y, u, v))
    }
}

/// A raw frame handed to the encoder by reference.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    pub geometry: FrameGeometry,
    pub data: &'a [u8],
}

impl<'a> RawFrame<'a> {
    pub fn new(geometry: FrameGeometry, data: &'a [u8]) -> Self {
        Self { geometry, data }
    }
}
