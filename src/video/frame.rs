//! Decoded video frame handles
//!
//! A decoded frame is an opaque, memory-heavy resource with explicit
//! release. [`VideoFrame`] owns exactly one such resource; cloning goes
//! through [`VideoFrame::try_clone`] and yields an independently releasable
//! handle. Closing is idempotent and dropping closes, so a resource is
//! released exactly once no matter which path gets there first.

use crate::utils::error::{Result, TrackSyncError};
use std::fmt;
use std::sync::Arc;

/// Backing storage of a decoded frame (GPU surface, shared memory, ...)
pub trait FrameResource: Send + Sync {
    /// Produce an independent handle to the same picture
    fn try_clone(&self) -> Result<Box<dyn FrameResource>>;

    /// Release the underlying resource; called at most once per handle
    fn close(&mut self);

    /// Approximate memory footprint in bytes
    fn byte_size(&self) -> usize {
        0
    }
}

/// Owned handle to a decoded video frame
pub struct VideoFrame {
    /// Presentation time in seconds
    timestamp: f64,

    /// Frame duration in seconds
    duration: f64,

    /// Backing resource; `None` once closed
    resource: Option<Box<dyn FrameResource>>,
}

impl VideoFrame {
    /// Wrap a decoded resource
    pub fn new(resource: Box<dyn FrameResource>, timestamp: f64, duration: f64) -> Self {
        Self {
            timestamp,
            duration,
            resource: Some(resource),
        }
    }

    /// Presentation time in seconds
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Whether the resource has been released
    pub fn is_closed(&self) -> bool {
        self.resource.is_none()
    }

    /// Approximate memory footprint in bytes
    pub fn byte_size(&self) -> usize {
        self.resource.as_ref().map(|r| r.byte_size()).unwrap_or(0)
    }

    /// Borrow the backing resource
    pub fn resource(&self) -> Option<&dyn FrameResource> {
        self.resource.as_deref()
    }

    /// Clone into an independently owned handle
    pub fn try_clone(&self) -> Result<VideoFrame> {
        let resource = self
            .resource
            .as_ref()
            .ok_or_else(|| TrackSyncError::InvalidInput("cannot clone a closed frame".to_string()))?
            .try_clone()?;

        Ok(VideoFrame {
            timestamp: self.timestamp,
            duration: self.duration,
            resource: Some(resource),
        })
    }

    /// Release the resource; subsequent calls are no-ops
    pub fn close(&mut self) {
        if let Some(mut resource) = self.resource.take() {
            resource.close();
        }
    }
}

impl Drop for VideoFrame {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("timestamp", &self.timestamp)
            .field("duration", &self.duration)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Frame data formats
#[derive(Debug, Clone)]
pub enum FrameData {
    /// YUV 4:2:0 planar format (most common for video)
    Yuv420 {
        y_plane: Arc<[u8]>,
        u_plane: Arc<[u8]>,
        v_plane: Arc<[u8]>,
        y_stride: usize,
        uv_stride: usize,
    },

    /// NV12 format (Y plane + interleaved UV)
    Nv12 {
        y_plane: Arc<[u8]>,
        uv_plane: Arc<[u8]>,
        y_stride: usize,
        uv_stride: usize,
    },

    /// RGBA format (4 bytes per pixel)
    Rgba {
        data: Arc<[u8]>,
        stride: usize,
    },
}

impl FrameData {
    /// Total bytes across planes
    pub fn byte_size(&self) -> usize {
        match self {
            FrameData::Yuv420 { y_plane, u_plane, v_plane, .. } => {
                y_plane.len() + u_plane.len() + v_plane.len()
            }
            FrameData::Nv12 { y_plane, uv_plane, .. } => y_plane.len() + uv_plane.len(),
            FrameData::Rgba { data, .. } => data.len(),
        }
    }
}

/// CPU-side decoded picture
///
/// Planes are reference counted, so clones share pixel memory and closing
/// a clone only drops that clone's reference.
#[derive(Debug, Clone)]
pub struct CpuFrame {
    /// Pixel data
    pub data: FrameData,

    /// Frame width
    pub width: u32,

    /// Frame height
    pub height: u32,
}

impl CpuFrame {
    /// Solid RGBA frame, handy for test patterns
    pub fn solid_rgba(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            data.extend_from_slice(&rgba);
        }

        Self {
            data: FrameData::Rgba {
                data: Arc::from(data),
                stride: width as usize * 4,
            },
            width,
            height,
        }
    }
}

impl FrameResource for CpuFrame {
    fn try_clone(&self) -> Result<Box<dyn FrameResource>> {
        Ok(Box::new(self.clone()))
    }

    fn close(&mut self) {
        // Dropping the planes releases this handle's references.
        self.data = FrameData::Rgba { data: Arc::from(Vec::new()), stride: 0 };
    }

    fn byte_size(&self) -> usize {
        self.data.byte_size()
    }
}
