//! Frame types shared by every backend.

use std::fmt;

/// Which camera of the rig a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraSlot {
    Camera0,
    Camera1,
}

impl CameraSlot {
    /// Both slots in rig order.
    pub const BOTH: [CameraSlot; 2] = [CameraSlot::Camera0, CameraSlot::Camera1];

    /// Array index of the slot (0 or 1).
    pub fn index(self) -> usize {
        match self {
            CameraSlot::Camera0 => 0,
            CameraSlot::Camera1 => 1,
        }
    }
}

impl fmt::Display for CameraSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraSlot::Camera0 => write!(f, "camera0"),
            CameraSlot::Camera1 => write!(f, "camera1"),
        }
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Principal point used when it is held fixed: the pixel-grid centre.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.width as f64 - 1.0) * 0.5,
            (self.height as f64 - 1.0) * 0.5,
        )
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= 0.0 && y >= 0.0 && x <= (self.width as f64 - 1.0) && y <= (self.height as f64 - 1.0)
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Minimal view of an image needed by the capture loop.
pub trait FrameImage {
    /// True when the device delivered a frame without pixel data.
    fn is_empty(&self) -> bool;

    fn size(&self) -> ImageSize;
}

/// Two frames captured at (approximately) the same instant.
#[derive(Debug, Clone)]
pub struct FramePair<I> {
    /// Zero-based position of the pair in the capture stream.
    pub index: u64,
    pub frames: [I; 2],
}

impl<I> FramePair<I> {
    pub fn new(index: u64, frame0: I, frame1: I) -> Self {
        Self {
            index,
            frames: [frame0, frame1],
        }
    }

    pub fn frame(&self, slot: CameraSlot) -> &I {
        &self.frames[slot.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_slot_display() {
        assert_eq!(format!("{}", CameraSlot::Camera0), "camera0");
        assert_eq!(format!("{}", CameraSlot::Camera1), "camera1");
        assert_eq!(CameraSlot::Camera1.index(), 1);
    }

    #[test]
    fn test_image_size_center() {
        let size = ImageSize::new(640, 480);
        assert_eq!(size.center(), (319.5, 239.5));
        assert_eq!(format!("{}", size), "640x480");
    }

    #[test]
    fn test_image_size_contains() {
        let size = ImageSize::new(640, 480);
        assert!(size.contains(0.0, 0.0));
        assert!(size.contains(639.0, 479.0));
        assert!(!size.contains(-0.5, 10.0));
        assert!(!size.contains(10.0, 480.0));
    }

    #[test]
    fn test_frame_pair_access() {
        let pair = FramePair::new(3, "left", "right");
        assert_eq!(pair.index, 3);
        assert_eq!(*pair.frame(CameraSlot::Camera0), "left");
        assert_eq!(*pair.frame(CameraSlot::Camera1), "right");
    }
}
