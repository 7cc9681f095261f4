//! Synthetic stereo sessions.
//!
//! Projects a calibration board through a virtual two-camera rig and writes
//! what a detector would have seen into a [`Session`]. The schedule mixes
//! in frame pairs the capture loop has to discard: pairs with the board out
//! of view, and pairs where only one camera resolves the corners.

use crate::calibration::CameraModel;
use crate::frame::{CameraSlot, ImageSize, RecordedCamera, RecordedFrame, Session};
use crate::pattern::PatternSpec;
use nalgebra::{Isometry3, Point2, Point3, Translation3, UnitQuaternion, Vector3};
use std::f64::consts::TAU;

/// One camera of the virtual rig.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualCamera {
    pub model: CameraModel,
    pub image_size: ImageSize,
}

impl VirtualCamera {
    /// Camera with the principal point at the image centre.
    pub fn centred(fx: f64, fy: f64, k1: f64, k2: f64, image_size: ImageSize) -> Self {
        let (cx, cy) = image_size.center();
        Self {
            model: CameraModel {
                k1,
                k2,
                ..CameraModel::pinhole(fx, fy, cx, cy)
            },
            image_size,
        }
    }

    /// Pixel positions of `points` (board frame) seen under `pose`.
    ///
    /// `None` unless every point lands inside the image.
    pub fn observe(&self, pose: &Isometry3<f64>, points: &[Point3<f64>]) -> Option<Vec<Point2<f64>>> {
        points
            .iter()
            .map(|p| {
                self.model
                    .project_board(pose, p)
                    .filter(|px| self.image_size.contains(px.x, px.y))
            })
            .collect()
    }
}

/// Two cameras with a fixed relative pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualRig {
    pub cameras: [VirtualCamera; 2],
    /// Maps camera-0 coordinates to camera-1 coordinates.
    pub camera1_from_camera0: Isometry3<f64>,
}

impl Default for VirtualRig {
    /// 640x480 cameras, 10 cm apart along X, with a slight toe-in.
    fn default() -> Self {
        let size = ImageSize::new(640, 480);
        Self {
            cameras: [
                VirtualCamera::centred(800.0, 795.0, -0.08, 0.015, size),
                VirtualCamera::centred(810.0, 805.0, -0.06, 0.01, size),
            ],
            camera1_from_camera0: Isometry3::from_parts(
                Translation3::new(-0.1, 0.0, 0.0),
                UnitQuaternion::from_euler_angles(0.0, 0.02, 0.0),
            ),
        }
    }
}

impl VirtualRig {
    pub fn camera(&self, slot: CameraSlot) -> &VirtualCamera {
        &self.cameras[slot.index()]
    }

    /// Observe the board from one camera; `pose` is given in camera 0.
    pub fn observe(
        &self,
        slot: CameraSlot,
        pose: &Isometry3<f64>,
        points: &[Point3<f64>],
    ) -> Option<Vec<Point2<f64>>> {
        match slot {
            CameraSlot::Camera0 => self.camera(slot).observe(pose, points),
            CameraSlot::Camera1 => self
                .camera(slot)
                .observe(&(self.camera1_from_camera0 * pose), points),
        }
    }
}

/// Board poses in camera 0, tilted about both board axes and centred
/// between the two cameras of the default rig.
pub fn board_poses(pattern: &PatternSpec, count: usize) -> Vec<Isometry3<f64>> {
    let centre = Vector3::new(
        (pattern.width() as f64 - 1.0) * pattern.cell_size() * 0.5,
        (pattern.height() as f64 - 1.0) * pattern.cell_size() * 0.5,
        0.0,
    );
    (0..count)
        .map(|k| {
            let phase = TAU * k as f64 / count.max(1) as f64;
            let rotation = UnitQuaternion::from_euler_angles(
                0.3 * (phase + 0.4).sin(),
                0.3 * phase.cos(),
                0.1 * (2.0 * phase).sin(),
            );
            let distance = 0.55 + 0.05 * (k % 3) as f64;
            let position = Vector3::new(
                0.05 + 0.015 * phase.cos(),
                0.015 * phase.sin(),
                distance,
            );
            Isometry3::from_parts(
                Translation3::from(position - rotation * centre),
                rotation,
            )
        })
        .collect()
}

/// How a generated session is laid out.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthOptions {
    /// Frame pairs in which both cameras see the whole board.
    pub views: usize,
    /// Insert an unusable frame pair after every `skip_every` good ones;
    /// `0` disables them.
    pub skip_every: usize,
    pub pattern: PatternSpec,
    pub camera_ids: [String; 2],
}

/// Build a session from a virtual rig.
///
/// Each camera starts with a blank startup frame for device validation. Poses
/// where the board leaves either image are skipped, so the session may hold
/// fewer than `options.views` usable pairs.
pub fn generate_session(rig: &VirtualRig, options: &SynthOptions) -> Session {
    let reference = options.pattern.reference_points();
    let sizes = [rig.cameras[0].image_size, rig.cameras[1].image_size];
    let mut frames: [Vec<RecordedFrame>; 2] = [
        vec![RecordedFrame::blank(sizes[0])],
        vec![RecordedFrame::blank(sizes[1])],
    ];

    let mut good = 0usize;
    let mut misses = 0usize;
    for pose in board_poses(&options.pattern, options.views) {
        let seen = CameraSlot::BOTH.map(|slot| rig.observe(slot, &pose, &reference));
        let [Some(first), Some(second)] = seen else {
            log::debug!("Board pose leaves the image, skipping it");
            continue;
        };
        frames[0].push(RecordedFrame::with_corners(sizes[0], &first));
        frames[1].push(RecordedFrame::with_corners(sizes[1], &second));
        good += 1;

        if options.skip_every > 0 && good % options.skip_every == 0 {
            if misses % 2 == 0 {
                // Presence check fires in camera 1 but extraction fails.
                frames[0].push(RecordedFrame::with_corners(sizes[0], &first));
                frames[1].push(RecordedFrame {
                    presence: Some(true),
                    ..RecordedFrame::blank(sizes[1])
                });
            } else {
                frames[0].push(RecordedFrame::blank(sizes[0]));
                frames[1].push(RecordedFrame::blank(sizes[1]));
            }
            misses += 1;
        }
    }
    log::info!(
        "Generated {} usable and {} unusable frame pairs",
        good,
        misses
    );

    let [frames0, frames1] = frames;
    let [id0, id1] = options.camera_ids.clone();
    Session::new(vec![
        RecordedCamera {
            id: id0,
            frames: frames0,
        },
        RecordedCamera {
            id: id1,
            frames: frames1,
        },
    ])
}
