//! Interfaces to the level/path system that moves the formation.
//!
//! The simulation never owns the anchor. The driver passes an
//! [`AnchorSource`] into every tick; [`PathFollower`] is a small waypoint
//! follower for headless runs and tests.

use serde::{Deserialize, Serialize};

use crate::math::{fixed_serde, Fixed, Vec2Fixed, Vec3Fixed};

/// World-space pose of the moving anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnchorPose {
    /// Anchor position.
    pub position: Vec3Fixed,
    /// Anchor-local X axis in world space.
    pub right: Vec3Fixed,
    /// Anchor-local Y axis in world space.
    pub up: Vec3Fixed,
    /// Anchor-local Z axis in world space.
    pub forward: Vec3Fixed,
}

impl Default for AnchorPose {
    fn default() -> Self {
        Self::at(Vec3Fixed::ZERO)
    }
}

impl AnchorPose {
    /// Pose at `position` aligned with the world axes.
    #[must_use]
    pub const fn at(position: Vec3Fixed) -> Self {
        Self {
            position,
            right: Vec3Fixed::X,
            up: Vec3Fixed::Y,
            forward: Vec3Fixed::Z,
        }
    }

    /// Pose at `position` looking along `forward`, keeping world Y as up.
    ///
    /// Falls back to world axes when `forward` is zero or vertical.
    #[must_use]
    pub fn looking(position: Vec3Fixed, forward: Vec3Fixed) -> Self {
        let forward = forward.normalize();
        let right = Vec3Fixed::Y.cross(forward).normalize();
        if forward.is_zero() || right.is_zero() {
            return Self::at(position);
        }
        let up = forward.cross(right);
        Self {
            position,
            right,
            up,
            forward,
        }
    }

    /// Express an anchor-local direction in world axes.
    #[must_use]
    pub fn local_to_world(&self, local: Vec3Fixed) -> Vec3Fixed {
        self.right.scale(local.x) + self.up.scale(local.y) + self.forward.scale(local.z)
    }
}

/// Provider of the anchor pose and play-area extents.
pub trait AnchorSource {
    /// Current anchor pose.
    fn anchor_pose(&self) -> AnchorPose;

    /// Half-extents of the visible play area in the formation plane.
    fn boundary_half_extents(&self) -> Vec2Fixed;
}

/// Anchor that never moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticAnchor {
    /// Fixed pose.
    pub pose: AnchorPose,
    /// Fixed boundary.
    pub half_extents: Vec2Fixed,
}

impl StaticAnchor {
    /// Create a static anchor.
    #[must_use]
    pub const fn new(pose: AnchorPose, half_extents: Vec2Fixed) -> Self {
        Self { pose, half_extents }
    }
}

impl AnchorSource for StaticAnchor {
    fn anchor_pose(&self) -> AnchorPose {
        self.pose
    }

    fn boundary_half_extents(&self) -> Vec2Fixed {
        self.half_extents
    }
}

/// Anchor that travels along a polyline at constant speed.
///
/// Stops at the final waypoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathFollower {
    waypoints: Vec<Vec3Fixed>,
    #[serde(with = "fixed_serde")]
    speed: Fixed,
    segment: usize,
    #[serde(with = "fixed_serde")]
    segment_progress: Fixed,
    half_extents: Vec2Fixed,
    pose: AnchorPose,
}

impl PathFollower {
    /// Create a follower at the first waypoint.
    ///
    /// An empty waypoint list behaves like a static anchor at the origin.
    #[must_use]
    pub fn new(waypoints: Vec<Vec3Fixed>, speed: Fixed, half_extents: Vec2Fixed) -> Self {
        let start = waypoints.first().copied().unwrap_or(Vec3Fixed::ZERO);
        let mut follower = Self {
            waypoints,
            speed,
            segment: 0,
            segment_progress: Fixed::ZERO,
            half_extents,
            pose: AnchorPose::at(start),
        };
        follower.refresh_pose();
        follower
    }

    /// Change the boundary (e.g. the viewport was resized).
    pub fn set_half_extents(&mut self, half_extents: Vec2Fixed) {
        self.half_extents = half_extents;
    }

    /// Whether the final waypoint has been reached.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.segment + 1 >= self.waypoints.len()
    }

    /// Move along the path by `speed * dt`.
    pub fn advance(&mut self, dt: Fixed) {
        let mut remaining = self.speed * dt;
        while remaining > Fixed::ZERO && !self.is_finished() {
            let from = self.waypoints[self.segment];
            let to = self.waypoints[self.segment + 1];
            let length = from.distance(to);
            let left_on_segment = length - self.segment_progress;

            if remaining < left_on_segment {
                self.segment_progress += remaining;
                remaining = Fixed::ZERO;
            } else {
                remaining -= left_on_segment;
                self.segment += 1;
                self.segment_progress = Fixed::ZERO;
            }
        }
        self.refresh_pose();
    }

    fn refresh_pose(&mut self) {
        let Some(&from) = self.waypoints.get(self.segment) else {
            return;
        };
        match self.waypoints.get(self.segment + 1) {
            Some(&to) => {
                let direction = (to - from).normalize();
                let position = from + direction.scale(self.segment_progress);
                self.pose = AnchorPose::looking(position, direction);
            }
            None => {
                // Keep the last heading once the path ends.
                self.pose.position = from;
            }
        }
    }
}

impl AnchorSource for PathFollower {
    fn anchor_pose(&self) -> AnchorPose {
        self.pose
    }

    fn boundary_half_extents(&self) -> Vec2Fixed {
        self.half_extents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_to_world_identity() {
        let pose = AnchorPose::at(Vec3Fixed::from_ints(5, 5, 5));
        let local = Vec3Fixed::from_ints(1, 2, 3);
        assert_eq!(pose.local_to_world(local), local);
    }

    #[test]
    fn test_looking_along_x_rotates_basis() {
        let pose = AnchorPose::looking(Vec3Fixed::ZERO, Vec3Fixed::from_ints(10, 0, 0));
        assert_eq!(pose.forward, Vec3Fixed::X);
        // Y x X = -Z
        assert_eq!(pose.right, -Vec3Fixed::Z);
        assert_eq!(pose.up, Vec3Fixed::Y);
        assert_eq!(
            pose.local_to_world(Vec3Fixed::from_ints(1, 0, 2)),
            Vec3Fixed::from_ints(2, 0, -1)
        );
    }

    #[test]
    fn test_path_follower_walks_segments_and_stops() {
        let mut path = PathFollower::new(
            vec![
                Vec3Fixed::ZERO,
                Vec3Fixed::from_ints(0, 0, 10),
                Vec3Fixed::from_ints(10, 0, 10),
            ],
            Fixed::from_num(4),
            Vec2Fixed::from_ints(8, 5),
        );

        path.advance(Fixed::from_num(2));
        assert_eq!(path.anchor_pose().position, Vec3Fixed::from_ints(0, 0, 8));

        path.advance(Fixed::from_num(1));
        assert_eq!(path.anchor_pose().position, Vec3Fixed::from_ints(2, 0, 10));
        assert_eq!(path.anchor_pose().forward, Vec3Fixed::X);

        path.advance(Fixed::from_num(100));
        assert!(path.is_finished());
        assert_eq!(path.anchor_pose().position, Vec3Fixed::from_ints(10, 0, 10));
        assert_eq!(path.boundary_half_extents(), Vec2Fixed::from_ints(8, 5));
    }
}
