//! Trajectory geometry: vectors, orientations and the point-sequence
//! analytics used by [`Trajectory`](crate::trajectory::Trajectory).
//!
//! Every function here is pure. The mutating operations return a fresh,
//! contiguously re-indexed point list; the trajectory applies it and
//! re-derives its length and time.

use std::ops::{Add, Div, Mul, Sub};

use serde::{Deserialize, Serialize};

use crate::trajectory::TrajectoryPoint;

/// Direction change (radians) at or below which an interior point is redundant.
pub const DEFAULT_COLLINEARITY_THRESHOLD: f64 = 0.1;

/// Positions closer than this (mm) are treated as coincident.
pub const POSITION_EPSILON: f64 = 1e-9;

/// Allowed deviation of a quaternion norm from 1.0.
pub const UNIT_NORM_TOLERANCE: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Vec3
// ---------------------------------------------------------------------------

/// A position or direction in millimetres.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, other: Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn length(self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn distance(self, other: Vec3) -> f64 {
        (other - self).length()
    }

    /// Unit vector, or `None` for a (near) zero vector.
    pub fn normalized(self) -> Option<Vec3> {
        let len = self.length();
        if len <= POSITION_EPSILON || !len.is_finite() {
            None
        } else {
            Some(self / len)
        }
    }

    pub fn lerp(self, other: Vec3, t: f64) -> Vec3 {
        self + (other - self) * t
    }

    pub fn min(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
    }

    pub fn max(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Vec3;
    fn mul(self, rhs: f64) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Div<f64> for Vec3 {
    type Output = Vec3;
    fn div(self, rhs: f64) -> Vec3 {
        Vec3::new(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

// ---------------------------------------------------------------------------
// Quat
// ---------------------------------------------------------------------------

/// Tool orientation as a unit quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quat {
    pub const IDENTITY: Quat = Quat { x: 0.0, y: 0.0, z: 0.0, w: 1.0 };

    /// Build a quaternion and normalize it. Degenerate input yields identity.
    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Quat { x, y, z, w }.normalized()
    }

    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt()
    }

    pub fn normalized(self) -> Quat {
        let n = self.norm();
        if n <= f64::EPSILON || !n.is_finite() {
            return Quat::IDENTITY;
        }
        if (n - 1.0).abs() <= f64::EPSILON {
            return self;
        }
        Quat {
            x: self.x / n,
            y: self.y / n,
            z: self.z / n,
            w: self.w / n,
        }
    }

    pub fn is_unit(&self) -> bool {
        (self.norm() - 1.0).abs() <= UNIT_NORM_TOLERANCE
    }
}

impl Default for Quat {
    fn default() -> Self {
        Quat::IDENTITY
    }
}

// ---------------------------------------------------------------------------
// Bounding box
// ---------------------------------------------------------------------------

/// Axis-aligned bounds of a point sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) / 2.0
    }
}

// ---------------------------------------------------------------------------
// Analytics
// ---------------------------------------------------------------------------

/// Sum of consecutive Euclidean distances; 0 for fewer than two points.
pub fn total_length(points: &[TrajectoryPoint]) -> f64 {
    points
        .windows(2)
        .map(|pair| pair[0].position.distance(pair[1].position))
        .sum()
}

/// Travel time at the average speed of each segment plus every point's dwell.
///
/// Segments whose average speed is not positive add no travel time.
pub fn estimated_time(points: &[TrajectoryPoint]) -> f64 {
    let travel: f64 = points
        .windows(2)
        .map(|pair| {
            let avg_speed = (pair[0].speed + pair[1].speed) / 2.0;
            if avg_speed > 0.0 {
                pair[0].position.distance(pair[1].position) / avg_speed
            } else {
                0.0
            }
        })
        .sum();
    let dwell: f64 = points.iter().map(|p| p.dwell_time.max(0.0)).sum();
    travel + dwell
}

pub fn bounding_box(points: &[TrajectoryPoint]) -> Option<BoundingBox> {
    let first = points.first()?.position;
    let (min, max) = points
        .iter()
        .fold((first, first), |(min, max), p| (min.min(p.position), max.max(p.position)));
    Some(BoundingBox { min, max })
}

/// Assign `index = position` for every point.
pub fn reindex(points: &mut [TrajectoryPoint]) {
    for (i, point) in points.iter_mut().enumerate() {
        point.index = i as i64;
    }
}

/// Drop interior points that do not change direction by more than `threshold`.
///
/// Each interior point is judged against its immediate neighbours: the angle
/// between `p[i] - p[i-1]` and `p[i+1] - p[i]`. A point on either side of a
/// zero-length segment is redundant. First and last are kept.
pub fn optimize(points: &[TrajectoryPoint], threshold: f64) -> Vec<TrajectoryPoint> {
    if points.len() < 3 {
        let mut out = points.to_vec();
        reindex(&mut out);
        return out;
    }

    let last = points.len() - 1;
    let mut out = Vec::with_capacity(points.len());
    out.push(points[0].clone());

    for window in points.windows(3) {
        let (prev, current, next) = (&window[0], &window[1], &window[2]);
        let incoming = (current.position - prev.position).normalized();
        let outgoing = (next.position - current.position).normalized();
        let (Some(incoming), Some(outgoing)) = (incoming, outgoing) else {
            continue;
        };
        let angle = incoming.dot(outgoing).clamp(-1.0, 1.0).acos();
        if angle > threshold {
            out.push(current.clone());
        }
    }

    out.push(points[last].clone());
    reindex(&mut out);
    out
}

/// Blend each interior position toward the average of itself and its two
/// original neighbours. `factor` is clamped to `[0, 1]`.
pub fn smooth(points: &[TrajectoryPoint], factor: f64) -> Vec<TrajectoryPoint> {
    let factor = crate::validation::clamp_or_min(factor, 0.0, 1.0);
    let mut out = points.to_vec();
    if points.len() >= 3 {
        for i in 1..points.len() - 1 {
            let average =
                (points[i - 1].position + points[i].position + points[i + 1].position) / 3.0;
            out[i].position = points[i].position * (1.0 - factor) + average * factor;
        }
    }
    reindex(&mut out);
    out
}

/// Re-emit points every `spacing` millimetres of arc length.
///
/// Position, speed, flow rate, spray width and dwell time are interpolated
/// between the bracketing original points; orientation is taken from the
/// segment start. The original final point always ends the sequence.
pub fn resample(points: &[TrajectoryPoint], spacing: f64) -> Vec<TrajectoryPoint> {
    if points.len() < 2 || !spacing.is_finite() || spacing <= 0.0 {
        return points.to_vec();
    }

    let mut out = vec![points[0].clone()];
    // Arc length travelled since the last emitted point.
    let mut since_last = 0.0;

    for pair in points.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let segment = a.position.distance(b.position);
        if segment <= POSITION_EPSILON {
            continue;
        }

        let mut next_at = spacing - since_last;
        while next_at <= segment + POSITION_EPSILON {
            let t = (next_at / segment).clamp(0.0, 1.0);
            out.push(interpolate(a, b, t));
            next_at += spacing;
        }
        since_last = segment - (next_at - spacing);
    }

    if let Some(final_point) = points.last() {
        let coincides = out
            .last()
            .map(|p| p.position.distance(final_point.position) <= POSITION_EPSILON)
            .unwrap_or(false);
        if coincides && out.len() > 1 {
            let end = out.len() - 1;
            out[end] = final_point.clone();
        } else {
            out.push(final_point.clone());
        }
    }

    reindex(&mut out);
    out
}

fn interpolate(a: &TrajectoryPoint, b: &TrajectoryPoint, t: f64) -> TrajectoryPoint {
    let mix = |from: f64, to: f64| from + (to - from) * t;
    TrajectoryPoint {
        index: 0,
        position: a.position.lerp(b.position, t),
        orientation: a.orientation,
        speed: mix(a.speed, b.speed),
        flow_rate: mix(a.flow_rate, b.flow_rate),
        spray_width: mix(a.spray_width, b.spray_width),
        dwell_time: mix(a.dwell_time, b.dwell_time),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(x: f64, y: f64, z: f64) -> TrajectoryPoint {
        TrajectoryPoint::at(Vec3::new(x, y, z))
    }

    fn line(xs: &[f64]) -> Vec<TrajectoryPoint> {
        let mut points: Vec<_> = xs.iter().map(|&x| pt(x, 0.0, 0.0)).collect();
        reindex(&mut points);
        points
    }

    #[test]
    fn length_of_short_sequences_is_zero() {
        assert_eq!(total_length(&[]), 0.0);
        assert_eq!(total_length(&[pt(1.0, 2.0, 3.0)]), 0.0);
    }

    #[test]
    fn length_sums_consecutive_distances() {
        let points = vec![pt(0.0, 0.0, 0.0), pt(3.0, 4.0, 0.0), pt(3.0, 4.0, 12.0)];
        assert!((total_length(&points) - 17.0).abs() < 1e-12);
    }

    #[test]
    fn time_uses_average_speed_and_all_dwell() {
        let mut a = pt(0.0, 0.0, 0.0);
        a.speed = 10.0;
        a.dwell_time = 1.0;
        let mut b = pt(100.0, 0.0, 0.0);
        b.speed = 30.0;
        b.dwell_time = 0.5;
        // 100 mm at 20 mm/s + 1.5 s dwell
        assert!((estimated_time(&[a, b]) - 6.5).abs() < 1e-12);
    }

    #[test]
    fn zero_speed_segment_contributes_no_travel_time() {
        let mut a = pt(0.0, 0.0, 0.0);
        a.speed = 0.0;
        let mut b = pt(10.0, 0.0, 0.0);
        b.speed = 0.0;
        b.dwell_time = 2.0;
        assert_eq!(estimated_time(&[a, b]), 2.0);
        assert_eq!(estimated_time(&[]), 0.0);
    }

    #[test]
    fn bounding_box_and_center() {
        let points = vec![pt(-1.0, 5.0, 2.0), pt(3.0, -5.0, 4.0), pt(0.0, 0.0, 0.0)];
        let bbox = bounding_box(&points).expect("non-empty");
        assert_eq!(bbox.min, Vec3::new(-1.0, -5.0, 0.0));
        assert_eq!(bbox.max, Vec3::new(3.0, 5.0, 4.0));
        assert_eq!(bbox.center(), Vec3::new(1.0, 0.0, 2.0));
        assert_eq!(bbox.size(), Vec3::new(4.0, 10.0, 4.0));
        assert!(bounding_box(&[]).is_none());
    }

    #[test]
    fn optimize_drops_collinear_interior_points() {
        let points = line(&[0.0, 1.0, 2.0, 3.0, 4.0]);
        let out = optimize(&points, DEFAULT_COLLINEARITY_THRESHOLD);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].position.x, 0.0);
        assert_eq!(out[1].position.x, 4.0);
        assert_eq!(out[1].index, 1);
    }

    #[test]
    fn optimize_keeps_corners() {
        let points = vec![
            pt(0.0, 0.0, 0.0),
            pt(5.0, 0.0, 0.0),
            pt(10.0, 0.0, 0.0),
            pt(10.0, 10.0, 0.0),
            pt(10.0, 20.0, 0.0),
        ];
        let out = optimize(&points, DEFAULT_COLLINEARITY_THRESHOLD);
        let xs: Vec<(f64, f64)> = out.iter().map(|p| (p.position.x, p.position.y)).collect();
        assert_eq!(xs, vec![(0.0, 0.0), (10.0, 0.0), (10.0, 20.0)]);
    }

    #[test]
    fn optimize_treats_zero_length_segments_as_redundant() {
        let points = vec![
            pt(0.0, 0.0, 0.0),
            pt(10.0, 0.0, 0.0),
            pt(10.0, 0.0, 0.0),
            pt(10.0, 10.0, 0.0),
        ];
        let out = optimize(&points, DEFAULT_COLLINEARITY_THRESHOLD);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].position, Vec3::new(10.0, 10.0, 0.0));
    }

    #[test]
    fn optimize_flattens_gentle_arc() {
        // Each interior point turns 0.05 rad, below the default threshold.
        let step = 0.05_f64;
        let points: Vec<TrajectoryPoint> = (0..12)
            .scan((Vec3::ZERO, 0.0_f64), |(position, heading), _| {
                let current = *position;
                *position = current + Vec3::new(heading.cos(), heading.sin(), 0.0) * 10.0;
                *heading += step;
                Some(pt(current.x, current.y, current.z))
            })
            .collect();
        for window in points.windows(3) {
            let a = (window[1].position - window[0].position).normalized().expect("segment");
            let b = (window[2].position - window[1].position).normalized().expect("segment");
            assert!(a.dot(b).clamp(-1.0, 1.0).acos() < DEFAULT_COLLINEARITY_THRESHOLD);
        }

        let out = optimize(&points, DEFAULT_COLLINEARITY_THRESHOLD);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].position, points[0].position);
        assert_eq!(out[1].position, points[11].position);
    }

    #[test]
    fn optimize_keeps_points_above_threshold() {
        let points = vec![pt(0.0, 0.0, 0.0), pt(10.0, 0.0, 0.0), pt(20.0, 5.0, 0.0)];
        // atan(0.5) is about 0.46 rad.
        assert_eq!(optimize(&points, DEFAULT_COLLINEARITY_THRESHOLD).len(), 3);
        assert_eq!(optimize(&points, 0.5).len(), 2);
    }

    #[test]
    fn optimize_never_grows_and_keeps_endpoints() {
        let points = vec![
            pt(0.0, 0.0, 0.0),
            pt(1.0, 2.0, 0.0),
            pt(2.0, -1.0, 1.0),
            pt(3.0, 3.0, 0.0),
            pt(4.0, 0.0, 2.0),
        ];
        let out = optimize(&points, DEFAULT_COLLINEARITY_THRESHOLD);
        assert!(out.len() <= points.len());
        assert_eq!(out.first().map(|p| p.position), Some(points[0].position));
        assert_eq!(out.last().map(|p| p.position), Some(points[4].position));
        assert!(out.iter().enumerate().all(|(i, p)| p.index == i as i64));
    }

    #[test]
    fn smooth_zero_is_identity() {
        let points = vec![pt(0.0, 0.0, 0.0), pt(1.0, 7.0, 0.3), pt(2.0, 0.0, 0.1), pt(9.0, 1.0, 1.0)];
        let out = smooth(&points, 0.0);
        for (a, b) in points.iter().zip(&out) {
            assert_eq!(a.position, b.position);
        }
    }

    #[test]
    fn smooth_one_is_exact_three_point_average() {
        let points = vec![pt(0.0, 0.0, 0.0), pt(1.0, 7.0, 0.3), pt(2.0, 0.0, 0.1), pt(9.0, 1.0, 1.0)];
        let out = smooth(&points, 1.0);
        assert_eq!(out[0].position, points[0].position);
        assert_eq!(out[3].position, points[3].position);
        for i in 1..3 {
            let (a, b, c) = (points[i - 1].position, points[i].position, points[i + 1].position);
            let expected = Vec3::new(
                (a.x + b.x + c.x) / 3.0,
                (a.y + b.y + c.y) / 3.0,
                (a.z + b.z + c.z) / 3.0,
            );
            assert_eq!(out[i].position, expected);
        }
    }

    #[test]
    fn smooth_clamps_factor() {
        let points = vec![pt(0.0, 0.0, 0.0), pt(1.0, 3.0, 0.0), pt(2.0, 0.0, 0.0)];
        assert_eq!(smooth(&points, 5.0)[1].position, smooth(&points, 1.0)[1].position);
        assert_eq!(smooth(&points, -1.0)[1].position, points[1].position);
    }

    #[test]
    fn resample_emits_at_spacing_and_keeps_final_point() {
        let mut points = line(&[0.0, 25.0]);
        points[0].speed = 10.0;
        points[1].speed = 60.0;
        let out = resample(&points, 10.0);
        let xs: Vec<f64> = out.iter().map(|p| p.position.x).collect();
        assert_eq!(xs, vec![0.0, 10.0, 20.0, 25.0]);
        assert!((out[1].speed - 30.0).abs() < 1e-9);
        assert!((out[2].speed - 50.0).abs() < 1e-9);
        assert_eq!(out[3].speed, 60.0);
        assert!(out.iter().enumerate().all(|(i, p)| p.index == i as i64));
    }

    #[test]
    fn resample_carries_distance_across_segments() {
        let points = vec![pt(0.0, 0.0, 0.0), pt(6.0, 0.0, 0.0), pt(6.0, 8.0, 0.0)];
        let out = resample(&points, 5.0);
        // 14 mm of path: emits at 5 and 10, then the final point.
        assert_eq!(out.len(), 4);
        assert!((out[1].position.distance(Vec3::new(5.0, 0.0, 0.0))).abs() < 1e-9);
        assert!((out[2].position.distance(Vec3::new(6.0, 4.0, 0.0))).abs() < 1e-9);
        assert_eq!(out[3].position, Vec3::new(6.0, 8.0, 0.0));
    }

    #[test]
    fn resample_at_existing_spacing_is_idempotent() {
        let points = line(&[0.0, 10.0, 20.0, 30.0]);
        let out = resample(&points, 10.0);
        assert_eq!(out.len(), points.len());
        assert!((total_length(&out) - total_length(&points)).abs() < 1e-9);
        let again = resample(&out, 10.0);
        assert_eq!(again.len(), out.len());
    }

    #[test]
    fn resample_rejects_bad_spacing() {
        let points = line(&[0.0, 10.0]);
        assert_eq!(resample(&points, 0.0).len(), 2);
        assert_eq!(resample(&points, -3.0).len(), 2);
        assert_eq!(resample(&points, f64::NAN).len(), 2);
    }

    #[test]
    fn quat_is_normalized_on_construction() {
        let q = Quat::new(0.0, 0.0, 2.0, 0.0);
        assert!(q.is_unit());
        assert_eq!(q.z, 1.0);
        assert_eq!(Quat::new(0.0, 0.0, 0.0, 0.0), Quat::IDENTITY);
    }
}
