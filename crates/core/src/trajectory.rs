//! Spray trajectory entity and its point sequence.
//!
//! The trajectory owns its points exclusively. `total_points`,
//! `total_length` and `estimated_time` are derived: every mutation of the
//! point list recomputes them, and deserialization recomputes them from the
//! points rather than trusting stored values.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::entity::{assign, Entity, EntityKind, EntityMeta};
use crate::error::CoreError;
use crate::geometry::{self, BoundingBox, Quat, Vec3};
use crate::types::DbId;
use crate::validation::{self, ValidationCode, ValidationErrors};

pub const MAX_NAME_CHARS: usize = 100;

pub const DEFAULT_SPEED: f64 = 50.0;
pub const DEFAULT_FLOW_RATE: f64 = 0.8;
pub const DEFAULT_SPRAY_WIDTH: f64 = 10.0;

// ---------------------------------------------------------------------------
// TrajectoryType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrajectoryType {
    #[default]
    Spray,
    Move,
    Approach,
    Retract,
}

impl TrajectoryType {
    pub fn as_str(self) -> &'static str {
        match self {
            TrajectoryType::Spray => "spray",
            TrajectoryType::Move => "move",
            TrajectoryType::Approach => "approach",
            TrajectoryType::Retract => "retract",
        }
    }
}

impl FromStr for TrajectoryType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spray" => Ok(TrajectoryType::Spray),
            "move" => Ok(TrajectoryType::Move),
            "approach" => Ok(TrajectoryType::Approach),
            "retract" => Ok(TrajectoryType::Retract),
            other => Err(CoreError::Validation(format!(
                "unknown trajectory type: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for TrajectoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TrajectoryPoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub index: i64,
    pub position: Vec3,
    #[serde(default)]
    pub orientation: Quat,
    /// mm/s, must be > 0.
    pub speed: f64,
    /// Fraction of full flow, `[0, 1]`.
    pub flow_rate: f64,
    /// mm.
    pub spray_width: f64,
    /// Seconds spent at this point.
    #[serde(default)]
    pub dwell_time: f64,
}

impl TrajectoryPoint {
    pub fn new(index: i64, position: Vec3) -> Self {
        Self {
            index,
            position,
            orientation: Quat::IDENTITY,
            speed: DEFAULT_SPEED,
            flow_rate: DEFAULT_FLOW_RATE,
            spray_width: DEFAULT_SPRAY_WIDTH,
            dwell_time: 0.0,
        }
    }

    /// A default point at `position`; the owning trajectory assigns the index.
    pub fn at(position: Vec3) -> Self {
        Self::new(0, position)
    }

    pub fn with_orientation(mut self, orientation: Quat) -> Self {
        self.orientation = orientation.normalized();
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_flow_rate(mut self, flow_rate: f64) -> Self {
        self.flow_rate = flow_rate;
        self
    }

    pub fn with_dwell_time(mut self, dwell_time: f64) -> Self {
        self.dwell_time = dwell_time;
        self
    }
}

// ---------------------------------------------------------------------------
// ParamValue
// ---------------------------------------------------------------------------

/// Scalar value in a trajectory's free-form parameter map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

// ---------------------------------------------------------------------------
// Trajectory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TrajectoryRecord")]
pub struct Trajectory {
    #[serde(flatten)]
    meta: EntityMeta,
    workpiece_id: DbId,
    name: String,
    description: String,
    trajectory_type: TrajectoryType,
    total_points: usize,
    total_length: f64,
    /// Seconds.
    estimated_time: f64,
    quality_score: f64,
    coverage_rate: f64,
    created_by: DbId,
    parameters: BTreeMap<String, ParamValue>,
    points: Vec<TrajectoryPoint>,
}

/// Serialized form read back from JSON; derived totals are ignored.
#[derive(Deserialize)]
struct TrajectoryRecord {
    #[serde(flatten)]
    meta: EntityMeta,
    workpiece_id: DbId,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    trajectory_type: TrajectoryType,
    #[serde(default)]
    quality_score: f64,
    #[serde(default)]
    coverage_rate: f64,
    #[serde(default)]
    created_by: DbId,
    #[serde(default)]
    parameters: BTreeMap<String, ParamValue>,
    #[serde(default)]
    points: Vec<TrajectoryPoint>,
}

impl From<TrajectoryRecord> for Trajectory {
    fn from(r: TrajectoryRecord) -> Self {
        let mut t = Trajectory {
            meta: r.meta,
            workpiece_id: r.workpiece_id,
            name: r.name,
            description: r.description,
            trajectory_type: r.trajectory_type,
            total_points: 0,
            total_length: 0.0,
            estimated_time: 0.0,
            quality_score: r.quality_score,
            coverage_rate: r.coverage_rate,
            created_by: r.created_by,
            parameters: r.parameters,
            points: r.points,
        };
        t.derive();
        t
    }
}

impl Trajectory {
    pub fn new(workpiece_id: DbId, name: &str, trajectory_type: TrajectoryType) -> Self {
        Self {
            meta: EntityMeta::new(),
            workpiece_id,
            name: name.trim().to_string(),
            description: String::new(),
            trajectory_type,
            total_points: 0,
            total_length: 0.0,
            estimated_time: 0.0,
            quality_score: 0.0,
            coverage_rate: 0.0,
            created_by: 0,
            parameters: BTreeMap::new(),
            points: Vec::new(),
        }
    }

    /// Rebuild from stored parts; derived totals are recomputed from `points`.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        meta: EntityMeta,
        workpiece_id: DbId,
        name: String,
        description: String,
        trajectory_type: TrajectoryType,
        quality_score: f64,
        coverage_rate: f64,
        created_by: DbId,
        parameters: BTreeMap<String, ParamValue>,
        points: Vec<TrajectoryPoint>,
    ) -> Self {
        Trajectory::from(TrajectoryRecord {
            meta,
            workpiece_id,
            name,
            description,
            trajectory_type,
            quality_score,
            coverage_rate,
            created_by,
            parameters,
            points,
        })
    }

    pub fn clone_as_new(&self) -> Self {
        let mut copy = self.clone();
        copy.meta.id = 0;
        copy
    }

    fn derive(&mut self) {
        self.total_points = self.points.len();
        self.total_length = geometry::total_length(&self.points);
        self.estimated_time = geometry::estimated_time(&self.points);
    }

    fn points_changed(&mut self) {
        self.derive();
        self.meta.touch();
    }

    // ---- accessors ----

    pub fn workpiece_id(&self) -> DbId {
        self.workpiece_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn trajectory_type(&self) -> TrajectoryType {
        self.trajectory_type
    }

    pub fn points(&self) -> &[TrajectoryPoint] {
        &self.points
    }

    pub fn total_points(&self) -> usize {
        self.total_points
    }

    pub fn total_length(&self) -> f64 {
        self.total_length
    }

    pub fn estimated_time(&self) -> f64 {
        self.estimated_time
    }

    pub fn quality_score(&self) -> f64 {
        self.quality_score
    }

    pub fn coverage_rate(&self) -> f64 {
        self.coverage_rate
    }

    pub fn created_by(&self) -> DbId {
        self.created_by
    }

    pub fn parameters(&self) -> &BTreeMap<String, ParamValue> {
        &self.parameters
    }

    pub fn parameter(&self, key: &str) -> Option<&ParamValue> {
        self.parameters.get(key)
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        geometry::bounding_box(&self.points)
    }

    pub fn center(&self) -> Option<Vec3> {
        self.bounding_box().map(|b| b.center())
    }

    // ---- field setters ----

    pub fn set_workpiece_id(&mut self, workpiece_id: DbId) -> bool {
        assign(&mut self.meta, &mut self.workpiece_id, workpiece_id)
    }

    pub fn set_name(&mut self, name: &str) -> bool {
        assign(&mut self.meta, &mut self.name, name.trim().to_string())
    }

    pub fn set_description(&mut self, description: &str) -> bool {
        assign(&mut self.meta, &mut self.description, description.trim().to_string())
    }

    pub fn set_trajectory_type(&mut self, trajectory_type: TrajectoryType) -> bool {
        assign(&mut self.meta, &mut self.trajectory_type, trajectory_type)
    }

    /// Clamped to `[0, 1]`.
    pub fn set_quality_score(&mut self, score: f64) -> bool {
        let score = validation::clamp_or_min(score, 0.0, 1.0);
        assign(&mut self.meta, &mut self.quality_score, score)
    }

    /// Percentage, clamped to `[0, 100]`.
    pub fn set_coverage_rate(&mut self, rate: f64) -> bool {
        let rate = validation::clamp_or_min(rate, 0.0, 100.0);
        assign(&mut self.meta, &mut self.coverage_rate, rate)
    }

    pub fn set_created_by(&mut self, user_id: DbId) -> bool {
        assign(&mut self.meta, &mut self.created_by, user_id)
    }

    pub fn set_parameter(&mut self, key: &str, value: impl Into<ParamValue>) -> bool {
        let value = value.into();
        if self.parameters.get(key) == Some(&value) {
            return false;
        }
        self.parameters.insert(key.to_string(), value);
        self.meta.touch();
        true
    }

    pub fn remove_parameter(&mut self, key: &str) -> bool {
        if self.parameters.remove(key).is_none() {
            return false;
        }
        self.meta.touch();
        true
    }

    pub fn set_parameters(&mut self, parameters: BTreeMap<String, ParamValue>) -> bool {
        assign(&mut self.meta, &mut self.parameters, parameters)
    }

    // ---- point sequence ----

    /// Replace the whole sequence as given. Indices are kept so that a
    /// discontinuous sequence is reported by validation, not hidden.
    pub fn set_points(&mut self, points: Vec<TrajectoryPoint>) -> bool {
        if self.points == points {
            return false;
        }
        self.points = points;
        self.points_changed();
        true
    }

    /// Append a point; its index becomes its position.
    pub fn add_point(&mut self, mut point: TrajectoryPoint) {
        point.index = self.points.len() as i64;
        self.points.push(point);
        self.points_changed();
    }

    /// Insert at `position`, shifting later points. `false` when out of range.
    pub fn insert_point(&mut self, position: usize, point: TrajectoryPoint) -> bool {
        if position > self.points.len() {
            return false;
        }
        self.points.insert(position, point);
        geometry::reindex(&mut self.points);
        self.points_changed();
        true
    }

    pub fn remove_point(&mut self, position: usize) -> Option<TrajectoryPoint> {
        if position >= self.points.len() {
            return None;
        }
        let removed = self.points.remove(position);
        geometry::reindex(&mut self.points);
        self.points_changed();
        Some(removed)
    }

    pub fn update_point(&mut self, position: usize, mut point: TrajectoryPoint) -> bool {
        let Some(slot) = self.points.get_mut(position) else {
            return false;
        };
        point.index = position as i64;
        if *slot == point {
            return false;
        }
        *slot = point;
        self.points_changed();
        true
    }

    pub fn clear_points(&mut self) -> bool {
        if self.points.is_empty() {
            return false;
        }
        self.points.clear();
        self.points_changed();
        true
    }

    /// Remove redundant collinear points using the default threshold.
    pub fn optimize(&mut self) -> bool {
        self.optimize_with_threshold(geometry::DEFAULT_COLLINEARITY_THRESHOLD)
    }

    pub fn optimize_with_threshold(&mut self, threshold: f64) -> bool {
        let optimized = geometry::optimize(&self.points, threshold);
        self.set_points(optimized)
    }

    pub fn smooth(&mut self, factor: f64) -> bool {
        let smoothed = geometry::smooth(&self.points, factor);
        self.set_points(smoothed)
    }

    pub fn resample(&mut self, spacing: f64) -> bool {
        let resampled = geometry::resample(&self.points, spacing);
        self.set_points(resampled)
    }
}

impl Entity for Trajectory {
    fn kind(&self) -> EntityKind {
        EntityKind::Trajectory
    }

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn validation_errors(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        self.meta.check(&mut errors);

        validation::check_text(&mut errors, "name", &self.name, MAX_NAME_CHARS);
        validation::check_range(&mut errors, "quality_score", self.quality_score, 0.0, 1.0);
        validation::check_range(&mut errors, "coverage_rate", self.coverage_rate, 0.0, 100.0);

        if self.workpiece_id <= 0 {
            errors.add(
                "workpiece_id",
                ValidationCode::MissingWorkpiece,
                "trajectory must reference a persisted workpiece",
            );
        }
        if self.points.is_empty() {
            errors.add("points", ValidationCode::EmptyPoints, "trajectory needs at least one point");
        }

        for (i, point) in self.points.iter().enumerate() {
            let field = format!("points[{i}]");
            if point.index != i as i64 {
                errors.add(
                    &field,
                    ValidationCode::IndexDiscontinuity,
                    format!("point index discontinuous: expected {i}, got {}", point.index),
                );
            }
            if point.speed.is_nan() || point.speed <= 0.0 {
                errors.add(
                    &field,
                    ValidationCode::NonPositiveSpeed,
                    format!("point {i} speed must be greater than 0"),
                );
            }
            if !(0.0..=1.0).contains(&point.flow_rate) {
                errors.add(
                    &field,
                    ValidationCode::FlowRateOutOfRange,
                    format!("point {i} flow rate must be between 0 and 1"),
                );
            }
            if point.dwell_time.is_nan() || point.dwell_time < 0.0 {
                errors.add(
                    &field,
                    ValidationCode::NegativeDwellTime,
                    format!("point {i} dwell time must not be negative"),
                );
            }
            if !point.orientation.is_unit() {
                errors.add(
                    &field,
                    ValidationCode::NonUnitOrientation,
                    format!("point {i} orientation must be a unit quaternion"),
                );
            }
        }

        errors
    }

    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn square(side: f64) -> Trajectory {
        let mut t = Trajectory::new(7, "Top coat", TrajectoryType::Spray);
        for (x, y) in [(0.0, 0.0), (side, 0.0), (side, side), (0.0, side)] {
            t.add_point(TrajectoryPoint::at(Vec3::new(x, y, 150.0)));
        }
        t
    }

    #[test]
    fn trajectory_type_parses_known_names() {
        assert_eq!("retract".parse::<TrajectoryType>().ok(), Some(TrajectoryType::Retract));
        assert!(matches!(
            "teleport".parse::<TrajectoryType>(),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn derived_totals_follow_every_mutation() {
        let mut t = square(100.0);
        assert_eq!(t.total_points(), 4);
        assert!((t.total_length() - 300.0).abs() < 1e-9);
        assert!((t.estimated_time() - 6.0).abs() < 1e-9);

        t.remove_point(3);
        assert!((t.total_length() - 200.0).abs() < 1e-9);

        t.insert_point(1, TrajectoryPoint::at(Vec3::new(50.0, 0.0, 150.0)));
        assert_eq!(t.total_points(), 4);
        assert!(t.points().iter().enumerate().all(|(i, p)| p.index == i as i64));

        t.clear_points();
        assert_eq!(t.total_length(), 0.0);
        assert_eq!(t.estimated_time(), 0.0);
    }

    #[test]
    fn valid_trajectory_has_no_errors() {
        let t = square(10.0);
        assert!(t.is_valid(), "{}", t.validation_errors());
    }

    #[test]
    fn non_contiguous_indices_fail() {
        let mut t = square(10.0);
        let mut points = t.points().to_vec();
        points[2].index = 5;
        t.set_points(points);
        assert!(t.validation_errors().has(ValidationCode::IndexDiscontinuity));
    }

    #[test]
    fn point_constraints_are_checked() {
        let mut t = Trajectory::new(0, "", TrajectoryType::Move);
        let errors = t.validation_errors();
        assert!(errors.has(ValidationCode::MissingWorkpiece));
        assert!(errors.has(ValidationCode::EmptyPoints));
        assert!(errors.has(ValidationCode::Required));

        t.add_point(TrajectoryPoint::at(Vec3::ZERO).with_speed(0.0).with_flow_rate(1.5));
        let errors = t.validation_errors();
        assert!(errors.has(ValidationCode::NonPositiveSpeed));
        assert!(errors.has(ValidationCode::FlowRateOutOfRange));
    }

    #[test]
    fn scores_are_clamped() {
        let mut t = square(1.0);
        t.set_quality_score(-0.5);
        t.set_coverage_rate(140.0);
        assert_eq!(t.quality_score(), 0.0);
        assert_eq!(t.coverage_rate(), 100.0);
    }

    #[test]
    fn optimize_keeps_ends_and_reindexes() {
        let mut t = Trajectory::new(1, "line", TrajectoryType::Spray);
        for x in 0..6 {
            t.add_point(TrajectoryPoint::at(Vec3::new(x as f64 * 10.0, 0.0, 0.0)));
        }
        assert!(t.optimize());
        assert_eq!(t.total_points(), 2);
        assert!((t.total_length() - 50.0).abs() < 1e-9);
        assert!(t.is_valid());
    }

    #[test]
    fn resample_updates_totals() {
        let mut t = Trajectory::new(1, "line", TrajectoryType::Spray);
        t.add_point(TrajectoryPoint::at(Vec3::ZERO));
        t.add_point(TrajectoryPoint::at(Vec3::new(100.0, 0.0, 0.0)));
        assert!(t.resample(25.0));
        assert_eq!(t.total_points(), 5);
        assert!((t.total_length() - 100.0).abs() < 1e-9);
        assert!(!t.resample(25.0));
    }

    #[test]
    fn json_round_trip_with_points_and_parameters() {
        let mut t = square(33.3);
        t.set_description("two passes");
        t.set_quality_score(0.87);
        t.set_coverage_rate(92.5);
        t.set_parameter("passes", 2_i64);
        t.set_parameter("pressure", 2.5);
        t.set_parameter("nozzle", "N-14");
        t.set_parameter("heated", true);
        t.update_point(
            1,
            TrajectoryPoint::at(Vec3::new(33.3, 0.1, 150.0))
                .with_orientation(Quat::new(0.1, 0.2, 0.3, 0.9))
                .with_dwell_time(0.25),
        );

        let text = serde_json::to_string(&t).expect("serialize");
        let back: Trajectory = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(back, t);
        assert_eq!(back.parameter("passes"), Some(&ParamValue::Int(2)));
        assert_eq!(back.parameter("pressure"), Some(&ParamValue::Float(2.5)));
    }

    #[test]
    fn json_round_trip_with_empty_sequence() {
        let t = Trajectory::new(3, "empty", TrajectoryType::Approach);
        let json = t.to_json().expect("serialize");
        assert_eq!(json["trajectory_type"], "approach");
        let back: Trajectory = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, t);
    }

    #[test]
    fn stored_totals_are_recomputed_on_read() {
        let t = square(10.0);
        let mut json = t.to_json().expect("serialize");
        json["total_length"] = serde_json::json!(9999.0);
        let back: Trajectory = serde_json::from_value(json).expect("deserialize");
        assert!((back.total_length() - 30.0).abs() < 1e-9);
    }
}
