//! Batch constants, types, and pure aggregation logic.
//!
//! A batch groups workpiece ids (never the workpieces themselves) for joint
//! processing. Volumes are in mm³, areas in mm², times in minutes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::{self, DbId, Timestamp};
use crate::validation::{FieldError, ValidationCode};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Volume assumed for a workpiece without known geometry: 0.1 m³.
pub const ASSUMED_VOLUME_MM3: f64 = 1.0e8;
/// Surface assumed for a workpiece without known geometry: 2 m².
pub const ASSUMED_SURFACE_AREA_MM2: f64 = 2.0e6;
/// Usable booth volume: 10 m³.
pub const BOOTH_CAPACITY_MM3: f64 = 1.0e10;

pub const SETUP_MINUTES: f64 = 15.0;
pub const PER_WORKPIECE_MINUTES: f64 = 30.0;
pub const CLEANUP_MINUTES: f64 = 10.0;

pub const MAX_WORKPIECES: usize = 20;
pub const MIN_UTILIZATION: f64 = 0.5;
pub const MAX_UTILIZATION: f64 = 0.9;
/// One shift, 8 hours.
pub const SHIFT_MINUTES: f64 = 480.0;

/// Above this many workpieces the layout report suggests splitting.
pub const SPLIT_SUGGESTION_COUNT: usize = 10;
/// Below this utilization the layout report suggests re-arranging.
pub const LAYOUT_SUGGESTION_UTILIZATION: f64 = 0.6;

/// Tunable limits for batch analysis. `Default` gives the values above.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSettings {
    pub assumed_volume: f64,
    pub assumed_surface_area: f64,
    pub capacity: f64,
    pub setup_minutes: f64,
    pub per_workpiece_minutes: f64,
    pub cleanup_minutes: f64,
    pub max_workpieces: usize,
    pub min_utilization: f64,
    pub max_utilization: f64,
    pub shift_minutes: f64,
    pub split_suggestion_count: usize,
    pub layout_suggestion_utilization: f64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            assumed_volume: ASSUMED_VOLUME_MM3,
            assumed_surface_area: ASSUMED_SURFACE_AREA_MM2,
            capacity: BOOTH_CAPACITY_MM3,
            setup_minutes: SETUP_MINUTES,
            per_workpiece_minutes: PER_WORKPIECE_MINUTES,
            cleanup_minutes: CLEANUP_MINUTES,
            max_workpieces: MAX_WORKPIECES,
            min_utilization: MIN_UTILIZATION,
            max_utilization: MAX_UTILIZATION,
            shift_minutes: SHIFT_MINUTES,
            split_suggestion_count: SPLIT_SUGGESTION_COUNT,
            layout_suggestion_utilization: LAYOUT_SUGGESTION_UTILIZATION,
        }
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

pub type BatchId = String;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Known geometry of one workpiece.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkpieceGeometry {
    pub volume: f64,
    pub surface_area: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchStatistics {
    pub total_workpieces: usize,
    pub completed_workpieces: usize,
    pub total_volume: f64,
    pub total_surface_area: f64,
    /// Minutes.
    pub estimated_time: f64,
}

/// Batch record, also the on-disk import/export form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchInfo {
    pub batch_id: BatchId,
    pub batch_name: String,
    pub create_time: Timestamp,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: BatchStatus,
    #[serde(flatten)]
    pub statistics: BatchStatistics,
    /// Ordered, duplicate-free.
    #[serde(rename = "workpieces", default)]
    pub workpiece_ids: Vec<DbId>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub completed_ids: BTreeSet<DbId>,
}

impl BatchInfo {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            batch_id: uuid::Uuid::new_v4().to_string(),
            batch_name: name.trim().to_string(),
            create_time: types::now(),
            description: description.trim().to_string(),
            status: BatchStatus::Pending,
            statistics: BatchStatistics::default(),
            workpiece_ids: Vec::new(),
            completed_ids: BTreeSet::new(),
        }
    }

    pub fn contains(&self, workpiece_id: DbId) -> bool {
        self.workpiece_ids.contains(&workpiece_id)
    }

    /// `false` if already a member.
    pub fn add(&mut self, workpiece_id: DbId) -> bool {
        if self.contains(workpiece_id) {
            return false;
        }
        self.workpiece_ids.push(workpiece_id);
        true
    }

    /// `false` if not a member.
    pub fn remove(&mut self, workpiece_id: DbId) -> bool {
        let before = self.workpiece_ids.len();
        self.workpiece_ids.retain(|&id| id != workpiece_id);
        self.completed_ids.remove(&workpiece_id);
        self.workpiece_ids.len() != before
    }
}

/// Result of a layout analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutReport {
    pub batch_id: BatchId,
    pub total_workpieces: usize,
    /// `total_volume / capacity`, at most 1.0.
    pub space_utilization: f64,
    /// Minutes.
    pub estimated_time: f64,
    pub suggestions: Vec<String>,
    pub analysis_time: Timestamp,
}

// ---------------------------------------------------------------------------
// Pure logic
// ---------------------------------------------------------------------------

/// `setup + per_workpiece × count + cleanup`; an empty batch takes no time.
pub fn processing_minutes(count: usize, settings: &BatchSettings) -> f64 {
    if count == 0 {
        return 0.0;
    }
    settings.setup_minutes + settings.per_workpiece_minutes * count as f64 + settings.cleanup_minutes
}

pub fn space_utilization(total_volume: f64, settings: &BatchSettings) -> f64 {
    if total_volume <= 0.0 || settings.capacity <= 0.0 {
        return 0.0;
    }
    (total_volume / settings.capacity).min(1.0)
}

/// Totals from current membership, using known geometry where available
/// and the per-workpiece assumptions otherwise.
pub fn compute_statistics<F>(batch: &BatchInfo, settings: &BatchSettings, geometry: F) -> BatchStatistics
where
    F: Fn(DbId) -> Option<WorkpieceGeometry>,
{
    let (total_volume, total_surface_area) =
        batch
            .workpiece_ids
            .iter()
            .fold((0.0, 0.0), |(volume, area), &id| match geometry(id) {
                Some(g) => (volume + g.volume, area + g.surface_area),
                None => (
                    volume + settings.assumed_volume,
                    area + settings.assumed_surface_area,
                ),
            });

    let count = batch.workpiece_ids.len();
    BatchStatistics {
        total_workpieces: count,
        completed_workpieces: batch
            .completed_ids
            .iter()
            .filter(|id| batch.contains(**id))
            .count(),
        total_volume,
        total_surface_area,
        estimated_time: processing_minutes(count, settings),
    }
}

pub fn analyze_layout(batch: &BatchInfo, settings: &BatchSettings) -> LayoutReport {
    let count = batch.workpiece_ids.len();
    let utilization = space_utilization(batch.statistics.total_volume, settings);

    let mut suggestions = Vec::new();
    if count > settings.split_suggestion_count {
        suggestions.push(format!(
            "Split the batch: keep at most {} workpieces per run",
            settings.split_suggestion_count
        ));
    }
    if utilization < settings.layout_suggestion_utilization {
        suggestions.push("Space utilization is low: re-arrange the workpiece layout".to_string());
    }

    LayoutReport {
        batch_id: batch.batch_id.clone(),
        total_workpieces: count,
        space_utilization: utilization,
        estimated_time: processing_minutes(count, settings),
        suggestions,
        analysis_time: types::now(),
    }
}

/// Hard errors that make a batch unusable.
pub fn validate(batch: &BatchInfo, settings: &BatchSettings) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if batch.batch_name.trim().is_empty() {
        errors.push(FieldError::new(
            "batch_name",
            ValidationCode::Required,
            "batch name is required",
        ));
    }
    if batch.workpiece_ids.is_empty() {
        errors.push(FieldError::new(
            "workpieces",
            ValidationCode::Required,
            "batch contains no workpieces",
        ));
    }
    if batch.workpiece_ids.len() > settings.max_workpieces {
        errors.push(FieldError::new(
            "workpieces",
            ValidationCode::MembershipLimit,
            format!(
                "batch exceeds the limit of {} workpieces",
                settings.max_workpieces
            ),
        ));
    }
    errors
}

/// Soft warnings about utilization and duration.
pub fn check_constraints(batch: &BatchInfo, settings: &BatchSettings) -> Vec<String> {
    let mut warnings = Vec::new();
    let utilization = space_utilization(batch.statistics.total_volume, settings);
    if utilization < settings.min_utilization {
        warnings.push(format!(
            "Space utilization {:.1}% is below {:.0}%: add workpieces or optimize the layout",
            utilization * 100.0,
            settings.min_utilization * 100.0
        ));
    } else if utilization > settings.max_utilization {
        warnings.push(format!(
            "Space utilization {:.1}% is above {:.0}%: operator access may be unsafe",
            utilization * 100.0,
            settings.max_utilization * 100.0
        ));
    }

    let minutes = processing_minutes(batch.workpiece_ids.len(), settings);
    if minutes > settings.shift_minutes {
        warnings.push(format!(
            "Estimated time {minutes:.0} min exceeds one shift ({:.0} min): split the batch",
            settings.shift_minutes
        ));
    }
    warnings
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
