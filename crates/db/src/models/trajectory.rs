//! Rows of `trajectories` (remote) and `cache_trajectories` (cache).
//!
//! `workpiece_id` always refers to a workpiece row of the same store; the
//! sync engine translates it between stores.

use std::collections::BTreeMap;

use sqlx::FromRow;
use spray_core::entity::{Entity, EntityMeta};
use spray_core::trajectory::{ParamValue, Trajectory, TrajectoryPoint, TrajectoryType};
use spray_core::types::{from_micros, to_micros, DbId};

use super::{flag, DecodeError};

#[derive(Debug, Clone, FromRow)]
pub struct TrajectoryRow {
    pub id: DbId,
    pub workpiece_id: DbId,
    pub name: String,
    pub description: String,
    pub trajectory_type: String,
    pub total_points: i64,
    pub total_length: f64,
    pub estimated_time: f64,
    pub quality_score: f64,
    pub coverage_rate: f64,
    /// JSON object of named parameters.
    pub parameters: String,
    /// JSON array of points.
    pub points_data: String,
    pub created_by: DbId,
    pub created_at: i64,
    pub updated_at: i64,
    pub is_active: i64,
    pub sync_uid: Option<String>,
    #[sqlx(rename = "mysql_id", default)]
    pub remote_id: Option<DbId>,
    #[sqlx(default)]
    pub last_sync: Option<i64>,
    #[sqlx(default)]
    pub is_dirty: i64,
}

impl TrajectoryRow {
    /// Derived totals are recomputed from the points, not read back.
    pub fn into_entity(self) -> Result<Trajectory, DecodeError> {
        let trajectory_type: TrajectoryType =
            self.trajectory_type
                .parse()
                .map_err(|_| DecodeError::Value {
                    column: "trajectory_type",
                    value: self.trajectory_type.clone(),
                })?;
        let parameters: BTreeMap<String, ParamValue> = serde_json::from_str(&self.parameters)
            .map_err(|source| DecodeError::Json {
                column: "parameters",
                source,
            })?;
        let points: Vec<TrajectoryPoint> =
            serde_json::from_str(&self.points_data).map_err(|source| DecodeError::Json {
                column: "points_data",
                source,
            })?;
        let meta = EntityMeta {
            id: self.id,
            created_at: from_micros(self.created_at),
            updated_at: from_micros(self.updated_at),
            is_active: flag(self.is_active),
            is_dirty: flag(self.is_dirty),
        };
        Ok(Trajectory::from_parts(
            meta,
            self.workpiece_id,
            self.name,
            self.description,
            trajectory_type,
            self.quality_score,
            self.coverage_rate,
            self.created_by,
            parameters,
            points,
        ))
    }
}

/// Business column values written for one trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryValues {
    pub workpiece_id: DbId,
    pub name: String,
    pub description: String,
    pub trajectory_type: String,
    pub total_points: i64,
    pub total_length: f64,
    pub estimated_time: f64,
    pub quality_score: f64,
    pub coverage_rate: f64,
    pub parameters: String,
    pub points_data: String,
    pub created_by: DbId,
    pub created_at: i64,
    pub updated_at: i64,
    pub is_active: bool,
}

impl TrajectoryValues {
    pub fn from_entity(trajectory: &Trajectory) -> Result<Self, serde_json::Error> {
        let meta = trajectory.meta();
        Ok(Self {
            workpiece_id: trajectory.workpiece_id(),
            name: trajectory.name().to_string(),
            description: trajectory.description().to_string(),
            trajectory_type: trajectory.trajectory_type().as_str().to_string(),
            total_points: trajectory.total_points() as i64,
            total_length: trajectory.total_length(),
            estimated_time: trajectory.estimated_time(),
            quality_score: trajectory.quality_score(),
            coverage_rate: trajectory.coverage_rate(),
            parameters: serde_json::to_string(trajectory.parameters())?,
            points_data: serde_json::to_string(trajectory.points())?,
            created_by: trajectory.created_by(),
            created_at: to_micros(meta.created_at),
            updated_at: to_micros(meta.updated_at),
            is_active: meta.is_active,
        })
    }

    /// Same values pointing at another store's workpiece row.
    pub fn with_workpiece(mut self, workpiece_id: DbId) -> Self {
        self.workpiece_id = workpiece_id;
        self
    }
}

impl From<&TrajectoryRow> for TrajectoryValues {
    fn from(row: &TrajectoryRow) -> Self {
        Self {
            workpiece_id: row.workpiece_id,
            name: row.name.clone(),
            description: row.description.clone(),
            trajectory_type: row.trajectory_type.clone(),
            total_points: row.total_points,
            total_length: row.total_length,
            estimated_time: row.estimated_time,
            quality_score: row.quality_score,
            coverage_rate: row.coverage_rate,
            parameters: row.parameters.clone(),
            points_data: row.points_data.clone(),
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
            is_active: flag(row.is_active),
        }
    }
}
