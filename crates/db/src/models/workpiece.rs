//! Rows of `workpieces` (remote) and `cache_workpieces` (cache).

use sqlx::FromRow;
use spray_core::entity::EntityMeta;
use spray_core::types::{from_micros, to_micros, DbId};
use spray_core::workpiece::{Dimensions, ModelFile, Workpiece};

use super::{flag, DecodeError};

/// A workpiece row. The sync columns only exist in the cache and default
/// when the query does not select them.
#[derive(Debug, Clone, FromRow)]
pub struct WorkpieceRow {
    pub id: DbId,
    pub name: String,
    pub description: String,
    pub category: String,
    pub model_file_path: String,
    pub model_file_size: i64,
    pub model_file_hash: String,
    /// JSON object `{length, width, height}`.
    pub dimensions: String,
    pub material: String,
    pub surface_area: f64,
    pub complexity_score: f64,
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

impl WorkpieceRow {
    pub fn into_entity(self) -> Result<Workpiece, DecodeError> {
        let dimensions: Dimensions =
            serde_json::from_str(&self.dimensions).map_err(|source| DecodeError::Json {
                column: "dimensions",
                source,
            })?;
        let meta = EntityMeta {
            id: self.id,
            created_at: from_micros(self.created_at),
            updated_at: from_micros(self.updated_at),
            is_active: flag(self.is_active),
            is_dirty: flag(self.is_dirty),
        };
        Ok(Workpiece::from_parts(
            meta,
            self.name,
            self.description,
            self.category,
            ModelFile {
                path: self.model_file_path,
                size: self.model_file_size,
                hash: self.model_file_hash,
            },
            dimensions,
            self.material,
            self.surface_area,
            self.complexity_score,
            self.created_by,
        ))
    }
}

/// Business column values written for one workpiece.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkpieceValues {
    pub name: String,
    pub description: String,
    pub category: String,
    pub model_file_path: String,
    pub model_file_size: i64,
    pub model_file_hash: String,
    pub dimensions: String,
    pub material: String,
    pub surface_area: f64,
    pub complexity_score: f64,
    pub created_by: DbId,
    pub created_at: i64,
    pub updated_at: i64,
    pub is_active: bool,
}

impl WorkpieceValues {
    pub fn from_entity(workpiece: &Workpiece) -> Result<Self, serde_json::Error> {
        let meta = spray_core::entity::Entity::meta(workpiece);
        let model = workpiece.model_file();
        Ok(Self {
            name: workpiece.name().to_string(),
            description: workpiece.description().to_string(),
            category: workpiece.category().to_string(),
            model_file_path: model.path.clone(),
            model_file_size: model.size,
            model_file_hash: model.hash.clone(),
            dimensions: serde_json::to_string(&workpiece.dimensions())?,
            material: workpiece.material().to_string(),
            surface_area: workpiece.surface_area(),
            complexity_score: workpiece.complexity_score(),
            created_by: workpiece.created_by(),
            created_at: to_micros(meta.created_at),
            updated_at: to_micros(meta.updated_at),
            is_active: meta.is_active,
        })
    }
}

impl From<&WorkpieceRow> for WorkpieceValues {
    fn from(row: &WorkpieceRow) -> Self {
        Self {
            name: row.name.clone(),
            description: row.description.clone(),
            category: row.category.clone(),
            model_file_path: row.model_file_path.clone(),
            model_file_size: row.model_file_size,
            model_file_hash: row.model_file_hash.clone(),
            dimensions: row.dimensions.clone(),
            material: row.material.clone(),
            surface_area: row.surface_area,
            complexity_score: row.complexity_score,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
            is_active: flag(row.is_active),
        }
    }
}
