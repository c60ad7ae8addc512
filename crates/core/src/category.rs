//! Workpiece categories with their default spray parameters.

use serde::{Deserialize, Serialize};

/// Default spray parameters for a category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SprayParameters {
    /// bar
    pub pressure: f64,
    /// ml/min
    pub flow_rate: f64,
    /// mm
    pub spray_height: f64,
    /// mm/min
    pub spray_speed: f64,
    pub overlap_rate: f64,
    pub pass_count: u32,
}

impl Default for SprayParameters {
    fn default() -> Self {
        Self {
            pressure: 2.5,
            flow_rate: 300.0,
            spray_height: 200.0,
            spray_speed: 500.0,
            overlap_rate: 0.3,
            pass_count: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkpieceCategory {
    pub category_id: String,
    pub category_name: String,
    pub description: String,
    pub geometry_type: String,
    pub default_params: SprayParameters,
    /// mm³, 0 when unknown.
    pub typical_volume: f64,
    /// mm², 0 when unknown.
    pub typical_surface_area: f64,
}

impl WorkpieceCategory {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            category_id: uuid::Uuid::new_v4().to_string(),
            category_name: name.trim().to_string(),
            description: description.trim().to_string(),
            geometry_type: "complex".to_string(),
            default_params: SprayParameters::default(),
            typical_volume: 0.0,
            typical_surface_area: 0.0,
        }
    }
}

/// Categories every aggregator starts with.
pub fn default_categories() -> Vec<WorkpieceCategory> {
    vec![
        WorkpieceCategory::new("General", "Standard workpieces sprayed with default parameters"),
        WorkpieceCategory::new("Large", "Large, complex workpieces that need special handling"),
        WorkpieceCategory::new("Precision", "Precision workpieces that require a high-quality finish"),
    ]
}
