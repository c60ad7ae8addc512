//! Workpiece entity: a part to be sprayed, with its bounding dimensions and
//! the model file it was imported from.

use serde::{Deserialize, Serialize};

use crate::entity::{assign, Entity, EntityKind, EntityMeta};
use crate::hashing::sha256_hex;
use crate::types::DbId;
use crate::validation::{self, ValidationCode, ValidationErrors};

pub const MAX_NAME_CHARS: usize = 100;
pub const MAX_CATEGORY_CHARS: usize = 50;
pub const MAX_MATERIAL_CHARS: usize = 50;

/// Model file extensions the import layer can produce geometry from.
pub const SUPPORTED_MODEL_FORMATS: &[&str] = &["stl", "obj", "ply", "pcd"];

/// Bounding dimensions in millimetres.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub length: f64,
    pub width: f64,
    pub height: f64,
}

impl Dimensions {
    pub const fn new(length: f64, width: f64, height: f64) -> Self {
        Self { length, width, height }
    }

    pub fn volume(&self) -> f64 {
        self.length * self.width * self.height
    }

    /// Every side strictly positive (NaN is not).
    pub fn is_positive(&self) -> bool {
        self.length > 0.0 && self.width > 0.0 && self.height > 0.0
    }
}

/// Reference to the source model file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelFile {
    #[serde(rename = "model_file_path", default)]
    pub path: String,
    #[serde(rename = "model_file_size", default)]
    pub size: i64,
    #[serde(rename = "model_file_hash", default)]
    pub hash: String,
}

impl ModelFile {
    /// Describe a file whose contents the import layer already read.
    pub fn from_bytes(path: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            path: path.into(),
            size: bytes.len() as i64,
            hash: sha256_hex(bytes),
        }
    }

    /// Lower-cased extension, if the path has one.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }

    pub fn is_supported_format(&self) -> bool {
        self.extension()
            .is_some_and(|ext| SUPPORTED_MODEL_FORMATS.contains(&ext.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workpiece {
    #[serde(flatten)]
    meta: EntityMeta,
    name: String,
    #[serde(default)]
    description: String,
    category: String,
    #[serde(flatten)]
    model_file: ModelFile,
    dimensions: Dimensions,
    #[serde(default)]
    material: String,
    #[serde(default)]
    surface_area: f64,
    #[serde(default)]
    complexity_score: f64,
    #[serde(default)]
    created_by: DbId,
}

impl Workpiece {
    pub fn new(name: &str, category: &str, dimensions: Dimensions) -> Self {
        Self {
            meta: EntityMeta::new(),
            name: name.trim().to_string(),
            description: String::new(),
            category: category.trim().to_string(),
            model_file: ModelFile::default(),
            dimensions,
            material: String::new(),
            surface_area: 0.0,
            complexity_score: 0.0,
            created_by: 0,
        }
    }

    /// Copy of this workpiece that has never been persisted.
    pub fn clone_as_new(&self) -> Self {
        let mut copy = self.clone();
        copy.meta.id = 0;
        copy
    }

    /// Rebuild from stored parts without touching timestamps or flags.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        meta: EntityMeta,
        name: String,
        description: String,
        category: String,
        model_file: ModelFile,
        dimensions: Dimensions,
        material: String,
        surface_area: f64,
        complexity_score: f64,
        created_by: DbId,
    ) -> Self {
        Self {
            meta,
            name,
            description,
            category,
            model_file,
            dimensions,
            material,
            surface_area,
            complexity_score,
            created_by,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn model_file(&self) -> &ModelFile {
        &self.model_file
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn material(&self) -> &str {
        &self.material
    }

    pub fn surface_area(&self) -> f64 {
        self.surface_area
    }

    pub fn complexity_score(&self) -> f64 {
        self.complexity_score
    }

    pub fn created_by(&self) -> DbId {
        self.created_by
    }

    pub fn volume(&self) -> f64 {
        self.dimensions.volume()
    }

    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("Workpiece_{}", self.meta.id)
        } else {
            self.name.clone()
        }
    }

    pub fn set_name(&mut self, name: &str) -> bool {
        assign(&mut self.meta, &mut self.name, name.trim().to_string())
    }

    pub fn set_description(&mut self, description: &str) -> bool {
        assign(&mut self.meta, &mut self.description, description.trim().to_string())
    }

    pub fn set_category(&mut self, category: &str) -> bool {
        assign(&mut self.meta, &mut self.category, category.trim().to_string())
    }

    pub fn set_model_file(&mut self, model_file: ModelFile) -> bool {
        assign(&mut self.meta, &mut self.model_file, model_file)
    }

    pub fn set_dimensions(&mut self, dimensions: Dimensions) -> bool {
        assign(&mut self.meta, &mut self.dimensions, dimensions)
    }

    pub fn set_material(&mut self, material: &str) -> bool {
        assign(&mut self.meta, &mut self.material, material.trim().to_string())
    }

    pub fn set_surface_area(&mut self, surface_area: f64) -> bool {
        assign(&mut self.meta, &mut self.surface_area, surface_area)
    }

    /// Clamped to `[0, 1]`.
    pub fn set_complexity_score(&mut self, score: f64) -> bool {
        let score = validation::clamp_or_min(score, 0.0, 1.0);
        assign(&mut self.meta, &mut self.complexity_score, score)
    }

    pub fn set_created_by(&mut self, user_id: DbId) -> bool {
        assign(&mut self.meta, &mut self.created_by, user_id)
    }
}

impl Entity for Workpiece {
    fn kind(&self) -> EntityKind {
        EntityKind::Workpiece
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
        validation::check_text(&mut errors, "category", &self.category, MAX_CATEGORY_CHARS);
        validation::check_max_len(&mut errors, "material", &self.material, MAX_MATERIAL_CHARS);
        validation::check_range(&mut errors, "complexity_score", self.complexity_score, 0.0, 1.0);

        if !self.dimensions.is_positive() {
            errors.add(
                "dimensions",
                ValidationCode::NonPositiveDimension,
                "length, width and height must all be greater than 0",
            );
        }
        if self.surface_area.is_nan() || self.surface_area < 0.0 {
            errors.add(
                "surface_area",
                ValidationCode::NegativeSurfaceArea,
                "surface_area must not be negative",
            );
        }
        if !self.model_file.path.is_empty() && !self.model_file.is_supported_format() {
            errors.add(
                "model_file_path",
                ValidationCode::UnsupportedModelFormat,
                format!(
                    "model file must be one of: {}",
                    SUPPORTED_MODEL_FORMATS.join(", ")
                ),
            );
        }

        errors
    }

    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn bracket() -> Workpiece {
        let mut w = Workpiece::new("  Bracket A ", "general", Dimensions::new(120.0, 80.0, 40.5));
        w.set_material("Al 6061");
        w.set_surface_area(31_250.75);
        w.set_complexity_score(0.35);
        w
    }

    #[test]
    fn constructor_trims_and_is_valid() {
        let w = bracket();
        assert_eq!(w.name(), "Bracket A");
        assert!(w.is_valid(), "{}", w.validation_errors());
        assert_eq!(w.volume(), 120.0 * 80.0 * 40.5);
    }

    #[test]
    fn any_non_positive_dimension_fails() {
        for dims in [
            Dimensions::new(0.0, 1.0, 1.0),
            Dimensions::new(1.0, -2.0, 1.0),
            Dimensions::new(1.0, 1.0, f64::NAN),
        ] {
            let mut w = bracket();
            w.set_dimensions(dims);
            assert!(w.validation_errors().has(ValidationCode::NonPositiveDimension));
        }
    }

    #[test]
    fn errors_are_accumulated() {
        let mut w = Workpiece::new("", "", Dimensions::default());
        w.set_surface_area(-1.0);
        w.set_material(&"x".repeat(51));
        let errors = w.validation_errors();
        assert!(errors.len() >= 5);
        assert!(errors.has(ValidationCode::Required));
        assert!(errors.has(ValidationCode::TooLong));
        assert!(errors.has(ValidationCode::NegativeSurfaceArea));
    }

    #[test]
    fn complexity_is_clamped() {
        let mut w = bracket();
        assert!(w.set_complexity_score(3.0));
        assert_eq!(w.complexity_score(), 1.0);
        assert!(!w.set_complexity_score(7.0));
    }

    #[test]
    fn setter_reports_change_and_marks_dirty() {
        let mut w = bracket();
        w.mark_clean();
        assert!(!w.set_name("Bracket A"));
        assert!(!w.is_dirty());
        assert!(w.set_name("Bracket B"));
        assert!(w.is_dirty());
    }

    #[test]
    fn model_format_is_checked() {
        let mut w = bracket();
        w.set_model_file(ModelFile::from_bytes("parts/bracket.STL", b"solid"));
        assert!(w.is_valid());
        assert_eq!(w.model_file().size, 5);
        w.set_model_file(ModelFile::from_bytes("parts/bracket.step", b"ISO"));
        assert!(w.validation_errors().has(ValidationCode::UnsupportedModelFormat));
    }

    #[test]
    fn json_round_trip_is_exact() {
        let mut w = bracket();
        w.set_model_file(ModelFile::from_bytes("bracket.ply", b"ply\nformat ascii 1.0\n"));
        w.set_description("second revision, 0.1 mm tolerance");
        w.set_surface_area(0.1 + 0.2);
        let json = w.to_json().expect("serialize");
        assert_eq!(json["dimensions"]["length"], 120.0);
        assert_eq!(json["model_file_path"], "bracket.ply");
        let back: Workpiece = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, w);

        let text = serde_json::to_string(&w).expect("serialize");
        let back: Workpiece = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(back, w);
    }

    #[test]
    fn clone_as_new_resets_id() {
        let mut w = bracket();
        w.meta_mut().id = 42;
        let copy = w.clone_as_new();
        assert_eq!(copy.id(), 0);
        assert_eq!(copy.name(), w.name());
        assert_eq!(w.display_name(), "Bracket A");
        assert_matches!(Workpiece::new("", "c", Dimensions::default()).display_name().as_str(), "Workpiece_0");
    }
}
