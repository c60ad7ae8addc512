//! Shared record contract for persisted entities.
//!
//! [`EntityMeta`] carries identity, timestamps and the active/dirty flags.
//! [`Entity`] is the capability set the record store needs, and
//! [`AnyEntity`] is the closed set of entity kinds it can store.

use serde::{Deserialize, Serialize};

use crate::trajectory::Trajectory;
use crate::types::{self, DbId, Timestamp};
use crate::validation::{ValidationCode, ValidationErrors};
use crate::workpiece::Workpiece;

/// Allowed clock skew before a timestamp counts as "in the future".
pub const CLOCK_SKEW_TOLERANCE_SECS: i64 = 5;

// ---------------------------------------------------------------------------
// EntityKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Workpiece,
    Trajectory,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Workpiece => "workpiece",
            EntityKind::Trajectory => "trajectory",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EntityMeta
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMeta {
    /// `0` until the first successful insert.
    pub id: DbId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub is_active: bool,
    #[serde(default)]
    pub is_dirty: bool,
}

impl EntityMeta {
    pub fn new() -> Self {
        let now = types::now();
        Self {
            id: 0,
            created_at: now,
            updated_at: now,
            is_active: true,
            is_dirty: false,
        }
    }

    /// Record a local change: mark dirty and advance `updated_at`.
    pub fn touch(&mut self) {
        self.is_dirty = true;
        self.updated_at = types::now().max(self.updated_at);
    }

    pub fn mark_clean(&mut self) {
        self.is_dirty = false;
    }

    pub fn check(&self, errors: &mut ValidationErrors) {
        let limit = types::now() + chrono::Duration::seconds(CLOCK_SKEW_TOLERANCE_SECS);
        if self.created_at > limit {
            errors.add(
                "created_at",
                ValidationCode::FutureTimestamp,
                "created_at must not be in the future",
            );
        }
        if self.updated_at > limit {
            errors.add(
                "updated_at",
                ValidationCode::FutureTimestamp,
                "updated_at must not be in the future",
            );
        }
        if self.created_at > self.updated_at {
            errors.add(
                "created_at",
                ValidationCode::TimestampOrder,
                "created_at must not be later than updated_at",
            );
        }
    }
}

impl Default for EntityMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Assign `value` to `slot` when it differs, touching `meta`.
///
/// Returns whether anything changed.
pub(crate) fn assign<T: PartialEq>(meta: &mut EntityMeta, slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    meta.touch();
    true
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// Capabilities shared by every persisted entity.
pub trait Entity {
    fn kind(&self) -> EntityKind;
    fn meta(&self) -> &EntityMeta;
    fn meta_mut(&mut self) -> &mut EntityMeta;

    /// All field-level violations, never just the first.
    fn validation_errors(&self) -> ValidationErrors;

    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error>;

    fn id(&self) -> DbId {
        self.meta().id
    }

    fn is_valid(&self) -> bool {
        self.validation_errors().is_empty()
    }

    fn is_dirty(&self) -> bool {
        self.meta().is_dirty
    }

    fn is_active(&self) -> bool {
        self.meta().is_active
    }

    fn mark_clean(&mut self) {
        self.meta_mut().mark_clean();
    }

    fn set_active(&mut self, active: bool) -> bool {
        let meta = self.meta_mut();
        if meta.is_active == active {
            return false;
        }
        meta.is_active = active;
        meta.touch();
        true
    }
}

// ---------------------------------------------------------------------------
// AnyEntity
// ---------------------------------------------------------------------------

/// Closed set of storable entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnyEntity {
    Workpiece(Workpiece),
    Trajectory(Trajectory),
}

impl AnyEntity {
    pub fn as_workpiece(&self) -> Option<&Workpiece> {
        match self {
            AnyEntity::Workpiece(w) => Some(w),
            AnyEntity::Trajectory(_) => None,
        }
    }

    pub fn as_trajectory(&self) -> Option<&Trajectory> {
        match self {
            AnyEntity::Trajectory(t) => Some(t),
            AnyEntity::Workpiece(_) => None,
        }
    }

    pub fn into_workpiece(self) -> Option<Workpiece> {
        match self {
            AnyEntity::Workpiece(w) => Some(w),
            AnyEntity::Trajectory(_) => None,
        }
    }

    pub fn into_trajectory(self) -> Option<Trajectory> {
        match self {
            AnyEntity::Trajectory(t) => Some(t),
            AnyEntity::Workpiece(_) => None,
        }
    }

    fn inner(&self) -> &dyn Entity {
        match self {
            AnyEntity::Workpiece(w) => w,
            AnyEntity::Trajectory(t) => t,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Entity {
        match self {
            AnyEntity::Workpiece(w) => w,
            AnyEntity::Trajectory(t) => t,
        }
    }
}

impl Entity for AnyEntity {
    fn kind(&self) -> EntityKind {
        self.inner().kind()
    }

    fn meta(&self) -> &EntityMeta {
        self.inner().meta()
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        self.inner_mut().meta_mut()
    }

    fn validation_errors(&self) -> ValidationErrors {
        self.inner().validation_errors()
    }

    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        self.inner().to_json()
    }
}

impl From<Workpiece> for AnyEntity {
    fn from(w: Workpiece) -> Self {
        AnyEntity::Workpiece(w)
    }
}

impl From<Trajectory> for AnyEntity {
    fn from(t: Trajectory) -> Self {
        AnyEntity::Trajectory(t)
    }
}
