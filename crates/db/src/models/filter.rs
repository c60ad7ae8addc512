use spray_core::trajectory::TrajectoryType;
use spray_core::types::DbId;

/// Sort order for list queries. Ties break on `id` in the same direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListOrder {
    #[default]
    CreatedDesc,
    CreatedAsc,
    NameAsc,
    UpdatedDesc,
}

impl ListOrder {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            ListOrder::CreatedDesc => " ORDER BY created_at DESC, id DESC",
            ListOrder::CreatedAsc => " ORDER BY created_at ASC, id ASC",
            ListOrder::NameAsc => " ORDER BY name ASC, id ASC",
            ListOrder::UpdatedDesc => " ORDER BY updated_at DESC, id DESC",
        }
    }
}

/// Criteria for `RecordStore::list`. Each field narrows only the entity
/// kinds that have the column; the rest ignore it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListFilter {
    /// Workpieces only.
    pub category: Option<String>,
    /// Trajectories only.
    pub workpiece_id: Option<DbId>,
    /// Trajectories only.
    pub trajectory_type: Option<TrajectoryType>,
    pub include_inactive: bool,
    pub order: ListOrder,
    pub limit: Option<i64>,
}

impl ListFilter {
    pub fn category(category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            ..Default::default()
        }
    }

    pub fn for_workpiece(workpiece_id: DbId) -> Self {
        Self {
            workpiece_id: Some(workpiece_id),
            ..Default::default()
        }
    }

    pub fn with_order(mut self, order: ListOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit.max(0));
        self
    }

    pub fn including_inactive(mut self) -> Self {
        self.include_inactive = true;
        self
    }
}
