//! Repository for the `trajectories` / `cache_trajectories` tables.

use spray_core::entity::EntityKind;
use spray_core::target::StoreTarget;
use spray_core::types::DbId;

use super::{bind_sync, insert_sql, table_name, update_sql, AnyQuery, SyncFields};
use crate::models::filter::ListFilter;
use crate::models::from_flag;
use crate::models::trajectory::{TrajectoryRow, TrajectoryValues};
use crate::DbPool;

/// Column list for remote queries.
const COLUMNS: &str = "id, workpiece_id, name, description, trajectory_type, total_points, \
    total_length, estimated_time, quality_score, coverage_rate, parameters, points_data, \
    created_by, created_at, updated_at, is_active, sync_uid";

const CACHE_COLUMNS: &str = "mysql_id, last_sync, is_dirty";

/// Business columns in [`bind_values`] order.
const VALUE_COLUMNS: &[&str] = &[
    "workpiece_id",
    "name",
    "description",
    "trajectory_type",
    "total_points",
    "total_length",
    "estimated_time",
    "quality_score",
    "coverage_rate",
    "parameters",
    "points_data",
    "created_by",
    "created_at",
    "updated_at",
    "is_active",
];

fn table(target: StoreTarget) -> &'static str {
    table_name(EntityKind::Trajectory, target)
}

fn columns(target: StoreTarget) -> String {
    match target {
        StoreTarget::Remote => COLUMNS.to_string(),
        StoreTarget::Cache => format!("{COLUMNS}, {CACHE_COLUMNS}"),
    }
}

fn bind_values<'q>(query: AnyQuery<'q>, v: &'q TrajectoryValues) -> AnyQuery<'q> {
    query
        .bind(v.workpiece_id)
        .bind(v.name.as_str())
        .bind(v.description.as_str())
        .bind(v.trajectory_type.as_str())
        .bind(v.total_points)
        .bind(v.total_length)
        .bind(v.estimated_time)
        .bind(v.quality_score)
        .bind(v.coverage_rate)
        .bind(v.parameters.as_str())
        .bind(v.points_data.as_str())
        .bind(v.created_by)
        .bind(v.created_at)
        .bind(v.updated_at)
        .bind(from_flag(v.is_active))
}

/// Reads and writes trajectory rows on either store.
pub struct TrajectoryRepo;

impl TrajectoryRepo {
    pub async fn insert(
        pool: &DbPool,
        target: StoreTarget,
        values: &TrajectoryValues,
        sync: &SyncFields,
    ) -> Result<DbId, sqlx::Error> {
        let query = insert_sql(table(target), VALUE_COLUMNS, target);
        let q = bind_values(sqlx::query(&query), values);
        let row = bind_sync(q, target, sync).fetch_one(pool).await?;
        sqlx::Row::try_get::<i64, _>(&row, 0)
    }

    pub async fn update(
        pool: &DbPool,
        target: StoreTarget,
        id: DbId,
        values: &TrajectoryValues,
        mark_dirty: bool,
    ) -> Result<bool, sqlx::Error> {
        let extra = if target == StoreTarget::Cache && mark_dirty {
            ", is_dirty = 1"
        } else {
            ""
        };
        let query = update_sql(table(target), VALUE_COLUMNS, extra);
        let result = bind_values(sqlx::query(&query).bind(id), values)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace a cache row with the remote copy and mark it clean.
    /// `values.workpiece_id` must already be the cache workpiece id.
    pub async fn overwrite_from_remote(
        pool: &DbPool,
        local_id: DbId,
        values: &TrajectoryValues,
        sync: &SyncFields,
    ) -> Result<bool, sqlx::Error> {
        let n = VALUE_COLUMNS.len();
        let extra = format!(
            ", sync_uid = ${}, mysql_id = ${}, last_sync = ${}, is_dirty = 0",
            n + 2,
            n + 3,
            n + 4
        );
        let query = update_sql(table(StoreTarget::Cache), VALUE_COLUMNS, &extra);
        let result = bind_values(sqlx::query(&query).bind(local_id), values)
            .bind(sync.sync_uid.as_deref())
            .bind(sync.remote_id)
            .bind(sync.last_sync)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id(
        pool: &DbPool,
        target: StoreTarget,
        id: DbId,
    ) -> Result<Option<TrajectoryRow>, sqlx::Error> {
        let query = format!(
            "SELECT {} FROM {} WHERE id = $1",
            columns(target),
            table(target)
        );
        sqlx::query_as::<_, TrajectoryRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_sync_uid(
        pool: &DbPool,
        target: StoreTarget,
        sync_uid: &str,
    ) -> Result<Option<TrajectoryRow>, sqlx::Error> {
        let query = format!(
            "SELECT {} FROM {} WHERE sync_uid = $1",
            columns(target),
            table(target)
        );
        sqlx::query_as::<_, TrajectoryRow>(&query)
            .bind(sync_uid)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_remote_id(
        pool: &DbPool,
        remote_id: DbId,
    ) -> Result<Option<TrajectoryRow>, sqlx::Error> {
        let query = format!(
            "SELECT {} FROM cache_trajectories WHERE mysql_id = $1",
            columns(StoreTarget::Cache)
        );
        sqlx::query_as::<_, TrajectoryRow>(&query)
            .bind(remote_id)
            .fetch_optional(pool)
            .await
    }

    /// List rows matching `filter`'s workpiece id and trajectory type.
    pub async fn list(
        pool: &DbPool,
        target: StoreTarget,
        filter: &ListFilter,
    ) -> Result<Vec<TrajectoryRow>, sqlx::Error> {
        let mut query = format!(
            "SELECT {} FROM {} WHERE 1 = 1",
            columns(target),
            table(target)
        );
        let mut n = 0;
        if !filter.include_inactive {
            query.push_str(" AND is_active = 1");
        }
        if filter.workpiece_id.is_some() {
            n += 1;
            query.push_str(&format!(" AND workpiece_id = ${n}"));
        }
        if filter.trajectory_type.is_some() {
            n += 1;
            query.push_str(&format!(" AND trajectory_type = ${n}"));
        }
        query.push_str(filter.order.sql());
        if filter.limit.is_some() {
            n += 1;
            query.push_str(&format!(" LIMIT ${n}"));
        }

        let mut q = sqlx::query_as::<_, TrajectoryRow>(&query);
        if let Some(workpiece_id) = filter.workpiece_id {
            q = q.bind(workpiece_id);
        }
        if let Some(kind) = filter.trajectory_type {
            q = q.bind(kind.as_str());
        }
        if let Some(limit) = filter.limit {
            q = q.bind(limit);
        }
        q.fetch_all(pool).await
    }

    pub async fn soft_delete(
        pool: &DbPool,
        target: StoreTarget,
        id: DbId,
        at: i64,
    ) -> Result<bool, sqlx::Error> {
        set_active(pool, target, id, false, at).await
    }

    pub async fn restore(
        pool: &DbPool,
        target: StoreTarget,
        id: DbId,
        at: i64,
    ) -> Result<bool, sqlx::Error> {
        set_active(pool, target, id, true, at).await
    }

    pub async fn list_dirty(pool: &DbPool) -> Result<Vec<TrajectoryRow>, sqlx::Error> {
        let query = format!(
            "SELECT {} FROM cache_trajectories WHERE is_dirty = 1 ORDER BY id ASC",
            columns(StoreTarget::Cache)
        );
        sqlx::query_as::<_, TrajectoryRow>(&query)
            .fetch_all(pool)
            .await
    }

    /// See [`super::WorkpieceRepo::mark_synced`].
    pub async fn mark_synced(
        pool: &DbPool,
        local_id: DbId,
        remote_id: DbId,
        synced_at: i64,
        pushed_updated_at: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE cache_trajectories SET mysql_id = $2, last_sync = $3 \
             WHERE id = $1",
        )
        .bind(local_id)
        .bind(remote_id)
        .bind(synced_at)
        .execute(pool)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }
        let cleaned = sqlx::query(
            "UPDATE cache_trajectories SET is_dirty = 0 WHERE id = $1 AND updated_at = $2",
        )
        .bind(local_id)
        .bind(pushed_updated_at)
        .execute(pool)
        .await?;
        Ok(cleaned.rows_affected() > 0)
    }

    pub async fn list_changed_since(
        pool: &DbPool,
        since: i64,
    ) -> Result<Vec<TrajectoryRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM trajectories WHERE updated_at > $1 \
             ORDER BY updated_at ASC, id ASC"
        );
        sqlx::query_as::<_, TrajectoryRow>(&query)
            .bind(since)
            .fetch_all(pool)
            .await
    }
}

async fn set_active(
    pool: &DbPool,
    target: StoreTarget,
    id: DbId,
    active: bool,
    at: i64,
) -> Result<bool, sqlx::Error> {
    let dirty = match target {
        StoreTarget::Cache => ", is_dirty = 1",
        StoreTarget::Remote => "",
    };
    let query = format!(
        "UPDATE {} SET is_active = $2, updated_at = $3{dirty} \
         WHERE id = $1 AND is_active = $4",
        table(target)
    );
    let result = sqlx::query(&query)
        .bind(id)
        .bind(from_flag(active))
        .bind(at)
        .bind(from_flag(!active))
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
