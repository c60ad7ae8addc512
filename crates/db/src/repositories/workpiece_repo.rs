//! Repository for the `workpieces` / `cache_workpieces` tables.

use spray_core::entity::EntityKind;
use spray_core::target::StoreTarget;
use spray_core::types::DbId;

use super::{bind_sync, insert_sql, table_name, update_sql, AnyQuery, SyncFields};
use crate::models::filter::ListFilter;
use crate::models::from_flag;
use crate::models::workpiece::{WorkpieceRow, WorkpieceValues};
use crate::DbPool;

/// Column list for remote queries.
const COLUMNS: &str = "id, name, description, category, model_file_path, model_file_size, \
    model_file_hash, dimensions, material, surface_area, complexity_score, created_by, \
    created_at, updated_at, is_active, sync_uid";

/// Extra columns the cache mirror carries.
const CACHE_COLUMNS: &str = "mysql_id, last_sync, is_dirty";

/// Business columns in [`bind_values`] order.
const VALUE_COLUMNS: &[&str] = &[
    "name",
    "description",
    "category",
    "model_file_path",
    "model_file_size",
    "model_file_hash",
    "dimensions",
    "material",
    "surface_area",
    "complexity_score",
    "created_by",
    "created_at",
    "updated_at",
    "is_active",
];

fn table(target: StoreTarget) -> &'static str {
    table_name(EntityKind::Workpiece, target)
}

fn columns(target: StoreTarget) -> String {
    match target {
        StoreTarget::Remote => COLUMNS.to_string(),
        StoreTarget::Cache => format!("{COLUMNS}, {CACHE_COLUMNS}"),
    }
}

fn bind_values<'q>(query: AnyQuery<'q>, v: &'q WorkpieceValues) -> AnyQuery<'q> {
    query
        .bind(v.name.as_str())
        .bind(v.description.as_str())
        .bind(v.category.as_str())
        .bind(v.model_file_path.as_str())
        .bind(v.model_file_size)
        .bind(v.model_file_hash.as_str())
        .bind(v.dimensions.as_str())
        .bind(v.material.as_str())
        .bind(v.surface_area)
        .bind(v.complexity_score)
        .bind(v.created_by)
        .bind(v.created_at)
        .bind(v.updated_at)
        .bind(from_flag(v.is_active))
}

/// Reads and writes workpiece rows on either store.
pub struct WorkpieceRepo;

impl WorkpieceRepo {
    /// Insert a row, returning its id. `sync` is ignored on the remote
    /// store except for `sync_uid`.
    pub async fn insert(
        pool: &DbPool,
        target: StoreTarget,
        values: &WorkpieceValues,
        sync: &SyncFields,
    ) -> Result<DbId, sqlx::Error> {
        let query = insert_sql(table(target), VALUE_COLUMNS, target);
        let q = bind_values(sqlx::query(&query), values);
        let row = bind_sync(q, target, sync).fetch_one(pool).await?;
        sqlx::Row::try_get::<i64, _>(&row, 0)
    }

    /// Overwrite the business columns. On the cache, `mark_dirty` also flags
    /// the row for the next sync.
    pub async fn update(
        pool: &DbPool,
        target: StoreTarget,
        id: DbId,
        values: &WorkpieceValues,
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
    pub async fn overwrite_from_remote(
        pool: &DbPool,
        local_id: DbId,
        values: &WorkpieceValues,
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

    /// Find a row by primary key, active or not.
    pub async fn find_by_id(
        pool: &DbPool,
        target: StoreTarget,
        id: DbId,
    ) -> Result<Option<WorkpieceRow>, sqlx::Error> {
        let query = format!(
            "SELECT {} FROM {} WHERE id = $1",
            columns(target),
            table(target)
        );
        sqlx::query_as::<_, WorkpieceRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_active(
        pool: &DbPool,
        target: StoreTarget,
        id: DbId,
    ) -> Result<Option<WorkpieceRow>, sqlx::Error> {
        let query = format!(
            "SELECT {} FROM {} WHERE id = $1 AND is_active = 1",
            columns(target),
            table(target)
        );
        sqlx::query_as::<_, WorkpieceRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_sync_uid(
        pool: &DbPool,
        target: StoreTarget,
        sync_uid: &str,
    ) -> Result<Option<WorkpieceRow>, sqlx::Error> {
        let query = format!(
            "SELECT {} FROM {} WHERE sync_uid = $1",
            columns(target),
            table(target)
        );
        sqlx::query_as::<_, WorkpieceRow>(&query)
            .bind(sync_uid)
            .fetch_optional(pool)
            .await
    }

    /// Cache row mirroring the given remote id.
    pub async fn find_by_remote_id(
        pool: &DbPool,
        remote_id: DbId,
    ) -> Result<Option<WorkpieceRow>, sqlx::Error> {
        let query = format!(
            "SELECT {} FROM cache_workpieces WHERE mysql_id = $1",
            columns(StoreTarget::Cache)
        );
        sqlx::query_as::<_, WorkpieceRow>(&query)
            .bind(remote_id)
            .fetch_optional(pool)
            .await
    }

    /// List rows matching `filter`. Only `category` narrows workpieces.
    pub async fn list(
        pool: &DbPool,
        target: StoreTarget,
        filter: &ListFilter,
    ) -> Result<Vec<WorkpieceRow>, sqlx::Error> {
        let mut query = format!(
            "SELECT {} FROM {} WHERE 1 = 1",
            columns(target),
            table(target)
        );
        let mut n = 0;
        if !filter.include_inactive {
            query.push_str(" AND is_active = 1");
        }
        if filter.category.is_some() {
            n += 1;
            query.push_str(&format!(" AND category = ${n}"));
        }
        query.push_str(filter.order.sql());
        if filter.limit.is_some() {
            n += 1;
            query.push_str(&format!(" LIMIT ${n}"));
        }

        let mut q = sqlx::query_as::<_, WorkpieceRow>(&query);
        if let Some(category) = &filter.category {
            q = q.bind(category.as_str());
        }
        if let Some(limit) = filter.limit {
            q = q.bind(limit);
        }
        q.fetch_all(pool).await
    }

    /// Mark an active row inactive. Returns `true` if a row changed.
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

    /// Cache rows waiting to be pushed, oldest first.
    pub async fn list_dirty(pool: &DbPool) -> Result<Vec<WorkpieceRow>, sqlx::Error> {
        let query = format!(
            "SELECT {} FROM cache_workpieces WHERE is_dirty = 1 ORDER BY id ASC",
            columns(StoreTarget::Cache)
        );
        sqlx::query_as::<_, WorkpieceRow>(&query)
            .fetch_all(pool)
            .await
    }

    /// Record a successful push. The dirty flag is only cleared when the
    /// row still carries `pushed_updated_at`; returns whether it was.
    pub async fn mark_synced(
        pool: &DbPool,
        local_id: DbId,
        remote_id: DbId,
        synced_at: i64,
        pushed_updated_at: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE cache_workpieces SET mysql_id = $2, last_sync = $3 \
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
            "UPDATE cache_workpieces SET is_dirty = 0 WHERE id = $1 AND updated_at = $2",
        )
        .bind(local_id)
        .bind(pushed_updated_at)
        .execute(pool)
        .await?;
        Ok(cleaned.rows_affected() > 0)
    }

    /// Remote rows changed after `since` (µs), including soft-deleted ones.
    pub async fn list_changed_since(
        pool: &DbPool,
        since: i64,
    ) -> Result<Vec<WorkpieceRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workpieces WHERE updated_at > $1 \
             ORDER BY updated_at ASC, id ASC"
        );
        sqlx::query_as::<_, WorkpieceRow>(&query)
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
