//! Stateful batch service.
//!
//! [`BatchAggregator`] owns every batch and workpiece category, keeps batch
//! statistics current as membership changes, and publishes batch events on
//! the shared [`EventBus`]. When a [`BatchFileStore`] is attached, every
//! change is written to the batch's file before the event goes out.

use std::path::Path;
use std::sync::Arc;

use spray_core::batch::{self, BatchId, BatchInfo, BatchSettings, BatchStatistics, BatchStatus, LayoutReport};
use spray_core::category::{default_categories, WorkpieceCategory};
use spray_core::types::DbId;
use spray_core::validation::FieldError;
use spray_events::{EventBus, SprayEvent};
use tokio::sync::Mutex;

use crate::catalog::WorkpieceCatalog;
use crate::error::BatchError;
use crate::file_store::{read_batch_file, write_batch_file, BatchFileStore};

#[derive(Default)]
struct State {
    /// Creation order.
    batches: Vec<BatchInfo>,
    categories: Vec<WorkpieceCategory>,
}

impl State {
    fn batch(&self, batch_id: &str) -> Result<&BatchInfo, BatchError> {
        self.batches
            .iter()
            .find(|b| b.batch_id == batch_id)
            .ok_or_else(|| BatchError::NotFound(batch_id.to_string()))
    }

    fn batch_mut(&mut self, batch_id: &str) -> Result<&mut BatchInfo, BatchError> {
        self.batches
            .iter_mut()
            .find(|b| b.batch_id == batch_id)
            .ok_or_else(|| BatchError::NotFound(batch_id.to_string()))
    }

    fn category_mut(&mut self, category_id: &str) -> Result<&mut WorkpieceCategory, BatchError> {
        self.categories
            .iter_mut()
            .find(|c| c.category_id == category_id)
            .ok_or_else(|| BatchError::CategoryNotFound(category_id.to_string()))
    }
}

pub struct BatchAggregator {
    settings: BatchSettings,
    catalog: Arc<dyn WorkpieceCatalog>,
    events: Arc<EventBus>,
    files: Option<BatchFileStore>,
    state: Mutex<State>,
}

impl BatchAggregator {
    /// Starts with the default workpiece categories and no batches.
    pub fn new(settings: BatchSettings, catalog: Arc<dyn WorkpieceCatalog>, events: Arc<EventBus>) -> Self {
        Self {
            settings,
            catalog,
            events,
            files: None,
            state: Mutex::new(State {
                batches: Vec::new(),
                categories: default_categories(),
            }),
        }
    }

    /// Persist every batch change under `files`.
    pub fn with_file_store(mut self, files: BatchFileStore) -> Self {
        self.files = Some(files);
        self
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    /// Load the batch files written by an earlier run, replacing batches
    /// with the same id. Returns how many were loaded.
    pub async fn load_saved(&self) -> Result<usize, BatchError> {
        let Some(files) = &self.files else {
            return Ok(0);
        };
        let saved = files.load_all().await?;
        let count = saved.len();
        let mut state = self.state.lock().await;
        for batch in saved {
            upsert(&mut state.batches, batch);
        }
        tracing::info!(count, dir = %files.dir().display(), "Loaded saved batches");
        Ok(count)
    }

    // ---- batches ----

    pub async fn create_batch(&self, name: &str, description: &str) -> Result<BatchId, BatchError> {
        if name.trim().is_empty() {
            return Err(BatchError::InvalidName);
        }
        let mut batch = BatchInfo::new(name, description);
        self.refresh(&mut batch);
        let batch_id = batch.batch_id.clone();

        let mut state = self.state.lock().await;
        self.persist(&batch).await?;
        state.batches.push(batch);
        drop(state);

        tracing::info!(batch_id = %batch_id, name = name.trim(), "Batch created");
        self.events.publish(SprayEvent::BatchCreated {
            batch_id: batch_id.clone(),
        });
        Ok(batch_id)
    }

    pub async fn delete_batch(&self, batch_id: &str) -> Result<(), BatchError> {
        let mut state = self.state.lock().await;
        let index = state
            .batches
            .iter()
            .position(|b| b.batch_id == batch_id)
            .ok_or_else(|| BatchError::NotFound(batch_id.to_string()))?;
        if let Some(files) = &self.files {
            files.remove(batch_id).await?;
        }
        state.batches.remove(index);
        drop(state);

        tracing::info!(batch_id, "Batch deleted");
        self.events.publish(SprayEvent::BatchDeleted {
            batch_id: batch_id.to_string(),
        });
        Ok(())
    }

    /// Rename and re-describe a batch. Id, membership and creation time are
    /// kept.
    pub async fn update_batch_info(
        &self,
        batch_id: &str,
        name: &str,
        description: &str,
    ) -> Result<(), BatchError> {
        if name.trim().is_empty() {
            return Err(BatchError::InvalidName);
        }
        self.modify(batch_id, |batch| {
            batch.batch_name = name.trim().to_string();
            batch.description = description.trim().to_string();
            Ok(())
        })
        .await?;
        self.publish_updated(batch_id);
        Ok(())
    }

    pub async fn set_status(&self, batch_id: &str, status: BatchStatus) -> Result<(), BatchError> {
        self.modify(batch_id, |batch| {
            batch.status = status;
            Ok(())
        })
        .await?;
        tracing::info!(batch_id, status = ?status, "Batch status changed");
        self.publish_updated(batch_id);
        Ok(())
    }

    pub async fn get_batch(&self, batch_id: &str) -> Result<BatchInfo, BatchError> {
        self.state.lock().await.batch(batch_id).cloned()
    }

    /// All batches in creation order.
    pub async fn list_batches(&self) -> Vec<BatchInfo> {
        self.state.lock().await.batches.clone()
    }

    pub async fn workpieces_in_batch(&self, batch_id: &str) -> Result<Vec<DbId>, BatchError> {
        Ok(self.state.lock().await.batch(batch_id)?.workpiece_ids.clone())
    }

    // ---- membership ----

    pub async fn add_workpiece(&self, batch_id: &str, workpiece_id: DbId) -> Result<(), BatchError> {
        self.modify(batch_id, |batch| {
            if batch.add(workpiece_id) {
                Ok(())
            } else {
                Err(BatchError::DuplicateWorkpiece {
                    batch_id: batch_id.to_string(),
                    workpiece_id,
                })
            }
        })
        .await?;
        tracing::debug!(batch_id, workpiece_id, "Workpiece added to batch");
        self.events.publish(SprayEvent::WorkpieceAdded {
            batch_id: batch_id.to_string(),
            workpiece_id,
        });
        Ok(())
    }

    pub async fn remove_workpiece(&self, batch_id: &str, workpiece_id: DbId) -> Result<(), BatchError> {
        self.modify(batch_id, |batch| {
            if batch.remove(workpiece_id) {
                Ok(())
            } else {
                Err(BatchError::NotAMember {
                    batch_id: batch_id.to_string(),
                    workpiece_id,
                })
            }
        })
        .await?;
        tracing::debug!(batch_id, workpiece_id, "Workpiece removed from batch");
        self.events.publish(SprayEvent::WorkpieceRemoved {
            batch_id: batch_id.to_string(),
            workpiece_id,
        });
        Ok(())
    }

    /// Record a member as processed. Returns `false` if it already was.
    /// The batch becomes `Completed` once every member is.
    pub async fn mark_workpiece_completed(
        &self,
        batch_id: &str,
        workpiece_id: DbId,
    ) -> Result<bool, BatchError> {
        let mut newly = false;
        self.modify(batch_id, |batch| {
            if !batch.contains(workpiece_id) {
                return Err(BatchError::NotAMember {
                    batch_id: batch_id.to_string(),
                    workpiece_id,
                });
            }
            newly = batch.completed_ids.insert(workpiece_id);
            if batch.completed_ids.len() == batch.workpiece_ids.len() {
                batch.status = BatchStatus::Completed;
            }
            Ok(())
        })
        .await?;
        if newly {
            self.publish_updated(batch_id);
        }
        Ok(newly)
    }

    // ---- analysis ----

    /// Recompute totals from the members' current geometry.
    pub async fn recompute_statistics(&self, batch_id: &str) -> Result<BatchStatistics, BatchError> {
        self.modify(batch_id, |_| Ok(())).await?;
        Ok(self.get_batch(batch_id).await?.statistics)
    }

    pub async fn analyze_layout(&self, batch_id: &str) -> Result<LayoutReport, BatchError> {
        let report = {
            let state = self.state.lock().await;
            batch::analyze_layout(state.batch(batch_id)?, &self.settings)
        };
        tracing::info!(
            batch_id,
            utilization = report.space_utilization,
            estimated_minutes = report.estimated_time,
            suggestions = report.suggestions.len(),
            "Batch layout analyzed",
        );
        self.events.publish(SprayEvent::BatchAnalysisCompleted {
            batch_id: batch_id.to_string(),
            report: report.clone(),
        });
        Ok(report)
    }

    pub async fn space_utilization(&self, batch_id: &str) -> Result<f64, BatchError> {
        let state = self.state.lock().await;
        let batch = state.batch(batch_id)?;
        Ok(batch::space_utilization(batch.statistics.total_volume, &self.settings))
    }

    /// Minutes.
    pub async fn estimate_processing_time(&self, batch_id: &str) -> Result<f64, BatchError> {
        let state = self.state.lock().await;
        let batch = state.batch(batch_id)?;
        Ok(batch::processing_minutes(batch.workpiece_ids.len(), &self.settings))
    }

    pub async fn validate(&self, batch_id: &str) -> Result<Vec<FieldError>, BatchError> {
        let state = self.state.lock().await;
        Ok(batch::validate(state.batch(batch_id)?, &self.settings))
    }

    pub async fn check_constraints(&self, batch_id: &str) -> Result<Vec<String>, BatchError> {
        let state = self.state.lock().await;
        Ok(batch::check_constraints(state.batch(batch_id)?, &self.settings))
    }

    /// Summary document for operators and external reporting.
    pub async fn generate_report(&self, batch_id: &str) -> Result<serde_json::Value, BatchError> {
        let state = self.state.lock().await;
        let batch = state.batch(batch_id)?;
        let stats = &batch.statistics;
        Ok(serde_json::json!({
            "batchId": batch.batch_id,
            "batchName": batch.batch_name,
            "createTime": batch.create_time.to_rfc3339(),
            "status": batch.status,
            "description": batch.description,
            "statistics": {
                "totalWorkpieces": stats.total_workpieces,
                "completedWorkpieces": stats.completed_workpieces,
                "totalVolume": stats.total_volume,
                "totalSurfaceArea": stats.total_surface_area,
                "estimatedTime": stats.estimated_time,
                "spaceUtilization": batch::space_utilization(stats.total_volume, &self.settings),
            },
            "workpieces": batch.workpiece_ids,
            "generateTime": spray_core::types::now().to_rfc3339(),
        }))
    }

    // ---- import / export ----

    /// Read a batch file. An existing batch with the same id is replaced.
    pub async fn import_batch(&self, path: &Path) -> Result<BatchId, BatchError> {
        let mut batch = read_batch_file(path).await?;
        if batch.batch_name.trim().is_empty() {
            return Err(BatchError::InvalidName);
        }
        self.catalog.prepare(&batch.workpiece_ids).await;
        self.refresh(&mut batch);
        let batch_id = batch.batch_id.clone();

        let mut state = self.state.lock().await;
        self.persist(&batch).await?;
        let replaced = upsert(&mut state.batches, batch);
        drop(state);

        tracing::info!(batch_id = %batch_id, path = %path.display(), replaced, "Batch imported");
        let event = if replaced {
            SprayEvent::BatchUpdated {
                batch_id: batch_id.clone(),
            }
        } else {
            SprayEvent::BatchCreated {
                batch_id: batch_id.clone(),
            }
        };
        self.events.publish(event);
        Ok(batch_id)
    }

    pub async fn export_batch(&self, batch_id: &str, path: &Path) -> Result<(), BatchError> {
        let batch = self.get_batch(batch_id).await?;
        write_batch_file(path, &batch).await?;
        tracing::info!(batch_id, path = %path.display(), "Batch exported");
        Ok(())
    }

    // ---- categories ----

    pub async fn create_category(&self, name: &str, description: &str) -> Result<String, BatchError> {
        if name.trim().is_empty() {
            return Err(BatchError::InvalidName);
        }
        let category = WorkpieceCategory::new(name, description);
        let category_id = category.category_id.clone();
        self.state.lock().await.categories.push(category);
        tracing::debug!(category_id = %category_id, "Workpiece category created");
        Ok(category_id)
    }

    pub async fn delete_category(&self, category_id: &str) -> Result<(), BatchError> {
        let mut state = self.state.lock().await;
        let before = state.categories.len();
        state.categories.retain(|c| c.category_id != category_id);
        if state.categories.len() == before {
            return Err(BatchError::CategoryNotFound(category_id.to_string()));
        }
        Ok(())
    }

    /// Replace a category's fields, keeping its id.
    pub async fn update_category(
        &self,
        category_id: &str,
        mut category: WorkpieceCategory,
    ) -> Result<(), BatchError> {
        if category.category_name.trim().is_empty() {
            return Err(BatchError::InvalidName);
        }
        let mut state = self.state.lock().await;
        let slot = state.category_mut(category_id)?;
        category.category_id = category_id.to_string();
        *slot = category;
        Ok(())
    }

    pub async fn get_category(&self, category_id: &str) -> Result<WorkpieceCategory, BatchError> {
        self.state
            .lock()
            .await
            .categories
            .iter()
            .find(|c| c.category_id == category_id)
            .cloned()
            .ok_or_else(|| BatchError::CategoryNotFound(category_id.to_string()))
    }

    pub async fn list_categories(&self) -> Vec<WorkpieceCategory> {
        self.state.lock().await.categories.clone()
    }

    // ---- private helpers ----

    /// Apply `change` to a copy of the batch, refresh its statistics, write
    /// it out, then commit. A failing change or write leaves state untouched.
    async fn modify<F>(&self, batch_id: &str, change: F) -> Result<(), BatchError>
    where
        F: FnOnce(&mut BatchInfo) -> Result<(), BatchError>,
    {
        let mut state = self.state.lock().await;
        let mut updated = state.batch(batch_id)?.clone();
        change(&mut updated)?;
        self.catalog.prepare(&updated.workpiece_ids).await;
        self.refresh(&mut updated);
        self.persist(&updated).await?;
        *state.batch_mut(batch_id)? = updated;
        Ok(())
    }

    fn refresh(&self, batch: &mut BatchInfo) {
        batch.statistics =
            batch::compute_statistics(batch, &self.settings, |id| self.catalog.geometry(id));
    }

    async fn persist(&self, batch: &BatchInfo) -> Result<(), BatchError> {
        match &self.files {
            Some(files) => files.save(batch).await.map(|_| ()),
            None => Ok(()),
        }
    }

    fn publish_updated(&self, batch_id: &str) {
        self.events.publish(SprayEvent::BatchUpdated {
            batch_id: batch_id.to_string(),
        });
    }
}

/// Insert or replace by id. Returns whether a batch was replaced.
fn upsert(batches: &mut Vec<BatchInfo>, batch: BatchInfo) -> bool {
    match batches.iter_mut().find(|b| b.batch_id == batch.batch_id) {
        Some(slot) => {
            *slot = batch;
            true
        }
        None => {
            batches.push(batch);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::catalog::NoGeometry;

    fn aggregator() -> BatchAggregator {
        BatchAggregator::new(
            BatchSettings::default(),
            Arc::new(NoGeometry),
            Arc::new(EventBus::default()),
        )
    }

    #[tokio::test]
    async fn blank_names_are_rejected() {
        let agg = aggregator();
        assert_matches!(agg.create_batch("  ", "").await, Err(BatchError::InvalidName));
        let id = agg.create_batch("Line 1", "").await.expect("create");
        assert_matches!(
            agg.update_batch_info(&id, "", "x").await,
            Err(BatchError::InvalidName)
        );
        assert_eq!(agg.get_batch(&id).await.expect("get").batch_name, "Line 1");
    }

    #[tokio::test]
    async fn completing_every_member_completes_the_batch() {
        let agg = aggregator();
        let id = agg.create_batch("Line 1", "").await.expect("create");
        agg.add_workpiece(&id, 1).await.expect("add");
        agg.add_workpiece(&id, 2).await.expect("add");

        assert!(agg.mark_workpiece_completed(&id, 1).await.expect("complete"));
        assert!(!agg.mark_workpiece_completed(&id, 1).await.expect("again"));
        assert_eq!(agg.get_batch(&id).await.expect("get").status, BatchStatus::Pending);

        assert!(agg.mark_workpiece_completed(&id, 2).await.expect("complete"));
        let batch = agg.get_batch(&id).await.expect("get");
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.statistics.completed_workpieces, 2);

        assert_matches!(
            agg.mark_workpiece_completed(&id, 3).await,
            Err(BatchError::NotAMember { workpiece_id: 3, .. })
        );
    }

    #[tokio::test]
    async fn default_categories_are_present_and_editable() {
        let agg = aggregator();
        let categories = agg.list_categories().await;
        assert_eq!(categories.len(), 3);

        let id = agg.create_category("Thin wall", "sheet parts").await.expect("create");
        let mut category = agg.get_category(&id).await.expect("get");
        category.geometry_type = "box".into();
        category.category_id = "ignored".into();
        agg.update_category(&id, category).await.expect("update");
        assert_eq!(agg.get_category(&id).await.expect("get").geometry_type, "box");

        agg.delete_category(&id).await.expect("delete");
        assert_matches!(agg.get_category(&id).await, Err(BatchError::CategoryNotFound(_)));
        assert_matches!(agg.delete_category(&id).await, Err(BatchError::CategoryNotFound(_)));
    }
}
