use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};
use tokio::task::AbortHandle;
use tracing::info;

use super::*;

/// In-memory generation records plus the tasks producing them
#[derive(Default)]
pub struct GenerationStore {
    records: RwLock<HashMap<String, GenerationRecord>>,
    tasks: Mutex<HashMap<String, AbortHandle>>,
}

impl GenerationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, request: GenerationRequest) -> GenerationRecord {
        let record = GenerationRecord::new(request);
        self.records
            .write()
            .await
            .insert(record.generation_id.clone(), record.clone());
        info!(generation_id = %record.generation_id, project_id = %record.project_id, "Generation queued");
        record
    }

    pub async fn get(&self, id: &str) -> Option<GenerationRecord> {
        self.records.read().await.get(id).cloned()
    }

    /// Applies `f` to the record if it exists, returning whether it did
    pub async fn update<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut GenerationRecord),
    {
        match self.records.write().await.get_mut(id) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    /// Newest first, then paged
    pub async fn list(&self, filter: &GenerationFilter) -> GenerationPage {
        let records = self.records.read().await;
        let mut matching: Vec<&GenerationRecord> = records.values().filter(|r| filter.matches(r)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        GenerationPage {
            total: matching.len(),
            generations: matching
                .into_iter()
                .skip(filter.offset)
                .take(filter.limit)
                .map(GenerationRecord::summary)
                .collect(),
            offset: filter.offset,
            limit: filter.limit,
        }
    }

    pub async fn attach_task(&self, id: &str, handle: AbortHandle) {
        self.tasks.lock().await.insert(id.to_string(), handle);
    }

    pub async fn detach_task(&self, id: &str) {
        self.tasks.lock().await.remove(id);
    }

    /// Number of generations with a live task handle
    pub async fn running_tasks(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn cancel(&self, id: &str) -> Result<GenerationRecord, JobError> {
        let cancelled = {
            let mut records = self.records.write().await;
            let record = records.get_mut(id).ok_or_else(|| JobError::NotFound(id.to_string()))?;
            if record.status.is_finished() {
                return Err(JobError::AlreadyFinished(id.to_string()));
            }
            record.fail("Generation cancelled by user");
            record.clone()
        };

        if let Some(handle) = self.tasks.lock().await.remove(id) {
            handle.abort();
        }
        info!(generation_id = %id, "Generation cancelled");
        Ok(cancelled)
    }

    pub async fn delete(&self, id: &str) -> Result<(), JobError> {
        if self.records.write().await.remove(id).is_none() {
            return Err(JobError::NotFound(id.to_string()));
        }
        if let Some(handle) = self.tasks.lock().await.remove(id) {
            handle.abort();
        }
        info!(generation_id = %id, "Generation deleted");
        Ok(())
    }
}
