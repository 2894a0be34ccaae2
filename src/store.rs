use std::collections::BTreeMap;

use dashmap::DashMap;
use uuid::Uuid;

use crate::domain::FileContent;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("project not found: {0}")]
    ProjectNotFound(Uuid),
}

/// Read-only boundary to wherever the editor keeps project files. The
/// engine consumes the snapshot and never writes back.
#[async_trait::async_trait]
pub trait ProjectFileStore: std::fmt::Debug + Send + Sync {
    async fn files_for_run(
        &self,
        project_id: Uuid,
    ) -> Result<BTreeMap<String, FileContent>, StoreError>;
}

/// In-memory store used by the demo binary and tests.
#[derive(Debug, Default)]
pub struct InMemoryProjectStore {
    projects: DashMap<Uuid, BTreeMap<String, FileContent>>,
}

impl InMemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_project(&self, files: BTreeMap<String, FileContent>) -> Uuid {
        let project_id = Uuid::new_v4();
        self.projects.insert(project_id, files);
        project_id
    }
}

#[async_trait::async_trait]
impl ProjectFileStore for InMemoryProjectStore {
    async fn files_for_run(
        &self,
        project_id: Uuid,
    ) -> Result<BTreeMap<String, FileContent>, StoreError> {
        self.projects
            .get(&project_id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::ProjectNotFound(project_id))
    }
}
