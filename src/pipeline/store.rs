//! Хранилище планов

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;
use tempfile::NamedTempFile;

use crate::error::Result;
use crate::plan::Plan;

/// Хранилище планов проектов
#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn load(&self, project_id: &str) -> Result<Option<Plan>>;

    async fn save(&self, plan: &Plan) -> Result<()>;
}

/// Планы в JSON-файлах, по одному на проект
///
/// Запись атомарна: файл пишется во временный рядом с целевым и переименовывается.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, project_id: &str) -> PathBuf {
        let safe: String = project_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }

    fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(bytes)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait]
impl PlanStore for JsonFileStore {
    async fn load(&self, project_id: &str) -> Result<Option<Plan>> {
        let path = self.path_for(project_id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = tokio::fs::read(&path).await?;
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    async fn save(&self, plan: &Plan) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(plan)?;
        let path = self.path_for(&plan.project_id);
        let dir = self.dir.clone();
        let target = path.clone();
        tokio::task::spawn_blocking(move || Self::write_atomic(&dir, &target, &bytes))
            .await
            .map_err(|e| crate::error::AssemblyError::Other(format!("store task failed: {}", e)))??;
        debug!("Plan {} saved with status {}", plan.project_id, plan.status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stage::ProjectStatus;
    use crate::plan::Script;
    use crate::timeline::model::Scene;
    use crate::timeline::time::Millis;

    #[tokio::test]
    async fn saves_and_loads_plans() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();
        let script = Script { scenes: vec![Scene::new(1, Millis::from_secs(4), "")], lines: Vec::new() };
        let mut plan = Plan::new("ad/42", "brief", script, Millis::from_secs(4));

        assert!(store.load("ad/42").await.unwrap().is_none());
        store.save(&plan).await.unwrap();
        plan.advance(ProjectStatus::Planned).unwrap();
        store.save(&plan).await.unwrap();

        let loaded = store.load("ad/42").await.unwrap().unwrap();
        assert_eq!(loaded.status, ProjectStatus::Planned);
        assert_eq!(loaded, plan);
        assert!(store.path_for("ad/42").ends_with("ad_42.json"));
        // Временные файлы не остаются
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
