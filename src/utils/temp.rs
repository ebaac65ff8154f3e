//! Модуль для работы с временными файлами сборки
//!
//! Промежуточные файлы (дорожки реплик, тишина, предварительный микс, ремукс)
//! складываются в одну рабочую директорию проекта.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use tempfile::TempDir;

use crate::error::Result;

/// Менеджер временных файлов
pub struct TempFileManager {
    /// Временная директория (удаляется при уничтожении, если включена очистка)
    temp_dir: Option<TempDir>,
    /// Путь рабочей директории
    root: PathBuf,
    /// Список выданных файлов
    files: Vec<PathBuf>,
    /// Нужно ли удалять файлы при завершении
    cleanup: bool,
}

impl TempFileManager {
    /// Создать рабочую директорию во временной папке системы или внутри `base`
    pub fn new(base: Option<&Path>, cleanup: bool) -> Result<Self> {
        let (temp_dir, root) = match (base, cleanup) {
            (Some(base), true) => {
                fs::create_dir_all(base)?;
                let dir = tempfile::Builder::new().prefix("assembly_").tempdir_in(base)?;
                let root = dir.path().to_path_buf();
                (Some(dir), root)
            }
            (None, true) => {
                let dir = tempfile::Builder::new().prefix("assembly_").tempdir()?;
                let root = dir.path().to_path_buf();
                (Some(dir), root)
            }
            (base, false) => {
                let parent = base.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir);
                let root = parent.join(format!("assembly_{}", uuid::Uuid::new_v4()));
                fs::create_dir_all(&root)?;
                (None, root)
            }
        };
        debug!("Work directory: {}", root.display());

        Ok(Self { temp_dir, root, files: Vec::new(), cleanup })
    }

    /// Уникальный путь для нового файла (файл не создается)
    pub fn temp_path(&mut self, prefix: &str, extension: &str) -> PathBuf {
        let file_name = format!("{}_{}.{}", prefix, uuid::Uuid::new_v4(), extension);
        let file_path = self.root.join(file_name);
        self.files.push(file_path.clone());
        file_path
    }

    /// Получить путь к рабочей директории
    pub fn dir(&self) -> &Path {
        &self.root
    }

    /// Удалить выданные файлы
    pub fn cleanup(&mut self) -> Result<()> {
        if self.cleanup {
            for file in &self.files {
                if file.exists() {
                    fs::remove_file(file)?;
                }
            }
            self.files.clear();
        }
        Ok(())
    }
}

impl Drop for TempFileManager {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            warn!("Failed to clean up temp files in {}: {}", self.root.display(), e);
        }
        // temp_dir удаляет саму директорию
        let _ = self.temp_dir.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_unique_and_inside_root() {
        let mut manager = TempFileManager::new(None, true).unwrap();
        let a = manager.temp_path("vo", "wav");
        let b = manager.temp_path("vo", "wav");
        assert_ne!(a, b);
        assert!(a.starts_with(manager.dir()));
        assert_eq!(a.extension().unwrap(), "wav");
    }

    #[test]
    fn cleanup_removes_issued_files() {
        let base = tempfile::tempdir().unwrap();
        let mut manager = TempFileManager::new(Some(base.path()), true).unwrap();
        let file = manager.temp_path("mix", "m4a");
        fs::write(&file, b"data").unwrap();
        manager.cleanup().unwrap();
        assert!(!file.exists());
    }

    #[test]
    fn kept_directory_survives_drop() {
        let base = tempfile::tempdir().unwrap();
        let root = {
            let mut manager = TempFileManager::new(Some(base.path()), false).unwrap();
            let file = manager.temp_path("mix", "m4a");
            fs::write(&file, b"data").unwrap();
            manager.dir().to_path_buf()
        };
        assert!(root.exists());
        assert_eq!(fs::read_dir(&root).unwrap().count(), 1);
    }
}
