//! The app store catalog: a JSON array of installable app templates.
//!
//! Every mutation is a read-modify-write of the whole document. Writers are
//! serialized through one async mutex and the document is replaced
//! atomically (temp file in the same directory, fsync, rename) so a crash
//! mid-write leaves the previous version intact.

use std::io::Write;
use std::path::PathBuf;
use tokio::sync::Mutex;
use crate::errors::{CatalogError, CatalogResult};
use crate::models::{AppCatalogEntry, AppPatch, CatalogView};

pub struct CatalogStore {
    path: PathBuf,
    protected_app: String,
    write_lock: Mutex<()>,
}

impl CatalogStore {
    /// Opens the catalog at `path`, seeding it with the file manager entry
    /// when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>, protected_app: &str) -> CatalogResult<Self> {
        let store = Self {
            path: path.into(),
            protected_app: protected_app.to_string(),
            write_lock: Mutex::new(()),
        };

        if !store.path.exists() {
            tracing::info!("Catalog {} missing, seeding default entries", store.path.display());
            store.write_document(&[file_manager_entry(protected_app)])?;
        }
        Ok(store)
    }

    pub async fn list(&self) -> CatalogResult<Vec<AppCatalogEntry>> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Entries with their `installed` flag derived from container names
    pub async fn list_with_installed(&self, installed_names: &[String]) -> CatalogResult<Vec<CatalogView>> {
        let entries = self.list().await?;
        Ok(entries
            .into_iter()
            .map(|entry| {
                let installed = installed_names
                    .iter()
                    .any(|name| name.eq_ignore_ascii_case(&entry.name));
                CatalogView { entry, installed }
            })
            .collect())
    }

    pub async fn add(&self, entry: AppCatalogEntry) -> CatalogResult<()> {
        validate_new_entry(&entry)?;

        let _guard = self.write_lock.lock().await;
        let mut entries = self.list().await?;
        if entries.iter().any(|e| e.name.eq_ignore_ascii_case(&entry.name)) {
            return Err(CatalogError::Duplicate(entry.name));
        }

        tracing::info!("Adding app {} to catalog", entry.name);
        entries.push(entry);
        self.write_document(&entries)
    }

    pub async fn update(&self, patch: AppPatch) -> CatalogResult<AppCatalogEntry> {
        if patch.name.trim().is_empty() {
            return Err(CatalogError::MissingField("name"));
        }

        let _guard = self.write_lock.lock().await;
        let mut entries = self.list().await?;
        let entry = entries
            .iter_mut()
            .find(|e| e.name.eq_ignore_ascii_case(&patch.name))
            .ok_or_else(|| CatalogError::NotFound(patch.name.clone()))?;

        patch.apply_to(entry);
        let updated = entry.clone();

        tracing::info!("Updated app {} in catalog", updated.name);
        self.write_document(&entries)?;
        Ok(updated)
    }

    pub async fn delete(&self, name: &str) -> CatalogResult<()> {
        if name.trim().is_empty() {
            return Err(CatalogError::MissingField("name"));
        }
        if name.eq_ignore_ascii_case(&self.protected_app) {
            return Err(CatalogError::Protected(self.protected_app.clone()));
        }

        let _guard = self.write_lock.lock().await;
        let mut entries = self.list().await?;
        let before = entries.len();
        entries.retain(|e| !e.name.eq_ignore_ascii_case(name));
        if entries.len() == before {
            return Err(CatalogError::NotFound(name.to_string()));
        }

        tracing::info!("Deleted app {} from catalog", name);
        self.write_document(&entries)
    }

    fn write_document(&self, entries: &[AppCatalogEntry]) -> CatalogResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, entries)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| CatalogError::Io(e.error))?;
        Ok(())
    }
}

fn validate_new_entry(entry: &AppCatalogEntry) -> CatalogResult<()> {
    let required: [(&'static str, &str); 5] = [
        ("name", &entry.name),
        ("image", &entry.image),
        ("description", &entry.description),
        ("category_zh", &entry.category_zh),
        ("category_en", &entry.category_en),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(CatalogError::MissingField(field));
        }
    }
    Ok(())
}

fn file_manager_entry(name: &str) -> AppCatalogEntry {
    AppCatalogEntry {
        name: name.to_string(),
        image: "filebrowser/filebrowser:latest".to_string(),
        icon: "bi-folder".to_string(),
        description: "Web file manager for the NAS data directory".to_string(),
        category_zh: "文件管理".to_string(),
        category_en: "File Management".to_string(),
        default_ports: [("80/tcp".to_string(), 8088)].into_iter().collect(),
        env: Vec::new(),
        volumes: Vec::new(),
    }
}
