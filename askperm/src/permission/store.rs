//! First-request history storage
//!
//! Records, per permission, whether the host prompt has ever been shown.
//! The host exposes no "permanently denied" bit, so this history is what
//! separates a never-asked permission from a "never ask again" one.

use askperm_api::PermissionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

/// Current on-disk format version
pub const STORE_FORMAT_VERSION: u32 = 1;

/// File name used inside the library-scoped directory
pub const STORE_FILE_NAME: &str = "first_requests.json";

/// Error type for first-request store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access first-request store: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse first-request store: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unsupported first-request store version: {0}")]
    UnsupportedVersion(u32),
}

/// Trait for first-request history storage
///
/// Absent keys mean "never requested". Writes are idempotent, so a single
/// writer needs no locking beyond what the implementation provides.
pub trait PermissionStateStore: Send + Sync {
    /// Whether the permission has never been requested from the host
    fn is_first_request(&self, id: &PermissionId) -> Result<bool, StoreError>;

    /// Record that the host prompt was shown for the permission
    fn mark_requested(&self, id: &PermissionId) -> Result<(), StoreError>;

    /// All permissions recorded as requested
    fn requested(&self) -> Result<Vec<PermissionId>, StoreError>;

    /// Whether the permission has been requested at least once
    fn ever_requested(&self, id: &PermissionId) -> Result<bool, StoreError> {
        self.is_first_request(id).map(|first| !first)
    }
}

// ============================================================================
// File-based Store
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreFileData {
    version: u32,
    #[serde(default)]
    requested: BTreeMap<PermissionId, bool>,
}

impl StoreFileData {
    fn new() -> Self {
        Self {
            version: STORE_FORMAT_VERSION,
            requested: BTreeMap::new(),
        }
    }
}

/// File-based first-request store
///
/// Keeps the whole history in one JSON document in a directory owned by
/// the library, separate from application data.
/// Default: `<data_dir>/<app>/askperm/first_requests.json`
pub struct FileStateStore {
    path: PathBuf,
    data: RwLock<StoreFileData>,
}

impl FileStateStore {
    /// Open (or lazily create) a store at the specified path
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let data = if path.exists() {
            let file = File::open(&path)?;
            let data: StoreFileData = serde_json::from_reader(BufReader::new(file))?;
            if data.version != STORE_FORMAT_VERSION {
                return Err(StoreError::UnsupportedVersion(data.version));
            }
            data
        } else {
            StoreFileData::new()
        };

        tracing::debug!(
            path = %path.display(),
            entries = data.requested.len(),
            "Opened first-request store"
        );

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Default store location for an application
    pub fn default_path(app_name: &str) -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(app_name)
            .join("askperm")
            .join(STORE_FILE_NAME)
    }

    /// Open the store in the default location for an application
    pub fn default_for_app(app_name: &str) -> Result<Self, StoreError> {
        Self::new(Self::default_path(app_name))
    }

    /// Get the store file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, data: &StoreFileData) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // The target is only ever replaced whole, through a rename
        let tmp = self.path.with_extension("json.tmp");
        let written = Self::write_file(&tmp, data).and_then(|()| {
            fs::rename(&tmp, &self.path)?;
            Ok(())
        });
        if written.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        written
    }

    fn write_file(path: &Path, data: &StoreFileData) -> Result<(), StoreError> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, data)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }
}

impl PermissionStateStore for FileStateStore {
    fn is_first_request(&self, id: &PermissionId) -> Result<bool, StoreError> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(!data.requested.get(id).copied().unwrap_or(false))
    }

    fn mark_requested(&self, id: &PermissionId) -> Result<(), StoreError> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        if data.requested.get(id).copied().unwrap_or(false) && self.path.exists() {
            return Ok(());
        }
        // Memory only changes once the disk has the new history
        let mut updated = data.clone();
        updated.requested.insert(id.clone(), true);
        self.save(&updated)?;
        *data = updated;
        Ok(())
    }

    fn requested(&self) -> Result<Vec<PermissionId>, StoreError> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data
            .requested
            .iter()
            .filter(|(_, requested)| **requested)
            .map(|(id, _)| id.clone())
            .collect())
    }
}

impl std::fmt::Debug for FileStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStateStore")
            .field("path", &self.path)
            .finish()
    }
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// In-memory first-request store for testing or session-only hosts
#[derive(Default)]
pub struct MemoryStateStore {
    requested: RwLock<BTreeMap<PermissionId, bool>>,
}

impl MemoryStateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with some permissions already recorded as requested
    pub fn with_requested<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<PermissionId>,
    {
        let requested = ids.into_iter().map(|id| (id.into(), true)).collect();
        Self {
            requested: RwLock::new(requested),
        }
    }

    /// Number of recorded permissions
    pub fn len(&self) -> usize {
        self.requested
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been recorded yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PermissionStateStore for MemoryStateStore {
    fn is_first_request(&self, id: &PermissionId) -> Result<bool, StoreError> {
        let requested = self.requested.read().unwrap_or_else(PoisonError::into_inner);
        Ok(!requested.get(id).copied().unwrap_or(false))
    }

    fn mark_requested(&self, id: &PermissionId) -> Result<(), StoreError> {
        let mut requested = self.requested.write().unwrap_or_else(PoisonError::into_inner);
        requested.insert(id.clone(), true);
        Ok(())
    }

    fn requested(&self) -> Result<Vec<PermissionId>, StoreError> {
        let requested = self.requested.read().unwrap_or_else(PoisonError::into_inner);
        Ok(requested.keys().cloned().collect())
    }
}

impl std::fmt::Debug for MemoryStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStateStore")
            .field("count", &self.len())
            .finish()
    }
}
