//! Coordinator construction and ready-made setups

use std::path::PathBuf;
use std::sync::Arc;

use super::store::{FileStateStore, MemoryStateStore, PermissionStateStore};
use crate::audit::{AuditSink, FileAuditSink, MemoryAuditSink, NullAuditSink};
use crate::coordinator::Coordinator;
use crate::gateway::HostPermissionGateway;

/// Application name used when none is configured
pub const DEFAULT_APP_NAME: &str = "askperm";

/// Error type for coordinator construction
#[derive(Debug, thiserror::Error)]
pub enum PresetError {
    #[error("Failed to initialize store: {0}")]
    StoreInit(String),

    #[error("Failed to initialize audit: {0}")]
    AuditInit(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Builder for [`Coordinator`]
///
/// ```rust,no_run
/// use askperm::gateway::SimulatedGateway;
/// use askperm::permission::{CoordinatorBuilder, MemoryStateStore};
///
/// let coordinator = CoordinatorBuilder::new()
///     .app_name("myapp")
///     .gateway(SimulatedGateway::new())
///     .store(MemoryStateStore::new())
///     .build()?;
/// # Ok::<(), askperm::permission::PresetError>(())
/// ```
#[derive(Default)]
pub struct CoordinatorBuilder {
    gateway: Option<Arc<dyn HostPermissionGateway>>,
    store: Option<Arc<dyn PermissionStateStore>>,
    audit: Option<Arc<dyn AuditSink>>,
    app_name: Option<String>,
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name (used for default paths)
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    pub fn gateway(mut self, gateway: impl HostPermissionGateway + 'static) -> Self {
        self.gateway = Some(Arc::new(gateway));
        self
    }

    pub fn shared_gateway(mut self, gateway: Arc<dyn HostPermissionGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn store(mut self, store: impl PermissionStateStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn shared_store(mut self, store: Arc<dyn PermissionStateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn audit(mut self, audit: impl AuditSink + 'static) -> Self {
        self.audit = Some(Arc::new(audit));
        self
    }

    pub fn shared_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Build the coordinator
    ///
    /// Without an explicit store, the file store in the default location
    /// for the application name is used.
    pub fn build(self) -> Result<Coordinator, PresetError> {
        let gateway = self
            .gateway
            .ok_or_else(|| PresetError::InvalidConfig("a host gateway is required".into()))?;
        let app_name = self.app_name.as_deref().unwrap_or(DEFAULT_APP_NAME);

        let store: Arc<dyn PermissionStateStore> = match self.store {
            Some(s) => s,
            None => {
                let store = FileStateStore::default_for_app(app_name)
                    .map_err(|e| PresetError::StoreInit(e.to_string()))?;
                Arc::new(store)
            }
        };

        let audit = self.audit.unwrap_or_else(|| Arc::new(NullAuditSink));
        Ok(Coordinator::with_audit(gateway, store, audit))
    }
}

/// Ready-made coordinator setups
pub struct CoordinatorPresets;

impl CoordinatorPresets {
    /// Persistent setup for real hosts
    ///
    /// - file store under the application's data directory
    /// - JSONL audit log next to it
    pub fn persistent(
        app_name: &str,
        gateway: impl HostPermissionGateway + 'static,
    ) -> Result<Coordinator, PresetError> {
        let dir = Self::data_dir(app_name);

        let store = FileStateStore::new(dir.join(super::store::STORE_FILE_NAME))
            .map_err(|e| PresetError::StoreInit(e.to_string()))?;
        let audit = FileAuditSink::new(dir.join("audit.jsonl"))
            .map_err(|e| PresetError::AuditInit(e.to_string()))?;

        CoordinatorBuilder::new()
            .app_name(app_name)
            .gateway(gateway)
            .store(store)
            .audit(audit)
            .build()
    }

    /// In-memory setup (nothing touches the filesystem)
    pub fn testing(gateway: Arc<dyn HostPermissionGateway>) -> (Coordinator, Arc<MemoryAuditSink>) {
        let audit = Arc::new(MemoryAuditSink::new());
        let coordinator = Coordinator::with_audit(
            gateway,
            Arc::new(MemoryStateStore::new()),
            audit.clone(),
        );
        (coordinator, audit)
    }

    /// Directory holding the library's files for an application
    pub fn data_dir(app_name: &str) -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(app_name)
            .join("askperm")
    }
}
