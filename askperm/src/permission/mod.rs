//! Permission classification, history and request configuration
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           Coordinator                                │
//! │  ┌─────────────┐ ┌──────────────┐ ┌─────────────┐ ┌────────────────┐ │
//! │  │ Classifier  │ │    Store     │ │  Rationale  │ │     Audit      │ │
//! │  │             │ │              │ │             │ │                │ │
//! │  │ - classify  │ │ - File       │ │ - Terminal  │ │ - File (JSONL) │ │
//! │  │ - plan      │ │ - Memory     │ │ - Auto      │ │ - Memory       │ │
//! │  │             │ │              │ │ - Recording │ │ - Null         │ │
//! │  └─────────────┘ └──────────────┘ └─────────────┘ └────────────────┘ │
//! └───────────────────────────────┬──────────────────────────────────────┘
//!                                 │
//!                       HostPermissionGateway
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use askperm::gateway::{SimulatedGateway, UserAnswer};
//! use askperm::permission::{CoordinatorPresets, RequestOptions};
//! use askperm_api::{permission_ids, RequestToken};
//!
//! let host = Arc::new(SimulatedGateway::new().with_default_answer(UserAnswer::Grant));
//! let (coordinator, _audit) = CoordinatorPresets::testing(host);
//!
//! coordinator
//!     .request(
//!         &permission_ids(["android.permission.CAMERA"]),
//!         RequestToken(100),
//!         RequestOptions::new(),
//!         |outcome| assert!(outcome.is_all_granted()),
//!     )
//!     .unwrap();
//! ```
//!
//! # Classification
//!
//! | granted now | rationale | requested before | result |
//! |-------------|-----------|------------------|--------|
//! | yes | any | any | Granted |
//! | no | no | yes | PermanentlyDenied |
//! | no | no | no | NeedsRequest |
//! | no | yes | any | NeedsRequest |

pub mod classifier;
pub mod options;
pub mod presets;
pub mod rationale;
pub mod store;

pub use classifier::{classify, BatchClassification, BatchPlan, DenialPolicy, PermissionSnapshot};
pub use options::RequestOptions;
pub use presets::{CoordinatorBuilder, CoordinatorPresets, PresetError, DEFAULT_APP_NAME};
pub use rationale::{AutoRationaleRenderer, RecordingRationaleRenderer, TerminalRationaleRenderer};
pub use rationale::{
    RationaleDecision, RationaleError, RationaleKind, RationaleRenderer, RationaleTiming,
    RecordedRationale,
};
pub use store::{FileStateStore, MemoryStateStore, PermissionStateStore, StoreError};
