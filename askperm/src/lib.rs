//! askperm: runtime permission requests for host platforms
//!
//! This crate checks whether permissions are granted, drives the host's
//! prompt when they are not, and remembers which permissions were asked
//! before so a "never ask again" denial can be told apart from a first one.

pub mod audit;
pub mod coordinator;
pub mod gateway;
pub mod permission;

pub use askperm_api::{
    permission_ids, Classification, HostGrant, Outcome, OutcomeStatus, PermissionId,
    RequestToken,
};
pub use coordinator::{Coordinator, RequestError, RequestStatus};
pub use gateway::{has_permissions, HostPermissionGateway, HostResponder, SettingsResponder};
