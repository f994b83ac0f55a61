//! askperm-api: Shared types for the askperm permission library
//!
//! This crate defines the vocabulary shared between the request coordinator
//! and host gateway implementations. It performs no I/O.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of one host platform permission
/// (e.g. `android.permission.CAMERA`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionId(String);

impl PermissionId {
    /// Create a new permission id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PermissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PermissionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PermissionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for PermissionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Caller-defined correlation id for one in-flight batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestToken(pub i32);

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for RequestToken {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

/// Per-permission status decided before any prompt is shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Host already reports the permission as granted
    Granted,
    /// The host prompt has to be shown
    NeedsRequest,
    /// The host will no longer prompt ("never ask again")
    PermanentlyDenied,
}

/// Which list of a delivered [`Outcome`] an id ended up in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Granted,
    /// Denied this time, still requestable later
    Denied,
    PermanentlyDenied,
}

/// One host-reported grant result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostGrant {
    /// Permission the result refers to
    pub id: PermissionId,
    /// Whether the user granted it
    pub granted: bool,
}

impl HostGrant {
    /// A granted result
    pub fn granted(id: impl Into<PermissionId>) -> Self {
        Self {
            id: id.into(),
            granted: true,
        }
    }

    /// A denied result
    pub fn denied(id: impl Into<PermissionId>) -> Self {
        Self {
            id: id.into(),
            granted: false,
        }
    }
}

/// Final result of a request batch
///
/// The three lists partition the requested batch: every requested id
/// appears in exactly one of them, in batch order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    /// Token of the batch this outcome belongs to
    pub token: RequestToken,

    /// Permissions granted by the host
    #[serde(default)]
    pub granted: Vec<PermissionId>,

    /// Permissions denied this time, still requestable later
    #[serde(default)]
    pub denied: Vec<PermissionId>,

    /// Permissions the host will no longer prompt for
    #[serde(default)]
    pub permanently_denied: Vec<PermissionId>,
}

impl Outcome {
    /// Create an empty outcome for a token
    pub fn new(token: RequestToken) -> Self {
        Self {
            token,
            granted: Vec::new(),
            denied: Vec::new(),
            permanently_denied: Vec::new(),
        }
    }

    /// Outcome with every id granted
    pub fn all_granted(token: RequestToken, ids: &[PermissionId]) -> Self {
        Self {
            granted: ids.to_vec(),
            ..Self::new(token)
        }
    }

    /// Outcome with every id permanently denied
    pub fn all_permanently_denied(token: RequestToken, ids: &[PermissionId]) -> Self {
        Self {
            permanently_denied: ids.to_vec(),
            ..Self::new(token)
        }
    }

    /// Whether every requested permission was granted
    pub fn is_all_granted(&self) -> bool {
        self.denied.is_empty() && self.permanently_denied.is_empty()
    }

    /// Whether any requested permission is permanently denied
    pub fn has_permanent_denial(&self) -> bool {
        !self.permanently_denied.is_empty()
    }

    /// Total number of ids across the three lists
    pub fn len(&self) -> usize {
        self.granted.len() + self.denied.len() + self.permanently_denied.len()
    }

    /// Whether the outcome carries no ids at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Status reported for an id, if it is part of the outcome
    pub fn status_of(&self, id: &PermissionId) -> Option<OutcomeStatus> {
        if self.granted.contains(id) {
            Some(OutcomeStatus::Granted)
        } else if self.permanently_denied.contains(id) {
            Some(OutcomeStatus::PermanentlyDenied)
        } else if self.denied.contains(id) {
            Some(OutcomeStatus::Denied)
        } else {
            None
        }
    }

    /// Check that the lists partition `batch` exactly once
    pub fn is_partition_of(&self, batch: &[PermissionId]) -> bool {
        if self.len() != batch.len() {
            return false;
        }
        batch.iter().all(|id| {
            let hits = [&self.granted, &self.denied, &self.permanently_denied]
                .iter()
                .map(|list| list.iter().filter(|x| *x == id).count())
                .sum::<usize>();
            hits == 1
        })
    }

    /// Reorder every list to follow the order of `batch`
    pub fn sort_by_batch(&mut self, batch: &[PermissionId]) {
        let position = |id: &PermissionId| batch.iter().position(|b| b == id).unwrap_or(usize::MAX);
        self.granted.sort_by_key(|id| position(id));
        self.denied.sort_by_key(|id| position(id));
        self.permanently_denied.sort_by_key(|id| position(id));
    }
}

/// Convert a list of string-like values into permission ids
pub fn permission_ids<I, S>(ids: I) -> Vec<PermissionId>
where
    I: IntoIterator<Item = S>,
    S: Into<PermissionId>,
{
    ids.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_id_display() {
        let id = PermissionId::new("android.permission.CAMERA");
        assert_eq!(id.to_string(), "android.permission.CAMERA");
        assert_eq!(id.as_str(), "android.permission.CAMERA");
    }

    #[test]
    fn test_outcome_partition() {
        let batch = permission_ids(["CAMERA", "MIC", "LOCATION"]);
        let outcome = Outcome {
            token: RequestToken(7),
            granted: permission_ids(["CAMERA"]),
            denied: permission_ids(["MIC"]),
            permanently_denied: permission_ids(["LOCATION"]),
        };

        assert!(outcome.is_partition_of(&batch));
        assert!(!outcome.is_all_granted());
        assert!(outcome.has_permanent_denial());
        assert_eq!(outcome.status_of(&"MIC".into()), Some(OutcomeStatus::Denied));
        assert_eq!(
            outcome.status_of(&"LOCATION".into()),
            Some(OutcomeStatus::PermanentlyDenied)
        );
        assert_eq!(outcome.status_of(&"CAMERA".into()), Some(OutcomeStatus::Granted));
        assert_eq!(outcome.status_of(&"SMS".into()), None);
    }

    #[test]
    fn test_outcome_partition_rejects_duplicates() {
        let batch = permission_ids(["CAMERA", "MIC"]);
        let outcome = Outcome {
            token: RequestToken(1),
            granted: permission_ids(["CAMERA"]),
            denied: permission_ids(["CAMERA"]),
            permanently_denied: Vec::new(),
        };

        assert!(!outcome.is_partition_of(&batch));
    }

    #[test]
    fn test_sort_by_batch() {
        let batch = permission_ids(["A", "B", "C"]);
        let mut outcome = Outcome {
            token: RequestToken(1),
            granted: permission_ids(["C", "A"]),
            denied: Vec::new(),
            permanently_denied: Vec::new(),
        };
        outcome.sort_by_batch(&batch);
        assert_eq!(outcome.granted, permission_ids(["A", "C"]));
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = Outcome::all_granted(RequestToken(100), &permission_ids(["CAMERA"]));
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"token\":100"));
        assert!(json.contains("CAMERA"));
    }
}
