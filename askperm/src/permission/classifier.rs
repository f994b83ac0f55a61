//! Permission classification and batch planning
//!
//! Everything here is pure: the same inputs always produce the same
//! classification, and nothing touches the host or the store.

use askperm_api::{Classification, Outcome, PermissionId, RequestToken};
use serde::{Deserialize, Serialize};

/// How a permanently denied permission affects the rest of its batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialPolicy {
    /// One permanently denied permission reports the whole batch as
    /// permanently denied, and nothing is requested
    #[default]
    BatchLevel,
    /// Only the permanently denied permissions are reported as such;
    /// the remaining ones are still requested
    PerPermission,
}

/// Host and history state captured for one permission at request time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionSnapshot {
    pub id: PermissionId,
    /// Host currently reports the permission as granted
    pub granted_now: bool,
    /// Host would show a rationale before prompting again
    pub rationale_should_show: bool,
    /// The prompt has been shown at least once before
    pub ever_requested: bool,
}

impl PermissionSnapshot {
    /// Classify this snapshot
    pub fn classify(&self) -> Classification {
        classify(
            self.granted_now,
            self.rationale_should_show,
            self.ever_requested,
        )
    }
}

/// Classify one permission
///
/// The host answers "no rationale" both before the very first prompt and
/// after "never ask again"; `ever_requested` tells the two apart.
pub fn classify(
    granted_now: bool,
    rationale_should_show: bool,
    ever_requested: bool,
) -> Classification {
    if granted_now {
        Classification::Granted
    } else if !rationale_should_show && ever_requested {
        Classification::PermanentlyDenied
    } else {
        Classification::NeedsRequest
    }
}

/// Classification of a whole batch, in batch order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchClassification {
    entries: Vec<(PermissionId, Classification)>,
}

impl BatchClassification {
    /// Classify every snapshot, preserving order
    pub fn from_snapshots(snapshots: &[PermissionSnapshot]) -> Self {
        Self {
            entries: snapshots
                .iter()
                .map(|s| (s.id.clone(), s.classify()))
                .collect(),
        }
    }

    /// Per-permission entries
    pub fn entries(&self) -> &[(PermissionId, Classification)] {
        &self.entries
    }

    /// All ids in batch order
    pub fn ids(&self) -> Vec<PermissionId> {
        self.entries.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Ids with the given classification, in batch order
    pub fn ids_with(&self, class: Classification) -> Vec<PermissionId> {
        self.entries
            .iter()
            .filter(|(_, c)| *c == class)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn is_all_granted(&self) -> bool {
        self.entries
            .iter()
            .all(|(_, c)| *c == Classification::Granted)
    }

    pub fn has_permanent_denial(&self) -> bool {
        self.entries
            .iter()
            .any(|(_, c)| *c == Classification::PermanentlyDenied)
    }

    /// Decide what the coordinator should do with this batch
    pub fn plan(&self, token: RequestToken, policy: DenialPolicy) -> BatchPlan {
        if self.is_all_granted() {
            return BatchPlan::Resolve(Outcome::all_granted(token, &self.ids()));
        }

        if self.has_permanent_denial() && policy == DenialPolicy::BatchLevel {
            return BatchPlan::Resolve(Outcome::all_permanently_denied(token, &self.ids()));
        }

        let mut settled = Outcome::new(token);
        settled.granted = self.ids_with(Classification::Granted);
        settled.permanently_denied = self.ids_with(Classification::PermanentlyDenied);

        let to_request = self.ids_with(Classification::NeedsRequest);
        if to_request.is_empty() {
            BatchPlan::Resolve(settled)
        } else {
            BatchPlan::Request {
                settled,
                to_request,
            }
        }
    }
}

/// What the coordinator does after classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchPlan {
    /// Deliver this outcome without prompting
    Resolve(Outcome),
    /// Prompt for `to_request`; `settled` holds the ids already decided
    Request {
        settled: Outcome,
        to_request: Vec<PermissionId>,
    },
}
