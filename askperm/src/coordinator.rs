//! Permission request coordinator
//!
//! Drives one batch at a time per token through
//! `classifying -> (resolved | awaiting host | awaiting settings) -> delivered`.
//!
//! In-flight batches live in a registry keyed by [`RequestToken`]. Each
//! registration carries a ticket; responders hand the ticket back, so a
//! result arriving for a cancelled or superseded registration is dropped.
//! No lock is held while the gateway, the renderer, the store or the
//! caller's callback runs, which lets hosts answer synchronously.

use askperm_api::{HostGrant, Outcome, PermissionId, RequestToken};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::audit::{outcome_events, AuditEvent, AuditEventType, AuditSink, NullAuditSink};
use crate::gateway::{HostPermissionGateway, HostResponder, SettingsResponder};
use crate::permission::classifier::{BatchClassification, BatchPlan, PermissionSnapshot};
use crate::permission::options::RequestOptions;
use crate::permission::rationale::{RationaleDecision, RationaleRenderer, RationaleTiming};
use crate::permission::store::{PermissionStateStore, StoreError};

/// Error type for request submission
///
/// Denials are outcomes, never errors.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Host surface is not attached")]
    InvalidHostContext,

    #[error("No permissions were requested")]
    EmptyPermissionSet,

    #[error("Permission requested twice in one batch: {0}")]
    DuplicatePermission(PermissionId),

    #[error("A request with token {0} is already in flight")]
    TokenInUse(RequestToken),

    #[error("First-request store failed: {0}")]
    Store(#[from] StoreError),

    #[error("Request was cancelled before an outcome was delivered")]
    Cancelled,
}

/// State of a batch when [`Coordinator::request`] returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// The callback already ran
    Delivered,
    /// Waiting for the host
    Pending,
    /// Cancelled before anything was delivered
    Cancelled,
}

type Callback = Box<dyn FnOnce(Outcome) + Send + 'static>;

/// Terminal state of one registration, written under the registry lock
#[derive(Debug, Default)]
struct BatchStatus(AtomicU8);

impl BatchStatus {
    const PENDING: u8 = 0;
    const DELIVERED: u8 = 1;
    const CANCELLED: u8 = 2;

    fn set(&self, status: RequestStatus) {
        let value = match status {
            RequestStatus::Pending => Self::PENDING,
            RequestStatus::Delivered => Self::DELIVERED,
            RequestStatus::Cancelled => Self::CANCELLED,
        };
        self.0.store(value, Ordering::SeqCst);
    }

    fn get(&self) -> RequestStatus {
        match self.0.load(Ordering::SeqCst) {
            Self::DELIVERED => RequestStatus::Delivered,
            Self::CANCELLED => RequestStatus::Cancelled,
            _ => RequestStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Stage {
    Classifying,
    AwaitingHost,
    AwaitingSettings(Vec<PermissionId>),
}

struct PendingBatch {
    token: RequestToken,
    ticket: u64,
    batch: Vec<PermissionId>,
    options: RequestOptions,
    stage: Stage,
    /// Ids already decided, in the list they will be reported in
    settled: Outcome,
    /// Ids forwarded to the host and not answered yet
    awaiting: Vec<PermissionId>,
    after_reason_shown: bool,
    settings_offered: bool,
    status: Arc<BatchStatus>,
    callback: Callback,
}

enum Slot {
    /// Parked, waiting for a responder carrying the same ticket
    Waiting(PendingBatch),
    /// Being advanced by the coordinator outside the lock
    Busy {
        ticket: u64,
        status: Arc<BatchStatus>,
    },
}

impl Slot {
    fn ticket(&self) -> u64 {
        match self {
            Self::Waiting(batch) => batch.ticket,
            Self::Busy { ticket, .. } => *ticket,
        }
    }

    fn status(&self) -> &BatchStatus {
        match self {
            Self::Waiting(batch) => &batch.status,
            Self::Busy { status, .. } => status,
        }
    }
}

/// Shared state behind [`Coordinator`], reachable from responders
pub struct CoordinatorInner {
    gateway: Arc<dyn HostPermissionGateway>,
    store: Arc<dyn PermissionStateStore>,
    audit: Arc<dyn AuditSink>,
    pending: Mutex<HashMap<RequestToken, Slot>>,
    next_ticket: AtomicU64,
}

/// Coordinates permission requests against one host
///
/// Cloning is cheap and every clone shares the same registry.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

impl Coordinator {
    /// Create a coordinator without an audit trail
    pub fn new(
        gateway: Arc<dyn HostPermissionGateway>,
        store: Arc<dyn PermissionStateStore>,
    ) -> Self {
        Self::with_audit(gateway, store, Arc::new(NullAuditSink))
    }

    /// Create a coordinator recording every step to `audit`
    pub fn with_audit(
        gateway: Arc<dyn HostPermissionGateway>,
        store: Arc<dyn PermissionStateStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                gateway,
                store,
                audit,
                pending: Mutex::new(HashMap::new()),
                next_ticket: AtomicU64::new(1),
            }),
        }
    }

    /// Host gateway this coordinator talks to
    pub fn gateway(&self) -> &Arc<dyn HostPermissionGateway> {
        &self.inner.gateway
    }

    /// First-request history backing classification
    pub fn store(&self) -> &Arc<dyn PermissionStateStore> {
        &self.inner.store
    }

    /// Request a batch of permissions
    ///
    /// `callback` runs exactly once with the outcome, unless the batch is
    /// cancelled first. It may run before this method returns.
    pub fn request<F>(
        &self,
        ids: &[PermissionId],
        token: RequestToken,
        options: RequestOptions,
        callback: F,
    ) -> Result<RequestStatus, RequestError>
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        if !self.inner.gateway.is_attached() {
            return Err(RequestError::InvalidHostContext);
        }
        validate_batch(ids)?;

        let (ticket, status) = self.inner.reserve(token)?;

        let batch = PendingBatch {
            token,
            ticket,
            batch: ids.to_vec(),
            options,
            stage: Stage::Classifying,
            settled: Outcome::new(token),
            awaiting: Vec::new(),
            after_reason_shown: false,
            settings_offered: false,
            status: Arc::clone(&status),
            callback: Box::new(callback),
        };

        if let Err(e) = self.inner.begin(batch) {
            self.inner.release(token, ticket);
            return Err(e);
        }

        Ok(status.get())
    }

    /// Request a batch and wait for its outcome
    ///
    /// Resolves to [`RequestError::Cancelled`] if the batch is cancelled
    /// while waiting.
    pub async fn request_async(
        &self,
        ids: &[PermissionId],
        token: RequestToken,
        options: RequestOptions,
    ) -> Result<Outcome, RequestError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.request(ids, token, options, move |outcome| {
            let _ = tx.send(outcome);
        })?;
        rx.await.map_err(|_| RequestError::Cancelled)
    }

    /// Discard an in-flight batch without invoking its callback
    ///
    /// Returns `false` if no batch with this token was in flight.
    pub fn cancel(&self, token: RequestToken) -> bool {
        let removed = {
            let mut pending = self.inner.lock_pending();
            let removed = pending.remove(&token);
            if let Some(slot) = &removed {
                slot.status().set(RequestStatus::Cancelled);
            }
            removed
        };
        match removed {
            Some(slot) => {
                tracing::info!(token = %token, "Permission request cancelled");
                let permissions = match &slot {
                    Slot::Waiting(batch) => batch.batch.clone(),
                    Slot::Busy { .. } => Vec::new(),
                };
                self.inner.audit(AuditEvent::new(
                    AuditEventType::RequestCancelled,
                    token,
                    &permissions,
                ));
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight batch, returning how many were dropped
    pub fn cancel_all(&self) -> usize {
        let tokens: Vec<RequestToken> = self.inner.lock_pending().keys().copied().collect();
        tokens.into_iter().filter(|t| self.cancel(*t)).count()
    }

    /// Whether a batch with this token is in flight
    pub fn is_pending(&self, token: RequestToken) -> bool {
        self.inner.lock_pending().contains_key(&token)
    }

    /// Number of in-flight batches
    pub fn pending_count(&self) -> usize {
        self.inner.lock_pending().len()
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

fn validate_batch(ids: &[PermissionId]) -> Result<(), RequestError> {
    if ids.is_empty() {
        return Err(RequestError::EmptyPermissionSet);
    }
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id) {
            return Err(RequestError::DuplicatePermission(id.clone()));
        }
    }
    Ok(())
}

fn decide(
    renderer: &dyn RationaleRenderer,
    token: RequestToken,
    ids: &[PermissionId],
    settings: bool,
) -> RationaleDecision {
    let result = if settings {
        renderer.show_settings(token, ids)
    } else {
        renderer.show_reason(token, ids)
    };
    result.unwrap_or_else(|e| {
        tracing::warn!(token = %token, error = %e, "Rationale failed, treating as abort");
        RationaleDecision::Abort
    })
}

impl CoordinatorInner {
    fn lock_pending(&self) -> MutexGuard<'_, HashMap<RequestToken, Slot>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::Relaxed)
    }

    fn audit(&self, event: AuditEvent) {
        if let Err(e) = self.audit.record(event) {
            tracing::warn!(error = %e, "Failed to record audit event");
        }
    }

    // ------------------------------------------------------------------
    // Registry transitions
    // ------------------------------------------------------------------

    fn reserve(&self, token: RequestToken) -> Result<(u64, Arc<BatchStatus>), RequestError> {
        let ticket = self.next_ticket();
        let status = Arc::new(BatchStatus::default());
        match self.lock_pending().entry(token) {
            Entry::Occupied(_) => Err(RequestError::TokenInUse(token)),
            Entry::Vacant(slot) => {
                slot.insert(Slot::Busy {
                    ticket,
                    status: Arc::clone(&status),
                });
                Ok((ticket, status))
            }
        }
    }

    fn release(&self, token: RequestToken, ticket: u64) {
        let mut pending = self.lock_pending();
        if pending.get(&token).map(Slot::ticket) == Some(ticket) {
            pending.remove(&token);
        }
    }

    /// Take a parked batch back for processing
    fn claim(&self, token: RequestToken, ticket: u64) -> Option<PendingBatch> {
        let mut pending = self.lock_pending();
        let status = match pending.get(&token) {
            Some(Slot::Waiting(batch)) if batch.ticket == ticket => Arc::clone(&batch.status),
            _ => return None,
        };
        match pending.insert(token, Slot::Busy { ticket, status }) {
            Some(Slot::Waiting(batch)) => Some(batch),
            _ => None,
        }
    }

    /// Park a batch under a fresh ticket; `None` if it was cancelled
    fn park(&self, mut batch: PendingBatch) -> Option<u64> {
        let mut pending = self.lock_pending();
        match pending.get(&batch.token) {
            Some(Slot::Busy { ticket, .. }) if *ticket == batch.ticket => {}
            _ => return None,
        }
        let ticket = self.next_ticket();
        batch.ticket = ticket;
        pending.insert(batch.token, Slot::Waiting(batch));
        Some(ticket)
    }

    /// Remove a busy slot and mark it delivered; `false` if it was cancelled
    fn finish(&self, token: RequestToken, ticket: u64) -> bool {
        let mut pending = self.lock_pending();
        match pending.get(&token) {
            Some(Slot::Busy { ticket: t, status }) if *t == ticket => {
                status.set(RequestStatus::Delivered);
                pending.remove(&token);
                true
            }
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    fn snapshot(&self, id: &PermissionId) -> Result<PermissionSnapshot, StoreError> {
        let granted_now = self.gateway.query_granted(id);
        Ok(PermissionSnapshot {
            id: id.clone(),
            granted_now,
            rationale_should_show: !granted_now && self.gateway.should_show_rationale(id),
            ever_requested: self.store.ever_requested(id)?,
        })
    }

    fn begin(self: &Arc<Self>, mut batch: PendingBatch) -> Result<(), RequestError> {
        let snapshots = batch
            .batch
            .iter()
            .map(|id| self.snapshot(id))
            .collect::<Result<Vec<_>, _>>()?;
        let classification = BatchClassification::from_snapshots(&snapshots);

        tracing::debug!(
            token = %batch.token,
            entries = ?classification.entries(),
            "Classified permission batch"
        );

        match classification.plan(batch.token, batch.options.denial_policy) {
            BatchPlan::Resolve(outcome) => {
                self.audit(
                    AuditEvent::new(AuditEventType::ShortCircuited, batch.token, &batch.batch)
                        .with_reason(if outcome.has_permanent_denial() {
                            "permanently denied"
                        } else {
                            "already granted"
                        }),
                );
                batch.settled = outcome;
                self.resolve(batch);
            }
            BatchPlan::Request {
                settled,
                to_request,
            } => {
                batch.settled = settled;
                let before = batch
                    .options
                    .timed_renderer(RationaleTiming::Before)
                    .map(Arc::clone);
                if let Some(renderer) = before {
                    if !decide(renderer.as_ref(), batch.token, &to_request, false).is_proceed() {
                        tracing::info!(token = %batch.token, "Rationale declined before prompt");
                        batch.settled.denied.extend(to_request);
                        self.resolve(batch);
                        return Ok(());
                    }
                }
                batch.awaiting = to_request;
                self.prompt(batch);
            }
        }
        Ok(())
    }

    fn prompt(self: &Arc<Self>, mut batch: PendingBatch) {
        let token = batch.token;
        let ids = batch.awaiting.clone();
        batch.stage = Stage::AwaitingHost;

        let Some(ticket) = self.park(batch) else {
            tracing::debug!(token = %token, "Batch cancelled before prompt");
            return;
        };

        tracing::info!(
            token = %token,
            permissions = ids.len(),
            "Requesting permissions from host"
        );
        self.audit(AuditEvent::new(
            AuditEventType::PermissionRequested,
            token,
            &ids,
        ));
        let responder = HostResponder::new(token, ticket, Arc::downgrade(self));
        self.gateway.request_permissions(&ids, token, responder);
    }

    fn open_settings(self: &Arc<Self>, mut batch: PendingBatch, ids: Vec<PermissionId>) {
        let token = batch.token;
        batch.settings_offered = true;
        batch.stage = Stage::AwaitingSettings(ids.clone());

        let Some(ticket) = self.park(batch) else {
            tracing::debug!(token = %token, "Batch cancelled before settings");
            return;
        };

        tracing::info!(token = %token, permissions = ids.len(), "Opening host settings");
        self.audit(AuditEvent::new(AuditEventType::SettingsOpened, token, &ids));
        let responder = SettingsResponder::new(token, ticket, Arc::downgrade(self));
        self.gateway.open_settings(&ids, token, responder);
    }

    /// Offer the settings screen if configured, otherwise deliver
    fn resolve(self: &Arc<Self>, batch: PendingBatch) {
        if batch.settled.has_permanent_denial() && !batch.settings_offered {
            let renderer = batch.options.settings_renderer().map(Arc::clone);
            if let Some(renderer) = renderer {
                let ids = batch.settled.permanently_denied.clone();
                if decide(renderer.as_ref(), batch.token, &ids, true).is_proceed() {
                    self.open_settings(batch, ids);
                    return;
                }
            }
        }
        self.deliver(batch);
    }

    fn deliver(&self, mut batch: PendingBatch) {
        let token = batch.token;
        if !self.finish(token, batch.ticket) {
            tracing::debug!(token = %token, "Batch cancelled, dropping outcome");
            return;
        }

        batch.settled.sort_by_batch(&batch.batch);
        debug_assert!(batch.settled.is_partition_of(&batch.batch));

        tracing::info!(
            token = %token,
            granted = batch.settled.granted.len(),
            denied = batch.settled.denied.len(),
            permanently_denied = batch.settled.permanently_denied.len(),
            "Permission request resolved"
        );
        for event in outcome_events(&batch.settled) {
            self.audit(event);
        }
        (batch.callback)(batch.settled);
    }

    pub(crate) fn on_host_result(
        self: &Arc<Self>,
        token: RequestToken,
        ticket: u64,
        grants: Vec<HostGrant>,
    ) {
        let Some(mut batch) = self.claim(token, ticket) else {
            tracing::warn!(
                token = %token,
                "Dropping host result for a batch that is not awaiting one"
            );
            return;
        };
        if batch.stage != Stage::AwaitingHost {
            tracing::warn!(token = %token, "Host result arrived outside of a prompt");
            self.deliver(batch);
            return;
        }

        for grant in &grants {
            if !batch.awaiting.contains(&grant.id) {
                tracing::warn!(
                    token = %token,
                    permission = %grant.id,
                    "Ignoring result for a permission that was not requested"
                );
            }
        }

        let mut denied_now = Vec::new();
        for id in std::mem::take(&mut batch.awaiting) {
            match grants.iter().find(|g| g.id == id) {
                Some(grant) => {
                    if let Err(e) = self.store.mark_requested(&id) {
                        tracing::warn!(
                            permission = %id,
                            error = %e,
                            "Failed to record first request"
                        );
                    }
                    if grant.granted {
                        batch.settled.granted.push(id);
                    } else {
                        denied_now.push(id);
                    }
                }
                None => {
                    tracing::warn!(
                        token = %token,
                        permission = %id,
                        "Host returned no result, reporting denied"
                    );
                    denied_now.push(id);
                }
            }
        }

        if !denied_now.is_empty() && !batch.after_reason_shown {
            let after = batch
                .options
                .timed_renderer(RationaleTiming::After)
                .map(Arc::clone);
            if let Some(renderer) = after {
                batch.after_reason_shown = true;
                if decide(renderer.as_ref(), token, &denied_now, false).is_proceed() {
                    let ask_never = denied_now.iter().any(|id| {
                        !self.gateway.query_granted(id) && !self.gateway.should_show_rationale(id)
                    });
                    if ask_never {
                        batch.settled.denied.extend(denied_now.iter().cloned());
                        self.open_settings(batch, denied_now);
                    } else {
                        batch.awaiting = denied_now;
                        self.prompt(batch);
                    }
                    return;
                }
            }
        }

        batch.settled.denied.extend(denied_now);
        self.resolve(batch);
    }

    pub(crate) fn on_settings_returned(self: &Arc<Self>, token: RequestToken, ticket: u64) {
        let Some(mut batch) = self.claim(token, ticket) else {
            tracing::warn!(
                token = %token,
                "Dropping settings return for a batch that is not awaiting one"
            );
            return;
        };

        let Stage::AwaitingSettings(ids) = std::mem::replace(&mut batch.stage, Stage::Classifying)
        else {
            tracing::warn!(token = %token, "Settings return arrived outside of settings");
            self.deliver(batch);
            return;
        };

        for id in ids {
            if self.gateway.query_granted(&id) {
                batch.settled.denied.retain(|d| *d != id);
                batch.settled.permanently_denied.retain(|d| *d != id);
                batch.settled.granted.push(id);
            }
        }

        tracing::debug!(token = %token, "Returned from host settings");
        self.resolve(batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::gateway::{ResponseMode, SimulatedGateway, UserAnswer};
    use crate::permission::classifier::DenialPolicy;
    use crate::permission::rationale::{RationaleKind, RecordingRationaleRenderer};
    use crate::permission::store::MemoryStateStore;
    use askperm_api::permission_ids;

    struct Harness {
        host: Arc<SimulatedGateway>,
        store: Arc<MemoryStateStore>,
        audit: Arc<MemoryAuditSink>,
        coordinator: Coordinator,
        outcomes: Arc<Mutex<Vec<Outcome>>>,
    }

    impl Harness {
        fn new(host: SimulatedGateway, store: MemoryStateStore) -> Self {
            let host = Arc::new(host);
            let store = Arc::new(store);
            let audit = Arc::new(MemoryAuditSink::new());
            let coordinator = Coordinator::with_audit(host.clone(), store.clone(), audit.clone());
            Self {
                host,
                store,
                audit,
                coordinator,
                outcomes: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn request(
            &self,
            ids: &[&str],
            token: i32,
            options: RequestOptions,
        ) -> Result<RequestStatus, RequestError> {
            let outcomes = Arc::clone(&self.outcomes);
            self.coordinator.request(
                &permission_ids(ids.iter().copied()),
                RequestToken(token),
                options,
                move |outcome| outcomes.lock().unwrap().push(outcome),
            )
        }

        fn outcomes(&self) -> Vec<Outcome> {
            self.outcomes.lock().unwrap().clone()
        }
    }

    #[test]
    fn test_mixed_batch_scenario() {
        let host = SimulatedGateway::new();
        host.answer("CAMERA", UserAnswer::Grant);
        host.answer("MIC", UserAnswer::Deny);
        let h = Harness::new(host, MemoryStateStore::new());

        let status = h.request(&["CAMERA", "MIC"], 1, RequestOptions::new()).unwrap();
        assert_eq!(status, RequestStatus::Delivered);

        let outcomes = h.outcomes();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].granted, permission_ids(["CAMERA"]));
        assert_eq!(outcomes[0].denied, permission_ids(["MIC"]));
        assert!(outcomes[0].permanently_denied.is_empty());

        assert!(!h.store.is_first_request(&"CAMERA".into()).unwrap());
        assert!(!h.store.is_first_request(&"MIC".into()).unwrap());
        assert_eq!(h.coordinator.pending_count(), 0);
    }

    #[test]
    fn test_already_granted_short_circuits() {
        let host = SimulatedGateway::new();
        host.grant("CAMERA");
        let h = Harness::new(host, MemoryStateStore::new());

        h.request(&["CAMERA"], 2, RequestOptions::new()).unwrap();

        assert_eq!(h.outcomes()[0].granted, permission_ids(["CAMERA"]));
        assert_eq!(h.host.request_count(), 0);
        assert!(h.store.is_empty());
        assert_eq!(h.audit.find_by_type(AuditEventType::ShortCircuited).len(), 1);
    }

    #[test]
    fn test_permanent_denial_reports_whole_batch() {
        let host = SimulatedGateway::new();
        host.block("MIC");
        let h = Harness::new(host, MemoryStateStore::with_requested(["MIC"]));

        h.request(&["CAMERA", "MIC"], 3, RequestOptions::new()).unwrap();

        let outcome = &h.outcomes()[0];
        assert_eq!(outcome.permanently_denied, permission_ids(["CAMERA", "MIC"]));
        assert_eq!(h.host.request_count(), 0);
    }

    #[test]
    fn test_per_permission_policy_requests_remainder() {
        let host = SimulatedGateway::new().with_default_answer(UserAnswer::Grant);
        host.block("MIC");
        let h = Harness::new(host, MemoryStateStore::with_requested(["MIC"]));

        let options = RequestOptions::new().with_denial_policy(DenialPolicy::PerPermission);
        h.request(&["MIC", "CAMERA"], 4, options).unwrap();

        let outcome = &h.outcomes()[0];
        assert_eq!(outcome.granted, permission_ids(["CAMERA"]));
        assert_eq!(outcome.permanently_denied, permission_ids(["MIC"]));
        assert_eq!(h.host.requests(), vec![(RequestToken(4), permission_ids(["CAMERA"]))]);
    }

    #[test]
    fn test_cancel_while_awaiting_host() {
        let host = SimulatedGateway::with_mode(ResponseMode::Deferred);
        let h = Harness::new(host, MemoryStateStore::new());

        let status = h.request(&["CAMERA"], 5, RequestOptions::new()).unwrap();
        assert_eq!(status, RequestStatus::Pending);
        assert!(h.coordinator.is_pending(RequestToken(5)));

        assert!(h.coordinator.cancel(RequestToken(5)));
        assert!(!h.coordinator.cancel(RequestToken(5)));

        assert_eq!(h.host.deliver_pending(), 1);
        assert!(h.outcomes().is_empty());
        assert!(h.store.is_empty());
        assert_eq!(h.audit.find_by_type(AuditEventType::RequestCancelled).len(), 1);
    }

    #[test]
    fn test_token_reuse_after_cancel_ignores_stale_result() {
        let host = SimulatedGateway::with_mode(ResponseMode::Deferred)
            .with_default_answer(UserAnswer::Grant);
        let h = Harness::new(host, MemoryStateStore::new());

        h.request(&["CAMERA"], 6, RequestOptions::new()).unwrap();
        h.coordinator.cancel(RequestToken(6));
        h.request(&["MIC"], 6, RequestOptions::new()).unwrap();

        assert_eq!(h.host.deliver_pending(), 2);

        let outcomes = h.outcomes();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].granted, permission_ids(["MIC"]));
    }

    #[test]
    fn test_token_in_use() {
        let host = SimulatedGateway::with_mode(ResponseMode::Deferred);
        let h = Harness::new(host, MemoryStateStore::new());

        h.request(&["CAMERA"], 7, RequestOptions::new()).unwrap();
        let err = h.request(&["MIC"], 7, RequestOptions::new()).unwrap_err();
        assert!(matches!(err, RequestError::TokenInUse(RequestToken(7))));

        h.request(&["MIC"], 8, RequestOptions::new()).unwrap();
        assert_eq!(h.coordinator.pending_count(), 2);
    }

    #[test]
    fn test_validation_errors() {
        let h = Harness::new(SimulatedGateway::new(), MemoryStateStore::new());

        assert!(matches!(
            h.request(&[], 1, RequestOptions::new()),
            Err(RequestError::EmptyPermissionSet)
        ));
        assert!(matches!(
            h.request(&["CAMERA", "CAMERA"], 1, RequestOptions::new()),
            Err(RequestError::DuplicatePermission(_))
        ));

        h.host.detach();
        assert!(matches!(
            h.request(&["CAMERA"], 1, RequestOptions::new()),
            Err(RequestError::InvalidHostContext)
        ));
        assert!(h.outcomes().is_empty());
        assert_eq!(h.coordinator.pending_count(), 0);
    }

    #[test]
    fn test_reason_before_abort_skips_host() {
        let h = Harness::new(SimulatedGateway::new(), MemoryStateStore::new());
        let renderer = Arc::new(RecordingRationaleRenderer::aborting());

        let options = RequestOptions::new()
            .with_timing(RationaleTiming::Before)
            .with_renderer(renderer.clone());
        h.request(&["CAMERA"], 9, options).unwrap();

        assert_eq!(h.outcomes()[0].denied, permission_ids(["CAMERA"]));
        assert_eq!(h.host.request_count(), 0);
        assert_eq!(renderer.count(RationaleKind::Reason), 1);
        assert!(h.store.is_empty());
    }

    #[test]
    fn test_reason_after_re_requests_once() {
        let host = SimulatedGateway::new().with_default_answer(UserAnswer::Deny);
        let h = Harness::new(host, MemoryStateStore::new());
        let renderer = Arc::new(RecordingRationaleRenderer::proceeding());

        let options = RequestOptions::new()
            .with_timing(RationaleTiming::After)
            .with_renderer(renderer.clone());
        h.request(&["CAMERA"], 10, options).unwrap();

        assert_eq!(h.host.request_count(), 2);
        assert_eq!(renderer.count(RationaleKind::Reason), 1);
        assert_eq!(h.outcomes()[0].denied, permission_ids(["CAMERA"]));
    }

    #[test]
    fn test_settings_offer_regrants() {
        let host = SimulatedGateway::new();
        host.block("MIC");
        host.settings_grant(true);
        let h = Harness::new(host, MemoryStateStore::with_requested(["MIC"]));
        let renderer = Arc::new(RecordingRationaleRenderer::proceeding());

        let options = RequestOptions::new()
            .with_renderer(renderer.clone())
            .offer_settings(true);
        h.request(&["MIC"], 11, options).unwrap();

        assert_eq!(renderer.count(RationaleKind::Settings), 1);
        assert_eq!(h.host.settings_opened().len(), 1);
        assert_eq!(h.outcomes()[0].granted, permission_ids(["MIC"]));
    }

    #[tokio::test]
    async fn test_request_async_cancelled() {
        let host = SimulatedGateway::with_mode(ResponseMode::Deferred);
        let h = Harness::new(host, MemoryStateStore::new());

        let coordinator = h.coordinator.clone();
        let waiter = tokio::spawn(async move {
            coordinator
                .request_async(&permission_ids(["CAMERA"]), RequestToken(12), RequestOptions::new())
                .await
        });

        while !h.coordinator.is_pending(RequestToken(12)) {
            tokio::task::yield_now().await;
        }
        h.coordinator.cancel(RequestToken(12));

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(RequestError::Cancelled)));
    }
}
