//! Host platform gateway
//!
//! The coordinator never inspects what kind of host it talks to. Each
//! platform implements [`HostPermissionGateway`] once and answers
//! asynchronous requests through the one-shot responders handed to it.

use askperm_api::{HostGrant, PermissionId, RequestToken};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, Weak};

use crate::coordinator::CoordinatorInner;

/// Capability surface of the host permission runtime
///
/// # Example
///
/// ```rust
/// use askperm::gateway::{HostPermissionGateway, HostResponder};
/// use askperm_api::{HostGrant, PermissionId, RequestToken};
///
/// struct AlwaysGrants;
///
/// impl HostPermissionGateway for AlwaysGrants {
///     fn query_granted(&self, _id: &PermissionId) -> bool {
///         false
///     }
///
///     fn should_show_rationale(&self, _id: &PermissionId) -> bool {
///         false
///     }
///
///     fn request_permissions(
///         &self,
///         ids: &[PermissionId],
///         _token: RequestToken,
///         responder: HostResponder,
///     ) {
///         responder.respond(ids.iter().cloned().map(HostGrant::granted).collect());
///     }
/// }
/// ```
pub trait HostPermissionGateway: Send + Sync {
    /// Whether the host surface is alive and able to show prompts
    fn is_attached(&self) -> bool {
        true
    }

    /// Current grant state of a permission
    fn query_granted(&self, id: &PermissionId) -> bool;

    /// Whether the host would show a rationale before prompting again
    fn should_show_rationale(&self, id: &PermissionId) -> bool;

    /// Show the host prompt; the result goes through `responder`,
    /// possibly before this method returns
    fn request_permissions(
        &self,
        ids: &[PermissionId],
        token: RequestToken,
        responder: HostResponder,
    );

    /// Open the system settings screen for `ids`
    ///
    /// Call `responder.returned()` once the user comes back.
    fn open_settings(
        &self,
        ids: &[PermissionId],
        token: RequestToken,
        responder: SettingsResponder,
    ) {
        let _ = (ids, token);
        responder.returned();
    }
}

/// Check whether every permission is already granted
pub fn has_permissions(gateway: &dyn HostPermissionGateway, ids: &[PermissionId]) -> bool {
    ids.iter().all(|id| gateway.query_granted(id))
}

/// One-shot handle delivering a host prompt result back to the coordinator
pub struct HostResponder {
    token: RequestToken,
    ticket: u64,
    coordinator: Weak<CoordinatorInner>,
}

impl HostResponder {
    pub(crate) fn new(
        token: RequestToken,
        ticket: u64,
        coordinator: Weak<CoordinatorInner>,
    ) -> Self {
        Self {
            token,
            ticket,
            coordinator,
        }
    }

    pub fn token(&self) -> RequestToken {
        self.token
    }

    /// Deliver per-permission grant results
    ///
    /// Results for a cancelled batch, or for a coordinator that no longer
    /// exists, are dropped.
    pub fn respond(self, grants: Vec<HostGrant>) {
        match self.coordinator.upgrade() {
            Some(inner) => inner.on_host_result(self.token, self.ticket, grants),
            None => {
                tracing::debug!(token = %self.token, "Coordinator gone, dropping host result");
            }
        }
    }
}

impl fmt::Debug for HostResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostResponder")
            .field("token", &self.token)
            .field("ticket", &self.ticket)
            .finish()
    }
}

/// One-shot handle signalling the user came back from the settings screen
pub struct SettingsResponder {
    token: RequestToken,
    ticket: u64,
    coordinator: Weak<CoordinatorInner>,
}

impl SettingsResponder {
    pub(crate) fn new(
        token: RequestToken,
        ticket: u64,
        coordinator: Weak<CoordinatorInner>,
    ) -> Self {
        Self {
            token,
            ticket,
            coordinator,
        }
    }

    pub fn token(&self) -> RequestToken {
        self.token
    }

    pub fn returned(self) {
        match self.coordinator.upgrade() {
            Some(inner) => inner.on_settings_returned(self.token, self.ticket),
            None => {
                tracing::debug!(token = %self.token, "Coordinator gone, dropping settings return");
            }
        }
    }
}

impl fmt::Debug for SettingsResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsResponder")
            .field("token", &self.token)
            .field("ticket", &self.ticket)
            .finish()
    }
}

// ============================================================================
// Simulated Host
// ============================================================================

/// How the simulated user answers a prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserAnswer {
    Grant,
    #[default]
    Deny,
    /// Deny and tick "don't ask again"
    DenyForever,
}

/// When the simulated host answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    /// Answer from inside `request_permissions`
    #[default]
    Immediate,
    /// Hold responders until [`SimulatedGateway::deliver_pending`]
    Deferred,
}

#[derive(Debug, Clone, Copy, Default)]
struct SimulatedPermission {
    granted: bool,
    rationale: bool,
    blocked: bool,
}

/// In-process host following the usual runtime-permission rules
///
/// - a plain denial makes the host show a rationale next time
/// - "don't ask again" hides the rationale and auto-denies later prompts
/// - the settings screen can grant anything
pub struct SimulatedGateway {
    attached: AtomicBool,
    mode: ResponseMode,
    state: Mutex<HashMap<PermissionId, SimulatedPermission>>,
    answers: Mutex<HashMap<PermissionId, UserAnswer>>,
    default_answer: UserAnswer,
    settings_grants: AtomicBool,
    requests: Mutex<Vec<(RequestToken, Vec<PermissionId>)>>,
    settings_opened: Mutex<Vec<(RequestToken, Vec<PermissionId>)>>,
    queued: Mutex<Vec<(Vec<PermissionId>, HostResponder)>>,
}

impl SimulatedGateway {
    /// Host answering immediately, denying by default
    pub fn new() -> Self {
        Self::with_mode(ResponseMode::Immediate)
    }

    pub fn with_mode(mode: ResponseMode) -> Self {
        Self {
            attached: AtomicBool::new(true),
            mode,
            state: Mutex::new(HashMap::new()),
            answers: Mutex::new(HashMap::new()),
            default_answer: UserAnswer::Deny,
            settings_grants: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
            settings_opened: Mutex::new(Vec::new()),
            queued: Mutex::new(Vec::new()),
        }
    }

    /// Answer used for permissions without an explicit answer
    pub fn with_default_answer(mut self, answer: UserAnswer) -> Self {
        self.default_answer = answer;
        self
    }

    /// Mark a permission as already granted
    pub fn grant(&self, id: impl Into<PermissionId>) {
        self.entry(id.into(), |p| p.granted = true);
    }

    /// Put a permission into the "don't ask again" state
    pub fn block(&self, id: impl Into<PermissionId>) {
        self.entry(id.into(), |p| {
            p.granted = false;
            p.rationale = false;
            p.blocked = true;
        });
    }

    /// Make the host report that a rationale should be shown
    pub fn show_rationale_for(&self, id: impl Into<PermissionId>) {
        self.entry(id.into(), |p| p.rationale = true);
    }

    /// Set how the user answers the next prompts for a permission
    pub fn answer(&self, id: impl Into<PermissionId>, answer: UserAnswer) {
        lock(&self.answers).insert(id.into(), answer);
    }

    /// Whether the settings screen grants what it was opened for
    pub fn settings_grant(&self, grants: bool) {
        self.settings_grants.store(grants, Ordering::SeqCst);
    }

    /// Simulate the host surface being torn down
    pub fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    /// Every prompt shown so far
    pub fn requests(&self) -> Vec<(RequestToken, Vec<PermissionId>)> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Every settings screen opened so far
    pub fn settings_opened(&self) -> Vec<(RequestToken, Vec<PermissionId>)> {
        lock(&self.settings_opened).clone()
    }

    /// Number of deferred prompts not answered yet
    pub fn queued_count(&self) -> usize {
        lock(&self.queued).len()
    }

    /// Answer every deferred prompt, returning how many were answered
    pub fn deliver_pending(&self) -> usize {
        let queued = std::mem::take(&mut *lock(&self.queued));
        let count = queued.len();
        for (ids, responder) in queued {
            let grants = self.apply_answers(&ids);
            responder.respond(grants);
        }
        count
    }

    /// Drop every deferred prompt without answering
    pub fn discard_pending(&self) -> usize {
        let queued = std::mem::take(&mut *lock(&self.queued));
        queued.len()
    }

    fn entry(&self, id: PermissionId, update: impl FnOnce(&mut SimulatedPermission)) {
        let mut state = lock(&self.state);
        update(state.entry(id).or_default());
    }

    fn apply_answers(&self, ids: &[PermissionId]) -> Vec<HostGrant> {
        let answers = lock(&self.answers).clone();
        let mut state = lock(&self.state);

        ids.iter()
            .map(|id| {
                let permission = state.entry(id.clone()).or_default();
                if permission.granted {
                    return HostGrant::granted(id.clone());
                }
                if permission.blocked {
                    return HostGrant::denied(id.clone());
                }
                match answers.get(id).copied().unwrap_or(self.default_answer) {
                    UserAnswer::Grant => {
                        permission.granted = true;
                        permission.rationale = false;
                        HostGrant::granted(id.clone())
                    }
                    UserAnswer::Deny => {
                        permission.rationale = true;
                        HostGrant::denied(id.clone())
                    }
                    UserAnswer::DenyForever => {
                        permission.rationale = false;
                        permission.blocked = true;
                        HostGrant::denied(id.clone())
                    }
                }
            })
            .collect()
    }
}

impl Default for SimulatedGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl HostPermissionGateway for SimulatedGateway {
    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    fn query_granted(&self, id: &PermissionId) -> bool {
        lock(&self.state).get(id).map(|p| p.granted).unwrap_or(false)
    }

    fn should_show_rationale(&self, id: &PermissionId) -> bool {
        lock(&self.state)
            .get(id)
            .map(|p| !p.granted && p.rationale)
            .unwrap_or(false)
    }

    fn request_permissions(
        &self,
        ids: &[PermissionId],
        token: RequestToken,
        responder: HostResponder,
    ) {
        lock(&self.requests).push((token, ids.to_vec()));
        match self.mode {
            ResponseMode::Immediate => {
                let grants = self.apply_answers(ids);
                responder.respond(grants);
            }
            ResponseMode::Deferred => lock(&self.queued).push((ids.to_vec(), responder)),
        }
    }

    fn open_settings(
        &self,
        ids: &[PermissionId],
        token: RequestToken,
        responder: SettingsResponder,
    ) {
        lock(&self.settings_opened).push((token, ids.to_vec()));
        if self.settings_grants.load(Ordering::SeqCst) {
            for id in ids {
                self.entry(id.clone(), |p| {
                    p.granted = true;
                    p.blocked = false;
                    p.rationale = false;
                });
            }
        }
        responder.returned();
    }
}

impl fmt::Debug for SimulatedGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedGateway")
            .field("attached", &self.is_attached())
            .field("mode", &self.mode)
            .field("requests", &self.request_count())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
