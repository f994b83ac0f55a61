//! Rationale hooks shown around the host prompt
//!
//! Rendering is delegated: hosts implement [`RationaleRenderer`] with
//! whatever UI they have. The coordinator only needs the user's decision.

use askperm_api::{PermissionId, RequestToken};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// When the rationale is shown relative to the host prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RationaleTiming {
    /// Never show a rationale
    #[default]
    None,
    /// Explain before the host prompt; aborting skips the prompt
    Before,
    /// Explain after a denial; proceeding prompts again
    After,
}

/// Error type for rationale rendering
#[derive(Debug, Error)]
pub enum RationaleError {
    #[error("Rationale dismissed without a decision")]
    Dismissed,

    #[error("Non-interactive environment")]
    NonInteractive,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// User's answer to a rationale or settings dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RationaleDecision {
    /// Continue: prompt (again) or open the settings screen
    Proceed,
    /// Stop and deliver the current state
    #[default]
    Abort,
}

impl RationaleDecision {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed)
    }
}

/// Trait for rendering rationale dialogs
///
/// Both methods are called synchronously by the coordinator, never while
/// it holds internal locks.
pub trait RationaleRenderer: Send + Sync {
    /// Explain why `permissions` are needed
    fn show_reason(
        &self,
        token: RequestToken,
        permissions: &[PermissionId],
    ) -> Result<RationaleDecision, RationaleError>;

    /// Offer to open the system settings for permanently denied permissions
    fn show_settings(
        &self,
        token: RequestToken,
        permissions: &[PermissionId],
    ) -> Result<RationaleDecision, RationaleError> {
        let _ = (token, permissions);
        Ok(RationaleDecision::Abort)
    }
}

// ============================================================================
// Terminal Renderer
// ============================================================================

/// Terminal-based renderer reading a yes/no answer from stdin
#[derive(Debug, Default)]
pub struct TerminalRationaleRenderer {
    /// Skip the interactivity check (for piped demo input)
    force: bool,
}

impl TerminalRationaleRenderer {
    pub fn new() -> Self {
        Self { force: false }
    }

    /// Read answers even when stdin is not a terminal
    pub fn forced() -> Self {
        Self { force: true }
    }

    fn ask(
        &self,
        headline: &str,
        permissions: &[PermissionId],
        question: &str,
    ) -> Result<RationaleDecision, RationaleError> {
        if !self.force && !io::stdin().is_terminal() {
            return Err(RationaleError::NonInteractive);
        }

        let mut stdout = io::stdout();
        writeln!(stdout)?;
        writeln!(stdout, "{}", headline)?;
        for permission in permissions {
            writeln!(stdout, "  - {}", permission)?;
        }
        write!(stdout, "{} [y]es / [n]o: ", question)?;
        stdout.flush()?;

        let mut input = String::new();
        let read = io::stdin().lock().read_line(&mut input)?;
        if read == 0 {
            return Err(RationaleError::Dismissed);
        }

        match input.trim().to_lowercase().as_str() {
            "y" | "yes" => Ok(RationaleDecision::Proceed),
            _ => Ok(RationaleDecision::Abort),
        }
    }
}

impl RationaleRenderer for TerminalRationaleRenderer {
    fn show_reason(
        &self,
        _token: RequestToken,
        permissions: &[PermissionId],
    ) -> Result<RationaleDecision, RationaleError> {
        self.ask(
            "This feature needs the following permissions to continue:",
            permissions,
            "Allow?",
        )
    }

    fn show_settings(
        &self,
        _token: RequestToken,
        permissions: &[PermissionId],
    ) -> Result<RationaleDecision, RationaleError> {
        self.ask(
            "These permissions were denied and will not be asked again:",
            permissions,
            "Open settings?",
        )
    }
}

// ============================================================================
// Auto Renderer
// ============================================================================

/// Renderer answering every dialog with a fixed decision
#[derive(Debug, Clone, Copy)]
pub struct AutoRationaleRenderer {
    reason: RationaleDecision,
    settings: RationaleDecision,
}

impl AutoRationaleRenderer {
    pub fn always_proceed() -> Self {
        Self {
            reason: RationaleDecision::Proceed,
            settings: RationaleDecision::Proceed,
        }
    }

    pub fn always_abort() -> Self {
        Self {
            reason: RationaleDecision::Abort,
            settings: RationaleDecision::Abort,
        }
    }

    pub fn with_decisions(reason: RationaleDecision, settings: RationaleDecision) -> Self {
        Self { reason, settings }
    }
}

impl RationaleRenderer for AutoRationaleRenderer {
    fn show_reason(
        &self,
        _token: RequestToken,
        _permissions: &[PermissionId],
    ) -> Result<RationaleDecision, RationaleError> {
        Ok(self.reason)
    }

    fn show_settings(
        &self,
        _token: RequestToken,
        _permissions: &[PermissionId],
    ) -> Result<RationaleDecision, RationaleError> {
        Ok(self.settings)
    }
}

// ============================================================================
// Recording Renderer (for testing)
// ============================================================================

/// Which dialog was shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RationaleKind {
    Reason,
    Settings,
}

/// A recorded dialog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRationale {
    pub kind: RationaleKind,
    pub token: RequestToken,
    pub permissions: Vec<PermissionId>,
}

/// Renderer that records every dialog it is asked to show
#[derive(Debug)]
pub struct RecordingRationaleRenderer {
    shown: Mutex<Vec<RecordedRationale>>,
    decisions: AutoRationaleRenderer,
}

impl RecordingRationaleRenderer {
    pub fn new(reason: RationaleDecision, settings: RationaleDecision) -> Self {
        Self {
            shown: Mutex::new(Vec::new()),
            decisions: AutoRationaleRenderer::with_decisions(reason, settings),
        }
    }

    pub fn proceeding() -> Self {
        Self::new(RationaleDecision::Proceed, RationaleDecision::Proceed)
    }

    pub fn aborting() -> Self {
        Self::new(RationaleDecision::Abort, RationaleDecision::Abort)
    }

    /// All recorded dialogs
    pub fn shown(&self) -> Vec<RecordedRationale> {
        self.shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded dialogs of a kind
    pub fn count(&self, kind: RationaleKind) -> usize {
        self.shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }

    fn record(&self, kind: RationaleKind, token: RequestToken, permissions: &[PermissionId]) {
        self.shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRationale {
                kind,
                token,
                permissions: permissions.to_vec(),
            });
    }
}

impl RationaleRenderer for RecordingRationaleRenderer {
    fn show_reason(
        &self,
        token: RequestToken,
        permissions: &[PermissionId],
    ) -> Result<RationaleDecision, RationaleError> {
        self.record(RationaleKind::Reason, token, permissions);
        self.decisions.show_reason(token, permissions)
    }

    fn show_settings(
        &self,
        token: RequestToken,
        permissions: &[PermissionId],
    ) -> Result<RationaleDecision, RationaleError> {
        self.record(RationaleKind::Settings, token, permissions);
        self.decisions.show_settings(token, permissions)
    }
}
