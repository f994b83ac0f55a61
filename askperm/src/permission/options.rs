//! Per-request configuration

use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

use super::classifier::DenialPolicy;
use super::rationale::{RationaleRenderer, RationaleTiming};

/// Options passed once with every request
///
/// Everything except the renderer can be loaded from configuration:
///
/// ```rust
/// use askperm::permission::{DenialPolicy, RationaleTiming, RequestOptions};
///
/// let options: RequestOptions =
///     serde_json::from_str(r#"{"rationale_timing": "after", "offer_settings": true}"#).unwrap();
/// assert_eq!(options.rationale_timing, RationaleTiming::After);
/// assert_eq!(options.denial_policy, DenialPolicy::BatchLevel);
/// ```
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    /// When to show the rationale
    pub rationale_timing: RationaleTiming,
    /// How permanent denials affect the batch
    pub denial_policy: DenialPolicy,
    /// Offer the settings screen for permanently denied permissions
    pub offer_settings: bool,
    /// Renderer used for rationale and settings dialogs
    #[serde(skip)]
    pub renderer: Option<Arc<dyn RationaleRenderer>>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show the rationale before prompting
    pub fn reason_before(mut self, renderer: impl RationaleRenderer + 'static) -> Self {
        self.rationale_timing = RationaleTiming::Before;
        self.renderer = Some(Arc::new(renderer));
        self
    }

    /// Show the rationale after a denial
    pub fn reason_after(mut self, renderer: impl RationaleRenderer + 'static) -> Self {
        self.rationale_timing = RationaleTiming::After;
        self.renderer = Some(Arc::new(renderer));
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn RationaleRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_timing(mut self, timing: RationaleTiming) -> Self {
        self.rationale_timing = timing;
        self
    }

    pub fn with_denial_policy(mut self, policy: DenialPolicy) -> Self {
        self.denial_policy = policy;
        self
    }

    pub fn offer_settings(mut self, offer: bool) -> Self {
        self.offer_settings = offer;
        self
    }

    /// Renderer to use for the configured timing, if any
    pub(crate) fn timed_renderer(
        &self,
        timing: RationaleTiming,
    ) -> Option<&Arc<dyn RationaleRenderer>> {
        if self.rationale_timing == timing {
            self.renderer.as_ref()
        } else {
            None
        }
    }

    pub(crate) fn settings_renderer(&self) -> Option<&Arc<dyn RationaleRenderer>> {
        if self.offer_settings {
            self.renderer.as_ref()
        } else {
            None
        }
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("rationale_timing", &self.rationale_timing)
            .field("denial_policy", &self.denial_policy)
            .field("offer_settings", &self.offer_settings)
            .field("renderer", &self.renderer.is_some())
            .finish()
    }
}
