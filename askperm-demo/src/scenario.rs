//! Request walkthroughs against the simulated host

use anyhow::Context;
use askperm::audit::{AuditSink, FileAuditSink};
use askperm::gateway::{SimulatedGateway, UserAnswer};
use askperm::permission::{
    CoordinatorBuilder, DenialPolicy, FileStateStore, MemoryStateStore, RationaleTiming,
    RequestOptions,
};
use askperm::{Outcome, PermissionId, RequestToken};
use std::path::PathBuf;
use std::sync::Arc;

/// How the simulated user answers the host prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Answer {
    Grant,
    Deny,
    /// Deny and tick "don't ask again"
    DenyForever,
}

impl From<Answer> for UserAnswer {
    fn from(answer: Answer) -> Self {
        match answer {
            Answer::Grant => UserAnswer::Grant,
            Answer::Deny => UserAnswer::Deny,
            Answer::DenyForever => UserAnswer::DenyForever,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Timing {
    #[default]
    None,
    Before,
    After,
}

impl From<Timing> for RationaleTiming {
    fn from(timing: Timing) -> Self {
        match timing {
            Timing::None => RationaleTiming::None,
            Timing::Before => RationaleTiming::Before,
            Timing::After => RationaleTiming::After,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Policy {
    #[default]
    BatchLevel,
    PerPermission,
}

impl From<Policy> for DenialPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::BatchLevel => DenialPolicy::BatchLevel,
            Policy::PerPermission => DenialPolicy::PerPermission,
        }
    }
}

/// Where first-request history is kept
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Forgotten when the process exits
    Memory,
    File(PathBuf),
    /// Library data directory for the application name
    AppDefault,
}

/// One demo run: host setup plus the batch to request
#[derive(Debug)]
pub struct Scenario {
    pub app_name: String,
    pub permissions: Vec<PermissionId>,
    pub token: RequestToken,
    /// Number of times the batch is requested, each with the next token
    pub rounds: u32,
    pub already_granted: Vec<PermissionId>,
    pub blocked: Vec<PermissionId>,
    pub show_rationale: Vec<PermissionId>,
    pub answers: Vec<(PermissionId, UserAnswer)>,
    pub default_answer: UserAnswer,
    pub settings_grants: bool,
    pub options: RequestOptions,
    pub store: StoreLocation,
    pub audit_log: Option<PathBuf>,
}

impl Scenario {
    pub fn new(permissions: Vec<PermissionId>) -> Self {
        Self {
            app_name: "askperm-demo".to_string(),
            permissions,
            token: RequestToken(100),
            rounds: 1,
            already_granted: Vec::new(),
            blocked: Vec::new(),
            show_rationale: Vec::new(),
            answers: Vec::new(),
            default_answer: UserAnswer::Deny,
            settings_grants: false,
            options: RequestOptions::new(),
            store: StoreLocation::Memory,
            audit_log: None,
        }
    }

    fn host(&self) -> SimulatedGateway {
        let host = SimulatedGateway::new().with_default_answer(self.default_answer);
        for id in &self.already_granted {
            host.grant(id.clone());
        }
        for id in &self.blocked {
            host.block(id.clone());
        }
        for id in &self.show_rationale {
            host.show_rationale_for(id.clone());
        }
        for (id, answer) in &self.answers {
            host.answer(id.clone(), *answer);
        }
        host.settings_grant(self.settings_grants);
        host
    }
}

/// Request the batch `rounds` times and collect the outcomes
pub async fn run(scenario: Scenario) -> anyhow::Result<Vec<Outcome>> {
    let mut builder = CoordinatorBuilder::new()
        .app_name(scenario.app_name.as_str())
        .gateway(scenario.host());

    builder = match &scenario.store {
        StoreLocation::Memory => builder.store(MemoryStateStore::new()),
        StoreLocation::File(path) => builder.store(
            FileStateStore::new(path)
                .with_context(|| format!("opening store at {}", path.display()))?,
        ),
        StoreLocation::AppDefault => builder,
    };

    let audit = match &scenario.audit_log {
        Some(path) => Some(Arc::new(
            FileAuditSink::new(path)
                .with_context(|| format!("opening audit log at {}", path.display()))?,
        )),
        None => None,
    };
    if let Some(audit) = &audit {
        builder = builder.shared_audit(audit.clone());
    }

    let coordinator = builder.build()?;
    let mut outcomes = Vec::new();

    for round in 0..scenario.rounds {
        let token = RequestToken(scenario.token.0.wrapping_add(round as i32));
        tracing::info!(round, token = %token, "Requesting batch");
        let outcome = coordinator
            .request_async(&scenario.permissions, token, scenario.options.clone())
            .await
            .with_context(|| format!("request {token} failed"))?;
        outcomes.push(outcome);
    }

    if let Some(audit) = &audit {
        audit.flush().context("flushing audit log")?;
    }
    Ok(outcomes)
}
