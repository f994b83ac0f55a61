//! askperm demo
//!
//! Requests a batch of permissions from a simulated host and prints how
//! each one was classified. Repeat rounds show how first-request history
//! turns a "don't ask again" denial into a permanent one.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use askperm::permission::{
    AutoRationaleRenderer, RationaleRenderer, RequestOptions, TerminalRationaleRenderer,
};
use askperm::{Outcome, PermissionId, RequestToken};
use askperm_demo::{
    init_subscriber, run, Answer, Policy, Scenario, StoreLocation, Timing, TracingConfig,
    TracingFormat,
};

#[derive(Parser, Debug)]
#[command(name = "askperm-demo")]
#[command(version, about = "Walk through runtime permission requests against a simulated host")]
struct Args {
    /// Permissions to request, e.g. android.permission.CAMERA
    #[arg(required = true)]
    permissions: Vec<String>,

    /// Request token of the first round
    #[arg(long, default_value_t = 100)]
    token: i32,

    /// How many times to request the batch
    #[arg(long, default_value_t = 1)]
    rounds: u32,

    /// Permissions the host already granted
    #[arg(long = "granted", value_name = "PERMISSION")]
    granted: Vec<String>,

    /// Permissions the host will no longer prompt for
    #[arg(long = "blocked", value_name = "PERMISSION")]
    blocked: Vec<String>,

    /// Permissions the host wants a rationale for
    #[arg(long = "rationale-for", value_name = "PERMISSION")]
    rationale_for: Vec<String>,

    /// Per-permission answer, as PERMISSION=grant|deny|deny-forever
    #[arg(long = "answer", value_name = "PERMISSION=ANSWER", value_parser = parse_answer)]
    answers: Vec<(String, Answer)>,

    /// Answer for permissions without an explicit one
    #[arg(long, value_enum, default_value = "deny")]
    default_answer: Answer,

    /// Whether the settings screen grants what it was opened for
    #[arg(long)]
    settings_grants: bool,

    /// When to explain why the permissions are needed
    #[arg(long, value_enum, default_value_t = Timing::None)]
    rationale: Timing,

    /// How a permanently denied permission affects the rest of the batch
    #[arg(long, value_enum, default_value_t = Policy::BatchLevel)]
    policy: Policy,

    /// Offer the settings screen for permanently denied permissions
    #[arg(long)]
    offer_settings: bool,

    /// Ask on the terminal instead of always proceeding
    #[arg(long)]
    interactive: bool,

    /// First-request history file (in-memory when omitted)
    #[arg(long, env = "ASKPERM_STORE", conflicts_with = "app_store")]
    store: Option<PathBuf>,

    /// Keep history in the library data directory for --app-name
    #[arg(long)]
    app_store: bool,

    /// Application name used for the default data directory
    #[arg(long, default_value = "askperm-demo")]
    app_name: String,

    /// Append audit events to this JSONL file
    #[arg(long, env = "ASKPERM_AUDIT_LOG")]
    audit_log: Option<PathBuf>,

    /// Print outcomes as JSON
    #[arg(long)]
    json: bool,

    /// Log filter (overrides RUST_LOG)
    #[arg(long, env = "ASKPERM_LOG")]
    log: Option<String>,

    /// Log line format
    #[arg(long, value_enum, default_value_t = TracingFormat::Compact)]
    log_format: TracingFormat,
}

fn parse_answer(raw: &str) -> Result<(String, Answer), String> {
    let (id, answer) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected PERMISSION=ANSWER, got `{raw}`"))?;
    let answer = <Answer as clap::ValueEnum>::from_str(answer, true)?;
    Ok((id.to_string(), answer))
}

fn ids(raw: &[String]) -> Vec<PermissionId> {
    raw.iter().map(PermissionId::new).collect()
}

impl Args {
    fn options(&self) -> RequestOptions {
        let renderer: Arc<dyn RationaleRenderer> = if self.interactive {
            Arc::new(TerminalRationaleRenderer::new())
        } else {
            Arc::new(AutoRationaleRenderer::always_proceed())
        };
        RequestOptions::new()
            .with_timing(self.rationale.into())
            .with_denial_policy(self.policy.into())
            .offer_settings(self.offer_settings)
            .with_renderer(renderer)
    }

    fn into_scenario(self) -> Scenario {
        let options = self.options();
        let store = match (self.store, self.app_store) {
            (Some(path), _) => StoreLocation::File(path),
            (None, true) => StoreLocation::AppDefault,
            (None, false) => StoreLocation::Memory,
        };

        let mut scenario = Scenario::new(ids(&self.permissions));
        scenario.app_name = self.app_name;
        scenario.token = RequestToken(self.token);
        scenario.rounds = self.rounds.max(1);
        scenario.already_granted = ids(&self.granted);
        scenario.blocked = ids(&self.blocked);
        scenario.show_rationale = ids(&self.rationale_for);
        scenario.answers = self
            .answers
            .into_iter()
            .map(|(id, answer)| (PermissionId::new(id), answer.into()))
            .collect();
        scenario.default_answer = self.default_answer.into();
        scenario.settings_grants = self.settings_grants;
        scenario.options = options;
        scenario.store = store;
        scenario.audit_log = self.audit_log;
        scenario
    }
}

fn print_outcome(outcome: &Outcome) {
    println!("request {}", outcome.token);
    for (label, ids) in [
        ("granted", &outcome.granted),
        ("denied", &outcome.denied),
        ("permanently denied", &outcome.permanently_denied),
    ] {
        if !ids.is_empty() {
            let names: Vec<&str> = ids.iter().map(PermissionId::as_str).collect();
            println!("  {label}: {}", names.join(", "));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_subscriber(&TracingConfig {
        filter: args.log.clone(),
        format: args.log_format,
        ..Default::default()
    })?;

    let json = args.json;
    let outcomes = run(args.into_scenario()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    } else {
        outcomes.iter().for_each(print_outcome);
    }
    Ok(())
}
