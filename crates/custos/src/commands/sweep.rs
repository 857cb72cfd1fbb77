//! Sweep command - run one validation sweep over a populated session manager.
//!
//! Builds the store and manager described by the loaded config, seeds it
//! with active, idle and stopped sessions, and reports what the sweep did.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use chrono::Utc;
use clap::Args;
use tracing::info;

use custos_session::{
    DEFAULT_GLOBAL_SESSION_TIMEOUT, Session, SessionContext, SessionManager, SessionStore,
    StoreKind, SweepReport, ValidatingSessionManager,
};

use super::Context;

/// Arguments for the sweep command.
#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Active sessions to start through the manager
    #[arg(long, default_value_t = 10)]
    pub active: usize,

    /// Sessions whose last access lies beyond their idle timeout
    #[arg(long, default_value_t = 0)]
    pub idle: usize,

    /// Sessions already stopped before the sweep
    #[arg(long, default_value_t = 0)]
    pub stopped: usize,

    /// Store to use (memory, cache); overrides the config file
    #[arg(long)]
    pub store: Option<StoreKind>,

    /// Idle timeout in seconds for new sessions, zero or negative for none;
    /// overrides the config file
    #[arg(long, allow_negative_numbers = true)]
    pub timeout_secs: Option<i64>,

    /// Milliseconds to wait before sweeping
    #[arg(long, default_value_t = 0)]
    pub wait_ms: u64,
}

/// Run the sweep command.
pub async fn run(args: SweepArgs, ctx: &Context) -> Result<()> {
    let loaded = custos_config::load_config(None)?;
    for warning in &loaded.warnings {
        tracing::warn!("{warning}");
    }
    let config = &loaded.config;

    // This command drives the sweep itself.
    let mut manager_config = config.manager_config().with_validation_scheduler(false);
    if let Some(secs) = args.timeout_secs {
        manager_config = match custos_config::session_timeout_from_secs(secs) {
            Some(timeout) => manager_config.with_global_session_timeout(timeout),
            None => manager_config.without_session_timeout(),
        };
    }
    // Idle seeds always carry a timeout so they have something to exceed.
    let idle_timeout = manager_config
        .global_session_timeout
        .unwrap_or(DEFAULT_GLOBAL_SESSION_TIMEOUT);

    let kind = args.store.unwrap_or_else(|| config.store_kind());
    let store = kind.build(config.cache_config());
    let manager = SessionManager::builder(Arc::clone(&store))
        .config(manager_config)
        .build();

    for _ in 0..args.active {
        manager
            .create_session(&SessionContext::new().with_host("127.0.0.1"))
            .await
            .context("failed to start session")?;
    }

    let last_access = Utc::now()
        - chrono::Duration::from_std(idle_timeout)?
        - chrono::Duration::seconds(1);
    for _ in 0..args.idle {
        let mut session = Session::started_at(last_access).with_timeout(Some(idle_timeout));
        store.create(&mut session).await?;
    }

    for _ in 0..args.stopped {
        let mut session = Session::new().with_timeout(Some(idle_timeout));
        session.stop();
        store.create(&mut session).await?;
    }

    info!(
        store = %kind,
        active = args.active,
        idle = args.idle,
        stopped = args.stopped,
        "Seeded session store"
    );

    if args.wait_ms > 0 {
        tokio::time::sleep(Duration::from_millis(args.wait_ms)).await;
    }

    let report = manager.validate_sessions().await?;
    let remaining = manager.active_session_count().await?;
    manager.destroy().await;

    print_report(&report, remaining, kind, ctx)
}

fn print_report(
    report: &SweepReport,
    remaining: usize,
    kind: StoreKind,
    ctx: &Context,
) -> Result<()> {
    if ctx.json_output {
        let value = serde_json::json!({
            "store": kind.to_string(),
            "checked": report.checked,
            "invalidated": report.invalidated(),
            "expired": report.expired,
            "stopped": report.stopped,
            "failed": report.failed,
            "interrupted": report.interrupted,
            "remaining": remaining,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Sweep ({kind} store): {report}");
    println!("{remaining} session record(s) remain");
    Ok(())
}
