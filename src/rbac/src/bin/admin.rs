//! Rehab RBAC admin tool
//!
//! Loads an engine configuration and an optional JSON snapshot, then
//! answers permission checks and prints audit, anomaly and role reports.

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use tracing::info;

use rehab_rbac::{
    AccessControlEngine, AuditEventType, AuditFilter, Context, EngineConfig, Snapshot,
};

/// Rehab RBAC admin CLI
#[derive(Parser)]
#[command(name = "rbac-admin")]
#[command(about = "Inspect and query a Rehab RBAC engine snapshot")]
#[command(version)]
struct Cli {
    /// Path to engine configuration (TOML)
    #[arg(short, long, env = "RBAC_CONFIG")]
    config: Option<PathBuf>,

    /// Snapshot to import before running the command
    #[arg(short, long, env = "RBAC_SNAPSHOT")]
    snapshot: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check whether a user holds a permission
    Check {
        user: String,
        permission: String,

        /// Context attribute as key=value (value parsed as JSON when possible)
        #[arg(long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,
    },

    /// List a user's effective roles and permissions
    User { user: String },

    /// List roles with their inherited permissions
    Roles,

    /// Print audit log entries
    Audit {
        /// Only entries of this type (e.g. ROLE_DELETED)
        #[arg(long = "type")]
        event_type: Option<String>,

        /// Keep only the most recent N entries
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Print the anomaly report
    Anomalies,

    /// Print decision metrics in Prometheus format
    Metrics,

    /// Write the engine state to a snapshot file
    Export {
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},rehab_rbac=info", log_level).into()),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let engine = AccessControlEngine::new(config)
        .await
        .context("initializing engine")?;

    if let Some(path) = &cli.snapshot {
        let snapshot = Snapshot::load(path)
            .with_context(|| format!("reading snapshot {}", path.display()))?;
        engine
            .import_data(snapshot)
            .await
            .context("importing snapshot")?;
        info!("Imported snapshot from {:?}", path);
    }

    match cli.command {
        Command::Check {
            user,
            permission,
            context,
        } => {
            let context = parse_context(&context)?;
            let granted = engine.has_permission(&user, &permission, &context).await?;
            println!("{}", if granted { "ALLOW" } else { "DENY" });
        }
        Command::User { user } => {
            for user_role in engine.get_user_roles(&user).await? {
                let expires = user_role
                    .assignment
                    .expires_at
                    .map_or_else(|| "never".to_string(), |at| at.to_rfc3339());
                println!("role {} (expires {})", user_role.role.id, expires);
            }
            let permissions = engine
                .get_user_effective_permissions(&user, &Context::new())
                .await?;
            for permission in permissions {
                println!("  {}", permission);
            }
        }
        Command::Roles => {
            for role in engine.get_all_roles().await? {
                let permissions = engine.get_role_permissions(&role.id, true).await?;
                println!(
                    "{:<16} level={:<4} parent={:<12} permissions={}",
                    role.id,
                    role.level,
                    role.parent_role.as_deref().unwrap_or("-"),
                    permissions.into_iter().collect::<Vec<_>>().join(",")
                );
            }
        }
        Command::Audit { event_type, limit } => {
            let mut filter = AuditFilter::new();
            if let Some(event_type) = event_type {
                filter = filter.event_type(parse_event_type(&event_type)?);
            }
            if let Some(limit) = limit {
                filter = filter.limit(limit);
            }
            for entry in engine.get_audit_log(&filter).await? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
        Command::Anomalies => {
            println!(
                "{}",
                serde_json::to_string_pretty(&engine.get_anomaly_report())?
            );
        }
        Command::Metrics => {
            print!("{}", engine.export_metrics().await);
        }
        Command::Export { output } => {
            engine
                .export_data()
                .await?
                .save(&output)
                .with_context(|| format!("writing snapshot to {}", output.display()))?;
            info!("Snapshot written to {:?}", output);
        }
    }

    engine.shutdown().await;
    Ok(())
}

/// Parse `key=value` pairs into a request context
fn parse_context(pairs: &[String]) -> Result<Context> {
    let mut context = Context::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("context attribute '{}' is not KEY=VALUE", pair);
        };
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        context.insert(key.to_string(), value);
    }
    Ok(context)
}

fn parse_event_type(name: &str) -> Result<AuditEventType> {
    serde_json::from_value(Value::String(name.to_uppercase()))
        .with_context(|| format!("unknown audit event type '{}'", name))
}
