//! Health command - registry reachability and local state checks.

use std::fs;
use std::path::Path;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use regmirror_ledger::SqliteLedger;
use regmirror_registry::{RegistryClient, RegistryConfig, StatusCode};
use serde::Serialize;
use tabled::Tabled;

use crate::error::CliError;
use crate::output::print_output;

use super::CommandContext;

/// Health command.
#[derive(Debug, Args)]
pub struct HealthCommand {}

#[derive(Debug, Serialize, Tabled)]
struct Check {
    #[tabled(rename = "Check")]
    name: String,

    #[tabled(rename = "Status", display = "display_healthy")]
    healthy: bool,

    #[tabled(rename = "Detail")]
    detail: String,
}

fn display_healthy(healthy: &bool) -> String {
    if *healthy {
        "ok".green().to_string()
    } else {
        "failed".red().to_string()
    }
}

impl Check {
    fn new(name: impl Into<String>, result: Result<String, String>) -> Self {
        let (healthy, detail) = match result {
            Ok(detail) => (true, detail),
            Err(detail) => (false, detail),
        };
        Self {
            name: name.into(),
            healthy,
            detail,
        }
    }
}

impl HealthCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let checks = vec![
            Check::new(
                "target registry",
                probe_registry(ctx.config.target_config()).await,
            ),
            Check::new(
                "source registry",
                probe_registry(ctx.config.source_config()).await,
            ),
            Check::new("ledger", probe_ledger(&ctx.config.ledger_path)),
            Check::new("working directory", probe_writable(Path::new("."))),
        ];

        print_output(&checks, ctx.format);

        let failed = checks.iter().filter(|c| !c.healthy).count();
        if failed > 0 {
            return Err(CliError::Unhealthy { failed }.into());
        }
        Ok(())
    }
}

/// `/v2/` answering 200 or 401 means the registry API is up.
async fn probe_registry(config: RegistryConfig) -> Result<String, String> {
    let client = RegistryClient::new(config).map_err(|e| e.to_string())?;
    match client.ping().await {
        Ok(status) if is_healthy_status(status) => Ok(format!("{} ({status})", client.base_url())),
        Ok(status) => Err(format!("{} returned {status}", client.base_url())),
        Err(e) => Err(format!("{}: {e}", client.base_url())),
    }
}

fn is_healthy_status(status: StatusCode) -> bool {
    status == StatusCode::OK || status == StatusCode::UNAUTHORIZED
}

fn probe_ledger(path: &Path) -> Result<String, String> {
    SqliteLedger::open(path)
        .map(|_| path.display().to_string())
        .map_err(|e| format!("{}: {e}", path.display()))
}

fn probe_writable(dir: &Path) -> Result<String, String> {
    let probe = dir.join(".regmirror-health");
    fs::write(&probe, b"ok")
        .and_then(|_| fs::remove_file(&probe))
        .map(|_| "writable".to_string())
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_healthy_statuses() {
        assert!(is_healthy_status(StatusCode::OK));
        assert!(is_healthy_status(StatusCode::UNAUTHORIZED));
        assert!(!is_healthy_status(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[test]
    fn test_local_probes() {
        let dir = TempDir::new().unwrap();
        assert!(probe_writable(dir.path()).is_ok());
        assert!(probe_ledger(&dir.path().join("ledger.db")).is_ok());
        assert!(probe_writable(&dir.path().join("missing")).is_err());
    }
}
