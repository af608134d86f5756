//! Error handling and display for the CLI.

use colored::Colorize;
use regmirror_mirror::{SyncError, TransferError};
use regmirror_registry::ResolutionError;
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{failed} of {total} syncs failed")]
    SyncFailures { failed: usize, total: usize },

    #[error("{failed} health check(s) failed")]
    Unhealthy { failed: usize },
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    if let Some(hint) = hint_for(err) {
        eprintln!("\n{}", format!("Hint: {hint}").yellow());
    }
}

fn hint_for(err: &anyhow::Error) -> Option<&'static str> {
    if let Some(sync_err) = err.downcast_ref::<SyncError>() {
        return match sync_err {
            SyncError::Resolution(ResolutionError::InvalidReference { .. }) => {
                Some("Image references look like `name`, `name:tag` or `org/name:tag`.")
            }
            SyncError::Resolution(ResolutionError::NotFound { .. }) => {
                Some("Check the image name and tag exist in the source registry.")
            }
            SyncError::Resolution(ResolutionError::Unsupported { .. }) => {
                Some("Only single-platform Docker v2 and OCI manifests can be mirrored.")
            }
            SyncError::Resolution(ResolutionError::Transport { .. }) => {
                Some("Check your network connection and the source registry address.")
            }
            SyncError::Transfer {
                source: TransferError::Push { .. },
                ..
            } => Some("Check the target registry is running. Try `regmirror health`."),
            SyncError::InProgress { .. } => Some("Wait for the running sync to finish."),
            _ => None,
        };
    }

    match err.downcast_ref::<CliError>() {
        Some(CliError::Unhealthy { .. }) => {
            Some("Start a local registry with `docker run -d -p 5000:5000 registry:2`.")
        }
        Some(CliError::SyncFailures { .. }) => Some("Run `regmirror status` for details."),
        None => None,
    }
}
