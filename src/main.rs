//! checkin - operator scanning station
//!
//! Reads decoded QR text line by line from standard input (a keyboard-mode
//! hardware scanner, or a decoder piped in) and records attendance for the
//! selected group.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use attendance_checkin::{
    api::{Credentials, HttpBackend},
    config::Config,
    models::{ScanOutcome, ScanStatus},
    scanner::{LineCamera, OperatorNotice, ScanSession},
    services::{IdentityCodec, ScanHistory, SubmissionClient},
};

const CONFIG_PATH: &str = "checkin.yml";

/// Parse `--group <id>` / `--group=<id>`
fn group_arg(mut args: impl Iterator<Item = String>) -> Result<Option<String>> {
    while let Some(arg) = args.next() {
        if arg == "--group" {
            return match args.next() {
                Some(group) => Ok(Some(group)),
                None => bail!("--group needs a value"),
            };
        }
        if let Some(group) = arg.strip_prefix("--group=") {
            return Ok(Some(group.to_string()));
        }
        bail!("Unknown argument: {}", arg);
    }
    Ok(None)
}

fn print_notice(notice: &OperatorNotice) {
    match notice {
        OperatorNotice::Outcome(attempt) => {
            let who = attempt
                .student_name
                .as_deref()
                .unwrap_or(attempt.subject_id.as_str());
            if attempt.outcome.is_failure() {
                println!(
                    "FAILED    {} ({}: {})",
                    who,
                    attempt.outcome,
                    attempt.message.as_deref().unwrap_or("-")
                );
            } else if attempt.outcome == ScanOutcome::DuplicateSuppressed {
                println!("ALREADY   {}", who);
            } else {
                println!("OK        {}", who);
            }
        }
        OperatorNotice::MissingTargetGroup { .. } => {
            println!("NO GROUP  select a group with --group before scanning")
        }
        OperatorNotice::CameraFailed(e) => println!("STOPPED   {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "attendance_checkin=info,checkin=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    let mut config = Config::load_with_env(Path::new(CONFIG_PATH))?;
    if let Some(group) = group_arg(std::env::args().skip(1))? {
        config.scanner.target_group = Some(group);
    }
    tracing::info!("Configuration loaded, backend {}", config.api.base_url);

    let credentials = Credentials::resolve(&config.api).context("Failed to read API token")?;
    if credentials.token().is_none() {
        tracing::warn!("No API token configured; the backend will likely refuse scans");
    }
    let backend = HttpBackend::new(&config.api, credentials)?;

    let history = Arc::new(ScanHistory::new(config.scanner.history_capacity));
    let submitter = Arc::new(
        SubmissionClient::new(Arc::new(backend), history)
            .with_retry_backoff(config.scanner.retry_backoff()),
    );
    let codec = Arc::new(IdentityCodec::from_config(&config.scanner)?);

    let session = ScanSession::new(
        Arc::new(LineCamera::stdin()),
        codec,
        submitter,
        &config.scanner,
    );
    let mut notices = session.subscribe_notices();
    let mut status = session.subscribe_status();

    session.start().await?;
    match session.target_group() {
        Some(group) => tracing::info!("Scanning for group {}", group),
        None => tracing::warn!("No target group selected"),
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            notice = notices.recv() => match notice {
                Ok(notice) => {
                    print_notice(&notice);
                    // nothing follows a camera failure until a restart
                    if matches!(notice, OperatorNotice::CameraFailed(_)) {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Missed {} operator notices", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            changed = status.changed() => {
                if changed.is_err() || *status.borrow_and_update() == ScanStatus::Closed {
                    break;
                }
            }
        }
    }

    // flush what is already queued
    while let Ok(notice) = notices.try_recv() {
        print_notice(&notice);
    }

    let accepted = session
        .history()
        .iter()
        .filter(|a| a.outcome == ScanOutcome::Accepted)
        .count();
    session.stop().await;
    tracing::info!("Session ended, {} scans accepted", accepted);
    Ok(())
}
