use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facebadge_core::Action;
use facebadge_upload::{format_time, retry_pending, BackupStore, Deliver, HttpDelivery, Payload};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "facebadge", about = "facebadge attendance kiosk tools", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Retry every pending upload in the backup store
    Retry {
        /// Attendance endpoint URL; only needed when uploads are pending
        #[arg(long, env = "REMOTE_ENDPOINT_URL")]
        endpoint: Option<String>,
        /// Backup store directory
        #[arg(long, env = "FACEBADGE_BACKUP_DIR", default_value = "failed_uploads")]
        backup_dir: PathBuf,
    },
    /// List uploads waiting in the backup store
    Pending {
        /// Backup store directory
        #[arg(long, env = "FACEBADGE_BACKUP_DIR", default_value = "failed_uploads")]
        backup_dir: PathBuf,
        /// Print the raw records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Send a login for NAME with IMAGE to check the endpoint
    TestUpload {
        /// Attendance endpoint URL
        #[arg(long, env = "REMOTE_ENDPOINT_URL")]
        endpoint: String,
        /// Name to report
        #[arg(short, long)]
        name: String,
        /// Image sent as both the current and the badge photo
        #[arg(short, long)]
        image: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Retry { endpoint, backup_dir } => {
            let store = BackupStore::new(backup_dir);
            let pending = store
                .load()
                .await
                .with_context(|| format!("failed to read {}", store.store_path().display()))?;
            let Some(endpoint) = retry_endpoint(pending.len(), endpoint)? else {
                println!("No pending uploads.");
                return Ok(());
            };

            let delivery = HttpDelivery::new(endpoint).context("failed to build HTTP client")?;
            let summary = retry_pending(&store, &delivery)
                .await
                .with_context(|| format!("failed to process {}", store.store_path().display()))?;

            if summary.attempted == 0 {
                println!("No pending uploads.");
            } else {
                println!("Uploaded:      {}", summary.uploaded.len());
                println!("Still pending: {}", summary.still_pending.len());
                for record in &summary.still_pending {
                    println!("  {} {} at {}: {}", record.action.as_str(), record.name, record.time, record.error);
                }
                let added = summary.backlog.saturating_sub(summary.still_pending.len());
                if added > 0 {
                    println!("Queued meanwhile: {added}");
                }
            }
        }
        Commands::Pending { backup_dir, json } => {
            let store = BackupStore::new(backup_dir);
            let records = store
                .load()
                .await
                .with_context(|| format!("failed to read {}", store.store_path().display()))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No pending uploads.");
            } else {
                println!("{:<8} {:<20} {:<26} ERROR", "ACTION", "NAME", "TIME");
                for record in &records {
                    println!(
                        "{:<8} {:<20} {:<26} {}",
                        record.action.as_str(),
                        record.name,
                        record.time,
                        record.error
                    );
                }
            }
        }
        Commands::TestUpload { endpoint, name, image } => {
            if !image.is_file() {
                bail!("image not found: {}", image.display());
            }
            let delivery = HttpDelivery::new(endpoint).context("failed to build HTTP client")?;
            let time = format_time(chrono::Utc::now());
            let payload = Payload::from_files(Action::Login, &name, &time, Some(&image), Some(&image)).await?;

            println!("Posting login for {name} to {}", delivery.endpoint());
            delivery
                .deliver(&payload)
                .await
                .with_context(|| format!("upload to {} failed", delivery.endpoint()))?;
            println!("Upload accepted.");
        }
    }

    Ok(())
}

/// Endpoint for a retry pass; `None` when nothing is pending, so an empty
/// store never needs one.
fn retry_endpoint(pending: usize, endpoint: Option<String>) -> Result<Option<String>> {
    if pending == 0 {
        return Ok(None);
    }
    match endpoint.filter(|e| !e.trim().is_empty()) {
        Some(endpoint) => Ok(Some(endpoint)),
        None => bail!("{pending} uploads pending but no endpoint given (--endpoint or REMOTE_ENDPOINT_URL)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_parses_without_endpoint() {
        let cli = Cli::try_parse_from(["facebadge", "retry", "--backup-dir", "/nonexistent"]).unwrap();
        assert!(matches!(cli.command, Commands::Retry { .. }));
    }

    #[test]
    fn test_retry_endpoint_not_needed_when_nothing_pending() {
        assert!(retry_endpoint(0, None).unwrap().is_none());
        assert!(retry_endpoint(0, Some("http://x".into())).unwrap().is_none());
    }

    #[test]
    fn test_retry_endpoint_required_with_backlog() {
        let err = retry_endpoint(2, None).unwrap_err();
        assert!(err.to_string().contains("2 uploads pending"));
        assert!(retry_endpoint(1, Some("  ".into())).is_err());
        assert_eq!(retry_endpoint(1, Some("http://x".into())).unwrap().as_deref(), Some("http://x"));
    }
}
