//! formbox-storage: operational tooling for the file subsystem.
//!
//! Reads the same environment as the application (see `.env`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use formbox_cli::{init_tracing, parse_duration};
use formbox_core::Config;
use formbox_db::PgFileRegistry;
use formbox_services::{CleanupScheduler, CleanupService, MigrationService};
use formbox_storage::{create_storage, ShareTokenSigner};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "formbox-storage", about = "Formbox file storage tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy stored files between the local directory and S3
    Migrate {
        #[command(subcommand)]
        sub: MigrateCommands,
    },
    /// Run one orphan cleanup sweep
    Cleanup {
        /// Report orphans without deleting them
        #[arg(long)]
        dry_run: bool,
    },
    /// Run startup migration, then the cleanup scheduler until interrupted
    Serve,
    /// Share token tooling
    Token {
        #[command(subcommand)]
        sub: TokenCommands,
    },
}

#[derive(Subcommand)]
enum MigrateCommands {
    /// Local directory -> S3 (writes the completion marker)
    ToS3,
    /// S3 -> local directory
    ToLocal,
    /// Show whether the completion marker is present
    Status,
    /// Remove the completion marker
    Reset,
}

#[derive(Subcommand)]
enum TokenCommands {
    /// Mint a token for a stored path
    Generate {
        /// Stored relative path, e.g. files/2025/01/abcd1234_report.pdf
        path: String,
        /// Lifetime, e.g. 30m, 2h, 7d
        #[arg(long, default_value = "1h", value_parser = parse_duration)]
        ttl: Duration,
    },
    /// Check a token against a stored path
    Validate { path: String, token: String },
    /// Show the expiry encoded in a token (unverified)
    Expiry { token: String },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize result")?;
    println!("{}", out);
    Ok(())
}

fn signer(config: &Config) -> anyhow::Result<ShareTokenSigner> {
    let secret = config
        .share_token_secret
        .as_deref()
        .context("SHARE_TOKEN_SECRET must be set")?;
    Ok(ShareTokenSigner::new(secret)?)
}

async fn cleanup_service(config: &Config, dry_run: bool) -> anyhow::Result<CleanupService> {
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set for cleanup")?;
    let registry = PgFileRegistry::connect(database_url)
        .await
        .context("Failed to connect to database")?;
    let storage = create_storage(config)
        .await
        .context("Failed to initialize storage backend")?;

    let mut cleanup = config.cleanup.clone();
    cleanup.dry_run |= dry_run;
    Ok(CleanupService::new(Arc::new(registry), storage, cleanup))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    match cli.command {
        Commands::Migrate { sub } => {
            let service = MigrationService::from_config(&config)
                .await
                .context("Failed to initialize storage backends")?;
            match sub {
                MigrateCommands::ToS3 => {
                    let result = service
                        .migrate_local_to_remote()
                        .await
                        .context("Migration to S3 failed")?;
                    print_json(&result)?;
                }
                MigrateCommands::ToLocal => {
                    let result = service
                        .migrate_remote_to_local()
                        .await
                        .context("Migration to local storage failed")?;
                    print_json(&result)?;
                }
                MigrateCommands::Status => {
                    print_json(&serde_json::json!({
                        "migration_complete": service.is_migration_complete().await,
                    }))?;
                }
                MigrateCommands::Reset => {
                    let removed = service.clear_marker().await?;
                    print_json(&serde_json::json!({ "marker_removed": removed }))?;
                }
            }
        }
        Commands::Cleanup { dry_run } => {
            let service = cleanup_service(&config, dry_run).await?;
            let result = service.run_cleanup().await.context("Cleanup failed")?;
            print_json(&result)?;
        }
        Commands::Serve => {
            if let Some(result) = MigrationService::migrate_on_startup(&config)
                .await
                .context("Startup migration failed")?
            {
                tracing::info!(
                    migrated = result.migrated,
                    failed = result.failed,
                    "Startup migration finished"
                );
            }

            let service = cleanup_service(&config, false).await?;
            let scheduler = CleanupScheduler::new(Arc::new(service));
            scheduler.start().await;

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutdown signal received");
            scheduler.stop().await;
        }
        Commands::Token { sub } => match sub {
            TokenCommands::Generate { path, ttl } => {
                let signer = signer(&config)?;
                let token = signer.generate_token(&path, ttl);
                let expires_at = ShareTokenSigner::expiration(&token)?;
                print_json(&serde_json::json!({
                    "path": path,
                    "token": token,
                    "expires_at": expires_at,
                }))?;
            }
            TokenCommands::Validate { path, token } => {
                let signer = signer(&config)?;
                let outcome = signer.validate_token(&path, &token);
                print_json(&serde_json::json!({
                    "valid": outcome.is_ok(),
                    "reason": outcome.err().map(|e| e.to_string()),
                }))?;
            }
            TokenCommands::Expiry { token } => {
                let expires_at = ShareTokenSigner::expiration(&token)?;
                print_json(&serde_json::json!({ "expires_at": expires_at }))?;
            }
        },
    }

    Ok(())
}
