//! Cragsync CLI - command-line host for the offline sync engine.
//!
//! Wires the engine to the HTTP backend and a JSON settings file so subtree
//! downloads, status queries and reconciliation can be driven from a shell.

mod commands;
mod console;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cragsync_core::config::NetworkConfig;
use cragsync_core::{HttpBackend, JsonSettings, NetworkPolicy, SyncEngine};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "cragsync")]
#[command(about = "Offline sync for the climbing topo tree")]
struct Args {
    /// Backend API base URL
    #[arg(long, env = "CRAGSYNC_SERVER", default_value = "http://127.0.0.1:8080/api/")]
    server: String,

    /// Base URL that storage references resolve against
    #[arg(long, env = "CRAGSYNC_STORAGE", default_value = "https://storage.googleapis.com/")]
    storage: String,

    /// Engine root directory (defaults to the user data directory)
    #[arg(long)]
    root: Option<PathBuf>,

    /// JSON settings file with download preferences
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the content tree with download status
    Tree {
        /// Fetch a fresh manifest first
        #[arg(long)]
        refresh: bool,
        /// Maximum depth to print (0 = areas only)
        #[arg(long)]
        depth: Option<usize>,
    },
    /// Show the download status of a node (e.g. Zone/abc123)
    Status { pin: String },
    /// Download a node and its subtree
    Download {
        pin: String,
        /// Replace assets that already exist
        #[arg(long)]
        overwrite: bool,
        /// JPEG quality (1-100); defaults to the settings value
        #[arg(long)]
        quality: Option<i64>,
        /// Map style for offline map regions
        #[arg(long)]
        style: Option<String>,
        /// Network policy: any, no-roaming or wifi-only
        #[arg(long)]
        policy: Option<NetworkPolicy>,
    },
    /// Delete everything stored for a node and its subtree
    Delete { pin: String },
    /// Re-download stored assets that changed on the server
    Reconcile,
    /// List downloads interrupted by a previous run
    Jobs {
        /// Resume every interrupted download
        #[arg(long)]
        resume: bool,
    },
}

fn default_root() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .context("cannot determine a data directory, pass --root")?;
    Ok(base.join("cragsync"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let root = match args.root {
        Some(path) => path,
        None => default_root()?,
    };
    debug!("Engine root: {}", root.display());

    let backend = HttpBackend::new(&args.server, &args.storage, NetworkConfig::FETCH_TIMEOUT)
        .context("invalid backend URL")?;
    let mut builder = SyncEngine::builder(&root, Arc::new(backend))
        .auto_create_dirs(true)
        .with_progress(Arc::new(console::ConsoleProgress::default()));
    if let Some(path) = &args.settings {
        let settings = JsonSettings::load(path)
            .with_context(|| format!("failed to read settings {}", path.display()))?;
        builder = builder.with_settings(Arc::new(settings));
    }
    let engine = builder.build()?;

    let out = console::Output::new(args.json);
    match args.command {
        Command::Tree { refresh, depth } => commands::tree(&engine, &out, refresh, depth).await,
        Command::Status { pin } => commands::status(&engine, &out, &pin).await,
        Command::Download {
            pin,
            overwrite,
            quality,
            style,
            policy,
        } => {
            let mut options = engine.default_options().with_overwrite(overwrite);
            if let Some(quality) = quality {
                options = options.with_quality(quality);
            }
            if let Some(style) = style {
                options = options.with_map_style(style);
            }
            if let Some(policy) = policy {
                options = options.with_policy(policy);
            }
            commands::download(&engine, &out, &pin, options).await
        }
        Command::Delete { pin } => commands::delete(&engine, &out, &pin).await,
        Command::Reconcile => commands::reconcile(&engine, &out).await,
        Command::Jobs { resume } => commands::jobs(&engine, &out, resume).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_flags() {
        let args = Args::try_parse_from([
            "cragsync",
            "--root",
            "/tmp/crag",
            "download",
            "Zone/Z1",
            "--overwrite",
            "--quality",
            "60",
            "--policy",
            "wifi-only",
        ])
        .unwrap();
        match args.command {
            Command::Download {
                pin,
                overwrite,
                quality,
                policy,
                style,
            } => {
                assert_eq!(pin, "Zone/Z1");
                assert!(overwrite);
                assert_eq!(quality, Some(60));
                assert_eq!(policy, Some(NetworkPolicy::WifiOnly));
                assert!(style.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        let result = Args::try_parse_from(["cragsync", "download", "Zone/Z1", "--policy", "satellite"]);
        assert!(result.is_err());
    }
}
