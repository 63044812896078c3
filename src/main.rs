// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use segment_recorder::bootlog::write_bootlog;
use segment_recorder::config::{load_config_with_env, ConfigLoader};
use segment_recorder::demux;
use segment_recorder::storage::clear_locks;
use segment_recorder::{Recorder, SyntheticCapture};

const SYNTHETIC_WIDTH: u32 = 640;
const SYNTHETIC_HEIGHT: u32 = 480;

/// Segment Recorder - Record camera streams into numbered log segments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.yaml")]
    config: PathBuf,

    /// Log root directory (overrides config file)
    #[arg(short, long)]
    log_root: Option<String>,

    /// Segment length in seconds (overrides config file)
    #[arg(short, long)]
    segment_length: Option<u64>,

    /// Write a boot log and exit
    #[arg(long)]
    bootlog: bool,

    /// Stop recording after this many seconds
    #[arg(short, long)]
    duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration from file
    let mut recorder_config = load_config_with_env(&args.config)?;

    // Apply CLI overrides
    if let Some(log_root) = args.log_root {
        recorder_config.storage.log_root = log_root;
    }
    if let Some(segment_length) = args.segment_length {
        recorder_config.recorder.segment_length_seconds = segment_length;
    }
    ConfigLoader::validate(&recorder_config)?;

    // Initialize tracing with configured level
    let log_level = match recorder_config.logging.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(log_level).into())
        .from_env_lossy();

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_thread_names(true);
    if recorder_config.logging.format == "json" {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }

    info!("Starting Segment Recorder");
    info!("Loaded configuration from: {:?}", args.config);
    info!("Log root: {}", recorder_config.storage.log_root);

    if args.bootlog {
        let segment = write_bootlog(&recorder_config.storage)?;
        info!("Boot log written to {}", segment.path.display());
        return Ok(());
    }

    let removed = clear_locks(Path::new(&recorder_config.storage.log_root));
    if removed > 0 {
        info!("Removed {} stale lock file(s)", removed);
    }

    // Camera frames come from the test-pattern source; their frame packets
    // go through the in-process bus like any other message
    let (events, demuxer) = demux::channel();
    let capture = SyntheticCapture::new(SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT).with_events(events);
    let mut recorder = Recorder::from_config(&recorder_config, Arc::new(capture), Box::new(demuxer))
        .context("Failed to create recorder")?;
    let cancel = recorder.cancel_token();

    let mut task = tokio::task::spawn_blocking(move || recorder.run());

    let finished = tokio::select! {
        result = &mut task => Some(result),
        _ = shutdown_signal(args.duration.map(Duration::from_secs)) => None,
    };

    let result = match finished {
        Some(result) => result,
        None => {
            cancel.cancel();
            task.await
        }
    };

    match result.context("Recorder thread failed")? {
        Ok(()) => {
            info!("Segment Recorder shut down successfully");
            Ok(())
        }
        Err(e) => {
            error!("Segment Recorder failed: {}", e);
            Err(e.into())
        }
    }
}

/// Resolves on Ctrl+C, SIGTERM or once `duration` has elapsed
async fn shutdown_signal(duration: Option<Duration>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let timer = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
        _ = timer => info!("Recording duration reached, shutting down"),
    }
}
