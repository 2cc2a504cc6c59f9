//! LapCompare command line client
//!
//! Submits one analysis job (or one lap auto-detection) against the
//! configured control plane and logs the resulting manifest artifacts.
//!
//! # Configuration
//!
//! Configuration is loaded from:
//! 1. Configuration files (config/client.*, /etc/lapcompare/client.*)
//! 2. Environment variables (prefixed with LAPCOMPARE__)
//!
//! See `config.rs` for detailed configuration options.

use anyhow::{bail, Context, Result};
use lapcompare_client::{
    Config, ControlPlaneClient, JobInput, JobOrchestrator, Manifest, ResultHandoff,
    SegmentDetector, SessionStore, TimeRange, UploadSequencer, VideoFile,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const USAGE: &str = "\
Usage:
  lapcompare pair <lap_a.mp4> <lap_b.mp4>
  lapcompare segments <video.mp4> <a_start_s> <a_end_s> <b_start_s> <b_end_s>
  lapcompare detect <video.mp4>

An end time of 0 means \"to end of video\".";

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting LapCompare client"
    );

    // Validate configuration before anything touches the network
    config
        .validate()
        .context("Control plane endpoint is not usable")?;

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Wire up components
    let client = Arc::new(
        ControlPlaneClient::new(&config).context("Failed to create control plane client")?,
    );
    let uploads = Arc::new(UploadSequencer::new(client.clone()));
    let handoff = Arc::new(ResultHandoff::new(Arc::new(SessionStore::new())));
    let orchestrator = JobOrchestrator::new(client.clone(), uploads.clone(), handoff, &config);

    // Mirror phase changes onto the log, the way the page shows its status line
    let mut phases = orchestrator.phase();
    tokio::spawn(async move {
        while phases.changed().await.is_ok() {
            let phase = *phases.borrow();
            info!(status = %phase, "Status");
        }
    });

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("pair") => {
            let [_, lap_a, lap_b] = args.as_slice() else {
                bail!("{USAGE}");
            };
            let lap_a = VideoFile::open(lap_a)
                .await
                .with_context(|| format!("Failed to read {lap_a}"))?;
            let lap_b = VideoFile::open(lap_b)
                .await
                .with_context(|| format!("Failed to read {lap_b}"))?;

            let manifest = orchestrator
                .run(JobInput::Pair {
                    lap_a: Some(lap_a),
                    lap_b: Some(lap_b),
                })
                .await?;
            report(&manifest);
        }
        Some("segments") => {
            let [_, video, a_start, a_end, b_start, b_end] = args.as_slice() else {
                bail!("{USAGE}");
            };
            let video = VideoFile::open(video)
                .await
                .with_context(|| format!("Failed to read {video}"))?;
            let seg_a = TimeRange::new(parse_seconds(a_start)?, parse_seconds(a_end)?);
            let seg_b = TimeRange::new(parse_seconds(b_start)?, parse_seconds(b_end)?);

            let manifest = orchestrator
                .run(JobInput::Segments {
                    video: Some(video),
                    seg_a,
                    seg_b,
                })
                .await?;
            report(&manifest);
        }
        Some("detect") => {
            let [_, video] = args.as_slice() else {
                bail!("{USAGE}");
            };
            let video = VideoFile::open(video)
                .await
                .with_context(|| format!("Failed to read {video}"))?;

            let detector = SegmentDetector::new(client, uploads, config.detect.clone());
            let segments = detector.auto_detect(&video).await?;

            match (segments.seg_a, segments.seg_b) {
                (None, None) => info!("No laps detected"),
                (seg_a, seg_b) => {
                    if let Some(seg) = seg_a {
                        info!(start_s = seg.start_s, end_s = seg.end_s, "Proposed Lap A");
                    }
                    if let Some(seg) = seg_b {
                        info!(start_s = seg.start_s, end_s = seg.end_s, "Proposed Lap B");
                    }
                }
            }
        }
        _ => bail!("{USAGE}"),
    }

    Ok(())
}

fn parse_seconds(value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .with_context(|| format!("`{value}` is not a valid number of seconds"))
}

fn report(manifest: &Manifest) {
    info!(job_id = %manifest.job_id, summary = %manifest.summary, "Analysis finished");
    for (name, artifact) in &manifest.artifacts {
        info!(artifact = %name, url = %artifact.url, "Result artifact");
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    Ok(())
}
