//! Ad analysis command line entry point.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use adlens_graph::GraphClient;
use adlens_llm::LlmClient;
use adlens_media::{check_ffmpeg, check_ffprobe, FfmpegFrameSource};
use adlens_pipeline::{AdPipeline, Collaborators, HttpTransport, PipelineConfig};

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "adlens=info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

fn build_pipeline() -> anyhow::Result<AdPipeline> {
    let config = PipelineConfig::from_env().context("invalid pipeline configuration")?;
    info!(
        cache_dir = %config.cache_root.display(),
        frames_per_video = config.frames_per_video,
        "Pipeline config loaded"
    );

    let graph = Arc::new(GraphClient::from_env().context("Graph API client")?);
    let llm = Arc::new(LlmClient::from_env().context("model client")?);
    let transport = HttpTransport::new(config.download_read_timeout).context("download client")?;
    let frames = FfmpegFrameSource::new(config.call_timeout);

    let collaborators = Collaborators {
        ads: graph.clone(),
        resolver: graph,
        transport: Arc::new(transport),
        speech: llm.clone(),
        frames: Arc::new(frames),
        model: llm,
    };

    Ok(AdPipeline::new(config, collaborators)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting adlens");

    for (tool, found) in [("ffmpeg", check_ffmpeg().is_ok()), ("ffprobe", check_ffprobe().is_ok())] {
        if !found {
            warn!(tool, "Not found on PATH, frame sampling will fail");
        }
    }

    let pipeline = build_pipeline()?;

    let cancel = pipeline.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received interrupt, stopping after the running stages");
            cancel.cancel();
        }
    });

    match pipeline.run().await {
        Ok(output) => {
            for result in &output.results {
                info!(
                    video = %result.video,
                    hook = %result.analysis.hook,
                    tone = %result.analysis.tone,
                    "Ad analysis"
                );
            }
            println!("{}", serde_json::to_string_pretty(&output.results)?);
            info!(run_id = %output.run_id, ads = output.results.len(), "Run complete");
            Ok(())
        }
        Err(failure) => {
            error!(
                stage = failure.stage.as_deref().unwrap_or("-"),
                error = %failure.error,
                "Run failed"
            );
            std::process::exit(1);
        }
    }
}
