mod bell;
mod render;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::Parser;
use oracle_core::{
    load_settings, AudioSink, ControllerOptions, HeadlessChallenge, HttpOracleTransport,
    OracleTransport, ReplayTransport, RunController, SilentAudio, VerificationGate,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    bell::TerminalBell,
    render::{Flow, TerminalRenderer},
};

#[derive(Parser, Debug)]
#[command(about = "Pose a question to the oracle and watch the reveal")]
struct Args {
    /// The question for the oracle.
    question: String,
    /// Challenge token obtained from the verification widget.
    #[arg(long, env = "ORACLE_CHALLENGE_TOKEN")]
    token: Option<String>,
    /// Replay a recorded event-stream body instead of calling the API.
    #[arg(long)]
    replay: Option<PathBuf>,
    /// Chunk size used when replaying, to exercise record reassembly.
    #[arg(long, default_value_t = 64)]
    replay_chunk: usize,
    /// Ring the terminal bell on every reveal.
    #[arg(long)]
    bell: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();
    let settings = load_settings()?;

    let transport: Arc<dyn OracleTransport> = match &args.replay {
        Some(path) => {
            let body = std::fs::read(path)
                .with_context(|| format!("failed to read replay file '{}'", path.display()))?;
            info!(path = %path.display(), bytes = body.len(), "replaying recorded stream");
            Arc::new(
                ReplayTransport::new(body)
                    .chunked(args.replay_chunk)
                    .with_chunk_delay(Duration::from_millis(20)),
            )
        }
        None => Arc::new(HttpOracleTransport::new(
            &settings.api_url()?,
            settings.tenant.clone(),
            settings.connect_timeout(),
        )?),
    };

    let verification = VerificationGate::with_ttl(Arc::new(HeadlessChallenge), settings.token_ttl());
    let token = args
        .token
        .clone()
        .or_else(|| args.replay.as_ref().map(|_| "replay".to_string()));
    if let Some(token) = token {
        verification.callbacks().on_success(token);
    }

    let audio: Arc<dyn AudioSink> = if args.bell {
        Arc::new(TerminalBell)
    } else {
        Arc::new(SilentAudio)
    };
    let options: ControllerOptions = settings.controller_options();
    let controller = RunController::new(transport, verification, audio, options);

    let mut updates = controller.subscribe();
    let run = controller.submit(&args.question).await?;
    let mut renderer = TerminalRenderer::new(std::io::stdout());

    let outcome = loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(update) if update.run() == run => match renderer.render(&update)? {
                    Flow::Continue => {}
                    flow => break flow,
                },
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "renderer fell behind"),
                Err(RecvError::Closed) => break Flow::Failed,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted; cancelling the run");
                controller.cancel().await;
                break Flow::Failed;
            }
        }
    };

    controller.shutdown().await;
    if outcome == Flow::Failed {
        bail!("the oracle did not finish speaking");
    }
    Ok(())
}
