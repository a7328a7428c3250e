//! Renders a generation in the terminal at reading pace.
//!
//! `pacer demo` replays local text through the scripted backend with
//! configurable burstiness; `pacer http` streams from an SSE generation
//! endpoint (`PACER_BACKEND_URL`).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use pacer_backend::http::{HttpBackend, HttpBackendConfig};
use pacer_backend::{GenerationBackend, GenerationRequest, ScriptedBackend};
use pacer_core::prelude::*;
use pacer_core::{JsonlHistory, init_observability};
use tokio::io::AsyncWriteExt as _;
use tracing::info;

#[derive(Parser)]
#[command(name = "pacer")]
#[command(about = "Paced terminal rendering of streamed text generations")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    render: RenderArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Replay local text through the scripted backend
    Demo {
        /// Text to stream (reads --file when omitted)
        text: Option<String>,

        /// Read the text from a file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Characters per upstream chunk
        #[arg(long, default_value = "12")]
        chunk_chars: usize,

        /// Milliseconds between upstream chunks
        #[arg(long, default_value = "80")]
        interval_ms: u64,
    },

    /// Stream from an HTTP generation endpoint
    Http {
        /// Prompt sent to the backend
        prompt: String,

        /// Base URL (overrides PACER_BACKEND_URL)
        #[arg(long)]
        url: Option<String>,

        /// JSON parameters passed through to the backend
        #[arg(long)]
        params: Option<String>,
    },
}

#[derive(Args)]
struct RenderArgs {
    /// Base delay per rendered batch in milliseconds (overrides PACER_BASE_DELAY_MS)
    #[arg(long, global = true)]
    base_delay_ms: Option<u64>,

    /// Disable delay jitter
    #[arg(long, global = true)]
    no_jitter: bool,

    /// Simulate the terminal going to the background after this many milliseconds
    #[arg(long, global = true)]
    background_at_ms: Option<u64>,

    /// How long the simulated background interval lasts
    #[arg(long, global = true, default_value = "1500")]
    background_for_ms: u64,

    /// Append completed generations to this JSONL file
    #[arg(long, global = true)]
    history: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    init_observability();
    let cli = Cli::parse();

    let mut config = RenderConfig::from_env()?;
    if let Some(ms) = cli.render.base_delay_ms {
        config = config.base_delay(Duration::from_millis(ms));
    }
    if cli.render.no_jitter {
        config = config.jitter(false);
    }

    let (backend, request): (Arc<dyn GenerationBackend>, GenerationRequest) = match cli.command {
        Command::Demo {
            text,
            file,
            chunk_chars,
            interval_ms,
        } => {
            let text = match (text, file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(path)?,
                (None, None) => return Err("demo needs TEXT or --file".into()),
            };
            let backend: Arc<dyn GenerationBackend> = Arc::new(ScriptedBackend::chunked(
                "demo",
                &text,
                chunk_chars,
                Duration::from_millis(interval_ms),
            ));
            (backend, GenerationRequest::new("demo", "replay"))
        }
        Command::Http {
            prompt,
            url,
            params,
        } => {
            let http_config = match url {
                Some(url) => match std::env::var("PACER_BACKEND_TOKEN") {
                    Ok(token) if !token.trim().is_empty() => HttpBackendConfig::new(url).token(token),
                    _ => HttpBackendConfig::new(url),
                },
                None => HttpBackendConfig::from_env()?,
            };
            let backend: Arc<dyn GenerationBackend> = Arc::new(HttpBackend::new(http_config)?);
            let mut request = GenerationRequest::new(backend.id(), prompt);
            if let Some(raw) = params {
                request = request.params(serde_json::from_str(&raw)?);
            }
            (backend, request)
        }
    };

    let mut builder = Renderer::builder()
        .register_backend(backend)
        .config(config);
    if let Some(path) = cli.render.history {
        builder = builder.history_sink(Arc::new(JsonlHistory::new(path)));
    }
    let renderer = builder.build()?;

    let mut session = renderer.start("terminal", request)?;
    if let Some(at_ms) = cli.render.background_at_ms {
        let visibility = session.visibility();
        let hidden_for = Duration::from_millis(cli.render.background_for_ms);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(at_ms)).await;
            visibility.background();
            tokio::time::sleep(hidden_for).await;
            visibility.foreground();
        });
    }

    let cancel = session.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut stdout = tokio::io::stdout();
    let mut printed = String::new();
    while let Some(event) = session.next_event().await {
        match event {
            RenderEvent::Update { text, .. } => {
                if let Some(delta) = text.strip_prefix(printed.as_str()) {
                    stdout.write_all(delta.as_bytes()).await?;
                    stdout.flush().await?;
                }
                printed = text;
            }
            RenderEvent::Completed { text } => {
                if text != printed {
                    // authoritative text differs from what was animated
                    stdout.write_all(b"\r\n").await?;
                    stdout.write_all(text.as_bytes()).await?;
                }
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
            RenderEvent::Failed { error } => {
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
                eprintln!("generation failed: {error}");
            }
        }
    }

    let snapshot = session.snapshot();
    match session.finish().await {
        Ok(_) => {
            info!(units = snapshot.rendered_len, "done");
            Ok(())
        }
        Err(RenderError::Cancelled) => {
            eprintln!("\ncancelled");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
