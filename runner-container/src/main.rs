use std::time::Duration;

use anyhow::{Context, Result, bail};
use hook_core::config::{SinksConfig, load_config};
use hook_core::entry::Entry;
use hook_core::level::Level;
use hook_core::sink::{BufferedSink, Hook, QueuedSink};
use hook_core::store::{MemoryStore, Store};
use hook_core::telemetry::init_tracing;
use tokio::io::AsyncWrite;
use tracing::{info, warn};

type Output = Box<dyn AsyncWrite + Unpin + Send>;

/// Long-running demo process for container hosting services.
///
/// What it does at a high-level:
///     Load config from `--config <path>` or the HOOK_CONFIG env var.
///     Build the configured sinks: buffered into `--output <path>` (stdout by
///     default), queued into an in-memory store, or MySQL when built with the
///     `mysql` feature and DATABASE_URL is set.
///     Fire demo entries every second until Ctrl-C, then stop both sinks.
#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse(std::env::args().skip(1))?;
    let config = load_config(args.config.as_deref())
        .await
        .context("Failed to load sink config")?;
    config.validate()?;

    let output: Output = match &args.output {
        Some(path) => Box::new(
            tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .with_context(|| format!("Failed to open output file {}", path))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    #[cfg(feature = "mysql")]
    if let Ok(url) = std::env::var("DATABASE_URL") {
        let store = hook_core::store::mysql::MySqlStore::connect(&url, 5)
            .await
            .context("Failed to connect to MySQL")?;
        return run(config, output, store).await;
    }

    run(config, output, MemoryStore::new()).await
}

async fn run<S: Store>(config: SinksConfig, output: Output, store: S) -> Result<()> {
    let buffered = config
        .buffered
        .map(|c| BufferedSink::new(output, c));
    let queued = config
        .queued
        .map(|c| QueuedSink::new(store, c))
        .transpose()?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut seq = 0u64;

    info!("Firing demo entries, press Ctrl-C to stop");
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!("Shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                seq += 1;
                let entry = demo_entry(seq);
                if let Some(sink) = &buffered {
                    fire(sink, &entry, "buffered").await;
                }
                if let Some(sink) = &queued {
                    fire(sink, &entry, "queued").await;
                }
            }
        }
    }

    if let Some(sink) = &buffered {
        sink.stop().await.context("Failed to stop buffered sink")?;
        info!("Buffered sink metrics: {}", serde_json::to_string(&sink.metrics())?);
    }
    if let Some(sink) = &queued {
        sink.stop().await.context("Failed to stop queued sink")?;
        info!("Queued sink metrics: {}", serde_json::to_string(&sink.metrics())?);
    }
    Ok(())
}

async fn fire<H: Hook>(sink: &H, entry: &Entry, name: &str) {
    if !sink.accepts(entry.level) {
        return;
    }
    if let Err(e) = sink.fire(entry).await {
        warn!("{} sink rejected entry: {}", name, e);
    }
}

fn demo_entry(seq: u64) -> Entry {
    let level = match seq % 4 {
        0 => Level::Debug,
        1 => Level::Info,
        2 => Level::Warn,
        _ => Level::Error,
    };
    Entry::new(level, format!("demo operation {}", seq))
        .with_field("seq", seq)
        .with_field("user", "demo")
        .with_field("operation", "heartbeat")
}

#[derive(Debug, Default)]
struct Args {
    config: Option<String>,
    output: Option<String>,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut parsed = Args::default();
        while let Some(arg) = args.next() {
            let slot = match arg.as_str() {
                "--config" => &mut parsed.config,
                "--output" => &mut parsed.output,
                other => bail!("Unknown argument: {}", other),
            };
            match args.next() {
                Some(value) => *slot = Some(value),
                None => bail!("{} needs a value", arg),
            }
        }
        Ok(parsed)
    }
}
