//! Command-line client for the batchline transport.
//!
//! Send one request and print what the server answers for it:
//!   batchline --url https://mail.example.com/grommunio.php request hierarchymodule list '{}'
//!
//! Wait until the server answers a connectivity probe:
//!   batchline --url https://mail.example.com/grommunio.php probe

mod config;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, bail};
use batchline_client::{
    Client, ClientConfig, ClientEvent, HandlerRouter, HttpProberFactory, Observer, Prober,
    ProberFactory, ResponseHandler,
};
use batchline_core::{ParalyzeReason, RequestData};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "batchline", version, about = "Talk to a batchline server")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "BATCHLINE_CONFIG")]
    config: Option<PathBuf>,

    /// Server endpoint, overriding the configuration file.
    #[arg(long, env = "BATCHLINE_URL")]
    url: Option<String>,

    /// Extra header sent with every request, as `Name: value`.
    #[arg(long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a single request.
    Request {
        /// Target module, e.g. `hierarchymodule`.
        module: String,
        /// Action, e.g. `list`.
        action: String,
        /// Action data: JSON, or the raw payload with `--raw`.
        #[arg(default_value = "{}")]
        data: String,
        /// Send `data` verbatim instead of inside a JSON envelope.
        #[arg(long)]
        raw: bool,
    },
    /// Poll the server until it responds.
    Probe {
        /// Give up after this many seconds.
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("batchline=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = config::load(cli.config.as_deref())?;
    if let Some(url) = cli.url {
        config.multiplexer.default_url = url;
    }
    config.multiplexer.request_headers.extend(cli.headers);
    if !config.multiplexer.default_url.contains("://") {
        bail!(
            "server URL must be absolute, got {:?}; pass --url or set multiplexer.default_url",
            config.multiplexer.default_url
        );
    }

    match cli.command {
        Command::Request {
            module,
            action,
            data,
            raw,
        } => request(config, &module, &action, data, raw).await,
        Command::Probe { timeout } => probe(config, Duration::from_secs(timeout)).await,
    }
}

async fn request(
    config: ClientConfig,
    module: &str,
    action: &str,
    data: String,
    raw: bool,
) -> anyhow::Result<()> {
    let failed = Arc::new(Mutex::new(false));
    let paralyzed = Arc::new(Mutex::new(None));

    let router = HandlerRouter::new().with_fallback(|action: &str, payload: &Value| {
        tracing::info!(action, %payload, "notification");
    });
    let mut client = Client::new(config, router)?;
    client.mux_mut().subscribe(Report {
        paralyzed: paralyzed.clone(),
    });

    let handler: Box<dyn ResponseHandler> = Box::new(Print {
        failed: failed.clone(),
    });
    let mux = client.mux_mut();
    mux.reset();
    let id = if raw {
        mux.add_data_request(module, action, data.into_bytes(), Some(handler))?
    } else {
        let data: Value = serde_json::from_str(&data).context("action data is not valid JSON")?;
        mux.add_request(module, action, data, Some(handler))?
    };
    mux.send(None, None)?;
    tracing::debug!(request = %id, "request sent");

    client.run_until_idle().await;

    if let Some(reason) = *lock(&paralyzed) {
        bail!("session lost: {reason}");
    }
    if *lock(&failed) {
        bail!("request {id} failed on the server");
    }
    Ok(())
}

async fn probe(config: ClientConfig, timeout: Duration) -> anyhow::Result<()> {
    let http = config.http.build_client()?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut probers = HttpProberFactory::new(http, config.prober, tx);
    let mut prober = probers.create(
        &config.multiplexer.default_url,
        &config.multiplexer.default_headers,
    );

    tracing::info!(url = prober.url(), "probing");
    prober.start();

    let event = tokio::time::timeout(timeout, rx.recv())
        .await
        .context("server did not answer")?;
    prober.stop();

    match event {
        Some(ClientEvent::Restored(Some(response))) if response.session_lost() => {
            println!("reachable, session inactive");
        }
        Some(_) => println!("reachable"),
        None => bail!("prober stopped unexpectedly"),
    }
    Ok(())
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| format!("header must look like 'Name: value', got: {s}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("header name cannot be empty".to_string());
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Prints every answered action as JSON on stdout.
struct Print {
    failed: Arc<Mutex<bool>>,
}

impl ResponseHandler for Print {
    fn handle(&mut self, action: &str, payload: &Value) {
        let text = serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
        println!("{action}: {text}");
    }

    fn failure(&mut self, request: &RequestData) {
        tracing::error!(?request, "server could not process the request");
        *lock(&self.failed) = true;
    }
}

/// Logs connection state changes and remembers a paralysis.
struct Report {
    paralyzed: Arc<Mutex<Option<ParalyzeReason>>>,
}

impl Observer for Report {
    fn connection_paralyzed(&mut self, reason: ParalyzeReason) {
        *lock(&self.paralyzed) = Some(reason);
    }

    fn connection_interrupted(&mut self, prober: &dyn Prober) {
        tracing::warn!(url = prober.url(), "connection lost, waiting for the server");
    }

    fn connection_restored(&mut self) {
        tracing::info!("connection restored, resending");
    }
}
