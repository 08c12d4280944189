//! Request/Reply Pipe
//!
//! Reads newline-delimited records from stdin, sends each one through the NATS
//! request/reply stage and writes every reply payload to stdout, one per line,
//! in input order.
//!
//! ## Architecture
//!
//! ```text
//! stdin (one record per line)
//!   ↓
//! RequestReplyProcessor  ── request ──▶  NATS  ──▶  responder
//!   ↓                    ◀── reply ───
//! stdout (one reply per line)
//! ```
//!
//! Records that fail are logged and produce no output line.
//!
//! ## Configuration
//!
//! Everything comes from the environment: `NATS_*` for the connection,
//! `REQUEST_REPLY_*` for the stage, plus `REQUEST_REPLY_CONCURRENCY` and an
//! optional `METRICS_PORT` for a Prometheus scrape endpoint.

use core_config::{env_optional, env_or_default, ConfigError, Environment, FromEnv};
use eyre::{Result, WrapErr};
use futures::stream::{FuturesOrdered, StreamExt};
use metrics_exporter_prometheus::PrometheusBuilder;
use nats_request_reply::{Record, RequestReplyConfig, RequestReplyProcessor};
use std::future::Future;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};

/// Settings for the pipe itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeConfig {
    /// Maximum number of requests in flight
    pub concurrency: usize,
    /// Serve Prometheus metrics on this port when set
    pub metrics_port: Option<u16>,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            concurrency: 16,
            metrics_port: None,
        }
    }
}

impl FromEnv for PipeConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let concurrency = env_or_default("REQUEST_REPLY_CONCURRENCY", "16")
            .parse::<usize>()
            .map_err(|e| ConfigError::ParseError {
                key: "REQUEST_REPLY_CONCURRENCY".to_string(),
                details: e.to_string(),
            })?;
        if concurrency == 0 {
            return Err(ConfigError::invalid(
                "REQUEST_REPLY_CONCURRENCY",
                "must be at least 1",
            ));
        }

        let metrics_port = env_optional("METRICS_PORT")
            .map(|port| {
                port.parse::<u16>().map_err(|e| ConfigError::ParseError {
                    key: "METRICS_PORT".to_string(),
                    details: e.to_string(),
                })
            })
            .transpose()?;

        Ok(Self {
            concurrency,
            metrics_port,
        })
    }
}

/// Counters reported when the pipe stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipeSummary {
    pub replied: u64,
    pub failed: u64,
}

/// Run the pipe
///
/// This is the main entry point. It:
/// 1. Sets up structured logging (env-aware: JSON for prod, pretty for dev)
/// 2. Loads the stage and pipe configuration from the environment
/// 3. Connects the stage to NATS
/// 4. Streams stdin through the stage until EOF or a shutdown signal
///
/// # Errors
///
/// Returns an error if configuration is invalid, the NATS connection fails,
/// or stdin/stdout fail.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        environment = ?environment,
        "Starting request/reply pipe"
    );

    let pipe = PipeConfig::from_env().wrap_err("Invalid pipe configuration")?;
    let config = RequestReplyConfig::from_env().wrap_err("Invalid request/reply configuration")?;

    if let Some(port) = pipe.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .wrap_err("Failed to start Prometheus exporter")?;
        info!(port, "Prometheus metrics endpoint started");
    }

    let processor = RequestReplyProcessor::connect(config)
        .await
        .wrap_err("Failed to start request/reply stage")?;

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();

    let summary = pump(
        &processor,
        stdin,
        &mut stdout,
        pipe.concurrency,
        shutdown_signal(),
    )
    .await;

    processor.close().await?;

    let summary = summary?;
    info!(
        replied = summary.replied,
        failed = summary.failed,
        "Request/reply pipe stopped"
    );
    Ok(())
}

/// Feed every line of `input` through `processor`, writing replies to `output`.
///
/// At most `concurrency` requests are in flight. Output order follows input
/// order. Blank lines are skipped. Stops reading when `shutdown` resolves,
/// and drops requests still pending at that point.
pub async fn pump<R, W>(
    processor: &RequestReplyProcessor,
    input: R,
    output: &mut W,
    concurrency: usize,
    shutdown: impl Future<Output = ()>,
) -> Result<PipeSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut in_flight = FuturesOrdered::new();
    let mut summary = PipeSummary::default();
    let mut eof = false;
    tokio::pin!(shutdown);

    loop {
        if eof && in_flight.is_empty() {
            break;
        }

        tokio::select! {
            biased;

            _ = &mut shutdown => {
                if !in_flight.is_empty() {
                    warn!(pending = in_flight.len(), "Dropping in-flight requests on shutdown");
                }
                break;
            }

            Some(result) = in_flight.next(), if !in_flight.is_empty() => {
                let result: nats_request_reply::Result<Record> = result;
                match result {
                    Ok(reply) => {
                        output.write_all(reply.payload()).await?;
                        output.write_all(b"\n").await?;
                        summary.replied += 1;
                    }
                    Err(e) => {
                        error!(error = %e, kind = e.kind(), "Record failed");
                        summary.failed += 1;
                    }
                }
            }

            line = lines.next_line(), if !eof && in_flight.len() < concurrency => {
                match line.wrap_err("Failed to read input")? {
                    Some(line) if line.is_empty() => {}
                    Some(line) => in_flight.push_back(processor.process(Record::new(line))),
                    None => eof = true,
                }
            }
        }
    }

    output.flush().await?;
    Ok(summary)
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }
}
