//! Murmur chat client entry point.
//!
//! # Usage
//!
//! ```bash
//! # Chat against the in-process service
//! murmur --nickname alice
//!
//! # Have the service echo our own messages back, with debug logs on stderr
//! murmur --nickname alice --echo --log-level debug
//! ```

use std::{io, time::Duration};

use clap::Parser;
use murmur_app::{DEFAULT_HISTORY_CAP, EngineConfig, Runtime, SessionController};
use murmur_cli::{PlainRenderer, spawn_line_reader};
use murmur_harness::SimService;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Buffered input lines before the reader waits for the session.
const INPUT_BUFFER: usize = 64;

/// Murmur chat client
#[derive(Parser, Debug)]
#[command(name = "murmur")]
#[command(about = "Multi-room chat client with a line-oriented interface")]
#[command(version)]
struct Args {
    /// Nickname to chat as
    #[arg(short, long)]
    nickname: String,

    /// Messages kept per room
    #[arg(long, default_value_t = DEFAULT_HISTORY_CAP)]
    history_cap: usize,

    /// Interval between unread-count polls, in milliseconds
    #[arg(long, default_value_t = 2000)]
    poll_interval_ms: u64,

    /// Idle time before a stream heartbeat, in seconds
    #[arg(long, default_value_t = 30)]
    heartbeat_secs: u64,

    /// Bound on each service call, in seconds
    #[arg(long, default_value_t = 10)]
    request_timeout_secs: u64,

    /// Stay in the current view after joining or creating a room
    #[arg(long)]
    no_auto_switch: bool,

    /// Have the service echo our own messages back on the stream
    #[arg(long)]
    echo: bool,

    /// Disable ANSI colors
    #[arg(long)]
    no_color: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            history_cap: self.history_cap,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            auto_switch: !self.no_auto_switch,
            ..EngineConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(io::stderr)).with(filter).init();

    tracing::info!(nickname = %args.nickname, echo = args.echo, "murmur starting");

    let service = SimService::new().with_echo(args.echo);
    let mut session = SessionController::new(service, args.engine_config());
    session.start(&args.nickname).await?;

    let input = spawn_line_reader(tokio::io::stdin(), INPUT_BUFFER);
    let renderer = PlainRenderer::new(io::stdout(), !args.no_color);
    Runtime::new(session, renderer).run(input).await?;

    Ok(())
}
