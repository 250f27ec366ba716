use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use floodgate::config::{FloodgateConfig, LoggingConfig};
use floodgate::ratelimit::presets::PRESET_NAMES;
use floodgate::ratelimit::{Clock, CounterStore, Limiter, Limiters, ManualClock, SystemClock};

/// Inspect and exercise Floodgate's rate limit policies.
#[derive(Debug, Parser)]
#[command(name = "floodgate", version, about)]
struct Cli {
    /// YAML configuration file; FLOODGATE__* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter directive, e.g. "debug" or "floodgate=trace"
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the effective policies
    Policies,

    /// Replay a burst of requests from one client against a policy
    Simulate {
        /// Preset to check against
        #[arg(short, long, default_value = "api")]
        policy: String,

        /// Client address sent as x-forwarded-for
        #[arg(long, default_value = "127.0.0.1")]
        ip: String,

        /// Number of requests to send
        #[arg(short = 'n', long, default_value_t = 10)]
        requests: u32,

        /// Simulated time between requests, in milliseconds
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,
    },
}

#[derive(Debug, Serialize)]
struct PolicyView<'a> {
    window_ms: u64,
    max: u64,
    message: &'a str,
}

#[derive(Debug, Serialize)]
struct Attempt {
    request: u32,
    elapsed_ms: u64,
    allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    headers: BTreeMap<String, String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = FloodgateConfig::load(cli.config.as_deref())?;
    init_tracing(&config.logging, cli.log_level.as_deref(), cli.log_json);

    info!(version = env!("CARGO_PKG_VERSION"), "Floodgate starting");

    match cli.command {
        Command::Policies => print_policies(&config)?,
        Command::Simulate {
            policy,
            ip,
            requests,
            interval_ms,
        } => simulate(&config, &policy, &ip, requests, interval_ms)?,
    }

    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over the flag, which wins over config.
fn init_tracing(logging: &LoggingConfig, level: Option<&str>, json: bool) {
    let level = level.unwrap_or(&logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json || logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_policies(config: &FloodgateConfig) -> anyhow::Result<()> {
    let limiters = Limiters::from_config(&config.policies, Arc::new(CounterStore::new()))?;

    let mut views = BTreeMap::new();
    for name in PRESET_NAMES {
        let policy = limiters.get(name)?.policy();
        views.insert(
            name,
            PolicyView {
                window_ms: policy.window_ms,
                max: policy.max,
                message: &policy.message,
            },
        );
    }

    print!("{}", serde_yaml::to_string(&views)?);
    Ok(())
}

fn simulate(
    config: &FloodgateConfig,
    policy: &str,
    ip: &str,
    requests: u32,
    interval_ms: u64,
) -> anyhow::Result<()> {
    let start = SystemClock.now_millis();
    let clock = ManualClock::new(start);
    let store = Arc::new(CounterStore::with_clock(
        Arc::new(clock.clone()),
        config.store.sweep_interval(),
    ));
    store.start()?;

    let limiters = Limiters::from_config(&config.policies, store.clone())?;
    let limiter = limiters.get(policy)?;
    let request = [("x-forwarded-for", ip)];

    info!(policy, ip, requests, interval_ms, "Simulating requests");

    for n in 1..=requests {
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        let (allowed, message) = match limiter.check(&request) {
            Ok(status) => {
                status.write_headers(&mut headers);
                (true, None)
            }
            Err(violation) => {
                violation.write_headers(&mut headers);
                (false, Some(violation.message))
            }
        };

        let attempt = Attempt {
            request: n,
            elapsed_ms: clock.now_millis() - start,
            allowed,
            message,
            headers,
        };
        println!("{}", serde_json::to_string(&attempt)?);

        clock.advance(interval_ms);
    }

    store.stop();
    Ok(())
}
