use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};

use joule_profiler::airtime::RadioMode;
use joule_profiler::config::ProfilerConfig;
use joule_profiler::report::format_bitrate;

#[derive(Parser)]
#[command(
    name = "joule-profiler",
    about = "Energy and throughput profiler for WLAN probe campaigns",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the campaign in a descriptor and write the results back into it
    Run {
        /// Energino serial device
        #[arg(short = 'd', long)]
        device: Option<PathBuf>,

        /// Serial line speed
        #[arg(short = 'b', long)]
        bps: Option<u32>,

        /// Meter reporting interval in milliseconds
        #[arg(short = 'i', long)]
        interval: Option<u32>,

        /// Campaign descriptor (JSON)
        #[arg(short = 'j', long)]
        descriptor: Option<PathBuf>,

        #[command(flatten)]
        radio: RadioArgs,

        /// Verbose (debug) logging
        #[arg(short = 'v', long)]
        verbose: bool,

        /// Write the log to this file instead of stdout
        #[arg(short = 'l', long)]
        log: Option<PathBuf>,

        /// Use simulated probes and meter instead of real hardware
        #[arg(long)]
        simulate: bool,
    },

    /// Print the airtime model figures for one frame size
    Airtime {
        /// Frame payload size in bytes
        #[arg(long)]
        size: u32,

        #[command(flatten)]
        radio: RadioArgs,
    },
}

#[derive(Args)]
struct RadioArgs {
    /// Hardware mode (e.g. 11a)
    #[arg(short = 'm', long)]
    hwmode: Option<String>,

    /// Channel width
    #[arg(short = 'c', long)]
    channel: Option<String>,

    /// Spatial streams
    #[arg(short = 's', long)]
    streams: Option<u32>,
}

impl RadioArgs {
    fn apply(self, config: &mut ProfilerConfig) {
        if let Some(hwmode) = self.hwmode {
            config.radio.hwmode = hwmode;
        }
        if let Some(channel) = self.channel {
            config.radio.channel = channel;
        }
        if let Some(streams) = self.streams {
            config.radio.streams = streams;
        }
    }
}

fn init_tracing(config: &ProfilerConfig, verbose: bool) -> Result<()> {
    let default_level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    match &config.logging.file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ProfilerConfig::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            device,
            bps,
            interval,
            descriptor,
            radio,
            verbose,
            log,
            simulate,
        } => {
            radio.apply(&mut config);
            if let Some(device) = device {
                config.meter.device = device;
            }
            if let Some(bps) = bps {
                config.meter.bps = bps;
            }
            if let Some(interval) = interval {
                config.meter.interval_ms = interval;
            }
            if let Some(descriptor) = descriptor {
                config.campaign.descriptor = descriptor;
            }
            if log.is_some() {
                config.logging.file = log;
            }

            init_tracing(&config, verbose)?;

            tokio::select! {
                outcome = joule_profiler::run(&config, simulate) => {
                    if let Err(e) = &outcome {
                        error!(error = %format!("{:#}", e), "campaign failed");
                    }
                    outcome?;
                }
                signal = shutdown_signal() => {
                    info!("received {}, terminating", signal);
                }
            }
        }
        Commands::Airtime { size, radio } => {
            radio.apply(&mut config);
            let mode = RadioMode::lookup(
                &config.radio.hwmode,
                &config.radio.channel,
                config.radio.streams,
            )?;
            let airtime = mode.estimate_airtime_micros(size)?;
            let tps = mode.max_safe_rate_hz(size)?;

            println!("Medium:           {}", mode);
            println!("Frame size:       {} bytes", size);
            println!("Airtime:          {} usec", airtime);
            println!("Max safe rate:    {} pkt/s", tps);
            println!(
                "Max goodput:      {}",
                format_bitrate(size as f64 * 8.0 * tps as f64)
            );
        }
    }

    Ok(())
}

/// Resolves with the name of the first termination signal received.
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
