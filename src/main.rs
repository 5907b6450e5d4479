use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use logshuttle::config::AppConfig;
use logshuttle::context::AppContext;
use logshuttle::core::{ErrorCode, ExportCallbacks, ExportOutcome, HotplugMonitor, LogCallbacks};
use logshuttle::logging::{self, LogConfig};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "logshuttle")]
#[command(about = "Export data logger files to USB flash drives", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalArgs,
}

/// Flags that override the config file. Only the ones actually given are
/// serialized, so absent flags never mask file or env values.
#[derive(Args, Serialize)]
struct GlobalArgs {
    #[serde(skip)]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "true")]
    simulation: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "true")]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "true")]
    json_logs: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    source_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    media_root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch for USB sticks and export all logs whenever one is inserted.
    Monitor,
    /// Export once to the first attached stick.
    Export {
        /// Copy only this file under a generated name instead of
        /// refreshing every log file.
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// List attached removable USB partitions.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Unmount a stick, forcing it if a graceful unmount fails.
    Unmount { mount_point: PathBuf },
    /// Release mounts and directories left behind under the media root.
    Cleanup {
        /// Also force-unmount every USB mount under the media root first.
        #[arg(long)]
        all: bool,
    },
    /// Play the success pattern on the buzzer.
    Beep,
    /// Print the effective configuration.
    Config,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = AppConfig::new(cli.global.config.as_deref(), Some(&cli.global))
        .context("Failed to load configuration")?;

    logging::init(LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
    });

    match cli.command {
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config).context("Failed to render configuration")?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Monitor => run_monitor(config).await.context("Hotplug monitor failed"),
        command => tokio::task::spawn_blocking(move || run_command(config, command))
            .await
            .context("Worker thread panicked")?,
    }
}

async fn run_monitor(config: AppConfig) -> Result<ExitCode> {
    let token = CancellationToken::new();

    let signal_token = token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested, finishing current cycle");
        signal_token.cancel();
    });

    tokio::task::spawn_blocking(move || -> Result<ExitCode> {
        let mut ctx = AppContext::new(config);
        ctx.init().context("Failed to initialize hardware")?;

        let exporter = ctx.exporter()?;
        let mut monitor = HotplugMonitor::new(&exporter, ctx.config.monitor_settings());
        monitor.run(&ctx.config.source_dir, &token, &LogCallbacks::new());
        Ok(ExitCode::SUCCESS)
    })
    .await
    .context("Monitor thread panicked")?
}

fn run_command(config: AppConfig, command: Commands) -> Result<ExitCode> {
    let mut ctx = AppContext::new(config);
    ctx.init().context("Failed to initialize hardware")?;
    let exporter = ctx.exporter()?;

    match command {
        Commands::Export { file } => {
            let callbacks = ConsoleCallbacks;
            let outcome = match file {
                Some(file) => exporter.export_to_first_device(&file, &callbacks),
                None => exporter.export_all(&ctx.config.source_dir, &callbacks),
            };
            Ok(match outcome {
                ExportOutcome::Success { .. } => ExitCode::SUCCESS,
                ExportOutcome::Failure { code, .. } => exit_code(code),
            })
        }
        Commands::List { json } => {
            let devices = exporter.detect_devices().context("Device scan failed")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else if devices.is_empty() {
                println!("No USB devices found");
            } else {
                for device in &devices {
                    let mount = match &device.mount_point {
                        Some(mp) => match exporter.mounts().space_info(mp) {
                            Ok(space) => format!(
                                "{} ({} of {} MB free)",
                                mp.display(),
                                space.free_mb(),
                                space.total_mb()
                            ),
                            Err(_) => mp.display().to_string(),
                        },
                        None => "not mounted".to_string(),
                    };
                    println!(
                        "{}  {} {}  {} MB  {}",
                        device.device_path.display(),
                        device.vendor,
                        device.model,
                        device.size_total / (1024 * 1024),
                        mount
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Unmount { mount_point } => match exporter.mounts().unmount(&mount_point) {
            Ok(mode) => {
                println!("Unmounted {} ({:?})", mount_point.display(), mode);
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                eprintln!("{}", e);
                Ok(exit_code(e.code()))
            }
        },
        Commands::Cleanup { all } => {
            if all {
                let unmounted = exporter.mounts().force_unmount_all();
                println!("Force-unmounted {} mount(s)", unmounted);
            }
            let released = exporter.mounts().cleanup_orphaned_mount_points();
            println!("Released {} orphaned mount(s)", released);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Beep => {
            match ctx.feedback() {
                Some(feedback) if feedback.is_initialized() => feedback.signal_success(),
                _ => warn!("Feedback line disabled or unavailable"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Monitor | Commands::Config => Ok(ExitCode::SUCCESS),
    }
}

/// Legacy error codes are negative; the shell sees their magnitude.
fn exit_code(code: ErrorCode) -> ExitCode {
    ExitCode::from(code.as_i32().unsigned_abs() as u8)
}

/// Progress printed straight to the terminal for interactive exports.
struct ConsoleCallbacks;

impl ExportCallbacks for ConsoleCallbacks {
    fn on_progress(&self, percentage: u8, message: &str) {
        println!("[{:>3}%] {}", percentage, message);
    }

    fn on_complete(&self, _outcome: &ExportOutcome, message: &str) {
        println!("Export complete: {}", message);
    }

    fn on_error(&self, code: ErrorCode, message: &str) {
        eprintln!("Export failed ({}): {}", code, message);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
