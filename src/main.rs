//! CLI entry point: run automation scripts against a registered device
//! backend, streaming script output to stdout.

mod device;
mod dispatch;
mod dsl;
mod error;
mod files;
mod host;
mod http;
mod image;
mod lua;
mod methods;
mod paths;
mod settings;
mod value;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use device::{DeviceManager, LoopbackDevice};
use host::{ScriptHost, Severity};
use image::ImageSurface;

#[derive(Parser)]
#[command(name = "actuate", version, about = "Run device automation scripts (DSL or Lua)")]
struct Cli {
    /// Directory holding settings.json (defaults to the working directory).
    #[arg(long)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a script file (.txt for the DSL, .lua for Lua).
    Run {
        script: PathBuf,
        /// Device to select before the script starts.
        #[arg(long)]
        device: Option<String>,
    },
    /// List runnable scripts in the working directory.
    List,
    /// List registered device backends.
    Devices,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_dir = cli
        .config_dir
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let mut settings = settings::load_settings(&config_dir);
    init_tracing(&settings.log_level);

    let devices = Arc::new(DeviceManager::new());
    devices.register(Arc::new(LoopbackDevice::new("loopback")));

    match cli.command {
        Command::Run { script, device } => {
            if device.is_some() {
                settings.default_device = device;
            }
            run_script(&script, devices, settings)
        }
        Command::List => {
            let dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            for file in paths::script_files(&dir) {
                println!("{}", file.display());
            }
            ExitCode::SUCCESS
        }
        Command::Devices => {
            for name in devices.names() {
                println!("{name}");
            }
            ExitCode::SUCCESS
        }
    }
}

fn run_script(
    script: &std::path::Path,
    devices: Arc<DeviceManager>,
    settings: settings::Settings,
) -> ExitCode {
    let host = ScriptHost::new(devices, Arc::new(ImageSurface::new()), settings);

    host.sinks.set_forward(|text| {
        print!("{text}");
    });
    let failed = Arc::new(AtomicBool::new(false));
    let failed_flag = Arc::clone(&failed);
    host.sinks.set_notify(move |message, severity| match severity {
        Severity::Info => tracing::info!("{message}"),
        Severity::Warning => tracing::warn!("{message}"),
        Severity::Error => {
            failed_flag.store(true, Ordering::Relaxed);
            tracing::error!("{message}");
        }
    });

    match host.spawn(script) {
        Ok(id) => host.wait(id),
        Err(e) => {
            eprintln!("cannot start {}: {e}", script.display());
            return ExitCode::FAILURE;
        }
    }

    if failed.load(Ordering::Relaxed) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn init_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
