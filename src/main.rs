use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Result};
use clap::Parser;
use eframe::egui::ViewportBuilder;
use tracing::{error, info};

use nvtune::app::NvtuneApp;
use nvtune::config::Paths;
use nvtune::logging;
use nvtune::monitor::{DeviceMonitor, MonitorError};
use nvtune::nvml::NvmlDriver;
use nvtune::profile::ProfileStore;
use nvtune::startup;

#[derive(Parser, Debug)]
#[command(name = "nvtune", version, about = "NVIDIA GPU monitor and tuning utility")]
struct Cli {
    /// Apply the saved profiles to every GPU and exit
    #[arg(long)]
    apply_profiles: bool,

    /// Directory holding profiles.json and nvtune.log
    #[arg(long, value_name = "DIR")]
    config_dir: Option<PathBuf>,
}

fn open_monitor() -> Result<DeviceMonitor, MonitorError> {
    let driver = NvmlDriver::new().map_err(MonitorError::DriverInit)?;
    DeviceMonitor::initialize(Box::new(driver))
}

fn apply_and_exit(paths: &Paths) -> Result<bool> {
    logging::init_console();

    let monitor = open_monitor()?;
    let mut profiles = ProfileStore::new(monitor.devices());
    profiles.load(&paths.profiles);

    let report = monitor.apply_profiles(&profiles);
    for device in report.failed() {
        error!("GPU {} ({}): {:?}", device.index, device.uuid, device.outcome);
    }
    info!("Execution finished.");
    Ok(report.is_success())
}

fn run_interactive(paths: Paths) -> Result<()> {
    let log = logging::init_interactive(&paths.log_file);

    let monitor = open_monitor()?;
    let mut profiles = ProfileStore::new(monitor.devices());
    profiles.load(&paths.profiles);
    info!("Monitoring {} GPU(s).", monitor.devices().len());

    let registrar = startup::platform_registrar(&paths.config_dir);
    let native_options = eframe::NativeOptions {
        viewport: ViewportBuilder::default().with_inner_size([1100.0, 760.0]),
        ..Default::default()
    };

    eframe::run_native(
        "NVTune",
        native_options,
        Box::new(move |cc| {
            Ok(Box::new(NvtuneApp::new(
                cc,
                monitor,
                profiles,
                paths.profiles.clone(),
                log,
                registrar,
            )))
        }),
    )
    .map_err(|e| anyhow!("failed to start the UI: {e}"))
}

fn run(cli: Cli) -> Result<bool> {
    let paths = Paths::resolve(cli.config_dir)?;
    paths.ensure_dir()?;

    if cli.apply_profiles {
        apply_and_exit(&paths)
    } else {
        run_interactive(paths)?;
        Ok(true)
    }
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}
