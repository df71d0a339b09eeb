use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use eframe::egui::{self, Color32, RichText};
use egui_plot::{Legend, Line, Plot, PlotPoints};
use tracing::{error, info, warn};

use crate::data::{DeviceState, EventLatch};
use crate::history::{HistoryStore, Metric, Window};
use crate::logging::LogBuffer;
use crate::monitor::DeviceMonitor;
use crate::profile::ProfileStore;
use crate::scheduler::{PollScheduler, TICK};
use crate::startup::StartupRegistrar;

const POWER_STEP: f64 = 1.0;
const CLOCK_STEP: f64 = 15.0;
const MAX_CLOCK_MIN_MHZ: u32 = 210;
const LOG_CONSOLE_LINES: usize = 6;
const NARROW_WIDTH: f32 = 900.0;
const GRAPH_HEIGHT: u32 = 100;
const SPARK_HEIGHT: u32 = 6;
const SPARK_BLOCKS: [char; 7] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇'];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Tab {
    Dashboard,
    Graphs,
    Sparklines,
    Profiles,
    About,
}

impl Tab {
    const ALL: [(Tab, &'static str); 5] = [
        (Tab::Dashboard, "Dashboard"),
        (Tab::Graphs, "Graphs"),
        (Tab::Sparklines, "Sparklines"),
        (Tab::Profiles, "OC Profiles"),
        (Tab::About, "About"),
    ];
}

pub struct NvtuneApp {
    monitor: DeviceMonitor,
    profiles: ProfileStore,
    profile_path: PathBuf,
    long: HistoryStore,
    short: HistoryStore,
    scheduler: PollScheduler,
    log: Arc<LogBuffer>,
    registrar: Box<dyn StartupRegistrar>,
    tab: Tab,
    selected_gpu: usize,
}

impl NvtuneApp {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        monitor: DeviceMonitor,
        profiles: ProfileStore,
        profile_path: PathBuf,
        log: Arc<LogBuffer>,
        registrar: Box<dyn StartupRegistrar>,
    ) -> Self {
        cc.egui_ctx.set_visuals(egui::Visuals::dark());

        let long = HistoryStore::new(Window::Long, monitor.devices());
        let short = HistoryStore::new(Window::Short, monitor.devices());
        Self {
            monitor,
            profiles,
            profile_path,
            long,
            short,
            scheduler: PollScheduler::default(),
            log,
            registrar,
            tab: Tab::Dashboard,
            selected_gpu: 0,
        }
    }

    // Polling runs on the UI thread, paced by the scheduler's tick clock
    fn poll(&mut self) {
        let due = self.scheduler.due_ticks(Instant::now());
        for _ in 0..due {
            self.scheduler
                .run_tick(&mut self.monitor, &mut self.long, &mut self.short);
        }
    }

    fn save_and_apply(&mut self) {
        for device in self.monitor.devices() {
            self.profiles.clamp(device.uuid());
        }
        if let Err(e) = self.profiles.save(&self.profile_path) {
            error!("{}", e);
        }
        let report = self.monitor.apply_profiles(&self.profiles);
        if report.is_success() {
            info!("All profiles applied.");
        } else {
            warn!("Profiles failed on {} GPU(s).", report.failed().count());
        }
    }

    fn header(&mut self, ui: &mut egui::Ui) {
        let system = self.monitor.system_info();
        ui.vertical_centered(|ui| {
            ui.label(
                RichText::new(format!(
                    "NVTune {} | Driver {} | CUDA {} | NVML {}",
                    env!("CARGO_PKG_VERSION"),
                    system.driver_version,
                    system.cuda_version_string(),
                    system.nvml_version
                ))
                .strong(),
            );
        });
        ui.separator();
        ui.horizontal(|ui| {
            for (tab, label) in Tab::ALL {
                ui.selectable_value(&mut self.tab, tab, label);
            }
        });
    }

    fn dashboard(&self, ui: &mut egui::Ui) {
        let now = Utc::now();
        let use_short_name = ui.available_width() < NARROW_WIDTH;

        egui::Grid::new("dashboard_grid")
            .striped(true)
            .spacing([12.0, 6.0])
            .show(ui, |ui| {
                for title in [
                    "GPU", "Name", "Util", "Memory", "Temp", "Fan", "Power", "Clock", "Events",
                ] {
                    ui.label(RichText::new(title).strong());
                }
                ui.end_row();

                for device in self.monitor.devices() {
                    let info = &device.info;
                    let d = &device.dynamic;
                    ui.label(info.index.to_string());
                    ui.label(if use_short_name {
                        info.name_short.as_str()
                    } else {
                        info.name.as_str()
                    });
                    ui.label(
                        RichText::new(reading(d.gpu_util_percent, "%")).color(Color32::GREEN),
                    );
                    ui.label(memory_text(device));
                    ui.label(reading(d.temperature_c, "°C"));
                    ui.label(format!(
                        "{} / {}",
                        reading(d.fan_speed_percent, "%"),
                        reading(d.fan_speed_rpm, "R")
                    ));
                    ui.label(power_text(device));
                    ui.label(reading(d.gpu_clock_mhz, "MHz"));
                    ui.horizontal(|ui| {
                        for (code, latch, color) in [
                            ("PC", d.last_power_cap, Color32::from_rgb(255, 128, 0)),
                            ("ST", d.last_sw_thermal, Color32::YELLOW),
                            ("HT", d.last_hw_thermal, Color32::RED),
                        ] {
                            let text = event_label(code, latch, now);
                            if latch.last_seen().is_some() {
                                ui.colored_label(color, text);
                            } else {
                                ui.weak(text);
                            }
                        }
                    });
                    ui.end_row();
                }
            });
    }

    fn graphs(&mut self, ui: &mut egui::Ui) {
        let devices = self.monitor.devices();
        ui.horizontal(|ui| {
            for device in devices {
                let label = format!("GPU {}", device.info.index);
                ui.selectable_value(&mut self.selected_gpu, device.info.index as usize, label);
            }
        });
        let Some(device) = devices.get(self.selected_gpu) else {
            ui.label("No GPUs found.");
            return;
        };
        ui.heading(format!(
            "📈 {} (last {} samples)",
            device.info.name,
            Window::Long.capacity()
        ));

        let colors = [
            Color32::GREEN,
            Color32::from_rgb(0, 128, 255),
            Color32::from_rgb(255, 128, 0),
            Color32::from_rgb(255, 0, 128),
        ];
        let width = self.long.capacity();
        egui::ScrollArea::vertical().show(ui, |ui| {
            for (metric, color) in Metric::ALL.into_iter().zip(colors) {
                let values = self
                    .long
                    .normalized(self.selected_gpu, metric, width, GRAPH_HEIGHT);
                let points: PlotPoints = values
                    .iter()
                    .enumerate()
                    .map(|(i, &v)| [i as f64 - (width - 1) as f64, f64::from(v)])
                    .collect();
                let title = match metric {
                    Metric::Clock => format!(
                        "GPU Clock (% of {} MHz)",
                        reading(device.info.max_clock_mhz, "")
                    ),
                    _ => metric.label().to_string(),
                };

                Plot::new(format!("graph_{:?}", metric))
                    .height(140.0)
                    .legend(Legend::default())
                    .include_y(0.0)
                    .include_y(f64::from(GRAPH_HEIGHT))
                    .x_axis_label("Samples ago (0 = now)")
                    .show(ui, |plot_ui| {
                        plot_ui.line(Line::new(title, points).color(color));
                    });
            }
        });
    }

    fn sparklines(&self, ui: &mut egui::Ui) {
        let width = self.short.capacity();
        for device in self.monitor.devices() {
            let index = device.info.index as usize;
            egui::Frame::group(ui.style()).show(ui, |ui| {
                ui.label(RichText::new(format!("GPU {}: {}", index, device.info.name)).strong());
                egui::Grid::new(format!("sparklines_{index}"))
                    .spacing([12.0, 2.0])
                    .show(ui, |ui| {
                        for title in ["Metric", "Sparkline (60 samples)", "Now", "Max", "Avg"] {
                            ui.label(RichText::new(title).strong());
                        }
                        ui.end_row();

                        for metric in Metric::ALL {
                            let levels = self.short.normalized(index, metric, width, SPARK_HEIGHT);
                            ui.label(metric.label());
                            ui.label(RichText::new(sparkline(&levels)).monospace());
                            ui.label(reading(self.short.latest(index, metric), ""));
                            ui.label(reading(self.short.max(index, metric), ""));
                            ui.label(reading(self.short.average(index, metric), ""));
                            ui.end_row();
                        }
                    });
            });
        }
    }

    fn profiles_tab(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if ui.button("Save and Apply All").clicked() {
                self.save_and_apply();
            }
            if ui.button("Register Service").clicked() {
                if self.registrar.register_startup_task() {
                    info!("Startup task registered.");
                } else {
                    error!("Failed to register startup task.");
                }
            }
            if ui.button("Remove Service").clicked() {
                if self.registrar.unregister_startup_task() {
                    info!("Startup task removed.");
                } else {
                    error!("Failed to remove startup task.");
                }
            }
        });
        ui.weak("Register the nvtune service to automatically apply all saved profiles on startup.");
        ui.separator();

        egui::ScrollArea::vertical().show(ui, |ui| {
            for device in self.monitor.devices() {
                let info = &device.info;
                let Some(profile) = self.profiles.profile_mut(&info.uuid) else {
                    continue;
                };
                ui.group(|ui| {
                    ui.horizontal(|ui| {
                        ui.label(RichText::new(format!("GPU {}: {}", info.index, info.name)).strong());
                        ui.weak(profile.to_string());
                    });
                    match info.power {
                        Some(power) => {
                            ui.add(
                                egui::Slider::new(
                                    &mut profile.power_limit,
                                    power.min_w..=power.max_w,
                                )
                                .step_by(POWER_STEP)
                                .suffix("W")
                                .text("Power Limit"),
                            );
                        }
                        None => {
                            ui.weak("Power Limit: not supported");
                        }
                    }
                    ui.add(
                        egui::Slider::new(
                            &mut profile.gpu_clock_offset,
                            info.clock_offset.min_mhz..=info.clock_offset.max_mhz,
                        )
                        .step_by(CLOCK_STEP)
                        .suffix("MHz")
                        .text("GPU Clock Offset"),
                    );
                    match info.max_clock_mhz {
                        Some(max) => {
                            ui.add(
                                egui::Slider::new(
                                    &mut profile.max_gpu_clock,
                                    MAX_CLOCK_MIN_MHZ.min(max)..=max,
                                )
                                .step_by(CLOCK_STEP)
                                .suffix("MHz")
                                .text("GPU Max Clock"),
                            );
                        }
                        None => {
                            ui.weak("GPU Max Clock: not supported");
                        }
                    }
                });
            }
        });
    }

    fn about(&self, ui: &mut egui::Ui) {
        ui.vertical_centered(|ui| {
            ui.heading(format!("NVTune {}", env!("CARGO_PKG_VERSION")));
        });
        ui.separator();
        ui.label("An NVIDIA GPU tuning utility.");
        ui.label("- Live GPU stats and throttle reasons");
        ui.label("- Overclock / undervolt your GPUs");
        ui.label("- Automatically apply your settings at each startup");
        ui.separator();
        ui.label(RichText::new("Clock Event Codes").strong());
        ui.label("PC: Power Cap. Clocks are held down to stay within the power limit.");
        ui.label("ST: SW Thermal Slowdown. Clocks are reduced to keep the GPU cool.");
        ui.label("HT: HW Thermal Slowdown. Temperature is too high, clocks are forced down.");
    }

    fn log_console(&self, ui: &mut egui::Ui) {
        ui.label(RichText::new("Log Console").strong());
        for line in self.log.recent(LOG_CONSOLE_LINES) {
            let text = RichText::new(line.to_string()).monospace();
            if line.is_error() {
                ui.label(text.color(Color32::LIGHT_RED));
            } else {
                ui.label(text);
            }
        }
    }
}

impl eframe::App for NvtuneApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll();

        egui::TopBottomPanel::top("header").show(ctx, |ui| self.header(ui));
        egui::TopBottomPanel::bottom("log_console").show(ctx, |ui| self.log_console(ui));
        egui::CentralPanel::default().show(ctx, |ui| match self.tab {
            Tab::Dashboard => self.dashboard(ui),
            Tab::Graphs => self.graphs(ui),
            Tab::Sparklines => self.sparklines(ui),
            Tab::Profiles => self.profiles_tab(ui),
            Tab::About => self.about(ui),
        });

        ctx.request_repaint_after(TICK);
    }
}

fn reading<T: Display>(value: Option<T>, unit: &str) -> String {
    match value {
        Some(v) => format!("{v}{unit}"),
        None => "N/A".to_string(),
    }
}

fn memory_text(device: &DeviceState) -> String {
    match (device.dynamic.mem_used_mib, device.dynamic.mem_total_mib) {
        (Some(used), Some(total)) => format!("{used}/{total} MiB"),
        _ => "N/A".to_string(),
    }
}

fn power_text(device: &DeviceState) -> String {
    let d = &device.dynamic;
    let limit = d.enforced_power_limit_w.or(d.power_limit_w);
    format!("{}/{}", reading(d.power_usage_w, "W"), reading(limit, "W"))
}

fn format_age(seconds: i64) -> String {
    let s = seconds.max(0);
    if s >= 86_400 {
        format!("{}d", s / 86_400)
    } else if s >= 3_600 {
        format!("{}h", s / 3_600)
    } else if s >= 60 {
        format!("{}m", s / 60)
    } else {
        format!("{s}s")
    }
}

fn event_label(code: &str, latch: EventLatch, now: DateTime<Utc>) -> String {
    match latch.last_seen() {
        Some(at) => format!("{code}:{}", format_age((now - at).num_seconds())),
        None => format!("{code}:-"),
    }
}

fn sparkline(levels: &[u32]) -> String {
    let top = SPARK_BLOCKS.len() - 1;
    levels
        .iter()
        .map(|&level| SPARK_BLOCKS[(level as usize).min(top)])
        .collect()
}
