//! NVIDIA GPU monitoring and tuning.
//!
//! [`monitor::DeviceMonitor`] mirrors every GPU's state through a
//! [`driver::DeviceDriver`], [`history::HistoryStore`] keeps bounded sample
//! windows of it, and [`profile::ProfileStore`] holds the per-GPU power and
//! clock profiles that [`apply::ProfileApplier`] writes back to hardware.

pub mod app;
pub mod apply;
pub mod config;
pub mod data;
pub mod driver;
pub mod history;
pub mod logging;
pub mod monitor;
pub mod nvml;
pub mod profile;
pub mod scheduler;
pub mod startup;
