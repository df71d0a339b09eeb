use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::apply::{ApplyReport, ProfileApplier};
use crate::data::{
    sanitize_max_clock, short_name, DeviceState, OffsetRange, PowerBounds, StaticInfo,
    CLAMPED_MAX_CLOCK_MHZ,
};
use crate::driver::{
    Capabilities, ClockOffsetApi, DeviceDriver, DeviceHandle, DriverError, SystemInfo,
};
use crate::profile::ProfileStore;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("failed to initialize the GPU driver: {0}")]
    DriverInit(#[source] DriverError),
    #[error("failed to enumerate devices: {0}")]
    Enumerate(#[source] DriverError),
    #[error("failed to get {what} for GPU {index}: {source}")]
    StaticQuery {
        index: u32,
        what: &'static str,
        #[source]
        source: DriverError,
    },
}

/// In-memory mirror of every device's hardware state.
///
/// The device list is fixed after [`DeviceMonitor::initialize`].
pub struct DeviceMonitor {
    driver: Box<dyn DeviceDriver>,
    capabilities: Capabilities,
    system: SystemInfo,
    devices: Vec<DeviceState>,
}

impl DeviceMonitor {
    pub fn initialize(driver: Box<dyn DeviceDriver>) -> Result<Self, MonitorError> {
        let system = driver.system_info();
        let handles = driver.enumerate().map_err(MonitorError::Enumerate)?;
        let capabilities = match handles.first() {
            Some(&handle) => detect_capabilities(driver.as_ref(), handle),
            None => Capabilities::default(),
        };
        info!(
            "Driver {}, {} GPU(s), clock offset API: {:?}, fan RPM: {}",
            system.driver_version,
            handles.len(),
            capabilities.clock_offset,
            capabilities.fan_rpm
        );

        let mut devices = Vec::with_capacity(handles.len());
        for (index, handle) in handles.into_iter().enumerate() {
            let info = query_static(driver.as_ref(), capabilities, index as u32, handle)?;
            devices.push(DeviceState::new(info));
        }

        Ok(Self {
            driver,
            capabilities,
            system,
            devices,
        })
    }

    pub fn refresh(&mut self) {
        self.refresh_at(Utc::now());
    }

    /// Re-reads every dynamic metric. A failed query blanks only its own field.
    pub fn refresh_at(&mut self, now: DateTime<Utc>) {
        let driver = self.driver.as_ref();
        for state in &mut self.devices {
            let handle = state.info.handle;
            let d = &mut state.dynamic;

            d.fan_speed_percent = driver.fan_speed_percent(handle).ok();
            d.fan_speed_rpm = if self.capabilities.fan_rpm {
                driver.fan_speed_rpm(handle).ok()
            } else {
                None
            };
            d.temperature_c = driver.temperature(handle).ok();
            d.power_usage_w = driver.power_usage(handle).ok();
            d.power_limit_w = driver.power_limit(handle).ok();
            d.enforced_power_limit_w = driver.enforced_power_limit(handle).ok();

            let mem = driver.memory(handle).ok();
            d.mem_used_mib = mem.map(|m| m.used_mib);
            d.mem_total_mib = mem.map(|m| m.total_mib);

            let util = driver.utilization(handle).ok();
            d.gpu_util_percent = util.map(|u| u.gpu_percent);
            d.mem_util_percent = util.map(|u| u.memory_percent);

            d.gpu_clock_mhz = driver.graphics_clock(handle).ok();

            match driver.throttle_events(handle) {
                Ok(flags) => {
                    d.last_power_cap.observe(flags.power_cap, now);
                    d.last_sw_thermal.observe(flags.sw_thermal, now);
                    d.last_hw_thermal.observe(flags.hw_thermal, now);
                }
                Err(e) => debug!("GPU {}: throttle reasons unavailable: {}", state.info.index, e),
            }
        }
    }

    pub fn apply_profiles(&self, profiles: &ProfileStore) -> ApplyReport {
        ProfileApplier::new(self.driver.as_ref(), self.capabilities).apply(&self.devices, profiles)
    }

    pub fn devices(&self) -> &[DeviceState] {
        &self.devices
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn system_info(&self) -> &SystemInfo {
        &self.system
    }
}

/// Decides once which optional driver functions exist.
///
/// Only a missing symbol selects the fallback; an ordinary failure on the
/// checked device still means the function is there.
fn detect_capabilities(driver: &dyn DeviceDriver, handle: DeviceHandle) -> Capabilities {
    let clock_offset = match driver.clock_offset_range(handle, ClockOffsetApi::Modern) {
        Err(DriverError::Unavailable(_)) => ClockOffsetApi::Legacy,
        _ => ClockOffsetApi::Modern,
    };
    let fan_rpm = !matches!(driver.fan_speed_rpm(handle), Err(DriverError::Unavailable(_)));
    Capabilities {
        clock_offset,
        fan_rpm,
    }
}

fn query_static(
    driver: &dyn DeviceDriver,
    capabilities: Capabilities,
    index: u32,
    handle: DeviceHandle,
) -> Result<StaticInfo, MonitorError> {
    let mandatory = |what: &'static str| {
        move |source: DriverError| MonitorError::StaticQuery {
            index,
            what,
            source,
        }
    };

    let uuid = driver.uuid(handle).map_err(mandatory("UUID"))?;
    let name = driver.name(handle).map_err(mandatory("name"))?;

    let power = match (
        driver.power_limit_constraints(handle),
        driver.default_power_limit(handle),
    ) {
        (Ok((min_w, max_w)), Ok(default_w)) => Some(PowerBounds {
            min_w,
            max_w,
            default_w,
        }),
        (Err(e), _) | (_, Err(e)) => {
            warn!("GPU {}: power limits unavailable ({}), power limit disabled", index, e);
            None
        }
    };

    let max_clock_mhz = match driver.max_graphics_clock(handle) {
        Ok(reported) => {
            let clock = sanitize_max_clock(reported);
            if clock != reported {
                warn!(
                    "GPU {} reported an unrealistic max clock ({}MHz). Clamping to {}MHz.",
                    index, reported, CLAMPED_MAX_CLOCK_MHZ
                );
            }
            Some(clock)
        }
        Err(e) => {
            warn!("GPU {}: max clock unavailable ({}), clock limit disabled", index, e);
            None
        }
    };

    let clock_offset = match driver.clock_offset_range(handle, capabilities.clock_offset) {
        Ok(range) => range,
        Err(e) => {
            warn!("GPU {}: clock offset range unavailable ({}), offsets disabled", index, e);
            OffsetRange::default()
        }
    };

    Ok(StaticInfo {
        index,
        handle,
        name_short: short_name(&name),
        uuid,
        name,
        power,
        clock_offset,
        max_clock_mhz,
    })
}
