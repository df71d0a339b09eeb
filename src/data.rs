use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::driver::DeviceHandle;

/// Drivers occasionally report nonsense for the max graphics clock.
pub const REASONABLE_MAX_CLOCK_MHZ: u32 = 99_999;
pub const CLAMPED_MAX_CLOCK_MHZ: u32 = 5_000;

static VENDOR_WORDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(NVIDIA|GeForce)\s*").expect("vendor pattern is valid"));

// Hardware bounds a profile is validated against
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PowerBounds {
    pub min_w: u32,
    pub max_w: u32,
    pub default_w: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OffsetRange {
    pub min_mhz: i32,
    pub max_mhz: i32,
}

// Static information, fetched once at startup
#[derive(Clone, Debug)]
pub struct StaticInfo {
    pub index: u32,
    pub handle: DeviceHandle,
    pub uuid: String,
    pub name: String,
    pub name_short: String,
    /// `None` when the device has no power management.
    pub power: Option<PowerBounds>,
    pub clock_offset: OffsetRange,
    pub max_clock_mhz: Option<u32>,
}

impl StaticInfo {
    pub fn bounds(&self) -> ProfileBounds {
        ProfileBounds {
            power: self.power,
            clock_offset: self.clock_offset,
            max_clock_mhz: self.max_clock_mhz,
        }
    }
}

/// Limits a profile must stay within for one device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProfileBounds {
    pub power: Option<PowerBounds>,
    pub clock_offset: OffsetRange,
    pub max_clock_mhz: Option<u32>,
}

impl ProfileBounds {
    /// The profile that leaves the hardware at its factory behaviour.
    /// Unknown limits read as 0.
    pub fn default_profile(&self) -> Profile {
        Profile {
            power_limit: self.power.map_or(0, |p| p.default_w),
            gpu_clock_offset: 0,
            max_gpu_clock: self.max_clock_mhz.unwrap_or(0),
        }
    }
}

/// "NVIDIA GeForce RTX 4090" -> "*RTX 4090*"
pub fn short_name(name: &str) -> String {
    let stripped = VENDOR_WORDS.replace_all(name, "");
    format!("*{}*", stripped.trim())
}

/// Clamps a driver-reported max clock into a plausible range.
pub fn sanitize_max_clock(reported: u32) -> u32 {
    if reported > REASONABLE_MAX_CLOCK_MHZ {
        CLAMPED_MAX_CLOCK_MHZ
    } else {
        reported
    }
}

/// Timestamp of the last time a throttle condition was seen.
///
/// Only ever moves forward: observing an inactive condition keeps the
/// previous value, and there is no way to clear it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventLatch(Option<DateTime<Utc>>);

impl EventLatch {
    pub fn observe(&mut self, active: bool, now: DateTime<Utc>) {
        if active {
            self.0 = Some(now);
        }
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.0
    }
}

// Dynamic information, refreshed on every poll. `None` means the query failed.
#[derive(Clone, Debug, Default)]
pub struct DynamicInfo {
    pub fan_speed_percent: Option<u32>,
    pub fan_speed_rpm: Option<u32>,
    pub temperature_c: Option<u32>,
    pub power_usage_w: Option<u32>,
    pub power_limit_w: Option<u32>,
    pub enforced_power_limit_w: Option<u32>,
    pub mem_used_mib: Option<u64>,
    pub mem_total_mib: Option<u64>,
    pub gpu_util_percent: Option<u32>,
    pub mem_util_percent: Option<u32>,
    pub gpu_clock_mhz: Option<u32>,
    pub last_power_cap: EventLatch,
    pub last_sw_thermal: EventLatch,
    pub last_hw_thermal: EventLatch,
}

#[derive(Clone, Debug)]
pub struct DeviceState {
    pub info: StaticInfo,
    pub dynamic: DynamicInfo,
}

impl DeviceState {
    pub fn new(info: StaticInfo) -> Self {
        Self {
            info,
            dynamic: DynamicInfo::default(),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.info.uuid
    }
}

/// User tuning for one device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Watts
    pub power_limit: u32,
    /// MHz, signed
    pub gpu_clock_offset: i32,
    /// MHz
    pub max_gpu_clock: u32,
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "OC ({}W, {:+}MHz, <={}MHz)",
            self.power_limit, self.gpu_clock_offset, self.max_gpu_clock
        )
    }
}
