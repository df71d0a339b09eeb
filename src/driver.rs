//! The hardware boundary.
//!
//! Everything the core knows about a GPU comes through [`DeviceDriver`]. Each
//! query is a separate call so that one failing metric never hides the others.

use thiserror::Error;

use crate::data::OffsetRange;

/// Opaque per-device handle handed out by [`DeviceDriver::enumerate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u32);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The installed driver does not export this function at all.
    #[error("function not available in the installed driver: {0}")]
    Unavailable(String),
    #[error("not supported by this device")]
    NotSupported,
    #[error("insufficient permissions")]
    NoPermission,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("{0}")]
    Failed(String),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Which clock-offset call family the running driver provides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClockOffsetApi {
    /// Struct-based per-pstate offsets (newer drivers).
    Modern,
    /// Scalar GPC VF offset.
    #[default]
    Legacy,
}

/// Optional driver features, resolved once at startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub clock_offset: ClockOffsetApi,
    pub fan_rpm: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemInfo {
    pub driver_version: String,
    pub nvml_version: String,
    /// Encoded as `major * 1000 + minor * 10`.
    pub cuda_version: Option<i32>,
}

impl SystemInfo {
    pub fn cuda_version_string(&self) -> String {
        match self.cuda_version {
            Some(v) => format!("{}.{}", v / 1000, (v % 1000) / 10),
            None => "N/A".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryUsage {
    pub used_mib: u64,
    pub total_mib: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Utilization {
    pub gpu_percent: u32,
    pub memory_percent: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ThrottleFlags {
    pub power_cap: bool,
    pub sw_thermal: bool,
    pub hw_thermal: bool,
}

/// Blocking hardware access. All values are in W, MHz, MiB, °C and percent.
pub trait DeviceDriver {
    fn system_info(&self) -> SystemInfo;
    fn enumerate(&self) -> DriverResult<Vec<DeviceHandle>>;

    fn uuid(&self, handle: DeviceHandle) -> DriverResult<String>;
    fn name(&self, handle: DeviceHandle) -> DriverResult<String>;
    /// `(min, max)` in watts.
    fn power_limit_constraints(&self, handle: DeviceHandle) -> DriverResult<(u32, u32)>;
    fn default_power_limit(&self, handle: DeviceHandle) -> DriverResult<u32>;
    fn max_graphics_clock(&self, handle: DeviceHandle) -> DriverResult<u32>;
    fn clock_offset_range(
        &self,
        handle: DeviceHandle,
        api: ClockOffsetApi,
    ) -> DriverResult<OffsetRange>;

    fn fan_speed_percent(&self, handle: DeviceHandle) -> DriverResult<u32>;
    fn fan_speed_rpm(&self, handle: DeviceHandle) -> DriverResult<u32>;
    fn temperature(&self, handle: DeviceHandle) -> DriverResult<u32>;
    fn power_usage(&self, handle: DeviceHandle) -> DriverResult<u32>;
    fn power_limit(&self, handle: DeviceHandle) -> DriverResult<u32>;
    fn enforced_power_limit(&self, handle: DeviceHandle) -> DriverResult<u32>;
    fn memory(&self, handle: DeviceHandle) -> DriverResult<MemoryUsage>;
    fn utilization(&self, handle: DeviceHandle) -> DriverResult<Utilization>;
    fn graphics_clock(&self, handle: DeviceHandle) -> DriverResult<u32>;
    fn throttle_events(&self, handle: DeviceHandle) -> DriverResult<ThrottleFlags>;

    fn set_power_limit(&self, handle: DeviceHandle, watts: u32) -> DriverResult<()>;
    fn set_clock_offset(
        &self,
        handle: DeviceHandle,
        api: ClockOffsetApi,
        offset_mhz: i32,
    ) -> DriverResult<()>;
    fn lock_max_clock(&self, handle: DeviceHandle, max_mhz: u32) -> DriverResult<()>;
    fn reset_max_clock(&self, handle: DeviceHandle) -> DriverResult<()>;
}
