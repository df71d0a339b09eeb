use std::os::raw::c_int;

use nvml_wrapper::bitmasks::device::ThrottleReasons;
use nvml_wrapper::enum_wrappers::device::{Clock, PerformanceState, Sampling, TemperatureSensor};
use nvml_wrapper::enums::device::{GpuLockedClocksSetting, SampleValue};
use nvml_wrapper::error::{nvml_try, NvmlError};
use nvml_wrapper::{Device, Nvml};
use nvml_wrapper_sys::bindings::{nvmlReturn_t, NvmlLib};
use tracing::debug;

use crate::data::OffsetRange;
use crate::driver::{
    ClockOffsetApi, DeviceDriver, DeviceHandle, DriverError, DriverResult, MemoryUsage,
    SystemInfo, ThrottleFlags, Utilization,
};

const MIB: u64 = 1024 * 1024;

#[cfg(windows)]
const NVML_LIBRARY: &str = "nvml.dll";
#[cfg(not(windows))]
const NVML_LIBRARY: &str = "libnvidia-ml.so.1";

impl From<NvmlError> for DriverError {
    fn from(err: NvmlError) -> Self {
        match err {
            // NVML is loaded at runtime, so older drivers simply lack newer symbols
            NvmlError::FailedToLoadSymbol(symbol) => DriverError::Unavailable(symbol),
            NvmlError::NotSupported => DriverError::NotSupported,
            NvmlError::NoPermission => DriverError::NoPermission,
            NvmlError::InvalidArg => DriverError::InvalidArgument,
            other => DriverError::Failed(other.to_string()),
        }
    }
}

fn milliwatts_to_watts(mw: u32) -> u32 {
    mw / 1000
}

fn offset_range_from(code: nvmlReturn_t, min_mhz: c_int, max_mhz: c_int) -> DriverResult<OffsetRange> {
    nvml_try(code)?;
    Ok(OffsetRange { min_mhz, max_mhz })
}

// Power samples are reported in mW
fn sample_milliwatts(value: &SampleValue) -> Option<u32> {
    match *value {
        SampleValue::U32(mw) => Some(mw),
        SampleValue::U64(mw) => u32::try_from(mw).ok(),
        _ => None,
    }
}

/// [`DeviceDriver`] backed by the NVIDIA Management Library.
pub struct NvmlDriver {
    nvml: Nvml,
    /// Raw bindings for calls the safe wrapper does not expose.
    raw: Option<NvmlLib>,
}

impl NvmlDriver {
    pub fn new() -> DriverResult<Self> {
        let nvml = Nvml::init()?;
        debug!("NVML initialized");
        // SAFETY: loads the same library Nvml::init just initialized; no
        // initialization routine runs on load.
        let raw = match unsafe { NvmlLib::new(NVML_LIBRARY) } {
            Ok(lib) => Some(lib),
            Err(e) => {
                debug!("raw NVML bindings unavailable: {}", e);
                None
            }
        };
        Ok(Self { nvml, raw })
    }

    fn legacy_offset_range(&self, device: &Device<'_>) -> DriverResult<OffsetRange> {
        let unavailable = || DriverError::Unavailable("nvmlDeviceGetGpcClkMinMaxVfOffset".into());
        let lib = self.raw.as_ref().ok_or_else(unavailable)?;
        let sym = lib
            .nvmlDeviceGetGpcClkMinMaxVfOffset
            .as_ref()
            .map_err(|_| unavailable())?;

        let (mut min_mhz, mut max_mhz): (c_int, c_int) = (0, 0);
        // SAFETY: the handle belongs to the initialized library and both
        // out-pointers are valid for the duration of the call.
        let code = unsafe { (*sym)(device.handle(), &mut min_mhz, &mut max_mhz) };
        offset_range_from(code, min_mhz, max_mhz)
    }

    // Device objects borrow the library handle, so they are fetched per call
    fn device(&self, handle: DeviceHandle) -> DriverResult<Device<'_>> {
        Ok(self.nvml.device_by_index(handle.0)?)
    }
}

impl DeviceDriver for NvmlDriver {
    fn system_info(&self) -> SystemInfo {
        SystemInfo {
            driver_version: self
                .nvml
                .sys_driver_version()
                .unwrap_or_else(|_| "N/A".to_string()),
            nvml_version: self
                .nvml
                .sys_nvml_version()
                .unwrap_or_else(|_| "N/A".to_string()),
            cuda_version: self.nvml.sys_cuda_driver_version().ok(),
        }
    }

    fn enumerate(&self) -> DriverResult<Vec<DeviceHandle>> {
        let count = self.nvml.device_count()?;
        Ok((0..count).map(DeviceHandle).collect())
    }

    fn uuid(&self, handle: DeviceHandle) -> DriverResult<String> {
        Ok(self.device(handle)?.uuid()?)
    }

    fn name(&self, handle: DeviceHandle) -> DriverResult<String> {
        Ok(self.device(handle)?.name()?)
    }

    fn power_limit_constraints(&self, handle: DeviceHandle) -> DriverResult<(u32, u32)> {
        let constraints = self.device(handle)?.power_management_limit_constraints()?;
        Ok((
            milliwatts_to_watts(constraints.min_limit),
            milliwatts_to_watts(constraints.max_limit),
        ))
    }

    fn default_power_limit(&self, handle: DeviceHandle) -> DriverResult<u32> {
        let mw = self.device(handle)?.power_management_limit_default()?;
        Ok(milliwatts_to_watts(mw))
    }

    fn max_graphics_clock(&self, handle: DeviceHandle) -> DriverResult<u32> {
        Ok(self.device(handle)?.max_clock_info(Clock::Graphics)?)
    }

    fn clock_offset_range(
        &self,
        handle: DeviceHandle,
        api: ClockOffsetApi,
    ) -> DriverResult<OffsetRange> {
        let device = self.device(handle)?;
        match api {
            ClockOffsetApi::Modern => {
                let offset = device.clock_offset(Clock::Graphics, PerformanceState::Zero)?;
                Ok(OffsetRange {
                    min_mhz: offset.min_clock_offset_mhz,
                    max_mhz: offset.max_clock_offset_mhz,
                })
            }
            ClockOffsetApi::Legacy => self.legacy_offset_range(&device),
        }
    }

    fn fan_speed_percent(&self, handle: DeviceHandle) -> DriverResult<u32> {
        Ok(self.device(handle)?.fan_speed(0)?)
    }

    fn fan_speed_rpm(&self, handle: DeviceHandle) -> DriverResult<u32> {
        Ok(self.device(handle)?.fan_speed_rpm(0)?)
    }

    fn temperature(&self, handle: DeviceHandle) -> DriverResult<u32> {
        Ok(self.device(handle)?.temperature(TemperatureSensor::Gpu)?)
    }

    fn power_usage(&self, handle: DeviceHandle) -> DriverResult<u32> {
        let device = self.device(handle)?;
        let err = match device.power_usage() {
            Ok(mw) => return Ok(milliwatts_to_watts(mw)),
            Err(err) => err,
        };
        // Some boards only report power through the sample buffer
        debug!("power usage query failed ({}), trying power samples", err);
        let samples = device.samples(Sampling::Power, None::<u64>)?;
        samples
            .iter()
            .max_by_key(|s| s.timestamp)
            .and_then(|s| sample_milliwatts(&s.value))
            .map(milliwatts_to_watts)
            .ok_or_else(|| err.into())
    }

    fn power_limit(&self, handle: DeviceHandle) -> DriverResult<u32> {
        Ok(milliwatts_to_watts(
            self.device(handle)?.power_management_limit()?,
        ))
    }

    fn enforced_power_limit(&self, handle: DeviceHandle) -> DriverResult<u32> {
        Ok(milliwatts_to_watts(self.device(handle)?.enforced_power_limit()?))
    }

    fn memory(&self, handle: DeviceHandle) -> DriverResult<MemoryUsage> {
        let mem = self.device(handle)?.memory_info()?;
        Ok(MemoryUsage {
            used_mib: mem.used / MIB,
            total_mib: mem.total / MIB,
        })
    }

    fn utilization(&self, handle: DeviceHandle) -> DriverResult<Utilization> {
        let util = self.device(handle)?.utilization_rates()?;
        Ok(Utilization {
            gpu_percent: util.gpu,
            memory_percent: util.memory,
        })
    }

    fn graphics_clock(&self, handle: DeviceHandle) -> DriverResult<u32> {
        Ok(self.device(handle)?.clock_info(Clock::Graphics)?)
    }

    fn throttle_events(&self, handle: DeviceHandle) -> DriverResult<ThrottleFlags> {
        let reasons = self.device(handle)?.current_throttle_reasons()?;
        Ok(ThrottleFlags {
            power_cap: reasons.contains(ThrottleReasons::SW_POWER_CAP),
            sw_thermal: reasons.contains(ThrottleReasons::SW_THERMAL_SLOWDOWN),
            hw_thermal: reasons.contains(ThrottleReasons::HW_THERMAL_SLOWDOWN),
        })
    }

    fn set_power_limit(&self, handle: DeviceHandle, watts: u32) -> DriverResult<()> {
        let mut device = self.device(handle)?;
        Ok(device.set_power_management_limit(watts.saturating_mul(1000))?)
    }

    fn set_clock_offset(
        &self,
        handle: DeviceHandle,
        api: ClockOffsetApi,
        offset_mhz: i32,
    ) -> DriverResult<()> {
        let mut device = self.device(handle)?;
        match api {
            ClockOffsetApi::Modern => {
                Ok(device.set_clock_offset(Clock::Graphics, PerformanceState::Zero, offset_mhz)?)
            }
            ClockOffsetApi::Legacy => Ok(device.set_gpc_clock_vf_offset(offset_mhz)?),
        }
    }

    fn lock_max_clock(&self, handle: DeviceHandle, max_mhz: u32) -> DriverResult<()> {
        let mut device = self.device(handle)?;
        Ok(device.set_gpu_locked_clocks(GpuLockedClocksSetting::Numeric {
            min_clock_mhz: 0,
            max_clock_mhz: max_mhz,
        })?)
    }

    fn reset_max_clock(&self, handle: DeviceHandle) -> DriverResult<()> {
        let mut device = self.device(handle)?;
        Ok(device.reset_gpu_locked_clocks()?)
    }
}
