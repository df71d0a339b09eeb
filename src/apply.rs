use std::fmt;

use tracing::{error, info, warn};

use crate::data::DeviceState;
use crate::driver::{Capabilities, ClockOffsetApi, DeviceDriver, DriverError};
use crate::profile::ProfileStore;

/// The three hardware writes, in the order they are issued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyStep {
    PowerLimit,
    ClockOffset,
    MaxClock,
}

impl fmt::Display for ApplyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ApplyStep::PowerLimit => "PL",
            ApplyStep::ClockOffset => "CO",
            ApplyStep::MaxClock => "LC",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepFailure {
    pub step: ApplyStep,
    pub reason: DriverError,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceOutcome {
    /// Profile equals the hardware default; nothing was written.
    Skipped,
    Applied,
    PartialFailure(Vec<StepFailure>),
    MissingProfile,
}

impl DeviceOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeviceOutcome::Skipped | DeviceOutcome::Applied)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceReport {
    pub index: u32,
    pub uuid: String,
    pub outcome: DeviceOutcome,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub devices: Vec<DeviceReport>,
}

impl ApplyReport {
    /// True only if every device either applied cleanly or was skipped.
    pub fn is_success(&self) -> bool {
        self.devices.iter().all(|d| d.outcome.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &DeviceReport> {
        self.devices.iter().filter(|d| !d.outcome.is_success())
    }
}

/// Pushes profiles to hardware. Not transactional: devices already written
/// stay written when a later one fails.
pub struct ProfileApplier<'a> {
    driver: &'a dyn DeviceDriver,
    capabilities: Capabilities,
}

impl<'a> ProfileApplier<'a> {
    pub fn new(driver: &'a dyn DeviceDriver, capabilities: Capabilities) -> Self {
        Self {
            driver,
            capabilities,
        }
    }

    pub fn apply(&self, devices: &[DeviceState], profiles: &ProfileStore) -> ApplyReport {
        info!("Applying profiles for {} GPUs.", devices.len());
        let devices = devices
            .iter()
            .map(|device| DeviceReport {
                index: device.info.index,
                uuid: device.uuid().to_string(),
                outcome: self.apply_device(device, profiles),
            })
            .collect();
        ApplyReport { devices }
    }

    fn apply_device(&self, device: &DeviceState, profiles: &ProfileStore) -> DeviceOutcome {
        let info = &device.info;
        let Some(profile) = profiles.profile(&info.uuid) else {
            error!("No profile for GPU {} ({}).", info.index, info.uuid);
            return DeviceOutcome::MissingProfile;
        };

        if *profile == info.bounds().default_profile() {
            info!("Skip for GPU {} because profile is default.", info.index);
            return DeviceOutcome::Skipped;
        }

        info!("Applying profile {} for GPU {}.", profile, info.index);
        let handle = info.handle;

        let power = match info.power {
            Some(_) => Some(self.driver.set_power_limit(handle, profile.power_limit)),
            None => {
                warn!("GPU {} has no power limit control. Skipping power limit.", info.index);
                None
            }
        };

        if self.capabilities.clock_offset == ClockOffsetApi::Legacy {
            warn!(
                "Using deprecated API to set clock offset. Please consider updating the driver for better compatibility."
            );
        }
        let offset = Some(self.driver.set_clock_offset(
            handle,
            self.capabilities.clock_offset,
            profile.gpu_clock_offset,
        ));

        let clock = match info.max_clock_mhz {
            Some(max) if profile.max_gpu_clock < max => {
                Some(self.driver.lock_max_clock(handle, profile.max_gpu_clock))
            }
            Some(_) => Some(self.driver.reset_max_clock(handle)),
            None => {
                warn!("GPU {} has no known max clock. Skipping clock limit.", info.index);
                None
            }
        };

        let failures: Vec<StepFailure> = [
            (ApplyStep::PowerLimit, power),
            (ApplyStep::ClockOffset, offset),
            (ApplyStep::MaxClock, clock),
        ]
        .into_iter()
        .filter_map(|(step, result)| {
            result
                .and_then(Result::err)
                .map(|reason| StepFailure { step, reason })
        })
        .collect();

        if failures.is_empty() {
            info!("Profile Successfully Applied for GPU {}.", info.index);
            DeviceOutcome::Applied
        } else {
            let detail = failures
                .iter()
                .map(|f| format!("{}({})", f.step, f.reason))
                .collect::<Vec<_>>()
                .join(", ");
            error!("Failed to apply profile for GPU {}. States: {}.", info.index, detail);
            DeviceOutcome::PartialFailure(failures)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Profile;
    use crate::driver::fake::{Call, FakeDriver, FakeGpu};
    use crate::monitor::DeviceMonitor;

    fn setup(gpus: Vec<FakeGpu>) -> (FakeDriver, DeviceMonitor, ProfileStore) {
        let fake = FakeDriver::new(gpus);
        let monitor = DeviceMonitor::initialize(Box::new(fake.clone())).unwrap();
        let store = ProfileStore::new(monitor.devices());
        (fake, monitor, store)
    }

    #[test]
    fn default_profile_is_skipped_without_writes() {
        let (fake, monitor, store) = setup(vec![FakeGpu::rtx("GPU-a")]);
        assert_eq!(
            store.profile("GPU-a"),
            Some(&Profile {
                power_limit: 250,
                gpu_clock_offset: 0,
                max_gpu_clock: 2520
            })
        );

        let report = monitor.apply_profiles(&store);
        assert!(report.is_success());
        assert_eq!(report.devices[0].outcome, DeviceOutcome::Skipped);
        assert!(fake.writes().is_empty());
    }

    #[test]
    fn writes_in_order_and_locks_below_max() {
        let (fake, monitor, mut store) = setup(vec![FakeGpu::rtx("GPU-a")]);
        *store.profile_mut("GPU-a").unwrap() = Profile {
            power_limit: 200,
            gpu_clock_offset: 150,
            max_gpu_clock: 2400,
        };

        let report = monitor.apply_profiles(&store);
        assert!(report.is_success());
        assert_eq!(report.devices[0].outcome, DeviceOutcome::Applied);
        assert_eq!(
            fake.writes(),
            vec![
                Call::SetPowerLimit(0, 200),
                Call::SetClockOffset(0, ClockOffsetApi::Modern, 150),
                Call::LockMaxClock(0, 2400),
            ]
        );
    }

    #[test]
    fn max_clock_at_hardware_max_resets_lock() {
        let (fake, monitor, mut store) = setup(vec![FakeGpu::rtx("GPU-a")]);
        store.profile_mut("GPU-a").unwrap().power_limit = 280;

        monitor.apply_profiles(&store);
        assert_eq!(fake.writes().last(), Some(&Call::ResetMaxClock(0)));
    }

    #[test]
    fn legacy_offset_api_is_used_when_detected() {
        let mut fake = FakeDriver::new(vec![FakeGpu::rtx("GPU-a")]);
        fake.modern_offsets = false;
        let monitor = DeviceMonitor::initialize(Box::new(fake.clone())).unwrap();
        let mut store = ProfileStore::new(monitor.devices());
        store.profile_mut("GPU-a").unwrap().gpu_clock_offset = -50;

        monitor.apply_profiles(&store);
        assert!(fake
            .writes()
            .contains(&Call::SetClockOffset(0, ClockOffsetApi::Legacy, -50)));
    }

    #[test]
    fn one_failed_step_does_not_block_the_others() {
        let (fake, monitor, mut store) = setup(vec![FakeGpu::rtx("GPU-a")]);
        store.profile_mut("GPU-a").unwrap().gpu_clock_offset = 100;
        fake.fail("set_power_limit");

        let report = monitor.apply_profiles(&store);
        assert!(!report.is_success());
        assert_eq!(fake.writes().len(), 3);
        assert_eq!(
            report.devices[0].outcome,
            DeviceOutcome::PartialFailure(vec![StepFailure {
                step: ApplyStep::PowerLimit,
                reason: DriverError::NoPermission,
            }])
        );
    }

    #[test]
    fn failure_on_one_device_does_not_stop_the_next() {
        let (fake, monitor, mut store) =
            setup(vec![FakeGpu::rtx("GPU-a"), FakeGpu::rtx("GPU-b")]);
        store.profile_mut("GPU-a").unwrap().max_gpu_clock = 2000;
        store.profile_mut("GPU-b").unwrap().max_gpu_clock = 2100;
        fake.fail("lock_max_clock");

        let report = monitor.apply_profiles(&store);
        assert!(!report.is_success());
        assert_eq!(report.failed().count(), 2);
        assert!(fake.writes().contains(&Call::SetPowerLimit(1, 250)));
        assert!(fake.writes().contains(&Call::LockMaxClock(1, 2100)));
    }

    #[test]
    fn mixed_skip_and_apply() {
        let (fake, monitor, mut store) =
            setup(vec![FakeGpu::rtx("GPU-a"), FakeGpu::rtx("GPU-b")]);
        store.profile_mut("GPU-b").unwrap().gpu_clock_offset = 90;

        let report = monitor.apply_profiles(&store);
        assert!(report.is_success());
        assert_eq!(report.devices[0].outcome, DeviceOutcome::Skipped);
        assert_eq!(report.devices[1].outcome, DeviceOutcome::Applied);
        assert!(fake.writes().iter().all(|c| !matches!(
            c,
            Call::SetPowerLimit(0, _) | Call::SetClockOffset(0, ..) | Call::LockMaxClock(0, _)
        )));
    }

    #[test]
    fn device_without_profile_fails() {
        let (fake, monitor, _) = setup(vec![FakeGpu::rtx("GPU-a")]);
        let empty = ProfileStore::new(&[]);
        let report = monitor.apply_profiles(&empty);
        assert!(!report.is_success());
        assert_eq!(report.devices[0].outcome, DeviceOutcome::MissingProfile);
        assert!(fake.writes().is_empty());
    }

    #[test]
    fn unknown_limits_skip_their_writes() {
        let fake = FakeDriver::new(vec![FakeGpu::rtx("GPU-m")]);
        fake.fail("default_power_limit");
        fake.fail("max_graphics_clock");
        let monitor = DeviceMonitor::initialize(Box::new(fake.clone())).unwrap();
        let mut store = ProfileStore::new(monitor.devices());
        store.profile_mut("GPU-m").unwrap().gpu_clock_offset = 60;

        let report = monitor.apply_profiles(&store);
        assert!(report.is_success());
        assert_eq!(report.devices[0].outcome, DeviceOutcome::Applied);
        assert_eq!(
            fake.writes(),
            vec![Call::SetClockOffset(0, ClockOffsetApi::Modern, 60)]
        );
    }
}
