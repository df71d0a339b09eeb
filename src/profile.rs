use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{error, info};

use crate::data::{DeviceState, Profile, ProfileBounds};

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("failed to serialize profiles: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// What happened when reading the profile file.
#[derive(Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Number of stored profiles that matched a present device.
    Loaded(usize),
    Missing,
    Malformed(String),
}

// Never panics, even when a driver reports min > max
fn clamp_i64(value: i64, lo: i64, hi: i64) -> i64 {
    value.min(hi).max(lo)
}

// On-disk shape of one profile; absent fields keep the current value
#[derive(Debug, Default, Deserialize)]
struct StoredProfile {
    power_limit: Option<i64>,
    gpu_clock_offset: Option<i64>,
    max_gpu_clock: Option<i64>,
}

/// The user's profiles, one per device UUID, always within hardware bounds.
#[derive(Clone, Debug)]
pub struct ProfileStore {
    profiles: BTreeMap<String, Profile>,
    bounds: BTreeMap<String, ProfileBounds>,
}

impl ProfileStore {
    /// Seeds a default profile for every enumerated device.
    pub fn new(devices: &[DeviceState]) -> Self {
        let mut profiles = BTreeMap::new();
        let mut bounds = BTreeMap::new();
        for device in devices {
            let b = device.info.bounds();
            profiles.insert(device.uuid().to_string(), b.default_profile());
            bounds.insert(device.uuid().to_string(), b);
        }
        Self { profiles, bounds }
    }

    pub fn load(&mut self, path: &Path) -> LoadOutcome {
        info!("Loading profiles from {}.", path.display());

        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("Profile file not found. Using defaults.");
                return LoadOutcome::Missing;
            }
            Err(e) => {
                error!("Failed to read {}. Using defaults. Details: {}", path.display(), e);
                return LoadOutcome::Malformed(e.to_string());
            }
        };

        let stored = match self.parse_present(&text) {
            Ok(stored) => stored,
            Err(e) => {
                error!("Error parsing profiles file. Using defaults. Details: {}", e);
                return LoadOutcome::Malformed(e);
            }
        };

        let matched = stored.len();
        for (uuid, entry) in stored {
            if let (Some(profile), Some(bounds)) =
                (self.profiles.get_mut(&uuid), self.bounds.get(&uuid))
            {
                *profile = clamp_stored(profile, &entry, bounds);
            }
        }

        info!("Profiles loaded and validated against hardware limits.");
        LoadOutcome::Loaded(matched)
    }

    // Entries for present devices only, all validated before any is applied.
    // Keys that are not a present device's UUID are never looked at.
    fn parse_present(&self, text: &str) -> Result<Vec<(String, StoredProfile)>, String> {
        let root: Map<String, Value> = serde_json::from_str(text).map_err(|e| e.to_string())?;
        self.profiles
            .keys()
            .filter_map(|uuid| root.get(uuid).map(|value| (uuid, value)))
            .map(|(uuid, value)| {
                StoredProfile::deserialize(value)
                    .map(|entry| (uuid.clone(), entry))
                    .map_err(|e| format!("{uuid}: {e}"))
            })
            .collect()
    }

    /// Overwrites `path` with every profile, keyed by UUID.
    pub fn save(&self, path: &Path) -> Result<(), ProfileError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.profiles.serialize(&mut ser)?;

        fs::write(path, buf).map_err(|source| ProfileError::Write {
            path: path.display().to_string(),
            source,
        })?;
        info!("Profiles saved to {}.", path.display());
        Ok(())
    }

    pub fn profile(&self, uuid: &str) -> Option<&Profile> {
        self.profiles.get(uuid)
    }

    pub fn profile_mut(&mut self, uuid: &str) -> Option<&mut Profile> {
        self.profiles.get_mut(uuid)
    }

    pub fn all(&self) -> &BTreeMap<String, Profile> {
        &self.profiles
    }

    /// Brings an edited profile back inside its device's limits.
    pub fn clamp(&mut self, uuid: &str) {
        if let (Some(profile), Some(bounds)) = (self.profiles.get_mut(uuid), self.bounds.get(uuid)) {
            *profile = clamp_stored(profile, &StoredProfile::default(), bounds);
        }
    }
}

fn clamp_stored(current: &Profile, stored: &StoredProfile, bounds: &ProfileBounds) -> Profile {
    let power = stored
        .power_limit
        .unwrap_or_else(|| i64::from(current.power_limit));
    let offset = stored
        .gpu_clock_offset
        .unwrap_or_else(|| i64::from(current.gpu_clock_offset));
    let max_clock = stored
        .max_gpu_clock
        .unwrap_or_else(|| i64::from(current.max_gpu_clock));

    // Unknown limits pin the field to 0, which the applier never writes
    Profile {
        power_limit: match bounds.power {
            Some(b) => clamp_i64(power, i64::from(b.min_w), i64::from(b.max_w)) as u32,
            None => 0,
        },
        gpu_clock_offset: clamp_i64(
            offset,
            i64::from(bounds.clock_offset.min_mhz),
            i64::from(bounds.clock_offset.max_mhz),
        ) as i32,
        max_gpu_clock: match bounds.max_clock_mhz {
            Some(max) => clamp_i64(max_clock, 0, i64::from(max)) as u32,
            None => 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{OffsetRange, PowerBounds, StaticInfo};
    use crate::driver::DeviceHandle;
    use tempfile::TempDir;

    fn device(uuid: &str) -> DeviceState {
        DeviceState::new(StaticInfo {
            index: 0,
            handle: DeviceHandle(0),
            uuid: uuid.into(),
            name: "NVIDIA GeForce RTX 4080".into(),
            name_short: "*RTX 4080*".into(),
            power: Some(PowerBounds {
                min_w: 120,
                max_w: 300,
                default_w: 250,
            }),
            clock_offset: OffsetRange {
                min_mhz: -200,
                max_mhz: 300,
            },
            max_clock_mhz: Some(2520),
        })
    }

    fn store() -> ProfileStore {
        ProfileStore::new(&[device("GPU-a"), device("GPU-b")])
    }

    #[test]
    fn seeds_defaults() {
        let store = store();
        assert_eq!(store.all().len(), 2);
        assert_eq!(
            store.profile("GPU-a"),
            Some(&Profile {
                power_limit: 250,
                gpu_clock_offset: 0,
                max_gpu_clock: 2520
            })
        );
    }

    #[test]
    fn load_clamps_to_device_bounds() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profiles.json");
        fs::write(
            &path,
            r#"{"GPU-a": {"power_limit": 999, "gpu_clock_offset": -500, "max_gpu_clock": 9999}}"#,
        )
        .unwrap();

        let mut store = store();
        assert_eq!(store.load(&path), LoadOutcome::Loaded(1));
        assert_eq!(
            store.profile("GPU-a"),
            Some(&Profile {
                power_limit: 300,
                gpu_clock_offset: -200,
                max_gpu_clock: 2520
            })
        );
    }

    #[test]
    fn missing_fields_and_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profiles.json");
        fs::write(
            &path,
            r#"{
                "GPU-b": {"gpu_clock_offset": 120, "fan_curve": [1, 2]},
                "GPU-gone": {"power_limit": 150}
            }"#,
        )
        .unwrap();

        let mut store = store();
        assert_eq!(store.load(&path), LoadOutcome::Loaded(1));
        assert_eq!(
            store.profile("GPU-b"),
            Some(&Profile {
                power_limit: 250,
                gpu_clock_offset: 120,
                max_gpu_clock: 2520
            })
        );
        assert!(store.profile("GPU-gone").is_none());
    }

    #[test]
    fn non_profile_top_level_keys_are_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profiles.json");
        fs::write(&path, r#"{"GPU-a": {"power_limit": 200}, "schema": 2}"#).unwrap();

        let mut store = store();
        assert_eq!(store.load(&path), LoadOutcome::Loaded(1));
        assert_eq!(store.profile("GPU-a").map(|p| p.power_limit), Some(200));
    }

    #[test]
    fn bad_entry_for_absent_gpu_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profiles.json");
        fs::write(
            &path,
            r#"{"GPU-a": {"power_limit": 200}, "GPU-old": {"power_limit": 180.5}}"#,
        )
        .unwrap();

        let mut store = store();
        assert_eq!(store.load(&path), LoadOutcome::Loaded(1));
        assert_eq!(store.profile("GPU-a").map(|p| p.power_limit), Some(200));
    }

    #[test]
    fn top_level_must_be_an_object() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profiles.json");
        fs::write(&path, "[1, 2, 3]").unwrap();
        assert!(matches!(store().load(&path), LoadOutcome::Malformed(_)));
    }

    #[test]
    fn unknown_limits_load_as_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profiles.json");
        fs::write(
            &path,
            r#"{"GPU-m": {"power_limit": 90, "gpu_clock_offset": 50, "max_gpu_clock": 1500}}"#,
        )
        .unwrap();

        let mut mobile = device("GPU-m");
        mobile.info.power = None;
        mobile.info.max_clock_mhz = None;
        let mut store = ProfileStore::new(&[mobile]);
        assert_eq!(store.load(&path), LoadOutcome::Loaded(1));
        assert_eq!(
            store.profile("GPU-m"),
            Some(&Profile {
                power_limit: 0,
                gpu_clock_offset: 50,
                max_gpu_clock: 0
            })
        );
    }

    #[test]
    fn missing_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let mut store = store();
        assert_eq!(store.load(&dir.path().join("nope.json")), LoadOutcome::Missing);
        assert_eq!(store.profile("GPU-a").map(|p| p.power_limit), Some(250));
    }

    #[test]
    fn malformed_file_applies_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profiles.json");
        // first entry is fine, second has a wrong type
        fs::write(
            &path,
            r#"{"GPU-a": {"power_limit": 200}, "GPU-b": {"power_limit": "lots"}}"#,
        )
        .unwrap();

        let mut store = store();
        assert!(matches!(store.load(&path), LoadOutcome::Malformed(_)));
        assert_eq!(store.profile("GPU-a").map(|p| p.power_limit), Some(250));

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(store.load(&path), LoadOutcome::Malformed(_)));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profiles.json");

        let mut original = store();
        *original.profile_mut("GPU-a").unwrap() = Profile {
            power_limit: 200,
            gpu_clock_offset: -75,
            max_gpu_clock: 1800,
        };
        original.save(&path).unwrap();

        let mut reloaded = store();
        reloaded.load(&path);
        assert_eq!(reloaded.all(), original.all());
    }

    #[test]
    fn save_uses_four_space_indent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profiles.json");
        ProfileStore::new(&[device("GPU-a")]).save(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("{\n    \"GPU-a\": {\n        \"power_limit\": 250,"));
    }

    #[test]
    fn save_failure_is_reported_and_keeps_profiles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing-dir").join("profiles.json");
        let mut store = store();
        store.profile_mut("GPU-a").unwrap().power_limit = 180;

        assert!(matches!(store.save(&path), Err(ProfileError::Write { .. })));
        assert_eq!(store.profile("GPU-a").map(|p| p.power_limit), Some(180));
    }

    #[test]
    fn clamp_after_edit() {
        let mut store = store();
        store.profile_mut("GPU-a").unwrap().gpu_clock_offset = 1000;
        store.clamp("GPU-a");
        assert_eq!(store.profile("GPU-a").map(|p| p.gpu_clock_offset), Some(300));
    }
}
