mod common;

use std::fs;

use nvtune::data::Profile;
use nvtune::profile::{LoadOutcome, ProfileStore};
use proptest::prelude::*;
use tempfile::TempDir;

use common::device;

#[test]
fn saved_profiles_survive_a_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("profiles.json");
    let devices = vec![device(0, "GPU-aaaa"), device(1, "GPU-bbbb")];

    let mut store = ProfileStore::new(&devices);
    *store.profile_mut("GPU-bbbb").unwrap() = Profile {
        power_limit: 200,
        gpu_clock_offset: -45,
        max_gpu_clock: 1800,
    };
    store.save(&path).unwrap();

    let mut reloaded = ProfileStore::new(&devices);
    assert_eq!(reloaded.load(&path), LoadOutcome::Loaded(2));
    assert_eq!(reloaded.all(), store.all());
}

#[test]
fn profiles_for_absent_gpus_are_ignored() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("profiles.json");
    fs::write(
        &path,
        r#"{"GPU-gone": {"power_limit": 150, "gpu_clock_offset": 0, "max_gpu_clock": 1500}}"#,
    )
    .unwrap();

    let devices = vec![device(0, "GPU-aaaa")];
    let mut store = ProfileStore::new(&devices);
    assert_eq!(store.load(&path), LoadOutcome::Loaded(0));
    assert!(store.profile("GPU-gone").is_none());
    assert_eq!(store.all().len(), 1);
}

proptest! {
    #[test]
    fn loaded_profiles_stay_within_bounds(
        power in any::<i64>(),
        offset in any::<i64>(),
        max_clock in any::<i64>(),
    ) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profiles.json");
        let body = format!(
            r#"{{"GPU-aaaa": {{"power_limit": {power}, "gpu_clock_offset": {offset}, "max_gpu_clock": {max_clock}}}}}"#
        );
        fs::write(&path, body).unwrap();

        let devices = vec![device(0, "GPU-aaaa")];
        let mut store = ProfileStore::new(&devices);
        prop_assert_eq!(store.load(&path), LoadOutcome::Loaded(1));

        let p = store.profile("GPU-aaaa").unwrap();
        prop_assert!((120..=300).contains(&p.power_limit));
        prop_assert!((-200..=300).contains(&p.gpu_clock_offset));
        prop_assert!(p.max_gpu_clock <= 2520);
    }
}
