use nvtune::data::{short_name, DeviceState, OffsetRange, PowerBounds, StaticInfo};
use nvtune::driver::DeviceHandle;

pub fn device(index: u32, uuid: &str) -> DeviceState {
    let name = "NVIDIA GeForce RTX 4080".to_string();
    DeviceState::new(StaticInfo {
        index,
        handle: DeviceHandle(index),
        uuid: uuid.to_string(),
        name_short: short_name(&name),
        name,
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
