//! Rolling per-device telemetry history for graphs and sparklines.

use std::collections::VecDeque;

use crate::data::DeviceState;

/// The two history lengths the front-end uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Window {
    /// Trend graphs.
    Long,
    /// Compact sparklines.
    Short,
}

impl Window {
    pub const fn capacity(self) -> usize {
        match self {
            Window::Long => 360,
            Window::Short => 60,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Metric {
    Utilization,
    Memory,
    Clock,
    Temperature,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::Utilization,
        Metric::Memory,
        Metric::Clock,
        Metric::Temperature,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Metric::Utilization => "GPU Utilization (%)",
            Metric::Memory => "Memory Utilization (%)",
            Metric::Clock => "GPU Clock (MHz)",
            Metric::Temperature => "Temperature (°C)",
        }
    }
}

#[derive(Clone, Debug, Default)]
struct DeviceSeries {
    util: VecDeque<Option<u32>>,
    mem: VecDeque<Option<u32>>,
    clock: VecDeque<Option<u32>>,
    temp: VecDeque<Option<u32>>,
    /// Upper end of the clock scale.
    clock_ceiling: u32,
}

impl DeviceSeries {
    fn series(&self, metric: Metric) -> &VecDeque<Option<u32>> {
        match metric {
            Metric::Utilization => &self.util,
            Metric::Memory => &self.mem,
            Metric::Clock => &self.clock,
            Metric::Temperature => &self.temp,
        }
    }

    fn scale_max(&self, metric: Metric) -> u32 {
        match metric {
            Metric::Clock => self.clock_ceiling,
            _ => 100,
        }
    }
}

fn push_bounded(series: &mut VecDeque<Option<u32>>, value: Option<u32>, capacity: usize) {
    series.push_back(value);
    while series.len() > capacity {
        series.pop_front();
    }
}

/// Fixed-capacity FIFOs of utilization, memory, clock and temperature for
/// every device. Missing readings are kept as `None` and plot as zero.
#[derive(Clone, Debug)]
pub struct HistoryStore {
    window: Window,
    devices: Vec<DeviceSeries>,
}

impl HistoryStore {
    pub fn new(window: Window, devices: &[DeviceState]) -> Self {
        let capacity = window.capacity();
        let devices = devices
            .iter()
            .map(|d| DeviceSeries {
                util: VecDeque::with_capacity(capacity + 1),
                mem: VecDeque::with_capacity(capacity + 1),
                clock: VecDeque::with_capacity(capacity + 1),
                temp: VecDeque::with_capacity(capacity + 1),
                // an unknown max clock plots as zeros
                clock_ceiling: d.info.max_clock_mhz.unwrap_or(0),
            })
            .collect();
        Self { window, devices }
    }

    pub fn capacity(&self) -> usize {
        self.window.capacity()
    }

    /// Appends the current readings of one device. Out-of-range indices are ignored.
    pub fn record_sample(&mut self, device_index: usize, state: &DeviceState) {
        let capacity = self.capacity();
        let Some(series) = self.devices.get_mut(device_index) else {
            return;
        };
        let d = &state.dynamic;
        push_bounded(&mut series.util, d.gpu_util_percent, capacity);
        push_bounded(&mut series.mem, d.mem_util_percent, capacity);
        push_bounded(&mut series.clock, d.gpu_clock_mhz, capacity);
        push_bounded(&mut series.temp, d.temperature_c, capacity);
    }

    pub fn record_all(&mut self, states: &[DeviceState]) {
        for (index, state) in states.iter().enumerate() {
            self.record_sample(index, state);
        }
    }

    /// Number of samples currently held for a device's metric.
    pub fn len(&self, device_index: usize, metric: Metric) -> usize {
        self.devices
            .get(device_index)
            .map_or(0, |s| s.series(metric).len())
    }

    /// Raw samples, oldest first.
    pub fn values(&self, device_index: usize, metric: Metric) -> Vec<Option<u32>> {
        self.devices
            .get(device_index)
            .map(|s| s.series(metric).iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, device_index: usize, metric: Metric) -> Option<u32> {
        self.devices
            .get(device_index)
            .and_then(|s| s.series(metric).back().copied().flatten())
    }

    pub fn max(&self, device_index: usize, metric: Metric) -> Option<u32> {
        self.devices
            .get(device_index)
            .and_then(|s| s.series(metric).iter().flatten().copied().max())
    }

    pub fn average(&self, device_index: usize, metric: Metric) -> Option<u32> {
        let series = self.devices.get(device_index)?.series(metric);
        let (sum, count) = series
            .iter()
            .flatten()
            .fold((0u64, 0u64), |(sum, n), &v| (sum + u64::from(v), n + 1));
        (count > 0).then(|| (sum / count) as u32)
    }

    /// Resamples a series to exactly `width` points scaled into `0..=height`.
    ///
    /// The most recent samples sit on the right; a short series is padded
    /// with zeros on the left. Values are scaled linearly from the metric's
    /// domain (0-100, or 0 to the device's max clock) and clamped.
    pub fn normalized(
        &self,
        device_index: usize,
        metric: Metric,
        width: usize,
        height: u32,
    ) -> Vec<u32> {
        let mut out = vec![0; width];
        let Some(device) = self.devices.get(device_index) else {
            return out;
        };
        let series = device.series(metric);
        let scale_max = i64::from(device.scale_max(metric));
        if scale_max <= 0 {
            return out;
        }

        let take = series.len().min(width);
        let pad = width - take;
        for (slot, value) in out[pad..]
            .iter_mut()
            .zip(series.iter().skip(series.len() - take))
        {
            let v = value.map_or(0, i64::from);
            let scaled = v * i64::from(height) / scale_max;
            *slot = scaled.clamp(0, i64::from(height)) as u32;
        }
        out
    }
}
