use std::time::{Duration, Instant};

use crate::history::HistoryStore;
use crate::monitor::DeviceMonitor;

/// One frame of the control loop.
pub const TICK: Duration = Duration::from_millis(1000 / 60);

/// How often, in ticks, each piece of polling work runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cadence {
    pub refresh_every: u64,
    pub long_sample_every: u64,
    pub short_sample_every: u64,
}

impl Default for Cadence {
    fn default() -> Self {
        Self {
            refresh_every: 30,
            long_sample_every: 30,
            short_sample_every: 60,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickPlan {
    pub refresh: bool,
    pub sample_long: bool,
    pub sample_short: bool,
}

/// Decides which work is due on each tick. The first tick runs everything.
#[derive(Clone, Debug)]
pub struct PollScheduler {
    cadence: Cadence,
    tick: u64,
    last_tick: Option<Instant>,
}

impl PollScheduler {
    pub fn new(cadence: Cadence) -> Self {
        Self {
            cadence: Cadence {
                refresh_every: cadence.refresh_every.max(1),
                long_sample_every: cadence.long_sample_every.max(1),
                short_sample_every: cadence.short_sample_every.max(1),
            },
            tick: 0,
            last_tick: None,
        }
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    pub fn next_tick(&mut self) -> TickPlan {
        let t = self.tick;
        self.tick += 1;
        TickPlan {
            refresh: t % self.cadence.refresh_every == 0,
            sample_long: t % self.cadence.long_sample_every == 0,
            sample_short: t % self.cadence.short_sample_every == 0,
        }
    }

    /// Runs one tick's worth of polling and sampling, in that order.
    pub fn run_tick(
        &mut self,
        monitor: &mut DeviceMonitor,
        long: &mut HistoryStore,
        short: &mut HistoryStore,
    ) -> TickPlan {
        let plan = self.next_tick();
        if plan.refresh {
            monitor.refresh();
        }
        if plan.sample_long {
            long.record_all(monitor.devices());
        }
        if plan.sample_short {
            short.record_all(monitor.devices());
        }
        plan
    }

    /// Number of whole ticks due since the previous call.
    ///
    /// A render loop that stalls for more than a second resumes at the
    /// current time instead of replaying the backlog.
    pub fn due_ticks(&mut self, now: Instant) -> u32 {
        let Some(last) = self.last_tick else {
            self.last_tick = Some(now);
            return 1;
        };
        let elapsed = now.saturating_duration_since(last);
        if elapsed > Duration::from_secs(1) {
            self.last_tick = Some(now);
            return 1;
        }
        let ticks = (elapsed.as_micros() / TICK.as_micros()) as u32;
        self.last_tick = Some(last + TICK * ticks);
        ticks
    }
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new(Cadence::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::{FakeDriver, FakeGpu};
    use crate::history::{Metric, Window};

    #[test]
    fn first_tick_runs_everything() {
        let mut scheduler = PollScheduler::default();
        assert_eq!(
            scheduler.next_tick(),
            TickPlan {
                refresh: true,
                sample_long: true,
                sample_short: true
            }
        );
        assert_eq!(scheduler.next_tick(), TickPlan::default());
    }

    #[test]
    fn default_cadence_over_two_seconds() {
        let mut scheduler = PollScheduler::default();
        let plans: Vec<TickPlan> = (0..120).map(|_| scheduler.next_tick()).collect();
        assert_eq!(plans.iter().filter(|p| p.refresh).count(), 4);
        assert_eq!(plans.iter().filter(|p| p.sample_long).count(), 4);
        assert_eq!(plans.iter().filter(|p| p.sample_short).count(), 2);
        // long sampling is aligned with refresh
        assert!(plans.iter().all(|p| p.sample_long == p.refresh));
    }

    #[test]
    fn zero_divisors_become_every_tick() {
        let mut scheduler = PollScheduler::new(Cadence {
            refresh_every: 0,
            long_sample_every: 0,
            short_sample_every: 0,
        });
        scheduler.next_tick();
        assert!(scheduler.next_tick().refresh);
    }

    #[test]
    fn run_tick_feeds_history() {
        let fake = FakeDriver::new(vec![FakeGpu::rtx("GPU-a")]);
        let mut monitor = DeviceMonitor::initialize(Box::new(fake)).unwrap();
        let mut long = HistoryStore::new(Window::Long, monitor.devices());
        let mut short = HistoryStore::new(Window::Short, monitor.devices());
        let mut scheduler = PollScheduler::default();

        for _ in 0..61 {
            scheduler.run_tick(&mut monitor, &mut long, &mut short);
        }
        assert_eq!(long.len(0, Metric::Utilization), 3);
        assert_eq!(short.len(0, Metric::Utilization), 2);
        assert_eq!(long.latest(0, Metric::Utilization), Some(70));
    }

    #[test]
    fn due_ticks_tracks_elapsed_time() {
        let mut scheduler = PollScheduler::default();
        let start = Instant::now();
        assert_eq!(scheduler.due_ticks(start), 1);
        assert_eq!(scheduler.due_ticks(start + TICK / 2), 0);
        assert_eq!(scheduler.due_ticks(start + TICK * 3), 3);
        assert_eq!(scheduler.due_ticks(start + TICK * 3 + Duration::from_secs(5)), 1);
    }
}
