mod common;

use nvtune::history::{HistoryStore, Metric, Window};
use proptest::prelude::*;

use common::device;

fn store_with(window: Window, samples: &[Option<u32>]) -> HistoryStore {
    let mut state = device(0, "GPU-aaaa");
    let mut store = HistoryStore::new(window, std::slice::from_ref(&state));
    for &sample in samples {
        state.dynamic.gpu_util_percent = sample;
        state.dynamic.gpu_clock_mhz = sample.map(|v| v.saturating_mul(30));
        store.record_sample(0, &state);
    }
    store
}

#[test]
fn gaps_are_kept_and_drawn_as_zero() {
    let store = store_with(Window::Short, &[Some(50), None, Some(100)]);
    assert_eq!(
        store.values(0, Metric::Utilization),
        vec![Some(50), None, Some(100)]
    );
    assert_eq!(store.normalized(0, Metric::Utilization, 3, 10), vec![5, 0, 10]);
}

proptest! {
    #[test]
    fn windows_never_exceed_capacity(
        samples in prop::collection::vec(prop::option::of(0u32..=100), 0..800),
        long in any::<bool>(),
    ) {
        let window = if long { Window::Long } else { Window::Short };
        let store = store_with(window, &samples);
        for metric in Metric::ALL {
            prop_assert_eq!(store.len(0, metric), samples.len().min(window.capacity()));
        }
    }

    #[test]
    fn normalized_fits_the_canvas(
        samples in prop::collection::vec(prop::option::of(any::<u32>()), 0..400),
        width in 0usize..500,
        height in 0u32..200,
    ) {
        let store = store_with(Window::Long, &samples);
        for metric in Metric::ALL {
            let out = store.normalized(0, metric, width, height);
            prop_assert_eq!(out.len(), width);
            prop_assert!(out.iter().all(|&v| v <= height));
        }
    }
}
