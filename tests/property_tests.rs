//! Property-based tests for the window label search
//!
//! - Test windowing invariants over random event streams
//! - Run with ProptestConfig::with_cases(100)

use chrono::{DateTime, Duration, TimeZone, Utc};
use label_maker::core::LabelFn;
use label_maker::{
    DataSlice, LabelMaker, MaximumData, MinimumData, Record, SearchOptions, Value, WindowSize,
};
use proptest::prelude::*;

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2014, 1, 1, 0, 0, 0).unwrap()
}

/// Sorted minute offsets for one entity
fn arb_minutes() -> impl Strategy<Value = Vec<i64>> {
    proptest::collection::vec(0i64..600, 1..40).prop_map(|mut minutes| {
        minutes.sort_unstable();
        minutes
    })
}

fn to_records(minutes: &[i64]) -> Vec<Record> {
    minutes
        .iter()
        .map(|m| {
            Record::new()
                .with("customer_id", "A")
                .with("time", base() + Duration::minutes(*m))
        })
        .collect()
}

/// Label maker that reports the window's first and last record times
fn span_maker(window_minutes: i64) -> LabelMaker {
    let span = LabelFn::new("n", |slice: &DataSlice<'_>| Ok(slice.len()));
    LabelMaker::new(
        "customer_id",
        "time",
        span,
        WindowSize::Duration(Duration::minutes(window_minutes)),
    )
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: cutoffs never precede the first cutoff nor exceed maximum_data
    #[test]
    fn prop_cutoffs_within_bounds(
        minutes in arb_minutes(),
        window in 1i64..120,
        start in 0i64..300,
        max_offset in 0i64..300,
    ) {
        let records = to_records(&minutes);
        let first_cutoff = base() + Duration::minutes(start);
        let options = SearchOptions {
            minimum_data: Some(MinimumData::Timestamp(first_cutoff)),
            maximum_data: Some(MaximumData::Offset(Duration::minutes(max_offset))),
            ..SearchOptions::default()
        };

        let labels = span_maker(window).search(&records, &options).unwrap();
        for row in labels.rows() {
            prop_assert!(row.cutoff_time >= first_cutoff);
            prop_assert!(row.cutoff_time <= first_cutoff + Duration::minutes(max_offset));
        }
    }

    /// Property: consecutive windows overlap by window - gap, and sit on the gap grid
    #[test]
    fn prop_overlap_is_window_minus_gap(
        minutes in arb_minutes(),
        window in 2i64..120,
        gap_fraction in 1i64..100,
    ) {
        let gap = (window * gap_fraction / 100).max(1);
        let records = to_records(&minutes);
        let lm = span_maker(window);
        let options = SearchOptions {
            gap: Some(WindowSize::Duration(Duration::minutes(gap))),
            drop_empty: false,
            ..SearchOptions::default()
        };

        let sliced = lm.slice(&records, &options).unwrap();
        let windows: Vec<_> = sliced[0].slices().map(|s| s.context().clone()).collect();
        prop_assert!(!windows.is_empty());
        for pair in windows.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            prop_assert_eq!(b.start - a.start, Duration::minutes(gap));
            let stop = a.stop.unwrap();
            prop_assert_eq!(stop - b.start, Duration::minutes(window - gap));
        }
    }

    /// Property: windows never overlap once the gap reaches the window size
    #[test]
    fn prop_no_overlap_when_gap_exceeds_window(
        minutes in arb_minutes(),
        window in 1i64..120,
        gap_percent in 100i64..300,
    ) {
        let gap = window * gap_percent / 100;
        let records = to_records(&minutes);
        let lm = span_maker(window);
        let options = SearchOptions {
            gap: Some(WindowSize::Duration(Duration::minutes(gap))),
            drop_empty: false,
            ..SearchOptions::default()
        };

        let sliced = lm.slice(&records, &options).unwrap();
        let windows: Vec<_> = sliced[0].slices().map(|s| s.context().clone()).collect();
        prop_assert!(!windows.is_empty());
        for pair in windows.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            prop_assert_eq!(b.start - a.start, Duration::minutes(gap));
            prop_assert!(b.start >= a.stop.unwrap());
        }
    }

    /// Property: every record of a window lies in [start, stop)
    #[test]
    fn prop_windows_are_half_open(
        minutes in arb_minutes(),
        window in 1i64..120,
        gap in 1i64..120,
        drop_empty in any::<bool>(),
    ) {
        let records = to_records(&minutes);
        let lm = span_maker(window);
        let options = SearchOptions {
            gap: Some(WindowSize::Duration(Duration::minutes(gap))),
            drop_empty,
            ..SearchOptions::default()
        };

        let sliced = lm.slice(&records, &options).unwrap();
        for slice in sliced[0].slices() {
            if drop_empty {
                prop_assert!(!slice.is_empty());
            }
            for record in slice.records() {
                let t = record.timestamp("time").unwrap();
                prop_assert!(slice.context().contains(t));
            }
        }
    }

    /// Property: with gap = window every record is labeled exactly once
    #[test]
    fn prop_tumbling_windows_partition_records(
        minutes in arb_minutes(),
        window in 1i64..120,
    ) {
        let records = to_records(&minutes);
        let labels = span_maker(window)
            .search(&records, &SearchOptions::default())
            .unwrap();

        let total: i64 = labels
            .rows()
            .iter()
            .map(|r| match r.values["n"] {
                Value::Int(n) => n,
                _ => 0,
            })
            .sum();
        prop_assert_eq!(total, minutes.len() as i64);
    }

    /// Property: the example limit caps labels per entity
    #[test]
    fn prop_example_limit(
        minutes in arb_minutes(),
        window in 1i64..60,
        limit in 1usize..10,
    ) {
        let records = to_records(&minutes);
        let options = SearchOptions {
            num_examples_per_instance: Some(limit),
            ..SearchOptions::default()
        };
        let labels = span_maker(window).search(&records, &options).unwrap();
        prop_assert!(labels.len() <= limit);
        prop_assert!(!labels.is_empty());
    }
}
