//! Unit tests for event and fixed pacing state machines.

#![cfg(test)]

use super::event::{EventPacing, EventRecord};
use super::fixed::FixedPacing;

#[test]
fn no_events_yields_zero_level_everywhere() {
    let mut pacing = EventPacing::new();
    pacing.populate(&[]).unwrap();
    for t in [0.0, 1.0, 500.0, 1000.0] {
        pacing.advance_time(t);
        assert_eq!(pacing.get_level(), 0.0);
    }
}

#[test]
fn single_event_is_active_only_in_its_window() {
    let mut pacing = EventPacing::new();
    pacing
        .populate(&[EventRecord {
            start: 10.0,
            duration: 2.0,
            period: 0.0,
            multiplier: 0.0,
            level: 1.0,
        }])
        .unwrap();

    pacing.advance_time(5.0);
    assert_eq!(pacing.get_level(), 0.0);
    pacing.advance_time(10.0);
    assert_eq!(pacing.get_level(), 1.0);
    pacing.advance_time(11.5);
    assert_eq!(pacing.get_level(), 1.0);
    pacing.advance_time(12.0);
    assert_eq!(pacing.get_level(), 0.0);
}

#[test]
fn periodic_event_repeats_multiplier_times() {
    let mut pacing = EventPacing::new();
    pacing
        .populate(&[EventRecord {
            start: 10.0,
            duration: 2.0,
            period: 500.0,
            multiplier: 2.0,
            level: 1.0,
        }])
        .unwrap();

    for t in [10.0, 510.0, 1010.0] {
        pacing.advance_time(t);
        assert_eq!(pacing.get_level(), 1.0, "expected active level at t={t}");
    }
    pacing.advance_time(1510.0);
    assert_eq!(pacing.get_level(), 0.0);
}

#[test]
fn overlap_resolves_to_latest_starting_event() {
    let mut pacing = EventPacing::new();
    pacing
        .populate(&[
            EventRecord {
                start: 0.0,
                duration: 100.0,
                period: 0.0,
                multiplier: 0.0,
                level: 1.0,
            },
            EventRecord {
                start: 10.0,
                duration: 5.0,
                period: 0.0,
                multiplier: 0.0,
                level: 2.0,
            },
        ])
        .unwrap();

    pacing.advance_time(12.0);
    assert_eq!(pacing.get_level(), 2.0);
    pacing.advance_time(20.0);
    assert_eq!(pacing.get_level(), 1.0);
}

#[test]
fn negative_duration_is_rejected() {
    let mut pacing = EventPacing::new();
    let result = pacing.populate(&[EventRecord {
        start: 0.0,
        duration: -1.0,
        period: 0.0,
        multiplier: 0.0,
        level: 1.0,
    }]);
    assert!(result.is_err());
}

#[test]
fn next_time_tracks_upcoming_discontinuities() {
    let mut pacing = EventPacing::new();
    pacing
        .populate(&[EventRecord {
            start: 10.0,
            duration: 2.0,
            period: 0.0,
            multiplier: 0.0,
            level: 1.0,
        }])
        .unwrap();
    pacing.advance_time(0.0);
    assert_eq!(pacing.get_next_time(), 10.0);
    pacing.advance_time(10.0);
    assert_eq!(pacing.get_next_time(), 12.0);
    pacing.advance_time(12.0);
    assert_eq!(pacing.get_next_time(), f64::INFINITY);
}

#[test]
fn fixed_pacing_interpolates_linearly_and_clamps() {
    let mut pacing = FixedPacing::new();
    pacing
        .populate(&[(0.0, 0.0), (10.0, 1.0), (20.0, 0.0)])
        .unwrap();

    assert_eq!(pacing.get_level(5.0), 0.5);
    assert_eq!(pacing.get_level(15.0), 0.5);
    assert_eq!(pacing.get_level(-5.0), 0.0);
    assert_eq!(pacing.get_level(25.0), 0.0);
}

#[test]
fn fixed_pacing_rejects_non_monotonic_series() {
    let mut pacing = FixedPacing::new();
    let result = pacing.populate(&[(0.0, 0.0), (5.0, 1.0), (3.0, 0.5)]);
    assert!(result.is_err());
}
