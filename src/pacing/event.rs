//! Event-based pacing: a piecewise-constant stimulus driven by a schedule
//! of `{start, duration, period, multiplier, level}` records (spec.md §4.2).

use crate::error::{EngineError, EngineResult};

/// One pacing schedule entry. A `period` of 0 means the event fires once;
/// `multiplier > 0` with `period > 0` repeats it `multiplier` additional
/// times every `period` time units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventRecord {
    pub start: f64,
    pub duration: f64,
    pub period: f64,
    pub multiplier: f64,
    pub level: f64,
}

impl EventRecord {
    fn validate(&self) -> EngineResult<()> {
        if self.duration < 0.0 {
            return Err(EngineError::InvalidPacing(format!(
                "event starting at {} has negative duration {}",
                self.start, self.duration
            )));
        }
        if self.period < 0.0 {
            return Err(EngineError::InvalidPacing(format!(
                "event starting at {} has negative period {}",
                self.start, self.period
            )));
        }
        if self.multiplier < 0.0 {
            return Err(EngineError::InvalidPacing(format!(
                "event starting at {} has negative multiplier {}",
                self.start, self.multiplier
            )));
        }
        if self.multiplier * self.period > f64::MAX / 2.0 {
            return Err(EngineError::InvalidPacing(format!(
                "event starting at {} would overflow: multiplier {} x period {}",
                self.start, self.multiplier, self.period
            )));
        }
        Ok(())
    }

    /// Occurrence count including the original firing: `1 + multiplier`
    /// when periodic, else `1`.
    fn occurrence_count(&self) -> u64 {
        if self.period > 0.0 && self.multiplier > 0.0 {
            1 + self.multiplier as u64
        } else {
            1
        }
    }

    /// Start time of occurrence `k` (0-indexed).
    fn occurrence_start(&self, k: u64) -> f64 {
        self.start + k as f64 * self.period
    }
}

/// A single expanded (non-repeating) occurrence window, used internally
/// once a schedule is flattened.
#[derive(Debug, Clone, Copy)]
struct Occurrence {
    start: f64,
    end: f64,
    level: f64,
    schedule_order: usize,
}

/// Drives a piecewise-constant stimulus from an [`EventRecord`] schedule.
#[derive(Debug, Default)]
pub struct EventPacing {
    occurrences: Vec<Occurrence>,
    current_time: f64,
    current_level: f64,
}

impl EventPacing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingests and validates the event list, expanding periodic repeats
    /// into individual occurrence windows sorted by start time.
    pub fn populate(&mut self, schedule: &[EventRecord]) -> EngineResult<()> {
        for event in schedule {
            event.validate()?;
        }

        let mut occurrences = Vec::new();
        for (order, event) in schedule.iter().enumerate() {
            for k in 0..event.occurrence_count() {
                let start = event.occurrence_start(k);
                occurrences.push(Occurrence {
                    start,
                    end: start + event.duration,
                    level: event.level,
                    schedule_order: order,
                });
            }
        }
        occurrences.sort_by(|a, b| {
            a.start
                .partial_cmp(&b.start)
                .unwrap()
                .then(a.schedule_order.cmp(&b.schedule_order))
        });

        self.occurrences = occurrences;
        self.current_time = f64::NEG_INFINITY;
        self.current_level = 0.0;
        Ok(())
    }

    /// Advances the cursor so the current level reflects activity at `t`.
    /// Callers must present non-decreasing `t`.
    pub fn advance_time(&mut self, t: f64) {
        self.current_time = t;
        self.current_level = self.level_at(t);
    }

    fn level_at(&self, t: f64) -> f64 {
        // Latest-starting active event wins; ties broken by schedule order
        // (the tiebreak is implicit since occurrences are sorted by
        // (start, schedule_order) and we keep scanning forward).
        let mut active: Option<&Occurrence> = None;
        for occ in &self.occurrences {
            if occ.start > t {
                break;
            }
            if t < occ.end {
                active = Some(occ);
            }
        }
        active.map(|o| o.level).unwrap_or(0.0)
    }

    /// The currently active level, or 0 when no event is active.
    pub fn get_level(&self) -> f64 {
        self.current_level
    }

    /// Next time at which the active level may change: the next event
    /// start, or the end of the currently active event, whichever is
    /// sooner strictly after `current_time`.
    pub fn get_next_time(&self) -> f64 {
        let mut next = f64::INFINITY;
        for occ in &self.occurrences {
            if occ.start > self.current_time && occ.start < next {
                next = occ.start;
            }
            if occ.start <= self.current_time && occ.end > self.current_time && occ.end < next {
                next = occ.end;
            }
        }
        next
    }
}
