//! Pacing subsystems: the time-varying external stimulus driving a Model.
//!
//! spec.md §9 calls for the `EventPacing`/`FixedPacing` union to be
//! expressed as "a tagged variant with operations advance(t), next_time(),
//! level(t) — polymorphism expressed as a capability set, not
//! inheritance." [`PacingSystem`] is that tagged variant.

pub mod event;
pub mod fixed;
pub mod tests;

use crate::error::EngineResult;
use event::{EventPacing, EventRecord};
use fixed::FixedPacing;

/// How a single pacing channel is configured at `init` time.
pub enum PacingProtocol {
    Event(Vec<EventRecord>),
    Fixed(Vec<(f64, f64)>),
}

/// One pacing channel: either event-driven or fixed-form.
pub enum PacingSystem {
    Event(EventPacing),
    Fixed(FixedPacing),
}

impl PacingSystem {
    pub fn from_protocol(protocol: &PacingProtocol) -> EngineResult<Self> {
        match protocol {
            PacingProtocol::Event(schedule) => {
                let mut pacing = EventPacing::new();
                pacing.populate(schedule)?;
                Ok(PacingSystem::Event(pacing))
            }
            PacingProtocol::Fixed(series) => {
                let mut pacing = FixedPacing::new();
                pacing.populate(series)?;
                Ok(PacingSystem::Fixed(pacing))
            }
        }
    }

    /// Advances event systems to `t`; a no-op for fixed systems, which are
    /// sampled directly by [`PacingSystem::level`] instead.
    pub fn advance(&mut self, t: f64) {
        if let PacingSystem::Event(pacing) = self {
            pacing.advance_time(t);
        }
    }

    /// Next discontinuity time for event systems; `f64::INFINITY` for
    /// fixed systems, which never contribute to `tnext` (spec.md §4.5
    /// step 4).
    pub fn next_time(&self) -> f64 {
        match self {
            PacingSystem::Event(pacing) => pacing.get_next_time(),
            PacingSystem::Fixed(_) => f64::INFINITY,
        }
    }

    /// Current stimulus level. For event systems this is the level as of
    /// the last `advance`; for fixed systems it is sampled fresh at `t`.
    pub fn level(&self, t: f64) -> f64 {
        match self {
            PacingSystem::Event(pacing) => pacing.get_level(),
            PacingSystem::Fixed(pacing) => pacing.get_level(t),
        }
    }

    pub fn is_event(&self) -> bool {
        matches!(self, PacingSystem::Event(_))
    }
}
