//! Weighted tier selection for outduct dequeue.
//!
//! Service factors are 1, 2, 4 for bulk, standard and expedited. Under full
//! contention the tiers are served 1:2:4; no tier is starved.
//!
//! Start-time fair queueing over dequeue opportunities: serving tier `i`
//! advances its tag by `UNIT / factor(i)`. The non-empty tier with the
//! smallest finish tag wins, ties going to the more urgent tier. A tier that
//! was idle is lifted to the current virtual time before competing so it
//! cannot bank credit while empty.

use tern_core::Priority;

/// Service factor per tier, indexed by `Priority::index`.
pub const SERVICE_FACTORS: [u64; 3] = [1, 2, 4];

const UNIT: u64 = 4;

#[derive(Debug, Default, Clone)]
pub struct TierScheduler {
    tags: [u64; 3],
    active: [bool; 3],
    vclock: u64,
}

impl TierScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn cost(tier: usize) -> u64 {
        UNIT / SERVICE_FACTORS[tier]
    }

    /// Pick the tier to serve next given which tiers have bundles queued.
    pub fn select(&mut self, nonempty: [bool; 3]) -> Option<Priority> {
        if !nonempty.iter().any(|&n| n) {
            *self = Self::default();
            return None;
        }

        for tier in 0..3 {
            if nonempty[tier] && !self.active[tier] {
                self.tags[tier] = self.tags[tier].max(self.vclock);
            }
            self.active[tier] = nonempty[tier];
        }

        let mut best: Option<(usize, u64)> = None;
        // Most urgent first so that ties resolve toward it.
        for tier in (0..3).rev() {
            if !nonempty[tier] {
                continue;
            }
            let finish = self.tags[tier] + Self::cost(tier);
            match best {
                Some((_, f)) if f <= finish => {}
                _ => best = Some((tier, finish)),
            }
        }

        let (tier, finish) = best?;
        self.vclock = self.tags[tier];
        self.tags[tier] = finish;
        Priority::from_u8(tier as u8)
    }
}
