//! Bundle metadata — class of service, custody, status reports, timestamps.
//!
//! These types describe a bundle to the engine. They say nothing about how
//! a bundle is encoded on the wire between bundle agents; the convergence
//! layer only ever sees an opaque ADU.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ── Priority ─────────────────────────────────────────────────────────────────

/// Class-of-service priority. Also the index of the outduct queue tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Priority {
    /// Slower.
    Bulk = 0,
    /// Faster.
    Standard = 1,
    /// Precedes others.
    Expedited = 2,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::Bulk, Priority::Standard, Priority::Expedited];

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Bulk),
            1 => Some(Self::Standard),
            2 => Some(Self::Expedited),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

// ── Extended class of service ────────────────────────────────────────────────

/// Extended class-of-service flag bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CosFlags(u8);

impl CosFlags {
    /// Forward on all routes.
    pub const MINIMUM_LATENCY: CosFlags = CosFlags(1);
    /// Unreliable convergence layer is okay.
    pub const BEST_EFFORT: CosFlags = CosFlags(2);
    /// Flow label is meaningful.
    pub const FLOW_LABEL_PRESENT: CosFlags = CosFlags(4);

    pub const fn empty() -> Self {
        CosFlags(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        CosFlags(bits & 0x07)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: CosFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: CosFlags) -> Self {
        CosFlags(self.0 | other.0)
    }
}

impl std::ops::BitOr for CosFlags {
    type Output = CosFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

/// Highest ordinal an application may request. 255 is reserved.
pub const MAX_ORDINAL: u8 = 254;

/// Auxiliary class-of-service record.
///
/// Within the expedited tier a higher ordinal is transmitted ahead of a
/// lower one. `Default` is flags 0, ordinal 0 and no flow label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtendedCos {
    pub flow_label: Option<u32>,
    pub flags: CosFlags,
    pub ordinal: u8,
}

impl ExtendedCos {
    pub fn with_ordinal(ordinal: u8) -> Self {
        Self {
            ordinal,
            ..Self::default()
        }
    }

    /// Flags as they travel with the bundle: the flow-label bit is set
    /// exactly when a flow label is present.
    pub fn effective_flags(&self) -> CosFlags {
        let base = CosFlags::from_bits(self.flags.bits() & !CosFlags::FLOW_LABEL_PRESENT.bits());
        if self.flow_label.is_some() {
            base | CosFlags::FLOW_LABEL_PRESENT
        } else {
            base
        }
    }

    pub fn is_valid(&self) -> bool {
        self.ordinal <= MAX_ORDINAL
    }
}

// ── Custody ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustodySwitch {
    #[default]
    None,
    SourceOptional,
    SourceRequired,
}

// ── Status report requests ───────────────────────────────────────────────────

/// Status-report request bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SrrFlags(u8);

impl SrrFlags {
    pub const RECEIVED: SrrFlags = SrrFlags(1);
    pub const CUSTODY: SrrFlags = SrrFlags(2);
    pub const FORWARDED: SrrFlags = SrrFlags(4);
    pub const DELIVERED: SrrFlags = SrrFlags(8);
    pub const DELETED: SrrFlags = SrrFlags(16);

    pub const fn empty() -> Self {
        SrrFlags(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        SrrFlags(bits & 0x1f)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: SrrFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for SrrFlags {
    type Output = SrrFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        SrrFlags(self.0 | rhs.0)
    }
}

// ── Creation timestamp ───────────────────────────────────────────────────────

/// Bundle creation time: seconds plus a sequence count that disambiguates
/// bundles created within the same second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: u64,
    pub count: u64,
}

impl Timestamp {
    /// Seconds since the Unix epoch, saturating at zero for clocks set
    /// before 1970.
    pub fn now_seconds() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Issues creation timestamps. The count restarts whenever the second
/// changes; a count that runs out moves on to the next second.
#[derive(Debug, Default)]
pub struct TimestampClock {
    // high 40 bits: seconds, low 24 bits: count
    state: AtomicU64,
}

const COUNT_BITS: u32 = 24;
const COUNT_MASK: u64 = (1 << COUNT_BITS) - 1;

impl TimestampClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> Timestamp {
        self.next_at(Timestamp::now_seconds())
    }

    pub fn next_at(&self, seconds: u64) -> Timestamp {
        let mut current = self.state.load(Ordering::Relaxed);
        loop {
            let cur_secs = current >> COUNT_BITS;
            let (secs, count) = if cur_secs < seconds {
                (seconds, 0)
            } else if current & COUNT_MASK == COUNT_MASK {
                // Count exhausted: borrow the next second.
                (cur_secs + 1, 0)
            } else {
                (cur_secs, (current & COUNT_MASK) + 1)
            };
            let next = (secs << COUNT_BITS) | count;
            match self
                .state
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Timestamp { seconds: secs, count },
                Err(actual) => current = actual,
            }
        }
    }
}

// ── Bundle identity ──────────────────────────────────────────────────────────

/// Location-independent handle for a bundle held by the local agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BundleId(pub u64);

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bundle#{}", self.0)
    }
}
