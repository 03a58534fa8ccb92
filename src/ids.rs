//! Booid: a 64-bit Snowflake-style id local to a single process.
//!
//! Bit layout from the LSB: `seq(12) | machine(10) | timestamp(42)`, a
//! 42-bit millisecond timestamp measured from [`EPOCH_MS`]. Two ids from the
//! same [`BooidGenerator`] compare in strictly increasing order as unsigned
//! 64-bit integers, which is what makes a `Booid` usable as a row-cache key:
//! newer rows always sort after older ones.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Custom epoch (2024-01-01T00:00:00Z) so the 42-bit timestamp field doesn't
/// roll over for ~139 years from generator construction.
const EPOCH_MS: u64 = 1_704_067_200_000;

const SEQ_BITS: u32 = 12;
const MACHINE_BITS: u32 = 10;
const TIMESTAMP_BITS: u32 = 42;

const SEQ_MASK: u64 = (1 << SEQ_BITS) - 1;
const MACHINE_MASK: u64 = (1 << MACHINE_BITS) - 1;
const TIMESTAMP_MASK: u64 = (1 << TIMESTAMP_BITS) - 1;

/// A 64-bit identifier: `seq(12) | machine(10) | timestamp(42)` from the LSB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Booid(pub u64);

impl Booid {
    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn timestamp_ms(self) -> u64 {
        (self.0 >> (SEQ_BITS + MACHINE_BITS)) & TIMESTAMP_MASK
    }

    pub fn machine_id(self) -> u16 {
        ((self.0 >> SEQ_BITS) & MACHINE_MASK) as u16
    }

    pub fn sequence(self) -> u16 {
        (self.0 & SEQ_MASK) as u16
    }
}

impl std::fmt::Display for Booid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Derive a 10-bit machine id from the local hostname. Collisions across
/// machines only matter if ids generated on different hosts are compared,
/// which this core never does — ids are only ever cache keys within one
/// running process.
pub fn machine_id_from_hostname() -> u16 {
    let name = hostname::get()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown-host".to_string());

    let mut hash: u64 = 14695981039346656037; // FNV-1a offset basis
    for byte in name.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(1099511628211); // FNV-1a prime
    }
    (hash & MACHINE_MASK) as u16
}

/// Generates strictly monotonic [`Booid`]s for a single machine id.
pub struct BooidGenerator {
    machine_id: u16,
    /// Packs `last_timestamp(42) << 12 | sequence(12)` so a single atomic
    /// compare-exchange loop handles the timestamp-advance/sequence-reset
    /// transition without a separate lock.
    state: AtomicU64,
}

impl Clone for BooidGenerator {
    /// Clones the machine id and the current monotonic counter state. Used
    /// when a `TerminalState` is rebuilt in place (RIS / `full_reset`) and
    /// needs to carry its id generator across the rebuild rather than
    /// restart sequence numbering from zero.
    fn clone(&self) -> Self {
        Self {
            machine_id: self.machine_id,
            state: AtomicU64::new(self.state.load(Ordering::Relaxed)),
        }
    }
}

impl BooidGenerator {
    pub fn new(machine_id: u16) -> Self {
        Self {
            machine_id: machine_id & MACHINE_MASK as u16,
            state: AtomicU64::new(0),
        }
    }

    pub fn with_hostname_machine_id() -> Self {
        Self::new(machine_id_from_hostname())
    }

    fn now_ms() -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        now.saturating_sub(EPOCH_MS) & TIMESTAMP_MASK
    }

    /// Produce the next id. Sequence resets to zero whenever the millisecond
    /// timestamp advances; if more than 4096 ids are requested within the
    /// same millisecond, this busy-waits for the clock to tick forward
    /// rather than silently reusing a sequence number.
    pub fn next(&self) -> Booid {
        loop {
            let now = Self::now_ms();
            let prev = self.state.load(Ordering::Acquire);
            let prev_ts = prev >> SEQ_BITS;
            let prev_seq = prev & SEQ_MASK;

            let (next_ts, next_seq) = if now > prev_ts {
                (now, 0)
            } else if prev_seq < SEQ_MASK {
                (prev_ts, prev_seq + 1)
            } else {
                // Sequence exhausted for this millisecond; spin until the clock ticks.
                std::thread::yield_now();
                continue;
            };

            let new_state = (next_ts << SEQ_BITS) | next_seq;
            if self
                .state
                .compare_exchange(prev, new_state, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let packed = next_seq | ((self.machine_id as u64) << SEQ_BITS) | (next_ts << (SEQ_BITS + MACHINE_BITS));
                return Booid(packed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successive_ids_are_monotonic() {
        let gen = BooidGenerator::new(3);
        let mut prev = gen.next();
        for _ in 0..5000 {
            let next = gen.next();
            assert!(next.0 > prev.0, "ids must strictly increase");
            prev = next;
        }
    }

    #[test]
    fn bit_layout_round_trips() {
        let gen = BooidGenerator::new(0x2aa);
        let id = gen.next();
        assert_eq!(id.machine_id(), 0x2aa);
        assert!(id.sequence() < 4096);
    }

    #[test]
    fn machine_id_is_masked_to_10_bits() {
        let gen = BooidGenerator::new(0xffff);
        let id = gen.next();
        assert!(id.machine_id() <= MACHINE_MASK as u16);
    }
}
