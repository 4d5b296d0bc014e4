//! Hybrid Logical Clock.
//!
//! A [`HybridClock`] packs a 48-bit microsecond physical time and a 16-bit
//! logical counter into one `AtomicU64`, plus a fixed `node_id` that never
//! changes after construction. Comparing two [`Hlc`] values gives a total
//! order: physical time, then logical counter, then `node_id` as the final,
//! deterministic tiebreak between two writers that raced on the same tick.
//!
//! This total order is what last-writer-wins conflict resolution is built
//! on throughout the engine — the clock itself carries no knowledge of keys
//! or values.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::encoding::{self, EncodingError};

/// Width, in bits, of the logical counter packed into the low bits of the
/// clock's atomic word.
const LOGICAL_BITS: u32 = 16;
const LOGICAL_MASK: u64 = (1 << LOGICAL_BITS) - 1;
/// Physical time is budgeted 48 bits on the wire; mask it down so a packed
/// word never carries a physical component wider than that.
const PHYSICAL_MASK: u64 = (1 << 48) - 1;

/// A single hybrid logical clock reading: `(physical_us, logical, node_id)`.
///
/// Ordered lexicographically by `(physical_us, logical, node_id)`, which is
/// exactly the last-writer-wins tiebreak rule used everywhere an `Hlc` is
/// compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hlc {
    pub physical_us: u64,
    pub logical: u16,
    pub node_id: u32,
}

impl Hlc {
    /// The smallest possible clock reading, useful as a sentinel lower bound.
    pub const MIN: Hlc = Hlc {
        physical_us: 0,
        logical: 0,
        node_id: 0,
    };

    fn pack(physical_us: u64, logical: u16) -> u64 {
        ((physical_us & PHYSICAL_MASK) << LOGICAL_BITS) | (logical as u64 & LOGICAL_MASK)
    }

    fn unpack(word: u64) -> (u64, u16) {
        let physical_us = word >> LOGICAL_BITS;
        let logical = (word & LOGICAL_MASK) as u16;
        (physical_us, logical)
    }

    /// Serializes this clock reading to the spec's 14-byte wire form:
    /// `physical_us` (48 bits, big-endian, as the low 6 bytes of a u64),
    /// `logical` (2 bytes big-endian), `node_id` (4 bytes big-endian).
    pub fn to_wire_bytes(self) -> [u8; 14] {
        let mut out = [0u8; 14];
        let phys_be = (self.physical_us & PHYSICAL_MASK).to_be_bytes();
        out[0..6].copy_from_slice(&phys_be[2..8]);
        out[6..8].copy_from_slice(&self.logical.to_be_bytes());
        out[8..12].copy_from_slice(&self.node_id.to_be_bytes());
        // bytes 12..14 reserved for alignment with the 16-byte framing
        // headers elsewhere on the wire; always zero.
        out
    }

    /// Parses the spec's 14-byte wire form produced by [`Hlc::to_wire_bytes`].
    pub fn from_wire_bytes(bytes: &[u8; 14]) -> Self {
        let mut phys_buf = [0u8; 8];
        phys_buf[2..8].copy_from_slice(&bytes[0..6]);
        let physical_us = u64::from_be_bytes(phys_buf);
        let logical = u16::from_be_bytes([bytes[6], bytes[7]]);
        let node_id = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        Hlc {
            physical_us,
            logical,
            node_id,
        }
    }
}

impl encoding::Encode for Hlc {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.physical_us, buf)?;
        encoding::Encode::encode_to(&self.logical, buf)?;
        encoding::Encode::encode_to(&self.node_id, buf)?;
        Ok(())
    }
}

impl encoding::Decode for Hlc {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (physical_us, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (logical, n) = u16::decode_from(&buf[off..])?;
        off += n;
        let (node_id, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Hlc {
                physical_us,
                logical,
                node_id,
            },
            off,
        ))
    }
}

fn wall_clock_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
        .as_micros() as u64
}

/// A hybrid logical clock owned by a single node.
///
/// `physical_us`/`logical` live together in one `AtomicU64` so every update
/// is a single CAS; `node_id` is set once at construction and read without
/// synchronization.
pub struct HybridClock {
    word: AtomicU64,
    node_id: u32,
}

impl HybridClock {
    /// Creates a new clock for the given node, initialized to the current
    /// wall-clock time with a zero logical counter.
    pub fn new(node_id: u32) -> Self {
        let now = wall_clock_us();
        Self {
            word: AtomicU64::new(Hlc::pack(now, 0)),
            node_id,
        }
    }

    /// Advances the clock for a local send event and returns the stamp to
    /// attach to it.
    ///
    /// Standard HLC send rule: the new physical time is the greater of wall
    /// clock and the clock's last recorded physical time; the logical
    /// counter resets to zero if physical time actually advanced, otherwise
    /// increments.
    pub fn now_send(&self) -> Hlc {
        loop {
            let old = self.word.load(Ordering::Acquire);
            let (old_phys, old_logical) = Hlc::unpack(old);
            let wall = wall_clock_us();

            let (new_phys, new_logical) = if wall > old_phys {
                (wall, 0)
            } else {
                (old_phys, old_logical.saturating_add(1))
            };

            let new = Hlc::pack(new_phys, new_logical);
            if self
                .word
                .compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Hlc {
                    physical_us: new_phys,
                    logical: new_logical,
                    node_id: self.node_id,
                };
            }
        }
    }

    /// Merges a remote clock reading into this node's clock upon receiving
    /// a message stamped with it, returning the merged stamp (used both to
    /// record the receive event and to respond causally after it).
    pub fn recv_and_merge(&self, remote: Hlc) -> Hlc {
        loop {
            let old = self.word.load(Ordering::Acquire);
            let (old_phys, old_logical) = Hlc::unpack(old);
            let wall = wall_clock_us();

            let new_phys = wall.max(old_phys).max(remote.physical_us);
            let new_logical = if new_phys == old_phys && new_phys == remote.physical_us {
                old_logical.max(remote.logical).saturating_add(1)
            } else if new_phys == old_phys {
                old_logical.saturating_add(1)
            } else if new_phys == remote.physical_us {
                remote.logical.saturating_add(1)
            } else {
                0
            };

            let new = Hlc::pack(new_phys, new_logical);
            if self
                .word
                .compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Hlc {
                    physical_us: new_phys,
                    logical: new_logical,
                    node_id: self.node_id,
                };
            }
        }
    }

    /// Returns the node id this clock stamps every reading with.
    pub fn node_id(&self) -> u32 {
        self.node_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_physical_then_logical_then_node() {
        let a = Hlc {
            physical_us: 10,
            logical: 0,
            node_id: 1,
        };
        let b = Hlc {
            physical_us: 10,
            logical: 1,
            node_id: 0,
        };
        let c = Hlc {
            physical_us: 11,
            logical: 0,
            node_id: 0,
        };
        assert!(a < b);
        assert!(b < c);

        let tie_a = Hlc {
            physical_us: 5,
            logical: 5,
            node_id: 1,
        };
        let tie_b = Hlc {
            physical_us: 5,
            logical: 5,
            node_id: 2,
        };
        assert!(tie_a < tie_b);
    }

    #[test]
    fn now_send_is_monotonic() {
        let clock = HybridClock::new(7);
        let mut prev = clock.now_send();
        for _ in 0..1000 {
            let next = clock.now_send();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn recv_and_merge_never_goes_backwards() {
        let clock = HybridClock::new(1);
        let baseline = clock.now_send();

        let remote_future = Hlc {
            physical_us: baseline.physical_us + 1_000_000,
            logical: 3,
            node_id: 99,
        };
        let merged = clock.recv_and_merge(remote_future);
        assert!(merged > baseline);
        assert_eq!(merged.physical_us, remote_future.physical_us);
        assert_eq!(merged.logical, remote_future.logical + 1);
        assert_eq!(merged.node_id, 1);

        let next = clock.now_send();
        assert!(next > merged);
    }

    #[test]
    fn wire_round_trip() {
        let hlc = Hlc {
            physical_us: 0x0000_1234_5678_9abc & ((1 << 48) - 1),
            logical: 4321,
            node_id: 0xdead_beef,
        };
        let bytes = hlc.to_wire_bytes();
        let back = Hlc::from_wire_bytes(&bytes);
        assert_eq!(hlc, back);
    }
}
