//! The burst codec: `make_burst`/`apply_burst`, grounded directly on
//! `bstt_create_burst`/`bstt_create_data` in
//! `examples/original_source/module/zfs/burst_dedup.c`, operating on plain
//! `&[u8]` slices in place of the out-of-scope scatter/gather buffer (`abd_t`).
//!
//! Unlike the C source, the suffix scan here is bounded so it can never
//! re-consume bytes already claimed by the prefix scan — the original's
//! unbounded suffix loop is what makes `length` underflow to a huge
//! `size_t` for identical buffers. Bounding the scan removes that bug
//! outright rather than patching its symptom.

use sys::P2Ext;

use crate::config::BurstDedupConfig;
use crate::error::{BurstDedupError, Result};

/// The differing middle of a derivative block, plus the prefix/suffix
/// boundary indices into the base block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Burst {
    /// Index in the derivative (and in the base, since they share a
    /// common prefix) just past the longest common prefix.
    pub start: u32,
    /// Index of the last byte of the base that is still part of the
    /// common suffix. `base[end+1..]` is copied verbatim on reconstruction.
    pub end: u32,
    /// Number of bytes actually stored in `data`; may be less than
    /// `data.len()` (the rest is zero padding up to `data_capacity`).
    pub length: usize,
    pub data: Vec<u8>,
    pub data_capacity: u64,
}

impl Burst {
    fn zero_filled(capacity: usize) -> Self {
        Burst {
            start: 0,
            end: 0,
            length: 0,
            data: vec![0u8; capacity],
            data_capacity: capacity as u64,
        }
    }
}

fn common_prefix_len(base: &[u8], new: &[u8]) -> usize {
    base.iter().zip(new.iter()).take_while(|(a, b)| a == b).count()
}

/// Longest common suffix of `base[p..]` and `new[p..]`, scanned right to
/// left and bounded so it cannot grow past either remaining slice — it
/// must never re-claim bytes the prefix scan already matched.
fn common_suffix_len(base: &[u8], new: &[u8], p: usize) -> usize {
    let base_tail = &base[p..];
    let new_tail = &new[p..];
    base_tail
        .iter()
        .rev()
        .zip(new_tail.iter().rev())
        .take_while(|(a, b)| a == b)
        .count()
}

/// Compute the burst turning `base` into `new`.
///
/// Pure and deterministic: the only allocation is the returned burst's
/// data buffer. Always succeeds at producing a *correct* burst (round-trips
/// through [`apply_burst`]); callers decide whether the result is small
/// enough to be worth storing over a full copy.
pub fn make_burst(base: &[u8], new: &[u8], config: &BurstDedupConfig) -> Result<Burst> {
    let base_len = base.len();
    let new_len = new.len();

    let p = common_prefix_len(base, new);
    let mut s = common_suffix_len(base, new, p);

    // A suffix match that would consume the entirety of `base` (only
    // possible when p == 0) leaves no non-negative `end` index to store;
    // reject the suffix match in that case and fall back to the disjoint
    // burst instead.
    if s >= base_len {
        s = 0;
    }

    let start = p as u32;
    let end = (base_len - s - 1) as u32;
    let length = new_len - p - s;

    if length == 0 {
        let capacity = (config.min_block_size as usize).max(1);
        let mut burst = Burst::zero_filled(capacity.p2roundup(config.min_block_size as usize));
        burst.start = start;
        burst.end = end;
        return Ok(burst);
    }

    let capacity = length
        .max(config.min_block_size as usize)
        .p2roundup(config.min_block_size as usize);

    let mut data = Vec::new();
    data.try_reserve_exact(capacity)
        .map_err(|_| BurstDedupError::OutOfMemory { requested: capacity })?;
    data.extend_from_slice(&new[p..p + length]);
    data.resize(capacity, 0);

    Ok(Burst {
        start,
        end,
        length,
        data,
        data_capacity: capacity as u64,
    })
}

/// Reconstruct the derivative block from `base` and a previously computed
/// `burst`. Inverse of [`make_burst`].
pub fn apply_burst(base: &[u8], burst: &Burst) -> Vec<u8> {
    let start = burst.start as usize;
    let end = burst.end as usize;

    let mut out = Vec::with_capacity(start + burst.length + (base.len() - end - 1));
    out.extend_from_slice(&base[..start]);
    out.extend_from_slice(&burst.data[..burst.length]);
    out.extend_from_slice(&base[end + 1..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> BurstDedupConfig {
        BurstDedupConfig::default()
    }

    #[test]
    fn pure_append() {
        let base = b"AAAA";
        let new = b"AAAABBBB";
        let burst = make_burst(base, new, &cfg()).unwrap();
        assert_eq!(burst.start, 4);
        assert_eq!(burst.end, 3);
        assert_eq!(burst.length, 4);
        assert_eq!(&burst.data[..4], b"BBBB");
        assert_eq!(apply_burst(base, &burst), new);
    }

    #[test]
    fn pure_prepend_rejects_full_suffix_overlap() {
        let base = b"BBBB";
        let new = b"AAAABBBB";
        let burst = make_burst(base, new, &cfg()).unwrap();
        assert_eq!(burst.start, 0);
        assert_eq!(burst.end, 3);
        assert_eq!(burst.length, 8);
        assert_eq!(apply_burst(base, &burst), new);
    }

    #[test]
    fn edit_in_middle() {
        let base = b"ABCDEFGH";
        let new = b"ABCxyFGH";
        let burst = make_burst(base, new, &cfg()).unwrap();
        assert_eq!(burst.start, 3);
        assert_eq!(burst.end, 4);
        assert_eq!(burst.length, 2);
        assert_eq!(&burst.data[..2], b"xy");
        assert_eq!(apply_burst(base, &burst), new);
    }

    #[test]
    fn identical_blocks_have_empty_burst() {
        let base = b"HELLO";
        let new = b"HELLO";
        let burst = make_burst(base, new, &cfg()).unwrap();
        assert_eq!(burst.length, 0);
        assert_eq!(apply_burst(base, &burst), new);
    }

    #[test]
    fn insert_with_size_change() {
        let base = b"ABCDEF";
        let new = b"ABCXYZDEF";
        let burst = make_burst(base, new, &cfg()).unwrap();
        assert_eq!(burst.start, 3);
        assert_eq!(burst.end, 2);
        assert_eq!(burst.length, 3);
        assert_eq!(&burst.data[..3], b"XYZ");
        assert_eq!(apply_burst(base, &burst), new);
    }

    #[test]
    fn disjoint_blocks_produce_maximum_burst() {
        let base = b"AAAAAAAA";
        let new = b"BBBBBBBB";
        let burst = make_burst(base, new, &cfg()).unwrap();
        assert_eq!(burst.start, 0);
        assert_eq!(burst.end, base.len() as u32 - 1);
        assert_eq!(burst.length, new.len());
        assert_eq!(apply_burst(base, &burst), new);
    }

    #[test]
    fn padding_is_zero_and_rounded_up() {
        let config = BurstDedupConfig {
            min_block_size: 8,
            ..BurstDedupConfig::default()
        };
        let base = b"AAAA";
        let new = b"AAAABB"; // length = 2, rounds up to 8
        let burst = make_burst(base, new, &config).unwrap();
        assert_eq!(burst.length, 2);
        assert_eq!(burst.data_capacity, 8);
        assert_eq!(burst.data.len(), 8);
        assert!(burst.data[burst.length..].iter().all(|&b| b == 0));
    }

    #[test]
    fn randomized_round_trip() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let base_len = rng.gen_range(1..256);
            let new_len = rng.gen_range(1..256);
            let base: Vec<u8> = (0..base_len).map(|_| rng.gen_range(b'a'..=b'd')).collect();
            let mut new: Vec<u8> = (0..new_len).map(|_| rng.gen_range(b'a'..=b'd')).collect();
            // Bias some cases toward sharing a prefix/suffix with base.
            if rng.gen_bool(0.5) {
                let shared = base_len.min(new_len) / 2;
                new[..shared].copy_from_slice(&base[..shared]);
            }
            let burst = make_burst(&base, &new, &cfg()).unwrap();
            assert_eq!(apply_burst(&base, &burst), new);
        }
    }

    #[test]
    fn randomized_round_trip_near_the_largest_supported_block() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        const MAX_LEN: usize = 1 << 20;
        for _ in 0..8 {
            let base_len = rng.gen_range(MAX_LEN / 2..=MAX_LEN);
            let new_len = rng.gen_range(MAX_LEN / 2..=MAX_LEN);
            let base: Vec<u8> = (0..base_len).map(|_| rng.gen_range(b'a'..=b'd')).collect();
            let mut new: Vec<u8> = (0..new_len).map(|_| rng.gen_range(b'a'..=b'd')).collect();
            if rng.gen_bool(0.5) {
                let shared = base_len.min(new_len) / 2;
                new[..shared].copy_from_slice(&base[..shared]);
            }
            let burst = make_burst(&base, &new, &cfg()).unwrap();
            assert_eq!(apply_burst(&base, &burst), new);
        }
    }
}
