//! Lexicographic compare over 16-bit lanes, mirroring `htddt_entry_compare`/
//! `bstt_entry_compare` in `burst_dedup.c` (`htddt_key_cmp_t`/
//! `bstt_key_cmp_t` overlay the key struct with a `u16` array and compare
//! lane by lane). Kept as a free function rather than a derived `Ord` so the
//! key types can state exactly which fields participate, in the same order
//! as the C struct layout.
use std::cmp::Ordering;

pub(crate) fn cmp_u16_lanes(a: &[u16], b: &[u16]) -> Ordering {
    debug_assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b.iter()) {
        match x.cmp(y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Split a 256-bit checksum into its 16-bit lanes, most-significant word
/// first, matching how `zio_cksum_t` is laid out in `htddt_key_cmp_t`.
pub(crate) fn cksum_lanes(words: &[u64; 4]) -> [u16; 16] {
    let mut lanes = [0u16; 16];
    for (i, word) in words.iter().enumerate() {
        lanes[i * 4] = (word >> 48) as u16;
        lanes[i * 4 + 1] = (word >> 32) as u16;
        lanes[i * 4 + 2] = (word >> 16) as u16;
        lanes[i * 4 + 3] = *word as u16;
    }
    lanes
}
