//! Burst dedup table: keyed by the full checksum of a derivative block,
//! storing the burst payload plus enough block metadata to reconstruct a
//! block pointer for it. Grounded on `bstt_*` in
//! `examples/original_source/module/zfs/burst_dedup.c`.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use log::{debug, trace, warn};
use spa::blkptr::blkptr::{Blkptr, Dva};
use spa::blkptr::checksum::SIOChksum;
use spa::sio::SIOChecksum;
use sys::BitOptExt;

use crate::burst::Burst;
use crate::ddt::{chain_or_addref, Ddt, FreeSink, LeadWriteTracker, N_DVA};
use crate::htddt::HtddtPhys;
use crate::keycmp::{cksum_lanes, cmp_u16_lanes};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BsttKey {
    pub cksum: SIOChksum,
}

impl BsttKey {
    pub fn new(cksum: SIOChksum) -> Self {
        BsttKey { cksum }
    }
}

impl PartialOrd for BsttKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BsttKey {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_u16_lanes(&cksum_lanes(&self.cksum.zc_word), &cksum_lanes(&other.cksum.zc_word))
    }
}

/// Per-entry lifecycle: `Pending` while seeded from an HTDDT hit but not
/// yet referenced by a write, `Live` once `addref` gives it a real
/// referrer, `Dead` is never persisted — an entry whose base vanished and
/// whose refcount is zero is reaped in the same sync pass that notices it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BsttState {
    Pending,
    Live,
    Dead,
}

/// Decode/encode the `bstp.prop` bit-packed word: logical size and
/// physical size in units of `min_block_size` (bias -1), then a 7-bit
/// compression code, then a 1-bit crypt flag. Generalizes `sys::BitOptExt`
/// the same way `Blkptr::blk_prop` already uses it.
fn min_block_shift(min_block_size: u64) -> u64 {
    debug_assert!(min_block_size.is_power_of_two());
    min_block_size.trailing_zeros() as u64
}

pub fn prop_get_lsize(prop: u64, min_block_size: u64) -> u64 {
    prop.bf_get_sb(0, 16, min_block_shift(min_block_size), 1)
}

pub fn prop_set_lsize(prop: &mut u64, min_block_size: u64, lsize: u64) {
    prop.bf_set_sb(0, 16, min_block_shift(min_block_size), 1, lsize);
}

pub fn prop_get_psize(prop: u64, min_block_size: u64) -> u64 {
    prop.bf_get_sb(16, 16, min_block_shift(min_block_size), 1)
}

pub fn prop_set_psize(prop: &mut u64, min_block_size: u64, psize: u64) {
    prop.bf_set_sb(16, 16, min_block_shift(min_block_size), 1, psize);
}

pub fn prop_get_compress(prop: u64) -> u64 {
    prop.bf_get(32, 7)
}

pub fn prop_set_compress(prop: &mut u64, compress: u64) {
    prop.bf_set(32, 7, compress);
}

pub fn prop_get_crypt(prop: u64) -> bool {
    prop.bf_get(39, 1) != 0
}

pub fn prop_set_crypt(prop: &mut u64, crypt: bool) {
    prop.bf_set(39, 1, crypt as u64);
}

#[derive(Debug, Clone)]
pub struct BsttPhys {
    pub base_key: SIOChksum,
    pub phys_index: usize,
    pub refcnt: u64,
    pub payload_size: u64,
    pub burst: Burst,
    pub burst_dvas: [Dva; N_DVA],
    pub phys_birth: u64,
    pub prop: u64,
    pub valid: bool,
    pub state: BsttState,
}

#[derive(Debug, Default)]
pub struct BsttTable {
    tree: BTreeMap<BsttKey, BsttPhys>,
}

impl BsttTable {
    pub fn new() -> Self {
        BsttTable::default()
    }

    /// `bstt_lookup`.
    pub fn lookup(&mut self, key: &BsttKey, add: bool, seed: impl FnOnce() -> BsttPhys) -> (Option<&mut BsttPhys>, bool) {
        let found = self.tree.contains_key(key);
        if !found {
            if !add {
                debug!("bstt_lookup: miss, not adding");
                return (None, false);
            }
            trace!("bstt_lookup: alloc new bste");
            self.tree.insert(key.clone(), seed());
        } else {
            debug!("bstt_lookup: hit");
        }
        (self.tree.get_mut(key), found)
    }

    pub fn get(&self, key: &BsttKey) -> Option<&BsttPhys> {
        self.tree.get(key)
    }

    /// `bstt_remove`: the burst buffer is dropped along with the entry —
    /// `Vec<u8>`'s own `Drop` is the Rust equivalent of `bstt_free`
    /// releasing `bstp_burst.data` via `abd_free`.
    pub fn remove(&mut self, key: &BsttKey) {
        trace!("bstt_remove");
        self.tree.remove(key);
    }

    /// `bstt_bstp_fill`: materialise the immutable portion of a BSTT value
    /// from an HTDDT hit.
    pub fn seed_from_htddt(htddp: &HtddtPhys, burst: Burst) -> BsttPhys {
        BsttPhys {
            base_key: htddp.base_key.clone(),
            phys_index: htddp.phys_index,
            refcnt: 0,
            payload_size: htddp.payload_size,
            burst,
            burst_dvas: [Dva::new(), Dva::new(), Dva::new()],
            phys_birth: 0,
            prop: 0,
            valid: false,
            state: BsttState::Pending,
        }
    }

    /// `bstt_phys_addref`: increments the BSTT refcount, then either chains
    /// behind an in-flight lead write on the base phys slot or bumps the
    /// underlying DDE's phys refcount directly, via `tracker`.
    pub fn addref(&mut self, key: &BsttKey, ddt: &mut Ddt, tracker: &mut dyn LeadWriteTracker) -> bool {
        let Some(bstp) = self.tree.get_mut(key) else {
            return false;
        };
        bstp.refcnt += 1;
        bstp.state = BsttState::Live;
        let base_key = bstp.base_key.clone();
        let phys_index = bstp.phys_index;
        chain_or_addref(ddt, tracker, &base_key, phys_index);
        true
    }

    /// `bstt_bp_fill`: populate a block pointer for the derivative from
    /// the BSTT value.
    pub fn fill_bp(bstp: &BsttPhys, bp: &mut Blkptr, txg: u64, min_block_size: u64) {
        debug_assert_ne!(txg, 0);
        bp.blk_dva = bstp.burst_dvas.to_vec();
        bp.set_birth(txg, bstp.phys_birth);
        bp.set_lsize(prop_get_lsize(bstp.prop, min_block_size));
        bp.set_psize(prop_get_psize(bstp.prop, min_block_size));
        bp.set_compress(prop_get_compress(bstp.prop));
        bp.set_user_crypt(prop_get_crypt(bstp.prop));
    }

    /// `bstt_bp_create`: zero a BP, fill it from `bstp`, stamp the
    /// checksum, mark it dedup.
    pub fn create_bp(checksum: SIOChecksum, key: &BsttKey, bstp: &BsttPhys, txg: u64, min_block_size: u64) -> Blkptr {
        let mut bp = Blkptr::new();
        Self::fill_bp(bstp, &mut bp, txg, min_block_size);
        bp.blk_cksum = key.cksum.clone();
        bp.set_checksum(checksum);
        bp.set_fill(1);
        bp.set_level(0);
        bp.set_dedup(true);
        bp
    }

    /// `bstt_phys_free`: build a BP from `(key, bstp)`, clear the dedup
    /// bit, and hand it to `sink`.
    pub fn free_phys(
        &mut self,
        key: &BsttKey,
        checksum: SIOChecksum,
        txg: u64,
        min_block_size: u64,
        sink: &mut dyn FreeSink,
    ) {
        let Some(bstp) = self.tree.get(key) else {
            return;
        };
        let mut bp = Self::create_bp(checksum, key, bstp, txg, min_block_size);
        bp.set_dedup(false);
        sink.zio_free(txg, &bp);
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// `bstt_sync_table`: for each entry with `refcnt == 0` whose base DDE
    /// no longer exists, free its burst storage and remove it.
    pub fn sync_table(&mut self, ddt: &mut Ddt, checksum: SIOChecksum, txg: u64, min_block_size: u64, sink: &mut dyn FreeSink) {
        let dead: Vec<BsttKey> = self
            .tree
            .iter()
            .filter(|(_, p)| p.refcnt == 0 && !ddt.exist(&p.base_key))
            .map(|(k, _)| k.clone())
            .collect();
        for key in dead {
            warn!("bstt_sync_table: reaping entry whose base DDE vanished");
            self.free_phys(&key, checksum, txg, min_block_size, sink);
            self.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddt::RecordingFreeSink;
    use crate::htddt::{HtddtPhys};

    fn cksum(byte: u8) -> SIOChksum {
        SIOChksum {
            zc_word: [byte as u64, 0, 0, 0],
        }
    }

    fn empty_burst() -> Burst {
        Burst {
            start: 0,
            end: 0,
            length: 0,
            data: vec![],
            data_capacity: 0,
        }
    }

    #[test]
    fn prop_roundtrip() {
        let mut prop = 0u64;
        prop_set_lsize(&mut prop, 1, 4096);
        prop_set_psize(&mut prop, 1, 2048);
        prop_set_compress(&mut prop, 5);
        prop_set_crypt(&mut prop, true);
        assert_eq!(prop_get_lsize(prop, 1), 4096);
        assert_eq!(prop_get_psize(prop, 1), 2048);
        assert_eq!(prop_get_compress(prop), 5);
        assert!(prop_get_crypt(prop));
    }

    #[test]
    fn lookup_idempotent() {
        let mut table = BsttTable::new();
        let key = BsttKey::new(cksum(1));
        let htddp = HtddtPhys {
            base_key: cksum(9),
            phys_index: 0,
            refcnt: 0,
            payload_size: 0,
            valid: false,
        };
        let (_e, found) = table.lookup(&key, true, || BsttTable::seed_from_htddt(&htddp, empty_burst()));
        assert!(!found);
        let (_e, found) = table.lookup(&key, true, || unreachable!());
        assert!(found);
    }

    #[test]
    fn addref_mirrors_to_ddt() {
        let mut ddt = Ddt::new();
        let base = cksum(9);
        ddt.lookup(&base, true);

        let mut table = BsttTable::new();
        let key = BsttKey::new(cksum(1));
        let htddp = HtddtPhys {
            base_key: base.clone(),
            phys_index: crate::ddt::DDT_PHYS_SINGLE,
            refcnt: 0,
            payload_size: 0,
            valid: false,
        };
        table.lookup(&key, true, || BsttTable::seed_from_htddt(&htddp, empty_burst()));
        assert!(table.addref(&key, &mut ddt, &mut crate::ddt::NoLeadWrites));
        assert_eq!(table.get(&key).unwrap().refcnt, 1);
        assert_eq!(ddt.get(&base).unwrap().phys[crate::ddt::DDT_PHYS_SINGLE].refcnt, 1);
    }

    #[test]
    fn addref_chains_behind_lead_write_instead_of_bumping_ddt() {
        struct AlwaysInFlight(u32);
        impl crate::ddt::LeadWriteTracker for AlwaysInFlight {
            fn lead_in_flight(&self, _base_key: &SIOChksum, _phys_index: usize) -> bool {
                true
            }
            fn add_child(&mut self, _base_key: &SIOChksum, _phys_index: usize) {
                self.0 += 1;
            }
        }

        let mut ddt = Ddt::new();
        let base = cksum(9);
        ddt.lookup(&base, true);

        let mut table = BsttTable::new();
        let key = BsttKey::new(cksum(1));
        let htddp = HtddtPhys {
            base_key: base.clone(),
            phys_index: crate::ddt::DDT_PHYS_SINGLE,
            refcnt: 0,
            payload_size: 0,
            valid: false,
        };
        table.lookup(&key, true, || BsttTable::seed_from_htddt(&htddp, empty_burst()));
        let mut tracker = AlwaysInFlight(0);
        assert!(table.addref(&key, &mut ddt, &mut tracker));
        assert_eq!(tracker.0, 1);
        assert_eq!(table.get(&key).unwrap().refcnt, 1);
        // Chained, not bumped directly.
        assert_eq!(ddt.get(&base).unwrap().phys[crate::ddt::DDT_PHYS_SINGLE].refcnt, 0);
    }

    #[test]
    fn sync_reaps_entry_whose_base_vanished() {
        let mut ddt = Ddt::new();
        let base = cksum(9);
        ddt.lookup(&base, true);
        ddt.remove(&base);

        let mut table = BsttTable::new();
        let key = BsttKey::new(cksum(1));
        let htddp = HtddtPhys {
            base_key: base,
            phys_index: 0,
            refcnt: 0,
            payload_size: 0,
            valid: false,
        };
        table.lookup(&key, true, || BsttTable::seed_from_htddt(&htddp, empty_burst()));

        let mut sink = RecordingFreeSink::default();
        table.sync_table(&mut ddt, SIOChecksum::SHA256, 5, 1, &mut sink);
        assert!(table.get(&key).is_none());
        assert_eq!(sink.freed.len(), 1);
        assert!(!sink.freed[0].1.get_dedup());
    }

    #[test]
    fn sync_keeps_entry_with_live_refcount() {
        let mut ddt = Ddt::new();
        let base = cksum(9);
        ddt.lookup(&base, true);
        ddt.remove(&base);

        let mut table = BsttTable::new();
        let key = BsttKey::new(cksum(1));
        let htddp = HtddtPhys {
            base_key: base,
            phys_index: 0,
            refcnt: 0,
            payload_size: 0,
            valid: false,
        };
        let (_e, _) = table.lookup(&key, true, || BsttTable::seed_from_htddt(&htddp, empty_burst()));
        table.tree.get_mut(&key).unwrap().refcnt = 1;

        let mut sink = RecordingFreeSink::default();
        table.sync_table(&mut ddt, SIOChecksum::SHA256, 5, 1, &mut sink);
        assert!(table.get(&key).is_some());
        assert!(sink.freed.is_empty());
    }
}
