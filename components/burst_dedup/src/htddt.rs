//! Head/tail dedup table: a similarity index keyed by the checksum of a
//! block's head or tail, mapping to a non-owning reference to the base
//! block's dedup entry. Grounded on `htddt_*` in
//! `examples/original_source/module/zfs/burst_dedup.c`, with the AVL tree
//! replaced by [`std::collections::BTreeMap`] (see [`crate::ddt`] docs for
//! why).

use std::cmp::Ordering;
use std::collections::BTreeMap;

use log::{debug, trace};
use spa::blkptr::checksum::SIOChksum;
use sys::P2Ext;

use crate::ddt::{chain_or_addref, Ddt, LeadWriteTracker};
use crate::keycmp::{cksum_lanes, cmp_u16_lanes};

/// `enum htddt_type`. A HEAD entry is always associated with a HEAD block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HtddtSide {
    Head = 0,
    Tail = 1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtddtKey {
    pub cksum: SIOChksum,
    pub side: HtddtSide,
}

impl HtddtKey {
    pub fn new(cksum: SIOChksum, side: HtddtSide) -> Self {
        HtddtKey { cksum, side }
    }

    fn lanes(&self) -> [u16; 17] {
        let mut lanes = [0u16; 17];
        lanes[..16].copy_from_slice(&cksum_lanes(&self.cksum.zc_word));
        lanes[16] = self.side as u16;
        lanes
    }
}

impl PartialOrd for HtddtKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HtddtKey {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_u16_lanes(&self.lanes(), &other.lanes())
    }
}

/// `htddt_phys_t`. `base_key` is the non-owning back-reference to the base
/// [`crate::ddt::DdtEntry`]; existence is re-validated through the DDT at
/// sync time rather than dereferenced directly, since the DDT may drop the
/// entry out from under any HTDDT/BSTT entries still pointing at it.
#[derive(Debug, Clone)]
pub struct HtddtPhys {
    pub base_key: SIOChksum,
    pub phys_index: usize,
    pub refcnt: u64,
    pub payload_size: u64,
    pub valid: bool,
}

/// One `(checksum_algorithm, side)` table.
#[derive(Debug)]
pub struct HtddtTable {
    side: HtddtSide,
    tree: BTreeMap<HtddtKey, HtddtPhys>,
}

impl HtddtTable {
    pub fn new(side: HtddtSide) -> Self {
        HtddtTable {
            side,
            tree: BTreeMap::new(),
        }
    }

    pub fn side(&self) -> HtddtSide {
        self.side
    }

    /// `htddt_lookup`: find the entry for `key`; if absent and `add`,
    /// insert a zeroed entry for `base_key`/`phys_index`.
    pub fn lookup(
        &mut self,
        key: &HtddtKey,
        add: bool,
        base_key: &SIOChksum,
        phys_index: usize,
    ) -> (Option<&mut HtddtPhys>, bool) {
        debug_assert_eq!(key.side, self.side);
        let found = self.tree.contains_key(key);
        if !found {
            if !add {
                debug!("htddt_lookup: miss, not adding");
                return (None, false);
            }
            trace!("htddt_lookup: alloc new htdde");
            self.tree.insert(
                key.clone(),
                HtddtPhys {
                    base_key: base_key.clone(),
                    phys_index,
                    refcnt: 0,
                    payload_size: 0,
                    valid: false,
                },
            );
        } else {
            debug!("htddt_lookup: hit");
        }
        (self.tree.get_mut(key), found)
    }

    pub fn get(&self, key: &HtddtKey) -> Option<&HtddtPhys> {
        self.tree.get(key)
    }

    /// `htddt_remove`.
    pub fn remove(&mut self, key: &HtddtKey) {
        trace!("htddt_remove");
        self.tree.remove(key);
    }

    /// `htddt_phys_addref`, with `MAX_HTDDP_REFCNT` actually enforced:
    /// refuses to bump past the cap, forcing the caller to pick a new base
    /// instead of silently wrapping or overcommitting a slot. Returns
    /// `false` without mutating anything if the cap would be exceeded; `0`
    /// disables the cap. On success, bumps this entry's own refcount, then
    /// either chains behind an in-flight lead write on the base phys slot
    /// or bumps the DDE's phys refcount directly, via `tracker`.
    pub fn addref(&mut self, key: &HtddtKey, max_refcnt: u64, ddt: &mut Ddt, tracker: &mut dyn LeadWriteTracker) -> bool {
        let Some(htddp) = self.tree.get_mut(key) else {
            return false;
        };
        if max_refcnt != 0 && htddp.refcnt >= max_refcnt {
            return false;
        }
        htddp.refcnt += 1;
        let base_key = htddp.base_key.clone();
        let phys_index = htddp.phys_index;
        chain_or_addref(ddt, tracker, &base_key, phys_index);
        true
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn keys_with_base<'a>(&'a self) -> impl Iterator<Item = (&'a HtddtKey, &'a SIOChksum)> {
        self.tree.iter().map(|(k, v)| (k, &v.base_key))
    }

    pub fn remove_all(&mut self) {
        self.tree.clear();
    }
}

/// `HTDDT_HT_RIGHTSHIFT`-based head/tail length: one `right_shift`-th of
/// the block, rounded up to `min_block_size`, minimum one unit.
pub fn htsize(block_size: u64, right_shift: u32, min_block_size: u64) -> u64 {
    let shifted = (block_size >> right_shift).max(1) as usize;
    shifted.p2roundup(min_block_size.max(1) as usize) as u64
}
