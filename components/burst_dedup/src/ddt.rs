//! An in-memory stand-in for the whole-block dedup table (DDT).
//!
//! The burst dedup core treats the DDT as an external collaborator and only
//! consumes it through `ddt_lookup`/`ddt_exist`/`ddt_phys_addref`/
//! `ddt_phys_free`. A sync pass and the safety properties it has to
//! preserve are meaningless without a DDT to sync against, so this crate
//! carries a working in-memory one rather than stubbing the interface out.
//! Persistence (ZAP objects, `dmu_tx`) is left to whatever pool implementation
//! plugs this in. This module is grounded directly on `ddt_alloc`/
//! `ddt_lookup`/`ddt_exist`/`ddt_phys_addref`/`ddt_phys_free`/`ddt_sync_table`
//! in `examples/original_source/module/zfs/ddt.c`, stripped of the on-disk
//! ZAP/`dmu_tx` plumbing that module also contains.

use std::collections::BTreeMap;

use spa::blkptr::blkptr::Dva;
use spa::blkptr::checksum::SIOChksum;

/// `enum ddt_phys_type` from `ddt.h`: ditto copy, then up to three ordinary
/// replicas.
pub const DDT_PHYS_TYPES: usize = 4;
pub const DDT_PHYS_DITTO: usize = 0;
pub const DDT_PHYS_SINGLE: usize = 1;
pub const DDT_PHYS_TRIPLE: usize = 3;

/// Number of DVAs tracked per physical copy (`SPA_DVAS_PER_BP`).
pub const N_DVA: usize = 3;

/// A fire-and-forget sink for space the storage pipeline should reclaim.
/// Corresponds to `zio_free(pool, txg, bp)` — the core never observes
/// whether the free actually completed.
pub trait FreeSink {
    fn zio_free(&mut self, txg: u64, bp: &spa::blkptr::blkptr::Blkptr);
}

/// A sink that only records what was freed, for tests and for callers that
/// want to batch frees themselves.
#[derive(Debug, Default)]
pub struct RecordingFreeSink {
    pub freed: Vec<(u64, spa::blkptr::blkptr::Blkptr)>,
}

impl FreeSink for RecordingFreeSink {
    fn zio_free(&mut self, txg: u64, bp: &spa::blkptr::blkptr::Blkptr) {
        self.freed.push((txg, bp.clone()));
    }
}

/// Chains a new write behind an in-flight lead write on the same physical
/// slot instead of double-counting its refcount, mirroring
/// `zio_add_child`/`dde_lead_zio` in `htddt_phys_addref`/
/// `bstt_phys_addref`. The core never blocks on this itself; it only
/// consults the tracker to decide whether to chain or to call
/// `Ddt::phys_addref` directly. `HtddtTable::addref`/`BsttTable::addref`
/// are the two call sites a real caller reaches.
pub trait LeadWriteTracker {
    /// Is there a write to `(base_key, phys_index)` still in flight?
    fn lead_in_flight(&self, base_key: &SIOChksum, phys_index: usize) -> bool;
    /// Chain the caller's pending write behind the in-flight lead write.
    fn add_child(&mut self, base_key: &SIOChksum, phys_index: usize);
}

/// A tracker for callers with no lead-write chaining of their own: every
/// phys addref goes straight to the DDT.
#[derive(Debug, Default)]
pub struct NoLeadWrites;

impl LeadWriteTracker for NoLeadWrites {
    fn lead_in_flight(&self, _base_key: &SIOChksum, _phys_index: usize) -> bool {
        false
    }

    fn add_child(&mut self, _base_key: &SIOChksum, _phys_index: usize) {}
}

/// `htddt_phys_addref`/`bstt_phys_addref`: if a lead write is in flight for
/// this phys slot, chain behind it; otherwise bump the DDE's phys refcount
/// directly. Shared by `HtddtTable::addref` and `BsttTable::addref`, which
/// always bump their own entry's refcount first and then call this to
/// propagate the bump down to the base DDE.
pub(crate) fn chain_or_addref(
    ddt: &mut Ddt,
    tracker: &mut dyn LeadWriteTracker,
    base_key: &SIOChksum,
    phys_index: usize,
) {
    if tracker.lead_in_flight(base_key, phys_index) {
        tracker.add_child(base_key, phys_index);
    } else {
        ddt.phys_addref(base_key, phys_index);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdtClass {
    Ditto,
    Duplicate,
    Unique,
}

/// Number of distinct classes a histogram bucket is kept per.
pub const DDT_CLASSES: usize = 3;

impl DdtClass {
    fn index(self) -> usize {
        match self {
            DdtClass::Ditto => 0,
            DdtClass::Duplicate => 1,
            DdtClass::Unique => 2,
        }
    }
}

/// One refcnt-bucket's worth of a histogram: how many entries fall in it
/// and the total refcount-weighted block count they represent.
#[derive(Debug, Clone, Copy, Default)]
pub struct DdtHistogramBucket {
    pub entries: u64,
    pub ref_blocks: u64,
}

/// `ddt_histogram_t`: 64 refcnt buckets (bucket `b` holds entries whose
/// total refcount's highest set bit is `b`), one per class. Unlike
/// `ddt_stat_t` this doesn't carry lsize/psize/dsize sums — this in-memory
/// table has no block geometry to compute dsize from, only refcounts.
#[derive(Debug, Clone)]
pub struct DdtHistogram {
    pub buckets: [DdtHistogramBucket; 64],
}

impl Default for DdtHistogram {
    fn default() -> Self {
        DdtHistogram {
            buckets: [DdtHistogramBucket::default(); 64],
        }
    }
}

fn histogram_bucket(total_refcnt: u64) -> usize {
    debug_assert!(total_refcnt > 0);
    (63 - total_refcnt.leading_zeros()) as usize
}

#[derive(Debug, Clone)]
pub struct DdtPhys {
    pub refcnt: u64,
    pub phys_birth: u64,
    pub dva: [Dva; N_DVA],
}

impl DdtPhys {
    fn empty() -> Self {
        DdtPhys {
            refcnt: 0,
            phys_birth: 0,
            dva: [Dva::new(), Dva::new(), Dva::new()],
        }
    }

    fn is_allocated(&self) -> bool {
        self.phys_birth != 0
    }
}

/// A base dedup entry (DDE): owns up to [`DDT_PHYS_TYPES`] physical
/// replicas of one whole, unique block. HTDDT/BSTT entries hold only a
/// non-owning key reference to one of these.
#[derive(Debug, Clone)]
pub struct DdtEntry {
    pub key: SIOChksum,
    pub phys: [DdtPhys; DDT_PHYS_TYPES],
    pub class: DdtClass,
}

impl DdtEntry {
    fn new(key: SIOChksum) -> Self {
        DdtEntry {
            key,
            phys: [
                DdtPhys::empty(),
                DdtPhys::empty(),
                DdtPhys::empty(),
                DdtPhys::empty(),
            ],
            class: DdtClass::Unique,
        }
    }

    pub fn total_refcnt(&self) -> u64 {
        self.phys[DDT_PHYS_SINGLE..=DDT_PHYS_TRIPLE]
            .iter()
            .map(|p| p.refcnt)
            .sum()
    }
}

/// One checksum algorithm's base dedup table.
#[derive(Debug, Default)]
pub struct Ddt {
    tree: BTreeMap<[u8; 32], DdtEntry>,
    histogram: [DdtHistogram; DDT_CLASSES],
}

fn key_bytes(key: &SIOChksum) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (i, word) in key.zc_word.iter().enumerate() {
        out[i * 8..i * 8 + 8].copy_from_slice(&word.to_be_bytes());
    }
    out
}

impl Ddt {
    pub fn new() -> Self {
        Ddt::default()
    }

    /// `ddt_lookup`: find the entry keyed by `key`; if absent and `add`,
    /// insert a fresh zeroed entry. Returns the entry and whether it was
    /// already present.
    pub fn lookup(&mut self, key: &SIOChksum, add: bool) -> (Option<&mut DdtEntry>, bool) {
        let bytes = key_bytes(key);
        let found = self.tree.contains_key(&bytes);
        if !found {
            if !add {
                return (None, false);
            }
            self.tree.insert(bytes, DdtEntry::new(key.clone()));
        }
        (self.tree.get_mut(&bytes), found)
    }

    pub fn get(&self, key: &SIOChksum) -> Option<&DdtEntry> {
        self.tree.get(&key_bytes(key))
    }

    /// `ddt_exist`: does an entry with this key still exist in the table?
    /// HTDDT/BSTT entries hold only a key (see module docs), so existence
    /// is always re-checked through the table rather than through a raw
    /// pointer.
    pub fn exist(&self, key: &SIOChksum) -> bool {
        self.tree.contains_key(&key_bytes(key))
    }

    /// `ddt_remove`.
    pub fn remove(&mut self, key: &SIOChksum) {
        self.tree.remove(&key_bytes(key));
    }

    /// `ddt_phys_addref`.
    pub fn phys_addref(&mut self, key: &SIOChksum, phys_index: usize) {
        if let Some(entry) = self.tree.get_mut(&key_bytes(key)) {
            entry.phys[phys_index].refcnt += 1;
        }
    }

    /// `ddt_phys_free`: build a block pointer from `(key, phys)`, clear the
    /// dedup bit so the free actually releases space instead of
    /// decrementing a dedup refcount, hand it to `sink`, then clear the
    /// physical copy.
    pub fn phys_free(
        &mut self,
        key: &SIOChksum,
        phys_index: usize,
        checksum: spa::sio::SIOChecksum,
        txg: u64,
        sink: &mut dyn FreeSink,
    ) {
        let bytes = key_bytes(key);
        let Some(entry) = self.tree.get_mut(&bytes) else {
            return;
        };
        let ddp = &entry.phys[phys_index];
        if !ddp.is_allocated() {
            return;
        }
        let mut bp = spa::blkptr::blkptr::Blkptr::new();
        bp.blk_dva = ddp.dva.to_vec();
        bp.blk_cksum = key.clone();
        bp.set_checksum(checksum);
        bp.set_birth(txg, ddp.phys_birth);
        bp.set_dedup(false);
        sink.zio_free(txg, &bp);
        entry.phys[phys_index] = DdtPhys::empty();
    }

    /// `ddt_sync_table`: reclassify Unique/Duplicate by total non-ditto
    /// refcount, free ditto copies unconditionally (ZFS no longer writes
    /// them, but must still release any inherited from older software), free
    /// any zero-refcount ordinary copy, and recompute the refcount
    /// histogram from scratch the way `ddt_histogram_set_empty` followed by
    /// per-entry `ddt_stat_update` calls does.
    pub fn sync_table(&mut self, checksum: spa::sio::SIOChecksum, txg: u64, sink: &mut dyn FreeSink) {
        for h in &mut self.histogram {
            *h = DdtHistogram::default();
        }
        let keys: Vec<SIOChksum> = self.tree.values().map(|e| e.key.clone()).collect();
        for key in keys {
            if self.tree.get(&key_bytes(&key)).unwrap().phys[DDT_PHYS_DITTO].is_allocated() {
                self.phys_free(&key, DDT_PHYS_DITTO, checksum, txg, sink);
            }
            for p in DDT_PHYS_SINGLE..=DDT_PHYS_TRIPLE {
                let allocated = self.tree.get(&key_bytes(&key)).unwrap().phys[p].is_allocated();
                let refcnt = self.tree.get(&key_bytes(&key)).unwrap().phys[p].refcnt;
                if allocated && refcnt == 0 {
                    self.phys_free(&key, p, checksum, txg, sink);
                }
            }
            if let Some(entry) = self.tree.get_mut(&key_bytes(&key)) {
                let total = entry.total_refcnt();
                entry.class = if total > 1 {
                    DdtClass::Duplicate
                } else {
                    DdtClass::Unique
                };
                if total != 0 {
                    let bucket = histogram_bucket(total);
                    let h = &mut self.histogram[entry.class.index()].buckets[bucket];
                    h.entries += 1;
                    h.ref_blocks += total;
                }
            }
        }
    }

    /// This class's current refcount histogram, as of the last
    /// [`Ddt::sync_table`] pass.
    pub fn histogram(&self, class: DdtClass) -> &DdtHistogram {
        &self.histogram[class.index()]
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> SIOChksum {
        SIOChksum {
            zc_word: [byte as u64, 0, 0, 0],
        }
    }

    #[test]
    fn lookup_add_then_found() {
        let mut ddt = Ddt::new();
        let k = key(1);
        let (_entry, found) = ddt.lookup(&k, true);
        assert!(!found);
        let (_entry, found) = ddt.lookup(&k, true);
        assert!(found);
    }

    #[derive(Default)]
    struct FakeTracker {
        in_flight: bool,
        chained: u32,
    }

    impl LeadWriteTracker for FakeTracker {
        fn lead_in_flight(&self, _base_key: &SIOChksum, _phys_index: usize) -> bool {
            self.in_flight
        }

        fn add_child(&mut self, _base_key: &SIOChksum, _phys_index: usize) {
            self.chained += 1;
        }
    }

    #[test]
    fn addref_chains_behind_in_flight_lead_write() {
        let mut ddt = Ddt::new();
        let k = key(4);
        ddt.lookup(&k, true);
        let mut tracker = FakeTracker { in_flight: true, chained: 0 };
        chain_or_addref(&mut ddt, &mut tracker, &k, DDT_PHYS_SINGLE);
        assert_eq!(tracker.chained, 1);
        assert_eq!(ddt.get(&k).unwrap().phys[DDT_PHYS_SINGLE].refcnt, 0);
    }

    #[test]
    fn addref_bumps_ddt_when_no_lead_write() {
        let mut ddt = Ddt::new();
        let k = key(4);
        ddt.lookup(&k, true);
        let mut tracker = FakeTracker::default();
        chain_or_addref(&mut ddt, &mut tracker, &k, DDT_PHYS_SINGLE);
        assert_eq!(tracker.chained, 0);
        assert_eq!(ddt.get(&k).unwrap().phys[DDT_PHYS_SINGLE].refcnt, 1);
    }

    #[test]
    fn sync_frees_zero_refcount_phys() {
        let mut ddt = Ddt::new();
        let k = key(7);
        {
            let (entry, _) = ddt.lookup(&k, true);
            let entry = entry.unwrap();
            entry.phys[DDT_PHYS_SINGLE].phys_birth = 1;
            entry.phys[DDT_PHYS_SINGLE].refcnt = 0;
        }
        let mut sink = RecordingFreeSink::default();
        ddt.sync_table(spa::sio::SIOChecksum::SHA256, 5, &mut sink);
        assert_eq!(sink.freed.len(), 1);
        assert!(!ddt.get(&k).unwrap().phys[DDT_PHYS_SINGLE].is_allocated());
    }

    #[test]
    fn sync_recomputes_the_refcount_histogram() {
        let mut ddt = Ddt::new();
        let dup = key(11);
        {
            let (entry, _) = ddt.lookup(&dup, true);
            let entry = entry.unwrap();
            entry.phys[DDT_PHYS_SINGLE].phys_birth = 1;
            entry.phys[DDT_PHYS_SINGLE].refcnt = 3;
        }
        let uniq = key(12);
        {
            let (entry, _) = ddt.lookup(&uniq, true);
            let entry = entry.unwrap();
            entry.phys[DDT_PHYS_SINGLE].phys_birth = 1;
            entry.phys[DDT_PHYS_SINGLE].refcnt = 1;
        }
        let mut sink = RecordingFreeSink::default();
        ddt.sync_table(spa::sio::SIOChecksum::SHA256, 5, &mut sink);

        let dup_hist = ddt.histogram(DdtClass::Duplicate);
        assert_eq!(dup_hist.buckets[histogram_bucket(3)].entries, 1);
        assert_eq!(dup_hist.buckets[histogram_bucket(3)].ref_blocks, 3);

        let uniq_hist = ddt.histogram(DdtClass::Unique);
        assert_eq!(uniq_hist.buckets[histogram_bucket(1)].entries, 1);
        assert_eq!(uniq_hist.buckets[histogram_bucket(1)].ref_blocks, 1);

        // A second sync with no table changes must not double-count.
        let mut sink = RecordingFreeSink::default();
        ddt.sync_table(spa::sio::SIOChecksum::SHA256, 6, &mut sink);
        assert_eq!(ddt.histogram(DdtClass::Duplicate).buckets[histogram_bucket(3)].entries, 1);
    }
}
