//! Pool context: owns one [`ChecksumGroup`] (DDT + BSTT + HTDDT-head +
//! HTDDT-tail) per checksum algorithm tag, each behind its own mutex, so a
//! sync pass or lookup against one checksum tag never blocks one against
//! another. `enter` returns a `MutexGuard`; its `Drop` is the `exit`.
//! Grounded on `htddt_create`/`bstt_create`'s per-`zio_checksum` table
//! arrays in `examples/original_source/module/zfs/burst_dedup.c`.

use std::sync::{Mutex, MutexGuard};

use spa::sio::SIOChecksum;

use crate::bstt::BsttTable;
use crate::config::BurstDedupConfig;
use crate::ddt::{Ddt, FreeSink};
use crate::htddt::{HtddtSide, HtddtTable};
use crate::sync::sync_one_tag;

/// The four tables a single checksum algorithm tag owns, guarded
/// together by one mutex.
pub struct ChecksumGroup {
    pub ddt: Ddt,
    pub bstt: BsttTable,
    pub htddt_head: HtddtTable,
    pub htddt_tail: HtddtTable,
}

impl ChecksumGroup {
    fn new() -> Self {
        ChecksumGroup {
            ddt: Ddt::new(),
            bstt: BsttTable::new(),
            htddt_head: HtddtTable::new(HtddtSide::Head),
            htddt_tail: HtddtTable::new(HtddtSide::Tail),
        }
    }

    /// `ddt_sync`'s per-tag body: DDT, BSTT, HTDDT-head, HTDDT-tail, in
    /// that order.
    pub fn sync(&mut self, checksum: SIOChecksum, txg: u64, config: &BurstDedupConfig, sink: &mut dyn FreeSink) {
        sync_one_tag(
            &mut self.ddt,
            &mut self.bstt,
            &mut self.htddt_head,
            &mut self.htddt_tail,
            checksum,
            txg,
            config.min_block_size,
            sink,
        );
    }
}

/// One [`ChecksumGroup`] per [`SIOChecksum::FUNCTIONS`] tag. Construction
/// mirrors `htddt_create`/`bstt_create` allocating one table per
/// `zio_checksum` value; unlike the C source, lifetime is the Rust
/// struct's own — no explicit `unload` call is needed, `Drop` suffices.
pub struct PoolContext {
    pub config: BurstDedupConfig,
    groups: Vec<Mutex<ChecksumGroup>>,
}

impl PoolContext {
    pub fn new(config: BurstDedupConfig) -> Self {
        let n = SIOChecksum::FUNCTIONS as usize;
        let groups = (0..n).map(|_| Mutex::new(ChecksumGroup::new())).collect();
        PoolContext { config, groups }
    }

    /// `ddt_enter`/`htddt_select`/`bstt_select` combined: locate and lock
    /// the table set for `checksum`. The returned guard's `Drop` is the
    /// `exit`.
    pub fn enter(&self, checksum: SIOChecksum) -> MutexGuard<'_, ChecksumGroup> {
        self.groups[checksum as u8 as usize]
            .lock()
            .expect("checksum group mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddt::RecordingFreeSink;

    #[test]
    fn each_tag_gets_an_independent_group() {
        let pool = PoolContext::new(BurstDedupConfig::default());
        let cksum = spa::blkptr::checksum::SIOChksum { zc_word: [1, 0, 0, 0] };
        {
            let mut group = pool.enter(SIOChecksum::SHA256);
            group.ddt.lookup(&cksum, true);
        }
        assert_eq!(pool.enter(SIOChecksum::SHA256).ddt.len(), 1);
        assert_eq!(pool.enter(SIOChecksum::SHA512).ddt.len(), 0);
    }

    #[test]
    fn sync_runs_under_the_tag_lock() {
        let pool = PoolContext::new(BurstDedupConfig::default());
        let mut group = pool.enter(SIOChecksum::SHA256);
        let mut sink = RecordingFreeSink::default();
        group.sync(SIOChecksum::SHA256, 1, &pool.config, &mut sink);
        assert!(sink.freed.is_empty());
    }
}
