//! The sync coordinator: per-transaction-group pass over DDT, BSTT, and
//! the two HTDDT tables, in an order that must not change — BSTT has to be
//! swept before either HTDDT table, or a burst entry whose HTDDT anchor
//! disappears first leaks its storage instead of being reaped along with
//! it. Grounded on `ddt_sync`'s top-level call sequence in
//! `examples/original_source/module/zfs/ddt.c` (DDT before BSTT before
//! HTDDT head before HTDDT tail); `htddt_sync_table`/`bstt_sync_table`
//! themselves are left stubbed out (`// TODO: Impl htddt_sync.`) across the
//! source's own drafts, so their bodies here are a fresh implementation of
//! the reap-on-dangling-base behaviour the rest of the table API assumes.

use log::warn;
use spa::sio::SIOChecksum;

use crate::bstt::BsttTable;
use crate::ddt::{Ddt, FreeSink};
use crate::htddt::HtddtTable;

/// `htddt_sync_table`: remove every entry whose referenced DDE is no
/// longer present in the DDT.
pub fn htddt_sync_table(table: &mut HtddtTable, ddt: &Ddt) {
    let dead: Vec<_> = table
        .keys_with_base()
        .filter(|(_, base)| !ddt.exist(base))
        .map(|(k, _)| k.clone())
        .collect();
    for key in dead {
        warn!("htddt_sync_table: reaping entry whose base DDE vanished");
        table.remove(&key);
    }
}

/// Runs one txg-scoped sync pass for a single checksum tag's table set:
/// DDT, then BSTT, then HTDDT-head, then HTDDT-tail. Must not run
/// concurrently with another sync for the same tag — callers hold the
/// tag's lock for the duration (see [`crate::pool::ChecksumGroup::sync`]).
pub fn sync_one_tag(
    ddt: &mut Ddt,
    bstt: &mut BsttTable,
    htddt_head: &mut HtddtTable,
    htddt_tail: &mut HtddtTable,
    checksum: SIOChecksum,
    txg: u64,
    min_block_size: u64,
    sink: &mut dyn FreeSink,
) {
    ddt.sync_table(checksum, txg, sink);
    bstt.sync_table(ddt, checksum, txg, min_block_size, sink);
    htddt_sync_table(htddt_head, ddt);
    htddt_sync_table(htddt_tail, ddt);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bstt::BsttKey;
    use crate::ddt::{RecordingFreeSink, DDT_PHYS_SINGLE};
    use crate::htddt::{HtddtKey, HtddtSide};
    use spa::blkptr::checksum::SIOChksum;

    fn cksum(byte: u8) -> SIOChksum {
        SIOChksum {
            zc_word: [byte as u64, 0, 0, 0],
        }
    }

    #[test]
    fn full_pass_reaps_htddt_and_bstt_together() {
        let mut ddt = Ddt::new();
        let base = cksum(9);
        {
            let (entry, _) = ddt.lookup(&base, true);
            let entry = entry.unwrap();
            entry.phys[DDT_PHYS_SINGLE].phys_birth = 1;
            entry.phys[DDT_PHYS_SINGLE].refcnt = 1;
        }

        let mut bstt = BsttTable::new();
        let bkey = BsttKey::new(cksum(1));
        let htddp = crate::htddt::HtddtPhys {
            base_key: base.clone(),
            phys_index: DDT_PHYS_SINGLE,
            refcnt: 0,
            payload_size: 0,
            valid: false,
        };
        let burst = crate::burst::Burst {
            start: 0,
            end: 0,
            length: 0,
            data: vec![],
            data_capacity: 0,
        };
        bstt.lookup(&bkey, true, || BsttTable::seed_from_htddt(&htddp, burst));

        let mut htddt_head = HtddtTable::new(HtddtSide::Head);
        let hkey = HtddtKey::new(cksum(2), HtddtSide::Head);
        htddt_head.lookup(&hkey, true, &base, DDT_PHYS_SINGLE);
        let mut htddt_tail = HtddtTable::new(HtddtSide::Tail);

        // Base entry loses its last reference and the pool drops it.
        ddt.remove(&base);

        let mut sink = RecordingFreeSink::default();
        sync_one_tag(&mut ddt, &mut bstt, &mut htddt_head, &mut htddt_tail, SIOChecksum::SHA256, 7, 1, &mut sink);

        assert!(bstt.is_empty());
        assert!(htddt_head.is_empty());
        assert_eq!(sink.freed.len(), 1);
    }

    #[test]
    fn sync_is_a_no_op_on_an_empty_pool() {
        let mut ddt = Ddt::new();
        let mut bstt = BsttTable::new();
        let mut htddt_head = HtddtTable::new(HtddtSide::Head);
        let mut htddt_tail = HtddtTable::new(HtddtSide::Tail);
        let mut sink = RecordingFreeSink::default();
        sync_one_tag(&mut ddt, &mut bstt, &mut htddt_head, &mut htddt_tail, SIOChecksum::SHA256, 1, 1, &mut sink);
        assert!(sink.freed.is_empty());
    }
}
