/// Tunables from `include/sys/burst_dedup.h`.
///
/// Grouped into a config struct (rather than bare module constants, as the
/// original C does with `#define`) so a pool can be built with non-default
/// values in tests without touching global state — the same role
/// `zfs_dedup_prefetch` plays as a module tunable in `ddt.c`, made
/// per-instance instead of global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstDedupConfig {
    /// Unit of storage-layer minimum allocation; burst buffers are padded
    /// up to a multiple of this.
    pub min_block_size: u64,
    /// A head/tail similarity anchor may back at most this many derivative
    /// writes before a new base must be found. `0` disables the cap.
    pub max_htddp_refcnt: u64,
    /// Head/tail prefix length is `block_size >> ht_rightshift`.
    pub ht_rightshift: u32,
}

impl Default for BurstDedupConfig {
    fn default() -> Self {
        BurstDedupConfig {
            min_block_size: 1,
            max_htddp_refcnt: 1,
            ht_rightshift: 3,
        }
    }
}
