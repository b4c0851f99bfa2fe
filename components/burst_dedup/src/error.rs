use thiserror::Error;

/// Failure modes the burst-dedup core can surface to its caller.
///
/// A lookup miss is not an error (it is `found: bool` / `Option`), and
/// `zio_free` has no error channel at all — see module docs.
#[derive(Debug, Error)]
pub enum BurstDedupError {
    /// The global allocator could not satisfy a burst buffer allocation.
    /// The core has no recovery strategy for this; the caller should treat
    /// it as fatal.
    #[error("out of memory allocating {requested} bytes for burst data")]
    OutOfMemory { requested: usize },
}

pub type Result<T> = std::result::Result<T, BurstDedupError>;
