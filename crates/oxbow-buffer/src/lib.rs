//! Buffer pool for the oxbow storage engine.
//!
//! Pages live in fixed-size frames; callers pin a frame for the duration of
//! an access and unpin it with an explicit dirty flag. Unpinned frames are
//! reclaimed by clock replacement, surfacing dirty victims to the caller
//! for write-back.

mod frame;
mod pool;
mod replacer;

pub use frame::{BufferFrame, FrameId};
pub use pool::{BufferPool, BufferPoolConfig, EvictedPage};
pub use replacer::ClockReplacer;
