use crate::common::{
    error::{Error, Result},
    types::UNIT,
};
use core::num::NonZeroU32;
use parking_lot::Mutex;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// A half-open range of tickets `[start, start + len)` reserved for a single
/// allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TicketBlock {
    pub start: u64,
    pub len: u64,
}

impl TicketBlock {
    /// First ticket past the block.
    pub const fn end(&self) -> u64 {
        self.start + self.len
    }

    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// Lock-guarded source of ticket blocks.
///
/// A single counter is read and advanced under one [`Mutex`], so every caller
/// receives a block no other caller can ever see. Blocks are handed out in
/// lock-acquisition order and the counter never moves backwards.
///
/// ## Recommended When
/// - Several tasks carve disjoint ranges out of one shared numeric space
/// - Block sizes differ per caller (weighted workers)
///
/// # Example
/// ```
/// use core::num::NonZeroU32;
/// use tranche_core::{TicketAllocator, UNIT};
///
/// let allocator = TicketAllocator::default();
/// let a = allocator.allocate(NonZeroU32::new(1).unwrap()).unwrap();
/// let b = allocator.allocate(NonZeroU32::new(3).unwrap()).unwrap();
///
/// assert_eq!(a.start, 0);
/// assert_eq!(b.start, UNIT);
/// assert_eq!(allocator.current(), 4 * UNIT);
/// ```
#[derive(Debug, Default)]
pub struct TicketAllocator {
    counter: Mutex<u64>,
}

impl TicketAllocator {
    /// Creates an allocator whose first block starts at `start`.
    ///
    /// A non-zero start lets independent deployments share one identifier
    /// space without colliding.
    pub const fn with_start(start: u64) -> Self {
        Self {
            counter: Mutex::new(start),
        }
    }

    /// Reserves `weight * UNIT` tickets and returns the reserved block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TicketSpaceExhausted`] if the block would run past
    /// `u64::MAX`. The counter is left unchanged in that case.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn allocate(&self, weight: NonZeroU32) -> Result<TicketBlock> {
        let len = u64::from(weight.get()) * UNIT;
        let mut counter = self.counter.lock();
        let start = *counter;
        *counter = start
            .checked_add(len)
            .ok_or(Error::TicketSpaceExhausted {
                pointer: start,
                weight: weight.get(),
            })?;

        Ok(TicketBlock { start, len })
    }

    /// The pointer the next allocation will receive.
    pub fn current(&self) -> u64 {
        *self.counter.lock()
    }
}
