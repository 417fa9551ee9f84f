// Tiller State Buffers
// Multi-buffered device state storage with versioned swap and migration

use crate::state::block::StateBlock;
use crate::update::{UpdateMask, UpdateType};

/// Result type for state buffer operations
pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StateError {
    #[error("update type {0} is not enabled on this buffer set")]
    UpdateNotEnabled(UpdateType),
}

/// The raw memory regions indexed by [`StateBlock`] descriptors.
///
/// One allocation holds every region. The first region is the shared
/// *current* state, the single global "latest known" truth written by the
/// dispatch loop. Each enabled update type additionally owns a *previous*
/// region: the projection of current taken at that type's last swap. Swapping
/// for one update type never touches another type's previous region.
///
/// Internally we perform a single combined allocation for all regions and
/// expose them as if they were separate buffers.
pub struct StateBuffers {
    mask: UpdateMask,
    size_per_buffer: usize,
    bytes: Vec<u8>,
    previous_starts: [Option<usize>; 4],
    active: Option<UpdateType>,
}

impl StateBuffers {
    /// A buffer set with no enabled updates and no devices.
    pub fn empty() -> Self {
        Self::allocate_all(UpdateMask::NONE, &[]).0
    }

    /// Allocate regions serving `mask` with room for every block in
    /// `blocks`, packing blocks back-to-back by aligned size.
    ///
    /// Returns the buffer set and the offset assigned to each block, in
    /// input order. Offsets are *not* installed on the blocks; the caller
    /// migrates old content first and then commits them.
    pub fn allocate_all(mask: UpdateMask, blocks: &[StateBlock]) -> (Self, Vec<u32>) {
        let mut offsets = Vec::with_capacity(blocks.len());
        let mut current_offset = 0u32;
        for block in blocks {
            offsets.push(current_offset);
            current_offset += block.aligned_size_in_bytes();
        }
        let size_per_buffer = current_offset as usize;

        let region_count = 1 + mask.len();
        let bytes = vec![0u8; region_count * size_per_buffer];

        let mut previous_starts = [None; 4];
        for (index, update) in mask.iter().enumerate() {
            previous_starts[slot(update)] = Some((1 + index) * size_per_buffer);
        }

        (
            Self {
                mask,
                size_per_buffer,
                bytes,
                previous_starts,
                active: None,
            },
            offsets,
        )
    }

    /// Copy every pre-existing block's bytes from its old offset into its
    /// new offset, per region present in both buffer sets.
    ///
    /// `blocks` carry the *old* offsets (unallocated blocks belong to newly
    /// added devices and keep their zero-initialized bytes); `new_offsets`
    /// is the table returned by [`allocate_all`](Self::allocate_all).
    ///
    /// # Panics
    /// Panics on a device count mismatch between `blocks` and `new_offsets`;
    /// silently truncating a migration would alias live state.
    pub fn migrate_all(&mut self, blocks: &[StateBlock], new_offsets: &[u32], old: &StateBuffers) {
        assert_eq!(
            blocks.len(),
            new_offsets.len(),
            "device count changed between offset computation and migration"
        );
        if old.size_per_buffer == 0 {
            return;
        }

        self.migrate_region(0, old, 0, blocks, new_offsets);
        for update in self.mask.iter() {
            let (Some(new_start), Some(old_start)) =
                (self.previous_starts[slot(update)], old.previous_starts[slot(update)])
            else {
                // The enabled update types need not match between the old
                // and new sets; a previous region without a counterpart
                // starts out zeroed.
                continue;
            };
            self.migrate_region(new_start, old, old_start, blocks, new_offsets);
        }
    }

    fn migrate_region(
        &mut self,
        new_start: usize,
        old: &StateBuffers,
        old_start: usize,
        blocks: &[StateBlock],
        new_offsets: &[u32],
    ) {
        for (block, &new_offset) in blocks.iter().zip(new_offsets) {
            if !block.is_allocated() {
                continue;
            }
            let size = block.aligned_size_in_bytes() as usize;
            let source = old_start + block.offset() as usize;
            let destination = new_start + new_offset as usize;
            self.bytes[destination..destination + size]
                .copy_from_slice(&old.bytes[source..source + size]);
        }
    }

    /// Commit the current region into `update`'s previous region and make
    /// `update` the active write target.
    ///
    /// Called exactly once per tick, before any of that tick's events are
    /// applied, so the previous region is always a complete snapshot.
    pub fn swap_and_switch_to(&mut self, update: UpdateType) -> StateResult<()> {
        let Some(previous_start) = self.previous_starts[slot(update)] else {
            return Err(StateError::UpdateNotEnabled(update));
        };
        self.bytes
            .copy_within(0..self.size_per_buffer, previous_start);
        self.active = Some(update);
        Ok(())
    }

    /// The current state bytes of `block`.
    pub fn current(&self, block: &StateBlock) -> &[u8] {
        let range = block.range();
        debug_assert!(range.end <= self.size_per_buffer);
        &self.bytes[range]
    }

    /// Mutable view of `block`'s current state; the dispatch loop's single
    /// mutation target.
    pub fn current_mut(&mut self, block: &StateBlock) -> &mut [u8] {
        let range = block.range();
        debug_assert!(range.end <= self.size_per_buffer);
        &mut self.bytes[range]
    }

    /// The previous-state bytes of `block` for `update`, or `None` when that
    /// update type is not enabled.
    ///
    /// Stable between swaps of the same update type; readers must treat it
    /// as immutable.
    pub fn previous(&self, update: UpdateType, block: &StateBlock) -> Option<&[u8]> {
        let start = self.previous_starts[slot(update)]?;
        let range = block.range();
        debug_assert!(range.end <= self.size_per_buffer);
        Some(&self.bytes[start + range.start..start + range.end])
    }

    /// The update type most recently switched to, if any.
    pub fn active(&self) -> Option<UpdateType> {
        self.active
    }

    pub fn enabled_updates(&self) -> UpdateMask {
        self.mask
    }

    /// Size of one region; the packed footprint of all devices.
    pub fn size_per_buffer(&self) -> usize {
        self.size_per_buffer
    }
}

const fn slot(update: UpdateType) -> usize {
    update.bit().trailing_zeros() as usize
}
