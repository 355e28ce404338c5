//! Size class selection
//!
//! Builds the ascending table of block sizes handled by the memory manager and
//! maps byte counts to size class indices, either through the quick find
//! table for small sizes or through a binary search for larger ones.

use log::{debug, error};

use crate::{
    config::MemoryConfig,
    utils::{POINTER_SIZE, align},
};

/// Ascending block sizes and the quick find table built from them.
///
/// Written once when the memory manager is created, read-only afterwards, so
/// lookups need no locking.
#[derive(Debug, Clone)]
pub struct SizeClassTable {
    /// Size of memory block by size class index.
    block_sz: Vec<usize>,
    /// For small byte counts: array index is number of bytes and value is
    /// size class index.
    quick_find: Vec<u8>,
}

impl SizeClassTable {
    /// Generates the size classes.
    ///
    /// Starts from one pointer width and grows each step by a third of the
    /// previous size, rounded up to pointer width, until the configured limit.
    /// Worst case internal fragmentation stays around 33% while the table stays
    /// short. If the table can't hold every class it is truncated.
    pub fn build(config: &MemoryConfig) -> Self {
        let mut block_sz = Vec::with_capacity(config.block_table_len);
        let mut bytes = POINTER_SIZE;

        while bytes <= config.block_size_limit {
            if block_sz.len() >= config.block_table_len {
                error!(
                    "out of block table: {} classes can't reach the {} byte limit",
                    config.block_table_len, config.block_size_limit
                );
                break;
            }

            block_sz.push(bytes);

            let step = align(bytes / 3, POINTER_SIZE).max(POINTER_SIZE);
            match bytes.checked_add(step) {
                Some(next) => bytes = next,
                None => break,
            }
        }

        if cfg!(debug_assertions) && 4 * block_sz.len() / 3 < config.block_table_len {
            debug!(
                "block table of {} entries is unnecessarily large, {} used",
                config.block_table_len,
                block_sz.len()
            );
        }

        // Room for guard words or other per-block bookkeeping.
        for sz in &mut block_sz {
            *sz += config.class_padding;
        }

        let max_block_sz = block_sz[block_sz.len() - 1];
        let quick_len = config.quick_find_len.min(max_block_sz + 1);

        let mut j = 0;
        let quick_find = (0..quick_len)
            .map(|i| {
                while i > block_sz[j] {
                    j += 1;
                }
                j as u8
            })
            .collect();

        Self {
            block_sz,
            quick_find,
        }
    }

    /// Number of size classes.
    #[inline]
    pub fn len(&self) -> usize {
        self.block_sz.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.block_sz.is_empty()
    }

    #[inline]
    pub fn block_size(&self, ix: usize) -> usize {
        self.block_sz[ix]
    }

    #[inline]
    pub fn sizes(&self) -> &[usize] {
        &self.block_sz
    }

    /// Largest block handled by the memory manager. Larger blocks go straight
    /// to the operating system.
    #[inline]
    pub fn max_block_sz(&self) -> usize {
        self.block_sz[self.block_sz.len() - 1]
    }

    #[inline]
    pub fn quick_find_len(&self) -> usize {
        self.quick_find.len()
    }

    /// Size class for `bytes`, or `None` if the block is too large for the
    /// memory manager.
    pub fn class_of(&self, bytes: usize) -> Option<usize> {
        if bytes < self.quick_find.len() {
            Some(self.quick_find[bytes] as usize)
        } else if bytes <= self.max_block_sz() {
            Some(self.block_ix(bytes))
        } else {
            None
        }
    }

    /// Smallest size class which can hold `bytes`. The caller makes sure
    /// `bytes` doesn't exceed [`Self::max_block_sz`].
    pub fn block_ix(&self, bytes: usize) -> usize {
        self.block_sz.partition_point(|&sz| sz < bytes)
    }

    /// Slice list a span of `bytes` belongs to.
    ///
    /// A slice only needs to fit inside its bucket: the index is the largest
    /// class not bigger than `bytes`. Anything of at least the largest class
    /// goes to the last bucket.
    pub fn slice_ix(&self, bytes: usize) -> usize {
        if bytes >= self.max_block_sz() {
            return self.block_sz.len() - 1;
        }

        let ix = self.block_ix(bytes);
        if bytes < self.block_sz[ix] {
            match ix.checked_sub(1) {
                Some(ix) => ix,
                None => {
                    error!("slice of {bytes} bytes is smaller than the smallest block");
                    0
                }
            }
        } else {
            ix
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_table() -> SizeClassTable {
        SizeClassTable::build(&MemoryConfig::default().with_block_size_limit(4000))
    }

    #[test]
    fn sizes_are_ascending_pointer_multiples() {
        let table = SizeClassTable::build(&MemoryConfig::default());

        assert_eq!(table.block_size(0), POINTER_SIZE);
        assert!(table.sizes().windows(2).all(|w| w[0] < w[1]));
        assert!(table.sizes().iter().all(|sz| sz % POINTER_SIZE == 0));
        assert!(table.max_block_sz() <= 0x4000_0000);
    }

    #[test]
    fn growth_is_about_a_third() {
        let table = SizeClassTable::build(&MemoryConfig::default());

        for w in table.sizes().windows(2) {
            let step = w[1] - w[0];
            assert!(step >= w[0] / 3);
            assert!(step <= w[0] / 3 + POINTER_SIZE);
        }
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn twenty_classes_below_4000() {
        let table = small_table();

        assert_eq!(
            table.sizes(),
            &[
                8, 16, 24, 32, 48, 64, 88, 120, 160, 216, 288, 384, 512, 688, 920, 1232, 1648,
                2200, 2936, 3920
            ]
        );
        assert_eq!(table.max_block_sz(), 3920);
    }

    #[test]
    fn quick_find_agrees_with_binary_search() {
        let table = SizeClassTable::build(&MemoryConfig::default());

        assert_eq!(table.quick_find_len(), 200);
        for bytes in 0..table.quick_find_len() {
            let ix = table.quick_find[bytes] as usize;
            assert_eq!(ix, table.block_ix(bytes), "bytes = {bytes}");
            assert!(table.block_size(ix) >= bytes);
            if ix > 0 {
                assert!(table.block_size(ix - 1) < bytes);
            }
        }
    }

    #[test]
    fn class_of_covers_managed_range_only() {
        let table = small_table();
        let max = table.max_block_sz();

        assert_eq!(table.class_of(0), Some(0));
        assert_eq!(table.class_of(1), Some(0));
        assert_eq!(table.class_of(max), Some(table.len() - 1));
        assert_eq!(table.class_of(max + 1), None);

        for bytes in [1, 7, 8, 9, 199, 200, 201, 1000, 3000, max] {
            let ix = table.class_of(bytes).unwrap();
            assert!(table.block_size(ix) >= bytes);
        }
    }

    #[test]
    fn slice_fits_inside_its_bucket() {
        let table = small_table();

        for ix in 0..table.len() {
            let sz = table.block_size(ix);
            assert_eq!(table.slice_ix(sz), ix);
            if ix + 1 < table.len() {
                assert_eq!(table.slice_ix(sz + 1), ix);
                assert_eq!(table.slice_ix(table.block_size(ix + 1) - 1), ix);
            }
        }
        assert_eq!(table.slice_ix(table.max_block_sz() * 10), table.len() - 1);
    }

    #[test]
    fn short_table_is_truncated() {
        let table = SizeClassTable::build(&MemoryConfig::default().with_block_table_len(10));

        assert_eq!(table.len(), 10);
        assert_eq!(table.class_of(table.max_block_sz() + 1), None);
    }

    #[test]
    fn quick_table_never_outgrows_managed_sizes() {
        let table = SizeClassTable::build(&MemoryConfig::default().with_block_size_limit(64));

        assert_eq!(table.quick_find_len(), table.max_block_sz() + 1);
        assert_eq!(table.class_of(table.max_block_sz()), Some(table.len() - 1));
    }

    #[test]
    fn padding_enlarges_every_class() {
        let plain = small_table();
        let padded = SizeClassTable::build(
            &MemoryConfig::default()
                .with_block_size_limit(4000)
                .with_class_padding(16),
        );

        assert_eq!(plain.len(), padded.len());
        for (a, b) in plain.sizes().iter().zip(padded.sizes()) {
            assert_eq!(a + 16, *b);
        }
    }
}
