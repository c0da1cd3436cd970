use std::num::NonZeroUsize;

use crate::types::{ValidatedRecord, WriteBatch};

/// Lazily cut records into batches of `batch_size`, in arrival order.
///
/// Every batch is full except possibly the last one. No records, no batches.
pub fn partition<I>(records: I, batch_size: NonZeroUsize) -> Partitions<I::IntoIter>
where
    I: IntoIterator<Item = ValidatedRecord>,
{
    Partitions {
        records: records.into_iter(),
        batch_size,
        next_index: 0,
    }
}

/// Number of batches `record_count` records fill.
pub fn batch_count(record_count: usize, batch_size: NonZeroUsize) -> usize {
    record_count.div_ceil(batch_size.get())
}

/// Iterator returned by [`partition`].
pub struct Partitions<I> {
    records: I,
    batch_size: NonZeroUsize,
    next_index: usize,
}

impl<I> Iterator for Partitions<I>
where
    I: Iterator<Item = ValidatedRecord>,
{
    type Item = WriteBatch;

    fn next(&mut self) -> Option<WriteBatch> {
        let chunk: Vec<ValidatedRecord> = self.records.by_ref().take(self.batch_size.get()).collect();
        if chunk.is_empty() {
            return None;
        }
        let batch = WriteBatch::new(self.next_index, chunk);
        self.next_index += 1;
        Some(batch)
    }
}
