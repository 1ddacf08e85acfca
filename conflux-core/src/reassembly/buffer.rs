//! Per-partition ordered lists of pending records with their log offsets.
//! Records stay buffered until the flush loop has written them to the sink
//! and their offsets are safe to commit; arrival order within a partition
//! equals log order, so offsets ascend within each list.

use std::collections::{BTreeMap, HashMap};

use crate::message::Transaction;

#[derive(Debug, Clone)]
enum Buffered {
    Txn(Transaction),
    Watermark { ts: u64 },
}

#[derive(Debug, Clone)]
struct BufferedEntry {
    offset: i64,
    record: Buffered,
}

impl BufferedEntry {
    fn ts(&self) -> u64 {
        match &self.record {
            Buffered::Txn(txn) => txn.ts,
            Buffered::Watermark { ts } => *ts,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct PartitionBuffer {
    partitions: HashMap<i32, Vec<BufferedEntry>>,
}

impl PartitionBuffer {
    pub(crate) fn push_txn(&mut self, partition: i32, offset: i64, txn: Transaction) {
        self.partitions
            .entry(partition)
            .or_default()
            .push(BufferedEntry {
                offset,
                record: Buffered::Txn(txn),
            });
    }

    /// Watermarks are buffered alongside transactions so their offsets can be
    /// committed once the flush passes them.
    pub(crate) fn push_watermark(&mut self, partition: i32, offset: i64, ts: u64) {
        self.partitions
            .entry(partition)
            .or_default()
            .push(BufferedEntry {
                offset,
                record: Buffered::Watermark { ts },
            });
    }

    /// All buffered transactions with `ts <= min_rs`, bucketed by commit
    /// timestamp. Bucket keys come out ascending; within a bucket the order
    /// is partition id ascending, then buffer order.
    pub(crate) fn committed_txns(&self, min_rs: u64) -> BTreeMap<u64, Vec<Transaction>> {
        let mut buckets: BTreeMap<u64, Vec<Transaction>> = BTreeMap::new();
        let mut partitions: Vec<i32> = self.partitions.keys().copied().collect();
        partitions.sort_unstable();
        for partition in partitions {
            for entry in &self.partitions[&partition] {
                if let Buffered::Txn(txn) = &entry.record {
                    if txn.ts <= min_rs {
                        buckets.entry(txn.ts).or_default().push(txn.clone());
                    }
                }
            }
        }
        buckets
    }

    /// Largest offset per partition covered by `min_rs`: any transaction or
    /// watermark entry at or below it counts. A partition with no covered
    /// entry is absent from the result and must not be marked.
    pub(crate) fn commitable_offsets(&self, min_rs: u64) -> HashMap<i32, i64> {
        let mut offsets = HashMap::new();
        for (partition, entries) in &self.partitions {
            for entry in entries {
                if entry.ts() <= min_rs {
                    // entries ascend by offset, the last match wins
                    offsets.insert(*partition, entry.offset);
                }
            }
        }
        offsets
    }

    /// Drops everything the flush just covered: watermark entries at or below
    /// `min_rs` and transactions at or below `max_flushed_ts`.
    pub(crate) fn gc(&mut self, min_rs: u64, max_flushed_ts: u64) {
        for entries in self.partitions.values_mut() {
            entries.retain(|entry| match &entry.record {
                Buffered::Watermark { ts } => *ts > min_rs,
                Buffered::Txn(txn) => txn.ts > max_flushed_ts,
            });
        }
    }

    #[cfg(test)]
    pub(crate) fn pending(&self, partition: i32) -> usize {
        self.partitions.get(&partition).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(ts: u64, emitter: &str) -> Transaction {
        Transaction {
            ts,
            emitter: emitter.to_string(),
            payload: b"{}".to_vec().into(),
        }
    }

    #[test]
    fn test_buckets_sorted_and_stable() {
        let mut buffer = PartitionBuffer::default();
        buffer.push_txn(1, 0, txn(20, "b"));
        buffer.push_txn(0, 0, txn(10, "a"));
        buffer.push_txn(0, 1, txn(20, "a"));
        buffer.push_txn(0, 2, txn(30, "a"));

        let buckets = buffer.committed_txns(20);
        assert_eq!(buckets.keys().copied().collect::<Vec<_>>(), vec![10, 20]);
        // ties are ordered by partition id, then buffer order
        let tied: Vec<&str> = buckets[&20].iter().map(|t| t.emitter.as_str()).collect();
        assert_eq!(tied, vec!["a", "b"]);
        // ts above the safe watermark never surfaces
        assert!(!buckets.contains_key(&30));
    }

    #[test]
    fn test_commitable_offsets_cover_watermarks() {
        let mut buffer = PartitionBuffer::default();
        buffer.push_txn(0, 0, txn(10, "a"));
        buffer.push_watermark(0, 1, 15);
        buffer.push_txn(1, 0, txn(12, "b"));
        buffer.push_watermark(1, 1, 11);

        let offsets = buffer.commitable_offsets(11);
        assert_eq!(offsets.get(&0), Some(&0)); // txn(10); watermark 15 is above
        assert_eq!(offsets.get(&1), Some(&1)); // watermark 11; txn(12) is above

        // a partition with nothing covered is not marked at all
        let offsets = buffer.commitable_offsets(5);
        assert!(offsets.is_empty());
    }

    #[test]
    fn test_gc_retention() {
        let mut buffer = PartitionBuffer::default();
        buffer.push_txn(0, 0, txn(10, "a"));
        buffer.push_watermark(0, 1, 11);
        buffer.push_txn(0, 2, txn(12, "a"));
        buffer.push_watermark(0, 3, 15);

        buffer.gc(11, 10);
        // txn(10) and watermark 11 covered; txn(12) and watermark 15 survive
        assert_eq!(buffer.pending(0), 2);
        let buckets = buffer.committed_txns(u64::MAX);
        assert_eq!(buckets.keys().copied().collect::<Vec<_>>(), vec![12]);
        assert_eq!(buffer.commitable_offsets(15), HashMap::from([(0, 3)]));
    }
}
