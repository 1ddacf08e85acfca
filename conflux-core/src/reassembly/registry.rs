//! Per-emitter FIFO queues of received watermarks. The head of each queue is
//! that emitter's oldest outstanding assertion; the minimum over all heads is
//! the global safe watermark candidate. Queues are created lazily on an
//! emitter's first watermark and stay in place (possibly empty) until a
//! membership change removes the emitter.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WatermarkEntry {
    pub(crate) ts: u64,
    pub(crate) partition: i32,
    pub(crate) offset: i64,
}

#[derive(Debug, Default)]
pub(crate) struct WatermarkRegistry {
    emitters: HashMap<String, VecDeque<WatermarkEntry>>,
}

impl WatermarkRegistry {
    /// Queues a watermark. Within one emitter's queue `ts` never decreases; a
    /// regressing watermark breaks the emitter's own ordering contract and is
    /// dropped. A watermark below `floor` (the global safe watermark) can only
    /// come from an emitter that joined after `floor` was already emitted and
    /// is dropped as well, which keeps the safe watermark monotonic.
    pub(crate) fn push(&mut self, emitter: &str, entry: WatermarkEntry, floor: u64) {
        if entry.ts < floor {
            warn!(
                emitter,
                ts = entry.ts,
                floor,
                "Watermark below the global safe watermark, dropping"
            );
            return;
        }
        let queue = self.emitters.entry(emitter.to_string()).or_default();
        if let Some(last) = queue.back() {
            if entry.ts < last.ts {
                error!(
                    emitter,
                    ts = entry.ts,
                    previous = last.ts,
                    "Watermark should not regress, dropping"
                );
                return;
            }
        }
        queue.push_back(entry);
    }

    /// Number of emitters with a queue, empty or not.
    pub(crate) fn emitter_count(&self) -> usize {
        self.emitters.len()
    }

    /// Minimum head watermark across all queues, with its owner. `None` when
    /// the registry is empty or any queue is currently drained: an emitter
    /// with no outstanding watermark makes the minimum unknowable. Ties go to
    /// the smallest emitter id so the result does not depend on map order.
    pub(crate) fn min_head(&self) -> Option<(u64, String)> {
        let mut min: Option<(u64, &str)> = None;
        for (emitter, queue) in &self.emitters {
            let head = queue.front()?;
            min = match min {
                None => Some((head.ts, emitter.as_str())),
                Some((min_ts, min_emitter))
                    if head.ts < min_ts || (head.ts == min_ts && emitter.as_str() < min_emitter) =>
                {
                    Some((head.ts, emitter.as_str()))
                }
                keep => keep,
            };
        }
        min.map(|(ts, emitter)| (ts, emitter.to_string()))
    }

    pub(crate) fn pop_head(&mut self, emitter: &str) -> Option<WatermarkEntry> {
        self.emitters.get_mut(emitter).and_then(VecDeque::pop_front)
    }

    /// Applies a membership change: queues of emitters outside the new set
    /// are discarded so the minimum never waits on a dead emitter.
    pub(crate) fn retain_emitters(&mut self, members: &HashSet<String>) {
        self.emitters.retain(|name, _| members.contains(name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ts: u64) -> WatermarkEntry {
        WatermarkEntry {
            ts,
            partition: 0,
            offset: 0,
        }
    }

    #[test]
    fn test_min_head_ties_break_on_emitter_id() {
        let mut registry = WatermarkRegistry::default();
        registry.push("b", entry(10), 0);
        registry.push("a", entry(10), 0);
        registry.push("c", entry(12), 0);
        assert_eq!(registry.min_head(), Some((10, "a".to_string())));
    }

    #[test]
    fn test_empty_queue_blocks_minimum() {
        let mut registry = WatermarkRegistry::default();
        registry.push("a", entry(10), 0);
        registry.push("b", entry(5), 0);
        assert_eq!(registry.min_head(), Some((5, "b".to_string())));

        registry.pop_head("b");
        // b's queue is drained but still registered, the minimum is unknowable
        assert_eq!(registry.emitter_count(), 2);
        assert_eq!(registry.min_head(), None);

        registry.push("b", entry(20), 0);
        assert_eq!(registry.min_head(), Some((10, "a".to_string())));
    }

    #[test]
    fn test_regressing_watermark_dropped() {
        let mut registry = WatermarkRegistry::default();
        registry.push("a", entry(10), 0);
        registry.push("a", entry(8), 0);
        registry.push("a", entry(10), 0); // equal is fine
        registry.pop_head("a");
        assert_eq!(registry.min_head(), Some((10, "a".to_string())));
        registry.pop_head("a");
        assert_eq!(registry.min_head(), None);
    }

    #[test]
    fn test_watermark_below_floor_dropped() {
        let mut registry = WatermarkRegistry::default();
        registry.push("late-joiner", entry(50), 100);
        assert_eq!(registry.emitter_count(), 0);
        registry.push("late-joiner", entry(100), 100);
        assert_eq!(registry.min_head(), Some((100, "late-joiner".to_string())));
    }

    #[test]
    fn test_retain_emitters_drops_removed_queues() {
        let mut registry = WatermarkRegistry::default();
        registry.push("a", entry(10), 0);
        registry.push("b", entry(100), 0);
        let members = HashSet::from(["a".to_string()]);
        registry.retain_emitters(&members);
        assert_eq!(registry.emitter_count(), 1);
        assert_eq!(registry.min_head(), Some((10, "a".to_string())));
    }
}
