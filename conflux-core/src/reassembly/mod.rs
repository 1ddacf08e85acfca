//! Reassembles the per-emitter record streams into one globally-ordered
//! sequence of committed transactions below the global safe watermark.
//!
//! All mutable state lives in [`Core`] behind a single mutex, held for the
//! full duration of one ingress event (buffer update through flush). Sink
//! writes happen under the lock on purpose: two interleaved flushes would
//! reorder the sink stream.
//!
//! **Flush flow**
//! ```text
//! (watermark heads) --min--> (safe watermark) --collect--> (ts buckets) --emit--> (sink)
//!                                                                          \--> (offset commits)
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::consumer::LogSession;
use crate::message::{LogCoordinate, MembershipUpdate, ResolvedTs, Transaction};
use crate::metrics::consumer_metrics;
use crate::reassembly::buffer::PartitionBuffer;
use crate::reassembly::membership::{MetaAction, MetaBarrier};
use crate::reassembly::registry::{WatermarkEntry, WatermarkRegistry};
use crate::sink::Sink;
use crate::{Error, Result};

mod buffer;
pub(crate) mod membership;
mod registry;

pub(crate) struct Core<S, L> {
    buffer: PartitionBuffer,
    registry: WatermarkRegistry,
    /// Number of emitters in the current membership; 0 until the first
    /// membership announcement lands.
    emitter_count: usize,
    /// The global safe watermark, monotonically non-decreasing.
    global_watermark: u64,
    /// Highest offset marked per partition. A flushed interval can end below
    /// an offset that an earlier, since-collected watermark entry already
    /// covered; marks must never regress.
    committed_offsets: HashMap<i32, i64>,
    barrier: Option<MetaBarrier>,
    sink: S,
    session: L,
}

impl<S, L> Core<S, L>
where
    S: Sink,
    L: LogSession,
{
    pub(crate) fn new(sink: S, session: L) -> Self {
        Core {
            buffer: PartitionBuffer::default(),
            registry: WatermarkRegistry::default(),
            emitter_count: 0,
            global_watermark: 0,
            committed_offsets: HashMap::new(),
            barrier: None,
            sink,
            session,
        }
    }

    pub(crate) fn ingest_txn(&mut self, coord: LogCoordinate, txn: Transaction) {
        self.buffer.push_txn(coord.partition, coord.offset, txn);
    }

    /// A watermark lands in both structures: the registry drives the safe
    /// watermark computation, the buffer entry is what lets its offset be
    /// committed later. The buffer entry is keyed by the record's own
    /// partition.
    pub(crate) fn ingest_watermark(&mut self, coord: LogCoordinate, rs: ResolvedTs) {
        self.registry.push(
            &rs.emitter,
            WatermarkEntry {
                ts: rs.ts,
                partition: coord.partition,
                offset: coord.offset,
            },
            self.global_watermark,
        );
        self.buffer
            .push_watermark(coord.partition, coord.offset, rs.ts);
    }

    /// Classifies one arrival of a membership announcement. The returned
    /// action must be run after the core lock is released; the barrier keeps
    /// the announcement's partitions quiet until the install completes.
    pub(crate) fn on_meta(&mut self, update: MembershipUpdate) -> Result<MetaAction> {
        if update.expected_signals == 0 {
            return Err(Error::Membership(
                "Meta record announced zero expected signals".to_string(),
            ));
        }
        match &self.barrier {
            None => {
                let (barrier, action) = MetaBarrier::arm(update);
                self.barrier = Some(barrier);
                Ok(action)
            }
            Some(barrier) => Ok(barrier.signal()),
        }
    }

    fn install_membership(&mut self, update: &MembershipUpdate) {
        self.emitter_count = update.emitters.len();
        let members: HashSet<String> = update.emitters.iter().cloned().collect();
        self.registry.retain_emitters(&members);
        info!(emitters = ?update.emitters, "Membership installed");
    }

    /// Flushes every transaction that has become safe, in timestamp order,
    /// and commits the covered offsets. Loops until no further watermark can
    /// advance; each iteration pops one watermark, so the loop is bounded.
    pub(crate) async fn try_flush(&mut self) -> Result<()> {
        loop {
            if self.emitter_count == 0 || self.registry.emitter_count() < self.emitter_count {
                return Ok(());
            }
            let Some((min_rs, min_emitter)) = self.registry.min_head() else {
                return Ok(());
            };

            let buckets = self.buffer.committed_txns(min_rs);
            let offsets = self.buffer.commitable_offsets(min_rs);
            let max_flushed_ts = buckets.keys().next_back().copied().unwrap_or(0);
            debug!(
                min_rs,
                emitter = %min_emitter,
                buckets = buckets.len(),
                "Flushing safe interval"
            );

            // A sink failure is fatal: part of the interval may already be
            // written, and neither retrying nor skipping preserves ordering.
            // The uncommitted offsets make the restart replay the interval.
            for txns in buckets.values() {
                for txn in txns {
                    self.sink.emit(txn).await?;
                    consumer_metrics().txns_flushed.inc();
                }
            }
            self.sink.emit_resolved_timestamp(min_rs).await?;
            consumer_metrics().resolved_ts_emitted.inc();

            let mut offsets: Vec<(i32, i64)> = offsets.into_iter().collect();
            offsets.sort_unstable();
            for (partition, offset) in offsets {
                if self
                    .committed_offsets
                    .get(&partition)
                    .is_some_and(|last| offset <= *last)
                {
                    continue;
                }
                self.session.mark_offset(partition, offset).await?;
                self.committed_offsets.insert(partition, offset);
                consumer_metrics().offsets_committed.inc();
            }

            self.registry.pop_head(&min_emitter);
            self.buffer.gc(min_rs, max_flushed_ts);

            assert!(
                self.global_watermark <= min_rs,
                "global safe watermark must not regress: {} -> {}",
                self.global_watermark,
                min_rs
            );
            self.global_watermark = min_rs;
            consumer_metrics().safe_watermark.set(min_rs as i64);
        }
    }
}

/// Runs the deferred half of a membership announcement, outside the core
/// lock. The installer waits for the other copies of the announcement, drains
/// the core one last time under the old membership, then swaps the emitter
/// set; every other arrival just waits for that to finish. Cancellation
/// releases both waits.
pub(crate) async fn apply_meta<S, L>(
    core: Arc<Mutex<Core<S, L>>>,
    action: MetaAction,
    cln_token: CancellationToken,
) -> Result<()>
where
    S: Sink,
    L: LogSession,
{
    match action {
        MetaAction::Install {
            mut quiesce,
            update,
        } => {
            let quiesced = tokio::select! {
                result = quiesce.wait_for(|remaining| *remaining == 0) => {
                    result.map_err(|e| {
                        Error::Membership(format!("Meta barrier closed before quiescing: {e}"))
                    })?;
                    true
                }
                _ = cln_token.cancelled() => {
                    info!("Cancelled while quiescing, releasing the meta barrier");
                    false
                }
            };

            let mut core = core.lock().await;
            if quiesced {
                core.try_flush().await?;
                core.install_membership(&update);
            }
            if let Some(barrier) = core.barrier.take() {
                barrier.release();
            }
            Ok(())
        }
        MetaAction::Wait { mut gate } => {
            tokio::select! {
                result = gate.wait_for(|open| !*open) => {
                    result.map_err(|e| {
                        Error::Membership(format!("Meta barrier closed while waiting: {e}"))
                    })?;
                }
                _ = cln_token.cancelled() => {}
            }
            Ok(())
        }
    }
}
