//! The downstream sink boundary. A sink receives committed transactions in
//! global timestamp order, interleaved with resolved-timestamp advances.
//! Both operations are fatal on error: by the time `emit` fails the flush is
//! already partially applied, and neither retrying (duplicates) nor skipping
//! (holes) preserves the delivery contract, so the consumer aborts and
//! replays from the last committed offset on restart.

use crate::message::Transaction;

/// Set of operations a downstream sink must implement.
#[trait_variant::make(Sink: Send)]
pub trait LocalSink {
    /// Writes one transaction, atomically from the sink's perspective.
    async fn emit(&mut self, txn: &Transaction) -> crate::Result<()>;

    /// Advances the sink's notion of global safe time. Strictly
    /// non-decreasing across calls.
    async fn emit_resolved_timestamp(&mut self, ts: u64) -> crate::Result<()>;
}

pub mod blackhole;
pub mod log;
