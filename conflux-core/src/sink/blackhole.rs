use crate::message::Transaction;
use crate::sink::Sink;

/// Blackhole is a sink to emulate /dev/null.
pub struct BlackholeSink;

impl Sink for BlackholeSink {
    async fn emit(&mut self, _txn: &Transaction) -> crate::Result<()> {
        Ok(())
    }

    async fn emit_resolved_timestamp(&mut self, _ts: u64) -> crate::Result<()> {
        Ok(())
    }
}
