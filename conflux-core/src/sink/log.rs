use tracing::info;

use crate::message::Transaction;
use crate::sink::Sink;

/// Writes every transaction to the application log. Useful for smoke-testing
/// a changefeed without a real downstream database.
pub struct LogSink;

impl Sink for LogSink {
    async fn emit(&mut self, txn: &Transaction) -> crate::Result<()> {
        info!(
            ts = txn.ts,
            emitter = %txn.emitter,
            payload = %String::from_utf8_lossy(&txn.payload),
            "txn"
        );
        Ok(())
    }

    async fn emit_resolved_timestamp(&mut self, ts: u64) -> crate::Result<()> {
        info!(ts, "resolved timestamp");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_sink() {
        let mut sink = LogSink;
        let txn = Transaction {
            ts: 7,
            emitter: "cdc-1".to_string(),
            payload: b"{\"k\":1}".to_vec().into(),
        };
        sink.emit(&txn).await.expect("emit should succeed");
        sink.emit_resolved_timestamp(7)
            .await
            .expect("resolved ts should succeed");
    }
}
