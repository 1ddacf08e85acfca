//! Ingress: one task per claimed partition, each pulling records in log
//! order, decoding them and dispatching into the reassembly core under its
//! lock. Transactions and watermarks update the buffers and drive a flush;
//! membership announcements are handed to the meta barrier and their deferred
//! action runs after the lock is released, so a quiescing barrier never
//! deadlocks the partition that armed it.
//!
//! A fatal error on any partition (decode, sink, commit) cancels every other
//! partition task and surfaces from [`FanInConsumer::run`]; the process is
//! expected to exit and re-read from the last committed offsets.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::message::{LogCoordinate, Record};
use crate::metrics::{consumer_metrics, kind_label};
use crate::reassembly::{Core, apply_meta};
use crate::sink::Sink;
use crate::{Error, Result};

pub mod kafka;

/// One record as delivered by the log substrate, not yet decoded.
#[derive(Debug)]
pub struct LogEntry {
    pub partition: i32,
    pub offset: i64,
    pub payload: Bytes,
}

/// An ordered stream of records for one partition.
#[trait_variant::make(LogStream: Send)]
pub trait LocalLogStream {
    /// The next record in partition log order; `None` when the stream ends.
    async fn next_entry(&mut self) -> Result<Option<LogEntry>>;
}

/// The consumer-group session the offsets are committed through.
#[trait_variant::make(LogSession: Send)]
pub trait LocalLogSession {
    /// Marks `offset` on `partition` as processed. Marks for one partition
    /// never regress.
    async fn mark_offset(&mut self, partition: i32, offset: i64) -> Result<()>;
}

/// Fans the partition streams of a changefeed topic into one ordered sink
/// stream.
pub struct FanInConsumer<S, L> {
    core: Arc<Mutex<Core<S, L>>>,
}

impl<S, L> FanInConsumer<S, L>
where
    S: Sink + Send + 'static,
    L: LogSession + Send + 'static,
{
    pub fn new(sink: S, session: L) -> Self {
        FanInConsumer {
            core: Arc::new(Mutex::new(Core::new(sink, session))),
        }
    }

    /// Consumes every stream to its end, or until `cln_token` fires, or until
    /// the first fatal error. In-flight dispatches finish before tasks stop;
    /// a pending membership barrier is released by the cancellation.
    pub async fn run<R>(self, streams: Vec<R>, cln_token: CancellationToken) -> Result<()>
    where
        R: LogStream + Send + 'static,
    {
        let mut tasks = JoinSet::new();
        for mut stream in streams {
            let core = Arc::clone(&self.core);
            let token = cln_token.clone();
            tasks.spawn(async move {
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            info!("Cancelled, stopping partition ingress");
                            return Ok(());
                        }
                        entry = stream.next_entry() => entry,
                    };
                    let entry = match next {
                        Ok(Some(entry)) => entry,
                        Ok(None) => return Ok(()),
                        Err(err) => {
                            error!(?err, "Partition stream failed, stopping the consumer");
                            token.cancel();
                            return Err(err);
                        }
                    };
                    if let Err(err) = dispatch(&core, entry, &token).await {
                        error!(?err, "Fatal error on ingress, stopping the consumer");
                        token.cancel();
                        return Err(err);
                    }
                }
            });
        }

        let mut result = Ok(());
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .unwrap_or_else(|e| Err(Error::Log(format!("Ingress task panicked: {e}"))));
            if result.is_ok() {
                result = outcome;
            }
        }
        result
    }
}

async fn dispatch<S, L>(
    core: &Arc<Mutex<Core<S, L>>>,
    entry: LogEntry,
    cln_token: &CancellationToken,
) -> Result<()>
where
    S: Sink,
    L: LogSession,
{
    let record = Record::decode(&entry.payload)?;
    consumer_metrics()
        .records_read
        .get_or_create(&kind_label(record.kind()))
        .inc();

    let coord = LogCoordinate {
        partition: entry.partition,
        offset: entry.offset,
    };
    match record {
        Record::Txn(txn) => {
            let mut core = core.lock().await;
            core.ingest_txn(coord, txn);
            core.try_flush().await
        }
        Record::Watermark(rs) => {
            let mut core = core.lock().await;
            core.ingest_watermark(coord, rs);
            core.try_flush().await
        }
        Record::Meta(update) => {
            let action = {
                let mut core = core.lock().await;
                core.on_meta(update)?
            };
            apply_meta(Arc::clone(core), action, cln_token.clone()).await
        }
    }
}
