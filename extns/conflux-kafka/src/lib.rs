//! Kafka log substrate for Conflux. Wraps an rdkafka consumer group and exposes
//! the three operations the core needs: per-partition ordered record streams,
//! offset commits, and session lifecycle callbacks. Offsets are only committed
//! when the core asks for it (`enable.auto.commit` is off), so a crash replays
//! from the last committed offset.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rdkafka::Offset;
use rdkafka::client::ClientContext;
use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use rdkafka::consumer::stream_consumer::{StreamConsumer, StreamPartitionQueue};
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance};
use rdkafka::error::KafkaResult;
use rdkafka::message::Message;
use rdkafka::topic_partition_list::TopicPartitionList;
use tracing::{error, info, warn};

pub type Result<T> = core::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Connecting to Kafka {server} - {error}")]
    Connection { server: String, error: String },

    #[error("Kafka - {0}")]
    Kafka(String),

    #[error("{0}")]
    Other(String),
}

/// Where to start consuming a partition that has no committed offset yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialOffset {
    #[default]
    Oldest,
    Newest,
}

impl InitialOffset {
    fn auto_offset_reset(&self) -> &'static str {
        match self {
            InitialOffset::Oldest => "earliest",
            InitialOffset::Newest => "latest",
        }
    }
}

impl fmt::Display for InitialOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitialOffset::Oldest => write!(f, "oldest"),
            InitialOffset::Newest => write!(f, "newest"),
        }
    }
}

impl FromStr for InitialOffset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "oldest" => Ok(InitialOffset::Oldest),
            "newest" => Ok(InitialOffset::Newest),
            other => Err(Error::Other(format!(
                "Invalid initial offset {other:?}, expected 'oldest' or 'newest'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KafkaConsumerConfig {
    /// Broker protocol version hint, e.g. "2.6.0". `None` lets the client negotiate.
    pub version: Option<String>,
    pub brokers: Vec<String>,
    pub topics: Vec<String>,
    pub consumer_group: String,
    /// Upper bound on metadata fetch attempts before the first read.
    pub metadata_retry_max: u32,
    pub metadata_retry_backoff: Duration,
    pub initial_offset: InitialOffset,
    /// Delay before re-polling a partition after a fetch error.
    pub consumer_retry_backoff: Duration,
}

impl Default for KafkaConsumerConfig {
    fn default() -> Self {
        KafkaConsumerConfig {
            version: None,
            brokers: vec!["localhost:9092".to_string()],
            topics: vec![],
            consumer_group: "conflux".to_string(),
            metadata_retry_max: 10000,
            metadata_retry_backoff: Duration::from_millis(500),
            initial_offset: InitialOffset::Oldest,
            consumer_retry_backoff: Duration::from_millis(500),
        }
    }
}

/// One record as read from the log, before decoding.
#[derive(Debug)]
pub struct LogRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Bytes,
}

// Session lifecycle callbacks invoked by librdkafka around claim
// assignment and offset commits.
struct SessionContext;

impl ClientContext for SessionContext {}

impl ConsumerContext for SessionContext {
    fn pre_rebalance(&self, _: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        info!("Pre rebalance {:?}", rebalance);
    }

    fn post_rebalance(&self, _: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        info!("Post rebalance {:?}", rebalance);
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        info!("Committing offsets: {:?}", result);
    }
}

type GroupConsumer = StreamConsumer<SessionContext>;

/// A subscribed consumer-group member. Hands out one [`KafkaPartitionStream`]
/// per claimed partition and a [`KafkaLogSession`] for committing offsets.
pub struct KafkaLogClient {
    consumer: Arc<GroupConsumer>,
    config: KafkaConsumerConfig,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl Drop for KafkaLogClient {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl KafkaLogClient {
    /// Connects to the brokers and subscribes to the configured topics. The
    /// connection is verified with a bounded metadata fetch so that bad
    /// endpoints fail here instead of hanging the first read.
    pub async fn connect(config: KafkaConsumerConfig) -> Result<Self> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("group.id", &config.consumer_group)
            .set("bootstrap.servers", config.brokers.join(","))
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", config.initial_offset.auto_offset_reset())
            .set(
                "retry.backoff.ms",
                config.metadata_retry_backoff.as_millis().to_string(),
            )
            .set_log_level(RDKafkaLogLevel::Debug);

        if let Some(version) = &config.version {
            client_config.set("broker.version.fallback", version);
        }

        let consumer: GroupConsumer = client_config
            .create_with_context(SessionContext)
            .map_err(|err| Error::Connection {
                server: config.brokers.join(","),
                error: err.to_string(),
            })?;

        let topics: Vec<&str> = config.topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topics)
            .map_err(|err| Error::Kafka(format!("Failed to subscribe to topics: {err}")))?;

        let client = KafkaLogClient {
            consumer: Arc::new(consumer),
            config,
            handles: vec![],
        };
        client.await_metadata().await?;
        Ok(client)
    }

    // subscribe() does not fail on unreachable brokers or bad credentials;
    // errors only surface on the first fetch. Probe metadata up front,
    // bounded by the configured retry budget.
    async fn await_metadata(&self) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            match self.consumer.fetch_metadata(None, Duration::from_secs(5)) {
                Ok(_) => return Ok(()),
                Err(err) if attempt < self.config.metadata_retry_max => {
                    attempt += 1;
                    warn!(attempt, %err, "Metadata refresh failed, will retry");
                    tokio::time::sleep(self.config.metadata_retry_backoff).await;
                }
                Err(err) => {
                    return Err(Error::Connection {
                        server: self.config.brokers.join(","),
                        error: err.to_string(),
                    });
                }
            }
        }
    }

    /// All `(topic, partition)` pairs of the subscribed topics.
    fn fetch_partitions(&self) -> Result<Vec<(String, i32)>> {
        let mut partitions = vec![];
        for topic in &self.config.topics {
            let metadata = self
                .consumer
                .fetch_metadata(Some(topic), Duration::from_secs(5))
                .map_err(|err| Error::Kafka(format!("Failed to fetch metadata: {err}")))?;
            let Some(topic_metadata) = metadata.topics().first() else {
                warn!(topic, "No topic metadata found");
                continue;
            };
            for partition in topic_metadata.partitions() {
                partitions.push((topic.clone(), partition.id()));
            }
        }
        Ok(partitions)
    }

    /// Splits the consumer into one ordered stream per partition. Must be
    /// called once, before the first read. The root consumer keeps being
    /// polled in the background to drive rebalances and commit callbacks.
    pub fn partition_streams(&mut self) -> Result<Vec<KafkaPartitionStream>> {
        let mut streams = vec![];
        for (topic, partition) in self.fetch_partitions()? {
            let queue = self
                .consumer
                .split_partition_queue(&topic, partition)
                .ok_or_else(|| {
                    Error::Kafka(format!(
                        "Partition queue for {topic}/{partition} was already split"
                    ))
                })?;
            streams.push(KafkaPartitionStream {
                topic,
                partition,
                queue,
                retry_backoff: self.config.consumer_retry_backoff,
            });
        }

        // Messages for split partitions are routed to their queues; anything
        // surfacing here belongs to a partition created after the split.
        let root = Arc::clone(&self.consumer);
        let retry_backoff = self.config.consumer_retry_backoff;
        self.handles.push(tokio::spawn(async move {
            loop {
                match root.recv().await {
                    Ok(message) => {
                        warn!(
                            topic = message.topic(),
                            partition = message.partition(),
                            "Received message on an unsplit partition, ignoring"
                        );
                    }
                    Err(err) => {
                        error!(%err, "Root consumer poll failed, will retry");
                        tokio::time::sleep(retry_backoff).await;
                    }
                }
            }
        }));

        Ok(streams)
    }

    /// A committable handle onto this consumer-group session.
    pub fn session(&self) -> Result<KafkaLogSession> {
        let topic_by_partition = self.fetch_partitions()?.into_iter().map(|(t, p)| (p, t));
        Ok(KafkaLogSession {
            consumer: Arc::clone(&self.consumer),
            topic_by_partition: topic_by_partition.collect(),
        })
    }
}

/// Ordered stream of records for a single claimed partition.
pub struct KafkaPartitionStream {
    topic: String,
    partition: i32,
    queue: StreamPartitionQueue<SessionContext>,
    retry_backoff: Duration,
}

impl KafkaPartitionStream {
    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Receives the next record in log order. Transient fetch errors are
    /// logged and retried after the configured backoff.
    pub async fn next_record(&mut self) -> LogRecord {
        loop {
            match self.queue.recv().await {
                Ok(message) => {
                    let payload = match message.payload() {
                        Some(payload) => Bytes::copy_from_slice(payload),
                        None => Bytes::new(),
                    };
                    return LogRecord {
                        topic: self.topic.clone(),
                        partition: message.partition(),
                        offset: message.offset(),
                        payload,
                    };
                }
                Err(err) => {
                    error!(
                        topic = self.topic,
                        partition = self.partition,
                        %err,
                        "Failed to read from partition, will retry"
                    );
                    tokio::time::sleep(self.retry_backoff).await;
                }
            }
        }
    }
}

/// Commits offsets for the claimed partitions. Cloneable; all clones share
/// the underlying consumer.
#[derive(Clone)]
pub struct KafkaLogSession {
    consumer: Arc<GroupConsumer>,
    topic_by_partition: HashMap<i32, String>,
}

impl KafkaLogSession {
    /// Marks `offset` as processed on `partition`. The committed value is
    /// `offset + 1`, the next record to consume after a restart.
    pub fn mark_offset(&self, partition: i32, offset: i64) -> Result<()> {
        let topic = self.topic_by_partition.get(&partition).ok_or_else(|| {
            Error::Kafka(format!("No topic known for partition {partition}"))
        })?;

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, Offset::Offset(offset + 1))
            .map_err(|err| Error::Kafka(format!("Failed to add partition offset: {err}")))?;

        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|err| Error::Kafka(format!("Failed to commit offsets: {err}")))
    }
}
