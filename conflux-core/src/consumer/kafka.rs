//! Glue between the Kafka substrate crate and the core's log traits.

use conflux_kafka::{KafkaConsumerConfig, KafkaLogSession, KafkaPartitionStream, LogRecord};

use crate::config::LogSettings;
use crate::consumer::{LogEntry, LogSession, LogStream};

impl From<&LogSettings> for KafkaConsumerConfig {
    fn from(settings: &LogSettings) -> Self {
        KafkaConsumerConfig {
            version: settings.version.clone(),
            brokers: settings.endpoints.clone(),
            topics: settings.topics.clone(),
            consumer_group: settings.consumer_group.clone(),
            metadata_retry_max: settings.metadata_retry_max,
            metadata_retry_backoff: settings.metadata_retry_backoff,
            initial_offset: settings.initial_offset,
            consumer_retry_backoff: settings.consumer_retry_backoff,
        }
    }
}

impl From<LogRecord> for LogEntry {
    fn from(record: LogRecord) -> Self {
        LogEntry {
            partition: record.partition,
            offset: record.offset,
            payload: record.payload,
        }
    }
}

impl LogStream for KafkaPartitionStream {
    async fn next_entry(&mut self) -> crate::Result<Option<LogEntry>> {
        Ok(Some(self.next_record().await.into()))
    }
}

impl LogSession for KafkaLogSession {
    async fn mark_offset(&mut self, partition: i32, offset: i64) -> crate::Result<()> {
        KafkaLogSession::mark_offset(self, partition, offset).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use conflux_kafka::InitialOffset;

    use super::*;

    #[test]
    fn test_log_settings_conversion() {
        let settings = LogSettings {
            version: Some("2.6.0".to_string()),
            endpoints: vec!["broker-0:9092".to_string()],
            topics: vec!["changefeed".to_string()],
            consumer_group: "conflux".to_string(),
            metadata_retry_max: 3,
            metadata_retry_backoff: Duration::from_millis(100),
            initial_offset: InitialOffset::Newest,
            consumer_retry_backoff: Duration::from_millis(200),
        };
        let config = KafkaConsumerConfig::from(&settings);
        assert_eq!(config.version.as_deref(), Some("2.6.0"));
        assert_eq!(config.brokers, vec!["broker-0:9092"]);
        assert_eq!(config.topics, vec!["changefeed"]);
        assert_eq!(config.initial_offset, InitialOffset::Newest);
        assert_eq!(config.metadata_retry_max, 3);
    }
}
