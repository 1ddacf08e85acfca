//! Runtime configuration, read from `CONFLUX_*` environment variables. Only
//! the log substrate and the builtin sink selection are configurable; the
//! reassembly core has no knobs.

use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use conflux_kafka::InitialOffset;

use crate::{Error, Result};

const ENV_LOG_VERSION: &str = "CONFLUX_LOG_VERSION";
const ENV_LOG_ENDPOINTS: &str = "CONFLUX_LOG_ENDPOINTS";
const ENV_LOG_TOPIC: &str = "CONFLUX_LOG_TOPIC";
const ENV_LOG_METADATA_RETRY_MAX: &str = "CONFLUX_LOG_METADATA_RETRY_MAX";
const ENV_LOG_METADATA_RETRY_BACKOFF_MS: &str = "CONFLUX_LOG_METADATA_RETRY_BACKOFF_MS";
const ENV_LOG_OFFSETS_INITIAL: &str = "CONFLUX_LOG_OFFSETS_INITIAL";
const ENV_LOG_CONSUMER_RETRY_BACKOFF_MS: &str = "CONFLUX_LOG_CONSUMER_RETRY_BACKOFF_MS";
const ENV_CONSUMER_GROUP: &str = "CONFLUX_CONSUMER_GROUP";
const ENV_SINK: &str = "CONFLUX_SINK";
const ENV_METRICS_ADDR: &str = "CONFLUX_METRICS_ADDR";

const DEFAULT_METADATA_RETRY_MAX: u32 = 10000;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;
const DEFAULT_CONSUMER_GROUP: &str = "conflux";
const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:2470";

/// Log substrate settings, see the `log.*` option surface.
#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    /// Protocol version hint for the client; `None` negotiates.
    pub version: Option<String>,
    /// Comma-separated endpoints.
    pub endpoints: Vec<String>,
    /// Comma-separated topic names.
    pub topics: Vec<String>,
    pub consumer_group: String,
    /// Upper bound on metadata refresh retries.
    pub metadata_retry_max: u32,
    pub metadata_retry_backoff: Duration,
    /// Offset to seek when no committed offset exists.
    pub initial_offset: InitialOffset,
    pub consumer_retry_backoff: Duration,
}

/// Builtin sink selection. The relational sink lives behind the
/// [`crate::sink::Sink`] trait and is wired in by the embedding binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkKind {
    #[default]
    Log,
    Blackhole,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub log: LogSettings,
    pub sink: SinkKind,
    pub metrics_addr: SocketAddr,
}

impl Settings {
    /// Loads settings from the process environment.
    pub fn load() -> Result<Self> {
        Self::load_from(env::vars().collect())
    }

    fn load_from(vars: HashMap<String, String>) -> Result<Self> {
        let topics = vars
            .get(ENV_LOG_TOPIC)
            .map(|v| split_csv(v))
            .ok_or_else(|| Error::Config(format!("{ENV_LOG_TOPIC} must be set")))?;
        if topics.is_empty() {
            return Err(Error::Config(format!(
                "{ENV_LOG_TOPIC} must name at least one topic"
            )));
        }

        let endpoints = vars
            .get(ENV_LOG_ENDPOINTS)
            .map(|v| split_csv(v))
            .unwrap_or_else(|| vec!["localhost:9092".to_string()]);

        let log = LogSettings {
            version: vars.get(ENV_LOG_VERSION).cloned(),
            endpoints,
            topics,
            consumer_group: vars
                .get(ENV_CONSUMER_GROUP)
                .cloned()
                .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
            metadata_retry_max: parse_or(
                vars.get(ENV_LOG_METADATA_RETRY_MAX),
                DEFAULT_METADATA_RETRY_MAX,
                ENV_LOG_METADATA_RETRY_MAX,
            )?,
            metadata_retry_backoff: Duration::from_millis(parse_or(
                vars.get(ENV_LOG_METADATA_RETRY_BACKOFF_MS),
                DEFAULT_RETRY_BACKOFF_MS,
                ENV_LOG_METADATA_RETRY_BACKOFF_MS,
            )?),
            initial_offset: match vars.get(ENV_LOG_OFFSETS_INITIAL) {
                Some(v) => v
                    .parse()
                    .map_err(|e| Error::Config(format!("{ENV_LOG_OFFSETS_INITIAL}: {e}")))?,
                None => InitialOffset::Oldest,
            },
            consumer_retry_backoff: Duration::from_millis(parse_or(
                vars.get(ENV_LOG_CONSUMER_RETRY_BACKOFF_MS),
                DEFAULT_RETRY_BACKOFF_MS,
                ENV_LOG_CONSUMER_RETRY_BACKOFF_MS,
            )?),
        };

        let sink = match vars.get(ENV_SINK).map(String::as_str) {
            None | Some("log") => SinkKind::Log,
            Some("blackhole") => SinkKind::Blackhole,
            Some(other) => {
                return Err(Error::Config(format!(
                    "{ENV_SINK}: unknown sink {other:?}, expected 'log' or 'blackhole'"
                )));
            }
        };

        let metrics_addr = vars
            .get(ENV_METRICS_ADDR)
            .map(String::as_str)
            .unwrap_or(DEFAULT_METRICS_ADDR)
            .parse()
            .map_err(|e| Error::Config(format!("{ENV_METRICS_ADDR}: {e}")))?;

        Ok(Settings {
            log,
            sink,
            metrics_addr,
        })
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or<T: std::str::FromStr>(value: Option<&String>, default: T, name: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => v
            .parse()
            .map_err(|e| Error::Config(format!("{name}: {e}"))),
        None => Ok(default),
    }
}
