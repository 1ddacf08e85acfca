use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Log Error - {0}")]
    Log(String),

    #[error("Sink Error - {0}")]
    Sink(String),

    #[error("Decode Error - {0}")]
    Decode(String),

    #[error("Config Error - {0}")]
    Config(String),

    #[error("Membership Error - {0}")]
    Membership(String),

    #[error("Metrics Error - {0}")]
    Metrics(String),
}

impl From<conflux_kafka::Error> for Error {
    fn from(value: conflux_kafka::Error) -> Self {
        match value {
            conflux_kafka::Error::Connection { server, error } => Error::Log(format!(
                "Failed to connect to Kafka server: {server} - {error}"
            )),
            conflux_kafka::Error::Kafka(e) => Error::Log(e),
            conflux_kafka::Error::Other(e) => Error::Log(e),
        }
    }
}
