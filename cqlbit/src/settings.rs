use crate::error::CqlError;
use config::{Config, ConfigBuilder, Environment, File};
use config::builder::DefaultState;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    LocalOne,
    Serial,
    LocalSerial,
}

impl FromStr for Consistency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "any" => Ok(Consistency::Any),
            "one" => Ok(Consistency::One),
            "two" => Ok(Consistency::Two),
            "three" => Ok(Consistency::Three),
            "quorum" => Ok(Consistency::Quorum),
            "all" => Ok(Consistency::All),
            "local_quorum" => Ok(Consistency::LocalQuorum),
            "each_quorum" => Ok(Consistency::EachQuorum),
            "local_one" => Ok(Consistency::LocalOne),
            "serial" => Ok(Consistency::Serial),
            "local_serial" => Ok(Consistency::LocalSerial),
            _ => Err(format!("Invalid value for Consistency: {}", s)),
        }
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Consistency::Any => "ANY",
            Consistency::One => "ONE",
            Consistency::Two => "TWO",
            Consistency::Three => "THREE",
            Consistency::Quorum => "QUORUM",
            Consistency::All => "ALL",
            Consistency::LocalQuorum => "LOCAL_QUORUM",
            Consistency::EachQuorum => "EACH_QUORUM",
            Consistency::LocalOne => "LOCAL_ONE",
            Consistency::Serial => "SERIAL",
            Consistency::LocalSerial => "LOCAL_SERIAL",
        };
        f.write_str(s)
    }
}

impl<'de> serde::Deserialize<'de> for Consistency {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Consistency::from_str(&s).map_err(serde::de::Error::custom)
    }
}

fn duration_from_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub batch: BatchSettings,
    pub execution: ExecutionSettings,
    pub schema: SchemaSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchSettings {
    /// Child count at which a batch reports it should be flushed.
    pub recommended_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionSettings {
    pub consistency: Option<Consistency>,
    pub serial_consistency: Option<Consistency>,
    pub fetch_size: u32,
    #[serde(rename = "timeout_secs", deserialize_with = "duration_from_secs")]
    pub timeout: Duration,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchemaSettings {
    pub replication_factor: u32,
    pub durable_writes: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            batch: BatchSettings { recommended_size: 100 },
            execution: ExecutionSettings {
                consistency: None,
                serial_consistency: None,
                fetch_size: 5000,
                timeout: Duration::from_secs(30),
            },
            schema: SchemaSettings { replication_factor: 1, durable_writes: true },
            logging: LoggingSettings { debug: false },
        }
    }
}

impl Settings {
    fn defaults() -> Result<ConfigBuilder<DefaultState>, CqlError> {
        Ok(Config::builder()
            .set_default("batch.recommended_size", 100_i64)?
            .set_default("execution.fetch_size", 5000_i64)?
            .set_default("execution.timeout_secs", 30_i64)?
            .set_default("schema.replication_factor", 1_i64)?
            .set_default("schema.durable_writes", true)?
            .set_default("logging.debug", false)?)
    }

    /// Layers defaults, the optional file at `path`, then `CQLBIT__*` environment variables.
    pub fn new(path: &str) -> Result<Self, CqlError> {
        let builder =
            Self::defaults()?
                .add_source(File::with_name(path).required(false))
                .add_source(Environment::with_prefix("CQLBIT").try_parsing(true).separator("__"));
        Ok(builder.build()?.try_deserialize()?)
    }
}
