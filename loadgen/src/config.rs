//! Configuration for the load generator.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `LG__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! See [`Config`] for a description of all configuration fields and their defaults.
//!
//! # Environment Variables
//!
//! Environment variables use `LG__` as a prefix and double underscores (`__`) to denote nested
//! configuration structures. For example:
//!
//! - `LG__STORE__ENDPOINT=minio:9000` sets the S3 endpoint
//! - `LG__WORKLOAD__READ_INTERVAL=50ms` sets the read tick interval
//! - `LG__BUCKETS__READ=warm-corpus` sets the read bucket
//!
//! # YAML Configuration File
//!
//! The above configuration in YAML format would look like this:
//!
//! ```yaml
//! store:
//!   type: s3compatible
//!   endpoint: minio:9000
//!
//! workload:
//!   read_interval: 50ms
//!
//! buckets:
//!   read: warm-corpus
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use bytesize::ByteSize;
use figment::providers::{Env, Format, Serialized, Yaml};
use secrecy::{CloneableSecret, ExposeSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::level_filters::LevelFilter;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "LG__";

/// Newtype around `String` that may protect against accidental logging of secrets in our
/// configuration struct. Use with [`secrecy::SecretBox`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    /// Returns the secret as a string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ConfigSecret {
    fn from(str: &str) -> Self {
        ConfigSecret(str.to_string())
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "[redacted]")
    }
}

impl CloneableSecret for ConfigSecret {}
impl SerializableSecret for ConfigSecret {}
impl Zeroize for ConfigSecret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// Object store configuration.
///
/// The `type` field in YAML or `__TYPE` in environment variables determines which variant is used.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Storage {
    /// An in-process store that keeps all objects in memory (type `"memory"`).
    ///
    /// Useful to exercise the load generator itself without a backend. Latencies reflect only
    /// the overhead of the engine.
    Memory,

    /// S3-compatible object store (type `"s3compatible"`).
    ///
    /// # Example
    ///
    /// ```yaml
    /// store:
    ///   type: s3compatible
    ///   endpoint: localhost:9000
    ///   region: par
    ///   access_key: loadgen
    ///   secret_key: hunter22
    /// ```
    S3Compatible {
        /// The `host:port` of the S3 endpoint, without scheme.
        endpoint: String,

        /// The region used for request signing and bucket creation.
        ///
        /// # Default
        ///
        /// `"par"`
        #[serde(default = "default_region")]
        region: String,

        /// Access key ID.
        ///
        /// # Environment Variables
        ///
        /// - `LG__STORE__ACCESS_KEY`
        #[serde(default)]
        access_key: Option<String>,

        /// Secret access key.
        ///
        /// # Environment Variables
        ///
        /// - `LG__STORE__SECRET_KEY`
        #[serde(default)]
        secret_key: Option<SecretBox<ConfigSecret>>,

        /// Connect via HTTPS.
        ///
        /// # Default
        ///
        /// `false`
        #[serde(default)]
        use_tls: bool,

        /// Address buckets by path instead of by virtual host.
        ///
        /// # Default
        ///
        /// `true`
        #[serde(default = "default_path_style")]
        path_style: bool,

        /// Timeout applied to every request.
        ///
        /// # Default
        ///
        /// `None` (no timeout)
        #[serde(default, with = "humantime_serde")]
        request_timeout: Option<Duration>,
    },
}

fn default_region() -> String {
    "par".into()
}

fn default_path_style() -> bool {
    true
}

impl Storage {
    /// Converts S3 settings into the store crate's configuration.
    ///
    /// Returns `None` for the in-memory store.
    pub fn s3_config(&self) -> Option<loadgen_store::S3Config> {
        match self {
            Storage::Memory => None,
            Storage::S3Compatible {
                endpoint,
                region,
                access_key,
                secret_key,
                use_tls,
                path_style,
                request_timeout,
            } => Some(loadgen_store::S3Config {
                endpoint: endpoint.clone(),
                region: region.clone(),
                access_key: access_key.clone(),
                secret_key: secret_key
                    .as_ref()
                    .map(|secret| secret.expose_secret().as_str().to_owned()),
                use_tls: *use_tls,
                path_style: *path_style,
                request_timeout: *request_timeout,
            }),
        }
    }
}

/// The two buckets the load generator works with.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Buckets {
    /// Bucket receiving steady-state writes.
    ///
    /// # Default
    ///
    /// `"s3-loadgen-writes"`
    pub write: String,

    /// Bucket holding the read corpus.
    ///
    /// # Default
    ///
    /// `"s3-loadgen-reads"`
    pub read: String,
}

impl Default for Buckets {
    fn default() -> Self {
        Self {
            write: "s3-loadgen-writes".into(),
            read: "s3-loadgen-reads".into(),
        }
    }
}

/// How the read corpus is populated before reads begin.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WarmupMode {
    /// Write the whole corpus before the first tick is scheduled.
    #[default]
    Blocking,

    /// Write the corpus in the background while load generation is already running.
    ///
    /// Reads issued before their key was written count as misses.
    Concurrent,
}

/// Shape and rate of the generated traffic.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Workload {
    /// Time between two write ticks.
    ///
    /// # Default
    ///
    /// `200ms`
    #[serde(with = "humantime_serde")]
    pub write_interval: Duration,

    /// Time between two read ticks.
    ///
    /// # Default
    ///
    /// `100ms`
    #[serde(with = "humantime_serde")]
    pub read_interval: Duration,

    /// Size of every written object.
    ///
    /// Accepts a plain byte count or a human readable size such as `"250 KB"`.
    ///
    /// # Default
    ///
    /// `250000` bytes
    #[serde(serialize_with = "serialize_byte_size")]
    pub payload_size: ByteSize,

    /// Number of objects written into the read bucket during warm-up.
    ///
    /// # Default
    ///
    /// `2000`
    pub corpus_size: u64,

    /// Prefix of every object key.
    ///
    /// # Default
    ///
    /// `"s3-loadgen"`
    pub key_prefix: String,

    /// Maximum number of operations in flight at the same time.
    ///
    /// Ticks that find no free slot are dropped and counted.
    ///
    /// # Default
    ///
    /// `256`
    pub max_in_flight: usize,

    /// How the read corpus is populated.
    ///
    /// # Default
    ///
    /// `blocking`
    pub warmup: WarmupMode,

    /// How long in-flight operations may keep running after shutdown was requested.
    ///
    /// # Default
    ///
    /// `10s`
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            write_interval: Duration::from_millis(200),
            read_interval: Duration::from_millis(100),
            payload_size: ByteSize::b(250_000),
            corpus_size: 2000,
            key_prefix: "s3-loadgen".into(),
            max_in_flight: 256,
            warmup: WarmupMode::Blocking,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Serializes a [`ByteSize`] as its exact byte count.
///
/// The human readable representation of `bytesize` rounds, which would make the defaults lossy.
fn serialize_byte_size<S>(value: &ByteSize, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(value.as_u64())
}

/// Log output format.
///
/// Used in: [`Logging::format`]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty printing with colors if attached to a terminal, otherwise simplified.
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output without colors.
    Simplified,

    /// JSON lines, one event per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// # Default
    ///
    /// `info`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    ///
    /// # Default
    ///
    /// `auto`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Metrics configuration.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Metrics {
    /// Datadog API key. Metrics are only forwarded to Datadog if this is set.
    pub datadog_key: Option<SecretBox<ConfigSecret>>,

    /// Global tags attached to every forwarded metric.
    pub tags: BTreeMap<String, String>,

    /// Interval at which a summary of the collected metrics is logged.
    ///
    /// # Default
    ///
    /// `10s`
    #[serde(with = "humantime_serde")]
    pub report_interval: Duration,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            datadog_key: None,
            tags: BTreeMap::new(),
            report_interval: Duration::from_secs(10),
        }
    }
}

/// Runtime configuration.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Runtime {
    /// Number of worker threads of the async runtime.
    ///
    /// # Default
    ///
    /// The number of logical CPUs.
    pub worker_threads: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
        }
    }
}

/// Reasons a loaded [`Config`] is rejected.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A tick interval is zero.
    #[error("`workload.{0}` must be greater than zero")]
    ZeroInterval(&'static str),
    /// No operation could ever be in flight.
    #[error("`workload.max_in_flight` must be greater than zero")]
    ZeroInFlight,
    /// Writes would carry no data.
    #[error("`workload.payload_size` must be greater than zero")]
    ZeroPayload,
    /// A bucket name is empty.
    #[error("`buckets.{0}` must not be empty")]
    EmptyBucket(&'static str),
    /// Progress would be reported in a busy loop.
    #[error("`metrics.report_interval` must be greater than zero")]
    ZeroReportInterval,
    /// The runtime would have no threads to run on.
    #[error("`runtime.worker_threads` must be greater than zero")]
    ZeroWorkerThreads,
}

/// Load generator configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// The object store under test.
    pub store: Storage,

    /// The buckets for reads and writes.
    pub buckets: Buckets,

    /// Rates and sizes of the generated traffic.
    pub workload: Workload,

    /// Logging configuration.
    pub logging: Logging,

    /// Metrics configuration.
    pub metrics: Metrics,

    /// Runtime configuration.
    pub runtime: Runtime,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: Storage::S3Compatible {
                endpoint: "localhost:9000".into(),
                region: default_region(),
                access_key: None,
                secret_key: None,
                use_tls: false,
                path_style: default_path_style(),
                request_timeout: None,
            },
            buckets: Buckets::default(),
            workload: Workload::default(),
            logging: Logging::default(),
            metrics: Metrics::default(),
            runtime: Runtime::default(),
        }
    }
}

impl Config {
    /// Loads and validates the configuration from defaults, an optional YAML file and the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Checks invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let workload = &self.workload;
        if workload.write_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("write_interval"));
        }
        if workload.read_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("read_interval"));
        }
        if workload.max_in_flight == 0 {
            return Err(ConfigError::ZeroInFlight);
        }
        if workload.payload_size.as_u64() == 0 {
            return Err(ConfigError::ZeroPayload);
        }
        if self.buckets.write.is_empty() {
            return Err(ConfigError::EmptyBucket("write"));
        }
        if self.buckets.read.is_empty() {
            return Err(ConfigError::EmptyBucket("read"));
        }
        if self.metrics.report_interval.is_zero() {
            return Err(ConfigError::ZeroReportInterval);
        }
        if self.runtime.worker_threads == 0 {
            return Err(ConfigError::ZeroWorkerThreads);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None).unwrap();

            assert_eq!(config.workload.write_interval, Duration::from_millis(200));
            assert_eq!(config.workload.read_interval, Duration::from_millis(100));
            assert_eq!(config.workload.payload_size, ByteSize::b(250_000));
            assert_eq!(config.workload.corpus_size, 2000);
            assert_eq!(config.workload.warmup, WarmupMode::Blocking);
            assert_eq!(config.buckets.write, "s3-loadgen-writes");
            assert_eq!(config.buckets.read, "s3-loadgen-reads");

            Ok(())
        });
    }

    #[test]
    fn configurable_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("LG__STORE__TYPE", "s3compatible");
            jail.set_env("LG__STORE__ENDPOINT", "minio:9000");
            jail.set_env("LG__STORE__ACCESS_KEY", "loadgen");
            jail.set_env("LG__STORE__SECRET_KEY", "hunter22");
            jail.set_env("LG__STORE__USE_TLS", "true");
            jail.set_env("LG__WORKLOAD__READ_INTERVAL", "50ms");
            jail.set_env("LG__WORKLOAD__PAYLOAD_SIZE", "1024");
            jail.set_env("LG__WORKLOAD__WARMUP", "concurrent");
            jail.set_env("LG__METRICS__TAGS__FOO", "bar");

            let config = Config::load(None).unwrap();

            let s3 = dbg!(&config).store.s3_config().unwrap();
            assert_eq!(s3.endpoint, "minio:9000");
            assert_eq!(s3.region, "par");
            assert_eq!(s3.access_key.as_deref(), Some("loadgen"));
            assert_eq!(s3.secret_key.as_deref(), Some("hunter22"));
            assert!(s3.use_tls);
            assert!(s3.path_style);

            assert_eq!(config.workload.read_interval, Duration::from_millis(50));
            assert_eq!(config.workload.payload_size, ByteSize::b(1024));
            assert_eq!(config.workload.warmup, WarmupMode::Concurrent);
            assert_eq!(config.metrics.tags, [("foo".into(), "bar".into())].into());

            Ok(())
        });
    }

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            store:
                type: memory
            buckets:
                write: w
                read: r
            workload:
                write_interval: 1s
                corpus_size: 5
                payload_size: 16 B
            logging:
                level: debug
                format: json
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path())).unwrap();

            assert!(matches!(dbg!(&config).store, Storage::Memory));
            assert_eq!(config.buckets.write, "w");
            assert_eq!(config.buckets.read, "r");
            assert_eq!(config.workload.write_interval, Duration::from_secs(1));
            assert_eq!(config.workload.corpus_size, 5);
            assert_eq!(config.workload.payload_size, ByteSize::b(16));
            assert_eq!(config.logging.level, LevelFilter::DEBUG);
            assert_eq!(config.logging.format, LogFormat::Json);

            Ok(())
        });
    }

    #[test]
    fn env_overrides_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            workload:
                write_interval: 1s
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("LG__WORKLOAD__WRITE_INTERVAL", "250ms");

            let config = Config::load(Some(tempfile.path())).unwrap();
            assert_eq!(config.workload.write_interval, Duration::from_millis(250));

            Ok(())
        });
    }

    #[test]
    fn rejects_zero_interval() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("LG__WORKLOAD__READ_INTERVAL", "0s");

            let err = Config::load(None).unwrap_err();
            assert_eq!(
                err.downcast_ref::<ConfigError>(),
                Some(&ConfigError::ZeroInterval("read_interval"))
            );

            Ok(())
        });
    }

    #[test]
    fn validate_rejects_degenerate_values() {
        let mut config = Config::default();
        config.workload.max_in_flight = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroInFlight));

        let mut config = Config::default();
        config.workload.payload_size = ByteSize::b(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroPayload));

        let mut config = Config::default();
        config.buckets.read = String::new();
        assert_eq!(config.validate(), Err(ConfigError::EmptyBucket("read")));
    }

    #[test]
    fn validate_rejects_zero_report_interval_and_threads() {
        let mut config = Config::default();
        config.metrics.report_interval = Duration::ZERO;
        assert_eq!(config.validate(), Err(ConfigError::ZeroReportInterval));

        let mut config = Config::default();
        config.runtime.worker_threads = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroWorkerThreads));

        figment::Jail::expect_with(|jail| {
            jail.set_env("LG__METRICS__REPORT_INTERVAL", "0s");
            let err = Config::load(None).unwrap_err();
            assert_eq!(
                err.downcast_ref::<ConfigError>(),
                Some(&ConfigError::ZeroReportInterval)
            );

            Ok(())
        });
    }

    #[test]
    fn secrets_are_redacted() {
        let config = Config {
            metrics: Metrics {
                datadog_key: Some(SecretBox::new(Box::new("abcde".into()))),
                ..Default::default()
            },
            ..Default::default()
        };

        assert!(!format!("{config:?}").contains("abcde"));
    }
}
