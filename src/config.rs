use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::payment::PaymentFailurePolicy;

/// Server settings, read from `STAYD_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub reconcile_interval: Duration,
    pub payment: PaymentConfig,
}

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub api_base: String,
    pub api_key: String,
    pub currency: String,
    pub timeout: Duration,
    pub on_failure: PaymentFailurePolicy,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parsed<T: FromStr>(name: &str) -> Option<T> {
    var(name).and_then(|s| s.parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        let on_failure = match var("STAYD_PAYMENT_ON_FAILURE") {
            Some(v) => PaymentFailurePolicy::parse(&v).unwrap_or_else(|| {
                tracing::warn!("unknown STAYD_PAYMENT_ON_FAILURE={v:?}, keeping reservations");
                PaymentFailurePolicy::Keep
            }),
            None => PaymentFailurePolicy::Keep,
        };

        Self {
            bind: var("STAYD_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed("STAYD_PORT").unwrap_or(5433),
            data_dir: PathBuf::from(var("STAYD_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: var("STAYD_PASSWORD").unwrap_or_else(|| "stayd".into()),
            max_connections: parsed("STAYD_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: parsed("STAYD_COMPACT_THRESHOLD").unwrap_or(1000),
            metrics_port: parsed("STAYD_METRICS_PORT"),
            tls_cert: var("STAYD_TLS_CERT"),
            tls_key: var("STAYD_TLS_KEY"),
            reconcile_interval: Duration::from_secs(
                parsed::<u64>("STAYD_RECONCILE_INTERVAL_SECS")
                    .filter(|s| *s > 0)
                    .unwrap_or(60),
            ),
            payment: PaymentConfig {
                api_base: var("STAYD_PAYMENT_API_BASE")
                    .unwrap_or_else(|| "https://api.stripe.com".into()),
                api_key: var("STAYD_PAYMENT_API_KEY").unwrap_or_default(),
                currency: var("STAYD_PAYMENT_CURRENCY")
                    .unwrap_or_else(|| "usd".into())
                    .to_lowercase(),
                timeout: Duration::from_millis(parsed("STAYD_PAYMENT_TIMEOUT_MS").unwrap_or(10_000)),
                on_failure,
            },
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("stayd.wal")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
