//! Runtime configuration for the server and client binaries.
//!
//! Defaults live in code; `GLYCOSECURE_*` environment variables override them.
//! Parsing is best-effort: an invalid value is logged and the default kept.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::adapters::csv::DEFAULT_LABEL_COLUMN;
use crate::domain::SchemeParameters;

/// Default cap on a `/predict` body: one batch of a few hundred rows at N=8192.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 256 * 1024 * 1024;

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring invalid {key}={raw}");
            None
        }
    }
}

fn env_flag(key: &str) -> Option<bool> {
    env_string(key).map(|v| !matches!(v.as_str(), "0" | "false" | "FALSE" | "no" | "NO"))
}

/// Scheme parameters with overrides applied.
///
/// Supported:
/// - GLYCOSECURE_CKKS_POLY_MODULUS (ring dimension N)
/// - GLYCOSECURE_CKKS_COEFF_BITS (comma-separated prime sizes, e.g. `60,40,40,60`)
/// - GLYCOSECURE_CKKS_SCALE_BITS (global scale = 2^bits)
///
/// Consistency is checked later by the engine when the context is created.
pub fn scheme_from_env_or_default() -> SchemeParameters {
    let mut scheme = SchemeParameters::default();

    if let Some(n) = env_parse::<usize>("GLYCOSECURE_CKKS_POLY_MODULUS") {
        scheme.ring_dimension = n;
    }

    if let Some(raw) = env_string("GLYCOSECURE_CKKS_COEFF_BITS") {
        let parsed: Result<Vec<u32>, _> =
            raw.split(',').map(|part| part.trim().parse::<u32>()).collect();
        match parsed {
            Ok(chain) if !chain.is_empty() => scheme.modulus_chain = chain,
            _ => tracing::warn!("Ignoring invalid GLYCOSECURE_CKKS_COEFF_BITS={raw}"),
        }
    }

    if let Some(bits) = env_parse::<i32>("GLYCOSECURE_CKKS_SCALE_BITS") {
        if (1..=62).contains(&bits) {
            scheme.global_scale = 2f64.powi(bits);
        } else {
            tracing::warn!("Ignoring out-of-range GLYCOSECURE_CKKS_SCALE_BITS={bits}");
        }
    }

    scheme
}

/// Server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,

    /// Root of `model/`, `keys/` and `data/`
    pub artifact_dir: PathBuf,

    /// Training CSV used when the bundle has to be (re)built
    pub dataset_path: PathBuf,

    pub label_column: String,

    /// Include weights and intercept in `/params`
    pub publish_weights: bool,

    pub max_request_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8000)),
            artifact_dir: PathBuf::from("."),
            dataset_path: PathBuf::from("data/diabetes.csv"),
            label_column: DEFAULT_LABEL_COLUMN.to_string(),
            publish_weights: false,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }
}

impl ServerConfig {
    /// Load config overrides from environment (best-effort).
    ///
    /// Supported:
    /// - GLYCOSECURE_BIND
    /// - GLYCOSECURE_ARTIFACT_DIR
    /// - GLYCOSECURE_DATASET
    /// - GLYCOSECURE_LABEL_COLUMN
    /// - GLYCOSECURE_PUBLISH_WEIGHTS
    /// - GLYCOSECURE_MAX_REQUEST_BYTES
    pub fn from_env_or_default() -> Self {
        let mut cfg = Self::default();

        if let Some(bind) = env_parse::<SocketAddr>("GLYCOSECURE_BIND") {
            cfg.bind = bind;
        }
        if let Some(dir) = env_string("GLYCOSECURE_ARTIFACT_DIR") {
            cfg.artifact_dir = PathBuf::from(dir);
        }
        if let Some(path) = env_string("GLYCOSECURE_DATASET") {
            cfg.dataset_path = PathBuf::from(path);
        }
        if let Some(column) = env_string("GLYCOSECURE_LABEL_COLUMN") {
            cfg.label_column = column;
        }
        if let Some(publish) = env_flag("GLYCOSECURE_PUBLISH_WEIGHTS") {
            cfg.publish_weights = publish;
        }
        if let Some(limit) = env_parse::<usize>("GLYCOSECURE_MAX_REQUEST_BYTES") {
            if limit > 0 {
                cfg.max_request_bytes = limit;
            }
        }

        cfg
    }
}

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub request_timeout: Duration,
    pub scheme: SchemeParameters,

    /// Root of `keys/` and `data/`
    pub artifact_dir: PathBuf,

    /// Feature CSV to score
    pub input_path: PathBuf,

    /// Column dropped from the input if present
    pub label_column: String,

    pub output_path: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".to_string(),
            request_timeout: Duration::from_secs(300),
            scheme: SchemeParameters::default(),
            artifact_dir: PathBuf::from("."),
            input_path: PathBuf::from("data/diabetes.csv"),
            label_column: DEFAULT_LABEL_COLUMN.to_string(),
            output_path: PathBuf::from("predictions.csv"),
        }
    }
}

impl ClientConfig {
    /// Load config overrides from environment (best-effort).
    ///
    /// Supported:
    /// - GLYCOSECURE_SERVER_URL
    /// - GLYCOSECURE_REQUEST_TIMEOUT_SECS
    /// - GLYCOSECURE_ARTIFACT_DIR
    /// - GLYCOSECURE_INPUT
    /// - GLYCOSECURE_LABEL_COLUMN
    /// - GLYCOSECURE_OUTPUT
    /// - the scheme variables of [`scheme_from_env_or_default`]
    pub fn from_env_or_default() -> Self {
        let mut cfg = Self {
            scheme: scheme_from_env_or_default(),
            ..Self::default()
        };

        if let Some(url) = env_string("GLYCOSECURE_SERVER_URL") {
            cfg.server_url = url;
        }
        if let Some(secs) = env_parse::<u64>("GLYCOSECURE_REQUEST_TIMEOUT_SECS") {
            if secs > 0 {
                cfg.request_timeout = Duration::from_secs(secs);
            }
        }
        if let Some(dir) = env_string("GLYCOSECURE_ARTIFACT_DIR") {
            cfg.artifact_dir = PathBuf::from(dir);
        }
        if let Some(path) = env_string("GLYCOSECURE_INPUT") {
            cfg.input_path = PathBuf::from(path);
        }
        if let Some(column) = env_string("GLYCOSECURE_LABEL_COLUMN") {
            cfg.label_column = column;
        }
        if let Some(path) = env_string("GLYCOSECURE_OUTPUT") {
            cfg.output_path = PathBuf::from(path);
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let server = ServerConfig::default();
        assert_eq!(server.bind.port(), 8000);
        assert!(!server.publish_weights);
        assert_eq!(server.max_request_bytes, DEFAULT_MAX_REQUEST_BYTES);

        let client = ClientConfig::default();
        assert_eq!(client.output_path, PathBuf::from("predictions.csv"));
        assert_eq!(client.scheme, SchemeParameters::default());
    }

    #[test]
    fn test_env_overrides_are_best_effort() {
        // Keys unique to this test so parallel tests do not observe them.
        std::env::set_var("GLYCOSECURE_CKKS_COEFF_BITS", "50, 30 ,50");
        std::env::set_var("GLYCOSECURE_CKKS_SCALE_BITS", "99");
        let scheme = scheme_from_env_or_default();
        std::env::remove_var("GLYCOSECURE_CKKS_COEFF_BITS");
        std::env::remove_var("GLYCOSECURE_CKKS_SCALE_BITS");

        assert_eq!(scheme.modulus_chain, vec![50, 30, 50]);
        assert_eq!(scheme.global_scale, SchemeParameters::default().global_scale);
    }
}
