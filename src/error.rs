//! Error types for geoguard.

use thiserror::Error;

use crate::Backend;

/// Error type for geoguard operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Backend identifier not in the known enumeration
    #[error("invalid backend: {0}")]
    InvalidBackend(String),

    /// Backend is known but has no script generator
    #[error("backend not implemented: {0}")]
    UnsupportedBackend(Backend),

    /// Region code is not two ASCII letters
    #[error("invalid region code (must be 2 letters): {0}")]
    InvalidRegionCode(String),

    /// Unknown policy action
    #[error("invalid policy action: {0}")]
    InvalidAction(String),

    /// Invalid CIDR pattern
    #[error("invalid CIDR pattern: {0}")]
    InvalidCidrPattern(String),

    /// Invalid IP address
    #[error("invalid IP address: {0}")]
    InvalidIpAddress(String),

    /// Geo-IP registry lookup failed
    #[error("lookup failed: {0}")]
    Lookup(String),

    /// GeoIP database error
    #[error("GeoIP error: {0}")]
    GeoIp(String),

    /// Remote generator failed
    #[error("remote generator error: {0}")]
    Remote(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for geoguard operations.
pub type Result<T> = std::result::Result<T, Error>;
