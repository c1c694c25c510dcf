//! Geo-IP lookup collaborators.
//!
//! The compiler never calls these; they back the CLI `lookup` command and
//! the diagnostics. Failures are surfaced with the collaborator's reason and
//! never retried here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use crate::{Error, Result};

/// Default public registry endpoint.
pub const DEFAULT_REGISTRY_URL: &str = "https://ipapi.co";

/// Default request timeout for registry lookups.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

const UNKNOWN: &str = "Unknown";

/// Where an address is and who operates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub ip: IpAddr,
    pub country: String,
    /// ISO 3166 alpha-2 code, `??` when unknown
    pub code: String,
    pub region: String,
    pub city: String,
    /// Network owner / ISP label
    pub isp: String,
}

/// A source of geo-IP information.
pub trait GeoLookup {
    fn lookup(&self, ip: IpAddr) -> Result<GeoLocation>;
}

fn or_unknown(value: Option<String>) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

#[derive(Deserialize)]
struct RegistryResponse {
    #[serde(default)]
    error: Option<bool>,
    reason: Option<String>,
    city: Option<String>,
    region: Option<String>,
    country_name: Option<String>,
    country_code: Option<String>,
    org: Option<String>,
}

/// Turn a registry JSON body into a location, honoring its error payload.
fn parse_registry_response(ip: IpAddr, body: &str) -> Result<GeoLocation> {
    let resp: RegistryResponse = serde_json::from_str(body)
        .map_err(|e| Error::Lookup(format!("malformed registry response: {}", e)))?;

    if resp.error.unwrap_or(false) {
        return Err(Error::Lookup(
            resp.reason.unwrap_or_else(|| "IP not found.".to_string()),
        ));
    }

    Ok(GeoLocation {
        ip,
        country: or_unknown(resp.country_name),
        code: resp
            .country_code
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "??".to_string()),
        region: or_unknown(resp.region),
        city: or_unknown(resp.city),
        isp: or_unknown(resp.org),
    })
}

/// Lookup against an ipapi-compatible HTTP registry (`{base}/{ip}/json/`).
pub struct RegistryLookup {
    base_url: String,
    timeout: Duration,
}

impl Default for RegistryLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryLookup {
    /// Create a lookup against the default registry.
    pub fn new() -> Self {
        Self::with_url(DEFAULT_REGISTRY_URL)
    }

    /// Create a lookup against a custom registry base URL.
    pub fn with_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    /// Set a custom request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn url_for(&self, ip: IpAddr) -> String {
        format!("{}/{}/json/", self.base_url, ip)
    }
}

fn read_error(e: std::io::Error) -> Error {
    Error::Lookup(format!("failed to read response: {}", e))
}

impl GeoLookup for RegistryLookup {
    fn lookup(&self, ip: IpAddr) -> Result<GeoLocation> {
        let url = self.url_for(ip);
        log::debug!("registry lookup: {}", url);

        let response = ureq::get(&url)
            .timeout(self.timeout)
            .call()
            .map_err(|e| match e {
                ureq::Error::Status(code, _) => Error::Lookup(format!("Registry error: {}", code)),
                ureq::Error::Transport(t) => Error::Lookup(format!("Transport error: {}", t)),
            })?;

        let body = response.into_string().map_err(read_error)?;
        parse_registry_response(ip, &body)
    }
}

#[derive(Deserialize)]
struct MmdbNames {
    #[serde(default)]
    names: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct MmdbCountry {
    iso_code: Option<String>,
    #[serde(default)]
    names: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct MmdbRecord {
    country: Option<MmdbCountry>,
    city: Option<MmdbNames>,
    subdivisions: Option<Vec<MmdbNames>>,
    autonomous_system_organization: Option<String>,
}

fn english(names: &BTreeMap<String, String>) -> Option<String> {
    names.get("en").cloned()
}

/// Offline lookup from a MaxMind `.mmdb` database (GeoLite2 Country/City/ASN).
pub struct MaxMindLookup {
    reader: maxminddb::Reader<Vec<u8>>,
}

impl MaxMindLookup {
    /// Open a database file.
    pub fn open(path: &Path) -> Result<Self> {
        let reader =
            maxminddb::Reader::open_readfile(path).map_err(|e| Error::GeoIp(e.to_string()))?;
        Ok(Self { reader })
    }

    /// Load a database from bytes.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let reader = maxminddb::Reader::from_source(data).map_err(|e| Error::GeoIp(e.to_string()))?;
        Ok(Self { reader })
    }
}

impl GeoLookup for MaxMindLookup {
    fn lookup(&self, ip: IpAddr) -> Result<GeoLocation> {
        let record: MmdbRecord = self
            .reader
            .lookup(ip)
            .map_err(|e| Error::GeoIp(e.to_string()))?;

        let (country, code) = match record.country {
            Some(c) => (english(&c.names), c.iso_code),
            None => (None, None),
        };
        let region = record
            .subdivisions
            .and_then(|subs| subs.into_iter().next())
            .and_then(|s| english(&s.names));

        Ok(GeoLocation {
            ip,
            country: or_unknown(country),
            code: code.unwrap_or_else(|| "??".to_string()),
            region: or_unknown(region),
            city: or_unknown(record.city.and_then(|c| english(&c.names))),
            isp: or_unknown(record.autonomous_system_organization),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn google_dns() -> IpAddr {
        "8.8.8.8".parse().unwrap()
    }

    #[test]
    fn test_parse_registry_success() {
        let body = r#"{
            "ip": "8.8.8.8",
            "city": "Mountain View",
            "region": "California",
            "country_name": "United States",
            "country_code": "US",
            "org": "GOOGLE"
        }"#;
        let loc = parse_registry_response(google_dns(), body).unwrap();
        assert_eq!(loc.code, "US");
        assert_eq!(loc.country, "United States");
        assert_eq!(loc.city, "Mountain View");
        assert_eq!(loc.isp, "GOOGLE");
    }

    #[test]
    fn test_parse_registry_missing_fields() {
        let loc = parse_registry_response(google_dns(), "{}").unwrap();
        assert_eq!(loc.country, "Unknown");
        assert_eq!(loc.code, "??");
        assert_eq!(loc.isp, "Unknown");
    }

    #[test]
    fn test_parse_registry_error_payload() {
        let body = r#"{"error": true, "reason": "Reserved IP Address"}"#;
        let err = parse_registry_response("10.0.0.1".parse().unwrap(), body).unwrap_err();
        assert!(matches!(err, Error::Lookup(ref r) if r == "Reserved IP Address"));
    }

    #[test]
    fn test_parse_registry_garbage() {
        let err = parse_registry_response(google_dns(), "<html>").unwrap_err();
        assert!(matches!(err, Error::Lookup(_)));
    }

    #[test]
    fn test_registry_url() {
        let lookup = RegistryLookup::with_url("http://localhost:8080/");
        assert_eq!(
            lookup.url_for(google_dns()),
            "http://localhost:8080/8.8.8.8/json/"
        );
        assert_eq!(
            RegistryLookup::new().url_for("2001:db8::1".parse().unwrap()),
            "https://ipapi.co/2001:db8::1/json/"
        );
    }

    #[test]
    fn test_body_read_failure_is_lookup_error() {
        let err = read_error(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed",
        ));
        match err {
            Error::Lookup(reason) => assert!(reason.contains("connection closed")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_registry_unreachable() {
        let lookup = RegistryLookup::with_url("http://127.0.0.1:1")
            .with_timeout(Duration::from_secs(2));
        assert!(matches!(lookup.lookup(google_dns()), Err(Error::Lookup(_))));
    }

    #[test]
    fn test_maxmind_invalid_database() {
        let result = MaxMindLookup::from_bytes(b"not a database".to_vec());
        assert!(matches!(result, Err(Error::GeoIp(_))));
    }

    #[test]
    fn test_maxmind_missing_file() {
        let result = MaxMindLookup::open(Path::new("/nonexistent/GeoLite2-Country.mmdb"));
        assert!(matches!(result, Err(Error::GeoIp(_))));
    }
}
