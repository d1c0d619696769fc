//! MaxMind GeoIP country lookups, used by the router's country matcher.
//! The database is optional: if no path is configured, or the file can't
//! be opened, lookups simply never match rather than the node failing to
//! start — a route that only needs geo data on deployments that have a
//! database configured should not stop others from matching.

use maxminddb::{geoip2, Reader};
use parking_lot::RwLock;
use std::path::Path;
use tracing::warn;

pub struct GeoIpReader {
    reader: RwLock<Option<Reader<Vec<u8>>>>,
}

impl GeoIpReader {
    pub fn empty() -> Self {
        Self {
            reader: RwLock::new(None),
        }
    }

    pub fn open(path: &Path) -> Self {
        match Reader::open_readfile(path) {
            Ok(reader) => Self {
                reader: RwLock::new(Some(reader)),
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to open GeoIP database, country rules will never match");
                Self::empty()
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.reader.read().is_some()
    }

    /// True iff `ip` resolves to `iso_code` (e.g. "US") in the database.
    pub fn matches(&self, ip: std::net::IpAddr, iso_code: &str) -> bool {
        let guard = self.reader.read();
        let Some(reader) = guard.as_ref() else {
            return false;
        };
        match reader.lookup::<geoip2::Country>(ip) {
            Ok(country) => country
                .country
                .and_then(|c| c.iso_code)
                .map(|code| code.eq_ignore_ascii_case(iso_code))
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}

impl Default for GeoIpReader {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_reader_never_matches() {
        let geo = GeoIpReader::empty();
        assert!(!geo.matches("8.8.8.8".parse().unwrap(), "US"));
        assert!(!geo.is_loaded());
    }

    #[test]
    fn missing_file_falls_back_to_empty() {
        let geo = GeoIpReader::open(Path::new("/nonexistent/geo.mmdb"));
        assert!(!geo.is_loaded());
        assert!(!geo.matches("8.8.8.8".parse().unwrap(), "US"));
    }
}
