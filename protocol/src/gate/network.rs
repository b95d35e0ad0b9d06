//! Trusted Wi-Fi evaluation.
//!
//! Platforms report SSIDs wrapped in double quotes (and sometimes not), and
//! BSSIDs in whatever case the driver felt like. Both are normalized before
//! comparison.

use std::collections::HashSet;

/// Allow-lists of store networks.
#[derive(Debug, Clone, Default)]
pub struct TrustedNetworks {
    ssids: HashSet<String>,
    bssids: HashSet<String>,
}

fn normalize_ssid(ssid: &str) -> String {
    ssid.trim().trim_matches('"').to_string()
}

fn normalize_bssid(bssid: &str) -> String {
    bssid.trim().to_lowercase()
}

impl TrustedNetworks {
    pub fn new<S, B>(ssids: S, bssids: B) -> Self
    where
        S: IntoIterator,
        S::Item: AsRef<str>,
        B: IntoIterator,
        B::Item: AsRef<str>,
    {
        Self {
            ssids: ssids.into_iter().map(|s| normalize_ssid(s.as_ref())).collect(),
            bssids: bssids
                .into_iter()
                .map(|b| normalize_bssid(b.as_ref()))
                .collect(),
        }
    }

    /// A network is trusted if either its SSID or its BSSID is listed.
    pub fn is_trusted(&self, ssid: Option<&str>, bssid: Option<&str>) -> bool {
        let ssid_ok = ssid
            .map(normalize_ssid)
            .is_some_and(|s| !s.is_empty() && self.ssids.contains(&s));
        let bssid_ok = bssid
            .map(normalize_bssid)
            .is_some_and(|b| self.bssids.contains(&b));
        ssid_ok || bssid_ok
    }

    pub fn is_empty(&self) -> bool {
        self.ssids.is_empty() && self.bssids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn networks() -> TrustedNetworks {
        TrustedNetworks::new(["DUKSUNG_WIFI", "MY_STORE_WIFI"], ["00:11:22:33:44:55"])
    }

    #[test]
    fn test_quoted_ssid_matches() {
        assert!(networks().is_trusted(Some("\"DUKSUNG_WIFI\""), None));
        assert!(networks().is_trusted(Some("MY_STORE_WIFI"), None));
    }

    #[test]
    fn test_bssid_case_insensitive() {
        assert!(networks().is_trusted(None, Some("00:11:22:33:44:55")));
        let n = TrustedNetworks::new(Vec::<String>::new(), ["AA:BB:CC:DD:EE:FF"]);
        assert!(n.is_trusted(Some("whatever"), Some("aa:bb:cc:dd:ee:ff")));
    }

    #[test]
    fn test_unknown_network_untrusted() {
        assert!(!networks().is_trusted(Some("CAFE_GUEST"), Some("de:ad:be:ef:00:01")));
        assert!(!networks().is_trusted(None, None));
        assert!(!networks().is_trusted(Some("\"\""), None));
    }
}
