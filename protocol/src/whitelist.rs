//! # Beacon Whitelist
//!
//! Read-only lookup table shipped with the app: which beacons belong to which
//! store, and which public key each merchant signs codes with.
//!
//! The asset has been written by hand by several people over time, so the
//! per-beacon fields come in both camelCase and snake_case. We normalize at
//! load time; nothing downstream ever sees the two spellings.
//!
//! ```json
//! { "beacons": [
//!   { "uuid": "74278bda-b644-4520-8f0c-720eaf059935", "major": 1, "minor": 1,
//!     "locationId": "store_duksung_a", "merchant_id": "m-001",
//!     "pubkey": "-----BEGIN PUBLIC KEY-----..." }
//! ] }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

/// Errors loading the whitelist asset.
#[derive(Debug, Error)]
pub enum WhitelistError {
    #[error("failed to read whitelist file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed whitelist JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One known beacon, canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawEntry")]
pub struct WhitelistEntry {
    pub region_id: String,
    pub major: u16,
    pub minor: u16,
    pub location_id: Option<String>,
    pub merchant_id: Option<String>,
    pub merchant_pubkey_pem: Option<String>,
}

/// Entry as written in the asset. An entry may carry both spellings of a
/// field; camelCase wins.
#[derive(Debug, Deserialize)]
struct RawEntry {
    uuid: String,
    major: u16,
    minor: u16,
    #[serde(default, rename = "locationId")]
    location_camel: Option<String>,
    #[serde(default)]
    location_id: Option<String>,
    #[serde(default, rename = "merchantId")]
    merchant_camel: Option<String>,
    #[serde(default)]
    merchant_id: Option<String>,
    #[serde(default)]
    pubkey: Option<String>,
}

impl From<RawEntry> for WhitelistEntry {
    fn from(raw: RawEntry) -> Self {
        Self {
            region_id: raw.uuid,
            major: raw.major,
            minor: raw.minor,
            location_id: raw.location_camel.or(raw.location_id),
            merchant_id: raw.merchant_camel.or(raw.merchant_id),
            merchant_pubkey_pem: raw.pubkey,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WhitelistFile {
    #[serde(default)]
    beacons: Vec<WhitelistEntry>,
}

/// Loaded whitelist. Immutable after construction; share it behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    beacons: HashMap<String, WhitelistEntry>,
    merchant_keys: HashMap<String, String>,
}

fn beacon_key(region_id: &str, major: u16, minor: u16) -> String {
    format!("{}|{}|{}", region_id.to_uppercase(), major, minor)
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl Whitelist {
    /// Build from already-parsed entries. Later duplicates win.
    pub fn from_entries(entries: impl IntoIterator<Item = WhitelistEntry>) -> Self {
        let mut wl = Self::default();
        for entry in entries {
            if let (Some(merchant), Some(pubkey)) =
                (non_blank(&entry.merchant_id), non_blank(&entry.merchant_pubkey_pem))
            {
                wl.merchant_keys
                    .insert(merchant.to_string(), pubkey.to_string());
            }
            let key = beacon_key(&entry.region_id, entry.major, entry.minor);
            debug!(beacon = %key, location = ?entry.location_id, "whitelist entry");
            wl.beacons.insert(key, entry);
        }
        wl
    }

    /// Parse the JSON asset. A missing `beacons` array yields an empty list.
    pub fn from_json_str(json: &str) -> Result<Self, WhitelistError> {
        let file: WhitelistFile = serde_json::from_str(json)?;
        let wl = Self::from_entries(file.beacons);
        info!(
            beacons = wl.beacons.len(),
            merchants = wl.merchant_keys.len(),
            "whitelist loaded"
        );
        Ok(wl)
    }

    /// Read and parse the asset from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WhitelistError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Look up a beacon by its identifier triple. The region id is
    /// case-insensitive.
    pub fn find_beacon(&self, region_id: &str, major: u16, minor: u16) -> Option<&WhitelistEntry> {
        self.beacons.get(&beacon_key(region_id, major, minor))
    }

    /// Public key (PEM) a merchant signs its codes with.
    pub fn merchant_pubkey(&self, merchant_id: &str) -> Option<&str> {
        self.merchant_keys.get(merchant_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.beacons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty()
    }

    pub fn merchant_count(&self) -> usize {
        self.merchant_keys.len()
    }
}
