//! iBeacon advertisement decoding.
//!
//! Layout of Apple manufacturer-specific data (company id `0x004C`):
//!
//! ```text
//!   0      1      2 ........ 17   18  19   20  21   22
//!   0x02   0x15   proximity UUID  major    minor    tx power (i8, dBm @ 1 m)
//! ```
//!
//! Major and minor are big-endian. Trailing bytes are ignored; some beacons
//! append a battery byte.

use thiserror::Error;
use uuid::Uuid;

use crate::config::{
    APPLE_COMPANY_ID, BEACON_RSSI_THRESHOLD, IBEACON_FRAME_LENGTH, IBEACON_LENGTH, IBEACON_TYPE,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("manufacturer data is not from Apple (company id {0:#06x})")]
    WrongCompany(u16),

    #[error("manufacturer data too short for an iBeacon: {0} bytes")]
    TooShort(usize),

    #[error("not an iBeacon frame")]
    NotIBeacon,
}

/// Identifier triple plus calibration power from one advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconFrame {
    /// Proximity UUID, uppercase hyphenated.
    pub region_id: String,
    pub major: u16,
    pub minor: u16,
    pub tx_power: i8,
}

impl BeaconFrame {
    /// Decode Apple manufacturer data.
    pub fn parse(company_id: u16, data: &[u8]) -> Result<Self, FrameError> {
        if company_id != APPLE_COMPANY_ID {
            return Err(FrameError::WrongCompany(company_id));
        }
        if data.len() < IBEACON_FRAME_LENGTH {
            return Err(FrameError::TooShort(data.len()));
        }
        if data[0] != IBEACON_TYPE || data[1] != IBEACON_LENGTH {
            return Err(FrameError::NotIBeacon);
        }

        let uuid = Uuid::from_slice(&data[2..18]).map_err(|_| FrameError::NotIBeacon)?;
        Ok(Self {
            region_id: uuid.hyphenated().to_string().to_uppercase(),
            major: u16::from_be_bytes([data[18], data[19]]),
            minor: u16::from_be_bytes([data[20], data[21]]),
            tx_power: data[22] as i8,
        })
    }
}

/// Whether a received signal is strong enough to count as "at the counter".
pub fn is_near(rssi: i16) -> bool {
    rssi >= BEACON_RSSI_THRESHOLD
}
