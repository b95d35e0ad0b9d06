//! # Protocol Configuration & Constants
//!
//! Every magic number in ProxPay lives here. If you're hardcoding a constant
//! somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! Some of these values are shared with the key server (the HKDF info
//! string, endpoint paths, wire lengths). Changing those without a
//! coordinated server release mints sessions that nobody can decrypt, so
//! treat them as frozen.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Crate-level protocol version string. Reported by the node binary and in
/// the `app_ver` field of key-agreement requests when the host doesn't
/// supply its own.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Version tag written into every self-issued token payload (`v` field).
/// Bump when the plaintext layout changes incompatibly.
pub const TOKEN_PAYLOAD_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Trigger Gate Timing
// ---------------------------------------------------------------------------

/// How long a matched beacon keeps `near_beacon` asserted without a fresh
/// advertisement. Beacons advertise several times a second, so 15 seconds
/// of silence means the phone really walked away (or the battery died).
pub const BEACON_TIMEOUT: Duration = Duration::from_secs(15);

/// Minimum spacing between two payment prompts. A prompt inside this window
/// of the previous one is swallowed, no matter how many signals arrive.
pub const PROMPT_COOLDOWN: Duration = Duration::from_secs(3);

/// Capacity of the in-process prompt broadcast channel. Prompts are rare
/// (at most one per cooldown window), so a small buffer is plenty.
pub const PROMPT_CHANNEL_CAPACITY: usize = 16;

// ---------------------------------------------------------------------------
// Beacon Frames
// ---------------------------------------------------------------------------

/// Bluetooth SIG company identifier for Apple, which owns the iBeacon layout.
pub const APPLE_COMPANY_ID: u16 = 0x004C;

/// iBeacon type byte inside Apple manufacturer data.
pub const IBEACON_TYPE: u8 = 0x02;

/// iBeacon payload length byte (21 bytes follow).
pub const IBEACON_LENGTH: u8 = 0x15;

/// Minimum manufacturer-data length for an iBeacon frame: type + length +
/// 16-byte UUID + major + minor + TX power.
pub const IBEACON_FRAME_LENGTH: usize = 23;

/// Weakest signal (dBm) still treated as "standing at the counter". Frames
/// below this are ignored before they reach the gate.
pub const BEACON_RSSI_THRESHOLD: i16 = -70;

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Key agreement curve. P-256 because the key server and both mobile
/// platforms speak it natively.
pub const KEY_AGREEMENT_CURVE: &str = "P-256";

/// AES-256-GCM key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce (IV) length in bytes. Twelve. Not 16. Twelve.
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-256-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

/// HMAC-SHA256 key length for the session MAC key.
pub const MAC_KEY_LENGTH: usize = 32;

/// Total HKDF output: encryption key followed by MAC key.
pub const SESSION_KEY_MATERIAL_LENGTH: usize = AES_KEY_LENGTH + MAC_KEY_LENGTH;

/// Length of the random client nonce sent with every key-agreement request.
pub const CLIENT_NONCE_LENGTH: usize = 16;

/// HKDF `info` string. Domain separation between this derivation and any
/// other use of the same shared secret. Shared with the key server.
pub const HKDF_INFO: &[u8] = b"qr-session-v1";

// ---------------------------------------------------------------------------
// Key Server
// ---------------------------------------------------------------------------

/// Path of the ECDH key-agreement endpoint.
pub const ECDH_ENDPOINT: &str = "/v1/keys/ecdh";

/// Path of the server-minted token endpoint.
pub const QR_ISSUE_ENDPOINT: &str = "/v1/qr/issue";

/// Upper bound on one key-agreement round trip. A cold-start payment prompt
/// that waits longer than this is worse than one that fails and retries.
pub const KEY_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(20);

/// TCP connect timeout for the HTTP client.
pub const KEY_SERVER_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Name of the sled tree that holds the persisted session.
pub const SESSION_TREE: &str = "qr_session";

/// Key of the single session record inside [`SESSION_TREE`]. One key means
/// one atomic write: a reader can never see a key id next to another
/// session's expiry.
pub const SESSION_RECORD_KEY: &[u8] = b"current";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_parameter_sizes() {
        assert_eq!(AES_KEY_LENGTH, 32);
        assert_eq!(AES_NONCE_LENGTH, 12);
        assert_eq!(AES_TAG_LENGTH, 16);
        assert_eq!(SESSION_KEY_MATERIAL_LENGTH, 64);
        assert_eq!(CLIENT_NONCE_LENGTH, 16);
    }

    #[test]
    fn test_timing_constants_sanity() {
        // The cooldown must be shorter than beacon decay, otherwise a single
        // beacon visit could never produce a second prompt.
        assert!(PROMPT_COOLDOWN < BEACON_TIMEOUT);
        assert_eq!(BEACON_TIMEOUT, Duration::from_secs(15));
        assert_eq!(PROMPT_COOLDOWN, Duration::from_secs(3));
    }

    #[test]
    fn test_ibeacon_layout_constants() {
        // type + len + uuid(16) + major(2) + minor(2) + tx(1)
        assert_eq!(IBEACON_FRAME_LENGTH, 2 + 16 + 2 + 2 + 1);
        assert_eq!(IBEACON_LENGTH as usize, IBEACON_FRAME_LENGTH - 2);
    }

    #[test]
    fn test_hkdf_info_is_stable() {
        assert_eq!(HKDF_INFO, b"qr-session-v1");
    }
}
