// Token and key-derivation benchmarks for the ProxPay protocol.
//
// Covers the P-256 exchange, HKDF session derivation, self-issued token
// build/open at growing payload sizes, and merchant token verification.

use std::collections::BTreeMap;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use p256::ecdsa::{SigningKey, VerifyingKey};
use p256::pkcs8::{EncodePublicKey, LineEnding};
use rand::rngs::OsRng;

use proxpay_protocol::crypto::{derive_session_keys, EphemeralKeyPair};
use proxpay_protocol::gate::BeaconMeta;
use proxpay_protocol::token::{
    build_token, open_token, sign_merchant_payload, verify_token_at, MerchantPayload,
};
use proxpay_protocol::whitelist::{Whitelist, WhitelistEntry};

const ENC_KEY: [u8; 32] = [0x11; 32];
const NOW: i64 = 1_760_000_000;

fn bench_key_agreement(c: &mut Criterion) {
    c.bench_function("p256/ecdh_agree", |b| {
        b.iter(|| {
            let client = EphemeralKeyPair::generate();
            let server = EphemeralKeyPair::generate();
            let server_pub = server.public_key_bytes();
            client.diffie_hellman(&server_pub).unwrap()
        });
    });
}

fn bench_derive_session_keys(c: &mut Criterion) {
    let shared = [0x42u8; 32];
    let client_nonce = [1u8; 16];
    let server_nonce = [2u8; 16];

    c.bench_function("hkdf/derive_session_keys", |b| {
        b.iter(|| derive_session_keys(&shared, &client_nonce, &server_nonce).unwrap());
    });
}

fn extras(count: usize) -> BTreeMap<String, String> {
    (0..count)
        .map(|i| (format!("x{i:03}"), format!("value-{i:06}")))
        .collect()
}

fn bench_build_token(c: &mut Criterion) {
    let mut group = c.benchmark_group("token/build");

    for size in [0, 8, 64] {
        let extra = extras(size);
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &extra, |b, extra| {
            b.iter(|| build_token("kid-1", &ENC_KEY, "sid-1", "m-001", Some(4500), extra).unwrap());
        });
    }

    group.finish();
}

fn bench_open_token(c: &mut Criterion) {
    let mut group = c.benchmark_group("token/open");

    for size in [0, 8, 64] {
        let raw = build_token("kid-1", &ENC_KEY, "sid-1", "m-001", Some(4500), &extras(size)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &raw, |b, raw| {
            b.iter(|| open_token(raw, &ENC_KEY).unwrap());
        });
    }

    group.finish();
}

fn bench_verify_merchant_token(c: &mut Criterion) {
    let signing_key = SigningKey::random(&mut OsRng);
    let pem = VerifyingKey::from(&signing_key)
        .to_public_key_pem(LineEnding::LF)
        .unwrap();
    let whitelist = Whitelist::from_entries([WhitelistEntry {
        region_id: "74278BDA-B644-4520-8F0C-720EAF059935".into(),
        major: 1,
        minor: 1,
        location_id: Some("store_duksung_a".into()),
        merchant_id: Some("m-001".into()),
        merchant_pubkey_pem: Some(pem),
    }]);
    let beacon = BeaconMeta {
        region_id: "74278BDA-B644-4520-8F0C-720EAF059935".into(),
        major: 1,
        minor: 1,
        location_id: Some("store_duksung_a".into()),
        merchant_id: Some("m-001".into()),
        nonce: Some("n-1".into()),
        rssi: -60,
    };
    let raw = sign_merchant_payload(
        &signing_key,
        &MerchantPayload {
            merchant_id: "m-001".into(),
            location_id: "store_duksung_a".into(),
            nonce: Some("n-1".into()),
            expiry: NOW + 60,
            extra: BTreeMap::new(),
        },
    )
    .unwrap();

    c.bench_function("token/verify_merchant", |b| {
        b.iter(|| {
            verify_token_at(&raw, &whitelist, Some(&beacon), Some("store_duksung_a"), NOW).unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_key_agreement,
    bench_derive_session_keys,
    bench_build_token,
    bench_open_token,
    bench_verify_merchant_token,
);
criterion_main!(benches);
