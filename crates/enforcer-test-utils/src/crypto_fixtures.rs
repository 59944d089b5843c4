//! Deterministic cryptographic fixtures for testing
//!
//! Provides reproducible Ed25519 keypairs that sign tokens and export their
//! public half as a PEM trust store entry or a JWK.
//! All fixtures are deterministic based on seed values.

use base64::engine::general_purpose;
use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use ring::signature::{Ed25519KeyPair, KeyPair};

/// DER prefix of an Ed25519 SubjectPublicKeyInfo (RFC 8410), followed by
/// the 32-byte public key.
const ED25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// Ed25519 signing key with a key id.
///
/// # Example
/// ```rust,ignore
/// let keypair = TestKeypair::new(1, "key-1");
/// let token = keypair.sign(&TestTokenBuilder::new().build());
/// std::fs::write(dir.join("issuer.pem"), keypair.public_key_pem())?;
/// ```
pub struct TestKeypair {
    kid: String,
    public_key: Vec<u8>,
    pkcs8: Vec<u8>,
}

impl TestKeypair {
    /// The same seed always produces the same keypair.
    pub fn new(seed: u8, kid: &str) -> Self {
        let seed_bytes = seed_bytes(seed);
        let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes)
            .expect("Failed to generate test keypair");

        Self {
            kid: kid.to_string(),
            public_key: key_pair.public_key().as_ref().to_vec(),
            pkcs8: build_pkcs8_from_seed(&seed_bytes),
        }
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_ed_der(&self.pkcs8)
    }

    pub fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_ed_der(&self.public_key)
    }

    /// Public key as a `PUBLIC KEY` PEM document.
    pub fn public_key_pem(&self) -> String {
        let mut der = ED25519_SPKI_PREFIX.to_vec();
        der.extend_from_slice(&self.public_key);
        format!(
            "-----BEGIN PUBLIC KEY-----\n{}\n-----END PUBLIC KEY-----\n",
            general_purpose::STANDARD.encode(der)
        )
    }

    /// Public key as an OKP JWK.
    pub fn jwk_json(&self) -> serde_json::Value {
        serde_json::json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": general_purpose::URL_SAFE_NO_PAD.encode(&self.public_key),
            "kid": self.kid,
            "alg": "EdDSA",
            "use": "sig",
        })
    }

    /// Sign `claims` as an EdDSA JWT carrying this key's `kid`.
    pub fn sign(&self, claims: &serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(self.kid.clone());
        jsonwebtoken::encode(&header, claims, &self.encoding_key())
            .expect("Failed to sign test token")
    }
}

/// JWKS document holding the public keys of `keypairs`.
pub fn jwks_document(keypairs: &[&TestKeypair]) -> serde_json::Value {
    serde_json::json!({
        "keys": keypairs.iter().map(|k| k.jwk_json()).collect::<Vec<_>>(),
    })
}

fn seed_bytes(seed: u8) -> [u8; 32] {
    let mut seed_bytes = [0u8; 32];
    seed_bytes[0] = seed;
    for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
        *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
    }
    seed_bytes
}

/// Build a PKCS#8 v1 document from an Ed25519 seed.
///
/// Ring does not export PKCS#8 for a seeded keypair, so the DER is
/// assembled by hand (RFC 5208, RFC 8410).
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    let mut pkcs8 = vec![0x30, 0x2e];
    // Version: INTEGER 0
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);
    // AlgorithmIdentifier: OID 1.3.101.112
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    // PrivateKey: OCTET STRING wrapping the 32-byte seed
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);
    pkcs8
}
