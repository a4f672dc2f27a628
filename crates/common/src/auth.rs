//! # Request Authentication
//!
//! Verifikasi bearer token yang mengikat konten JSON-RPC request ke
//! sebuah signer EVM.
//!
//! ## Format Token
//!
//! Compact JWT `header.claims.signature` (base64url tanpa padding):
//!
//! - header: `{"alg":"ETH","typ":"JWT"}`
//! - claims: `{"digest":"0x<request digest>","jti":..,"iat":..,"exp":..}`
//! - signature: 65 byte `r ‖ s ‖ v` atas
//!   `keccak256("\x19Ethereum Signed Message:\n" ‖ len ‖ header.claims)`
//!
//! Signer adalah alamat EVM hasil recovery public key dari signature.
//! Pengecekan replay (`jti`) dilakukan oleh pemanggil, bukan di sini.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use dongate_proto::{ProtoError, Request};

/// Algoritma di JWT header.
pub const ETH_ALGORITHM: &str = "ETH";
/// Umur maksimum token (`exp - iat`).
pub const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(5 * 60);
/// Toleransi clock antara client dan gateway untuk `iat`/`nbf`.
pub const CLOCK_SKEW: Duration = Duration::from_secs(5);

const SIGNATURE_LEN: usize = 65;

// ════════════════════════════════════════════════════════════════════════════
// ERROR
// ════════════════════════════════════════════════════════════════════════════

/// Error autentikasi request.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("auth token is missing")]
    MissingToken,

    #[error("malformed auth token: {0}")]
    Malformed(String),

    #[error("unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token digest does not match request")]
    DigestMismatch,

    #[error("token is missing required claim: {0}")]
    MissingClaim(&'static str),

    #[error("token has expired")]
    Expired,

    #[error("token is not valid yet")]
    NotYetValid,

    #[error("token lifetime exceeds {}s", MAX_TOKEN_LIFETIME.as_secs())]
    LifetimeTooLong,

    #[error("failed to compute request digest: {0}")]
    Digest(#[from] ProtoError),
}

// ════════════════════════════════════════════════════════════════════════════
// TOKEN TYPES
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nbf: Option<i64>,
}

/// Hasil verifikasi token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    /// Alamat EVM signer, lowercase dengan `0x`.
    pub signer: String,
    /// Token ID sekali pakai.
    pub jti: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Autentikator request. Implementasi harus thread-safe.
pub trait RequestAuthenticator: Send + Sync {
    fn authenticate(&self, request: &Request) -> Result<VerifiedToken, AuthError>;
}

// ════════════════════════════════════════════════════════════════════════════
// ETH JWT
// ════════════════════════════════════════════════════════════════════════════

/// Verifier untuk token `alg = ETH`.
#[derive(Debug, Clone)]
pub struct EthJwtAuthenticator {
    max_lifetime: Duration,
    clock_skew: Duration,
}

impl Default for EthJwtAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl EthJwtAuthenticator {
    pub fn new() -> Self {
        Self {
            max_lifetime: MAX_TOKEN_LIFETIME,
            clock_skew: CLOCK_SKEW,
        }
    }

    fn check_claims(&self, request: &Request, claims: Claims, signer: String) -> Result<VerifiedToken, AuthError> {
        let digest = claims.digest.ok_or(AuthError::MissingClaim("digest"))?;
        if digest != format!("0x{}", request.digest()?) {
            return Err(AuthError::DigestMismatch);
        }
        let jti = claims
            .jti
            .filter(|j| !j.is_empty())
            .ok_or(AuthError::MissingClaim("jti"))?;
        let exp = claims.exp.ok_or(AuthError::MissingClaim("exp"))?;
        let iat = claims.iat.ok_or(AuthError::MissingClaim("iat"))?;

        let now = unix_now_secs();
        let skew = self.clock_skew.as_secs() as i64;
        if exp <= now {
            return Err(AuthError::Expired);
        }
        if iat > now + skew {
            return Err(AuthError::NotYetValid);
        }
        if let Some(nbf) = claims.nbf {
            if nbf > now + skew {
                return Err(AuthError::NotYetValid);
            }
        }
        if exp.saturating_sub(iat) > self.max_lifetime.as_secs() as i64 {
            return Err(AuthError::LifetimeTooLong);
        }

        Ok(VerifiedToken {
            signer,
            jti,
            issued_at: iat,
            expires_at: exp,
        })
    }
}

impl RequestAuthenticator for EthJwtAuthenticator {
    fn authenticate(&self, request: &Request) -> Result<VerifiedToken, AuthError> {
        if request.auth.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let parts: Vec<&str> = request.auth.split('.').collect();
        let [header_b64, claims_b64, sig_b64] = parts.as_slice() else {
            return Err(AuthError::Malformed("expected three segments".to_string()));
        };

        let header: Header = decode_segment(header_b64)?;
        if header.alg != ETH_ALGORITHM {
            return Err(AuthError::UnsupportedAlgorithm(header.alg));
        }
        let claims: Claims = decode_segment(claims_b64)?;

        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64.as_bytes())
            .map_err(|e| AuthError::Malformed(e.to_string()))?;
        let signing_input = format!("{}.{}", header_b64, claims_b64);
        let signer = recover_signer(signing_input.as_bytes(), &signature)?;

        self.check_claims(request, claims, signer)
    }
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.as_bytes())
        .map_err(|e| AuthError::Malformed(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| AuthError::Malformed(e.to_string()))
}

fn unix_now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// ════════════════════════════════════════════════════════════════════════════
// SECP256K1 HELPERS
// ════════════════════════════════════════════════════════════════════════════

fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// EIP-191 personal message hash.
pub fn eth_message_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

/// Alamat EVM dari public key: 20 byte terakhir keccak256(uncompressed[1..]).
pub fn evm_address(key: &VerifyingKey) -> String {
    let point = key.as_affine().to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// Recover alamat signer dari signature 65 byte atas `message`.
pub fn recover_signer(message: &[u8], signature: &[u8]) -> Result<String, AuthError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(AuthError::InvalidSignature);
    }
    let sig = Signature::from_slice(&signature[..64]).map_err(|_| AuthError::InvalidSignature)?;
    let v = match signature[64] {
        v @ (0 | 1) => v,
        v @ (27 | 28) => v - 27,
        _ => return Err(AuthError::InvalidSignature),
    };
    let recovery_id = RecoveryId::from_byte(v).ok_or(AuthError::InvalidSignature)?;
    let hash = eth_message_hash(message);
    let key = VerifyingKey::recover_from_prehash(&hash, &sig, recovery_id)
        .map_err(|_| AuthError::InvalidSignature)?;
    Ok(evm_address(&key))
}

/// Buat token untuk `request`, ditandatangani `key`, berlaku `lifetime`.
pub fn sign_request(
    request: &Request,
    key: &SigningKey,
    jti: &str,
    lifetime: Duration,
) -> Result<String, AuthError> {
    let header = Header {
        alg: ETH_ALGORITHM.to_string(),
        typ: Some("JWT".to_string()),
    };
    let now = unix_now_secs();
    let claims = Claims {
        digest: Some(format!("0x{}", request.digest()?)),
        jti: Some(jti.to_string()),
        iat: Some(now),
        exp: Some(now + lifetime.as_secs() as i64),
        nbf: None,
    };
    let header_b64 = encode_segment(&header)?;
    let claims_b64 = encode_segment(&claims)?;
    let signing_input = format!("{}.{}", header_b64, claims_b64);

    let hash = eth_message_hash(signing_input.as_bytes());
    let (sig, recovery_id) = key
        .sign_prehash_recoverable(&hash)
        .map_err(|_| AuthError::InvalidSignature)?;
    let mut raw = sig.to_bytes().to_vec();
    raw.push(recovery_id.to_byte());

    Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(raw)))
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, AuthError> {
    let bytes = serde_json::to_vec(value).map_err(|e| AuthError::Malformed(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
