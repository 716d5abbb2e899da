//! Stateless CSRF tokens for the password-grant login form
//!
//! A token is a nested JWT: the claims are signed (ES256) with a per-process
//! key pair, and the resulting JWS is encrypted as a compact JWE with direct
//! symmetric key agreement (`alg=dir`, `enc=A128GCM`, `cty=JWT`).
//!
//! Both keys are generated when the authenticator is built and never leave
//! process memory. Tokens therefore do not survive a restart and are not
//! portable between instances; a token only has to live from rendering the
//! login page to submitting it.
//!
//! Every rejection reason is its own [`CsrfError`] variant.

use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload, rand_core::RngCore};
use aes_gcm::{Aes128Gcm, Nonce};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

/// Request header carrying the CSRF token
pub const CSRF_HEADER: &str = "x-csrf-token";
/// Fixed `sub` claim
pub const CSRF_SUBJECT: &str = "oidc login nonce";
/// Fixed `iss` claim
pub const CSRF_ISSUER: &str = "OpenSPMRegistry";
/// Token lifetime
pub const CSRF_TOKEN_TTL: Duration = Duration::from_secs(3600);

/// A128GCM key size in bytes
const KEY_LEN: usize = 16;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
const JWE_ALG: &str = "dir";
const JWE_ENC: &str = "A128GCM";
const JWT_CONTENT_TYPE: &str = "JWT";

/// CSRF token failure
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CsrfError {
    /// No encryption key configured
    #[error("missing encryption key")]
    MissingKey,

    /// Key is not 16 bytes
    #[error("invalid key size: expected {KEY_LEN} bytes, got {0}")]
    InvalidKeySize(usize),

    /// Key material could not be generated
    #[error("failed to generate CSRF keys: {0}")]
    KeyGeneration(String),

    /// Claims could not be signed
    #[error("failed to sign token: {0}")]
    Signing(String),

    /// Payload could not be encrypted
    #[error("failed to encrypt token")]
    Encryption,

    /// Not a compact JWE with the expected shape
    #[error("malformed token")]
    Malformed,

    /// Header names an algorithm other than `dir` / `A128GCM`
    #[error("unsupported token encryption")]
    UnsupportedEncryption,

    /// Authentication tag did not verify (tampered or foreign key)
    #[error("failed to decrypt token")]
    Decryption,

    /// Encrypted payload is not a nested JWT
    #[error("invalid content type")]
    InvalidContentType,

    /// Inner JWS signature did not verify
    #[error("invalid token signature")]
    InvalidSignature,

    /// `sub` claim is not the login nonce subject
    #[error("invalid subject")]
    InvalidSubject,

    /// `iss` claim is not the registry
    #[error("invalid issuer")]
    InvalidIssuer,

    /// No `exp` claim
    #[error("missing expiry")]
    MissingExpiry,

    /// `exp` is in the past
    #[error("token expired")]
    Expired,

    /// No or empty `value` claim
    #[error("missing value")]
    MissingValue,

    /// `value` claim differs from the expected value
    #[error("invalid value")]
    InvalidValue,
}

/// Claims carried by a CSRF token
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CsrfClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
}

/// JWE protected header
#[derive(Debug, Serialize, Deserialize)]
struct JweHeader {
    alg: String,
    enc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cty: Option<String>,
}

/// Issues and verifies CSRF tokens with per-process keys
pub struct CsrfCodec {
    key: Vec<u8>,
    signing_key: EncodingKey,
    verifying_key: DecodingKey,
}

impl CsrfCodec {
    /// Generate a fresh 16-byte encryption key and ES256 signing key pair.
    pub fn generate() -> Result<Self, CsrfError> {
        let mut key = vec![0_u8; KEY_LEN];
        OsRng
            .try_fill_bytes(&mut key)
            .map_err(|e| CsrfError::KeyGeneration(e.to_string()))?;
        Self::with_key(key)
    }

    /// Use `key` for encryption with a freshly generated signing key pair.
    ///
    /// The key length is checked when a token is encrypted or decrypted.
    pub fn with_key(key: Vec<u8>) -> Result<Self, CsrfError> {
        let pair = rcgen::KeyPair::generate()
            .map_err(|e| CsrfError::KeyGeneration(e.to_string()))?;
        let signing_key = EncodingKey::from_ec_pem(pair.serialize_pem().as_bytes())
            .map_err(|e| CsrfError::KeyGeneration(e.to_string()))?;
        let verifying_key = DecodingKey::from_ec_pem(pair.public_key_pem().as_bytes())
            .map_err(|e| CsrfError::KeyGeneration(e.to_string()))?;

        Ok(Self {
            key,
            signing_key,
            verifying_key,
        })
    }

    /// Issue a token for `value`, valid for one hour.
    pub fn encrypt_token(&self, value: &str) -> Result<String, CsrfError> {
        let exp = unix_now().saturating_add(CSRF_TOKEN_TTL.as_secs());
        self.seal(&CsrfClaims {
            sub: Some(CSRF_SUBJECT.to_string()),
            iss: Some(CSRF_ISSUER.to_string()),
            exp: Some(exp),
            value: Some(value.to_string()),
        })
    }

    /// Verify that `token` was issued by this codec for `expected_value` and
    /// has not expired.
    pub fn verify_token(&self, token: &str, expected_value: &str) -> Result<(), CsrfError> {
        let claims = self.open(token)?;

        if claims.sub.as_deref() != Some(CSRF_SUBJECT) {
            return Err(CsrfError::InvalidSubject);
        }
        if claims.iss.as_deref() != Some(CSRF_ISSUER) {
            return Err(CsrfError::InvalidIssuer);
        }
        let exp = claims.exp.ok_or(CsrfError::MissingExpiry)?;
        if exp < unix_now() {
            return Err(CsrfError::Expired);
        }
        let value = claims
            .value
            .filter(|v| !v.is_empty())
            .ok_or(CsrfError::MissingValue)?;
        if !bool::from(value.as_bytes().ct_eq(expected_value.as_bytes())) {
            return Err(CsrfError::InvalidValue);
        }

        Ok(())
    }

    fn cipher(&self) -> Result<Aes128Gcm, CsrfError> {
        if self.key.is_empty() {
            return Err(CsrfError::MissingKey);
        }
        if self.key.len() != KEY_LEN {
            return Err(CsrfError::InvalidKeySize(self.key.len()));
        }
        Aes128Gcm::new_from_slice(&self.key).map_err(|_| CsrfError::InvalidKeySize(self.key.len()))
    }

    /// Sign then encrypt
    fn seal(&self, claims: &CsrfClaims) -> Result<String, CsrfError> {
        let cipher = self.cipher()?;

        let jws = jsonwebtoken::encode(&Header::new(Algorithm::ES256), claims, &self.signing_key)
            .map_err(|e| CsrfError::Signing(e.to_string()))?;

        let header = JweHeader {
            alg: JWE_ALG.to_string(),
            enc: JWE_ENC.to_string(),
            cty: Some(JWT_CONTENT_TYPE.to_string()),
        };
        let header_json = serde_json::to_vec(&header).map_err(|_| CsrfError::Encryption)?;
        let protected = URL_SAFE_NO_PAD.encode(header_json);

        let mut iv = [0_u8; IV_LEN];
        OsRng
            .try_fill_bytes(&mut iv)
            .map_err(|_| CsrfError::Encryption)?;

        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: jws.as_bytes(),
                    aad: protected.as_bytes(),
                },
            )
            .map_err(|_| CsrfError::Encryption)?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        // Compact JWE; the encrypted-key segment is empty for `dir`
        Ok(format!(
            "{protected}..{}.{}.{}",
            URL_SAFE_NO_PAD.encode(iv),
            URL_SAFE_NO_PAD.encode(ciphertext),
            URL_SAFE_NO_PAD.encode(tag)
        ))
    }

    /// Decrypt then verify the signature
    fn open(&self, token: &str) -> Result<CsrfClaims, CsrfError> {
        let parts: Vec<&str> = token.split('.').collect();
        let [protected, encrypted_key, iv, ciphertext, tag] = parts[..] else {
            return Err(CsrfError::Malformed);
        };
        if !encrypted_key.is_empty() {
            return Err(CsrfError::Malformed);
        }

        let header: JweHeader = URL_SAFE_NO_PAD
            .decode(protected)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or(CsrfError::Malformed)?;
        if header.alg != JWE_ALG || header.enc != JWE_ENC {
            return Err(CsrfError::UnsupportedEncryption);
        }

        let iv = decode_segment(iv)?;
        let mut sealed = decode_segment(ciphertext)?;
        let tag = decode_segment(tag)?;
        if iv.len() != IV_LEN || tag.len() != TAG_LEN {
            return Err(CsrfError::Malformed);
        }
        sealed.extend_from_slice(&tag);

        let cipher = self.cipher()?;
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &sealed,
                    aad: protected.as_bytes(),
                },
            )
            .map_err(|_| CsrfError::Decryption)?;

        if header.cty.as_deref() != Some(JWT_CONTENT_TYPE) {
            return Err(CsrfError::InvalidContentType);
        }
        let jws = String::from_utf8(plaintext).map_err(|_| CsrfError::InvalidContentType)?;

        // Claims are validated by the caller so each failure stays distinct
        let mut validation = Validation::new(Algorithm::ES256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        jsonwebtoken::decode::<CsrfClaims>(&jws, &self.verifying_key, &validation)
            .map(|data| data.claims)
            .map_err(|_| CsrfError::InvalidSignature)
    }
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, CsrfError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| CsrfError::Malformed)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
