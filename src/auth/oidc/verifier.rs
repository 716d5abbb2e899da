//! ID token verification against the provider's JWKS
//!
//! 1. Decode the JWT header (no verification) to extract `kid` and `alg`.
//! 2. Look up the key in the cached JWKS (1 hour; refreshed once on unknown `kid`).
//! 3. Verify signature, `exp` (60 second leeway), `iss` and `aud`.

use std::time::{Duration, Instant};

use jsonwebtoken::{
    Algorithm, DecodingKey, Header, TokenData, Validation,
    jwk::{AlgorithmParameters, JwkSet},
};
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::OidcError;

/// Default JWKS cache lifetime
pub const JWKS_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Claims of a verified ID token
#[derive(Debug, Clone, Deserialize)]
pub struct IdTokenClaims {
    /// Issuer
    pub iss: String,
    /// Subject
    #[serde(default)]
    pub sub: String,
    /// Audience (a single string or an array)
    #[serde(default)]
    pub aud: serde_json::Value,
    /// Expiry (Unix timestamp)
    pub exp: u64,
    /// Issued-at (Unix timestamp)
    #[serde(default)]
    pub iat: Option<u64>,
    /// Nonce bound at authorization time (code grant)
    #[serde(default)]
    pub nonce: Option<String>,
    /// Email
    #[serde(default)]
    pub email: Option<String>,
    /// Preferred username
    #[serde(default)]
    pub preferred_username: Option<String>,
}

struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

/// JWKS for a single issuer
pub struct JwksCache {
    inner: RwLock<Option<CachedJwks>>,
    http: Client,
    jwks_uri: String,
    ttl: Duration,
}

impl JwksCache {
    /// Create an empty cache for `jwks_uri`
    #[must_use]
    pub fn new(http: Client, jwks_uri: String, ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(None),
            http,
            jwks_uri,
            ttl,
        }
    }

    /// Return the cached JWKS, fetching it when stale or when `force_refresh`.
    pub async fn get_or_fetch(&self, force_refresh: bool) -> Result<JwkSet, OidcError> {
        if !force_refresh {
            let cached = {
                let guard = self.inner.read();
                guard
                    .as_ref()
                    .filter(|c| c.fetched_at.elapsed() < self.ttl)
                    .map(|c| c.keys.clone())
            };
            if let Some(keys) = cached {
                return Ok(keys);
            }
        }

        debug!(jwks_uri = %self.jwks_uri, "Fetching JWKS");
        let jwks: JwkSet = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        *self.inner.write() = Some(CachedJwks {
            keys: jwks.clone(),
            fetched_at: Instant::now(),
        });

        Ok(jwks)
    }
}

/// Verifies ID tokens issued for this client
pub struct IdTokenVerifier {
    issuer: String,
    client_id: String,
    jwks: JwksCache,
}

impl IdTokenVerifier {
    /// Bind a verifier to the discovered issuer, client and JWKS
    #[must_use]
    pub fn new(http: Client, issuer: String, client_id: String, jwks_uri: String) -> Self {
        Self {
            issuer,
            client_id,
            jwks: JwksCache::new(http, jwks_uri, JWKS_CACHE_TTL),
        }
    }

    /// Verify signature, issuer, audience and expiry of `token`.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError`] if the token is malformed, signed with an unknown
    /// key, expired, or issued by or for someone else.
    pub async fn verify(&self, token: &str) -> Result<IdTokenClaims, OidcError> {
        let header = jsonwebtoken::decode_header(token)?;
        let kid = header.kid.clone().ok_or(OidcError::MissingKeyId)?;
        let decoding_key = self.find_decoding_key(&kid).await?;

        let mut validation = build_validation(&header);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        // Audience is checked below to accept both string and array forms
        validation.validate_aud = false;

        let token_data: TokenData<IdTokenClaims> =
            jsonwebtoken::decode(token, &decoding_key, &validation)?;
        let claims = token_data.claims;

        check_audience(&claims.aud, &self.client_id)?;

        debug!(sub = %claims.sub, "ID token verified");
        Ok(claims)
    }

    /// Find a decoding key by `kid`, refreshing the JWKS once if not found.
    async fn find_decoding_key(&self, kid: &str) -> Result<DecodingKey, OidcError> {
        let jwks = self.jwks.get_or_fetch(false).await?;
        if let Some(key) = find_key_in_jwks(&jwks, kid) {
            return Ok(key);
        }

        debug!(kid = %kid, "Key not found in cached JWKS, refreshing");
        let jwks = self.jwks.get_or_fetch(true).await?;
        find_key_in_jwks(&jwks, kid).ok_or_else(|| OidcError::UnknownKeyId(kid.to_string()))
    }
}

/// Find a JWK by `kid` and convert it to a `DecodingKey`.
fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    let jwk = jwks
        .keys
        .iter()
        .find(|jwk| jwk.common.key_id.as_deref() == Some(kid))?;

    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
        AlgorithmParameters::EllipticCurve(ec) => {
            DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
        }
        AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
    }
}

/// Build a [`Validation`] from the JWT header algorithm.
fn build_validation(header: &Header) -> Validation {
    let alg = match header.alg {
        Algorithm::RS256 => Algorithm::RS256,
        Algorithm::RS384 => Algorithm::RS384,
        Algorithm::RS512 => Algorithm::RS512,
        Algorithm::ES256 => Algorithm::ES256,
        Algorithm::ES384 => Algorithm::ES384,
        other => {
            warn!(alg = ?other, "Unsupported ID token algorithm, defaulting to RS256");
            Algorithm::RS256
        }
    };

    let mut v = Validation::new(alg);
    v.leeway = 60;
    v
}

/// The `aud` claim must name this client.
fn check_audience(aud_claim: &serde_json::Value, client_id: &str) -> Result<(), OidcError> {
    let matches = match aud_claim {
        serde_json::Value::String(s) => s == client_id,
        serde_json::Value::Array(arr) => arr.iter().any(|v| v.as_str() == Some(client_id)),
        _ => false,
    };

    if matches {
        Ok(())
    } else {
        Err(OidcError::Jwt(jsonwebtoken::errors::Error::from(
            jsonwebtoken::errors::ErrorKind::InvalidAudience,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_audience_accepts_string_match() {
        assert!(check_audience(&serde_json::json!("registry"), "registry").is_ok());
    }

    #[test]
    fn check_audience_accepts_array_member_match() {
        let aud = serde_json::json!(["account", "registry"]);
        assert!(check_audience(&aud, "registry").is_ok());
    }

    #[test]
    fn check_audience_rejects_no_match() {
        assert!(check_audience(&serde_json::json!("other"), "registry").is_err());
        assert!(check_audience(&serde_json::json!([]), "registry").is_err());
        assert!(check_audience(&serde_json::Value::Null, "registry").is_err());
    }

    #[test]
    fn build_validation_keeps_supported_algorithms() {
        let header = Header::new(Algorithm::ES256);
        let validation = build_validation(&header);
        assert_eq!(validation.algorithms, vec![Algorithm::ES256]);
        assert_eq!(validation.leeway, 60);
    }

    #[test]
    fn build_validation_rejects_symmetric_algorithms() {
        let header = Header::new(Algorithm::HS256);
        assert_eq!(build_validation(&header).algorithms, vec![Algorithm::RS256]);
    }

    #[test]
    fn find_key_in_jwks_matches_kid() {
        let jwks: JwkSet = serde_json::from_value(serde_json::json!({
            "keys": [{
                "kty": "EC",
                "crv": "P-256",
                "kid": "k1",
                "x": "MqO1xt558KuBG6n2JTDt031UQxj_3pHinA0hxBY-NtA",
                "y": "HAdBQTVjduCBGmMTLCjazAt4RfbDPq45Ov2tbX5b2xk"
            }]
        }))
        .unwrap();

        assert!(find_key_in_jwks(&jwks, "k1").is_some());
        assert!(find_key_in_jwks(&jwks, "k2").is_none());
    }

    #[tokio::test]
    async fn verify_rejects_token_without_kid() {
        let verifier = IdTokenVerifier::new(
            Client::new(),
            "https://idp.example.com".to_string(),
            "registry".to_string(),
            "http://127.0.0.1:1/jwks".to_string(),
        );
        let token = format!(
            "{}.{}.sig",
            base64::Engine::encode(
                &base64::engine::general_purpose::URL_SAFE_NO_PAD,
                br#"{"alg":"ES256","typ":"JWT"}"#
            ),
            base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, b"{}")
        );

        assert!(matches!(
            verifier.verify(&token).await,
            Err(OidcError::MissingKeyId)
        ));
    }
}
