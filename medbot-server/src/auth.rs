//! Doctor credentials: password hashing and login tokens.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

const SCHEME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("signing secret is not configured")]
    MissingSecret,

    #[error("malformed password hash")]
    MalformedHash,

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// Hash-before-store, compare-on-login. Implementations are CPU bound; call them off the
/// async runtime.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, CredentialError>;
    fn verify(&self, password: &str, hash: &str) -> Result<bool, CredentialError>;
}

/// PBKDF2-HMAC-SHA256 with a random per-password salt, encoded as
/// `pbkdf2-sha256$<rounds>$<salt hex>$<key hex>`.
#[derive(Debug, Clone)]
pub struct Pbkdf2Hasher {
    rounds: u32,
}

impl Pbkdf2Hasher {
    pub fn new(rounds: u32) -> Self {
        Self {
            rounds: rounds.max(1),
        }
    }

    fn derive(password: &str, salt: &[u8], rounds: u32) -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, rounds, &mut key);
        key
    }
}

impl PasswordHasher for Pbkdf2Hasher {
    fn hash(&self, password: &str) -> Result<String, CredentialError> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let key = Self::derive(password, &salt, self.rounds);
        Ok(format!(
            "{SCHEME}${}${}${}",
            self.rounds,
            hex::encode(salt),
            hex::encode(key)
        ))
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool, CredentialError> {
        let mut parts = hash.split('$');
        let (Some(SCHEME), Some(rounds), Some(salt), Some(expected), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(CredentialError::MalformedHash);
        };

        let rounds: u32 = rounds.parse().map_err(|_| CredentialError::MalformedHash)?;
        let salt = hex::decode(salt).map_err(|_| CredentialError::MalformedHash)?;
        let expected = hex::decode(expected).map_err(|_| CredentialError::MalformedHash)?;

        let key = Self::derive(password, &salt, rounds);
        Ok(key.as_slice().ct_eq(expected.as_slice()).into())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Doctor id.
    pub id: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues HS256 tokens with a fixed one-hour validity.
#[derive(Clone)]
pub struct TokenIssuer {
    secret: Option<String>,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret,
            ttl: Duration::hours(1),
        }
    }

    fn secret(&self) -> Result<&[u8], CredentialError> {
        self.secret
            .as_deref()
            .map(str::as_bytes)
            .ok_or(CredentialError::MissingSecret)
    }

    pub fn issue(&self, doctor_id: &str) -> Result<String, CredentialError> {
        let now = Utc::now();
        let claims = TokenClaims {
            id: doctor_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret()?),
        )?;
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> Result<TokenClaims, CredentialError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        let data = decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(self.secret()?),
            &validation,
        )?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_never_contains_the_password() {
        let hasher = Pbkdf2Hasher::new(1_000);
        let hash = hasher.hash("hunter2").unwrap();

        assert!(hash.starts_with("pbkdf2-sha256$1000$"));
        assert!(!hash.contains("hunter2"));
        assert!(hasher.verify("hunter2", &hash).unwrap());
        assert!(!hasher.verify("hunter3", &hash).unwrap());
    }

    #[test]
    fn salts_differ_between_hashes() {
        let hasher = Pbkdf2Hasher::new(1_000);
        assert_ne!(hasher.hash("same").unwrap(), hasher.hash("same").unwrap());
    }

    #[test]
    fn verify_uses_the_stored_rounds() {
        let hash = Pbkdf2Hasher::new(500).hash("pw").unwrap();
        assert!(Pbkdf2Hasher::new(2_000).verify("pw", &hash).unwrap());
    }

    #[test]
    fn malformed_hash_is_an_error() {
        let hasher = Pbkdf2Hasher::new(1_000);
        assert!(matches!(
            hasher.verify("pw", "plaintext"),
            Err(CredentialError::MalformedHash)
        ));
        assert!(matches!(
            hasher.verify("pw", "pbkdf2-sha256$10$zz$00"),
            Err(CredentialError::MalformedHash)
        ));
    }

    #[test]
    fn token_round_trips_the_doctor_id() {
        let issuer = TokenIssuer::new(Some("test-secret".to_string()));
        let token = issuer.issue("doctor-42").unwrap();
        let claims = issuer.verify(&token).unwrap();

        assert_eq!(claims.id, "doctor-42");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn token_from_another_secret_is_rejected() {
        let token = TokenIssuer::new(Some("one".to_string()))
            .issue("doctor-42")
            .unwrap();
        let other = TokenIssuer::new(Some("two".to_string()));
        assert!(matches!(other.verify(&token), Err(CredentialError::Jwt(_))));
    }

    #[test]
    fn missing_secret_fails_issuance() {
        let issuer = TokenIssuer::new(None);
        assert!(matches!(
            issuer.issue("doctor-42"),
            Err(CredentialError::MissingSecret)
        ));
    }
}
