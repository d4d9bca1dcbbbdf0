//! Loads and refreshes Google OAuth credentials stored on `connections`.
//! Adapted from the teacher's `TokenManager`: same proxy-refresh shape
//! (`{proxy_base}/{provider}/refresh`) and encrypt-before-store discipline,
//! narrowed to a single provider and re-homed onto `connections` rather than
//! a generic `sources` table. Implements `calendar_client::RefreshCapability`
//! so it plugs directly into `GoogleCalendarClient`.
//!
//! The teacher's encryption lived in its own `TokenEncryptor` type, public
//! and shaped to encrypt arbitrary per-field tokens one at a time (it had
//! `encrypt_optional`/`decrypt_optional` helpers for that). This store only
//! ever seals one JSON blob per connection, so the AES-256-GCM logic is kept
//! here as a private `seal`/`open` pair on `ConnectionCredentialStore`
//! itself rather than as a separate pluggable type.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::calendar_client::{Credentials, RefreshCapability};
use crate::error::{Error, Result};

const NONCE_LEN: usize = 12;

#[derive(Debug, Deserialize)]
struct TokenRefreshResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

/// Credentials as persisted in `connections.encrypted_credentials`: a single
/// encrypted JSON blob rather than separate encrypted columns, so refresh
/// can update it with one write.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoredCredentials {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct OAuthProxyConfig {
    pub base_url: String,
    pub provider: String,
}

impl Default for OAuthProxyConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("OAUTH_PROXY_URL").unwrap_or_else(|_| "https://oauth-proxy.internal".to_string()),
            provider: "google".to_string(),
        }
    }
}

struct CipherKey(LessSafeKey);

#[derive(Clone)]
pub struct ConnectionCredentialStore {
    db: PgPool,
    client: Client,
    proxy_config: OAuthProxyConfig,
    key: Arc<CipherKey>,
    rng: Arc<SystemRandom>,
}

impl ConnectionCredentialStore {
    /// `key_b64` must be a 32-byte AES-256 key, base64-encoded (e.g.
    /// `openssl rand -base64 32`).
    pub fn new(db: PgPool, key_b64: &str) -> Result<Self> {
        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(key_b64)
            .map_err(|e| Error::internal(format!("invalid base64 encryption key: {e}")))?;
        if key_bytes.len() != 32 {
            return Err(Error::internal(format!("encryption key must be 32 bytes, got {}", key_bytes.len())));
        }
        let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes)
            .map_err(|_| Error::internal("failed to construct AES-256-GCM key".to_string()))?;

        Ok(Self {
            db,
            client: Client::new(),
            proxy_config: OAuthProxyConfig::default(),
            key: Arc::new(CipherKey(LessSafeKey::new(unbound))),
            rng: Arc::new(SystemRandom::new()),
        })
    }

    /// Seals `plaintext` as base64(nonce || ciphertext || tag).
    fn seal(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng.fill(&mut nonce_bytes).map_err(|_| Error::internal("failed to generate nonce".to_string()))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.as_bytes().to_vec();
        in_out.reserve(AES_256_GCM.tag_len());
        self.key.0.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out).map_err(|_| Error::internal("credential encryption failed".to_string()))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&in_out);
        Ok(base64::engine::general_purpose::STANDARD.encode(sealed))
    }

    /// Reverses `seal`.
    fn open(&self, sealed_b64: &str) -> Result<String> {
        let sealed = base64::engine::general_purpose::STANDARD
            .decode(sealed_b64)
            .map_err(|e| Error::internal(format!("invalid base64 ciphertext: {e}")))?;
        if sealed.len() < NONCE_LEN {
            return Err(Error::internal("ciphertext shorter than a nonce".to_string()));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let mut nonce_array = [0u8; NONCE_LEN];
        nonce_array.copy_from_slice(nonce_bytes);
        let nonce = Nonce::assume_unique_for_key(nonce_array);

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .0
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| Error::internal("credential decryption failed or data tampered".to_string()))?;
        String::from_utf8(plaintext.to_vec()).map_err(|e| Error::internal(format!("decrypted credentials were not valid UTF-8: {e}")))
    }

    pub async fn load(&self, connection_id: Uuid) -> Result<Credentials> {
        let (encrypted,): (String,) = sqlx::query_as("SELECT encrypted_credentials FROM connections WHERE id = $1")
            .bind(connection_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| Error::NotFound(format!("connection {connection_id}")))?;

        let plaintext = self.open(&encrypted)?;
        let stored: StoredCredentials = serde_json::from_str(&plaintext)?;

        if stored.expires_at.map(|exp| exp <= Utc::now() + Duration::minutes(5)).unwrap_or(false) {
            let refreshed = self.refresh(&Credentials { access_token: stored.access_token, refresh_token: stored.refresh_token }).await?;
            self.save(connection_id, &refreshed, None).await?;
            return Ok(refreshed);
        }

        Ok(Credentials { access_token: stored.access_token, refresh_token: stored.refresh_token })
    }

    async fn save(&self, connection_id: Uuid, creds: &Credentials, expires_at: Option<DateTime<Utc>>) -> Result<()> {
        let stored = StoredCredentials {
            access_token: creds.access_token.clone(),
            refresh_token: creds.refresh_token.clone(),
            expires_at,
        };
        let plaintext = serde_json::to_string(&stored)?;
        let encrypted = self.seal(&plaintext)?;

        sqlx::query("UPDATE connections SET encrypted_credentials = $2 WHERE id = $1")
            .bind(connection_id)
            .bind(encrypted)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn store_initial(&self, connection_id: Uuid, creds: &Credentials, expires_in: Option<i64>) -> Result<()> {
        let expires_at = expires_in.map(|seconds| Utc::now() + Duration::seconds(seconds));
        self.save(connection_id, creds, expires_at).await
    }
}

#[async_trait]
impl RefreshCapability for ConnectionCredentialStore {
    async fn refresh(&self, creds: &Credentials) -> Result<Credentials> {
        let refresh_token = creds
            .refresh_token
            .as_ref()
            .ok_or_else(|| Error::NeedsReauth("no refresh token on file".to_string()))?;

        let refresh_url = format!("{}/{}/refresh", self.proxy_config.base_url, self.proxy_config.provider);
        let response = self
            .client
            .post(&refresh_url)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        if response.status().as_u16() == 401 {
            return Err(Error::NeedsReauth("refresh token rejected by provider".to_string()));
        }
        if !response.status().is_success() {
            return Err(Error::ExternalUnavailable(format!("token refresh failed: {}", response.status())));
        }

        let refreshed: TokenRefreshResponse = response.json().await?;
        Ok(Credentials {
            access_token: refreshed.access_token,
            refresh_token: refreshed.refresh_token.or_else(|| creds.refresh_token.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key_b64() -> String {
        base64::engine::general_purpose::STANDARD.encode(b"12345678901234567890123456789012")
    }

    fn lazy_pool() -> PgPool {
        sqlx::postgres::PgPoolOptions::new().connect_lazy("postgres://localhost/test").unwrap()
    }

    fn store_with_pool(pool: PgPool) -> ConnectionCredentialStore {
        ConnectionCredentialStore::new(pool, &test_key_b64()).unwrap()
    }

    #[tokio::test]
    async fn rejects_a_key_that_is_not_32_bytes() {
        let short_key = base64::engine::general_purpose::STANDARD.encode(b"too-short");
        assert!(ConnectionCredentialStore::new(lazy_pool(), &short_key).is_err());
    }

    #[tokio::test]
    async fn seal_then_open_round_trips() {
        let store = store_with_pool(lazy_pool());
        let sealed = store.seal("ya29.a0AfH6SMB...secret...").unwrap();
        assert_ne!(sealed, "ya29.a0AfH6SMB...secret...");
        assert_eq!(store.open(&sealed).unwrap(), "ya29.a0AfH6SMB...secret...");
    }

    #[tokio::test]
    async fn tampered_ciphertext_fails_to_open() {
        let store = store_with_pool(lazy_pool());
        let mut sealed = store.seal("secret_token").unwrap();
        sealed.push('X');
        assert!(store.open(&sealed).is_err());
    }

    #[test]
    fn stored_credentials_round_trip_through_json() {
        let stored = StoredCredentials { access_token: "a".into(), refresh_token: Some("r".into()), expires_at: None };
        let json = serde_json::to_string(&stored).unwrap();
        let back: StoredCredentials = serde_json::from_str(&json).unwrap();
        assert_eq!(back.access_token, "a");
    }
}
