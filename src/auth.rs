//! Admin authentication: password hashing, signed session cookies, flash
//! messages and the extractor that guards admin routes.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::COOKIE;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Redirect, Response};
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, info};

use crate::db::Database;
use crate::routes::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "mzansi_session";
pub const FLASH_COOKIE: &str = "mzansi_flash";
pub const SESSION_DAYS: i64 = 7;
pub const DEFAULT_ITERATIONS: u32 = 100_000;
const HASH_SCHEME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;
const FLASH_SECONDS: i64 = 60;

#[derive(Debug, Error, PartialEq)]
pub enum AuthError {
    #[error("malformed password hash")]
    MalformedHash,
    #[error("invalid session")]
    InvalidSession,
    #[error("session expired")]
    Expired,
    #[error("invalid key length")]
    InvalidKey,
}

impl From<hmac::digest::InvalidLength> for AuthError {
    fn from(_: hmac::digest::InvalidLength) -> Self {
        AuthError::InvalidKey
    }
}

fn pbkdf2_sha256(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    pbkdf2::pbkdf2_hmac_array::<Sha256, 32>(password, salt, iterations)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    hash_password_with(password, DEFAULT_ITERATIONS)
}

/// Encoded as `pbkdf2-sha256$<iterations>$<salt hex>$<hash hex>`.
pub fn hash_password_with(password: &str, iterations: u32) -> Result<String, AuthError> {
    let salt: [u8; SALT_LEN] = rand::thread_rng().gen();
    let hash = pbkdf2_sha256(password.as_bytes(), &salt, iterations.max(1));
    Ok(format!(
        "{}${}${}${}",
        HASH_SCHEME,
        iterations.max(1),
        hex::encode(salt),
        hex::encode(hash)
    ))
}

pub fn verify_password(password: &str, encoded: &str) -> Result<bool, AuthError> {
    let parts: Vec<&str> = encoded.split('$').collect();
    let [scheme, iterations, salt, expected] = parts[..] else {
        return Err(AuthError::MalformedHash);
    };
    if scheme != HASH_SCHEME {
        return Err(AuthError::MalformedHash);
    }
    let iterations: u32 = iterations.parse().map_err(|_| AuthError::MalformedHash)?;
    if iterations == 0 {
        return Err(AuthError::MalformedHash);
    }
    let salt = hex::decode(salt).map_err(|_| AuthError::MalformedHash)?;
    let expected = hex::decode(expected).map_err(|_| AuthError::MalformedHash)?;

    let actual = pbkdf2_sha256(password.as_bytes(), &salt, iterations);
    Ok(constant_time_eq(&actual, &expected))
}

/// Create the configured admin account unless it already exists.
pub async fn ensure_admin(db: &Database, username: &str, password: &str) -> anyhow::Result<bool> {
    if db.get_user_by_username(username).await?.is_some() {
        return Ok(false);
    }
    let created = db.ensure_user(username, &hash_password(password)?).await?;
    if created {
        info!("Created admin user '{}'", username);
    }
    Ok(created)
}

/// Signs and checks `user_id.expires.signature` session cookies.
#[derive(Clone)]
pub struct SessionKeys {
    key: Vec<u8>,
}

impl SessionKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            key: secret.as_bytes().to_vec(),
        }
    }

    fn mac(&self, payload: &str) -> Result<HmacSha256, AuthError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }

    pub fn sign(&self, user_id: i64, expires: DateTime<Utc>) -> Result<String, AuthError> {
        let payload = format!("{}.{}", user_id, expires.timestamp());
        let signature = hex::encode(self.mac(&payload)?.finalize().into_bytes());
        Ok(format!("{}.{}", payload, signature))
    }

    /// The user id carried by a valid, unexpired cookie.
    pub fn verify(&self, cookie: &str, now: DateTime<Utc>) -> Result<i64, AuthError> {
        let mut parts = cookie.splitn(3, '.');
        let (Some(user_id), Some(expires), Some(signature)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::InvalidSession);
        };

        let payload = format!("{}.{}", user_id, expires);
        let signature = hex::decode(signature).map_err(|_| AuthError::InvalidSession)?;
        self.mac(&payload)?
            .verify_slice(&signature)
            .map_err(|_| AuthError::InvalidSession)?;

        let expires: i64 = expires.parse().map_err(|_| AuthError::InvalidSession)?;
        let expires = Utc
            .timestamp_opt(expires, 0)
            .single()
            .ok_or(AuthError::InvalidSession)?;
        if expires <= now {
            return Err(AuthError::Expired);
        }
        user_id.parse().map_err(|_| AuthError::InvalidSession)
    }

    pub fn session_cookie(&self, user_id: i64, now: DateTime<Utc>) -> Result<String, AuthError> {
        let value = self.sign(user_id, now + Duration::days(SESSION_DAYS))?;
        Ok(format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            SESSION_COOKIE,
            value,
            Duration::days(SESSION_DAYS).num_seconds()
        ))
    }
}

/// Value of the named cookie across every `Cookie` header.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

pub fn clear_cookie(name: &str) -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", name)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Flash {
    pub kind: String,
    pub message: String,
}

impl Flash {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: "success".to_string(),
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: "error".to_string(),
            message: message.into(),
        }
    }

    pub fn to_cookie(&self) -> String {
        format!(
            "{}={}|{}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            FLASH_COOKIE,
            self.kind,
            urlencoding::encode(&self.message),
            FLASH_SECONDS
        )
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let raw = cookie_value(headers, FLASH_COOKIE)?;
        let (kind, message) = raw.split_once('|')?;
        let message = urlencoding::decode(message).ok()?.into_owned();
        Some(Self {
            kind: kind.to_string(),
            message,
        })
    }
}

/// A logged-in admin. Requests without a valid session are redirected to
/// the login page.
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub id: i64,
    pub username: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let login = || Redirect::to("/admin/login").into_response();

        let cookie = cookie_value(&parts.headers, SESSION_COOKIE).ok_or_else(login)?;
        let user_id = state.sessions.verify(&cookie, Utc::now()).map_err(|e| {
            debug!("Rejected session: {}", e);
            login()
        })?;

        match state.db.get_user(user_id).await {
            Ok(Some(user)) => Ok(AdminUser {
                id: user.id,
                username: user.username,
            }),
            _ => Err(login()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    mod password_tests {
        use super::*;

        #[test]
        fn test_pbkdf2_known_vectors() {
            let one = pbkdf2_sha256(b"password", b"salt", 1);
            assert_eq!(
                hex::encode(one),
                "120fb6cffcf8b32c43e7225256c4f837a86548c92ccc35480805987cb70be17b"
            );
            let two = pbkdf2_sha256(b"password", b"salt", 2);
            assert_eq!(
                hex::encode(two),
                "ae4d0c95af6b46d32d0adff928f06dd02a303f8ef3c251dfd6e2d85a95474c43"
            );
        }

        #[test]
        fn test_hash_and_verify() {
            let encoded = hash_password_with("admin123", 1_000).unwrap();
            assert!(encoded.starts_with("pbkdf2-sha256$1000$"));
            assert!(verify_password("admin123", &encoded).unwrap());
            assert!(!verify_password("admin124", &encoded).unwrap());
        }

        #[test]
        fn test_salts_differ() {
            let a = hash_password_with("same", 10).unwrap();
            let b = hash_password_with("same", 10).unwrap();
            assert_ne!(a, b);
        }

        #[test]
        fn test_malformed_hashes() {
            for bad in [
                "",
                "plaintext",
                "md5$1$00$00",
                "pbkdf2-sha256$abc$00$00",
                "pbkdf2-sha256$0$00$00",
                "pbkdf2-sha256$10$zz$00",
                "pbkdf2-sha256$10$00",
            ] {
                assert_eq!(verify_password("x", bad), Err(AuthError::MalformedHash), "{}", bad);
            }
        }
    }

    mod session_tests {
        use super::*;

        fn now() -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
        }

        #[test]
        fn test_sign_and_verify() {
            let keys = SessionKeys::new("secret");
            let cookie = keys.sign(42, now() + Duration::days(7)).unwrap();
            assert_eq!(keys.verify(&cookie, now()), Ok(42));
        }

        #[test]
        fn test_expired_session() {
            let keys = SessionKeys::new("secret");
            let cookie = keys.sign(42, now()).unwrap();
            assert_eq!(keys.verify(&cookie, now()), Err(AuthError::Expired));
        }

        #[test]
        fn test_tampered_session() {
            let keys = SessionKeys::new("secret");
            let cookie = keys.sign(42, now() + Duration::days(7)).unwrap();
            let tampered = cookie.replacen("42", "1", 1);
            assert_eq!(keys.verify(&tampered, now()), Err(AuthError::InvalidSession));
        }

        #[test]
        fn test_wrong_key() {
            let cookie = SessionKeys::new("one")
                .sign(42, now() + Duration::days(7))
                .unwrap();
            let result = SessionKeys::new("two").verify(&cookie, now());
            assert_eq!(result, Err(AuthError::InvalidSession));
        }

        #[test]
        fn test_garbage_session() {
            let keys = SessionKeys::new("secret");
            assert_eq!(keys.verify("garbage", now()), Err(AuthError::InvalidSession));
            assert_eq!(keys.verify("1.2.zz", now()), Err(AuthError::InvalidSession));
        }

        #[test]
        fn test_session_cookie_header() {
            let keys = SessionKeys::new("secret");
            let header = keys.session_cookie(7, now()).unwrap();
            assert!(header.starts_with("mzansi_session=7."));
            assert!(header.contains("HttpOnly"));
            assert!(header.ends_with("Max-Age=604800"));
        }
    }

    mod cookie_tests {
        use super::*;

        #[test]
        fn test_cookie_value() {
            let mut headers = HeaderMap::new();
            headers.insert(COOKIE, HeaderValue::from_static("a=1; mzansi_session=abc.def; b=2"));
            assert_eq!(cookie_value(&headers, SESSION_COOKIE).as_deref(), Some("abc.def"));
            assert_eq!(cookie_value(&headers, "b").as_deref(), Some("2"));
            assert!(cookie_value(&headers, "missing").is_none());
        }

        #[test]
        fn test_flash_round_trip_through_header() {
            let flash = Flash::success("Saved post: \"Budget; 2024\"");
            let set_cookie = flash.to_cookie();
            let pair = set_cookie.split(';').next().unwrap();

            let mut headers = HeaderMap::new();
            headers.insert(COOKIE, HeaderValue::from_str(pair).unwrap());
            assert_eq!(Flash::from_headers(&headers), Some(flash));
        }

        #[test]
        fn test_clear_cookie() {
            assert_eq!(
                clear_cookie(FLASH_COOKIE),
                "mzansi_flash=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"
            );
        }
    }
}
