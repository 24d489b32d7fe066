//! Minimal SigV4 signing for `x-amz-json-1.1` POST requests.
//!
//! Only what the SSM calls need: POST to `/`, empty query string, a fixed
//! small header set. Credentials come from the standard environment variables.

use std::env;
use std::fmt::Write as _;

use ring::hmac;
use sha2::Digest;
use sha2::Sha256;
use time::OffsetDateTime;

use crate::session_control::SessionControlError;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

pub(crate) struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub(crate) fn from_env() -> Result<Self, SessionControlError> {
        let access_key_id = require_var("AWS_ACCESS_KEY_ID")?;
        let secret_access_key = require_var("AWS_SECRET_ACCESS_KEY")?;
        let session_token = env::var("AWS_SESSION_TOKEN")
            .ok()
            .filter(|token| !token.is_empty());
        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

fn require_var(name: &str) -> Result<String, SessionControlError> {
    env::var(name)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| SessionControlError::Credentials {
            reason: format!("{name} is not set"),
        })
}

pub(crate) struct SignedHeaders {
    pub authorization: String,
    pub amz_date: String,
}

pub(crate) fn sign(
    credentials: &Credentials,
    region: &str,
    service: &str,
    host: &str,
    target: &str,
    content_type: &str,
    payload: &[u8],
    at: OffsetDateTime,
) -> SignedHeaders {
    let amz_date = format_amz_date(at);
    let date = &amz_date[..8];
    let payload_hash = hex(&Sha256::digest(payload));

    let mut headers: Vec<(String, String)> = vec![
        ("content-type".to_string(), content_type.to_string()),
        ("host".to_string(), host.to_string()),
        ("x-amz-date".to_string(), amz_date.clone()),
        ("x-amz-target".to_string(), target.to_string()),
    ];
    if let Some(token) = &credentials.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    // Canonical form requires lexicographic header order.
    headers.sort();

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();
    let signed_header_names = headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request =
        format!("POST\n/\n\n{canonical_headers}\n{signed_header_names}\n{payload_hash}");
    let scope = format!("{date}/{region}/{service}/aws4_request");
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex(&Sha256::digest(canonical_request.as_bytes()))
    );

    let signing_key = derive_signing_key(&credentials.secret_access_key, date, region, service);
    let signature = hex(hmac_sha256(signing_key.as_ref(), string_to_sign.as_bytes()).as_ref());

    let authorization = format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_header_names}, Signature={signature}",
        credentials.access_key_id
    );

    SignedHeaders {
        authorization,
        amz_date,
    }
}

fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> hmac::Tag {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(k_date.as_ref(), region.as_bytes());
    let k_service = hmac_sha256(k_region.as_ref(), service.as_bytes());
    hmac_sha256(k_service.as_ref(), b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> hmac::Tag {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, data)
}

fn format_amz_date(at: OffsetDateTime) -> String {
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}Z",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    )
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
