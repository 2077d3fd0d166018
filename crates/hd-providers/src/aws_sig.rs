//! AWS Signature Version 4
//!
//! Canonical request -> string-to-sign -> derived signing key
//! (AWS4+secret -> date -> region -> service -> "aws4_request") -> hex
//! signature, per the AWS SigV4 specification. Shared by the SES email
//! provider and the Amazon Translate adapter.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub struct SigV4Params<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub region: &'a str,
    pub service: &'a str,
    pub host: &'a str,
    pub method: &'a str,
    pub path: &'a str,
    pub query: &'a str,
    pub body: &'a [u8],
    pub content_type: &'a str,
    /// Extra signed headers as (lowercase-name, value), already sorted.
    pub extra_headers: &'a [(&'a str, &'a str)],
}

pub struct SignedRequest {
    pub authorization: String,
    pub amz_date: String,
    pub content_sha256: String,
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// The derived signing key chain:
/// HMAC("AWS4" + secret, date) -> region -> service -> "aws4_request".
fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    hmac(&k_service, b"aws4_request")
}

/// Sign a request at the given instant. The caller attaches `authorization`,
/// `x-amz-date` and any extra headers it declared.
pub fn sign(params: &SigV4Params<'_>, at: DateTime<Utc>) -> SignedRequest {
    let amz_date = at.format("%Y%m%dT%H%M%SZ").to_string();
    let date = at.format("%Y%m%d").to_string();
    let content_sha256 = sha256_hex(params.body);

    // Canonical headers: content-type, host, x-amz-date plus extras, all
    // lowercase, sorted by name.
    let mut headers: Vec<(String, String)> = vec![
        ("content-type".to_string(), params.content_type.to_string()),
        ("host".to_string(), params.host.to_string()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    for (name, value) in params.extra_headers {
        headers.push((name.to_string(), value.to_string()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
        .collect();
    let signed_headers: String = headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        params.method, params.path, params.query, canonical_headers, signed_headers, content_sha256
    );

    let credential_scope = format!(
        "{}/{}/{}/aws4_request",
        date, params.region, params.service
    );
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        sha256_hex(canonical_request.as_bytes())
    );

    let key = signing_key(params.secret_access_key, &date, params.region, params.service);
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        params.access_key_id, credential_scope, signed_headers, signature
    );

    SignedRequest {
        authorization,
        amz_date,
        content_sha256,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn params<'a>(body: &'a [u8]) -> SigV4Params<'a> {
        SigV4Params {
            access_key_id: "AKIDEXAMPLE",
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            region: "us-east-1",
            service: "email",
            host: "email.us-east-1.amazonaws.com",
            method: "POST",
            path: "/",
            query: "",
            body,
            content_type: "application/x-www-form-urlencoded",
            extra_headers: &[],
        }
    }

    #[test]
    fn test_signature_is_deterministic() {
        let at = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let a = sign(&params(b"Action=SendEmail"), at);
        let b = sign(&params(b"Action=SendEmail"), at);
        assert_eq!(a.authorization, b.authorization);
        assert_eq!(a.amz_date, "20260801T120000Z");
    }

    #[test]
    fn test_signature_changes_with_body() {
        let at = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let a = sign(&params(b"Action=SendEmail"), at);
        let b = sign(&params(b"Action=SendRawEmail"), at);
        assert_ne!(a.authorization, b.authorization);
        assert_ne!(a.content_sha256, b.content_sha256);
    }

    #[test]
    fn test_authorization_shape() {
        let at = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let signed = sign(&params(b""), at);
        assert!(signed.authorization.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20260801/us-east-1/email/aws4_request"));
        assert!(signed.authorization.contains("SignedHeaders=content-type;host;x-amz-date"));
        let signature = signed.authorization.rsplit("Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_empty_body_hash_is_known_constant() {
        let at = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        let signed = sign(&params(b""), at);
        assert_eq!(
            signed.content_sha256,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
