//! Request signing shared by the S3 (SigV4) and OSS (V4) backends.
//!
//! Both services derive a signing key by chaining HMAC-SHA256 over date, region,
//! service and a terminator, and sign a canonical request; they differ only in the
//! names plugged into that recipe.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy)]
pub struct Scheme {
    pub algorithm: &'static str,
    pub key_prefix: &'static str,
    pub service: &'static str,
    pub terminator: &'static str,
}

pub const AWS_V4: Scheme = Scheme {
    algorithm: "AWS4-HMAC-SHA256",
    key_prefix: "AWS4",
    service: "s3",
    terminator: "aws4_request",
};

pub const OSS_V4: Scheme = Scheme {
    algorithm: "OSS4-HMAC-SHA256",
    key_prefix: "aliyun_v4",
    service: "oss",
    terminator: "aliyun_v4_request",
};

impl Scheme {
    pub fn with_service(self, service: &'static str) -> Self {
        Self { service, ..self }
    }

    pub fn scope(&self, date: &str, region: &str) -> String {
        format!("{}/{}/{}/{}", date, region, self.service, self.terminator)
    }

    pub fn signing_key(&self, secret: &str, date: &str, region: &str) -> Vec<u8> {
        let k_date = hmac(format!("{}{}", self.key_prefix, secret).as_bytes(), date.as_bytes());
        let k_region = hmac(&k_date, region.as_bytes());
        let k_service = hmac(&k_region, self.service.as_bytes());
        hmac(&k_service, self.terminator.as_bytes())
    }

    pub fn string_to_sign(&self, timestamp: &str, scope: &str, canonical_request: &str) -> String {
        format!(
            "{}\n{}\n{}\n{}",
            self.algorithm,
            timestamp,
            scope,
            sha256_hex(canonical_request.as_bytes())
        )
    }
}

/// Everything that goes into one signature.
#[derive(Debug)]
pub struct CanonicalRequest<'a> {
    pub method: &'a str,
    pub uri: &'a str,
    pub query: &'a str,
    /// Lower-case header names mapped to trimmed values.
    pub headers: &'a BTreeMap<String, String>,
    /// The line after the header block: `SignedHeaders` for S3, `AdditionalHeaders` for OSS.
    pub header_list: &'a str,
    pub payload_hash: &'a str,
}

impl CanonicalRequest<'_> {
    pub fn render(&self) -> String {
        let headers: String = self
            .headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
            .collect();
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method, self.uri, self.query, headers, self.header_list, self.payload_hash
        )
    }

    /// Hex signature of this request under `scheme`.
    pub fn sign(
        &self,
        scheme: &Scheme,
        secret: &str,
        region: &str,
        now: DateTime<Utc>,
    ) -> Signature {
        let date = now.format("%Y%m%d").to_string();
        let timestamp = amz_timestamp(now);
        let scope = scheme.scope(&date, region);
        let string_to_sign = scheme.string_to_sign(&timestamp, &scope, &self.render());
        let key = scheme.signing_key(secret, &date, region);
        Signature {
            scope,
            value: hex::encode(hmac(&key, string_to_sign.as_bytes())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub scope: String,
    pub value: String,
}

pub fn amz_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Percent-encodes a path, keeping RFC 3986 unreserved characters and `/`.
pub fn uri_encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
