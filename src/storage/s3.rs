use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use reqwest::Url;
use std::collections::BTreeMap;

use super::signing::{AWS_V4, CanonicalRequest, amz_timestamp, sha256_hex, uri_encode_path};
use super::{Storage, StoredObject, check_response, http_client};
use crate::config::S3Config;

/// Amazon S3 or any S3-compatible service, addressed path-style when `endpoint` is set.
#[derive(Debug)]
pub struct S3Storage {
    conf: S3Config,
    client: reqwest::Client,
}

impl S3Storage {
    pub fn new(conf: S3Config) -> Result<Self> {
        Ok(Self {
            conf,
            client: http_client()?,
        })
    }

    fn object_url(&self, key: &str) -> String {
        let key = uri_encode_path(key.trim_start_matches('/'));
        match &self.conf.endpoint {
            Some(endpoint) if !endpoint.is_empty() => format!(
                "{}/{}/{}",
                endpoint.trim_end_matches('/'),
                self.conf.bucket,
                key
            ),
            _ => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.conf.bucket, self.conf.region, key
            ),
        }
    }

    async fn send(
        &self,
        method: reqwest::Method,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<reqwest::Response> {
        let url = self.object_url(key);
        let parsed = Url::parse(&url).context(format!("invalid object url {}", url))?;
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => anyhow::bail!("object url {} has no host", url),
        };

        let now = Utc::now();
        let payload_hash = sha256_hex(&body);
        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), host);
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
        headers.insert("x-amz-date".to_string(), amz_timestamp(now));
        if method == reqwest::Method::PUT {
            headers.insert("x-amz-acl".to_string(), "public-read".to_string());
        }
        if let Some(content_type) = content_type {
            headers.insert("content-type".to_string(), content_type.to_string());
        }

        let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");
        let signature = CanonicalRequest {
            method: method.as_str(),
            uri: parsed.path(),
            query: "",
            headers: &headers,
            header_list: &signed_headers,
            payload_hash: &payload_hash,
        }
        .sign(&AWS_V4, &self.conf.secret_key, &self.conf.region, now);

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            AWS_V4.algorithm, self.conf.access_key, signature.scope, signed_headers, signature.value
        );

        let mut request = self
            .client
            .request(method.clone(), parsed)
            .header("authorization", authorization);
        for (name, value) in headers.iter().filter(|(name, _)| name.as_str() != "host") {
            request = request.header(name.as_str(), value.as_str());
        }
        debug!("S3 {} {}", method, key);
        let response = request
            .body(body)
            .send()
            .await
            .context(format!("S3 {} {} request failed", method, key))?;
        check_response(response, method.as_str(), key).await
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<StoredObject> {
        self.send(reqwest::Method::PUT, key, body, Some(content_type))
            .await?;
        Ok(StoredObject {
            key: key.to_string(),
            url: self.url(key),
        })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let response = self.send(reqwest::Method::GET, key, Vec::new(), None).await?;
        let bytes = response
            .bytes()
            .await
            .context(format!("failed to read body of {}", key))?;
        Ok(bytes.to_vec())
    }

    fn url(&self, key: &str) -> String {
        self.object_url(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf(endpoint: Option<&str>) -> S3Config {
        S3Config {
            bucket: "media".to_string(),
            region: "ap-east-1".to_string(),
            endpoint: endpoint.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_virtual_hosted_url() {
        let storage = S3Storage::new(conf(None)).unwrap();
        assert_eq!(
            storage.url("vr360/abc/1/f0_0.jpg"),
            "https://media.s3.ap-east-1.amazonaws.com/vr360/abc/1/f0_0.jpg"
        );
    }

    #[test]
    fn test_custom_endpoint_is_path_style() {
        let storage = S3Storage::new(conf(Some("http://minio.local:9000/"))).unwrap();
        assert_eq!(
            storage.url("/spin/clip 1/snapshot-1.png"),
            "http://minio.local:9000/media/spin/clip%201/snapshot-1.png"
        );
    }
}
