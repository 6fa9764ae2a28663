use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use std::collections::BTreeMap;

use super::signing::{CanonicalRequest, OSS_V4, amz_timestamp, uri_encode_path};
use super::{Storage, StoredObject, check_response, http_client};
use crate::config::OssConfig;

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Aliyun OSS with V4 signatures and virtual-hosted bucket URLs.
#[derive(Debug)]
pub struct OssStorage {
    conf: OssConfig,
    region: String,
    client: reqwest::Client,
}

impl OssStorage {
    pub fn new(conf: OssConfig) -> Result<Self> {
        let region = if conf.region.is_empty() {
            region_from_endpoint(&conf.endpoint)
        } else {
            conf.region.clone()
        };
        Ok(Self {
            conf,
            region,
            client: http_client()?,
        })
    }

    fn host(&self) -> String {
        let endpoint = self
            .conf
            .endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        format!("{}.{}", self.conf.bucket, endpoint)
    }

    async fn send(
        &self,
        method: reqwest::Method,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<reqwest::Response> {
        let encoded_key = uri_encode_path(key.trim_start_matches('/'));
        let now = Utc::now();

        let mut headers = BTreeMap::new();
        headers.insert("x-oss-content-sha256".to_string(), UNSIGNED_PAYLOAD.to_string());
        headers.insert("x-oss-date".to_string(), amz_timestamp(now));
        if method == reqwest::Method::PUT {
            headers.insert("x-oss-object-acl".to_string(), "public-read".to_string());
        }
        if let Some(content_type) = content_type {
            headers.insert("content-type".to_string(), content_type.to_string());
        }

        let canonical_uri = format!("/{}/{}", self.conf.bucket, encoded_key);
        let signature = CanonicalRequest {
            method: method.as_str(),
            uri: &canonical_uri,
            query: "",
            headers: &headers,
            header_list: "",
            payload_hash: UNSIGNED_PAYLOAD,
        }
        .sign(&OSS_V4, &self.conf.secret_key, &self.region, now);

        let authorization = format!(
            "{} Credential={}/{},Signature={}",
            OSS_V4.algorithm, self.conf.access_key, signature.scope, signature.value
        );

        let url = format!("https://{}/{}", self.host(), encoded_key);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .header("authorization", authorization);
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }
        debug!("OSS {} {}", method, key);
        let response = request
            .body(body)
            .send()
            .await
            .context(format!("OSS {} {} request failed", method, key))?;
        check_response(response, method.as_str(), key).await
    }
}

/// `oss-cn-hongkong.aliyuncs.com` -> `cn-hongkong`
fn region_from_endpoint(endpoint: &str) -> String {
    let host = endpoint
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let first = host.split('.').next().unwrap_or_default();
    first
        .trim_start_matches("oss-")
        .trim_end_matches("-internal")
        .to_string()
}

#[async_trait]
impl Storage for OssStorage {
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
        format!(
            "https://{}/{}",
            self.host(),
            uri_encode_path(key.trim_start_matches('/'))
        )
    }
}
