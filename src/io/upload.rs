//! Object-storage upload of run artifacts.
//!
//! Each file under a directory is sent as an S3 `PUT` to
//! `<endpoint>/<bucket>/<prefix>/<relative path>` (path-style addressing),
//! signed with AWS Signature Version 4. Credentials come from
//! `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and optionally
//! `AWS_SESSION_TOKEN`; `AWS_REGION` overrides the configured region and
//! `AWS_BUCKET` the configured bucket. A `.env` file is honoured.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::AppError;

const UPLOAD_TIMEOUT_SECS: u64 = 300;
const SIGNING_ALGORITHM: &str = "AWS4-HMAC-SHA256";

type HmacSha256 = Hmac<Sha256>;

/// The `aws` config section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AwsConfig {
    #[serde(default)]
    pub upload: bool,
    #[serde(default)]
    pub bucket_name: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// S3-compatible endpoint; defaults to the regional AWS endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            upload: false,
            bucket_name: String::new(),
            prefix: String::new(),
            region: default_region(),
            endpoint: None,
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl AwsConfig {
    /// Endpoint URL: the configured one, or `https://s3.<region>.amazonaws.com`.
    pub fn endpoint_url(&self, region: &str) -> Result<Url, AppError> {
        let raw = match &self.endpoint {
            Some(e) if !e.trim().is_empty() => e.trim().to_string(),
            _ => format!("https://s3.{region}.amazonaws.com"),
        };
        Url::parse(&raw).map_err(|e| AppError::config(format!("Invalid `aws.endpoint` '{raw}': {e}")))
    }
}

/// Static AWS credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AwsCredentials {
    pub fn from_env() -> Result<Self, AppError> {
        let access_key_id = env_var("AWS_ACCESS_KEY_ID")
            .ok_or_else(|| AppError::config("AWS_ACCESS_KEY_ID is not set; it is required for upload."))?;
        let secret_access_key = env_var("AWS_SECRET_ACCESS_KEY")
            .ok_or_else(|| AppError::config("AWS_SECRET_ACCESS_KEY is not set; it is required for upload."))?;
        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token: env_var("AWS_SESSION_TOKEN"),
        })
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Bucket to upload to: the environment override wins over the config.
pub fn resolve_bucket(config: &AwsConfig, env_override: Option<String>) -> Result<String, AppError> {
    env_override
        .filter(|b| !b.trim().is_empty())
        .or_else(|| Some(config.bucket_name.clone()).filter(|b| !b.trim().is_empty()))
        .ok_or_else(|| AppError::config("No bucket configured: set `aws.bucket_name` or AWS_BUCKET."))
}

/// `prefix/relative`, without a leading slash and with `/` separators.
pub fn object_key(prefix: &str, relative: &Path) -> String {
    let rel: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let key = format!("{}/{}", prefix.trim_matches('/'), rel.join("/"));
    key.trim_start_matches('/').to_string()
}

/// Every regular file below `dir`, sorted for a stable upload order.
pub fn collect_files(dir: &Path) -> Result<Vec<PathBuf>, AppError> {
    let mut out = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = fs::read_dir(&current)
            .map_err(|e| AppError::io(format!("Failed to list '{}': {e}", current.display())))?;
        for entry in entries {
            let path = entry
                .map_err(|e| AppError::io(format!("Failed to list '{}': {e}", current.display())))?
                .path();
            if path.is_dir() {
                pending.push(path);
            } else if path.is_file() {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Percent-encode an object path for the SigV4 canonical URI. `/` is kept;
/// everything outside the unreserved set is encoded.
pub fn uri_encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for b in path.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &str) -> Result<Vec<u8>, AppError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| AppError::config(format!("Invalid signing key: {e}")))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// SigV4 signing key for `date` (`YYYYMMDD`), region and service.
pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>, AppError> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date)?;
    let k_region = hmac_sha256(&k_date, region)?;
    let k_service = hmac_sha256(&k_region, service)?;
    hmac_sha256(&k_service, "aws4_request")
}

/// Headers for a signed S3 `PUT` (everything except `host`, which the HTTP
/// client sets itself). `canonical_uri` must already be encoded with
/// [`uri_encode_path`].
pub fn sign_put(
    host: &str,
    canonical_uri: &str,
    payload_hash: &str,
    credentials: &AwsCredentials,
    region: &str,
    now: DateTime<Utc>,
) -> Result<Vec<(String, String)>, AppError> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    // Sorted by name.
    let mut signed = vec![
        ("host".to_string(), host.to_string()),
        ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    if let Some(token) = &credentials.session_token {
        signed.push(("x-amz-security-token".to_string(), token.clone()));
    }

    let signed_headers = signed.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>().join(";");
    let canonical_headers: String = signed.iter().map(|(k, v)| format!("{k}:{}\n", v.trim())).collect();
    let canonical_request =
        format!("PUT\n{canonical_uri}\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}");

    let scope = format!("{date}/{region}/s3/aws4_request");
    let string_to_sign = format!(
        "{SIGNING_ALGORITHM}\n{amz_date}\n{scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );
    let key = signing_key(&credentials.secret_access_key, &date, region, "s3")?;
    let signature = hex::encode(hmac_sha256(&key, &string_to_sign)?);

    let mut headers: Vec<(String, String)> = signed.into_iter().filter(|(k, _)| k != "host").collect();
    headers.push((
        "authorization".to_string(),
        format!(
            "{SIGNING_ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            credentials.access_key_id
        ),
    ));
    Ok(headers)
}

fn host_header(url: &Url) -> Result<String, AppError> {
    let host = url
        .host_str()
        .ok_or_else(|| AppError::config(format!("Upload endpoint '{url}' has no host.")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Upload every file under `dir`. Returns the number of objects written.
pub fn upload_artifacts(dir: &Path, config: &AwsConfig) -> Result<usize, AppError> {
    dotenvy::dotenv().ok();
    let bucket = resolve_bucket(config, env_var("AWS_BUCKET"))?;
    let region = env_var("AWS_REGION").unwrap_or_else(|| config.region.clone());
    let credentials = AwsCredentials::from_env()?;
    let endpoint = config.endpoint_url(&region)?;
    let host = host_header(&endpoint)?;
    let base_path = endpoint.path().trim_end_matches('/').to_string();

    let client = Client::builder()
        .timeout(Duration::from_secs(UPLOAD_TIMEOUT_SECS))
        .build()
        .map_err(|e| AppError::io(format!("Failed to build HTTP client: {e}")))?;

    let files = collect_files(dir)?;
    info!(dir = %dir.display(), bucket = %bucket, region = %region, files = files.len(), "Uploading artifacts");

    for path in &files {
        let rel = path.strip_prefix(dir).unwrap_or(path);
        let key = object_key(&config.prefix, rel);
        let canonical_uri = format!("{base_path}/{}", uri_encode_path(&format!("{bucket}/{key}")));
        let url = endpoint
            .join(&canonical_uri)
            .map_err(|e| AppError::config(format!("Invalid object URL for '{key}': {e}")))?;

        let body = fs::read(path).map_err(|e| AppError::io(format!("Failed to read '{}': {e}", path.display())))?;
        let headers = sign_put(&host, &canonical_uri, &sha256_hex(&body), &credentials, &region, Utc::now())?;
        debug!(file = %path.display(), %url, "PUT");

        let mut request = client.put(url).body(body);
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let resp = request
            .send()
            .map_err(|e| AppError::io(format!("Upload of '{}' failed: {e}", path.display())))?;
        if !resp.status().is_success() {
            return Err(AppError::io(format!(
                "Upload of '{}' failed: HTTP {}",
                path.display(),
                resp.status()
            )));
        }
    }

    info!(objects = files.len(), "Upload complete");
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_join_prefix_and_relative_path() {
        assert_eq!(object_key("runs", Path::new("figures/roc.svg")), "runs/figures/roc.svg");
        assert_eq!(object_key("/runs/", Path::new("scores.csv")), "runs/scores.csv");
        assert_eq!(object_key("", Path::new("scores.csv")), "scores.csv");
    }

    #[test]
    fn env_bucket_overrides_config() {
        let cfg = AwsConfig {
            bucket_name: "from-config".into(),
            ..AwsConfig::default()
        };
        assert_eq!(resolve_bucket(&cfg, Some("from-env".into())).unwrap(), "from-env");
        assert_eq!(resolve_bucket(&cfg, None).unwrap(), "from-config");
        assert_eq!(
            resolve_bucket(&AwsConfig::default(), Some(" ".into())).unwrap_err().kind(),
            crate::error::ErrorKind::Config
        );
    }

    #[test]
    fn collects_nested_files_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("figures")).unwrap();
        fs::write(tmp.path().join("scores.csv"), "").unwrap();
        fs::write(tmp.path().join("figures/roc.svg"), "").unwrap();
        fs::write(tmp.path().join("config.yaml"), "").unwrap();

        let rel: Vec<PathBuf> = collect_files(tmp.path())
            .unwrap()
            .iter()
            .map(|p| p.strip_prefix(tmp.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            rel,
            vec![
                PathBuf::from("config.yaml"),
                PathBuf::from("figures/roc.svg"),
                PathBuf::from("scores.csv")
            ]
        );
    }

    fn credentials(token: Option<&str>) -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".into(),
            session_token: token.map(str::to_string),
        }
    }

    fn at(ts: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn signing_key_matches_published_derivation() {
        // Key-derivation example from the AWS SigV4 documentation.
        let key = signing_key("wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY", "20120215", "us-east-1", "iam").unwrap();
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn object_paths_are_percent_encoded() {
        assert_eq!(uri_encode_path("bucket/runs/a b+c.svg"), "bucket/runs/a%20b%2Bc.svg");
        assert_eq!(uri_encode_path("b/x_1-2.~/y"), "b/x_1-2.~/y");
    }

    #[test]
    fn put_is_signed_with_scope_and_headers() {
        let creds = credentials(None);
        let payload = sha256_hex(b"accuracy,f1");
        let now = at("2024-01-02T03:04:05Z");
        let headers = sign_put("s3.us-east-1.amazonaws.com", "/bucket/runs/metrics.json", &payload, &creds, "us-east-1", now)
            .unwrap();

        let get = |name: &str| headers.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone());
        assert_eq!(get("x-amz-date").as_deref(), Some("20240102T030405Z"));
        assert_eq!(get("x-amz-content-sha256"), Some(payload.clone()));
        assert!(get("host").is_none());

        let auth = get("authorization").unwrap();
        let prefix = "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240102/us-east-1/s3/aws4_request, \
                      SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature=";
        assert!(auth.starts_with(prefix), "{auth}");
        let signature = &auth[prefix.len()..];
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));

        // Same inputs sign identically; a different payload does not.
        let again = sign_put("s3.us-east-1.amazonaws.com", "/bucket/runs/metrics.json", &payload, &creds, "us-east-1", now)
            .unwrap();
        assert_eq!(again, headers);
        let other = sign_put("s3.us-east-1.amazonaws.com", "/bucket/runs/metrics.json", &sha256_hex(b"x"), &creds, "us-east-1", now)
            .unwrap();
        assert_ne!(other.last(), headers.last());
    }

    #[test]
    fn session_token_is_signed() {
        let headers = sign_put(
            "localhost:9000",
            "/bucket/key",
            &sha256_hex(b""),
            &credentials(Some("token-1")),
            "eu-west-1",
            at("2024-01-02T00:00:00Z"),
        )
        .unwrap();
        assert!(headers.iter().any(|(k, v)| k == "x-amz-security-token" && v == "token-1"));
        let auth = &headers.last().unwrap().1;
        assert!(auth.contains("/eu-west-1/s3/aws4_request"));
        assert!(auth.contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date;x-amz-security-token"));
    }

    #[test]
    fn endpoint_defaults_to_regional_aws() {
        let cfg = AwsConfig::default();
        assert_eq!(cfg.endpoint_url("eu-west-1").unwrap().as_str(), "https://s3.eu-west-1.amazonaws.com/");

        let minio = AwsConfig {
            endpoint: Some("http://localhost:9000".into()),
            ..AwsConfig::default()
        };
        let url = minio.endpoint_url("us-east-1").unwrap();
        assert_eq!(host_header(&url).unwrap(), "localhost:9000");

        let bad = AwsConfig {
            endpoint: Some("not a url".into()),
            ..AwsConfig::default()
        };
        assert_eq!(bad.endpoint_url("us-east-1").unwrap_err().kind(), crate::error::ErrorKind::Config);
    }

    #[test]
    fn debug_output_hides_secrets() {
        let shown = format!("{:?}", credentials(Some("token-1")));
        assert!(shown.contains("AKIDEXAMPLE"));
        assert!(!shown.contains("EXAMPLEKEY"));
        assert!(!shown.contains("token-1"));
    }
}
