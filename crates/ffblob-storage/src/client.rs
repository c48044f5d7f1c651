//! Azure Blob Storage REST client.
//!
//! Production-grade client with:
//! - Managed identity bearer tokens with caching and expiry refresh
//! - Streamed downloads straight to disk
//! - Single-shot or staged (block) uploads that never overwrite
//! - A single bounded retry for transient failures
//! - Observability (tracing spans, metrics)

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, IF_NONE_MATCH, WWW_AUTHENTICATE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, info_span, Instrument};
use url::Url;

use crate::error::{StorageError, StorageResult};
use crate::metrics::{record_bytes, record_request};
use crate::reference::StoreReference;
use crate::retry::{with_retry, RetryConfig};
use crate::token_cache::TokenCache;

/// Blob service REST API version sent with every request.
pub const DEFAULT_API_VERSION: &str = "2021-08-06";

// =============================================================================
// Trait
// =============================================================================

/// Operations the processing pipeline needs from an object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stream the object at `source` into `dest`, returning bytes written.
    async fn download(&self, source: &StoreReference, dest: &Path) -> StorageResult<u64>;

    /// Create object `name` under `container` from the file at `src`.
    ///
    /// Fails with `AlreadyExists` rather than overwriting.
    async fn upload(&self, src: &Path, container: &StoreReference, name: &str)
        -> StorageResult<Url>;
}

// =============================================================================
// Configuration
// =============================================================================

/// Blob client configuration.
#[derive(Debug, Clone)]
pub struct BlobStoreConfig {
    /// Whole-request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Largest file uploaded with a single Put Blob
    pub single_put_limit: u64,
    /// Block size for staged uploads
    pub block_size: u64,
    /// `x-ms-version` header value
    pub api_version: String,
    /// Retry configuration
    pub retry: RetryConfig,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
            single_put_limit: 64 * 1024 * 1024,
            block_size: 8 * 1024 * 1024,
            api_version: DEFAULT_API_VERSION.to_string(),
            retry: RetryConfig::default(),
        }
    }
}

impl BlobStoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        fn env_u64(name: &str, default: u64) -> u64 {
            std::env::var(name)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        }

        let defaults = Self::default();
        Self {
            timeout: Duration::from_secs(env_u64("STORE_TIMEOUT_SECS", 300)),
            connect_timeout: Duration::from_secs(env_u64("STORE_CONNECT_TIMEOUT_SECS", 10)),
            single_put_limit: env_u64("STORE_SINGLE_PUT_LIMIT_BYTES", defaults.single_put_limit),
            block_size: env_u64("STORE_BLOCK_SIZE_BYTES", defaults.block_size).max(1),
            api_version: defaults.api_version,
            retry: RetryConfig::from_env(),
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// Blob REST API client authenticated with a cached bearer token.
#[derive(Clone)]
pub struct BlobStoreClient {
    http: Client,
    config: BlobStoreConfig,
    tokens: Arc<TokenCache>,
}

impl BlobStoreClient {
    /// Create a new client sharing `tokens` with the rest of the process.
    pub fn new(config: BlobStoreConfig, tokens: Arc<TokenCache>) -> StorageResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("ffblob-storage/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(StorageError::Network)?;

        Ok(Self {
            http,
            config,
            tokens,
        })
    }

    fn request(&self, method: Method, url: &Url, token: &str) -> StorageResult<RequestBuilder> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-ms-version",
            HeaderValue::from_str(&self.config.api_version)
                .map_err(|e| StorageError::config_error(format!("invalid API version: {}", e)))?,
        );
        headers.insert(
            "x-ms-date",
            HeaderValue::from_str(&date)
                .map_err(|e| StorageError::config_error(format!("invalid date header: {}", e)))?,
        );

        Ok(self
            .http
            .request(method, url.clone())
            .bearer_auth(token)
            .headers(headers))
    }

    /// Send with a bearer token. An expired-token 401 is retried once with a
    /// fresh token; any other non-success status becomes an error.
    async fn send_authorized<F>(&self, build: F) -> StorageResult<Response>
    where
        F: Fn(&str) -> StorageResult<RequestBuilder>,
    {
        let token = self.tokens.get_token().await?;
        let mut response = build(&token)?.send().await?;

        if response.status() == StatusCode::UNAUTHORIZED && is_token_expired(&response) {
            debug!("Store rejected token as expired, refreshing");
            self.tokens.invalidate().await;
            let token = self.tokens.get_token().await?;
            response = build(&token)?.send().await?;
        }

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }

    async fn download_once(&self, url: &Url, dest: &Path) -> StorageResult<u64> {
        let response = self
            .send_authorized(|token| self.request(Method::GET, url, token))
            .await?;

        // Truncates anything a failed earlier attempt left behind.
        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }

    async fn put_blob(&self, url: &Url, src: &Path, content_type: &str) -> StorageResult<()> {
        let data = tokio::fs::read(src).await?;

        self.send_authorized(|token| {
            Ok(self
                .request(Method::PUT, url, token)?
                .header("x-ms-blob-type", "BlockBlob")
                .header(CONTENT_TYPE, content_type)
                .header(IF_NONE_MATCH, "*")
                .body(data.clone()))
        })
        .await?;

        Ok(())
    }

    async fn put_block(&self, url: &Url, chunk: &[u8]) -> StorageResult<()> {
        self.send_authorized(|token| {
            Ok(self
                .request(Method::PUT, url, token)?
                .body(chunk.to_vec()))
        })
        .await?;

        Ok(())
    }

    async fn put_block_list(
        &self,
        url: &Url,
        block_ids: &[String],
        content_type: &str,
    ) -> StorageResult<()> {
        let mut commit_url = url.clone();
        commit_url.query_pairs_mut().append_pair("comp", "blocklist");
        let body = block_list_xml(block_ids);

        self.send_authorized(|token| {
            Ok(self
                .request(Method::PUT, &commit_url, token)?
                .header("x-ms-blob-content-type", content_type)
                .header(CONTENT_TYPE, "application/xml")
                .header(IF_NONE_MATCH, "*")
                .body(body.clone()))
        })
        .await?;

        Ok(())
    }

    /// Stage the file as fixed-size blocks, then commit them in order.
    async fn put_blocks(
        &self,
        url: &Url,
        src: &Path,
        size: u64,
        content_type: &str,
    ) -> StorageResult<()> {
        let block_size = self.config.block_size.max(1);
        let count = size.div_ceil(block_size);
        let mut file = tokio::fs::File::open(src).await?;
        let mut block_ids = Vec::with_capacity(count as usize);

        debug!(blocks = count, block_size, "Staging upload in blocks");

        for index in 0..count {
            let offset = index * block_size;
            let len = block_size.min(size - offset) as usize;
            let mut chunk = vec![0u8; len];
            file.read_exact(&mut chunk).await?;

            let id = block_id(index);
            let mut block_url = url.clone();
            block_url
                .query_pairs_mut()
                .append_pair("comp", "block")
                .append_pair("blockid", &id);

            with_retry(&self.config.retry, "put_block", || {
                self.put_block(&block_url, &chunk)
            })
            .await?;
            block_ids.push(id);
        }

        self.create_with_retry("put_block_list", || {
            self.put_block_list(url, &block_ids, content_type)
        })
        .await
    }

    /// Retry a create-only request. A conflict on a retry means an earlier
    /// attempt landed after its response was lost, so it counts as success.
    async fn create_with_retry<F, Fut>(&self, operation: &str, op: F) -> StorageResult<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = StorageResult<()>>,
    {
        let attempts = AtomicU32::new(0);

        with_retry(&self.config.retry, operation, || {
            let retried = attempts.fetch_add(1, Ordering::SeqCst) > 0;
            let fut = op();
            async move {
                match fut.await {
                    Err(StorageError::AlreadyExists(message)) if retried => {
                        info!(operation = %operation, %message, "Retried create found the object in place");
                        Ok(())
                    }
                    other => other,
                }
            }
        })
        .await
    }

    /// Execute a store operation with tracing and metrics.
    async fn execute_request<T, F>(
        &self,
        operation: &str,
        reference: &StoreReference,
        fut: F,
    ) -> StorageResult<T>
    where
        F: std::future::Future<Output = StorageResult<T>>,
    {
        let span = info_span!(
            "store_request",
            operation = %operation,
            account = %reference.account(),
            container = %reference.container(),
            blob = %reference.path()
        );

        let start = Instant::now();
        let result = fut.instrument(span).await;
        let latency_ms = start.elapsed().as_millis() as f64;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, latency_ms);

        result
    }
}

#[async_trait]
impl ObjectStore for BlobStoreClient {
    async fn download(&self, source: &StoreReference, dest: &Path) -> StorageResult<u64> {
        let url = source.url()?;

        self.execute_request("download", source, async {
            let bytes = with_retry(&self.config.retry, "download", || {
                self.download_once(&url, dest)
            })
            .await?;

            record_bytes("download", bytes);
            info!(bytes, "Downloaded source object");
            Ok(bytes)
        })
        .await
    }

    async fn upload(
        &self,
        src: &Path,
        container: &StoreReference,
        name: &str,
    ) -> StorageResult<Url> {
        let target = container.child(name);
        let url = target.url()?;
        let content_type = content_type_for(name);

        self.execute_request("upload", &target, async {
            let size = tokio::fs::metadata(src).await?.len();

            if size <= self.config.single_put_limit {
                self.create_with_retry("put_blob", || self.put_blob(&url, src, content_type))
                    .await?;
            } else {
                self.put_blocks(&url, src, size, content_type).await?;
            }

            record_bytes("upload", size);
            info!(bytes = size, "Uploaded output object");
            Ok(url.clone())
        })
        .await
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn error_code(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-ms-error-code")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn is_token_expired(response: &Response) -> bool {
    let code_says_so = error_code(response.headers()).as_deref() == Some("InvalidAuthenticationInfo");
    let challenge_says_so = response
        .headers()
        .get(WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("invalid_token"));
    code_says_so || challenge_says_so
}

async fn error_from_response(response: Response) -> StorageError {
    let status = response.status().as_u16();
    let code = error_code(response.headers());
    let body = response.text().await.unwrap_or_default();

    let message = match (code.as_deref(), xml_message(&body)) {
        (Some(code), Some(detail)) => format!("{}: {}", code, detail),
        (Some(code), None) => code.to_string(),
        (None, Some(detail)) => detail,
        (None, None) => format!("HTTP {}", status),
    };

    StorageError::from_status(status, code.as_deref(), message)
}

/// First line of `<Message>` from a storage error document.
fn xml_message(body: &str) -> Option<String> {
    let start = body.find("<Message>")? + "<Message>".len();
    let end = body[start..].find("</Message>")? + start;
    body[start..end]
        .lines()
        .next()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
}

/// Fixed-width base64 block id; all ids in a blob must share a length.
fn block_id(index: u64) -> String {
    BASE64.encode(format!("{:08}", index))
}

fn block_list_xml(block_ids: &[String]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?><BlockList>");
    for id in block_ids {
        xml.push_str("<Latest>");
        xml.push_str(id);
        xml.push_str("</Latest>");
    }
    xml.push_str("</BlockList>");
    xml
}

/// Content type guessed from the object name's extension.
pub fn content_type_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" => "video/mp4",
        "m4v" => "video/x-m4v",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        "ts" => "video/mp2t",
        "flv" => "video/x-flv",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "gif" => "image/gif",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{AccessToken, CredentialProvider, STORAGE_RESOURCE};
    use crate::reference::UrlPolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use wiremock::matchers::{
        body_bytes, body_string_contains, header, header_exists, method, path, query_param,
    };
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Hands out `token-1`, `token-2`, ... on successive calls.
    #[derive(Default)]
    struct CountingCredential {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CredentialProvider for CountingCredential {
        async fn get_token(&self, _resource: &str) -> StorageResult<AccessToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(AccessToken {
                token: format!("token-{}", n),
                expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
            })
        }
    }

    fn test_config() -> BlobStoreConfig {
        BlobStoreConfig {
            retry: RetryConfig {
                max_retries: 1,
                backoff: Duration::from_millis(1),
            },
            ..BlobStoreConfig::default()
        }
    }

    fn client(config: BlobStoreConfig) -> (BlobStoreClient, Arc<CountingCredential>) {
        let credential = Arc::new(CountingCredential::default());
        let tokens = Arc::new(TokenCache::new(credential.clone(), STORAGE_RESOURCE));
        (BlobStoreClient::new(config, tokens).unwrap(), credential)
    }

    fn policy() -> UrlPolicy {
        UrlPolicy {
            allowed_host_suffixes: vec!["127.0.0.1".to_string()],
            allow_insecure: true,
        }
    }

    fn object(server: &MockServer, path: &str) -> StoreReference {
        let url = Url::parse(&format!("{}/devstoreaccount1/{}", server.uri(), path)).unwrap();
        StoreReference::parse_object(&url, &policy()).unwrap()
    }

    fn container(server: &MockServer, path: &str) -> StoreReference {
        let url = Url::parse(&format!("{}/devstoreaccount1/{}", server.uri(), path)).unwrap();
        StoreReference::parse_container(&url, &policy()).unwrap()
    }

    #[test]
    fn test_block_ids_have_equal_length() {
        assert_eq!(block_id(0), "MDAwMDAwMDA=");
        assert_eq!(block_id(0).len(), block_id(99_999).len());
    }

    #[test]
    fn test_block_list_xml() {
        let xml = block_list_xml(&["a".to_string(), "b".to_string()]);
        assert!(xml.ends_with("<BlockList><Latest>a</Latest><Latest>b</Latest></BlockList>"));
    }

    #[test]
    fn test_xml_message() {
        let body = "<?xml version=\"1.0\"?><Error><Code>BlobNotFound</Code>\
                    <Message>The specified blob does not exist.\nRequestId:1</Message></Error>";
        assert_eq!(
            xml_message(body).as_deref(),
            Some("The specified blob does not exist.")
        );
        assert_eq!(xml_message(""), None);
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("a.mp4"), "video/mp4");
        assert_eq!(content_type_for("a.MOV"), "video/quicktime");
        assert_eq!(content_type_for("a"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_download_streams_to_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/devstoreaccount1/input/video.mp4"))
            .and(header("authorization", "Bearer token-1"))
            .and(header("x-ms-version", DEFAULT_API_VERSION))
            .and(header_exists("x-ms-date"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"video-bytes".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let (client, _) = client(test_config());
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("input.mp4");

        let written = client
            .download(&object(&server, "input/video.mp4"), &dest)
            .await
            .unwrap();

        assert_eq!(written, 11);
        assert_eq!(std::fs::read(&dest).unwrap(), b"video-bytes");
    }

    #[tokio::test]
    async fn test_download_not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(404).insert_header("x-ms-error-code", "BlobNotFound"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (client, _) = client(test_config());
        let dir = TempDir::new().unwrap();
        let err = client
            .download(&object(&server, "input/missing.mp4"), &dir.path().join("in"))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_download_forbidden() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("x-ms-error-code", "AuthorizationPermissionMismatch"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (client, _) = client(test_config());
        let dir = TempDir::new().unwrap();
        let err = client
            .download(&object(&server, "input/video.mp4"), &dir.path().join("in"))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Forbidden(_)));
        assert!(err.to_string().contains("AuthorizationPermissionMismatch"));
    }

    #[tokio::test]
    async fn test_download_retries_transient_failure_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let (client, _) = client(test_config());
        let dir = TempDir::new().unwrap();
        let written = client
            .download(&object(&server, "input/video.mp4"), &dir.path().join("in"))
            .await
            .unwrap();

        assert_eq!(written, 2);
    }

    #[tokio::test]
    async fn test_download_gives_up_after_second_transient_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let (client, _) = client(test_config());
        let dir = TempDir::new().unwrap();
        let err = client
            .download(&object(&server, "input/video.mp4"), &dir.path().join("in"))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Transient { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_download_retries_connection_dropped_mid_body() {
        use tokio::net::TcpListener;

        // First connection promises 100 bytes, sends 10 and hangs up.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let accepted = connections.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let n = accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let _ = socket.read(&mut buf).await;
                    let response: &[u8] = if n == 0 {
                        b"HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\n0123456789"
                    } else {
                        b"HTTP/1.1 200 OK\r\ncontent-length: 10\r\nconnection: close\r\n\r\n0123456789"
                    };
                    let _ = socket.write_all(response).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        let url = Url::parse(&format!("http://{}/devstoreaccount1/input/video.mp4", addr)).unwrap();
        let source = StoreReference::parse_object(&url, &policy()).unwrap();
        let (client, _) = client(test_config());
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("in");

        let written = client.download(&source, &dest).await.unwrap();

        assert_eq!(written, 10);
        assert_eq!(std::fs::read(&dest).unwrap(), b"0123456789");
        assert_eq!(connections.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer token-1"))
            .respond_with(
                ResponseTemplate::new(401)
                    .insert_header("x-ms-error-code", "InvalidAuthenticationInfo"),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer token-2"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let (client, credential) = client(test_config());
        let dir = TempDir::new().unwrap();
        client
            .download(&object(&server, "input/video.mp4"), &dir.path().join("in"))
            .await
            .unwrap();

        assert_eq!(credential.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_other_unauthorized_is_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let (client, credential) = client(test_config());
        let dir = TempDir::new().unwrap();
        let err = client
            .download(&object(&server, "input/video.mp4"), &dir.path().join("in"))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::AuthFailed(_)));
        assert_eq!(credential.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upload_single_put() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/devstoreaccount1/output/renders/out.mp4"))
            .and(header("if-none-match", "*"))
            .and(header("x-ms-blob-type", "BlockBlob"))
            .and(header("content-type", "video/mp4"))
            .and(body_bytes(b"rendered".to_vec()))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let (client, _) = client(test_config());
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("output.mp4");
        std::fs::write(&src, b"rendered").unwrap();

        let url = client
            .upload(&src, &container(&server, "output/renders"), "out.mp4")
            .await
            .unwrap();

        assert_eq!(
            url.as_str(),
            format!("{}/devstoreaccount1/output/renders/out.mp4", server.uri())
        );
    }

    #[tokio::test]
    async fn test_upload_conflict_is_already_exists() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(
                ResponseTemplate::new(409).insert_header("x-ms-error-code", "BlobAlreadyExists"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (client, _) = client(test_config());
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("output.mp4");
        std::fs::write(&src, b"rendered").unwrap();

        let err = client
            .upload(&src, &container(&server, "output"), "out.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_upload_retry_conflict_means_first_put_landed() {
        let server = MockServer::start().await;
        // Stored, but the response arrives after the client gave up.
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_secs(2)))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(header("if-none-match", "*"))
            .respond_with(
                ResponseTemplate::new(409).insert_header("x-ms-error-code", "BlobAlreadyExists"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (client, _) = client(BlobStoreConfig {
            timeout: Duration::from_millis(200),
            ..test_config()
        });
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("output.mp4");
        std::fs::write(&src, b"rendered").unwrap();

        let url = client
            .upload(&src, &container(&server, "output"), "out.mp4")
            .await
            .unwrap();
        assert!(url.as_str().ends_with("/devstoreaccount1/output/out.mp4"));
    }

    #[tokio::test]
    async fn test_upload_retry_conflict_on_block_list_commit() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(query_param("comp", "block"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(query_param("comp", "blocklist"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(query_param("comp", "blocklist"))
            .respond_with(ResponseTemplate::new(409))
            .expect(1)
            .mount(&server)
            .await;

        let (client, _) = client(BlobStoreConfig {
            single_put_limit: 4,
            block_size: 4,
            ..test_config()
        });
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("output.mp4");
        std::fs::write(&src, b"rendered").unwrap();

        client
            .upload(&src, &container(&server, "output"), "out.mp4")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upload_quota_exceeded() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(413))
            .expect(1)
            .mount(&server)
            .await;

        let (client, _) = client(test_config());
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("output.mp4");
        std::fs::write(&src, b"rendered").unwrap();

        let err = client
            .upload(&src, &container(&server, "output"), "out.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded(_)));
    }

    #[tokio::test]
    async fn test_upload_large_file_in_blocks() {
        let server = MockServer::start().await;
        // The short final block is matched first; the rest fall through.
        Mock::given(method("PUT"))
            .and(path("/devstoreaccount1/output/out.mp4"))
            .and(query_param("comp", "block"))
            .and(query_param("blockid", block_id(2).as_str()))
            .and(body_bytes(b"89".to_vec()))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/devstoreaccount1/output/out.mp4"))
            .and(query_param("comp", "block"))
            .respond_with(ResponseTemplate::new(201))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/devstoreaccount1/output/out.mp4"))
            .and(query_param("comp", "blocklist"))
            .and(header("if-none-match", "*"))
            .and(header("x-ms-blob-content-type", "video/mp4"))
            .and(body_string_contains(&format!("<Latest>{}</Latest>", block_id(2))))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let config = BlobStoreConfig {
            single_put_limit: 4,
            block_size: 4,
            ..test_config()
        };
        let (client, _) = client(config);
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("output.mp4");
        std::fs::write(&src, b"0123456789").unwrap();

        client
            .upload(&src, &container(&server, "output"), "out.mp4")
            .await
            .unwrap();
    }
}
