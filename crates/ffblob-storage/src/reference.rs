//! Parsing and validation of blob URLs.
//!
//! Two URL styles are accepted:
//! - virtual-host style, `https://<account>.blob.core.windows.net/<container>/<path>`
//! - path style for IP or `localhost` endpoints (storage emulators),
//!   `http://127.0.0.1:10000/<account>/<container>/<path>`

use tracing::debug;
use url::{Host, Url};

use crate::error::{StorageError, StorageResult};

/// Blob endpoints of the public, US Government and China clouds.
pub const DEFAULT_ALLOWED_HOST_SUFFIXES: &[&str] = &[
    ".blob.core.windows.net",
    ".blob.core.usgovcloudapi.net",
    ".blob.core.chinacloudapi.cn",
];

/// Which endpoints a request may point the service at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPolicy {
    /// Host suffixes (or exact hosts) that are accepted
    pub allowed_host_suffixes: Vec<String>,
    /// Permit plain `http` endpoints
    pub allow_insecure: bool,
}

impl Default for UrlPolicy {
    fn default() -> Self {
        Self {
            allowed_host_suffixes: DEFAULT_ALLOWED_HOST_SUFFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allow_insecure: false,
        }
    }
}

impl UrlPolicy {
    /// Create policy from environment variables.
    pub fn from_env() -> Self {
        let mut policy = Self::default();

        if let Ok(value) = std::env::var("STORE_ALLOWED_HOST_SUFFIXES") {
            let suffixes: Vec<String> = value
                .split(',')
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !suffixes.is_empty() {
                policy.allowed_host_suffixes = suffixes;
            }
        }

        policy.allow_insecure = std::env::var("STORE_ALLOW_INSECURE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        policy
    }

    fn host_allowed(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.allowed_host_suffixes.iter().any(|entry| {
            let bare = entry.trim_start_matches('.');
            host == bare || host.ends_with(&format!(".{}", bare))
        })
    }
}

/// A located container or object in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreReference {
    /// Scheme, host and port, plus the account segment for path-style URLs
    endpoint: Url,
    account: String,
    container: String,
    /// Object name (or virtual directory prefix for containers), decoded
    path: String,
}

impl StoreReference {
    /// Parse a URL naming a single object.
    pub fn parse_object(url: &Url, policy: &UrlPolicy) -> StorageResult<Self> {
        let reference = Self::parse(url, policy)?;
        if reference.path.is_empty() {
            return Err(StorageError::invalid_reference(
                "URL must include a blob name after the container",
            ));
        }
        Ok(reference)
    }

    /// Parse a URL naming a container, optionally with a virtual directory.
    pub fn parse_container(url: &Url, policy: &UrlPolicy) -> StorageResult<Self> {
        let mut reference = Self::parse(url, policy)?;
        reference.path = reference.path.trim_end_matches('/').to_string();
        Ok(reference)
    }

    fn parse(url: &Url, policy: &UrlPolicy) -> StorageResult<Self> {
        match url.scheme() {
            "https" => {}
            "http" if policy.allow_insecure => {}
            other => {
                return Err(StorageError::invalid_reference(format!(
                    "scheme {} is not allowed",
                    other
                )))
            }
        }

        let host = url
            .host()
            .ok_or_else(|| StorageError::invalid_reference("URL must have a host"))?;
        let host_str = url
            .host_str()
            .ok_or_else(|| StorageError::invalid_reference("URL must have a host"))?;

        if !policy.host_allowed(host_str) {
            return Err(StorageError::invalid_reference(format!(
                "host {} is not an allowed blob endpoint",
                host_str
            )));
        }

        if url.query().is_some() {
            debug!("Ignoring query string on blob URL");
        }

        let mut segments: Vec<String> = url
            .path_segments()
            .map(|segs| {
                segs.map(|s| {
                    urlencoding::decode(s)
                        .map(|d| d.into_owned())
                        .unwrap_or_else(|_| s.to_string())
                })
                .collect()
            })
            .unwrap_or_default();

        let path_style = matches!(host, Host::Ipv4(_) | Host::Ipv6(_))
            || host_str.eq_ignore_ascii_case("localhost");

        let mut endpoint = Url::parse(&format!("{}://{}", url.scheme(), host_str))
            .map_err(|e| StorageError::invalid_reference(e.to_string()))?;
        endpoint
            .set_port(url.port())
            .map_err(|_| StorageError::invalid_reference("invalid port"))?;

        let account = if path_style {
            if segments.is_empty() || segments[0].is_empty() {
                return Err(StorageError::invalid_reference(
                    "path-style URL must include the account name",
                ));
            }
            let account = segments.remove(0);
            endpoint
                .path_segments_mut()
                .map_err(|_| StorageError::invalid_reference("URL cannot be a base"))?
                .push(&account);
            account
        } else {
            host_str
                .split('.')
                .next()
                .unwrap_or_default()
                .to_string()
        };

        if account.is_empty() {
            return Err(StorageError::invalid_reference("account name is empty"));
        }

        let container = segments.first().cloned().unwrap_or_default();
        if container.is_empty() {
            return Err(StorageError::invalid_reference(
                "URL must include a container name",
            ));
        }

        let path = segments[1..].join("/");

        Ok(Self {
            endpoint,
            account,
            container,
            path,
        })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Object name, or the virtual directory prefix of a container reference.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path component of the object name.
    pub fn file_name(&self) -> Option<&str> {
        self.path.rsplit('/').next().filter(|s| !s.is_empty())
    }

    /// Reference to an object named `name` inside this container/prefix.
    pub fn child(&self, name: &str) -> Self {
        let path = if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.path, name)
        };
        Self {
            path,
            ..self.clone()
        }
    }

    /// Full URL of the referenced object or container.
    pub fn url(&self) -> StorageResult<Url> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StorageError::invalid_reference("URL cannot be a base"))?;
            segments.pop_if_empty().push(&self.container);
            for part in self.path.split('/').filter(|p| !p.is_empty()) {
                segments.push(part);
            }
        }
        Ok(url)
    }
}
