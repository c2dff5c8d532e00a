//! Fivetran connector hosting.
//!
//! Deployment shells out to the `fivetran` CLI from the Connector SDK;
//! syncs and destination listing use the REST API with the base64
//! `key:secret` credential as HTTP Basic auth.

use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use regex::Regex;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ConnectorHost, DeploymentError, DeploymentErrorKind};
use crate::models::Secret;
use crate::workspace::CONFIG_FILE;

#[derive(Debug, Clone)]
pub struct FivetranConfig {
    /// CLI binary name or path.
    pub cli: String,
    /// REST API base URL including `/v1`.
    pub api_url: String,
    /// Per-request REST timeout.
    pub request_timeout: Duration,
}

impl Default for FivetranConfig {
    fn default() -> Self {
        Self {
            cli: "fivetran".to_string(),
            api_url: "https://api.fivetran.com/v1".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct FivetranHost {
    config: FivetranConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Group {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct Connection {
    id: String,
    #[serde(default)]
    schema: String,
}

impl FivetranHost {
    pub fn new(config: FivetranConfig) -> Result<Self, DeploymentError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DeploymentError::network(format!("HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn api(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        key: &Secret,
    ) -> Result<T, DeploymentError> {
        let resp = self
            .client
            .get(url)
            .query(query)
            .header(AUTHORIZATION, basic_auth(key)?)
            .send()
            .await
            .map_err(|e| DeploymentError::network(e.to_string()))?;
        let resp = check_status(resp).await?;
        resp.json()
            .await
            .map_err(|e| DeploymentError::network(format!("undecodable response: {}", e)))
    }

    /// All pages of a list endpoint.
    async fn list_all<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        key: &Secret,
    ) -> Result<Vec<T>, DeploymentError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut query = vec![("limit", "1000")];
            if let Some(ref c) = cursor {
                query.push(("cursor", c.as_str()));
            }
            let page: ApiEnvelope<Page<T>> = self.get_json(&self.api(path), &query, key).await?;
            items.extend(page.data.items);
            match page.data.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(items),
            }
        }
    }

    async fn groups(&self, key: &Secret) -> Result<Vec<Group>, DeploymentError> {
        self.list_all("groups", key).await
    }

    /// Look up a connection id when the CLI output did not include one.
    async fn resolve_connector_id(
        &self,
        destination: &str,
        connection: &str,
        key: &Secret,
    ) -> Result<String, DeploymentError> {
        let group = self
            .groups(key)
            .await?
            .into_iter()
            .find(|g| g.name == destination)
            .ok_or_else(|| {
                DeploymentError::destination(format!("no destination named '{}'", destination))
            })?;
        let connections: Vec<Connection> = self
            .list_all(&format!("groups/{}/connectors", group.id), key)
            .await?;
        connections
            .into_iter()
            .find(|c| c.schema == connection)
            .map(|c| c.id)
            .ok_or_else(|| {
                DeploymentError::network(format!(
                    "connection '{}' not listed in destination '{}'",
                    connection, destination
                ))
            })
    }
}

#[async_trait]
impl ConnectorHost for FivetranHost {
    fn name(&self) -> &str {
        "fivetran"
    }

    async fn deploy(
        &self,
        bundle: &Path,
        destination: &str,
        connection: &str,
        key: &Secret,
    ) -> Result<String, DeploymentError> {
        let cli = which::which(&self.config.cli).map_err(|_| {
            DeploymentError::network(format!(
                "'{}' CLI not found in PATH (pip install fivetran-connector-sdk)",
                self.config.cli
            ))
        })?;

        debug!("Running {} deploy in {}", cli.display(), bundle.display());
        let output = Command::new(&cli)
            .current_dir(bundle)
            .args(["deploy", "."])
            .args(["--api-key", key.expose()])
            .args(["--destination", destination])
            .args(["--connection", connection])
            .args(["--configuration", CONFIG_FILE])
            .arg("--force")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DeploymentError::network(format!("failed to run CLI: {}", e)))?;

        let text = redact(
            &format!(
                "{}\n{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            ),
            key,
        );

        if !output.status.success() {
            return Err(DeploymentError::new(
                classify_cli_output(&text),
                format!("fivetran deploy exited with {}: {}", output.status, text.trim()),
            ));
        }

        if let Some(id) = parse_connector_id(&text) {
            return Ok(id);
        }
        // Without a confirmed id the deployment cannot be reported as done.
        self.resolve_connector_id(destination, connection, key)
            .await
            .map_err(|e| {
                warn!("CLI reported success but no connector id was found: {}", e);
                DeploymentError::network(format!(
                    "fivetran deploy finished but the connector id for '{}' could not be confirmed: {}",
                    connection, e.message
                ))
            })
    }

    async fn trigger_sync(&self, connector_id: &str, key: &Secret) -> Result<(), DeploymentError> {
        let resp = self
            .client
            .post(self.api(&format!("connectors/{}/sync", connector_id)))
            .header(AUTHORIZATION, basic_auth(key)?)
            .json(&json!({"force": true}))
            .send()
            .await
            .map_err(|e| DeploymentError::network(e.to_string()))?;
        check_status(resp).await?;
        Ok(())
    }

    async fn list_destinations(&self, key: &Secret) -> Result<Vec<String>, DeploymentError> {
        let mut names: Vec<String> = self.groups(key).await?.into_iter().map(|g| g.name).collect();
        names.sort();
        Ok(names)
    }
}

fn basic_auth(key: &Secret) -> Result<String, DeploymentError> {
    let raw = key.expose().trim();
    let decoded = BASE64_STANDARD
        .decode(raw)
        .map_err(|_| DeploymentError::auth("deployment key is not valid base64"))?;
    if !decoded.contains(&b':') {
        return Err(DeploymentError::auth(
            "deployment key must encode 'api_key:api_secret'",
        ));
    }
    Ok(format!("Basic {}", raw))
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, DeploymentError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DeploymentErrorKind::AuthRejected,
        StatusCode::NOT_FOUND => DeploymentErrorKind::DestinationUnknown,
        _ => DeploymentErrorKind::NetworkFailure,
    };
    Err(DeploymentError::new(kind, format!("HTTP {}: {}", status, body.trim())))
}

/// Classify failed CLI output.
pub fn classify_cli_output(output: &str) -> DeploymentErrorKind {
    let lower = output.to_lowercase();
    const AUTH: &[&str] = &[
        "401",
        "403",
        "unauthorized",
        "forbidden",
        "invalid api key",
        "authentication",
        "invalid credentials",
    ];
    if AUTH.iter().any(|p| lower.contains(p)) {
        return DeploymentErrorKind::AuthRejected;
    }
    let destination_missing = lower.contains("destination")
        && ["not found", "does not exist", "unknown", "invalid", "no destination"]
            .iter()
            .any(|p| lower.contains(p));
    if destination_missing {
        return DeploymentErrorKind::DestinationUnknown;
    }
    DeploymentErrorKind::NetworkFailure
}

fn connector_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)(?:connection|connector)[ _]id["']?\s*[:=]\s*["']?([a-z0-9_]+)"#)
            .expect("connector id pattern is valid")
    })
}

fn parse_connector_id(output: &str) -> Option<String> {
    connector_id_pattern()
        .captures(output)
        .map(|c| c[1].to_string())
}

fn redact(text: &str, key: &Secret) -> String {
    if key.is_empty() {
        return text.to_string();
    }
    text.replace(key.expose(), "********")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_cli_output() {
        assert_eq!(
            classify_cli_output("Error: HTTP 401 Unauthorized"),
            DeploymentErrorKind::AuthRejected
        );
        assert_eq!(
            classify_cli_output("Destination 'wh' not found in account"),
            DeploymentErrorKind::DestinationUnknown
        );
        assert_eq!(
            classify_cli_output("connection reset by peer"),
            DeploymentErrorKind::NetworkFailure
        );
    }

    #[test]
    fn test_parse_connector_id() {
        assert_eq!(
            parse_connector_id("Deploying...\nConnection ID: brave_fantastic\nDone").as_deref(),
            Some("brave_fantastic")
        );
        assert_eq!(
            parse_connector_id(r#"{"connector_id": "abc_123"}"#).as_deref(),
            Some("abc_123")
        );
        assert!(parse_connector_id("deployed").is_none());
    }

    #[test]
    fn test_basic_auth_validates_key() {
        let good = Secret::new(BASE64_STANDARD.encode("key:secret"));
        assert_eq!(
            basic_auth(&good).unwrap(),
            format!("Basic {}", good.expose())
        );

        let err = basic_auth(&Secret::new("not base64!")).unwrap_err();
        assert_eq!(err.kind, DeploymentErrorKind::AuthRejected);
        let err = basic_auth(&Secret::new(BASE64_STANDARD.encode("nocolon"))).unwrap_err();
        assert_eq!(err.kind, DeploymentErrorKind::AuthRejected);
    }

    #[test]
    fn test_redact() {
        let key = Secret::new("c2VjcmV0");
        assert_eq!(redact("bad key c2VjcmV0", &key), "bad key ********");
    }

    /// Serve one canned JSON body per connection and report each request line.
    async fn stub_api(
        bodies: Vec<String>,
    ) -> (String, tokio::sync::mpsc::UnboundedReceiver<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/v1", listener.local_addr().unwrap());
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            for body in bodies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                let text = String::from_utf8_lossy(&request);
                let _ = tx.send(text.lines().next().unwrap_or_default().to_string());
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
            }
        });
        (base, rx)
    }

    #[tokio::test]
    async fn test_list_destinations_follows_encoded_cursor() {
        let (api_url, mut requests) = stub_api(vec![
            json!({"data": {"items": [{"id": "g1", "name": "warehouse"}], "next_cursor": "a+b/c="}})
                .to_string(),
            json!({"data": {"items": [{"id": "g2", "name": "lake"}]}}).to_string(),
        ])
        .await;
        let host = FivetranHost::new(FivetranConfig {
            api_url,
            ..Default::default()
        })
        .unwrap();

        let names = host
            .list_destinations(&Secret::new(BASE64_STANDARD.encode("key:secret")))
            .await
            .unwrap();
        assert_eq!(names, vec!["lake".to_string(), "warehouse".to_string()]);

        let first = requests.recv().await.unwrap();
        assert!(first.starts_with("GET /v1/groups?limit=1000 "), "{}", first);
        let second = requests.recv().await.unwrap();
        assert!(
            second.starts_with("GET /v1/groups?limit=1000&cursor=a%2Bb%2Fc%3D "),
            "{}",
            second
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unconfirmed_connector_id_is_a_failure() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let cli = dir.path().join("fake-fivetran");
        std::fs::write(&cli, "#!/bin/sh\necho 'Deployment complete'\n").unwrap();
        std::fs::set_permissions(&cli, std::fs::Permissions::from_mode(0o755)).unwrap();

        // the destination lookup finds no matching destination
        let (api_url, _requests) =
            stub_api(vec![json!({"data": {"items": []}}).to_string()]).await;
        let host = FivetranHost::new(FivetranConfig {
            cli: cli.to_string_lossy().into_owned(),
            api_url,
            request_timeout: Duration::from_secs(5),
        })
        .unwrap();

        let err = host
            .deploy(dir.path(), "wh", "jobs", &Secret::new(BASE64_STANDARD.encode("k:s")))
            .await
            .unwrap_err();
        assert_eq!(err.kind, DeploymentErrorKind::NetworkFailure);
        assert!(err.message.contains("could not be confirmed"), "{}", err.message);
        assert!(err.message.contains("no destination named 'wh'"));
    }

    #[tokio::test]
    async fn test_missing_cli_is_network_failure() {
        let host = FivetranHost::new(FivetranConfig {
            cli: "definitely-not-a-real-fivetran-binary".into(),
            ..Default::default()
        })
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let err = host
            .deploy(dir.path(), "wh", "jobs", &Secret::new("a2V5OnM="))
            .await
            .unwrap_err();
        assert_eq!(err.kind, DeploymentErrorKind::NetworkFailure);
    }
}
