//! Deployment gateway.
//!
//! Pushes a materialized workspace to a connector-hosting service. Failures
//! never escape as errors: every outcome becomes a [`DeploymentRecord`],
//! with copy-pasteable fallback commands when the push did not happen.

mod fivetran;

pub use fivetran::{classify_cli_output, FivetranConfig, FivetranHost};

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::models::{Credentials, DeploymentRecord, Secret};
use crate::workspace::{CONFIG_FILE, CONNECTOR_FILE, MANIFEST_FILE};

/// Environment variable the fallback commands read the deploy key from.
pub const DEPLOY_KEY_ENV: &str = "FIVETRAN_API_KEY_BASE64";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentErrorKind {
    AuthRejected,
    DestinationUnknown,
    NetworkFailure,
}

impl DeploymentErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentErrorKind::AuthRejected => "AUTH_REJECTED",
            DeploymentErrorKind::DestinationUnknown => "DESTINATION_UNKNOWN",
            DeploymentErrorKind::NetworkFailure => "NETWORK_FAILURE",
        }
    }
}

impl fmt::Display for DeploymentErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct DeploymentError {
    pub kind: DeploymentErrorKind,
    pub message: String,
}

impl DeploymentError {
    pub fn new(kind: DeploymentErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(DeploymentErrorKind::AuthRejected, message)
    }

    pub fn destination(message: impl Into<String>) -> Self {
        Self::new(DeploymentErrorKind::DestinationUnknown, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(DeploymentErrorKind::NetworkFailure, message)
    }
}

/// External connector-hosting service.
#[async_trait]
pub trait ConnectorHost: Send + Sync {
    fn name(&self) -> &str;

    /// Upload the workspace at `bundle` as connection `connection` in
    /// `destination`. Returns the hosting service's connector id.
    async fn deploy(
        &self,
        bundle: &Path,
        destination: &str,
        connection: &str,
        key: &Secret,
    ) -> Result<String, DeploymentError>;

    /// Ask the service to start a sync. Returns once the request is
    /// accepted, not when the sync finishes.
    async fn trigger_sync(&self, connector_id: &str, key: &Secret) -> Result<(), DeploymentError>;

    /// Destination identifiers visible to `key`.
    async fn list_destinations(&self, key: &Secret) -> Result<Vec<String>, DeploymentError>;
}

/// Converts hosting-service outcomes into deployment records.
#[derive(Clone)]
pub struct DeploymentGateway {
    host: Arc<dyn ConnectorHost>,
    trigger_sync: bool,
    syncs: Arc<Mutex<JoinSet<()>>>,
}

impl DeploymentGateway {
    pub fn new(host: Arc<dyn ConnectorHost>) -> Self {
        Self {
            host,
            trigger_sync: true,
            syncs: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Whether to start an initial sync after a successful deploy.
    pub fn with_trigger_sync(mut self, trigger_sync: bool) -> Self {
        self.trigger_sync = trigger_sync;
        self
    }

    /// Deploy `workspace` to `destination` as `connection`, bounded by
    /// `timeout`. Never fails: errors come back as a `failed` record.
    pub async fn deploy(
        &self,
        workspace: &Path,
        destination: &str,
        connection: &str,
        credentials: &Credentials,
        timeout: Duration,
    ) -> DeploymentRecord {
        let fallback = fallback_commands(workspace, destination, connection);

        if !workspace.join(CONNECTOR_FILE).is_file() {
            return DeploymentRecord::failed(
                format!("{} has no {}", workspace.display(), CONNECTOR_FILE),
                fallback,
            );
        }
        let Some(key) = credentials.deploy_key.as_ref() else {
            return DeploymentRecord::failed(
                DeploymentError::auth("no deployment key provided").to_string(),
                fallback,
            );
        };

        info!(
            "Deploying {} to destination '{}' via {}",
            connection,
            destination,
            self.host.name()
        );
        let outcome = tokio::time::timeout(
            timeout,
            self.host.deploy(workspace, destination, connection, key),
        )
        .await
        .unwrap_or_else(|_| {
            Err(DeploymentError::network(format!(
                "deployment timed out after {}s",
                timeout.as_secs()
            )))
        });

        match outcome {
            Ok(connector_id) => {
                info!("Deployed connector {}", connector_id);
                if self.trigger_sync {
                    self.spawn_initial_sync(connector_id.clone(), key.clone());
                }
                DeploymentRecord::deployed(connector_id)
            }
            Err(e) => {
                warn!("Deployment failed: {}", e);
                DeploymentRecord::failed(e.to_string(), fallback)
            }
        }
    }

    /// Fire-and-forget initial sync; its outcome is only logged.
    fn spawn_initial_sync(&self, connector_id: String, key: Secret) {
        let host = Arc::clone(&self.host);
        let mut syncs = self.syncs.lock().unwrap_or_else(|p| p.into_inner());
        while syncs.try_join_next().is_some() {}
        syncs.spawn(async move {
            match host.trigger_sync(&connector_id, &key).await {
                Ok(()) => info!("Initial sync requested for {}", connector_id),
                Err(e) => warn!("Initial sync for {} not started: {}", connector_id, e),
            }
        });
    }

    /// Give outstanding sync requests up to `timeout` to be sent. A
    /// short-lived process calls this before exiting; the deployment
    /// records are already final either way. Requests still pending when
    /// the last clone of the gateway is dropped are abandoned.
    pub async fn wait_for_syncs(&self, timeout: Duration) {
        let mut pending = {
            let mut syncs = self.syncs.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::take(&mut *syncs)
        };
        if pending.is_empty() {
            return;
        }
        let drained = tokio::time::timeout(timeout, async {
            while pending.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            debug!("Abandoning {} unsent sync request(s)", pending.len());
        }
    }

    pub async fn list_destinations(
        &self,
        credentials: &Credentials,
    ) -> Result<Vec<String>, DeploymentError> {
        let key = credentials
            .deploy_key
            .as_ref()
            .ok_or_else(|| DeploymentError::auth("no deployment key provided"))?;
        self.host.list_destinations(key).await
    }
}

/// The deploy command an operator can run from inside a workspace directory
/// `dir`. The key is read from the environment, never inlined.
pub fn manual_deploy_command(dir: &str, destination: &str, connection: &str) -> String {
    format!(
        "fivetran deploy {} --api-key \"${}\" --destination {} --connection {} --configuration {} --force",
        shell_quote(dir),
        DEPLOY_KEY_ENV,
        shell_quote(destination),
        shell_quote(connection),
        CONFIG_FILE
    )
}

/// Manual steps equivalent to a deployment: install, test locally, deploy.
pub fn fallback_commands(workspace: &Path, destination: &str, connection: &str) -> Vec<String> {
    vec![
        format!("cd {}", shell_quote(&workspace.display().to_string())),
        format!("pip install -r {} fivetran-connector-sdk", MANIFEST_FILE),
        format!("fivetran debug --configuration {}", CONFIG_FILE),
        format!(
            "export {}=\"$(printf '%s' 'API_KEY:API_SECRET' | base64)\"",
            DEPLOY_KEY_ENV
        ),
        manual_deploy_command(".", destination, connection),
    ]
}

/// Quote `s` for a POSIX shell if it contains anything beyond a safe set.
pub fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@,+%".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeploymentStatus;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeHost {
        result: Result<String, DeploymentError>,
        delay: Duration,
        deploys: AtomicU32,
        syncs: Arc<AtomicU32>,
    }

    impl FakeHost {
        fn new(result: Result<String, DeploymentError>) -> Self {
            Self {
                result,
                delay: Duration::ZERO,
                deploys: AtomicU32::new(0),
                syncs: Arc::new(AtomicU32::new(0)),
            }
        }
    }

    #[async_trait]
    impl ConnectorHost for FakeHost {
        fn name(&self) -> &str {
            "fake"
        }

        async fn deploy(
            &self,
            _: &Path,
            _: &str,
            _: &str,
            _: &Secret,
        ) -> Result<String, DeploymentError> {
            self.deploys.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.result.clone()
        }

        async fn trigger_sync(&self, _: &str, _: &Secret) -> Result<(), DeploymentError> {
            self.syncs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn list_destinations(&self, _: &Secret) -> Result<Vec<String>, DeploymentError> {
            Ok(vec!["warehouse".into()])
        }
    }

    fn live() -> Credentials {
        Credentials::new(None, Some(Secret::new("a2V5OnNlY3JldA==")))
    }

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONNECTOR_FILE), "x = 1\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_success_records_id_and_starts_sync() {
        let host = Arc::new(FakeHost::new(Ok("conn_42".into())));
        let syncs = Arc::clone(&host.syncs);
        let gateway = DeploymentGateway::new(host);
        let ws = workspace();

        let record = gateway
            .deploy(ws.path(), "warehouse", "jobs", &live(), Duration::from_secs(5))
            .await;
        assert_eq!(record.status(), DeploymentStatus::Deployed);
        assert_eq!(record.connector_id(), Some("conn_42"));

        gateway.wait_for_syncs(Duration::from_secs(1)).await;
        assert_eq!(syncs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_becomes_record_with_fallback() {
        let host = Arc::new(FakeHost::new(Err(DeploymentError::auth("HTTP 401"))));
        let gateway = DeploymentGateway::new(host);
        let ws = workspace();

        let record = gateway
            .deploy(ws.path(), "warehouse", "jobs", &live(), Duration::from_secs(5))
            .await;
        assert_eq!(record.status(), DeploymentStatus::Failed);
        assert!(record.error_detail().unwrap().starts_with("AUTH_REJECTED"));
        assert!(!record.fallback_script().is_empty());
        assert!(!record.fallback_script().contains("a2V5OnNlY3JldA=="));
    }

    #[tokio::test]
    async fn test_timeout_is_network_failure() {
        let mut host = FakeHost::new(Ok("late".into()));
        host.delay = Duration::from_secs(3600);
        let gateway = DeploymentGateway::new(Arc::new(host));
        let ws = workspace();

        let record = gateway
            .deploy(ws.path(), "w", "jobs", &live(), Duration::from_millis(20))
            .await;
        assert_eq!(record.status(), DeploymentStatus::Failed);
        assert!(record.error_detail().unwrap().contains("NETWORK_FAILURE"));
    }

    #[tokio::test]
    async fn test_preconditions_checked_before_calling_host() {
        let host = Arc::new(FakeHost::new(Ok("x".into())));
        let gateway = DeploymentGateway::new(host.clone());

        let empty = tempfile::tempdir().unwrap();
        let record = gateway
            .deploy(empty.path(), "w", "jobs", &live(), Duration::from_secs(1))
            .await;
        assert_eq!(record.status(), DeploymentStatus::Failed);

        let ws = workspace();
        let record = gateway
            .deploy(ws.path(), "w", "jobs", &Credentials::default(), Duration::from_secs(1))
            .await;
        assert!(record.error_detail().unwrap().contains("AUTH_REJECTED"));
        assert_eq!(host.deploys.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_fallback_commands() {
        let cmds = fallback_commands(Path::new("/tmp/my connectors/jobs"), "my warehouse", "jobs");
        assert_eq!(cmds[0], "cd '/tmp/my connectors/jobs'");
        let deploy = cmds.last().unwrap();
        assert!(deploy.contains("--api-key \"$FIVETRAN_API_KEY_BASE64\""));
        assert!(deploy.contains("--destination 'my warehouse'"));
        assert!(deploy.contains("--connection jobs"));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain_name"), "plain_name");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote("a;rm -rf /"), "'a;rm -rf /'");
    }
}
