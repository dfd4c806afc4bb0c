use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::settings::RemoteAgentSettings;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const REQUEST_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum AgentCommand {
    Arm,
    /// Viewport-relative coordinates.
    EmitInput { x: f64, y: f64 },
    Disarm,
}

impl AgentCommand {
    fn path(&self) -> &'static str {
        match self {
            AgentCommand::Arm => "arm",
            AgentCommand::EmitInput { .. } => "emit",
            AgentCommand::Disarm => "disarm",
        }
    }
}

#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn send(&self, command: AgentCommand) -> Result<()>;
}

/// Posts commands as JSON to `{endpoint}/{arm|emit|disarm}`.
pub struct HttpAgentTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAgentTransport {
    pub fn new(settings: &RemoteAgentSettings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-agent-secret",
            HeaderValue::from_str(settings.secret.trim())
                .context("remote agent secret is not a valid header value")?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(REQUEST_TIMEOUT_MS))
            .build()
            .context("failed to build remote agent client")?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, command: &AgentCommand) -> String {
        format!("{}/{}", self.endpoint, command.path())
    }
}

#[async_trait]
impl AgentTransport for HttpAgentTransport {
    async fn send(&self, command: AgentCommand) -> Result<()> {
        self.client
            .post(self.url_for(&command))
            .json(&command)
            .send()
            .await
            .with_context(|| format!("remote agent {} request failed", command.path()))?
            .error_for_status()
            .with_context(|| format!("remote agent rejected {}", command.path()))?;
        Ok(())
    }
}

/// Out-of-process input emulation. Fire-and-forget: nothing here reports
/// back to the engine.
#[derive(Clone)]
pub struct RemoteAgent {
    transport: Arc<dyn AgentTransport>,
}

impl RemoteAgent {
    pub fn from_settings(settings: &RemoteAgentSettings) -> Result<Self> {
        Ok(Self::with_transport(Arc::new(HttpAgentTransport::new(
            settings,
        )?)))
    }

    pub fn with_transport(transport: Arc<dyn AgentTransport>) -> Self {
        Self { transport }
    }

    /// Arms the agent, emits one input at `(x, y)` and always disarms, even
    /// when cancelled part-way. Returns `None` without a tokio runtime to
    /// run the delegation on.
    pub fn delegate(&self, x: f64, y: f64, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let Ok(runtime) = Handle::try_current() else {
            log_warn!("no tokio runtime; skipping remote agent delegation");
            return None;
        };
        let transport = Arc::clone(&self.transport);
        Some(runtime.spawn(async move {
            let sequence = async {
                transport.send(AgentCommand::Arm).await?;
                transport.send(AgentCommand::EmitInput { x, y }).await
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log_info!("remote agent delegation cancelled");
                }
                result = sequence => {
                    match result {
                        Ok(()) => log_info!("remote agent emitted input at ({x:.0}, {y:.0})"),
                        Err(err) => log_warn!("remote agent delegation failed: {err:#}"),
                    }
                }
            }

            if let Err(err) = transport.send(AgentCommand::Disarm).await {
                log_warn!("remote agent disarm failed: {err:#}");
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<AgentCommand>>,
        fail_arm: bool,
    }

    #[async_trait]
    impl AgentTransport for RecordingTransport {
        async fn send(&self, command: AgentCommand) -> Result<()> {
            self.sent.lock().unwrap().push(command.clone());
            if self.fail_arm && command == AgentCommand::Arm {
                bail!("connection refused");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn delegation_arms_emits_and_disarms() {
        let transport = Arc::new(RecordingTransport::default());
        let agent = RemoteAgent::with_transport(transport.clone());

        agent
            .delegate(120.0, 40.0, CancellationToken::new())
            .unwrap()
            .await
            .unwrap();

        assert_eq!(
            *transport.sent.lock().unwrap(),
            vec![
                AgentCommand::Arm,
                AgentCommand::EmitInput { x: 120.0, y: 40.0 },
                AgentCommand::Disarm,
            ]
        );
    }

    #[tokio::test]
    async fn failures_are_swallowed_and_still_disarm() {
        let transport = Arc::new(RecordingTransport {
            fail_arm: true,
            ..Default::default()
        });
        let agent = RemoteAgent::with_transport(transport.clone());

        agent
            .delegate(1.0, 1.0, CancellationToken::new())
            .unwrap()
            .await
            .unwrap();

        assert_eq!(
            *transport.sent.lock().unwrap(),
            vec![AgentCommand::Arm, AgentCommand::Disarm]
        );
    }

    #[tokio::test]
    async fn cancelled_delegation_only_disarms() {
        let transport = Arc::new(RecordingTransport::default());
        let agent = RemoteAgent::with_transport(transport.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        agent.delegate(1.0, 1.0, cancel).unwrap().await.unwrap();

        assert_eq!(*transport.sent.lock().unwrap(), vec![AgentCommand::Disarm]);
    }

    #[test]
    fn delegation_without_runtime_is_skipped() {
        let transport = Arc::new(RecordingTransport::default());
        let agent = RemoteAgent::with_transport(transport.clone());

        assert!(agent.delegate(1.0, 1.0, CancellationToken::new()).is_none());
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn http_transport_builds_command_urls() {
        let transport = HttpAgentTransport::new(&RemoteAgentSettings {
            endpoint: "http://127.0.0.1:8765/".into(),
            secret: "s3cret".into(),
        })
        .unwrap();

        assert_eq!(transport.url_for(&AgentCommand::Arm), "http://127.0.0.1:8765/arm");
        assert_eq!(
            transport.url_for(&AgentCommand::EmitInput { x: 0.0, y: 0.0 }),
            "http://127.0.0.1:8765/emit"
        );
    }

    #[test]
    fn emit_command_serializes_coordinates() {
        let json = serde_json::to_value(AgentCommand::EmitInput { x: 5.0, y: 6.5 }).unwrap();
        assert_eq!(json, serde_json::json!({ "command": "emitInput", "x": 5.0, "y": 6.5 }));
    }
}
