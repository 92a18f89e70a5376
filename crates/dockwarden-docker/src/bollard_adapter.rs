//! `bollard`-backed implementation of [`crate::traits::ContainerEngine`].

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, ListContainersOptions,
    RemoveContainerOptions, RenameContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{instrument, warn};

use crate::traits::{
    ContainerEngine, ContainerRef, EngineError, ExecOutput, RecreateSpec, RegistryAuth, Result,
};

/// Wraps a `bollard::Docker` handle connected over the local UNIX socket (or,
/// when constructed via [`BollardEngine::connect_tcp_tls`], a TCP+TLS endpoint).
pub struct BollardEngine {
    docker: Docker,
}

impl BollardEngine {
    /// Connect to the local Docker-compatible engine over its default UNIX socket.
    pub fn connect_local() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| EngineError::Unreachable(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Connect to a remote engine over TCP with TLS client certificates.
    pub fn connect_tcp_tls(
        addr: &str,
        cert_dir: &std::path::Path,
    ) -> Result<Self> {
        let docker = Docker::connect_with_ssl(
            addr,
            &cert_dir.join("key.pem"),
            &cert_dir.join("cert.pem"),
            &cert_dir.join("ca.pem"),
            120,
            bollard::API_DEFAULT_VERSION,
        )
        .map_err(|e| EngineError::Unreachable(e.to_string()))?;
        Ok(Self { docker })
    }

    fn to_container_ref(summary: bollard::models::ContainerSummary) -> ContainerRef {
        let id = summary.id.clone().unwrap_or_default();
        let name = summary
            .names
            .as_ref()
            .and_then(|names| names.first())
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| id.clone());
        let image_reference = summary.image.clone().unwrap_or_default();
        let image_digest = summary
            .image_id
            .as_ref()
            .and_then(|image_id| image_id.strip_prefix("sha256:").map(|_| image_id.clone()));
        let labels: HashMap<String, String> = summary.labels.clone().unwrap_or_default();
        let network_mode = summary
            .host_config
            .as_ref()
            .and_then(|hc| hc.network_mode.clone())
            .unwrap_or_else(|| "default".to_string());
        let running = summary.state.as_deref() == Some("running");

        ContainerRef {
            id,
            name,
            image_reference,
            image_digest,
            labels,
            network_mode,
            running,
        }
    }
}

#[async_trait]
impl ContainerEngine for BollardEngine {
    #[instrument(skip(self))]
    async fn list_running(&self) -> Result<Vec<ContainerRef>> {
        let options = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| EngineError::Other(e.to_string()))?;
        Ok(summaries.into_iter().map(Self::to_container_ref).collect())
    }

    #[instrument(skip(self))]
    async fn list_all(&self) -> Result<Vec<ContainerRef>> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| EngineError::Other(e.to_string()))?;
        Ok(summaries.into_iter().map(Self::to_container_ref).collect())
    }

    #[instrument(skip(self))]
    async fn inspect(&self, id_or_name: &str) -> Result<serde_json::Value> {
        let inspect = self
            .docker
            .inspect_container(id_or_name, None)
            .await
            .map_err(|e| map_not_found(id_or_name, e))?;
        serde_json::to_value(inspect).map_err(|e| EngineError::Other(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn stop(&self, id_or_name: &str, grace: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        self.docker
            .stop_container(id_or_name, Some(options))
            .await
            .map_err(|e| EngineError::StopFailed(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn start(&self, id_or_name: &str) -> Result<()> {
        self.docker
            .start_container(id_or_name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| EngineError::StartFailed(e.to_string()))
    }

    #[instrument(skip(self, auth))]
    async fn pull(&self, image_reference: &str, auth: Option<RegistryAuth>) -> Result<()> {
        let options = CreateImageOptions {
            from_image: image_reference.to_string(),
            ..Default::default()
        };
        let credentials = auth.map(|a| bollard::auth::DockerCredentials {
            username: Some(a.username),
            password: Some(a.password),
            serveraddress: Some(a.server_address),
            ..Default::default()
        });

        let mut stream = self.docker.create_image(Some(options), None, credentials);
        while let Some(result) = stream.next().await {
            if let Err(e) = result {
                return Err(EngineError::PullFailed {
                    image: image_reference.to_string(),
                    message: e.to_string(),
                });
            }
        }
        Ok(())
    }

    #[instrument(skip(self, spec), fields(container = %spec.name))]
    async fn create(&self, spec: &RecreateSpec) -> Result<String> {
        let mut config: ContainerConfig<String> = serde_json::from_value(spec.previous_inspect.clone())
            .unwrap_or_default();
        config.image = Some(spec.image_reference.clone());

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| EngineError::StartFailed(e.to_string()))?;

        for warning in created.warnings {
            warn!(container = %spec.name, %warning, "container created with warning");
        }
        Ok(created.id)
    }

    #[instrument(skip(self))]
    async fn rename(&self, id_or_name: &str, new_name: &str) -> Result<()> {
        let options = RenameContainerOptions {
            name: new_name.to_string(),
        };
        self.docker
            .rename_container(id_or_name, options)
            .await
            .map_err(|e| map_not_found(id_or_name, e))
    }

    #[instrument(skip(self))]
    async fn remove(&self, id_or_name: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker
            .remove_container(id_or_name, Some(options))
            .await
            .map_err(|e| map_not_found(id_or_name, e))
    }

    #[instrument(skip(self, command))]
    async fn exec(
        &self,
        id_or_name: &str,
        command: &[String],
        timeout: Duration,
    ) -> Result<ExecOutput> {
        let exec = self
            .docker
            .create_exec(
                id_or_name,
                CreateExecOptions {
                    cmd: Some(command.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| EngineError::Other(e.to_string()))?;

        let started = self.docker.start_exec(&exec.id, None);
        let mut stdout = String::new();
        let mut stderr = String::new();

        let collected = tokio::time::timeout(timeout, async {
            if let StartExecResults::Attached { mut output, .. } = started.await? {
                while let Some(chunk) = output.next().await {
                    match chunk? {
                        bollard::container::LogOutput::StdOut { message } => {
                            stdout.push_str(&String::from_utf8_lossy(&message))
                        }
                        bollard::container::LogOutput::StdErr { message } => {
                            stderr.push_str(&String::from_utf8_lossy(&message))
                        }
                        _ => {}
                    }
                }
            }
            Ok::<(), bollard::errors::Error>(())
        })
        .await;

        match collected {
            Err(_) => return Err(EngineError::Other(format!("exec in {id_or_name} timed out"))),
            Ok(Err(e)) => return Err(EngineError::Other(e.to_string())),
            Ok(Ok(())) => {}
        }

        let inspected = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| EngineError::Other(e.to_string()))?;
        let exit_code = inspected.exit_code.unwrap_or(-1);

        if exit_code != 0 {
            return Err(EngineError::ExecFailed { exit_code, stderr });
        }

        Ok(ExecOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

fn map_not_found(id_or_name: &str, err: bollard::errors::Error) -> EngineError {
    if let bollard::errors::Error::DockerResponseServerError { status_code, .. } = &err {
        if *status_code == 404 {
            return EngineError::NotFound(id_or_name.to_string());
        }
    }
    EngineError::Other(err.to_string())
}
