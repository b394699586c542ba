// ABOUTME: Docker Engine implementation of the container runtime via bollard
// ABOUTME: Maps lifecycle calls to the Engine API and normalizes errors into tagged RuntimeErrors

use super::{ContainerRuntime, ContainerSpec, ContainerState, Result, WaitOutcome};
use crate::error::{RuntimeError, RuntimeErrorKind};
use crate::frames::{ContainerLogs, LogDemuxer, StreamKind};
use async_trait::async_trait;
use bastion_config::{constants, parse_env_in_range};
use bollard::{
    container::{
        Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions, LogOutput,
        LogsOptions, RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
    },
    errors::Error as BollardError,
    image::CreateImageOptions,
    models::{HostConfig, RestartPolicy, RestartPolicyNameEnum},
    Docker,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default upper bound for an image pull
const DEFAULT_PULL_TIMEOUT: Duration =
    Duration::from_secs(constants::DEFAULT_SANDBOX_PULL_TIMEOUT_SECS);

/// Container runtime backed by a local Docker daemon
///
/// Cheap to clone and safe to share: the bollard client is the only state.
#[derive(Clone)]
pub struct DockerRuntime {
    client: Docker,
    pull_timeout: Duration,
}

impl DockerRuntime {
    /// Connect using the platform defaults (`DOCKER_HOST` or the local socket)
    ///
    /// Fails when the local socket path does not exist. A client that builds may
    /// still have no daemon behind it; use [`ContainerRuntime::is_available`] to probe.
    pub fn new() -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| runtime_error(RuntimeErrorKind::Connection, e))?;
        Ok(Self::with_client(client))
    }

    /// Connect like [`DockerRuntime::new`], taking the pull timeout from `BASTION_SANDBOX_PULL_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self> {
        Ok(Self::new()?.with_pull_timeout(pull_timeout_from_env()))
    }

    pub fn with_client(client: Docker) -> Self {
        Self {
            client,
            pull_timeout: DEFAULT_PULL_TIMEOUT,
        }
    }

    pub fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.pull_timeout = timeout;
        self
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) => {
                let err = runtime_error(RuntimeErrorKind::ImagePull, e);
                if err.is_not_found() {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }
}

fn pull_timeout_from_env() -> Duration {
    Duration::from_secs(parse_env_in_range(
        constants::BASTION_SANDBOX_PULL_TIMEOUT_SECS,
        1..=constants::MAX_SANDBOX_PULL_TIMEOUT_SECS,
        constants::DEFAULT_SANDBOX_PULL_TIMEOUT_SECS,
    ))
}

/// Translate a bollard error, keeping `kind` and attaching any HTTP status
fn tagged_error(kind: RuntimeErrorKind, err: BollardError) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => RuntimeError::new(kind, message).with_status(status_code),
        other => RuntimeError::new(kind, other.to_string()),
    }
}

/// Translate a bollard error from a container or image lookup, promoting HTTP 404/409 to NotFound/Conflict
fn runtime_error(kind: RuntimeErrorKind, err: BollardError) -> RuntimeError {
    let mut err = tagged_error(kind, err);
    err.kind = match err.status_code {
        Some(404) => RuntimeErrorKind::NotFound,
        Some(409) => RuntimeErrorKind::Conflict,
        _ => err.kind,
    };
    err
}

/// Convert our spec to bollard config
fn to_bollard_config(spec: &ContainerSpec) -> Config<String> {
    let hc = &spec.host_config;
    let non_empty = |v: &Vec<String>| (!v.is_empty()).then(|| v.clone());

    let host_config = HostConfig {
        network_mode: Some(hc.network_mode.clone()),
        memory: hc.memory,
        memory_swap: hc.memory_swap,
        cpu_quota: hc.cpu_quota,
        cpu_period: hc.cpu_period,
        pids_limit: hc.pids_limit,
        binds: non_empty(&hc.binds),
        readonly_rootfs: Some(hc.readonly_rootfs),
        tmpfs: (!hc.tmpfs.is_empty()).then(|| {
            hc.tmpfs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<HashMap<_, _>>()
        }),
        cap_drop: non_empty(&hc.cap_drop),
        privileged: Some(hc.privileged),
        security_opt: non_empty(&hc.security_opt),
        restart_policy: Some(RestartPolicy {
            name: Some(RestartPolicyNameEnum::NO),
            maximum_retry_count: Some(0),
        }),
        // Removal is done explicitly so logs stay readable after exit
        auto_remove: Some(false),
        ..Default::default()
    };

    let labels: HashMap<String, String> = spec
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Config {
        image: Some(spec.image.clone()),
        cmd: Some(spec.cmd.clone()),
        env: spec.env.clone(),
        working_dir: spec.working_dir.clone(),
        labels: Some(labels),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        tty: Some(false),
        host_config: Some(host_config),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn is_available(&self) -> bool {
        match self.client.ping().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Docker not available: {}", e);
                false
            }
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        if self.image_exists(image).await? {
            debug!("Image {} already exists locally", image);
            return Ok(());
        }

        info!("Pulling image: {} (timeout: {:?})", image, self.pull_timeout);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let stream = self.client.create_image(Some(options), None, None);

        let pull = async {
            let mut stream = stream;
            let mut progressed = false;
            let mut last_status = String::new();

            while let Some(result) = stream.next().await {
                match result {
                    Ok(info) => {
                        if let Some(error) = info.error {
                            return Err(RuntimeError::new(
                                RuntimeErrorKind::PullProgress,
                                format!("Failed to pull image {}: {}", image, error),
                            ));
                        }
                        if let Some(status) = info.status {
                            if status != last_status {
                                debug!("Pull status: {}", status);
                                last_status = status;
                            }
                        }
                        progressed = true;
                    }
                    Err(e) => {
                        // Errors before any progress mean the pull itself was refused
                        let kind = if progressed {
                            RuntimeErrorKind::PullProgress
                        } else {
                            RuntimeErrorKind::ImagePull
                        };
                        // A 404 here is a missing image, never an idempotent "already gone"
                        return Err(tagged_error(kind, e));
                    }
                }
            }

            Ok(())
        };

        match tokio::time::timeout(self.pull_timeout, pull).await {
            Ok(Ok(())) => {
                info!("Successfully pulled image: {}", image);
                Ok(())
            }
            Ok(Err(e)) => {
                error!("{}", e);
                Err(e)
            }
            Err(_) => Err(RuntimeError::new(
                RuntimeErrorKind::ImagePull,
                format!("Timeout pulling image {} after {:?}", image, self.pull_timeout),
            )),
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        debug!("Creating container from image {}", spec.image);

        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });

        let response = self
            .client
            .create_container(options, to_bollard_config(spec))
            .await
            .map_err(|e| {
                error!("Failed to create container: {}", e);
                runtime_error(RuntimeErrorKind::Create, e)
            })?;

        for warning in &response.warnings {
            warn!("Docker warning for container {}: {}", response.id, warning);
        }

        info!("Created container {}", response.id);
        Ok(response.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        debug!("Starting container {}", container_id);

        self.client
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| {
                error!("Failed to start container {}: {}", container_id, e);
                runtime_error(RuntimeErrorKind::Start, e)
            })?;

        info!("Started container {}", container_id);
        Ok(())
    }

    async fn wait_container(&self, container_id: &str) -> Result<WaitOutcome> {
        let options = WaitContainerOptions {
            condition: "not-running".to_string(),
        };
        let mut stream = self.client.wait_container(container_id, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(WaitOutcome {
                exit_code: response.status_code,
            }),
            // bollard surfaces a nonzero exit status as an error
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => {
                Ok(WaitOutcome { exit_code: code })
            }
            Some(Err(e)) => Err(runtime_error(RuntimeErrorKind::Wait, e)),
            None => Err(RuntimeError::new(
                RuntimeErrorKind::Wait,
                format!("Wait stream for container {} ended without a status", container_id),
            )),
        }
    }

    async fn container_logs(&self, container_id: &str) -> Result<ContainerLogs> {
        let options = LogsOptions::<String> {
            follow: false,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        // bollard strips the 8-byte frame headers; payloads go straight to the demuxer
        let mut stream = self.client.logs(container_id, Some(options));
        let mut demuxer = LogDemuxer::new();

        while let Some(result) = stream.next().await {
            match result.map_err(|e| runtime_error(RuntimeErrorKind::Logs, e))? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    demuxer.push_payload(StreamKind::Stdout, &message)
                }
                LogOutput::StdErr { message } => demuxer.push_payload(StreamKind::Stderr, &message),
                LogOutput::StdIn { .. } => {}
            }
        }

        Ok(demuxer.finish())
    }

    async fn inspect_container(&self, container_id: &str) -> Result<ContainerState> {
        let inspect = self
            .client
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| runtime_error(RuntimeErrorKind::Inspect, e))?;

        let state = inspect.state.ok_or_else(|| {
            RuntimeError::new(
                RuntimeErrorKind::Inspect,
                "Container has no state information",
            )
        })?;

        Ok(ContainerState {
            status: state
                .status
                .as_ref()
                .map(|s| s.as_ref().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            running: state.running.unwrap_or(false),
            exit_code: state.exit_code,
            oom_killed: state.oom_killed.unwrap_or(false),
        })
    }

    async fn kill_container(&self, container_id: &str) -> Result<()> {
        info!("Killing container {}", container_id);

        let options = KillContainerOptions { signal: "SIGKILL" };

        match self.client.kill_container(container_id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let err = runtime_error(RuntimeErrorKind::Kill, e);
                if err.is_not_found() {
                    debug!("Container {} already gone, nothing to kill", container_id);
                    Ok(())
                } else {
                    error!("Failed to kill container {}: {}", container_id, err);
                    Err(err)
                }
            }
        }
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        debug!("Removing container {}", container_id);

        let options = RemoveContainerOptions {
            force: true,
            v: true, // Remove anonymous volumes
            ..Default::default()
        };

        match self
            .client
            .remove_container(container_id, Some(options))
            .await
        {
            Ok(()) => {
                info!("Removed container {}", container_id);
                Ok(())
            }
            Err(e) => {
                let err = runtime_error(RuntimeErrorKind::Remove, e);
                if err.is_not_found() {
                    debug!("Container {} already removed", container_id);
                    Ok(())
                } else {
                    error!("Failed to remove container {}: {}", container_id, err);
                    Err(err)
                }
            }
        }
    }
}
