//! Container engine access.
//!
//! `ContainerEngine` is the seam between the console and the container
//! runtime; `DockerEngine` implements it with bollard. `ContainerHost` is what
//! handlers use: it converts engine failures into user-facing outcomes and
//! retries image pulls and removals.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, RestartContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{CreateImageOptions, ListImagesOptions, RemoveImageOptions};
use bollard::service::{HostConfig, PortBinding};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use crate::errors::{EngineError, EngineResult};
use crate::models::{ContainerSummary, ExecOutput, ImageSummary, OpOutcome, PortMapping, RunSpec};

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn list_containers(&self, all: bool) -> EngineResult<Vec<ContainerSummary>>;
    async fn list_images(&self) -> EngineResult<Vec<ImageSummary>>;
    async fn start(&self, id: &str) -> EngineResult<()>;
    async fn stop(&self, id: &str) -> EngineResult<()>;
    async fn restart(&self, id: &str) -> EngineResult<()>;
    async fn remove(&self, id: &str, force: bool) -> EngineResult<()>;
    async fn pull(&self, image: &str) -> EngineResult<()>;
    async fn remove_image(&self, id: &str, force: bool) -> EngineResult<()>;
    /// Create and start a detached container, returning its id
    async fn run(&self, spec: &RunSpec) -> EngineResult<String>;
    async fn is_running(&self, name: &str) -> EngineResult<bool>;
    async fn logs(&self, id: &str, tail: usize) -> EngineResult<String>;
    async fn exec(&self, container: &str, cmd: Vec<String>) -> EngineResult<ExecOutput>;
}

/// Docker engine reached through bollard
pub struct DockerEngine {
    client: Docker,
}

impl DockerEngine {
    pub async fn connect(socket: &str, timeout_secs: u64) -> EngineResult<Self> {
        let client = if socket.starts_with("unix://") || socket.starts_with('/') {
            let path = socket.trim_start_matches("unix://");
            Docker::connect_with_socket(path, timeout_secs, bollard::API_DEFAULT_VERSION)
                .map_err(|e| EngineError::Connection(e.to_string()))?
        } else if socket.starts_with("http://") || socket.starts_with("tcp://") {
            Docker::connect_with_http(socket, timeout_secs, bollard::API_DEFAULT_VERSION)
                .map_err(|e| EngineError::Connection(e.to_string()))?
        } else {
            Docker::connect_with_local_defaults()
                .map_err(|e| EngineError::Connection(e.to_string()))?
        };

        client
            .ping()
            .await
            .map_err(|e| EngineError::Connection(e.to_string()))?;

        tracing::info!("Connected to container engine at {} (timeout {}s)", socket, timeout_secs);
        Ok(Self { client })
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn list_containers(&self, all: bool) -> EngineResult<Vec<ContainerSummary>> {
        let options = ListContainersOptions::<String> {
            all,
            ..Default::default()
        };
        let containers = self.client.list_containers(Some(options)).await?;

        Ok(containers
            .into_iter()
            .map(|c| {
                let ports: Vec<PortMapping> = c
                    .ports
                    .unwrap_or_default()
                    .into_iter()
                    .map(|p| PortMapping {
                        private_port: p.private_port,
                        public_port: p.public_port,
                        host_ip: p.ip,
                        protocol: p
                            .typ
                            .map(|t| t.to_string())
                            .unwrap_or_else(|| "tcp".to_string()),
                    })
                    .collect();
                let web_url = pick_web_url(&ports);
                ContainerSummary {
                    id: c.id.unwrap_or_default(),
                    name: c
                        .names
                        .and_then(|n| n.first().cloned())
                        .unwrap_or_default()
                        .trim_start_matches('/')
                        .to_string(),
                    image: c.image.unwrap_or_default(),
                    state: c.state.unwrap_or_default(),
                    status: c.status.unwrap_or_default(),
                    ports,
                    web_url,
                }
            })
            .collect())
    }

    async fn list_images(&self) -> EngineResult<Vec<ImageSummary>> {
        let options = ListImagesOptions::<String> {
            all: false,
            ..Default::default()
        };
        let images = self.client.list_images(Some(options)).await?;

        Ok(images
            .into_iter()
            .map(|i| ImageSummary {
                id: i.id,
                tags: i.repo_tags,
                size: i.size,
            })
            .collect())
    }

    async fn start(&self, id: &str) -> EngineResult<()> {
        self.client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop(&self, id: &str) -> EngineResult<()> {
        self.client
            .stop_container(id, None::<StopContainerOptions>)
            .await?;
        Ok(())
    }

    async fn restart(&self, id: &str) -> EngineResult<()> {
        self.client
            .restart_container(id, None::<RestartContainerOptions>)
            .await?;
        Ok(())
    }

    async fn remove(&self, id: &str, force: bool) -> EngineResult<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.client.remove_container(id, Some(options)).await?;
        Ok(())
    }

    async fn pull(&self, image: &str) -> EngineResult<()> {
        let (repository, tag) = split_image_ref(image);
        let options = CreateImageOptions {
            from_image: repository,
            tag,
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            let info = result?;
            if let Some(error) = info.error {
                return Err(EngineError::Pull(error));
            }
            if let Some(status) = info.status {
                tracing::debug!("pull {}: {}", image, status);
            }
        }
        Ok(())
    }

    async fn remove_image(&self, id: &str, force: bool) -> EngineResult<()> {
        let options = RemoveImageOptions {
            force,
            ..Default::default()
        };
        self.client.remove_image(id, Some(options), None).await?;
        Ok(())
    }

    async fn run(&self, spec: &RunSpec) -> EngineResult<String> {
        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        for (container_port, host_port) in &spec.ports {
            let key = normalize_port_key(container_port);
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(host_port.to_string()),
                }]),
            );
        }

        let host_config = HostConfig {
            port_bindings: if port_bindings.is_empty() { None } else { Some(port_bindings) },
            binds: if spec.volumes.is_empty() { None } else { Some(spec.volumes.clone()) },
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: if spec.env.is_empty() { None } else { Some(spec.env.clone()) },
            exposed_ports: if exposed_ports.is_empty() { None } else { Some(exposed_ports) },
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };
        let response = self.client.create_container(Some(options), config).await?;
        self.client
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(response.id)
    }

    async fn is_running(&self, name: &str) -> EngineResult<bool> {
        let info = self
            .client
            .inspect_container(name, None::<InspectContainerOptions>)
            .await?;
        Ok(info.state.and_then(|s| s.running).unwrap_or(false))
    }

    async fn logs(&self, id: &str, tail: usize) -> EngineResult<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };

        let mut stream = self.client.logs(id, Some(options));
        let mut output = String::new();
        while let Some(chunk) = stream.next().await {
            output.push_str(&String::from_utf8_lossy(&log_bytes(chunk?)));
        }
        Ok(output)
    }

    async fn exec(&self, container: &str, cmd: Vec<String>) -> EngineResult<ExecOutput> {
        let options = CreateExecOptions {
            cmd: Some(cmd),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let exec = self.client.create_exec(container, options).await?;

        let mut output = String::new();
        if let StartExecResults::Attached { output: mut stream, .. } =
            self.client.start_exec(&exec.id, None).await?
        {
            while let Some(chunk) = stream.next().await {
                output.push_str(&String::from_utf8_lossy(&log_bytes(chunk?)));
            }
        }

        let inspect = self.client.inspect_exec(&exec.id).await?;
        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(0),
            output,
        })
    }
}

fn log_bytes(chunk: LogOutput) -> bytes::Bytes {
    match chunk {
        LogOutput::StdOut { message }
        | LogOutput::StdErr { message }
        | LogOutput::StdIn { message }
        | LogOutput::Console { message } => message,
    }
}

/// Splits `repo[:tag]` into its parts. A registry port (`host:5000/app`) is
/// not mistaken for a tag; a missing tag means `latest`.
pub fn split_image_ref(image: &str) -> (&str, &str) {
    let image = image.split('@').next().unwrap_or(image);
    match image.rfind(':') {
        Some(idx) if !image[idx + 1..].contains('/') => (&image[..idx], &image[idx + 1..]),
        _ => (image, "latest"),
    }
}

fn normalize_port_key(port: &str) -> String {
    if port.contains('/') {
        port.to_string()
    } else {
        format!("{}/tcp", port)
    }
}

// Ports that usually serve a web UI, checked before any other published port
const WEB_PORTS: [u16; 11] = [80, 443, 3000, 5000, 6881, 8080, 8081, 8096, 9000, 9091, 32400];

/// Picks the URL a user would open for a container: a published TCP port
/// behind a well-known web port first, otherwise the first published TCP port.
pub fn pick_web_url(ports: &[PortMapping]) -> Option<String> {
    let published = || {
        ports
            .iter()
            .filter(|p| p.protocol == "tcp")
            .filter_map(|p| p.public_port.map(|public| (p, public)))
    };

    let (mapping, public) = published()
        .find(|(p, _)| WEB_PORTS.contains(&p.private_port))
        .or_else(|| published().next())?;

    let host = match mapping.host_ip.as_deref() {
        None | Some("") | Some("0.0.0.0") | Some("127.0.0.1") | Some("::") => "localhost",
        Some(ip) => ip,
    };
    Some(format!("http://{}:{}", host, public))
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Runs `op` up to `policy.attempts` times, sleeping `policy.delay` between
/// attempts. Returns the first success or the last failure.
pub async fn retry_operation<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                tracing::warn!("{} attempt {}/{} failed: {}", label, attempt, attempts, e);
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!("{} failed after {} attempts: {}", label, attempts, e);
                return Err(e);
            }
        }
    }
}

/// What the web layer talks to for container and image work
#[derive(Clone)]
pub struct ContainerHost {
    engine: Arc<dyn ContainerEngine>,
    retry: RetryPolicy,
}

impl ContainerHost {
    pub fn new(engine: Arc<dyn ContainerEngine>, retry: RetryPolicy) -> Self {
        Self { engine, retry }
    }

    pub fn engine(&self) -> Arc<dyn ContainerEngine> {
        self.engine.clone()
    }

    /// Runs an engine call and turns its result into a message for the user.
    /// Engine errors never escape.
    pub async fn safe_operation<Fut>(
        &self,
        target: &str,
        success_msg: &str,
        error_prefix: &str,
        op: Fut,
    ) -> OpOutcome
    where
        Fut: Future<Output = EngineResult<()>>,
    {
        match op.await {
            Ok(()) => {
                tracing::info!("container {}: {}", target, success_msg);
                OpOutcome::success(success_msg)
            }
            Err(e) => {
                let message = format!("{}: {}", error_prefix, e);
                tracing::error!("container {}: {}", target, message);
                OpOutcome::failure(message)
            }
        }
    }

    pub async fn list_containers(&self, all: bool) -> EngineResult<Vec<ContainerSummary>> {
        self.engine.list_containers(all).await
    }

    pub async fn list_images(&self) -> EngineResult<Vec<ImageSummary>> {
        self.engine.list_images().await
    }

    /// Lower-cased names of every container, running or not
    pub async fn installed_names(&self) -> EngineResult<Vec<String>> {
        Ok(self
            .engine
            .list_containers(true)
            .await?
            .into_iter()
            .map(|c| c.name.to_lowercase())
            .collect())
    }

    pub async fn start(&self, id: &str) -> OpOutcome {
        self.safe_operation(id, "Container started", "Failed to start container", self.engine.start(id))
            .await
    }

    pub async fn stop(&self, id: &str) -> OpOutcome {
        self.safe_operation(id, "Container stopped", "Failed to stop container", self.engine.stop(id))
            .await
    }

    pub async fn restart(&self, id: &str) -> OpOutcome {
        self.safe_operation(id, "Container restarted", "Failed to restart container", self.engine.restart(id))
            .await
    }

    pub async fn remove(&self, id: &str, force: bool) -> OpOutcome {
        self.safe_operation(id, "App removed", "Failed to remove container", self.engine.remove(id, force))
            .await
    }

    pub async fn pull_image(&self, image: &str) -> OpOutcome {
        let label = format!("pull {}", image);
        let result = retry_operation(self.retry, &label, || self.engine.pull(image)).await;
        self.safe_operation(image, "Image pulled", "Image pull failed after retries", async { result })
            .await
    }

    pub async fn remove_image(&self, id: &str) -> OpOutcome {
        let label = format!("remove image {}", id);
        let result = retry_operation(self.retry, &label, || self.engine.remove_image(id, true)).await;
        self.safe_operation(id, "App source removed", "App source removal failed after retries", async { result })
            .await
    }

    pub async fn container_logs(&self, id: &str) -> EngineResult<String> {
        self.engine.logs(id, 100).await
    }

    pub async fn pull(&self, image: &str) -> EngineResult<()> {
        self.engine.pull(image).await
    }

    pub async fn run(&self, spec: &RunSpec) -> EngineResult<String> {
        tracing::info!("Running container {} from {}", spec.name, spec.image);
        self.engine.run(spec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockEngine;
    use std::sync::atomic::Ordering;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
        }
    }

    fn tcp(private_port: u16, public_port: Option<u16>, host_ip: &str) -> PortMapping {
        PortMapping {
            private_port,
            public_port,
            host_ip: Some(host_ip.to_string()),
            protocol: "tcp".to_string(),
        }
    }

    #[test]
    fn test_split_image_ref() {
        assert_eq!(split_image_ref("nginx"), ("nginx", "latest"));
        assert_eq!(split_image_ref("nginx:1.25"), ("nginx", "1.25"));
        assert_eq!(split_image_ref("filebrowser/filebrowser:latest"), ("filebrowser/filebrowser", "latest"));
        assert_eq!(split_image_ref("registry:5000/team/app"), ("registry:5000/team/app", "latest"));
        assert_eq!(split_image_ref("registry:5000/team/app:v2"), ("registry:5000/team/app", "v2"));
    }

    #[test]
    fn test_web_url_prefers_known_web_ports() {
        let ports = vec![tcp(22, Some(2222), "0.0.0.0"), tcp(8096, Some(18096), "0.0.0.0")];
        assert_eq!(pick_web_url(&ports).as_deref(), Some("http://localhost:18096"));
    }

    #[test]
    fn test_web_url_falls_back_to_first_tcp_port() {
        let mut udp = tcp(53, Some(5353), "0.0.0.0");
        udp.protocol = "udp".to_string();
        let ports = vec![udp, tcp(7000, None, "0.0.0.0"), tcp(7001, Some(17001), "192.168.1.5")];
        assert_eq!(pick_web_url(&ports).as_deref(), Some("http://192.168.1.5:17001"));
        assert_eq!(pick_web_url(&[]), None);
    }

    #[tokio::test]
    async fn test_retry_returns_first_success() {
        let engine = Arc::new(MockEngine::default());
        engine.pull_failures.store(2, Ordering::SeqCst);
        let host = ContainerHost::new(engine.clone(), fast_retry());

        let outcome = host.pull_image("nginx:latest").await;
        assert!(outcome.ok, "{}", outcome.message);
        assert_eq!(engine.pull_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_reports_last_error() {
        let engine = Arc::new(MockEngine::default());
        engine.pull_failures.store(10, Ordering::SeqCst);
        let host = ContainerHost::new(engine.clone(), fast_retry());

        let outcome = host.pull_image("nginx:latest").await;
        assert!(!outcome.ok);
        assert!(outcome.message.contains("Image pull failed after retries"));
        assert_eq!(engine.pull_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_safe_operation_never_propagates() {
        let engine = Arc::new(MockEngine::default());
        let host = ContainerHost::new(engine.clone(), fast_retry());

        let outcome = host.start("does-not-exist").await;
        assert!(!outcome.ok);
        assert!(outcome.message.starts_with("Failed to start container"));

        engine.add_container("web", "nginx:latest", false);
        let outcome = host.start("web").await;
        assert!(outcome.ok);
        assert!(engine.is_running("web").await.unwrap());

        let outcome = host.remove("web", true).await;
        assert!(outcome.ok);
        assert!(host.installed_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_installed_names_are_lowercase() {
        let engine = Arc::new(MockEngine::default());
        engine.add_container("Jellyfin", "jellyfin/jellyfin", true);
        let host = ContainerHost::new(engine, fast_retry());
        assert_eq!(host.installed_names().await.unwrap(), vec!["jellyfin".to_string()]);
    }
}
