//! Lifecycle management for the single sandbox container.
//!
//! The sandbox owns at most one container; its identifier is set iff the
//! container is running. `ensure` is idempotent and safe to call at every
//! process start: it adopts a running container with the configured name,
//! force-removes a stopped one, and otherwise creates and starts a fresh one
//! (pulling the image once if it is missing locally). The container command
//! is a sleep loop so it outlives individual execs; the sandbox never
//! recreates it mid-session — if it dies, submissions fail through the exec
//! path and the operator restarts the process.

use std::pin::Pin;
use std::sync::Mutex;

use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, UploadToContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::{Stream, StreamExt};
use tokio::io::AsyncWrite;

use crate::config::SandboxConfig;
use crate::errors::SandboxError;

/// The demultiplexed output side of an attached exec: frames arrive in the
/// order the engine produced them, tagged stdout/stderr.
pub type ExecOutput = Pin<Box<dyn Stream<Item = Result<LogOutput, DockerError>> + Send>>;

/// The raw input side of an attached exec, written as line-terminated bytes.
pub type ExecInput = Pin<Box<dyn AsyncWrite + Send>>;

/// Result of inspecting an exec instance.
#[derive(Debug, Clone, Copy)]
pub struct ExecStatus {
    pub running: bool,
    pub exit_code: i64,
}

/// Handle on the container engine plus the sandbox container identity.
pub struct Sandbox {
    docker: Docker,
    config: SandboxConfig,
    container_id: Mutex<Option<String>>,
}

impl Sandbox {
    /// Connect to the local container engine. No container is touched until
    /// [`ensure`](Sandbox::ensure) runs.
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self {
            docker,
            config,
            container_id: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// The live container identifier, if the container is running.
    pub fn container_id(&self) -> Option<String> {
        self.container_id.lock().ok().and_then(|id| id.clone())
    }

    fn set_container_id(&self, id: String) {
        if let Ok(mut slot) = self.container_id.lock() {
            *slot = Some(id);
        }
    }

    fn require_container(&self) -> Result<String, SandboxError> {
        self.container_id().ok_or(SandboxError::NotRunning)
    }

    /// Make sure the named container exists and is running, adopting or
    /// replacing whatever is there. Idempotent.
    pub async fn ensure(&self) -> Result<(), SandboxError> {
        log::info!("Checking for existing container...");
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                ..Default::default()
            }))
            .await?;

        let wanted = format!("/{}", self.config.name);
        for summary in containers {
            let names = summary.names.unwrap_or_default();
            if !names.iter().any(|name| name == &wanted) {
                continue;
            }
            let id = summary.id.unwrap_or_default();
            let state = summary.state.unwrap_or_default();
            log::info!("Found existing container {} with state {}", short(&id), state);

            if state == "running" {
                self.set_container_id(id);
                return Ok(());
            }

            log::info!("Removing stopped container {}", short(&id));
            self.docker
                .remove_container(
                    &id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await?;
        }

        log::info!("Creating new container...");
        let options = CreateContainerOptions {
            name: self.config.name.clone(),
            platform: None,
        };
        let config = self.container_config();

        let created = match self
            .docker
            .create_container(Some(options.clone()), config.clone())
            .await
        {
            Ok(response) => response,
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                log::info!("Image not found locally, pulling {}...", self.config.image);
                self.pull_image().await?;
                // One retry after the pull; any further failure is fatal.
                self.docker.create_container(Some(options), config).await?
            }
            Err(err) => return Err(err.into()),
        };

        log::info!("Starting container {}", short(&created.id));
        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await?;

        self.set_container_id(created.id);
        Ok(())
    }

    async fn pull_image(&self) -> Result<(), SandboxError> {
        let options = CreateImageOptions {
            from_image: self.config.image.clone(),
            ..Default::default()
        };
        let mut pull = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = pull.next().await {
            progress?;
        }
        Ok(())
    }

    fn container_config(&self) -> Config<String> {
        Config {
            image: Some(self.config.image.clone()),
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "while true; do sleep 1; done".to_string(),
            ]),
            working_dir: Some(self.config.work_dir.clone()),
            env: Some(self.config.env.clone()),
            host_config: Some(HostConfig {
                memory: Some(self.config.memory_limit),
                memory_swap: Some(self.config.memory_limit),
                nano_cpus: Some(self.config.nano_cpus),
                pids_limit: Some(self.config.pids_limit),
                network_mode: Some("none".to_string()),
                auto_remove: Some(false),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Copy a tar archive into the container at `path`.
    pub async fn copy_in(&self, path: &str, archive: Vec<u8>) -> Result<(), SandboxError> {
        let id = self.require_container()?;
        let options = UploadToContainerOptions {
            path: path.to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(&id, Some(options), archive.into())
            .await?;
        Ok(())
    }

    /// Create an exec instance bound to the container. stdout and stderr are
    /// always attached; stdin only on request. Never a TTY — the output side
    /// must stay multiplexed.
    pub async fn create_exec(
        &self,
        cmd: Vec<String>,
        attach_stdin: bool,
    ) -> Result<String, SandboxError> {
        let id = self.require_container()?;
        let options = CreateExecOptions {
            cmd: Some(cmd),
            working_dir: Some(self.config.work_dir.clone()),
            attach_stdin: Some(attach_stdin),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };
        let created = self.docker.create_exec(&id, options).await?;
        Ok(created.id)
    }

    /// Start an exec instance and attach to its duplex byte stream.
    pub async fn attach_exec(&self, exec_id: &str) -> Result<(ExecOutput, ExecInput), SandboxError> {
        match self.docker.start_exec(exec_id, None).await? {
            StartExecResults::Attached { output, input } => Ok((output, input)),
            StartExecResults::Detached => Err(SandboxError::Detached),
        }
    }

    /// Inspect an exec instance for liveness and exit code.
    pub async fn inspect_exec(&self, exec_id: &str) -> Result<ExecStatus, SandboxError> {
        let inspect = self.docker.inspect_exec(exec_id).await?;
        Ok(ExecStatus {
            running: inspect.running.unwrap_or(false),
            exit_code: inspect.exit_code.unwrap_or(0),
        })
    }

    /// Whether the engine still answers for the sandbox container.
    pub async fn is_healthy(&self) -> Result<(), SandboxError> {
        let id = self.require_container()?;
        self.docker
            .inspect_container(&id, None::<InspectContainerOptions>)
            .await?;
        Ok(())
    }
}

fn short(id: &str) -> &str {
    &id[..id.len().min(12)]
}
