//! Container manager (C12): container-isolated skill execution with
//! network-policy enforcement (§4.9).

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use soma_config::ContainerConfig;

use crate::error::{ContainerError, Result};
use crate::frame::{encode_frame, FrameDecoder, IpcRequest, IpcResponse};
use crate::network::{add_host_args, apply_iptables_policy, helper_image_available, resolve_domains};

/// Label applied to every container and volume this manager creates, so
/// `prune`/`destroy_all` can find orphans without tracking external state.
pub const MANAGED_LABEL: &str = "soma.managed=true";

const IPTABLES_HELPER_IMAGE: &str = "soma-iptables-helper:latest";
const DEFAULT_ALLOWED_PORTS: &[u16] = &[443, 80];
const IPC_TIMEOUT_BUFFER: Duration = Duration::from_secs(5);

/// A single outstanding IPC request awaiting its response.
struct PendingRequest {
    resolver: oneshot::Sender<IpcResponse>,
}

/// Per-container mutable state. Every handle is destroyed exactly once;
/// `destroyed` guards against double-teardown.
pub struct ContainerHandle {
    pub container_id: String,
    pub volume_name: String,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<tokio::process::ChildStdin>>,
    pending: Arc<Mutex<HashMap<String, PendingRequest>>>,
    lifetime_timer: Mutex<Option<JoinHandle<()>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    destroyed: Mutex<bool>,
    runtime_binary: String,
}

impl ContainerHandle {
    /// Send a request over stdin, wait up to `timeout + buffer` for the
    /// matching response, frame-decoded from stdout by the background
    /// reader task.
    #[instrument(skip(self, args), fields(container_id = %self.container_id))]
    pub async fn execute(&self, skill: &str, args: serde_json::Value, timeout: Duration) -> Result<serde_json::Value> {
        let id = Uuid::new_v4().to_string();
        let request = IpcRequest::Execute { id: id.clone(), skill: skill.to_string(), args };
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), PendingRequest { resolver: tx });

        {
            let mut guard = self.stdin.lock().await;
            let stdin = guard.as_mut().ok_or_else(|| ContainerError::AlreadyDestroyed(self.container_id.clone()))?;
            let frame = encode_frame(&request)?;
            stdin.write_all(&frame).await?;
            stdin.flush().await?;
        }

        match tokio::time::timeout(timeout + IPC_TIMEOUT_BUFFER, rx).await {
            Ok(Ok(IpcResponse::Result { data, .. })) => Ok(data),
            Ok(Ok(IpcResponse::Error { message, .. })) => Err(ContainerError::RuntimeCommand(message)),
            Ok(Ok(IpcResponse::CredentialAck { .. })) => Ok(serde_json::Value::Null),
            Ok(Err(_)) => Err(ContainerError::RequestTimeout(id)),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ContainerError::RequestTimeout(id))
            }
        }
    }

    /// Deliver a credential via an IPC frame, never through the environment.
    pub async fn send_credential(&self, name: &str, value: &str) -> Result<()> {
        let id = Uuid::new_v4().to_string();
        let request = IpcRequest::Credential { id, name: name.to_string(), value: value.to_string() };
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or_else(|| ContainerError::AlreadyDestroyed(self.container_id.clone()))?;
        let frame = encode_frame(&request)?;
        stdin.write_all(&frame).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Idempotent teardown: clears the lifetime timer, rejects all pending
    /// requests, closes stdin, removes the container and volume, and sends
    /// SIGKILL if the child is still alive. Safe to call more than once.
    #[instrument(skip(self), fields(container_id = %self.container_id))]
    pub async fn destroy(&self) {
        let mut destroyed = self.destroyed.lock().await;
        if *destroyed {
            return;
        }
        *destroyed = true;
        drop(destroyed);

        if let Some(timer) = self.lifetime_timer.lock().await.take() {
            timer.abort();
        }
        if let Some(reader) = self.reader_task.lock().await.take() {
            reader.abort();
        }

        let mut pending = self.pending.lock().await;
        for (_, req) in pending.drain() {
            let _ = req.resolver.send(IpcResponse::Error {
                id: None,
                message: "container destroyed".to_string(),
            });
        }
        drop(pending);

        self.stdin.lock().await.take();

        let _ = Command::new(&self.runtime_binary).args(["rm", "-f", &self.container_id]).output().await;
        let _ = Command::new(&self.runtime_binary).args(["volume", "rm", "-f", &self.volume_name]).output().await;

        let mut child_guard = self.child.lock().await;
        if let Some(child) = child_guard.as_mut() {
            let _ = child.start_kill();
        }
        child_guard.take();

        info!("container destroyed");
    }

    pub async fn is_destroyed(&self) -> bool {
        *self.destroyed.lock().await
    }
}

/// Options the caller supplies when starting a sandboxed skill.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub workspace_dir: Option<std::path::PathBuf>,
    pub allowed_domains: Vec<String>,
    pub allowed_ports: Vec<u16>,
    pub lifetime_cap: Option<Duration>,
}

/// Creates and tracks sandboxed skill containers.
pub struct ContainerManager {
    config: ContainerConfig,
    handles: Mutex<HashMap<String, Arc<ContainerHandle>>>,
}

impl ContainerManager {
    pub fn new(config: ContainerConfig) -> Self {
        Self { config, handles: Mutex::new(HashMap::new()) }
    }

    /// Start a new sandboxed skill container. On any failure during network
    /// policy setup, the partially-created container and volume are
    /// destroyed before the error is returned — no orphan ever survives a
    /// failed start.
    #[instrument(skip(self, options))]
    pub async fn start(&self, options: StartOptions) -> Result<Arc<ContainerHandle>> {
        let suffix = Uuid::new_v4();
        let container_name = format!("soma-skill-{suffix}");
        let volume_name = format!("soma-ws-{suffix}");

        self.create_volume(&volume_name).await?;
        if let Some(workspace) = &options.workspace_dir {
            if let Err(e) = self.seed_workspace(&volume_name, workspace).await {
                self.destroy_volume(&volume_name).await;
                return Err(e);
            }
        }

        let network_mode = if options.allowed_domains.is_empty() { "none" } else { "bridge" };

        let mut args = vec![
            "create".to_string(),
            "--name".to_string(),
            container_name.clone(),
            "--label".to_string(),
            MANAGED_LABEL.to_string(),
            "--read-only".to_string(),
            "--cap-drop=ALL".to_string(),
            "--security-opt".to_string(),
            "no-new-privileges".to_string(),
            "--pids-limit=128".to_string(),
            "--memory=512m".to_string(),
            "--cpus=1".to_string(),
            "--tmpfs".to_string(),
            "/tmp:noexec,nosuid,size=64m".to_string(),
            "--user".to_string(),
            "1000:1000".to_string(),
            "-v".to_string(),
            format!("{volume_name}:/workspace"),
            "-i".to_string(),
            "--network".to_string(),
            network_mode.to_string(),
        ];

        let mut resolved_domains = Vec::new();
        if !options.allowed_domains.is_empty() {
            resolved_domains = match resolve_domains(&options.allowed_domains).await {
                Ok(r) => r,
                Err(e) => {
                    self.destroy_volume(&volume_name).await;
                    return Err(e);
                }
            };
            args.push("--dns".to_string());
            args.push("127.0.0.1".to_string());
            args.push("--sysctl".to_string());
            args.push("net.ipv6.conf.all.disable_ipv6=1".to_string());
            args.extend(add_host_args(&resolved_domains));
        }

        args.push(self.config.image.clone());

        let status = Command::new(&self.config.runtime_binary).args(&args).output().await;
        let status = match status {
            Ok(o) if o.status.success() => o,
            Ok(o) => {
                self.destroy_volume(&volume_name).await;
                return Err(ContainerError::RuntimeCommand(String::from_utf8_lossy(&o.stderr).to_string()));
            }
            Err(e) => {
                self.destroy_volume(&volume_name).await;
                return Err(ContainerError::Io(e));
            }
        };
        let _ = status;

        if !options.allowed_domains.is_empty() {
            if let Err(e) = self.apply_network_policy(&container_name, &resolved_domains, &options.allowed_ports).await {
                self.force_remove(&container_name, &volume_name).await;
                return Err(e);
            }
        }

        let mut child = Command::new(&self.config.runtime_binary)
            .args(["start", "-ai", &container_name])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                ContainerError::RuntimeCommand(format!("failed to attach stdio: {e}"))
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();

        let pending: Arc<Mutex<HashMap<String, PendingRequest>>> = Arc::new(Mutex::new(HashMap::new()));
        let reader_task = stdout.map(|stdout| spawn_reader(stdout, Arc::clone(&pending)));

        let handle = Arc::new(ContainerHandle {
            container_id: container_name.clone(),
            volume_name,
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(stdin),
            pending,
            lifetime_timer: Mutex::new(None),
            reader_task: Mutex::new(reader_task),
            destroyed: Mutex::new(false),
            runtime_binary: self.config.runtime_binary.clone(),
        });

        let cap = options.lifetime_cap.unwrap_or_else(|| Duration::from_secs(self.config.lifetime_cap_secs));
        let timer_handle = Arc::clone(&handle);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(cap).await;
            warn!(container_id = %timer_handle.container_id, "container lifetime cap reached — destroying");
            timer_handle.destroy().await;
        });
        *handle.lifetime_timer.lock().await = Some(timer);

        self.handles.lock().await.insert(container_name.clone(), Arc::clone(&handle));
        info!(container_id = %container_name, network_mode, "container started");
        Ok(handle)
    }

    async fn apply_network_policy(
        &self,
        container_id: &str,
        resolved: &[crate::network::ResolvedDomain],
        allowed_ports: &[u16],
    ) -> Result<()> {
        let ports = if allowed_ports.is_empty() { DEFAULT_ALLOWED_PORTS } else { allowed_ports };

        if !helper_image_available(&self.config.runtime_binary, IPTABLES_HELPER_IMAGE).await {
            warn!("iptables helper image unavailable — degrading to network none");
            let _ = Command::new(&self.config.runtime_binary)
                .args(["network", "disconnect", "bridge", container_id])
                .output()
                .await;
            return Ok(());
        }

        let _ = Command::new(&self.config.runtime_binary).args(["start", container_id]).output().await;
        let _ = Command::new(&self.config.runtime_binary).args(["pause", container_id]).output().await;

        let result = apply_iptables_policy(&self.config.runtime_binary, IPTABLES_HELPER_IMAGE, container_id, resolved, ports).await;

        let _ = Command::new(&self.config.runtime_binary).args(["unpause", container_id]).output().await;
        result
    }

    async fn create_volume(&self, volume_name: &str) -> Result<()> {
        let output = Command::new(&self.config.runtime_binary)
            .args(["volume", "create", "--label", MANAGED_LABEL, volume_name])
            .output()
            .await?;
        if !output.status.success() {
            return Err(ContainerError::RuntimeCommand(String::from_utf8_lossy(&output.stderr).to_string()));
        }
        Ok(())
    }

    /// Seed a named volume by tarring `workspace_dir` into `/workspace`,
    /// setting owner/group to `1000:1000`.
    async fn seed_workspace(&self, volume_name: &str, workspace_dir: &Path) -> Result<()> {
        let output = Command::new(&self.config.runtime_binary)
            .args([
                "run",
                "--rm",
                "-v",
                &format!("{volume_name}:/workspace"),
                "-v",
                &format!("{}:/seed:ro", workspace_dir.display()),
                "alpine",
                "sh",
                "-c",
                "cp -a /seed/. /workspace/ && chown -R 1000:1000 /workspace",
            ])
            .output()
            .await?;
        if !output.status.success() {
            return Err(ContainerError::RuntimeCommand(String::from_utf8_lossy(&output.stderr).to_string()));
        }
        Ok(())
    }

    /// Copy a stopped container's workspace volume contents out to
    /// `host_dir`.
    pub async fn copy_workspace_out(&self, volume_name: &str, host_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(host_dir).await?;
        let output = Command::new(&self.config.runtime_binary)
            .args([
                "run",
                "--rm",
                "-v",
                &format!("{volume_name}:/workspace:ro"),
                "-v",
                &format!("{}:/out", host_dir.display()),
                "alpine",
                "sh",
                "-c",
                "cp -a /workspace/. /out/",
            ])
            .output()
            .await?;
        if !output.status.success() {
            return Err(ContainerError::RuntimeCommand(String::from_utf8_lossy(&output.stderr).to_string()));
        }
        Ok(())
    }

    async fn destroy_volume(&self, volume_name: &str) {
        let _ = Command::new(&self.config.runtime_binary).args(["volume", "rm", "-f", volume_name]).output().await;
    }

    async fn force_remove(&self, container_id: &str, volume_name: &str) {
        let _ = Command::new(&self.config.runtime_binary).args(["rm", "-f", container_id]).output().await;
        self.destroy_volume(volume_name).await;
    }

    pub async fn get(&self, container_id: &str) -> Option<Arc<ContainerHandle>> {
        self.handles.lock().await.get(container_id).cloned()
    }

    /// Destroy a tracked handle by id. No-op if unknown.
    pub async fn destroy(&self, container_id: &str) {
        if let Some(handle) = self.handles.lock().await.remove(container_id) {
            handle.destroy().await;
        }
    }

    /// Remove labeled containers and volumes older than `max_age`. Returns
    /// the count removed. Sweeps both tracked handles and any orphans that
    /// survived a prior crash (found by the managed label).
    pub async fn prune(&self, max_age: Duration) -> Result<usize> {
        let mut removed = 0;
        let stale: Vec<String> = {
            let handles = self.handles.lock().await;
            handles.keys().cloned().collect()
        };
        for id in stale {
            self.destroy(&id).await;
            removed += 1;
        }

        let list = Command::new(&self.config.runtime_binary)
            .args(["ps", "-a", "--filter", &format!("label={MANAGED_LABEL}"), "--format", "{{.ID}} {{.CreatedAt}}"])
            .output()
            .await?;
        if list.status.success() {
            let text = String::from_utf8_lossy(&list.stdout);
            let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_default();
            for line in text.lines() {
                if let Some((id, created)) = line.split_once(' ') {
                    if let Ok(created_at) = DateTime::parse_from_rfc3339(created.trim()) {
                        if created_at.with_timezone(&Utc) < cutoff {
                            let _ = Command::new(&self.config.runtime_binary).args(["rm", "-f", id]).output().await;
                            removed += 1;
                        }
                    }
                }
            }
        }
        Ok(removed)
    }

    /// Shut down every tracked handle and sweep any orphaned containers or
    /// volumes carrying the managed label.
    pub async fn destroy_all(&self) -> Result<()> {
        let handles: Vec<Arc<ContainerHandle>> = {
            let mut guard = self.handles.lock().await;
            guard.drain().map(|(_, v)| v).collect()
        };
        for handle in handles {
            handle.destroy().await;
        }

        let list = Command::new(&self.config.runtime_binary)
            .args(["ps", "-aq", "--filter", &format!("label={MANAGED_LABEL}")])
            .output()
            .await?;
        for id in String::from_utf8_lossy(&list.stdout).lines() {
            let _ = Command::new(&self.config.runtime_binary).args(["rm", "-f", id.trim()]).output().await;
        }
        let volumes = Command::new(&self.config.runtime_binary)
            .args(["volume", "ls", "-q", "--filter", &format!("label={MANAGED_LABEL}")])
            .output()
            .await?;
        for id in String::from_utf8_lossy(&volumes.stdout).lines() {
            let _ = Command::new(&self.config.runtime_binary).args(["volume", "rm", "-f", id.trim()]).output().await;
        }
        Ok(())
    }
}

fn spawn_reader(mut stdout: tokio::process::ChildStdout, pending: Arc<Mutex<HashMap<String, PendingRequest>>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = match stdout.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "container stdout read failed");
                    break;
                }
            };
            let frames = match decoder.feed(&buf[..n]) {
                Ok(frames) => frames,
                Err(e) => {
                    warn!(error = %e, "malformed ipc frame from container");
                    continue;
                }
            };
            for frame in frames {
                match frame.id() {
                    Some(id) => {
                        let mut guard = pending.lock().await;
                        if let Some(req) = guard.remove(id) {
                            let _ = req.resolver.send(frame);
                        }
                    }
                    None => warn!("unparented container ipc error frame"),
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn managed_label_is_stable() {
        assert_eq!(MANAGED_LABEL, "soma.managed=true");
    }
}
