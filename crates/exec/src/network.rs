//! Network policy for sandboxed skill containers (§4.9).
//!
//! With `allowed_domains` set: resolve each domain to its A records once,
//! reuse those IPs for both `--add-host` entries and the later iptables
//! allow-list, start the container with DNS disabled and IPv6 off, then
//! apply the allow-list via a privileged helper image before unpausing.
//! Without `allowed_domains`, the container starts with `--network none`.

use std::net::IpAddr;

use tokio::process::Command;
use tracing::warn;

use crate::error::{ContainerError, Result};

/// A domain resolved to the concrete IPs it's allowed to talk to.
#[derive(Debug, Clone)]
pub struct ResolvedDomain {
    pub domain: String,
    pub ips: Vec<IpAddr>,
}

/// Resolve every domain in `domains` to its A/AAAA records. Each domain is
/// resolved exactly once; the result feeds both `/etc/hosts` entries and the
/// iptables rules so the two never disagree about which IP is "the" domain.
pub async fn resolve_domains(domains: &[String]) -> Result<Vec<ResolvedDomain>> {
    let mut resolved = Vec::with_capacity(domains.len());
    for domain in domains {
        let lookup = format!("{domain}:443");
        let ips: Vec<IpAddr> = tokio::net::lookup_host(&lookup)
            .await
            .map_err(|e| ContainerError::DnsResolution { domain: domain.clone(), reason: e.to_string() })?
            .map(|addr| addr.ip())
            .collect();
        if ips.is_empty() {
            return Err(ContainerError::DnsResolution {
                domain: domain.clone(),
                reason: "no A/AAAA records returned".to_string(),
            });
        }
        resolved.push(ResolvedDomain { domain: domain.clone(), ips });
    }
    Ok(resolved)
}

/// `--add-host` arguments for each resolved domain, reusing the same IPs
/// that the iptables rules will allow.
pub fn add_host_args(resolved: &[ResolvedDomain]) -> Vec<String> {
    let mut args = Vec::new();
    for domain in resolved {
        if let Some(ip) = domain.ips.first() {
            args.push("--add-host".to_string());
            args.push(format!("{}:{}", domain.domain, ip));
        }
    }
    args
}

/// Apply an allow-only iptables policy to `container_id` via a privileged
/// helper image, permitting only the declared IPs on `allowed_ports`. On any
/// failure, returns an error so the caller can destroy the container and
/// volume rather than run with a half-applied policy.
pub async fn apply_iptables_policy(
    runtime_binary: &str,
    helper_image: &str,
    container_id: &str,
    resolved: &[ResolvedDomain],
    allowed_ports: &[u16],
) -> Result<()> {
    let mut allow_rules = Vec::new();
    for domain in resolved {
        for ip in &domain.ips {
            for port in allowed_ports {
                allow_rules.push(format!(
                    "iptables -A OUTPUT -d {ip} -p tcp --dport {port} -j ACCEPT"
                ));
            }
        }
    }
    allow_rules.push("iptables -A OUTPUT -j DROP".to_string());
    let script = allow_rules.join(" && ");

    let output = Command::new(runtime_binary)
        .args([
            "run",
            "--rm",
            "--cap-add=NET_ADMIN",
            &format!("--network=container:{container_id}"),
            helper_image,
            "sh",
            "-c",
            &script,
        ])
        .output()
        .await
        .map_err(|e| ContainerError::PolicySetup(format!("failed to launch helper image: {e}")))?;

    if !output.status.success() {
        return Err(ContainerError::PolicySetup(format!(
            "iptables helper exited with {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// Whether the helper image used to apply iptables policy is available
/// locally. If not, callers degrade to `--network none` with a warning
/// rather than fail the whole request.
pub async fn helper_image_available(runtime_binary: &str, helper_image: &str) -> bool {
    match Command::new(runtime_binary).args(["image", "inspect", helper_image]).output().await {
        Ok(output) => output.status.success(),
        Err(e) => {
            warn!(error = %e, "could not probe for iptables helper image");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_host_args_use_first_resolved_ip() {
        let resolved = vec![ResolvedDomain {
            domain: "api.example.com".into(),
            ips: vec!["93.184.216.34".parse().unwrap(), "93.184.216.35".parse().unwrap()],
        }];
        let args = add_host_args(&resolved);
        assert_eq!(args, vec!["--add-host".to_string(), "api.example.com:93.184.216.34".to_string()]);
    }
}
