//! Capability scanner.
//!
//! Runs a fixed probe plan over a [ScanExecutor] (local subprocess
//! or SSH) and synthesizes a [ScanResult]. Individual probe failures
//! are recorded in `errors` and never abort the scan; `success` is
//! true iff no errors were collected.

use std::{path::Path, sync::OnceLock, time::Duration};

use anyhow::Context;
use indexmap::IndexMap;
use regex::Regex;
use serde_json::{Value, json};
use tracing::debug;
use windflow_client::entities::{
  scan::{
    DockerCapabilities, DockerComposeInfo, DockerSwarmInfo, OsInfo,
    PlatformArchitecture, PlatformInfo, ScanResult, SwarmNodeRole,
    ToolInfo,
  },
  stack::TargetType,
  target::ScanStatus,
  windflow_timestamp,
};

use crate::db::DbClient;

mod executor;

pub use executor::{
  CommandError, CommandResult, LocalExecutor, ScanExecutor,
  SshExecutor, SudoConfig,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DOCKER_SOCKET: &str = "/var/run/docker.sock";
const LIBVIRT_SOCKET: &str = "/var/run/libvirt/libvirt-sock";

#[derive(Debug, Clone)]
pub struct ScanRequest {
  pub host: String,
  pub port: u16,
  pub username: String,
  pub password: String,
  pub sudo_user: Option<String>,
  pub sudo_password: Option<String>,
}

pub async fn scan_localhost() -> ScanResult {
  let executor = ScanExecutor::Local(Default::default());
  run_scan(&executor, "localhost").await
}

pub async fn scan_remote(
  request: ScanRequest,
) -> Result<ScanResult, CommandError> {
  let sudo = request.sudo_user.map(|user| SudoConfig {
    user,
    password: request.sudo_password,
  });
  let executor = ScanExecutor::Ssh(
    SshExecutor::connect(
      &request.host,
      request.port,
      &request.username,
      &request.password,
      sudo,
    )
    .await?,
  );
  Ok(run_scan(&executor, &request.host).await)
}

/// Scans a stored target and persists the discovered capabilities.
pub async fn scan_and_update_target(
  db: &DbClient,
  target_id: &str,
) -> anyhow::Result<ScanResult> {
  let target = db.get_target(target_id)?;
  db.set_target_scan_status(target_id, ScanStatus::Scanning)?;

  let scan = if target.is_localhost() {
    scan_localhost().await
  } else {
    let credentials = match target.credentials {
      Some(credentials) => credentials,
      None => {
        db.set_target_scan_status(target_id, ScanStatus::Failed)?;
        anyhow::bail!(
          "target credentials are required for remote scanning"
        );
      }
    };
    let request = ScanRequest {
      host: target.host.clone(),
      port: target.port.unwrap_or(22),
      username: credentials.username,
      sudo_password: credentials
        .sudo_password
        .or_else(|| Some(credentials.password.clone())),
      password: credentials.password,
      sudo_user: credentials.sudo_user,
    };
    match scan_remote(request).await {
      Ok(scan) => scan,
      Err(e) => {
        db.set_target_scan_status(target_id, ScanStatus::Failed)?;
        return Err(e)
          .context("failed to reach target for capability scan");
      }
    }
  };

  let payload = serde_json::to_value(&scan)
    .context("failed to serialize scan result")?;
  db.update_target_capabilities(
    target_id,
    payload,
    scan.scan_date,
    scan.success,
  )?;
  Ok(scan)
}

async fn run_scan(
  executor: &ScanExecutor,
  host: &str,
) -> ScanResult {
  let is_local = executor.is_local();
  let (platform, os, virtualization, docker, kubernetes) = tokio::join!(
    detect_platform(executor),
    detect_os(executor),
    detect_virtualization(executor, is_local),
    detect_docker(executor, is_local),
    detect_kubernetes(executor),
  );

  let mut errors = Vec::new();
  let platform = record(platform, &mut errors);
  let os = record(os, &mut errors);
  let virtualization =
    record(virtualization, &mut errors).unwrap_or_default();
  let docker = record(docker, &mut errors).flatten();
  let kubernetes =
    record(kubernetes, &mut errors).unwrap_or_default();

  let success = errors.is_empty();

  ScanResult {
    host: host.to_string(),
    scan_date: windflow_timestamp(),
    success,
    platform,
    os,
    virtualization,
    docker,
    kubernetes,
    errors,
  }
}

/// Records a probe failure instead of aborting the whole scan.
fn record<T>(
  result: Result<T, CommandError>,
  errors: &mut Vec<String>,
) -> Option<T> {
  match result {
    Ok(value) => Some(value),
    Err(e) => {
      errors.push(e.to_string());
      None
    }
  }
}

async fn detect_platform(
  executor: &ScanExecutor,
) -> Result<PlatformInfo, CommandError> {
  let arch = executor
    .run("uname -m", DEFAULT_TIMEOUT, false)
    .await?;
  let architecture = map_architecture(arch.stripped_stdout());

  let mut cpu_model = None;
  for command in [
    r"grep -m1 'model name' /proc/cpuinfo | cut -d':' -f2",
    "sysctl -n machdep.cpu.brand_string",
  ] {
    let result =
      executor.run(command, DEFAULT_TIMEOUT, false).await?;
    if result.success() && !result.stripped_stdout().is_empty() {
      cpu_model = Some(result.stripped_stdout().to_string());
      break;
    }
  }

  let mut cpu_cores = None;
  for command in ["nproc", "sysctl -n hw.ncpu"] {
    let result =
      executor.run(command, DEFAULT_TIMEOUT, false).await?;
    if result.success()
      && let Ok(cores) = result.stripped_stdout().parse::<u32>()
    {
      cpu_cores = Some(cores);
      break;
    }
  }

  let mut total_memory_gb = None;
  for (command, unit) in [
    (
      r"grep MemTotal /proc/meminfo | awk '{print $2}'",
      MemoryUnit::Kilobytes,
    ),
    ("sysctl -n hw.memsize", MemoryUnit::Bytes),
  ] {
    let result =
      executor.run(command, DEFAULT_TIMEOUT, false).await?;
    if result.success()
      && let Some(gb) =
        parse_memory_gb(result.stripped_stdout(), unit)
    {
      total_memory_gb = Some(gb);
      break;
    }
  }

  Ok(PlatformInfo {
    architecture,
    cpu_model,
    cpu_cores,
    total_memory_gb,
  })
}

#[derive(Clone, Copy)]
enum MemoryUnit {
  Kilobytes,
  Bytes,
}

fn parse_memory_gb(raw: &str, unit: MemoryUnit) -> Option<f64> {
  let value: f64 = raw.parse().ok()?;
  let gb = match unit {
    MemoryUnit::Kilobytes => value / 1024.0 / 1024.0,
    MemoryUnit::Bytes => value / (1024u64.pow(3) as f64),
  };
  Some((gb * 100.0).round() / 100.0)
}

fn map_architecture(raw: &str) -> PlatformArchitecture {
  match raw.trim().to_lowercase().as_str() {
    "x86_64" | "amd64" => PlatformArchitecture::X86_64,
    "i386" | "i686" => PlatformArchitecture::X86_32,
    "aarch64" | "arm64" => PlatformArchitecture::Arm64,
    "armv8" | "armv8l" => PlatformArchitecture::Armv8,
    "armv7" | "armv7l" => PlatformArchitecture::Armv7,
    "armv6" | "armv6l" => PlatformArchitecture::Armv6,
    _ => PlatformArchitecture::Unknown,
  }
}

async fn detect_os(
  executor: &ScanExecutor,
) -> Result<OsInfo, CommandError> {
  let mut system = String::from("unknown");
  let result =
    executor.run("uname -s", DEFAULT_TIMEOUT, false).await?;
  if result.success() && !result.stripped_stdout().is_empty() {
    system = result.stripped_stdout().to_string();
  }

  let mut kernel = None;
  let result =
    executor.run("uname -r", DEFAULT_TIMEOUT, false).await?;
  if result.success() && !result.stripped_stdout().is_empty() {
    kernel = Some(result.stripped_stdout().to_string());
  }

  let result = executor
    .run("cat /etc/os-release", DEFAULT_TIMEOUT, false)
    .await?;
  let (mut distribution, version) = if result.success() {
    parse_os_release(&result.stdout)
  } else {
    (None, None)
  };

  if distribution.is_none() {
    let result = executor
      .run("lsb_release -ds", DEFAULT_TIMEOUT, false)
      .await?;
    if result.success() && !result.stripped_stdout().is_empty() {
      distribution =
        Some(strip_quotes(result.stripped_stdout()).to_string());
    }
  }

  Ok(OsInfo {
    system,
    distribution,
    version,
    kernel,
  })
}

fn parse_os_release(
  contents: &str,
) -> (Option<String>, Option<String>) {
  let mut distribution = None;
  let mut version = None;
  for line in contents.lines() {
    if let Some(value) = line.strip_prefix("NAME=") {
      distribution = Some(strip_quotes(value).to_string());
    }
    if let Some(value) = line.strip_prefix("VERSION=") {
      version = Some(strip_quotes(value).to_string());
    }
  }
  (distribution, version)
}

fn strip_quotes(value: &str) -> &str {
  let value = value.trim();
  value
    .strip_prefix(['"', '\''])
    .and_then(|v| v.strip_suffix(['"', '\'']))
    .unwrap_or(value)
}

async fn detect_virtualization(
  executor: &ScanExecutor,
  is_local: bool,
) -> Result<IndexMap<String, ToolInfo>, CommandError> {
  let mut virtualization = IndexMap::new();

  // The libvirt daemon socket is only observable locally.
  if is_local && Path::new(LIBVIRT_SOCKET).exists() {
    virtualization.insert(
      "libvirt".to_string(),
      ToolInfo {
        available: true,
        version: None,
        details: Some(json!({ "socket_accessible": true })),
      },
    );
  }

  let checks: [(&str, &str); 4] = [
    ("virtualbox", "vboxmanage --version"),
    ("vagrant", "vagrant --version"),
    ("proxmox", "pveversion"),
    ("qemu_kvm", "qemu-system-x86_64 --version"),
  ];
  for (tool, command) in checks {
    let result =
      executor.run(command, DEFAULT_TIMEOUT, false).await?;
    if result.success() {
      let details = match tool {
        "qemu_kvm" => parse_qemu_version(&result.stdout),
        _ => parse_version_details(&result.stdout),
      };
      virtualization.insert(
        tool.to_string(),
        ToolInfo {
          available: true,
          version: details
            .as_ref()
            .and_then(|d| d.get("version"))
            .and_then(Value::as_str)
            .map(str::to_string),
          details,
        },
      );
    } else {
      virtualization
        .entry(tool.to_string())
        .or_insert_with(ToolInfo::unavailable);
    }
  }

  let kvm = executor
    .run("test -e /dev/kvm && echo 'present'", DEFAULT_TIMEOUT, false)
    .await?;
  if kvm.stdout.contains("present") {
    let entry = virtualization
      .entry("qemu_kvm".to_string())
      .or_insert_with(ToolInfo::unavailable);
    let mut details = match entry.details.take() {
      Some(Value::Object(map)) => map,
      _ => Default::default(),
    };
    details.insert("kvm_device".to_string(), Value::Bool(true));
    entry.details = Some(Value::Object(details));
  }

  Ok(virtualization)
}

async fn detect_docker(
  executor: &ScanExecutor,
  is_local: bool,
) -> Result<Option<DockerCapabilities>, CommandError> {
  // Prefer direct socket queries when scanning the local host.
  if is_local
    && Path::new(DOCKER_SOCKET).exists()
    && let Some(capabilities) = docker_capabilities_via_socket().await
  {
    return Ok(Some(capabilities));
  }

  let version_result = executor
    .run("docker --version", DEFAULT_TIMEOUT, false)
    .await?;
  if !version_result.success() {
    return Ok(None);
  }
  let version = parse_version_only(&version_result.stdout);

  let mut running = false;
  let mut socket_accessible = false;
  let mut swarm_value = None;

  let info_result = executor
    .run(
      "docker info --format '{{json .}}'",
      DEFAULT_TIMEOUT,
      false,
    )
    .await?;
  if info_result.success()
    && !info_result.stripped_stdout().is_empty()
  {
    match serde_json::from_str::<Value>(
      info_result.stripped_stdout(),
    ) {
      Ok(info) => {
        running = true;
        socket_accessible = true;
        swarm_value = info.get("Swarm").cloned();
      }
      Err(_) => {
        running = info_result.stdout.contains("Swarm:");
      }
    }
  }

  let compose = detect_docker_compose(executor).await?;

  let swarm = match swarm_value {
    Some(value) => swarm_from_json(&value),
    None => {
      // Older daemons without --format support.
      let plain = executor
        .run("docker info", DEFAULT_TIMEOUT, false)
        .await?;
      if plain.success() && plain.stdout.contains("Swarm: active") {
        Some(DockerSwarmInfo {
          available: true,
          active: true,
          node_role: None,
          details: None,
        })
      } else if plain.success()
        && plain.stdout.contains("Swarm: inactive")
      {
        Some(DockerSwarmInfo {
          available: false,
          active: false,
          node_role: None,
          details: None,
        })
      } else {
        None
      }
    }
  };

  Ok(Some(DockerCapabilities {
    installed: true,
    version,
    running,
    socket_accessible,
    compose,
    swarm,
  }))
}

async fn docker_capabilities_via_socket(
) -> Option<DockerCapabilities> {
  let docker = bollard::Docker::connect_with_unix_defaults()
    .inspect_err(|e| debug!("docker socket connect failed | {e:#}"))
    .ok()?;
  docker.ping().await.ok()?;
  let version = docker.version().await.ok()?;
  let info = docker.info().await.ok()?;
  let swarm = info.swarm.as_ref().and_then(|swarm| {
    swarm_from_json(&serde_json::to_value(swarm).ok()?)
  });
  Some(DockerCapabilities {
    installed: true,
    version: version.version,
    running: true,
    socket_accessible: true,
    compose: None,
    swarm,
  })
}

/// Swarm sub-state from a `docker info` Swarm object:
/// available iff LocalNodeState != inactive, active iff == active,
/// role from ControlAvailable.
fn swarm_from_json(value: &Value) -> Option<DockerSwarmInfo> {
  if value.is_null() {
    return None;
  }
  let state = value
    .get("LocalNodeState")
    .and_then(Value::as_str)
    .map(str::to_lowercase);
  let available = state
    .as_deref()
    .is_some_and(|state| !state.is_empty() && state != "inactive");
  let active = state.as_deref() == Some("active");
  let node_role = available.then(|| {
    if value
      .get("ControlAvailable")
      .and_then(Value::as_bool)
      .unwrap_or(false)
    {
      SwarmNodeRole::Manager
    } else {
      SwarmNodeRole::Worker
    }
  });
  Some(DockerSwarmInfo {
    available,
    active,
    node_role,
    details: Some(value.clone()),
  })
}

async fn detect_docker_compose(
  executor: &ScanExecutor,
) -> Result<Option<DockerComposeInfo>, CommandError> {
  let plugin = executor
    .run("docker compose version", DEFAULT_TIMEOUT, false)
    .await?;
  if plugin.success() {
    return Ok(Some(DockerComposeInfo {
      available: true,
      version: parse_version_only(&plugin.stdout),
      plugin_based: true,
    }));
  }
  let standalone = executor
    .run("docker-compose --version", DEFAULT_TIMEOUT, false)
    .await?;
  if standalone.success() {
    return Ok(Some(DockerComposeInfo {
      available: true,
      version: parse_version_only(&standalone.stdout),
      plugin_based: false,
    }));
  }
  Ok(None)
}

async fn detect_kubernetes(
  executor: &ScanExecutor,
) -> Result<IndexMap<String, ToolInfo>, CommandError> {
  let tools: [(&str, &str); 4] = [
    ("kubectl", "kubectl version --client -o json"),
    ("kubeadm", "kubeadm version -o json"),
    ("k3s", "k3s --version"),
    ("microk8s", "microk8s.kubectl version --output=json"),
  ];

  let mut kubernetes = IndexMap::new();
  for (tool, command) in tools {
    let result =
      executor.run(command, DEFAULT_TIMEOUT, false).await?;
    if result.success() {
      let details = match tool {
        "kubectl" | "microk8s" => {
          parse_kubectl_version(&result.stdout)
        }
        "kubeadm" => parse_kubeadm_version(&result.stdout),
        _ => parse_version_details(&result.stdout),
      };
      kubernetes.insert(
        tool.to_string(),
        ToolInfo {
          available: true,
          version: details
            .as_ref()
            .and_then(|d| d.get("version"))
            .and_then(Value::as_str)
            .map(str::to_string),
          details,
        },
      );
    } else {
      kubernetes
        .insert(tool.to_string(), ToolInfo::unavailable());
    }
  }
  Ok(kubernetes)
}

fn version_regex() -> &'static Regex {
  static VERSION: OnceLock<Regex> = OnceLock::new();
  VERSION.get_or_init(|| {
    Regex::new(r"(\d+\.\d+(?:\.\d+)?)")
      .expect("invalid version regex")
  })
}

fn parse_version_only(output: &str) -> Option<String> {
  version_regex()
    .captures(output)
    .map(|captures| captures[1].to_string())
}

fn parse_version_details(output: &str) -> Option<Value> {
  parse_version_only(output)
    .map(|version| json!({ "version": version }))
}

fn parse_qemu_version(output: &str) -> Option<Value> {
  let first_line = output.lines().next().unwrap_or_default();
  parse_version_only(first_line).map(|version| {
    json!({ "version": version, "raw": first_line.trim() })
  })
}

fn parse_kubectl_version(output: &str) -> Option<Value> {
  match serde_json::from_str::<Value>(output) {
    Ok(data) => {
      let client = data
        .get("clientVersion")
        .or_else(|| data.get("client"))?;
      let version =
        client.get("gitVersion").and_then(Value::as_str)?;
      Some(json!({
        "version": version,
        "major": client.get("major"),
        "minor": client.get("minor"),
      }))
    }
    Err(_) => {
      let captures = Regex::new(r"Client Version:\s*v?([\w.\-]+)")
        .ok()?
        .captures(output)?;
      Some(json!({ "version": &captures[1] }))
    }
  }
}

fn parse_kubeadm_version(output: &str) -> Option<Value> {
  match serde_json::from_str::<Value>(output) {
    Ok(data) => {
      let client = data.get("clientVersion")?;
      Some(json!({
        "version": client.get("gitVersion"),
        "major": client.get("major"),
        "minor": client.get("minor"),
      }))
    }
    Err(_) => parse_version_details(output),
  }
}

/// Target type inference ladder used when accepting a scan.
pub fn infer_target_type(scan: &ScanResult) -> TargetType {
  if let Some(docker) = &scan.docker {
    if docker
      .swarm
      .as_ref()
      .is_some_and(|swarm| swarm.available)
    {
      return TargetType::DockerSwarm;
    }
    if docker.installed {
      return TargetType::Docker;
    }
  }
  if scan.kubernetes.values().any(|tool| tool.available) {
    return TargetType::Kubernetes;
  }
  if scan.virtualization.values().any(|tool| tool.available) {
    return TargetType::Vm;
  }
  TargetType::Physical
}
