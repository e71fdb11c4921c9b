use std::{fs, path::PathBuf, sync::OnceLock};

use colored::Colorize;
use serde::Deserialize;
use windflow_client::entities::logger::LogConfig;

pub fn core_config() -> &'static CoreConfig {
  static CORE_CONFIG: OnceLock<CoreConfig> = OnceLock::new();
  CORE_CONFIG.get_or_init(|| {
    let env: Env = match envy::from_env() {
      Ok(env) => env,
      Err(e) => {
        panic!("Failed to parse WindFlow Core environment | {e:?}")
      }
    };

    let mut config = match &env.windflow_config_path {
      Some(path) => {
        println!(
          "{}: {}: {}",
          "INFO".green(),
          "Config File".dimmed(),
          path.display()
        );
        let contents = fs::read_to_string(path).unwrap_or_else(|e| {
          panic!(
            "Failed to read config file at {} | {e:?}",
            path.display()
          )
        });
        toml::from_str(&contents).unwrap_or_else(|e| {
          panic!(
            "Failed to parse config file at {} | {e:?}",
            path.display()
          )
        })
      }
      None => {
        println!(
          "{}: No config path found, using default config",
          "INFO".green(),
        );
        CoreConfig::default()
      }
    };

    // Env overrides on top of the file.
    if let Some(bind_ip) = env.windflow_bind_ip {
      config.bind_ip = bind_ip;
    }
    if let Some(port) = env.windflow_port {
      config.port = port;
    }
    if let Some(jwt_secret) = maybe_read_item_from_file(
      env.windflow_jwt_secret_file,
      env.windflow_jwt_secret,
    ) {
      config.jwt_secret = jwt_secret;
    }
    if let Some(jwt_ttl_hours) = env.windflow_jwt_ttl_hours {
      config.jwt_ttl_hours = jwt_ttl_hours;
    }
    if let Some(stacks_dir) = env.windflow_stacks_dir {
      config.stacks_dir = Some(stacks_dir);
    }
    if let Some(deploy_dir) = env.windflow_deploy_dir {
      config.deploy_dir = deploy_dir;
    }
    if let Some(minutes) = env.windflow_recovery_max_age_minutes {
      config.recovery_max_age_minutes = minutes;
    }
    if let Some(minutes) = env.windflow_recovery_timeout_minutes {
      config.recovery_timeout_minutes = minutes;
    }
    if let Some(seconds) = env.windflow_recovery_interval_seconds {
      config.recovery_interval_seconds = seconds;
    }
    if let Some(seconds) = env.windflow_monitor_interval_seconds {
      config.monitor_interval_seconds = seconds;
    }
    if let Some(max) = env.windflow_max_concurrent_workers {
      config.max_concurrent_workers = max;
    }
    if let Some(legacy) = env.windflow_legacy_compose_cli {
      config.legacy_compose_cli = legacy;
    }

    config
  })
}

fn maybe_read_item_from_file(
  path: Option<PathBuf>,
  item: Option<String>,
) -> Option<String> {
  match path {
    Some(path) => match fs::read_to_string(&path) {
      Ok(contents) => Some(contents.trim().to_string()),
      Err(e) => {
        panic!(
          "Failed to read secret file at {} | {e:?}",
          path.display()
        )
      }
    },
    None => item,
  }
}

/// All `WINDFLOW_*` environment variables the core understands.
#[derive(Deserialize)]
struct Env {
  #[serde(default)]
  windflow_config_path: Option<PathBuf>,
  #[serde(default)]
  windflow_bind_ip: Option<String>,
  #[serde(default)]
  windflow_port: Option<u16>,
  #[serde(default)]
  windflow_jwt_secret: Option<String>,
  #[serde(default)]
  windflow_jwt_secret_file: Option<PathBuf>,
  #[serde(default)]
  windflow_jwt_ttl_hours: Option<u64>,
  #[serde(default)]
  windflow_stacks_dir: Option<PathBuf>,
  #[serde(default)]
  windflow_deploy_dir: Option<PathBuf>,
  #[serde(default)]
  windflow_recovery_max_age_minutes: Option<u64>,
  #[serde(default)]
  windflow_recovery_timeout_minutes: Option<u64>,
  #[serde(default)]
  windflow_recovery_interval_seconds: Option<u64>,
  #[serde(default)]
  windflow_monitor_interval_seconds: Option<u64>,
  #[serde(default)]
  windflow_max_concurrent_workers: Option<usize>,
  #[serde(default)]
  windflow_legacy_compose_cli: Option<bool>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CoreConfig {
  /// IP the server binds to. default: 0.0.0.0
  pub bind_ip: String,
  /// Port the server binds to. default: 9120
  pub port: u16,

  /// Secret used to sign session jwts.
  /// A random secret is generated at boot if empty.
  pub jwt_secret: String,
  /// Session jwt time-to-live in hours. default: 24
  pub jwt_ttl_hours: u64,

  /// Directory of stack definition YAML files
  /// seeded into the store at startup.
  pub stacks_dir: Option<PathBuf>,
  /// Where generated compose files are written.
  /// default: /tmp/windflow-deployments
  pub deploy_dir: PathBuf,

  /// Deployments stuck in pending / deploying for longer than this
  /// are eligible for recovery. default: 2
  pub recovery_max_age_minutes: u64,
  /// Deployments stuck for longer than this are failed instead of
  /// recovered. default: 60
  pub recovery_timeout_minutes: u64,
  /// Interval of the periodic recovery sweep. 0 disables the loop
  /// (the startup sweep always runs). default: 0
  pub recovery_interval_seconds: u64,
  /// Interval of the running-deployment health monitor.
  /// 0 disables it. default: 300
  pub monitor_interval_seconds: u64,

  /// Bound on concurrently executing deployment workers.
  /// 0 means 2x the available cpu count. default: 0
  pub max_concurrent_workers: usize,
  /// Use the standalone `docker-compose` binary instead of the
  /// `docker compose` plugin. default: false
  pub legacy_compose_cli: bool,

  /// SSL configuration for the http server.
  pub ssl_enabled: bool,
  pub ssl_cert_file: PathBuf,
  pub ssl_key_file: PathBuf,

  pub logging: LogConfig,
}

impl Default for CoreConfig {
  fn default() -> CoreConfig {
    CoreConfig {
      bind_ip: String::from("0.0.0.0"),
      port: 9120,
      jwt_secret: String::new(),
      jwt_ttl_hours: 24,
      stacks_dir: None,
      deploy_dir: PathBuf::from("/tmp/windflow-deployments"),
      recovery_max_age_minutes: 2,
      recovery_timeout_minutes: 60,
      recovery_interval_seconds: 0,
      monitor_interval_seconds: 300,
      max_concurrent_workers: 0,
      legacy_compose_cli: false,
      ssl_enabled: false,
      ssl_cert_file: PathBuf::new(),
      ssl_key_file: PathBuf::new(),
      logging: Default::default(),
    }
  }
}

impl CoreConfig {
  /// The worker bound with the 2x-cpu default applied.
  pub fn worker_limit(&self) -> usize {
    if self.max_concurrent_workers > 0 {
      self.max_concurrent_workers
    } else {
      2 * std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
    }
  }

  /// Config safe to print at startup.
  pub fn sanitized(&self) -> CoreConfig {
    let mut config = self.clone();
    if !config.jwt_secret.is_empty() {
      config.jwt_secret = String::from("#############");
    }
    config
  }
}
