//! Runtime configuration, assembled in three layers (later wins): built-in
//! defaults, an optional TOML file (`--config path`), then CLI flags parsed
//! with `clap::Parser`'s `derive`/`env` features, down to the
//! `BoolishValueParser` trick for a flag that needs to participate in this
//! layering instead of defaulting to `false`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct Settings {
    pub worker_count: usize,
    pub queue_max_size: u64,
    pub job_tasks_inprogress_max: u32,
    pub tick_delay: Duration,
    pub startup_timeout: Duration,
    pub discoverer_socket_path: PathBuf,
    pub proxygroup_socket_path: PathBuf,
    pub metrics_addr: SocketAddr,
    pub log_json: bool,
    pub otlp_endpoint: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        let core = discoverer_core::config::Config::default();
        Self {
            worker_count: core.worker_count,
            queue_max_size: core.queue_max_size,
            job_tasks_inprogress_max: core.job_tasks_inprogress_max,
            tick_delay: core.tick_delay,
            startup_timeout: core.startup_timeout,
            discoverer_socket_path: PathBuf::from("/tmp/discoverer.sock"),
            proxygroup_socket_path: PathBuf::from("/tmp/discoverer-proxygroup.sock"),
            metrics_addr: "127.0.0.1:9090".parse().expect("valid default metrics addr"),
            log_json: false,
            otlp_endpoint: None,
        }
    }
}

/// The subset of [`Settings`] a TOML file may override. Every field is
/// optional so a file only needs to mention what it changes.
#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    worker_count: Option<usize>,
    queue_max_size: Option<u64>,
    job_tasks_inprogress_max: Option<u32>,
    tick_delay_secs: Option<u64>,
    startup_timeout_secs: Option<u64>,
    discoverer_socket_path: Option<PathBuf>,
    proxygroup_socket_path: Option<PathBuf>,
    metrics_addr: Option<SocketAddr>,
    log_json: Option<bool>,
    otlp_endpoint: Option<String>,
}

#[derive(Parser, Debug)]
#[command(version, about = "Network discovery engine")]
pub struct CliArgs {
    /// Optional TOML config file. CLI flags and environment variables both
    /// take precedence over anything it sets.
    #[clap(long)]
    pub config: Option<PathBuf>,

    #[clap(long, env = "DISCOVERER_WORKER_COUNT")]
    worker_count: Option<usize>,

    #[clap(long, env = "DISCOVERER_QUEUE_MAX_SIZE")]
    queue_max_size: Option<u64>,

    #[clap(long, env = "DISCOVERER_JOB_TASKS_INPROGRESS_MAX")]
    job_tasks_inprogress_max: Option<u32>,

    #[clap(long, env = "DISCOVERER_TICK_DELAY_SECS")]
    tick_delay_secs: Option<u64>,

    #[clap(long, env = "DISCOVERER_STARTUP_TIMEOUT_SECS")]
    startup_timeout_secs: Option<u64>,

    #[clap(long, env = "DISCOVERER_SOCKET_PATH")]
    discoverer_socket_path: Option<PathBuf>,

    #[clap(long, env = "DISCOVERER_PROXYGROUP_SOCKET_PATH")]
    proxygroup_socket_path: Option<PathBuf>,

    #[clap(long, env = "DISCOVERER_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    /// Emit JSON logs instead of the default text format.
    #[clap(long, env = "DISCOVERER_LOG_JSON", value_parser = clap::builder::BoolishValueParser::new(), action = clap::ArgAction::Set)]
    log_json: Option<bool>,

    #[clap(long, env = "DISCOVERER_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,
}

impl Settings {
    /// Parses CLI args/env, layers an optional TOML file on top of the
    /// built-in defaults, then applies CLI flags/env (which clap has
    /// already merged) as the final, highest-priority layer.
    pub fn load() -> anyhow::Result<Self> {
        Self::from_args(CliArgs::parse())
    }

    fn from_args(args: CliArgs) -> anyhow::Result<Self> {
        let mut settings = Self::default();

        if let Some(path) = &args.config {
            let text = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
            let file: FileSettings = toml::from_str(&text)
                .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;
            settings.apply_file(file);
        }

        settings.apply_cli(args);
        Ok(settings)
    }

    fn apply_file(&mut self, file: FileSettings) {
        if let Some(v) = file.worker_count {
            self.worker_count = v;
        }
        if let Some(v) = file.queue_max_size {
            self.queue_max_size = v;
        }
        if let Some(v) = file.job_tasks_inprogress_max {
            self.job_tasks_inprogress_max = v;
        }
        if let Some(v) = file.tick_delay_secs {
            self.tick_delay = Duration::from_secs(v);
        }
        if let Some(v) = file.startup_timeout_secs {
            self.startup_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.discoverer_socket_path {
            self.discoverer_socket_path = v;
        }
        if let Some(v) = file.proxygroup_socket_path {
            self.proxygroup_socket_path = v;
        }
        if let Some(v) = file.metrics_addr {
            self.metrics_addr = v;
        }
        if let Some(v) = file.log_json {
            self.log_json = v;
        }
        if file.otlp_endpoint.is_some() {
            self.otlp_endpoint = file.otlp_endpoint;
        }
    }

    fn apply_cli(&mut self, args: CliArgs) {
        if let Some(v) = args.worker_count {
            self.worker_count = v;
        }
        if let Some(v) = args.queue_max_size {
            self.queue_max_size = v;
        }
        if let Some(v) = args.job_tasks_inprogress_max {
            self.job_tasks_inprogress_max = v;
        }
        if let Some(v) = args.tick_delay_secs {
            self.tick_delay = Duration::from_secs(v);
        }
        if let Some(v) = args.startup_timeout_secs {
            self.startup_timeout = Duration::from_secs(v);
        }
        if let Some(v) = args.discoverer_socket_path {
            self.discoverer_socket_path = v;
        }
        if let Some(v) = args.proxygroup_socket_path {
            self.proxygroup_socket_path = v;
        }
        if let Some(v) = args.metrics_addr {
            self.metrics_addr = v;
        }
        if let Some(v) = args.log_json {
            self.log_json = v;
        }
        if args.otlp_endpoint.is_some() {
            self.otlp_endpoint = args.otlp_endpoint;
        }
    }

    pub fn core_config(&self) -> discoverer_core::config::Config {
        discoverer_core::config::Config {
            queue_max_size: self.queue_max_size,
            job_tasks_inprogress_max: self.job_tasks_inprogress_max,
            worker_count: self.worker_count,
            tick_delay: self.tick_delay,
            startup_timeout: self.startup_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_layer_overrides_defaults_and_cli_overrides_file() {
        let mut settings = Settings::default();
        settings.apply_file(FileSettings {
            worker_count: Some(8),
            queue_max_size: Some(500),
            ..Default::default()
        });
        assert_eq!(settings.worker_count, 8);
        assert_eq!(settings.queue_max_size, 500);

        settings.apply_cli(CliArgs {
            config: None,
            worker_count: Some(2),
            queue_max_size: None,
            job_tasks_inprogress_max: None,
            tick_delay_secs: None,
            startup_timeout_secs: None,
            discoverer_socket_path: None,
            proxygroup_socket_path: None,
            metrics_addr: None,
            log_json: None,
            otlp_endpoint: None,
        });
        assert_eq!(settings.worker_count, 2);
        assert_eq!(settings.queue_max_size, 500);
    }
}
