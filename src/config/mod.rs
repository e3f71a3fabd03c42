//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroU64, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "stampo";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_MAX_BODY_BYTES: u64 = 200 * 1024 * 1024;
const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DELIMITER: &str = "%%";

/// Command-line arguments for the Stampo binary.
#[derive(Debug, Parser)]
#[command(name = "stampo", version, about = "Stampo document template server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "STAMPO_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the maximum request body size in bytes.
    #[arg(long = "max-body-bytes", value_name = "BYTES")]
    pub max_body_bytes: Option<u64>,

    /// Override the per-request render timeout.
    #[arg(long = "render-timeout-seconds", value_name = "SECONDS")]
    pub render_timeout_seconds: Option<u64>,

    /// Toggle the expressions module for filter pipelines in placeholders.
    #[arg(
        long = "render-expressions",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub render_expressions: Option<bool>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub logging: LoggingSettings,
    pub limits: LimitsSettings,
    pub render: RenderSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Shared secret required on every fill request. `None` disables the check.
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct LimitsSettings {
    pub max_body_bytes: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub delimiter_start: String,
    pub delimiter_end: String,
    pub paragraph_loop: bool,
    pub linebreaks: bool,
    pub expressions: bool,
    pub timeout: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("STAMPO").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    raw.apply_legacy_env(std::env::var("PORT").ok(), std::env::var("API_KEY").ok());
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    auth: RawAuthSettings,
    logging: RawLoggingSettings,
    limits: RawLimitsSettings,
    render: RawRenderSettings,
}

impl RawSettings {
    /// Bare `PORT` and `API_KEY` variables predate the `STAMPO__` prefix and
    /// are still honored when nothing else sets those keys.
    fn apply_legacy_env(&mut self, port: Option<String>, api_key: Option<String>) {
        if self.server.port.is_none()
            && let Some(port) = port.as_deref().and_then(|value| value.parse().ok())
        {
            self.server.port = Some(port);
        }
        if self.auth.api_key.is_none()
            && let Some(key) = api_key
        {
            self.auth.api_key = Some(key);
        }
    }

    fn apply_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(limit) = overrides.max_body_bytes {
            self.limits.max_body_bytes = Some(limit);
        }
        if let Some(seconds) = overrides.render_timeout_seconds {
            self.render.timeout_seconds = Some(seconds);
        }
        if let Some(enabled) = overrides.render_expressions {
            self.render.expressions = Some(enabled);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            auth,
            logging,
            limits,
            render,
        } = raw;

        let server = build_server_settings(server)?;
        let auth = build_auth_settings(auth);
        let logging = build_logging_settings(logging)?;
        let limits = build_limits_settings(limits)?;
        let render = build_render_settings(render)?;

        Ok(Self {
            server,
            auth,
            logging,
            limits,
            render,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    Ok(ServerSettings { addr })
}

fn build_auth_settings(auth: RawAuthSettings) -> AuthSettings {
    let api_key = auth.api_key.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    AuthSettings { api_key }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_limits_settings(limits: RawLimitsSettings) -> Result<LimitsSettings, LoadError> {
    let max_body_bytes_value = limits.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES);
    let max_body_bytes = NonZeroU64::new(max_body_bytes_value)
        .ok_or_else(|| LoadError::invalid("limits.max_body_bytes", "must be greater than zero"))?;
    usize::try_from(max_body_bytes_value).map_err(|_| {
        LoadError::invalid(
            "limits.max_body_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(LimitsSettings { max_body_bytes })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let delimiter_start = render
        .delimiter_start
        .unwrap_or_else(|| DEFAULT_DELIMITER.to_string());
    if delimiter_start.is_empty() {
        return Err(LoadError::invalid(
            "render.delimiter_start",
            "delimiter must not be empty",
        ));
    }

    let delimiter_end = render
        .delimiter_end
        .unwrap_or_else(|| DEFAULT_DELIMITER.to_string());
    if delimiter_end.is_empty() {
        return Err(LoadError::invalid(
            "render.delimiter_end",
            "delimiter must not be empty",
        ));
    }

    let timeout_seconds = render.timeout_seconds.unwrap_or(DEFAULT_RENDER_TIMEOUT_SECS);
    if timeout_seconds == 0 {
        return Err(LoadError::invalid(
            "render.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(RenderSettings {
        delimiter_start,
        delimiter_end,
        paragraph_loop: render.paragraph_loop.unwrap_or(true),
        linebreaks: render.linebreaks.unwrap_or(true),
        expressions: render.expressions.unwrap_or(false),
        timeout: Duration::from_secs(timeout_seconds),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAuthSettings {
    api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLimitsSettings {
    max_body_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    delimiter_start: Option<String>,
    delimiter_end: Option<String>,
    paragraph_loop: Option<bool>,
    linebreaks: Option<bool>,
    expressions: Option<bool>,
    timeout_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
