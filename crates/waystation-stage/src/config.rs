//! Configuration for a stage process.
//!
//! Values come from serde defaults, then an optional TOML or JSON file,
//! then environment variables, then the command line.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use waystation_telemetry::{
    ExporterMode, LogConfig, LogFormat, MetricsConfig, TelemetryConfig, TracingConfig,
};

use crate::error::{ServerError, ServerResult};

/// Which of the four pipeline stages this process runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    /// Rejects empty or oversized input.
    #[default]
    #[serde(alias = "validator")]
    Validate,
    /// Upper-cases text payloads.
    #[serde(alias = "transformer")]
    Transform,
    /// Attaches a timestamp and an id.
    #[serde(alias = "enricher")]
    Enrich,
    /// Terminal stage; marks the result stored.
    #[serde(alias = "persister")]
    Persist,
}

impl StageKind {
    /// All stages in pipeline order.
    pub const ALL: [StageKind; 4] = [Self::Validate, Self::Transform, Self::Enrich, Self::Persist];

    /// Service name used in the ledger, logs and trace resource.
    pub fn service_name(self) -> &'static str {
        match self {
            Self::Validate => "validator",
            Self::Transform => "transformer",
            Self::Enrich => "enricher",
            Self::Persist => "persister",
        }
    }

    /// Port the stage listens on unless configured otherwise.
    pub fn default_port(self) -> u16 {
        match self {
            Self::Validate => 8001,
            Self::Transform => 8002,
            Self::Enrich => 8003,
            Self::Persist => 8004,
        }
    }

    /// Span name for one invocation.
    pub fn operation(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Transform => "transform",
            Self::Enrich => "enrich",
            Self::Persist => "persist",
        }
    }
}

impl FromStr for StageKind {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| {
                name.eq_ignore_ascii_case(kind.operation())
                    || name.eq_ignore_ascii_case(kind.service_name())
            })
            .ok_or_else(|| {
                ServerError::config(format!(
                    "unknown stage '{name}' (expected validate, transform, enrich or persist)"
                ))
            })
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operation())
    }
}

/// Stage process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Stage to run.
    pub stage: StageKind,
    /// Address to bind to.
    pub host: String,
    /// Port to bind to; the stage's default port when unset.
    pub port: Option<u16>,
    /// Artificial processing delay per request, in seconds.
    pub step_delay_seconds: f64,
    /// Upper bound on the pre-response trace flush, in milliseconds.
    pub flush_timeout_ms: u64,
    /// How long to wait for in-flight connections on shutdown, in seconds.
    pub shutdown_timeout_secs: u64,
    /// Telemetry settings.
    pub telemetry: TelemetrySettings,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            stage: StageKind::default(),
            host: "0.0.0.0".to_string(),
            port: None,
            step_delay_seconds: 2.0,
            flush_timeout_ms: 5000,
            shutdown_timeout_secs: 30,
            telemetry: TelemetrySettings::default(),
        }
    }
}

/// Telemetry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Trace resource service name; the stage's service name when unset.
    pub service_name: Option<String>,
    /// Exporter family.
    pub exporter: ExporterMode,
    /// OTLP endpoint, used when `exporter` is `otlp`.
    pub otlp_endpoint: String,
    /// Jaeger collector endpoint, used otherwise.
    pub jaeger_endpoint: String,
    /// Whether spans are exported at all.
    pub tracing_enabled: bool,
    /// Log filter directive.
    pub log_level: String,
    /// `json` or `pretty`.
    pub log_format: String,
    /// Whether metrics are recorded.
    pub metrics_enabled: bool,
    /// Dedicated Prometheus listener.
    pub metrics_addr: Option<String>,
    /// Deployment environment resource attribute.
    pub environment: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        let tracing = TracingConfig::default();
        Self {
            service_name: None,
            exporter: tracing.exporter,
            otlp_endpoint: tracing.otlp_endpoint,
            jaeger_endpoint: tracing.jaeger_endpoint,
            tracing_enabled: true,
            log_level: "info".to_string(),
            log_format: "json".to_string(),
            metrics_enabled: false,
            metrics_addr: None,
            environment: tracing.environment,
        }
    }
}

impl StageConfig {
    /// Default configuration for `stage`.
    pub fn for_stage(stage: StageKind) -> Self {
        Self {
            stage,
            ..Self::default()
        }
    }

    /// Load configuration from a file.
    pub fn from_file(path: impl Into<PathBuf>) -> ServerResult<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ServerError::config(format!("failed to read config file: {e}")))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        match extension {
            "toml" => toml::from_str(&content)
                .map_err(|e| ServerError::config(format!("invalid TOML: {e}"))),
            "json" => serde_json::from_str(&content)
                .map_err(|e| ServerError::config(format!("invalid JSON: {e}"))),
            _ => Err(ServerError::config(format!(
                "unsupported config format: {extension}"
            ))),
        }
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> ServerResult<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its
    /// value. Unset and empty variables are ignored.
    pub fn apply_overrides<F>(mut self, lookup: F) -> ServerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(stage) = var("STAGE") {
            self.stage = stage.parse()?;
        }

        if let Some(host) = var("HOST") {
            self.host = host;
        }

        if let Some(port) = var("PORT") {
            self.port = Some(
                port.trim()
                    .parse()
                    .map_err(|e| ServerError::config(format!("invalid PORT '{port}': {e}")))?,
            );
        }

        if let Some(delay) = var("STEP_DELAY_SECONDS") {
            self.step_delay_seconds = delay.trim().parse().map_err(|e| {
                ServerError::config(format!("invalid STEP_DELAY_SECONDS '{delay}': {e}"))
            })?;
        }

        if let Some(timeout) = var("FLUSH_TIMEOUT_MS") {
            self.flush_timeout_ms = timeout.trim().parse().map_err(|e| {
                ServerError::config(format!("invalid FLUSH_TIMEOUT_MS '{timeout}': {e}"))
            })?;
        }

        if let Some(name) = var("OTEL_SERVICE_NAME") {
            self.telemetry.service_name = Some(name);
        }

        if let Some(exporter) = var("TRACE_EXPORTER") {
            self.telemetry.exporter = ExporterMode::parse(&exporter);
        }

        if let Some(endpoint) =
            var("OTEL_EXPORTER_OTLP_TRACES_ENDPOINT").or_else(|| var("OTEL_EXPORTER_OTLP_ENDPOINT"))
        {
            self.telemetry.otlp_endpoint = endpoint;
        }

        if let Some(endpoint) = var("JAEGER_COLLECTOR_ENDPOINT") {
            self.telemetry.jaeger_endpoint = endpoint;
        }

        if let Some(enabled) = var("TRACING_ENABLED") {
            self.telemetry.tracing_enabled = parse_bool(&enabled).ok_or_else(|| {
                ServerError::config(format!("invalid TRACING_ENABLED '{enabled}'"))
            })?;
        }

        if let Some(level) = var("LOG_LEVEL") {
            self.telemetry.log_level = level;
        }

        if let Some(format) = var("LOG_FORMAT") {
            self.telemetry.log_format = format;
        }

        if let Some(addr) = var("METRICS_ADDR") {
            self.telemetry.metrics_enabled = true;
            self.telemetry.metrics_addr = Some(addr);
        }

        if let Some(environment) = var("DEPLOYMENT_ENVIRONMENT") {
            self.telemetry.environment = environment;
        }

        Ok(self)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ServerResult<()> {
        if !self.step_delay_seconds.is_finite() || self.step_delay_seconds < 0.0 {
            return Err(ServerError::config(
                "step_delay_seconds must be a non-negative number",
            ));
        }

        if self.flush_timeout_ms == 0 {
            return Err(ServerError::config("flush_timeout_ms must be greater than 0"));
        }

        if self.host.trim().is_empty() {
            return Err(ServerError::config("host must not be empty"));
        }

        self.listen_addr()?;

        Ok(())
    }

    /// Port to bind, falling back to the stage default.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.stage.default_port())
    }

    /// Socket address to bind.
    pub fn listen_addr(&self) -> ServerResult<SocketAddr> {
        let host = self.host.trim();
        let ip = if host.eq_ignore_ascii_case("localhost") {
            "127.0.0.1"
        } else {
            host
        };
        ip.parse()
            .map(|ip| SocketAddr::new(ip, self.port()))
            .map_err(|e| ServerError::config(format!("invalid listen address '{host}': {e}")))
    }

    /// Artificial processing delay.
    pub fn step_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.step_delay_seconds).unwrap_or(Duration::ZERO)
    }

    /// Flush barrier timeout.
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    /// Graceful shutdown drain timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Service name for the trace resource and logs.
    pub fn service_name(&self) -> String {
        self.telemetry
            .service_name
            .clone()
            .unwrap_or_else(|| self.stage.service_name().to_string())
    }

    /// Telemetry configuration for this stage.
    pub fn telemetry_config(&self) -> TelemetryConfig {
        let settings = &self.telemetry;

        let tracing = TracingConfig {
            enabled: settings.tracing_enabled,
            exporter: settings.exporter,
            otlp_endpoint: settings.otlp_endpoint.clone(),
            jaeger_endpoint: settings.jaeger_endpoint.clone(),
            ..TracingConfig::default()
        };

        let logging = LogConfig {
            level: settings.log_level.clone(),
            format: LogFormat::parse(&settings.log_format),
            ..LogConfig::default()
        };

        let metrics = MetricsConfig {
            enabled: settings.metrics_enabled,
            addr: settings.metrics_addr.clone(),
            ..MetricsConfig::default()
        };

        TelemetryConfig::builder()
            .service_name(&self.service_name())
            .service_version(crate::VERSION)
            .environment(&settings.environment)
            .flush_timeout(self.flush_timeout())
            .tracing(tracing)
            .logging(logging)
            .metrics(metrics)
            .build()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = StageConfig::default();
        assert_eq!(config.stage, StageKind::Validate);
        assert_eq!(config.port(), 8001);
        assert_eq!(config.step_delay(), Duration::from_secs(2));
        assert_eq!(config.flush_timeout(), Duration::from_millis(5000));
        assert_eq!(config.service_name(), "validator");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_stage_kind_parse() {
        assert_eq!("validate".parse::<StageKind>().unwrap(), StageKind::Validate);
        assert_eq!("Transformer".parse::<StageKind>().unwrap(), StageKind::Transform);
        assert_eq!(" ENRICH ".parse::<StageKind>().unwrap(), StageKind::Enrich);
        assert_eq!("persister".parse::<StageKind>().unwrap(), StageKind::Persist);
        assert!("archive".parse::<StageKind>().is_err());
    }

    #[test]
    fn test_stage_kind_defaults() {
        let ports: Vec<u16> = StageKind::ALL.iter().map(|k| k.default_port()).collect();
        assert_eq!(ports, vec![8001, 8002, 8003, 8004]);
        assert_eq!(StageKind::Enrich.service_name(), "enricher");
        assert_eq!(StageKind::Persist.to_string(), "persist");
    }

    #[test]
    fn test_env_overrides() {
        let config = StageConfig::default()
            .apply_overrides(env(&[
                ("STAGE", "transform"),
                ("PORT", "9100"),
                ("STEP_DELAY_SECONDS", "0.25"),
                ("TRACE_EXPORTER", "OTLP"),
                ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4317"),
                ("OTEL_SERVICE_NAME", "upper"),
                ("METRICS_ADDR", "127.0.0.1:9464"),
            ]))
            .unwrap();

        assert_eq!(config.stage, StageKind::Transform);
        assert_eq!(config.port(), 9100);
        assert_eq!(config.step_delay(), Duration::from_millis(250));
        assert_eq!(config.telemetry.exporter, ExporterMode::Otlp);
        assert_eq!(config.telemetry.otlp_endpoint, "http://collector:4317");
        assert_eq!(config.service_name(), "upper");
        assert!(config.telemetry.metrics_enabled);
    }

    #[test]
    fn test_traces_endpoint_wins() {
        let config = StageConfig::default()
            .apply_overrides(env(&[
                ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://general:4318"),
                ("OTEL_EXPORTER_OTLP_TRACES_ENDPOINT", "http://traces:4318"),
            ]))
            .unwrap();
        assert_eq!(config.telemetry.otlp_endpoint, "http://traces:4318");
    }

    #[test]
    fn test_unknown_exporter_is_jaeger() {
        let config = StageConfig::default()
            .apply_overrides(env(&[("TRACE_EXPORTER", "zipkin")]))
            .unwrap();
        assert_eq!(config.telemetry.exporter, ExporterMode::Jaeger);
    }

    #[test]
    fn test_invalid_env_values() {
        assert!(StageConfig::default()
            .apply_overrides(env(&[("PORT", "eighty")]))
            .is_err());
        assert!(StageConfig::default()
            .apply_overrides(env(&[("STEP_DELAY_SECONDS", "soon")]))
            .is_err());
        assert!(StageConfig::default()
            .apply_overrides(env(&[("TRACING_ENABLED", "maybe")]))
            .is_err());
    }

    #[test]
    fn test_empty_env_values_ignored() {
        let config = StageConfig::default()
            .apply_overrides(env(&[("PORT", ""), ("STAGE", "  ")]))
            .unwrap();
        assert_eq!(config.port(), 8001);
    }

    #[test]
    fn test_validate_rejects_negative_delay() {
        let config = StageConfig {
            step_delay_seconds: -1.0,
            ..StageConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_host() {
        let config = StageConfig {
            host: "not an ip".to_string(),
            ..StageConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml() {
        let config: StageConfig = toml::from_str(
            r#"
            stage = "enricher"
            port = 9003
            step_delay_seconds = 0.0

            [telemetry]
            exporter = "otlp"
            tracing_enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.stage, StageKind::Enrich);
        assert_eq!(config.port(), 9003);
        assert_eq!(config.step_delay(), Duration::ZERO);
        assert_eq!(config.telemetry.exporter, ExporterMode::Otlp);
        assert!(!config.telemetry.tracing_enabled);
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn test_telemetry_config() {
        let mut config = StageConfig::for_stage(StageKind::Persist);
        config.telemetry.tracing_enabled = false;
        config.telemetry.log_format = "pretty".to_string();

        let telemetry = config.telemetry_config();
        assert_eq!(telemetry.service_name, "persister");
        assert_eq!(telemetry.tracing.service_name, "persister");
        assert!(!telemetry.tracing.enabled);
        assert_eq!(telemetry.logging.format, LogFormat::Pretty);
        assert_eq!(telemetry.flush_timeout, Duration::from_millis(5000));
        assert_eq!(telemetry.tracing.service_version, crate::VERSION);
    }
}
