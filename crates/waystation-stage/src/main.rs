//! Waystation stage - Entry point

use std::path::PathBuf;

use tracing::{error, info};

use waystation_stage::{
    stage_for, ShutdownSignal, StageConfig, StageHandler, StageKind, StageServer,
};
use waystation_telemetry::{init_telemetry, stage_tracer};

/// Command-line arguments.
#[derive(Debug, Default, PartialEq)]
struct Args {
    /// Stage to run; overrides `STAGE` and the config file.
    stage: Option<String>,
    /// Path to configuration file.
    config: Option<PathBuf>,
}

/// What the command line asks for.
#[derive(Debug, PartialEq)]
enum Command {
    Run(Args),
    Help,
    Version,
}

impl Args {
    fn parse() -> Self {
        match parse_args(std::env::args().skip(1)) {
            Ok(Command::Run(args)) => args,
            Ok(Command::Help) => {
                print_help();
                std::process::exit(0);
            }
            Ok(Command::Version) => {
                println!("waystation-stage {}", waystation_stage::VERSION);
                std::process::exit(0);
            }
            Err(message) => {
                eprintln!("{message}");
                eprintln!("Use --help for usage information");
                std::process::exit(1);
            }
        }
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Command, String> {
    let mut args = args.into_iter();
    let mut parsed = Args::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--stage" | "-s" => {
                parsed.stage = Some(required_value(&arg, args.next())?);
            }
            "--config" | "-c" => {
                parsed.config = Some(PathBuf::from(required_value(&arg, args.next())?));
            }
            "--help" | "-h" => return Ok(Command::Help),
            "--version" | "-v" => return Ok(Command::Version),
            other => return Err(format!("Unknown argument: {other}")),
        }
    }

    Ok(Command::Run(parsed))
}

/// The value following `flag`. Another flag does not count as one.
fn required_value(flag: &str, value: Option<String>) -> Result<String, String> {
    match value {
        Some(value) if !value.starts_with('-') => Ok(value),
        _ => Err(format!("Missing value for {flag}")),
    }
}

fn print_help() {
    println!(
        r"Waystation stage - one hop of the validate/transform/enrich/persist pipeline

USAGE:
    waystation-stage [OPTIONS]

OPTIONS:
    -s, --stage <NAME>     validate, transform, enrich or persist
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    STAGE                               Stage to run (default: validate)
    HOST, PORT                          Listen address (default: 0.0.0.0, 8001-8004)
    STEP_DELAY_SECONDS                  Processing delay per request (default: 2.0)
    FLUSH_TIMEOUT_MS                    Trace flush bound per request (default: 5000)
    OTEL_SERVICE_NAME                   Trace service name (default: stage service name)
    TRACE_EXPORTER                      'otlp' for OTLP, anything else for Jaeger
    OTEL_EXPORTER_OTLP_TRACES_ENDPOINT  OTLP endpoint (also OTEL_EXPORTER_OTLP_ENDPOINT)
    JAEGER_COLLECTOR_ENDPOINT           Jaeger collector endpoint
    TRACING_ENABLED                     Set to false to disable span export
    LOG_LEVEL, LOG_FORMAT               Log filter and format (json or pretty)
    METRICS_ADDR                        Prometheus listener; enables metrics
    DEPLOYMENT_ENVIRONMENT              Resource attribute (default: development)

EXAMPLES:
    # Run the enrich stage with a configuration file
    waystation-stage --stage enrich --config /etc/waystation/stage.toml

    # Run the persist stage without a delay
    STAGE=persist STEP_DELAY_SECONDS=0 waystation-stage
"
    );
}

fn load_config(args: &Args) -> Result<StageConfig, waystation_stage::ServerError> {
    let config = match &args.config {
        Some(path) => StageConfig::from_file(path)?,
        None => StageConfig::default(),
    };

    let mut config = config.with_env_overrides()?;
    if let Some(stage) = &args.stage {
        config.stage = stage.parse::<StageKind>()?;
    }
    config.validate()?;

    Ok(config)
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let guard = match init_telemetry(config.telemetry_config()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {e}");
            std::process::exit(1);
        }
    };

    info!(
        stage = %config.stage,
        service = %config.service_name(),
        version = waystation_stage::VERSION,
        tracing_enabled = guard.tracer_provider().is_some(),
        "Starting Waystation stage"
    );

    let handler = StageHandler::new(
        stage_for(config.stage),
        stage_tracer(guard.tracer_provider(), "waystation-stage"),
        guard.flusher(),
    )
    .with_delay(config.step_delay());

    let server = match StageServer::new(&config, handler) {
        Ok(server) => server.with_shutdown(ShutdownSignal::with_os_signals()),
        Err(e) => {
            error!(error = %e, "Failed to create server");
            std::process::exit(1);
        }
    };

    let result = server.run().await;
    guard.shutdown().await;

    if let Err(e) = result {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
