//! HTTP Endpoint Monitor Binary

use api_monitor::endpoint::parse_header;
use api_monitor::store::hours_ago;
use api_monitor::{
    ApiMonitor, Config, EndpointId, EndpointRegistry, EndpointUpdate, HttpMethod, HttpProber,
    JsonLinesSink, MemoryMetricsStore, MetricsQuery, NewEndpoint, Prober, RegistryDefaults,
    Result,
};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "api-monitor", version, about = "Periodically probe HTTP endpoints and record metrics")]
struct Cli {
    /// Endpoint registry file
    #[arg(long, env = "ENDPOINTS_FILE", global = true)]
    endpoints_file: Option<PathBuf>,

    /// Metric records file (JSON Lines)
    #[arg(long, env = "METRICS_FILE", global = true)]
    metrics_file: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogFormat::Json, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Monitor every active endpoint until Ctrl-C
    Run,

    /// Register a new endpoint
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "GET")]
        method: String,
        /// Header as 'Name: value'; repeatable
        #[arg(long = "header")]
        headers: Vec<String>,
        /// JSON payload for POST, PUT and PATCH
        #[arg(long)]
        body: Option<String>,
        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Check interval in seconds
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Change fields of an endpoint
    Update {
        id: EndpointId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        method: Option<String>,
        /// Replaces all headers; repeatable
        #[arg(long = "header")]
        headers: Vec<String>,
        #[arg(long, conflicts_with = "clear_body")]
        body: Option<String>,
        #[arg(long)]
        clear_body: bool,
        #[arg(long)]
        timeout: Option<u64>,
        #[arg(long)]
        interval: Option<u64>,
        #[arg(long)]
        active: Option<bool>,
    },

    /// Delete an endpoint
    Remove {
        id: EndpointId,
        /// Also delete its stored metric records
        #[arg(long)]
        purge_metrics: bool,
    },

    /// Activate or deactivate an endpoint
    Toggle { id: EndpointId },

    /// Show all endpoints
    List,

    /// Probe one endpoint now and print the record
    Probe { id: EndpointId },

    /// Show stored metric records, newest first
    Metrics {
        #[arg(long)]
        endpoint: Option<String>,
        #[arg(long, default_value_t = 24, value_parser = clap::value_parser!(i64).range(1..))]
        hours: i64,
        #[arg(long, default_value_t = 1000)]
        limit: usize,
    },

    /// Per-endpoint statistics over stored records
    Summary {
        #[arg(long, default_value_t = 24, value_parser = clap::value_parser!(i64).range(1..))]
        hours: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    initialize_tracing(cli.log_format);

    let mut config = Config::from_env();
    if let Some(path) = cli.endpoints_file {
        config.endpoints_file = path;
    }
    if let Some(path) = cli.metrics_file {
        config.metrics_file = path;
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = execute(cli.command, &config).await {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn execute(command: Command, config: &Config) -> Result<()> {
    match command {
        Command::Run => run(config).await,

        Command::Add {
            name,
            url,
            method,
            headers,
            body,
            timeout,
            interval,
        } => {
            let registry = load_registry(config).await?;

            let mut definition = NewEndpoint::new(name, url).with_method(method.parse()?);
            for raw in &headers {
                let (name, value) = parse_header(raw)?;
                definition = definition.with_header(name, value);
            }
            definition.body = body;
            definition.timeout_seconds = timeout;
            definition.check_interval_seconds = interval;

            let endpoint = registry.add(definition).await?;
            registry.save_to_file(&config.endpoints_file).await?;
            print_json(&endpoint)
        }

        Command::Update {
            id,
            name,
            url,
            method,
            headers,
            body,
            clear_body,
            timeout,
            interval,
            active,
        } => {
            let registry = load_registry(config).await?;

            let update = EndpointUpdate {
                name,
                url,
                method: method.map(|m| m.parse::<HttpMethod>()).transpose()?,
                headers: if headers.is_empty() {
                    None
                } else {
                    Some(
                        headers
                            .iter()
                            .map(|raw| parse_header(raw))
                            .collect::<Result<Vec<_>>>()?,
                    )
                },
                body: if clear_body { Some(None) } else { body.map(Some) },
                timeout_seconds: timeout,
                check_interval_seconds: interval,
                is_active: active,
            };

            let outcome = registry.update(id, update).await?;
            registry.save_to_file(&config.endpoints_file).await?;
            print_json(&outcome.endpoint)
        }

        Command::Remove { id, purge_metrics } => {
            let registry = load_registry(config).await?;
            let endpoint = registry.remove(id).await?;
            registry.save_to_file(&config.endpoints_file).await?;

            if purge_metrics {
                let sink = JsonLinesSink::open(&config.metrics_file).await?;
                sink.purge_endpoint(&endpoint.name).await?;
            }
            print_json(&endpoint)
        }

        Command::Toggle { id } => {
            let registry = load_registry(config).await?;
            let endpoint = registry.toggle(id).await?;
            registry.save_to_file(&config.endpoints_file).await?;
            print_json(&endpoint)
        }

        Command::List => {
            let registry = load_registry(config).await?;
            print_json(&registry.list().await)
        }

        Command::Probe { id } => {
            let registry = load_registry(config).await?;
            let endpoint = registry.get(id).await?;
            let record = HttpProber::from_config(config)?.probe(&endpoint).await;
            print_json(&record)
        }

        Command::Metrics {
            endpoint,
            hours,
            limit,
        } => {
            let store = load_store(config).await?;
            let mut query = MetricsQuery::last_hours(hours).with_limit(limit);
            query.endpoint_name = endpoint;
            print_json(&store.query(&query).await)
        }

        Command::Summary { hours } => {
            let store = load_store(config).await?;
            print_json(&store.summary(hours_ago(hours)).await)
        }
    }
}

async fn run(config: &Config) -> Result<()> {
    info!(
        "Starting API monitor v{} - Endpoints: {}, Metrics: {}",
        env!("CARGO_PKG_VERSION"),
        config.endpoints_file.display(),
        config.metrics_file.display()
    );

    // The registry is not edited while running; CLI edits made meanwhile
    // stay in the file for the next start
    build_monitor(config)
        .await?
        .run_until_shutdown(config.stats_interval)
        .await
}

/// Build the monitor from the registry file, saving it only if seeding added endpoints
async fn build_monitor(config: &Config) -> Result<Arc<ApiMonitor>> {
    let registry = Arc::new(load_registry(config).await?);
    let sink = Arc::new(JsonLinesSink::open(&config.metrics_file).await?);
    let prober = Arc::new(HttpProber::from_config(config)?);
    let monitor = Arc::new(ApiMonitor::new(Arc::clone(&registry), prober, sink));

    if config.seed_sample_endpoints && monitor.seed_sample_endpoints().await? > 0 {
        registry.save_to_file(&config.endpoints_file).await?;
    }

    Ok(monitor)
}

async fn load_registry(config: &Config) -> Result<EndpointRegistry> {
    EndpointRegistry::load_from_file(&config.endpoints_file, RegistryDefaults::from(config)).await
}

async fn load_store(config: &Config) -> Result<MemoryMetricsStore> {
    let records = JsonLinesSink::read_all(&config.metrics_file).await?;
    Ok(MemoryMetricsStore::from_records(records))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Initialize structured logging on stderr, keeping stdout for command output
fn initialize_tracing(format: LogFormat) {
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json_layer = matches!(format, LogFormat::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(false)
            .with_line_number(false)
            .with_writer(std::io::stderr)
            .json()
    });

    let pretty_layer = matches!(format, LogFormat::Pretty).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(json_layer)
        .with(pretty_layer)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(dir: &tempfile::TempDir) -> Config {
        Config {
            endpoints_file: dir.path().join("endpoints.json"),
            metrics_file: dir.path().join("metrics.jsonl"),
            ..Config::default()
        }
    }

    fn add(name: &str) -> Command {
        Command::Add {
            name: name.to_string(),
            url: format!("http://{}/health", name),
            method: "GET".to_string(),
            headers: Vec::new(),
            body: None,
            timeout: None,
            interval: Some(60),
        }
    }

    async fn stored_names(config: &Config) -> Vec<String> {
        load_registry(config)
            .await
            .unwrap()
            .list()
            .await
            .into_iter()
            .map(|e| e.name)
            .collect()
    }

    #[tokio::test]
    async fn test_cli_edits_survive_running_monitor() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(&dir);
        execute(add("a"), &config).await.unwrap();

        let monitor = build_monitor(&config).await.unwrap();
        monitor.start_monitoring().await;
        execute(add("b"), &config).await.unwrap();
        monitor.shutdown().await;

        assert_eq!(stored_names(&config).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_seeded_endpoints_are_saved() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            seed_sample_endpoints: true,
            ..temp_config(&dir)
        };

        build_monitor(&config).await.unwrap();
        assert_eq!(stored_names(&config).await.len(), 3);
    }
}
