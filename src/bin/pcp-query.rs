use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use pcp_datasource::{
    Datasource,
    backends::VectorBackend,
    config::read_config_file,
    models::{Query, QueryTarget, TargetFormat, TimeRange},
    template::TemplateVariables,
    transport::HttpTransport,
    util::parse_interval,
};
use tracing::{debug, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Overrides the configured connection url
const URL_ENV: &str = "PCP_URL";

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Data source settings file (JSON)
    #[arg(short)]
    file: String,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Check the connection to the configured endpoint
    Test,

    /// Run a single-target panel query
    Query {
        #[arg(long)]
        expr: String,

        #[arg(long, value_enum, default_value_t = Format::TimeSeries)]
        format: Format,

        /// Time window ending now, e.g. "5m"
        #[arg(long, default_value = "5m")]
        range: String,

        #[arg(long)]
        legend: Option<String>,
    },

    /// Resolve a template variable query
    Find { expr: String },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Format {
    TimeSeries,
    Table,
    Heatmap,
}

impl From<Format> for TargetFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::TimeSeries => TargetFormat::TimeSeries,
            Format::Table => TargetFormat::Table,
            Format::Heatmap => TargetFormat::Heatmap,
        }
    }
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("pcp_datasource", LevelFilter::DEBUG),
        ("pcp_query", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let mut settings = read_config_file(&args.file)?;
    if let Ok(url) = std::env::var(URL_ENV) {
        debug!("using url {url} from {URL_ENV}");
        settings.url = Some(url);
    }
    // one-shot commands never need the background poller
    settings.json_data.poll_interval = Some("0s".to_string());

    let transport = HttpTransport::new(Duration::from_secs(args.timeout))?;
    let datasource = Datasource::new(
        settings,
        Arc::new(transport),
        Arc::new(TemplateVariables::new()),
        Arc::new(VectorBackend::new()),
    )?;

    let output = match args.command {
        Command::Test => serde_json::to_value(datasource.test_datasource().await)?,
        Command::Query {
            expr,
            format,
            range,
            legend,
        } => {
            let span = parse_interval(&range)?;
            let span = chrono::Duration::from_std(span).context("range too large")?;

            let mut target = QueryTarget::new("A", expr);
            target.format = format.into();
            target.legend_format = legend;

            let query = Query {
                targets: vec![target],
                range: TimeRange::last(span),
                ..Default::default()
            };
            serde_json::to_value(datasource.query(&query).await?)?
        }
        Command::Find { expr } => serde_json::to_value(datasource.metric_find_query(&expr).await?)?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
