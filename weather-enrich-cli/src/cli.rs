use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use inquire::{Confirm, Password};
use tracing::{info, warn};
use weather_enrich_core::{
    ColumnNames, Config, EnrichmentPipeline, InputTable, MatchPolicy, OutputLayout, ProviderBinding,
    ProviderId, pipeline::summarize, provider::provider_from_config,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(
    name = "weather-enrich",
    version,
    about = "Enrich telemetry CSVs with historical weather observations"
)]
pub struct Cli {
    /// Use this config file instead of the platform default.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name: "openweather", "brightsky" or "openmeteo".
        provider: String,
    },

    /// Add weather columns to every row of a CSV file.
    Enrich(EnrichArgs),
}

#[derive(Debug, Args)]
pub struct EnrichArgs {
    /// Input CSV with latitude, longitude and nanosecond timestamp columns.
    pub input: PathBuf,

    /// Where to write the enriched CSV.
    pub output: PathBuf,

    /// Provider to query; repeat for several. Defaults to the configured default provider.
    #[arg(long = "provider", short = 'p')]
    pub providers: Vec<String>,

    /// nearest-by-hour, nearest-absolute or exact-hour-only, for every provider.
    /// Without it OpenWeather uses nearest-absolute and the rest nearest-by-hour.
    #[arg(long)]
    pub policy: Option<String>,

    /// Records in flight at once.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Per-request timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Skip the on-disk response cache.
    #[arg(long)]
    pub no_cache: bool,

    #[arg(long, default_value = "INSPVAS__Latitude")]
    pub lat_column: String,

    #[arg(long, default_value = "INSPVAS__Longitude")]
    pub lon_column: String,

    #[arg(long, default_value = "Timestamp")]
    pub timestamp_column: String,

    /// Text written for values a provider did not supply.
    #[arg(long, default_value = "")]
    pub absent_marker: String,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let config_path = match self.config {
            Some(path) => path,
            None => Config::config_file_path()?,
        };

        match self.command {
            Command::Configure { provider } => configure(&config_path, &provider),
            Command::Enrich(args) => {
                let config = Config::load_from(&config_path)?;
                enrich(&config, args).await
            }
        }
    }
}

fn configure(config_path: &Path, provider: &str) -> anyhow::Result<()> {
    let id = ProviderId::try_from(provider)?;
    let mut config = Config::load_from(config_path)?;

    if id.requires_api_key() {
        let api_key = Password::new(&format!("API key for {id}:"))
            .without_confirmation()
            .prompt()
            .context("Failed to read API key")?;
        config.upsert_provider_api_key(id, api_key.trim().to_string());
    } else {
        println!("{id} needs no API key.");
    }

    if config.default_provider_id().ok() != Some(id) {
        let make_default = Confirm::new(&format!("Use {id} as the default provider?"))
            .with_default(true)
            .prompt()
            .context("Failed to read answer")?;
        if make_default {
            config.set_default_provider(id);
        }
    }

    config.save_to(config_path)?;
    println!("Saved configuration to {}", config_path.display());
    Ok(())
}

async fn enrich(config: &Config, args: EnrichArgs) -> anyhow::Result<()> {
    let ids = if args.providers.is_empty() {
        vec![config.default_provider_id()?]
    } else {
        args.providers
            .iter()
            .map(|p| ProviderId::try_from(p.as_str()))
            .collect::<anyhow::Result<Vec<_>>>()?
    };

    let mut config = config.clone();
    if let Some(timeout) = args.timeout {
        config.pipeline.request_timeout_secs = timeout;
    }

    // An explicit policy applies to every provider; without one each
    // provider falls back to its own default.
    let policy = match &args.policy {
        Some(p) => Some(p.parse::<MatchPolicy>()?),
        None => config.pipeline.policy,
    };

    let mut bindings: Vec<ProviderBinding> = Vec::with_capacity(ids.len());
    for id in ids {
        if bindings.iter().any(|b| b.id() == id) {
            warn!(provider = %id, "provider given twice, ignoring the repeat");
            continue;
        }
        let client = provider_from_config(id, &config, !args.no_cache)?;
        let binding = ProviderBinding::new(client);
        bindings.push(match policy {
            Some(policy) => binding.with_policy(policy),
            None => binding,
        });
    }
    let workers = args.workers.unwrap_or(config.pipeline.workers);

    let table = InputTable::read_path(&args.input)
        .with_context(|| format!("Failed to read input CSV: {}", args.input.display()))?;
    let names = ColumnNames {
        latitude: args.lat_column,
        longitude: args.lon_column,
        timestamp: args.timestamp_column,
    };
    let records = table.records(&names)?;
    info!(rows = records.len(), input = %args.input.display(), "loaded input");

    let pipeline = EnrichmentPipeline::new(policy.unwrap_or_default())
        .with_workers(workers)
        .with_request_timeout(config.fetch_budget());

    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight rows and writing what is done");
            cancel.cancel();
        }
    });

    let enriched = pipeline.run_all(&records, &bindings).await;

    let layout = OutputLayout::new(&bindings);
    table
        .write_path(&args.output, &enriched, &layout, &args.absent_marker)
        .with_context(|| format!("Failed to write output CSV: {}", args.output.display()))?;

    let summary = summarize(&enriched);
    println!("Wrote {} rows to {}", enriched.len(), args.output.display());
    for binding in &bindings {
        let counts = summary.get(&binding.id()).copied().unwrap_or_default();
        println!(
            "  {:<12} matched {:>6}  no match {:>6}  provider errors {:>6}  \
             invalid rows {:>6}  cancelled {:>6}",
            binding.id().as_str(),
            counts.matched,
            counts.no_match,
            counts.provider_error,
            counts.invalid_input,
            counts.cancelled,
        );
    }

    Ok(())
}
