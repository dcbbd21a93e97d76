//! Operator entry point.
//!
//! Exit codes: 0 ok, 1 configuration error, 2 run finished degraded,
//! 3 fatal.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ridewatch_common::{Config, GeocodingProvider, MetricsSink, RideWatchError, RunOutcome};
use ridewatch_enrich::{
    DetailEnrichmentWorker, DetailWorkerConfig, GeminiExtractor, GeocodeCache, GeocodeWorker,
    GeocodeWorkerConfig, Geocoder, GoogleGeocoder, NominatimGeocoder,
};
use ridewatch_fetch::{
    ContentCache, FetcherConfig, HttpFetcher, RateLimiter, RateLimiterConfig, Validator,
};
use ridewatch_scout::{ClockScheduler, OrchestratorConfig, ScrapeOrchestrator, SCRAPE_JOB};
use ridewatch_store::{EventRepository, PgEventRepository};

#[derive(Parser)]
#[command(name = "ridewatch", about = "Endurance-ride calendar scraper and enricher")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// One-shot scrape run.
    RunScrape {
        /// Source to scrape (only AERC today).
        #[arg(long)]
        source: Option<String>,
    },
    /// Batch geocoding of unattempted events.
    EnrichGeocode {
        #[arg(long, conflicts_with = "all")]
        limit: Option<u32>,
        /// Geocode every pending event regardless of batch size.
        #[arg(long)]
        all: bool,
    },
    /// Batch detail enrichment from event websites/flyers.
    EnrichDetails {
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Apply schema migrations.
    Migrate,
    /// Run the scheduler daemon with the configured cron jobs.
    Start,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(1);
        }
    };

    init_tracing(&config);
    config.log_redacted();

    match run(cli, config).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, code = e.code(), "fatal");
            match e {
                RideWatchError::Config(_) => ExitCode::from(1),
                _ => ExitCode::from(3),
            }
        }
    }
}

fn init_tracing(config: &Config) {
    let default = if config.scraper_debug {
        "ridewatch=debug,info"
    } else {
        "ridewatch=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

async fn run(cli: Cli, config: Config) -> Result<ExitCode, RideWatchError> {
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&config.database_url)
        .await
        .map_err(|e| RideWatchError::Repository(format!("connect: {e}")))?;
    let repo = Arc::new(PgEventRepository::new(pool));
    let metrics = Arc::new(MetricsSink::new());

    match cli.command {
        Command::Migrate => {
            repo.migrate().await?;
            info!("migrations applied");
            Ok(ExitCode::SUCCESS)
        }

        Command::RunScrape { source } => {
            if let Some(source) = &source {
                if source != ridewatch_common::AERC_SOURCE {
                    return Err(RideWatchError::Config(format!(
                        "unknown source: {source}"
                    )));
                }
            }
            let report = build_orchestrator(&config, repo.clone(), metrics.clone())
                .await?
                .run(CancellationToken::new())
                .await?;
            println!("{report}");
            Ok(exit_for_outcome(report.outcome))
        }

        Command::EnrichGeocode { limit, all } => {
            let limit = if all { None } else { limit.or(Some(100)) };
            let worker = build_geocode_worker(&config, repo.clone(), metrics.clone()).await?;
            let summary = worker.run_batch(limit).await?;
            println!("{summary}");
            Ok(ExitCode::SUCCESS)
        }

        Command::EnrichDetails { limit } => {
            let worker = build_detail_worker(&config, repo.clone(), metrics.clone()).await?;
            let summary = worker.run_batch(limit).await?;
            println!("{summary}");
            Ok(ExitCode::SUCCESS)
        }

        Command::Start => {
            run_daemon(config, repo, metrics).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn exit_for_outcome(outcome: RunOutcome) -> ExitCode {
    match outcome {
        RunOutcome::Succeeded => ExitCode::SUCCESS,
        RunOutcome::Degraded => ExitCode::from(2),
        RunOutcome::TimedOut | RunOutcome::Failed => ExitCode::from(3),
    }
}

async fn build_fetcher(
    config: &Config,
    metrics: Arc<MetricsSink>,
    ttl: Duration,
) -> Result<Arc<HttpFetcher>, RideWatchError> {
    let limiter = Arc::new(RateLimiter::new(
        RateLimiterConfig {
            requests_per_second: config.requests_per_second,
            burst: config.burst,
        },
        metrics.clone(),
    ));
    let cache = Arc::new(
        ContentCache::open(&config.cache_dir, config.scraper_refresh, metrics.clone())
            .await
            .map_err(|e| RideWatchError::Config(format!("cache dir: {e}")))?,
    );
    let validator: Option<Box<Validator>> = if config.scraper_validate {
        Some(Box::new(|bytes: &[u8]| !bytes.is_empty()))
    } else {
        None
    };
    Ok(Arc::new(HttpFetcher::new(
        limiter,
        cache,
        FetcherConfig {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            ttl,
            request_deadline: Duration::from_secs(30),
        },
        validator,
        metrics,
    )))
}

async fn build_orchestrator(
    config: &Config,
    repo: Arc<dyn EventRepository>,
    metrics: Arc<MetricsSink>,
) -> Result<ScrapeOrchestrator, RideWatchError> {
    let fetcher = build_fetcher(
        config,
        metrics.clone(),
        Duration::from_secs(config.cache_ttl_html_s),
    )
    .await?;
    Ok(ScrapeOrchestrator::new(
        fetcher,
        repo,
        metrics,
        OrchestratorConfig::default(),
    ))
}

fn build_geocoder(config: &Config) -> Result<Arc<dyn Geocoder>, RideWatchError> {
    match config.geocoding_provider {
        GeocodingProvider::Nominatim => {
            let user_agent = config.geocoding_user_agent.as_deref().ok_or_else(|| {
                RideWatchError::Config("nominatim requires GEOCODING_USER_AGENT".into())
            })?;
            Ok(Arc::new(NominatimGeocoder::new(user_agent)))
        }
        GeocodingProvider::Google => {
            if config.geocoding_api_key.is_empty() {
                return Err(RideWatchError::Config(
                    "google geocoding requires GEOCODING_API_KEY".into(),
                ));
            }
            Ok(Arc::new(GoogleGeocoder::new(&config.geocoding_api_key)))
        }
    }
}

async fn build_geocode_worker(
    config: &Config,
    repo: Arc<dyn EventRepository>,
    metrics: Arc<MetricsSink>,
) -> Result<GeocodeWorker, RideWatchError> {
    let geocoder = build_geocoder(config)?;
    let cache = GeocodeCache::open(
        &config.cache_dir,
        geocoder.name(),
        Duration::from_secs(config.cache_ttl_geocode_s),
        Duration::from_secs(4 * 3600),
    )
    .await
    .map_err(|e| RideWatchError::Config(format!("geocode cache dir: {e}")))?;
    Ok(GeocodeWorker::new(
        repo,
        geocoder,
        cache,
        metrics,
        GeocodeWorkerConfig {
            max_retries: config.max_retries,
            retry_base: Duration::from_millis(config.base_delay_ms),
            deadline: Duration::from_secs(10),
        },
    ))
}

async fn build_detail_worker(
    config: &Config,
    repo: Arc<dyn EventRepository>,
    metrics: Arc<MetricsSink>,
) -> Result<DetailEnrichmentWorker, RideWatchError> {
    if config.gemini_api_key.is_empty() {
        return Err(RideWatchError::Config(
            "detail enrichment requires GEMINI_API_KEY".into(),
        ));
    }
    // Event pages re-fetch at most daily; cache accordingly.
    let fetcher = build_fetcher(config, metrics.clone(), Duration::from_secs(24 * 3600)).await?;
    let extractor = Arc::new(GeminiExtractor::new(&config.gemini_api_key));
    Ok(DetailEnrichmentWorker::new(
        repo,
        fetcher,
        extractor,
        metrics,
        DetailWorkerConfig::default(),
    ))
}

async fn run_daemon(
    config: Config,
    repo: Arc<PgEventRepository>,
    metrics: Arc<MetricsSink>,
) -> Result<(), RideWatchError> {
    repo.migrate().await?;

    let scheduler = ClockScheduler::new(metrics.clone()).await?;
    scheduler
        .report_missed_window(repo.as_ref(), SCRAPE_JOB, Duration::from_secs(24 * 3600))
        .await;

    let scrape_repo: Arc<dyn EventRepository> = repo.clone();
    let orchestrator = Arc::new(
        build_orchestrator(&config, scrape_repo.clone(), metrics.clone()).await?,
    );
    scheduler
        .add_job(SCRAPE_JOB, &config.scrape_schedule, move || {
            let orchestrator = orchestrator.clone();
            async move {
                match orchestrator.run(CancellationToken::new()).await {
                    Ok(report) => info!(outcome = %report.outcome, "scheduled scrape finished"),
                    Err(e) => error!(error = %e, "scheduled scrape failed"),
                }
            }
        })
        .await?;

    let geocode_worker = Arc::new(
        build_geocode_worker(&config, scrape_repo.clone(), metrics.clone()).await?,
    );
    let detail_worker =
        Arc::new(build_detail_worker(&config, scrape_repo, metrics.clone()).await?);
    scheduler
        .add_job("enrich", &config.enrichment_schedule, move || {
            let geocode_worker = geocode_worker.clone();
            let detail_worker = detail_worker.clone();
            async move {
                if let Err(e) = geocode_worker.run_batch(Some(200)).await {
                    error!(error = %e, "scheduled geocoding failed");
                }
                if let Err(e) = detail_worker.run_batch(Some(200)).await {
                    error!(error = %e, "scheduled detail enrichment failed");
                }
            }
        })
        .await?;

    scheduler.start().await?;
    info!(
        scrape = %config.scrape_schedule,
        enrichment = %config.enrichment_schedule,
        "scheduler running, ctrl-c to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| RideWatchError::Anyhow(anyhow::anyhow!("signal: {e}")))?;
    info!("shutting down");
    Ok(())
}
