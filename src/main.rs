// ███████╗██╗██╗     ██╗███╗   ██╗ ██████╗
// ██╔════╝██║██║     ██║████╗  ██║██╔════╝
// █████╗  ██║██║     ██║██╔██╗ ██║██║  ███╗
// ██╔══╝  ██║██║     ██║██║╚██╗██║██║   ██║
// ██║     ██║███████╗██║██║ ╚████║╚██████╔╝
// ╚═╝     ╚═╝╚══════╝╚═╝╚═╝  ╚═══╝ ╚═════╝
//
// ██╗    ██╗ █████╗ ████████╗ ██████╗██╗  ██╗
// ██║    ██║██╔══██╗╚══██╔══╝██╔════╝██║  ██║
// ██║ █╗ ██║███████║   ██║   ██║     ███████║
// ██║███╗██║██╔══██║   ██║   ██║     ██╔══██║
// ╚███╔███╔╝██║  ██║   ██║   ╚██████╗██║  ██║
//  ╚══╝╚══╝ ╚═╝  ╚═╝   ╚═╝    ╚═════╝╚═╝  ╚═╝
//
// Fetch SEC EDGAR filings, diff each one against the last comparable filing,
// score how much anyone should care, fan alerts out to watchers. Everything
// downstream of the outbox — auth, billing, the web UI — is somebody else's
// problem.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use filing_watch_engine::config::Config;
use filing_watch_engine::edgar::EdgarFetcher;
use filing_watch_engine::metrics::{self, MetricsCollector};
use filing_watch_engine::models::JobType;
use filing_watch_engine::poller;
use filing_watch_engine::price::cache::InMemoryQuoteCache;
use filing_watch_engine::price::providers::{
    alpha::AlphaVantageProvider, finnhub::FinnhubProvider, iex::IexProvider, yahoo::YahooProvider,
};
use filing_watch_engine::price::{self, PriceAdapter};
use filing_watch_engine::queue::handlers::{
    alert_fanout::AlertFanoutHandler, cleanup::CleanupHandler, deliver::{DeliverHandler, RedisAlertDispatcher},
    ingest::IngestHandler, poll::PollHandler, price_refresh::PriceRefreshHandler,
};
use filing_watch_engine::queue::{JobHandler, JobQueue, JobQueueConfig};
use filing_watch_engine::rate_limiter::RateLimiter;
use filing_watch_engine::store::Store;

fn print_banner() {
    let banner = r#"

    ╔══════════════════════════════════════════════════════════════════╗
    ║                                                                  ║
    ║     ███████╗██╗██╗     ██╗███╗   ██╗ ██████╗                     ║
    ║     ██╔════╝██║██║     ██║████╗  ██║██╔════╝                     ║
    ║     █████╗  ██║██║     ██║██╔██╗ ██║██║  ███╗                    ║
    ║     ██╔══╝  ██║██║     ██║██║╚██╗██║██║   ██║                    ║
    ║     ██║     ██║███████╗██║██║ ╚████║╚██████╔╝                    ║
    ║     ╚═╝     ╚═╝╚══════╝╚═╝╚═╝  ╚═══╝ ╚═════╝                     ║
    ║                                                                  ║
    ║              W A T C H   E N G I N E                            ║
    ║                                                                  ║
    ║   Source:     SEC EDGAR submissions + archive documents         ║
    ║   Pipeline:   poll → ingest → diff → score → fan out            ║
    ║   Resilience: circuit breaker + sliding-window rate limiter      ║
    ║   Store:      embedded SQLite, durable job queue                 ║
    ║                                                                  ║
    ╚══════════════════════════════════════════════════════════════════╝

    "#;
    println!("{}", banner);
}

/// The composition root. Every long-lived collaborator is built once here
/// and handed out as an `Arc` — no module-level singletons, no `OnceCell`
/// statics reached into from deep inside the call graph. If a type needs
/// the store or the metrics collector, it takes an `Arc` in its
/// constructor; `AppContext::build` is the only place that decides what
/// gets wired to what.
struct AppContext {
    config: Arc<Config>,
    store: Arc<Store>,
    metrics: Arc<MetricsCollector>,
    edgar: Arc<EdgarFetcher>,
    price_adapter: Arc<PriceAdapter>,
    dispatcher: Arc<RedisAlertDispatcher>,
    /// Cancels every blocking point wired to it (rate limiter waits, EDGAR's
    /// HTTP client) the moment Ctrl+C fires, so in-flight jobs unblock and
    /// reschedule instead of riding out their current wait.
    shutdown: CancellationToken,
}

impl AppContext {
    async fn build(config: Arc<Config>) -> Result<Self, Box<dyn std::error::Error>> {
        let store = Arc::new(Store::connect(&config.database_url).await?);
        info!("durable store connected");

        let metrics = Arc::new(MetricsCollector::new());

        let shutdown = CancellationToken::new();
        let edgar_limiter = Arc::new(RateLimiter::new());
        let edgar = Arc::new(EdgarFetcher::new(
            config.edgar_base_url.clone(),
            &config.edgar_user_agent,
            edgar_limiter,
            config.edgar_rate_limit_per_sec,
            config.edgar_max_retries,
            config.circuit_breaker_failure_threshold,
            config.circuit_breaker_reset_timeout,
            config.circuit_breaker_success_threshold,
            config.edgar_request_timeout,
            shutdown.clone(),
        )?);
        info!("EDGAR fetcher online");

        let price_limiter = Arc::new(RateLimiter::new());
        let http_client = reqwest::Client::builder()
            .timeout(config.price_request_timeout)
            .build()?;
        let providers: Vec<Box<dyn price::providers::QuoteProvider>> = vec![
            Box::new(AlphaVantageProvider::new(
                http_client.clone(),
                config.alpha_vantage_api_key.clone().unwrap_or_default(),
                config.alpha_vantage_base_url.clone(),
            )),
            Box::new(FinnhubProvider::new(
                http_client.clone(),
                config.finnhub_api_key.clone().unwrap_or_default(),
                config.finnhub_base_url.clone(),
            )),
            Box::new(YahooProvider::new(http_client.clone(), config.yahoo_base_url.clone())),
            Box::new(IexProvider::new(
                http_client.clone(),
                config.iex_api_key.clone().unwrap_or_default(),
                config.iex_base_url.clone(),
            )),
        ];
        let price_adapter = Arc::new(PriceAdapter::new(
            providers,
            price_limiter,
            Arc::new(InMemoryQuoteCache::default()),
            config.price_per_provider_rate_limit,
            config.price_provider_timeout,
            config.price_cache_ttl,
            shutdown.clone(),
        ));
        info!("price adapter online with 4 providers");

        let dispatcher = Arc::new(RedisAlertDispatcher::new(
            &config.alert_redis_url,
            config.alert_redis_channel.clone(),
            config.alert_redis_sorted_set.clone(),
        )?);

        Ok(Self { config, store, metrics, edgar, price_adapter, dispatcher, shutdown })
    }

    fn job_handlers(&self) -> HashMap<JobType, Arc<dyn JobHandler>> {
        let mut handlers: HashMap<JobType, Arc<dyn JobHandler>> = HashMap::new();
        handlers.insert(
            JobType::Poll,
            Arc::new(PollHandler::new(self.store.clone(), self.edgar.clone(), self.metrics.clone())),
        );
        handlers.insert(
            JobType::Ingest,
            Arc::new(IngestHandler::new(self.store.clone(), self.edgar.clone(), self.metrics.clone())),
        );
        handlers.insert(
            JobType::AlertFanout,
            Arc::new(AlertFanoutHandler::new(self.store.clone(), self.metrics.clone())),
        );
        handlers.insert(
            JobType::Deliver,
            Arc::new(DeliverHandler::new(self.store.clone(), self.dispatcher.clone(), self.metrics.clone())),
        );
        handlers.insert(
            JobType::PriceRefresh,
            Arc::new(PriceRefreshHandler::new(self.price_adapter.clone(), self.metrics.clone())),
        );
        handlers.insert(
            JobType::Cleanup,
            Arc::new(CleanupHandler::new(
                self.store.clone(),
                chrono::Duration::from_std(self.config.cleanup_retention).unwrap(),
            )),
        );
        handlers
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 8)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(true)
        .init();

    print_banner();
    info!("filing watch engine initializing...");

    let config = Arc::new(Config::from_env());
    info!(database_url = %config.database_url, "configuration loaded");

    let ctx = AppContext::build(config.clone()).await?;

    let handlers = ctx.job_handlers();
    info!(handlers = handlers.len(), "job handlers registered");

    let queue_config = JobQueueConfig {
        worker_pool_size: config.worker_pool_size,
        idle_backoff: config.queue_idle_backoff,
        pull_error_backoff: config.queue_pull_error_backoff,
        shutdown_grace: config.shutdown_grace,
        reaper_interval: config.reaper_interval,
        reaper_max_age: config.worker_heartbeat * 3,
    };
    let job_queue = JobQueue::new(ctx.store.clone(), handlers, ctx.metrics.clone(), queue_config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut worker_handles = job_queue.run(shutdown_rx.clone());
    info!(workers = config.worker_pool_size, "job queue workers online");

    let poller_store = ctx.store.clone();
    let poll_interval = config.poll_interval;
    let mut poller_shutdown = shutdown_rx.clone();
    let poller_handle = tokio::spawn(async move {
        info!("poller: ONLINE");
        poller::run(poller_store, poll_interval, &mut poller_shutdown).await;
        info!("poller: OFFLINE");
    });

    let metrics_for_server = ctx.metrics.clone();
    let metrics_port = config.metrics_port;
    let mut metrics_shutdown = shutdown_rx.clone();
    let metrics_handle = tokio::spawn(async move {
        info!(port = metrics_port, "metrics server starting");
        metrics::run_metrics_server(metrics_for_server, metrics_port, &mut metrics_shutdown).await;
        info!("metrics server: OFFLINE");
    });

    info!("===========================================================");
    info!("  filing watch engine active");
    info!("  {} job workers, poll every {:?}", config.worker_pool_size, config.poll_interval);
    info!("  metrics at http://0.0.0.0:{}/metrics", config.metrics_port);
    info!("  press Ctrl+C for graceful shutdown");
    info!("===========================================================");

    match signal::ctrl_c().await {
        Ok(()) => {
            warn!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
        Err(err) => {
            error!(error = %err, "signal listener error");
            let _ = shutdown_tx.send(true);
        }
    }
    ctx.shutdown.cancel();

    info!(grace = ?config.shutdown_grace, "waiting for in-flight jobs to finish");
    worker_handles.push(poller_handle);
    worker_handles.push(metrics_handle);
    let _ = tokio::time::timeout(config.shutdown_grace, async {
        for handle in worker_handles {
            let _ = handle.await;
        }
    })
    .await;

    // The reaper task exits its own loop the instant `shutdown_rx` flips, so
    // anything still RUNNING when the grace period above elapses needs one
    // more pass here, or it sits un-reclaimed until the next process's reaper
    // interval fires.
    match ctx.store.release_running_for_shutdown().await {
        Ok(n) if n > 0 => warn!(released = n, "released still-RUNNING jobs back to PENDING at shutdown"),
        Ok(_) => {}
        Err(e) => error!(error = %e, "final shutdown reap pass failed"),
    }

    info!("filing watch engine: offline");
    Ok(())
}
