use actix_web::{dev::Service, web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feed_cache::{CacheBackend, CacheMetrics, RedisCacheBackend};
use feed_service::cache::BoundedListCache;
use feed_service::config::Config;
use feed_service::db::{self, FeedStore, PgFeedStore, PgPostStore, PgSocialGraph, PostStore};
use feed_service::handlers::{self, FeedHandlerState};
use feed_service::jobs::redis_health::{start_redis_health_check, RedisHealthConfig};
use feed_service::jobs::FanoutWorkerPool;
use feed_service::services::{
    FanoutEngine, NewsFeedService, PostCounterService, TimelineService,
};

/// How long shutdown waits for queued fanout jobs
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_file(true)
                .with_target(true),
        )
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    info!("Starting feed-service v{}", env!("CARGO_PKG_VERSION"));
    info!(
        env = %config.app.env,
        list_limit = config.feed.list_limit,
        page_size = config.feed.page_size,
        "Configuration loaded"
    );

    let pool = db::init_pool(&config.database)
        .await
        .context("Failed to create database pool")?;

    let redis = RedisCacheBackend::connect(&config.redis.url)
        .await
        .context("Failed to connect to Redis")?;
    CacheMetrics::register(prometheus::default_registry())
        .context("Failed to register cache metrics")?;
    let cache_backend: Arc<dyn CacheBackend> = Arc::new(redis);

    let feed_store: Arc<dyn FeedStore> = Arc::new(PgFeedStore::new(pool.clone()));
    let post_store: Arc<dyn PostStore> = Arc::new(PgPostStore::new(pool.clone()));
    let graph = Arc::new(PgSocialGraph::new(pool.clone()));

    let newsfeed_cache = BoundedListCache::new(
        cache_backend.clone(),
        config.feed.list_limit,
        config.feed.cache_ttl_secs,
    );
    let posts_cache = BoundedListCache::new(
        cache_backend.clone(),
        config.feed.list_limit,
        feed_cache::ttl::USER_POSTS,
    );

    let feeds = NewsFeedService::new(feed_store.clone(), newsfeed_cache, config.feed.page_size);
    let timeline = TimelineService::new(post_store.clone(), posts_cache, config.feed.page_size);
    let counters = PostCounterService::new(post_store, cache_backend.clone());
    let engine = FanoutEngine::new(
        feed_store,
        graph,
        feeds.clone(),
        config.fanout.batch_size,
    );

    let (queue, worker_pool) = FanoutWorkerPool::start(engine.clone(), config.fanout);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(start_redis_health_check(
        cache_backend,
        RedisHealthConfig::default(),
        shutdown_rx,
    ));

    let state = web::Data::new(FeedHandlerState {
        feeds,
        timeline,
        engine,
        counters,
        dispatcher: Arc::new(queue),
    });

    let bind_addr = format!("{}:{}", config.app.host, config.app.port);
    info!("HTTP server listening on {}", bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/health", web::get().to(|| async { "OK" }))
            .route(
                "/metrics",
                web::get().to(feed_service::metrics::serve_metrics),
            )
            .wrap_fn(|req, srv| {
                let method = req.method().to_string();
                let path = req
                    .match_pattern()
                    .unwrap_or_else(|| req.path().to_string());
                let start = Instant::now();

                let fut = srv.call(req);
                async move {
                    let res = fut.await;
                    let status = match &res {
                        Ok(res) => res.status().as_u16(),
                        Err(_) => 500,
                    };
                    feed_service::metrics::observe_http_request(
                        &method,
                        &path,
                        status,
                        start.elapsed(),
                    );
                    res
                }
            })
            .configure(handlers::configure)
    })
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind {}", bind_addr))?
    .run()
    .await
    .context("HTTP server error")?;

    info!("HTTP server stopped, draining fanout queue");
    if !worker_pool.wait_idle(DRAIN_TIMEOUT).await {
        tracing::warn!(
            pending = worker_pool.in_flight(),
            "Fanout queue not drained before shutdown"
        );
    }
    worker_pool.shutdown().await;
    let _ = shutdown_tx.send(true);

    Ok(())
}
