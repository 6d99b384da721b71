//! Reconciler service.
//!
//! Listens for trigger messages from the external scheduler on redis
//! pubsub, runs the requested engine operation, and publishes per-layer
//! counts back. Retries, backoff and timeouts around a whole operation
//! are the scheduler's job; this service never aborts a pass on a single
//! bad record.

use anyhow::Result;
use chrono::Utc;
use dotenv::dotenv;
use futures_util::StreamExt;
use log::{error, info, warn};
use redis::AsyncCommands;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use fixturesync_core::cache::{keys, KeyValueCache, SharedCache};
use fixturesync_core::db::matches::PgMatchStore;
use fixturesync_core::db::pool::{create_pool, DbPoolConfig};
use fixturesync_core::db::teams::PgTeamStore;
use fixturesync_core::db::MatchStore;
use fixturesync_core::lifecycle::detection::FinishedMatchDetector;
use fixturesync_core::models::{CleanupOperation, CleanupReport, TriggerRequest};
use fixturesync_core::providers::{CachedStatsFeed, RawProviderMatch};
use fixturesync_core::redis::RedisCache;
use fixturesync_core::reconciler::ReconcileEngine;

mod config;

const RECONCILE_REQUESTS_CH: &str = "reconcile:requests";
const RECONCILE_RESULTS_CH: &str = "reconcile:results";
const INGEST_REQUESTS_CH: &str = "ingest:requests";

// Heartbeat constants
const HEARTBEAT_KEY_PREFIX: &str = "health:hb";
const HEARTBEAT_INTERVAL_SECS: u64 = 10;
const HEARTBEAT_TTL_SECS: u64 = 35;

/// An ingest trigger: the fetch harness has deposited a raw batch at
/// `feed:matches:{sport}` and asks for a reconciliation pass over it.
#[derive(Debug, Deserialize)]
struct IngestRequest {
    sport_id: i32,
}

struct Service {
    cache: SharedCache,
    matches: Arc<PgMatchStore>,
    teams: Arc<PgTeamStore>,
    redis: RedisCache,
    config: config::ServiceConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let cfg = config::ServiceConfig::from_env();
    info!("reconciler starting");

    let redis_cache = RedisCache::connect(&cfg.redis_url).await?;
    let cache: SharedCache = Arc::new(redis_cache.clone());

    let pool = create_pool(&cfg.database_url, DbPoolConfig::from_env()).await?;
    let matches = Arc::new(PgMatchStore::new(pool.clone()));
    let teams = Arc::new(PgTeamStore::new(pool));

    spawn_heartbeat(cache.clone());

    let service = Service {
        cache,
        matches,
        teams,
        redis: redis_cache,
        config: cfg,
    };

    run_trigger_loop(service).await
}

fn spawn_heartbeat(cache: SharedCache) {
    tokio::spawn(async move {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        let key = format!("{}:reconciler:{}", HEARTBEAT_KEY_PREFIX, host);
        loop {
            if let Err(e) = cache
                .put(&key, &Utc::now().to_rfc3339(), HEARTBEAT_TTL_SECS)
                .await
            {
                warn!("heartbeat write failed: {}", e);
            }
            tokio::time::sleep(Duration::from_secs(HEARTBEAT_INTERVAL_SECS)).await;
        }
    });
}

/// Subscribe and dispatch forever, reconnecting if the stream drops.
async fn run_trigger_loop(service: Service) -> Result<()> {
    let client = service.redis.get_client();

    loop {
        let pubsub_conn = match client.get_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("redis pubsub connect failed: {}", e);
                tokio::time::sleep(Duration::from_secs(2)).await;
                continue;
            }
        };
        let mut pubsub = pubsub_conn.into_pubsub();
        if let Err(e) = pubsub.subscribe(RECONCILE_REQUESTS_CH).await {
            error!("subscribe failed: {}", e);
            tokio::time::sleep(Duration::from_secs(2)).await;
            continue;
        }
        if let Err(e) = pubsub.subscribe(INGEST_REQUESTS_CH).await {
            error!("subscribe failed: {}", e);
            tokio::time::sleep(Duration::from_secs(2)).await;
            continue;
        }
        info!(
            "subscribed to {} and {}",
            RECONCILE_REQUESTS_CH, INGEST_REQUESTS_CH
        );

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let channel = msg.get_channel_name().to_string();
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    warn!("bad pubsub payload: {}", e);
                    continue;
                }
            };

            match channel.as_str() {
                RECONCILE_REQUESTS_CH => service.handle_trigger(&payload).await,
                INGEST_REQUESTS_CH => service.handle_ingest(&payload).await,
                _ => {}
            }
        }

        warn!("pubsub stream ended, reconnecting");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

impl Service {
    async fn handle_trigger(&self, payload: &str) {
        let request: TriggerRequest = match serde_json::from_str(payload) {
            Ok(req) => req,
            Err(e) => {
                warn!("unparseable trigger: {} ({})", payload, e);
                return;
            }
        };
        info!(
            "trigger: {:?} sport={:?} aggressive={}",
            request.operation, request.sport_id, request.aggressive
        );

        let feed = CachedStatsFeed::new(self.cache.as_ref());
        let detector = FinishedMatchDetector::new(
            self.matches.as_ref() as &dyn MatchStore,
            &feed,
            self.cache.as_ref(),
            config::detection_config(request.aggressive),
        );

        let mut report = CleanupReport::default();
        let outcome = match request.operation {
            CleanupOperation::AuthoritativeFilter => detector
                .run_authoritative_filter(request.sport_id)
                .await
                .map(|n| report.authoritative = n),
            CleanupOperation::FeedVerification => detector
                .run_feed_verification(request.sport_id)
                .await
                .map(|n| report.feed_verification = n),
            CleanupOperation::TimeBasedCleanup => detector
                .run_time_based_cleanup(request.sport_id)
                .await
                .map(|n| report.time_based = n),
            CleanupOperation::StalenessPurge => detector
                .run_staleness_purge(request.sport_id)
                .await
                .map(|n| report.staleness = n),
            CleanupOperation::Comprehensive => {
                report = detector.run_comprehensive(request.sport_id).await;
                Ok(())
            }
        };

        if let Err(e) = outcome {
            error!("operation {:?} failed: {}", request.operation, e);
            return;
        }

        self.publish_result(&json!({
            "operation": request.operation,
            "sport_id": request.sport_id,
            "aggressive": request.aggressive,
            "report": report,
            "total": report.total(),
            "timestamp": Utc::now().to_rfc3339(),
        }))
        .await;
    }

    async fn handle_ingest(&self, payload: &str) {
        let request: IngestRequest = match serde_json::from_str(payload) {
            Ok(req) => req,
            Err(e) => {
                warn!("unparseable ingest request: {} ({})", payload, e);
                return;
            }
        };

        let feed_key = keys::feed("matches", request.sport_id);
        let raw_blob = match self.cache.get(&feed_key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                warn!("no raw batch at {}", feed_key);
                return;
            }
            Err(e) => {
                error!("raw batch read failed: {}", e);
                return;
            }
        };
        let raw: Vec<RawProviderMatch> = match serde_json::from_str(&raw_blob) {
            Ok(raw) => raw,
            Err(e) => {
                error!("raw batch at {} is malformed: {}", feed_key, e);
                return;
            }
        };

        let engine = ReconcileEngine::new(
            self.matches.clone(),
            self.teams.clone(),
            self.cache.clone(),
            self.config.reconcile_config(),
        );
        let task = format!("ingest:{}", request.sport_id);
        match engine.reconcile_batch(&task, &raw, Utc::now()).await {
            Ok(outcome) => {
                self.publish_result(&json!({
                    "operation": "ingest",
                    "sport_id": request.sport_id,
                    "outcome": outcome,
                    "timestamp": Utc::now().to_rfc3339(),
                }))
                .await;
            }
            Err(e) => error!("ingest pass for sport {} failed: {}", request.sport_id, e),
        }
    }

    async fn publish_result(&self, message: &serde_json::Value) {
        let client = self.redis.get_client();
        match client.get_async_connection().await {
            Ok(mut conn) => {
                if let Err(e) = conn
                    .publish::<_, _, ()>(RECONCILE_RESULTS_CH, message.to_string())
                    .await
                {
                    warn!("result publish failed: {}", e);
                }
            }
            Err(e) => warn!("result publish connect failed: {}", e),
        }
    }
}
