use std::sync::Arc;
use std::time::Duration;

use beacon_common::config::AppConfig;
use beacon_common::policy::TargetPolicy;
use beacon_common::queue::{RedisDeadLetterQueue, RedisDelayStore, RedisIntakeQueue};
use beacon_common::{db, redis_pool};
use beacon_notifier::credential::CachedTokenProvider;
use beacon_notifier::gateway::HttpGateway;
use beacon_notifier::resolver::HttpIdentityResolver;
use beacon_notifier::stat_store::PgStatStore;
use beacon_notifier::{Notifier, NotifierConfig, NotifierDeps};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon_notifier=info,beacon_common=info".into()),
        )
        .json()
        .init();

    tracing::info!("Beacon notifier starting...");

    let config = AppConfig::from_env()?;

    // Both stores must be reachable before any message is touched
    let pool = db::connect_stat_store(&config.database_url, config.db_max_connections).await?;
    let (redis_client, redis) = redis_pool::connect_redis(&config.redis_url).await?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    let credentials = Arc::new(CachedTokenProvider::new(
        http.clone(),
        &config.gateway_base_url,
        config.gateway_app_id.clone(),
        config.gateway_app_secret.clone(),
    ));
    let gateway = HttpGateway::new(http.clone(), &config.gateway_base_url, credentials.clone());
    let resolver = HttpIdentityResolver::new(http, config.resolver_url.clone());

    let deps = NotifierDeps {
        intake: Arc::new(RedisIntakeQueue::new(
            &config.intake_queue,
            redis_client,
            redis.clone(),
        )),
        delay: Arc::new(RedisDelayStore::new(&config.delay_queue, redis.clone())),
        dead_letter: Arc::new(RedisDeadLetterQueue::new(&config.dead_letter_queue, redis)),
        gateway: Arc::new(gateway),
        resolver: Arc::new(resolver),
        stat_store: Arc::new(PgStatStore::new(pool)),
        policy: TargetPolicy::from_config(&config),
    };

    tracing::info!(
        intake = %config.intake_queue,
        delay = %config.delay_queue,
        dead_letter = %config.dead_letter_queue,
        "Queues configured"
    );

    let mut notifier = Notifier::new(NotifierConfig::from_app(&config), deps);
    notifier.start();
    notifier.spawn_background(|cancel| credentials.run_refresher(cancel));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, stopping gracefully...");

    notifier.shutdown().await?;
    tracing::info!("Beacon notifier stopped.");
    Ok(())
}
