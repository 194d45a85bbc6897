use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Connect to the statistics database and bring its schema up to date.
///
/// Failing here is fatal: the notifier refuses to start without its stat store.
pub async fn connect_stat_store(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(database_url)
        .await?;
    tracing::info!(max_connections, "Connected to PostgreSQL");

    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Statistics schema migrations applied");

    Ok(pool)
}
