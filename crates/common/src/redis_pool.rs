use redis::Client;
use redis::aio::ConnectionManager;

/// Open a Redis client and a shared auto-reconnecting connection.
///
/// The ping makes an unreachable Redis a startup failure instead of a silent
/// background reconnect loop.
pub async fn connect_redis(redis_url: &str) -> anyhow::Result<(Client, ConnectionManager)> {
    let client = Client::open(redis_url)?;
    let mut manager = ConnectionManager::new(client.clone()).await?;

    let _: String = redis::cmd("PING").query_async(&mut manager).await?;

    tracing::info!("Connected to Redis");
    Ok((client, manager))
}
