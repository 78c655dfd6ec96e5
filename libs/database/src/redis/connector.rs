use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{info, warn};

use crate::common::{retry_with_backoff, DatabaseError, DatabaseResult, RetryConfig};

/// Strip credentials from a connection URL before it reaches the logs.
fn redact(url: &str) -> String {
    match (url.split_once("://"), url.rsplit_once('@')) {
        (Some((scheme, _)), Some((_, host))) => format!("{}://***@{}", scheme, host),
        _ => url.to_string(),
    }
}

/// Connect to Redis and return a ConnectionManager
///
/// The ConnectionManager reconnects on its own after transient failures; the
/// initial PING makes an unreachable server fail here rather than on first use.
///
/// # Example
/// ```ignore
/// use database::redis::connect;
///
/// let manager = connect("redis://127.0.0.1:6379").await?;
/// ```
pub async fn connect(url: &str) -> DatabaseResult<ConnectionManager> {
    info!(url = %redact(url), "Connecting to Redis");

    let client = Client::open(url)?;
    let manager = ConnectionManager::new(client).await?;

    let mut conn = manager.clone();
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;

    info!("Successfully connected to Redis");
    Ok(manager)
}

/// Connect to Redis with automatic retry on failure
///
/// Uses exponential backoff with jitter. Exhausting the retries yields
/// [`DatabaseError::ConnectionFailed`].
///
/// # Example
/// ```ignore
/// use database::common::RetryConfig;
/// use database::redis::connect_with_retry;
///
/// let retry = RetryConfig::new().with_max_retries(5);
/// let manager = connect_with_retry("redis://127.0.0.1:6379", Some(retry)).await?;
/// ```
pub async fn connect_with_retry(
    url: &str,
    retry_config: Option<RetryConfig>,
) -> DatabaseResult<ConnectionManager> {
    let config = retry_config.unwrap_or_default();

    retry_with_backoff(|| connect(url), config)
        .await
        .map_err(|e| {
            warn!(url = %redact(url), error = %e, "Giving up on Redis connection");
            DatabaseError::ConnectionFailed(e.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_hides_credentials() {
        assert_eq!(
            redact("redis://:s3cret@cache:6379"),
            "redis://***@cache:6379"
        );
        assert_eq!(redact("redis://cache:6379"), "redis://cache:6379");
    }

    #[tokio::test]
    #[ignore] // Requires actual Redis
    async fn test_connect() {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let result = connect(&redis_url).await;
        assert!(result.is_ok());
    }
}
