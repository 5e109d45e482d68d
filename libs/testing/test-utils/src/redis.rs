//! Redis container for stream tests.

use redis::aio::MultiplexedConnection;
use redis::Client;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::redis::Redis;

/// Redis container that lives as long as this value.
pub struct TestRedis {
    #[allow(dead_code)]
    container: ContainerAsync<Redis>,
    connection: MultiplexedConnection,
    connection_string: String,
}

impl TestRedis {
    /// Start Redis 8 Alpine; streams and consumer groups are available from 5.0.
    pub async fn new() -> Self {
        let container = Redis::default()
            .with_tag("8-alpine")
            .start()
            .await
            .expect("Failed to start Redis container");

        let host_port = container
            .get_host_port_ipv4(6379)
            .await
            .expect("Failed to get Redis port");

        let connection_string = format!("redis://127.0.0.1:{}", host_port);

        let connection = Client::open(connection_string.clone())
            .expect("Failed to create Redis client")
            .get_multiplexed_async_connection()
            .await
            .expect("Failed to connect to Redis");

        tracing::info!(port = host_port, "Test Redis ready");

        Self {
            container,
            connection,
            connection_string,
        }
    }

    pub fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Number of entries in `stream`, 0 when it does not exist.
    pub async fn stream_len(&self, stream: &str) -> usize {
        let mut conn = self.connection();
        redis::cmd("XLEN")
            .arg(stream)
            .query_async(&mut conn)
            .await
            .expect("XLEN failed")
    }
}

impl Drop for TestRedis {
    fn drop(&mut self) {
        tracing::debug!("Cleaning up test Redis container");
    }
}
