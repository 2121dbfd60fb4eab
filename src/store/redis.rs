use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::cmd;

// Redis-backed results store. Every worker shares one multiplexed
// connection; failures are logged and swallowed so that a results outage
// never aborts mail processing.
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisStore {
    pub async fn open(url: &str, namespace: &str) -> crate::config::Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|err| format!("Invalid results store URL {url:?}: {err}"))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|err| format!("Failed to connect to results store at {url:?}: {err}"))?;
        Ok(RedisStore {
            conn,
            prefix: format!("{namespace}:"),
        })
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    pub async fn increment(&self, name: &str) {
        let mut conn = self.conn.clone();
        let result: Result<i64, _> = cmd("INCR").arg(self.key(name)).query_async(&mut conn).await;
        if let Err(err) = result {
            tracing::warn!(
                context = "results",
                event = "error",
                key = name,
                reason = %err,
            );
        }
    }

    pub async fn get_int(&self, name: &str) -> i64 {
        let mut conn = self.conn.clone();
        let result: Result<Option<i64>, _> =
            cmd("GET").arg(self.key(name)).query_async(&mut conn).await;
        match result {
            Ok(value) => value.unwrap_or(0),
            Err(err) => {
                tracing::warn!(
                    context = "results",
                    event = "error",
                    key = name,
                    reason = %err,
                );
                0
            }
        }
    }

    pub async fn set_text(&self, name: &str, value: &str, ttl: Option<Duration>) {
        let mut conn = self.conn.clone();
        let mut command = cmd("SET");
        command.arg(self.key(name)).arg(value);
        if let Some(ttl) = ttl {
            command.arg("EX").arg(ttl.as_secs());
        }
        let result: Result<(), _> = command.query_async(&mut conn).await;
        if let Err(err) = result {
            tracing::warn!(
                context = "results",
                event = "error",
                key = name,
                reason = %err,
            );
        }
    }

    pub async fn get_text(&self, name: &str) -> Option<String> {
        let mut conn = self.conn.clone();
        let result: Result<Option<String>, _> =
            cmd("GET").arg(self.key(name)).query_async(&mut conn).await;
        match result {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(
                    context = "results",
                    event = "error",
                    key = name,
                    reason = %err,
                );
                None
            }
        }
    }

    pub async fn scan_prefix(&self, prefix: &str) -> Vec<String> {
        let mut conn = self.conn.clone();
        let result: Result<Vec<String>, _> = cmd("KEYS")
            .arg(format!("{}{}*", self.prefix, prefix))
            .query_async(&mut conn)
            .await;
        match result {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|key| {
                    key.strip_prefix(&self.prefix)
                        .map(|stripped| stripped.to_string())
                })
                .collect(),
            Err(err) => {
                tracing::warn!(
                    context = "results",
                    event = "error",
                    key = prefix,
                    reason = %err,
                );
                Vec::new()
            }
        }
    }

    pub async fn delete(&self, name: &str) {
        let mut conn = self.conn.clone();
        let result: Result<i64, _> = cmd("DEL").arg(self.key(name)).query_async(&mut conn).await;
        if let Err(err) = result {
            tracing::warn!(
                context = "results",
                event = "error",
                key = name,
                reason = %err,
            );
        }
    }
}
