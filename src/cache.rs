use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use crate::config::Config;

#[derive(Clone)]
pub struct Cache {
    conn: ConnectionManager,
    prefix: String,
}

impl Cache {
    pub async fn new(config: &Config) -> Self {
        let url = config.redis_url();
        let client = Client::open(url).expect("Invalid Redis URL");
        let conn = ConnectionManager::new(client)
            .await
            .expect("Failed to connect to Redis");
        Self {
            conn,
            prefix: config.redis.key_prefix.clone(),
        }
    }

    fn key(&self, k: &str) -> String {
        format!("{}{}", self.prefix, k)
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(self.key(key))
            .query_async::<_, Option<String>>(&mut conn)
            .await
            .ok()
            .flatten()
    }

    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .await
            .and_then(|s| serde_json::from_str(&s).ok())
    }

    pub async fn set(&self, key: &str, value: &str, ttl_secs: u64) {
        let mut conn = self.conn.clone();
        let k = self.key(key);
        let _: Result<(), _> = if ttl_secs > 0 {
            conn.set_ex(&k, value, ttl_secs).await
        } else {
            conn.set(&k, value).await
        };
    }

    pub async fn set_json<T: serde::Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        if let Ok(json) = serde_json::to_string(value) {
            self.set(key, &json, ttl_secs).await;
        }
    }

    pub async fn incr(&self, key: &str) -> i64 {
        let mut conn = self.conn.clone();
        let k = self.key(key);
        conn.incr(&k, 1i64).await.unwrap_or(0)
    }

    pub async fn health_check(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }
}
