use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub frontend_url: String,
    pub db: DbConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub rate_limit: RateLimitConfig,
    pub stripe: StripeConfig,
}

#[derive(Clone, Debug)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub pool_min: u32,
    pub pool_max: u32,
}

#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: u8,
    pub key_prefix: String,
}

#[derive(Clone, Debug)]
pub struct JwtConfig {
    pub secret: String,
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: u32,
    pub checkout_max: u32,
}

#[derive(Clone, Debug)]
pub struct StripeConfig {
    pub secret_key: String,
    pub publishable_key: String,
    pub webhook_secret: String,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_or_parse("PORT", 3000),
            cors_origins: env_or("CORS_ORIGINS", "http://localhost:3000")
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            frontend_url: env_or("FRONTEND_URL", "http://localhost:3000"),
            db: DbConfig {
                host: env_or("DB_HOST", "localhost"),
                port: env_or_parse("DB_PORT", 5432),
                database: env_or("DB_NAME", "seedspoon"),
                user: env_or("DB_USER", "seedspoon"),
                password: env_or("DB_PASSWORD", ""),
                pool_min: env_or_parse("DB_POOL_MIN", 2),
                pool_max: env_or_parse("DB_POOL_MAX", 20),
            },
            redis: RedisConfig {
                host: env_or("REDIS_HOST", "localhost"),
                port: env_or_parse("REDIS_PORT", 6379),
                password: env::var("REDIS_PASSWORD").ok().filter(|s| !s.is_empty()),
                db: env_or_parse("REDIS_DB", 0),
                key_prefix: "seedspoon:".to_string(),
            },
            jwt: JwtConfig {
                secret: env_or("JWT_SECRET", "change-me-to-a-secure-random-string"),
            },
            rate_limit: RateLimitConfig {
                window_secs: 60,
                max_requests: env_or_parse("RATE_LIMIT_MAX", 100),
                checkout_max: env_or_parse("RATE_LIMIT_CHECKOUT", 10),
            },
            stripe: StripeConfig {
                secret_key: env_or("STRIPE_SECRET_KEY", ""),
                publishable_key: env_or("STRIPE_PUBLISHABLE_KEY", ""),
                webhook_secret: env_or("STRIPE_WEBHOOK_SECRET", ""),
            },
        }
    }

    pub fn database_url(&self) -> String {
        if let Ok(url) = env::var("DATABASE_URL") {
            return url;
        }
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.db.user, self.db.password, self.db.host, self.db.port, self.db.database
        )
    }

    pub fn redis_url(&self) -> String {
        if let Ok(url) = env::var("REDIS_URL") {
            return url;
        }
        match &self.redis.password {
            Some(pw) if !pw.is_empty() => format!(
                "redis://:{}@{}:{}/{}",
                pw, self.redis.host, self.redis.port, self.redis.db
            ),
            _ => format!(
                "redis://{}:{}/{}",
                self.redis.host, self.redis.port, self.redis.db
            ),
        }
    }
}
