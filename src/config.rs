use std::env;

use dotenvy::dotenv;

pub struct Config {
    pub host: String,
    pub port: u16,
    pub redis_host: String,
    pub redis_port: u16,
    pub default_rate_limit: u64,
    pub max_batch_size: usize,
    pub max_concurrent_requests: usize,
    pub model_name: String,
    pub metrics_port: u16,
    pub gpu_poll_interval_secs: u64,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        Self {
            host: env::var("GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("GATEWAY_PORT", 8007),
            redis_host: env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_string()),
            redis_port: env_parse("REDIS_PORT", 6379),
            default_rate_limit: env_parse("DEFAULT_RATE_LIMIT", 100),
            max_batch_size: env_parse("MAX_BATCH_SIZE", 32),
            max_concurrent_requests: env_parse("MAX_CONCURRENT_REQUESTS", 16),
            model_name: env::var("MODEL_NAME")
                .unwrap_or_else(|_| "Qwen/Qwen-32B-Coder".to_string()),
            metrics_port: env_parse("METRICS_PORT", 8006),
            gpu_poll_interval_secs: env_parse("GPU_POLL_INTERVAL_SECS", 5),
        }
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}", self.redis_host, self.redis_port)
    }
}
