// src/config/mod.rs
// All values load from the environment (.env supported); defaults below are
// the deployed values.

use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    // ── Database
    pub database_url: String,
    pub sqlite_max_connections: u32,

    // ── Completion oracle
    pub oracle_base_url: String,
    pub oracle_api_key: String,
    pub oracle_model: String,
    pub oracle_timeout_secs: u64,

    // ── Context assembly
    pub context_token_budget: usize,
    pub context_memory_top_k: usize,
    pub context_history_window: usize,
    pub context_event_window: usize,

    // ── History compression
    pub compression_threshold: usize,
    pub compression_block_size: usize,
    pub compression_min_messages: usize,
    pub compression_sweep_secs: u64,

    // ── Caching
    pub character_cache_ttl_secs: u64,

    // ── Logging
    pub log_level: String,
}

fn env_var_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(val) => {
            // Values may carry inline comments and stray whitespace
            let clean = val.split('#').next().unwrap_or("").trim();
            match clean.parse::<T>() {
                Ok(parsed) => parsed,
                Err(_) => {
                    eprintln!("Config: {} = '{}' (parse failed, using default)", key, val);
                    default
                }
            }
        }
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        if dotenv::dotenv().is_err() {
            eprintln!("Warning: .env file not found. Using environment variables and defaults.");
        }

        Self {
            database_url: env_var_or("DATABASE_URL", "sqlite:./elara.db".to_string()),
            sqlite_max_connections: env_var_or("SQLITE_MAX_CONNECTIONS", 10),
            oracle_base_url: env_var_or(
                "ELARA_ORACLE_BASE_URL",
                "https://api.openai.com/v1".to_string(),
            ),
            oracle_api_key: env_var_or("ELARA_ORACLE_API_KEY", String::new()),
            oracle_model: env_var_or("ELARA_ORACLE_MODEL", "gpt-4.1".to_string()),
            oracle_timeout_secs: env_var_or("ELARA_ORACLE_TIMEOUT", 60),
            context_token_budget: env_var_or("ELARA_CONTEXT_TOKEN_BUDGET", 16384),
            context_memory_top_k: env_var_or("ELARA_CONTEXT_MEMORY_TOP_K", 50),
            context_history_window: env_var_or("ELARA_CONTEXT_HISTORY_WINDOW", 10),
            context_event_window: env_var_or("ELARA_CONTEXT_EVENT_WINDOW", 5),
            compression_threshold: env_var_or("ELARA_COMPRESSION_THRESHOLD", 60),
            compression_block_size: env_var_or("ELARA_COMPRESSION_BLOCK_SIZE", 40),
            compression_min_messages: env_var_or("ELARA_COMPRESSION_MIN_MESSAGES", 3),
            compression_sweep_secs: env_var_or("ELARA_COMPRESSION_SWEEP_SECS", 600),
            character_cache_ttl_secs: env_var_or("ELARA_CHARACTER_CACHE_TTL", 30),
            log_level: env_var_or("ELARA_LOG_LEVEL", "info".to_string()),
        }
    }

    pub fn oracle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.oracle_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_env();
        assert_eq!(config.compression_block_size, 40);
        assert_eq!(config.compression_min_messages, 3);
        assert_eq!(config.context_memory_top_k, 50);
        assert!(config.oracle_timeout().as_secs() >= 1);
    }
}
