use std::time::Duration;

use once_cell::sync::OnceCell;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub log_level: String,
    pub log_dir: String,
    pub log_max_files: String,
    pub cors_origins: Vec<String>,
    pub dedup_window_seconds: u64,
    pub dedup_sweep_seconds: u64,
    pub dedup_max_entries: usize,
    pub stream_start_delay_ms: u64,
    pub stream_token_delay_ms: u64,
    pub stream_channel_capacity: usize,
    pub stream_keepalive_seconds: u64,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub activity_catalog_path: Option<String>,
}

static CONFIG: OnceCell<Config> = OnceCell::new();

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    pub fn init_global() -> Result<&'static Config, String> {
        let cfg = Config::from_env()?;
        CONFIG
            .set(cfg)
            .map_err(|_| "Config already initialized".to_string())?;
        CONFIG
            .get()
            .ok_or_else(|| "Config not initialized".to_string())
    }

    pub fn from_env() -> Result<Config, String> {
        let cfg = Self::from_lookup(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Builds a config from any key lookup. Unparsable numbers fall back to
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Config
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str, def: &str| -> String {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| def.to_string())
        };
        let read_u64 = |key: &str, def: u64| -> u64 {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(def)
        };

        let cors_origins = match lookup("CORS_ORIGINS") {
            Some(v) => v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => vec!["*".to_string()],
        };

        Config {
            host: read("HOST", "0.0.0.0"),
            port: lookup("PORT")
                .and_then(|v| v.trim().parse::<u16>().ok())
                .unwrap_or(8080),
            environment: read("ENVIRONMENT", "development"),
            log_level: read("LOG_LEVEL", "info"),
            log_dir: read("LOG_DIR", "logs"),
            log_max_files: read("LOG_MAX_FILES", "7d"),
            cors_origins,
            dedup_window_seconds: read_u64("DEDUP_WINDOW_SECONDS", 10),
            dedup_sweep_seconds: read_u64("DEDUP_SWEEP_SECONDS", 10),
            dedup_max_entries: read_u64("DEDUP_MAX_ENTRIES", 10_000) as usize,
            stream_start_delay_ms: read_u64("STREAM_START_DELAY_MS", 200),
            stream_token_delay_ms: read_u64("STREAM_TOKEN_DELAY_MS", 50),
            stream_channel_capacity: read_u64("STREAM_CHANNEL_CAPACITY", 32) as usize,
            stream_keepalive_seconds: read_u64("STREAM_KEEPALIVE_SECONDS", 15),
            openai_api_key: lookup("OPENAI_API_KEY")
                .map(|v| v.trim().to_string())
                .unwrap_or_default(),
            openai_base_url: read("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            openai_model: read("OPENAI_MODEL", "gpt-4"),
            activity_catalog_path: lookup("ACTIVITY_CATALOG_PATH")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.dedup_window_seconds == 0 {
            return Err("DEDUP_WINDOW_SECONDS must be greater than 0".to_string());
        }
        if self.is_production() && self.openai_api_key.is_empty() {
            return Err("OPENAI_API_KEY is required in production".to_string());
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_seconds)
    }

    pub fn dedup_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.dedup_sweep_seconds.max(1))
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.stream_keepalive_seconds.max(1))
    }

    pub fn print(&self) {
        println!("Current configuration:");
        println!("  - ENVIRONMENT: {}", self.environment);
        println!("  - HOST: {}", self.host);
        println!("  - PORT: {}", self.port);
        println!("  - LOG_LEVEL: {}", self.log_level);
        println!("  - LOG_DIR: {}", self.log_dir);
        println!("  - CORS_ORIGINS: {}", self.cors_origins.join(","));
        println!("  - OPENAI_BASE_URL: {}", self.openai_base_url);
        println!("  - OPENAI_MODEL: {}", self.openai_model);
        println!(
            "  - OPENAI_API_KEY: {}",
            if self.openai_api_key.is_empty() { "not set" } else { "set" }
        );
        println!(
            "  - ACTIVITY_CATALOG_PATH: {}",
            self.activity_catalog_path.as_deref().unwrap_or("not set")
        );
        println!("  - Stream:");
        println!("    • DEDUP_WINDOW_SECONDS: {}", self.dedup_window_seconds);
        println!("    • DEDUP_SWEEP_SECONDS: {}", self.dedup_sweep_seconds);
        println!("    • DEDUP_MAX_ENTRIES: {}", self.dedup_max_entries);
        println!("    • STREAM_START_DELAY_MS: {}", self.stream_start_delay_ms);
        println!("    • STREAM_TOKEN_DELAY_MS: {}", self.stream_token_delay_ms);
        println!("    • STREAM_CHANNEL_CAPACITY: {}", self.stream_channel_capacity);
        println!("    • STREAM_KEEPALIVE_SECONDS: {}", self.stream_keepalive_seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.cors_origins, vec!["*".to_string()]);
        assert_eq!(cfg.dedup_window(), Duration::from_secs(10));
        assert_eq!(cfg.dedup_max_entries, 10_000);
        assert_eq!(cfg.stream_channel_capacity, 32);
        assert_eq!(cfg.openai_model, "gpt-4");
        assert!(cfg.activity_catalog_path.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parses_overrides_and_ignores_garbage_numbers() {
        let cfg = from_pairs(&[
            ("PORT", "9000"),
            ("CORS_ORIGINS", "http://a.test, http://b.test,"),
            ("DEDUP_WINDOW_SECONDS", "soon"),
            ("STREAM_TOKEN_DELAY_MS", "0"),
        ]);
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.cors_origins, vec!["http://a.test", "http://b.test"]);
        assert_eq!(cfg.dedup_window_seconds, 10);
        assert_eq!(cfg.stream_token_delay_ms, 0);
    }

    #[test]
    fn validate_rejects_zero_window_and_keyless_production() {
        assert!(from_pairs(&[("DEDUP_WINDOW_SECONDS", "0")]).validate().is_err());
        assert!(from_pairs(&[("ENVIRONMENT", "production")]).validate().is_err());
        assert!(from_pairs(&[("ENVIRONMENT", "production"), ("OPENAI_API_KEY", "sk-test")])
            .validate()
            .is_ok());
    }
}
