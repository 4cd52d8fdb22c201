use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Lavalink
    pub lavalink_host: String,
    pub lavalink_port: u16,
    pub lavalink_password: String,
    pub lavalink_secure: bool,
    pub lavalink_reconnect_attempts: u32,
    pub search_prefix: String,

    // Audio
    pub default_volume: i32,
    pub max_queue_size: usize,

    // Cache
    pub artwork_cache_size: usize,

    // Paths
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        std::fs::create_dir_all(config.guilds_dir())
            .with_context(|| format!("No se pudo crear {}", config.guilds_dir().display()))?;

        Ok(config)
    }

    /// Construye la configuración a partir de una fuente de variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let config = Self {
            // Discord
            discord_token: var("DISCORD_TOKEN").context("DISCORD_TOKEN no está definido")?,
            guild_id: var("GUILD_ID").map(|id| parse("GUILD_ID", &id)).transpose()?,

            // Lavalink
            lavalink_host: var("LAVALINK_HOST").unwrap_or(defaults.lavalink_host),
            lavalink_port: parse_or(&var, "LAVALINK_PORT", defaults.lavalink_port)?,
            lavalink_password: var("LAVALINK_PASSWORD").unwrap_or(defaults.lavalink_password),
            lavalink_secure: parse_or(&var, "LAVALINK_SECURE", defaults.lavalink_secure)?,
            lavalink_reconnect_attempts: parse_or(
                &var,
                "LAVALINK_RECONNECT_ATTEMPTS",
                defaults.lavalink_reconnect_attempts,
            )?,
            search_prefix: var("SEARCH_PREFIX").unwrap_or(defaults.search_prefix),

            // Audio
            default_volume: parse_or(&var, "DEFAULT_VOLUME", defaults.default_volume)?,
            max_queue_size: parse_or(&var, "MAX_QUEUE_SIZE", defaults.max_queue_size)?,

            // Cache
            artwork_cache_size: parse_or(&var, "ARTWORK_CACHE_SIZE", defaults.artwork_cache_size)?,

            // Paths
            data_dir: var("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn guilds_dir(&self) -> PathBuf {
        self.data_dir.join("guilds")
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be between 0 and 1000 (Lavalink range)
    /// - The search prefix must end with `:`
    /// - Cache and queue sizes must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN must not be empty");
        }

        if !(0..=1000).contains(&self.default_volume) {
            anyhow::bail!("Default volume must be between 0 and 1000, got: {}", self.default_volume);
        }

        if self.lavalink_host.trim().is_empty() {
            anyhow::bail!("LAVALINK_HOST must not be empty");
        }

        if !self.search_prefix.ends_with(':') {
            anyhow::bail!("Search prefix must end with ':', got: {}", self.search_prefix);
        }

        if self.artwork_cache_size == 0 {
            anyhow::bail!("Artwork cache size must be greater than 0");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the Discord token and the Lavalink password.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: commands {}\n  \
            Lavalink: {}://{}:{} ({} reconnect attempts)\n  \
            Audio: {}% vol, {} max queue, search '{}'\n  \
            Cache: {} artworks\n  \
            Data: {}",
            self.guild_id
                .map_or("global".to_string(), |id| format!("guild {}", id)),
            if self.lavalink_secure { "https" } else { "http" },
            self.lavalink_host,
            self.lavalink_port,
            self.lavalink_reconnect_attempts,
            self.default_volume,
            self.max_queue_size,
            self.search_prefix,
            self.artwork_cache_size,
            self.data_dir.display()
        )
    }
}

fn parse<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("Valor inválido para {}: {}", key, raw))
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => parse(key, &raw),
        None => Ok(default),
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            guild_id: None,

            // Lavalink defaults
            lavalink_host: "localhost".to_string(),
            lavalink_port: 2333,
            lavalink_password: "youshallnotpass".to_string(),
            lavalink_secure: false,
            lavalink_reconnect_attempts: 5,
            search_prefix: "dzsearch:".to_string(),

            // Audio defaults
            default_volume: 100,
            max_queue_size: 1000,

            // Cache defaults
            artwork_cache_size: 500,

            // Path defaults
            data_dir: "/app/data".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn only_the_token_is_required() {
        let config = load(&[("DISCORD_TOKEN", "abc")]).unwrap();
        assert_eq!(config.lavalink_host, "localhost");
        assert_eq!(config.lavalink_port, 2333);
        assert_eq!(config.search_prefix, "dzsearch:");
        assert_eq!(config.default_volume, 100);
        assert_eq!(config.guild_id, None);
        assert_eq!(config.guilds_dir(), PathBuf::from("/app/data/guilds"));
    }

    #[test]
    fn missing_token_is_an_error() {
        assert!(load(&[]).is_err());
        assert!(load(&[("DISCORD_TOKEN", "   ")]).is_err());
    }

    #[test]
    fn values_are_parsed_from_the_environment() {
        let config = load(&[
            ("DISCORD_TOKEN", "abc"),
            ("GUILD_ID", "123"),
            ("LAVALINK_HOST", "lavalink"),
            ("LAVALINK_PORT", "443"),
            ("LAVALINK_SECURE", "true"),
            ("SEARCH_PREFIX", "ytsearch:"),
            ("DEFAULT_VOLUME", "80"),
            ("DATA_DIR", "/tmp/neo"),
        ])
        .unwrap();

        assert_eq!(config.guild_id, Some(123));
        assert_eq!(config.lavalink_host, "lavalink");
        assert_eq!(config.lavalink_port, 443);
        assert!(config.lavalink_secure);
        assert_eq!(config.search_prefix, "ytsearch:");
        assert_eq!(config.default_volume, 80);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/neo"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(load(&[("DISCORD_TOKEN", "abc"), ("LAVALINK_PORT", "http")]).is_err());
        assert!(load(&[("DISCORD_TOKEN", "abc"), ("DEFAULT_VOLUME", "5000")]).is_err());
        assert!(load(&[("DISCORD_TOKEN", "abc"), ("SEARCH_PREFIX", "dzsearch")]).is_err());
        assert!(load(&[("DISCORD_TOKEN", "abc"), ("MAX_QUEUE_SIZE", "0")]).is_err());
    }

    #[test]
    fn summary_hides_secrets() {
        let config = load(&[
            ("DISCORD_TOKEN", "super-secret-token"),
            ("LAVALINK_PASSWORD", "hunter2"),
        ])
        .unwrap();

        let summary = config.summary();
        assert!(!summary.contains("super-secret-token"));
        assert!(!summary.contains("hunter2"));
        assert!(summary.contains("localhost:2333"));
    }
}
