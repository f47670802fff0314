use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,

    // Paths
    pub data_dir: PathBuf,

    // Reproducción
    pub advance_delay: Duration,
    pub idle_sweep_interval: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,

            // Paths
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),

            // Reproducción
            advance_delay: duration_var("ADVANCE_DELAY", defaults.advance_delay)?,
            idle_sweep_interval: duration_var("IDLE_SWEEP_INTERVAL", defaults.idle_sweep_interval)?,
        };

        std::fs::create_dir_all(&config.data_dir)?;

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// - The Discord token must not be blank
    /// - The idle sweep interval must be greater than zero
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN must not be empty");
        }

        if self.idle_sweep_interval.is_zero() {
            anyhow::bail!("Idle sweep interval must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The Discord token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Data: {}\n  \
            Playback: {} advance delay, idle sweep every {}",
            self.data_dir.display(),
            humantime::format_duration(self.advance_delay),
            humantime::format_duration(self.idle_sweep_interval),
        )
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

            // Path defaults
            data_dir: "/app/data".into(),

            // Playback defaults
            advance_delay: Duration::from_millis(500),
            idle_sweep_interval: Duration::from_secs(300),
        }
    }
}

fn duration_var(name: &str, default: Duration) -> Result<Duration> {
    match std::env::var(name) {
        Ok(val) if !val.trim().is_empty() => humantime::parse_duration(val.trim())
            .map_err(|e| anyhow::anyhow!("{} inválido ({}): {}", name, val, e)),
        _ => Ok(default),
    }
}
