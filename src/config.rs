use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub keeper: KeeperConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Deserialize, Clone)]
pub struct RegistryConfig {
    /// TOML file with the registry's node records. No file means demo mode.
    pub nodes_file: Option<String>,
    /// Write credential. No credential means read-only mode.
    pub writer_key: Option<String>,
    /// Environment variable that overrides `writer_key` when set
    #[serde(default = "default_writer_key_env")]
    pub writer_key_env: String,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Max write journal entries before rotation
    #[serde(default = "default_journal_max")]
    pub journal_max_entries: usize,
}

// writer_key must never end up in logs
impl std::fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("nodes_file", &self.nodes_file)
            .field("writer_key", &self.writer_key.as_ref().map(|_| "<redacted>"))
            .field("writer_key_env", &self.writer_key_env)
            .field("read_timeout_ms", &self.read_timeout_ms)
            .field("write_timeout_ms", &self.write_timeout_ms)
            .field("journal_max_entries", &self.journal_max_entries)
            .finish()
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            nodes_file: None,
            writer_key: None,
            writer_key_env: default_writer_key_env(),
            read_timeout_ms: default_read_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            journal_max_entries: default_journal_max(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct KeeperConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_critical_interval")]
    pub critical_interval_secs: u64,
    #[serde(default = "default_batch_interval")]
    pub batch_interval_secs: u64,
    #[serde(default)]
    pub signal_retry: SignalRetryConfig,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            critical_interval_secs: default_critical_interval(),
            batch_interval_secs: default_batch_interval(),
            signal_retry: SignalRetryConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SignalRetryConfig {
    /// Total attempts per reassignment signal (1 = no retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for SignalRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScoringConfig {
    /// Max points from job success rate
    #[serde(default = "default_weight_success")]
    pub weight_success: f64,
    /// Max points from heartbeat recency
    #[serde(default = "default_weight_uptime")]
    pub weight_uptime: f64,
    /// Max points from stake
    #[serde(default = "default_weight_stake")]
    pub weight_stake: i64,
    /// Minimum stake in native-token units
    #[serde(default = "default_min_stake")]
    pub min_stake: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weight_success: default_weight_success(),
            weight_uptime: default_weight_uptime(),
            weight_stake: default_weight_stake(),
            min_stake: default_min_stake(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_web_address")]
    pub address: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
    /// Push period of the live score socket
    #[serde(default = "default_live_interval")]
    pub live_interval_secs: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_web_address(),
            port: default_web_port(),
            live_interval_secs: default_live_interval(),
        }
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_writer_key_env() -> String { "KEEPER_PRIVATE_KEY".to_string() }
fn default_read_timeout_ms() -> u64 { 5000 }
fn default_write_timeout_ms() -> u64 { 15000 }
fn default_journal_max() -> usize { 1000 }
fn default_critical_interval() -> u64 { 300 }
fn default_batch_interval() -> u64 { 1800 }
fn default_max_attempts() -> u32 { 1 }
fn default_backoff_ms() -> u64 { 500 }
fn default_weight_success() -> f64 { 70.0 }
fn default_weight_uptime() -> f64 { 25.0 }
fn default_weight_stake() -> i64 { 5 }
fn default_min_stake() -> f64 { 0.05 }
fn default_web_address() -> String { "0.0.0.0".to_string() }
fn default_web_port() -> u16 { 8000 }
fn default_live_interval() -> u64 { 30 }

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path, e))?;
        let mut config = Self::parse(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config '{}': {}", path, e))?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Pull the writer credential from the environment when present
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(&self.registry.writer_key_env) {
            if !key.trim().is_empty() {
                self.registry.writer_key = Some(key);
            }
        }
        if matches!(self.registry.writer_key.as_deref(), Some(k) if k.trim().is_empty()) {
            self.registry.writer_key = None;
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.keeper.critical_interval_secs == 0 || self.keeper.batch_interval_secs == 0 {
            anyhow::bail!("keeper intervals must be greater than zero");
        }
        if self.keeper.signal_retry.max_attempts == 0 {
            anyhow::bail!("keeper.signal_retry.max_attempts must be at least 1");
        }
        if self.scoring.min_stake < 0.0 || self.scoring.weight_stake < 0 {
            anyhow::bail!("scoring stake parameters must be non-negative");
        }
        if self.web.live_interval_secs == 0 {
            anyhow::bail!("web.live_interval_secs must be greater than zero");
        }
        Ok(())
    }
}
