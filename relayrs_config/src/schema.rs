use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub agents: AgentsConfig,
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AgentsConfig {
    pub defaults: AgentDefaults,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AgentDefaults {
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub openai: ProviderConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Linear,
    Exponential,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DispatchConfig {
    #[serde(default = "DispatchConfig::default_capacity")]
    pub capacity: usize,
    #[serde(default = "DispatchConfig::default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "DispatchConfig::default_idle_wait_ms")]
    pub idle_wait_ms: u64,
    #[serde(default = "DispatchConfig::default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "DispatchConfig::default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub backoff: BackoffKind,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            capacity: Self::default_capacity(),
            queue_capacity: Self::default_queue_capacity(),
            idle_wait_ms: Self::default_idle_wait_ms(),
            max_retries: Self::default_max_retries(),
            retry_delay_ms: Self::default_retry_delay_ms(),
            backoff: BackoffKind::default(),
        }
    }
}

impl DispatchConfig {
    const fn default_capacity() -> usize {
        50
    }

    const fn default_queue_capacity() -> usize {
        1024
    }

    const fn default_idle_wait_ms() -> u64 {
        1000
    }

    const fn default_max_retries() -> usize {
        5
    }

    const fn default_retry_delay_ms() -> u64 {
        1000
    }

    #[must_use]
    pub const fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "SessionConfig::default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "SessionConfig::default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_limit: Self::default_history_limit(),
            inactivity_timeout_secs: Self::default_inactivity_timeout_secs(),
        }
    }
}

impl SessionConfig {
    const fn default_history_limit() -> usize {
        relayrs_core::HISTORY_LIMIT
    }

    const fn default_inactivity_timeout_secs() -> u64 {
        15 * 60
    }

    #[must_use]
    pub const fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Defaults to `~/relayrs/chatlogs`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    #[serde(default = "StorageConfig::default_segment_size")]
    pub segment_size: usize,
    #[serde(default = "StorageConfig::default_recent_segments")]
    pub recent_segments: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: None,
            segment_size: Self::default_segment_size(),
            recent_segments: Self::default_recent_segments(),
        }
    }
}

impl StorageConfig {
    const fn default_segment_size() -> usize {
        relayrs_core::SEGMENT_SIZE
    }

    const fn default_recent_segments() -> usize {
        4
    }

    pub fn root_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.root {
            Some(root) => Ok(root.clone()),
            None => Ok(Config::config_dir()?.join("chatlogs")),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndexConfig {
    #[default]
    InMemory,
    Pinecone {
        host: String,
        api_key: String,
    },
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MemoryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "MemoryConfig::default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub index: IndexConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_k: Self::default_top_k(),
            index: IndexConfig::default(),
        }
    }
}

impl MemoryConfig {
    const fn default_top_k() -> usize {
        relayrs_core::RETRIEVAL_TOP_K
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub allow_from: Vec<String>,
}

const CONFIG_TEMPLATE: &str = r#"{
  "agents": {
    "defaults": {
      "model": "gpt-3.5-turbo",
      "max_tokens": 1024,
      "temperature": 0.7,
      "frequency_penalty": 0.0,
      "presence_penalty": 0.0,
      "system_prompt": "You are a helpful assistant that remembers earlier conversations. Keep answers short."
    }
  },
  "providers": {
    "openai": {
      "api_key": "your-openai-api-key-here",
      "base_url": "https://api.openai.com/v1",
      "embedding_model": "text-embedding-ada-002"
    }
  },
  "dispatch": {
    "capacity": 50,
    "queue_capacity": 1024,
    "idle_wait_ms": 1000,
    "max_retries": 5,
    "retry_delay_ms": 1000,
    "backoff": "fixed"
  },
  "session": {
    "history_limit": 20,
    "inactivity_timeout_secs": 900
  },
  "storage": {
    "segment_size": 6,
    "recent_segments": 4
  },
  "memory": {
    "enabled": true,
    "top_k": 8,
    "index": {
      "kind": "in_memory"
    }
  },
  "telegram": {
    "enabled": false,
    "token": "your-telegram-bot-token-here",
    "allow_from": []
  }
}"#;

impl Config {
    /// `~/relayrs`
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        Ok(dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?
            .join("relayrs"))
    }

    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");

        if !config_path.exists() {
            anyhow::bail!(
                "Config file not found at: {}. Please run 'relayrs init' to create config.",
                config_path.display()
            );
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config = Self::from_json(&content)?;
        tracing::debug!("Loaded config from {}", config_path.display());

        Ok(config)
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn ensure_config_dir() -> anyhow::Result<PathBuf> {
        let config_dir = Self::config_dir()?;
        std::fs::create_dir_all(&config_dir)?;
        Ok(config_dir)
    }

    pub fn create_config() -> anyhow::Result<()> {
        let config_dir = Self::ensure_config_dir()?;
        let config_path = config_dir.join("config.json");

        if config_path.exists() {
            anyhow::bail!(
                "Config file already exists at: {}. Please edit it directly.",
                config_path.display()
            );
        }

        std::fs::write(&config_path, CONFIG_TEMPLATE)?;

        println!("✅ Created config file at: {}", config_path.display());
        println!();
        println!("📝 Next steps:");
        println!("   1. Edit the config file and add your OpenAI API key");
        println!("   2. Run 'relayrs chat' for a console session");
        println!("   3. Add a bot token and run 'relayrs telegram' to serve Telegram");
        println!();
        println!("🔧 Configuration options:");
        println!("   - dispatch.capacity: Upstream calls allowed in flight at once");
        println!("   - session.inactivity_timeout_secs: Idle time before a session closes");
        println!("   - memory.index: \"in_memory\" or \"pinecone\" with host and api_key");
        println!();
        Ok(())
    }
}
