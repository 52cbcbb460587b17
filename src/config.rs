use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub docker: DockerConfig,
    pub filebrowser: FileBrowserConfig,
    pub install: InstallConfig,
    pub engine_retry: RetryConfig,
    pub security: SecurityConfig,
    pub catalog: CatalogConfig,
    pub monitor: MonitorConfig,
    pub logging: LoggingConfig,
    pub assets: AssetsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_size: usize,  // bytes
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DockerConfig {
    pub socket: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FileBrowserConfig {
    pub enabled: bool,
    pub container_name: String,
    pub image: String,
    pub port: u16,
    pub data_dir: String,
    pub config_dir: String,
    pub database_dir: String,
    pub admin_username: String,
    pub default_password: String,
    pub ready_timeout_secs: u64,
    pub start_retries: u32,
    pub start_retry_interval_secs: u64,
    pub request_timeout_secs: u64,
}

impl FileBrowserConfig {
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InstallConfig {
    pub max_concurrent: usize,
    pub animation_step_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    pub attempts: u32,
    pub delay_secs: u64,
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    pub password_min_length: usize,
    pub bcrypt_cost: u32,
    pub bootstrap_admin_username: String,
    pub bootstrap_admin_password: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    pub path: String,
    pub protected_app: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    pub cpu_sample_ms: u64,
    pub min_disk_bytes: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssetsConfig {
    pub dir: String,
    pub templates_dir: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.server.port == 0 {
            return Err(config::ConfigError::Message("server.port must be in 1..=65535".into()));
        }
        if self.filebrowser.port == 0 {
            return Err(config::ConfigError::Message("filebrowser.port must be in 1..=65535".into()));
        }
        if self.security.password_min_length < 8 {
            return Err(config::ConfigError::Message(format!(
                "security.password_min_length must be at least 8, got {}",
                self.security.password_min_length
            )));
        }
        if self.install.max_concurrent == 0 {
            return Err(config::ConfigError::Message("install.max_concurrent must be at least 1".into()));
        }
        if self.engine_retry.attempts == 0 {
            return Err(config::ConfigError::Message("engine_retry.attempts must be at least 1".into()));
        }
        if self.monitor.cpu_sample_ms == 0 {
            return Err(config::ConfigError::Message("monitor.cpu_sample_ms must be at least 1".into()));
        }
        Ok(())
    }
}
