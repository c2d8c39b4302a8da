use anyhow::{bail, Context, Result};
use secrecy::{ExposeSecret, SecretBox};
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageBackend,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub app: AppConfig,
    pub certificates: CertificateConfig,
    pub mail: MailConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackend {
    #[default]
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            _ => Err(format!("Unknown storage backend: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

pub struct SecurityConfig {
    pub encryption_key: SecretBox<String>,
    pub signature_secret: Option<SecretBox<String>>,
}

impl SecurityConfig {
    pub fn encryption_key(&self) -> &str {
        self.encryption_key.expose_secret()
    }

    pub fn signature_secret(&self) -> Option<&str> {
        self.signature_secret
            .as_ref()
            .map(|secret| secret.expose_secret().as_str())
    }
}

impl fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("encryption_key", &"<redacted>")
            .field("signature_secret", &self.signature_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub name: String,
    pub environment: Environment,
    pub client_url: String,
    pub server_url: String,
}

#[derive(Debug, Clone)]
pub struct CertificateConfig {
    pub output_dir: PathBuf,
    pub render_timeout: Duration,
    pub notify_timeout: Duration,
}

/// SMTP relay for certificate mail. Without a host and sender address the
/// notifier falls back to logging.
pub struct MailConfig {
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<SecretBox<String>>,
    pub from_address: Option<String>,
    pub from_name: String,
}

impl MailConfig {
    pub fn is_configured(&self) -> bool {
        self.smtp_host.is_some() && self.from_address.is_some()
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: 587,
            username: None,
            password: None,
            from_address: None,
            from_name: "Training Portal".to_string(),
        }
    }
}

impl fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("from_address", &self.from_address)
            .field("from_name", &self.from_name)
            .finish()
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|val| val.trim().to_string())
        .filter(|val| !val.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Failed to parse {}", key)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Server configuration
        let host = env::var("SERVER_HOST")
            .unwrap_or_else(|_| "0.0.0.0".to_string())
            .parse::<IpAddr>()
            .context("Failed to parse SERVER_HOST")?;

        let port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse::<u16>()
            .context("Failed to parse SERVER_PORT")?;

        // Storage configuration
        let storage: StorageBackend = parse_or("STORAGE_BACKEND", StorageBackend::Postgres)?;
        let db_url = env::var("DATABASE_URL").ok();
        if storage == StorageBackend::Postgres && db_url.is_none() {
            bail!("DATABASE_URL must be set when STORAGE_BACKEND is postgres");
        }
        let db_max_connections = parse_or("DATABASE_MAX_CONNECTIONS", 10)?;
        let db_min_connections = parse_or("DATABASE_MIN_CONNECTIONS", 1)?;

        // Secrets
        let encryption_key = env::var("ENCRYPTION_KEY").context("ENCRYPTION_KEY must be set")?;
        if encryption_key.trim().is_empty() {
            bail!("ENCRYPTION_KEY must not be empty");
        }
        let signature_secret = env::var("SIGNATURE_SECRET")
            .ok()
            .filter(|secret| !secret.is_empty())
            .map(|secret| SecretBox::new(Box::new(secret)));

        // App configuration
        let environment = env::var("APP_ENVIRONMENT")
            .ok()
            .and_then(|val| val.parse().ok())
            .unwrap_or_default();
        let app_name = env::var("APP_NAME").unwrap_or_else(|_| "Training Portal".to_string());
        let client_url = env::var("CLIENT_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
        let server_url =
            env::var("SERVER_URL").unwrap_or_else(|_| format!("http://localhost:{}", port));

        // Certificate output
        let output_dir = env::var("CERTIFICATES_DIR").unwrap_or_else(|_| "certificates".to_string());
        let render_timeout_secs: u64 = parse_or("RENDER_TIMEOUT_SECS", 30)?;
        let notify_timeout_secs: u64 = parse_or("NOTIFY_TIMEOUT_SECS", 10)?;

        // Mail
        let mail = MailConfig {
            smtp_host: non_empty_var("SMTP_HOST"),
            smtp_port: parse_or("SMTP_PORT", 587)?,
            username: non_empty_var("SMTP_USERNAME"),
            password: non_empty_var("SMTP_PASSWORD").map(|secret| SecretBox::new(Box::new(secret))),
            from_address: non_empty_var("MAIL_FROM"),
            from_name: non_empty_var("MAIL_FROM_NAME").unwrap_or_else(|| app_name.clone()),
        };

        Ok(Config {
            server: ServerConfig { host, port },
            storage,
            database: DatabaseConfig {
                url: db_url,
                max_connections: db_max_connections,
                min_connections: db_min_connections,
            },
            security: SecurityConfig {
                encryption_key: SecretBox::new(Box::new(encryption_key)),
                signature_secret,
            },
            app: AppConfig {
                name: app_name,
                environment,
                client_url: client_url.trim_end_matches('/').to_string(),
                server_url: server_url.trim_end_matches('/').to_string(),
            },
            certificates: CertificateConfig {
                output_dir: PathBuf::from(output_dir),
                render_timeout: Duration::from_secs(render_timeout_secs),
                notify_timeout: Duration::from_secs(notify_timeout_secs),
            },
            mail,
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.host, self.server.port)
    }

    pub fn is_production(&self) -> bool {
        self.app.environment == Environment::Production
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" => Ok(Environment::Production),
            "staging" => Ok(Environment::Staging),
            "development" => Ok(Environment::Development),
            _ => Err(format!("Unknown environment: {}", s)),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        };
        f.write_str(name)
    }
}

// Global config, initialized once at startup
use once_cell::sync::OnceCell;

static CONFIG: OnceCell<Config> = OnceCell::new();

pub fn init() -> Result<&'static Config> {
    CONFIG.get_or_try_init(Config::from_env)
}

pub fn get() -> &'static Config {
    CONFIG.get().expect("Config is not initialized")
}
