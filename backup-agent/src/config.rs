//! Configuration management for the backup agent.
//!
//! Loads configuration from a TOML file. Every section is optional and falls
//! back to the defaults below.

use crate::utils::errors::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hostbackup/config.toml";

/// Wire protocol version announced to remote authorities.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backup: BackupConfig,
    pub server: ServerConfig,
    pub selection: SelectionConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Backup name, usually the host name
    pub name: String,

    /// Schedule label (daily, weekly, ...)
    pub schedule: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Remote authority host; absent means the authority runs locally
    pub host: Option<String>,

    /// SSH login, or the local user to switch to when no host is set
    pub user: Option<String>,

    /// SSH port
    pub port: Option<u16>,

    /// Agent binary name on the remote host
    pub program: String,

    /// Local authority binary; required when `host` is unset
    pub local_program: Option<PathBuf>,

    /// Protocol version passed as `-protocol`; 0 omits the flag
    pub protocol: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Include rules: absolute paths, globs, filesystem types, `./marker` files
    pub include: Vec<String>,

    /// Exclude rules, same syntax as `include`
    pub exclude: Vec<String>,

    /// Mount table to evaluate
    pub mount_table: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

fn default_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            schedule: "daily".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: None,
            user: None,
            port: None,
            program: "hostbackup".to_string(),
            local_program: None,
            protocol: PROTOCOL_VERSION,
        }
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            include: ["ext2", "ext3", "ext4", "xfs", "btrfs", "zfs", "jfs", "vfat"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exclude: [
                "proc", "sysfs", "tmpfs", "devtmpfs", "devpts", "cgroup", "cgroup2", "./.nobackup",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            mount_table: PathBuf::from("/etc/mtab"),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else the default location when it exists, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.backup.name.is_empty() {
            return Err(AgentError::Config("backup name must not be empty".into()));
        }
        if self.server.host.as_deref() == Some("") {
            return Err(AgentError::Config("server host must not be empty".into()));
        }
        if self.server.program.is_empty() {
            return Err(AgentError::Config("server program must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.backup.schedule, "daily");
        assert_eq!(config.server.protocol, PROTOCOL_VERSION);
        assert_eq!(config.selection.mount_table, PathBuf::from("/etc/mtab"));
        assert!(config.server.host.is_none());
    }

    #[test]
    fn test_full_file() {
        let config = Config::from_toml(
            r#"
            [backup]
            name = "web01"
            schedule = "weekly"

            [server]
            host = "vault.example.net"
            user = "backup"
            port = 2222
            protocol = 0

            [selection]
            include = ["/", "/srv/keep"]
            exclude = ["*.tmp", "./.nobackup"]
            "#,
        )
        .unwrap();

        assert_eq!(config.backup.name, "web01");
        assert_eq!(config.server.host.as_deref(), Some("vault.example.net"));
        assert_eq!(config.server.port, Some(2222));
        assert_eq!(config.server.protocol, 0);
        assert_eq!(config.server.program, "hostbackup");
        assert_eq!(config.selection.include, vec!["/", "/srv/keep"]);
    }

    #[test]
    fn test_rejects_empty_host() {
        let err = Config::from_toml("[server]\nhost = \"\"\n").unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_rejects_unknown_type() {
        assert!(Config::from_toml("[server]\nport = \"ssh\"\n").is_err());
    }
}
