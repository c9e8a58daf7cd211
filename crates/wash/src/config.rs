use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Wash's configuration, read from `~/.puppetlabs/wash/wash.yaml`.
/// `WASH_SOCKET` overrides the socket path.
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Config {
    /// Path of the daemon's UNIX socket.
    pub socket: Option<PathBuf>,
    /// External plugins to load at server start.
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PluginConfig {
    pub name: String,
    /// Path to the plugin script.
    pub script: PathBuf,
    /// Opaque configuration handed to the plugin's `init`.
    #[serde(default)]
    pub config: serde_json::Value,
}

impl Config {
    pub fn load() -> anyhow::Result<Config> {
        let Some(path) = Self::config_file() else {
            return Ok(Config::default());
        };
        match std::fs::read_to_string(&path) {
            Ok(raw) => serde_yaml::from_str(&raw)
                .with_context(|| format!("failed to parse {}", path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    fn config_file() -> Option<PathBuf> {
        Some(
            dirs::home_dir()?
                .join(".puppetlabs")
                .join("wash")
                .join("wash.yaml"),
        )
    }

    /// The socket path, resolved in priority order: the WASH_SOCKET
    /// environment variable, the config file, then a default under the
    /// user cache directory.
    pub fn socket_path(&self) -> PathBuf {
        if let Some(socket) = std::env::var_os("WASH_SOCKET") {
            return PathBuf::from(socket);
        }
        if let Some(socket) = &self.socket {
            return socket.clone();
        }
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("wash")
            .join("wash-api.sock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_config_file() {
        let config: Config = serde_yaml::from_str(
            r#"
socket: /tmp/wash.sock
plugins:
  - name: backups
    script: /opt/wash/backups.rb
    config:
      region: us-west-2
"#,
        )
        .unwrap();
        assert_eq!(config.socket, Some(PathBuf::from("/tmp/wash.sock")));
        assert_eq!(config.plugins.len(), 1);
        assert_eq!(config.plugins[0].name, "backups");
        assert_eq!(config.plugins[0].config["region"], "us-west-2");
    }

    #[test]
    fn the_environment_overrides_the_socket() {
        let config = Config {
            socket: Some(PathBuf::from("/from/config.sock")),
            plugins: Vec::new(),
        };
        std::env::set_var("WASH_SOCKET", "/from/env.sock");
        assert_eq!(config.socket_path(), PathBuf::from("/from/env.sock"));
        std::env::remove_var("WASH_SOCKET");
        assert_eq!(config.socket_path(), PathBuf::from("/from/config.sock"));
    }
}
