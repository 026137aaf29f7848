//! Configuration for the shell.

use std::path::{Path, PathBuf};
use std::time::Duration;

use kdsh_core::ConnectionOptions;
use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Socket settings.
    pub network: NetworkConfig,
    /// Login handshake settings.
    pub login: LoginConfig,
    /// Download settings.
    pub transfer: TransferConfig,
    /// Prompt strings.
    pub terminal: TerminalConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// How long to wait for the TCP connection, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Socket read buffer capacity in bytes.
    pub read_buffer_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    /// How long to wait for the server's verdict, in milliseconds.
    /// `0` waits forever.
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Directory received files are written into.
    pub download_dir: PathBuf,
    /// Largest file the server may announce, in bytes.
    pub max_download_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Shown when no statement is pending.
    pub prompt: String,
    /// Shown while a statement spans several lines.
    pub continuation_prompt: String,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        let options = ConnectionOptions::default();
        Self {
            connect_timeout_ms: options.connect_timeout.as_millis() as u64,
            read_buffer_size: options.read_buffer_size,
        }
    }
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        let options = ConnectionOptions::default();
        Self {
            download_dir: options.download_dir,
            max_download_size: options.max_download_size,
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            prompt: "kdsh> ".into(),
            continuation_prompt: "... ".into(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ShellConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::debug!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Convert into the options a connection is opened with.
    pub fn to_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            connect_timeout: Duration::from_millis(self.network.connect_timeout_ms.max(1)),
            login_timeout: match self.login.timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            read_buffer_size: self.network.read_buffer_size.max(1024),
            download_dir: self.transfer.download_dir.clone(),
            max_download_size: self.transfer.max_download_size,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&ShellConfig::default()).unwrap();
        assert!(text.contains("connect_timeout_ms"));
        assert!(text.contains("download_dir"));
        assert!(text.contains("kdsh> "));
    }

    #[test]
    fn roundtrip_config() {
        let text = toml::to_string_pretty(&ShellConfig::default()).unwrap();
        let parsed: ShellConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.terminal.prompt, "kdsh> ");
        assert_eq!(parsed.terminal.continuation_prompt, "... ");
        assert_eq!(parsed.login.timeout_ms, 30_000);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let parsed: ShellConfig = toml::from_str("[transfer]\ndownload_dir = \"inbox\"\n").unwrap();
        assert_eq!(parsed.transfer.download_dir, PathBuf::from("inbox"));
        assert_eq!(
            parsed.transfer.max_download_size,
            ConnectionOptions::default().max_download_size
        );
        assert_eq!(parsed.logging.level, "warn");
    }

    #[test]
    fn load_missing_or_invalid_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let missing = ShellConfig::load(&dir.path().join("absent.toml"));
        assert_eq!(missing.terminal.prompt, "kdsh> ");

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "network = 5").unwrap();
        assert_eq!(ShellConfig::load(&bad).network.read_buffer_size, 64 * 1024);
    }

    #[test]
    fn to_options_maps_zero_login_timeout_to_none() {
        let mut cfg = ShellConfig::default();
        cfg.login.timeout_ms = 0;
        cfg.network.read_buffer_size = 1;
        let opts = cfg.to_options();
        assert_eq!(opts.login_timeout, None);
        assert_eq!(opts.read_buffer_size, 1024);
    }
}
