use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::network::AddressPlan;
use crate::protocol::Timeouts;

/// Placeholder in `spawn_command` replaced by the node name.
pub const NODE_PLACEHOLDER: &str = "{node}";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub drain_retries: u32,
    /// Interactive shell started on every node
    pub shell: Vec<String>,
    /// Command that runs the shell inside a node; the shell argv is appended
    pub spawn_command: Vec<String>,
    pub addressing: AddressPlan,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            read_timeout_ms: 1000,
            write_timeout_ms: 1000,
            drain_retries: 0,
            shell: vec!["vtysh".into()],
            spawn_command: vec![
                "docker".into(),
                "exec".into(),
                "-i".into(),
                NODE_PLACEHOLDER.into(),
            ],
            addressing: AddressPlan::default(),
        }
    }
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("cannot read settings {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&content)
            .with_context(|| format!("cannot parse settings {}", path.display()))?;
        Ok(settings)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            read: Duration::from_millis(self.read_timeout_ms),
            write: Duration::from_millis(self.write_timeout_ms),
            drain_retries: self.drain_retries,
        }
    }

    /// Full argv that opens the shell on `node`.
    pub fn spawn_argv(&self, node: &str) -> Vec<String> {
        self.spawn_command
            .iter()
            .map(|arg| arg.replace(NODE_PLACEHOLDER, node))
            .chain(self.shell.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::Ipv4Addr;

    #[test]
    fn test_missing_fields_use_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "read_timeout_ms": 250, "addressing": {{ "loopback_base": "10.0.0.0" }} }}"#
        )
        .unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.timeouts().read, Duration::from_millis(250));
        assert_eq!(settings.timeouts().write, Duration::from_secs(1));
        assert_eq!(settings.addressing.loopback_base, Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(settings.addressing.access_base, Ipv4Addr::new(172, 25, 0, 0));
    }

    #[test]
    fn test_spawn_argv() {
        let settings = Settings::default();
        assert_eq!(
            settings.spawn_argv("R2"),
            vec!["docker", "exec", "-i", "R2", "vtysh"]
        );
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let settings = Settings {
            drain_retries: 2,
            ..Settings::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap().drain_retries, 2);
    }

    #[test]
    fn test_unreadable_settings() {
        let err = Settings::load("/nonexistent/settings.json").unwrap_err();
        assert!(err.to_string().contains("cannot read settings"));
    }
}
