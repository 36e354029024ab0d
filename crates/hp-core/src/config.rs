use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/hostport/hostport.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    #[default]
    Ipv4,
    Ipv6,
}

/// Settings for host-port rule management.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostportConfig {
    pub protocol: IpFamily,
    /// Save-format file holding the persisted rule state.
    pub state_file: PathBuf,
    /// nat chain that dispatches to the per-mapping chains.
    pub hostports_chain: String,
    /// nat chain that marks hairpin traffic for masquerading.
    pub masquerade_chain: String,
    pub masquerade_mark: String,
    pub log_level: String,
}

impl Default for HostportConfig {
    fn default() -> Self {
        Self {
            protocol: IpFamily::Ipv4,
            state_file: PathBuf::from("/var/lib/hostport/rules.v4"),
            hostports_chain: "CRIO-HOSTPORTS".to_string(),
            masquerade_chain: "CRIO-MARK-MASQ".to_string(),
            masquerade_mark: "0x4000/0x4000".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl HostportConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).context("Failed to parse hostport config YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the config, falling back to defaults when the file is absent.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read hostport config from {:?}", path))?;
        Self::from_yaml(&content)
    }

    fn validate(&self) -> Result<()> {
        for (field, chain) in [
            ("hostports_chain", &self.hostports_chain),
            ("masquerade_chain", &self.masquerade_chain),
        ] {
            if chain.is_empty() || chain.contains(char::is_whitespace) {
                anyhow::bail!("{} must be a single non-empty word, got {:?}", field, chain);
            }
        }
        if self.hostports_chain == self.masquerade_chain {
            anyhow::bail!("hostports_chain and masquerade_chain must differ");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = HostportConfig::from_yaml("protocol: ipv6\nhostports_chain: HP\n")
            .expect("valid config");
        assert_eq!(config.protocol, IpFamily::Ipv6);
        assert_eq!(config.hostports_chain, "HP");
        assert_eq!(config.masquerade_chain, "CRIO-MARK-MASQ");
    }

    #[test]
    fn rejects_chain_names_with_spaces() {
        assert!(HostportConfig::from_yaml("hostports_chain: \"A B\"\n").is_err());
        assert!(HostportConfig::from_yaml("masquerade_chain: CRIO-HOSTPORTS\n").is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = HostportConfig::from_file(Path::new("/nonexistent/hostport.yaml"))
            .expect("defaults");
        assert_eq!(config, HostportConfig::default());
    }
}
