use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [server]
//                    port = 5000
//
//   env var:         SPIKEGATE_SERVER__PORT=5000   (double underscore = nesting)
//
//   CLI flags override the figment result for host/port.

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub link: LinkFileConfig,
    /// Engine directory: name → host. Engines not listed here are addressed
    /// by their own name.
    #[serde(default)]
    pub engines: Vec<EngineEntry>,
}

/// Server tunables (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Static file root served at the router fallback.
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_dir: default_public_dir(),
        }
    }
}

/// Engine-facing link tunables (lives under `[link]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkFileConfig {
    /// TCP port every engine listens on.
    #[serde(default = "default_engine_port")]
    pub port: u16,
}

impl Default for LinkFileConfig {
    fn default() -> Self {
        Self {
            port: default_engine_port(),
        }
    }
}

/// One `[[engines]]` entry mapping an engine name to its host.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineEntry {
    pub name: String,
    pub host: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("public")
}

fn default_engine_port() -> u16 {
    8000
}

/// Default data directory (`~/.spikegate`), holding `config.toml`.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .expect("Could not find home directory")
        .join(".spikegate")
}

/// Build a figment that layers: struct defaults → config.toml → SPIKEGATE_*
/// env vars (double underscore nests into sections).
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("SPIKEGATE_").split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig, used throughout the server)
// =============================================================================

/// Resolved gateway configuration.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub public_dir: PathBuf,
    /// TCP port on the engine side of every link.
    pub engine_port: u16,
    engines: HashMap<String, String>,
}

impl GatewayConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            host: fc.server.host.clone(),
            port: fc.server.port,
            public_dir: fc.server.public_dir.clone(),
            engine_port: fc.link.port,
            engines: fc
                .engines
                .iter()
                .map(|e| (e.name.clone(), e.host.clone()))
                .collect(),
        }
    }

    /// Host for an engine: its directory entry, or the name itself.
    pub fn resolve_host(&self, engine: &str) -> String {
        self.engines
            .get(engine)
            .cloned()
            .unwrap_or_else(|| engine.to_string())
    }

    pub fn engine_count(&self) -> usize {
        self.engines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let fc = FileConfig::default();
        assert_eq!(fc.server.host, "127.0.0.1");
        assert_eq!(fc.server.port, 5000);
        assert_eq!(fc.server.public_dir, PathBuf::from("public"));
        assert_eq!(fc.link.port, 8000);
        assert!(fc.engines.is_empty());
    }

    #[test]
    fn load_config_defaults_without_file() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.server.port, 5000);
        assert_eq!(fc.link.port, 8000);
    }

    #[test]
    fn load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            r#"
[server]
host = "0.0.0.0"
port = 8080

[link]
port = 9001

[[engines]]
name = "cortex"
host = "10.0.0.5"

[[engines]]
name = "retina"
host = "retina.lab.internal"
"#,
        )
        .unwrap();

        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.server.host, "0.0.0.0");
        assert_eq!(fc.server.port, 8080);
        assert_eq!(fc.link.port, 9001);
        assert_eq!(fc.engines.len(), 2);

        let config = GatewayConfig::from_file(&fc);
        assert_eq!(config.engine_count(), 2);
        assert_eq!(config.resolve_host("cortex"), "10.0.0.5");
        assert_eq!(config.resolve_host("retina"), "retina.lab.internal");
    }

    #[test]
    fn unmapped_engine_resolves_to_its_own_name() {
        let config = GatewayConfig::from_file(&FileConfig::default());
        assert_eq!(config.resolve_host("cerebellum"), "cerebellum");
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("config.toml"), "[server]\nport = 6000\n").unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.server.port, 6000);
        assert_eq!(fc.server.host, "127.0.0.1");
        assert_eq!(fc.link.port, 8000);
    }
}
