//! Runtime configuration (spec.md §6 "Configuration keys").

use serde::Deserialize;

fn default_port() -> u16 {
    7231
}

fn default_user_agent() -> String {
    "HyperSwitch".to_string()
}

fn default_error_uri() -> String {
    "https://mediawiki.org/wiki/HyperSwitch/errors/".to_string()
}

fn default_max_depth() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub host: Option<String>,
    pub spec: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub ui_name: Option<String>,
    #[serde(default)]
    pub ui_url: Option<String>,
    #[serde(default)]
    pub ui_title: Option<String>,
    #[serde(default = "default_error_uri")]
    pub default_error_uri: String,
    #[serde(default = "default_max_depth", rename = "maxDepth")]
    pub max_depth: u32,
    #[serde(default)]
    pub skip_resources: bool,
    #[serde(default)]
    pub disable_handlers: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: default_port(),
            host: None,
            spec: None,
            user_agent: default_user_agent(),
            ui_name: None,
            ui_url: None,
            ui_title: None,
            default_error_uri: default_error_uri(),
            max_depth: default_max_depth(),
            skip_resources: false,
            disable_handlers: false,
        }
    }
}

impl Config {
    pub fn from_yaml_str(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 7231);
        assert_eq!(cfg.max_depth, 10);
        assert_eq!(cfg.user_agent, "HyperSwitch");
    }

    #[test]
    fn parses_partial_yaml_with_defaults() {
        let cfg = Config::from_yaml_str("port: 9000\nspec: doc/openapi.yaml\n").unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.spec.as_deref(), Some("doc/openapi.yaml"));
        assert_eq!(cfg.max_depth, 10);
    }
}
