use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::prompts::DEFAULT_SYSTEM_INSTRUCTION;

pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Gemini,
    Mock,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderCfg {
    pub kind: ProviderKind,
    pub model: Option<String>,
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub system_instruction: Option<String>,
}

impl ProviderCfg {
    pub fn model(&self) -> &str { self.model.as_deref().unwrap_or(DEFAULT_MODEL) }
    pub fn base_url(&self) -> &str { self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL) }
    pub fn system_instruction(&self) -> &str {
        self.system_instruction.as_deref().unwrap_or(DEFAULT_SYSTEM_INSTRUCTION)
    }

    /// Looks up the API key: the configured variable first, then GEMINI_API_KEY, then API_KEY.
    pub fn resolve_api_key(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        self.api_key_env
            .iter()
            .map(String::as_str)
            .chain(["GEMINI_API_KEY", "API_KEY"])
            .find_map(|name| lookup(name).filter(|v| !v.is_empty()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerCfg {
    pub bind: String,
    /// Sessions idle for longer than this are dropped.
    pub session_ttl_secs: u64,
}

impl Default for ServerCfg {
    fn default() -> Self {
        Self { bind: DEFAULT_BIND.to_string(), session_ttl_secs: DEFAULT_SESSION_TTL_SECS }
    }
}

impl ServerCfg {
    pub fn session_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.session_ttl_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppCfg {
    pub provider: ProviderCfg,
    pub server: ServerCfg,
}

impl AppCfg {
    pub fn from_yaml(txt: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(txt).context("Failed to parse config YAML")
    }

    pub async fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = match path {
            Some(p) => {
                let txt = tokio::fs::read_to_string(p)
                    .await
                    .with_context(|| format!("Failed to read config file: {}", p.display()))?;
                Self::from_yaml(&txt)?
            }
            None => Self::default(),
        };
        cfg.apply_env(|k| std::env::var(k).ok())?;
        Ok(cfg)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(v) = lookup("ADCOPY_PROVIDER") {
            self.provider.kind = match v.to_ascii_lowercase().as_str() {
                "gemini" => ProviderKind::Gemini,
                "mock" => ProviderKind::Mock,
                other => anyhow::bail!("ADCOPY_PROVIDER must be gemini or mock, got {other}"),
            };
        }
        if let Some(v) = lookup("GEMINI_MODEL") { self.provider.model = Some(v); }
        if let Some(v) = lookup("GEMINI_BASE_URL") { self.provider.base_url = Some(v); }
        if let Some(v) = lookup("ADCOPY_BIND") { self.server.bind = v; }
        if let Some(v) = lookup("ADCOPY_SESSION_TTL_SECS") {
            self.server.session_ttl_secs =
                v.parse().with_context(|| format!("ADCOPY_SESSION_TTL_SECS must be a number of seconds, got {v}"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn empty_yaml_gives_defaults() {
        let cfg = AppCfg::from_yaml("{}").unwrap();
        assert_eq!(cfg.provider.kind, ProviderKind::Gemini);
        assert_eq!(cfg.provider.model(), DEFAULT_MODEL);
        assert_eq!(cfg.provider.base_url(), DEFAULT_BASE_URL);
        assert_eq!(cfg.provider.system_instruction(), DEFAULT_SYSTEM_INSTRUCTION);
        assert_eq!(cfg.server.bind, DEFAULT_BIND);
        assert_eq!(cfg.server.session_ttl_secs, DEFAULT_SESSION_TTL_SECS);
    }

    #[test]
    fn yaml_fields_are_read() {
        let cfg = AppCfg::from_yaml(
            "provider:\n  kind: mock\n  model: gemini-2.5-pro\n  api_key_env: MY_KEY\nserver:\n  bind: 0.0.0.0:9000\n",
        )
        .unwrap();
        assert_eq!(cfg.provider.kind, ProviderKind::Mock);
        assert_eq!(cfg.provider.model(), "gemini-2.5-pro");
        assert_eq!(cfg.provider.api_key_env.as_deref(), Some("MY_KEY"));
        assert_eq!(cfg.server.bind, "0.0.0.0:9000");
    }

    #[test]
    fn env_overrides_file() {
        let mut cfg = AppCfg::from_yaml("server:\n  bind: 0.0.0.0:9000\n").unwrap();
        cfg.apply_env(env(&[("ADCOPY_BIND", "127.0.0.1:1"), ("ADCOPY_PROVIDER", "MOCK"), ("GEMINI_MODEL", "m")]))
            .unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:1");
        assert_eq!(cfg.provider.kind, ProviderKind::Mock);
        assert_eq!(cfg.provider.model(), "m");
    }

    #[test]
    fn session_ttl_from_yaml_and_env() {
        let mut cfg = AppCfg::from_yaml("server:\n  session_ttl_secs: 60\n").unwrap();
        assert_eq!(cfg.server.session_ttl(), std::time::Duration::from_secs(60));
        assert_eq!(cfg.server.bind, DEFAULT_BIND);

        cfg.apply_env(env(&[("ADCOPY_SESSION_TTL_SECS", "5")])).unwrap();
        assert_eq!(cfg.server.session_ttl_secs, 5);
        assert!(cfg.apply_env(env(&[("ADCOPY_SESSION_TTL_SECS", "soon")])).is_err());
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let mut cfg = AppCfg::default();
        assert!(cfg.apply_env(env(&[("ADCOPY_PROVIDER", "openai")])).is_err());
    }

    #[test]
    fn api_key_lookup_order() {
        let mut p = ProviderCfg::default();
        assert_eq!(p.resolve_api_key(env(&[])), None);
        assert_eq!(p.resolve_api_key(env(&[("API_KEY", "a")])).as_deref(), Some("a"));
        assert_eq!(
            p.resolve_api_key(env(&[("API_KEY", "a"), ("GEMINI_API_KEY", "g")])).as_deref(),
            Some("g")
        );
        p.api_key_env = Some("MY_KEY".into());
        assert_eq!(
            p.resolve_api_key(env(&[("MY_KEY", "m"), ("GEMINI_API_KEY", "g")])).as_deref(),
            Some("m")
        );
        assert_eq!(p.resolve_api_key(env(&[("MY_KEY", ""), ("API_KEY", "a")])).as_deref(), Some("a"));
    }
}
