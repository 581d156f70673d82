//! Where API keys come from. The chat core only asks for a key by
//! configuration id and treats a missing key as an authentication
//! failure.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

pub trait CredentialStore: Send + Sync {
    fn api_key(&self, config_id: &str) -> Option<String>;
}

pub type SharedCredentialStore = Arc<dyn CredentialStore>;

/// Looks up `CHATKIT_API_KEY_<CONFIG_ID>` first, then falls back to
/// `OPENAI_API_KEY`.
#[derive(Debug, Default, Clone)]
pub struct EnvCredentialStore;

impl EnvCredentialStore {
    pub fn var_name(config_id: &str) -> String {
        let suffix: String = config_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("CHATKIT_API_KEY_{}", suffix)
    }
}

impl CredentialStore for EnvCredentialStore {
    fn api_key(&self, config_id: &str) -> Option<String> {
        non_blank_var(&Self::var_name(config_id)).or_else(|| non_blank_var("OPENAI_API_KEY"))
    }
}

fn non_blank_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|key| !key.trim().is_empty())
}

#[derive(Debug, Default, Clone)]
pub struct StaticCredentialStore {
    keys: HashMap<String, String>,
}

impl StaticCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, config_id: &str, api_key: &str) -> Self {
        self.keys.insert(config_id.to_string(), api_key.to_string());
        self
    }
}

impl CredentialStore for StaticCredentialStore {
    fn api_key(&self, config_id: &str) -> Option<String> {
        self.keys.get(config_id).cloned()
    }
}
