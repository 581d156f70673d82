use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use crate::openai::{ClientOptions, ImageDetail};

const PROMPT_SEPARATOR: &str = "||";

/// The active provider configuration. Read-only to the chat core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatConfig {
    pub id: String,
    pub base_url: String,
    pub model_id: String,
    pub system_prompts: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub chat: ChatConfig,
    pub storage_path: String,
    pub image_detail: ImageDetail,
    pub client: ClientOptions,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let base_url = env::var("CHATKIT_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let model_id = env::var("CHATKIT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let id = env::var("CHATKIT_CONFIG_ID").unwrap_or_else(|_| "default".to_string());
        let system_prompts = parse_system_prompts(
            &env::var("CHATKIT_SYSTEM_PROMPTS")
                .unwrap_or_else(|_| "You are a helpful assistant.".to_string()),
        );
        let storage_path = env::var("CHATKIT_STORAGE_PATH").unwrap_or("./".to_string());
        let image_detail = env::var("CHATKIT_IMAGE_DETAIL")
            .unwrap_or_else(|_| "auto".to_string())
            .parse::<ImageDetail>()
            .map_err(|e| anyhow!(e))
            .context("Invalid CHATKIT_IMAGE_DETAIL")?;

        let defaults = ClientOptions::default();
        let client = ClientOptions {
            connect_timeout: secs_var("CHATKIT_CONNECT_TIMEOUT_SECS", defaults.connect_timeout)?,
            response_timeout: secs_var("CHATKIT_RESPONSE_TIMEOUT_SECS", defaults.response_timeout)?,
            idle_timeout: secs_var("CHATKIT_IDLE_TIMEOUT_SECS", defaults.idle_timeout)?,
        };

        Ok(Self {
            chat: ChatConfig {
                id,
                base_url,
                model_id,
                system_prompts,
            },
            storage_path,
            image_detail,
            client,
        })
    }

    pub fn images_path(&self) -> PathBuf {
        PathBuf::from(&self.storage_path).join("images")
    }
}

/// Splits `||` separated prompts, dropping blank ones.
pub fn parse_system_prompts(raw: &str) -> Vec<String> {
    raw.split(PROMPT_SEPARATOR)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

fn secs_var(name: &str, default: Duration) -> Result<Duration> {
    match env::var(name) {
        Ok(value) => {
            let secs = value
                .trim()
                .parse::<u64>()
                .with_context(|| format!("Invalid {}: {}", name, value))?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    const VARS: &[&str] = &[
        "CHATKIT_BASE_URL",
        "CHATKIT_MODEL",
        "CHATKIT_CONFIG_ID",
        "CHATKIT_SYSTEM_PROMPTS",
        "CHATKIT_STORAGE_PATH",
        "CHATKIT_IMAGE_DETAIL",
        "CHATKIT_CONNECT_TIMEOUT_SECS",
        "CHATKIT_RESPONSE_TIMEOUT_SECS",
        "CHATKIT_IDLE_TIMEOUT_SECS",
    ];

    fn clear_env() {
        for var in VARS {
            // SAFETY: tests touching the environment run serially
            unsafe { env::remove_var(var) };
        }
    }

    fn set(name: &str, value: &str) {
        // SAFETY: tests touching the environment run serially
        unsafe { env::set_var(name, value) };
    }

    #[test]
    fn test_parse_system_prompts() {
        assert_eq!(
            parse_system_prompts("Be brief. || || Be kind.  "),
            vec!["Be brief.", "Be kind."]
        );
        assert!(parse_system_prompts("   ").is_empty());
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = AppConfig::from_env().unwrap();

        assert_eq!(config.chat.base_url, "https://api.openai.com/v1");
        assert_eq!(config.chat.model_id, "gpt-4o-mini");
        assert_eq!(config.chat.id, "default");
        assert_eq!(config.chat.system_prompts, vec!["You are a helpful assistant."]);
        assert_eq!(config.image_detail, ImageDetail::Auto);
        assert_eq!(config.client.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.images_path(), PathBuf::from("./").join("images"));
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        set("CHATKIT_BASE_URL", "http://localhost:11434/v1");
        set("CHATKIT_MODEL", "llava");
        set("CHATKIT_SYSTEM_PROMPTS", "One||Two");
        set("CHATKIT_IMAGE_DETAIL", "low");
        set("CHATKIT_RESPONSE_TIMEOUT_SECS", "5");

        let config = AppConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.chat.base_url, "http://localhost:11434/v1");
        assert_eq!(config.chat.model_id, "llava");
        assert_eq!(config.chat.system_prompts, vec!["One", "Two"]);
        assert_eq!(config.image_detail, ImageDetail::Low);
        assert_eq!(config.client.response_timeout, Duration::from_secs(5));
    }

    #[test]
    #[serial]
    fn test_invalid_values_are_errors() {
        clear_env();
        set("CHATKIT_IDLE_TIMEOUT_SECS", "soon");
        assert!(AppConfig::from_env().is_err());

        clear_env();
        set("CHATKIT_IMAGE_DETAIL", "ultra");
        assert!(AppConfig::from_env().is_err());
        clear_env();
    }
}
