use secrecy::SecretString;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Defines the supported text-generation backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provider {
    Gemini,
    OpenAI,
}

impl Provider {
    fn default_model(self) -> &'static str {
        match self {
            Provider::Gemini => "gemini-2.5-flash",
            Provider::OpenAI => "gpt-4o",
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub provider: Provider,
    pub api_key: SecretString,
    pub chat_model: String,
    pub stream_responses: bool,
    pub generation_timeout: Duration,
    pub section_retries: u32,
    pub prompts_dir: PathBuf,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// This function will look for a `.env` file in the current directory
    /// and load the following variables:
    ///
    /// *   `BIND_ADDRESS`: The address and port to bind the server to. Defaults to "0.0.0.0:3000".
    /// *   `GENERATION_PROVIDER`: "gemini" or "openai". Defaults to "gemini".
    /// *   `GEMINI_API_KEY` / `OPENAI_API_KEY`: Secret key for the selected provider.
    /// *   `CHAT_MODEL`: (Optional) Model name. Defaults to "gemini-2.5-flash" or "gpt-4o".
    /// *   `STREAM_RESPONSES`: (Optional) Forward replies fragment by fragment. Defaults to false.
    /// *   `GENERATION_TIMEOUT_SECS`: (Optional) Per-call limit. Defaults to 60.
    /// *   `SECTION_RETRIES`: (Optional) Extra attempts for a failed section. Defaults to 0.
    /// *   `PROMPTS_DIR`: (Optional) Directory of `*.md` prompt overrides. Defaults to "prompts".
    /// *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let bind_address = parse_var("BIND_ADDRESS", var_or("BIND_ADDRESS", "0.0.0.0:3000"))?;

        let provider = match var_or("GENERATION_PROVIDER", "gemini")
            .to_lowercase()
            .as_str()
        {
            "gemini" => Provider::Gemini,
            "openai" => Provider::OpenAI,
            other => {
                return Err(ConfigError::InvalidValue(
                    "GENERATION_PROVIDER".to_string(),
                    format!("'{other}' is not one of 'gemini' or 'openai'"),
                ));
            }
        };

        // Validate that the required API key is present for the selected provider.
        let key_var = match provider {
            Provider::Gemini => "GEMINI_API_KEY",
            Provider::OpenAI => "OPENAI_API_KEY",
        };
        let api_key = lookup(key_var)
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| {
                ConfigError::MissingVar(format!("{key_var} must be set for the selected provider"))
            })?;

        let chat_model = var_or("CHAT_MODEL", provider.default_model());

        let stream_responses = parse_flag("STREAM_RESPONSES", var_or("STREAM_RESPONSES", "false"))?;

        let timeout_secs: u64 = parse_var(
            "GENERATION_TIMEOUT_SECS",
            var_or("GENERATION_TIMEOUT_SECS", "60"),
        )?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "GENERATION_TIMEOUT_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let section_retries = parse_var("SECTION_RETRIES", var_or("SECTION_RETRIES", "0"))?;

        let prompts_dir = PathBuf::from(var_or("PROMPTS_DIR", "prompts"));

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            provider,
            api_key,
            chat_model,
            stream_responses,
            generation_timeout: Duration::from_secs(timeout_secs),
            section_retries,
            prompts_dir,
            log_level,
        })
    }
}

fn parse_var<T>(key: &str, raw: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
}

fn parse_flag(key: &str, raw: String) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("'{other}' is not a boolean"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_gemini_with_sensible_values() {
        let config = load(&[("GEMINI_API_KEY", "g-key")]).unwrap();

        assert_eq!(config.provider, Provider::Gemini);
        assert_eq!(config.api_key.expose_secret(), "g-key");
        assert_eq!(config.chat_model, "gemini-2.5-flash");
        assert_eq!(config.bind_address, "0.0.0.0:3000".parse().unwrap());
        assert!(!config.stream_responses);
        assert_eq!(config.generation_timeout, Duration::from_secs(60));
        assert_eq!(config.section_retries, 0);
        assert_eq!(config.prompts_dir, PathBuf::from("prompts"));
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    fn openai_provider_uses_its_own_key_and_model() {
        let config = load(&[
            ("GENERATION_PROVIDER", "OpenAI"),
            ("OPENAI_API_KEY", "sk-test"),
            ("STREAM_RESPONSES", "yes"),
            ("SECTION_RETRIES", "2"),
        ])
        .unwrap();

        assert_eq!(config.provider, Provider::OpenAI);
        assert_eq!(config.api_key.expose_secret(), "sk-test");
        assert_eq!(config.chat_model, "gpt-4o");
        assert!(config.stream_responses);
        assert_eq!(config.section_retries, 2);
    }

    #[test]
    fn missing_key_for_selected_provider_is_an_error() {
        let err = load(&[("OPENAI_API_KEY", "sk-test")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(msg) if msg.contains("GEMINI_API_KEY")));
    }

    #[test]
    fn rejects_invalid_values() {
        let bad = [
            ("BIND_ADDRESS", "not-an-address"),
            ("GENERATION_PROVIDER", "claude"),
            ("STREAM_RESPONSES", "maybe"),
            ("GENERATION_TIMEOUT_SECS", "0"),
            ("SECTION_RETRIES", "-1"),
            ("RUST_LOG", "LOUD"),
        ];
        for (key, value) in bad {
            let result = load(&[("GEMINI_API_KEY", "g-key"), (key, value)]);
            assert!(
                matches!(result, Err(ConfigError::InvalidValue(ref k, _)) if k == key),
                "{key}={value} should be rejected"
            );
        }
    }
}
