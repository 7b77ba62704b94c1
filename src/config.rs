//! Server configuration from the environment (and `.env`).

use log::warn;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";
const DEFAULT_MODEL_FILE: &str = "models/Llama-3.2-3B-Instruct-Q4_K_M.gguf";
const DEFAULT_CONTEXT_SIZE: usize = 32_768;
const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub model_file: PathBuf,
    pub context_size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,
    pub model: ModelSettings,
    pub cors_origins: Vec<String>,
}

impl ServerConfig {
    pub fn from_env() -> ServerConfig {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ServerConfig {
        let bind_address = match lookup("BIND_ADDRESS") {
            Some(value) => value.parse().unwrap_or_else(|_| {
                warn!("invalid BIND_ADDRESS {value:?}, using {DEFAULT_BIND_ADDRESS}");
                default_bind_address()
            }),
            None => default_bind_address(),
        };
        let context_size = match lookup("CONTEXT_SIZE") {
            Some(value) => match usize::from_str(&value) {
                Ok(size) if size > 0 => size,
                _ => {
                    warn!("invalid CONTEXT_SIZE {value:?}, using {DEFAULT_CONTEXT_SIZE}");
                    DEFAULT_CONTEXT_SIZE
                }
            },
            None => DEFAULT_CONTEXT_SIZE,
        };
        let model_file = lookup("MODEL_FILE_NAME").unwrap_or(DEFAULT_MODEL_FILE.to_owned());
        let cors_origins = lookup("CORS_ORIGINS")
            .unwrap_or(DEFAULT_CORS_ORIGINS.to_owned())
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_owned)
            .collect();

        ServerConfig {
            bind_address,
            model: ModelSettings {
                model_file: PathBuf::from(model_file),
                context_size,
            },
            cors_origins,
        }
    }
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);

        assert_eq!(config.bind_address, "0.0.0.0:3000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.model.model_file, PathBuf::from(DEFAULT_MODEL_FILE));
        assert_eq!(config.model.context_size, 32_768);
        assert_eq!(
            config.cors_origins,
            vec!["http://localhost:3000", "http://localhost:5173"]
        );
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("BIND_ADDRESS", "127.0.0.1:8080"),
            ("MODEL_FILE_NAME", "models/tiny.gguf"),
            ("CONTEXT_SIZE", "4096"),
            ("CORS_ORIGINS", "https://chat.example.com, "),
        ]);

        assert_eq!(config.bind_address, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.model.model_file, PathBuf::from("models/tiny.gguf"));
        assert_eq!(config.model.context_size, 4096);
        assert_eq!(config.cors_origins, vec!["https://chat.example.com"]);
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config = config_from(&[("BIND_ADDRESS", "nowhere"), ("CONTEXT_SIZE", "0")]);

        assert_eq!(config.bind_address, "0.0.0.0:3000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.model.context_size, 32_768);
    }
}
