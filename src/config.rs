use log::LevelFilter;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not a valid port: {value:?}")]
    Port { var: &'static str, value: String },
    #[error("{var} contains a non-numeric user id: {value:?}")]
    Admin { var: &'static str, value: String },
    #[error("{var} is not a log level: {value:?}")]
    Level { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub log_file: PathBuf,
    pub log_level: LevelFilter,
    pub port: u16,
    pub admins: Vec<u64>,
    pub webhook: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("QUESTBOT_DB").unwrap_or_else(|| "questbot.db".into());
        let log_file = lookup("QUESTBOT_LOG").unwrap_or_else(|| "questbot.log".into());

        let log_level = match lookup("QUESTBOT_LOG_LEVEL") {
            None => LevelFilter::Debug,
            Some(value) => LevelFilter::from_str(value.trim()).map_err(|_| ConfigError::Level {
                var: "QUESTBOT_LOG_LEVEL",
                value,
            })?,
        };

        let port = match lookup("QUESTBOT_PORT") {
            None => 8080,
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Port {
                var: "QUESTBOT_PORT",
                value,
            })?,
        };

        let mut admins = Vec::new();
        if let Some(list) = lookup("QUESTBOT_ADMINS") {
            for id in list.split(',').map(str::trim).filter(|id| !id.is_empty()) {
                let id = id.parse().map_err(|_| ConfigError::Admin {
                    var: "QUESTBOT_ADMINS",
                    value: id.to_string(),
                })?;
                admins.push(id);
            }
        }

        let webhook = matches!(
            lookup("QUESTBOT_WEBHOOK").as_deref().map(str::trim),
            Some("1" | "true" | "yes")
        );

        Ok(Config {
            db_path: db_path.into(),
            log_file: log_file.into(),
            log_level,
            port,
            admins,
            webhook,
        })
    }

    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admins.contains(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.db_path, PathBuf::from("questbot.db"));
        assert_eq!(config.log_file, PathBuf::from("questbot.log"));
        assert_eq!(config.log_level, LevelFilter::Debug);
        assert_eq!(config.port, 8080);
        assert!(config.admins.is_empty());
        assert!(!config.webhook);
    }

    #[test]
    fn admins_are_parsed() {
        let config = config(&[("QUESTBOT_ADMINS", "12, 34,,56")]).unwrap();
        assert_eq!(config.admins, vec![12, 34, 56]);
        assert!(config.is_admin(34));
        assert!(!config.is_admin(35));
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(matches!(
            config(&[("QUESTBOT_PORT", "http")]),
            Err(ConfigError::Port { .. })
        ));
        assert!(matches!(
            config(&[("QUESTBOT_ADMINS", "12,bob")]),
            Err(ConfigError::Admin { .. })
        ));
        assert!(matches!(
            config(&[("QUESTBOT_LOG_LEVEL", "loud")]),
            Err(ConfigError::Level { .. })
        ));
    }

    #[test]
    fn overrides() {
        let config = config(&[
            ("QUESTBOT_DB", "/tmp/q.db"),
            ("QUESTBOT_LOG_LEVEL", "trace"),
            ("QUESTBOT_PORT", "3000"),
            ("QUESTBOT_WEBHOOK", "true"),
        ])
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/q.db"));
        assert_eq!(config.log_level, LevelFilter::Trace);
        assert_eq!(config.port, 3000);
        assert!(config.webhook);
    }
}
