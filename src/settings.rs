use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TemplateSettings {
    pub dir: String,
    pub debug: bool,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        TemplateSettings {
            dir: "templates".to_string(),
            debug: false,
        }
    }
}

/// A single named database connection.
#[derive(Clone, Debug, Deserialize)]
pub struct ConnectionSettings {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Name of the connection used when a model does not pick one.
    pub default: String,
    pub connections: HashMap<String, ConnectionSettings>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        let mut connections = HashMap::new();
        connections.insert(
            "sqlite".to_string(),
            ConnectionSettings {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
            },
        );
        DatabaseSettings {
            default: "sqlite".to_string(),
            connections,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub debug: bool,
    pub template: TemplateSettings,
    pub database: DatabaseSettings,
    pub other: HashMap<String, String>,
}

impl Settings {
    /// Parse settings from a JSON document. Missing sections take their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.database.connections.contains_key(&self.database.default) {
            return Err(Error::Config(format!(
                "default connection `{}` is not configured",
                self.database.default
            )));
        }
        for (name, connection) in &self.database.connections {
            if connection.url.is_empty() {
                return Err(Error::Config(format!("connection `{}` has an empty url", name)));
            }
        }
        Ok(())
    }
}
