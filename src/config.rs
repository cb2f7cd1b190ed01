//! Server catalog loaded from a TOML file.
//!
//! The catalog maps names to launchable server specs:
//!
//! ```toml
//! [servers.typescript]
//! command = "typescript-language-server"
//! args = ["--stdio"]
//!
//! [servers.legacy]
//! module = "/opt/servers/language-server.js"
//! runtime = "node"
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tether_session::ServerSpec;

/// Named server specs, as read from disk.
#[derive(Debug, Default, Deserialize)]
pub struct ServerCatalog {
    #[serde(default)]
    pub servers: HashMap<String, ServerSpec>,
}

impl ServerCatalog {
    /// Look up a spec by name.
    pub fn get(&self, name: &str) -> Option<&ServerSpec> {
        self.servers.get(name)
    }
}

/// Parse catalog text.
pub fn parse_catalog(text: &str) -> Result<ServerCatalog, toml::de::Error> {
    toml::from_str(text)
}

/// Load a catalog from disk.
pub fn load_catalog(path: &Path) -> anyhow::Result<ServerCatalog> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read server catalog {}", path.display()))?;
    let catalog = parse_catalog(&text)
        .with_context(|| format!("parse server catalog {}", path.display()))?;
    Ok(catalog)
}
