//! MCP Server Configuration Types
//!
//! The server registry: a TOML file describing every known server plus
//! optional tool policies. The supervisor only ever reads it, through the
//! [`ServerRegistry`] trait.
//!
//! # Example TOML Configuration
//!
//! ```toml
//! # Local MCP server (stdio transport)
//! [[servers]]
//! id = "files"
//! name = "Filesystem"
//! command = "npx"
//! args = ["-y", "@modelcontextprotocol/server-filesystem", "/home/me/notes"]
//! connect_timeout_secs = 20
//!
//! # Remote MCP server (HTTP transport)
//! [[servers]]
//! id = "tickets"
//! url = "https://mcp.example.com/tickets"
//! transport = "http"
//! auto_start = false
//!
//! [servers.auth]
//! auth_type = "bearer"
//! token = "$TICKETS_TOKEN"
//!
//! # Extra tool classification
//! [[policies]]
//! tool = "close_ticket"
//! kind = "write"
//! running_label = "Closing ticket"
//! success_label = "Ticket closed"
//! failure_label = "Could not close ticket"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use conduit_core::{ToolKind, ToolPolicy, TransportDescriptor};

use super::transport::TransportType;

/// Environment variable overriding the registry location.
pub const CONFIG_ENV: &str = "CONDUIT_CONFIG";

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 60;

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse the TOML configuration.
    #[error("Failed to parse TOML configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize the configuration to TOML.
    #[error("Failed to serialize configuration to TOML: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Environment variable not found during token resolution.
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    /// No server with this identifier is configured.
    #[error("No server configured with id '{0}'")]
    NotFound(String),

    #[error("Invalid configuration for '{id}': {reason}")]
    Invalid { id: String, reason: String },
}

/// Authentication configuration for MCP servers.
///
/// Tokens can reference environment variables using the `$VAR_NAME` syntax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpAuthConfig {
    /// "bearer", "basic" or "api_key"
    pub auth_type: String,

    /// The token or credentials, possibly a `$VAR_NAME` reference.
    pub token: String,

    /// Custom header name. Defaults depend on `auth_type`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
}

impl McpAuthConfig {
    pub fn new(auth_type: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            auth_type: auth_type.into(),
            token: token.into(),
            header: None,
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self::new("bearer", token)
    }

    pub fn api_key(key: impl Into<String>) -> Self {
        Self::new("api_key", key)
    }

    /// Resolves the token value, expanding environment variable references.
    ///
    /// A token that is entirely `$NAME` must resolve; inline references such
    /// as `"Bearer $TOKEN"` are substituted when set and left as-is otherwise.
    pub fn resolve_token(&self) -> Result<String, ConfigError> {
        let token = &self.token;

        if let Some(var_name) = token.strip_prefix('$') {
            env::var(var_name).map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))
        } else {
            let mut result = token.clone();
            for (key, value) in env::vars() {
                let placeholder = format!("${}", key);
                result = result.replace(&placeholder, &value);
            }
            Ok(result)
        }
    }

    pub fn header_name(&self) -> &str {
        self.header.as_deref().unwrap_or(match self.auth_type.as_str() {
            "api_key" => "X-API-Key",
            _ => "Authorization",
        })
    }

    /// Header value formatted for the authentication type.
    pub fn header_value(&self) -> Result<String, ConfigError> {
        let token = self.resolve_token()?;

        match self.auth_type.as_str() {
            "bearer" => Ok(format!("Bearer {}", token)),
            "basic" => Ok(format!("Basic {}", token)),
            _ => Ok(token),
        }
    }
}

/// Configuration for a single MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Unique identifier, used as the key everywhere.
    pub id: String,

    /// Display name. Defaults to the id.
    #[serde(default)]
    pub name: String,

    /// Executable for stdio servers, resolved through PATH.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,

    /// Endpoint for HTTP servers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default)]
    pub transport: TransportType,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<McpAuthConfig>,

    /// Connect this server when the application starts.
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_timeout_secs: Option<u64>,
}

fn default_auto_start() -> bool {
    true
}

impl McpServerConfig {
    /// Creates a local (stdio) server configuration.
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        let id = id.into();
        let name = id.clone();
        Self {
            id,
            name,
            command: command.into(),
            url: None,
            transport: TransportType::Stdio,
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            auth: None,
            auto_start: true,
            connect_timeout_secs: None,
            call_timeout_secs: None,
        }
    }

    /// Creates a remote (HTTP) server configuration.
    pub fn remote(id: impl Into<String>, url: impl Into<String>) -> Self {
        let mut config = Self::new(id, String::new());
        config.url = Some(url.into());
        config.transport = TransportType::Http;
        config
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_auth(mut self, auth: McpAuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = Some(secs);
        self
    }

    pub fn with_call_timeout(mut self, secs: u64) -> Self {
        self.call_timeout_secs = Some(secs);
        self
    }

    pub fn is_remote(&self) -> bool {
        self.url.is_some()
    }

    pub fn is_local(&self) -> bool {
        !self.command.is_empty() && self.url.is_none()
    }

    /// The declared transport, except that a server with only a `url` is
    /// treated as HTTP.
    pub fn effective_transport(&self) -> TransportType {
        if self.transport == TransportType::Stdio && self.command.is_empty() && self.url.is_some() {
            TransportType::Http
        } else {
            self.transport
        }
    }

    /// Name to show to people.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS))
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.unwrap_or(DEFAULT_CALL_TIMEOUT_SECS))
    }

    /// Credential-free description of how the server is reached.
    pub fn descriptor(&self) -> TransportDescriptor {
        match &self.url {
            Some(url) => TransportDescriptor::http(url.clone()),
            None => TransportDescriptor::stdio(self.command.clone(), self.args.clone()),
        }
    }

    /// Checks the fields the chosen transport needs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::Invalid {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id is empty"));
        }
        match self.effective_transport() {
            TransportType::Stdio if self.command.is_empty() => {
                Err(invalid("stdio transport needs a 'command'"))
            }
            TransportType::Http if self.url.is_none() => Err(invalid("http transport needs a 'url'")),
            _ => Ok(()),
        }
    }
}

/// One `[[policies]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub tool: String,
    pub kind: ToolKind,
    pub running_label: String,
    pub success_label: String,
    pub failure_label: String,
}

impl PolicyConfig {
    pub fn to_policy(&self) -> ToolPolicy {
        ToolPolicy::new(
            self.kind,
            self.running_label.clone(),
            self.success_label.clone(),
            self.failure_label.clone(),
        )
    }
}

/// Root configuration loaded from a TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct McpServersConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<McpServerConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<PolicyConfig>,
}

impl McpServersConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Like [`load`](Self::load), but a missing file is an empty registry.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content)?;
        for server in &mut config.servers {
            if server.name.is_empty() {
                server.name = server.id.clone();
            }
        }
        Ok(config)
    }

    /// Saves the configuration, creating parent directories if needed.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn add_server(&mut self, config: McpServerConfig) -> &mut Self {
        self.servers.push(config);
        self
    }

    pub fn find_server(&self, id: &str) -> Option<&McpServerConfig> {
        self.servers.iter().find(|s| s.id == id)
    }

    /// Removes a server configuration by ID, returning it if found.
    pub fn remove_server(&mut self, id: &str) -> Option<McpServerConfig> {
        let pos = self.servers.iter().position(|s| s.id == id)?;
        Some(self.servers.remove(pos))
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn auto_start_servers(&self) -> impl Iterator<Item = &McpServerConfig> {
        self.servers.iter().filter(|s| s.auto_start)
    }

    /// Policies declared in the file, keyed by tool name.
    pub fn policy_overrides(&self) -> HashMap<String, ToolPolicy> {
        self.policies
            .iter()
            .map(|p| (p.tool.clone(), p.to_policy()))
            .collect()
    }
}

/// Registry location: `$CONDUIT_CONFIG`, else `<config dir>/conduit/servers.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = env::var(CONFIG_ENV) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    dirs::config_dir().map(|dir| dir.join("conduit").join("servers.toml"))
}

/// Read-only source of server configurations keyed by identifier.
pub trait ServerRegistry: Send + Sync {
    /// Looks up one server. Unknown ids yield [`ConfigError::NotFound`].
    fn read(&self, id: &str) -> Result<McpServerConfig, ConfigError>;

    /// All configured identifiers, in file order.
    fn ids(&self) -> Result<Vec<String>, ConfigError>;

    /// Configurations flagged `auto_start`.
    fn auto_start(&self) -> Result<Vec<McpServerConfig>, ConfigError> {
        let mut servers = Vec::new();
        for id in self.ids()? {
            let config = self.read(&id)?;
            if config.auto_start {
                servers.push(config);
            }
        }
        Ok(servers)
    }
}

impl ServerRegistry for McpServersConfig {
    fn read(&self, id: &str) -> Result<McpServerConfig, ConfigError> {
        self.find_server(id)
            .cloned()
            .ok_or_else(|| ConfigError::NotFound(id.to_string()))
    }

    fn ids(&self) -> Result<Vec<String>, ConfigError> {
        Ok(self.servers.iter().map(|s| s.id.clone()).collect())
    }
}

/// Registry backed by a TOML file that is re-read on every lookup, so edits
/// made while the application runs apply to the next connect.
#[derive(Debug, Clone)]
pub struct FileRegistry {
    path: PathBuf,
}

impl FileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Result<McpServersConfig, ConfigError> {
        McpServersConfig::load_or_default(&self.path)
    }
}

impl ServerRegistry for FileRegistry {
    fn read(&self, id: &str) -> Result<McpServerConfig, ConfigError> {
        self.snapshot()?.read(id)
    }

    fn ids(&self) -> Result<Vec<String>, ConfigError> {
        self.snapshot()?.ids()
    }
}
