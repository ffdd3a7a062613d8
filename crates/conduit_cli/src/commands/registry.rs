//! Registry file commands: list, add, remove.

use std::collections::HashMap;

use anyhow::{Result, anyhow, bail};
use conduit_mcp::mcp::McpAuthConfig;
use conduit_mcp::{McpServerConfig, McpServersConfig};

use super::Context;
use crate::output;

pub struct NewServer {
    pub id: String,
    pub name: Option<String>,
    pub command: Option<String>,
    pub url: Option<String>,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub auth_type: Option<String>,
    pub auth_token: Option<String>,
    pub auto_start: bool,
    pub connect_timeout: Option<u64>,
    pub call_timeout: Option<u64>,
}

fn parse_env(pairs: &[String]) -> Result<HashMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(anyhow!(
                "Invalid environment variable format: {}. Expected KEY=VALUE",
                pair
            )),
        })
        .collect()
}

fn build_config(new: NewServer) -> Result<McpServerConfig> {
    let mut config = match (new.command, new.url) {
        (Some(_), Some(_)) => bail!(
            "Cannot specify both --command and --url. Use --command for local servers, --url for remote servers."
        ),
        (None, None) => {
            bail!("Either --command (for local servers) or --url (for remote servers) is required.")
        }
        (Some(command), None) => McpServerConfig::new(&new.id, command).with_args(new.args),
        (None, Some(url)) => McpServerConfig::remote(&new.id, url),
    };

    if let Some(name) = new.name {
        config = config.with_name(name);
    }
    for (key, value) in parse_env(&new.env)? {
        config = config.with_env(key, value);
    }
    match (new.auth_type, new.auth_token) {
        (Some(auth_type), Some(token)) => config = config.with_auth(McpAuthConfig::new(auth_type, token)),
        (None, Some(_)) => bail!("--auth-type is required when --auth-token is provided"),
        (Some(_), None) => bail!("--auth-token is required when --auth-type is provided"),
        (None, None) => {}
    }
    if let Some(secs) = new.connect_timeout {
        config = config.with_connect_timeout(secs);
    }
    if let Some(secs) = new.call_timeout {
        config = config.with_call_timeout(secs);
    }

    config = config.with_auto_start(new.auto_start);
    config.validate()?;
    Ok(config)
}

pub fn add(context: &Context, new: NewServer) -> Result<()> {
    let path = context.registry.path();
    let mut servers = McpServersConfig::load_or_default(path)?;
    if servers.find_server(&new.id).is_some() {
        bail!("Server '{}' already exists in {}", new.id, path.display());
    }

    let config = build_config(new)?;
    let id = config.id.clone();
    let name = config.display_name().to_string();
    servers.add_server(config);
    servers.save(path)?;

    output::success(&format!("Added MCP server: {} ({})", name, id));
    output::dim(&format!("Check it with: conduit status {}", id));
    Ok(())
}

pub fn remove(context: &Context, server_id: &str) -> Result<()> {
    let path = context.registry.path();
    let mut servers = McpServersConfig::load_or_default(path)?;
    let removed = servers
        .remove_server(server_id)
        .ok_or_else(|| anyhow!("No server configured with id '{}'", server_id))?;
    servers.save(path)?;

    output::success(&format!("Removed MCP server: {}", removed.display_name()));
    Ok(())
}

pub fn list(context: &Context, detailed: bool) -> Result<()> {
    let servers = context.registry.snapshot()?;

    if servers.is_empty() {
        output::warning("No MCP servers configured.");
        output::dim("Add one with: conduit add --id <id> --command <command>");
        return Ok(());
    }

    if output::is_json() {
        output::data("servers", &servers.servers);
        return Ok(());
    }

    output::header(&format!("MCP Servers ({})", context.registry.path().display()));

    if detailed {
        for server in &servers.servers {
            output::kv("ID:", &server.id);
            output::kv("Name:", server.display_name());
            output::kv("Transport:", &server.effective_transport().to_string());
            output::kv("Target:", &server.descriptor().target());
            if let Some(dir) = &server.working_dir {
                output::kv("Working dir:", &dir.display().to_string());
            }
            if !server.env.is_empty() {
                let mut keys: Vec<_> = server.env.keys().map(String::as_str).collect();
                keys.sort_unstable();
                output::kv("Env:", &keys.join(", "));
            }
            if let Some(auth) = &server.auth {
                output::kv("Auth:", &auth.auth_type);
            }
            output::kv("Auto-start:", &server.auto_start.to_string());
            output::kv(
                "Timeouts:",
                &format!(
                    "connect {}s, call {}s",
                    server.connect_timeout().as_secs(),
                    server.call_timeout().as_secs()
                ),
            );
            println!();
        }
        return Ok(());
    }

    let mut table = output::table();
    output::table_header(&mut table, &["ID", "Name", "Transport", "Target", "Auto-start"]);
    for server in &servers.servers {
        table.add_row(vec![
            server.id.clone(),
            server.display_name().to_string(),
            server.effective_transport().to_string(),
            server.descriptor().target(),
            if server.auto_start { "yes" } else { "no" }.to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}
