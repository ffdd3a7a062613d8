//! Connection state, tools and resources of running servers.

use anyhow::{Result, bail};
use conduit_core::ToolInvocationResult;
use conduit_mcp::mcp::{ReadResourceResult, Resource, Tool};
use futures::future::join_all;
use serde::de::DeserializeOwned;

use super::Context;
use crate::output;

/// Payload of a successful routed call, decoded.
pub fn decode<T: DeserializeOwned>(result: ToolInvocationResult) -> Result<T> {
    if !result.success {
        bail!(result.message.unwrap_or_else(|| "call failed".to_string()));
    }
    Ok(serde_json::from_value(result.data.unwrap_or_default())?)
}

/// Connects `ids` (or every auto-start server) and prints the state table.
pub async fn status(context: &Context, ids: Vec<String>) -> Result<()> {
    let outcomes = if ids.is_empty() {
        context.supervisor.connect_all_auto_start().await?
    } else {
        let attempts = ids.iter().map(|id| async move {
            (id.clone(), context.supervisor.connect(id, false).await)
        });
        join_all(attempts).await
    };

    if outcomes.is_empty() {
        output::warning("No servers to connect.");
        output::dim("Mark servers with auto_start = true or name them: conduit status <id>");
        return Ok(());
    }

    for (id, outcome) in &outcomes {
        if let Err(e) = outcome {
            tracing::debug!(server = %id, error = %e, "connect failed");
        }
    }
    output::states(&context.supervisor.list_states().await);
    Ok(())
}

pub async fn tools(context: &Context, server_id: &str) -> Result<()> {
    let tools: Vec<Tool> = decode(context.router.list_tools(server_id).await?)?;
    if tools.is_empty() {
        output::warning(&format!("{} advertises no tools.", server_id));
        return Ok(());
    }

    let classifier = context.router.classifier();
    let rows: Vec<(String, String)> = tools
        .iter()
        .map(|tool| {
            let kind = classifier
                .classify(&tool.name)
                .map(|p| p.kind.to_string())
                .unwrap_or_else(|| "unclassified".to_string());
            (tool.name.clone(), format!("[{}] {}", kind, tool.description))
        })
        .collect();

    output::header(&format!("Tools of {}", server_id));
    let mut table = output::table();
    output::table_header(&mut table, &["Tool", "Description"]);
    for (name, desc) in &rows {
        output::table_row(&mut table, name, desc);
    }
    let items: Vec<(&str, &str)> = rows.iter().map(|(n, d)| (n.as_str(), d.as_str())).collect();
    output::table_print(&table, &items);
    Ok(())
}

pub async fn resources(context: &Context, server_id: &str) -> Result<()> {
    let resources: Vec<Resource> = decode(context.router.list_resources(server_id).await?)?;
    if resources.is_empty() {
        output::warning(&format!("{} advertises no resources.", server_id));
        return Ok(());
    }

    if output::is_json() {
        output::data("resources", &resources);
        return Ok(());
    }

    output::header(&format!("Resources of {}", server_id));
    let mut table = output::table();
    output::table_header(&mut table, &["URI", "Name", "Type"]);
    for resource in &resources {
        table.add_row(vec![
            resource.uri.clone(),
            resource.name.clone(),
            resource.mime_type.clone().unwrap_or_default(),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn read(context: &Context, server_id: &str, uri: &str) -> Result<()> {
    let read: ReadResourceResult = decode(context.router.read_resource(server_id, uri).await?)?;

    if output::is_json() {
        output::data(uri, &read);
        return Ok(());
    }

    for contents in &read.contents {
        match (&contents.text, &contents.blob) {
            (Some(text), _) => println!("{text}"),
            (None, Some(blob)) => output::dim(&format!(
                "{}: binary content ({} base64 bytes)",
                contents.uri,
                blob.len()
            )),
            (None, None) => output::dim(&format!("{}: empty", contents.uri)),
        }
    }
    Ok(())
}

pub async fn tools_command(context: &Context, server_id: &str) -> Result<()> {
    context.connect(server_id, false).await?;
    tools(context, server_id).await
}

pub async fn resources_command(context: &Context, server_id: &str) -> Result<()> {
    context.connect(server_id, false).await?;
    resources(context, server_id).await
}

pub async fn read_command(context: &Context, server_id: &str, uri: &str) -> Result<()> {
    context.connect(server_id, false).await?;
    read(context, server_id, uri).await
}
