//! Tool calls with an approval prompt.

use anyhow::{Context as _, Result, bail};
use conduit_core::{ApprovalRequest, ToolInvocation, ToolInvocationResult, ToolOutcome};
use conduit_mcp::mcp::CallToolResult;
use console::{Term, style};
use serde_json::Value as JsonValue;

use super::Context;
use crate::output;

/// Parses `--args`; no arguments is an empty object.
pub fn parse_arguments(raw: Option<&str>) -> Result<JsonValue> {
    match raw.map(str::trim) {
        None | Some("") => Ok(JsonValue::Object(Default::default())),
        Some(raw) => serde_json::from_str(raw).context("Invalid JSON in --args"),
    }
}

/// Shows what the tool is about to do.
pub fn show_request(request: &ApprovalRequest) {
    if output::is_json() {
        output::data("approval_required", request);
        return;
    }

    let kind = request
        .kind
        .map(|k| k.to_string())
        .unwrap_or_else(|| "unclassified".to_string());
    output::warning(&format!(
        "{} on {} needs approval ({})",
        style(&request.tool).bold(),
        request.server_id,
        kind
    ));
    if let Some(label) = &request.running_label {
        output::kv("Action:", label);
    }
    let arguments =
        serde_json::to_string_pretty(&request.arguments).unwrap_or_else(|_| request.arguments.to_string());
    output::kv("Arguments:", &arguments);
}

/// Asks on the terminal. Anything but y/yes is a no.
async fn ask() -> Result<bool> {
    let answer = tokio::task::spawn_blocking(|| {
        let term = Term::stderr();
        term.write_str("Run it? [y/N] ")?;
        term.read_line()
    })
    .await??;
    Ok(is_yes(&answer))
}

pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Prints a finished call. A failed call is an error.
pub fn show_result(result: ToolInvocationResult) -> Result<()> {
    if !result.success {
        bail!(result.message.unwrap_or_else(|| "Tool failed".to_string()));
    }
    if output::is_json() {
        output::data(result.message.as_deref().unwrap_or("result"), &result.data);
        return Ok(());
    }

    output::success(result.message.as_deref().unwrap_or("Tool finished"));
    let Some(data) = result.data else {
        return Ok(());
    };
    match serde_json::from_value::<CallToolResult>(data.clone()) {
        Ok(call) => {
            let text = call.joined_text();
            if !text.is_empty() {
                println!("{text}");
            }
            if let Some(structured) = &call.structured_content {
                output::data("structured", structured);
            }
        }
        Err(_) => output::data("result", &data),
    }
    Ok(())
}

pub async fn handle(
    context: &Context,
    server_id: &str,
    tool: &str,
    args: Option<&str>,
    yes: bool,
) -> Result<()> {
    let mut invocation = ToolInvocation::new(tool).with_arguments(parse_arguments(args)?);
    if yes {
        invocation = invocation.approve();
    }
    context.connect(server_id, false).await?;

    let outcome = context.router.invoke(server_id, invocation.clone()).await?;
    let result = match outcome {
        ToolOutcome::Completed(result) => result,
        ToolOutcome::ApprovalRequired(request) => {
            show_request(&request);
            if output::is_json() || !Term::stderr().is_term() {
                bail!("Approval required; run again with --yes to approve");
            }
            if !ask().await? {
                output::dim("Not approved; the tool was not run.");
                return Ok(());
            }
            match context.router.invoke(server_id, invocation.approve()).await? {
                ToolOutcome::Completed(result) => result,
                ToolOutcome::ApprovalRequired(_) => bail!("Tool still requires approval"),
            }
        }
    };
    show_result(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments(None).unwrap(), serde_json::json!({}));
        assert_eq!(parse_arguments(Some("  ")).unwrap(), serde_json::json!({}));
        assert_eq!(
            parse_arguments(Some(r#"{"path":"a.txt"}"#)).unwrap()["path"],
            "a.txt"
        );
        assert!(parse_arguments(Some("{not json")).is_err());
    }

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y"));
        assert!(is_yes(" YES\n"));
        assert!(!is_yes(""));
        assert!(!is_yes("no"));
    }

    #[test]
    fn test_show_result_failure_is_error() {
        let err = show_result(ToolInvocationResult::failure("Writing file failed: disk full")).unwrap_err();
        assert_eq!(err.to_string(), "Writing file failed: disk full");
    }
}
