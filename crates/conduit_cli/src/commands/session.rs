//! Interactive session over one supervisor.
//!
//! State changes are printed as they happen, whatever caused them.

use anyhow::{Result, bail};
use conduit_core::{ToolInvocation, ToolOutcome};
use console::style;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use super::{Context, call, registry, servers};
use crate::output;

type Input = Lines<BufReader<Stdin>>;

const HELP: &[(&str, &str)] = &[
    ("list", "configured servers"),
    ("status", "state of every server seen so far"),
    ("start <id>...", "connect servers"),
    ("stop <id>...", "disconnect servers"),
    ("restart <id>...", "close and reopen servers"),
    ("tools <id>", "tools of a running server"),
    ("resources <id>", "resources of a running server"),
    ("read <id> <uri>", "read one resource"),
    ("call <id> <tool> [json]", "call a tool"),
    ("quit", "stop everything and leave"),
];

fn help() {
    let mut table = output::table();
    output::table_header(&mut table, &["Command", "Does"]);
    for (command, does) in HELP {
        output::table_row(&mut table, command, does);
    }
    output::table_print(&table, HELP);
}

fn prompt() {
    if !output::is_json() {
        eprint!("{} ", style("conduit>").cyan().bold());
    }
}

async fn start(context: &Context, ids: &[&str], force: bool) {
    for id in ids {
        if let Err(e) = context.supervisor.connect(id, force).await {
            output::error(&e.to_string());
        }
    }
}

async fn stop(context: &Context, ids: &[&str]) {
    for id in ids {
        if context.supervisor.disconnect(id).await.is_none() {
            output::dim(&format!("{} is not running", id));
        }
    }
}

async fn run_call(context: &Context, input: &mut Input, words: &[&str]) -> Result<()> {
    let [server_id, tool, rest @ ..] = words else {
        bail!("usage: call <id> <tool> [json]");
    };
    let raw = rest.join(" ");
    let invocation = ToolInvocation::new(*tool).with_arguments(call::parse_arguments(Some(&raw))?);

    let result = match context.router.invoke(server_id, invocation.clone()).await? {
        ToolOutcome::Completed(result) => result,
        ToolOutcome::ApprovalRequired(request) => {
            call::show_request(&request);
            eprint!("Run it? [y/N] ");
            let answer = input.next_line().await?.unwrap_or_default();
            if !call::is_yes(&answer) {
                output::dim("Not approved; the tool was not run.");
                return Ok(());
            }
            match context.router.invoke(server_id, invocation.approve()).await? {
                ToolOutcome::Completed(result) => result,
                ToolOutcome::ApprovalRequired(_) => bail!("Tool still requires approval"),
            }
        }
    };
    call::show_result(result)
}

/// Runs one input line. Returns `false` to leave the session.
async fn dispatch(context: &Context, input: &mut Input, line: &str) -> Result<bool> {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        [] => {}
        ["help"] | ["?"] => help(),
        ["quit"] | ["exit"] => return Ok(false),
        ["list"] => registry::list(context, false)?,
        ["status"] => output::states(&context.supervisor.list_states().await),
        ["start", ids @ ..] if !ids.is_empty() => start(context, ids, false).await,
        ["restart", ids @ ..] if !ids.is_empty() => start(context, ids, true).await,
        ["stop", ids @ ..] if !ids.is_empty() => stop(context, ids).await,
        ["tools", id] => servers::tools(context, id).await?,
        ["resources", id] => servers::resources(context, id).await?,
        ["read", id, uri] => servers::read(context, id, uri).await?,
        ["call", rest @ ..] => run_call(context, input, rest).await?,
        _ => output::warning("Unknown command; type 'help'"),
    }
    Ok(true)
}

pub async fn run(context: &Context) -> Result<()> {
    output::header("conduit session, type 'help' for commands");
    let _events = context.supervisor.subscribe_fn(|event| output::event(&event));

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let Some(line) = input.next_line().await? else {
            break;
        };
        match dispatch(context, &mut input, &line).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => output::error(&format!("{e:#}")),
        }
    }

    let stopped = context.supervisor.shutdown_all().await;
    if !stopped.is_empty() {
        output::dim(&format!("Stopped {} server(s)", stopped.len()));
    }
    Ok(())
}
