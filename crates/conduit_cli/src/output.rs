//! Terminal output helpers. Styled text for people, one JSON object per line
//! for machines.
//!
//! Uses:
//! - `console` for colors (respects NO_COLOR, auto-disables when piped)
//! - `comfy-table` for server and tool tables
//! - `indicatif` for the spinner shown while servers connect

use std::sync::atomic::{AtomicBool, Ordering};

use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table, presets::UTF8_FULL};
use conduit_core::{ConnectionSnapshot, ConnectionStatus, StateEvent};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::cli::OutputFormat;

// ── Global format flag ─────────────────────────────────────────────

static JSON_MODE: AtomicBool = AtomicBool::new(false);

pub fn init(format: OutputFormat) {
    if matches!(format, OutputFormat::Json) {
        JSON_MODE.store(true, Ordering::Relaxed);
    }
}

pub fn is_json() -> bool {
    JSON_MODE.load(Ordering::Relaxed)
}

// ── JSON envelope ──────────────────────────────────────────────────

#[derive(Serialize)]
struct Msg<'a> {
    level: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a JsonValue>,
}

fn emit_json(level: &str, message: &str, data: Option<&JsonValue>) {
    let msg = Msg {
        level,
        message,
        data,
    };
    match serde_json::to_string(&msg) {
        Ok(json) => println!("{json}"),
        Err(_) => println!("{}", serde_json::json!({ "level": level, "message": message })),
    }
}

// ── Public helpers ─────────────────────────────────────────────────

pub fn header(text: &str) {
    if is_json() {
        emit_json("info", text, None);
    } else {
        println!("{}", style(text).bold().cyan());
    }
}

pub fn success(text: &str) {
    if is_json() {
        emit_json("success", text, None);
    } else {
        println!("{} {}", style("✓").green(), style(text).bright());
    }
}

pub fn error(text: &str) {
    if is_json() {
        let msg = Msg {
            level: "error",
            message: text,
            data: None,
        };
        eprintln!("{}", serde_json::to_string(&msg).unwrap_or_default());
    } else {
        eprintln!("{} {}", style("✗").red(), style(text).bright());
    }
}

pub fn warning(text: &str) {
    if is_json() {
        emit_json("warning", text, None);
    } else {
        println!("{} {}", style("!").yellow(), style(text).bright());
    }
}

pub fn dim(text: &str) {
    if is_json() {
        emit_json("info", text, None);
    } else {
        println!("{}", style(text).dim());
    }
}

/// Emit a serializable value: pretty JSON in text mode, `data` in JSON mode.
pub fn data<T: Serialize>(label: &str, value: &T) {
    let json_val = serde_json::to_value(value).unwrap_or(JsonValue::Null);
    if is_json() {
        emit_json("data", label, Some(&json_val));
    } else {
        let formatted =
            serde_json::to_string_pretty(&json_val).unwrap_or_else(|_| json_val.to_string());
        println!("{formatted}");
    }
}

/// Print a key-value pair with styled key.
pub fn kv(key: &str, value: &str) {
    if is_json() {
        let data = serde_json::json!({ key: value });
        emit_json("info", key, Some(&data));
    } else {
        println!("  {} {}", style(key).cyan().bold(), value);
    }
}

// ── Connection state ───────────────────────────────────────────────

fn status_color(status: ConnectionStatus) -> Color {
    match status {
        ConnectionStatus::Running => Color::Green,
        ConnectionStatus::Connecting | ConnectionStatus::Stopping => Color::Yellow,
        ConnectionStatus::Stopped => Color::DarkGrey,
        ConnectionStatus::Error => Color::Red,
    }
}

fn styled_status(status: ConnectionStatus) -> console::StyledObject<&'static str> {
    let text = status.as_str();
    match status {
        ConnectionStatus::Running => style(text).green(),
        ConnectionStatus::Connecting | ConnectionStatus::Stopping => style(text).yellow(),
        ConnectionStatus::Stopped => style(text).dim(),
        ConnectionStatus::Error => style(text).red(),
    }
}

/// Table of connection snapshots.
pub fn states(states: &[ConnectionSnapshot]) {
    if is_json() {
        let data = serde_json::json!({ "items": states });
        emit_json("list", "", Some(&data));
        return;
    }

    let mut table = table();
    table_header(&mut table, &["Server", "Status", "Transport", "Tools", "Detail"]);
    for state in states {
        let detail = match (&state.last_error, state.connected_at) {
            (Some(err), _) => err.clone(),
            (None, Some(at)) => format!("since {}", at.format("%H:%M:%S")),
            (None, None) => String::new(),
        };
        table.add_row(vec![
            Cell::new(&state.id).fg(Color::Green),
            Cell::new(state.status.as_str()).fg(status_color(state.status)),
            Cell::new(state.transport.target()),
            Cell::new(state.tool_count),
            Cell::new(detail),
        ]);
    }
    println!("{table}");
}

/// One line per state change.
pub fn event(event: &StateEvent) {
    if is_json() {
        let data = serde_json::to_value(event).unwrap_or(JsonValue::Null);
        emit_json("event", "", Some(&data));
        return;
    }

    match event {
        StateEvent::Changed { snapshot } => print_change(snapshot),
        StateEvent::Resync { states } => {
            println!("{}", style("── current state ──").dim());
            for snapshot in states {
                print_change(snapshot);
            }
        }
    }
}

fn print_change(snapshot: &ConnectionSnapshot) {
    let time = snapshot.updated_at.format("%H:%M:%S");
    match &snapshot.last_error {
        Some(err) if snapshot.status == ConnectionStatus::Error => println!(
            "{} {} {} {}",
            style(time).dim(),
            style(&snapshot.id).bold(),
            styled_status(snapshot.status),
            style(err).red()
        ),
        _ => println!(
            "{} {} {}",
            style(time).dim(),
            style(&snapshot.id).bold(),
            styled_status(snapshot.status)
        ),
    }
}

// ── Tables ─────────────────────────────────────────────────────────

/// Create a styled table for listing items.
pub fn table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Add a header row to the table.
pub fn table_header(table: &mut Table, columns: &[&str]) {
    table.set_header(
        columns
            .iter()
            .map(|c| Cell::new(c).fg(Color::Cyan).add_attribute(Attribute::Bold))
            .collect::<Vec<_>>(),
    );
}

/// Add a row to the table.
pub fn table_row(table: &mut Table, name: &str, desc: &str) {
    table.add_row(vec![Cell::new(name).fg(Color::Green), Cell::new(desc)]);
}

/// Print a table (JSON mode emits items array instead).
pub fn table_print(table: &Table, items: &[(&str, &str)]) {
    if is_json() {
        let items: Vec<_> = items
            .iter()
            .map(|(name, desc)| serde_json::json!({ "name": name, "description": desc }))
            .collect();
        let data = serde_json::json!({ "items": items });
        emit_json("list", "", Some(&data));
    } else {
        println!("{table}");
    }
}

// ── Spinners ───────────────────────────────────────────────────────

/// Create a spinner for async operations. Hidden in JSON mode.
pub fn spinner(message: &str) -> ProgressBar {
    if is_json() {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        spinner.set_style(spinner_style);
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner
}

/// Finish spinner with success message.
pub fn spinner_success(spinner: &ProgressBar, message: &str) {
    spinner.finish_and_clear();
    success(message);
}

/// Finish spinner with error message.
pub fn spinner_error(spinner: &ProgressBar, message: &str) {
    spinner.finish_and_clear();
    error(message);
}
