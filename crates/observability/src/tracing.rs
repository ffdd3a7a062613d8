//! Span helpers for supervisor and router operations

/// Create a span for a lifecycle operation on one MCP server
///
/// # Example
///
/// ```rust
/// use conduit_observability::server_span;
///
/// let span = server_span!("files", "connect");
/// let _guard = span.enter();
/// // ... connect ...
/// ```
#[macro_export]
macro_rules! server_span {
    ($server_id:expr, $operation:expr) => {
        tracing::info_span!(
            "mcp.server",
            server.id = $server_id,
            operation = $operation,
            error = tracing::field::Empty,
            error.message = tracing::field::Empty,
        )
    };
}

/// Create a span for one routed tool call
///
/// # Example
///
/// ```rust
/// use conduit_observability::tool_span;
///
/// let span = tool_span!("files", "read_file");
/// let _guard = span.enter();
/// ```
#[macro_export]
macro_rules! tool_span {
    ($server_id:expr, $tool:expr) => {
        tracing::info_span!(
            "mcp.tool",
            server.id = $server_id,
            tool.name = $tool,
            tool.duration_ms = tracing::field::Empty,
            error = tracing::field::Empty,
            error.message = tracing::field::Empty,
        )
    };
}

/// Record an error on the current span
///
/// Only fields the span declared are recorded; both span macros above
/// declare `error` and `error.message`.
pub fn record_error<E: std::error::Error>(error: &E) {
    let span = tracing::Span::current();
    span.record("error", true);
    span.record("error.message", error.to_string());
    tracing::error!(error = %error, "Operation failed");
}

/// Record latency/duration on the current span
///
/// # Example
///
/// ```rust
/// use conduit_observability::record_duration;
/// use std::time::Instant;
///
/// let start = Instant::now();
/// // ... operation ...
/// record_duration("tool.duration_ms", start.elapsed());
/// ```
pub fn record_duration(key: &str, duration: std::time::Duration) {
    let span = tracing::Span::current();
    span.record(key, duration.as_millis() as u64);
}
