//! Serializable types shared between the connection supervisor, the tool
//! router and whatever presentation layer sits on top of them.
//!
//! Nothing in this crate holds a live client handle: every type here is safe
//! to hand across a process or trust boundary.

pub mod connection;
pub mod error;
pub mod event;
pub mod tool_call;

pub use connection::{ConnectionSnapshot, ConnectionStatus, TransportDescriptor};
pub use error::{CoreError, Result};
pub use event::StateEvent;
pub use tool_call::{
    ApprovalRequest, ToolInvocation, ToolInvocationResult, ToolKind, ToolOutcome, ToolPolicy,
};
