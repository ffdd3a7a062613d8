//! Command dispatch.

pub mod call;
pub mod registry;
pub mod servers;
pub mod session;
pub mod watch;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use conduit_core::ConnectionSnapshot;
use conduit_mcp::mcp::default_config_path;
use conduit_mcp::{FileRegistry, Supervisor, ToolClassifier, ToolRouter};

use crate::cli::{Cli, Command};
use crate::output;

/// Everything a command needs: the registry file, one supervisor and the
/// router on top of it.
pub struct Context {
    pub registry: FileRegistry,
    pub supervisor: Arc<Supervisor>,
    pub router: ToolRouter,
}

impl Context {
    pub fn open(config: Option<PathBuf>) -> Result<Self> {
        let path = match config {
            Some(path) => path,
            None => default_config_path()
                .ok_or_else(|| anyhow!("No config directory found; pass --config"))?,
        };
        let registry = FileRegistry::new(path);
        let servers = registry
            .snapshot()
            .with_context(|| format!("Reading {}", registry.path().display()))?;

        let supervisor = Arc::new(Supervisor::with_mcp(Arc::new(registry.clone())));
        let router = ToolRouter::new(supervisor.clone(), ToolClassifier::from_config(&servers));

        Ok(Self {
            registry,
            supervisor,
            router,
        })
    }

    /// Connects `id` behind a spinner.
    pub async fn connect(&self, id: &str, force: bool) -> Result<ConnectionSnapshot> {
        let spinner = output::spinner(&format!("Connecting {}", id));
        match self.supervisor.connect(id, force).await {
            Ok(snapshot) => {
                spinner.finish_and_clear();
                output::dim(&format!("{} running ({} tools)", id, snapshot.tool_count));
                Ok(snapshot)
            }
            Err(e) => {
                spinner.finish_and_clear();
                Err(e.into())
            }
        }
    }
}

pub async fn handle(cli: Cli) -> Result<()> {
    let context = Context::open(cli.config)?;

    let result = match cli.command {
        Command::List { detailed } => registry::list(&context, detailed),
        Command::Add {
            id,
            name,
            command,
            url,
            args,
            env,
            auth_type,
            auth_token,
            no_auto_start,
            connect_timeout,
            call_timeout,
        } => registry::add(
            &context,
            registry::NewServer {
                id,
                name,
                command,
                url,
                args,
                env,
                auth_type,
                auth_token,
                auto_start: !no_auto_start,
                connect_timeout,
                call_timeout,
            },
        ),
        Command::Remove { server_id } => registry::remove(&context, &server_id),
        Command::Status { server_ids } => servers::status(&context, server_ids).await,
        Command::Tools { server_id } => servers::tools_command(&context, &server_id).await,
        Command::Resources { server_id } => {
            servers::resources_command(&context, &server_id).await
        }
        Command::Read { server_id, uri } => servers::read_command(&context, &server_id, &uri).await,
        Command::Call {
            server_id,
            tool,
            args,
            yes,
        } => call::handle(&context, &server_id, &tool, args.as_deref(), yes).await,
        Command::Session => session::run(&context).await,
        Command::Watch { server_ids } => watch::run(&context, server_ids).await,
    };

    context.supervisor.shutdown_all().await;
    result
}
