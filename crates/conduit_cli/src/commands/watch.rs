use anyhow::Result;
use futures::future::join_all;

use super::Context;
use crate::output;

pub async fn run(context: &Context, ids: Vec<String>) -> Result<()> {
    let mut subscription = context.supervisor.subscribe();
    output::dim("Watching server state, Ctrl-C to stop");

    let supervisor = context.supervisor.clone();
    let connecting = tokio::spawn(async move {
        if ids.is_empty() {
            if let Err(e) = supervisor.connect_all_auto_start().await {
                output::error(&e.to_string());
            }
        } else {
            join_all(ids.iter().map(|id| supervisor.connect(id, false))).await;
        }
    });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = subscription.recv() => match event {
                Some(event) => output::event(&event),
                None => break,
            },
        }
    }

    connecting.abort();
    context.supervisor.shutdown_all().await;
    while let Some(event) = subscription.try_recv() {
        output::event(&event);
    }
    Ok(())
}
