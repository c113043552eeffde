/*
    Causal broadcast demo. Five processes join one group; sending unlocks once
    all five are in. Process 1 sends m, process 2 answers with m+ after
    delivering m, process 1 follows with m++. Process 2 then leaves and
    process 3 sends to the remaining members. Every recipient delivers the
    chain m -> m+ -> m++ in that order, whatever the network delays are.

    Set RUST_LOG=debug to also see scheduling, arrivals and blocked deliveries.
*/

use std::time::Duration;

use simple_cbcast::{CbcastError, Group, GroupConfig, Node};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), CbcastError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let group = Group::with_config(GroupConfig::from_env())?;
    let nodes: Vec<_> = (1..=5).map(Node::new).collect();
    for node in &nodes {
        node.join(&group)?;
    }

    let pause = Duration::from_secs(2);

    nodes[0].send("m")?;
    tokio::time::sleep(pause).await;

    nodes[1].send("m+")?;
    tokio::time::sleep(pause).await;

    nodes[0].send("m++")?;
    tokio::time::sleep(pause).await;

    group.remove_member(&nodes[1]);
    info!(members = ?group.member_ids(), "process 2 removed");

    nodes[2].send("hello")?;
    tokio::time::sleep(pause).await;

    for node in &nodes {
        info!(
            node = node.id(),
            clock = %node.vector_clock(),
            delivered = ?node.delivered_payloads(),
            pending = node.pending_len(),
            "final state"
        );
        node.shutdown();
    }
    Ok(())
}
