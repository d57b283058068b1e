use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rocketring::cli;
use rocketring::node::{NodeHandle, NodeReport, NodeState, RingNode, Role};
use rocketring::transport::UdpTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse args and env vars
    let args = cli::Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "rocketring=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let settings = args.into_settings();
    settings.validate()?;
    let transport_config = settings.transport_config();
    let transport = Arc::new(UdpTransport::new(&transport_config).await?);
    info!(
        "Starting rocketring as {} (p = {}, quiet threshold = {})",
        transport_config.advertise_ip, settings.fire_probability, settings.quiet_threshold
    );

    let discovery_wait = settings.discovery_timeout + settings.election_jitter;
    let auto_start = settings.auto_start_nodes.is_some();
    let (node, handle) = RingNode::new(settings, transport)?;

    let interrupt = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            interrupt.shutdown();
        }
    });

    if !auto_start {
        tokio::spawn(start_on_enter(handle.clone(), discovery_wait));
    }

    let report = node.run().await?;
    log_summary(&report);
    Ok(())
}

/// Let the operator start the ring from the coordinator's terminal
async fn start_on_enter(handle: NodeHandle, discovery_wait: Duration) {
    let decided = handle
        .wait_for_state(
            |s| !matches!(s, NodeState::Init | NodeState::Discovering | NodeState::ElectedCoordinator),
            discovery_wait + Duration::from_secs(5),
        )
        .await;
    if !matches!(decided, Ok(NodeState::WaitingForRingStart)) {
        return;
    }
    match handle.status().await {
        Ok(status) if status.role == Role::Coordinator => {}
        _ => return,
    }

    info!("This node is the coordinator. Press Enter to start the ring once everyone has joined");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(_)) = lines.next_line().await {
        match handle.start_ring().await {
            Ok(()) => return,
            Err(e) => warn!("Could not start the ring: {}", e),
        }
    }
}

fn log_summary(report: &NodeReport) {
    info!(
        "[Node<{}>] Stopped ({:?}): {} token(s) processed, {} rocket(s) fired, {} observed, final p = {:.6}",
        report.node_id,
        report.termination,
        report.tokens_processed,
        report.rockets_fired,
        report.rockets_observed,
        report.final_probability
    );
    info!(
        "[Node<{}>] Datagrams sent {} (errors {}), received {} (errors {})",
        report.node_id,
        report.transport.datagrams_sent,
        report.transport.send_errors,
        report.transport.datagrams_received,
        report.transport.receive_errors
    );

    let stats = match &report.statistics {
        Some(stats) => stats,
        None => return,
    };
    let summary = stats.summary();
    info!("+-----------------------+------------+");
    info!("| Nodes                 | {:>10} |", report.directory.len());
    info!("| Rounds                | {:>10} |", stats.total_rounds());
    info!("| Rockets (coordinator) | {:>10} |", stats.fired_by_coordinator());
    info!("| Rockets (total seen)  | {:>10} |", stats.total_fires());
    info!("| Min round (ms)        | {:>10.1} |", as_millis(summary.min));
    info!("| Avg round (ms)        | {:>10.1} |", as_millis(summary.mean));
    info!("| Max round (ms)        | {:>10.1} |", as_millis(summary.max));
    info!("+-----------------------+------------+");
    if let (Some(started), Some(finished)) = (stats.started_at(), stats.finished_at()) {
        info!(
            "Ring ran from {} to {}",
            started.to_rfc3339(),
            finished.to_rfc3339()
        );
    }
}

fn as_millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
