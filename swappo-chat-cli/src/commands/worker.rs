use std::time::Duration;

use anyhow::Context;
use colored::Colorize;
use swappo_chat_core::ChatService;
use tracing::{info, warn};

use crate::config::{mask_password, CliConfig};

/// Runs the notification dispatcher in the foreground. Startup re-enqueues
/// every outbox row left behind by `messages send` or by a previous worker.
pub async fn handle_worker_command(stats_interval: u64, config: &CliConfig) -> anyhow::Result<()> {
    let service = config.service().await?;

    if !config.chat.notifications.enabled {
        warn!("Notifications are disabled; outbox rows will be acknowledged without delivery");
    }

    service.start().await.context("Failed to start dispatcher")?;

    let backend = if config.memory {
        "in-memory".to_string()
    } else {
        mask_password(config.database_url())
    };
    println!("{}", "Swappo Chat worker".cyan().bold());
    println!("  {} Store:    {}", "→".blue(), backend);
    println!(
        "  {} Sink:     {} ({})",
        "→".blue(),
        service.dispatcher().sink_name(),
        config.chat.notifications.endpoint_url()
    );
    println!(
        "  {} Pending:  {}",
        "→".blue(),
        service.pending_notifications().await?
    );
    println!("  {} Press Ctrl+C to stop", "→".blue());

    wait_for_shutdown(&service, stats_interval).await;

    println!();
    println!("{} Shutting down...", "!".yellow());
    service.shutdown().await;
    log_stats(&service);
    Ok(())
}

async fn wait_for_shutdown(service: &ChatService, stats_interval: u64) {
    if stats_interval == 0 {
        shutdown_signal().await;
        return;
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(stats_interval));
    ticker.tick().await;
    let signal = shutdown_signal();
    tokio::pin!(signal);

    loop {
        tokio::select! {
            _ = &mut signal => break,
            _ = ticker.tick() => log_stats(service),
        }
    }
}

fn log_stats(service: &ChatService) {
    let stats = service.dispatcher_stats();
    info!(
        enqueued = stats.enqueued,
        attempts = stats.attempts,
        delivered = stats.delivered,
        retried = stats.retried,
        exhausted = stats.exhausted,
        cancelled = stats.cancelled,
        in_progress = stats.in_progress,
        "Dispatcher stats"
    );
}

/// Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
