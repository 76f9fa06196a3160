use colored::Colorize;

use super::output::{print_json, OutputFormat};
use crate::config::CliConfig;

pub async fn handle_stats_command(
    user: Option<&str>,
    format: &str,
    config: &CliConfig,
) -> anyhow::Result<()> {
    let format = OutputFormat::parse(format)?;
    let service = config.service().await?;

    let stats = service.statistics(user).await;
    let pending = service.pending_notifications().await;
    service.shutdown().await;
    let (stats, pending) = (stats?, pending?);

    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "user_id": user,
            "total_rooms": stats.total_rooms,
            "active_rooms": stats.active_rooms,
            "total_messages": stats.total_messages,
            "total_unread_messages": stats.total_unread_messages,
            "pending_notifications": pending,
        }));
    }

    let title = match user {
        Some(user) => format!("Chat Statistics for {}", user),
        None => "Chat Statistics".to_string(),
    };
    println!("{}", title.cyan().bold());
    println!("{}", "═".repeat(40).dimmed());
    println!();
    println!("  {}", "Rooms".yellow().bold());
    println!("    Total:           {:>8}", stats.total_rooms);
    println!("    Active:          {:>8}", stats.active_rooms);
    println!();
    println!("  {}", "Messages".yellow().bold());
    println!("    Total:           {:>8}", stats.total_messages);
    println!("    Unread:          {:>8}", stats.total_unread_messages);
    println!();
    println!("  {}", "Notifications".yellow().bold());
    println!("    Outbox:          {:>8}", pending);

    Ok(())
}
