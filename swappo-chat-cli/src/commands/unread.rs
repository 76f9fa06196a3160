use clap::Subcommand;
use colored::Colorize;
use comfy_table::{Cell, Color};
use swappo_chat_core::ChatService;

use super::output::{parse_uuid, print_json, table, OutputFormat};
use crate::config::CliConfig;

#[derive(Subcommand)]
pub enum UnreadCommand {
    #[command(about = "Show a participant's unread count for a room")]
    Count {
        #[arg(help = "Room ID (UUID)")]
        room_id: String,

        #[arg(help = "User ID")]
        user: String,

        #[arg(short, long, default_value = "text", help = "Output format (text, json)")]
        format: String,
    },

    #[command(about = "Recompute a room's counters from its messages and repair drift")]
    Reconcile {
        #[arg(help = "Room ID (UUID)")]
        room_id: String,

        #[arg(short, long, default_value = "text", help = "Output format (text, json)")]
        format: String,
    },
}

pub async fn handle_unread_command(cmd: UnreadCommand, config: &CliConfig) -> anyhow::Result<()> {
    let service = config.service().await?;
    let result = run(cmd, &service).await;
    service.shutdown().await;
    result
}

async fn run(cmd: UnreadCommand, service: &ChatService) -> anyhow::Result<()> {
    match cmd {
        UnreadCommand::Count {
            room_id,
            user,
            format,
        } => {
            let format = OutputFormat::parse(&format)?;
            let room_id = parse_uuid(&room_id, "room ID")?;
            let count = service.unread_count(room_id, &user).await?;

            if format == OutputFormat::Json {
                print_json(&serde_json::json!({
                    "chat_room_id": room_id,
                    "user_id": user,
                    "unread_count": count,
                }))
            } else {
                let shown = if count > 0 {
                    count.to_string().yellow().bold()
                } else {
                    count.to_string().dimmed()
                };
                println!("{} has {} unread message(s)", user.bold(), shown);
                Ok(())
            }
        }
        UnreadCommand::Reconcile { room_id, format } => {
            let format = OutputFormat::parse(&format)?;
            let room_id = parse_uuid(&room_id, "room ID")?;
            let report = service.reconcile_unread(room_id).await?;

            if format == OutputFormat::Json {
                return print_json(&report);
            }

            let mut t = table(&["User", "Stored", "Recomputed"]);
            for count in &report.counts {
                let correction = report
                    .corrections
                    .iter()
                    .find(|c| c.user_id == count.user_id);
                let (stored, color) = match correction {
                    Some(c) => (c.stored, Color::Red),
                    None => (count.count, Color::Green),
                };
                t.add_row(vec![
                    Cell::new(&count.user_id),
                    Cell::new(stored).fg(color),
                    Cell::new(count.count),
                ]);
            }
            println!("{t}");

            if report.had_drift() {
                println!(
                    "{} Repaired {} counter(s)",
                    "!".yellow().bold(),
                    report.corrections.len()
                );
            } else {
                println!("{} Counters consistent", "✓".green().bold());
            }
            Ok(())
        }
    }
}
