use clap::Subcommand;
use colored::Colorize;
use comfy_table::Cell;
use swappo_chat_core::{ChatService, Message, MessagePage, NewMessage, StatusChange};

use super::output::{
    format_time, parse_uuid, print_json, short_id, status_cell, table, truncate_string,
    OutputFormat,
};
use crate::config::CliConfig;

#[derive(Subcommand)]
pub enum MessagesCommand {
    #[command(about = "Send a message into a room")]
    Send {
        #[arg(help = "Room ID (UUID)")]
        room_id: String,

        #[arg(help = "Sending participant")]
        sender: String,

        #[arg(help = "Message body")]
        content: String,

        #[arg(short, long, default_value = "text", help = "Output format (text, json)")]
        format: String,
    },

    #[command(about = "List a room's messages in send order")]
    List {
        #[arg(help = "Room ID (UUID)")]
        room_id: String,

        #[arg(long, help = "Only messages after this sequence number")]
        after: Option<i64>,

        #[arg(long, default_value = "0")]
        offset: u32,

        #[arg(short, long, help = "Page size (clamped to the configured maximum)")]
        limit: Option<u32>,

        #[arg(short, long, default_value = "text", help = "Output format (text, json)")]
        format: String,
    },

    #[command(about = "Show a single message")]
    Show {
        #[arg(help = "Message ID (UUID)")]
        message_id: String,

        #[arg(short, long, default_value = "text", help = "Output format (text, json)")]
        format: String,
    },

    #[command(about = "Mark a message as read by its recipient")]
    Read {
        #[arg(help = "Message ID (UUID)")]
        message_id: String,

        #[arg(help = "Reading participant")]
        reader: String,
    },

    #[command(about = "Mark a message as delivered to its recipient")]
    Deliver {
        #[arg(help = "Message ID (UUID)")]
        message_id: String,

        #[arg(help = "Receiving participant")]
        reader: String,
    },

    #[command(about = "Mark every unread message in a room as read")]
    ReadAll {
        #[arg(help = "Room ID (UUID)")]
        room_id: String,

        #[arg(help = "Reading participant")]
        reader: String,
    },
}

pub async fn handle_messages_command(
    cmd: MessagesCommand,
    config: &CliConfig,
) -> anyhow::Result<()> {
    let service = config.service().await?;
    let result = run(cmd, &service, config.chat.messages.default_page_size).await;
    service.shutdown().await;
    result
}

async fn run(
    cmd: MessagesCommand,
    service: &ChatService,
    default_limit: u32,
) -> anyhow::Result<()> {
    match cmd {
        MessagesCommand::Send {
            room_id,
            sender,
            content,
            format,
        } => {
            let format = OutputFormat::parse(&format)?;
            let room_id = parse_uuid(&room_id, "room ID")?;
            let message = service
                .send_message(&NewMessage::new(room_id, sender, content))
                .await?;

            if format == OutputFormat::Json {
                return print_json(&message);
            }
            println!(
                "{} Sent message #{} ({})",
                "✓".green().bold(),
                message.seq,
                message.id.to_string().cyan()
            );
            if !service.dispatcher().is_running().await {
                println!(
                    "  {} Notification queued; run 'swappo-chat worker' to deliver it",
                    "→".blue()
                );
            }
            Ok(())
        }
        MessagesCommand::List {
            room_id,
            after,
            offset,
            limit,
            format,
        } => {
            let format = OutputFormat::parse(&format)?;
            let room_id = parse_uuid(&room_id, "room ID")?;
            let page = match (after, limit) {
                (Some(seq), limit) => Some(MessagePage::after(seq, limit.unwrap_or(default_limit))),
                (None, Some(limit)) => Some(MessagePage::offset(offset, limit)),
                (None, None) if offset > 0 => Some(MessagePage::offset(offset, default_limit)),
                (None, None) => None,
            };
            let messages = service.list_messages(room_id, page).await?;

            if format == OutputFormat::Json {
                return print_json(&messages);
            }
            if messages.is_empty() {
                println!("{}", "No messages found.".dimmed());
                return Ok(());
            }

            let mut t = table(&["#", "ID", "From", "Message", "Status", "Sent"]);
            for message in &messages {
                t.add_row(vec![
                    Cell::new(message.seq),
                    Cell::new(short_id(&message.id)),
                    Cell::new(&message.sender_id),
                    Cell::new(truncate_string(&message.content, 40)),
                    status_cell(message.status),
                    Cell::new(format_time(message.created_at)),
                ]);
            }
            println!("{t}");
            Ok(())
        }
        MessagesCommand::Show { message_id, format } => {
            let format = OutputFormat::parse(&format)?;
            let message = service
                .get_message(parse_uuid(&message_id, "message ID")?)
                .await?;
            if format == OutputFormat::Json {
                print_json(&message)
            } else {
                print_message(&message);
                Ok(())
            }
        }
        MessagesCommand::Read { message_id, reader } => {
            let message_id = parse_uuid(&message_id, "message ID")?;
            let change = service.mark_read(message_id, &reader).await?;
            report_change(&change, "read");
            Ok(())
        }
        MessagesCommand::Deliver { message_id, reader } => {
            let message_id = parse_uuid(&message_id, "message ID")?;
            let change = service.mark_delivered(message_id, &reader).await?;
            report_change(&change, "delivered");
            Ok(())
        }
        MessagesCommand::ReadAll { room_id, reader } => {
            let room_id = parse_uuid(&room_id, "room ID")?;
            let marked = service.mark_all_read(room_id, &reader).await?;
            println!(
                "{} Marked {} message(s) as read",
                "✓".green().bold(),
                marked
            );
            Ok(())
        }
    }
}

fn report_change(change: &StatusChange, label: &str) {
    if change.changed {
        println!(
            "{} Message #{} marked as {}",
            "✓".green().bold(),
            change.message.seq,
            label
        );
    } else {
        println!(
            "{} Message #{} already {}",
            "·".dimmed(),
            change.message.seq,
            change.message.status
        );
    }
}

fn print_message(message: &Message) {
    println!("{}", "Message".cyan().bold());
    println!("{}", "═".repeat(40).dimmed());
    println!("  {:<12} {}", "ID:".bold(), message.id);
    println!("  {:<12} {}", "Room:".bold(), message.chat_room_id);
    println!("  {:<12} {}", "Seq:".bold(), message.seq);
    println!("  {:<12} {}", "From:".bold(), message.sender_id);
    println!("  {:<12} {}", "Status:".bold(), message.status);
    println!("  {:<12} {}", "Sent:".bold(), format_time(message.created_at));
    if let Some(at) = message.read_at {
        println!("  {:<12} {}", "Read:".bold(), format_time(at));
    }
    println!();
    println!("  {}", message.content);
}
