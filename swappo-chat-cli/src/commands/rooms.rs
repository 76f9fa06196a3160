use clap::Subcommand;
use colored::Colorize;
use comfy_table::Cell;
use swappo_chat_core::{ChatRoom, ChatService, NewRoom, Page, RoomFilter};

use super::output::{
    active_label, format_time, parse_uuid, print_json, short_id, table, truncate_string,
    OutputFormat,
};
use crate::config::CliConfig;

#[derive(Subcommand)]
pub enum RoomsCommand {
    #[command(about = "Open the chat room for an accepted trade offer")]
    Create {
        #[arg(help = "Trade offer ID")]
        trade_offer_id: i64,

        #[arg(help = "First participant")]
        user1: String,

        #[arg(help = "Second participant")]
        user2: String,

        #[arg(short, long, default_value = "text", help = "Output format (text, json)")]
        format: String,
    },

    #[command(about = "Show a room by ID or by trade offer")]
    Show {
        #[arg(help = "Room ID (UUID)", required_unless_present = "trade_offer")]
        room_id: Option<String>,

        #[arg(short, long, help = "Look the room up by trade offer ID instead")]
        trade_offer: Option<i64>,

        #[arg(short, long, default_value = "text", help = "Output format (text, json)")]
        format: String,
    },

    #[command(about = "List a user's rooms, most recently active first")]
    List {
        #[arg(help = "User ID")]
        user: String,

        #[arg(short, long, help = "Include deactivated rooms")]
        all: bool,

        #[arg(long, default_value = "0")]
        offset: u32,

        #[arg(short, long, help = "Page size (clamped to the configured maximum)")]
        limit: Option<u32>,

        #[arg(short, long, default_value = "text", help = "Output format (text, json)")]
        format: String,
    },

    #[command(about = "Deactivate a room on behalf of one of its participants")]
    Deactivate {
        #[arg(help = "Room ID (UUID)")]
        room_id: String,

        #[arg(help = "Requesting participant")]
        requester: String,
    },
}

pub async fn handle_rooms_command(cmd: RoomsCommand, config: &CliConfig) -> anyhow::Result<()> {
    let service = config.service().await?;
    let result = run(cmd, &service).await;
    service.shutdown().await;
    result
}

async fn run(cmd: RoomsCommand, service: &ChatService) -> anyhow::Result<()> {
    match cmd {
        RoomsCommand::Create {
            trade_offer_id,
            user1,
            user2,
            format,
        } => {
            let format = OutputFormat::parse(&format)?;
            let room = service
                .create_room(&NewRoom::new(trade_offer_id, user1, user2))
                .await?;
            if format == OutputFormat::Json {
                print_json(&room)
            } else {
                println!(
                    "{} Created room {} for trade offer {}",
                    "✓".green().bold(),
                    room.id.to_string().cyan(),
                    room.trade_offer_id
                );
                Ok(())
            }
        }
        RoomsCommand::Show {
            room_id,
            trade_offer,
            format,
        } => {
            let format = OutputFormat::parse(&format)?;
            let room = match (room_id, trade_offer) {
                (_, Some(offer)) => service.get_room_by_trade_offer(offer).await?,
                (Some(id), None) => service.get_room(parse_uuid(&id, "room ID")?).await?,
                (None, None) => anyhow::bail!("Pass a room ID or --trade-offer"),
            };
            if format == OutputFormat::Json {
                print_json(&room)
            } else {
                print_room(&room);
                Ok(())
            }
        }
        RoomsCommand::List {
            user,
            all,
            offset,
            limit,
            format,
        } => {
            let format = OutputFormat::parse(&format)?;
            let filter = RoomFilter { active_only: !all };
            let page = limit.map(|limit| Page::new(offset, limit));
            let rooms = service.list_rooms(&user, filter, page).await?;

            if format == OutputFormat::Json {
                return print_json(&rooms);
            }
            if rooms.is_empty() {
                println!("{}", "No rooms found.".dimmed());
                return Ok(());
            }

            let mut t = table(&["Room", "Offer", "With", "Status", "Unread", "Last message"]);
            for overview in &rooms {
                let other = overview
                    .room
                    .other_participant(&user)
                    .unwrap_or("-")
                    .to_string();
                let last = overview
                    .last_message
                    .as_ref()
                    .map(|m| {
                        format!(
                            "{} ({})",
                            truncate_string(&m.content, 30),
                            format_time(m.created_at)
                        )
                    })
                    .unwrap_or_else(|| "-".to_string());
                t.add_row(vec![
                    Cell::new(short_id(&overview.room.id)),
                    Cell::new(overview.room.trade_offer_id),
                    Cell::new(other),
                    Cell::new(active_label(overview.room.is_active)),
                    Cell::new(overview.unread_count),
                    Cell::new(last),
                ]);
            }
            println!("{t}");
            println!("{} {} room(s)", "Total:".dimmed(), rooms.len());
            Ok(())
        }
        RoomsCommand::Deactivate { room_id, requester } => {
            let room_id = parse_uuid(&room_id, "room ID")?;
            let deactivation = service.deactivate_room(room_id, &requester).await?;
            println!(
                "{} Deactivated room {}",
                "✓".green().bold(),
                deactivation.room.id.to_string().cyan()
            );
            if deactivation.cancelled_notifications > 0 {
                println!(
                    "  {} Cancelled {} pending notification(s)",
                    "!".yellow(),
                    deactivation.cancelled_notifications
                );
            }
            Ok(())
        }
    }
}

fn print_room(room: &ChatRoom) {
    println!("{}", "Chat Room".cyan().bold());
    println!("{}", "═".repeat(40).dimmed());
    println!("  {:<16} {}", "ID:".bold(), room.id);
    println!("  {:<16} {}", "Trade offer:".bold(), room.trade_offer_id);
    println!(
        "  {:<16} {} ↔ {}",
        "Participants:".bold(),
        room.user1_id,
        room.user2_id
    );
    println!("  {:<16} {}", "Status:".bold(), active_label(room.is_active));
    println!("  {:<16} {}", "Created:".bold(), format_time(room.created_at));
    if let Some(at) = room.last_message_at {
        println!("  {:<16} {}", "Last message:".bold(), format_time(at));
    }
    if let Some(at) = room.deactivated_at {
        println!("  {:<16} {}", "Deactivated:".bold(), format_time(at));
    }
}
