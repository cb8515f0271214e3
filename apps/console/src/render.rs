//! Terminal rendering of chat state.

use casa_chats::{ChatSnapshot, Conversation, Message, MessageBody, MessageStatus, View};
use colored::*;

pub fn directory(conversations: &[Conversation], total_unread: u32) {
    if conversations.is_empty() {
        println!("No conversations yet; start one with /new <user>");
        return;
    }

    println!("Conversations ({} unread):", total_unread.to_string().yellow());
    for conversation in conversations {
        let snippet = conversation
            .last_message
            .as_ref()
            .map(|last| last.content.as_str())
            .unwrap_or("");
        let unread = if conversation.unread_count > 0 {
            format!(" [{}]", conversation.unread_count).yellow().to_string()
        } else {
            String::new()
        };
        println!(
            "  {} {}{} {}",
            conversation.id.cyan(),
            conversation.other_user.display_name.bold(),
            unread,
            snippet.dimmed()
        );
    }
}

pub fn message(message: &Message, local_user_id: &str) {
    let author = if message.sender_id == local_user_id {
        "you".green()
    } else {
        message.sender_id.as_str().blue()
    };

    let body = match message.body() {
        MessageBody::Text(text) => text.to_string(),
        MessageBody::Attachment { attachment, caption } => match caption {
            Some(caption) => format!("{} <{}>", caption, attachment.url),
            None => format!("[{}] <{}>", attachment.kind.as_str(), attachment.url),
        },
    };

    let status = match message.status {
        MessageStatus::Pending => " (sending)".dimmed(),
        MessageStatus::Error => format!(" (failed, /retry {})", message.id).red(),
        MessageStatus::Sent | MessageStatus::Delivered | MessageStatus::Read => "".normal(),
    };

    println!(
        "  {} {}: {}{}",
        message.created_at.format("%H:%M").to_string().dimmed(),
        author,
        body,
        status
    );
}

pub fn snapshot(snapshot: &ChatSnapshot) {
    match &snapshot.view {
        View::List => directory(&snapshot.conversations, snapshot.total_unread),
        View::Search => println!("Pick a contact with /new <user> or go /back"),
        View::Chat { conversation_id } => {
            let title = snapshot
                .conversations
                .iter()
                .find(|c| &c.id == conversation_id)
                .map(|c| c.other_user.display_name.clone())
                .unwrap_or_else(|| conversation_id.clone());
            println!("Chat with {}", title.bold());
            if snapshot.active_messages.is_empty() {
                println!("  {}", "no messages yet".dimmed());
            }
            for entry in &snapshot.active_messages {
                message(entry, &snapshot.user_id);
            }
        }
    }
}
