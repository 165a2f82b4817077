// ABOUTME: Helpers for addressing Telegram chats and fitting text into Bot API limits
// ABOUTME: Chat ids are namespaced as "tg:<id>"; long replies are chunked at line breaks

use anyhow::{Context, Result};
use teloxide::types::ChatId;

/// Maximum message length for Telegram Bot API
pub const MAX_MESSAGE_LENGTH: usize = 4096;

/// Prefix marking a chat id as belonging to Telegram
pub const CHAT_PREFIX: &str = "tg:";

pub fn format_chat_id(chat: ChatId) -> String {
    format!("{}{}", CHAT_PREFIX, chat.0)
}

/// Parse a "tg:<id>" destination into a Telegram chat id
pub fn parse_chat_id(destination: &str) -> Result<ChatId> {
    let raw = destination
        .strip_prefix(CHAT_PREFIX)
        .with_context(|| format!("Not a Telegram chat id: {}", destination))?;
    let id = raw
        .parse::<i64>()
        .with_context(|| format!("Invalid Telegram chat ID: {}", destination))?;
    Ok(ChatId(id))
}

/// Split text into chunks at line boundaries, falling back to character boundaries
pub fn chunk_text(text: &str, max_len: usize) -> Vec<&str> {
    if text.len() <= max_len {
        return vec![text];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining);
            break;
        }

        let mut limit = max_len;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }
        // A single char wider than max_len still has to go somewhere
        if limit == 0 {
            limit = remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len());
        }

        let split_at = remaining[..limit]
            .rfind('\n')
            .map(|pos| pos + 1)
            .unwrap_or(limit);

        chunks.push(&remaining[..split_at]);
        remaining = &remaining[split_at..];
    }

    chunks
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_text_short() {
        let chunks = chunk_text("hello", 4096);
        assert_eq!(chunks, vec!["hello"]);
    }

    #[test]
    fn test_chunk_text_exact_limit() {
        let text = "a".repeat(4096);
        let chunks = chunk_text(&text, 4096);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_chunk_text_splits_at_newline() {
        let line1 = "a".repeat(2000);
        let line2 = "b".repeat(2000);
        let line3 = "c".repeat(2000);
        let text = format!("{}\n{}\n{}", line1, line2, line3);
        let chunks = chunk_text(&text, 4096);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].ends_with('\n'));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_chunk_text_no_newlines() {
        let text = "a".repeat(5000);
        let chunks = chunk_text(&text, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[1].len(), 904);
    }

    #[test]
    fn test_chunk_text_respects_char_boundaries() {
        // 3-byte chars never line up with a limit of 4
        let text = "€€€€€";
        let chunks = chunk_text(text, 4);
        assert!(chunks.iter().all(|c| c.chars().count() == 1));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_chunk_text_empty() {
        let chunks = chunk_text("", 4096);
        assert_eq!(chunks, vec![""]);
    }

    #[test]
    fn test_chat_id_round_trip() {
        let id = format_chat_id(ChatId(-100123456789));
        assert_eq!(id, "tg:-100123456789");
        assert_eq!(parse_chat_id(&id).unwrap(), ChatId(-100123456789));
    }

    #[test]
    fn test_parse_chat_id_rejects_foreign_ids() {
        assert!(parse_chat_id("console").is_err());
        assert!(parse_chat_id("tg:abc").is_err());
    }
}
