// ABOUTME: Prompt formatting and reply cleanup used by the router.
// ABOUTME: Wraps inbound messages in escaped XML and strips internal reasoning from replies.

use crate::traits::InboundMessage;
use regex::Regex;
use std::sync::LazyLock;

static INTERNAL_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<internal>.*?</internal>").expect("internal block regex is valid")
});

/// Escape text for use inside XML content or a double-quoted attribute
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render messages as the worker prompt
pub fn format_messages(messages: &[InboundMessage]) -> String {
    let mut out = String::from("<messages>\n");
    for msg in messages {
        out.push_str(&format!(
            "<message sender=\"{}\" time=\"{}\">{}</message>\n",
            escape_xml(&msg.sender_name),
            msg.timestamp.to_rfc3339(),
            escape_xml(&msg.content)
        ));
    }
    out.push_str("</messages>");
    out
}

/// Remove `<internal>...</internal>` spans and surrounding whitespace
pub fn strip_internal(text: &str) -> String {
    INTERNAL_BLOCK.replace_all(text, "").trim().to_string()
}

/// Matches a trigger word at the start of a message
#[derive(Debug, Clone)]
pub struct TriggerPattern {
    regex: Option<Regex>,
}

impl TriggerPattern {
    /// Case-insensitive match of `trigger` at the start, ending on a word boundary
    pub fn new(trigger: &str) -> Self {
        let pattern = format!(r"(?i)^\s*{}\b", regex::escape(trigger.trim()));
        Self {
            regex: Regex::new(&pattern).ok(),
        }
    }

    /// Default trigger for an assistant name, e.g. `@Andy`
    pub fn for_assistant(name: &str) -> Self {
        Self::new(&format!("@{}", name.trim_start_matches('@')))
    }

    pub fn matches(&self, content: &str) -> bool {
        self.regex.as_ref().is_some_and(|re| re.is_match(content))
    }
}
