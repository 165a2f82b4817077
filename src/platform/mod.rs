// ABOUTME: Transport implementations for courier
// ABOUTME: Console is always available; Telegram is behind the `telegram` feature

pub mod console;
#[cfg(feature = "telegram")]
pub mod telegram;

pub use console::{ConsoleTransport, CONSOLE_CHAT_ID};
#[cfg(feature = "telegram")]
pub use telegram::TelegramTransport;
