pub mod chat;
pub mod email;

use async_trait::async_trait;

pub use chat::WebhookChatSender;
pub use email::SmtpEmailSender;

#[async_trait]
pub trait ChatSender: Send + Sync {
    /// Posts `text` to the team chat, mentioning `recipients` by handle.
    async fn send_chat_message(&self, text: &str, recipients: &[String]) -> bool;
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, subject: &str, html_body: &str) -> bool;
}
