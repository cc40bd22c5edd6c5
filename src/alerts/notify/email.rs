use async_trait::async_trait;
use tracing::info;

use crate::alerts::notify::NotificationChannel;
use crate::error::Result;

/// Stub email sender: logs what a mail integration would deliver.
pub struct EmailChannel {
    name: String,
    recipient: String,
}

impl EmailChannel {
    pub fn new(name: &str, recipient: &str) -> Self {
        EmailChannel {
            name: name.to_string(),
            recipient: recipient.to_string(),
        }
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &str) -> Result<()> {
        info!(recipient = %self.recipient, message, "email alert (stub)");
        Ok(())
    }
}
