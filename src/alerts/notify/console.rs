use async_trait::async_trait;

use crate::alerts::notify::NotificationChannel;
use crate::error::Result;

/// Writes alerts to standard output.
pub struct ConsoleChannel {
    name: String,
}

impl ConsoleChannel {
    pub fn new(name: &str) -> Self {
        ConsoleChannel {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl NotificationChannel for ConsoleChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &str) -> Result<()> {
        println!("[ALERT] {}", message);
        Ok(())
    }
}
