use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::config::ChannelConfig;
use crate::error::{Error, Result};

pub mod console;
pub mod email;
pub mod file;

pub use console::ConsoleChannel;
pub use email::EmailChannel;
pub use file::FileChannel;

/// A destination for alert messages.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, message: &str) -> Result<()>;
}

/// Instantiate the enabled channels from configuration. An unknown channel
/// type is a construction-time error.
pub fn build_channels(configs: &[ChannelConfig]) -> Result<Vec<Arc<dyn NotificationChannel>>> {
    let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();
    for cfg in configs.iter().filter(|c| c.enabled) {
        match cfg.channel_type.as_str() {
            "console" => channels.push(Arc::new(ConsoleChannel::new(&cfg.name))),
            "file" => {
                let path = cfg
                    .settings
                    .get("path")
                    .map(String::as_str)
                    .unwrap_or("alerts/alerts.log");
                channels.push(Arc::new(FileChannel::new(&cfg.name, path)));
            }
            "email" => {
                let recipient = cfg
                    .settings
                    .get("recipient")
                    .map(String::as_str)
                    .unwrap_or("ops@localhost");
                channels.push(Arc::new(EmailChannel::new(&cfg.name, recipient)));
            }
            other => return Err(Error::UnknownChannelType(other.to_string())),
        }
    }
    Ok(channels)
}

/// Fans one message out to every channel concurrently, bounded by the
/// configured notification parallelism. Channel failures are logged and do
/// not affect the other channels.
pub struct Notifier {
    channels: Vec<Arc<dyn NotificationChannel>>,
    permits: Arc<Semaphore>,
}

impl Notifier {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>, max_concurrent: usize) -> Self {
        Notifier {
            channels,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub async fn broadcast(&self, message: &str) {
        let mut tasks = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            let channel = channel.clone();
            let permits = self.permits.clone();
            let message = message.to_string();
            tasks.push(tokio::spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                if let Err(e) = channel.send(&message).await {
                    warn!(channel = channel.name(), error = %e, "notification send failed");
                }
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
    }
}
