use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::alerts::notify::NotificationChannel;
use crate::error::Result;

/// Append-only alert log. Writes are serialized by an internal mutex; the
/// parent directory is created and the file opened lazily on first send.
pub struct FileChannel {
    name: String,
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileChannel {
    pub fn new(name: &str, path: impl Into<PathBuf>) -> Self {
        FileChannel {
            name: name.to_string(),
            path: path.into(),
            file: Mutex::new(None),
        }
    }
}

#[async_trait]
impl NotificationChannel for FileChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &str) -> Result<()> {
        let mut guard = self.file.lock().await;
        if guard.is_none() {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            *guard = Some(file);
        }

        if let Some(file) = guard.as_mut() {
            let line = format!("{} {}\n", Utc::now().to_rfc3339(), message);
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_lines_and_creates_directory() {
        let dir = std::env::temp_dir().join(format!("spotflow-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("alerts").join("alerts.log");
        let channel = FileChannel::new("file", &path);

        channel.send("first alert").await.unwrap();
        channel.send("second alert").await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("first alert"));
        assert!(lines[1].ends_with("second alert"));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
