//! Observation channels stored as JSON lines.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use super::{file_component, memory_bank_root, session_dir};
use crate::domain::errors::DomainResult;
use crate::domain::models::{Observation, SessionScope};
use crate::domain::ports::ObservationStore;

#[derive(Debug)]
pub struct JsonlObservationStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlObservationStore {
    pub fn new(data_root: impl AsRef<Path>) -> Self {
        Self {
            root: memory_bank_root(data_root.as_ref()),
            write_lock: Mutex::new(()),
        }
    }

    fn channel_path(&self, scope: &SessionScope, channel: &str) -> DomainResult<PathBuf> {
        Ok(session_dir(&self.root, scope)?
            .join("observations")
            .join(format!("{}.log", file_component(channel)?)))
    }
}

#[async_trait]
impl ObservationStore for JsonlObservationStore {
    async fn record(&self, scope: &SessionScope, channel: &str, text: &str) -> DomainResult<()> {
        let path = self.channel_path(scope, channel)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(&Observation::new(text))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read(&self, scope: &SessionScope, channel: &str) -> DomainResult<Vec<Observation>> {
        let path = self.channel_path(scope, channel)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(observation) => Some(observation),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping malformed observation");
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::BROADCAST_CHANNEL;

    #[tokio::test]
    async fn test_observations_append_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlObservationStore::new(dir.path());
        let scope = SessionScope::new("session-1", Path::new("/work/app"));

        store.record(&scope, BROADCAST_CHANNEL, "first").await.unwrap();
        store.record(&scope, BROADCAST_CHANNEL, "second").await.unwrap();
        store.record(&scope, "scenario-1-1", "private").await.unwrap();

        let broadcast = store.read(&scope, BROADCAST_CHANNEL).await.unwrap();
        let texts: Vec<&str> = broadcast.iter().map(|o| o.observation.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert_eq!(store.read(&scope, "scenario-1-1").await.unwrap().len(), 1);
        assert!(store.read(&scope, "scenario-1-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_channel_names_cannot_escape() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlObservationStore::new(dir.path());
        let scope = SessionScope::new("session-1", Path::new("/work/app"));
        assert!(store.record(&scope, "../escape", "x").await.is_err());
    }
}
