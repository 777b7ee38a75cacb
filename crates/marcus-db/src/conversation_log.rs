use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use serde_json::Value;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::error::Result;

/// Append-only, line-delimited JSON log of every event Marcus records.
///
/// This is the source of truth: the KV store and in-memory registries are
/// derived state and can always be rebuilt by replaying this log in order
/// (spec property P6). Files rotate daily:
/// `logs/conversations/conversations_YYYY-MM-DD.jsonl`.
pub struct ConversationLog {
    dir: PathBuf,
    current: Mutex<Option<(NaiveDate, File)>>,
}

impl ConversationLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: Mutex::new(None),
        }
    }

    fn file_name(date: NaiveDate) -> String {
        format!("conversations_{}.jsonl", date.format("%Y-%m-%d"))
    }

    /// Append one JSON record, rotating to a new file if the UTC date has
    /// changed since the last write.
    pub async fn append(&self, record: &Value) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let today = Utc::now().date_naive();

        let mut guard = self.current.lock().await;
        let needs_new = match &*guard {
            Some((date, _)) => *date != today,
            None => true,
        };

        if needs_new {
            let path = self.dir.join(Self::file_name(today));
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            *guard = Some((today, file));
        }

        let (_, file) = guard.as_mut().expect("just populated above");
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    /// Replay every record across every rotated file, in file-name (hence
    /// chronological) order, then in on-disk line order within each file.
    pub async fn replay(&self) -> Result<Vec<Value>> {
        replay_dir(&self.dir).await
    }
}

async fn replay_dir(dir: &Path) -> Result<Vec<Value>> {
    let mut paths = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut records = Vec::new();
    for path in paths {
        let file = File::open(&path).await?;
        let mut lines = BufReader::new(file).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn append_then_replay_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = ConversationLog::new(dir.path());

        log.append(&json!({"seq": 1})).await.unwrap();
        log.append(&json!({"seq": 2})).await.unwrap();
        log.append(&json!({"seq": 3})).await.unwrap();

        let replayed = log.replay().await.unwrap();
        assert_eq!(replayed, vec![json!({"seq": 1}), json!({"seq": 2}), json!({"seq": 3})]);
    }

    #[tokio::test]
    async fn replay_on_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = ConversationLog::new(dir.path().join("does-not-exist"));
        assert_eq!(log.replay().await.unwrap(), Vec::<Value>::new());
    }

    #[tokio::test]
    async fn file_name_uses_date() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        assert_eq!(ConversationLog::file_name(date), "conversations_2026-01-05.jsonl");
    }
}
