use sqlx::{query, query_as, sqlite::SqlitePool};

use crate::domain::ClassificationLogEntry;

use super::StorageError;

pub const DEFAULT_CAPACITY: usize = 200;

/// Ring buffer of recent classification attempts, oldest evicted first.
#[derive(Clone)]
pub struct ClassificationLogRepository {
    pool: SqlitePool,
    capacity: usize,
}

impl ClassificationLogRepository {
    pub fn new(pool: SqlitePool, capacity: usize) -> Self {
        Self {
            pool,
            capacity: capacity.max(1),
        }
    }

    pub async fn append(&self, entry: &ClassificationLogEntry) -> Result<(), StorageError> {
        let encoded = serde_json::to_string(entry)?;
        let mut tx = self.pool.begin().await?;
        query(r#"INSERT INTO classification_logs (entry) VALUES (?1)"#)
            .bind(encoded)
            .execute(&mut *tx)
            .await?;
        query(
            r#"DELETE FROM classification_logs WHERE id NOT IN (
                SELECT id FROM classification_logs ORDER BY id DESC LIMIT ?1
            )"#,
        )
        .bind(self.capacity as i64)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn read(&self) -> Result<Vec<ClassificationLogEntry>, StorageError> {
        let rows: Vec<(String,)> =
            query_as(r#"SELECT entry FROM classification_logs ORDER BY id ASC"#)
                .fetch_all(&self.pool)
                .await?;
        let mut entries = Vec::with_capacity(rows.len());
        for (raw,) in rows {
            match serde_json::from_str(&raw) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    tracing::warn!(target: "storage", error = %err, "skipping unreadable log entry");
                }
            }
        }
        Ok(entries)
    }

    pub async fn clear(&self) -> Result<u64, StorageError> {
        let affected = query(r#"DELETE FROM classification_logs"#)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::db::memory_pool;

    fn entry(title: &str) -> ClassificationLogEntry {
        ClassificationLogEntry {
            ts: Utc::now(),
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            title: title.into(),
            url: "https://example.com".into(),
            host: "example.com".into(),
            labels: vec!["Work".into()],
            allow_new_labels: true,
            custom_prompt: String::new(),
            prompt: "prompt".into(),
            response: Some(r#"{"label":"Work"}"#.into()),
            error: None,
        }
    }

    #[tokio::test]
    async fn append_evicts_oldest_beyond_capacity() {
        let logs = ClassificationLogRepository::new(memory_pool().await, 3);
        for i in 0..5 {
            logs.append(&entry(&format!("tab {i}"))).await.unwrap();
        }
        let titles: Vec<String> = logs.read().await.unwrap().into_iter().map(|e| e.title).collect();
        assert_eq!(titles, ["tab 2", "tab 3", "tab 4"]);
    }

    #[tokio::test]
    async fn clear_empties_the_store() {
        let logs = ClassificationLogRepository::new(memory_pool().await, DEFAULT_CAPACITY);
        logs.append(&entry("a")).await.unwrap();
        logs.append(&entry("b")).await.unwrap();
        assert_eq!(logs.clear().await.unwrap(), 2);
        assert!(logs.read().await.unwrap().is_empty());
    }
}
