//! SQLite-backed plan store used by the HTTP server.

use std::path::Path;

use chrono::{DateTime, Utc};
use kasmos_core::types::{PlanEntry, PlanStatus, TopicEntry};
use kasmos_store::{PlanStore, StoreError};
use rusqlite::{params, Connection, OptionalExtension};

/// Server-side store. Concurrency control is SQLite's own locking; no
/// advisory file lock is taken here.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

fn sql_err(err: rusqlite::Error) -> StoreError {
    StoreError::Backend {
        message: err.to_string(),
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StoreError::Backend {
            message: format!("invalid timestamp {raw:?}: {err}"),
        })
}

fn parse_status(raw: &str) -> Result<PlanStatus, StoreError> {
    raw.parse::<PlanStatus>().map_err(|err| StoreError::Backend {
        message: err.to_string(),
    })
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(sql_err)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn
            .execute_batch(
                r#"
CREATE TABLE IF NOT EXISTS plans (
    project TEXT NOT NULL,
    filename TEXT NOT NULL,
    status TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    branch TEXT NOT NULL DEFAULT '',
    topic TEXT,
    created_at TEXT NOT NULL,
    content TEXT,
    PRIMARY KEY (project, filename)
);

CREATE INDEX IF NOT EXISTS idx_plans_status ON plans(project, status);
CREATE INDEX IF NOT EXISTS idx_plans_topic ON plans(project, topic);

CREATE TABLE IF NOT EXISTS topics (
    project TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    PRIMARY KEY (project, name)
);
"#,
            )
            .map_err(sql_err)
    }

    fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawPlanRow> {
        Ok(RawPlanRow {
            filename: row.get(0)?,
            status: row.get(1)?,
            description: row.get(2)?,
            branch: row.get(3)?,
            topic: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn select_plans(
        &self,
        project: &str,
        where_clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<PlanEntry>, StoreError> {
        let sql = format!(
            "SELECT filename, status, description, branch, topic, created_at \
             FROM plans WHERE project = ?1{where_clause} ORDER BY filename ASC"
        );
        let mut stmt = self.conn.prepare(&sql).map_err(sql_err)?;

        let mut bound: Vec<&dyn rusqlite::ToSql> = vec![&project];
        bound.extend_from_slice(params);

        let rows = stmt
            .query_map(&bound[..], Self::row_to_entry)
            .map_err(sql_err)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(sql_err)?.into_entry()?);
        }
        Ok(entries)
    }
}

struct RawPlanRow {
    filename: String,
    status: String,
    description: String,
    branch: String,
    topic: Option<String>,
    created_at: String,
}

impl RawPlanRow {
    fn into_entry(self) -> Result<PlanEntry, StoreError> {
        Ok(PlanEntry {
            filename: self.filename,
            status: parse_status(&self.status)?,
            description: self.description,
            branch: self.branch,
            topic: self.topic,
            created_at: parse_timestamp(&self.created_at)?,
            content: None,
        })
    }
}

impl PlanStore for SqliteStore {
    fn create(&self, project: &str, entry: PlanEntry) -> Result<(), StoreError> {
        let result = self.conn.execute(
            r#"
INSERT INTO plans (project, filename, status, description, branch, topic, created_at, content)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
"#,
            params![
                project,
                entry.filename,
                entry.status.as_str(),
                entry.description,
                entry.branch,
                entry.topic,
                entry.created_at.to_rfc3339(),
                entry.content,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(err) if is_constraint_violation(&err) => {
                Err(StoreError::plan_exists(&entry.filename))
            }
            Err(err) => Err(sql_err(err)),
        }
    }

    fn get(&self, project: &str, filename: &str) -> Result<PlanEntry, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT filename, status, description, branch, topic, created_at \
                 FROM plans WHERE project = ?1 AND filename = ?2",
                params![project, filename],
                Self::row_to_entry,
            )
            .optional()
            .map_err(sql_err)?;

        match row {
            Some(raw) => raw.into_entry(),
            None => Err(StoreError::plan_not_found(filename)),
        }
    }

    fn update(&self, project: &str, filename: &str, entry: PlanEntry) -> Result<(), StoreError> {
        let updated = self
            .conn
            .execute(
                r#"
UPDATE plans
SET status = ?3, description = ?4, branch = ?5, topic = ?6, created_at = ?7
WHERE project = ?1 AND filename = ?2
"#,
                params![
                    project,
                    filename,
                    entry.status.as_str(),
                    entry.description,
                    entry.branch,
                    entry.topic,
                    entry.created_at.to_rfc3339(),
                ],
            )
            .map_err(sql_err)?;

        if updated == 0 {
            return Err(StoreError::plan_not_found(filename));
        }
        if let Some(content) = entry.content {
            self.set_content(project, filename, &content)?;
        }
        Ok(())
    }

    fn rename(&self, project: &str, old: &str, new: &str) -> Result<(), StoreError> {
        let result = self.conn.execute(
            "UPDATE plans SET filename = ?3 WHERE project = ?1 AND filename = ?2",
            params![project, old, new],
        );
        match result {
            Ok(0) => Err(StoreError::plan_not_found(old)),
            Ok(_) => Ok(()),
            Err(err) if is_constraint_violation(&err) => Err(StoreError::plan_exists(new)),
            Err(err) => Err(sql_err(err)),
        }
    }

    fn list(&self, project: &str) -> Result<Vec<PlanEntry>, StoreError> {
        self.select_plans(project, "", &[])
    }

    fn list_by_status(
        &self,
        project: &str,
        statuses: &[PlanStatus],
    ) -> Result<Vec<PlanEntry>, StoreError> {
        let mut entries = self.list(project)?;
        entries.retain(|entry| statuses.contains(&entry.status));
        Ok(entries)
    }

    fn list_by_topic(&self, project: &str, topic: &str) -> Result<Vec<PlanEntry>, StoreError> {
        self.select_plans(project, " AND topic = ?2", &[&topic])
    }

    fn get_content(&self, project: &str, filename: &str) -> Result<String, StoreError> {
        let content: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT content FROM plans WHERE project = ?1 AND filename = ?2",
                params![project, filename],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err)?;

        match content {
            Some(content) => Ok(content.unwrap_or_default()),
            None => Err(StoreError::plan_not_found(filename)),
        }
    }

    fn set_content(
        &self,
        project: &str,
        filename: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        let updated = self
            .conn
            .execute(
                "UPDATE plans SET content = ?3 WHERE project = ?1 AND filename = ?2",
                params![project, filename, content],
            )
            .map_err(sql_err)?;
        if updated == 0 {
            return Err(StoreError::plan_not_found(filename));
        }
        Ok(())
    }

    fn list_topics(&self, project: &str) -> Result<Vec<TopicEntry>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name, description, created_at FROM topics \
                 WHERE project = ?1 ORDER BY name ASC",
            )
            .map_err(sql_err)?;
        let rows = stmt
            .query_map(params![project], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(sql_err)?;

        let mut topics = Vec::new();
        for row in rows {
            let (name, description, created_at_raw) = row.map_err(sql_err)?;
            topics.push(TopicEntry {
                name,
                description,
                created_at: parse_timestamp(&created_at_raw)?,
            });
        }
        Ok(topics)
    }

    fn create_topic(&self, project: &str, entry: TopicEntry) -> Result<(), StoreError> {
        let result = self.conn.execute(
            "INSERT INTO topics (project, name, description, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                project,
                entry.name,
                entry.description,
                entry.created_at.to_rfc3339()
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(err) if is_constraint_violation(&err) => Err(StoreError::topic_exists(&entry.name)),
            Err(err) => Err(sql_err(err)),
        }
    }

    fn ping(&self) -> Result<(), StoreError> {
        self.conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(sql_err)?;
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
