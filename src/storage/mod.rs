// Storage module - session snapshots and publication records
// 存储模块 - 会话快照与发布记录

use crate::core::{
    AccountIdentity, FailureReason, PlatformType, PublishOutcome, PublishRequest, PublishStage,
    SessionSnapshot, StorageError,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// 会话快照存储，按 (平台, 账号) 分区
pub trait SessionStore: Send + Sync {
    fn load(&self, platform: PlatformType, account_id: &str) -> Result<Option<SessionSnapshot>, StorageError>;

    /// 覆盖保存
    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), StorageError>;

    /// 返回是否删除了记录
    fn remove(&self, platform: PlatformType, account_id: &str) -> Result<bool, StorageError>;
}

/// 一次发布的记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicationRecord {
    pub request_id: String,
    pub platform: PlatformType,
    pub account_id: String,
    pub title: String,
    pub video_path: String,
    pub success: bool,
    pub reason: Option<FailureReason>,
    pub stage: PublishStage,
    pub message: String,
    pub finished_at: DateTime<Utc>,
}

impl PublicationRecord {
    pub fn from_outcome(request: &PublishRequest, outcome: &PublishOutcome) -> Self {
        Self {
            request_id: outcome.request_id.clone(),
            platform: request.platform,
            account_id: request.account_id.clone(),
            title: request.title.clone(),
            video_path: request.video_path.display().to_string(),
            success: outcome.success,
            reason: outcome.reason,
            stage: outcome.stage,
            message: outcome.message.clone(),
            finished_at: Utc::now(),
        }
    }
}

/// 发布记录
pub trait PublicationLog: Send + Sync {
    fn record_publication(&self, record: &PublicationRecord) -> Result<(), StorageError>;
}

/// Database manager for SQLite operations
/// 数据库管理器
#[derive(Clone, Debug)]
pub struct DatabaseManager {
    /// Base path for database files
    pub base_path: PathBuf,
}

impl DatabaseManager {
    /// Create a new database manager
    /// 创建新的数据库管理器
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    /// Get database path
    /// 获取数据库路径
    fn get_db_path(&self) -> PathBuf {
        self.base_path.join("matrix.db")
    }

    /// Get or create connection
    /// 获取或创建数据库连接
    fn get_connection(&self) -> Result<Connection, StorageError> {
        let db_path = self.get_db_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&db_path)?;
        self.initialize_schema(&conn)?;
        Ok(conn)
    }

    /// Initialize database schema
    /// 初始化数据库模式
    fn initialize_schema(&self, conn: &Connection) -> Result<(), StorageError> {
        // Sessions table - 每个 (平台, 账号) 一条当前快照
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                platform TEXT NOT NULL,
                account_id TEXT NOT NULL,
                state TEXT NOT NULL,
                identity TEXT,
                captured_at TEXT NOT NULL,
                PRIMARY KEY (platform, account_id)
            )
        "#,
            [],
        )?;

        // Publications table - 发布记录
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS publications (
                request_id TEXT PRIMARY KEY,
                platform TEXT NOT NULL,
                account_id TEXT NOT NULL,
                title TEXT NOT NULL,
                video_path TEXT NOT NULL,
                success INTEGER NOT NULL,
                reason TEXT,
                stage TEXT NOT NULL,
                message TEXT NOT NULL,
                finished_at TEXT NOT NULL
            )
        "#,
            [],
        )?;

        Ok(())
    }

    // ============================================================================
    // 发布记录
    // ============================================================================

    /// Get publication records of an account, newest first
    /// 获取账号的发布记录
    pub fn get_publications_by_account(
        &self,
        platform: PlatformType,
        account_id: &str,
    ) -> Result<Vec<PublicationRecord>, StorageError> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT request_id, platform, account_id, title, video_path, success, reason, stage, message, finished_at
            FROM publications WHERE platform = ? AND account_id = ?
            ORDER BY finished_at DESC
        "#,
        )?;

        let rows = stmt.query_map(params![platform.as_str(), account_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, bool>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (request_id, platform, account_id, title, video_path, success, reason, stage, message, finished_at) =
                row?;
            records.push(PublicationRecord {
                request_id,
                platform: Self::parse_platform(&platform)?,
                account_id,
                title,
                video_path,
                success,
                reason: reason.map(|r| serde_json::from_str(&r)).transpose()?,
                stage: serde_json::from_str(&stage)?,
                message,
                finished_at: Self::parse_time(&finished_at)?,
            });
        }
        Ok(records)
    }

    // ============================================================================
    // 辅助函数
    // ============================================================================

    fn parse_platform(s: &str) -> Result<PlatformType, StorageError> {
        PlatformType::from_name(s).ok_or_else(|| {
            StorageError::Database(rusqlite::Error::InvalidColumnType(
                1,
                format!("platform: {}", s),
                rusqlite::types::Type::Text,
            ))
        })
    }

    fn parse_time(s: &str) -> Result<DateTime<Utc>, StorageError> {
        Ok(serde_json::from_value(serde_json::Value::String(s.to_string()))?)
    }
}

impl SessionStore for DatabaseManager {
    fn load(&self, platform: PlatformType, account_id: &str) -> Result<Option<SessionSnapshot>, StorageError> {
        let conn = self.get_connection()?;
        let row = conn
            .query_row(
                "SELECT state, identity, captured_at FROM sessions WHERE platform = ? AND account_id = ?",
                params![platform.as_str(), account_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((state, identity, captured_at)) = row else {
            return Ok(None);
        };
        let identity: Option<AccountIdentity> = identity.map(|i| serde_json::from_str(&i)).transpose()?;
        Ok(Some(SessionSnapshot {
            account_id: account_id.to_string(),
            platform,
            state,
            identity,
            captured_at: Self::parse_time(&captured_at)?,
        }))
    }

    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), StorageError> {
        let conn = self.get_connection()?;
        let identity = snapshot.identity.as_ref().map(serde_json::to_string).transpose()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO sessions (platform, account_id, state, identity, captured_at)
            VALUES (?, ?, ?, ?, ?)
        "#,
            params![
                snapshot.platform.as_str(),
                snapshot.account_id,
                snapshot.state,
                identity,
                snapshot.captured_at.to_rfc3339(),
            ],
        )?;
        tracing::debug!(
            "[Storage] 保存会话快照: platform={}, account={}",
            snapshot.platform,
            snapshot.account_id
        );
        Ok(())
    }

    fn remove(&self, platform: PlatformType, account_id: &str) -> Result<bool, StorageError> {
        let conn = self.get_connection()?;
        let affected = conn.execute(
            "DELETE FROM sessions WHERE platform = ? AND account_id = ?",
            params![platform.as_str(), account_id],
        )?;
        Ok(affected > 0)
    }
}

impl PublicationLog for DatabaseManager {
    fn record_publication(&self, record: &PublicationRecord) -> Result<(), StorageError> {
        let conn = self.get_connection()?;
        let reason = record.reason.map(|r| serde_json::to_string(&r)).transpose()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO publications (
                request_id, platform, account_id, title, video_path, success, reason, stage, message, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
            params![
                record.request_id,
                record.platform.as_str(),
                record.account_id,
                record.title,
                record.video_path,
                record.success,
                reason,
                serde_json::to_string(&record.stage)?,
                record.message,
                record.finished_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

/// 内存会话存储
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<(PlatformType, String), SessionSnapshot>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, platform: PlatformType, account_id: &str) -> Result<Option<SessionSnapshot>, StorageError> {
        let sessions = self.sessions.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(sessions.get(&(platform, account_id.to_string())).cloned())
    }

    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), StorageError> {
        let mut sessions = self.sessions.lock().map_err(|_| StorageError::Poisoned)?;
        sessions.insert((snapshot.platform, snapshot.account_id.clone()), snapshot.clone());
        Ok(())
    }

    fn remove(&self, platform: PlatformType, account_id: &str) -> Result<bool, StorageError> {
        let mut sessions = self.sessions.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(sessions.remove(&(platform, account_id.to_string())).is_some())
    }
}
