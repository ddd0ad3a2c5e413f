//! 错误类型
//!
//! 适配器只返回 [`AdapterError`]，由引擎在各调用点归类为会话/上传/任务/发布错误。
//! 无法归类的错误一律视为 `AdapterFatal`。

use super::FailureReason;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a platform adapter
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// 浏览器/页面/上下文已关闭
    #[error("Browser context closed: {0}")]
    ContextClosed(String),

    /// 平台拒绝内容（违规等），属于业务结果
    #[error("Content rejected: {0}")]
    ContentRejected(String),

    /// 页面上没有这个功能
    #[error("Feature unavailable: {0}")]
    Unavailable(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Adapter error: {0}")]
    Other(String),
}

impl AdapterError {
    pub fn is_context_closed(&self) -> bool {
        matches!(self, AdapterError::ContextClosed(_))
    }
}

/// Session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No valid session for account {account_id}")]
    NoValidSession { account_id: String },

    #[error("Interactive login timed out after {waited:?} for account {account_id}")]
    InteractiveLoginTimeout { account_id: String, waited: Duration },

    #[error("Session adapter failure: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Session storage failure: {0}")]
    Storage(#[from] StorageError),
}

/// Upload errors
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Upload did not finish within {0:?}")]
    UploadTimeout(Duration),

    #[error("Upload rejected: {0}")]
    UploadRejected(String),
}

/// Task binding errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindingError {
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task ambiguous: {0}")]
    TaskAmbiguous(String),

    #[error("Task selection failed: {0}")]
    BindingClickFailed(String),
}

/// Publish confirmation errors
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Publish not confirmed within {0:?}")]
    PublishTimeout(Duration),

    #[error("Content rejected: {0}")]
    ContentRejected(String),
}

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Engine errors - everything a publish can end with
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Account busy: {0}")]
    AccountBusy(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("Metadata step '{step}' failed: {reason}")]
    Metadata { step: &'static str, reason: String },

    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("Adapter fatal: {message}")]
    AdapterFatal { message: String, context_closed: bool },
}

impl From<AdapterError> for EngineError {
    /// 默认归类：违规内容是业务结果，其余全部 fail closed
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::ContentRejected(msg) => {
                EngineError::Publish(PublishError::ContentRejected(msg))
            }
            other => EngineError::AdapterFatal {
                context_closed: other.is_context_closed(),
                message: other.to_string(),
            },
        }
    }
}

impl EngineError {
    pub fn reason(&self) -> FailureReason {
        match self {
            EngineError::InvalidRequest(_) => FailureReason::InvalidRequest,
            EngineError::UnsupportedPlatform(_) => FailureReason::UnsupportedPlatform,
            EngineError::AccountBusy(_) => FailureReason::AccountBusy,
            EngineError::Session(e) => match e {
                SessionError::NoValidSession { .. } => FailureReason::NoValidSession,
                SessionError::InteractiveLoginTimeout { .. } => {
                    FailureReason::InteractiveLoginTimeout
                }
                SessionError::Adapter(_) => FailureReason::AdapterFatal,
                SessionError::Storage(_) => FailureReason::Storage,
            },
            EngineError::Upload(UploadError::UploadTimeout(_)) => FailureReason::UploadTimeout,
            EngineError::Upload(UploadError::UploadRejected(_)) => FailureReason::UploadRejected,
            EngineError::Metadata { .. } => FailureReason::MetadataRejected,
            EngineError::Binding(BindingError::TaskNotFound(_)) => FailureReason::TaskNotFound,
            EngineError::Binding(BindingError::TaskAmbiguous(_)) => FailureReason::TaskAmbiguous,
            EngineError::Binding(BindingError::BindingClickFailed(_)) => {
                FailureReason::BindingClickFailed
            }
            EngineError::InvalidSchedule(_) => FailureReason::InvalidSchedule,
            EngineError::Publish(PublishError::PublishTimeout(_)) => FailureReason::PublishTimeout,
            EngineError::Publish(PublishError::ContentRejected(_)) => {
                FailureReason::ContentRejected
            }
            EngineError::AdapterFatal { .. } => FailureReason::AdapterFatal,
        }
    }

    /// 浏览器上下文是否已不可用（此时不再尝试保存会话）
    pub fn context_lost(&self) -> bool {
        matches!(
            self,
            EngineError::AdapterFatal {
                context_closed: true,
                ..
            } | EngineError::Session(SessionError::Adapter(AdapterError::ContextClosed(_)))
        )
    }
}
