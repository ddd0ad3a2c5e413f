//! Publish Progress
//!
//! 发布进度事件，通过注入的 [`ProgressSink`] 推送给调用方

use super::{PlatformType, PublishStage};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 进度事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishProgressEvent {
    pub request_id: String,
    pub account_id: String,
    pub platform: PlatformType,
    pub stage: PublishStage,
    pub message: String,
    /// 0-100
    pub progress: i32,
    /// 毫秒时间戳
    pub timestamp: i64,
}

/// Observability port
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: &PublishProgressEvent);
}

/// 默认实现：写入 tracing 日志
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_progress(&self, event: &PublishProgressEvent) {
        if event.stage == PublishStage::Error {
            tracing::warn!(
                "[Progress] request_id={}, account={}, platform={}, stage={}, message={}",
                event.request_id,
                event.account_id,
                event.platform,
                event.stage,
                event.message
            );
        } else {
            tracing::info!(
                "[Progress] request_id={}, stage={}, progress={}%, message={}",
                event.request_id,
                event.stage,
                event.progress,
                event.message
            );
        }
    }
}

/// 进度事件发送器，绑定到一次发布请求
#[derive(Clone)]
pub struct ProgressEmitter {
    sink: Arc<dyn ProgressSink>,
    request_id: String,
    account_id: String,
    platform: PlatformType,
}

impl ProgressEmitter {
    pub fn new(
        sink: Arc<dyn ProgressSink>,
        request_id: impl Into<String>,
        account_id: impl Into<String>,
        platform: PlatformType,
    ) -> Self {
        Self {
            sink,
            request_id: request_id.into(),
            account_id: account_id.into(),
            platform,
        }
    }

    /// 发送进度事件，进度取阶段默认值
    pub fn emit(&self, stage: PublishStage, message: impl Into<String>) {
        self.emit_with_progress(stage, stage.progress(), message);
    }

    pub fn emit_with_progress(&self, stage: PublishStage, progress: i32, message: impl Into<String>) {
        let event = PublishProgressEvent {
            request_id: self.request_id.clone(),
            account_id: self.account_id.clone(),
            platform: self.platform,
            stage,
            message: message.into(),
            progress: progress.clamp(0, 100),
            timestamp: Utc::now().timestamp_millis(),
        };
        self.sink.on_progress(&event);
    }

    /// 便捷方法：发送开始事件
    pub fn emit_starting(&self) {
        self.emit(PublishStage::SessionPending, "开始发布");
    }

    /// 便捷方法：发送完成事件
    pub fn emit_completed(&self, message: &str) {
        self.emit(PublishStage::Confirmed, message);
    }

    /// 便捷方法：发送失败事件
    pub fn emit_failed(&self, failed_at: PublishStage, error: &str) {
        self.emit_with_progress(
            PublishStage::Error,
            failed_at.progress(),
            format!("{}阶段失败: {}", failed_at, error),
        );
    }
}
