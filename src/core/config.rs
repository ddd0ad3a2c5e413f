//! 引擎配置
//!
//! 所有等待点的轮询间隔和截止时间都在这里，构造引擎时显式传入。

use super::StorageError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

/// 一个等待点的轮询参数
///
/// 通过 [`EngineConfig::from_json_str`] 加载时可以只写其中一个字段，
/// 缺省的字段取该等待点自己的默认值。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollSettings {
    pub interval_ms: u64,
    pub deadline_secs: u64,
}

impl PollSettings {
    pub const fn new(interval_ms: u64, deadline_secs: u64) -> Self {
        Self {
            interval_ms,
            deadline_secs,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// 登录状态检测
    pub session_probe: PollSettings,
    /// 扫码登录，等待跳出登录页
    pub interactive_login: PollSettings,
    /// 视频上传完成
    pub upload: PollSettings,
    /// 活动/任务搜索结果
    pub task_search: PollSettings,
    /// 任务市场搜索结果
    pub market_search: PollSettings,
    /// 合集列表
    pub collection_search: PollSettings,
    /// 发布后跳转到作品管理页
    pub publish_confirm: PollSettings,
    /// 页面稳定等待（毫秒）
    pub ui_settle_ms: u64,
    /// 单次适配器调用超时（秒）
    pub action_timeout_secs: u64,
    /// 上传失败后最多重新提交次数
    pub max_upload_resubmits: u32,
    /// 会话失效时是否允许打开浏览器扫码登录
    pub allow_interactive_login: bool,
    /// 表示"不参与活动"的候选项名称
    pub no_task_sentinels: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_probe: PollSettings::new(500, 10),
            interactive_login: PollSettings::new(500, 1200),
            upload: PollSettings::new(2000, 1800),
            task_search: PollSettings::new(500, 5),
            market_search: PollSettings::new(500, 20),
            collection_search: PollSettings::new(500, 5),
            publish_confirm: PollSettings::new(500, 120),
            ui_settle_ms: 1000,
            action_timeout_secs: 60,
            max_upload_resubmits: 1,
            allow_interactive_login: false,
            no_task_sentinels: vec!["不参与活动".to_string()],
        }
    }
}

impl EngineConfig {
    /// 从 JSON 加载，缺省字段（包括轮询块内的字段）回退到默认值
    pub fn from_json_str(json: &str) -> Result<Self, StorageError> {
        let overrides: Value = serde_json::from_str(json)?;
        let mut merged = serde_json::to_value(Self::default())?;
        merge_json(&mut merged, overrides);
        Ok(serde_json::from_value(merged)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    pub fn ui_settle(&self) -> Duration {
        Duration::from_millis(self.ui_settle_ms)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }
}

/// 把 `overrides` 逐层合并进 `base`，对象递归合并，其余直接覆盖
fn merge_json(base: &mut Value, overrides: Value) {
    match (base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
