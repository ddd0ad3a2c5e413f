// Core module - data model shared by the engine and the adapters
// 核心模块 - 发布引擎与平台适配器共享的数据模型

mod config;
mod error;
mod publish_progress;

pub use config::{EngineConfig, PollSettings};
pub use error::{
    AdapterError, BindingError, EngineError, PublishError, SessionError, StorageError, UploadError,
};
pub use publish_progress::{ProgressEmitter, ProgressSink, PublishProgressEvent, TracingProgressSink};

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

/// Platform type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlatformType {
    Douyin,
    Kuaishou,
    Tencent,
    Xiaohongshu,
    Toutiao,
    Bilibili,
}

impl PlatformType {
    /// Get platform display name
    pub fn display_name(&self) -> String {
        match self {
            PlatformType::Douyin => "抖音",
            PlatformType::Kuaishou => "快手",
            PlatformType::Tencent => "视频号",
            PlatformType::Xiaohongshu => "小红书",
            PlatformType::Toutiao => "头条",
            PlatformType::Bilibili => "B站",
        }
        .to_string()
    }

    /// 存储用的稳定标识
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformType::Douyin => "douyin",
            PlatformType::Kuaishou => "kuaishou",
            PlatformType::Tencent => "tencent",
            PlatformType::Xiaohongshu => "xiaohongshu",
            PlatformType::Toutiao => "toutiao",
            PlatformType::Bilibili => "bilibili",
        }
    }

    /// Get platform type from string
    pub fn from_name(s: &str) -> Option<PlatformType> {
        match s.to_lowercase().as_str() {
            "douyin" => Some(PlatformType::Douyin),
            "kuaishou" | "ks" => Some(PlatformType::Kuaishou),
            "tencent" | "weixin" | "channels" => Some(PlatformType::Tencent),
            "xiaohongshu" | "xhs" => Some(PlatformType::Xiaohongshu),
            "toutiao" => Some(PlatformType::Toutiao),
            "bilibili" | "bili" => Some(PlatformType::Bilibili),
            _ => None,
        }
    }
}

impl fmt::Display for PlatformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 登录后提取的账号身份信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountIdentity {
    pub user_id: String,
    pub nickname: String,
}

/// Session snapshot
///
/// 已登录浏览器状态的持久化快照，按 (平台, 账号) 唯一。
/// `state` 对引擎是不透明的，编码方式由适配器决定（例如 storage-state JSON）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub account_id: String,
    pub platform: PlatformType,
    pub state: String,
    pub identity: Option<AccountIdentity>,
    pub captured_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn new(platform: PlatformType, account_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            platform,
            state: state.into(),
            identity: None,
            captured_at: Utc::now(),
        }
    }

    pub fn with_identity(mut self, identity: AccountIdentity) -> Self {
        self.identity = Some(identity);
        self
    }
}

/// 推广任务绑定参数
///
/// 描述视频需要挂载的推广任务（短剧/活动）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskBindingSpec {
    /// 搜索用的任务名称
    pub search_name: String,
    /// 匹配用的展示名称，为空时使用 search_name
    pub display_name: String,
    /// 是否要求名称完全一致
    pub exact_match: bool,
    /// 剧场/客户标签过滤
    pub sub_tag_filter: Option<String>,
    /// 集数过滤
    pub required_episode_count: Option<u32>,
    /// 未找到任务时是否自动去任务市场接单
    pub auto_acquire: bool,
    /// 绑定成功后是否把任务的硬性要求加到标题前
    pub apply_requirements: bool,
}

impl TaskBindingSpec {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            search_name: name.clone(),
            display_name: name,
            apply_requirements: true,
            ..Default::default()
        }
    }

    pub fn exact(mut self) -> Self {
        self.exact_match = true;
        self
    }

    pub fn with_auto_acquire(mut self, enabled: bool) -> Self {
        self.auto_acquire = enabled;
        self
    }

    /// 搜索关键字
    pub fn search_term(&self) -> &str {
        if self.search_name.trim().is_empty() {
            self.display_name.trim()
        } else {
            self.search_name.trim()
        }
    }

    /// 名称匹配使用的标题
    pub fn match_title(&self) -> &str {
        if self.display_name.trim().is_empty() {
            self.search_name.trim()
        } else {
            self.display_name.trim()
        }
    }
}

/// 合集参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    /// 找不到时是否创建一次
    #[serde(default = "default_true")]
    pub create_if_missing: bool,
}

fn default_true() -> bool {
    true
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            create_if_missing: true,
        }
    }
}

/// 原创/内容声明
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OriginalityDeclaration {
    /// 声明原创
    pub declare_original: bool,
    /// 内容声明选项文本，例如 "内容由AI生成"
    pub declaration: Option<String>,
    /// 原创类型
    pub category: Option<String>,
}

impl OriginalityDeclaration {
    /// "不声明" 视为没有声明
    pub fn is_empty(&self) -> bool {
        let no_declaration = match self.declaration.as_deref().map(str::trim) {
            None | Some("") | Some("不声明") => true,
            Some(_) => false,
        };
        no_declaration && !self.declare_original
    }
}

/// Publish request
///
/// 一次发布请求，提交后不再修改。
/// 平台特定数据通过 `extensions` 传递给适配器。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    /// 请求ID（用于日志和发布记录）
    pub request_id: String,
    pub platform: PlatformType,
    /// 账号ID（凭证引用）
    pub account_id: String,
    pub title: String,
    pub tags: Vec<String>,
    pub video_path: PathBuf,
    pub thumbnail_path: Option<PathBuf>,
    /// 定时发布时间（Unix时间戳，秒），None 或 0 表示立即发布
    pub publish_at: Option<i64>,
    pub task_binding: Option<TaskBindingSpec>,
    pub collection: Option<CollectionSpec>,
    pub declaration: Option<OriginalityDeclaration>,
    /// 是否允许下载，None 表示保持平台默认
    pub allow_download: Option<bool>,
    /// 是否显示位置，None 表示保持平台默认
    pub show_location: Option<bool>,
    /// 平台扩展数据
    #[serde(default)]
    pub extensions: Map<String, Value>,
}

impl PublishRequest {
    pub fn new(
        platform: PlatformType,
        account_id: impl Into<String>,
        title: impl Into<String>,
        video_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            platform,
            account_id: account_id.into(),
            title: title.into(),
            tags: Vec::new(),
            video_path: video_path.into(),
            thumbnail_path: None,
            publish_at: None,
            task_binding: None,
            collection: None,
            declaration: None,
            allow_download: None,
            show_location: None,
            extensions: Map::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_thumbnail(mut self, path: impl Into<PathBuf>) -> Self {
        self.thumbnail_path = Some(path.into());
        self
    }

    pub fn with_publish_at(mut self, timestamp: i64) -> Self {
        self.publish_at = Some(timestamp);
        self
    }

    pub fn with_task_binding(mut self, spec: TaskBindingSpec) -> Self {
        self.task_binding = Some(spec);
        self
    }

    pub fn with_collection(mut self, spec: CollectionSpec) -> Self {
        self.collection = Some(spec);
        self
    }

    pub fn with_declaration(mut self, declaration: OriginalityDeclaration) -> Self {
        self.declaration = Some(declaration);
        self
    }

    /// 设置平台扩展数据
    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    /// 从平台扩展数据获取指定字段
    pub fn get_extension<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.extensions
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// 定时发布时间，None/0 返回 None
    pub fn scheduled_time(&self) -> Option<DateTime<Local>> {
        match self.publish_at {
            Some(ts) if ts != 0 => Local.timestamp_opt(ts, 0).single(),
            _ => None,
        }
    }
}

/// 发布状态机的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStage {
    SessionPending,
    Uploading,
    MetadataEditing,
    TaskBinding,
    Scheduling,
    PublishRequested,
    Confirmed,
    Error,
}

impl PublishStage {
    /// 进度百分比（用于进度事件）
    pub fn progress(&self) -> i32 {
        match self {
            PublishStage::SessionPending => 5,
            PublishStage::Uploading => 20,
            PublishStage::MetadataEditing => 50,
            PublishStage::TaskBinding => 65,
            PublishStage::Scheduling => 75,
            PublishStage::PublishRequested => 85,
            PublishStage::Confirmed => 100,
            PublishStage::Error => 0,
        }
    }
}

impl fmt::Display for PublishStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PublishStage::SessionPending => "SessionPending",
            PublishStage::Uploading => "Uploading",
            PublishStage::MetadataEditing => "MetadataEditing",
            PublishStage::TaskBinding => "TaskBinding",
            PublishStage::Scheduling => "Scheduling",
            PublishStage::PublishRequested => "PublishRequested",
            PublishStage::Confirmed => "Confirmed",
            PublishStage::Error => "Error",
        };
        f.write_str(name)
    }
}

/// 失败原因（扁平化，便于序列化和统计）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    InvalidRequest,
    UnsupportedPlatform,
    AccountBusy,
    NoValidSession,
    InteractiveLoginTimeout,
    UploadTimeout,
    UploadRejected,
    MetadataRejected,
    TaskNotFound,
    TaskAmbiguous,
    BindingClickFailed,
    InvalidSchedule,
    PublishTimeout,
    ContentRejected,
    AdapterFatal,
    Storage,
}

/// Publication result
///
/// 每个请求唯一的终态结果，`message` 总是有值
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub request_id: String,
    pub success: bool,
    pub message: String,
    pub reason: Option<FailureReason>,
    /// 结束时所处的阶段
    pub stage: PublishStage,
}

impl PublishOutcome {
    pub fn succeeded(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            success: true,
            message: message.into(),
            reason: None,
            stage: PublishStage::Confirmed,
        }
    }

    pub fn failed(
        request_id: impl Into<String>,
        stage: PublishStage,
        reason: FailureReason,
        message: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            success: false,
            message: message.into(),
            reason: Some(reason),
            stage,
        }
    }
}
