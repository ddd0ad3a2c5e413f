//! 平台适配器 traits 定义
//!
//! 每个平台（抖音、快手、视频号、小红书等）实现一个 [`PlatformAdapter`]，
//! 只负责页面层面的操作（选择器、URL、扫码登录）。
//! 流程编排、等待和重试全部由引擎负责，适配器不做循环等待。

use crate::core::{
    AccountIdentity, AdapterError, OriginalityDeclaration, PlatformType, PollSettings,
    SessionSnapshot,
};
use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;

/// 浏览器会话句柄
///
/// 由 `open_session` / `interactive_login` 创建，在 `close_session` 之前有效。
/// 句柄本身不持有浏览器资源，资源由适配器按 `id` 管理。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    pub id: String,
    pub platform: PlatformType,
    pub account_id: String,
}

impl SessionHandle {
    pub fn new(platform: PlatformType, account_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            platform,
            account_id: account_id.into(),
        }
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.platform, self.account_id, &self.id[..8.min(self.id.len())])
    }
}

/// 上传状态
#[derive(Debug, Clone, PartialEq)]
pub enum UploadState {
    Pending,
    Done,
    /// 页面出现上传失败标记，可以重新提交文件
    Errored(String),
}

/// 发布确认状态
#[derive(Debug, Clone, PartialEq)]
pub enum PublishState {
    Pending,
    /// 已跳转到作品管理页
    Done,
    /// 仍在编辑页，发布按钮还在
    StillEditing,
    /// "是否保留此次编辑" 弹窗
    DiscardEditsPrompt,
    /// 平台拒绝（违规、审核不通过等）
    Errored(String),
}

/// 元数据步骤结果
///
/// 适配器返回 `Err` 表示阻断，`Skipped` 表示页面上没有这个功能。
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Applied,
    Skipped(String),
}

impl StepOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        StepOutcome::Skipped(reason.into())
    }
}

/// 平台限制
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformLimits {
    /// 标题最大字符数
    pub title_max_chars: usize,
    /// 话题最大数量
    pub max_tags: usize,
}

impl Default for PlatformLimits {
    fn default() -> Self {
        Self {
            title_max_chars: 30,
            max_tags: 5,
        }
    }
}

/// 任务收益信号
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RewardSignal {
    /// 分成比例，5% 记为 5.0
    Percent(f64),
    /// 固定赏金（元）
    FlatBounty(f64),
}

static REWARD_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)").expect("reward number regex"));

/// 解析页面上的收益文本
///
/// `"5%"` -> `Percent(5.0)`，`"¥1,200"` / `"1200元"` -> `FlatBounty(1200.0)`
pub fn parse_reward_text(text: &str) -> Option<RewardSignal> {
    let compact: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != '，')
        .collect();
    let value: f64 = REWARD_NUMBER
        .captures(&compact)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())?;

    if compact.contains('%') || compact.contains('％') {
        Some(RewardSignal::Percent(value))
    } else {
        Some(RewardSignal::FlatBounty(value))
    }
}

/// 任务候选项（适配器每次现抓，不缓存）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCandidate {
    /// 适配器内部定位用的标识（例如列表下标）
    pub key: String,
    /// 页面上的原始名称
    pub raw_name: String,
    /// 创作者/剧场标签
    pub label: String,
    /// 收益信号
    pub rewards: Vec<RewardSignal>,
    /// 额外信息（集数等）
    pub extra_info: String,
    /// 是否可点击（禁用的项不可选）
    pub interactive: bool,
}

impl TaskCandidate {
    pub fn new(key: impl Into<String>, raw_name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            raw_name: raw_name.into(),
            label: String::new(),
            rewards: Vec::new(),
            extra_info: String::new(),
            interactive: true,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_reward(mut self, reward: RewardSignal) -> Self {
        self.rewards.push(reward);
        self
    }

    pub fn with_extra_info(mut self, extra_info: impl Into<String>) -> Self {
        self.extra_info = extra_info.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.interactive = false;
        self
    }
}

/// 平台适配器 trait
///
/// 所有方法都是单次页面操作，不应在内部无限等待。
/// 可选功能提供默认实现（跳过或 `AdapterError::Unavailable`）。
#[async_trait::async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// 平台类型
    fn platform(&self) -> PlatformType;

    fn limits(&self) -> PlatformLimits {
        PlatformLimits::default()
    }

    // ---------------------------------------------------------------
    // 会话
    // ---------------------------------------------------------------

    /// 打开浏览器上下文，有快照时加载快照
    async fn open_session(
        &self,
        account_id: &str,
        snapshot: Option<&SessionSnapshot>,
    ) -> Result<SessionHandle, AdapterError>;

    /// 是否已进入登录后的页面（单次检测）
    async fn is_authenticated(&self, session: &SessionHandle) -> Result<bool, AdapterError>;

    /// 打开可见浏览器等待扫码登录
    ///
    /// 按 `poll.interval_ms` 检查是否已离开登录页，最长等待 `poll.deadline_secs`。
    async fn interactive_login(
        &self,
        account_id: &str,
        poll: PollSettings,
    ) -> Result<(SessionHandle, AccountIdentity), AdapterError>;

    /// 导出当前会话快照
    async fn persist_session(&self, session: &SessionHandle) -> Result<SessionSnapshot, AdapterError>;

    /// 关闭浏览器上下文
    async fn close_session(&self, session: &SessionHandle) -> Result<(), AdapterError>;

    // ---------------------------------------------------------------
    // 上传
    // ---------------------------------------------------------------

    async fn start_upload(&self, session: &SessionHandle, file: &Path) -> Result<(), AdapterError>;

    async fn poll_upload_state(&self, session: &SessionHandle) -> Result<UploadState, AdapterError>;

    /// 上传失败后重新选择文件
    async fn resubmit_upload(&self, session: &SessionHandle, file: &Path) -> Result<(), AdapterError>;

    // ---------------------------------------------------------------
    // 元数据
    // ---------------------------------------------------------------

    async fn set_title(&self, session: &SessionHandle, title: &str) -> Result<StepOutcome, AdapterError>;

    /// 每个 tag 已带一个 `#`
    async fn set_tags(&self, session: &SessionHandle, tags: &[String]) -> Result<StepOutcome, AdapterError>;

    async fn set_thumbnail(&self, _session: &SessionHandle, _file: &Path) -> Result<StepOutcome, AdapterError> {
        Ok(StepOutcome::skipped("不支持设置封面"))
    }

    async fn set_declaration(
        &self,
        _session: &SessionHandle,
        _declaration: &OriginalityDeclaration,
    ) -> Result<StepOutcome, AdapterError> {
        Ok(StepOutcome::skipped("不支持内容声明"))
    }

    /// 按名称搜索合集，返回页面上可见的合集名称
    async fn list_collections(&self, _session: &SessionHandle, _name: &str) -> Result<Vec<String>, AdapterError> {
        Err(AdapterError::Unavailable("合集".to_string()))
    }

    async fn create_collection(&self, _session: &SessionHandle, _name: &str) -> Result<(), AdapterError> {
        Err(AdapterError::Unavailable("创建合集".to_string()))
    }

    async fn select_collection(&self, _session: &SessionHandle, _name: &str) -> Result<(), AdapterError> {
        Err(AdapterError::Unavailable("选择合集".to_string()))
    }

    async fn set_download_permission(&self, _session: &SessionHandle, _allow: bool) -> Result<StepOutcome, AdapterError> {
        Ok(StepOutcome::skipped("不支持下载权限设置"))
    }

    async fn set_location_visibility(&self, _session: &SessionHandle, _visible: bool) -> Result<StepOutcome, AdapterError> {
        Ok(StepOutcome::skipped("不支持位置设置"))
    }

    /// 平台扩展数据
    async fn apply_extensions(
        &self,
        _session: &SessionHandle,
        _extensions: &Map<String, Value>,
    ) -> Result<StepOutcome, AdapterError> {
        Ok(StepOutcome::skipped("无平台扩展"))
    }

    // ---------------------------------------------------------------
    // 推广任务
    // ---------------------------------------------------------------

    /// 在发布页搜索任务，返回当前可见的候选项
    async fn list_task_candidates(
        &self,
        session: &SessionHandle,
        term: &str,
    ) -> Result<Vec<TaskCandidate>, AdapterError>;

    async fn select_task(&self, session: &SessionHandle, candidate: &TaskCandidate) -> Result<(), AdapterError>;

    /// 已绑定任务的"硬性要求"文本
    async fn task_requirements(
        &self,
        _session: &SessionHandle,
        _candidate: &TaskCandidate,
    ) -> Result<Option<String>, AdapterError> {
        Ok(None)
    }

    /// 任务市场搜索
    async fn list_market_tasks(
        &self,
        _session: &SessionHandle,
        _term: &str,
    ) -> Result<Vec<TaskCandidate>, AdapterError> {
        Err(AdapterError::Unavailable("任务市场".to_string()))
    }

    /// 在任务市场接单，完成后回到发布页
    async fn acquire_task(&self, _session: &SessionHandle, _candidate: &TaskCandidate) -> Result<(), AdapterError> {
        Err(AdapterError::Unavailable("任务市场接单".to_string()))
    }

    // ---------------------------------------------------------------
    // 定时与发布
    // ---------------------------------------------------------------

    async fn schedule(&self, session: &SessionHandle, at: DateTime<Local>) -> Result<(), AdapterError>;

    /// 点击发布
    async fn request_publish(&self, session: &SessionHandle) -> Result<(), AdapterError>;

    async fn poll_publish_confirmation(&self, session: &SessionHandle) -> Result<PublishState, AdapterError>;

    /// 关闭"是否保留编辑"之类的弹窗
    async fn dismiss_interstitial(&self, session: &SessionHandle) -> Result<(), AdapterError>;

    /// 发布后的收尾操作（例如清理草稿）
    async fn after_publish(&self, _session: &SessionHandle) -> Result<StepOutcome, AdapterError> {
        Ok(StepOutcome::skipped("无发布后操作"))
    }
}
