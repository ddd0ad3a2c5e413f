//! 测试用适配器
//!
//! 可脚本化的 StubAdapter，记录每次调用，便于按调用次数断言

use super::traits::*;
use crate::core::{
    AccountIdentity, AdapterError, OriginalityDeclaration, PlatformType, PollSettings, SessionSnapshot,
};
use chrono::{DateTime, Local};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

pub struct StubAdapter {
    platform: PlatformType,
    limits: PlatformLimits,
    calls: Mutex<Vec<(String, String)>>,
    auth_script: Mutex<VecDeque<bool>>,
    authenticated: bool,
    login_result: Option<AccountIdentity>,
    upload_script: Mutex<VecDeque<UploadState>>,
    publish_script: Mutex<VecDeque<PublishState>>,
    candidates: Mutex<Vec<TaskCandidate>>,
    market: Vec<TaskCandidate>,
    select_task_error: Option<AdapterError>,
    requirements: Option<String>,
    collections: Mutex<Vec<String>>,
    collections_supported: bool,
    create_collection_visible: bool,
    metadata_errors: Vec<(String, AdapterError)>,
    after_publish_error: Option<AdapterError>,
    request_publish_error: Option<AdapterError>,
}

impl StubAdapter {
    /// 默认：已登录，上传和发布立即完成，无任务
    pub fn new(platform: PlatformType) -> Self {
        Self {
            platform,
            limits: PlatformLimits::default(),
            calls: Mutex::new(Vec::new()),
            auth_script: Mutex::new(VecDeque::new()),
            authenticated: true,
            login_result: None,
            upload_script: Mutex::new(VecDeque::new()),
            publish_script: Mutex::new(VecDeque::new()),
            candidates: Mutex::new(Vec::new()),
            market: Vec::new(),
            select_task_error: None,
            requirements: None,
            collections: Mutex::new(Vec::new()),
            collections_supported: true,
            create_collection_visible: true,
            metadata_errors: Vec::new(),
            after_publish_error: None,
            request_publish_error: None,
        }
    }

    pub fn with_limits(mut self, limits: PlatformLimits) -> Self {
        self.limits = limits;
        self
    }

    /// 登录检测结果依次返回，用完后返回 `authenticated`
    pub fn with_auth_script(self, script: Vec<bool>) -> Self {
        *self.auth_script.lock().unwrap() = script.into();
        self
    }

    pub fn unauthenticated(mut self) -> Self {
        self.authenticated = false;
        self
    }

    /// 扫码登录成功返回的身份，None 表示一直等不到
    pub fn with_login(mut self, identity: AccountIdentity) -> Self {
        self.login_result = Some(identity);
        self
    }

    /// 上传状态依次返回，用完后返回 Done
    pub fn with_upload_script(self, script: Vec<UploadState>) -> Self {
        *self.upload_script.lock().unwrap() = script.into();
        self
    }

    /// 发布确认状态依次返回，用完后返回 Done
    pub fn with_publish_script(self, script: Vec<PublishState>) -> Self {
        *self.publish_script.lock().unwrap() = script.into();
        self
    }

    pub fn with_candidates(self, candidates: Vec<TaskCandidate>) -> Self {
        *self.candidates.lock().unwrap() = candidates;
        self
    }

    /// 任务市场中的任务，接单后出现在发布页候选列表里
    pub fn with_market(mut self, market: Vec<TaskCandidate>) -> Self {
        self.market = market;
        self
    }

    pub fn with_select_task_error(mut self, error: AdapterError) -> Self {
        self.select_task_error = Some(error);
        self
    }

    pub fn with_requirements(mut self, text: impl Into<String>) -> Self {
        self.requirements = Some(text.into());
        self
    }

    pub fn with_collections(self, names: Vec<&str>) -> Self {
        *self.collections.lock().unwrap() = names.into_iter().map(String::from).collect();
        self
    }

    pub fn without_collections(mut self) -> Self {
        self.collections_supported = false;
        self
    }

    /// 创建合集后搜索仍然看不到
    pub fn with_invisible_created_collection(mut self) -> Self {
        self.create_collection_visible = false;
        self
    }

    /// 指定元数据步骤返回错误
    pub fn with_metadata_error(mut self, step: &str, error: AdapterError) -> Self {
        self.metadata_errors.push((step.to_string(), error));
        self
    }

    pub fn with_after_publish_error(mut self, error: AdapterError) -> Self {
        self.after_publish_error = Some(error);
        self
    }

    /// 点击发布按钮时返回错误
    pub fn with_request_publish_error(mut self, error: AdapterError) -> Self {
        self.request_publish_error = Some(error);
        self
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(n, _)| n == name).count()
    }

    /// 某个方法每次调用的参数
    pub fn args(&self, name: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, a)| a.clone())
            .collect()
    }

    pub fn call_names(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(n, _)| n.clone()).collect()
    }

    fn record(&self, name: &str, args: impl Into<String>) {
        self.calls.lock().unwrap().push((name.to_string(), args.into()));
    }

    fn metadata_step(&self, step: &str, args: impl Into<String>) -> Result<StepOutcome, AdapterError> {
        self.record(step, args);
        match self.metadata_errors.iter().find(|(s, _)| s == step) {
            Some((_, e)) => Err(e.clone()),
            None => Ok(StepOutcome::Applied),
        }
    }
}

#[async_trait::async_trait]
impl PlatformAdapter for StubAdapter {
    fn platform(&self) -> PlatformType {
        self.platform
    }

    fn limits(&self) -> PlatformLimits {
        self.limits
    }

    async fn open_session(
        &self,
        account_id: &str,
        snapshot: Option<&SessionSnapshot>,
    ) -> Result<SessionHandle, AdapterError> {
        let state = snapshot.map(|s| s.state.clone()).unwrap_or_default();
        self.record("open_session", state);
        Ok(SessionHandle::new(self.platform, account_id))
    }

    async fn is_authenticated(&self, _session: &SessionHandle) -> Result<bool, AdapterError> {
        self.record("is_authenticated", "");
        let scripted = self.auth_script.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or(self.authenticated))
    }

    async fn interactive_login(
        &self,
        account_id: &str,
        poll: PollSettings,
    ) -> Result<(SessionHandle, AccountIdentity), AdapterError> {
        self.record("interactive_login", account_id);
        match &self.login_result {
            Some(identity) => {
                self.auth_script.lock().unwrap().clear();
                self.auth_script.lock().unwrap().push_back(true);
                Ok((SessionHandle::new(self.platform, account_id), identity.clone()))
            }
            None => {
                tokio::time::sleep(poll.deadline() + Duration::from_secs(1)).await;
                Err(AdapterError::Timeout("login".to_string()))
            }
        }
    }

    async fn persist_session(&self, session: &SessionHandle) -> Result<SessionSnapshot, AdapterError> {
        self.record("persist_session", session.id.clone());
        Ok(SessionSnapshot::new(
            self.platform,
            session.account_id.clone(),
            format!("state-{}", session.id),
        ))
    }

    async fn close_session(&self, session: &SessionHandle) -> Result<(), AdapterError> {
        self.record("close_session", session.id.clone());
        Ok(())
    }

    async fn start_upload(&self, _session: &SessionHandle, file: &Path) -> Result<(), AdapterError> {
        self.record("start_upload", file.display().to_string());
        Ok(())
    }

    async fn poll_upload_state(&self, _session: &SessionHandle) -> Result<UploadState, AdapterError> {
        self.record("poll_upload_state", "");
        Ok(self.upload_script.lock().unwrap().pop_front().unwrap_or(UploadState::Done))
    }

    async fn resubmit_upload(&self, _session: &SessionHandle, file: &Path) -> Result<(), AdapterError> {
        self.record("resubmit_upload", file.display().to_string());
        Ok(())
    }

    async fn set_title(&self, _session: &SessionHandle, title: &str) -> Result<StepOutcome, AdapterError> {
        self.metadata_step("set_title", title)
    }

    async fn set_tags(&self, _session: &SessionHandle, tags: &[String]) -> Result<StepOutcome, AdapterError> {
        self.metadata_step("set_tags", tags.join(" "))
    }

    async fn set_thumbnail(&self, _session: &SessionHandle, file: &Path) -> Result<StepOutcome, AdapterError> {
        self.metadata_step("set_thumbnail", file.display().to_string())
    }

    async fn set_declaration(
        &self,
        _session: &SessionHandle,
        declaration: &OriginalityDeclaration,
    ) -> Result<StepOutcome, AdapterError> {
        self.metadata_step("set_declaration", declaration.declaration.clone().unwrap_or_default())
    }

    async fn list_collections(&self, _session: &SessionHandle, name: &str) -> Result<Vec<String>, AdapterError> {
        self.record("list_collections", name);
        if !self.collections_supported {
            return Err(AdapterError::Unavailable("合集".to_string()));
        }
        Ok(self.collections.lock().unwrap().clone())
    }

    async fn create_collection(&self, _session: &SessionHandle, name: &str) -> Result<(), AdapterError> {
        self.record("create_collection", name);
        if self.create_collection_visible {
            self.collections.lock().unwrap().push(name.to_string());
        }
        Ok(())
    }

    async fn select_collection(&self, _session: &SessionHandle, name: &str) -> Result<(), AdapterError> {
        self.record("select_collection", name);
        Ok(())
    }

    async fn set_download_permission(&self, _session: &SessionHandle, allow: bool) -> Result<StepOutcome, AdapterError> {
        self.metadata_step("set_download_permission", allow.to_string())
    }

    async fn set_location_visibility(&self, _session: &SessionHandle, visible: bool) -> Result<StepOutcome, AdapterError> {
        self.metadata_step("set_location_visibility", visible.to_string())
    }

    async fn apply_extensions(
        &self,
        _session: &SessionHandle,
        extensions: &Map<String, Value>,
    ) -> Result<StepOutcome, AdapterError> {
        self.metadata_step("apply_extensions", Value::Object(extensions.clone()).to_string())
    }

    async fn list_task_candidates(
        &self,
        _session: &SessionHandle,
        term: &str,
    ) -> Result<Vec<TaskCandidate>, AdapterError> {
        self.record("list_task_candidates", term);
        Ok(self.candidates.lock().unwrap().clone())
    }

    async fn select_task(&self, _session: &SessionHandle, candidate: &TaskCandidate) -> Result<(), AdapterError> {
        self.record("select_task", candidate.key.clone());
        match &self.select_task_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn task_requirements(
        &self,
        _session: &SessionHandle,
        _candidate: &TaskCandidate,
    ) -> Result<Option<String>, AdapterError> {
        self.record("task_requirements", "");
        Ok(self.requirements.clone())
    }

    async fn list_market_tasks(
        &self,
        _session: &SessionHandle,
        term: &str,
    ) -> Result<Vec<TaskCandidate>, AdapterError> {
        self.record("list_market_tasks", term);
        Ok(self.market.clone())
    }

    async fn acquire_task(&self, _session: &SessionHandle, candidate: &TaskCandidate) -> Result<(), AdapterError> {
        self.record("acquire_task", candidate.key.clone());
        self.candidates.lock().unwrap().push(candidate.clone());
        Ok(())
    }

    async fn schedule(&self, _session: &SessionHandle, at: DateTime<Local>) -> Result<(), AdapterError> {
        self.record("schedule", at.timestamp().to_string());
        Ok(())
    }

    async fn request_publish(&self, _session: &SessionHandle) -> Result<(), AdapterError> {
        self.record("request_publish", "");
        match &self.request_publish_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn poll_publish_confirmation(&self, _session: &SessionHandle) -> Result<PublishState, AdapterError> {
        self.record("poll_publish_confirmation", "");
        Ok(self.publish_script.lock().unwrap().pop_front().unwrap_or(PublishState::Done))
    }

    async fn dismiss_interstitial(&self, _session: &SessionHandle) -> Result<(), AdapterError> {
        self.record("dismiss_interstitial", "");
        Ok(())
    }

    async fn after_publish(&self, _session: &SessionHandle) -> Result<StepOutcome, AdapterError> {
        self.record("after_publish", "");
        match &self.after_publish_error {
            Some(e) => Err(e.clone()),
            None => Ok(StepOutcome::Applied),
        }
    }
}
