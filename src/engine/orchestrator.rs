//! PublishOrchestrator - 单次发布的状态机
//!
//! SessionPending → Uploading → MetadataEditing → (TaskBinding) → (Scheduling)
//! → PublishRequested → Confirmed，任意阶段出错进入 Error。
//!
//! 每个等待点都经过 WaitPoll，每次直接调用适配器都有超时。
//! 浏览器上下文在所有结束路径上都会关闭。

use super::bounded;
use super::session::SessionManager;
use super::task_binding::TaskBindingResolver;
use super::text::{extract_requirement_tags, normalize_tags, prefix_requirements, truncate_title};
use super::wait_poll::{wait_for, wait_until, ProbeResult, ProbeStatus};
use crate::core::{
    AdapterError, CollectionSpec, EngineConfig, EngineError, ProgressEmitter, ProgressSink,
    PublishError, PublishOutcome, PublishRequest, PublishStage, UploadError,
};
use crate::platforms::{
    PlatformAdapter, PlatformLimits, PublishState, SessionHandle, StepOutcome, TaskCandidate,
    UploadState,
};
use crate::storage::SessionStore;
use chrono::Local;
use std::future::Future;
use std::sync::Arc;

/// 一次运行中的可变状态
struct RunState {
    stage: PublishStage,
    /// 是否已经尝试过保存会话（每次运行最多一次）
    persisted: bool,
    /// 跳过的可选步骤等提示，附加到结果消息里
    notes: Vec<String>,
}

impl RunState {
    fn new() -> Self {
        Self {
            stage: PublishStage::SessionPending,
            persisted: false,
            notes: Vec::new(),
        }
    }

    fn enter(&mut self, stage: PublishStage, progress: &ProgressEmitter, message: &str) {
        self.stage = stage;
        progress.emit(stage, message);
    }
}

/// 发布编排器，绑定到一个平台适配器
pub struct PublishOrchestrator {
    adapter: Arc<dyn PlatformAdapter>,
    store: Arc<dyn SessionStore>,
    config: Arc<EngineConfig>,
    sessions: SessionManager,
    resolver: TaskBindingResolver,
    sink: Arc<dyn ProgressSink>,
}

impl PublishOrchestrator {
    pub fn new(
        adapter: Arc<dyn PlatformAdapter>,
        store: Arc<dyn SessionStore>,
        config: Arc<EngineConfig>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        let sessions = SessionManager::new(adapter.clone(), store.clone(), config.clone());
        let resolver = TaskBindingResolver::from_config(&config);
        Self {
            adapter,
            store,
            config,
            sessions,
            resolver,
            sink,
        }
    }

    /// 执行一次发布，总是返回一个结果
    pub async fn run(&self, request: &PublishRequest) -> PublishOutcome {
        let progress = ProgressEmitter::new(
            self.sink.clone(),
            request.request_id.clone(),
            request.account_id.clone(),
            request.platform,
        );
        progress.emit_starting();
        tracing::info!(
            "[Publish] 开始发布: request_id={}, platform={}, account={}, title={}",
            request.request_id,
            request.platform.display_name(),
            request.account_id,
            request.title
        );

        let mut state = RunState::new();

        let active = match self
            .sessions
            .acquire(&request.account_id, self.config.allow_interactive_login)
            .await
        {
            Ok(active) => active,
            Err(e) => return self.fail(request, &progress, &state, e.into()),
        };

        let result = self.drive(request, active.guard.handle(), &progress, &mut state).await;

        let outcome = match result {
            Ok(()) => {
                let mut message = "发布成功".to_string();
                if !state.notes.is_empty() {
                    message = format!("{}（{}）", message, state.notes.join("；"));
                }
                tracing::info!("[Publish] ✅ {}: {}", request.request_id, message);
                progress.emit_completed(&message);
                PublishOutcome::succeeded(request.request_id.clone(), message)
            }
            Err(e) => {
                if !state.persisted && !e.context_lost() {
                    // 部分完成的发布也刷新会话，失败不影响结果
                    state.persisted = true;
                    if let Err(persist_err) = self.persist_session(active.guard.handle()).await {
                        tracing::warn!("[Publish] 保存会话失败: {}", persist_err);
                    }
                }
                self.fail(request, &progress, &state, e)
            }
        };

        active.guard.release().await;
        outcome
    }

    fn fail(
        &self,
        request: &PublishRequest,
        progress: &ProgressEmitter,
        state: &RunState,
        error: EngineError,
    ) -> PublishOutcome {
        let message = error.to_string();
        tracing::error!(
            "[Publish] ❌ {} 在 {} 阶段失败: {}",
            request.request_id,
            state.stage,
            message
        );
        progress.emit_failed(state.stage, &message);
        PublishOutcome::failed(request.request_id.clone(), state.stage, error.reason(), message)
    }

    async fn drive(
        &self,
        request: &PublishRequest,
        session: &SessionHandle,
        progress: &ProgressEmitter,
        state: &mut RunState,
    ) -> Result<(), EngineError> {
        let limits = self.adapter.limits();

        state.enter(PublishStage::Uploading, progress, "上传视频中");
        self.upload(request, session).await?;

        state.enter(PublishStage::MetadataEditing, progress, "填写作品信息");
        self.edit_metadata(request, session, limits, state).await?;

        if let Some(spec) = &request.task_binding {
            state.enter(PublishStage::TaskBinding, progress, "绑定推广任务");
            let candidate = self
                .resolver
                .bind(self.adapter.as_ref(), session, spec, &self.config)
                .await?;
            if spec.apply_requirements {
                self.apply_requirements(request, session, &candidate, limits, state).await?;
            }
        }

        if let Some(at) = request.scheduled_time() {
            state.enter(PublishStage::Scheduling, progress, "设置定时发布");
            if at <= Local::now() {
                return Err(EngineError::InvalidSchedule(format!(
                    "定时发布时间 {} 不在未来",
                    at.format("%Y-%m-%d %H:%M")
                )));
            }
            self.call("schedule", self.adapter.schedule(session, at)).await?;
            tokio::time::sleep(self.config.ui_settle()).await;
        }

        state.enter(PublishStage::PublishRequested, progress, "点击发布");
        self.publish_and_confirm(session).await?;

        state.enter(PublishStage::Confirmed, progress, "发布已确认");
        state.persisted = true;
        if let Err(e) = self.persist_session(session).await {
            tracing::warn!("[Publish] 发布成功但保存会话失败: {}", e);
            state.notes.push(format!("会话保存失败: {}", e));
        }

        match self.call("after_publish", self.adapter.after_publish(session)).await {
            Ok(StepOutcome::Applied) => {}
            Ok(StepOutcome::Skipped(reason)) => tracing::debug!("[Publish] 跳过发布后操作: {}", reason),
            Err(e) => {
                tracing::warn!("[Publish] 发布后操作失败: {}", e);
                state.notes.push(format!("发布后操作失败: {}", e));
            }
        }
        Ok(())
    }

    /// 带超时的直接调用
    async fn call<T, F>(&self, action: &str, fut: F) -> Result<T, AdapterError>
    where
        F: Future<Output = Result<T, AdapterError>>,
    {
        bounded(self.config.action_timeout(), action, fut).await
    }

    async fn persist_session(&self, session: &SessionHandle) -> Result<(), EngineError> {
        let snapshot = self
            .call("persist_session", self.adapter.persist_session(session))
            .await
            .map_err(|e| EngineError::AdapterFatal {
                context_closed: e.is_context_closed(),
                message: e.to_string(),
            })?;
        self.store
            .save(&snapshot)
            .map_err(|e| EngineError::Session(e.into()))?;
        tracing::info!("[Publish] 会话已保存: account={}", snapshot.account_id);
        Ok(())
    }

    // ---------------------------------------------------------------
    // Uploading
    // ---------------------------------------------------------------

    async fn upload(&self, request: &PublishRequest, session: &SessionHandle) -> Result<(), EngineError> {
        let adapter: &dyn PlatformAdapter = self.adapter.as_ref();
        let file = request.video_path.as_path();
        let action_timeout = self.config.action_timeout();
        let settings = self.config.upload;
        let max_resubmits = self.config.max_upload_resubmits;

        self.call("start_upload", adapter.start_upload(session, file)).await?;
        tracing::info!("[Upload] 已提交视频文件: {}", file.display());

        let mut resubmits: u32 = 0;
        let result = wait_until(
            "视频上传",
            settings.interval(),
            settings.deadline(),
            move || async move {
                match bounded(action_timeout, "poll_upload_state", adapter.poll_upload_state(session)).await {
                    Ok(UploadState::Done) => ProbeStatus::Ready(()),
                    Ok(UploadState::Pending) => ProbeStatus::NotYet,
                    Ok(UploadState::Errored(reason)) => ProbeStatus::Transient(reason),
                    Err(AdapterError::Timeout(_)) => ProbeStatus::NotYet,
                    Err(e) => ProbeStatus::Fatal(EngineError::from(e)),
                }
            },
            move |reason: String| {
                resubmits += 1;
                let attempt = resubmits;
                async move {
                    if attempt > max_resubmits {
                        return Err(EngineError::from(UploadError::UploadRejected(format!(
                            "重新上传 {} 次后仍失败: {}",
                            max_resubmits, reason
                        ))));
                    }
                    tracing::warn!("[Upload] 上传失败 ({})，第 {} 次重新上传", reason, attempt);
                    bounded(action_timeout, "resubmit_upload", adapter.resubmit_upload(session, file))
                        .await
                        .map_err(EngineError::from)
                }
            },
        )
        .await;

        match result {
            ProbeResult::Success(()) => {
                tracing::info!("[Upload] 视频上传完成");
                Ok(())
            }
            ProbeResult::Fatal(e) => Err(e),
            ProbeResult::Timeout { .. } => Err(UploadError::UploadTimeout(settings.deadline()).into()),
        }
    }

    // ---------------------------------------------------------------
    // MetadataEditing
    // ---------------------------------------------------------------

    async fn edit_metadata(
        &self,
        request: &PublishRequest,
        session: &SessionHandle,
        limits: PlatformLimits,
        state: &mut RunState,
    ) -> Result<(), EngineError> {
        let adapter = self.adapter.as_ref();

        let title = truncate_title(&request.title, limits.title_max_chars);
        self.step("title", adapter.set_title(session, &title), state).await?;

        let tags = normalize_tags(&request.tags, limits.max_tags);
        if !tags.is_empty() {
            self.step("tags", adapter.set_tags(session, &tags), state).await?;
        }

        if let Some(thumbnail) = &request.thumbnail_path {
            self.step("thumbnail", adapter.set_thumbnail(session, thumbnail), state).await?;
        }

        if let Some(declaration) = request.declaration.as_ref().filter(|d| !d.is_empty()) {
            self.step("declaration", adapter.set_declaration(session, declaration), state)
                .await?;
        }

        if let Some(collection) = &request.collection {
            self.assign_collection(session, collection, state).await?;
        }

        if let Some(allow) = request.allow_download {
            self.step("download_permission", adapter.set_download_permission(session, allow), state)
                .await?;
        }

        if let Some(visible) = request.show_location {
            self.step("location_visibility", adapter.set_location_visibility(session, visible), state)
                .await?;
        }

        if !request.extensions.is_empty() {
            self.step("extensions", adapter.apply_extensions(session, &request.extensions), state)
                .await?;
        }

        Ok(())
    }

    /// 执行一个元数据步骤：功能不存在时跳过，其余错误阻断
    async fn step<F>(&self, name: &'static str, fut: F, state: &mut RunState) -> Result<(), EngineError>
    where
        F: Future<Output = Result<StepOutcome, AdapterError>>,
    {
        match self.call(name, fut).await {
            Ok(StepOutcome::Applied) => {
                tracing::debug!("[Publish] {} 已设置", name);
                Ok(())
            }
            Ok(StepOutcome::Skipped(reason)) | Err(AdapterError::Unavailable(reason)) => {
                tracing::warn!("[Publish] 跳过 {}: {}", name, reason);
                state.notes.push(format!("跳过{}: {}", name, reason));
                Ok(())
            }
            Err(e) => Err(Self::metadata_error(name, e)),
        }
    }

    fn metadata_error(step: &'static str, error: AdapterError) -> EngineError {
        match error {
            AdapterError::ContextClosed(_) | AdapterError::ContentRejected(_) => error.into(),
            other => EngineError::Metadata {
                step,
                reason: other.to_string(),
            },
        }
    }

    /// 搜索已有合集，找不到时创建一次再搜索一次
    async fn assign_collection(
        &self,
        session: &SessionHandle,
        collection: &CollectionSpec,
        state: &mut RunState,
    ) -> Result<(), EngineError> {
        let name = collection.name.trim();
        if name.is_empty() {
            return Ok(());
        }

        let mut found = match self.find_collection(session, name).await {
            Ok(found) => found,
            Err(AdapterError::Unavailable(reason)) => {
                tracing::warn!("[Publish] 跳过合集: {}", reason);
                state.notes.push(format!("跳过合集: {}", reason));
                return Ok(());
            }
            Err(e) => return Err(Self::metadata_error("collection", e)),
        };

        if !found && collection.create_if_missing {
            tracing::info!("[Publish] 合集 '{}' 不存在，创建合集", name);
            match self.call("create_collection", self.adapter.create_collection(session, name)).await {
                Ok(()) => {}
                Err(AdapterError::Unavailable(reason)) => {
                    state.notes.push(format!("无法创建合集: {}", reason));
                    return Ok(());
                }
                Err(e) => return Err(Self::metadata_error("collection", e)),
            }
            found = self
                .find_collection(session, name)
                .await
                .map_err(|e| Self::metadata_error("collection", e))?;
        }

        if !found {
            tracing::warn!("[Publish] 未找到合集 '{}'，跳过", name);
            state.notes.push(format!("未找到合集 {}", name));
            return Ok(());
        }

        self.call("select_collection", self.adapter.select_collection(session, name))
            .await
            .map_err(|e| Self::metadata_error("collection", e))?;
        tracing::info!("[Publish] 已选择合集 '{}'", name);
        Ok(())
    }

    async fn find_collection(&self, session: &SessionHandle, name: &str) -> Result<bool, AdapterError> {
        let adapter: &dyn PlatformAdapter = self.adapter.as_ref();
        let action_timeout = self.config.action_timeout();
        let settings = self.config.collection_search;

        let result = wait_for("合集搜索", settings.interval(), settings.deadline(), move || async move {
            match bounded(action_timeout, "list_collections", adapter.list_collections(session, name)).await {
                Ok(names) if names.iter().any(|n| n.trim() == name) => ProbeStatus::Ready(()),
                Ok(_) | Err(AdapterError::Timeout(_)) => ProbeStatus::NotYet,
                Err(e) => ProbeStatus::Fatal(e),
            }
        })
        .await;

        match result {
            ProbeResult::Success(()) => Ok(true),
            ProbeResult::Timeout { .. } => Ok(false),
            ProbeResult::Fatal(e) => Err(e),
        }
    }

    // ---------------------------------------------------------------
    // TaskBinding
    // ---------------------------------------------------------------

    /// 把任务的硬性要求（#话题 @账号）加到标题前并重新填写标题
    async fn apply_requirements(
        &self,
        request: &PublishRequest,
        session: &SessionHandle,
        candidate: &TaskCandidate,
        limits: PlatformLimits,
        state: &mut RunState,
    ) -> Result<(), EngineError> {
        let text = match self
            .call("task_requirements", self.adapter.task_requirements(session, candidate))
            .await
        {
            Ok(Some(text)) => text,
            Ok(None) => {
                tracing::debug!("[TaskBinding] 任务没有硬性要求");
                return Ok(());
            }
            Err(e @ AdapterError::ContextClosed(_)) => return Err(e.into()),
            Err(e) => {
                tracing::warn!("[TaskBinding] 读取硬性要求失败: {}", e);
                state.notes.push(format!("未读取到硬性要求: {}", e));
                return Ok(());
            }
        };

        let requirements = extract_requirement_tags(&text);
        if requirements.is_empty() {
            tracing::info!("[TaskBinding] 硬性要求中没有 # 或 @ 项");
            return Ok(());
        }
        tracing::info!("[TaskBinding] 硬性要求: {:?}", requirements);

        let title = truncate_title(
            &prefix_requirements(request.title.trim(), &requirements),
            limits.title_max_chars,
        );
        self.step("title", self.adapter.set_title(session, &title), state).await
    }

    // ---------------------------------------------------------------
    // PublishRequested -> Confirmed
    // ---------------------------------------------------------------

    async fn publish_and_confirm(&self, session: &SessionHandle) -> Result<(), EngineError> {
        let adapter: &dyn PlatformAdapter = self.adapter.as_ref();
        let action_timeout = self.config.action_timeout();
        let settings = self.config.publish_confirm;

        self.call("request_publish", adapter.request_publish(session)).await?;

        let result = wait_until(
            "发布确认",
            settings.interval(),
            settings.deadline(),
            move || async move {
                match bounded(action_timeout, "poll_publish_confirmation", adapter.poll_publish_confirmation(session))
                    .await
                {
                    Ok(PublishState::Done) => ProbeStatus::Ready(()),
                    Ok(PublishState::Pending) => ProbeStatus::NotYet,
                    Ok(transient @ (PublishState::StillEditing | PublishState::DiscardEditsPrompt)) => {
                        ProbeStatus::Transient(transient)
                    }
                    Ok(PublishState::Errored(reason)) => {
                        ProbeStatus::Fatal(EngineError::from(PublishError::ContentRejected(reason)))
                    }
                    Err(AdapterError::Timeout(_)) => ProbeStatus::NotYet,
                    Err(e) => ProbeStatus::Fatal(EngineError::from(e)),
                }
            },
            move |transient: PublishState| async move {
                let result = match transient {
                    PublishState::DiscardEditsPrompt => {
                        bounded(action_timeout, "dismiss_interstitial", adapter.dismiss_interstitial(session)).await
                    }
                    _ => bounded(action_timeout, "request_publish", adapter.request_publish(session)).await,
                };
                result.map_err(EngineError::from)
            },
        )
        .await;

        match result {
            ProbeResult::Success(()) => Ok(()),
            ProbeResult::Fatal(e) => Err(e),
            ProbeResult::Timeout { .. } => Err(PublishError::PublishTimeout(settings.deadline()).into()),
        }
    }
}
