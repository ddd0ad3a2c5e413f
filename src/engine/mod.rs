// Engine module - publish orchestration
// 引擎模块 - 发布编排
//
// - [wait_poll](wait_poll/index.html) - 有截止时间的轮询
// - [session](session/index.html) - 会话获取与扫码登录
// - [task_binding](task_binding/index.html) - 推广任务选择
// - [orchestrator](orchestrator/index.html) - 单次发布状态机

pub mod orchestrator;
pub mod session;
pub mod task_binding;
pub mod text;
pub mod wait_poll;

pub use orchestrator::PublishOrchestrator;
pub use session::{ActiveSession, SessionGuard, SessionManager};
pub use task_binding::{reward_score, TaskBindingResolver};
pub use wait_poll::{wait_for, wait_until, ProbeResult, ProbeStatus};

use crate::core::{
    AdapterError, EngineConfig, EngineError, PlatformType, ProgressSink, PublishOutcome,
    PublishRequest, PublishStage, SessionSnapshot, TracingProgressSink,
};
use crate::platforms::AdapterRegistry;
use crate::storage::{PublicationLog, PublicationRecord, SessionStore};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 给单次适配器调用加超时，超时返回 `AdapterError::Timeout`
pub(crate) async fn bounded<T, F>(limit: Duration, action: &str, fut: F) -> Result<T, AdapterError>
where
    F: Future<Output = Result<T, AdapterError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Timeout(format!("{} 超过 {:?}", action, limit))),
    }
}

type AccountKey = (PlatformType, String);

/// 进行中的账号，Drop 时移除
struct InFlightGuard {
    accounts: Arc<Mutex<HashSet<AccountKey>>>,
    key: AccountKey,
}

impl InFlightGuard {
    fn try_acquire(accounts: &Arc<Mutex<HashSet<AccountKey>>>, key: AccountKey) -> Option<Self> {
        let mut set = accounts.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !set.insert(key.clone()) {
            return None;
        }
        Some(Self {
            accounts: accounts.clone(),
            key,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self.accounts.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        set.remove(&self.key);
    }
}

/// Publish engine
///
/// 对外入口：按平台分发到对应适配器，同一账号同一时间只允许一个发布。
pub struct PublishEngine {
    registry: AdapterRegistry,
    store: Arc<dyn SessionStore>,
    publications: Option<Arc<dyn PublicationLog>>,
    config: Arc<EngineConfig>,
    sink: Arc<dyn ProgressSink>,
    in_flight: Arc<Mutex<HashSet<AccountKey>>>,
}

impl PublishEngine {
    pub fn new(registry: AdapterRegistry, store: Arc<dyn SessionStore>, config: EngineConfig) -> Self {
        Self {
            registry,
            store,
            publications: None,
            config: Arc::new(config),
            sink: Arc::new(TracingProgressSink),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_publication_log(mut self, log: Arc<dyn PublicationLog>) -> Self {
        self.publications = Some(log);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn supported_platforms(&self) -> Vec<PlatformType> {
        self.registry.supported_platforms()
    }

    /// 发布视频，总是返回一个结果
    pub async fn publish(&self, request: PublishRequest) -> PublishOutcome {
        let outcome = self.publish_inner(&request).await;
        self.record(&request, &outcome);
        outcome
    }

    async fn publish_inner(&self, request: &PublishRequest) -> PublishOutcome {
        if let Err(e) = validate_request(request) {
            return Self::rejected(request, e);
        }
        let Some(adapter) = self.registry.get(request.platform) else {
            return Self::rejected(
                request,
                EngineError::UnsupportedPlatform(request.platform.display_name()),
            );
        };
        let key = (request.platform, request.account_id.clone());
        let Some(_guard) = InFlightGuard::try_acquire(&self.in_flight, key) else {
            return Self::rejected(
                request,
                EngineError::AccountBusy(format!("账号 {} 正在发布中", request.account_id)),
            );
        };

        PublishOrchestrator::new(adapter, self.store.clone(), self.config.clone(), self.sink.clone())
            .run(request)
            .await
    }

    /// 验证账号会话（可选扫码登录），返回当前快照
    pub async fn ensure_account_session(
        &self,
        platform: PlatformType,
        account_id: &str,
        allow_interactive: bool,
    ) -> Result<SessionSnapshot, EngineError> {
        let adapter = self
            .registry
            .get(platform)
            .ok_or_else(|| EngineError::UnsupportedPlatform(platform.display_name()))?;
        let _guard = InFlightGuard::try_acquire(&self.in_flight, (platform, account_id.to_string()))
            .ok_or_else(|| EngineError::AccountBusy(format!("账号 {} 正在使用中", account_id)))?;

        let snapshot = SessionManager::new(adapter, self.store.clone(), self.config.clone())
            .ensure_session(account_id, allow_interactive)
            .await?;
        Ok(snapshot)
    }

    fn rejected(request: &PublishRequest, error: EngineError) -> PublishOutcome {
        tracing::warn!("[Publish] 请求 {} 被拒绝: {}", request.request_id, error);
        PublishOutcome::failed(
            request.request_id.clone(),
            PublishStage::SessionPending,
            error.reason(),
            error.to_string(),
        )
    }

    fn record(&self, request: &PublishRequest, outcome: &PublishOutcome) {
        let Some(log) = &self.publications else {
            return;
        };
        if let Err(e) = log.record_publication(&PublicationRecord::from_outcome(request, outcome)) {
            tracing::warn!("[Storage] 写入发布记录失败: {}", e);
        }
    }
}

fn validate_request(request: &PublishRequest) -> Result<(), EngineError> {
    if request.account_id.trim().is_empty() {
        return Err(EngineError::InvalidRequest("账号为空".to_string()));
    }
    if request.title.trim().is_empty() {
        return Err(EngineError::InvalidRequest("标题为空".to_string()));
    }
    if request.video_path.as_os_str().is_empty() {
        return Err(EngineError::InvalidRequest("视频文件路径为空".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FailureReason, SessionError};
    use crate::platforms::testing::StubAdapter;
    use crate::platforms::UploadState;
    use crate::storage::{DatabaseManager, MemorySessionStore};

    fn engine_with(adapter: Arc<StubAdapter>, store: Arc<dyn SessionStore>) -> PublishEngine {
        PublishEngine::new(
            AdapterRegistry::new().with_adapter(adapter),
            store,
            EngineConfig::default(),
        )
    }

    fn logged_in_store() -> Arc<MemorySessionStore> {
        let store = Arc::new(MemorySessionStore::new());
        store
            .save(&SessionSnapshot::new(PlatformType::Douyin, "acc", "saved"))
            .unwrap();
        store
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_platform() {
        let engine = engine_with(Arc::new(StubAdapter::new(PlatformType::Douyin)), logged_in_store());
        let request = PublishRequest::new(PlatformType::Bilibili, "acc", "t", "/v.mp4");

        let outcome = engine.publish(request).await;
        assert_eq!(outcome.reason, Some(FailureReason::UnsupportedPlatform));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_request() {
        let engine = engine_with(Arc::new(StubAdapter::new(PlatformType::Douyin)), logged_in_store());
        let outcome = engine
            .publish(PublishRequest::new(PlatformType::Douyin, "acc", "   ", "/v.mp4"))
            .await;
        assert_eq!(outcome.reason, Some(FailureReason::InvalidRequest));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_publish_for_same_account_is_rejected() {
        let adapter = Arc::new(
            StubAdapter::new(PlatformType::Douyin).with_upload_script(vec![UploadState::Pending; 5]),
        );
        let engine = engine_with(adapter.clone(), logged_in_store());

        let first = PublishRequest::new(PlatformType::Douyin, "acc", "第1集", "/1.mp4");
        let second = PublishRequest::new(PlatformType::Douyin, "acc", "第2集", "/2.mp4");
        let (a, b) = tokio::join!(engine.publish(first), engine.publish(second));

        assert!(a.success, "{}", a.message);
        assert_eq!(b.reason, Some(FailureReason::AccountBusy));
        assert_eq!(adapter.count("start_upload"), 1);

        // 结束后可以再次发布
        let third = PublishRequest::new(PlatformType::Douyin, "acc", "第3集", "/3.mp4");
        assert!(engine.publish(third).await.success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publication_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(DatabaseManager::new(dir.path().to_path_buf()));
        db.save(&SessionSnapshot::new(PlatformType::Douyin, "acc", "saved")).unwrap();

        let engine = engine_with(Arc::new(StubAdapter::new(PlatformType::Douyin)), db.clone())
            .with_publication_log(db.clone());
        let request = PublishRequest::new(PlatformType::Douyin, "acc", "第1集", "/1.mp4");
        let request_id = request.request_id.clone();

        let outcome = engine.publish(request).await;
        assert!(outcome.success, "{}", outcome.message);

        let records = db.get_publications_by_account(PlatformType::Douyin, "acc").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].request_id, request_id);
        assert!(records[0].success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_account_session() {
        let engine = engine_with(Arc::new(StubAdapter::new(PlatformType::Douyin)), logged_in_store());

        let snapshot = engine
            .ensure_account_session(PlatformType::Douyin, "acc", false)
            .await
            .unwrap();
        assert_eq!(snapshot.state, "saved");

        let err = engine
            .ensure_account_session(PlatformType::Douyin, "other", false)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Session(SessionError::NoValidSession { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_call_times_out() {
        let result: Result<(), AdapterError> = bounded(Duration::from_secs(1), "slow", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(AdapterError::Timeout(_))));
    }
}
