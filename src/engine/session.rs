//! SessionManager - 会话获取与扫码登录
//!
//! 加载持久化的会话快照并验证登录状态；失效时（允许的话）打开浏览器扫码登录，
//! 保存新快照。返回的会话在返回时一定通过了登录检测。

use super::bounded;
use super::wait_poll::{wait_for, ProbeResult, ProbeStatus};
use crate::core::{AdapterError, EngineConfig, PlatformType, SessionError, SessionSnapshot};
use crate::platforms::{PlatformAdapter, SessionHandle};
use crate::storage::SessionStore;
use std::sync::Arc;
use std::time::Duration;

/// 打开中的浏览器上下文
///
/// 必须调用 [`SessionGuard::release`] 关闭；未关闭就被丢弃时在后台关闭。
pub struct SessionGuard {
    adapter: Arc<dyn PlatformAdapter>,
    handle: SessionHandle,
    close_timeout: Duration,
    released: bool,
}

impl SessionGuard {
    fn new(adapter: Arc<dyn PlatformAdapter>, handle: SessionHandle, close_timeout: Duration) -> Self {
        Self {
            adapter,
            handle,
            close_timeout,
            released: false,
        }
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// 关闭浏览器上下文，关闭失败只记录日志
    pub async fn release(mut self) {
        self.released = true;
        match bounded(self.close_timeout, "close_session", self.adapter.close_session(&self.handle)).await {
            Ok(()) => tracing::debug!("[Session] 已关闭会话 {}", self.handle),
            Err(e) => tracing::warn!("[Session] 关闭会话 {} 失败: {}", self.handle, e),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        tracing::warn!("[Session] 会话 {} 未显式关闭，转入后台关闭", self.handle);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let adapter = self.adapter.clone();
            let handle = self.handle.clone();
            let close_timeout = self.close_timeout;
            runtime.spawn(async move {
                if let Err(e) = bounded(close_timeout, "close_session", adapter.close_session(&handle)).await {
                    tracing::warn!("[Session] 后台关闭会话 {} 失败: {}", handle, e);
                }
            });
        }
    }
}

/// 已验证登录的会话
pub struct ActiveSession {
    pub guard: SessionGuard,
    /// 本次使用的快照（扫码登录时为新快照）
    pub snapshot: SessionSnapshot,
}

/// 会话管理器
#[derive(Clone)]
pub struct SessionManager {
    adapter: Arc<dyn PlatformAdapter>,
    store: Arc<dyn SessionStore>,
    config: Arc<EngineConfig>,
}

impl SessionManager {
    pub fn new(
        adapter: Arc<dyn PlatformAdapter>,
        store: Arc<dyn SessionStore>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self { adapter, store, config }
    }

    fn platform(&self) -> PlatformType {
        self.adapter.platform()
    }

    /// 验证账号会话并返回快照，浏览器上下文在返回前关闭
    pub async fn ensure_session(
        &self,
        account_id: &str,
        allow_interactive: bool,
    ) -> Result<SessionSnapshot, SessionError> {
        let active = self.acquire(account_id, allow_interactive).await?;
        active.guard.release().await;
        Ok(active.snapshot)
    }

    /// 获取一个已登录的浏览器上下文
    pub async fn acquire(
        &self,
        account_id: &str,
        allow_interactive: bool,
    ) -> Result<ActiveSession, SessionError> {
        let platform = self.platform();

        match self.store.load(platform, account_id)? {
            Some(snapshot) => {
                let handle = bounded(
                    self.config.action_timeout(),
                    "open_session",
                    self.adapter.open_session(account_id, Some(&snapshot)),
                )
                .await?;
                let guard = SessionGuard::new(self.adapter.clone(), handle, self.config.action_timeout());

                if self.probe_authenticated(guard.handle()).await? {
                    tracing::info!("[Session] {} 账号 {} 会话有效", platform.display_name(), account_id);
                    return Ok(ActiveSession { guard, snapshot });
                }
                tracing::warn!("[Session] {} 账号 {} 会话已失效", platform.display_name(), account_id);
                guard.release().await;
            }
            None => {
                tracing::info!("[Session] {} 账号 {} 没有保存的会话", platform.display_name(), account_id);
            }
        }

        if !allow_interactive {
            return Err(SessionError::NoValidSession {
                account_id: account_id.to_string(),
            });
        }
        self.provision(account_id).await
    }

    /// 扫码登录并保存新快照
    async fn provision(&self, account_id: &str) -> Result<ActiveSession, SessionError> {
        let poll = self.config.interactive_login;
        let waited = poll.deadline();
        tracing::info!("[Session] 打开浏览器等待扫码登录，最长 {:?}", waited);

        let login = tokio::time::timeout(waited, self.adapter.interactive_login(account_id, poll)).await;
        let (handle, identity) = match login {
            Ok(Ok(result)) => result,
            Ok(Err(AdapterError::Timeout(_))) | Err(_) => {
                return Err(SessionError::InteractiveLoginTimeout {
                    account_id: account_id.to_string(),
                    waited,
                });
            }
            Ok(Err(e)) => return Err(e.into()),
        };
        tracing::info!(
            "[Session] 扫码登录成功: user_id={}, nickname={}",
            identity.user_id,
            identity.nickname
        );

        let guard = SessionGuard::new(self.adapter.clone(), handle, self.config.action_timeout());
        let snapshot = match bounded(
            self.config.action_timeout(),
            "persist_session",
            self.adapter.persist_session(guard.handle()),
        )
        .await
        {
            Ok(snapshot) => snapshot.with_identity(identity),
            Err(e) => {
                guard.release().await;
                return Err(e.into());
            }
        };
        if let Err(e) = self.store.save(&snapshot) {
            guard.release().await;
            return Err(e.into());
        }

        match self.probe_authenticated(guard.handle()).await {
            Ok(true) => Ok(ActiveSession { guard, snapshot }),
            Ok(false) => {
                guard.release().await;
                Err(SessionError::NoValidSession {
                    account_id: account_id.to_string(),
                })
            }
            Err(e) => {
                guard.release().await;
                Err(e)
            }
        }
    }

    /// 在短截止时间内检测是否进入登录后的页面，超时视为未登录
    async fn probe_authenticated(&self, handle: &SessionHandle) -> Result<bool, SessionError> {
        let adapter: &dyn PlatformAdapter = self.adapter.as_ref();
        let settings = self.config.session_probe;

        let result = wait_for("登录检测", settings.interval(), settings.deadline(), move || async move {
            match adapter.is_authenticated(handle).await {
                Ok(true) => ProbeStatus::Ready(()),
                Ok(false) => ProbeStatus::NotYet,
                Err(e @ AdapterError::ContextClosed(_)) => ProbeStatus::Fatal(e),
                Err(e) => {
                    tracing::debug!("[Session] 登录检测出错，继续等待: {}", e);
                    ProbeStatus::NotYet
                }
            }
        })
        .await;

        match result {
            ProbeResult::Success(()) => Ok(true),
            ProbeResult::Timeout { .. } => Ok(false),
            ProbeResult::Fatal(e) => Err(SessionError::Adapter(e)),
        }
    }
}
