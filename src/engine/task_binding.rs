//! TaskBindingResolver - 推广任务选择
//!
//! 从页面抓到的候选任务中选出要绑定的一个：
//! 1. 去掉"不参与活动"之类的占位项和不可点击的项
//! 2. 按剧场标签、集数过滤
//! 3. 名称匹配（精确匹配比较《》内的剧名，否则包含即可）
//! 4. 收益最高者胜出（分成比例求和，没有比例时取固定赏金）
//!
//! 同分但剧名不同视为有歧义，不猜。

use super::bounded;
use super::text::canonical_title;
use super::wait_poll::{wait_for, ProbeResult, ProbeStatus};
use crate::core::{AdapterError, BindingError, EngineConfig, EngineError, TaskBindingSpec};
use crate::platforms::{PlatformAdapter, RewardSignal, SessionHandle, TaskCandidate};
use once_cell::sync::Lazy;
use regex::Regex;

static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("number regex"));

const SCORE_EPSILON: f64 = 1e-9;

/// 候选任务的收益分
///
/// 有分成比例时为所有比例之和，否则为最大的固定赏金，都没有时为 0
pub fn reward_score(candidate: &TaskCandidate) -> f64 {
    let percents: Vec<f64> = candidate
        .rewards
        .iter()
        .filter_map(|r| match r {
            RewardSignal::Percent(p) => Some(*p),
            RewardSignal::FlatBounty(_) => None,
        })
        .collect();
    if !percents.is_empty() {
        return percents.iter().sum();
    }
    candidate
        .rewards
        .iter()
        .filter_map(|r| match r {
            RewardSignal::FlatBounty(b) => Some(*b),
            RewardSignal::Percent(_) => None,
        })
        .fold(0.0, f64::max)
}

/// 额外信息中是否有等于 `count` 的数字
fn has_episode_count(extra_info: &str, count: u32) -> bool {
    NUMBER
        .find_iter(extra_info)
        .any(|m| m.as_str().parse::<u32>().map(|n| n == count).unwrap_or(false))
}

/// 任务选择器
#[derive(Debug, Clone)]
pub struct TaskBindingResolver {
    sentinels: Vec<String>,
}

impl TaskBindingResolver {
    pub fn new(sentinels: Vec<String>) -> Self {
        Self { sentinels }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.no_task_sentinels.clone())
    }

    fn is_sentinel(&self, candidate: &TaskCandidate) -> bool {
        let name = candidate.raw_name.trim();
        self.sentinels.iter().any(|s| name == s.trim())
    }

    fn name_matches(candidate: &TaskCandidate, spec: &TaskBindingSpec) -> bool {
        let wanted = spec.match_title();
        if wanted.is_empty() {
            return false;
        }
        if spec.exact_match {
            canonical_title(&candidate.raw_name) == canonical_title(wanted)
        } else {
            // 只看书名号里的剧名，推广语里顺带提到的不算
            canonical_title(&candidate.raw_name).contains(wanted)
        }
    }

    /// 选出要绑定的候选项
    pub fn resolve(
        &self,
        candidates: &[TaskCandidate],
        spec: &TaskBindingSpec,
    ) -> Result<TaskCandidate, BindingError> {
        let survivors: Vec<&TaskCandidate> = candidates
            .iter()
            .filter(|c| !self.is_sentinel(c))
            .filter(|c| {
                if !c.interactive {
                    tracing::debug!("[TaskBinding] 跳过不可选的任务: {}", c.raw_name);
                }
                c.interactive
            })
            .filter(|c| match spec.sub_tag_filter.as_deref().map(str::trim) {
                Some(tag) if !tag.is_empty() => c.label.contains(tag),
                _ => true,
            })
            .filter(|c| match spec.required_episode_count {
                Some(count) => has_episode_count(&c.extra_info, count),
                None => true,
            })
            .filter(|c| Self::name_matches(c, spec))
            .collect();

        if survivors.is_empty() {
            return Err(BindingError::TaskNotFound(format!(
                "{} 个候选项中没有匹配 '{}' 的任务",
                candidates.len(),
                spec.match_title()
            )));
        }

        let best_score = survivors
            .iter()
            .map(|c| reward_score(c))
            .fold(f64::NEG_INFINITY, f64::max);
        let top: Vec<&TaskCandidate> = survivors
            .into_iter()
            .filter(|c| (reward_score(c) - best_score).abs() < SCORE_EPSILON)
            .collect();

        let first = top[0];
        let first_title = canonical_title(&first.raw_name);
        if let Some(other) = top.iter().find(|c| canonical_title(&c.raw_name) != first_title) {
            return Err(BindingError::TaskAmbiguous(format!(
                "'{}' 与 '{}' 收益相同 ({})",
                first.raw_name, other.raw_name, best_score
            )));
        }

        tracing::info!(
            "[TaskBinding] 选中任务: {} (收益分 {})",
            first.raw_name,
            best_score
        );
        Ok(first.clone())
    }

    /// 在发布页搜索并绑定任务，开启自动接单时未找到则去任务市场接单后重试一次
    pub async fn bind(
        &self,
        adapter: &dyn PlatformAdapter,
        session: &SessionHandle,
        spec: &TaskBindingSpec,
        config: &EngineConfig,
    ) -> Result<TaskCandidate, EngineError> {
        match self.search_and_select(adapter, session, spec, config).await {
            Err(EngineError::Binding(BindingError::TaskNotFound(reason))) if spec.auto_acquire => {
                tracing::info!("[TaskBinding] 发布页未找到任务 ({})，前往任务市场接单", reason);
                self.acquire_from_market(adapter, session, spec, config).await?;
                self.search_and_select(adapter, session, spec, config).await
            }
            other => other,
        }
    }

    async fn search_and_select(
        &self,
        adapter: &dyn PlatformAdapter,
        session: &SessionHandle,
        spec: &TaskBindingSpec,
        config: &EngineConfig,
    ) -> Result<TaskCandidate, EngineError> {
        let term = spec.search_term();
        let action_timeout = config.action_timeout();
        let settings = config.task_search;

        let result = wait_for("任务搜索", settings.interval(), settings.deadline(), move || async move {
            match bounded(action_timeout, "list_task_candidates", adapter.list_task_candidates(session, term)).await {
                Ok(candidates) => match self.resolve(&candidates, spec) {
                    Ok(candidate) => ProbeStatus::Ready(candidate),
                    Err(BindingError::TaskNotFound(_)) => ProbeStatus::NotYet,
                    Err(e) => ProbeStatus::Fatal(EngineError::from(e)),
                },
                Err(AdapterError::Timeout(_)) => ProbeStatus::NotYet,
                Err(e) => ProbeStatus::Fatal(EngineError::from(e)),
            }
        })
        .await;

        let candidate = match result {
            ProbeResult::Success(candidate) => candidate,
            ProbeResult::Fatal(e) => return Err(e),
            ProbeResult::Timeout { attempts, .. } => {
                return Err(BindingError::TaskNotFound(format!(
                    "搜索 '{}' {} 次未找到匹配的任务",
                    term, attempts
                ))
                .into());
            }
        };

        match bounded(action_timeout, "select_task", adapter.select_task(session, &candidate)).await {
            Ok(()) => Ok(candidate),
            Err(e @ AdapterError::ContextClosed(_)) => Err(e.into()),
            Err(e) => Err(BindingError::BindingClickFailed(format!("{}: {}", candidate.raw_name, e)).into()),
        }
    }

    async fn acquire_from_market(
        &self,
        adapter: &dyn PlatformAdapter,
        session: &SessionHandle,
        spec: &TaskBindingSpec,
        config: &EngineConfig,
    ) -> Result<(), EngineError> {
        let term = spec.search_term();
        let action_timeout = config.action_timeout();
        let settings = config.market_search;

        let result = wait_for("任务市场搜索", settings.interval(), settings.deadline(), move || async move {
            match bounded(action_timeout, "list_market_tasks", adapter.list_market_tasks(session, term)).await {
                Ok(candidates) => match self.resolve(&candidates, spec) {
                    Ok(candidate) => ProbeStatus::Ready(candidate),
                    Err(BindingError::TaskNotFound(_)) => ProbeStatus::NotYet,
                    Err(e) => ProbeStatus::Fatal(EngineError::from(e)),
                },
                Err(AdapterError::Timeout(_)) => ProbeStatus::NotYet,
                Err(AdapterError::Unavailable(what)) => {
                    ProbeStatus::Fatal(BindingError::TaskNotFound(format!("{} 不可用", what)).into())
                }
                Err(e) => ProbeStatus::Fatal(EngineError::from(e)),
            }
        })
        .await;

        let candidate = match result {
            ProbeResult::Success(candidate) => candidate,
            ProbeResult::Fatal(e) => return Err(e),
            ProbeResult::Timeout { .. } => {
                return Err(BindingError::TaskNotFound(format!("任务市场中没有 '{}'", term)).into());
            }
        };

        tracing::info!("[TaskBinding] 任务市场接单: {}", candidate.raw_name);
        match bounded(action_timeout, "acquire_task", adapter.acquire_task(session, &candidate)).await {
            Ok(()) => Ok(()),
            Err(e @ AdapterError::ContextClosed(_)) => Err(e.into()),
            Err(e) => Err(BindingError::BindingClickFailed(format!("接单失败 {}: {}", candidate.raw_name, e)).into()),
        }
    }
}
