//! WaitPoll - 有截止时间的轮询
//!
//! 引擎里所有等待点都通过这里：探测函数返回 NotYet 时按间隔重试，
//! 直到成功、致命错误或截止时间。不会越过自己的截止时间重试，
//! 超时是否致命由调用方决定。

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// 单次探测结果
#[derive(Debug)]
pub enum ProbeStatus<T, E, R = String> {
    NotYet,
    /// 可识别的临时状态，交给 `on_transient` 处理后继续轮询
    Transient(R),
    Ready(T),
    Fatal(E),
}

/// 轮询结果
#[derive(Debug)]
pub enum ProbeResult<T, E> {
    Success(T),
    Fatal(E),
    Timeout { attempts: u32, elapsed: Duration },
}

impl<T, E> ProbeResult<T, E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProbeResult::Timeout { .. })
    }
}

/// 轮询直到探测成功
///
/// 每次 NotYet 之后，如果再等一个间隔就会到达截止时间则返回 Timeout，
/// 因此 N 次 NotYet 后成功的探测在 `N * interval < deadline` 时恰好调用 N+1 次。
/// 单次探测本身也受截止时间约束。
pub async fn wait_until<T, E, R, P, PFut, H, HFut>(
    label: &str,
    interval: Duration,
    deadline: Duration,
    mut probe: P,
    mut on_transient: H,
) -> ProbeResult<T, E>
where
    R: Debug,
    P: FnMut() -> PFut,
    PFut: Future<Output = ProbeStatus<T, E, R>>,
    H: FnMut(R) -> HFut,
    HFut: Future<Output = Result<(), E>>,
{
    let started = Instant::now();
    let deadline_at = started + deadline;
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let status = match tokio::time::timeout_at(deadline_at, probe()).await {
            Ok(status) => status,
            Err(_) => {
                tracing::warn!("[WaitPoll] {} 探测超过截止时间，第 {} 次", label, attempts);
                return ProbeResult::Timeout {
                    attempts,
                    elapsed: started.elapsed(),
                };
            }
        };

        match status {
            ProbeStatus::Ready(value) => {
                tracing::debug!("[WaitPoll] {} 完成，共探测 {} 次", label, attempts);
                return ProbeResult::Success(value);
            }
            ProbeStatus::Fatal(e) => {
                tracing::debug!("[WaitPoll] {} 致命错误，第 {} 次", label, attempts);
                return ProbeResult::Fatal(e);
            }
            ProbeStatus::Transient(reason) => {
                tracing::info!("[WaitPoll] {} 临时状态: {:?}", label, reason);
                if let Err(e) = on_transient(reason).await {
                    return ProbeResult::Fatal(e);
                }
            }
            ProbeStatus::NotYet => {}
        }

        let now = Instant::now();
        if now + interval >= deadline_at {
            let elapsed = now - started;
            tracing::warn!(
                "[WaitPoll] {} 超时: {:?} 内探测 {} 次未完成",
                label,
                elapsed,
                attempts
            );
            return ProbeResult::Timeout { attempts, elapsed };
        }
        tokio::time::sleep(interval).await;
    }
}

/// 没有临时状态处理的轮询
pub async fn wait_for<T, E, P, PFut>(
    label: &str,
    interval: Duration,
    deadline: Duration,
    probe: P,
) -> ProbeResult<T, E>
where
    P: FnMut() -> PFut,
    PFut: Future<Output = ProbeStatus<T, E>>,
{
    wait_until(label, interval, deadline, probe, |_: String| async { Ok(()) }).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn counting_probe(
        calls: &Cell<u32>,
        not_yet: u32,
    ) -> impl FnMut() -> std::future::Ready<ProbeStatus<u32, String>> + '_ {
        move || {
            calls.set(calls.get() + 1);
            let status = if calls.get() > not_yet {
                ProbeStatus::Ready(calls.get())
            } else {
                ProbeStatus::NotYet
            };
            std::future::ready(status)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_n_plus_one_calls() {
        let calls = Cell::new(0);
        let result = wait_for(
            "test",
            Duration::from_millis(500),
            Duration::from_secs(10),
            counting_probe(&calls, 4),
        )
        .await;

        assert!(matches!(result, ProbeResult::Success(5)));
        assert_eq!(calls.get(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_when_interval_budget_exhausted() {
        // 4 * 500ms == 2s，不满足 N * interval < deadline
        let calls = Cell::new(0);
        let started = Instant::now();
        let result = wait_for(
            "test",
            Duration::from_millis(500),
            Duration::from_secs(2),
            counting_probe(&calls, 4),
        )
        .await;

        match result {
            ProbeResult::Timeout { attempts, elapsed } => {
                assert_eq!(attempts, 4);
                assert!(elapsed <= Duration::from_secs(2));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(started.elapsed() <= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_returns_immediately() {
        let calls = Cell::new(0);
        let result: ProbeResult<(), String> = wait_for(
            "test",
            Duration::from_secs(1),
            Duration::from_secs(60),
            || {
                calls.set(calls.get() + 1);
                std::future::ready(ProbeStatus::Fatal("context closed".to_string()))
            },
        )
        .await;

        assert!(matches!(result, ProbeResult::Fatal(ref e) if e == "context closed"));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_handler_runs_then_polling_continues() {
        let calls = Cell::new(0);
        let handled = Cell::new(0);
        let result: ProbeResult<&str, String> = wait_until(
            "test",
            Duration::from_secs(2),
            Duration::from_secs(60),
            || {
                calls.set(calls.get() + 1);
                let status = match calls.get() {
                    1 => ProbeStatus::Transient("上传失败".to_string()),
                    2 => ProbeStatus::NotYet,
                    _ => ProbeStatus::Ready("done"),
                };
                std::future::ready(status)
            },
            |_| {
                handled.set(handled.get() + 1);
                std::future::ready(Ok(()))
            },
        )
        .await;

        assert!(matches!(result, ProbeResult::Success("done")));
        assert_eq!(handled.get(), 1);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_handler_error_is_fatal() {
        let result: ProbeResult<(), String> = wait_until(
            "test",
            Duration::from_secs(1),
            Duration::from_secs(60),
            || std::future::ready(ProbeStatus::Transient("上传失败".to_string())),
            |reason: String| std::future::ready(Err(format!("放弃: {}", reason))),
        )
        .await;

        assert!(matches!(result, ProbeResult::Fatal(ref e) if e.contains("上传失败")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_probe_bounded_by_deadline() {
        let result: ProbeResult<(), String> = wait_for(
            "test",
            Duration::from_millis(500),
            Duration::from_secs(3),
            || async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                ProbeStatus::NotYet
            },
        )
        .await;

        assert!(matches!(result, ProbeResult::Timeout { attempts: 1, .. }));
    }
}
