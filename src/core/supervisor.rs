//! 后台任务监管：取消令牌、任务句柄与有界等待的关闭
//!
//! 每个后台任务都以「名称 + JoinHandle」登记；取消令牌即运行标志，任务在每个休眠间隔观察它。
//! 关闭时触发取消，再在宽限期内等待所有任务退出，超时的任务会被 abort。取消过程中的错误被收集而不是传播。

use std::future::Future;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 关闭时某个任务未能干净退出的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityFailure {
    /// 任务 panic
    Panicked(&'static str),
    /// 宽限期内未退出，已强制 abort
    TimedOut(&'static str),
}

/// 一组后台任务的生命周期管理
#[derive(Debug)]
pub struct ActivitySupervisor {
    cancel_token: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl ActivitySupervisor {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.cancel_token.is_cancelled()
    }

    /// 启动一个后台任务；闭包拿到子 token，取消父 token 时一并取消
    pub fn spawn<F, Fut>(&mut self, name: &'static str, activity: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.cancel_token.child_token();
        let handle = tokio::spawn(activity(token));
        tracing::debug!("Spawned activity '{}'", name);
        self.handles.push((name, handle));
    }

    /// 已登记的任务名
    pub fn activity_names(&self) -> Vec<&'static str> {
        self.handles.iter().map(|(n, _)| *n).collect()
    }

    /// 请求取消、在宽限期内等待全部任务退出，返回收集到的失败
    pub async fn shutdown(self, grace: Duration) -> Vec<ActivityFailure> {
        self.cancel_token.cancel();

        let waits = self.handles.into_iter().map(|(name, mut handle)| async move {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(())) => None,
                Ok(Err(e)) if e.is_cancelled() => None,
                Ok(Err(_)) => {
                    tracing::error!("Activity '{}' panicked", name);
                    Some(ActivityFailure::Panicked(name))
                }
                Err(_) => {
                    tracing::warn!(
                        "Activity '{}' did not stop within {:?}, aborting",
                        name,
                        grace
                    );
                    handle.abort();
                    let _ = handle.await;
                    Some(ActivityFailure::TimedOut(name))
                }
            }
        });

        join_all(waits).await.into_iter().flatten().collect()
    }
}

impl Default for ActivitySupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// 休眠指定时长，期间被取消则提前返回 false
pub async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
