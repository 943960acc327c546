//! 任务编排器：启动、运行与协作式取消一个智能体的全部后台任务
//!
//! 后台任务：main（目标处理）、heartbeat、metrics、listener（入站消息分发）、
//! policy_persist（周期保存策略）、exploration_decay（周期衰减探索率）。
//! 每个任务自行捕获失败、记录、退避后继续，只有取消能让它退出。
//! stop：触发取消（取消令牌即运行标志） -> 有界等待全部任务退出 -> 持久化 -> 释放协作者 -> Terminated。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentCore;
use crate::comms::{MessageHandler, MessageRouter, TOPIC_COORDINATION, TOPIC_GOAL, TOPIC_HEARTBEAT, TOPIC_LEARNING};
use crate::core::supervisor::{sleep_or_cancel, ActivitySupervisor};
use crate::core::{AgentError, AgentState, RecoveryAction, RecoveryEngine};
use crate::learning::PERIODIC_DECAY;

pub struct TaskOrchestrator {
    core: Arc<AgentCore>,
    supervisor: Mutex<Option<ActivitySupervisor>>,
}

impl TaskOrchestrator {
    pub fn new(core: Arc<AgentCore>) -> Self {
        Self {
            core,
            supervisor: Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.supervisor
            .lock()
            .await
            .as_ref()
            .map_or(false, ActivitySupervisor::is_running)
    }

    /// 已启动的任务名
    pub async fn activity_names(&self) -> Vec<&'static str> {
        self.supervisor
            .lock()
            .await
            .as_ref()
            .map(ActivitySupervisor::activity_names)
            .unwrap_or_default()
    }

    /// 启动全部后台任务。要求已初始化（Idle）；已在运行时什么都不做
    pub async fn start(&self) -> Result<(), AgentError> {
        let mut slot = self.supervisor.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        let core = &self.core;
        let state = core.state().current();
        if state != AgentState::Idle {
            return Err(AgentError::Initialization(format!(
                "agent {} cannot start from state {}",
                core.id(),
                state
            )));
        }
        tracing::info!("Starting agent {}", core.id());

        let router = Arc::new(build_router(core));
        let cfg = core.config();
        let mut supervisor = ActivitySupervisor::new();

        let c = core.clone();
        supervisor.spawn("main", move |token| main_activity(c, token));
        if cfg.coordination_enabled {
            let c = core.clone();
            supervisor.spawn("heartbeat", move |token| heartbeat_activity(c, token));
        }
        if cfg.metrics_enabled {
            let c = core.clone();
            supervisor.spawn("metrics", move |token| metrics_activity(c, token));
        }
        let c = core.clone();
        supervisor.spawn("listener", move |token| listener_activity(c, router, token));
        let c = core.clone();
        supervisor.spawn("policy_persist", move |token| policy_persist_activity(c, token));
        let c = core.clone();
        supervisor.spawn("exploration_decay", move |token| exploration_decay_activity(c, token));

        *slot = Some(supervisor);
        Ok(())
    }

    /// 停止；未运行时为 no-op，重复调用结果相同
    pub async fn stop(&self) {
        let mut slot = self.supervisor.lock().await;
        let Some(supervisor) = slot.take() else {
            return;
        };
        let core = &self.core;
        tracing::info!("Stopping agent {}", core.id());

        let failures = supervisor.shutdown(core.config().runtime.shutdown_grace).await;
        for failure in &failures {
            tracing::warn!("Agent {}: activity did not stop cleanly: {:?}", core.id(), failure);
        }

        if let Err(e) = core.save_state().await {
            tracing::error!("Agent {}: could not save state: {}", core.id(), e);
        }
        if let Err(e) = core.save_policy().await {
            tracing::error!("Agent {}: could not save policy: {}", core.id(), e);
        }
        core.release().await;
        core.state().terminate();
        tracing::info!("Agent {} stopped", core.id());
    }
}

fn build_router(core: &Arc<AgentCore>) -> MessageRouter {
    let handler: Arc<dyn MessageHandler> = core.clone();
    let mut router = MessageRouter::new();
    router.register_handler(TOPIC_HEARTBEAT, handler.clone());
    router.register_handler(TOPIC_LEARNING, handler.clone());
    router.register_handler(TOPIC_GOAL, handler.clone());
    if core.config().coordination_enabled {
        router.register_handler(TOPIC_COORDINATION, handler);
    }
    router
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// 空闲时处理活跃目标；一轮 panic 时进入 Error，退避后恢复到 Idle
async fn main_activity(core: Arc<AgentCore>, token: CancellationToken) {
    let runtime = &core.config().runtime;
    let interval = runtime.main_loop_interval;
    let backoff = runtime.error_backoff;
    while !token.is_cancelled() {
        let cycle = AssertUnwindSafe(core.work_on_goals()).catch_unwind().await;
        let failed = match cycle {
            Ok(_) => false,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                tracing::error!("Agent {}: error in main loop: {}", core.id(), reason);
                core.metrics_sink().record_error(core.id(), "main_loop", &reason).await;
                core.state().fail();
                true
            }
        };
        let pause = if failed { backoff.max(interval) } else { interval };
        if !sleep_or_cancel(&token, pause).await {
            break;
        }
        if failed {
            core.state().recover();
        }
    }
    tracing::debug!("Agent {}: main activity stopped", core.id());
}

async fn heartbeat_activity(core: Arc<AgentCore>, token: CancellationToken) {
    let recovery = RecoveryEngine::new(core.config().runtime.error_backoff);
    let interval = core.config().heartbeat_interval;
    loop {
        let heartbeat = core.heartbeat().await;
        let pause = match core.communicate(&heartbeat, None).await {
            Ok(()) => interval,
            Err(e) => {
                tracing::error!("Agent {}: error in heartbeat loop: {}", core.id(), e);
                core.metrics_sink().record_error(core.id(), "heartbeat", &e.to_string()).await;
                recovery.sleep_after(&e, interval)
            }
        };
        if !sleep_or_cancel(&token, pause).await {
            break;
        }
    }
}

async fn metrics_activity(core: Arc<AgentCore>, token: CancellationToken) {
    let interval = core.config().runtime.metrics_interval;
    loop {
        let snapshot = core.get_metrics().await;
        core.metrics_sink().record_metrics(core.id(), &snapshot).await;
        if !sleep_or_cancel(&token, interval).await {
            break;
        }
    }
}

/// 逐条接收入站消息并顺序分发
async fn listener_activity(core: Arc<AgentCore>, router: Arc<MessageRouter>, token: CancellationToken) {
    let recovery = RecoveryEngine::new(core.config().runtime.error_backoff);
    loop {
        let received = tokio::select! {
            _ = token.cancelled() => break,
            received = core.transport().recv() => received,
        };
        let failure = match received {
            Ok(Some(raw)) => match router.route(raw).await {
                Ok(_) => None,
                Err(e) => Some(e),
            },
            Ok(None) => {
                tracing::info!("Agent {}: transport closed, listener idle until stop", core.id());
                token.cancelled().await;
                break;
            }
            Err(e) => Some(e),
        };
        let Some(e) = failure else {
            continue;
        };
        match recovery.handle(&e) {
            RecoveryAction::Drop => {
                tracing::warn!("Agent {}: dropped inbound message: {}", core.id(), e);
            }
            _ => {
                tracing::error!("Agent {}: error handling message: {}", core.id(), e);
                core.metrics_sink().record_error(core.id(), "listener", &e.to_string()).await;
                let pause = recovery.sleep_after(&e, Duration::ZERO);
                if !sleep_or_cancel(&token, pause).await {
                    break;
                }
            }
        }
    }
}

async fn policy_persist_activity(core: Arc<AgentCore>, token: CancellationToken) {
    let recovery = RecoveryEngine::new(core.config().runtime.error_backoff);
    let interval = core.config().runtime.policy_save_interval;
    let mut pause = interval;
    while sleep_or_cancel(&token, pause).await {
        pause = match core.save_policy().await {
            Ok(()) => {
                tracing::debug!("Agent {}: policy saved", core.id());
                interval
            }
            Err(e) => {
                tracing::error!("Agent {}: could not save policy: {}", core.id(), e);
                recovery.sleep_after(&e, interval)
            }
        };
    }
}

async fn exploration_decay_activity(core: Arc<AgentCore>, token: CancellationToken) {
    let interval = core.config().runtime.exploration_decay_interval;
    while sleep_or_cancel(&token, interval).await {
        let rate = core.learning().decay_exploration(PERIODIC_DECAY).await;
        tracing::trace!("Agent {}: exploration rate {:.4}", core.id(), rate);
    }
}
