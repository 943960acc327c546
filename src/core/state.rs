//! 生命周期状态机
//!
//! `Initializing -> Idle -> {Learning, Executing, Communicating} -> Idle`，
//! 任意状态可因未处理失败进入 Error，Terminated 为唯一终态且只能由 stop 请求进入。
//! 状态机本身不含业务逻辑，只是其他组件在执行高风险操作前查询的守卫；
//! 每次迁移都会记录日志并通过 watch 通道广播，供心跳/指标任务观测。

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::core::AgentError;

/// 智能体生命周期状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Initializing,
    Idle,
    Learning,
    Executing,
    Communicating,
    Error,
    Terminated,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Initializing => "initializing",
            AgentState::Idle => "idle",
            AgentState::Learning => "learning",
            AgentState::Executing => "executing",
            AgentState::Communicating => "communicating",
            AgentState::Error => "error",
            AgentState::Terminated => "terminated",
        }
    }

    /// 从当前状态允许迁移到的目标集合（不含 Terminated，它只能经 terminate 进入）
    pub fn allowed_targets(&self) -> &'static [AgentState] {
        use AgentState::*;
        match self {
            Initializing => &[Idle, Error],
            Idle => &[Learning, Executing, Communicating, Error],
            Learning | Executing | Communicating => &[Idle, Error],
            Error => &[Idle],
            Terminated => &[],
        }
    }

    pub fn can_transition_to(&self, to: AgentState) -> bool {
        self.allowed_targets().contains(&to)
    }

    /// 是否为忙碌态（Idle 之外的三种工作态）
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            AgentState::Learning | AgentState::Executing | AgentState::Communicating
        )
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 状态机：当前状态保存在 watch 通道中，迁移为原子的 check-and-set
#[derive(Debug)]
pub struct AgentStateMachine {
    agent_id: String,
    tx: watch::Sender<AgentState>,
}

impl AgentStateMachine {
    pub fn new(agent_id: impl Into<String>) -> Self {
        let (tx, _) = watch::channel(AgentState::Initializing);
        Self {
            agent_id: agent_id.into(),
            tx,
        }
    }

    pub fn current(&self) -> AgentState {
        *self.tx.borrow()
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.tx.subscribe()
    }

    /// 迁移到目标状态；目标不在当前状态的允许集合内时返回 InvalidTransition
    pub fn transition(&self, to: AgentState) -> Result<(), AgentError> {
        self.transition_if(|_| true, to)
    }

    /// 仅当 `guard(current)` 为真且迁移合法时才迁移
    fn transition_if(
        &self,
        guard: impl Fn(AgentState) -> bool,
        to: AgentState,
    ) -> Result<(), AgentError> {
        let mut outcome = Ok(());
        self.tx.send_if_modified(|current| {
            let from = *current;
            if !guard(from) || !from.can_transition_to(to) {
                outcome = Err(AgentError::InvalidTransition { from, to });
                return false;
            }
            *current = to;
            true
        });
        match &outcome {
            Ok(()) => tracing::debug!("Agent {} state -> {}", self.agent_id, to),
            Err(e) => tracing::warn!("Agent {}: {}", self.agent_id, e),
        }
        outcome
    }

    /// 仅在 Idle 时进入忙碌态，返回的守卫在 drop 时自动回到 Idle。
    /// 当前非 Idle（例如主循环正在 Executing）时返回 None，调用方自行决定是否在无状态变化的情况下继续。
    pub fn enter_from_idle(&self, busy: AgentState) -> Option<StateGuard<'_>> {
        debug_assert!(busy.is_busy());
        let mut entered = false;
        self.tx.send_if_modified(|current| {
            if *current == AgentState::Idle && busy.is_busy() {
                *current = busy;
                entered = true;
            }
            entered
        });
        if entered {
            tracing::debug!("Agent {} state -> {}", self.agent_id, busy);
            Some(StateGuard {
                machine: self,
                busy,
            })
        } else {
            None
        }
    }

    /// 进入 Error；已终止时不可进入
    pub fn fail(&self) {
        let _ = self.transition_if(|s| s != AgentState::Error, AgentState::Error);
    }

    /// 从 Error 恢复到 Idle；当前不是 Error 时什么都不做
    pub fn recover(&self) -> bool {
        let mut recovered = false;
        self.tx.send_if_modified(|current| {
            if *current == AgentState::Error {
                *current = AgentState::Idle;
                recovered = true;
            }
            recovered
        });
        if recovered {
            tracing::info!("Agent {} recovered from error state", self.agent_id);
        }
        recovered
    }

    /// 进入终态。仅供 stop 调用；任意状态均可终止，终止后不再有任何迁移
    pub(crate) fn terminate(&self) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == AgentState::Terminated {
                return false;
            }
            *current = AgentState::Terminated;
            true
        });
        if changed {
            tracing::info!("Agent {} state -> terminated", self.agent_id);
        }
    }
}

/// 忙碌态守卫：drop 时若仍处于该忙碌态则回到 Idle（若期间已进入 Error/Terminated 则保持不动）
#[derive(Debug)]
pub struct StateGuard<'a> {
    machine: &'a AgentStateMachine,
    busy: AgentState,
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        let busy = self.busy;
        let _ = self
            .machine
            .transition_if(|current| current == busy, AgentState::Idle);
    }
}
