//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供后台任务决定是继续、退避、丢弃还是终止。
//! 所有后台任务的失败处理都遵循「记录、上报、退避、继续」，直到被显式取消。

use std::time::Duration;

use crate::core::{AgentError, RecoveryAction};

/// 退避上限：任何任务的单次错误休眠不超过此值，保证取消延迟有界
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    /// 通信/持久化失败时的基础退避时长
    error_backoff: Duration,
}

impl RecoveryEngine {
    pub fn new(error_backoff: Duration) -> Self {
        Self {
            error_backoff: error_backoff.min(MAX_BACKOFF),
        }
    }

    /// 根据错误类型返回建议的恢复动作
    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::Initialization(_) => RecoveryAction::Abort,
            AgentError::InvalidTransition { .. } | AgentError::Validation(_) => {
                RecoveryAction::Drop
            }
            AgentError::Execution { .. } | AgentError::Training(_) => RecoveryAction::Continue,
            AgentError::Communication(_)
            | AgentError::Persistence(_)
            | AgentError::Config(_)
            | AgentError::Io(_) => RecoveryAction::Backoff(self.error_backoff),
        }
    }

    /// 一次失败迭代之后应休眠多久：退避类错误取 max(正常间隔, 退避)，其余按正常间隔
    pub fn sleep_after(&self, err: &AgentError, normal: Duration) -> Duration {
        match self.handle(err) {
            RecoveryAction::Backoff(d) => normal.max(d).min(MAX_BACKOFF.max(normal)),
            _ => normal.max(self.error_backoff.min(normal * 5)),
        }
    }
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
