//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 Continue / Backoff / Drop / Abort。
//! 除初始化失败外，任何错误都不允许终止智能体。

use std::time::Duration;

use thiserror::Error;

use crate::core::AgentState;

/// 智能体运行过程中可能出现的错误（初始化、状态迁移、动作执行、对端数据校验、训练、通信、持久化）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 致命：启动中止，智能体进入 Error 状态且不启动后台任务
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// 编程错误：拒绝并记录
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: AgentState, to: AgentState },

    /// 单个动作执行失败，记录并上报指标，不影响其余动作
    #[error("Execution of '{action_type}' failed: {reason}")]
    Execution { action_type: String, reason: String },

    /// 对端发来的畸形数据，丢弃
    #[error("Validation error: {0}")]
    Validation(String),

    /// 本次训练跳过
    #[error("Training error: {0}")]
    Training(String),

    /// 通信失败，所在任务退避后重试
    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    pub fn execution(action_type: impl Into<String>, reason: impl ToString) -> Self {
        Self::Execution {
            action_type: action_type.into(),
            reason: reason.to_string(),
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 记录后按正常节奏继续
    Continue,
    /// 记录后延长休眠再重试
    Backoff(Duration),
    /// 丢弃当前输入
    Drop,
    /// 终止启动
    Abort,
}
