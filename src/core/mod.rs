//! 核心编排层：错误与恢复、生命周期状态机、后台任务监管、任务编排、关闭信号、构建器

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod shutdown;
pub mod state;
pub mod supervisor;

pub use builder::AgentBuilder;
pub use error::{AgentError, RecoveryAction};
pub use orchestrator::TaskOrchestrator;
pub use recovery::RecoveryEngine;
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{AgentState, AgentStateMachine, StateGuard};
pub use supervisor::{ActivityFailure, ActivitySupervisor};
