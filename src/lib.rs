//! Colony - 自主学习智能体运行时
//!
//! 模块划分：
//! - **agent**: AgentCore 共享状态、Agent 门面、Specialization 特化接口与 LearningAgent
//! - **comms**: 智能体间消息协议、传输契约（含进程内总线）、入站路由
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、状态机、后台任务监管与编排、关闭信号、构建器
//! - **goals**: 目标管理与可插拔完成策略
//! - **learning**: 策略参数与联邦合并、可插拔策略、经验驱动的学习循环
//! - **memory**: 经验缓冲区与持久化适配器
//! - **observability**: tracing 初始化与指标出口
//! - **pipeline**: 观测 -> 决策 -> 动作 -> 学习 流水线
//! - **types**: 核心数据模型

pub mod agent;
pub mod comms;
pub mod config;
pub mod core;
pub mod goals;
pub mod learning;
pub mod memory;
pub mod observability;
pub mod pipeline;
pub mod types;

pub use agent::{Agent, AgentCore, LearningAgent, Specialization};
pub use crate::config::{load_config, AgentConfig, AppConfig};
pub use crate::core::{AgentBuilder, AgentError, AgentState};
pub use types::{Action, AgentType, Experience, Goal, GoalStatus, Observation};
