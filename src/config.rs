//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `COLONY__*` 覆盖（双下划线表示嵌套，如 `COLONY__AGENT__BATCH_SIZE=64`）。
//! `AppConfig::agent_config()` 产出创建智能体用的不可变 `AgentConfig`。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::AgentError;
use crate::types::AgentType;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub runtime: RuntimeSection,
    pub persistence: PersistenceSection,
    pub policy: PolicySection,
}

/// [agent] 段：身份与学习超参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 未设置时生成随机 id
    pub id: Option<String>,
    pub agent_type: AgentType,
    pub learning_rate: f64,
    pub memory_size: usize,
    pub max_concurrent_tasks: usize,
    pub exploration_rate: f64,
    pub discount_factor: f64,
    pub batch_size: usize,
    pub heartbeat_interval_secs: u64,
    /// 单个动作执行超时（秒）
    pub timeout_duration_secs: u64,
    /// 关闭时不发心跳、不处理 coordination 消息
    pub coordination_enabled: bool,
    /// 关闭时不启动指标任务
    pub metrics_enabled: bool,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            id: None,
            agent_type: AgentType::Generic,
            learning_rate: 0.001,
            memory_size: 10_000,
            max_concurrent_tasks: 5,
            exploration_rate: 0.1,
            discount_factor: 0.99,
            batch_size: 32,
            heartbeat_interval_secs: 30,
            timeout_duration_secs: 60,
            coordination_enabled: true,
            metrics_enabled: true,
        }
    }
}

/// [runtime] 段：后台任务节奏
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    pub main_loop_interval_ms: u64,
    pub error_backoff_secs: u64,
    pub metrics_interval_secs: u64,
    pub policy_save_interval_secs: u64,
    pub exploration_decay_interval_secs: u64,
    /// stop 时等待后台任务退出的宽限期
    pub shutdown_grace_secs: u64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            main_loop_interval_ms: 1000,
            error_backoff_secs: 5,
            metrics_interval_secs: 60,
            policy_save_interval_secs: 300,
            exploration_decay_interval_secs: 60,
            shutdown_grace_secs: 10,
        }
    }
}

/// 持久化后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceBackend {
    #[default]
    Memory,
    File,
}

/// [persistence] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceSection {
    pub backend: PersistenceBackend,
    /// file 后端的数据目录（每个智能体一个子目录）
    pub path: PathBuf,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            backend: PersistenceBackend::Memory,
            path: PathBuf::from("data"),
        }
    }
}

/// [policy] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    /// 特征宽度（补零/截断到此宽度）
    pub input_width: usize,
    /// 权重初始化与探索用随机种子；未设置时取系统熵
    pub seed: Option<u64>,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            input_width: 128,
            seed: None,
        }
    }
}

/// 后台任务节奏（已换算为 Duration）
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    pub main_loop_interval: Duration,
    pub error_backoff: Duration,
    pub metrics_interval: Duration,
    pub policy_save_interval: Duration,
    pub exploration_decay_interval: Duration,
    pub shutdown_grace: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        RuntimeSection::default().into()
    }
}

impl From<RuntimeSection> for RuntimeSettings {
    fn from(s: RuntimeSection) -> Self {
        Self {
            main_loop_interval: Duration::from_millis(s.main_loop_interval_ms),
            error_backoff: Duration::from_secs(s.error_backoff_secs),
            metrics_interval: Duration::from_secs(s.metrics_interval_secs),
            policy_save_interval: Duration::from_secs(s.policy_save_interval_secs),
            exploration_decay_interval: Duration::from_secs(s.exploration_decay_interval_secs),
            shutdown_grace: Duration::from_secs(s.shutdown_grace_secs),
        }
    }
}

/// 智能体创建参数，创建后不可变
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub agent_id: String,
    pub agent_type: AgentType,
    pub learning_rate: f64,
    pub memory_size: usize,
    pub max_concurrent_tasks: usize,
    pub exploration_rate: f64,
    pub discount_factor: f64,
    pub batch_size: usize,
    pub heartbeat_interval: Duration,
    pub timeout_duration: Duration,
    pub coordination_enabled: bool,
    pub metrics_enabled: bool,
    pub runtime: RuntimeSettings,
}

impl AgentConfig {
    /// 以默认超参数创建
    pub fn new(agent_id: impl Into<String>) -> Self {
        AgentSection::default().into_agent_config(agent_id.into(), RuntimeSettings::default())
    }

    pub fn with_agent_type(mut self, agent_type: AgentType) -> Self {
        self.agent_type = agent_type;
        self
    }

    /// 校验不变量：比率 ∈ [0,1]，容量与间隔 > 0
    pub fn validate(&self) -> Result<(), AgentError> {
        let fail = |msg: String| Err(AgentError::Initialization(msg));
        if self.agent_id.trim().is_empty() {
            return fail("agent_id is empty".into());
        }
        for (name, value) in [
            ("learning_rate", self.learning_rate),
            ("exploration_rate", self.exploration_rate),
            ("discount_factor", self.discount_factor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return fail(format!("{} must be within [0, 1], got {}", name, value));
            }
        }
        for (name, value) in [
            ("memory_size", self.memory_size),
            ("max_concurrent_tasks", self.max_concurrent_tasks),
            ("batch_size", self.batch_size),
        ] {
            if value == 0 {
                return fail(format!("{} must be greater than 0", name));
            }
        }
        let r = &self.runtime;
        for (name, value) in [
            ("heartbeat_interval", self.heartbeat_interval),
            ("timeout_duration", self.timeout_duration),
            ("main_loop_interval", r.main_loop_interval),
            ("metrics_interval", r.metrics_interval),
            ("policy_save_interval", r.policy_save_interval),
            ("exploration_decay_interval", r.exploration_decay_interval),
        ] {
            if value.is_zero() {
                return fail(format!("{} must be greater than 0", name));
            }
        }
        Ok(())
    }
}

impl AgentSection {
    fn into_agent_config(self, agent_id: String, runtime: RuntimeSettings) -> AgentConfig {
        AgentConfig {
            agent_id,
            agent_type: self.agent_type,
            learning_rate: self.learning_rate,
            memory_size: self.memory_size,
            max_concurrent_tasks: self.max_concurrent_tasks,
            exploration_rate: self.exploration_rate,
            discount_factor: self.discount_factor,
            batch_size: self.batch_size,
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            timeout_duration: Duration::from_secs(self.timeout_duration_secs),
            coordination_enabled: self.coordination_enabled,
            metrics_enabled: self.metrics_enabled,
            runtime,
        }
    }
}

impl AppConfig {
    /// 产出智能体配置；未配置 id 时生成 `<type>-<uuid 前 8 位>`
    pub fn agent_config(&self) -> AgentConfig {
        let agent_id = self.agent.id.clone().unwrap_or_else(|| {
            let uuid = uuid::Uuid::new_v4().simple().to_string();
            format!("{}-{}", self.agent.agent_type, &uuid[..8])
        });
        self.agent
            .clone()
            .into_agent_config(agent_id, self.runtime.clone().into())
    }
}

/// 从 config 目录加载配置，环境变量 COLONY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 COLONY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path).required(false));
        } else {
            tracing::warn!("Config file {} not found, ignoring", path.display());
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("COLONY")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
