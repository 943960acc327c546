//! Agent 构建器：统一的 Agent 组装逻辑
//!
//! 未显式提供的协作者取默认值：LearningAgent 特化、LinearPolicy、按配置选择的持久化、
//! 不收发消息的 NullTransport、TracingMetrics。

use std::sync::Arc;

use crate::agent::{Agent, AgentCore, Collaborators, LearningAgent, Specialization};
use crate::comms::{NullTransport, Transport};
use crate::config::{AgentConfig, AppConfig, PersistenceBackend};
use crate::learning::{LinearPolicy, Policy};
use crate::memory::{InMemoryPersistence, JsonFilePersistence, PersistenceAdapter};
use crate::observability::{MetricsSink, TracingMetrics};

/// 默认特征宽度
pub const DEFAULT_INPUT_WIDTH: usize = 128;

/// Agent 构建器
pub struct AgentBuilder {
    config: AgentConfig,
    specialization: Option<Arc<dyn Specialization>>,
    policy: Option<Box<dyn Policy>>,
    persistence: Option<Arc<dyn PersistenceAdapter>>,
    transport: Option<Arc<dyn Transport>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    input_width: usize,
    seed: Option<u64>,
}

impl AgentBuilder {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            specialization: None,
            policy: None,
            persistence: None,
            transport: None,
            metrics: None,
            input_width: DEFAULT_INPUT_WIDTH,
            seed: None,
        }
    }

    /// 从应用配置创建：持久化后端、特征宽度、随机种子都取自配置。
    /// file 后端的数据目录为 `<path>/<agent_id>`
    pub fn from_app_config(app: &AppConfig) -> Self {
        let config = app.agent_config();
        let persistence: Arc<dyn PersistenceAdapter> = match app.persistence.backend {
            PersistenceBackend::Memory => Arc::new(InMemoryPersistence::new(config.memory_size)),
            PersistenceBackend::File => Arc::new(JsonFilePersistence::new(
                app.persistence.path.join(&config.agent_id),
                config.memory_size,
            )),
        };
        let mut builder = Self::new(config)
            .with_persistence(persistence)
            .with_input_width(app.policy.input_width);
        if let Some(seed) = app.policy.seed {
            builder = builder.with_seed(seed);
        }
        builder
    }

    pub fn with_specialization(mut self, specialization: Arc<dyn Specialization>) -> Self {
        self.specialization = Some(specialization);
        self
    }

    pub fn with_policy(mut self, policy: Box<dyn Policy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceAdapter>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// 默认 LinearPolicy 的输入宽度
    pub fn with_input_width(mut self, width: usize) -> Self {
        self.input_width = width.max(1);
        self
    }

    /// 权重初始化、经验采样与探索共用的种子
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn build(self) -> Agent {
        let specialization: Arc<dyn Specialization> = match self.specialization {
            Some(s) => s,
            None => Arc::new(LearningAgent),
        };
        let action_count = specialization.action_types().len();
        let policy: Box<dyn Policy> = match self.policy {
            Some(p) => p,
            None => {
                let lr = self.config.learning_rate;
                match self.seed {
                    Some(seed) => Box::new(LinearPolicy::with_seed(self.input_width, action_count, lr, seed)),
                    None => Box::new(LinearPolicy::new(self.input_width, action_count, lr)),
                }
            }
        };
        let persistence: Arc<dyn PersistenceAdapter> = match self.persistence {
            Some(p) => p,
            None => Arc::new(InMemoryPersistence::new(self.config.memory_size)),
        };
        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => Arc::new(NullTransport),
        };
        let metrics: Arc<dyn MetricsSink> = match self.metrics {
            Some(m) => m,
            None => Arc::new(TracingMetrics),
        };

        let core = AgentCore::new(
            self.config,
            Collaborators {
                specialization,
                policy,
                persistence,
                transport,
                metrics,
                seed: self.seed,
            },
        );
        Agent::new(core)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AgentState;

    #[tokio::test]
    async fn test_default_build_uses_learning_agent() {
        let agent = AgentBuilder::new(AgentConfig::new("built")).with_seed(1).build();
        assert_eq!(agent.id(), "built");
        assert_eq!(agent.state(), AgentState::Initializing);
        let params = agent.core().learning().parameter_count().await;
        assert_eq!(params, DEFAULT_INPUT_WIDTH * 10 + 10);
    }

    #[tokio::test]
    async fn test_from_app_config_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = AppConfig::default();
        app.agent.id = Some("filed".into());
        app.persistence.backend = PersistenceBackend::File;
        app.persistence.path = dir.path().to_path_buf();
        app.policy.input_width = 8;

        let agent = AgentBuilder::from_app_config(&app).build();
        agent.initialize().await.unwrap();
        assert!(dir.path().join("filed").is_dir());
        assert_eq!(agent.core().learning().input_width().await, 8);
    }
}
