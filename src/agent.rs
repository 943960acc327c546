//! 智能体运行时
//!
//! - `Specialization`：具体智能体的能力集合（动作表、特征映射、动作效果、特化指标、各类消息钩子、目标完成策略）
//! - `AgentCore`：一个智能体的共享状态（状态机、目标、学习循环、流水线、协作者），被所有后台任务以 Arc 共享
//! - `Agent`：对外门面，initialize / start / stop / observe / add_goal / share_knowledge / get_metrics
//! - `LearningAgent`：基于可训练策略的默认特化

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;

use crate::comms::{
    AgentMessage, CoordinationMessage, GoalMessage, Heartbeat, KnowledgeKind, LearningMessage,
    MessageHandler, Transport,
};
use crate::config::AgentConfig;
use crate::core::orchestrator::TaskOrchestrator;
use crate::core::{AgentError, AgentState, AgentStateMachine};
use crate::goals::{CompletionPolicy, ElapsedTimeCompletion, GoalManager};
use crate::learning::{LearningLoop, LearningSettings, Policy, PolicyParameters};
use crate::memory::PersistenceAdapter;
use crate::observability::MetricsSink;
use crate::pipeline::{observation_features, ObservationActionPipeline};
use crate::types::{now_secs, Action, AgentType, Goal, Observation, PersistedState};

/// 动作执行结果：结果负载 + 用于学习的奖励
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub result: Value,
    pub reward: f64,
}

/// 智能体特化
///
/// 消息钩子都有默认实现（委托给 AgentCore 的通用处理），特化只需覆盖关心的部分。
#[async_trait]
pub trait Specialization: Send + Sync {
    /// 动作表：策略输出的第 i 个得分对应第 i 个动作类型
    fn action_types(&self) -> &[&'static str];

    /// 观测 -> 特征；必须是确定的全函数
    fn features(&self, observation: &Observation) -> Vec<f64> {
        observation_features(observation)
    }

    /// 执行动作的效果
    async fn apply(&self, action: &Action) -> Result<ActionOutcome, AgentError>;

    /// 并入 get_metrics 的特化指标
    async fn agent_metrics(&self, _core: &AgentCore) -> Map<String, Value> {
        Map::new()
    }

    async fn handle_task_assignment(
        &self,
        core: &AgentCore,
        task_data: &Map<String, Value>,
    ) -> Result<(), AgentError> {
        core.assign_task(task_data).await.map(|_| ())
    }

    async fn handle_resource_sharing(
        &self,
        core: &AgentCore,
        resource_type: Option<&str>,
        _resources: &Value,
    ) -> Result<(), AgentError> {
        tracing::debug!(
            "Agent {}: resource sharing offer ({}) ignored",
            core.id(),
            resource_type.unwrap_or("unspecified")
        );
        Ok(())
    }

    async fn handle_knowledge_sharing(
        &self,
        core: &AgentCore,
        knowledge_type: &str,
        experiences: &[Value],
        insights: &Value,
    ) -> Result<(), AgentError> {
        core.absorb_knowledge(knowledge_type, experiences, insights).await
    }

    async fn handle_model_update(
        &self,
        core: &AgentCore,
        weights: &PolicyParameters,
    ) -> Result<(), AgentError> {
        core.learning().handle_model_update(weights).await;
        Ok(())
    }

    async fn handle_experience_sharing(
        &self,
        core: &AgentCore,
        experiences: &[Value],
    ) -> Result<(), AgentError> {
        let admitted = core.learning().handle_experience_sharing(experiences).await;
        tracing::debug!(
            "Agent {}: admitted {}/{} shared experiences",
            core.id(),
            admitted,
            experiences.len()
        );
        Ok(())
    }

    /// 目标完成判定
    fn completion_policy(&self) -> Arc<dyn CompletionPolicy> {
        Arc::new(ElapsedTimeCompletion::default())
    }
}

/// 学习型智能体的动作表
pub const LEARNING_ACTION_TYPES: [&str; 10] = [
    "analyze",
    "communicate",
    "learn",
    "plan",
    "execute",
    "coordinate",
    "optimize",
    "monitor",
    "adapt",
    "report",
];

/// 基于可训练策略的特化：奖励取动作携带的观测置信度，指标中附带学习指标
#[derive(Debug, Default, Clone)]
pub struct LearningAgent;

#[async_trait]
impl Specialization for LearningAgent {
    fn action_types(&self) -> &[&'static str] {
        &LEARNING_ACTION_TYPES
    }

    async fn apply(&self, action: &Action) -> Result<ActionOutcome, AgentError> {
        let reward = action
            .parameters
            .get("confidence")
            .and_then(Value::as_f64)
            .filter(|c| c.is_finite())
            .unwrap_or(0.0);
        Ok(ActionOutcome {
            result: json!({
                "action_id": action.action_id,
                "status": "completed",
                "timestamp": now_secs(),
            }),
            reward,
        })
    }

    async fn agent_metrics(&self, core: &AgentCore) -> Map<String, Value> {
        let learning = core.learning();
        let mut metrics = match serde_json::to_value(learning.metrics().await) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        metrics.insert("experience_buffer_size".into(), learning.buffer_len().await.into());
        metrics.insert("model_parameters".into(), learning.parameter_count().await.into());
        metrics
    }
}

/// 一个智能体的共享状态
pub struct AgentCore {
    config: AgentConfig,
    state: AgentStateMachine,
    goals: GoalManager,
    learning: Arc<LearningLoop>,
    pipeline: ObservationActionPipeline,
    specialization: Arc<dyn Specialization>,
    persistence: Arc<dyn PersistenceAdapter>,
    transport: Arc<dyn Transport>,
    metrics: Arc<dyn MetricsSink>,
    performance_metrics: RwLock<BTreeMap<String, f64>>,
    /// 对端最近一次心跳
    peers: RwLock<BTreeMap<String, Heartbeat>>,
    started_at: Instant,
}

/// AgentCore 的协作者
pub struct Collaborators {
    pub specialization: Arc<dyn Specialization>,
    pub policy: Box<dyn Policy>,
    pub persistence: Arc<dyn PersistenceAdapter>,
    pub transport: Arc<dyn Transport>,
    pub metrics: Arc<dyn MetricsSink>,
    pub seed: Option<u64>,
}

impl AgentCore {
    pub fn new(config: AgentConfig, parts: Collaborators) -> Self {
        let agent_id = config.agent_id.clone();
        let learning = Arc::new(LearningLoop::new(
            agent_id.clone(),
            parts.policy,
            LearningSettings {
                memory_size: config.memory_size,
                batch_size: config.batch_size,
                discount_factor: config.discount_factor,
                exploration_rate: config.exploration_rate,
                seed: parts.seed,
            },
        ));
        let goals = GoalManager::new(agent_id.clone(), parts.persistence.clone())
            .with_completion_policy(parts.specialization.completion_policy());
        let mut pipeline = ObservationActionPipeline::new(
            agent_id.clone(),
            parts.specialization.clone(),
            learning.clone(),
            parts.persistence.clone(),
            parts.metrics.clone(),
        )
        .with_timeout(config.timeout_duration);
        if let Some(seed) = parts.seed {
            pipeline = pipeline.with_seed(seed.wrapping_add(1));
        }

        Self {
            state: AgentStateMachine::new(agent_id),
            config,
            goals,
            learning,
            pipeline,
            specialization: parts.specialization,
            persistence: parts.persistence,
            transport: parts.transport,
            metrics: parts.metrics,
            performance_metrics: RwLock::new(BTreeMap::new()),
            peers: RwLock::new(BTreeMap::new()),
            started_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.agent_id
    }

    pub fn agent_type(&self) -> AgentType {
        self.config.agent_type
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn state(&self) -> &AgentStateMachine {
        &self.state
    }

    pub fn goals(&self) -> &GoalManager {
        &self.goals
    }

    pub fn learning(&self) -> &Arc<LearningLoop> {
        &self.learning
    }

    pub fn pipeline(&self) -> &ObservationActionPipeline {
        &self.pipeline
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn metrics_sink(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    pub fn persistence(&self) -> &Arc<dyn PersistenceAdapter> {
        &self.persistence
    }

    pub async fn performance_metrics(&self) -> BTreeMap<String, f64> {
        self.performance_metrics.read().await.clone()
    }

    pub async fn known_peers(&self) -> Vec<String> {
        self.peers.read().await.keys().cloned().collect()
    }

    /// 指标快照：通用字段 + 特化字段
    pub async fn get_metrics(&self) -> Value {
        let counts = self.goals.counts().await;
        let mut metrics = Map::new();
        metrics.insert("agent_id".into(), self.id().into());
        metrics.insert("agent_type".into(), self.agent_type().to_string().into());
        metrics.insert("state".into(), self.state.current().as_str().into());
        metrics.insert("goals_count".into(), counts.total.into());
        metrics.insert("active_goals".into(), counts.active.into());
        metrics.insert("completed_goals".into(), counts.completed.into());
        metrics.insert("actions_taken".into(), self.pipeline.actions_taken().await.into());
        metrics.insert(
            "observations_processed".into(),
            self.pipeline.observations_processed().await.into(),
        );
        metrics.insert(
            "memory_utilization".into(),
            self.persistence.utilization().await.into(),
        );
        metrics.insert(
            "uptime".into(),
            self.started_at.elapsed().as_secs_f64().into(),
        );
        for (key, value) in self.specialization.agent_metrics(self).await {
            metrics.insert(key, value);
        }
        Value::Object(metrics)
    }

    pub async fn heartbeat(&self) -> AgentMessage {
        AgentMessage::Heartbeat(Heartbeat {
            agent_id: self.id().to_string(),
            timestamp: now_secs(),
            state: self.state.current().as_str().to_string(),
            metrics: self.get_metrics().await,
        })
    }

    /// 发送消息；target 为 None 时广播
    pub async fn communicate(&self, message: &AgentMessage, target: Option<&str>) -> Result<(), AgentError> {
        self.transport.send(message, target).await?;
        tracing::debug!("Agent {}: sent {} message", self.id(), message.topic());
        Ok(())
    }

    /// 对单个目标：构造 goal 观测走一遍流水线，再评估完成策略
    pub async fn work_on_goal(&self, goal: Goal) -> bool {
        let data = serde_json::to_value(&goal).unwrap_or(Value::Null);
        let observation = Observation::new("goal", data, "goal_system");
        let actions = self.pipeline.observe(observation).await;
        tracing::debug!(
            "Agent {}: goal {} produced {} action(s)",
            self.id(),
            goal.goal_id,
            actions.len()
        );
        self.goals.check_completion(&goal.goal_id).await
    }

    /// 主循环的一轮：仅在 Idle 时处理活跃目标，并发度不超过 max_concurrent_tasks。
    /// 返回处理的目标数
    pub async fn work_on_goals(&self) -> usize {
        use futures_util::stream::{self, StreamExt};

        let active = self.goals.active_goals().await;
        if active.is_empty() {
            return 0;
        }
        let Some(_executing) = self.state.enter_from_idle(AgentState::Executing) else {
            return 0;
        };
        let worked = active.len();
        let completed = stream::iter(active)
            .map(|goal| self.work_on_goal(goal))
            .buffer_unordered(self.config.max_concurrent_tasks.max(1))
            .filter(|done| std::future::ready(*done))
            .count()
            .await;
        if completed > 0 {
            tracing::info!("Agent {}: {} goal(s) completed this cycle", self.id(), completed);
        }
        worked
    }

    /// 由 task_data 创建目标（与 add_goal 相同的校验）
    pub async fn assign_task(&self, task_data: &Map<String, Value>) -> Result<String, AgentError> {
        let description = task_data
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("Assigned task");
        let priority = match task_data.get("priority") {
            None | Some(Value::Null) => 5,
            Some(v) => v
                .as_u64()
                .and_then(|p| u8::try_from(p).ok())
                .ok_or_else(|| AgentError::Validation(format!("invalid task priority {}", v)))?,
        };
        let mut goal = Goal::new(description).with_priority(priority);
        if let Some(targets) = task_data.get("target_metrics") {
            goal.target_metrics = serde_json::from_value(targets.clone())
                .map_err(|e| AgentError::Validation(format!("invalid target_metrics: {}", e)))?;
        }
        self.goals.add(goal).await
    }

    /// 知识共享：experiences 经校验后进入缓冲区，model_insights 作为经验记录持久化
    pub async fn absorb_knowledge(
        &self,
        knowledge_type: &str,
        experiences: &[Value],
        insights: &Value,
    ) -> Result<(), AgentError> {
        match knowledge_type {
            "experiences" => {
                self.learning.handle_experience_sharing(experiences).await;
                Ok(())
            }
            "model_insights" => {
                let record = json!({
                    "type": "model_insights",
                    "insights": insights,
                    "timestamp": now_secs(),
                });
                self.persistence.store_experience(record).await
            }
            other => Err(AgentError::Validation(format!(
                "unknown knowledge_type '{}'",
                other
            ))),
        }
    }

    async fn handle_goal_message(&self, message: GoalMessage) -> Result<(), AgentError> {
        match message {
            GoalMessage::Add { goal_data } => {
                let goal: Goal = serde_json::from_value(goal_data)
                    .map_err(|e| AgentError::Validation(format!("malformed goal_data: {}", e)))?;
                self.goals.add(goal).await.map(|_| ())
            }
            GoalMessage::Update { goal_id, updates } => {
                self.goals.update(&goal_id, &updates).await;
                Ok(())
            }
            GoalMessage::Remove { goal_id } => {
                self.goals.remove(&goal_id).await;
                Ok(())
            }
        }
    }

    async fn handle_coordination(&self, message: CoordinationMessage) -> Result<(), AgentError> {
        let hooks = &self.specialization;
        match message {
            CoordinationMessage::TaskAssignment { task_data } => {
                hooks.handle_task_assignment(self, &task_data).await
            }
            CoordinationMessage::ResourceSharing {
                resource_type,
                resources,
            } => {
                hooks.handle_resource_sharing(self, resource_type.as_deref(), &resources)
                    .await
            }
            CoordinationMessage::KnowledgeSharing {
                knowledge_type,
                experiences,
                insights,
            } => {
                hooks.handle_knowledge_sharing(self, &knowledge_type, &experiences, &insights)
                    .await
            }
        }
    }

    async fn handle_learning(&self, message: LearningMessage) -> Result<(), AgentError> {
        let hooks = &self.specialization;
        match message {
            LearningMessage::ModelUpdate {
                weights: Some(weights),
                ..
            } => hooks.handle_model_update(self, &weights).await,
            LearningMessage::ModelUpdate { weights: None, .. } => {
                tracing::debug!("Agent {}: model update without weights", self.id());
                Ok(())
            }
            LearningMessage::ExperienceSharing { experiences, .. } => {
                hooks.handle_experience_sharing(self, &experiences).await
            }
        }
    }

    /// 加载持久化状态：目标集合、performance_metrics，并恢复探索率
    pub async fn load_state(&self) -> Result<bool, AgentError> {
        let Some(state) = self.persistence.load_state().await? else {
            return Ok(false);
        };
        if state.agent_id != self.id() {
            tracing::warn!(
                "Agent {}: persisted state belongs to {}, loading anyway",
                self.id(),
                state.agent_id
            );
        }
        let restored = self.goals.replace_all(state.goals).await;
        if let Some(rate) = state.performance_metrics.get("exploration_rate") {
            self.learning.restore_exploration_rate(*rate).await;
        }
        *self.performance_metrics.write().await = state.performance_metrics;
        tracing::info!("Loaded state for agent {} ({} goals)", self.id(), restored);
        Ok(true)
    }

    /// 快照 performance_metrics 并保存状态
    pub async fn save_state(&self) -> Result<(), AgentError> {
        let learning = self.learning.metrics().await;
        let snapshot = {
            let mut perf = self.performance_metrics.write().await;
            perf.insert("episodes".into(), learning.episodes as f64);
            perf.insert("total_reward".into(), learning.total_reward);
            perf.insert("average_reward".into(), learning.average_reward);
            perf.insert("loss".into(), learning.loss);
            perf.insert("exploration_rate".into(), learning.exploration_rate);
            perf.insert(
                "actions_taken".into(),
                self.pipeline.actions_taken().await as f64,
            );
            perf.insert(
                "observations_processed".into(),
                self.pipeline.observations_processed().await as f64,
            );
            perf.clone()
        };
        let state = PersistedState {
            agent_id: self.id().to_string(),
            agent_type: self.agent_type(),
            goals: self.goals.all().await,
            performance_metrics: snapshot,
            timestamp: now_secs(),
        };
        self.persistence.save_state(&state).await?;
        tracing::info!("Saved state for agent {}", self.id());
        Ok(())
    }

    pub async fn save_policy(&self) -> Result<(), AgentError> {
        let params = self.learning.export_parameters().await;
        self.persistence.save_policy(&params).await
    }

    /// 加载已保存的策略参数；返回是否加载
    pub async fn load_policy(&self) -> Result<bool, AgentError> {
        match self.persistence.load_policy().await? {
            Some(params) => {
                self.learning.import_parameters(&params).await?;
                tracing::info!("Agent {}: loaded saved policy parameters", self.id());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 释放协作者（stop 时调用），错误只记录
    pub async fn release(&self) {
        if let Err(e) = self.transport.cleanup().await {
            tracing::warn!("Agent {}: transport cleanup failed: {}", self.id(), e);
        }
        if let Err(e) = self.persistence.cleanup().await {
            tracing::warn!("Agent {}: persistence cleanup failed: {}", self.id(), e);
        }
        self.metrics.cleanup().await;
    }
}

#[async_trait]
impl MessageHandler for AgentCore {
    async fn handle(&self, message: AgentMessage) -> Result<(), AgentError> {
        match message {
            AgentMessage::Heartbeat(heartbeat) => {
                if heartbeat.agent_id != self.id() {
                    self.peers
                        .write()
                        .await
                        .insert(heartbeat.agent_id.clone(), heartbeat);
                }
                Ok(())
            }
            AgentMessage::Coordination(message) => {
                let _busy = self.state.enter_from_idle(AgentState::Communicating);
                self.handle_coordination(message).await
            }
            AgentMessage::Learning(message) => {
                let _busy = self.state.enter_from_idle(AgentState::Learning);
                self.handle_learning(message).await
            }
            AgentMessage::Goal(message) => self.handle_goal_message(message).await,
        }
    }
}

/// 对外门面
pub struct Agent {
    core: Arc<AgentCore>,
    orchestrator: TaskOrchestrator,
}

impl Agent {
    pub fn new(core: AgentCore) -> Self {
        let core = Arc::new(core);
        Self {
            orchestrator: TaskOrchestrator::new(core.clone()),
            core,
        }
    }

    pub fn id(&self) -> &str {
        self.core.id()
    }

    pub fn core(&self) -> &Arc<AgentCore> {
        &self.core
    }

    pub fn state(&self) -> AgentState {
        self.core.state().current()
    }

    pub async fn is_running(&self) -> bool {
        self.orchestrator.is_running().await
    }

    /// 校验配置、初始化协作者、加载状态与策略，然后进入 Idle。
    /// 失败时进入 Error，不启动任何后台任务
    pub async fn initialize(&self) -> Result<(), AgentError> {
        let core = &self.core;
        if core.state().current() != AgentState::Initializing {
            return Err(AgentError::Initialization(format!(
                "agent {} is already {}",
                core.id(),
                core.state().current()
            )));
        }
        tracing::info!(
            "Initializing agent {} of type {}",
            core.id(),
            core.agent_type()
        );

        let setup = async {
            core.config().validate()?;
            core.persistence()
                .initialize()
                .await
                .map_err(|e| AgentError::Initialization(format!("persistence: {}", e)))?;
            core.transport()
                .initialize()
                .await
                .map_err(|e| AgentError::Initialization(format!("transport: {}", e)))?;
            Ok::<(), AgentError>(())
        };
        if let Err(e) = setup.await {
            tracing::error!("Failed to initialize agent {}: {}", core.id(), e);
            core.state().fail();
            return Err(e);
        }

        if let Err(e) = core.load_state().await {
            tracing::warn!("Agent {}: could not load state: {}", core.id(), e);
        }
        if let Err(e) = core.load_policy().await {
            tracing::warn!("Agent {}: could not load policy: {}", core.id(), e);
        }

        core.state().transition(AgentState::Idle)?;
        tracing::info!("Agent {} initialized successfully", core.id());
        Ok(())
    }

    pub async fn start(&self) -> Result<(), AgentError> {
        self.orchestrator.start().await
    }

    pub async fn stop(&self) {
        self.orchestrator.stop().await;
    }

    pub async fn observe(&self, observation: Observation) -> Vec<Action> {
        self.core.pipeline().observe(observation).await
    }

    pub async fn add_goal(&self, goal: Goal) -> Result<String, AgentError> {
        self.core.goals().add(goal).await
    }

    /// 向 target（None 为广播）发送策略参数或最近经验
    pub async fn share_knowledge(&self, target: Option<&str>, kind: KnowledgeKind) -> Result<(), AgentError> {
        let message = self.core.learning().share_knowledge(kind).await;
        self.core.communicate(&message, target).await
    }

    pub async fn get_metrics(&self) -> Value {
        self.core.get_metrics().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::NullTransport;
    use crate::learning::{FixedPolicy, ParamTensor};
    use crate::memory::InMemoryPersistence;
    use crate::observability::InMemoryMetrics;
    use crate::types::GoalStatus;

    fn core_with(store: Arc<InMemoryPersistence>, params: PolicyParameters) -> AgentCore {
        AgentCore::new(
            AgentConfig::new("unit").with_agent_type(AgentType::Analyst),
            Collaborators {
                specialization: Arc::new(LearningAgent),
                policy: Box::new(FixedPolicy::new(vec![1.0; 10]).with_params(params)),
                persistence: store,
                transport: Arc::new(NullTransport),
                metrics: Arc::new(InMemoryMetrics::new()),
                seed: Some(1),
            },
        )
    }

    fn core() -> AgentCore {
        core_with(Arc::new(InMemoryPersistence::default()), PolicyParameters::new())
    }

    #[tokio::test]
    async fn test_metrics_schema() {
        let core = core();
        let metrics = core.get_metrics().await;
        for key in [
            "agent_id",
            "agent_type",
            "state",
            "goals_count",
            "active_goals",
            "completed_goals",
            "actions_taken",
            "observations_processed",
            "memory_utilization",
            "uptime",
            "episodes",
            "exploration_rate",
            "experience_buffer_size",
            "model_parameters",
        ] {
            assert!(metrics.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(metrics["agent_type"], json!("analyst"));
        assert_eq!(metrics["state"], json!("initializing"));
    }

    #[tokio::test]
    async fn test_learning_agent_reward_is_confidence() {
        let action = Action::new("plan").with_parameter("confidence", 0.25);
        let outcome = LearningAgent.apply(&action).await.unwrap();
        assert_eq!(outcome.reward, 0.25);
        assert_eq!(outcome.result["status"], json!("completed"));
    }

    #[tokio::test]
    async fn test_task_assignment_creates_goal() {
        let core = core();
        let data = json!({"target_metrics": {"accuracy": 0.8}, "priority": 3});
        let id = core.assign_task(data.as_object().unwrap()).await.unwrap();
        let goal = core.goals().get(&id).await.unwrap();
        assert_eq!(goal.description, "Assigned task");
        assert_eq!(goal.priority, 3);
        assert_eq!(goal.target_metrics.get("accuracy"), Some(&0.8));

        let bad = json!({"priority": 11});
        assert!(core.assign_task(bad.as_object().unwrap()).await.is_err());
        assert_eq!(core.goals().counts().await.total, 1);
    }

    #[tokio::test]
    async fn test_model_insights_persisted() {
        let store = Arc::new(InMemoryPersistence::default());
        let core = core_with(store.clone(), PolicyParameters::new());
        core.absorb_knowledge("model_insights", &[], &json!({"tip": "explore less"}))
            .await
            .unwrap();
        let log = store.experiences().await;
        assert_eq!(log[0]["type"], json!("model_insights"));
        assert!(core.absorb_knowledge("gossip", &[], &Value::Null).await.is_err());
    }

    #[tokio::test]
    async fn test_model_update_message_merges() {
        let core = core_with(
            Arc::new(InMemoryPersistence::default()),
            PolicyParameters::new().with("w1", ParamTensor::Scalar(4.0)),
        );
        core.state().transition(AgentState::Idle).unwrap();
        let msg = AgentMessage::from_value(json!({
            "type": "learning",
            "learning_type": "model_update",
            "weights": {"w1": 2.0},
            "source_agent": "peer",
        }))
        .unwrap();
        core.handle(msg).await.unwrap();
        let params = core.learning().export_parameters().await;
        assert_eq!(params.get("w1"), Some(&ParamTensor::Scalar(3.0)));
        assert_eq!(core.state().current(), AgentState::Idle);
    }

    #[tokio::test]
    async fn test_goal_message_with_bad_priority_rejected() {
        let core = core();
        let msg = AgentMessage::from_value(json!({
            "type": "goal",
            "action": "add",
            "goal_data": {"description": "too eager", "priority": 11},
        }))
        .unwrap();
        assert!(matches!(core.handle(msg).await, Err(AgentError::Validation(_))));
        assert_eq!(core.goals().counts().await.total, 0);
    }

    #[tokio::test]
    async fn test_save_and_load_state_round_trip() {
        let store = Arc::new(InMemoryPersistence::default());
        let first = core_with(store.clone(), PolicyParameters::new());
        first.goals().add(Goal::new("a").with_target("x", 1.0)).await.unwrap();
        let b = first.goals().add(Goal::new("b")).await.unwrap();
        first.goals().set_status(&b, GoalStatus::Completed).await;
        first.learning().decay_exploration(0.5).await;
        first.save_state().await.unwrap();

        let second = core_with(store, PolicyParameters::new());
        assert!(second.load_state().await.unwrap());
        assert_eq!(second.goals().all().await, first.goals().all().await);
        assert_eq!(
            second.performance_metrics().await,
            first.performance_metrics().await
        );
        assert_eq!(
            second.learning().exploration_rate().await,
            first.learning().exploration_rate().await
        );
    }

    #[tokio::test]
    async fn test_work_on_goals_requires_idle() {
        let core = core();
        core.goals().add(Goal::new("g")).await.unwrap();
        assert_eq!(core.work_on_goals().await, 0);
        core.state().transition(AgentState::Idle).unwrap();
        assert_eq!(core.work_on_goals().await, 1);
        assert_eq!(core.state().current(), AgentState::Idle);
        assert_eq!(core.pipeline().observations_processed().await, 1);
    }
}
