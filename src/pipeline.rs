//! 观测 -> 决策 -> 动作 -> 学习 流水线
//!
//! - observe：记入观测历史并持久化，然后 decide，再按产出顺序逐个 act（串行，保持副作用的因果顺序）
//! - decide：特征映射（确定、全函数，畸形负载也不报错）-> 策略打分 -> epsilon-greedy 选下标 -> 映射为动作
//! - act：记入动作历史，带超时执行特化的 apply，构造经验并持久化、送入学习循环；
//!   失败只记录日志并上报错误指标，不中断同批其余动作

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::agent::{ActionOutcome, Specialization};
use crate::core::AgentError;
use crate::learning::LearningLoop;
use crate::memory::PersistenceAdapter;
use crate::observability::MetricsSink;
use crate::types::{clamp_confidence, now_secs, Action, Experience, Observation};

/// 观测/动作历史各自保留的条数
const HISTORY_LIMIT: usize = 1000;

/// 数据长度特征的缩放
const LENGTH_SCALE: f64 = 1000.0;

/// 对 type 标签做稳定哈希（FNV-1a），跨进程、跨版本结果一致
fn stable_hash(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in s.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// 默认特征映射：[置信度, 负载长度/1000, hash(type)%1000/1000, timestamp%3600/3600, 负载中的顶层数值字段...]
///
/// 负载是对象时，按键序追加其中有限的数值与布尔值；其它形状只贡献长度特征。
pub fn observation_features(observation: &Observation) -> Vec<f64> {
    let payload = observation.data.to_string();
    let mut features = vec![
        clamp_confidence(observation.confidence),
        payload.len() as f64 / LENGTH_SCALE,
        (stable_hash(&observation.observation_type) % 1000) as f64 / 1000.0,
        observation.timestamp.rem_euclid(3600.0) / 3600.0,
    ];
    if let Value::Object(map) = &observation.data {
        features.extend(map.values().filter_map(|v| match v {
            Value::Number(n) => n.as_f64().filter(|x| x.is_finite()),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }));
    }
    features
        .into_iter()
        .map(|x| if x.is_finite() { x } else { 0.0 })
        .collect()
}

/// 最高分下标；并列取最小下标，NaN 视为负无穷
pub fn argmax(scores: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &s) in scores.iter().enumerate() {
        let s = if s.is_nan() { f64::NEG_INFINITY } else { s };
        match best {
            Some((_, b)) if s <= b => {}
            _ => best = Some((i, s)),
        }
    }
    best.map(|(i, _)| i)
}

/// epsilon-greedy：以概率 epsilon 均匀随机，否则取最高分。epsilon 为 0 时不消耗随机数
pub fn select_action<R: Rng + ?Sized>(scores: &[f64], epsilon: f64, rng: &mut R) -> Option<usize> {
    if scores.is_empty() {
        return None;
    }
    if epsilon > 0.0 && rng.gen::<f64>() < epsilon {
        Some(rng.gen_range(0..scores.len()))
    } else {
        argmax(scores)
    }
}

#[derive(Debug, Default)]
struct History {
    observations: VecDeque<Observation>,
    actions: VecDeque<Action>,
    observations_processed: u64,
    actions_taken: u64,
}

pub struct ObservationActionPipeline {
    agent_id: String,
    specialization: Arc<dyn Specialization>,
    learning: Arc<LearningLoop>,
    persistence: Arc<dyn PersistenceAdapter>,
    metrics: Arc<dyn MetricsSink>,
    timeout: Duration,
    rng: Mutex<StdRng>,
    history: Mutex<History>,
}

impl ObservationActionPipeline {
    pub fn new(
        agent_id: impl Into<String>,
        specialization: Arc<dyn Specialization>,
        learning: Arc<LearningLoop>,
        persistence: Arc<dyn PersistenceAdapter>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            specialization,
            learning,
            persistence,
            metrics,
            timeout: Duration::from_secs(60),
            rng: Mutex::new(StdRng::from_entropy()),
            history: Mutex::new(History::default()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// 处理一次观测，返回已执行的动作（按执行顺序）
    pub async fn observe(&self, observation: Observation) -> Vec<Action> {
        let confidence = observation.confidence;
        let observation = observation.with_confidence(confidence);
        {
            let mut history = self.history.lock().await;
            history.observations_processed += 1;
            history.observations.push_back(observation.clone());
            while history.observations.len() > HISTORY_LIMIT {
                history.observations.pop_front();
            }
        }

        let record = json!({
            "type": "observation",
            "observation": observation,
            "timestamp": now_secs(),
        });
        if let Err(e) = self.persistence.store_experience(record).await {
            tracing::warn!("Agent {}: failed to persist observation: {}", self.agent_id, e);
        }

        let (actions, features) = self.decide_with_features(&observation).await;
        let mut executed = Vec::with_capacity(actions.len());
        for action in actions {
            self.act(action.clone(), &features).await;
            executed.push(action);
        }
        executed
    }

    /// 把观测映射为动作序列（当前实现每次最多一个动作）
    pub async fn decide(&self, observation: &Observation) -> Vec<Action> {
        self.decide_with_features(observation).await.0
    }

    async fn decide_with_features(&self, observation: &Observation) -> (Vec<Action>, Vec<f64>) {
        let width = self.learning.input_width().await;
        let features = crate::learning::fit_width(&self.specialization.features(observation), width);
        let action_types = self.specialization.action_types();

        let mut scores = self.learning.score(&features).await;
        scores.truncate(action_types.len());
        let epsilon = self.learning.exploration_rate().await;
        let index = {
            let mut rng = self.rng.lock().await;
            select_action(&scores, epsilon, &mut *rng)
        };

        let Some(index) = index else {
            tracing::debug!(
                "Agent {}: policy produced no scores for {}",
                self.agent_id,
                observation.observation_type
            );
            return (Vec::new(), features);
        };

        let mut action = Action::new(action_types[index])
            .with_parameter("observation_id", observation.observation_id.clone())
            .with_parameter("confidence", clamp_confidence(observation.confidence));
        action.action_index = Some(index);
        (vec![action], features)
    }

    /// 执行单个动作；失败（含超时）记录日志并上报，返回 None
    pub async fn act(&self, action: Action, state: &[f64]) -> Option<ActionOutcome> {
        {
            let mut history = self.history.lock().await;
            history.actions_taken += 1;
            history.actions.push_back(action.clone());
            while history.actions.len() > HISTORY_LIMIT {
                history.actions.pop_front();
            }
        }
        tracing::debug!("Agent {}: executing action {}", self.agent_id, action.action_type);

        let start = Instant::now();
        let outcome = match tokio::time::timeout(self.timeout, self.specialization.apply(&action)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::execution(
                &action.action_type,
                format!("timed out after {:?}", self.timeout),
            )),
        };
        let execution_time = start.elapsed().as_secs_f64();

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    "Agent {}: error executing action {}: {}",
                    self.agent_id,
                    action.action_type,
                    e
                );
                self.metrics
                    .record_error(&self.agent_id, &action.action_type, &e.to_string())
                    .await;
                return None;
            }
        };

        let record = json!({
            "type": "action_execution",
            "action": action,
            "result": outcome.result,
            "execution_time": execution_time,
            "timestamp": now_secs(),
        });
        if let Err(e) = self.persistence.store_experience(record).await {
            tracing::warn!("Agent {}: failed to persist action result: {}", self.agent_id, e);
        }

        let experience = Experience {
            state: Some(state.to_vec()),
            action: action.action_index,
            reward: Some(outcome.reward),
            ..Experience::default()
        }
        .with_metadata("type", "action_execution")
        .with_metadata("action_id", action.action_id.clone())
        .with_metadata("execution_time", execution_time);
        self.learning.update_knowledge(experience).await;

        self.metrics
            .record_action(&self.agent_id, &action.action_type, execution_time)
            .await;
        Some(outcome)
    }

    pub async fn observations_processed(&self) -> u64 {
        self.history.lock().await.observations_processed
    }

    pub async fn actions_taken(&self) -> u64 {
        self.history.lock().await.actions_taken
    }

    /// 最近 n 个动作（旧 -> 新）
    pub async fn recent_actions(&self, n: usize) -> Vec<Action> {
        let history = self.history.lock().await;
        let skip = history.actions.len().saturating_sub(n);
        history.actions.iter().skip(skip).cloned().collect()
    }
}
