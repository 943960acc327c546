//! 核心数据模型：观测、动作、目标、经验、持久化快照
//!
//! 时间戳统一为 Unix 秒（f64）。Observation / Action 创建后不可变，只追加进历史。

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::AgentError;

/// 优先级取值范围（目标与动作共用）
pub const PRIORITY_RANGE: std::ops::RangeInclusive<u8> = 1..=10;

/// 当前 Unix 时间（秒，毫秒精度）
pub fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_priority() -> u8 {
    5
}

fn default_confidence() -> f64 {
    1.0
}

/// 置信度截断到 [0,1]，NaN 视为 0
pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

fn deserialize_confidence<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    f64::deserialize(deserializer).map(clamp_confidence)
}

/// 智能体特化类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Researcher,
    Coder,
    Analyst,
    Optimizer,
    Coordinator,
    Tester,
    #[default]
    Generic,
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentType::Researcher => "researcher",
            AgentType::Coder => "coder",
            AgentType::Analyst => "analyst",
            AgentType::Optimizer => "optimizer",
            AgentType::Coordinator => "coordinator",
            AgentType::Tester => "tester",
            AgentType::Generic => "generic",
        };
        f.write_str(s)
    }
}

/// 一次观测
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(default = "new_id")]
    pub observation_id: String,
    pub observation_type: String,
    /// 不透明的结构化负载
    #[serde(default)]
    pub data: Value,
    #[serde(default = "now_secs")]
    pub timestamp: f64,
    #[serde(default = "default_confidence", deserialize_with = "deserialize_confidence")]
    pub confidence: f64,
    pub source: String,
}

impl Observation {
    pub fn new(observation_type: impl Into<String>, data: Value, source: impl Into<String>) -> Self {
        Self {
            observation_id: new_id(),
            observation_type: observation_type.into(),
            data,
            timestamp: now_secs(),
            confidence: 1.0,
            source: source.into(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp_confidence(confidence);
        self
    }
}

/// 一次动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default = "new_id")]
    pub action_id: String,
    pub action_type: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default = "now_secs")]
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_duration: Option<f64>,
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// 由策略选出时对应的动作下标
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_index: Option<usize>,
}

impl Action {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_id: new_id(),
            action_type: action_type.into(),
            parameters: Map::new(),
            timestamp: now_secs(),
            expected_duration: None,
            priority: default_priority(),
            action_index: None,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Result<Self, AgentError> {
        check_priority(priority)?;
        self.priority = priority;
        Ok(self)
    }
}

/// 目标状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    #[default]
    Active,
    Completed,
    Failed,
    Paused,
}

/// 智能体追求的目标；只能经 GoalManager 修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    #[serde(default = "new_id")]
    pub goal_id: String,
    pub description: String,
    #[serde(default)]
    pub target_metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub deadline: Option<f64>,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub status: GoalStatus,
    #[serde(default = "now_secs")]
    pub created_at: f64,
}

impl Goal {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            goal_id: new_id(),
            description: description.into(),
            target_metrics: BTreeMap::new(),
            deadline: None,
            priority: default_priority(),
            status: GoalStatus::Active,
            created_at: now_secs(),
        }
    }

    /// 优先级在这里不做校验，交给 GoalManager::add 统一拒绝
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_target(mut self, metric: impl Into<String>, target: f64) -> Self {
        self.target_metrics.insert(metric.into(), target);
        self
    }

    pub fn with_deadline(mut self, deadline: f64) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == GoalStatus::Active
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        check_priority(self.priority)?;
        if self.description.trim().is_empty() {
            return Err(AgentError::Validation("goal description is empty".into()));
        }
        if self.target_metrics.values().any(|v| !v.is_finite()) {
            return Err(AgentError::Validation(
                "goal target metrics must be finite".into(),
            ));
        }
        Ok(())
    }
}

fn check_priority(priority: u8) -> Result<(), AgentError> {
    if PRIORITY_RANGE.contains(&priority) {
        Ok(())
    } else {
        Err(AgentError::Validation(format!(
            "priority {} outside {}..={}",
            priority,
            PRIORITY_RANGE.start(),
            PRIORITY_RANGE.end()
        )))
    }
}

/// 学习单元：{state, action, reward, next_state, timestamp} + 任意元数据
///
/// state/action/reward 为可选，缺任意一项的记录在训练时被丢弃、在对端共享时被拒收。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_state: Option<Vec<f64>>,
    #[serde(default = "now_secs")]
    pub timestamp: f64,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl Experience {
    pub fn new(state: Vec<f64>, action: usize, reward: f64) -> Self {
        Self {
            state: Some(state),
            action: Some(action),
            reward: Some(reward),
            next_state: None,
            timestamp: now_secs(),
            metadata: Map::new(),
        }
    }

    pub fn with_next_state(mut self, next_state: Vec<f64>) -> Self {
        self.next_state = Some(next_state);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 是否具备训练所需字段
    pub fn is_trainable(&self) -> bool {
        self.state.is_some() && self.action.is_some() && self.reward.is_some()
    }

    /// 校验对端发来的原始记录：必须包含 action、state、reward 且类型正确、数值有限
    pub fn from_peer(record: &Value) -> Result<Self, AgentError> {
        let obj = record
            .as_object()
            .ok_or_else(|| AgentError::Validation("experience is not an object".into()))?;
        for field in ["action", "state", "reward"] {
            if obj.get(field).map_or(true, Value::is_null) {
                return Err(AgentError::Validation(format!(
                    "experience missing '{}'",
                    field
                )));
            }
        }
        let exp: Experience = serde_json::from_value(record.clone())
            .map_err(|e| AgentError::Validation(format!("malformed experience: {}", e)))?;
        let finite = |v: &Option<Vec<f64>>| v.as_ref().map_or(true, |xs| xs.iter().all(|x| x.is_finite()));
        if !exp.reward.map_or(false, f64::is_finite) || !finite(&exp.state) || !finite(&exp.next_state) {
            return Err(AgentError::Validation(
                "experience contains non-finite values".into(),
            ));
        }
        Ok(exp)
    }
}

/// 可恢复状态的持久化投影
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub agent_id: String,
    pub agent_type: AgentType,
    #[serde(default)]
    pub goals: Vec<Goal>,
    #[serde(default)]
    pub performance_metrics: BTreeMap<String, f64>,
    #[serde(default = "now_secs")]
    pub timestamp: f64,
}
