//! 智能体间消息协议
//!
//! 顶层以 `type` 区分：heartbeat / coordination / learning / goal；
//! 各子类型再以 `coordination_type` / `learning_type` / `action` 区分。
//! 入站消息在边界处整体反序列化，无法识别的子类型在这里就失败，由路由器记录 warn 并丢弃。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::AgentError;
use crate::learning::PolicyParameters;

pub const TOPIC_HEARTBEAT: &str = "heartbeat";
pub const TOPIC_COORDINATION: &str = "coordination";
pub const TOPIC_LEARNING: &str = "learning";
pub const TOPIC_GOAL: &str = "goal";

/// 顶层消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    Heartbeat(Heartbeat),
    Coordination(CoordinationMessage),
    Learning(LearningMessage),
    Goal(GoalMessage),
}

impl AgentMessage {
    /// 在边界处解析原始消息
    pub fn from_value(value: Value) -> Result<Self, AgentError> {
        serde_json::from_value(value).map_err(|e| AgentError::Validation(format!("malformed message: {}", e)))
    }

    pub fn to_value(&self) -> Result<Value, AgentError> {
        serde_json::to_value(self).map_err(|e| AgentError::Communication(e.to_string()))
    }

    /// 顶层 type 字段
    pub fn topic(&self) -> &'static str {
        match self {
            AgentMessage::Heartbeat(_) => TOPIC_HEARTBEAT,
            AgentMessage::Coordination(_) => TOPIC_COORDINATION,
            AgentMessage::Learning(_) => TOPIC_LEARNING,
            AgentMessage::Goal(_) => TOPIC_GOAL,
        }
    }
}

/// 心跳：状态快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub agent_id: String,
    pub timestamp: f64,
    pub state: String,
    #[serde(default)]
    pub metrics: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "coordination_type", rename_all = "snake_case")]
pub enum CoordinationMessage {
    TaskAssignment {
        #[serde(default)]
        task_data: Map<String, Value>,
    },
    ResourceSharing {
        #[serde(default)]
        resource_type: Option<String>,
        #[serde(default)]
        resources: Value,
    },
    KnowledgeSharing {
        knowledge_type: String,
        #[serde(default)]
        experiences: Vec<Value>,
        #[serde(default)]
        insights: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "learning_type", rename_all = "snake_case")]
pub enum LearningMessage {
    ModelUpdate {
        #[serde(default)]
        weights: Option<PolicyParameters>,
        #[serde(default)]
        source_agent: Option<String>,
    },
    ExperienceSharing {
        #[serde(default)]
        experiences: Vec<Value>,
        #[serde(default)]
        source_agent: Option<String>,
    },
}

/// 目标消息；goal_data 保持原始 JSON，由目标管理器校验
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GoalMessage {
    Add {
        goal_data: Value,
    },
    Update {
        goal_id: String,
        #[serde(default)]
        updates: Map<String, Value>,
    },
    Remove {
        goal_id: String,
    },
}

/// 知识导出的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeKind {
    ModelWeights,
    Experiences,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::ParamTensor;
    use serde_json::json;

    #[test]
    fn test_parse_model_update() {
        let msg = AgentMessage::from_value(json!({
            "type": "learning",
            "learning_type": "model_update",
            "weights": {"w1": 2.0},
            "source_agent": "peer-1",
        }))
        .unwrap();
        let AgentMessage::Learning(LearningMessage::ModelUpdate { weights: Some(w), source_agent }) = msg else {
            panic!("unexpected {:?}", msg);
        };
        assert_eq!(w.get("w1"), Some(&ParamTensor::Scalar(2.0)));
        assert_eq!(source_agent.as_deref(), Some("peer-1"));
    }

    #[test]
    fn test_goal_update_wire_shape() {
        let msg = AgentMessage::Goal(GoalMessage::Remove { goal_id: "g1".into() });
        assert_eq!(
            msg.to_value().unwrap(),
            json!({"type": "goal", "action": "remove", "goal_id": "g1"})
        );
        assert_eq!(msg.topic(), TOPIC_GOAL);
    }

    #[test]
    fn test_unknown_subtype_is_validation_error() {
        let err = AgentMessage::from_value(json!({
            "type": "coordination",
            "coordination_type": "world_domination",
        }))
        .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));

        assert!(AgentMessage::from_value(json!({"type": "gossip"})).is_err());
        assert!(AgentMessage::from_value(json!({"type": "goal", "action": "add"})).is_err());
    }

    #[test]
    fn test_task_assignment_defaults() {
        let msg = AgentMessage::from_value(json!({
            "type": "coordination",
            "coordination_type": "task_assignment",
        }))
        .unwrap();
        assert_eq!(
            msg,
            AgentMessage::Coordination(CoordinationMessage::TaskAssignment { task_data: Map::new() })
        );
    }
}
