//! 目标管理
//!
//! GoalManager 独占目标集合（RwLock 保护），所有增删改都经过这里；
//! 完成判定交给可插拔的 CompletionPolicy，默认按创建后经过的时间判定。

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::sync::RwLock;

use crate::core::AgentError;
use crate::memory::PersistenceAdapter;
use crate::types::{now_secs, Goal, GoalStatus, PRIORITY_RANGE};

/// 目标完成判定
pub trait CompletionPolicy: Send + Sync {
    fn is_completed(&self, goal: &Goal, now: f64) -> bool;
}

/// 默认判定：创建后经过的时间超过阈值即视为完成
#[derive(Debug, Clone)]
pub struct ElapsedTimeCompletion {
    threshold: Duration,
}

impl ElapsedTimeCompletion {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }
}

impl Default for ElapsedTimeCompletion {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl CompletionPolicy for ElapsedTimeCompletion {
    fn is_completed(&self, goal: &Goal, now: f64) -> bool {
        now - goal.created_at > self.threshold.as_secs_f64()
    }
}

/// 目标数量统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GoalCounts {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
}

pub struct GoalManager {
    agent_id: String,
    goals: RwLock<Vec<Goal>>,
    persistence: Arc<dyn PersistenceAdapter>,
    completion: Arc<dyn CompletionPolicy>,
}

impl GoalManager {
    pub fn new(agent_id: impl Into<String>, persistence: Arc<dyn PersistenceAdapter>) -> Self {
        Self {
            agent_id: agent_id.into(),
            goals: RwLock::new(Vec::new()),
            persistence,
            completion: Arc::new(ElapsedTimeCompletion::default()),
        }
    }

    pub fn with_completion_policy(mut self, policy: Arc<dyn CompletionPolicy>) -> Self {
        self.completion = policy;
        self
    }

    /// 校验后追加目标，并持久化一条 goal_added 记录；校验失败时集合不变
    pub async fn add(&self, goal: Goal) -> Result<String, AgentError> {
        goal.validate()?;
        let goal_id = goal.goal_id.clone();
        {
            let mut goals = self.goals.write().await;
            if goals.iter().any(|g| g.goal_id == goal_id) {
                return Err(AgentError::Validation(format!(
                    "goal {} already exists",
                    goal_id
                )));
            }
            goals.push(goal.clone());
        }
        tracing::info!(
            "Agent {}: added goal {} ({})",
            self.agent_id,
            goal_id,
            goal.description
        );

        let record = json!({
            "type": "goal_added",
            "goal": goal,
            "timestamp": now_secs(),
        });
        if let Err(e) = self.persistence.store_experience(record).await {
            tracing::warn!("Agent {}: failed to persist goal_added: {}", self.agent_id, e);
        }
        Ok(goal_id)
    }

    /// 按字段更新目标；未知字段与不合法的值被忽略，goal_id 与 created_at 不可改。
    /// 返回目标是否存在
    pub async fn update(&self, goal_id: &str, updates: &Map<String, Value>) -> bool {
        let mut goals = self.goals.write().await;
        let Some(goal) = goals.iter_mut().find(|g| g.goal_id == goal_id) else {
            tracing::debug!("Agent {}: update for unknown goal {}", self.agent_id, goal_id);
            return false;
        };
        for (field, value) in updates {
            if !apply_field(goal, field, value) {
                tracing::warn!(
                    "Agent {}: ignoring update of '{}' on goal {}",
                    self.agent_id,
                    field,
                    goal_id
                );
            }
        }
        true
    }

    /// 移除目标；返回是否存在
    pub async fn remove(&self, goal_id: &str) -> bool {
        let mut goals = self.goals.write().await;
        let before = goals.len();
        goals.retain(|g| g.goal_id != goal_id);
        let removed = goals.len() != before;
        if removed {
            tracing::info!("Agent {}: removed goal {}", self.agent_id, goal_id);
        }
        removed
    }

    pub async fn active_goals(&self) -> Vec<Goal> {
        self.goals
            .read()
            .await
            .iter()
            .filter(|g| g.is_active())
            .cloned()
            .collect()
    }

    pub async fn all(&self) -> Vec<Goal> {
        self.goals.read().await.clone()
    }

    pub async fn get(&self, goal_id: &str) -> Option<Goal> {
        self.goals
            .read()
            .await
            .iter()
            .find(|g| g.goal_id == goal_id)
            .cloned()
    }

    pub async fn counts(&self) -> GoalCounts {
        let goals = self.goals.read().await;
        GoalCounts {
            total: goals.len(),
            active: goals.iter().filter(|g| g.is_active()).count(),
            completed: goals
                .iter()
                .filter(|g| g.status == GoalStatus::Completed)
                .count(),
        }
    }

    pub async fn set_status(&self, goal_id: &str, status: GoalStatus) -> bool {
        let mut goals = self.goals.write().await;
        match goals.iter_mut().find(|g| g.goal_id == goal_id) {
            Some(goal) => {
                goal.status = status;
                true
            }
            None => false,
        }
    }

    /// 对单个仍处于 active 的目标评估完成策略，满足时标记为 completed
    pub async fn check_completion(&self, goal_id: &str) -> bool {
        let now = now_secs();
        let mut goals = self.goals.write().await;
        let Some(goal) = goals
            .iter_mut()
            .find(|g| g.goal_id == goal_id && g.is_active())
        else {
            return false;
        };
        if self.completion.is_completed(goal, now) {
            goal.status = GoalStatus::Completed;
            tracing::info!("Agent {}: goal {} completed", self.agent_id, goal_id);
            true
        } else {
            false
        }
    }

    /// 用持久化快照替换整个集合；不合法的目标被跳过
    pub async fn replace_all(&self, restored: Vec<Goal>) -> usize {
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(restored.len());
        for goal in restored {
            if let Err(e) = goal.validate() {
                tracing::warn!(
                    "Agent {}: skipping persisted goal {}: {}",
                    self.agent_id,
                    goal.goal_id,
                    e
                );
                continue;
            }
            if seen.insert(goal.goal_id.clone()) {
                kept.push(goal);
            }
        }
        let count = kept.len();
        *self.goals.write().await = kept;
        count
    }
}

/// 应用单个字段更新；字段未知或值不合法时返回 false 且目标不变
fn apply_field(goal: &mut Goal, field: &str, value: &Value) -> bool {
    match field {
        "description" => match value.as_str() {
            Some(s) if !s.trim().is_empty() => {
                goal.description = s.to_string();
                true
            }
            _ => false,
        },
        "priority" => match value.as_u64() {
            Some(p) if p <= u8::MAX as u64 && PRIORITY_RANGE.contains(&(p as u8)) => {
                goal.priority = p as u8;
                true
            }
            _ => false,
        },
        "status" => match serde_json::from_value::<GoalStatus>(value.clone()) {
            Ok(status) => {
                goal.status = status;
                true
            }
            Err(_) => false,
        },
        "deadline" => match value {
            Value::Null => {
                goal.deadline = None;
                true
            }
            v => match v.as_f64() {
                Some(d) if d.is_finite() => {
                    goal.deadline = Some(d);
                    true
                }
                _ => false,
            },
        },
        "target_metrics" => match serde_json::from_value::<BTreeMap<String, f64>>(value.clone()) {
            Ok(targets) if targets.values().all(|v| v.is_finite()) => {
                goal.target_metrics = targets;
                true
            }
            _ => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryPersistence;

    fn manager() -> (GoalManager, Arc<InMemoryPersistence>) {
        let store = Arc::new(InMemoryPersistence::default());
        (GoalManager::new("test", store.clone()), store)
    }

    struct Never;

    impl CompletionPolicy for Never {
        fn is_completed(&self, _goal: &Goal, _now: f64) -> bool {
            false
        }
    }

    struct Always;

    impl CompletionPolicy for Always {
        fn is_completed(&self, _goal: &Goal, _now: f64) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_add_persists_goal_added() {
        let (goals, store) = manager();
        let id = goals.add(Goal::new("explore")).await.unwrap();
        assert_eq!(goals.active_goals().await.len(), 1);
        let log = store.experiences().await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0]["type"], "goal_added");
        assert_eq!(log[0]["goal"]["goal_id"], Value::String(id));
    }

    #[tokio::test]
    async fn test_add_rejects_out_of_range_priority() {
        let (goals, store) = manager();
        goals.add(Goal::new("keep")).await.unwrap();
        let err = goals.add(Goal::new("bad").with_priority(11)).await.unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
        assert_eq!(goals.counts().await.total, 1);
        assert_eq!(store.experiences().await.len(), 1);
    }

    #[tokio::test]
    async fn test_add_rejects_duplicate_id() {
        let (goals, _) = manager();
        let goal = Goal::new("once");
        goals.add(goal.clone()).await.unwrap();
        assert!(goals.add(goal).await.is_err());
        assert_eq!(goals.counts().await.total, 1);
    }

    #[tokio::test]
    async fn test_update_ignores_unknown_and_invalid_fields() {
        let (goals, _) = manager();
        let id = goals.add(Goal::new("tune")).await.unwrap();
        let updates = serde_json::json!({
            "priority": 9,
            "description": "",
            "goal_id": "hijack",
            "bogus": true,
            "target_metrics": {"accuracy": 0.95},
        });
        assert!(goals.update(&id, updates.as_object().unwrap()).await);
        let goal = goals.get(&id).await.unwrap();
        assert_eq!(goal.priority, 9);
        assert_eq!(goal.description, "tune");
        assert_eq!(goal.goal_id, id);
        assert_eq!(goal.target_metrics.get("accuracy"), Some(&0.95));
    }

    #[tokio::test]
    async fn test_update_and_remove_unknown_are_noops() {
        let (goals, _) = manager();
        goals.add(Goal::new("a")).await.unwrap();
        assert!(!goals.update("missing", &Map::new()).await);
        assert!(!goals.remove("missing").await);
        assert_eq!(goals.counts().await.total, 1);
    }

    #[tokio::test]
    async fn test_active_goals_track_status() {
        let (goals, _) = manager();
        let a = goals.add(Goal::new("a")).await.unwrap();
        let b = goals.add(Goal::new("b")).await.unwrap();
        let c = goals.add(Goal::new("c")).await.unwrap();

        let paused = serde_json::json!({"status": "paused"});
        goals.update(&a, paused.as_object().unwrap()).await;
        goals.remove(&c).await;
        goals.set_status(&b, GoalStatus::Failed).await;
        goals.set_status(&b, GoalStatus::Active).await;

        let active: Vec<String> = goals.active_goals().await.into_iter().map(|g| g.goal_id).collect();
        assert_eq!(active, vec![b.clone()]);
        for goal in goals.all().await {
            assert_eq!(active.contains(&goal.goal_id), goal.status == GoalStatus::Active);
        }
    }

    #[tokio::test]
    async fn test_completion_policy_pluggable() {
        let store: Arc<dyn PersistenceAdapter> = Arc::new(InMemoryPersistence::default());
        let never = GoalManager::new("test", store.clone()).with_completion_policy(Arc::new(Never));
        let id = never.add(Goal::new("forever")).await.unwrap();
        assert!(!never.check_completion(&id).await);

        let always = GoalManager::new("test", store).with_completion_policy(Arc::new(Always));
        let id = always.add(Goal::new("instant")).await.unwrap();
        assert!(always.check_completion(&id).await);
        assert_eq!(always.counts().await.completed, 1);
        assert!(always.active_goals().await.is_empty());
        // 已完成的目标不会再次判定
        assert!(!always.check_completion(&id).await);
    }

    #[test]
    fn test_elapsed_time_completion() {
        let policy = ElapsedTimeCompletion::new(Duration::from_secs(60));
        let mut goal = Goal::new("wait");
        goal.created_at = 1000.0;
        assert!(!policy.is_completed(&goal, 1030.0));
        assert!(policy.is_completed(&goal, 1061.0));
    }

    #[tokio::test]
    async fn test_replace_all_skips_invalid() {
        let (goals, _) = manager();
        let restored = vec![Goal::new("ok"), Goal::new("bad").with_priority(0)];
        assert_eq!(goals.replace_all(restored).await, 1);
        assert_eq!(goals.all().await[0].description, "ok");
    }
}
