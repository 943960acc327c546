//! 持久化适配器
//!
//! 加载/保存智能体状态、经验记录与策略参数。核心只依赖 PersistenceAdapter 契约；
//! 内置两种实现：InMemoryPersistence（进程内，测试与临时运行）与
//! JsonFilePersistence（目录下的 state.json / policy.json / experiences.jsonl）。
//! 两者的经验日志都只保留最近 capacity 条。

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::core::AgentError;
use crate::learning::PolicyParameters;
use crate::types::PersistedState;

/// 持久化契约
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// 打开底层存储；失败即初始化失败
    async fn initialize(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn load_state(&self) -> Result<Option<PersistedState>, AgentError>;

    async fn save_state(&self, state: &PersistedState) -> Result<(), AgentError>;

    /// 追加一条经验记录（观测、目标变更、动作执行等）
    async fn store_experience(&self, record: Value) -> Result<(), AgentError>;

    async fn load_policy(&self) -> Result<Option<PolicyParameters>, AgentError>;

    async fn save_policy(&self, params: &PolicyParameters) -> Result<(), AgentError>;

    /// 存储占用率 [0,1]
    async fn utilization(&self) -> f64;

    /// 释放资源（stop 时调用）
    async fn cleanup(&self) -> Result<(), AgentError> {
        Ok(())
    }
}

/// 进程内实现：经验日志按容量淘汰最旧记录
#[derive(Debug)]
pub struct InMemoryPersistence {
    state: RwLock<Option<PersistedState>>,
    policy: RwLock<Option<PolicyParameters>>,
    experiences: RwLock<VecDeque<Value>>,
    capacity: usize,
}

impl InMemoryPersistence {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: RwLock::new(None),
            policy: RwLock::new(None),
            experiences: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// 已存储的经验记录副本
    pub async fn experiences(&self) -> Vec<Value> {
        self.experiences.read().await.iter().cloned().collect()
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl PersistenceAdapter for InMemoryPersistence {
    async fn load_state(&self) -> Result<Option<PersistedState>, AgentError> {
        Ok(self.state.read().await.clone())
    }

    async fn save_state(&self, state: &PersistedState) -> Result<(), AgentError> {
        *self.state.write().await = Some(state.clone());
        Ok(())
    }

    async fn store_experience(&self, record: Value) -> Result<(), AgentError> {
        let mut log = self.experiences.write().await;
        log.push_back(record);
        while log.len() > self.capacity {
            log.pop_front();
        }
        Ok(())
    }

    async fn load_policy(&self) -> Result<Option<PolicyParameters>, AgentError> {
        Ok(self.policy.read().await.clone())
    }

    async fn save_policy(&self, params: &PolicyParameters) -> Result<(), AgentError> {
        *self.policy.write().await = Some(params.clone());
        Ok(())
    }

    async fn utilization(&self) -> f64 {
        self.experiences.read().await.len() as f64 / self.capacity as f64
    }
}

const STATE_FILE: &str = "state.json";
const POLICY_FILE: &str = "policy.json";
const EXPERIENCE_FILE: &str = "experiences.jsonl";

/// 文件实现：单目录，JSON 快照 + JSON Lines 经验日志
///
/// 经验日志达到 2 * capacity 行时压缩为最近的 capacity 行，打开时超出 capacity 也会压缩。
#[derive(Debug)]
pub struct JsonFilePersistence {
    root: PathBuf,
    capacity: usize,
    experience_count: AtomicUsize,
    /// 串行化对经验日志的追加
    append_lock: tokio::sync::Mutex<()>,
}

impl JsonFilePersistence {
    pub fn new(root: impl AsRef<Path>, capacity: usize) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            capacity: capacity.max(1),
            experience_count: AtomicUsize::new(0),
            append_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn read_json<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<Option<T>, AgentError> {
        let path = self.root.join(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => serde_json::from_str(&data)
                .map(Some)
                .map_err(|e| AgentError::Persistence(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 先写临时文件再 rename，避免崩溃时留下半截快照
    async fn write_json<T: serde::Serialize>(&self, name: &str, value: &T) -> Result<(), AgentError> {
        let data = serde_json::to_vec_pretty(value)
            .map_err(|e| AgentError::Persistence(e.to_string()))?;
        let tmp = self.root.join(format!("{}.tmp", name));
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, self.root.join(name)).await?;
        Ok(())
    }

    /// 只保留最近 capacity 条经验；调用方须持有 append_lock
    async fn compact_experiences(&self) -> Result<(), AgentError> {
        let path = self.root.join(EXPERIENCE_FILE);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let lines: Vec<&str> = data.lines().filter(|l| !l.trim().is_empty()).collect();
        let kept = &lines[lines.len().saturating_sub(self.capacity)..];
        let mut out = kept.join("\n");
        if !kept.is_empty() {
            out.push('\n');
        }
        let tmp = self.root.join(format!("{}.tmp", EXPERIENCE_FILE));
        tokio::fs::write(&tmp, out).await?;
        tokio::fs::rename(&tmp, &path).await?;
        self.experience_count.store(kept.len(), Ordering::SeqCst);
        tracing::debug!(
            "Compacted experience log at {} ({} -> {} records)",
            path.display(),
            lines.len(),
            kept.len()
        );
        Ok(())
    }
}

#[async_trait]
impl PersistenceAdapter for JsonFilePersistence {
    async fn initialize(&self) -> Result<(), AgentError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(EXPERIENCE_FILE);
        let existing = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data.lines().filter(|l| !l.trim().is_empty()).count(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        self.experience_count.store(existing, Ordering::SeqCst);
        if existing > self.capacity {
            let _guard = self.append_lock.lock().await;
            self.compact_experiences().await?;
        }
        tracing::debug!(
            "File persistence ready at {} ({} experiences)",
            self.root.display(),
            self.experience_count.load(Ordering::SeqCst)
        );
        Ok(())
    }

    async fn load_state(&self) -> Result<Option<PersistedState>, AgentError> {
        self.read_json(STATE_FILE).await
    }

    async fn save_state(&self, state: &PersistedState) -> Result<(), AgentError> {
        self.write_json(STATE_FILE, state).await
    }

    async fn store_experience(&self, record: Value) -> Result<(), AgentError> {
        let mut line = serde_json::to_string(&record)
            .map_err(|e| AgentError::Persistence(e.to_string()))?;
        line.push('\n');
        let _guard = self.append_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(EXPERIENCE_FILE))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        drop(file);
        let count = self.experience_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.capacity.saturating_mul(2) {
            self.compact_experiences().await?;
        }
        Ok(())
    }

    async fn load_policy(&self) -> Result<Option<PolicyParameters>, AgentError> {
        self.read_json(POLICY_FILE).await
    }

    async fn save_policy(&self, params: &PolicyParameters) -> Result<(), AgentError> {
        self.write_json(POLICY_FILE, params).await
    }

    async fn utilization(&self) -> f64 {
        (self.experience_count.load(Ordering::SeqCst) as f64 / self.capacity as f64).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::ParamTensor;
    use crate::types::{AgentType, Goal, GoalStatus};
    use serde_json::json;

    fn sample_state() -> PersistedState {
        let mut done = Goal::new("done").with_priority(2);
        done.status = GoalStatus::Completed;
        PersistedState {
            agent_id: "agent-1".into(),
            agent_type: AgentType::Analyst,
            goals: vec![Goal::new("explore").with_target("accuracy", 0.9), done],
            performance_metrics: [("loss".to_string(), 0.5), ("episodes".to_string(), 3.0)]
                .into_iter()
                .collect(),
            timestamp: 1_700_000_000.0,
        }
    }

    #[tokio::test]
    async fn test_in_memory_state_round_trip() {
        let store = InMemoryPersistence::default();
        assert!(store.load_state().await.unwrap().is_none());
        let state = sample_state();
        store.save_state(&state).await.unwrap();
        assert_eq!(store.load_state().await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn test_in_memory_experience_log_bounded() {
        let store = InMemoryPersistence::new(2);
        for i in 0..3 {
            store.store_experience(json!({"i": i})).await.unwrap();
        }
        assert_eq!(store.experiences().await, vec![json!({"i": 1}), json!({"i": 2})]);
        assert_eq!(store.utilization().await, 1.0);
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePersistence::new(dir.path().join("agent"), 4);
        store.initialize().await.unwrap();
        assert!(store.load_state().await.unwrap().is_none());
        assert!(store.load_policy().await.unwrap().is_none());

        let state = sample_state();
        store.save_state(&state).await.unwrap();
        assert_eq!(store.load_state().await.unwrap(), Some(state));

        let params = PolicyParameters::new().with("w1", ParamTensor::Scalar(4.0));
        store.save_policy(&params).await.unwrap();
        assert_eq!(store.load_policy().await.unwrap(), Some(params));

        store.store_experience(json!({"type": "observation"})).await.unwrap();
        store.store_experience(json!({"type": "goal_added"})).await.unwrap();
        assert_eq!(store.utilization().await, 0.5);

        let reopened = JsonFilePersistence::new(dir.path().join("agent"), 4);
        reopened.initialize().await.unwrap();
        assert_eq!(reopened.utilization().await, 0.5);
    }

    async fn lines_on_disk(root: &Path) -> Vec<Value> {
        let data = tokio::fs::read_to_string(root.join(EXPERIENCE_FILE)).await.unwrap();
        data.lines().map(|l| serde_json::from_str(l).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_file_experience_log_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePersistence::new(dir.path(), 5);
        store.initialize().await.unwrap();
        for i in 0..50 {
            store.store_experience(json!({"i": i})).await.unwrap();
        }
        let lines = lines_on_disk(dir.path()).await;
        assert!(lines.len() <= 10);
        assert!(lines.len() >= 5);
        assert_eq!(lines.last(), Some(&json!({"i": 49})));
        assert!(!lines.contains(&json!({"i": 40})));
        assert_eq!(store.utilization().await, 1.0);
    }

    #[tokio::test]
    async fn test_file_experience_log_trimmed_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let big = JsonFilePersistence::new(dir.path(), 100);
        big.initialize().await.unwrap();
        for i in 0..8 {
            big.store_experience(json!({"i": i})).await.unwrap();
        }

        let small = JsonFilePersistence::new(dir.path(), 3);
        small.initialize().await.unwrap();
        let lines = lines_on_disk(dir.path()).await;
        assert_eq!(lines, vec![json!({"i": 5}), json!({"i": 6}), json!({"i": 7})]);
        assert_eq!(small.utilization().await, 1.0);
    }

    #[tokio::test]
    async fn test_file_corrupt_state_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePersistence::new(dir.path(), 4);
        store.initialize().await.unwrap();
        tokio::fs::write(dir.path().join(STATE_FILE), "{not json").await.unwrap();
        assert!(matches!(
            store.load_state().await,
            Err(AgentError::Persistence(_))
        ));
    }
}
