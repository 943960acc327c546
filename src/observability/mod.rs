//! 可观测性：tracing 订阅器初始化 + 指标上报协作者
//!
//! MetricsSink 是核心依赖的指标出口；内置 TracingMetrics（结构化 tracing 事件）
//! 与 InMemoryMetrics（计数，测试用）。

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装全局 tracing 订阅器；默认 info，可用 RUST_LOG 覆盖
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

/// 指标出口
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// 周期性指标快照
    async fn record_metrics(&self, agent_id: &str, snapshot: &Value);

    /// 一次动作执行完成
    async fn record_action(&self, agent_id: &str, action_type: &str, elapsed_secs: f64);

    /// 一次错误事件
    async fn record_error(&self, agent_id: &str, kind: &str, message: &str);

    async fn cleanup(&self) {}
}

/// 把指标写成 tracing 事件（target = "colony::metrics"）
#[derive(Debug, Default)]
pub struct TracingMetrics;

#[async_trait]
impl MetricsSink for TracingMetrics {
    async fn record_metrics(&self, agent_id: &str, snapshot: &Value) {
        tracing::info!(target: "colony::metrics", agent_id, %snapshot, "metrics snapshot");
    }

    async fn record_action(&self, agent_id: &str, action_type: &str, elapsed_secs: f64) {
        tracing::debug!(target: "colony::metrics", agent_id, action_type, elapsed_secs, "action executed");
    }

    async fn record_error(&self, agent_id: &str, kind: &str, message: &str) {
        tracing::warn!(target: "colony::metrics", agent_id, kind, message, "error event");
    }
}

/// 内存计数，测试与嵌入场景用
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    inner: Mutex<MetricsRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsRecord {
    pub snapshots: Vec<Value>,
    pub actions: BTreeMap<String, u64>,
    pub errors: Vec<(String, String)>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self) -> MetricsRecord {
        self.inner.lock().await.clone()
    }

    pub async fn error_count(&self) -> usize {
        self.inner.lock().await.errors.len()
    }
}

#[async_trait]
impl MetricsSink for InMemoryMetrics {
    async fn record_metrics(&self, _agent_id: &str, snapshot: &Value) {
        self.inner.lock().await.snapshots.push(snapshot.clone());
    }

    async fn record_action(&self, _agent_id: &str, action_type: &str, _elapsed_secs: f64) {
        *self
            .inner
            .lock()
            .await
            .actions
            .entry(action_type.to_string())
            .or_default() += 1;
    }

    async fn record_error(&self, _agent_id: &str, kind: &str, message: &str) {
        self.inner
            .lock()
            .await
            .errors
            .push((kind.to_string(), message.to_string()));
    }
}
