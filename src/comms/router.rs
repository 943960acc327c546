//! 入站消息路由：按顶层 type 分发到已登记的处理器

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::comms::AgentMessage;
use crate::core::AgentError;

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: AgentMessage) -> Result<(), AgentError>;
}

/// 路由结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Handled,
    /// 没有对应 topic 的处理器，或消息畸形 / 子类型未知
    Dropped,
}

#[derive(Default)]
pub struct MessageRouter {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler(&mut self, topic: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        self.handlers.insert(topic.into(), handler);
    }

    pub fn topics(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        topics.sort();
        topics
    }

    /// 解析并分发一条原始消息。畸形或未知的消息记录 warn 后丢弃；
    /// 处理器返回的错误向上传播，由监听任务决定是否退避
    pub async fn route(&self, raw: Value) -> Result<RouteOutcome, AgentError> {
        let topic = raw.get("type").and_then(Value::as_str).unwrap_or_default().to_string();
        let Some(handler) = self.handlers.get(&topic) else {
            tracing::warn!("Dropping message with unhandled type '{}'", topic);
            return Ok(RouteOutcome::Dropped);
        };
        let message = match AgentMessage::from_value(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping {} message: {}", topic, e);
                return Ok(RouteOutcome::Dropped);
            }
        };
        handler.handle(message).await?;
        Ok(RouteOutcome::Handled)
    }
}
