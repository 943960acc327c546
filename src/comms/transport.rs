//! 传输层契约与进程内实现
//!
//! 核心只依赖 Transport：send（定向或广播）与 recv（长期运行的接收任务逐条拉取）。
//! LocalBus 是同进程多个智能体共享的总线，消息以 serde_json::Value 值拷贝投递。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::comms::AgentMessage;
use crate::core::AgentError;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn initialize(&self) -> Result<(), AgentError> {
        Ok(())
    }

    /// 发送消息；target 为 None 时广播
    async fn send(&self, message: &AgentMessage, target: Option<&str>) -> Result<(), AgentError>;

    /// 接收下一条原始消息；通道关闭时返回 None
    async fn recv(&self) -> Result<Option<Value>, AgentError>;

    async fn cleanup(&self) -> Result<(), AgentError> {
        Ok(())
    }
}

/// 进程内消息总线
#[derive(Debug, Clone, Default)]
pub struct LocalBus {
    mailboxes: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Value>>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为智能体登记邮箱，返回其传输端；同名重复登记会替换旧邮箱
    pub async fn connect(&self, agent_id: impl Into<String>) -> LocalTransport {
        let agent_id = agent_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.mailboxes.write().await.insert(agent_id.clone(), tx);
        LocalTransport {
            agent_id,
            bus: self.clone(),
            inbox: Mutex::new(rx),
        }
    }

    pub async fn disconnect(&self, agent_id: &str) {
        self.mailboxes.write().await.remove(agent_id);
    }

    pub async fn members(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.mailboxes.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 直接投递原始 JSON（可以是任意形状，用于注入外部消息）
    pub async fn deliver(&self, target: &str, raw: Value) -> Result<(), AgentError> {
        let mailboxes = self.mailboxes.read().await;
        let tx = mailboxes
            .get(target)
            .ok_or_else(|| AgentError::Communication(format!("unknown agent {}", target)))?;
        tx.send(raw)
            .map_err(|_| AgentError::Communication(format!("mailbox of {} is closed", target)))
    }

    /// 广播给除 sender 外的所有成员，返回投递数
    async fn broadcast(&self, sender: &str, raw: Value) -> usize {
        let mailboxes = self.mailboxes.read().await;
        mailboxes
            .iter()
            .filter(|(id, _)| id.as_str() != sender)
            .filter(|(_, tx)| tx.send(raw.clone()).is_ok())
            .count()
    }
}

/// 单个智能体在 LocalBus 上的端点
#[derive(Debug)]
pub struct LocalTransport {
    agent_id: String,
    bus: LocalBus,
    inbox: Mutex<mpsc::UnboundedReceiver<Value>>,
}

impl LocalTransport {
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, message: &AgentMessage, target: Option<&str>) -> Result<(), AgentError> {
        let raw = message.to_value()?;
        match target {
            Some(target) => self.bus.deliver(target, raw).await,
            None => {
                let delivered = self.bus.broadcast(&self.agent_id, raw).await;
                tracing::trace!("Agent {} broadcast {} to {} peer(s)", self.agent_id, message.topic(), delivered);
                Ok(())
            }
        }
    }

    async fn recv(&self) -> Result<Option<Value>, AgentError> {
        Ok(self.inbox.lock().await.recv().await)
    }

    async fn cleanup(&self) -> Result<(), AgentError> {
        self.bus.disconnect(&self.agent_id).await;
        self.inbox.lock().await.close();
        Ok(())
    }
}

/// 丢弃所有出站消息、永不收到入站消息的传输（单机运行）
#[derive(Debug, Default)]
pub struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn send(&self, _message: &AgentMessage, _target: Option<&str>) -> Result<(), AgentError> {
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Value>, AgentError> {
        std::future::pending::<()>().await;
        Ok(None)
    }
}
