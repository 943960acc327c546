//! 智能体间通信：消息协议、传输契约（含进程内总线）、入站路由

pub mod message;
pub mod router;
pub mod transport;

pub use message::{
    AgentMessage, CoordinationMessage, GoalMessage, Heartbeat, KnowledgeKind, LearningMessage,
    TOPIC_COORDINATION, TOPIC_GOAL, TOPIC_HEARTBEAT, TOPIC_LEARNING,
};
pub use router::{MessageHandler, MessageRouter, RouteOutcome};
pub use transport::{LocalBus, LocalTransport, NullTransport, Transport};
