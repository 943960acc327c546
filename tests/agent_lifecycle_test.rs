//! 多智能体集成测试：进程内总线上的心跳、模型合并、经验共享、目标消息与重启恢复

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use colony::comms::{KnowledgeKind, LocalBus};
use colony::config::{AppConfig, PersistenceBackend};
use colony::core::{AgentBuilder, AgentError, AgentState};
use colony::learning::{FixedPolicy, ParamTensor, PolicyParameters};
use colony::{Agent, AgentConfig, Goal, Observation};
use serde_json::json;

fn fast_config(id: &str) -> AgentConfig {
    let mut cfg = AgentConfig::new(id);
    cfg.heartbeat_interval = Duration::from_millis(50);
    cfg.runtime.main_loop_interval = Duration::from_millis(20);
    cfg.runtime.error_backoff = Duration::from_millis(50);
    cfg.runtime.shutdown_grace = Duration::from_secs(2);
    cfg
}

async fn agent_on(bus: &LocalBus, cfg: AgentConfig, policy: FixedPolicy) -> Agent {
    let transport = Arc::new(bus.connect(cfg.agent_id.clone()).await);
    let agent = AgentBuilder::new(cfg)
        .with_transport(transport)
        .with_policy(Box::new(policy))
        .with_seed(11)
        .build();
    agent.initialize().await.unwrap();
    agent.start().await.unwrap();
    agent
}

/// 轮询直到条件成立，最多约 2 秒
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_heartbeats_reach_peers() {
    let bus = LocalBus::new();
    let a = agent_on(&bus, fast_config("hive-a"), FixedPolicy::new(vec![0.5; 10])).await;
    let b = agent_on(&bus, fast_config("hive-b"), FixedPolicy::new(vec![0.5; 10])).await;

    let (ra, rb) = (&a, &b);
    assert!(eventually(|| async move { ra.core().known_peers().await == vec!["hive-b".to_string()] }).await);
    assert!(eventually(|| async move { rb.core().known_peers().await == vec!["hive-a".to_string()] }).await);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_model_update_is_averaged() {
    let bus = LocalBus::new();
    let policy = FixedPolicy::new(vec![0.5; 10])
        .with_params(PolicyParameters::new().with("w1", ParamTensor::Scalar(4.0)));
    let agent = agent_on(&bus, fast_config("merger"), policy).await;

    bus.deliver(
        "merger",
        json!({
            "type": "learning",
            "learning_type": "model_update",
            "weights": {"w1": 2.0, "unknown": 1.0},
            "source_agent": "peer",
        }),
    )
    .await
    .unwrap();

    let r = &agent;
    assert!(
        eventually(|| async move {
            r.core().learning().export_parameters().await.get("w1") == Some(&ParamTensor::Scalar(3.0))
        })
        .await
    );
    let params = agent.core().learning().export_parameters().await;
    assert!(params.get("unknown").is_none());
    agent.stop().await;
}

#[tokio::test]
async fn test_shared_experiences_are_validated() {
    let bus = LocalBus::new();
    let agent = agent_on(&bus, fast_config("student"), FixedPolicy::new(vec![0.5; 10])).await;

    bus.deliver(
        "student",
        json!({
            "type": "learning",
            "learning_type": "experience_sharing",
            "experiences": [
                {"state": [0.1, 0.2], "action": 1, "reward": 0.5},
                {"state": [0.3], "action": 2},
            ],
            "source_agent": "mentor",
        }),
    )
    .await
    .unwrap();

    let r = &agent;
    assert!(eventually(|| async move { r.core().learning().buffer_len().await == 1 }).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(agent.core().learning().buffer_len().await, 1);
    agent.stop().await;
}

#[tokio::test]
async fn test_share_knowledge_between_agents() {
    let bus = LocalBus::new();
    let a = agent_on(&bus, fast_config("giver"), FixedPolicy::new(vec![0.5; 10])).await;
    let b = agent_on(&bus, fast_config("taker"), FixedPolicy::new(vec![0.5; 10])).await;

    a.observe(Observation::new("sensor", json!({"temp": 21.5}), "probe").with_confidence(0.7))
        .await;
    assert_eq!(a.core().learning().buffer_len().await, 1);

    a.share_knowledge(Some("taker"), KnowledgeKind::Experiences)
        .await
        .unwrap();
    let rb = &b;
    assert!(eventually(|| async move { rb.core().learning().buffer_len().await == 1 }).await);

    let err = a
        .share_knowledge(Some("nobody"), KnowledgeKind::ModelWeights)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Communication(_)));

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_goal_messages_and_validation() {
    let bus = LocalBus::new();
    let agent = agent_on(&bus, fast_config("planner"), FixedPolicy::new(vec![0.5; 10])).await;

    bus.deliver(
        "planner",
        json!({
            "type": "goal",
            "action": "add",
            "goal_data": {"goal_id": "g-remote", "description": "map the area", "priority": 4},
        }),
    )
    .await
    .unwrap();
    let r = &agent;
    assert!(eventually(|| async move { r.core().goals().get("g-remote").await.is_some() }).await);

    let err = agent
        .add_goal(Goal::new("too eager").with_priority(11))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Validation(_)));

    bus.deliver(
        "planner",
        json!({"type": "goal", "action": "remove", "goal_id": "g-remote"}),
    )
    .await
    .unwrap();
    assert!(eventually(|| async move { r.core().goals().get("g-remote").await.is_none() }).await);
    agent.stop().await;
}

#[tokio::test]
async fn test_malformed_messages_are_dropped() {
    let bus = LocalBus::new();
    let agent = agent_on(&bus, fast_config("sturdy"), FixedPolicy::new(vec![0.5; 10])).await;

    bus.deliver("sturdy", json!("garbage")).await.unwrap();
    bus.deliver("sturdy", json!({"type": "gossip", "rumor": true})).await.unwrap();
    bus.deliver("sturdy", json!({"type": "goal", "action": "explode"})).await.unwrap();
    bus.deliver(
        "sturdy",
        json!({"type": "goal", "action": "add", "goal_data": {"goal_id": "after", "description": "still listening"}}),
    )
    .await
    .unwrap();

    let r = &agent;
    assert!(eventually(|| async move { r.core().goals().get("after").await.is_some() }).await);
    assert!(agent.is_running().await);
    assert_ne!(agent.state(), AgentState::Error);
    agent.stop().await;
}

#[tokio::test]
async fn test_stop_twice_is_idempotent() {
    let bus = LocalBus::new();
    let agent = agent_on(&bus, fast_config("once"), FixedPolicy::new(vec![0.5; 10])).await;
    assert!(agent.is_running().await);

    agent.stop().await;
    assert_eq!(agent.state(), AgentState::Terminated);
    agent.stop().await;
    assert_eq!(agent.state(), AgentState::Terminated);
    assert!(!agent.is_running().await);
    assert!(bus.members().await.is_empty());
}

#[tokio::test]
async fn test_file_persistence_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut app = AppConfig::default();
    app.agent.id = Some("keeper".into());
    app.persistence.backend = PersistenceBackend::File;
    app.persistence.path = dir.path().to_path_buf();
    app.policy.input_width = 8;
    app.policy.seed = Some(1);
    app.runtime.shutdown_grace_secs = 2;

    let first = AgentBuilder::from_app_config(&app).build();
    first.initialize().await.unwrap();
    first.start().await.unwrap();
    let goal_id = first
        .add_goal(Goal::new("remember me").with_target("recall", 1.0))
        .await
        .unwrap();
    first.stop().await;
    let saved_goals = first.core().goals().all().await;
    let saved_params = first.core().learning().export_parameters().await;

    app.policy.seed = Some(2);
    let second = AgentBuilder::from_app_config(&app).build();
    second.initialize().await.unwrap();
    assert_eq!(second.state(), AgentState::Idle);
    assert!(second.core().goals().get(&goal_id).await.is_some());
    assert_eq!(second.core().goals().all().await, saved_goals);
    assert_eq!(second.core().learning().export_parameters().await, saved_params);
}

#[tokio::test]
async fn test_zero_exploration_is_deterministic() {
    let mut cfg = fast_config("greedy");
    cfg.exploration_rate = 0.0;
    let mut scores = vec![0.1; 10];
    scores[3] = 0.9;
    let agent = AgentBuilder::new(cfg)
        .with_policy(Box::new(FixedPolicy::new(scores)))
        .build();
    agent.initialize().await.unwrap();

    for i in 0..5 {
        let obs = Observation::new("tick", json!({"i": i}), "clock");
        let actions = agent.observe(obs).await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type, "plan");
        assert_eq!(actions[0].action_index, Some(3));
    }
    assert_eq!(agent.core().pipeline().actions_taken().await, 5);
}

#[tokio::test]
async fn test_coordination_messages_follow_the_gate() {
    let bus = LocalBus::new();
    let on = agent_on(&bus, fast_config("coord-on"), FixedPolicy::new(vec![0.5; 10])).await;
    let mut off_cfg = fast_config("coord-off");
    off_cfg.coordination_enabled = false;
    let off = agent_on(&bus, off_cfg, FixedPolicy::new(vec![0.5; 10])).await;

    let knowledge = json!({
        "type": "coordination",
        "coordination_type": "knowledge_sharing",
        "knowledge_type": "experiences",
        "experiences": [
            {"state": [0.2, 0.4], "action": 3, "reward": 0.8},
            {"state": [0.2, 0.4], "reward": 0.8},
        ],
    });
    let task = json!({
        "type": "coordination",
        "coordination_type": "task_assignment",
        "task_data": {"description": "survey the field", "priority": 3},
    });

    // 先投递知识：此时没有目标，缓冲区只会因共享经验而增长
    bus.deliver("coord-on", knowledge.clone()).await.unwrap();
    let r = &on;
    assert!(eventually(|| async move { r.core().learning().buffer_len().await == 1 }).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(on.core().learning().buffer_len().await, 1);

    bus.deliver("coord-on", task.clone()).await.unwrap();
    assert!(eventually(|| async move { r.core().goals().all().await.len() == 1 }).await);
    let goals = on.core().goals().all().await;
    assert_eq!(goals[0].description, "survey the field");
    assert_eq!(goals[0].priority, 3);

    // 关闭协作的智能体：协作消息不被路由；随后的心跳证明前面的消息已被消费
    bus.deliver("coord-off", knowledge).await.unwrap();
    bus.deliver("coord-off", task).await.unwrap();
    bus.deliver(
        "coord-off",
        json!({"type": "heartbeat", "agent_id": "marker", "timestamp": 0.0, "state": "idle"}),
    )
    .await
    .unwrap();
    let ro = &off;
    assert!(eventually(|| async move { ro.core().known_peers().await.contains(&"marker".to_string()) }).await);
    assert_eq!(off.core().learning().buffer_len().await, 0);
    assert!(off.core().goals().all().await.is_empty());
    assert_ne!(off.state(), AgentState::Error);

    on.stop().await;
    off.stop().await;
}
