//! Colony - 自主学习智能体运行时
//!
//! 入口：初始化日志、加载配置、构建并启动一个 LearningAgent，收到 Ctrl+C / SIGTERM 后优雅停止。
//! 用法：`colony [config.toml]`

use std::path::PathBuf;

use anyhow::Context;
use colony::core::{AgentBuilder, ShutdownManager};
use colony::{load_config, observability};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let app = load_config(config_path).context("Failed to load configuration")?;

    let agent = AgentBuilder::from_app_config(&app).build();
    agent
        .initialize()
        .await
        .with_context(|| format!("Failed to initialize agent {}", agent.id()))?;
    agent.start().await.context("Failed to start agent")?;

    let shutdown = ShutdownManager::new();
    shutdown.install_signal_handlers();
    tracing::info!("Agent {} running, press Ctrl+C to stop", agent.id());

    let reason = shutdown.wait_for_shutdown().await;
    tracing::info!("Shutdown requested ({:?})", reason);
    agent.stop().await;

    Ok(())
}
