//! 经验驱动的学习循环
//!
//! 独占持有经验缓冲区、策略（及其参数）、探索率与学习指标，全部放在一把互斥锁后面：
//! 缓冲区追加/淘汰、批量采样、参数平均都是同一把锁内的临界区，因此采样与并发追加之间
//! 不存在交错（采样看到的是加锁那一刻的缓冲区快照）。
//!
//! - learn：追加经验，缓冲区达到 batch_size 时触发 train
//! - train：无放回采样、过滤缺字段记录、计算 TD 目标、调用策略的一步优化
//! - 探索率两种衰减：每次 update_knowledge 内联 ×0.995，周期任务 ×0.999，下限 0.01
//! - 联邦合并 / 经验共享 / 知识导出

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::comms::{AgentMessage, KnowledgeKind, LearningMessage};
use crate::learning::policy::{fit_width, Policy, TrainingSample};
use crate::learning::{MergeReport, PolicyParameters};
use crate::memory::ExperienceBuffer;
use crate::types::Experience;

/// 探索率下限
pub const EXPLORATION_FLOOR: f64 = 0.01;
/// 每次 update_knowledge 的内联衰减系数
pub const INLINE_DECAY: f64 = 0.995;
/// 周期任务的衰减系数
pub const PERIODIC_DECAY: f64 = 0.999;
/// 经验导出上限（限制消息体积）
pub const SHARE_EXPERIENCE_LIMIT: usize = 100;

/// 学习循环参数（来自 AgentConfig）
#[derive(Debug, Clone)]
pub struct LearningSettings {
    pub memory_size: usize,
    pub batch_size: usize,
    pub discount_factor: f64,
    pub exploration_rate: f64,
    /// 采样用随机种子；None 时取系统熵
    pub seed: Option<u64>,
}

/// 学习指标快照
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LearningMetrics {
    pub episodes: u64,
    pub total_reward: f64,
    pub average_reward: f64,
    pub loss: f64,
    pub exploration_rate: f64,
    #[serde(skip)]
    rewarded: u64,
}

struct LearningState {
    buffer: ExperienceBuffer,
    policy: Box<dyn Policy>,
    exploration_rate: f64,
    metrics: LearningMetrics,
    rng: StdRng,
}

impl LearningState {
    fn record_reward(&mut self, experience: &Experience) {
        if let Some(r) = experience.reward.filter(|r| r.is_finite()) {
            self.metrics.total_reward += r;
            self.metrics.rewarded += 1;
            self.metrics.average_reward = self.metrics.total_reward / self.metrics.rewarded as f64;
        }
    }

    fn set_exploration(&mut self, rate: f64) {
        self.exploration_rate = rate;
        self.metrics.exploration_rate = rate;
    }
}

pub struct LearningLoop {
    agent_id: String,
    batch_size: usize,
    discount_factor: f64,
    state: Mutex<LearningState>,
}

impl LearningLoop {
    pub fn new(agent_id: impl Into<String>, policy: Box<dyn Policy>, settings: LearningSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let exploration_rate = settings.exploration_rate.clamp(0.0, 1.0);
        Self {
            agent_id: agent_id.into(),
            batch_size: settings.batch_size.max(1),
            discount_factor: settings.discount_factor,
            state: Mutex::new(LearningState {
                buffer: ExperienceBuffer::new(settings.memory_size),
                policy,
                exploration_rate,
                metrics: LearningMetrics {
                    exploration_rate,
                    ..Default::default()
                },
                rng,
            }),
        }
    }

    pub async fn exploration_rate(&self) -> f64 {
        self.state.lock().await.exploration_rate
    }

    /// 恢复持久化的探索率；只允许降低（保持单调不增）
    pub async fn restore_exploration_rate(&self, rate: f64) -> bool {
        let mut state = self.state.lock().await;
        let current = state.exploration_rate;
        if rate.is_finite() && rate < current {
            state.set_exploration(rate.max(EXPLORATION_FLOOR).min(current));
            true
        } else {
            false
        }
    }

    pub async fn metrics(&self) -> LearningMetrics {
        self.state.lock().await.metrics.clone()
    }

    pub async fn buffer_len(&self) -> usize {
        self.state.lock().await.buffer.len()
    }

    pub async fn parameter_count(&self) -> usize {
        self.state.lock().await.policy.parameter_count()
    }

    pub async fn input_width(&self) -> usize {
        self.state.lock().await.policy.input_width()
    }

    /// 用当前策略打分（特征先补齐到策略要求的宽度）
    pub async fn score(&self, features: &[f64]) -> Vec<f64> {
        let state = self.state.lock().await;
        let x = fit_width(features, state.policy.input_width());
        state.policy.score(&x)
    }

    /// 追加一条经验；缓冲区达到 batch_size 时训练一步
    pub async fn learn(&self, experience: Experience) -> Option<f64> {
        let mut state = self.state.lock().await;
        state.record_reward(&experience);
        state.buffer.push(experience);
        if state.buffer.len() >= self.batch_size {
            self.train_locked(&mut state)
        } else {
            None
        }
    }

    /// 处理一条自身产生的经验：learn + 内联探索率衰减
    pub async fn update_knowledge(&self, experience: Experience) -> Option<f64> {
        let loss = self.learn(experience).await;
        self.decay_exploration(INLINE_DECAY).await;
        loss
    }

    /// 训练一步；返回本步损失，采样后无有效记录或训练失败时返回 None
    pub async fn train(&self) -> Option<f64> {
        let mut state = self.state.lock().await;
        self.train_locked(&mut state)
    }

    fn train_locked(&self, state: &mut LearningState) -> Option<f64> {
        let LearningState {
            buffer,
            policy,
            metrics,
            rng,
            ..
        } = state;
        let batch = buffer.sample(self.batch_size, rng);
        let width = policy.input_width();
        let actions = policy.action_count();

        let samples: Vec<TrainingSample> = batch
            .iter()
            .filter_map(|exp| {
                let (Some(s), Some(a), Some(r)) = (exp.state.as_ref(), exp.action, exp.reward) else {
                    return None;
                };
                if a >= actions || !r.is_finite() {
                    return None;
                }
                let input = fit_width(s, width);
                let next = fit_width(exp.next_state.as_ref().unwrap_or(s), width);
                let mut target = policy.score(&input);
                let best_next = policy
                    .score(&next)
                    .into_iter()
                    .fold(f64::NEG_INFINITY, f64::max);
                let best_next = if best_next.is_finite() { best_next } else { 0.0 };
                target[a] = r + self.discount_factor * best_next;
                Some(TrainingSample { input, target })
            })
            .collect();

        if samples.is_empty() {
            tracing::debug!("Agent {}: no trainable experiences in batch", self.agent_id);
            return None;
        }

        match policy.train_step(&samples) {
            Ok(loss) => {
                metrics.loss = loss;
                metrics.episodes += 1;
                tracing::debug!(
                    "Agent {}: training step {} on {} samples, loss {:.6}",
                    self.agent_id,
                    metrics.episodes,
                    samples.len(),
                    loss
                );
                Some(loss)
            }
            Err(e) => {
                tracing::error!("Agent {}: error training model: {}", self.agent_id, e);
                None
            }
        }
    }

    /// 乘性衰减探索率，不低于下限；返回衰减后的值
    pub async fn decay_exploration(&self, factor: f64) -> f64 {
        let mut state = self.state.lock().await;
        let current = state.exploration_rate;
        if current > EXPLORATION_FLOOR {
            let factor = factor.clamp(0.0, 1.0);
            state.set_exploration((current * factor).max(EXPLORATION_FLOOR));
        }
        state.exploration_rate
    }

    /// 联邦合并：两边都有的键取算术平均；合并后的参数表导入失败时本地策略保持不变
    pub async fn handle_model_update(&self, peer: &PolicyParameters) -> MergeReport {
        let mut state = self.state.lock().await;
        let mut merged = state.policy.export();
        let report = merged.merge_mean(peer);
        if !report.rejected.is_empty() {
            tracing::warn!(
                "Agent {}: rejected {} peer parameter(s) with mismatched shape: {:?}",
                self.agent_id,
                report.rejected.len(),
                report.rejected
            );
        }
        if report.merged.is_empty() {
            return report;
        }
        if let Err(e) = state.policy.import(&merged) {
            tracing::warn!("Agent {}: could not apply merged parameters: {}", self.agent_id, e);
            return MergeReport {
                merged: Vec::new(),
                rejected: report.merged,
            };
        }
        tracing::info!(
            "Agent {}: merged {} parameter(s) from peer",
            self.agent_id,
            report.merged.len()
        );
        report
    }

    /// 校验并接纳对端经验，返回接纳条数；不合格记录静默丢弃
    pub async fn handle_experience_sharing(&self, records: &[Value]) -> usize {
        let valid: Vec<Experience> = records
            .iter()
            .filter_map(|record| match Experience::from_peer(record) {
                Ok(exp) => Some(exp),
                Err(e) => {
                    tracing::warn!("Agent {}: dropping shared experience: {}", self.agent_id, e);
                    None
                }
            })
            .collect();
        let admitted = valid.len();
        let mut state = self.state.lock().await;
        for exp in valid {
            state.record_reward(&exp);
            state.buffer.push(exp);
        }
        admitted
    }

    /// 当前参数的值拷贝
    pub async fn export_parameters(&self) -> PolicyParameters {
        self.state.lock().await.policy.export()
    }

    /// 导入参数（初始化时加载已保存的策略）
    pub async fn import_parameters(&self, params: &PolicyParameters) -> Result<(), crate::core::AgentError> {
        self.state.lock().await.policy.import(params)
    }

    /// 构造知识导出消息：策略参数快照，或最近 100 条经验
    pub async fn share_knowledge(&self, kind: KnowledgeKind) -> AgentMessage {
        let state = self.state.lock().await;
        let learning = match kind {
            KnowledgeKind::ModelWeights => LearningMessage::ModelUpdate {
                weights: Some(state.policy.export()),
                source_agent: Some(self.agent_id.clone()),
            },
            KnowledgeKind::Experiences => LearningMessage::ExperienceSharing {
                experiences: state
                    .buffer
                    .recent(SHARE_EXPERIENCE_LIMIT)
                    .iter()
                    .filter_map(|e| serde_json::to_value(e).ok())
                    .collect(),
                source_agent: Some(self.agent_id.clone()),
            },
        };
        AgentMessage::Learning(learning)
    }
}
