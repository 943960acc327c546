//! 学习层：策略参数与联邦合并、可插拔策略、经验驱动的学习循环

pub mod loop_;
pub mod params;
pub mod policy;

pub use loop_::{LearningLoop, LearningMetrics, LearningSettings, EXPLORATION_FLOOR, INLINE_DECAY, PERIODIC_DECAY};
pub use params::{MergeReport, ParamTensor, PolicyParameters};
pub use policy::{fit_width, FixedPolicy, LinearPolicy, Policy, TrainingSample};
