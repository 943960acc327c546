//! 可插拔策略抽象
//!
//! 所有策略实现 Policy：score（特征 -> 各动作得分）、train_step（一步优化并返回标量损失）、
//! export / import（参数表进出）。内置 LinearPolicy（线性 Q 函数 + SGD）与 FixedPolicy（固定得分，用于确定性场景）。

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::core::AgentError;
use crate::learning::{ParamTensor, PolicyParameters};

/// 一条训练样本：输入特征与目标输出
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSample {
    pub input: Vec<f64>,
    pub target: Vec<f64>,
}

/// 策略 trait
pub trait Policy: Send + Sync {
    /// 要求的输入宽度（特征会被补零/截断到此宽度）
    fn input_width(&self) -> usize;

    /// 输出的动作数
    fn action_count(&self) -> usize;

    /// 对一组特征打分，返回长度为 action_count 的得分向量
    fn score(&self, features: &[f64]) -> Vec<f64>;

    /// 在一批 (输入, 目标) 上执行一步优化，返回优化前的平均平方误差
    fn train_step(&mut self, batch: &[TrainingSample]) -> Result<f64, AgentError>;

    fn export(&self) -> PolicyParameters;

    fn import(&mut self, params: &PolicyParameters) -> Result<(), AgentError>;

    /// 参数元素总数
    fn parameter_count(&self) -> usize {
        self.export().element_count()
    }
}

/// 将特征补零或截断到固定宽度，非有限值置 0
pub fn fit_width(features: &[f64], width: usize) -> Vec<f64> {
    let mut out: Vec<f64> = features
        .iter()
        .take(width)
        .map(|x| if x.is_finite() { *x } else { 0.0 })
        .collect();
    out.resize(width, 0.0);
    out
}

fn mean_squared_error(pred: &[f64], target: &[f64]) -> f64 {
    if pred.is_empty() {
        return 0.0;
    }
    pred.iter()
        .zip(target)
        .map(|(p, t)| (p - t).powi(2))
        .sum::<f64>()
        / pred.len() as f64
}

const WEIGHT_KEY: &str = "linear.weight";
const BIAS_KEY: &str = "linear.bias";
/// 单个梯度分量的裁剪上限
const GRAD_CLIP: f64 = 10.0;

/// 线性 Q 函数：q = W·x + b，在平方误差上做一步 SGD
#[derive(Debug, Clone)]
pub struct LinearPolicy {
    input_width: usize,
    action_count: usize,
    /// 行主序 action_count x input_width
    weights: Vec<f64>,
    bias: Vec<f64>,
    learning_rate: f64,
}

impl LinearPolicy {
    pub fn new(input_width: usize, action_count: usize, learning_rate: f64) -> Self {
        Self::with_rng(input_width, action_count, learning_rate, &mut StdRng::from_entropy())
    }

    pub fn with_seed(input_width: usize, action_count: usize, learning_rate: f64, seed: u64) -> Self {
        Self::with_rng(input_width, action_count, learning_rate, &mut StdRng::seed_from_u64(seed))
    }

    fn with_rng(input_width: usize, action_count: usize, learning_rate: f64, rng: &mut StdRng) -> Self {
        let input_width = input_width.max(1);
        let action_count = action_count.max(1);
        let weights = (0..input_width * action_count)
            .map(|_| rng.gen_range(-0.05..0.05))
            .collect();
        Self {
            input_width,
            action_count,
            weights,
            bias: vec![0.0; action_count],
            learning_rate,
        }
    }

    fn row(&self, action: usize) -> &[f64] {
        let start = action * self.input_width;
        &self.weights[start..start + self.input_width]
    }
}

impl Policy for LinearPolicy {
    fn input_width(&self) -> usize {
        self.input_width
    }

    fn action_count(&self) -> usize {
        self.action_count
    }

    fn score(&self, features: &[f64]) -> Vec<f64> {
        let x = fit_width(features, self.input_width);
        (0..self.action_count)
            .map(|a| {
                self.row(a).iter().zip(&x).map(|(w, xi)| w * xi).sum::<f64>() + self.bias[a]
            })
            .collect()
    }

    fn train_step(&mut self, batch: &[TrainingSample]) -> Result<f64, AgentError> {
        if batch.is_empty() {
            return Err(AgentError::Training("empty batch".into()));
        }
        let n = batch.len() as f64;
        let k = self.action_count as f64;
        let mut grad_w = vec![0.0; self.weights.len()];
        let mut grad_b = vec![0.0; self.action_count];
        let mut loss = 0.0;

        for sample in batch {
            let x = fit_width(&sample.input, self.input_width);
            let target = fit_width(&sample.target, self.action_count);
            let pred = self.score(&x);
            loss += mean_squared_error(&pred, &target);
            for a in 0..self.action_count {
                // d/dpred of mean((pred - target)^2) over actions and batch
                let g = (2.0 * (pred[a] - target[a]) / (n * k)).clamp(-GRAD_CLIP, GRAD_CLIP);
                grad_b[a] += g;
                let row = a * self.input_width;
                for (i, xi) in x.iter().enumerate() {
                    grad_w[row + i] += g * xi;
                }
            }
        }
        let loss = loss / n;
        if !loss.is_finite() {
            return Err(AgentError::Training(format!("non-finite loss {}", loss)));
        }

        for (w, g) in self.weights.iter_mut().zip(&grad_w) {
            *w -= self.learning_rate * g;
        }
        for (b, g) in self.bias.iter_mut().zip(&grad_b) {
            *b -= self.learning_rate * g;
        }
        Ok(loss)
    }

    fn export(&self) -> PolicyParameters {
        PolicyParameters::new()
            .with(WEIGHT_KEY, ParamTensor::Vector(self.weights.clone()))
            .with(BIAS_KEY, ParamTensor::Vector(self.bias.clone()))
    }

    fn import(&mut self, params: &PolicyParameters) -> Result<(), AgentError> {
        let take = |key: &str, len: usize| -> Result<Option<Vec<f64>>, AgentError> {
            match params.get(key) {
                None => Ok(None),
                Some(ParamTensor::Vector(v)) if v.len() == len && v.iter().all(|x| x.is_finite()) => {
                    Ok(Some(v.clone()))
                }
                Some(other) => Err(AgentError::Validation(format!(
                    "parameter '{}' has {} elements, expected {}",
                    key,
                    other.len(),
                    len
                ))),
            }
        };
        // 两个键都校验通过后才落地，避免半更新
        let weights = take(WEIGHT_KEY, self.weights.len())?;
        let bias = take(BIAS_KEY, self.bias.len())?;
        if let Some(w) = weights {
            self.weights = w;
        }
        if let Some(b) = bias {
            self.bias = b;
        }
        Ok(())
    }

    fn parameter_count(&self) -> usize {
        self.weights.len() + self.bias.len()
    }
}

/// 固定得分策略：score 始终返回构造时给定的得分，参数表原样导入导出
#[derive(Debug, Clone)]
pub struct FixedPolicy {
    input_width: usize,
    scores: Vec<f64>,
    params: PolicyParameters,
    steps: usize,
}

impl FixedPolicy {
    pub fn new(scores: Vec<f64>) -> Self {
        Self {
            input_width: 4,
            scores,
            params: PolicyParameters::new(),
            steps: 0,
        }
    }

    pub fn with_params(mut self, params: PolicyParameters) -> Self {
        self.params = params;
        self
    }

    pub fn with_input_width(mut self, width: usize) -> Self {
        self.input_width = width.max(1);
        self
    }

    /// 已执行的 train_step 次数
    pub fn steps(&self) -> usize {
        self.steps
    }
}

impl Policy for FixedPolicy {
    fn input_width(&self) -> usize {
        self.input_width
    }

    fn action_count(&self) -> usize {
        self.scores.len()
    }

    fn score(&self, _features: &[f64]) -> Vec<f64> {
        self.scores.clone()
    }

    fn train_step(&mut self, batch: &[TrainingSample]) -> Result<f64, AgentError> {
        self.steps += 1;
        let loss = batch
            .iter()
            .map(|s| mean_squared_error(&self.scores, &s.target))
            .sum::<f64>()
            / batch.len().max(1) as f64;
        Ok(loss)
    }

    fn export(&self) -> PolicyParameters {
        self.params.clone()
    }

    fn import(&mut self, params: &PolicyParameters) -> Result<(), AgentError> {
        self.params = params.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_width_pads_truncates_and_sanitizes() {
        assert_eq!(fit_width(&[1.0, f64::NAN], 4), vec![1.0, 0.0, 0.0, 0.0]);
        assert_eq!(fit_width(&[1.0, 2.0, 3.0], 2), vec![1.0, 2.0]);
    }

    #[test]
    fn test_linear_score_shape() {
        let policy = LinearPolicy::with_seed(8, 3, 0.01, 42);
        assert_eq!(policy.score(&[1.0; 20]).len(), 3);
        assert_eq!(policy.parameter_count(), 8 * 3 + 3);
    }

    #[test]
    fn test_linear_training_reduces_loss() {
        let mut policy = LinearPolicy::with_seed(4, 2, 0.5, 7);
        let batch = vec![
            TrainingSample { input: vec![1.0, 0.0, 0.0, 0.0], target: vec![1.0, 0.0] },
            TrainingSample { input: vec![0.0, 1.0, 0.0, 0.0], target: vec![0.0, 1.0] },
        ];
        let first = policy.train_step(&batch).unwrap();
        let mut last = first;
        for _ in 0..200 {
            last = policy.train_step(&batch).unwrap();
        }
        assert!(last < first * 0.1, "loss {} -> {}", first, last);
    }

    #[test]
    fn test_linear_import_rejects_wrong_shape() {
        let mut policy = LinearPolicy::with_seed(4, 2, 0.1, 1);
        let before = policy.export();
        let bad = PolicyParameters::new().with(WEIGHT_KEY, ParamTensor::Vector(vec![0.0; 3]));
        assert!(policy.import(&bad).is_err());
        assert_eq!(policy.export(), before);

        let good = PolicyParameters::new().with(BIAS_KEY, ParamTensor::Vector(vec![1.0, 2.0]));
        policy.import(&good).unwrap();
        assert_eq!(policy.score(&[0.0; 4]), vec![1.0, 2.0]);
    }

    #[test]
    fn test_fixed_policy_round_trip() {
        let params = PolicyParameters::new().with("w1", ParamTensor::Scalar(4.0));
        let mut policy = FixedPolicy::new(vec![0.1, 0.9]).with_params(params.clone());
        assert_eq!(policy.score(&[]), vec![0.1, 0.9]);
        assert_eq!(policy.export(), params);
        let batch = [TrainingSample { input: vec![], target: vec![0.1, 0.9] }];
        assert_eq!(policy.train_step(&batch).unwrap(), 0.0);
        assert_eq!(policy.steps(), 1);
    }
}
