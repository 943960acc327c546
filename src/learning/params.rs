//! 策略参数：可序列化的不透明参数表，以及联邦合并（逐键算术平均）
//!
//! 参数以「键 -> 标量 | 向量」的形式导出，发给对端的是值拷贝而非引用。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 单个参数：标量或扁平化的张量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamTensor {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl ParamTensor {
    pub fn len(&self) -> usize {
        match self {
            ParamTensor::Scalar(_) => 1,
            ParamTensor::Vector(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_finite(&self) -> bool {
        match self {
            ParamTensor::Scalar(x) => x.is_finite(),
            ParamTensor::Vector(v) => v.iter().all(|x| x.is_finite()),
        }
    }

    /// 与另一参数的逐元素平均；形状不一致或含非有限值时返回 None
    pub fn mean_with(&self, other: &ParamTensor) -> Option<ParamTensor> {
        if !self.is_finite() || !other.is_finite() {
            return None;
        }
        match (self, other) {
            (ParamTensor::Scalar(a), ParamTensor::Scalar(b)) => Some(ParamTensor::Scalar((a + b) / 2.0)),
            (ParamTensor::Vector(a), ParamTensor::Vector(b)) if a.len() == b.len() => Some(
                ParamTensor::Vector(a.iter().zip(b).map(|(x, y)| (x + y) / 2.0).collect()),
            ),
            _ => None,
        }
    }
}

/// 联邦合并结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// 成功平均的键
    pub merged: Vec<String>,
    /// 两边都有但形状不符或含非有限值、被跳过的键
    pub rejected: Vec<String>,
}

/// 策略参数表
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyParameters(BTreeMap<String, ParamTensor>);

impl PolicyParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ParamTensor) {
        self.0.insert(key.into(), value);
    }

    pub fn with(mut self, key: impl Into<String>, value: ParamTensor) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamTensor> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 参数元素总数
    pub fn element_count(&self) -> usize {
        self.0.values().map(ParamTensor::len).sum()
    }

    /// 对两边都存在的键，用本地与对端的算术平均替换本地值；对端缺失的键保持不变。
    /// 形状不一致的键被拒绝（本地值不变），对端多出的键被忽略。
    pub fn merge_mean(&mut self, peer: &PolicyParameters) -> MergeReport {
        let mut report = MergeReport::default();
        for (key, local) in self.0.iter_mut() {
            let Some(remote) = peer.0.get(key) else {
                continue;
            };
            match local.mean_with(remote) {
                Some(avg) => {
                    *local = avg;
                    report.merged.push(key.clone());
                }
                None => report.rejected.push(key.clone()),
            }
        }
        report
    }
}
