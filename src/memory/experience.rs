//! 经验缓冲区：有界队列，超出容量时从最旧的开始淘汰
//!
//! 由 LearningLoop 独占持有（在其互斥锁内访问），自身不做同步。

use std::collections::VecDeque;

use rand::Rng;

use crate::types::Experience;

#[derive(Debug, Clone)]
pub struct ExperienceBuffer {
    entries: VecDeque<Experience>,
    capacity: usize,
}

impl ExperienceBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 追加一条经验，返回被淘汰的条数
    pub fn push(&mut self, experience: Experience) -> usize {
        self.entries.push_back(experience);
        let mut evicted = 0;
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn extend(&mut self, experiences: impl IntoIterator<Item = Experience>) -> usize {
        experiences.into_iter().map(|e| self.push(e)).sum()
    }

    /// 无放回随机采样 min(n, len) 条（克隆出的副本）
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<Experience> {
        let amount = n.min(self.entries.len());
        rand::seq::index::sample(rng, self.entries.len(), amount)
            .into_iter()
            .map(|i| self.entries[i].clone())
            .collect()
    }

    /// 最近的 n 条，按加入顺序
    pub fn recent(&self, n: usize) -> Vec<Experience> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Experience> {
        self.entries.iter()
    }
}
