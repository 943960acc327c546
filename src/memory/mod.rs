//! 记忆层：经验缓冲区（学习用）与持久化适配器（状态、经验日志、策略参数）

pub mod experience;
pub mod persistence;

pub use experience::ExperienceBuffer;
pub use persistence::{InMemoryPersistence, JsonFilePersistence, PersistenceAdapter};
