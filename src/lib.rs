// Core modules
// 核心模块
pub mod core;
pub mod engine;
pub mod platforms;
pub mod storage;

pub use crate::core::{
    EngineConfig, EngineError, FailureReason, PlatformType, PublishOutcome, PublishRequest,
    PublishStage, SessionSnapshot,
};
pub use engine::PublishEngine;
pub use platforms::{AdapterRegistry, PlatformAdapter};
pub use storage::{DatabaseManager, MemorySessionStore, SessionStore};

// Initialize tracing for logging
// 初始化 tracing 用于日志输出（由宿主程序调用，库本身不安装全局订阅者）
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_thread_ids(true)
        .with_target(false)
        .try_init();
}
