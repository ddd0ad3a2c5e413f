// Platforms module
// 平台模块
//
// 定义平台适配器接口（抖音、快手、视频号、小红书等）和适配器注册表。
// 具体的页面操作由各平台适配器实现，不在本 crate 内。
//
// # 模块结构
//
// - [traits](traits/index.html) - 适配器能力接口
// - [factory](factory/index.html) - 适配器注册表

pub mod factory;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use factory::AdapterRegistry;
pub use traits::{
    parse_reward_text, PlatformAdapter, PlatformLimits, PublishState, RewardSignal, SessionHandle,
    StepOutcome, TaskCandidate, UploadState,
};
