//! 平台适配器注册表
//!
//! 按平台类型保存适配器实例，由调用方持有（不是全局静态表）
//!
//! # 使用示例
//!
//! ```ignore
//! let mut registry = AdapterRegistry::new();
//! registry.register(Arc::new(MyDouyinAdapter::new()));
//! let engine = PublishEngine::new(registry, store, EngineConfig::default());
//! ```

use crate::core::PlatformType;
use crate::platforms::traits::PlatformAdapter;
use std::collections::HashMap;
use std::sync::Arc;

/// 适配器注册表
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<PlatformType, Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册适配器，同一平台重复注册时替换旧实例
    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        let platform = adapter.platform();
        if self.adapters.insert(platform, adapter).is_some() {
            tracing::warn!("[Registry] 平台 {} 的适配器已被替换", platform.display_name());
        } else {
            tracing::info!("[Registry] 注册平台 {} 的适配器", platform.display_name());
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// 获取指定平台的适配器
    pub fn get(&self, platform: PlatformType) -> Option<Arc<dyn PlatformAdapter>> {
        self.adapters.get(&platform).cloned()
    }

    /// 检查是否支持指定平台
    pub fn is_supported(&self, platform: PlatformType) -> bool {
        self.adapters.contains_key(&platform)
    }

    /// 获取所有支持的平台类型
    pub fn supported_platforms(&self) -> Vec<PlatformType> {
        let mut platforms: Vec<PlatformType> = self.adapters.keys().copied().collect();
        platforms.sort_by_key(|p| p.as_str());
        platforms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::testing::StubAdapter;

    #[test]
    fn test_register_and_lookup() {
        let registry = AdapterRegistry::new()
            .with_adapter(Arc::new(StubAdapter::new(PlatformType::Tencent)))
            .with_adapter(Arc::new(StubAdapter::new(PlatformType::Douyin)));

        assert!(registry.is_supported(PlatformType::Douyin));
        assert!(!registry.is_supported(PlatformType::Bilibili));
        assert_eq!(
            registry.supported_platforms(),
            vec![PlatformType::Douyin, PlatformType::Tencent]
        );
        assert_eq!(
            registry.get(PlatformType::Tencent).map(|a| a.platform()),
            Some(PlatformType::Tencent)
        );
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(StubAdapter::new(PlatformType::Douyin)));
        registry.register(Arc::new(StubAdapter::new(PlatformType::Douyin)));
        assert_eq!(registry.supported_platforms().len(), 1);
    }
}
