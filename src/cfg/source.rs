//! 配置源抽象
//!
//! 注册表只依赖两个接口：
//! - `SourceStore` 读取配置文件并展开成 `section.key -> 原始字符串`
//! - `ChangeWatcher` 在配置文件变化时发出通知
//!
//! 同一个组件可以同时实现两者，例如 [`FileSource`](super::FileSource)。

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::SourceError;

/// 配置源的定位信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOptions {
    /// 按顺序搜索的目录，第一个包含配置文件的目录生效
    pub search_paths: Vec<String>,
    /// 文件格式，为空时按扩展名推断
    pub format: String,
    /// 文件名
    pub file_name: String,
}

/// 变更通知回调
pub type ChangeHandler = Arc<dyn Fn() + Send + Sync>;

/// 读取并展开配置文件
pub trait SourceStore: Send + Sync {
    /// 设置搜索路径、格式、文件名，在 `read` 之前调用
    fn configure(&self, options: &SourceOptions) -> Result<(), SourceError>;

    /// 重新读取配置文件，失败时保留上一次读取的内容
    fn read(&self) -> Result<(), SourceError>;

    /// 最近一次成功读取的所有 key
    fn all_keys(&self) -> Vec<String>;

    /// key 对应的原始字符串
    fn get_string(&self, token: &str) -> Option<String>;
}

/// 配置文件变化通知
pub trait ChangeWatcher: Send + Sync {
    /// 订阅变化通知，可以在 `start_watching` 之前或之后调用
    fn subscribe(&self, on_change: ChangeHandler) -> Result<(), SourceError>;

    /// 开始监听
    fn start_watching(&self) -> Result<(), SourceError>;
}
