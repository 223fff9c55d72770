//! 文件系统操作模块
//!
//! 提供文件监听功能，作为配置文件热更新的变更通知来源

pub mod watcher;

pub use watcher::{FileEvent, FileWatcher, FileWatcherConfig};
