//! cfg 模块 - 类型化、支持热更新的配置注册表
//!
//! - `ConfigItem`：单个配置项，包含默认值、校验、生成、重载回调
//! - `ConfigRegistry`：管理配置项，负责首次加载和文件变化后的重载
//! - `SourceStore` / `ChangeWatcher`：配置源和变化通知的抽象，默认实现为 `FileSource`

pub mod error;
pub mod file_source;
pub mod item;
pub mod memory_source;
pub mod registry;
pub mod reload;
pub mod resolver;
pub mod source;

pub use error::{KeyError, RegistryError, SourceError};
pub use file_source::{FileFormat, FileSource, FileSourceConfig};
pub use item::{AnyValue, ConfigItem, ItemBuilder, ItemSpec};
pub use memory_source::MemorySource;
pub use registry::{ConfigFileNotFoundHandling, ConfigRegistry, ItemDescription, RegistryConfig};
pub use reload::{ReloadPhase, ReloadReport};
pub use resolver::resolve;
pub use source::{ChangeHandler, ChangeWatcher, SourceOptions, SourceStore};
