//! cfgset - 类型化、支持热更新的配置注册表
//!
//! 应用在启动时声明需要的配置项（key、默认值、解析、校验），之后配置文件的变化
//! 会自动应用到配置项上，调用方无需重新读取或解析。
//!
//! ## 模块
//!
//! - **cfg**: 配置项、配置注册表、配置源
//! - **fs**: 文件监听
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use cfgset::cfg::{ConfigFileNotFoundHandling, ConfigItem, ConfigRegistry, RegistryConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = RegistryConfig::new("app", vec!["/etc/app".to_string(), "config".to_string()], "yaml", "app")
//!         .with_not_found_handling(ConfigFileNotFoundHandling::Error);
//!     let registry = ConfigRegistry::from_config(config)?;
//!
//!     registry.register(
//!         ConfigItem::builder("count", || 100i64)
//!             .description("并发数")
//!             .validator(|raw| {
//!                 anyhow::ensure!(raw.parse::<i64>()? > 0, "count 必须大于 0");
//!                 Ok(())
//!             })
//!             .build(),
//!     )?;
//!     registry.register(ConfigItem::builder("workers", || 4usize).dynamic_reload(false).build())?;
//!
//!     let report = registry.load_and_watch()?;
//!     for err in &report.key_errors {
//!         eprintln!("{}", err);
//!     }
//!
//!     let count: i64 = registry.get_as("count").unwrap_or(100);
//!     println!("count = {}", count);
//!     Ok(())
//! }
//! ```

pub mod cfg;
pub mod fs;

pub use cfg::{
    ConfigFileNotFoundHandling, ConfigItem, ConfigRegistry, ItemSpec, KeyError, RegistryConfig,
    RegistryError, ReloadReport, SourceError,
};
pub use fs::{FileEvent, FileWatcher};
