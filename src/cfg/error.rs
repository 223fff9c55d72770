use thiserror::Error;

/// 配置源错误
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("配置文件不存在: {file}, 搜索路径: {search_paths:?}")]
    NotFound {
        file: String,
        search_paths: Vec<String>,
    },

    #[error("不支持的文件格式: {0}")]
    UnsupportedFormat(String),

    #[error("解析配置失败 [{path}]: {message}")]
    Parse { path: String, message: String },

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("监听失败: {0}")]
    Watch(String),

    #[error("配置源尚未配置")]
    NotConfigured,

    #[error("{0}")]
    Other(String),
}

/// 单个配置项在一次加载中的失败，只影响该配置项
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("配置校验失败 [{key}={raw}]: {message}")]
    Validation {
        key: String,
        raw: String,
        message: String,
    },

    #[error("配置值生成失败 [{key}={raw}]: {message}")]
    Generation {
        key: String,
        raw: String,
        message: String,
    },

    #[error("重载回调拒绝更新 [{key}={raw}]: {message}")]
    Hook {
        key: String,
        raw: String,
        message: String,
    },
}

impl KeyError {
    /// 出错的配置项 key（规范 key，而非源文件中的别名）
    pub fn key(&self) -> &str {
        match self {
            KeyError::Validation { key, .. }
            | KeyError::Generation { key, .. }
            | KeyError::Hook { key, .. } => key,
        }
    }
}

/// 注册表错误
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("configuration validation failed: {0}")]
    InvalidConfig(String),

    #[error("配置注册表 [{0}] 已经开始加载")]
    AlreadyStarted(String),

    #[error("配置项 [{key}] 的别名或 key [{name}] 已被配置项 [{existing}] 使用")]
    AliasConflict {
        key: String,
        name: String,
        existing: String,
    },

    #[error(transparent)]
    Source(#[from] SourceError),
}
