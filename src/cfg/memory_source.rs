//! 内存配置源
//!
//! 不依赖文件系统，`set`/`remove` 修改待读取的内容，`notify` 模拟文件变化通知。
//! 适用于测试以及由程序自身生成配置的场景。

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use super::error::SourceError;
use super::source::{ChangeHandler, ChangeWatcher, SourceOptions, SourceStore};

#[derive(Default)]
pub struct MemorySource {
    /// 下一次 read 将读到的内容
    pending: RwLock<BTreeMap<String, String>>,
    /// 最近一次 read 读到的内容
    values: RwLock<BTreeMap<String, String>>,
    options: RwLock<Option<SourceOptions>>,
    read_error: RwLock<Option<String>>,
    handlers: RwLock<Vec<ChangeHandler>>,
    watching: RwLock<bool>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<K, V>(values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let source = Self::new();
        for (k, v) in values {
            source.set(k, v);
        }
        source
    }

    pub fn set(&self, token: impl Into<String>, raw: impl Into<String>) {
        self.pending
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.into(), raw.into());
    }

    pub fn remove(&self, token: &str) {
        self.pending
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token);
    }

    /// 让后续的 read 失败，传 None 恢复
    pub fn fail_reads(&self, message: Option<&str>) {
        *self.read_error.write().unwrap_or_else(PoisonError::into_inner) =
            message.map(str::to_string);
    }

    /// 最近一次 configure 的参数
    pub fn options(&self) -> Option<SourceOptions> {
        self.options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_watching(&self) -> bool {
        *self.watching.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// 在调用线程上同步通知所有订阅者，只有开始监听后才会通知
    pub fn notify(&self) {
        if !self.is_watching() {
            return;
        }
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            handler();
        }
    }
}

impl SourceStore for MemorySource {
    fn configure(&self, options: &SourceOptions) -> Result<(), SourceError> {
        *self.options.write().unwrap_or_else(PoisonError::into_inner) = Some(options.clone());
        Ok(())
    }

    fn read(&self) -> Result<(), SourceError> {
        if let Some(message) = self
            .read_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(SourceError::Other(message));
        }
        let pending = self
            .pending
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        *self.values.write().unwrap_or_else(PoisonError::into_inner) = pending;
        Ok(())
    }

    fn all_keys(&self) -> Vec<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn get_string(&self, token: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .cloned()
    }
}

impl ChangeWatcher for MemorySource {
    fn subscribe(&self, on_change: ChangeHandler) -> Result<(), SourceError> {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(on_change);
        Ok(())
    }

    fn start_watching(&self) -> Result<(), SourceError> {
        *self.watching.write().unwrap_or_else(PoisonError::into_inner) = true;
        Ok(())
    }
}
