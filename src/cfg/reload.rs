//! 配置重载流程
//!
//! 对配置源中的每个 key 依次执行：解析配置项 -> 检查是否允许热更新 -> 校验 ->
//! 生成 -> 重载回调 -> 原子替换。任何一步失败只跳过当前 key，错误汇总到
//! [`ReloadReport`]，不影响其他 key。

use std::collections::HashMap;
use std::sync::Arc;

use super::error::{KeyError, SourceError};
use super::item::ConfigItem;
use super::resolver::resolve;
use super::source::SourceStore;

/// 重载触发方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadPhase {
    /// 启动时的首次加载，调用方先用 `seed_defaults` 重置所有配置项
    Initial,
    /// 配置文件变化触发，跳过不允许热更新的配置项
    FileChange,
}

/// 一次重载的结果
#[derive(Debug, Default)]
pub struct ReloadReport {
    /// 读取配置源失败，此时没有任何配置项被修改
    pub source_error: Option<SourceError>,
    /// 被更新的配置项 key
    pub updated: Vec<String>,
    /// 因不允许热更新而跳过的配置项 key
    pub frozen: Vec<String>,
    /// 单个配置项的失败
    pub key_errors: Vec<KeyError>,
}

impl ReloadReport {
    pub fn is_ok(&self) -> bool {
        self.source_error.is_none() && self.key_errors.is_empty()
    }

    pub(crate) fn source_failed(err: SourceError) -> Self {
        Self {
            source_error: Some(err),
            ..Default::default()
        }
    }
}

/// 把所有配置项重置为默认值
pub(crate) fn seed_defaults(items: &HashMap<String, Arc<ConfigItem>>) {
    for item in items.values() {
        item.reset_to_default();
    }
}

/// 把配置源当前的内容应用到配置项上，调用方需持有重载锁
pub(crate) fn apply(
    items: &HashMap<String, Arc<ConfigItem>>,
    source: &dyn SourceStore,
    phase: ReloadPhase,
) -> ReloadReport {
    let mut report = ReloadReport::default();

    for token in source.all_keys() {
        let Some(item) = resolve(&token, items) else {
            continue;
        };
        let Some(raw) = source.get_string(&token) else {
            continue;
        };

        if phase == ReloadPhase::FileChange && !item.dynamic_reload() {
            report.frozen.push(item.key().to_string());
            continue;
        }

        match update(&item, &raw) {
            Ok(()) => report.updated.push(item.key().to_string()),
            Err(err) => {
                log::warn!("{}", err);
                report.key_errors.push(err);
            }
        }
    }

    log::debug!(
        "配置重载完成 [{:?}]: 更新 {} 项, 跳过 {} 项, 失败 {} 项",
        phase,
        report.updated.len(),
        report.frozen.len(),
        report.key_errors.len()
    );
    report
}

fn update(item: &ConfigItem, raw: &str) -> Result<(), KeyError> {
    item.validate(raw).map_err(|e| KeyError::Validation {
        key: item.key().to_string(),
        raw: raw.to_string(),
        message: e.to_string(),
    })?;

    let new = item.generate(raw).map_err(|e| KeyError::Generation {
        key: item.key().to_string(),
        raw: raw.to_string(),
        message: e.to_string(),
    })?;

    item.before_swap(&new).map_err(|e| KeyError::Hook {
        key: item.key().to_string(),
        raw: raw.to_string(),
        message: e.to_string(),
    })?;

    item.swap(new);
    Ok(())
}
