//! 配置注册表
//!
//! 应用启动时注册需要的配置项，调用一次 `load_and_watch` 完成首次加载并开始监听，
//! 之后配置文件的变化会自动应用到配置项上。
//!
//! 两把锁：
//! - 加载锁：串行化 `load_and_watch`，保证配置源只被配置一次
//! - 重载锁：首次加载和每次文件变化触发的重载都在锁内完成，同一时间只有一次重载
//!
//! 读取配置值不需要任何一把锁。

use garde::Validate;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use super::error::{RegistryError, SourceError};
use super::file_source::{FileSource, FileSourceConfig};
use super::item::{AnyValue, ConfigItem};
use super::reload::{apply, seed_defaults, ReloadPhase, ReloadReport};
use super::resolver::find_by_alias;
use super::source::{ChangeWatcher, SourceOptions, SourceStore};

/// 首次加载时找不到（或无法读取）配置文件的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfigFileNotFoundHandling {
    /// 使用默认值继续
    #[default]
    Ignore,
    /// 记录错误，使用默认值继续
    Error,
    /// 退出进程
    Exit,
}

impl fmt::Display for ConfigFileNotFoundHandling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigFileNotFoundHandling::Ignore => "IGNORE",
            ConfigFileNotFoundHandling::Error => "ERROR",
            ConfigFileNotFoundHandling::Exit => "EXIT",
        };
        f.write_str(name)
    }
}

/// 注册表配置
#[derive(Debug, Clone, Serialize, Deserialize, SmartDefault, Validate)]
#[serde(default)]
pub struct RegistryConfig {
    /// 注册表名称，同一进程中有多个注册表时用于区分
    #[default = "default"]
    #[garde(length(min = 1))]
    pub name: String,

    /// 配置文件搜索目录，按顺序查找
    #[default(_code = "vec![\".\".to_string()]")]
    #[garde(length(min = 1))]
    pub search_paths: Vec<String>,

    /// 文件格式，为空时按扩展名推断
    #[garde(pattern("^(|json|json5|yaml|yml|toml)$"))]
    pub format: String,

    /// 配置文件名
    #[garde(length(min = 1))]
    pub file_name: String,

    #[garde(skip)]
    pub not_found_handling: ConfigFileNotFoundHandling,

    /// 文件变化事件的防抖延迟，单位：毫秒
    #[default = 100]
    #[garde(range(min = 1, max = 60000))]
    pub debounce_delay_ms: u64,
}

impl RegistryConfig {
    pub fn new(
        name: impl Into<String>,
        search_paths: Vec<String>,
        format: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            search_paths,
            format: format.into(),
            file_name: file_name.into(),
            ..Default::default()
        }
    }

    pub fn with_not_found_handling(mut self, handling: ConfigFileNotFoundHandling) -> Self {
        self.not_found_handling = handling;
        self
    }

    fn source_options(&self) -> SourceOptions {
        SourceOptions {
            search_paths: self.search_paths.clone(),
            format: self.format.clone(),
            file_name: self.file_name.clone(),
        }
    }
}

/// 配置项说明，用于生成帮助信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemDescription {
    pub key: String,
    pub aliases: BTreeSet<String>,
    pub dynamic_reload: bool,
    pub value_type: String,
    pub description: String,
}

/// 配置注册表
///
/// # 示例
/// ```no_run
/// use cfgset::cfg::{ConfigItem, ConfigRegistry};
///
/// let registry = ConfigRegistry::new("app", vec!["config".to_string()], "yaml", "app").unwrap();
/// registry.register(ConfigItem::builder("count", || 100i64).build()).unwrap();
/// registry.load_and_watch().unwrap();
///
/// let count: i64 = registry.get_as("count").unwrap();
/// ```
pub struct ConfigRegistry {
    config: RegistryConfig,
    items: RwLock<HashMap<String, Arc<ConfigItem>>>,
    source: Arc<dyn SourceStore>,
    watcher: Arc<dyn ChangeWatcher>,
    /// 加载锁，值为是否已经完成 load_and_watch
    load_lock: Mutex<bool>,
    reload_lock: Mutex<()>,
    /// 开始加载后不再接受注册
    started: AtomicBool,
}

impl ConfigRegistry {
    /// 使用文件配置源创建注册表，找不到配置文件时忽略
    pub fn new(
        name: impl Into<String>,
        search_paths: Vec<String>,
        format: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Result<Arc<Self>, RegistryError> {
        Self::from_config(RegistryConfig::new(name, search_paths, format, file_name))
    }

    /// 使用文件配置源创建注册表
    pub fn from_config(config: RegistryConfig) -> Result<Arc<Self>, RegistryError> {
        let source = Arc::new(FileSource::new(FileSourceConfig {
            debounce_delay_ms: config.debounce_delay_ms,
        }));
        Self::with_source(config, source.clone(), source)
    }

    /// 使用自定义的配置源和变化通知创建注册表
    pub fn with_source(
        config: RegistryConfig,
        source: Arc<dyn SourceStore>,
        watcher: Arc<dyn ChangeWatcher>,
    ) -> Result<Arc<Self>, RegistryError> {
        if let Err(errors) = config.validate() {
            return Err(RegistryError::InvalidConfig(errors.to_string()));
        }

        Ok(Arc::new(Self {
            config,
            items: RwLock::new(HashMap::new()),
            source,
            watcher,
            load_lock: Mutex::new(false),
            reload_lock: Mutex::new(()),
            started: AtomicBool::new(false),
        }))
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// 注册配置项，key 重复时后注册的覆盖先注册的
    ///
    /// 别名不能与其他配置项的 key 或别名相同，key 也不能与其他配置项的别名相同，
    /// 否则返回 `AliasConflict`，已注册的配置项不受影响。
    pub fn register(&self, item: ConfigItem) -> Result<(), RegistryError> {
        if self.started.load(Ordering::Acquire) {
            return Err(RegistryError::AlreadyStarted(self.config.name.clone()));
        }

        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        // load_and_watch 在持有写锁时设置 started，这里需要再检查一次
        if self.started.load(Ordering::Acquire) {
            return Err(RegistryError::AlreadyStarted(self.config.name.clone()));
        }

        check_alias_conflict(&items, &item)?;

        let key = item.key().to_string();
        if let Some(old) = items.insert(key.clone(), Arc::new(item)) {
            log::warn!(
                "配置项重复注册，覆盖旧配置项 [{}]: key={}, 旧值类型={}",
                self.config.name,
                key,
                old.value_type()
            );
        }
        Ok(())
    }

    /// 首次加载配置文件并开始监听，只能调用一次
    ///
    /// 返回首次加载的结果。只有找不到配置文件的处理方式为 `ERROR` 时，
    /// 读取失败才会记录在 `source_error` 中；`EXIT` 会直接退出进程。
    /// 返回 `Ok` 时监听已经生效。
    pub fn load_and_watch(self: &Arc<Self>) -> Result<ReloadReport, RegistryError> {
        let mut loaded = self.load_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if *loaded || self.started.load(Ordering::Acquire) {
            return Err(RegistryError::AlreadyStarted(self.config.name.clone()));
        }

        self.source.configure(&self.config.source_options())?;
        {
            let _items = self.items.write().unwrap_or_else(PoisonError::into_inner);
            self.started.store(true, Ordering::Release);
        }

        let (report, loaded_snapshot) = self.initial_load();

        let weak: Weak<Self> = Arc::downgrade(self);
        self.watcher.subscribe(Arc::new(move || {
            if let Some(registry) = weak.upgrade() {
                registry.reload();
            }
        }))?;
        self.watcher.start_watching()?;
        self.catch_up(loaded_snapshot.as_ref());

        *loaded = true;
        Ok(report)
    }

    /// 首次加载，返回加载结果和加载时配置源的内容
    fn initial_load(&self) -> (ReloadReport, Option<BTreeMap<String, String>>) {
        let _reload = self.reload_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut source_error = None;
        let mut loaded_snapshot = None;
        match self.source.read() {
            Ok(()) => loaded_snapshot = Some(snapshot(self.source.as_ref())),
            Err(err) => source_error = self.handle_read_error(err),
        }

        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        seed_defaults(&items);
        let mut report = apply(&items, self.source.as_ref(), ReloadPhase::Initial);
        report.source_error = source_error;
        (report, loaded_snapshot)
    }

    /// 监听生效后再读一次配置源，补上首次读取到开始监听之间的修改
    ///
    /// 内容与首次加载时相同则什么都不做，读取失败只记录日志。
    fn catch_up(&self, loaded_snapshot: Option<&BTreeMap<String, String>>) {
        let _reload = self.reload_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Err(err) = self.source.read() {
            log::debug!("开始监听后读取配置失败 [{}]: {}", self.config.name, err);
            return;
        }
        let current = snapshot(self.source.as_ref());
        if loaded_snapshot == Some(&current) {
            return;
        }

        log::info!("配置在开始监听前已变化，重新应用 [{}]", self.config.name);
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        apply(&items, self.source.as_ref(), ReloadPhase::FileChange);
    }

    fn handle_read_error(&self, err: SourceError) -> Option<SourceError> {
        match self.config.not_found_handling {
            ConfigFileNotFoundHandling::Ignore => {
                log::info!("{}", self);
                log::info!("读取配置文件失败，使用默认值: {}", err);
                None
            }
            ConfigFileNotFoundHandling::Error => {
                log::error!("{}", self);
                log::error!("读取配置文件失败，使用默认值: {}", err);
                Some(err)
            }
            ConfigFileNotFoundHandling::Exit => {
                log::error!("{}", self);
                log::error!("读取配置文件失败，退出进程: {}", err);
                std::process::exit(2);
            }
        }
    }

    /// 重新读取配置源并应用到允许热更新的配置项上，配置文件变化时自动调用
    pub fn reload(&self) -> ReloadReport {
        let _reload = self.reload_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Err(err) = self.source.read() {
            log::error!("重新读取配置失败，保留当前配置 [{}]: {}", self.config.name, err);
            return ReloadReport::source_failed(err);
        }

        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        apply(&items, self.source.as_ref(), ReloadPhase::FileChange)
    }

    /// 按 key 或别名查找配置项
    pub fn item(&self, key: &str) -> Option<Arc<ConfigItem>> {
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        items.get(key).cloned().or_else(|| find_by_alias(key, &items))
    }

    /// 当前值（类型擦除），key 未注册返回 None
    pub fn get(&self, key: &str) -> Option<Arc<AnyValue>> {
        self.item(key).map(|item| item.load())
    }

    /// 当前值的拷贝，key 未注册或类型不匹配返回 None
    pub fn get_as<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        self.item(key).and_then(|item| item.get::<T>())
    }

    /// 所有已注册的 key，按字典序排列
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// 所有配置项的说明，按 key 排列
    pub fn describe(&self) -> Vec<ItemDescription> {
        let mut list: Vec<ItemDescription> = self
            .items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|item| ItemDescription {
                key: item.key().to_string(),
                aliases: item.aliases().clone(),
                dynamic_reload: item.dynamic_reload(),
                value_type: item.value_type().to_string(),
                description: item.description(),
            })
            .collect();
        list.sort_by(|a, b| a.key.cmp(&b.key));
        list
    }
}

/// 配置源当前的全部内容
fn snapshot(source: &dyn SourceStore) -> BTreeMap<String, String> {
    source
        .all_keys()
        .into_iter()
        .filter_map(|token| source.get_string(&token).map(|raw| (token, raw)))
        .collect()
}

/// 检查新配置项的 key 和别名是否与其他配置项冲突，同 key 的旧配置项会被覆盖，不参与检查
fn check_alias_conflict(
    items: &HashMap<String, Arc<ConfigItem>>,
    item: &ConfigItem,
) -> Result<(), RegistryError> {
    let conflict = |name: &str, existing: &str| RegistryError::AliasConflict {
        key: item.key().to_string(),
        name: name.to_string(),
        existing: existing.to_string(),
    };

    for other in items.values().filter(|other| other.key() != item.key()) {
        if other.has_alias(item.key()) {
            return Err(conflict(item.key(), other.key()));
        }
        for alias in item.aliases() {
            if alias == other.key() || other.has_alias(alias) {
                return Err(conflict(alias, other.key()));
            }
        }
    }
    Ok(())
}

impl fmt::Display for ConfigRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConfigRegistry[{}]: search_paths={:?}, format={}, file_name={}, not_found_handling={}",
            self.config.name,
            self.config.search_paths,
            self.config.format,
            self.config.file_name,
            self.config.not_found_handling
        )
    }
}
