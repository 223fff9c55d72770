//! 文件配置源
//!
//! 在多个搜索目录中查找配置文件，支持 JSON/JSON5/YAML/TOML 格式，
//! 解析后展开成 `section.key -> 原始字符串`，并支持监听文件变化

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use smart_default::SmartDefault;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::error::SourceError;
use super::source::{ChangeHandler, ChangeWatcher, SourceOptions, SourceStore};
use crate::fs::{FileEvent, FileWatcher, FileWatcherConfig};

/// 未指定格式且文件名没有扩展名时，依次尝试的扩展名
const CANDIDATE_EXTENSIONS: [&str; 5] = ["json", "json5", "yaml", "yml", "toml"];

/// 文件配置源的配置
#[derive(Debug, Clone, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct FileSourceConfig {
    /// 文件变化事件的防抖延迟，单位：毫秒
    #[default = 100]
    pub debounce_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Json5,
    Yaml,
    Toml,
}

impl FileFormat {
    pub fn from_name(name: &str) -> Result<Self, SourceError> {
        match name.to_ascii_lowercase().as_str() {
            "json" => Ok(FileFormat::Json),
            "json5" => Ok(FileFormat::Json5),
            "yaml" | "yml" => Ok(FileFormat::Yaml),
            "toml" => Ok(FileFormat::Toml),
            _ => Err(SourceError::UnsupportedFormat(name.to_string())),
        }
    }

    pub fn parse(&self, content: &str) -> Result<JsonValue, String> {
        match self {
            FileFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            FileFormat::Json5 => json5::from_str(content).map_err(|e| e.to_string()),
            FileFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
            FileFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        }
    }
}

/// 文件配置源
///
/// # 示例
/// ```no_run
/// use cfgset::cfg::{FileSource, FileSourceConfig, SourceOptions, SourceStore};
///
/// let source = FileSource::new(FileSourceConfig::default());
/// source.configure(&SourceOptions {
///     search_paths: vec!["/etc/app".to_string(), "config".to_string()],
///     format: "yaml".to_string(),
///     file_name: "app".to_string(),
/// }).unwrap();
/// source.read().unwrap();
///
/// // server: { port: 8080 } 展开为 server.port
/// assert_eq!(source.get_string("server.port").as_deref(), Some("8080"));
/// ```
pub struct FileSource {
    config: FileSourceConfig,
    options: RwLock<Option<SourceOptions>>,
    values: RwLock<BTreeMap<String, String>>,
    /// 最近一次成功读取的文件
    resolved_path: RwLock<Option<PathBuf>>,
    handlers: Arc<RwLock<Vec<ChangeHandler>>>,
    /// drop 时停止监听线程
    watcher: Mutex<Option<FileWatcher>>,
}

impl FileSource {
    pub fn new(config: FileSourceConfig) -> Self {
        Self {
            config,
            options: RwLock::new(None),
            values: RwLock::new(BTreeMap::new()),
            resolved_path: RwLock::new(None),
            handlers: Arc::new(RwLock::new(Vec::new())),
            watcher: Mutex::new(None),
        }
    }

    /// 最近一次成功读取的文件路径
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.resolved_path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn options(&self) -> Result<SourceOptions, SourceError> {
        self.options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(SourceError::NotConfigured)
    }

    /// 在单个目录中可能的文件名及其格式
    fn candidates(options: &SourceOptions) -> Result<Vec<(String, FileFormat)>, SourceError> {
        let file_name = options.file_name.as_str();
        let explicit = if options.format.is_empty() {
            None
        } else {
            Some(FileFormat::from_name(&options.format)?)
        };

        if let Some(ext) = Path::new(file_name).extension().and_then(|e| e.to_str()) {
            let format = match explicit {
                Some(format) => format,
                None => FileFormat::from_name(ext)?,
            };
            return Ok(vec![(file_name.to_string(), format)]);
        }

        match explicit {
            Some(format) => Ok(vec![(format!("{}.{}", file_name, options.format), format)]),
            None => CANDIDATE_EXTENSIONS
                .iter()
                .map(|ext| -> Result<(String, FileFormat), SourceError> {
                    Ok((format!("{}.{}", file_name, ext), FileFormat::from_name(ext)?))
                })
                .collect(),
        }
    }

    /// 按搜索路径顺序查找配置文件
    fn find_config_file(options: &SourceOptions) -> Result<(PathBuf, FileFormat), SourceError> {
        let candidates = Self::candidates(options)?;
        for dir in &options.search_paths {
            for (name, format) in &candidates {
                let path = Path::new(dir).join(name);
                if path.is_file() {
                    return Ok((path, *format));
                }
            }
        }
        Err(SourceError::NotFound {
            file: options.file_name.clone(),
            search_paths: options.search_paths.clone(),
        })
    }

    /// 需要监听的文件：找到过就监听找到的文件，否则监听第一个搜索目录下的候选文件
    fn watch_target(&self, options: &SourceOptions) -> Result<PathBuf, SourceError> {
        if let Some(path) = self.resolved_path() {
            return Ok(path);
        }
        let dir = options.search_paths.first().map(String::as_str).unwrap_or(".");
        let (name, _) = Self::candidates(options)?
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::Other("没有候选配置文件".to_string()))?;
        Ok(Path::new(dir).join(name))
    }
}

/// 把嵌套对象展开成 `a.b.c -> 原始字符串`
pub fn flatten(value: &JsonValue) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let JsonValue::Object(map) = value {
        for (k, v) in map {
            flatten_into(k, v, &mut out);
        }
    }
    out
}

/// toml 的日期时间反序列化成 serde_json 时是只有这一个字段的对象
const TOML_DATETIME_FIELD: &str = "$__toml_private_datetime";

fn flatten_into(prefix: &str, value: &JsonValue, out: &mut BTreeMap<String, String>) {
    match value {
        JsonValue::Object(map) if map.len() == 1 => match map.get(TOML_DATETIME_FIELD) {
            Some(JsonValue::String(datetime)) => {
                out.insert(prefix.to_string(), datetime.clone());
            }
            _ => {
                for (k, v) in map {
                    flatten_into(&format!("{}.{}", prefix, k), v, out);
                }
            }
        },
        JsonValue::Object(map) => {
            for (k, v) in map {
                flatten_into(&format!("{}.{}", prefix, k), v, out);
            }
        }
        JsonValue::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        JsonValue::Null => {
            out.insert(prefix.to_string(), String::new());
        }
        // 数字、布尔、数组统一使用 JSON 文本
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

impl SourceStore for FileSource {
    fn configure(&self, options: &SourceOptions) -> Result<(), SourceError> {
        Self::candidates(options)?;
        *self.options.write().unwrap_or_else(PoisonError::into_inner) = Some(options.clone());
        Ok(())
    }

    fn read(&self) -> Result<(), SourceError> {
        let options = self.options()?;
        let (path, format) = Self::find_config_file(&options)?;
        let content = std::fs::read_to_string(&path)?;
        let value = format.parse(&content).map_err(|message| SourceError::Parse {
            path: path.display().to_string(),
            message,
        })?;
        let values = match value {
            JsonValue::Null => BTreeMap::new(),
            JsonValue::Object(_) => flatten(&value),
            _ => {
                return Err(SourceError::Parse {
                    path: path.display().to_string(),
                    message: "配置文件顶层必须是对象".to_string(),
                })
            }
        };

        *self.values.write().unwrap_or_else(PoisonError::into_inner) = values;
        *self.resolved_path.write().unwrap_or_else(PoisonError::into_inner) = Some(path);
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

impl ChangeWatcher for FileSource {
    fn subscribe(&self, on_change: ChangeHandler) -> Result<(), SourceError> {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(on_change);
        Ok(())
    }

    fn start_watching(&self) -> Result<(), SourceError> {
        let mut watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if watcher.is_some() {
            return Ok(());
        }

        let options = self.options()?;
        let target = self.watch_target(&options)?;

        let file_watcher = FileWatcher::new(FileWatcherConfig {
            worker_threads: 1,
            debounce_delay_ms: self.config.debounce_delay_ms,
        })
        .map_err(|e| SourceError::Watch(e.to_string()))?;

        let handlers = self.handlers.clone();
        file_watcher
            .watch(&target, move |event| match event {
                FileEvent::Created(path) | FileEvent::Modified(path) => {
                    log::debug!("配置文件变化: {}", path.display());
                    let handlers = handlers.read().unwrap_or_else(PoisonError::into_inner).clone();
                    for handler in handlers {
                        handler();
                    }
                }
                FileEvent::Deleted(path) => {
                    log::warn!("配置文件被删除，保留当前配置: {}", path.display());
                }
                FileEvent::Error(message) => {
                    log::error!("监听配置文件失败: {}", message);
                }
            })
            .map_err(|e| SourceError::Watch(e.to_string()))?;

        log::info!("开始监听配置文件: {}", target.display());
        *watcher = Some(file_watcher);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn options(dirs: &[&Path], format: &str, file_name: &str) -> SourceOptions {
        SourceOptions {
            search_paths: dirs.iter().map(|d| d.to_string_lossy().to_string()).collect(),
            format: format.to_string(),
            file_name: file_name.to_string(),
        }
    }

    fn load(dirs: &[&Path], format: &str, file_name: &str) -> Result<FileSource, SourceError> {
        let source = FileSource::new(FileSourceConfig::default());
        source.configure(&options(dirs, format, file_name))?;
        source.read()?;
        Ok(source)
    }

    #[test]
    fn test_file_source_load_yaml() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(
            temp_dir.path().join("app.yaml"),
            r#"
count: 5
server:
  host: localhost
  port: 8080
  tls:
    enabled: true
"#,
        )?;

        let source = load(&[temp_dir.path()], "yaml", "app")?;
        assert_eq!(
            source.all_keys(),
            vec!["count", "server.host", "server.port", "server.tls.enabled"]
        );
        assert_eq!(source.get_string("count").as_deref(), Some("5"));
        assert_eq!(source.get_string("server.host").as_deref(), Some("localhost"));
        assert_eq!(source.get_string("server.tls.enabled").as_deref(), Some("true"));
        assert_eq!(source.get_string("missing"), None);
        Ok(())
    }

    #[test]
    fn test_file_source_load_toml_and_json() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(
            temp_dir.path().join("app.toml"),
            "[db]\nhost = \"127.0.0.1\"\nport = 3306\n",
        )?;
        fs::write(
            temp_dir.path().join("app.json"),
            r#"{"db": {"hosts": ["a", "b"], "password": null}}"#,
        )?;

        let source = load(&[temp_dir.path()], "", "app.toml")?;
        assert_eq!(source.get_string("db.port").as_deref(), Some("3306"));

        let source = load(&[temp_dir.path()], "", "app.json")?;
        assert_eq!(source.get_string("db.hosts").as_deref(), Some(r#"["a","b"]"#));
        assert_eq!(source.get_string("db.password").as_deref(), Some(""));
        Ok(())
    }

    #[test]
    fn test_file_source_toml_datetime() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(
            temp_dir.path().join("app.toml"),
            "[release]\nat = 1979-05-27T07:32:00Z\nday = 1979-05-27\n",
        )?;

        let source = load(&[temp_dir.path()], "toml", "app")?;
        assert_eq!(source.all_keys(), vec!["release.at", "release.day"]);
        assert_eq!(source.get_string("release.at").as_deref(), Some("1979-05-27T07:32:00Z"));
        assert_eq!(source.get_string("release.day").as_deref(), Some("1979-05-27"));
        Ok(())
    }

    #[test]
    fn test_file_source_load_json5() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(
            temp_dir.path().join("app.json5"),
            "{\n  // 注释\n  count: 7,\n}\n",
        )?;

        let source = load(&[temp_dir.path()], "json5", "app")?;
        assert_eq!(source.get_string("count").as_deref(), Some("7"));
        Ok(())
    }

    #[test]
    fn test_file_source_infer_extension() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("app.yml"), "count: 3\n")?;

        let source = load(&[temp_dir.path()], "", "app")?;
        assert_eq!(source.get_string("count").as_deref(), Some("3"));
        assert_eq!(
            source.resolved_path().unwrap().file_name().unwrap(),
            "app.yml"
        );
        Ok(())
    }

    #[test]
    fn test_file_source_search_path_order() -> anyhow::Result<()> {
        let first = TempDir::new()?;
        let second = TempDir::new()?;
        let missing = first.path().join("missing");
        fs::write(first.path().join("app.yaml"), "count: 1\n")?;
        fs::write(second.path().join("app.yaml"), "count: 2\n")?;

        let source = load(&[missing.as_path(), first.path(), second.path()], "yaml", "app")?;
        assert_eq!(source.get_string("count").as_deref(), Some("1"));

        let source = load(&[missing.as_path(), second.path(), first.path()], "yaml", "app")?;
        assert_eq!(source.get_string("count").as_deref(), Some("2"));
        Ok(())
    }

    #[test]
    fn test_file_source_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let result = load(&[temp_dir.path()], "yaml", "app");
        assert!(matches!(result, Err(SourceError::NotFound { .. })));
    }

    #[test]
    fn test_file_source_not_configured() {
        let source = FileSource::new(FileSourceConfig::default());
        assert!(matches!(source.read(), Err(SourceError::NotConfigured)));
    }

    #[test]
    fn test_file_source_unsupported_format() {
        let source = FileSource::new(FileSourceConfig::default());
        let result = source.configure(&SourceOptions {
            search_paths: vec![".".to_string()],
            format: "ini".to_string(),
            file_name: "app".to_string(),
        });
        assert!(matches!(result, Err(SourceError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_file_source_parse_error_keeps_values() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("app.json");
        fs::write(&path, r#"{"count": 1}"#)?;

        let source = load(&[temp_dir.path()], "json", "app")?;
        fs::write(&path, r#"{"count": "#)?;
        assert!(matches!(source.read(), Err(SourceError::Parse { .. })));
        assert_eq!(source.get_string("count").as_deref(), Some("1"));

        fs::write(&path, "[1, 2]")?;
        assert!(matches!(source.read(), Err(SourceError::Parse { .. })));
        Ok(())
    }

    #[test]
    fn test_file_source_start_watching_failure() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        let source = FileSource::new(FileSourceConfig::default());
        source
            .configure(&options(&[missing.as_path()], "yaml", "app"))
            .unwrap();

        assert!(matches!(source.start_watching(), Err(SourceError::Watch(_))));
    }

    #[test]
    fn test_file_source_watch() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("app.yaml");
        fs::write(&path, "count: 1\n")?;

        let source = load(&[temp_dir.path()], "yaml", "app")?;
        let notified = Arc::new(AtomicUsize::new(0));
        let notified_clone = notified.clone();
        source.subscribe(Arc::new(move || {
            notified_clone.fetch_add(1, Ordering::SeqCst);
        }))?;
        source.start_watching()?;
        source.start_watching()?;

        thread::sleep(Duration::from_millis(200));
        fs::write(&path, "count: 2\n")?;
        thread::sleep(Duration::from_millis(800));

        assert!(notified.load(Ordering::SeqCst) >= 1, "应该收到配置文件变化通知");
        source.read()?;
        assert_eq!(source.get_string("count").as_deref(), Some("2"));
        Ok(())
    }
}
