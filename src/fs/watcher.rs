//! 文件监听器
//!
//! 监听单个文件的创建、修改、删除事件，经过防抖后回调 handler

use anyhow::{anyhow, Result};
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use notify::{RecursiveMode, Watcher};
use rayon::prelude::*;
use serde::Deserialize;
use smart_default::SmartDefault;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 文件事件
#[derive(Debug, Clone, PartialEq)]
pub enum FileEvent {
    /// 文件被创建
    Created(PathBuf),
    /// 文件被修改
    Modified(PathBuf),
    /// 文件被删除
    Deleted(PathBuf),
    /// 发生错误
    Error(String),
}

/// 文件监听器配置
#[derive(Debug, Clone, Deserialize, SmartDefault)]
#[serde(default)]
pub struct FileWatcherConfig {
    /// 执行 handler 的工作线程数
    #[default = 1]
    pub worker_threads: usize,
    /// 防抖延迟，同一文件在这段时间内的多次事件只回调最后一次，单位：毫秒
    #[default = 100]
    pub debounce_delay_ms: u64,
}

impl FileWatcherConfig {
    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_delay_ms)
    }
}

type Handler = Arc<dyn Fn(FileEvent) + Send + Sync>;

struct WatchRequest {
    path: PathBuf,
    handler: Handler,
    /// 监听添加完成（或失败）后回复
    reply: Sender<Result<()>>,
}

/// 文件监听器
///
/// - 一个 notify watcher 和一个事件循环线程，监听请求通过 channel 发送到事件循环，
///   `watch` 等到事件循环添加完监听后才返回
/// - 始终监听文件所在目录，编辑器"写临时文件再 rename"的保存方式也能被感知，
///   文件尚不存在时同样可以监听
/// - 同一文件的事件在 `debounce_delay` 内合并，只回调最后一次
/// - handler 在 rayon 线程池中执行
///
/// `FileWatcher` drop 时请求通道关闭，事件循环线程随之退出。
///
/// # 示例
///
/// ```no_run
/// use cfgset::fs::{FileEvent, FileWatcher, FileWatcherConfig};
///
/// let watcher = FileWatcher::new(FileWatcherConfig::default()).unwrap();
/// watcher.watch("app.yaml", |event| {
///     if let FileEvent::Modified(path) = event {
///         println!("文件修改: {:?}", path);
///     }
/// }).unwrap();
/// ```
pub struct FileWatcher {
    request_tx: Sender<WatchRequest>,
}

impl FileWatcher {
    pub fn new(config: FileWatcherConfig) -> Result<Self> {
        let (request_tx, request_rx) = unbounded::<WatchRequest>();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads.max(1))
            .build()
            .map_err(|e| anyhow!("创建线程池失败: {}", e))?;

        let (notify_tx, notify_rx) = unbounded();
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = notify_tx.send(res);
        })
        .map_err(|e| anyhow!("创建 notify watcher 失败: {}", e))?;

        let debounce_delay = config.debounce_delay();
        thread::Builder::new()
            .name("cfgset-file-watcher".to_string())
            .spawn(move || run_event_loop(watcher, request_rx, notify_rx, pool, debounce_delay))
            .map_err(|e| anyhow!("启动监听线程失败: {}", e))?;

        Ok(Self { request_tx })
    }

    /// 监听指定文件，文件可以尚不存在，但其所在目录必须存在
    ///
    /// 返回 `Ok` 时监听已经生效，之后对文件的修改都会回调 handler。
    pub fn watch<F>(&self, filepath: impl AsRef<Path>, handler: F) -> Result<()>
    where
        F: Fn(FileEvent) + Send + Sync + 'static,
    {
        let path = normalize(filepath.as_ref())?;
        self.add(path, Arc::new(handler))
    }

    /// 把已规范化的路径交给事件循环，等待监听添加的结果
    fn add(&self, path: PathBuf, handler: Handler) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.request_tx
            .send(WatchRequest {
                path,
                handler,
                reply: reply_tx,
            })
            .map_err(|e| anyhow!("发送监听请求失败: {}", e))?;
        reply_rx
            .recv()
            .map_err(|_| anyhow!("监听线程已退出"))?
    }
}

/// 规范化监听路径：目录取 canonicalize 结果，再拼接文件名
fn normalize(path: &Path) -> Result<PathBuf> {
    if path.is_dir() {
        return Err(anyhow!("路径不是一个文件: {}", path.display()));
    }
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("无法获取文件名: {}", path.display()))?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !parent.is_dir() {
        return Err(anyhow!("父目录不存在: {}", parent.display()));
    }
    Ok(dunce::canonicalize(&parent)?.join(file_name))
}

/// 事件路径与监听路径使用同样的规则规范化，删除事件中文件已不存在，只能处理父目录
fn normalize_event_path(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => dunce::canonicalize(parent)
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

fn to_file_event(kind: &notify::EventKind, path: &Path) -> Option<FileEvent> {
    if kind.is_create() {
        Some(FileEvent::Created(path.to_path_buf()))
    } else if kind.is_modify() {
        Some(FileEvent::Modified(path.to_path_buf()))
    } else if kind.is_remove() {
        Some(FileEvent::Deleted(path.to_path_buf()))
    } else {
        None
    }
}

/// notify 报告的错误带路径时只通知对应文件的 handler，否则通知所有 handler
fn dispatch_error(pool: &rayon::ThreadPool, handlers: &HashMap<PathBuf, Vec<Handler>>, err: &notify::Error) {
    let paths: HashSet<PathBuf> = err.paths.iter().map(|p| normalize_event_path(p)).collect();
    let message = err.to_string();
    pool.install(|| {
        handlers
            .par_iter()
            .filter(|(path, _)| paths.is_empty() || paths.contains(*path))
            .for_each(|(_, list)| {
                for handler in list {
                    handler(FileEvent::Error(message.clone()));
                }
            });
    });
}

fn run_event_loop(
    mut watcher: notify::RecommendedWatcher,
    request_rx: Receiver<WatchRequest>,
    notify_rx: Receiver<notify::Result<notify::Event>>,
    pool: rayon::ThreadPool,
    debounce_delay: Duration,
) {
    let mut handlers: HashMap<PathBuf, Vec<Handler>> = HashMap::new();
    let mut watched_dirs: HashSet<PathBuf> = HashSet::new();
    // path -> (最后一次事件, 时间)
    let mut pending: HashMap<PathBuf, (FileEvent, Instant)> = HashMap::new();

    loop {
        crossbeam::select! {
            recv(request_rx) -> req => {
                let Ok(req) = req else { break };
                if let Some(dir) = req.path.parent().map(Path::to_path_buf) {
                    if !watched_dirs.contains(&dir) {
                        if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
                            log::error!("添加监听失败: {}, 路径: {:?}", e, dir);
                            let _ = req.reply.send(Err(anyhow!("添加监听失败 {}: {}", dir.display(), e)));
                            continue;
                        }
                        watched_dirs.insert(dir);
                    }
                }
                handlers.entry(req.path).or_default().push(req.handler);
                let _ = req.reply.send(Ok(()));
            }
            recv(notify_rx) -> event => {
                let Ok(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        log::error!("文件监听出错: {}", e);
                        dispatch_error(&pool, &handlers, &e);
                        continue;
                    }
                };
                for path in &event.paths {
                    let path = normalize_event_path(path);
                    if !handlers.contains_key(&path) {
                        continue;
                    }
                    if let Some(file_event) = to_file_event(&event.kind, &path) {
                        pending.insert(path, (file_event, Instant::now()));
                    }
                }
            }
            default(debounce_delay / 2) => {}
        }

        if pending.is_empty() {
            continue;
        }
        let now = Instant::now();
        let mut ready = Vec::new();
        pending.retain(|path, (event, at)| {
            if now.duration_since(*at) >= debounce_delay {
                ready.push((path.clone(), event.clone()));
                false
            } else {
                true
            }
        });
        if ready.is_empty() {
            continue;
        }
        let handlers = &handlers;
        pool.install(|| {
            ready.into_par_iter().for_each(|(path, event)| {
                if let Some(list) = handlers.get(&path) {
                    for handler in list {
                        handler(event.clone());
                    }
                }
            });
        });
    }
}
