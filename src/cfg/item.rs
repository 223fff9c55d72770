//! 配置项
//!
//! 一个配置项由不可变的身份（key、别名、是否允许热更新）和一组行为（默认值、
//! 校验、生成、重载回调、描述）组成。当前值保存在 `ArcSwap` 中，读取无锁，
//! 更新时整体替换，读者只会看到旧值或新值。

use anyhow::{anyhow, Result};
use arc_swap::ArcSwap;
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// 类型擦除后的配置值
pub type AnyValue = Box<dyn Any + Send + Sync>;

/// 配置项行为
///
/// 只有 `default_value` 和 `generate` 必须实现，其余方法都有不做任何事的默认实现。
///
/// # 示例
/// ```
/// use cfgset::cfg::{ConfigItem, ItemSpec};
///
/// struct Port;
///
/// impl ItemSpec for Port {
///     type Value = u16;
///
///     fn default_value(&self) -> u16 {
///         8080
///     }
///
///     fn generate(&self, raw: &str) -> anyhow::Result<u16> {
///         Ok(raw.trim().parse()?)
///     }
///
///     fn validate(&self, raw: &str) -> anyhow::Result<()> {
///         match raw.trim().parse::<u16>()? {
///             0 => anyhow::bail!("端口不能为 0"),
///             _ => Ok(()),
///         }
///     }
/// }
///
/// let item = ConfigItem::new("port", Port);
/// assert_eq!(item.get::<u16>(), Some(8080));
/// ```
pub trait ItemSpec: Send + Sync + 'static {
    type Value: Send + Sync + 'static;

    /// 配置源中从未出现该 key 时使用的值
    fn default_value(&self) -> Self::Value;

    /// 把原始字符串转换为配置值
    fn generate(&self, raw: &str) -> Result<Self::Value>;

    /// 在生成之前校验原始字符串
    fn validate(&self, _raw: &str) -> Result<()> {
        Ok(())
    }

    /// 替换之前调用，返回错误会否决本次更新，保留旧值
    fn on_reload(&self, _old: &Self::Value, _new: &Self::Value) -> Result<()> {
        Ok(())
    }

    /// 配置项说明，仅用于帮助信息
    fn description(&self) -> String {
        String::new()
    }
}

trait ErasedSpec: Send + Sync {
    fn default_any(&self) -> AnyValue;
    fn validate_raw(&self, raw: &str) -> Result<()>;
    fn generate_any(&self, raw: &str) -> Result<AnyValue>;
    fn on_reload_any(&self, old: &AnyValue, new: &AnyValue) -> Result<()>;
    fn describe(&self) -> String;
    fn value_type(&self) -> &'static str;
}

impl<S: ItemSpec> ErasedSpec for S {
    fn default_any(&self) -> AnyValue {
        Box::new(self.default_value())
    }

    fn validate_raw(&self, raw: &str) -> Result<()> {
        self.validate(raw)
    }

    fn generate_any(&self, raw: &str) -> Result<AnyValue> {
        Ok(Box::new(self.generate(raw)?))
    }

    fn on_reload_any(&self, old: &AnyValue, new: &AnyValue) -> Result<()> {
        let old = downcast::<S::Value>(old).ok_or_else(|| anyhow!("旧值类型不匹配"))?;
        let new = downcast::<S::Value>(new).ok_or_else(|| anyhow!("新值类型不匹配"))?;
        self.on_reload(old, new)
    }

    fn describe(&self) -> String {
        self.description()
    }

    fn value_type(&self) -> &'static str {
        std::any::type_name::<S::Value>()
    }
}

fn downcast<T: 'static>(value: &AnyValue) -> Option<&T> {
    let value: &(dyn Any + Send + Sync) = &**value;
    value.downcast_ref::<T>()
}

/// 配置项
pub struct ConfigItem {
    key: String,
    alias: BTreeSet<String>,
    dynamic_reload: bool,
    spec: Box<dyn ErasedSpec>,
    value: ArcSwap<AnyValue>,
}

impl ConfigItem {
    /// 创建配置项，当前值初始化为默认值，默认允许热更新
    pub fn new<S: ItemSpec>(key: impl Into<String>, spec: S) -> Self {
        let value = ArcSwap::from_pointee(spec.default_any());
        Self {
            key: key.into(),
            alias: BTreeSet::new(),
            dynamic_reload: true,
            spec: Box::new(spec),
            value,
        }
    }

    /// 使用闭包构造配置项，原始字符串去掉首尾空白后通过 `FromStr` 解析
    ///
    /// ```
    /// use cfgset::cfg::ConfigItem;
    ///
    /// let item = ConfigItem::builder("count", || 100i64)
    ///     .alias("cnt")
    ///     .description("并发数")
    ///     .build();
    /// assert_eq!(item.get::<i64>(), Some(100));
    /// ```
    pub fn builder<T, D>(key: impl Into<String>, default: D) -> ItemBuilder<T>
    where
        T: FromStr + Send + Sync + 'static,
        T::Err: std::error::Error + Send + Sync + 'static,
        D: Fn() -> T + Send + Sync + 'static,
    {
        Self::builder_with_parser(key, default, |raw: &str| Ok(raw.trim().parse::<T>()?))
    }

    /// 使用闭包构造配置项，原始字符串通过 `parser` 转换
    pub fn builder_with_parser<T, D, P>(key: impl Into<String>, default: D, parser: P) -> ItemBuilder<T>
    where
        T: Send + Sync + 'static,
        D: Fn() -> T + Send + Sync + 'static,
        P: Fn(&str) -> Result<T> + Send + Sync + 'static,
    {
        ItemBuilder {
            key: key.into(),
            alias: BTreeSet::new(),
            dynamic_reload: true,
            spec: FnSpec {
                default: Box::new(default),
                parser: Box::new(parser),
                validator: None,
                hook: None,
                description: String::new(),
            },
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias.insert(alias.into());
        self
    }

    pub fn with_dynamic_reload(mut self, dynamic_reload: bool) -> Self {
        self.dynamic_reload = dynamic_reload;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn aliases(&self) -> &BTreeSet<String> {
        &self.alias
    }

    pub fn has_alias(&self, name: &str) -> bool {
        self.alias.contains(name)
    }

    pub fn dynamic_reload(&self) -> bool {
        self.dynamic_reload
    }

    pub fn description(&self) -> String {
        self.spec.describe()
    }

    /// 配置值的类型名
    pub fn value_type(&self) -> &'static str {
        self.spec.value_type()
    }

    /// 当前值（类型擦除），不会阻塞，也不会被正在进行的重载阻塞
    pub fn load(&self) -> Arc<AnyValue> {
        self.value.load_full()
    }

    /// 当前值的拷贝，类型不匹配时返回 None
    pub fn get<T: Clone + 'static>(&self) -> Option<T> {
        self.with_value(|v: &T| v.clone())
    }

    /// 以引用方式访问当前值，避免拷贝
    pub fn with_value<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.value.load();
        downcast::<T>(&guard).map(f)
    }

    pub(crate) fn reset_to_default(&self) {
        self.value.store(Arc::new(self.spec.default_any()));
    }

    pub(crate) fn validate(&self, raw: &str) -> Result<()> {
        self.spec.validate_raw(raw)
    }

    pub(crate) fn generate(&self, raw: &str) -> Result<AnyValue> {
        self.spec.generate_any(raw)
    }

    /// 以当前值作为旧值调用重载回调
    pub(crate) fn before_swap(&self, new: &AnyValue) -> Result<()> {
        let old = self.value.load();
        self.spec.on_reload_any(&old, new)
    }

    pub(crate) fn swap(&self, new: AnyValue) {
        self.value.store(Arc::new(new));
    }
}

impl fmt::Debug for ConfigItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigItem")
            .field("key", &self.key)
            .field("alias", &self.alias)
            .field("dynamic_reload", &self.dynamic_reload)
            .field("value_type", &self.value_type())
            .finish()
    }
}

type DefaultFn<T> = Box<dyn Fn() -> T + Send + Sync>;
type ParserFn<T> = Box<dyn Fn(&str) -> Result<T> + Send + Sync>;
type ValidatorFn = Box<dyn Fn(&str) -> Result<()> + Send + Sync>;
type HookFn<T> = Box<dyn Fn(&T, &T) -> Result<()> + Send + Sync>;

/// 由闭包组成的 `ItemSpec`
struct FnSpec<T> {
    default: DefaultFn<T>,
    parser: ParserFn<T>,
    validator: Option<ValidatorFn>,
    hook: Option<HookFn<T>>,
    description: String,
}

impl<T: Send + Sync + 'static> ItemSpec for FnSpec<T> {
    type Value = T;

    fn default_value(&self) -> T {
        (self.default)()
    }

    fn generate(&self, raw: &str) -> Result<T> {
        (self.parser)(raw)
    }

    fn validate(&self, raw: &str) -> Result<()> {
        match &self.validator {
            Some(validator) => validator(raw),
            None => Ok(()),
        }
    }

    fn on_reload(&self, old: &T, new: &T) -> Result<()> {
        match &self.hook {
            Some(hook) => hook(old, new),
            None => Ok(()),
        }
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

/// 配置项构造器，见 [`ConfigItem::builder`]
pub struct ItemBuilder<T> {
    key: String,
    alias: BTreeSet<String>,
    dynamic_reload: bool,
    spec: FnSpec<T>,
}

impl<T: Send + Sync + 'static> ItemBuilder<T> {
    /// 替换原始字符串的解析函数
    pub fn parser(mut self, parser: impl Fn(&str) -> Result<T> + Send + Sync + 'static) -> Self {
        self.spec.parser = Box::new(parser);
        self
    }

    pub fn validator(mut self, validator: impl Fn(&str) -> Result<()> + Send + Sync + 'static) -> Self {
        self.spec.validator = Some(Box::new(validator));
        self
    }

    /// 重载回调，参数为 (旧值, 新值)
    pub fn on_reload(mut self, hook: impl Fn(&T, &T) -> Result<()> + Send + Sync + 'static) -> Self {
        self.spec.hook = Some(Box::new(hook));
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.spec.description = description.into();
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias.insert(alias.into());
        self
    }

    pub fn dynamic_reload(mut self, dynamic_reload: bool) -> Self {
        self.dynamic_reload = dynamic_reload;
        self
    }

    pub fn build(self) -> ConfigItem {
        let mut item = ConfigItem::new(self.key, self.spec).with_dynamic_reload(self.dynamic_reload);
        item.alias = self.alias;
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Ratio;

    impl ItemSpec for Ratio {
        type Value = f64;

        fn default_value(&self) -> f64 {
            0.5
        }

        fn generate(&self, raw: &str) -> Result<f64> {
            Ok(raw.parse()?)
        }

        fn validate(&self, raw: &str) -> Result<()> {
            let v: f64 = raw.parse()?;
            if !(0.0..=1.0).contains(&v) {
                bail!("ratio 必须在 [0, 1] 之间: {}", v);
            }
            Ok(())
        }

        fn description(&self) -> String {
            "采样率".to_string()
        }
    }

    #[test]
    fn test_item_seeded_with_default() {
        let item = ConfigItem::new("ratio", Ratio);
        assert_eq!(item.get::<f64>(), Some(0.5));
        assert_eq!(item.description(), "采样率");
        assert_eq!(item.value_type(), "f64");
        assert!(item.dynamic_reload());
    }

    #[test]
    fn test_item_get_wrong_type() {
        let item = ConfigItem::new("ratio", Ratio);
        assert_eq!(item.get::<i64>(), None);
        assert_eq!(item.with_value(|v: &String| v.len()), None);
    }

    #[test]
    fn test_item_validate_generate_swap() {
        let item = ConfigItem::new("ratio", Ratio);
        assert!(item.validate("1.5").is_err());
        assert!(item.validate("0.25").is_ok());

        let new = item.generate("0.25").unwrap();
        item.before_swap(&new).unwrap();
        item.swap(new);
        assert_eq!(item.get::<f64>(), Some(0.25));

        item.reset_to_default();
        assert_eq!(item.get::<f64>(), Some(0.5));
    }

    #[test]
    fn test_builder_from_str() {
        let item = ConfigItem::builder("count", || 100i64)
            .alias("cnt")
            .alias("num")
            .description("并发数")
            .dynamic_reload(false)
            .build();

        assert_eq!(item.key(), "count");
        assert!(item.has_alias("cnt"));
        assert!(item.has_alias("num"));
        assert!(!item.dynamic_reload());
        assert_eq!(item.description(), "并发数");
        assert_eq!(item.get::<i64>(), Some(100));

        assert_eq!(*downcast::<i64>(&item.generate(" 42 ").unwrap()).unwrap(), 42);
        assert!(item.generate("abc").is_err());
    }

    #[test]
    fn test_builder_with_parser_and_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let item = ConfigItem::builder_with_parser(
            "hosts",
            Vec::<String>::new,
            |raw: &str| Ok(raw.split(',').map(|s| s.trim().to_string()).collect()),
        )
        .validator(|raw| if raw.is_empty() { bail!("hosts 不能为空") } else { Ok(()) })
        .on_reload(move |old: &Vec<String>, new: &Vec<String>| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            if new.len() < old.len() {
                bail!("不允许减少 hosts");
            }
            Ok(())
        })
        .build();

        assert!(item.validate("").is_err());

        let new = item.generate("a, b").unwrap();
        item.before_swap(&new).unwrap();
        item.swap(new);
        assert_eq!(item.get::<Vec<String>>(), Some(vec!["a".to_string(), "b".to_string()]));

        let shrink = item.generate("a").unwrap();
        assert!(item.before_swap(&shrink).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
