//! 配置源 key 到配置项的解析
//!
//! 配置文件中的 key 形如 `section.key` 或 `key`，第一个 `.` 之前的部分视为 section 丢弃。

use std::collections::HashMap;
use std::sync::Arc;

use super::item::ConfigItem;

pub const SECTION_SEPARATOR: char = '.';

/// 去掉 section 前缀，只在第一个分隔符处切分
pub fn candidate_key(token: &str) -> &str {
    match token.split_once(SECTION_SEPARATOR) {
        Some((_, key)) => key,
        None => token,
    }
}

/// 解析配置源中的 token，先按 key 查找，再按别名查找，找不到返回 None
///
/// 配置文件中可能存在其他模块的 key，找不到不是错误。
pub fn resolve(token: &str, items: &HashMap<String, Arc<ConfigItem>>) -> Option<Arc<ConfigItem>> {
    let candidate = candidate_key(token);
    if let Some(item) = items.get(candidate) {
        return Some(item.clone());
    }
    find_by_alias(candidate, items)
}

/// 按别名查找配置项，多个配置项使用同一别名时取 key 最小的
///
/// 注册表不允许别名冲突，这里只保证直接使用 map 时结果也是确定的。
pub fn find_by_alias(
    alias: &str,
    items: &HashMap<String, Arc<ConfigItem>>,
) -> Option<Arc<ConfigItem>> {
    items
        .values()
        .filter(|item| item.has_alias(alias))
        .min_by(|a, b| a.key().cmp(b.key()))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(list: Vec<ConfigItem>) -> HashMap<String, Arc<ConfigItem>> {
        list.into_iter()
            .map(|item| (item.key().to_string(), Arc::new(item)))
            .collect()
    }

    #[test]
    fn test_candidate_key() {
        assert_eq!(candidate_key("foo"), "foo");
        assert_eq!(candidate_key("section.foo"), "foo");
        assert_eq!(candidate_key("other.section.foo"), "section.foo");
        assert_eq!(candidate_key(".foo"), "foo");
        assert_eq!(candidate_key("section."), "");
    }

    #[test]
    fn test_resolve_section_and_plain_key() {
        let items = items(vec![ConfigItem::builder("foo", || 1i32).build()]);

        assert_eq!(resolve("foo", &items).unwrap().key(), "foo");
        assert_eq!(resolve("section.foo", &items).unwrap().key(), "foo");
        assert!(resolve("other.section.foo", &items).is_none());
        assert!(resolve("bar", &items).is_none());
    }

    #[test]
    fn test_resolve_first_separator_only() {
        let items = items(vec![
            ConfigItem::builder("foo", || 1i32).build(),
            ConfigItem::builder("section.foo", || 2i32).build(),
        ]);

        assert_eq!(resolve("section.foo", &items).unwrap().key(), "foo");
        assert_eq!(resolve("other.section.foo", &items).unwrap().key(), "section.foo");
    }

    #[test]
    fn test_resolve_alias() {
        let items = items(vec![
            ConfigItem::builder("foo", || 1i32).alias("bar").build(),
            ConfigItem::builder("baz", || 2i32).build(),
        ]);

        assert_eq!(resolve("bar", &items).unwrap().key(), "foo");
        assert_eq!(resolve("section.bar", &items).unwrap().key(), "foo");
        assert!(resolve("qux", &items).is_none());
    }

    #[test]
    fn test_resolve_shared_alias_is_deterministic() {
        for _ in 0..50 {
            let items = items(vec![
                ConfigItem::builder("d", || 0i32).alias("shared").build(),
                ConfigItem::builder("b", || 0i32).alias("shared").build(),
                ConfigItem::builder("c", || 0i32).alias("shared").build(),
                ConfigItem::builder("a", || 0i32).alias("shared").build(),
            ]);
            assert_eq!(resolve("shared", &items).unwrap().key(), "a");
            assert_eq!(resolve("section.shared", &items).unwrap().key(), "a");
        }
    }

    #[test]
    fn test_resolve_key_wins_over_alias() {
        let items = items(vec![
            ConfigItem::builder("foo", || 1i32).alias("baz").build(),
            ConfigItem::builder("baz", || 2i32).build(),
        ]);

        assert_eq!(resolve("baz", &items).unwrap().key(), "baz");
    }
}
