//! 服务端条目存储
//!
//! 进程内唯一的权威集合，按创建时间倒序排列（最新的在最前）。
//! 服务重启后清空，没有过期策略。

use crate::item::{Item, ItemId, UploadInput};
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct ItemStore {
    items: Vec<Item>,
    /// 本存储发出过的全部 ID，删除后也不会再次使用
    issued: HashSet<ItemId>,
}

impl ItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 全部条目，最新的在最前
    pub fn list_all(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 批量创建条目
    ///
    /// 新条目按输入顺序整体插入到最前面，原有条目的相对顺序不变。
    /// 返回更新后的完整集合。
    pub fn create_many<I>(&mut self, inputs: I) -> &[Item]
    where
        I: IntoIterator<Item = UploadInput>,
    {
        let mut fresh = Vec::new();
        for input in inputs {
            let id = ItemId::generate_unique(|id| self.issued.contains(id));
            self.issued.insert(id.clone());
            fresh.push(Item::from_upload(id, input));
        }
        self.items.splice(0..0, fresh);
        &self.items
    }

    /// 设置打开状态
    ///
    /// 找不到 ID 时不做任何修改，返回 `false`。
    pub fn set_opened(&mut self, id: &ItemId, opened: bool) -> bool {
        match self.items.iter_mut().find(|item| item.id == *id) {
            Some(item) => {
                item.opened = opened;
                true
            }
            None => false,
        }
    }

    /// 删除所有匹配的条目，返回删除数量
    pub fn remove(&mut self, id: &ItemId) -> usize {
        let before = self.items.len();
        self.items.retain(|item| item.id != *id);
        before - self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str, size: u64) -> UploadInput {
        UploadInput {
            name: Some(name.to_string()),
            size: Some(size),
            mime_type: Some("text/plain".to_string()),
            content: Some("data:text/plain;base64,".to_string()),
        }
    }

    fn titles(store: &ItemStore) -> Vec<String> {
        store
            .list_all()
            .iter()
            .map(|i| i.title.clone().unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_batch_on_empty_store() {
        let mut store = ItemStore::new();
        let items = store.create_many(vec![input("a.txt", 10), input("b.txt", 20)]);

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title.as_deref(), Some("a.txt"));
        assert_eq!(items[0].size, Some(10));
        assert_eq!(items[1].title.as_deref(), Some("b.txt"));
        assert!(items.iter().all(|i| !i.opened));
    }

    #[test]
    fn test_new_items_precede_existing() {
        let mut store = ItemStore::new();
        store.create_many([input("old-1", 1)]);
        store.create_many([input("old-2", 2)]);
        store.create_many(vec![input("new-1", 3), input("new-2", 4), input("new-3", 5)]);

        assert_eq!(
            titles(&store),
            vec!["new-1", "new-2", "new-3", "old-2", "old-1"]
        );
    }

    #[test]
    fn test_single_creations_do_not_collide() {
        let mut store = ItemStore::new();
        store.create_many([input("a", 1)]);
        store.create_many([input("b", 1)]);

        let items = store.list_all();
        assert_ne!(items[0].id, items[1].id);
    }

    #[test]
    fn test_large_batch_ids_are_unique() {
        let mut store = ItemStore::new();
        store.create_many((0..5000).map(|i| input(&i.to_string(), 1)));
        store.create_many([input("late", 1)]);

        let ids: HashSet<_> = store.list_all().iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids.len(), 5001);
    }

    #[test]
    fn test_numeric_echo_matches_existing_item() {
        let mut store = ItemStore::new();
        store.create_many(vec![input("a", 1), input("b", 2)]);
        let raw = store.list_all()[1].id.to_string();

        let echoed: ItemId = serde_json::from_str(&raw).unwrap();
        assert!(store.set_opened(&echoed, true));
        assert!(store.list_all()[1].opened);
        assert_eq!(store.remove(&echoed), 1);
        assert_eq!(titles(&store), vec!["a"]);
    }

    #[test]
    fn test_set_opened_is_idempotent() {
        let mut store = ItemStore::new();
        store.create_many(vec![input("a", 1), input("b", 2)]);
        let id = store.list_all()[1].id.clone();

        assert!(store.set_opened(&id, true));
        let once = store.list_all().to_vec();
        assert!(store.set_opened(&id, true));
        assert_eq!(store.list_all(), once.as_slice());
        assert!(store.list_all()[1].opened);
        assert!(!store.list_all()[0].opened);

        assert!(store.set_opened(&id, false));
        assert!(!store.list_all()[1].opened);
    }

    #[test]
    fn test_unknown_id_is_noop() {
        let mut store = ItemStore::new();
        store.create_many(vec![input("a", 1), input("b", 2)]);
        let before = store.list_all().to_vec();

        let unknown = ItemId::new("0.0");
        assert!(!store.set_opened(&unknown, true));
        assert_eq!(store.remove(&unknown), 0);
        assert_eq!(store.list_all(), before.as_slice());
    }

    #[test]
    fn test_remove_preserves_order() {
        let mut store = ItemStore::new();
        store.create_many(vec![input("a", 1), input("b", 2), input("c", 3)]);
        let id = store.list_all()[1].id.clone();

        assert_eq!(store.remove(&id), 1);
        assert_eq!(titles(&store), vec!["a", "c"]);
    }

    #[test]
    fn test_id_matched_by_canonical_form() {
        let mut store = ItemStore::new();
        store.create_many([input("a", 1)]);
        let raw = store.list_all()[0].id.to_string();

        let echoed: ItemId = serde_json::from_value(serde_json::json!(format!(" {raw}\n"))).unwrap();
        assert!(store.set_opened(&echoed, true));
        assert_eq!(store.remove(&ItemId::new(raw)), 1);
    }
}
