//! String-keyed store of type-erased values.
//!
//! `Values` holds one value per key in `Arc<dyn Any + Send + Sync>` so it can
//! be cloned cheaply and shared across tasks. It backs both
//! [`Message::metadata`](crate::message::Message::metadata) and the
//! per-request store on [`Context`](crate::router::Context).

use std::{any::Any, collections::HashMap, fmt, sync::Arc};

/// Stores arbitrary values keyed by name.
///
/// # Examples
///
/// ```
/// use wireroute::values::Values;
///
/// let mut values = Values::default();
/// values.insert("user", String::from("alice"));
/// let user = values.get::<String>("user").expect("value should exist");
/// assert_eq!(user.as_str(), "alice");
/// assert!(values.get::<u32>("user").is_none());
/// ```
#[derive(Clone, Default)]
pub struct Values {
    entries: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Values {
    /// Insert `value` under `key`, replacing any previous value.
    pub fn insert<T>(&mut self, key: impl Into<String>, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.entries
            .insert(key.into(), Arc::new(value) as Arc<dyn Any + Send + Sync>);
    }

    /// Retrieve the value stored under `key` if it has type `T`.
    #[must_use]
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.entries
            .get(key)
            .and_then(|value| Arc::clone(value).downcast::<T>().ok())
    }

    /// Remove the value stored under `key`, returning whether it existed.
    pub fn remove(&mut self, key: &str) -> bool { self.entries.remove(key).is_some() }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool { self.entries.contains_key(key) }

    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Iterate over the stored keys in arbitrary order.
    pub fn keys(&self) -> impl Iterator<Item = &str> { self.entries.keys().map(String::as_str) }
}

impl fmt::Debug for Values {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Values;

    #[derive(Debug, PartialEq)]
    struct Account {
        name: &'static str,
        level: u8,
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn insert_and_get_multiple_types() {
        let mut values = Values::default();
        values.insert("count", 12u32);
        values.insert("account", Account {
            name: "alpha",
            level: 3,
        });

        let count = values.get::<u32>("count").expect("u32 should be present");
        assert_eq!(*count, 12);
        let account = values
            .get::<Account>("account")
            .expect("Account should be present");
        assert_eq!(*account, Account {
            name: "alpha",
            level: 3,
        });
    }

    #[test]
    fn wrong_type_returns_none() {
        let mut values = Values::default();
        values.insert("count", 12u32);
        assert!(values.get::<u64>("count").is_none());
        assert!(values.contains_key("count"));
    }

    #[test]
    fn insert_overwrites_and_remove_clears() {
        let mut values = Values::default();
        values.insert("k", 1u8);
        values.insert("k", 2u8);
        assert_eq!(values.get::<u8>("k").as_deref(), Some(&2));
        assert!(values.remove("k"));
        assert!(!values.remove("k"));
        assert!(values.is_empty());
    }

    #[test]
    fn store_is_send_and_sync() { assert_send_sync::<Values>(); }
}
