//! Named closures stored inside query plans.
//!
//! A closure has no content to hash, so every [`ElementFn`] carries a label
//! plus a process-unique instance id, and the pair stands in for it in the
//! plan's canonical form. Clones share the id, so a reused builder still
//! hits the cache, while two closures built separately never collide even
//! under the same label.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::model::Element;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// A shareable function over elements with a stable identity.
pub struct ElementFn<T> {
    name: Arc<str>,
    instance: u64,
    func: Arc<dyn Fn(&Element) -> T + Send + Sync>,
}

impl<T> ElementFn<T> {
    /// Wrap a closure under a readable name.
    ///
    /// The name is a label for plans and logs only. Each call yields a new
    /// identity, so closures capturing different values never share cached
    /// results.
    pub fn named<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Element) -> T + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            instance: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            func: Arc::new(func),
        }
    }

    /// Wrap a closure under the generic label `fn`.
    pub fn anonymous<F>(func: F) -> Self
    where
        F: Fn(&Element) -> T + Send + Sync + 'static,
    {
        Self::named("fn", func)
    }

    /// Readable label.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process-unique id shared by clones.
    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// Invoke the function.
    pub fn call(&self, element: &Element) -> T {
        (self.func)(element)
    }
}

impl<T> Clone for ElementFn<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            instance: self.instance,
            func: Arc::clone(&self.func),
        }
    }
}

impl<T> fmt::Debug for ElementFn<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ElementFn")
            .field(&self.name)
            .field(&self.instance)
            .finish()
    }
}

/// Canonical form: `label#instance`.
impl<T> fmt::Display for ElementFn<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_identities_are_unique() {
        let a = ElementFn::anonymous(|_| true);
        let b = ElementFn::anonymous(|_| true);
        assert_ne!(a.to_string(), b.to_string());
        assert_eq!(a.clone().to_string(), a.to_string());
    }

    #[test]
    fn test_same_name_different_captures_do_not_collide() {
        let over = |threshold: i64| {
            ElementFn::named("min_id", move |e: &Element| e.id.value() > threshold)
        };
        let (low, high) = (over(1), over(10));
        assert_eq!(low.name(), high.name());
        assert_ne!(low.to_string(), high.to_string());
        assert!(low.to_string().starts_with("min_id#"));
    }

    #[test]
    fn test_call() {
        let f = ElementFn::named("id_doubled", |e: &Element| e.id.value() * 2);
        assert_eq!(f.call(&Element::new(21, "Wall")), 42);
    }
}
