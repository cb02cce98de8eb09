use std::collections::HashSet;
use std::thread;

use parking_lot::Mutex;

/// Expressions currently being evaluated, keyed by expression text and thread.
///
/// The thread id in the key keeps concurrent requests from tripping each other;
/// only same-thread re-entrancy collides.
#[derive(Debug, Default)]
pub(crate) struct ActiveExpressionSet {
    entries: Mutex<HashSet<String>>,
}

impl ActiveExpressionSet {
    pub(crate) fn try_enter(&self, expression: &str) -> Option<ActiveExpressionGuard<'_>> {
        let key = format!("{}|{:?}", expression, thread::current().id());
        if !self.entries.lock().insert(key.clone()) {
            return None;
        }
        Some(ActiveExpressionGuard { set: self, key })
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

pub(crate) struct ActiveExpressionGuard<'a> {
    set: &'a ActiveExpressionSet,
    key: String,
}

impl Drop for ActiveExpressionGuard<'_> {
    fn drop(&mut self) {
        self.set.entries.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod active_tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn re_entry_on_same_thread_is_rejected_until_guard_drops() {
        let set = ActiveExpressionSet::default();
        let guard = set.try_enter("{%a%}").expect("first entry");
        assert!(set.try_enter("{%a%}").is_none());
        assert!(set.try_enter("{%b%}").is_some());
        drop(guard);
        assert!(set.try_enter("{%a%}").is_some());
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn guard_is_released_when_unwinding() {
        let set = Arc::new(ActiveExpressionSet::default());
        let inner = Arc::clone(&set);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = inner.try_enter("{%boom%}").expect("entry");
            panic!("evaluation failed");
        }));
        assert!(result.is_err());
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn other_threads_may_evaluate_the_same_expression() {
        let set = Arc::new(ActiveExpressionSet::default());
        let _guard = set.try_enter("{%shared%}").expect("entry");
        let other = Arc::clone(&set);
        let entered = std::thread::spawn(move || other.try_enter("{%shared%}").is_some())
            .join()
            .expect("thread joins");
        assert!(entered);
    }
}
