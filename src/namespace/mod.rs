//! Namespace resolution (C5): composes effective keys from (namespace, key)
//! and provides the task-local `with_namespace` scope.

use std::cell::RefCell;
use std::sync::Arc;

const DELIMITER: char = ':';

#[derive(Debug, thiserror::Error)]
pub enum NamespaceError {
    #[error("namespace must not be empty")]
    Empty,
    #[error("namespace must not contain the delimiter ':'")]
    ContainsDelimiter,
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<str>>> = const { RefCell::new(None) };
}

/// RAII guard returned by `with_namespace`; restores the previous task-local
/// namespace (if any) when dropped.
pub struct NamespaceScope {
    previous: Option<Arc<str>>,
}

impl Drop for NamespaceScope {
    fn drop(&mut self) {
        CURRENT.with(|c| *c.borrow_mut() = self.previous.take());
    }
}

/// Enters a task-local namespace scope for the duration of the returned
/// guard's lifetime. Nested scopes restore the outer one on drop.
pub fn with_namespace(ns: &str) -> Result<NamespaceScope, NamespaceError> {
    validate(ns)?;
    let previous = CURRENT.with(|c| c.borrow_mut().replace(Arc::from(ns)));
    Ok(NamespaceScope { previous })
}

fn current() -> Option<Arc<str>> {
    CURRENT.with(|c| c.borrow().clone())
}

fn validate(ns: &str) -> Result<(), NamespaceError> {
    if ns.is_empty() {
        return Err(NamespaceError::Empty);
    }
    if ns.contains(DELIMITER) {
        return Err(NamespaceError::ContainsDelimiter);
    }
    Ok(())
}

/// Composes the effective key for an operation: explicit namespace argument
/// takes precedence, then the task-local scope, then the raw key.
pub fn effective_key(key: &str, explicit_ns: Option<&str>) -> Result<String, NamespaceError> {
    let ns = match explicit_ns {
        Some(ns) => {
            validate(ns)?;
            Some(Arc::from(ns))
        }
        None => current(),
    };
    Ok(match ns {
        Some(ns) => format!("{ns}{DELIMITER}{key}"),
        None => key.to_string(),
    })
}

/// Returns `Some(raw_key)` if `effective_key` belongs to namespace `ns`,
/// stripping the `"{ns}:"` prefix. Used by `keys(namespace)`.
pub fn strip_prefix<'a>(effective_key: &'a str, ns: &str) -> Option<&'a str> {
    let prefix_len = ns.len() + 1;
    if effective_key.len() > prefix_len
        && effective_key.starts_with(ns)
        && effective_key.as_bytes()[ns.len()] == DELIMITER as u8
    {
        Some(&effective_key[prefix_len..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_delimiter_and_empty() {
        assert!(matches!(validate(""), Err(NamespaceError::Empty)));
        assert!(matches!(
            validate("a:b"),
            Err(NamespaceError::ContainsDelimiter)
        ));
        assert!(validate("ok").is_ok());
    }

    #[test]
    fn explicit_overrides_task_local() {
        let _scope = with_namespace("outer").unwrap();
        assert_eq!(
            effective_key("k", Some("inner")).unwrap(),
            "inner:k"
        );
        assert_eq!(effective_key("k", None).unwrap(), "outer:k");
    }

    #[test]
    fn no_namespace_uses_raw_key() {
        assert_eq!(effective_key("k", None).unwrap(), "k");
    }

    #[test]
    fn nested_scopes_restore_outer() {
        {
            let _outer = with_namespace("a").unwrap();
            assert_eq!(effective_key("k", None).unwrap(), "a:k");
            {
                let _inner = with_namespace("b").unwrap();
                assert_eq!(effective_key("k", None).unwrap(), "b:k");
            }
            assert_eq!(effective_key("k", None).unwrap(), "a:k");
        }
        assert_eq!(effective_key("k", None).unwrap(), "k");
    }

    #[test]
    fn strip_prefix_works() {
        assert_eq!(strip_prefix("ns:foo", "ns"), Some("foo"));
        assert_eq!(strip_prefix("nsx:foo", "ns"), None);
        assert_eq!(strip_prefix("other:foo", "ns"), None);
    }
}
