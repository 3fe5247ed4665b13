//! Allow-list gate over (schema, procedure).
//!
//! This is a pluggable predicate, not a security boundary. The default
//! [`PermitAll`] lets every call through.

use std::collections::{HashMap, HashSet};

pub trait AllowList: Send + Sync {
    fn is_allowed(&self, schema: &str, procedure: &str) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PermitAll;

impl AllowList for PermitAll {
    fn is_allowed(&self, _schema: &str, _procedure: &str) -> bool {
        true
    }
}

/// Fixed allow-list: schema keys compare case-insensitively, procedure
/// names exactly. A procedure entry of `*` admits the whole schema.
#[derive(Debug, Clone, Default)]
pub struct StaticAllowList {
    entries: HashMap<String, HashSet<String>>,
}

impl StaticAllowList {
    pub fn new(entries: HashMap<String, Vec<String>>) -> Self {
        let entries = entries
            .into_iter()
            .map(|(schema, procs)| (schema.to_lowercase(), procs.into_iter().collect()))
            .collect();
        Self { entries }
    }
}

impl AllowList for StaticAllowList {
    fn is_allowed(&self, schema: &str, procedure: &str) -> bool {
        self.entries
            .get(&schema.to_lowercase())
            .is_some_and(|procs| procs.contains("*") || procs.contains(procedure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> StaticAllowList {
        StaticAllowList::new(HashMap::from([
            ("Sales".to_string(), vec!["get_orders".to_string()]),
            ("reporting".to_string(), vec!["*".to_string()]),
        ]))
    }

    #[test]
    fn permit_all_permits() {
        assert!(PermitAll.is_allowed("anything", "at_all"));
    }

    #[test]
    fn schema_is_case_insensitive_procedure_is_not() {
        let l = list();
        assert!(l.is_allowed("sales", "get_orders"));
        assert!(l.is_allowed("SALES", "get_orders"));
        assert!(!l.is_allowed("sales", "GET_ORDERS"));
        assert!(!l.is_allowed("sales", "delete_orders"));
    }

    #[test]
    fn wildcard_and_unknown_schema() {
        let l = list();
        assert!(l.is_allowed("reporting", "anything"));
        assert!(!l.is_allowed("ghost", "get_orders"));
    }
}
