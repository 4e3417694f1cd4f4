use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

// A pattern that fails to compile leaves every name invalid.
static SCOPE_NAME: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*(\.[a-zA-Z_][a-zA-Z0-9_]*)*$").ok()
});

#[must_use]
pub fn is_valid_scope_name(name: &str) -> bool {
    SCOPE_NAME.as_ref().is_some_and(|re| re.is_match(name))
}

/// The fixed set of scope variables a pool's connections may carry.
///
/// Every caller-supplied name goes through [`ScopeAllowList::resolve`]; the value
/// returned is the configured name, never the caller's string, and it is the
/// only identifier that reaches SQL (bound as a parameter).
#[derive(Debug, Clone)]
pub struct ScopeAllowList {
    names: BTreeSet<String>,
}

impl ScopeAllowList {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = names
            .into_iter()
            .map(Into::into)
            .filter(|n: &String| is_valid_scope_name(n))
            .collect();
        Self { names }
    }

    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&str> {
        if !is_valid_scope_name(name) {
            return None;
        }
        self.names.get(name).map(String::as_str)
    }
}
