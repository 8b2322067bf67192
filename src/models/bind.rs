//! Bind identifiers and selectors.
//!
//! A bind names the database a table lives in: the primary database, or one of the
//! secondary databases declared in the `binds` configuration.

use serde::{Deserialize, Serialize};

/// Sentinel string selecting every configured bind.
pub const ALL_BINDS: &str = "__all__";

/// Identifies one configured database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum BindKey {
    /// The database configured by `database_uri`.
    #[default]
    Primary,
    /// A secondary database from the `binds` mapping.
    Named(String),
}

impl BindKey {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, Self::Primary)
    }

    /// The bind name, `None` for the primary database.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Primary => None,
            Self::Named(name) => Some(name),
        }
    }
}

impl std::fmt::Display for BindKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Named(name) => write!(f, "{}", name),
        }
    }
}

impl From<&str> for BindKey {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for BindKey {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

impl From<Option<String>> for BindKey {
    fn from(name: Option<String>) -> Self {
        name.map_or(Self::Primary, Self::Named)
    }
}

impl From<Option<&str>> for BindKey {
    fn from(name: Option<&str>) -> Self {
        name.map_or(Self::Primary, |n| Self::Named(n.to_string()))
    }
}

impl From<BindKey> for Option<String> {
    fn from(key: BindKey) -> Self {
        match key {
            BindKey::Primary => None,
            BindKey::Named(name) => Some(name),
        }
    }
}

/// Selects the binds a schema operation runs against.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BindSelector {
    /// Primary first, then every secondary bind in declaration order.
    #[default]
    All,
    /// An explicit list, processed in the given order.
    Only(Vec<BindKey>),
}

impl BindSelector {
    pub fn primary() -> Self {
        Self::Only(vec![BindKey::Primary])
    }

    pub fn bind(name: impl Into<String>) -> Self {
        Self::Only(vec![BindKey::Named(name.into())])
    }

    /// Expand the selector against the configured bind names.
    pub fn resolve<'a>(&self, configured: impl IntoIterator<Item = &'a str>) -> Vec<BindKey> {
        match self {
            Self::All => std::iter::once(BindKey::Primary)
                .chain(configured.into_iter().map(BindKey::from))
                .collect(),
            Self::Only(keys) => keys.clone(),
        }
    }
}

impl From<&str> for BindSelector {
    fn from(s: &str) -> Self {
        if s == ALL_BINDS {
            Self::All
        } else {
            Self::bind(s)
        }
    }
}

impl From<BindKey> for BindSelector {
    fn from(key: BindKey) -> Self {
        Self::Only(vec![key])
    }
}

impl From<Option<&str>> for BindSelector {
    fn from(name: Option<&str>) -> Self {
        Self::Only(vec![BindKey::from(name)])
    }
}

impl From<Vec<BindKey>> for BindSelector {
    fn from(keys: Vec<BindKey>) -> Self {
        Self::Only(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_key_display() {
        assert_eq!(BindKey::Primary.to_string(), "primary");
        assert_eq!(BindKey::named("reporting").to_string(), "reporting");
    }

    #[test]
    fn test_bind_key_from_option() {
        assert_eq!(BindKey::from(None::<&str>), BindKey::Primary);
        assert_eq!(BindKey::from(Some("x")), BindKey::named("x"));
        assert_eq!(BindKey::named("x").name(), Some("x"));
        assert_eq!(BindKey::Primary.name(), None);
    }

    #[test]
    fn test_bind_key_serde_as_option() {
        assert_eq!(serde_json::to_string(&BindKey::Primary).unwrap(), "null");
        let key: BindKey = serde_json::from_str("\"audit\"").unwrap();
        assert_eq!(key, BindKey::named("audit"));
    }

    #[test]
    fn test_selector_all_orders_primary_first() {
        let keys = BindSelector::All.resolve(["reporting", "audit"]);
        assert_eq!(
            keys,
            vec![
                BindKey::Primary,
                BindKey::named("reporting"),
                BindKey::named("audit")
            ]
        );
    }

    #[test]
    fn test_selector_from_str() {
        assert_eq!(BindSelector::from(ALL_BINDS), BindSelector::All);
        assert_eq!(
            BindSelector::from("reporting").resolve([]),
            vec![BindKey::named("reporting")]
        );
        assert_eq!(
            BindSelector::from(None::<&str>).resolve(["x"]),
            vec![BindKey::Primary]
        );
    }
}
