//! Authenticator port - API キーの検証
//!
//! キーの保存・ハッシュ化は外部の責務。ここでは「有効か」だけを問う。

use std::collections::HashSet;

/// Decides whether a presented credential is valid.
pub trait Authenticator: Send + Sync {
    fn validate(&self, credential: &str) -> bool;
}

/// Fixed allow-list, typically loaded from configuration.
///
/// An empty list rejects every credential.
#[derive(Debug, Clone, Default)]
pub struct StaticKeys {
    keys: HashSet<String>,
}

impl StaticKeys {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Authenticator for StaticKeys {
    fn validate(&self, credential: &str) -> bool {
        self.keys.contains(credential)
    }
}
