use serde::{Deserialize, Serialize};
use std::fmt;

/// One `(kind, id)` step of a key path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PathElement {
    pub kind: String,
    pub id: String,
}

/// Address of a document in the store.
///
/// A key is a non-empty path of `(kind, id)` pairs; the last element names the
/// document itself and the preceding ones its ancestors. Ids are always
/// supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawKey")]
pub struct Key {
    path: Vec<PathElement>,
}

/// Wire form of [`Key`], checked before it becomes one.
#[derive(Deserialize)]
struct RawKey {
    path: Vec<PathElement>,
}

impl TryFrom<RawKey> for Key {
    type Error = String;

    fn try_from(raw: RawKey) -> Result<Self, Self::Error> {
        Key::from_path(raw.path).ok_or_else(|| "key path cannot be empty".to_string())
    }
}

impl Key {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            path: vec![PathElement {
                kind: kind.into(),
                id: id.into(),
            }],
        }
    }

    /// Builds a key from an explicit path. Returns `None` for an empty path.
    pub fn from_path(path: Vec<PathElement>) -> Option<Self> {
        if path.is_empty() {
            None
        } else {
            Some(Self { path })
        }
    }

    /// Key of a document nested under `self`.
    pub fn child(&self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        let mut path = self.path.clone();
        path.push(PathElement {
            kind: kind.into(),
            id: id.into(),
        });
        Self { path }
    }

    pub fn kind(&self) -> &str {
        &self.last().kind
    }

    pub fn id(&self) -> &str {
        &self.last().id
    }

    pub fn path(&self) -> &[PathElement] {
        &self.path
    }

    pub fn parent(&self) -> Option<Self> {
        if self.path.len() > 1 {
            Some(Self {
                path: self.path[..self.path.len() - 1].to_vec(),
            })
        } else {
            None
        }
    }

    /// True when `ancestor` is a strict prefix of this key's path.
    pub fn has_ancestor(&self, ancestor: &Key) -> bool {
        self.path.len() > ancestor.path.len() && self.path.starts_with(&ancestor.path)
    }

    /// Unambiguous string form of the full path, used as the loader cache key.
    pub fn cache_key(&self) -> String {
        let mut out = String::new();
        for (i, element) in self.path.iter().enumerate() {
            if i > 0 {
                out.push('/');
            }
            push_escaped(&mut out, &element.kind);
            out.push(':');
            push_escaped(&mut out, &element.id);
        }
        out
    }

    fn last(&self) -> &PathElement {
        // Construction guarantees at least one element.
        &self.path[self.path.len() - 1]
    }
}

fn push_escaped(out: &mut String, part: &str) {
    for c in part.chars() {
        if matches!(c, '\\' | '/' | ':') {
            out.push('\\');
        }
        out.push(c);
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}
