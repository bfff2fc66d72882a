//! Branch-addressed data trees.
//!
//! A tree maps a structural path such as `{0;1}` to an ordered list of items.
//! Branches keep the order they were inserted in; nothing here sorts paths.
//! On the wire a tree is a JSON object whose keys are printed paths, so the
//! serde impls below walk the branches in order instead of going through a
//! map type that would reorder them.

use std::fmt;
use std::str::FromStr;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::schema::WireError;

// ── Paths ─────────────────────────────────────────────────────────────────────

/// Structural address of a branch, printed as `{0;1;2}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreePath(Vec<u32>);

impl TreePath {
    pub fn new(indices: impl Into<Vec<u32>>) -> Self {
        Self(indices.into())
    }

    /// The `{0}` path every single-branch input lands on.
    pub fn root() -> Self {
        Self(vec![0])
    }

    pub fn indices(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy of this path with the last index swapped for `index`.
    ///
    /// An empty path becomes `{index}`.
    pub fn with_last(&self, index: u32) -> Self {
        let mut indices = self.0.clone();
        match indices.last_mut() {
            Some(last) => *last = index,
            None => indices.push(index),
        }
        Self(indices)
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, index) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{index}")?;
        }
        f.write_str("}")
    }
}

impl FromStr for TreePath {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s.trim().trim_start_matches('{').trim_end_matches('}');
        let mut indices = Vec::new();
        for token in inner.split(';') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let index = token
                .parse::<u32>()
                .map_err(|_| WireError::InvalidPath(s.to_string()))?;
            indices.push(index);
        }
        Ok(Self(indices))
    }
}

impl Serialize for TreePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TreePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── Trees ─────────────────────────────────────────────────────────────────────

/// Insertion-ordered mapping from [`TreePath`] to a list of items.
#[derive(Debug, Clone, PartialEq)]
pub struct DataTree<T> {
    branches: Vec<(TreePath, Vec<T>)>,
}

impl<T> Default for DataTree<T> {
    fn default() -> Self {
        Self {
            branches: Vec::new(),
        }
    }
}

impl<T> DataTree<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item to the branch at `path`, creating the branch if needed.
    pub fn append(&mut self, path: &TreePath, item: T) {
        self.ensure_branch(path).push(item);
    }

    /// Mutable access to the branch at `path`; new branches go to the end.
    pub fn ensure_branch(&mut self, path: &TreePath) -> &mut Vec<T> {
        let index = match self.branches.iter().position(|(p, _)| p == path) {
            Some(index) => index,
            None => {
                self.branches.push((path.clone(), Vec::new()));
                self.branches.len() - 1
            }
        };
        &mut self.branches[index].1
    }

    pub fn branch(&self, path: &TreePath) -> Option<&[T]> {
        self.branches
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, items)| items.as_slice())
    }

    pub fn paths(&self) -> impl Iterator<Item = &TreePath> {
        self.branches.iter().map(|(p, _)| p)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TreePath, &[T])> {
        self.branches.iter().map(|(p, items)| (p, items.as_slice()))
    }

    /// Number of branches.
    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    /// Number of items across all branches.
    pub fn item_count(&self) -> usize {
        self.branches.iter().map(|(_, items)| items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }
}

impl<T: Serialize> Serialize for DataTree<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.branches.len()))?;
        for (path, items) in &self.branches {
            map.serialize_entry(&path.to_string(), items)?;
        }
        map.end()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for DataTree<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TreeVisitor<T>(std::marker::PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for TreeVisitor<T> {
            type Value = DataTree<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of tree paths to item lists")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut tree = DataTree::new();
                while let Some((path, items)) = access.next_entry::<TreePath, Vec<T>>()? {
                    tree.ensure_branch(&path).extend(items);
                }
                Ok(tree)
            }
        }

        deserializer.deserialize_map(TreeVisitor(std::marker::PhantomData))
    }
}
