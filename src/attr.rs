//! Bitmap attribute store
//!
//! Holds key/value attributes per bitmap id. A view never reads or writes
//! attributes itself; it only hands the shared store to every fragment it
//! materializes.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Attributes of a single bitmap
pub type Attrs = BTreeMap<String, Value>;

/// Thread-safe attribute store keyed by bitmap id
#[derive(Debug)]
pub struct AttrStore {
    path: PathBuf,
    attrs: RwLock<HashMap<u64, Attrs>>,
}

impl AttrStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            attrs: RwLock::new(HashMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Attributes for `id`, empty if none were set
    pub fn attrs(&self, id: u64) -> Attrs {
        self.attrs.read().get(&id).cloned().unwrap_or_default()
    }

    /// Merge `attrs` into the attributes for `id`
    ///
    /// A `null` value removes the key.
    pub fn set_attrs(&self, id: u64, attrs: Attrs) {
        let mut all = self.attrs.write();
        let entry = all.entry(id).or_default();
        for (key, value) in attrs {
            if value.is_null() {
                entry.remove(&key);
            } else {
                entry.insert(key, value);
            }
        }
        if entry.is_empty() {
            all.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_attrs_merges_and_deletes() {
        let store = AttrStore::new("/tmp/attrs");

        let mut attrs = Attrs::new();
        attrs.insert("color".to_string(), json!("red"));
        attrs.insert("weight".to_string(), json!(3));
        store.set_attrs(1, attrs);

        let mut update = Attrs::new();
        update.insert("color".to_string(), Value::Null);
        update.insert("size".to_string(), json!("xl"));
        store.set_attrs(1, update);

        let got = store.attrs(1);
        assert_eq!(got.len(), 2);
        assert_eq!(got["weight"], json!(3));
        assert_eq!(got["size"], json!("xl"));
        assert!(store.attrs(2).is_empty());
    }
}
