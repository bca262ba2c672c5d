//! Compiled-kernel caching
//!
//! Compiling a kernel runs the full lowering pipeline and, on native
//! backends, an external compiler. Each accelerator therefore keeps a cache
//! of compiled kernels keyed by entry-point name: the first compilation of a
//! name wins and later requests return the cached handle.

use arclight_backends::KernelHandle;
use arclight_ir::ParamKind;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// One compiled kernel as the backend knows it
#[derive(Debug)]
pub(crate) struct CompiledEntry {
    pub handle: KernelHandle,
    pub params: Vec<ParamKind>,
    /// Largest group volume the kernel may launch with on its device
    pub max_group_size: u32,
}

/// Per-accelerator kernel cache
///
/// Reads take a shared lock, so repeated launches of a cached kernel never
/// contend. Creation is fallible and runs outside the cache lock; if two
/// threads race, the loser's handle is kept alive by its own `Arc` and the
/// cache keeps whichever insert landed first.
#[derive(Debug, Default)]
pub(crate) struct KernelCache {
    entries: RwLock<HashMap<String, Arc<CompiledEntry>>>,
}

impl KernelCache {
    pub fn get(&self, name: &str) -> Option<Arc<CompiledEntry>> {
        self.entries.read().get(name).map(Arc::clone)
    }

    /// Insert an entry, returning the one that ends up cached
    pub fn insert(&self, name: String, entry: CompiledEntry) -> Arc<CompiledEntry> {
        let entry = Arc::new(entry);
        let mut guard = self.entries.write();
        Arc::clone(guard.entry(name).or_insert_with(|| Arc::clone(&entry)))
    }

    /// Evict `name` if it still maps to `entry`
    ///
    /// Returns whether the eviction happened; a name recompiled since the
    /// entry was handed out is left alone.
    pub fn remove_if(&self, name: &str, entry: &Arc<CompiledEntry>) -> bool {
        let mut guard = self.entries.write();
        if guard.get(name).is_some_and(|current| Arc::ptr_eq(current, entry)) {
            guard.remove(name);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_insert_wins() {
        let cache = KernelCache::default();
        assert!(cache.get("saxpy_f32").is_none());

        let first = cache.insert(
            "saxpy_f32".to_string(),
            CompiledEntry {
                handle: KernelHandle::new(1),
                params: Vec::new(),
                max_group_size: 1024,
            },
        );
        let second = cache.insert(
            "saxpy_f32".to_string(),
            CompiledEntry {
                handle: KernelHandle::new(2),
                params: Vec::new(),
                max_group_size: 1024,
            },
        );
        assert_eq!(first.handle, second.handle);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("saxpy_f32").unwrap().handle, KernelHandle::new(1));
    }

    #[test]
    fn test_remove_if_only_evicts_matching_entry() {
        let cache = KernelCache::default();
        let cached = cache.insert(
            "saxpy_f32".to_string(),
            CompiledEntry {
                handle: KernelHandle::new(1),
                params: Vec::new(),
                max_group_size: 1024,
            },
        );
        let stale = Arc::new(CompiledEntry {
            handle: KernelHandle::new(2),
            params: Vec::new(),
            max_group_size: 1024,
        });

        assert!(!cache.remove_if("saxpy_f32", &stale));
        assert_eq!(cache.len(), 1);
        assert!(cache.remove_if("saxpy_f32", &cached));
        assert!(cache.get("saxpy_f32").is_none());
        assert!(!cache.remove_if("saxpy_f32", &cached));
    }
}
