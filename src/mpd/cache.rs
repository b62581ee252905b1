//! Generation-tagged memoization of list and status results.
//!
//! Entries are never cleared by mutating verbs; bumping the generation is
//! enough to turn every older entry into a miss.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

struct CacheEntry {
  generation: u64,
  value: Arc<dyn Any + Send + Sync>,
}

/// Result cache for one connection.
pub struct ResultCache {
  generation: AtomicU64,
  entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResultCache {
  pub fn new() -> Self {
    Self {
      generation: AtomicU64::new(0),
      entries: Mutex::new(HashMap::new()),
    }
  }

  /// Current generation.
  pub fn generation(&self) -> u64 {
    self.generation.load(Ordering::SeqCst)
  }

  /// Start a new generation, invalidating every entry.
  pub fn bump(&self) -> u64 {
    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
    log::debug!("Result cache generation is now {}", generation);
    generation
  }

  /// Cached value for `kind`, unless absent or from an older generation.
  pub fn get<T>(&self, kind: &str) -> Option<T>
  where
    T: Clone + Send + Sync + 'static,
  {
    let current = self.generation();
    let entries = self.entries.lock();
    let entry = entries.get(kind)?;
    if entry.generation != current {
      return None;
    }
    entry.value.downcast_ref::<T>().cloned()
  }

  /// Store `value` under the current generation.
  pub fn put<T>(&self, kind: impl Into<String>, value: T)
  where
    T: Send + Sync + 'static,
  {
    self.put_at(self.generation(), kind, value);
  }

  /// Store `value` under the generation observed before it was fetched.
  ///
  /// A mutation that lands while the fetch is in flight leaves the entry
  /// tagged with the older generation, so it never serves as current.
  pub fn put_at<T>(&self, generation: u64, kind: impl Into<String>, value: T)
  where
    T: Send + Sync + 'static,
  {
    let current = self.generation();
    let mut entries = self.entries.lock();
    entries.retain(|_, entry| entry.generation == current);
    if generation != current {
      return;
    }
    entries.insert(
      kind.into(),
      CacheEntry {
        generation,
        value: Arc::new(value),
      },
    );
  }

  pub fn len(&self) -> usize {
    self.entries.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl Default for ResultCache {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mpd::types::Album;

  #[test]
  fn test_hit_within_generation() {
    let cache = ResultCache::new();
    cache.put("list album", vec![Album::new("Blue Train")]);
    let albums: Vec<Album> = cache.get("list album").unwrap();
    assert_eq!(albums, vec![Album::new("Blue Train")]);
  }

  #[test]
  fn test_miss_after_bump() {
    let cache = ResultCache::new();
    cache.put("status", 42u32);
    cache.bump();
    assert_eq!(cache.get::<u32>("status"), None);
  }

  #[test]
  fn test_miss_on_wrong_type_or_absent_key() {
    let cache = ResultCache::new();
    cache.put("status", 42u32);
    assert_eq!(cache.get::<String>("status"), None);
    assert_eq!(cache.get::<u32>("stats"), None);
  }

  #[test]
  fn test_stale_fetch_is_not_stored() {
    let cache = ResultCache::new();
    let observed = cache.generation();
    cache.bump();
    cache.put_at(observed, "list album", vec![Album::new("old")]);
    assert_eq!(cache.get::<Vec<Album>>("list album"), None);
    assert!(cache.is_empty());
  }

  #[test]
  fn test_old_entries_pruned_on_put() {
    let cache = ResultCache::new();
    cache.put("a", 1u8);
    cache.put("b", 2u8);
    cache.bump();
    cache.put("c", 3u8);
    assert_eq!(cache.len(), 1);
  }
}
