//! Single-flight memoization keyed by value.
//!
//! The first caller for a key runs the computation; every concurrent or later
//! caller for the same key awaits and shares that one result. The computation
//! is never re-run for a key unless the key is explicitly forgotten.
//!
//! Callers that compute on behalf of another key pass it as the `requester`.
//! The memo records "requester waits on key" edges while a wait is in
//! progress and refuses a wait that would close a cycle, so a key that
//! transitively requests itself fails with [`CycleError`] instead of
//! deadlocking on its own cell.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::OnceCell;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle: {}", .path.join(" -> "))]
pub struct CycleError {
  pub path: Vec<String>,
}

pub struct Memo<K, V> {
  cells: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
  /// requester -> keys it is currently waiting on (with multiplicity).
  waiting: Mutex<HashMap<K, HashMap<K, usize>>>,
  computed: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
  m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<K, V> Default for Memo<K, V>
where
  K: Clone + Eq + Hash + Display,
  V: Clone,
{
  fn default() -> Self {
    Self::new()
  }
}

impl<K, V> Memo<K, V>
where
  K: Clone + Eq + Hash + Display,
  V: Clone,
{
  pub fn new() -> Self {
    Self {
      cells: Mutex::new(HashMap::new()),
      waiting: Mutex::new(HashMap::new()),
      computed: AtomicUsize::new(0),
    }
  }

  /// Number of computations actually run (memo misses).
  pub fn computed(&self) -> usize {
    self.computed.load(Ordering::SeqCst)
  }

  /// The completed value for `key`, if any.
  pub fn peek(&self, key: &K) -> Option<V> {
    lock(&self.cells).get(key).and_then(|cell| cell.get().cloned())
  }

  /// Forget the value for `key` so the next request recomputes it.
  pub fn forget(&self, key: &K) -> bool {
    lock(&self.cells).remove(key).is_some()
  }

  /// Forget every key matching `pred`, returning the keys removed.
  pub fn forget_where(&self, pred: impl Fn(&K) -> bool) -> Vec<K> {
    let mut cells = lock(&self.cells);
    let keys: Vec<K> = cells.keys().filter(|k| pred(k)).cloned().collect();
    for k in &keys {
      cells.remove(k);
    }
    keys
  }

  pub async fn get_or_compute<F, Fut>(&self, requester: Option<&K>, key: &K, compute: F) -> Result<V, CycleError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = V>,
  {
    let cell = {
      let mut cells = lock(&self.cells);
      cells.entry(key.clone()).or_insert_with(|| Arc::new(OnceCell::new())).clone()
    };

    if let Some(value) = cell.get() {
      return Ok(value.clone());
    }

    let _wait = match requester {
      Some(from) => Some(self.enter_wait(from, key)?),
      None => None,
    };

    let value = cell
      .get_or_init(|| async {
        self.computed.fetch_add(1, Ordering::SeqCst);
        compute().await
      })
      .await;

    Ok(value.clone())
  }

  fn enter_wait(&self, from: &K, to: &K) -> Result<WaitGuard<'_, K, V>, CycleError> {
    let mut waiting = lock(&self.waiting);

    if from == to {
      return Err(CycleError {
        path: vec![from.to_string(), to.to_string()],
      });
    }

    if let Some(mut path) = find_path(&waiting, to, from) {
      path.insert(0, from.clone());
      return Err(CycleError {
        path: path.iter().map(|k| k.to_string()).collect(),
      });
    }

    *waiting.entry(from.clone()).or_default().entry(to.clone()).or_insert(0) += 1;

    Ok(WaitGuard {
      memo: self,
      from: from.clone(),
      to: to.clone(),
    })
  }
}

/// Depth-first search over wait edges; returns the key path `start..=goal`.
fn find_path<K: Clone + Eq + Hash>(edges: &HashMap<K, HashMap<K, usize>>, start: &K, goal: &K) -> Option<Vec<K>> {
  let mut visited: HashSet<K> = HashSet::new();
  let mut stack: Vec<(K, Vec<K>)> = vec![(start.clone(), vec![start.clone()])];

  while let Some((node, path)) = stack.pop() {
    if &node == goal {
      return Some(path);
    }
    if !visited.insert(node.clone()) {
      continue;
    }
    if let Some(next) = edges.get(&node) {
      for n in next.keys() {
        let mut p = path.clone();
        p.push(n.clone());
        stack.push((n.clone(), p));
      }
    }
  }
  None
}

struct WaitGuard<'a, K: Clone + Eq + Hash, V> {
  memo: &'a Memo<K, V>,
  from: K,
  to: K,
}

impl<K: Clone + Eq + Hash, V> Drop for WaitGuard<'_, K, V> {
  fn drop(&mut self) {
    let mut waiting = lock(&self.memo.waiting);
    if let Some(targets) = waiting.get_mut(&self.from) {
      if let Some(count) = targets.get_mut(&self.to) {
        *count -= 1;
        if *count == 0 {
          targets.remove(&self.to);
        }
      }
      if targets.is_empty() {
        waiting.remove(&self.from);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::AtomicUsize;
  use std::time::Duration;

  use futures::future::{BoxFuture, FutureExt, join_all};

  use super::*;

  #[tokio::test]
  async fn computes_once_sequentially() {
    let memo: Memo<String, Arc<usize>> = Memo::new();
    let runs = AtomicUsize::new(0);
    let key = "a".to_string();

    let first = memo
      .get_or_compute(None, &key, || async { Arc::new(runs.fetch_add(1, Ordering::SeqCst)) })
      .await
      .unwrap();
    let second = memo
      .get_or_compute(None, &key, || async { Arc::new(runs.fetch_add(1, Ordering::SeqCst)) })
      .await
      .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(memo.computed(), 1);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn concurrent_callers_share_one_computation() {
    let memo: Arc<Memo<String, Arc<usize>>> = Arc::new(Memo::new());
    let runs = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..16 {
      let memo = memo.clone();
      let runs = runs.clone();
      handles.push(tokio::spawn(async move {
        memo
          .get_or_compute(None, &"shared".to_string(), || async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Arc::new(runs.fetch_add(1, Ordering::SeqCst))
          })
          .await
          .unwrap()
      }));
    }

    let results: Vec<Arc<usize>> = join_all(handles).await.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
  }

  #[tokio::test]
  async fn self_request_is_a_cycle() {
    let memo: Memo<String, u32> = Memo::new();
    let key = "a".to_string();
    let err = memo.get_or_compute(Some(&key), &key, || async { 1 }).await.unwrap_err();
    assert_eq!(err.path, vec!["a", "a"]);
  }

  fn chain<'a>(memo: &'a Memo<String, Result<u32, CycleError>>, key: String) -> BoxFuture<'a, Result<u32, CycleError>> {
    async move {
      let next = match key.as_str() {
        "a" => "b",
        "b" => "c",
        _ => "a",
      }
      .to_string();
      let from = key.clone();
      memo
        .get_or_compute(Some(&from), &next.clone(), || chain(memo, next))
        .await
        .and_then(|r| r)
    }
    .boxed()
  }

  #[tokio::test]
  async fn transitive_cycle_is_detected_instead_of_deadlocking() {
    let memo: Memo<String, Result<u32, CycleError>> = Memo::new();
    let key = "a".to_string();
    let result = tokio::time::timeout(
      Duration::from_secs(5),
      memo.get_or_compute(None, &key, || chain(&memo, "a".to_string())),
    )
    .await
    .expect("cycle must not deadlock")
    .unwrap();

    let err = result.unwrap_err();
    assert_eq!(err.path.first().map(String::as_str), Some("c"));
    assert!(err.path.contains(&"a".to_string()));
  }

  #[tokio::test]
  async fn forget_allows_recompute() {
    let memo: Memo<String, u32> = Memo::new();
    let key = "a".to_string();
    memo.get_or_compute(None, &key, || async { 1 }).await.unwrap();
    assert_eq!(memo.peek(&key), Some(1));
    assert!(memo.forget(&key));
    let v = memo.get_or_compute(None, &key, || async { 2 }).await.unwrap();
    assert_eq!(v, 2);
    assert_eq!(memo.computed(), 2);

    memo.get_or_compute(None, &"ab".to_string(), || async { 3 }).await.unwrap();
    let mut gone = memo.forget_where(|k| k.starts_with('a'));
    gone.sort();
    assert_eq!(gone, vec!["a".to_string(), "ab".to_string()]);
    assert_eq!(memo.peek(&key), None);
  }
}
