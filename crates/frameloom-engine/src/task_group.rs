use std::future::Future;

use anyhow::{Error, Result};
use futures::future::join_all;

/// Fan-out / settle-all primitive for batch generation.
///
/// Every future is registered before any is awaited, so the batch's
/// network round trips overlap; [`TaskGroup::join_settled`] resolves only
/// once every member has succeeded or failed, and a failure never cancels
/// its siblings. Outcomes keep launch order whatever order members finish in.
pub struct TaskGroup<K, F> {
    keys: Vec<K>,
    futures: Vec<F>,
}

impl<K, F> Default for TaskGroup<K, F> {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            futures: Vec::new(),
        }
    }
}

impl<K, F, T> TaskGroup<K, F>
where
    F: Future<Output = Result<T>>,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, key: K, future: F) {
        self.keys.push(key);
        self.futures.push(future);
    }

    pub fn len(&self) -> usize {
        self.futures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.futures.is_empty()
    }

    pub async fn join_settled(self) -> Settled<K, T> {
        let results = join_all(self.futures).await;
        Settled {
            outcomes: self.keys.into_iter().zip(results).collect(),
        }
    }
}

#[derive(Debug)]
pub struct Settled<K, T> {
    outcomes: Vec<(K, Result<T>)>,
}

impl<K, T> Settled<K, T> {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn successes(&self) -> impl Iterator<Item = (&K, &T)> {
        self.outcomes
            .iter()
            .filter_map(|(key, result)| result.as_ref().ok().map(|value| (key, value)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&K, &Error)> {
        self.outcomes
            .iter()
            .filter_map(|(key, result)| result.as_ref().err().map(|err| (key, err)))
    }

    pub fn succeeded(&self) -> usize {
        self.successes().count()
    }

    pub fn failed(&self) -> usize {
        self.failures().count()
    }

    pub fn any_failed(&self) -> bool {
        self.failed() > 0
    }

    pub fn all_failed(&self) -> bool {
        !self.is_empty() && self.succeeded() == 0
    }

    pub fn into_parts(self) -> (Vec<(K, T)>, Vec<(K, Error)>) {
        let mut ok = Vec::new();
        let mut failed = Vec::new();
        for (key, result) in self.outcomes {
            match result {
                Ok(value) => ok.push((key, value)),
                Err(err) => failed.push((key, err)),
            }
        }
        (ok, failed)
    }
}
