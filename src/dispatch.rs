//! Rank-local work dispatch.
//!
//! After a rank receives its shard from a scatter it may fan the shard out
//! over a local worker pool before contributing the results to a gather.
//! The pool is private to the rank; nothing here talks to other ranks.

use crate::comm::Communicator;
use crate::config::Config;
use crate::error::{Error, Result};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A process-local task runner.
///
/// `run_local` must return exactly one output per input, in input order.
pub trait LocalDispatcher {
    /// Apply `f` to every item.
    fn run_local<I, O, F>(&self, items: Vec<I>, f: F) -> Result<Vec<O>>
    where
        I: Send,
        O: Send,
        F: Fn(I) -> O + Sync + Send;
}

/// Runs items one after another on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialDispatcher;

impl LocalDispatcher for SerialDispatcher {
    fn run_local<I, O, F>(&self, items: Vec<I>, f: F) -> Result<Vec<O>>
    where
        I: Send,
        O: Send,
        F: Fn(I) -> O + Sync + Send,
    {
        Ok(items.into_iter().map(f).collect())
    }
}

/// Runs items on a rayon pool owned by this dispatcher.
///
/// Each rank builds its own pool, so ranks sharing a host never contend for
/// one global pool.
pub struct RayonDispatcher {
    pool: ThreadPool,
}

impl RayonDispatcher {
    /// Pool with `threads` workers, or rayon's default when `None`.
    pub fn new(threads: Option<usize>) -> Result<Self> {
        let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("local-worker-{i}"));
        if let Some(threads) = threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|e| Error::LocalPool(e.to_string()))?;
        log::debug!("local pool ready with {} threads", pool.current_num_threads());
        Ok(RayonDispatcher { pool })
    }

    /// Pool sized by [`Config::local_threads`].
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.local_threads)
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl LocalDispatcher for RayonDispatcher {
    fn run_local<I, O, F>(&self, items: Vec<I>, f: F) -> Result<Vec<O>>
    where
        I: Send,
        O: Send,
        F: Fn(I) -> O + Sync + Send,
    {
        Ok(self
            .pool
            .install(|| items.into_par_iter().map(&f).collect()))
    }
}

impl std::fmt::Debug for RayonDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RayonDispatcher")
            .field("threads", &self.threads())
            .finish()
    }
}

impl Communicator<'_> {
    /// Scatter one shard per rank, map it locally, gather the results at root.
    ///
    /// Root supplies `size` shards; each rank runs `f` over the elements of
    /// its shard through `dispatcher`. Root gets the mapped shards back in
    /// rank order, each the same length as the shard it came from. Other
    /// ranks get `None`.
    pub fn map_shards<I, O, F, D>(
        &self,
        shards: Option<Vec<Vec<I>>>,
        dispatcher: &D,
        f: F,
        root: i32,
    ) -> Result<Option<Vec<Vec<O>>>>
    where
        I: Serialize + DeserializeOwned + Send,
        O: Serialize + DeserializeOwned + Send,
        F: Fn(I) -> O + Sync + Send,
        D: LocalDispatcher,
    {
        let shard: Vec<I> = self.scatter_value(shards, root)?;
        let len = shard.len();
        let mapped = dispatcher.run_local(shard, f)?;
        if mapped.len() != len {
            return Err(Error::BufferSizeMismatch {
                op: "map_shards",
                expected: len,
                actual: mapped.len(),
            });
        }
        log::debug!("rank {}: mapped {len} items", self.rank());
        self.gather_value(mapped, root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_keeps_order() {
        let out = SerialDispatcher
            .run_local(vec![1, 2, 3], |x| x * 10)
            .unwrap();
        assert_eq!(out, vec![10, 20, 30]);
    }

    #[test]
    fn rayon_keeps_order_and_count() {
        let dispatcher = RayonDispatcher::new(Some(3)).unwrap();
        assert_eq!(dispatcher.threads(), 3);
        let items: Vec<u64> = (0..1000).collect();
        let out = dispatcher.run_local(items, |x| x * x).unwrap();
        assert_eq!(out.len(), 1000);
        assert!(out.iter().enumerate().all(|(i, &v)| v == (i * i) as u64));
    }

    #[test]
    fn pool_size_follows_config() {
        let config = Config {
            local_threads: Some(2),
            ..Config::default()
        };
        assert_eq!(RayonDispatcher::from_config(&config).unwrap().threads(), 2);
    }

    #[test]
    fn empty_input_gives_empty_output() {
        let dispatcher = RayonDispatcher::new(Some(1)).unwrap();
        let out: Vec<i32> = dispatcher.run_local(Vec::<i32>::new(), |x| x).unwrap();
        assert!(out.is_empty());
    }
}
