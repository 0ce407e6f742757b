//! In-process substrate: every rank is a thread, every endpoint a mailbox.
//!
//! [`LocalUniverse`] wires up `n` endpoints that share nothing but their
//! mailboxes. [`run`] is the launcher: it plays the role `mpiexec -n N` plays
//! for an MPI program, starting one thread per rank and binding a
//! [`Group`](crate::Group) on each.

use crate::comm::Communicator;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::transport::{Context, Message, Transport};
use crate::Group;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

const NOT_ABORTED: i32 = -1;

type MatchKey = (i32, Context, i32);

#[derive(Default)]
struct Mailbox {
    queues: Mutex<HashMap<MatchKey, VecDeque<Vec<u8>>>>,
    arrived: Condvar,
    closed: AtomicBool,
}

struct Fabric {
    mailboxes: Vec<Mailbox>,
    claimed: Vec<AtomicBool>,
    aborted_by: AtomicI32,
}

impl Fabric {
    fn aborted(&self) -> Option<i32> {
        match self.aborted_by.load(Ordering::SeqCst) {
            NOT_ABORTED => None,
            rank => Some(rank),
        }
    }

    fn abort(&self, rank: i32) {
        if self
            .aborted_by
            .compare_exchange(NOT_ABORTED, rank, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        log::warn!("local fabric aborted by rank {rank}");
        for mailbox in &self.mailboxes {
            // Taking the lock orders the flag store before any waiter re-checks it.
            let _queues = mailbox.queues.lock();
            mailbox.arrived.notify_all();
        }
    }
}

/// A fixed-size set of in-process endpoints.
#[derive(Clone)]
pub struct LocalUniverse {
    fabric: Arc<Fabric>,
}

impl LocalUniverse {
    /// Create a fabric with `size` ranks.
    pub fn new(size: usize) -> Self {
        LocalUniverse {
            fabric: Arc::new(Fabric {
                mailboxes: (0..size).map(|_| Mailbox::default()).collect(),
                claimed: (0..size).map(|_| AtomicBool::new(false)).collect(),
                aborted_by: AtomicI32::new(NOT_ABORTED),
            }),
        }
    }

    /// Number of ranks.
    pub fn size(&self) -> usize {
        self.fabric.mailboxes.len()
    }

    /// Hand out the endpoint for `rank`. Each endpoint can be taken once.
    pub fn endpoint(&self, rank: i32) -> Result<LocalTransport> {
        let size = self.size() as i32;
        let slot = usize::try_from(rank)
            .ok()
            .and_then(|r| self.fabric.claimed.get(r))
            .ok_or(Error::UnreachableRank {
                op: "endpoint",
                caller: rank,
                rank,
                size,
            })?;
        if slot.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyInitialized(rank));
        }
        Ok(LocalTransport {
            fabric: Arc::clone(&self.fabric),
            rank,
        })
    }

    /// Wake every blocked receive with [`Error::Aborted`].
    pub fn abort(&self, rank: i32) {
        self.fabric.abort(rank);
    }

    /// Rank that aborted the fabric, if any.
    pub fn aborted_by(&self) -> Option<i32> {
        self.fabric.aborted()
    }
}

/// One rank's endpoint in a [`LocalUniverse`].
pub struct LocalTransport {
    fabric: Arc<Fabric>,
    rank: i32,
}

impl LocalTransport {
    fn mailbox(&self, rank: i32) -> Option<&Mailbox> {
        usize::try_from(rank)
            .ok()
            .and_then(|r| self.fabric.mailboxes.get(r))
    }

    fn own_mailbox(&self) -> &Mailbox {
        &self.fabric.mailboxes[self.rank as usize]
    }

    fn check_aborted(&self) -> Result<()> {
        match self.fabric.aborted() {
            Some(rank) => Err(Error::Aborted { rank }),
            None => Ok(()),
        }
    }
}

impl Transport for LocalTransport {
    fn rank(&self) -> i32 {
        self.rank
    }

    fn size(&self) -> i32 {
        self.fabric.mailboxes.len() as i32
    }

    fn send(&self, message: Message) -> Result<()> {
        self.check_aborted()?;
        let envelope = message.envelope;
        let mailbox = self.mailbox(envelope.dest).ok_or(Error::UnreachableRank {
            op: "transport send",
            caller: self.rank,
            rank: envelope.dest,
            size: self.size(),
        })?;
        if mailbox.closed.load(Ordering::SeqCst) {
            return Err(Error::Transport(format!(
                "rank {} has released its endpoint",
                envelope.dest
            )));
        }
        let key = (envelope.source, envelope.context, envelope.tag);
        let mut queues = mailbox.queues.lock();
        queues.entry(key).or_default().push_back(message.frame);
        mailbox.arrived.notify_all();
        Ok(())
    }

    fn recv(&self, source: i32, context: Context, tag: i32) -> Result<Vec<u8>> {
        let mailbox = self.own_mailbox();
        let key = (source, context, tag);
        let mut queues = mailbox.queues.lock();
        loop {
            if let Some(frame) = take(&mut queues, &key) {
                return Ok(frame);
            }
            self.check_aborted()?;
            mailbox.arrived.wait(&mut queues);
        }
    }

    fn try_recv(&self, source: i32, context: Context, tag: i32) -> Result<Option<Vec<u8>>> {
        let mut queues = self.own_mailbox().queues.lock();
        match take(&mut queues, &(source, context, tag)) {
            Some(frame) => Ok(Some(frame)),
            None => {
                self.check_aborted()?;
                Ok(None)
            }
        }
    }

    fn finalize(&self) -> Result<()> {
        let mailbox = self.own_mailbox();
        mailbox.closed.store(true, Ordering::SeqCst);
        let pending: usize = mailbox.queues.lock().values().map(VecDeque::len).sum();
        if pending > 0 {
            log::warn!("rank {}: releasing endpoint with {pending} undelivered messages", self.rank);
        }
        Ok(())
    }
}

fn take(queues: &mut HashMap<MatchKey, VecDeque<Vec<u8>>>, key: &MatchKey) -> Option<Vec<u8>> {
    let queue = queues.get_mut(key)?;
    let frame = queue.pop_front();
    if queue.is_empty() {
        queues.remove(key);
    }
    frame
}

/// Aborts the fabric if the owning rank unwinds.
struct AbortOnUnwind {
    universe: LocalUniverse,
    rank: i32,
}

impl Drop for AbortOnUnwind {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.universe.abort(self.rank);
        }
    }
}

/// Run `f` on `size` ranks, one thread each, and collect results by rank.
///
/// Every rank binds a [`Group`] with `Config::from_env()`, calls `f` with its
/// world communicator and then finalizes unless `f` already did. If one rank
/// fails, the fabric is aborted so the others stop waiting; the first failure
/// that is not merely a consequence of the abort is returned. A panicking
/// rank re-panics here.
///
/// ```
/// let ranks = ferrogroup::local::run(3, |world| Ok(world.rank())).unwrap();
/// assert_eq!(ranks, vec![0, 1, 2]);
/// ```
pub fn run<R, F>(size: usize, f: F) -> Result<Vec<R>>
where
    R: Send,
    F: Fn(&Communicator<'_>) -> Result<R> + Sync,
{
    run_with_config(size, Config::from_env(), f)
}

/// [`run`] with an explicit configuration.
pub fn run_with_config<R, F>(size: usize, config: Config, f: F) -> Result<Vec<R>>
where
    R: Send,
    F: Fn(&Communicator<'_>) -> Result<R> + Sync,
{
    let universe = LocalUniverse::new(size);
    let outcomes: Vec<std::thread::Result<Result<R>>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..size as i32)
            .map(|rank| {
                let universe = universe.clone();
                let config = config.clone();
                let f = &f;
                std::thread::Builder::new()
                    .name(format!("rank-{rank}"))
                    .spawn_scoped(scope, move || {
                        let _guard = AbortOnUnwind {
                            universe: universe.clone(),
                            rank,
                        };
                        let outcome = run_rank(&universe, rank, config, f);
                        if outcome.is_err() {
                            // Init failures never reach the group-level abort.
                            universe.abort(rank);
                        }
                        outcome
                    })
                    .map_err(|e| Error::Transport(format!("spawning rank {rank}: {e}")))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle {
                Ok(handle) => handle.join(),
                Err(err) => Ok(Err(err)),
            })
            .collect()
    });

    let mut results = Vec::with_capacity(size);
    let mut first_error: Option<Error> = None;
    for outcome in outcomes {
        match outcome {
            Err(panic) => std::panic::resume_unwind(panic),
            Ok(Ok(value)) => results.push(value),
            Ok(Err(err)) => {
                let replace = match &first_error {
                    None => true,
                    Some(current) => current.is_secondary() && !err.is_secondary(),
                };
                if replace {
                    first_error = Some(err);
                }
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(results),
    }
}

fn run_rank<R, F>(universe: &LocalUniverse, rank: i32, config: Config, f: &F) -> Result<R>
where
    F: Fn(&Communicator<'_>) -> Result<R>,
{
    let group = Group::init_with_config(universe.endpoint(rank)?, config)?;
    let outcome = f(&group.world()).and_then(|value| {
        if !group.is_finalized() {
            group.finalize()?;
        }
        Ok(value)
    });
    // Abort before `group` drops and releases the endpoint, so peers see
    // `Aborted` rather than a closed mailbox.
    if outcome.is_err() {
        universe.abort(rank);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Envelope;

    fn message(source: i32, dest: i32, tag: i32, frame: Vec<u8>) -> Message {
        Message {
            envelope: Envelope {
                source,
                dest,
                context: Context::PointToPoint,
                tag,
            },
            frame,
        }
    }

    #[test]
    fn endpoints_are_handed_out_once() {
        let universe = LocalUniverse::new(2);
        assert!(universe.endpoint(0).is_ok());
        assert!(matches!(
            universe.endpoint(0),
            Err(Error::AlreadyInitialized(0))
        ));
        assert!(matches!(
            universe.endpoint(2),
            Err(Error::UnreachableRank { rank: 2, .. })
        ));
        assert!(universe.endpoint(-1).is_err());
    }

    #[test]
    fn fifo_per_match_key() {
        let universe = LocalUniverse::new(2);
        let a = universe.endpoint(0).unwrap();
        let b = universe.endpoint(1).unwrap();
        for i in 0..5u8 {
            a.send(message(0, 1, 3, vec![i])).unwrap();
        }
        a.send(message(0, 1, 4, vec![99])).unwrap();
        assert_eq!(b.recv(0, Context::PointToPoint, 4).unwrap(), vec![99]);
        for i in 0..5u8 {
            assert_eq!(b.recv(0, Context::PointToPoint, 3).unwrap(), vec![i]);
        }
        assert_eq!(b.try_recv(0, Context::PointToPoint, 3).unwrap(), None);
    }

    #[test]
    fn contexts_do_not_mix() {
        let universe = LocalUniverse::new(2);
        let a = universe.endpoint(0).unwrap();
        let b = universe.endpoint(1).unwrap();
        a.send(message(0, 1, 0, vec![1])).unwrap();
        assert_eq!(b.try_recv(0, Context::Collective, 0).unwrap(), None);
        assert_eq!(
            b.try_recv(0, Context::PointToPoint, 0).unwrap(),
            Some(vec![1])
        );
    }

    #[test]
    fn blocked_recv_wakes_on_abort() {
        let universe = LocalUniverse::new(2);
        let b = universe.endpoint(1).unwrap();
        let waiter = std::thread::spawn(move || b.recv(0, Context::PointToPoint, 0));
        std::thread::sleep(std::time::Duration::from_millis(20));
        universe.abort(0);
        let err = waiter.join().unwrap().unwrap_err();
        assert!(matches!(err, Error::Aborted { rank: 0 }));
        assert_eq!(universe.aborted_by(), Some(0));
    }

    #[test]
    fn released_endpoint_refuses_traffic() {
        let universe = LocalUniverse::new(2);
        let a = universe.endpoint(0).unwrap();
        let b = universe.endpoint(1).unwrap();
        b.finalize().unwrap();
        assert!(matches!(
            a.send(message(0, 1, 0, vec![])),
            Err(Error::Transport(_))
        ));
    }

    #[test]
    fn run_reports_root_cause_over_aborts() {
        let err = run(3, |world| {
            if world.rank() == 2 {
                return Err(Error::GroupFinalized);
            }
            world.barrier()?;
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, Error::GroupFinalized));
    }
}
