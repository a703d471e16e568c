//! Cooperative, single-threaded task spawning
//!
//! A bucket never blocks. Anything that has to wait on a provider (an
//! initialize fetch, a write acknowledgment, a remote update stream) is
//! handed to a [`Spawner`] owned by the surrounding event loop.
//!
//! [`spawn_eager`] polls the task once in place before handing it over, so
//! work that is already complete (synchronous providers, buffered pushes)
//! takes effect before the call that started it returns.

use std::future::Future;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::future::{FutureExt, LocalFutureObj};
use futures::task::{noop_waker_ref, LocalSpawn, LocalSpawnExt, SpawnError};

/// Handle to the local executor that drives a bucket's provider work
pub type Spawner = Rc<dyn LocalSpawn>;

/// Poll `task` once on the current stack, then spawn whatever remains
pub fn spawn_eager<F>(spawner: &dyn LocalSpawn, task: F)
where
    F: Future<Output = ()> + 'static,
{
    let mut task = task.boxed_local();
    let mut cx = Context::from_waker(noop_waker_ref());
    if let Poll::Ready(()) = task.as_mut().poll(&mut cx) {
        return;
    }
    // the executor polls new tasks right away, which replaces the noop waker
    if let Err(e) = spawner.spawn_local(task) {
        tracing::error!("failed to spawn signal bucket task: {}", e);
    }
}

/// [`LocalSpawn`] adapter over [`tokio::task::spawn_local`].
///
/// Must be used from within a [`tokio::task::LocalSet`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLocalSpawner;

impl TokioLocalSpawner {
    pub fn new() -> Self {
        Self
    }

    pub fn shared() -> Spawner {
        Rc::new(Self)
    }
}

impl LocalSpawn for TokioLocalSpawner {
    fn spawn_local_obj(&self, future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
        tokio::task::spawn_local(future);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use futures::channel::oneshot;
    use futures::executor::LocalPool;

    use super::*;

    #[test]
    fn test_ready_task_runs_in_place() {
        let pool = LocalPool::new();
        let ran = Rc::new(Cell::new(false));

        let flag = ran.clone();
        spawn_eager(&pool.spawner(), async move { flag.set(true) });

        // never ran the pool
        assert!(ran.get());
    }

    #[test]
    fn test_pending_task_is_handed_to_spawner() {
        let mut pool = LocalPool::new();
        let (tx, rx) = oneshot::channel::<u32>();
        let received = Rc::new(Cell::new(None));

        let slot = received.clone();
        spawn_eager(&pool.spawner(), async move {
            slot.set(rx.await.ok());
        });
        assert_eq!(received.get(), None);

        tx.send(7).unwrap();
        pool.run_until_stalled();
        assert_eq!(received.get(), Some(7));
    }
}
