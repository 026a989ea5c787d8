// eval/job.rs - Dependency handles for kernels scheduled on rayon
//
// A `JobHandle` stands for scheduled work that is not yet known to be
// complete. Scheduling work "after" a handle registers a continuation on it;
// when the handle completes, the continuation spawns the work onto the rayon
// pool. Pool threads therefore never block waiting on a dependency: a job is
// only spawned once everything it reads has been written.
//
// Combining N handles yields one handle that completes when all N have. The
// only blocking call is `wait`, which the caller uses once at the end of a
// pass.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

type Continuation = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct JobState {
    complete: bool,
    continuations: Vec<Continuation>,
}

#[derive(Default)]
struct JobInner {
    state: Mutex<JobState>,
    done: Condvar,
}

#[derive(Clone)]
pub struct JobHandle {
    inner: Arc<JobInner>,
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl Default for JobHandle {
    fn default() -> Self {
        Self::completed()
    }
}

impl JobHandle {
    /// A handle with nothing left to wait for.
    pub fn completed() -> Self {
        let handle = Self::pending();
        handle.lock().complete = true;
        handle
    }

    fn pending() -> Self {
        Self {
            inner: Arc::new(JobInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_complete(&self) -> bool {
        self.lock().complete
    }

    /// Block the calling thread until the work behind this handle is done.
    ///
    /// On a rayon worker thread this runs other pool work while waiting
    /// instead of parking, so a pass can be evaluated from inside the pool.
    pub fn wait(&self) {
        if rayon::current_thread_index().is_some() {
            while !self.is_complete() {
                if rayon::yield_now() != Some(rayon::Yield::Executed) {
                    std::thread::yield_now();
                }
            }
            return;
        }

        let mut state = self.lock();
        while !state.complete {
            state = self
                .inner
                .done
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Run `f` once this handle completes (immediately if it already has).
    fn when_complete(&self, f: impl FnOnce() + Send + 'static) {
        let mut state = self.lock();
        if state.complete {
            drop(state);
            f();
        } else {
            state.continuations.push(Box::new(f));
        }
    }

    fn mark_complete(&self) {
        let continuations = {
            let mut state = self.lock();
            state.complete = true;
            std::mem::take(&mut state.continuations)
        };
        self.inner.done.notify_all();
        for continuation in continuations {
            continuation();
        }
    }

    /// One handle meaning "all of these are complete".
    pub fn combine(handles: impl IntoIterator<Item = JobHandle>) -> JobHandle {
        let mut pending: Vec<JobHandle> = handles
            .into_iter()
            .filter(|h| !h.is_complete())
            .collect();

        match pending.len() {
            0 => JobHandle::completed(),
            1 => pending.swap_remove(0),
            n => {
                let joined = JobHandle::pending();
                let remaining = Arc::new(AtomicUsize::new(n));
                for handle in &pending {
                    let joined = joined.clone();
                    let remaining = Arc::clone(&remaining);
                    handle.when_complete(move || {
                        if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                            joined.mark_complete();
                        }
                    });
                }
                joined
            }
        }
    }

    /// Run `work` on the rayon pool once `after` completes.
    ///
    /// The returned handle completes when `work` returns.
    pub fn schedule<F>(after: &JobHandle, work: F) -> JobHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = JobHandle::pending();
        let finished = handle.clone();
        after.when_complete(move || {
            rayon::spawn(move || {
                work();
                finished.mark_complete();
            });
        });
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn completed_handle_does_not_block() {
        let h = JobHandle::completed();
        assert!(h.is_complete());
        h.wait();
    }

    #[test]
    fn scheduled_work_runs_after_dependency() {
        let order = Arc::new(Mutex::new(Vec::new()));

        let gate = JobHandle::pending();
        let o = Arc::clone(&order);
        let first = JobHandle::schedule(&gate, move || o.lock().unwrap().push("first"));
        let o = Arc::clone(&order);
        let second = JobHandle::schedule(&first, move || o.lock().unwrap().push("second"));

        assert!(!second.is_complete());
        assert!(order.lock().unwrap().is_empty());

        gate.mark_complete();
        second.wait();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn combine_waits_for_every_input() {
        let a = JobHandle::pending();
        let b = JobHandle::pending();
        let joined = JobHandle::combine([a.clone(), b.clone(), JobHandle::completed()]);

        a.mark_complete();
        assert!(!joined.is_complete());
        b.mark_complete();
        assert!(joined.is_complete());
    }

    #[test]
    fn combine_of_nothing_is_complete() {
        assert!(JobHandle::combine(Vec::new()).is_complete());
    }

    #[test]
    fn fan_in_of_many_jobs() {
        let (tx, rx) = mpsc::channel();
        let handles: Vec<JobHandle> = (0..32)
            .map(|i| {
                let tx = tx.clone();
                JobHandle::schedule(&JobHandle::completed(), move || {
                    tx.send(i).unwrap();
                })
            })
            .collect();
        let joined = JobHandle::combine(handles);
        joined.wait();
        drop(tx);
        let mut seen: Vec<i32> = rx.iter().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..32).collect::<Vec<_>>());
    }
}
