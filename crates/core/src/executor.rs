//! Execution contexts for session and client control work.
//!
//! Sessions and the push client never spawn hidden background workers.
//! The caller hands them an [`Executor`] and every asynchronous
//! configure/start/stop, bitrate poll, keep-alive or reconnect attempt is
//! queued on it. A single [`WorkerExecutor`] runs jobs one at a time, in
//! submission order, so overlapping requests never race.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;

/// A unit of queued work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs jobs now or later.
pub trait Executor: Send + Sync {
    /// Queue a job to run as soon as possible.
    fn execute(&self, job: Job);

    /// Queue a job to run once `delay` has elapsed.
    fn execute_after(&self, delay: Duration, job: Job);
}

enum Command {
    Run(Job),
    RunAt(Instant, Job),
}

struct Scheduled {
    deadline: Instant,
    order: u64,
    job: Job,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.order == other.order
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // BinaryHeap is a max-heap; reverse so the earliest deadline pops first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// A dedicated thread that runs jobs sequentially.
///
/// Dropping the executor stops the thread once the queue drains; delayed
/// jobs that have not come due are discarded.
pub struct WorkerExecutor {
    tx: Mutex<Option<Sender<Command>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl WorkerExecutor {
    /// Spawn the worker thread. `name` shows up in debuggers and panics.
    pub fn new(name: &str) -> std::io::Result<Self> {
        let (tx, rx) = unbounded();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_worker(rx))?;
        let thread_id = handle.thread().id();
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
            thread_id,
        })
    }

    fn send(&self, command: Command) {
        if let Some(tx) = self.tx.lock().as_ref()
            && tx.send(command).is_err()
        {
            tracing::warn!("executor worker gone, job dropped");
        }
    }

    /// Stop accepting jobs and wait for the worker to exit.
    ///
    /// A no-op when called from a job running on this executor.
    pub fn shutdown(&self) {
        self.tx.lock().take();
        if thread::current().id() == self.thread_id {
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Executor for WorkerExecutor {
    fn execute(&self, job: Job) {
        self.send(Command::Run(job));
    }

    fn execute_after(&self, delay: Duration, job: Job) {
        self.send(Command::RunAt(Instant::now() + delay, job));
    }
}

impl Drop for WorkerExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(rx: Receiver<Command>) {
    let mut timers: BinaryHeap<Scheduled> = BinaryHeap::new();
    let mut order = 0u64;

    loop {
        let now = Instant::now();
        while timers.peek().is_some_and(|t| t.deadline <= now) {
            if let Some(due) = timers.pop() {
                (due.job)();
            }
        }

        let command = match timers.peek() {
            Some(next) => match rx.recv_timeout(next.deadline.saturating_duration_since(now)) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        match command {
            Command::Run(job) => job(),
            Command::RunAt(deadline, job) => {
                order += 1;
                timers.push(Scheduled {
                    deadline,
                    order,
                    job,
                });
            }
        }
    }
    tracing::trace!(pending = timers.len(), "executor worker exited");
}

/// Runs jobs on the calling thread.
///
/// Delayed jobs are parked until [`run_delayed`](Self::run_delayed) is
/// called, which makes timer-driven behaviour deterministic in tests.
#[derive(Default)]
pub struct InlineExecutor {
    delayed: Mutex<Vec<(Duration, Job)>>,
}

impl InlineExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of delayed jobs waiting to run.
    pub fn pending(&self) -> usize {
        self.delayed.lock().len()
    }

    /// Run every parked delayed job once. Jobs they schedule are parked
    /// again. Returns how many jobs ran.
    pub fn run_delayed(&self) -> usize {
        let jobs: Vec<_> = self.delayed.lock().drain(..).collect();
        let count = jobs.len();
        for (_, job) in jobs {
            job();
        }
        count
    }
}

impl Executor for InlineExecutor {
    fn execute(&self, job: Job) {
        job();
    }

    fn execute_after(&self, delay: Duration, job: Job) {
        self.delayed.lock().push((delay, job));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn worker_runs_jobs_in_order() {
        let exec = WorkerExecutor::new("test-exec").unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        for i in 0..5 {
            let tx = tx.clone();
            exec.execute(Box::new(move || tx.send(i).unwrap()));
        }
        let got: Vec<i32> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn worker_delays_jobs() {
        let exec = WorkerExecutor::new("test-exec").unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let started = Instant::now();
        let late = tx.clone();
        exec.execute_after(
            Duration::from_millis(100),
            Box::new(move || late.send("late").unwrap()),
        );
        exec.execute(Box::new(move || tx.send("now").unwrap()));

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "now");
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "late");
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn inline_parks_delayed_jobs() {
        let exec = Arc::new(InlineExecutor::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        exec.execute(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let h = hits.clone();
        exec.execute_after(
            Duration::from_secs(60),
            Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(exec.pending(), 1);
        assert_eq!(exec.run_delayed(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
