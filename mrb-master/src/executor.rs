//! A single background worker for housekeeping chores. Tasks run strictly
//! one at a time on a dedicated tokio task, so the garbage-collection and
//! persistence loops never overlap. Loops reschedule themselves by handing
//! the executor a fresh task from inside the running one.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

enum Command {
    RunAt(Instant, Task),
    Stop,
}

struct Scheduled {
    at: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Inverted so the binary heap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Clone)]
pub struct DelayedTaskExecutor {
    tx: mpsc::UnboundedSender<Command>,
}

impl DelayedTaskExecutor {
    /// Starts the worker. The returned handle completes once [`stop`] has
    /// been called (or every executor clone dropped) and the task that was
    /// running at that point has finished.
    ///
    /// [`stop`]: DelayedTaskExecutor::stop
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(rx));
        (Self { tx }, handle)
    }

    /// Queue a task to run as soon as the worker is free.
    pub fn add_task<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let _ = self
            .tx
            .send(Command::RunAt(Instant::now(), Box::pin(task)));
    }

    /// Queue a task to run once `delay` has elapsed.
    pub fn delay_task<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let _ = self
            .tx
            .send(Command::RunAt(Instant::now() + delay, Box::pin(task)));
    }

    /// Ask the worker to wind down. Pending tasks are discarded; the task
    /// currently running finishes first.
    pub fn stop(&self) {
        let _ = self.tx.send(Command::Stop);
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut heap: BinaryHeap<Scheduled> = BinaryHeap::new();
    let mut seq = 0u64;
    loop {
        let next_at = heap.peek().map(|scheduled| scheduled.at);
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(Command::RunAt(at, task)) => {
                    heap.push(Scheduled { at, seq, task });
                    seq += 1;
                }
                Some(Command::Stop) | None => break,
            },
            _ = due(next_at) => {
                if let Some(scheduled) = heap.pop() {
                    scheduled.task.await;
                }
            }
        }
    }
}

async fn due(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
