//! Bounded worker pool for executing work items.
//!
//! Plain OS threads over a shared queue. Each item spends nearly all of its
//! time blocked on subprocesses (git, the agent, the test command), so a
//! thread per parallel slot is the right shape; there is nothing to gain
//! from an async runtime here.
//!
//! Interruption is cooperative: workers check the flag between items, so an
//! in-flight item always runs to completion and is recorded before the pool
//! drains. Combined with resume, Ctrl-C therefore never wastes finished
//! work.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Mutex};

use tracing::{debug, info};

use crate::results::{TaskResult, WorkItem};

#[derive(Debug)]
pub struct ScheduleOutcome {
    pub results: Vec<TaskResult>,
    /// `true` when the interrupt flag stopped the pool before the queue
    /// drained.
    pub interrupted: bool,
}

/// Run `items` on up to `parallel` worker threads.
///
/// `run` executes one item and must always produce a result; `on_result` is
/// invoked on the calling thread as each result arrives (completion order),
/// which is where persistence hooks in.
pub fn run_pool<R>(
    items: Vec<WorkItem>,
    parallel: usize,
    interrupt: &AtomicBool,
    run: R,
    mut on_result: impl FnMut(&TaskResult),
) -> ScheduleOutcome
where
    R: Fn(&WorkItem) -> TaskResult + Sync,
{
    let total = items.len();
    let workers = parallel.clamp(1, total.max(1));
    let queue: Mutex<VecDeque<WorkItem>> = Mutex::new(items.into());
    let (tx, rx) = mpsc::channel::<TaskResult>();

    info!(total, workers, "starting worker pool");

    let mut results = Vec::with_capacity(total);
    std::thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let queue = &queue;
            let run = &run;
            scope.spawn(move || loop {
                if interrupt.load(Ordering::SeqCst) {
                    break;
                }
                let item = {
                    let mut q = queue
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    q.pop_front()
                };
                let Some(item) = item else { break };
                debug!(
                    task = %item.task.id,
                    condition = %item.condition,
                    rep = item.rep_index,
                    "picked up work item"
                );
                let result = run(&item);
                if tx.send(result).is_err() {
                    break;
                }
            });
        }
        // Workers hold clones; dropping ours lets rx end when they finish.
        drop(tx);

        for result in rx {
            on_result(&result);
            results.push(result);
        }
    });

    let leftover = queue
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .len();
    let interrupted = interrupt.load(Ordering::SeqCst) && leftover > 0;
    if interrupted {
        info!(completed = results.len(), skipped = leftover, "pool interrupted");
    }

    ScheduleOutcome {
        results,
        interrupted,
    }
}
