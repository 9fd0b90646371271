//! Parallel, order-preserving chunk pipeline
//!
//! One producer (the calling thread) reads chunks from a [`ChunkSource`] and
//! tags each with a monotonically increasing index. A fixed pool of worker
//! threads transforms tickets concurrently and a single collector thread
//! restores index order before handing blocks to the [`ResultSink`]:
//!
//! ```text
//!   source ──► inbound ──► worker 0..N ──► outbound ──► collector ──► sink
//!  (caller)    (MPMC)                      (MPMC)     (reorder buffer)
//! ```
//!
//! Shutdown ordering matters: the "no more input" signal (raising the flag and
//! dropping the inbound sender) is only given after the producer has finished
//! *and* the inbound queue has drained, so no worker can observe end of input
//! while a ticket is still queued. Workers then exit, which disconnects the
//! outbound queue and lets the collector finish. Every wait on the calling
//! thread is bounded by one operation-wide deadline.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};

use crate::config::PipelineConfig;
use crate::error::{SplitgzError, SplitgzResult};
use crate::logger::{Logger, TracingLogger};
use crate::sink::ResultSink;
use crate::source::ChunkSource;
use crate::transform::Transform;

/// A chunk tagged with its position in the original stream
#[derive(Debug)]
pub struct Ticket {
    pub index: u64,
    pub data: Vec<u8>,
}

/// What a worker hands to the collector
#[derive(Debug)]
enum Outcome {
    Done(Ticket),
    Failed { index: u64, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Draining,
    Finished,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Running => "running",
            PipelineState::Draining => "draining",
            PipelineState::Finished => "finished",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Statistics for one completed run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub chunks_read: u64,
    pub chunks_written: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// Errors recorded while producing input (see [`Pipeline::take_errors`])
    pub source_errors: usize,
    /// Manifest lines whose stored index disagreed with their position
    pub index_mismatches: u64,
    pub elapsed: Duration,
}

/// Flags shared by the producer, workers and collector. Both are one-way.
#[derive(Default)]
struct Shared {
    no_more_input: AtomicBool,
    abort: AtomicBool,
}

/// Sent when a worker thread exits, including by unwinding
struct WorkerExit {
    id: usize,
    panicked: bool,
}

struct ExitSignal {
    id: usize,
    done: Sender<WorkerExit>,
}

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let _ = self.done.send(WorkerExit {
            id: self.id,
            panicked: thread::panicking(),
        });
    }
}

struct CollectorSignal(Sender<()>);

impl Drop for CollectorSignal {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

pub struct Pipeline<S, T, K> {
    source: S,
    transform: Arc<T>,
    sink: Option<K>,
    config: PipelineConfig,
    logger: Arc<dyn Logger>,
    state: PipelineState,
    errors: Vec<SplitgzError>,
}

impl<S, T, K> Pipeline<S, T, K>
where
    S: ChunkSource,
    T: Transform + 'static,
    K: ResultSink + 'static,
{
    pub fn new(source: S, transform: T, sink: K, config: PipelineConfig) -> SplitgzResult<Self> {
        config.validate()?;

        Ok(Pipeline {
            source,
            transform: Arc::new(transform),
            sink: Some(sink),
            config,
            logger: Arc::new(TracingLogger),
            state: PipelineState::Idle,
            errors: Vec::new(),
        })
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    #[cfg(test)]
    pub fn errors(&self) -> &[SplitgzError] {
        &self.errors
    }

    /// Errors recorded while producing input. The caller decides whether
    /// any of them invalidate the output.
    pub fn take_errors(&mut self) -> Vec<SplitgzError> {
        std::mem::take(&mut self.errors)
    }

    /// The sink, once a run has returned it (or before any run)
    #[cfg(test)]
    pub fn into_sink(self) -> Option<K> {
        self.sink
    }

    /// Execute the operation. A pipeline runs exactly once.
    pub fn run(&mut self) -> SplitgzResult<RunReport> {
        if self.state != PipelineState::Idle {
            return Err(SplitgzError::invalid_operation(format!(
                "one instance per operation (pipeline is {})",
                self.state
            )));
        }

        self.state = PipelineState::Running;
        let result = self.execute();
        self.state = match &result {
            Ok(_) => PipelineState::Finished,
            Err(_) => PipelineState::Failed,
        };
        result
    }

    fn execute(&mut self) -> SplitgzResult<RunReport> {
        let started = Instant::now();
        let deadline = started.checked_add(self.config.timeout).ok_or_else(|| {
            SplitgzError::out_of_range(format!("timeout {:?} is too large", self.config.timeout))
        })?;
        let sink = self
            .sink
            .take()
            .ok_or_else(|| SplitgzError::invalid_operation("pipeline sink already consumed"))?;

        let (inbound_tx, inbound_rx) = unbounded::<Ticket>();
        let (outbound_tx, outbound_rx) = unbounded::<Outcome>();
        let (progress_tx, progress_rx) = unbounded::<()>();
        let (exit_tx, exit_rx) = unbounded::<WorkerExit>();
        let (collector_done_tx, collector_done_rx) = bounded::<()>(1);
        let shared = Arc::new(Shared::default());

        self.logger.log(&format!(
            "starting {} workers, timeout {:?}",
            self.config.workers, self.config.timeout
        ));

        let collector = self.start_collector(sink, outbound_rx, collector_done_tx, &shared)?;
        let workers = self.start_workers(
            inbound_rx,
            outbound_tx,
            progress_tx,
            exit_tx,
            &shared,
        );
        let workers = match workers {
            Ok(workers) => workers,
            Err(e) => {
                shared.abort.store(true, Ordering::Release);
                return Err(e);
            }
        };

        let (chunks_read, bytes_in) = self.fill_inbound(&inbound_tx, &shared);
        self.state = PipelineState::Draining;

        if let Err(e) = self.wait_inbound_drained(&inbound_tx, &progress_rx, deadline) {
            shared.abort.store(true, Ordering::Release);
            return Err(e);
        }
        drop(progress_rx);

        // From here on no new ticket can appear in the inbound queue
        self.signal_no_more_input(inbound_tx, &shared);

        self.wait_workers_finished(workers, &exit_rx, deadline, &shared)?;
        let finished = self.wait_collector_finished(collector, &collector_done_rx, deadline)?;

        self.sink = Some(finished.sink);
        if let Some(error) = finished.error {
            return Err(error);
        }

        if finished.written != chunks_read {
            return Err(SplitgzError::thread(format!(
                "read {} chunks but wrote {}",
                chunks_read, finished.written
            )));
        }

        let report = RunReport {
            chunks_read,
            chunks_written: finished.written,
            bytes_in,
            bytes_out: finished.bytes_out,
            source_errors: self.errors.len(),
            index_mismatches: self.source.index_mismatches(),
            elapsed: started.elapsed(),
        };
        self.logger.log(&format!(
            "finished: read {} wrote {} chunks, {} -> {} bytes in {:?}",
            report.chunks_read,
            report.chunks_written,
            report.bytes_in,
            report.bytes_out,
            report.elapsed
        ));
        Ok(report)
    }

    fn start_workers(
        &self,
        inbound: Receiver<Ticket>,
        outbound: Sender<Outcome>,
        progress: Sender<()>,
        exits: Sender<WorkerExit>,
        shared: &Arc<Shared>,
    ) -> SplitgzResult<Vec<JoinHandle<()>>> {
        let mut handles = Vec::with_capacity(self.config.workers);

        for id in 0..self.config.workers {
            let inbound = inbound.clone();
            let outbound = outbound.clone();
            let progress = progress.clone();
            let exits = exits.clone();
            let transform = Arc::clone(&self.transform);
            let shared = Arc::clone(shared);
            let logger = Arc::clone(&self.logger);

            let handle = thread::Builder::new()
                .name(format!("splitgz-worker-{}", id))
                .spawn(move || {
                    let _exit = ExitSignal { id, done: exits };
                    worker_loop(
                        id,
                        transform.as_ref(),
                        &inbound,
                        &outbound,
                        &progress,
                        &shared,
                        logger.as_ref(),
                    );
                })
                .map_err(|e| SplitgzError::thread(format!("failed to spawn worker {}: {}", id, e)))?;

            handles.push(handle);
        }

        Ok(handles)
    }

    fn start_collector(
        &self,
        sink: K,
        outbound: Receiver<Outcome>,
        done: Sender<()>,
        shared: &Arc<Shared>,
    ) -> SplitgzResult<JoinHandle<CollectorOutput<K>>> {
        let shared = Arc::clone(shared);
        let logger = Arc::clone(&self.logger);

        thread::Builder::new()
            .name("splitgz-collector".to_string())
            .spawn(move || {
                let _done = CollectorSignal(done);
                logger.log("collector started");

                let mut collector = Collector::new(sink, shared);
                while let Ok(outcome) = outbound.recv() {
                    collector.accept(outcome);
                }

                let finished = collector.finish();
                logger.log(&format!("collector finished after {} chunks", finished.written));
                finished
            })
            .map_err(|e| SplitgzError::thread(format!("failed to spawn collector: {}", e)))
    }

    /// Producer loop on the calling thread. Returns chunks and bytes queued.
    fn fill_inbound(&mut self, inbound: &Sender<Ticket>, shared: &Shared) -> (u64, u64) {
        let mut index = 0u64;
        let mut bytes = 0u64;
        let mut warned = false;

        loop {
            if shared.abort.load(Ordering::Acquire) {
                self.logger.log("pipeline aborted, no more input will be read");
                break;
            }

            match self.source.read_next() {
                Ok(Some(data)) => {
                    let len = data.len() as u64;
                    let queued = (inbound.len() as u64 + 1) * len;
                    if !warned && queued > self.config.max_memory_bytes {
                        tracing::warn!(
                            queued,
                            limit = self.config.max_memory_bytes,
                            "queued input exceeds the advisory memory ceiling"
                        );
                        self.logger.log(&format!(
                            "queued input of {} bytes exceeds the memory ceiling of {} bytes",
                            queued, self.config.max_memory_bytes
                        ));
                        warned = true;
                    }

                    if inbound.send(Ticket { index, data }).is_err() {
                        self.errors
                            .push(SplitgzError::thread("all workers exited early"));
                        break;
                    }
                    self.logger.log(&format!("queued chunk {} ({} bytes)", index, len));
                    bytes += len;
                    index += 1;
                }
                Ok(None) => {
                    self.logger.log(&format!("end of input after {} chunks", index));
                    break;
                }
                Err(e) => {
                    // Not fatal by itself: record it and stop reading
                    self.logger
                        .log(&format!("source error after {} chunks: {}", index, e));
                    self.errors.push(e);
                    break;
                }
            }
        }

        (index, bytes)
    }

    fn wait_inbound_drained(
        &self,
        inbound: &Sender<Ticket>,
        progress: &Receiver<()>,
        deadline: Instant,
    ) -> SplitgzResult<()> {
        while !inbound.is_empty() {
            match progress.recv_deadline(deadline) {
                Ok(()) => {}
                Err(RecvTimeoutError::Timeout) => {
                    return Err(SplitgzError::Timeout(
                        self.config.timeout,
                        "inbound queue to drain",
                    ))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SplitgzError::thread(
                        "all workers exited before the inbound queue drained",
                    ))
                }
            }
        }
        self.logger.log("inbound queue drained");
        Ok(())
    }

    fn signal_no_more_input(&self, inbound: Sender<Ticket>, shared: &Shared) {
        shared.no_more_input.store(true, Ordering::Release);
        drop(inbound);
        self.logger.log("signalled no more input");
    }

    fn wait_workers_finished(
        &self,
        workers: Vec<JoinHandle<()>>,
        exits: &Receiver<WorkerExit>,
        deadline: Instant,
        shared: &Shared,
    ) -> SplitgzResult<()> {
        let mut remaining = workers.len();
        let mut panicked = None;

        while remaining > 0 {
            match exits.recv_deadline(deadline) {
                Ok(exit) => {
                    remaining -= 1;
                    if exit.panicked {
                        shared.abort.store(true, Ordering::Release);
                        panicked.get_or_insert(exit.id);
                    }
                    self.logger.log(&format!("worker {} finished", exit.id));
                }
                Err(RecvTimeoutError::Timeout) => {
                    shared.abort.store(true, Ordering::Release);
                    return Err(SplitgzError::Timeout(
                        self.config.timeout,
                        "workers to finish",
                    ));
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        for handle in workers {
            let _ = handle.join();
        }

        match panicked {
            Some(id) => Err(SplitgzError::thread(format!("worker {} panicked", id))),
            None => Ok(()),
        }
    }

    fn wait_collector_finished(
        &self,
        collector: JoinHandle<CollectorOutput<K>>,
        done: &Receiver<()>,
        deadline: Instant,
    ) -> SplitgzResult<CollectorOutput<K>> {
        match done.recv_deadline(deadline) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            Err(RecvTimeoutError::Timeout) => {
                return Err(SplitgzError::Timeout(
                    self.config.timeout,
                    "collector to finish",
                ))
            }
        }

        collector
            .join()
            .map_err(|_| SplitgzError::thread("collector panicked"))
    }
}

fn worker_loop(
    id: usize,
    transform: &dyn Transform,
    inbound: &Receiver<Ticket>,
    outbound: &Sender<Outcome>,
    progress: &Sender<()>,
    shared: &Shared,
    logger: &dyn Logger,
) {
    logger.log(&format!("worker {} started", id));

    // recv only fails once the queue is empty and the producer has hung up
    while let Ok(ticket) = inbound.recv() {
        let _ = progress.send(());

        if shared.abort.load(Ordering::Acquire) {
            continue;
        }

        let index = ticket.index;
        let outcome = match transform.transform(ticket.data) {
            Ok(data) => Outcome::Done(Ticket { index, data }),
            Err(message) => {
                logger.log(&format!("worker {} failed on chunk {}: {}", id, index, message));
                Outcome::Failed { index, message }
            }
        };

        if outbound.send(outcome).is_err() {
            break;
        }
    }

    logger.log(&format!(
        "worker {} exiting (no more input: {})",
        id,
        shared.no_more_input.load(Ordering::Acquire)
    ));
}

/// Result of the collector thread
struct CollectorOutput<K> {
    sink: K,
    written: u64,
    bytes_out: u64,
    error: Option<SplitgzError>,
}

/// Turns unordered worker output into a gapless, index-ascending sequence
struct Collector<K> {
    sink: K,
    shared: Arc<Shared>,
    reorder: BTreeMap<u64, Vec<u8>>,
    next_expected: u64,
    /// Earliest chunk a worker failed to transform
    failure: Option<(u64, String)>,
    error: Option<SplitgzError>,
    written: u64,
    bytes_out: u64,
}

impl<K: ResultSink> Collector<K> {
    fn new(sink: K, shared: Arc<Shared>) -> Self {
        Collector {
            sink,
            shared,
            reorder: BTreeMap::new(),
            next_expected: 0,
            failure: None,
            error: None,
            written: 0,
            bytes_out: 0,
        }
    }

    fn accept(&mut self, outcome: Outcome) {
        if self.error.is_some() {
            return;
        }

        match outcome {
            Outcome::Done(ticket) if ticket.index == self.next_expected => {
                self.emit(ticket.data);
            }
            Outcome::Done(ticket) => {
                self.reorder.insert(ticket.index, ticket.data);
            }
            Outcome::Failed { index, message } => {
                if self.failure.as_ref().map_or(true, |(first, _)| index < *first) {
                    self.failure = Some((index, message));
                }
            }
        }

        self.flush_ready();
    }

    /// Emit the longest contiguous run starting at `next_expected`
    fn flush_ready(&mut self) {
        while self.error.is_none() {
            if let Some((index, message)) = &self.failure {
                if *index == self.next_expected {
                    let error = SplitgzError::transform(*index, message);
                    self.fail(error);
                    return;
                }
            }

            match self.reorder.first_entry() {
                Some(entry) if *entry.key() == self.next_expected => {
                    let data = entry.remove();
                    self.emit(data);
                }
                _ => return,
            }
        }
    }

    fn emit(&mut self, data: Vec<u8>) {
        let len = data.len() as u64;
        match self.sink.write(data) {
            Ok(()) => {
                self.written += 1;
                self.bytes_out += len;
                self.next_expected += 1;
            }
            Err(e) => self.fail(e),
        }
    }

    fn fail(&mut self, error: SplitgzError) {
        self.shared.abort.store(true, Ordering::Release);
        self.reorder.clear();
        self.error = Some(error);
    }

    fn finish(mut self) -> CollectorOutput<K> {
        self.flush_ready();

        if self.error.is_none() {
            if let Some((index, message)) = self.failure.take() {
                self.error = Some(SplitgzError::transform(index, message));
            } else if let Some(&index) = self.reorder.keys().next() {
                self.error = Some(SplitgzError::thread(format!(
                    "chunk {} never arrived (next buffered chunk is {})",
                    self.next_expected, index
                )));
            } else if let Err(e) = self.sink.finish() {
                self.error = Some(e);
            }
        }

        CollectorOutput {
            sink: self.sink,
            written: self.written,
            bytes_out: self.bytes_out,
            error: self.error,
        }
    }
}
