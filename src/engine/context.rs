//! Engine context: the long-lived threads every coordinator runs on
//!
//! The context is built once by the caller and passed into each
//! coordinator. Dropping the last reference (or calling
//! [`EngineContext::shutdown`]) stops the task queues and joins the threads.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::engine::MediaEngine;
use crate::error::{BridgeError, Result};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A named thread draining a task queue
#[derive(Clone)]
pub struct EngineThread {
    inner: Arc<ThreadInner>,
}

struct ThreadInner {
    name: String,
    thread_id: ThreadId,
    tx: Mutex<Option<mpsc::UnboundedSender<Task>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

impl EngineThread {
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();

        let thread_name = name.clone();
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                debug!("Engine thread {} started", thread_name);
                while let Some(task) = rx.blocking_recv() {
                    if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(task)) {
                        error!(
                            "Task on engine thread {} panicked: {}",
                            thread_name,
                            panic_message(panic.as_ref())
                        );
                    }
                }
                debug!("Engine thread {} stopped", thread_name);
            })?;

        let thread_id = handle.thread().id();
        Ok(Self {
            inner: Arc::new(ThreadInner {
                name,
                thread_id,
                tx: Mutex::new(Some(tx)),
                handle: Mutex::new(Some(handle)),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the calling thread is this engine thread
    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.inner.thread_id
    }

    /// Queue a task without waiting for it. Returns false once shut down.
    pub fn post<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.inner.tx.lock();
        match guard.as_ref() {
            Some(tx) => tx.send(Box::new(f)).is_ok(),
            None => {
                debug!("Dropping task posted to stopped thread {}", self.inner.name);
                false
            }
        }
    }

    /// Run `f` on this thread and block until it returns.
    ///
    /// Runs inline when already on this thread, so nested invokes never
    /// wait on themselves.
    pub fn invoke<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Ok(f());
        }

        let (reply_tx, reply_rx) = std::sync::mpsc::sync_channel(1);
        let queued = self.post(move || {
            let _ = reply_tx.send(f());
        });
        if !queued {
            return Err(BridgeError::EngineThread(format!(
                "{} is stopped",
                self.inner.name
            )));
        }

        reply_rx.recv().map_err(|_| {
            BridgeError::EngineThread(format!("task on {} did not complete", self.inner.name))
        })
    }

    /// Close the queue and join the thread. Idempotent.
    ///
    /// Tasks already queued still run. Called from the thread itself, the
    /// thread is detached instead of joined.
    pub fn shutdown(&self) {
        drop(self.inner.tx.lock().take());

        if self.is_current() {
            return;
        }
        let handle = self.inner.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Engine thread {} exited abnormally", self.inner.name);
            }
        }
    }
}

/// The three engine threads
#[derive(Clone)]
pub struct EngineThreads {
    pub network: EngineThread,
    pub worker: EngineThread,
    pub signaling: EngineThread,
}

impl EngineThreads {
    pub fn spawn(prefix: &str) -> Result<Self> {
        Ok(Self {
            network: EngineThread::spawn(format!("{}-network", prefix))?,
            worker: EngineThread::spawn(format!("{}-worker", prefix))?,
            signaling: EngineThread::spawn(format!("{}-signaling", prefix))?,
        })
    }

    /// Stop and join all three threads.
    pub fn shutdown(&self) {
        // Signaling first: it is the one posting onto the others
        self.signaling.shutdown();
        self.worker.shutdown();
        self.network.shutdown();
    }
}

/// Monotonic clock shared by the capture pipeline
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Microseconds since the clock was created
    pub fn now_us(&self) -> i64 {
        self.origin.elapsed().as_micros() as i64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Long-lived engine context
pub struct EngineContext {
    config: BridgeConfig,
    threads: EngineThreads,
    clock: Clock,
    engine: Arc<dyn MediaEngine>,
    stopped: AtomicBool,
}

impl EngineContext {
    pub fn new(config: BridgeConfig, engine: Arc<dyn MediaEngine>) -> Result<Arc<Self>> {
        config.validate()?;
        let threads = EngineThreads::spawn(&config.engine.thread_prefix)?;
        info!(
            "Engine context started ({} engine, threads {}-*)",
            engine.name(),
            config.engine.thread_prefix
        );
        Ok(Arc::new(Self {
            config,
            threads,
            clock: Clock::new(),
            engine,
            stopped: AtomicBool::new(false),
        }))
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn threads(&self) -> &EngineThreads {
        &self.threads
    }

    pub fn signaling(&self) -> &EngineThread {
        &self.threads.signaling
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    pub fn engine(&self) -> &Arc<dyn MediaEngine> {
        &self.engine
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Stop and join the engine threads. Idempotent.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.threads.shutdown();
        info!("Engine context stopped");
    }
}

impl Drop for EngineContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
