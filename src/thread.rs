use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::mpsc;
use std::thread::{Builder, JoinHandle};

use log::debug;

use crate::current_thread;
use crate::error::{Error, Result};

static NUM_CREATED: AtomicI32 = AtomicI32::new(0);

/// An owned OS thread whose id is observable the moment
/// [`start`](Thread::start) returns.
///
/// `start` spawns the thread and then blocks on a handshake until the
/// spawned thread has published its own OS id, so any code after
/// `start` can call [`tid`](Thread::tid) and rely on the answer. The
/// handshake is a channel send/receive, whose synchronization makes
/// the id written in the new thread visible to the spawner.
///
/// Dropping a started, unjoined `Thread` detaches it: the process can
/// exit without waiting, and the thread's completion becomes
/// unobservable.
///
/// ## Example
///
/// ```rust
/// use weir_io::Thread;
///
/// let mut t = Thread::new(|| println!("hello from the loop thread"));
/// t.start()?;
/// assert!(t.tid() > 0);
/// t.join();
/// # Ok::<(), weir_io::Error>(())
/// ```
pub struct Thread {
    handle: Option<JoinHandle<()>>,
    started: bool,
    joined: bool,
    tid: i32,
    func: Option<Box<dyn FnOnce() + Send + 'static>>,
    name: String,
}

impl Thread {
    /// Creates a thread with an auto-generated `Thread<N>` name.
    pub fn new(func: impl FnOnce() + Send + 'static) -> Thread {
        Self::with_name(func, String::new())
    }

    /// Creates a named thread; an empty name falls back to the
    /// auto-generated one. Names are for diagnostics only.
    pub fn with_name(func: impl FnOnce() + Send + 'static, name: impl Into<String>) -> Thread {
        let num = NUM_CREATED.fetch_add(1, Ordering::Relaxed) + 1;
        let mut name = name.into();
        if name.is_empty() {
            name = format!("Thread{}", num);
        }
        Thread {
            handle: None,
            started: false,
            joined: false,
            tid: 0,
            func: Some(Box::new(func)),
            name,
        }
    }

    /// Spawns the thread and waits until it has recorded its OS id.
    ///
    /// # Panics
    ///
    /// Panics if called twice on the same `Thread`.
    pub fn start(&mut self) -> Result<()> {
        assert!(!self.started, "thread already started");
        self.started = true;

        // started was false, so the function is still in its slot
        let func = self.func.take().expect("thread function already consumed");
        let (tx, rx) = mpsc::channel();

        let handle = Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let _ = tx.send(current_thread::tid());
                func();
            })
            .map_err(Error::ThreadSpawn)?;

        // the sender is moved into the thread and sends exactly once,
        // before the user function runs
        self.tid = rx
            .recv()
            .expect("spawned thread exited before publishing its tid");
        self.handle = Some(handle);
        debug!("thread {} started, tid={}", self.name, self.tid);
        Ok(())
    }

    /// Blocks until the thread finishes. A panic inside the thread
    /// function is absorbed here.
    pub fn join(&mut self) {
        self.joined = true;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn joined(&self) -> bool {
        self.joined
    }

    /// OS id of the spawned thread. Meaningful only after
    /// [`start`](Thread::start) has returned.
    pub fn tid(&self) -> i32 {
        self.tid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// How many `Thread`s this process has constructed.
    pub fn num_created() -> i32 {
        NUM_CREATED.load(Ordering::Relaxed)
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        if self.started && !self.joined {
            // dropping the JoinHandle detaches the thread
            debug!("thread {} detached on drop", self.name);
            self.handle.take();
        }
    }
}
