//! Tokio host for a [`Link`].
//!
//! [`SharedLink`] puts the engine behind a mutex so application tasks,
//! driver shims and the service task can reach it concurrently.
//! [`LinkService`] runs the processing loop: it wakes whenever a work
//! signal is raised or the next timer is due, fires expired timers and
//! drains both directions.
//!
//! Every entry on `SharedLink` takes the handle reference *before* waiting
//! for the engine lock, so a concurrent [`SharedLink::close`] sees the call
//! in progress and answers `Busy` instead of tearing the endpoint down
//! underneath it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::core::{CloseError, Driver, LinkResult};
use crate::endpoint::{EndpointFlags, EndpointHandle, EndpointOption, WriteFlags};
use crate::link::Link;
use crate::transport::WorkSignals;

/// Thread-safe handle to a [`Link`] driven by a [`LinkService`].
pub struct SharedLink<D: Driver> {
    link: Arc<Mutex<Link<D>>>,
    notify: Arc<Notify>,
}

impl<D: Driver> Clone for SharedLink<D> {
    fn clone(&self) -> Self {
        Self {
            link: Arc::clone(&self.link),
            notify: Arc::clone(&self.notify),
        }
    }
}

impl<D: Driver> SharedLink<D> {
    /// Wrap an engine and hook its work signals up to the service wake-up.
    pub fn new(link: Link<D>) -> Self {
        let notify = Arc::new(Notify::new());
        let waker = Arc::clone(&notify);
        link.signals().set_waker(move || waker.notify_one());
        Self {
            link: Arc::new(Mutex::new(link)),
            notify,
        }
    }

    /// Lock the engine.
    pub fn lock(&self) -> MutexGuard<'_, Link<D>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with the engine locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut Link<D>) -> R) -> R {
        f(&mut self.lock())
    }

    /// Work signals of the engine, for driver shims.
    pub fn signals(&self) -> WorkSignals {
        self.lock().signals()
    }

    /// Wake the service task without raising a signal.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Open a service endpoint.
    pub fn open_service_endpoint(
        &self,
        id: u8,
        flags: EndpointFlags,
        tx_window_size: u8,
    ) -> LinkResult<EndpointHandle> {
        self.lock().open_service_endpoint(id, flags, tx_window_size)
    }

    /// Install a callback on an endpoint.
    pub fn set_option(&self, handle: &EndpointHandle, option: EndpointOption) -> LinkResult<()> {
        let _guard = handle.enter()?;
        self.lock().set_option(handle, option)
    }

    /// Queue a payload for transmission.
    pub fn write(
        &self,
        handle: &EndpointHandle,
        data: impl Into<Bytes>,
        flags: WriteFlags,
    ) -> LinkResult<()> {
        let _guard = handle.enter()?;
        self.lock().write(handle, data, flags)
    }

    /// Pop one received information payload.
    pub fn read(&self, handle: &EndpointHandle) -> LinkResult<Bytes> {
        let _guard = handle.enter()?;
        self.lock().read(handle)
    }

    /// Pop one received unnumbered payload.
    pub fn read_unnumbered(&self, handle: &EndpointHandle) -> LinkResult<Bytes> {
        let _guard = handle.enter()?;
        self.lock().read_unnumbered(handle)
    }

    /// Close an endpoint. `Busy` while another entry holds the handle.
    pub fn close(&self, handle: EndpointHandle) -> Result<(), CloseError> {
        self.lock().close(handle)
    }

    /// The peer reported endpoint `id` as disconnected.
    pub fn remote_disconnected(&self, id: u8) {
        self.lock().remote_disconnected(id);
        self.wake();
    }
}

impl<D: Driver> std::fmt::Debug for SharedLink<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedLink").finish_non_exhaustive()
    }
}

/// Background task running a [`SharedLink`]'s processing loop.
#[derive(Debug)]
pub struct LinkService {
    task: JoinHandle<()>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl LinkService {
    /// Spawn the processing loop on the current tokio runtime.
    pub fn spawn<D>(link: SharedLink<D>) -> Self
    where
        D: Driver + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run(link, shutdown_rx));
        Self {
            task,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Stop the loop and wait for the task to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(err) = (&mut self.task).await {
            debug!(%err, "link service task ended abnormally");
        }
    }
}

async fn run<D: Driver>(link: SharedLink<D>, mut shutdown_rx: oneshot::Receiver<()>) {
    loop {
        let next_timer = {
            let mut engine = link.lock();
            let fired = engine.poll_timers();
            engine.process();
            if fired > 0 {
                trace!(fired, "timers fired");
            }
            engine.next_timer_in()
        };

        match next_timer {
            Some(delay) => tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = link.notify.notified() => {}
                _ = tokio::time::sleep(delay) => {}
            },
            None => tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = link.notify.notified() => {}
            },
        }
    }
    debug!("link service stopped");
}
