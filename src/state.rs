//! Session state management
//! A [`Session`] shares one central manager between tasks and runs the pump that feeds
//! adapter callbacks and watchdog ticks into it.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use log::{error, info};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::adapter::{AdapterEvent, RadioAdapter};
use crate::core::bluetooth::manager::CentralManager;

pub struct Session<A: RadioAdapter + 'static> {
    /// The central manager; every mutation goes through this lock
    pub central_manager: Arc<Mutex<CentralManager<A>>>,
    cancel_token: CancellationToken,
    pump_handle: Option<JoinHandle<()>>,
}

impl<A: RadioAdapter + 'static> Session<A> {
    /// Wraps `manager` and starts pumping `adapter_events` into it.
    pub fn start(manager: CentralManager<A>, adapter_events: mpsc::UnboundedReceiver<AdapterEvent>) -> Self {
        let watchdog_interval = manager.config().watchdog_interval();
        let central_manager = Arc::new(Mutex::new(manager));
        let cancel_token = CancellationToken::new();

        let pump_handle = tokio::spawn(Self::pump(
            central_manager.clone(),
            adapter_events,
            cancel_token.clone(),
            watchdog_interval,
        ));
        info!("Session started.");

        Self {
            central_manager,
            cancel_token,
            pump_handle: Some(pump_handle),
        }
    }

    /// Gets a reference to the central manager
    pub fn get_central_manager_arc(&self) -> Arc<Mutex<CentralManager<A>>> {
        self.central_manager.clone()
    }

    async fn pump(
        central_manager: Arc<Mutex<CentralManager<A>>>,
        mut adapter_events: mpsc::UnboundedReceiver<AdapterEvent>,
        cancel_token: CancellationToken,
        watchdog_interval: std::time::Duration,
    ) {
        let mut ticker = tokio::time::interval(watchdog_interval);
        loop {
            tokio::select! {
                event = adapter_events.recv() => match event {
                    Some(event) => central_manager.lock().await.handle_event(event),
                    None => {
                        info!("Adapter event channel closed.");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    central_manager.lock().await.check_advertisement_timeouts(Instant::now());
                }
                _ = cancel_token.cancelled() => break,
            }
        }
    }

    /// Stops the pump and waits for it to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("Stopping session.");
        self.cancel_token.cancel();
        if let Some(handle) = self.pump_handle.take() {
            if let Err(e) = handle.await {
                error!("Session pump finished with an unexpected join error: {:?}", e);
                return Err(e.into());
            }
        }
        self.central_manager.lock().await.stop_scanning();
        Ok(())
    }
}

impl<A: RadioAdapter + 'static> Drop for Session<A> {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
