//! Device loss: detection, recovery and the blocking fence that watches for it.

use tracing::{error, info, warn};

use crate::device::DeviceError;
use crate::error::RendererError;

use super::{live_device, Renderer};

impl Renderer {
    /// Whether a loss has been observed and not yet recovered from.
    pub fn is_device_lost(&self) -> bool {
        self.device_lost
    }

    /// Polls the device for removal. The lost flag is sticky: only [`Renderer::reset_device`]
    /// clears it.
    pub fn test_device_lost(&mut self) -> bool {
        let Some(device) = self.device.as_deref() else {
            return self.device_lost;
        };
        match device.removed_reason() {
            Some(reason) => {
                if !self.device_lost {
                    error!(?reason, description = device.description(), "device was removed");
                    self.stats.inc_device_losses();
                }
                self.device_lost = true;
                true
            }
            None => false,
        }
    }

    /// Whether a fresh device could be created right now. Live state is not touched.
    pub fn test_device_resettable(&self) -> bool {
        if self.device.is_none() {
            return false;
        }
        match self.factory.create_device(&self.device_request(false)) {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "device is not resettable yet");
                false
            }
        }
    }

    /// Releases the device with every helper resource and creates a new one. The lost flag is
    /// cleared only when that succeeds.
    pub fn reset_device(&mut self) -> Result<(), RendererError> {
        self.release();
        if let Err(err) = self.initialize() {
            error!(error = %err, "could not recreate the device");
            return Err(err);
        }
        self.device_lost = false;
        self.stats.inc_device_resets();
        info!(feature_level = ?self.feature_level, "device reset");
        Ok(())
    }

    /// Device failures during a call: removal marks the renderer lost.
    fn device_failure(&mut self, err: DeviceError) -> RendererError {
        if matches!(err, DeviceError::DeviceRemoved(_)) {
            self.test_device_lost();
        }
        err.into()
    }

    /// Flushes queued work; with `block`, waits on an event query until the device drains it.
    pub fn sync(&mut self, block: bool) -> Result<(), RendererError> {
        let device = live_device(&mut self.device, self.device_lost)?;
        let issued = if !block {
            device.flush().map(|()| None)
        } else {
            let query = match self.sync_query {
                Some(query) => Ok(query),
                None => device.insert_event_query(),
            };
            match query {
                Ok(query) => device.flush().map(|()| Some(query)),
                Err(err) => Err(err),
            }
        };
        let query = match issued {
            Ok(Some(query)) => query,
            Ok(None) => return Ok(()),
            Err(err) => return Err(self.device_failure(err)),
        };
        self.sync_query = Some(query);

        let mut polls = 0u32;
        loop {
            let device = live_device(&mut self.device, self.device_lost)?;
            match device.event_query_complete(query) {
                Ok(true) => break,
                Ok(false) => {}
                Err(err) => {
                    self.sync_query = None;
                    return Err(self.device_failure(err));
                }
            }
            std::thread::yield_now();
            if self.test_device_lost() {
                return Err(RendererError::DeviceLost);
            }
            polls += 1;
            if self.config.max_sync_polls.is_some_and(|max| polls >= max) {
                // The query stays outstanding; the next blocking sync resumes polling it.
                warn!(polls, "sync gave up waiting for the device");
                return Ok(());
            }
        }
        self.sync_query = None;
        Ok(())
    }
}
