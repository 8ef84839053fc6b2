//! Connect-device playback SDK
//!
//! Drives a named remote-controllable receiver (for example a headless player
//! on the jukebox host) through the Web API. `connect` validates the handed
//! credential with a device-list probe; a poll loop then reports the device
//! appearing (`Ready`), disappearing (`NotReady`), credential rejection, and
//! player state changes.

use super::sdk::{PlaybackSdk, SdkEvent, SdkLoader};
use crate::clients::{PlayerApi, PlayerState, WebApiClient};
use crate::error::{ApiError, SdkError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 64;

/// Loads [`ConnectDeviceSdk`] instances bound to one device name
pub struct ConnectDeviceLoader {
    api: Arc<WebApiClient>,
    device_name: String,
    poll_interval: Duration,
}

impl ConnectDeviceLoader {
    pub fn new(api: Arc<WebApiClient>, device_name: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            api,
            device_name: device_name.into(),
            poll_interval,
        }
    }
}

#[async_trait]
impl SdkLoader for ConnectDeviceLoader {
    async fn load(&self) -> Result<Arc<dyn PlaybackSdk>, SdkError> {
        Ok(Arc::new(ConnectDeviceSdk::new(
            Arc::clone(&self.api),
            self.device_name.clone(),
            self.poll_interval,
        )))
    }
}

pub struct ConnectDeviceSdk {
    api: Arc<WebApiClient>,
    device_name: String,
    poll_interval: Duration,
    tx: mpsc::Sender<SdkEvent>,
    rx: Mutex<Option<mpsc::Receiver<SdkEvent>>>,
    poller: Mutex<Option<AbortHandle>>,
}

impl ConnectDeviceSdk {
    pub fn new(api: Arc<WebApiClient>, device_name: String, poll_interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        Self {
            api,
            device_name,
            poll_interval,
            tx,
            rx: Mutex::new(Some(rx)),
            poller: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PlaybackSdk for ConnectDeviceSdk {
    async fn connect(&self, token: &str) -> Result<bool, SdkError> {
        match self.api.devices_with_token(token).await {
            Ok(_) => {}
            Err(ApiError::Unauthorized(message)) => return Err(SdkError::Authentication(message)),
            Err(e) => {
                warn!(error = %e, "Device probe failed");
                return Ok(false);
            }
        }

        let poller = tokio::spawn(poll_devices(
            Arc::clone(&self.api),
            self.device_name.clone(),
            self.poll_interval,
            self.tx.clone(),
        ));

        let mut slot = self.poller.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = slot.replace(poller.abort_handle()) {
            previous.abort();
        }
        info!(device = %self.device_name, "Connect-device SDK connected");
        Ok(true)
    }

    fn take_events(&self) -> Option<mpsc::Receiver<SdkEvent>> {
        self.rx.lock().unwrap_or_else(|p| p.into_inner()).take()
    }

    async fn disconnect(&self) {
        if let Some(poller) = self.poller.lock().unwrap_or_else(|p| p.into_inner()).take() {
            poller.abort();
            debug!(device = %self.device_name, "Connect-device SDK disconnected");
        }
    }
}

/// Emit edge-triggered events for the named device
async fn poll_devices(
    api: Arc<WebApiClient>,
    device_name: String,
    poll_interval: Duration,
    tx: mpsc::Sender<SdkEvent>,
) {
    let mut present: Option<String> = None;
    let mut last_state: Option<Option<PlayerState>> = None;

    loop {
        let event = match api.devices().await {
            Ok(devices) => {
                let found = devices
                    .into_iter()
                    .find(|d| d.name == device_name)
                    .and_then(|d| d.id);

                match (&present, found) {
                    (None, Some(id)) => {
                        present = Some(id.clone());
                        Some(SdkEvent::Ready { device_id: id })
                    }
                    (Some(old), None) => {
                        let device_id = old.clone();
                        present = None;
                        last_state = None;
                        Some(SdkEvent::NotReady { device_id })
                    }
                    (Some(old), Some(id)) if *old != id => {
                        present = Some(id.clone());
                        Some(SdkEvent::Ready { device_id: id })
                    }
                    _ => None,
                }
            }
            Err(ApiError::Unauthorized(message)) => Some(SdkEvent::AuthenticationError(message)),
            Err(e) => {
                debug!(error = %e, "Device poll failed");
                None
            }
        };

        if let Some(event) = event {
            if tx.send(event).await.is_err() {
                return;
            }
        }

        if let Some(device_id) = &present {
            if let Ok(state) = api.player_state().await {
                let ours = state.filter(|s| s.is_on_device(device_id));
                let changed = last_state.as_ref() != Some(&ours);
                if changed {
                    last_state = Some(ours.clone());
                    if tx.send(SdkEvent::StateChanged(ours)).await.is_err() {
                        return;
                    }
                }
            }
        }

        tokio::time::sleep(poll_interval).await;
    }
}
