use std::sync::Arc;

use serde::de::DeserializeOwned;
use tauri::{plugin::PluginApi, AppHandle, Runtime};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::{
  platform::{Central, PeripheralId, PlatformEvent},
  Result,
};

pub fn init<R: Runtime, C: DeserializeOwned>(
  _app: &AppHandle<R>,
  _api: PluginApi<R, C>,
  events: UnboundedSender<PlatformEvent>,
) -> Result<Arc<dyn Central>> {
  log::warn!("Web Bluetooth is not implemented for this platform yet, reporting Bluetooth as off");
  Ok(Arc::new(UnsupportedCentral { events }))
}

/// A central whose radio is never on. Device requests are rejected before
/// any scan starts; a stray connect fails straight away.
struct UnsupportedCentral {
  events: UnboundedSender<PlatformEvent>,
}

impl Central for UnsupportedCentral {
  fn is_powered_on(&self) -> bool {
    false
  }

  fn start_scan(&self, _services: &[Uuid]) {}

  fn stop_scan(&self) {}

  fn connect(&self, id: &PeripheralId) {
    let _ = self.events.send(PlatformEvent::FailedToConnect {
      id: id.clone(),
      error: Some(crate::Error::UnsupportedPlatform.to_string()),
    });
  }

  fn disconnect(&self, _id: &PeripheralId) {}
}
