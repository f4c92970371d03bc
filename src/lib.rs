use std::sync::Arc;

use tauri::{
  async_runtime,
  plugin::{Builder, TauriPlugin},
  Manager, Runtime, Webview,
};
use tokio::sync::mpsc;

pub use models::*;

#[cfg(desktop)]
mod desktop;
#[cfg(mobile)]
mod mobile;

mod commands;
mod config;
mod device;
mod error;
mod filter;
mod manager;
mod models;
mod picker;
mod platform;
mod registry;
mod request;
mod transaction;
mod webview;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::{Error, Result};
pub use filter::{Advertisement, Filter, FilterSet};
pub use manager::{DeviceManager, ManagerHandle, ManagerSnapshot, ManagerState};
pub use picker::{EventPicker, Picker};
pub use platform::{Central, PeripheralId, PlatformEvent};
pub use registry::{ExternalId, IdentityRegistry};
pub use transaction::{PageEvent, RequestingContext, Transaction, TransactionKey, TransactionState};

use webview::{PageRouter, WebviewContext};

/// Extensions to [`tauri::App`], [`tauri::AppHandle`], [`tauri::Webview`] and [`tauri::Window`] to access the web-bluetooth bridge.
pub trait WebBluetoothExt<R: Runtime> {
  fn web_bluetooth(&self) -> &WebBluetooth<R>;
}

impl<R: Runtime, T: Manager<R>> crate::WebBluetoothExt<R> for T {
  fn web_bluetooth(&self) -> &WebBluetooth<R> {
    self.state::<WebBluetooth<R>>().inner()
  }
}

/// Access to the web-bluetooth bridge.
pub struct WebBluetooth<R: Runtime> {
  router: PageRouter<WebviewContext<R>>,
  central: Arc<dyn Central>,
}

impl<R: Runtime> WebBluetooth<R> {
  fn new(manager: ManagerHandle, central: Arc<dyn Central>) -> Self {
    Self {
      router: PageRouter::new(manager),
      central,
    }
  }

  pub fn manager(&self) -> &ManagerHandle {
    self.router.manager()
  }

  pub fn get_availability(&self) -> bool {
    self.central.is_powered_on()
  }

  /// Posts a page message on behalf of the page currently loaded in `webview`.
  pub fn post_message(&self, webview: &Webview<R>, message: InboundMessage) -> Result<()> {
    self
      .router
      .post_message(webview.label(), message, || Arc::new(WebviewContext::new(webview.clone())))
  }

  fn page_navigated(&self, label: &str) {
    self.router.page_navigated(label);
  }
}

/// Initializes the plugin.
pub fn init<R: Runtime>() -> TauriPlugin<R, Option<Config>> {
  Builder::<R, Option<Config>>::new("web-bluetooth")
    .invoke_handler(commands::handlers())
    .setup(|app, api| {
      let config = api.config().clone().unwrap_or_default();
      let (events_tx, mut events_rx) = mpsc::unbounded_channel();
      #[cfg(mobile)]
      let central = mobile::init(app, api, events_tx)?;
      #[cfg(desktop)]
      let central = desktop::init(app, api, &config, events_tx)?;

      let picker = Arc::new(EventPicker::new(app.clone()));
      let runtime = async_runtime::handle().inner().clone();
      let manager = DeviceManager::spawn(central.clone(), picker, &config, runtime);

      let forward = manager.clone();
      async_runtime::spawn(async move {
        while let Some(event) = events_rx.recv().await {
          if forward.platform_event(event).is_err() {
            break;
          }
        }
      });

      log::info!(
        "Web Bluetooth bridge ready | autoselect={} | autoselect_timeout_ms={}",
        config.autoselect,
        config.autoselect_timeout_ms
      );
      app.manage(WebBluetooth::<R>::new(manager, central));
      Ok(())
    })
    .on_navigation(|webview, url| {
      if let Some(state) = webview.try_state::<WebBluetooth<R>>() {
        log::debug!("Navigation | webview={} | url={}", webview.label(), url);
        state.page_navigated(webview.label());
      }
      true
    })
    .build()
}
