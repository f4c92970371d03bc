use std::{
  collections::HashMap,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex as StdMutex, PoisonError,
  },
};

use tauri::{Emitter, EventTarget, Runtime, Webview};

use crate::{
  manager::ManagerHandle,
  models::{DeviceEventPayload, InboundMessage, TransactionResponse, EVENT_GATT_DISCONNECTED, EVENT_RESPONSE},
  transaction::{PageEvent, RequestingContext},
  Result,
};

/// A requesting context that can be told its page is gone.
pub trait PageContext: RequestingContext {
  fn tear_down(&self);
}

/// Routes page messages to the manager, one context per loaded page.
///
/// Pages are keyed by webview label. Navigating away tears the current
/// context down and the next message from that webview starts a fresh one.
pub struct PageRouter<C> {
  manager: ManagerHandle,
  contexts: StdMutex<HashMap<String, Arc<C>>>,
}

impl<C: PageContext> PageRouter<C> {
  pub fn new(manager: ManagerHandle) -> Self {
    Self {
      manager,
      contexts: StdMutex::new(HashMap::new()),
    }
  }

  pub fn manager(&self) -> &ManagerHandle {
    &self.manager
  }

  pub fn post_message<F>(&self, label: &str, message: InboundMessage, make: F) -> Result<()>
  where
    F: FnOnce() -> Arc<C>,
  {
    let context = self.context_for(label, make);
    self.manager.post_message(message, context)
  }

  fn context_for<F>(&self, label: &str, make: F) -> Arc<C>
  where
    F: FnOnce() -> Arc<C>,
  {
    let mut contexts = self.contexts.lock().unwrap_or_else(PoisonError::into_inner);
    contexts
      .entry(label.to_string())
      .or_insert_with(|| {
        log::debug!("New page context | webview={}", label);
        make()
      })
      .clone()
  }

  /// Abandons everything the page in `label` had outstanding. Returns
  /// `false` if that webview never posted a message.
  pub fn page_navigated(&self, label: &str) -> bool {
    let removed = self
      .contexts
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(label);
    let Some(context) = removed else {
      return false;
    };
    log::info!("Page navigated away | webview={}", label);
    context.tear_down();
    if let Err(err) = self.manager.teardown() {
      log::warn!("Failed to tear down page state | webview={} | err={}", label, err);
    }
    true
  }
}

/// The page loaded in one webview, as seen by its transactions.
///
/// A context lives until the webview navigates away; after that every
/// transaction still holding it settles as abandoned.
pub struct WebviewContext<R: Runtime> {
  webview: Webview<R>,
  alive: AtomicBool,
}

impl<R: Runtime> WebviewContext<R> {
  pub fn new(webview: Webview<R>) -> Self {
    Self {
      webview,
      alive: AtomicBool::new(true),
    }
  }

  pub fn label(&self) -> &str {
    self.webview.label()
  }

  fn target(&self) -> EventTarget {
    EventTarget::Webview {
      label: self.webview.label().to_string(),
    }
  }
}

impl<R: Runtime> RequestingContext for WebviewContext<R> {
  fn deliver(&self, response: TransactionResponse) {
    if let Err(err) = self.webview.emit_to(self.target(), EVENT_RESPONSE, response) {
      log::warn!(
        "Failed to deliver response | webview={} | event={} | err={:?}",
        self.label(),
        EVENT_RESPONSE,
        err
      );
    }
  }

  fn notify(&self, event: PageEvent) {
    let PageEvent::GattServerDisconnected { device_id } = event;
    let payload = DeviceEventPayload { device_id };
    if let Err(err) = self.webview.emit_to(self.target(), EVENT_GATT_DISCONNECTED, payload) {
      log::warn!(
        "Failed to notify page | webview={} | event={} | err={:?}",
        self.label(),
        EVENT_GATT_DISCONNECTED,
        err
      );
    }
  }

  fn is_alive(&self) -> bool {
    self.alive.load(Ordering::SeqCst)
  }
}

impl<R: Runtime> PageContext for WebviewContext<R> {
  fn tear_down(&self) {
    self.alive.store(false, Ordering::SeqCst);
  }
}
