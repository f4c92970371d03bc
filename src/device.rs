use std::sync::Arc;

use serde_json::json;

use crate::{
  filter::Advertisement,
  models::BluetoothDevice,
  platform::{Central, PeripheralId},
  registry::ExternalId,
  request::DeviceCommand,
  transaction::{PageEvent, RequestingContext, Transaction},
  Error,
};

/// What the manager should do with a proxy after its peripheral disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterDisconnect {
  /// A connect was queued while disconnecting; the proxy reconnects.
  Retain,
  Release,
}

/// One selected peripheral, bridging its connection lifecycle to the
/// page's transactions.
pub struct DeviceProxy {
  internal_id: PeripheralId,
  external_id: ExternalId,
  advertisement: Advertisement,
  context: Arc<dyn RequestingContext>,
  connected: bool,
  connecting: Vec<Transaction>,
  disconnecting: Vec<Transaction>,
}

impl DeviceProxy {
  pub fn new(
    internal_id: PeripheralId,
    external_id: ExternalId,
    advertisement: Advertisement,
    context: Arc<dyn RequestingContext>,
  ) -> Self {
    Self {
      internal_id,
      external_id,
      advertisement,
      context,
      connected: false,
      connecting: Vec::new(),
      disconnecting: Vec::new(),
    }
  }

  pub fn is_connected(&self) -> bool {
    self.connected
  }

  pub fn describe(&self) -> BluetoothDevice {
    BluetoothDevice {
      id: self.external_id.to_string(),
      name: self.advertisement.name.clone(),
      uuids: self.advertisement.services.iter().map(|uuid| uuid.to_string()).collect(),
      rssi: self.advertisement.rssi,
      tx_power: self.advertisement.tx_power,
    }
  }

  pub fn triage(&mut self, command: DeviceCommand, transaction: Transaction, central: &dyn Central) {
    match command {
      DeviceCommand::Connect => {
        if self.connected && self.disconnecting.is_empty() {
          transaction.resolve_as_success(self.server_state());
          return;
        }
        self.connecting.push(transaction);
        if self.connecting.len() == 1 && self.disconnecting.is_empty() {
          log::info!("Connecting | device_id={} | peripheral={}", self.external_id, self.internal_id);
          central.connect(&self.internal_id);
        }
      }
      DeviceCommand::Disconnect => {
        if !self.connected && self.connecting.is_empty() {
          transaction.resolve_as_success(json!(null));
          return;
        }
        // While a connect is in flight the disconnect waits for it to settle.
        self.disconnecting.push(transaction);
        if self.connected && self.disconnecting.len() == 1 {
          log::info!("Disconnecting | device_id={} | peripheral={}", self.external_id, self.internal_id);
          central.disconnect(&self.internal_id);
        }
      }
      DeviceCommand::Gatt(request) => {
        if !self.connected {
          transaction.reject(&Error::GattNotConnected(self.external_id.to_string()));
          return;
        }
        central.gatt(&self.internal_id, request, transaction);
      }
    }
  }

  pub fn did_connect(&mut self, central: &dyn Central) {
    self.connected = true;
    log::info!(
      "Connected | device_id={} | pending={} | disconnect_queued={}",
      self.external_id,
      self.connecting.len(),
      !self.disconnecting.is_empty()
    );
    let value = self.server_state();
    for transaction in self.connecting.drain(..) {
      transaction.resolve_as_success(value.clone());
    }
    if !self.disconnecting.is_empty() {
      log::info!("Disconnecting | device_id={} | peripheral={}", self.external_id, self.internal_id);
      central.disconnect(&self.internal_id);
    }
  }

  pub fn did_fail_to_connect(&mut self, error: Option<String>) {
    let reason = error.unwrap_or_else(|| "unknown error".into());
    log::warn!("Failed to connect | device_id={} | reason={}", self.external_id, reason);
    let error = Error::ConnectionFailed {
      device_id: self.external_id.to_string(),
      reason,
    };
    for transaction in self.connecting.drain(..) {
      transaction.reject(&error);
    }
    if !self.connected {
      for transaction in self.disconnecting.drain(..) {
        transaction.resolve_as_success(json!(null));
      }
    }
  }

  pub fn did_disconnect(&mut self, error: Option<String>, central: &dyn Central) -> AfterDisconnect {
    let was_connected = std::mem::replace(&mut self.connected, false);
    let reconnect = was_connected && !self.disconnecting.is_empty() && !self.connecting.is_empty();
    log::info!(
      "Disconnected | device_id={} | error={:?} | reconnect={}",
      self.external_id,
      error,
      reconnect
    );

    for transaction in self.disconnecting.drain(..) {
      transaction.resolve_as_success(json!(null));
    }
    if was_connected && self.context.is_alive() {
      self.context.notify(PageEvent::GattServerDisconnected {
        device_id: self.external_id.to_string(),
      });
    }

    if reconnect {
      central.connect(&self.internal_id);
      return AfterDisconnect::Retain;
    }
    let error = Error::Disconnected(self.external_id.to_string());
    for transaction in self.connecting.drain(..) {
      transaction.reject(&error);
    }
    AfterDisconnect::Release
  }

  /// Drops every queued request without answering and releases the link.
  pub fn clear_state(&mut self, central: &dyn Central) {
    for transaction in self.connecting.drain(..).chain(self.disconnecting.drain(..)) {
      transaction.abandon();
    }
    if std::mem::replace(&mut self.connected, false) {
      central.disconnect(&self.internal_id);
    }
  }

  fn server_state(&self) -> serde_json::Value {
    json!({
      "deviceId": self.external_id,
      "connected": true,
    })
  }
}

#[cfg(test)]
mod tests {
  use serde_json::Value;

  use super::*;
  use crate::{
    test_support::{transaction, CentralCall, FakeCentral, RecordingContext},
    transaction::TransactionState,
  };

  fn proxy(context: &Arc<RecordingContext>) -> DeviceProxy {
    DeviceProxy::new(
      PeripheralId::from("periph-1"),
      ExternalId::from("ext-1"),
      Advertisement {
        name: Some("Puck.js 69c5".into()),
        ..Default::default()
      },
      context.clone(),
    )
  }

  #[test]
  fn connect_waits_for_the_platform_callback() {
    let context = RecordingContext::new();
    let central = FakeCentral::new();
    let mut device = proxy(&context);
    let first = transaction(&context, &["device", "gatt", "connect"]);
    let second = transaction(&context, &["device", "gatt", "connect"]);

    device.triage(DeviceCommand::Connect, first.clone(), &*central);
    device.triage(DeviceCommand::Connect, second.clone(), &*central);
    assert!(first.is_pending());
    assert_eq!(central.calls(), vec![CentralCall::Connect(PeripheralId::from("periph-1"))]);

    device.did_connect(&*central);
    assert_eq!(first.state(), TransactionState::Succeeded);
    assert_eq!(second.state(), TransactionState::Succeeded);
    assert_eq!(context.responses()[0].result["deviceId"], Value::from("ext-1"));
  }

  #[test]
  fn connect_when_connected_resolves_at_once() {
    let context = RecordingContext::new();
    let central = FakeCentral::new();
    let mut device = proxy(&context);
    device.did_connect(&*central);

    let trans = transaction(&context, &["device", "gatt", "connect"]);
    device.triage(DeviceCommand::Connect, trans.clone(), &*central);

    assert_eq!(trans.state(), TransactionState::Succeeded);
    assert!(central.calls().is_empty());
  }

  #[test]
  fn failed_connect_rejects_queued_requests() {
    let context = RecordingContext::new();
    let central = FakeCentral::new();
    let mut device = proxy(&context);
    let trans = transaction(&context, &["device", "gatt", "connect"]);
    device.triage(DeviceCommand::Connect, trans.clone(), &*central);

    device.did_fail_to_connect(Some("timeout".into()));

    assert_eq!(trans.state(), TransactionState::Failed);
    assert_eq!(
      context.responses()[0].result,
      Value::from("Failed to connect to device ext-1: timeout")
    );
  }

  #[test]
  fn gatt_requires_a_connection() {
    let context = RecordingContext::new();
    let central = FakeCentral::new();
    let mut device = proxy(&context);
    let request = crate::request::GattRequest::GetPrimaryServices { service_uuid: None };

    let trans = transaction(&context, &["device", "gatt", "getPrimaryServices"]);
    device.triage(DeviceCommand::Gatt(request.clone()), trans.clone(), &*central);
    assert_eq!(trans.state(), TransactionState::Failed);

    device.did_connect(&*central);
    let trans = transaction(&context, &["device", "gatt", "getPrimaryServices"]);
    device.triage(DeviceCommand::Gatt(request), trans, &*central);
    assert_eq!(central.calls(), vec![CentralCall::Gatt(PeripheralId::from("periph-1"))]);
  }

  #[test]
  fn disconnect_without_reconnect_releases_and_notifies() {
    let context = RecordingContext::new();
    let central = FakeCentral::new();
    let mut device = proxy(&context);
    device.did_connect(&*central);
    let trans = transaction(&context, &["device", "gatt", "disconnect"]);
    device.triage(DeviceCommand::Disconnect, trans.clone(), &*central);

    let after = device.did_disconnect(None, &*central);

    assert_eq!(after, AfterDisconnect::Release);
    assert_eq!(trans.state(), TransactionState::Succeeded);
    assert_eq!(
      context.events(),
      vec![PageEvent::GattServerDisconnected {
        device_id: "ext-1".into()
      }]
    );
  }

  #[test]
  fn connect_queued_during_disconnect_reconnects() {
    let context = RecordingContext::new();
    let central = FakeCentral::new();
    let mut device = proxy(&context);
    device.did_connect(&*central);
    device.triage(
      DeviceCommand::Disconnect,
      transaction(&context, &["device", "gatt", "disconnect"]),
      &*central,
    );
    let reconnect = transaction(&context, &["device", "gatt", "connect"]);
    device.triage(DeviceCommand::Connect, reconnect.clone(), &*central);
    assert!(reconnect.is_pending());

    assert_eq!(device.did_disconnect(None, &*central), AfterDisconnect::Retain);
    assert_eq!(central.calls().last(), Some(&CentralCall::Connect(PeripheralId::from("periph-1"))));

    device.did_connect(&*central);
    assert_eq!(reconnect.state(), TransactionState::Succeeded);
  }

  #[test]
  fn disconnect_during_a_pending_connect_waits_for_it() {
    let context = RecordingContext::new();
    let central = FakeCentral::new();
    let mut device = proxy(&context);
    let connect = transaction(&context, &["device", "gatt", "connect"]);
    let disconnect = transaction(&context, &["device", "gatt", "disconnect"]);

    device.triage(DeviceCommand::Connect, connect.clone(), &*central);
    device.triage(DeviceCommand::Disconnect, disconnect.clone(), &*central);
    assert!(disconnect.is_pending());

    device.did_connect(&*central);
    assert_eq!(connect.state(), TransactionState::Succeeded);
    assert!(disconnect.is_pending());
    assert_eq!(
      central.calls(),
      vec![
        CentralCall::Connect(PeripheralId::from("periph-1")),
        CentralCall::Disconnect(PeripheralId::from("periph-1")),
      ]
    );

    assert_eq!(device.did_disconnect(None, &*central), AfterDisconnect::Release);
    assert_eq!(disconnect.state(), TransactionState::Succeeded);
    assert!(!device.is_connected());
  }

  #[test]
  fn disconnect_queued_behind_a_failed_connect_succeeds() {
    let context = RecordingContext::new();
    let central = FakeCentral::new();
    let mut device = proxy(&context);
    let connect = transaction(&context, &["device", "gatt", "connect"]);
    let disconnect = transaction(&context, &["device", "gatt", "disconnect"]);
    device.triage(DeviceCommand::Connect, connect.clone(), &*central);
    device.triage(DeviceCommand::Disconnect, disconnect.clone(), &*central);

    device.did_fail_to_connect(None);

    assert_eq!(connect.state(), TransactionState::Failed);
    assert_eq!(disconnect.state(), TransactionState::Succeeded);
    assert!(!device.is_connected());
    assert_eq!(central.calls(), vec![CentralCall::Connect(PeripheralId::from("periph-1"))]);
  }

  #[test]
  fn clear_state_abandons_and_disconnects() {
    let context = RecordingContext::new();
    let central = FakeCentral::new();
    let mut device = proxy(&context);
    device.did_connect(&*central);
    let trans = transaction(&context, &["device", "gatt", "disconnect"]);
    device.triage(DeviceCommand::Disconnect, trans.clone(), &*central);

    device.clear_state(&*central);

    assert_eq!(trans.state(), TransactionState::Abandoned);
    assert!(!device.is_connected());
    assert!(context.responses().is_empty());
  }

  #[test]
  fn describe_uses_the_external_id() {
    let context = RecordingContext::new();
    let device = proxy(&context);
    let described = device.describe();
    assert_eq!(described.id, "ext-1");
    assert_eq!(described.name.as_deref(), Some("Puck.js 69c5"));
  }
}
