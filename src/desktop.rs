use std::{
  collections::HashMap,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex as StdMutex, PoisonError,
  },
};

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use btleplug::{
  api::{
    Central as _, CentralEvent, CentralState, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    PeripheralProperties, ScanFilter, Service, WriteType,
  },
  platform::{Adapter, Manager as BtleManager, Peripheral, PeripheralId as BtlePeripheralId},
};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tauri::{async_runtime, plugin::PluginApi, AppHandle, Runtime};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::{
  config::Config,
  filter::Advertisement,
  models::*,
  platform::{Central, PeripheralId, PlatformEvent, ScanCommand, ScanQueue},
  request::GattRequest,
  transaction::Transaction,
  Error, Result,
};

pub fn init<R: Runtime, C: DeserializeOwned>(
  _app: &AppHandle<R>,
  _api: PluginApi<R, C>,
  config: &Config,
  events: UnboundedSender<PlatformEvent>,
) -> Result<Arc<dyn Central>> {
  let adapter_index = config.adapter_index;
  let (adapter, powered) = async_runtime::block_on(async move {
    let manager = BtleManager::new().await?;
    let mut adapters = manager.adapters().await?;
    if adapter_index >= adapters.len() {
      return Err(Error::NoAdapter);
    }
    let adapter = adapters.swap_remove(adapter_index);
    let powered = match adapter.adapter_state().await {
      Ok(state) => !matches!(state, CentralState::PoweredOff),
      Err(err) => {
        log::warn!("Failed to read adapter state, assuming powered on | err={:?}", err);
        true
      }
    };
    Ok::<_, Error>((adapter, powered))
  })?;

  log::info!("Bluetooth adapter ready | adapter_index={} | powered={}", adapter_index, powered);
  let scan = spawn_scan_worker(adapter.clone());
  let central = Arc::new(BtleplugCentral {
    adapter,
    scan,
    powered: AtomicBool::new(powered),
    peripherals: StdMutex::new(HashMap::new()),
    events,
  });
  central.spawn_event_listener();
  Ok(central as Arc<dyn Central>)
}

/// [`Central`] backed by a btleplug adapter.
///
/// Scan commands go through one ordered worker. Connection and GATT
/// commands run as their own tasks and report back through the platform
/// event channel, into which adapter events are pumped as well.
struct BtleplugCentral {
  adapter: Adapter,
  scan: ScanQueue,
  powered: AtomicBool,
  peripherals: StdMutex<HashMap<PeripheralId, Peripheral>>,
  events: UnboundedSender<PlatformEvent>,
}

impl BtleplugCentral {
  fn peripheral(&self, id: &PeripheralId) -> Option<Peripheral> {
    self
      .peripherals
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(id)
      .cloned()
  }

  fn spawn_event_listener(self: &Arc<Self>) {
    let central = Arc::clone(self);
    async_runtime::spawn(async move {
      let mut events = match central.adapter.events().await {
        Ok(stream) => stream,
        Err(err) => {
          log::error!("Failed to subscribe to Bluetooth adapter events: {err}");
          return;
        }
      };
      while let Some(event) = events.next().await {
        central.handle_event(event).await;
      }
      log::info!("Bluetooth adapter event stream ended");
    });
  }

  async fn handle_event(&self, event: CentralEvent) {
    match event {
      CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
        let peripheral = match self.adapter.peripheral(&id).await {
          Ok(peripheral) => peripheral,
          Err(err) => {
            log::debug!("Discovered peripheral vanished | id={:?} | err={:?}", id, err);
            return;
          }
        };
        let properties = match peripheral.properties().await {
          Ok(Some(properties)) => properties,
          Ok(None) => return,
          Err(err) => {
            log::debug!("Failed to read peripheral properties | id={:?} | err={:?}", id, err);
            return;
          }
        };
        let key = peripheral_key(&id);
        self
          .peripherals
          .lock()
          .unwrap_or_else(PoisonError::into_inner)
          .insert(key.clone(), peripheral);
        self.send(PlatformEvent::Discovered {
          id: key,
          advertisement: advertisement_from(properties),
        });
      }
      CentralEvent::DeviceDisconnected(id) => {
        self.send(PlatformEvent::Disconnected {
          id: peripheral_key(&id),
          error: None,
        });
      }
      CentralEvent::StateUpdate(state) => {
        let powered = !matches!(state, CentralState::PoweredOff);
        log::info!("Bluetooth adapter state changed | state={:?}", state);
        self.powered.store(powered, Ordering::SeqCst);
      }
      _ => {}
    }
  }

  fn send(&self, event: PlatformEvent) {
    if self.events.send(event).is_err() {
      log::debug!("Platform event dropped, device manager is gone");
    }
  }
}

impl Central for BtleplugCentral {
  fn is_powered_on(&self) -> bool {
    self.powered.load(Ordering::SeqCst)
  }

  fn start_scan(&self, services: &[Uuid]) {
    self.scan.push(ScanCommand::Start(services.to_vec()));
  }

  fn stop_scan(&self) {
    self.scan.push(ScanCommand::Stop);
  }

  fn release_unbound(&self, bound: &[PeripheralId]) {
    let mut peripherals = self.peripherals.lock().unwrap_or_else(PoisonError::into_inner);
    let before = peripherals.len();
    peripherals.retain(|id, _| bound.contains(id));
    log::debug!("Released cached peripherals | released={} | kept={}", before - peripherals.len(), peripherals.len());
  }

  fn connect(&self, id: &PeripheralId) {
    let events = self.events.clone();
    let id = id.clone();
    let Some(peripheral) = self.peripheral(&id) else {
      let _ = events.send(PlatformEvent::FailedToConnect {
        id,
        error: Some("peripheral is no longer known to the adapter".into()),
      });
      return;
    };
    async_runtime::spawn(async move {
      let event = match connect_and_discover(&peripheral).await {
        Ok(()) => PlatformEvent::Connected(id),
        Err(err) => PlatformEvent::FailedToConnect {
          id,
          error: Some(err.to_string()),
        },
      };
      let _ = events.send(event);
    });
  }

  fn disconnect(&self, id: &PeripheralId) {
    let Some(peripheral) = self.peripheral(id) else {
      log::warn!("Disconnect for unknown peripheral | id={}", id);
      return;
    };
    let id = id.clone();
    async_runtime::spawn(async move {
      if let Err(err) = peripheral.disconnect().await {
        log::warn!("Failed to disconnect | id={} | err={:?}", id, err);
      }
    });
  }

  fn gatt(&self, id: &PeripheralId, request: GattRequest, transaction: Transaction) {
    let Some(peripheral) = self.peripheral(id) else {
      transaction.reject(&Error::DeviceNotFound(transaction.key().to_string()));
      return;
    };
    async_runtime::spawn(async move {
      let device_id = page_device_id(&transaction);
      match run_gatt(&peripheral, &device_id, request).await {
        Ok(value) => {
          transaction.resolve_as_success(value);
        }
        Err(err) => {
          log::warn!("GATT request failed | key={} | err={}", transaction.key(), err);
          transaction.reject(&err);
        }
      }
    });
  }
}

fn spawn_scan_worker(adapter: Adapter) -> ScanQueue {
  ScanQueue::spawn(async_runtime::handle().inner(), move |command| {
    let adapter = adapter.clone();
    async move {
      match command {
        ScanCommand::Start(services) => {
          log::debug!("Starting scan | services={:?}", services);
          if let Err(err) = adapter.start_scan(ScanFilter { services }).await {
            log::error!("Failed to start scan | err={:?}", err);
          }
        }
        ScanCommand::Stop => {
          if let Err(err) = adapter.stop_scan().await {
            log::warn!("Failed to stop scan | err={:?}", err);
          }
        }
      }
    }
  })
}

async fn connect_and_discover(peripheral: &Peripheral) -> Result<()> {
  if !peripheral.is_connected().await.unwrap_or(false) {
    peripheral.connect().await?;
  }
  peripheral.discover_services().await?;
  Ok(())
}

async fn run_gatt(peripheral: &Peripheral, device_id: &str, request: GattRequest) -> Result<Value> {
  match request {
    GattRequest::GetPrimaryServices { service_uuid } => {
      let services: Vec<BluetoothService> = peripheral
        .services()
        .into_iter()
        .filter(|service| service.primary)
        .filter(|service| service_uuid.map_or(true, |target| service.uuid == target))
        .map(service_to_model)
        .collect();
      if let (Some(target), true) = (service_uuid, services.is_empty()) {
        return Err(Error::ServiceNotFound {
          device_id: device_id.to_string(),
          service_uuid: target.to_string(),
        });
      }
      Ok(serde_json::to_value(services)?)
    }
    GattRequest::GetCharacteristics {
      service_uuid,
      characteristic_uuid,
    } => {
      let service = find_service(peripheral, device_id, service_uuid)?;
      let characteristics: Vec<BluetoothCharacteristic> = service
        .characteristics
        .iter()
        .filter(|chr| characteristic_uuid.map_or(true, |target| chr.uuid == target))
        .map(characteristic_to_model)
        .collect();
      if let (Some(target), true) = (characteristic_uuid, characteristics.is_empty()) {
        return Err(Error::CharacteristicNotFound {
          device_id: device_id.to_string(),
          characteristic_uuid: target.to_string(),
        });
      }
      Ok(serde_json::to_value(characteristics)?)
    }
    GattRequest::ReadValue {
      service_uuid,
      characteristic_uuid,
    } => {
      let characteristic = find_characteristic(peripheral, device_id, service_uuid, characteristic_uuid)?;
      let bytes = peripheral.read(&characteristic).await?;
      Ok(serde_json::to_value(BluetoothValue {
        value: BASE64_STANDARD.encode(bytes),
      })?)
    }
    GattRequest::WriteValue {
      service_uuid,
      characteristic_uuid,
      value,
      with_response,
    } => {
      let characteristic = find_characteristic(peripheral, device_id, service_uuid, characteristic_uuid)?;
      let write_type = if with_response {
        WriteType::WithResponse
      } else {
        WriteType::WithoutResponse
      };
      peripheral.write(&characteristic, &value, write_type).await?;
      Ok(Value::Null)
    }
  }
}

fn find_service(peripheral: &Peripheral, device_id: &str, service_uuid: Uuid) -> Result<Service> {
  peripheral
    .services()
    .into_iter()
    .find(|service| service.uuid == service_uuid)
    .ok_or_else(|| Error::ServiceNotFound {
      device_id: device_id.to_string(),
      service_uuid: service_uuid.to_string(),
    })
}

fn find_characteristic(
  peripheral: &Peripheral,
  device_id: &str,
  service_uuid: Uuid,
  characteristic_uuid: Uuid,
) -> Result<Characteristic> {
  find_service(peripheral, device_id, service_uuid)?
    .characteristics
    .into_iter()
    .find(|chr| chr.uuid == characteristic_uuid)
    .ok_or_else(|| Error::CharacteristicNotFound {
      device_id: device_id.to_string(),
      characteristic_uuid: characteristic_uuid.to_string(),
    })
}

/// The id the page used for this request, for error messages.
fn page_device_id(transaction: &Transaction) -> String {
  transaction
    .data()
    .get("deviceId")
    .and_then(Value::as_str)
    .unwrap_or_default()
    .to_string()
}

fn peripheral_key(id: &BtlePeripheralId) -> PeripheralId {
  PeripheralId::from(format!("{id:?}"))
}

fn advertisement_from(properties: PeripheralProperties) -> Advertisement {
  Advertisement {
    name: properties.local_name,
    rssi: properties.rssi,
    tx_power: properties.tx_power_level,
    services: properties.services,
    manufacturer_data: properties.manufacturer_data,
    service_data: properties.service_data,
  }
}

fn service_to_model(service: Service) -> BluetoothService {
  BluetoothService {
    uuid: service.uuid.to_string(),
    is_primary: service.primary,
    characteristics: service.characteristics.iter().map(characteristic_to_model).collect(),
  }
}

fn characteristic_to_model(characteristic: &Characteristic) -> BluetoothCharacteristic {
  let flags = characteristic.properties;
  BluetoothCharacteristic {
    uuid: characteristic.uuid.to_string(),
    properties: CharacteristicProperties {
      broadcast: flags.contains(CharPropFlags::BROADCAST),
      read: flags.contains(CharPropFlags::READ),
      write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
      write: flags.contains(CharPropFlags::WRITE),
      notify: flags.contains(CharPropFlags::NOTIFY),
      indicate: flags.contains(CharPropFlags::INDICATE),
      authenticated_signed_writes: flags.contains(CharPropFlags::AUTHENTICATED_SIGNED_WRITES),
    },
  }
}
