//! Device request arbitration.
//!
//! The [`DeviceManager`] owns the outstanding `requestDevice` transaction,
//! the candidate list, the scan state and the identity registry. It runs as a
//! single task; page messages, picker feedback, platform callbacks and timer
//! expiry all reach it as [`Command`]s through one channel, so none of them
//! can interleave with another half-way through a transition.

use std::{
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
  time::Duration,
};

use tokio::{
  runtime::Handle,
  sync::{mpsc, oneshot},
  task::{AbortHandle, JoinHandle},
  time::sleep,
};
use uuid::Uuid;

use crate::{
  config::Config,
  device::{AfterDisconnect, DeviceProxy},
  filter::{Advertisement, FilterSet},
  models::{InboundMessage, PickerEntry},
  picker::{picker_entries, sort_candidates, Candidate, Picker},
  platform::{Central, PeripheralId, PlatformEvent},
  registry::{ExternalId, IdentityRegistry},
  request::{DeviceCommand, Request},
  transaction::{RequestingContext, Transaction, TransactionState},
  Error, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
  Idle,
  AwaitingDeviceSelection,
}

/// Point-in-time view of the manager, mostly for diagnostics and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerSnapshot {
  pub state: ManagerState,
  pub scan_active: bool,
  pub candidates: Vec<PickerEntry>,
  pub bound_devices: usize,
  pub autoselect: bool,
  pub autoselect_armed: bool,
}

enum Command {
  Message {
    message: InboundMessage,
    context: Arc<dyn RequestingContext>,
  },
  Platform(PlatformEvent),
  SelectDeviceAt(usize),
  CancelDeviceSearch,
  AutoSelectTimeout {
    generation: u64,
  },
  SetAutoselect(bool),
  Teardown,
  Snapshot(oneshot::Sender<ManagerSnapshot>),
}

/// Cloneable sender side of a running [`DeviceManager`].
#[derive(Clone)]
pub struct ManagerHandle {
  tx: mpsc::UnboundedSender<Command>,
}

impl ManagerHandle {
  pub fn post_message(&self, message: InboundMessage, context: Arc<dyn RequestingContext>) -> Result<()> {
    self.send(Command::Message { message, context })
  }

  pub fn platform_event(&self, event: PlatformEvent) -> Result<()> {
    self.send(Command::Platform(event))
  }

  pub fn select_device_at(&self, index: usize) -> Result<()> {
    self.send(Command::SelectDeviceAt(index))
  }

  pub fn cancel_device_search(&self) -> Result<()> {
    self.send(Command::CancelDeviceSearch)
  }

  pub fn set_autoselect(&self, enabled: bool) -> Result<()> {
    self.send(Command::SetAutoselect(enabled))
  }

  /// Abandons everything tied to the current page. The manager stays usable.
  pub fn teardown(&self) -> Result<()> {
    self.send(Command::Teardown)
  }

  pub async fn snapshot(&self) -> Result<ManagerSnapshot> {
    let (tx, rx) = oneshot::channel();
    self.send(Command::Snapshot(tx))?;
    rx.await.map_err(|_| Error::ManagerStopped)
  }

  fn send(&self, command: Command) -> Result<()> {
    self.tx.send(command).map_err(|_| Error::ManagerStopped)
  }
}

/// Idempotent scan switch. Shared with transaction completion handlers.
#[derive(Clone)]
struct ScanControl {
  central: Arc<dyn Central>,
  active: Arc<AtomicBool>,
}

impl ScanControl {
  fn start(&self, services: &[Uuid]) {
    self.active.store(true, Ordering::SeqCst);
    self.central.start_scan(services);
  }

  fn stop(&self) {
    if self.active.swap(false, Ordering::SeqCst) {
      log::debug!("Stopping scan");
      self.central.stop_scan();
    }
  }

  fn is_active(&self) -> bool {
    self.active.load(Ordering::SeqCst)
  }
}

struct Discovery {
  transaction: Transaction,
  filters: FilterSet,
  generation: u64,
  timer: Option<AbortHandle>,
}

pub struct DeviceManager {
  central: Arc<dyn Central>,
  picker: Arc<dyn Picker>,
  scan: ScanControl,
  runtime: Handle,
  commands: mpsc::WeakUnboundedSender<Command>,
  autoselect: bool,
  autoselect_timeout: Duration,
  discovery: Option<Discovery>,
  candidates: Vec<Candidate>,
  devices: IdentityRegistry<DeviceProxy>,
  generation: u64,
}

impl DeviceManager {
  /// Starts the manager task on `runtime` and returns its handle. The task
  /// ends, tearing down its state, once every handle is dropped.
  pub fn spawn(
    central: Arc<dyn Central>,
    picker: Arc<dyn Picker>,
    config: &Config,
    runtime: Handle,
  ) -> ManagerHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let manager = DeviceManager {
      scan: ScanControl {
        central: central.clone(),
        active: Arc::new(AtomicBool::new(false)),
      },
      central,
      picker,
      runtime: runtime.clone(),
      commands: tx.downgrade(),
      autoselect: config.autoselect,
      autoselect_timeout: config.autoselect_timeout(),
      discovery: None,
      candidates: Vec::new(),
      devices: IdentityRegistry::new(),
      generation: 0,
    };
    runtime.spawn(manager.run(rx));
    ManagerHandle { tx }
  }

  async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = rx.recv().await {
      self.handle(command);
    }
    log::info!("Device manager stopping");
    self.clear_state();
  }

  fn handle(&mut self, command: Command) {
    match command {
      Command::Message { message, context } => self.receive(message, context),
      Command::Platform(event) => self.platform_event(event),
      Command::SelectDeviceAt(index) => self.select_device_at(index),
      Command::CancelDeviceSearch => self.cancel_device_search(),
      Command::AutoSelectTimeout { generation } => self.autoselect_expired(generation),
      Command::SetAutoselect(enabled) => self.set_autoselect(enabled),
      Command::Teardown => self.clear_state(),
      Command::Snapshot(reply) => {
        let _ = reply.send(self.snapshot());
      }
    }
  }

  fn state(&self) -> ManagerState {
    if self.discovery.is_some() {
      ManagerState::AwaitingDeviceSelection
    } else {
      ManagerState::Idle
    }
  }

  fn snapshot(&self) -> ManagerSnapshot {
    ManagerSnapshot {
      state: self.state(),
      scan_active: self.scan.is_active(),
      candidates: picker_entries(&self.candidates),
      bound_devices: self.devices.len(),
      autoselect: self.autoselect,
      autoselect_armed: self
        .discovery
        .as_ref()
        .map(|discovery| discovery.timer.is_some())
        .unwrap_or(false),
    }
  }

  fn receive(&mut self, message: InboundMessage, context: Arc<dyn RequestingContext>) {
    let transaction = Transaction::from_message(message, context);
    match Request::decode(transaction.key(), transaction.data()) {
      Ok(Request::RequestDevice(filters)) => self.request_device(transaction, filters),
      Ok(Request::Device { device_id, command }) => self.route_to_device(&device_id, command, transaction),
      Err(err) => {
        log::warn!("Rejecting request | key={} | err={}", transaction.key(), err);
        transaction.reject(&err);
      }
    }
  }

  fn route_to_device(&mut self, device_id: &ExternalId, command: DeviceCommand, transaction: Transaction) {
    match self.devices.lookup_by_external_mut(device_id) {
      Some(device) => device.triage(command, transaction, &*self.central),
      None => {
        let err = Error::DeviceNotFound(transaction.key().to_string());
        log::warn!("Device request for unknown device | device_id={}", device_id);
        transaction.reject(&err);
      }
    }
  }

  fn request_device(&mut self, transaction: Transaction, filters: FilterSet) {
    if let Some(outstanding) = &self.discovery {
      log::warn!(
        "Device request while another is outstanding | new={} | outstanding={}",
        transaction.key(),
        outstanding.transaction.key()
      );
      transaction.reject(&Error::RequestInProgress);
      return;
    }
    if !self.central.is_powered_on() {
      log::warn!("Device request with Bluetooth powered off | key={}", transaction.key());
      transaction.reject(&Error::BluetoothNotActivated);
      self.scan.stop();
      self.candidates.clear();
      return;
    }

    self.generation += 1;
    let generation = self.generation;
    let services = filters.scan_services();
    log::info!(
      "Requesting device | key={} | filters={:?} | scan_services={} | autoselect={}",
      transaction.key(),
      filters,
      services.len(),
      self.autoselect
    );

    self.candidates.clear();
    let timer = self.autoselect.then(|| self.arm_autoselect_timer(generation));
    {
      let scan = self.scan.clone();
      let timer = timer.as_ref().map(JoinHandle::abort_handle);
      transaction.add_completion_handler(move |outcome| {
        if let Some(timer) = timer {
          timer.abort();
        }
        scan.stop();
        log::debug!("Device request settled | outcome={:?}", outcome.state());
      });
    }
    self.discovery = Some(Discovery {
      transaction,
      filters,
      generation,
      timer: timer.as_ref().map(JoinHandle::abort_handle),
    });
    self.scan.start(&services);
    self.picker.show_picker();
  }

  fn arm_autoselect_timer(&self, generation: u64) -> JoinHandle<()> {
    let commands = self.commands.clone();
    let timeout = self.autoselect_timeout;
    self.runtime.spawn(async move {
      sleep(timeout).await;
      if let Some(commands) = commands.upgrade() {
        let _ = commands.send(Command::AutoSelectTimeout { generation });
      }
    })
  }

  fn platform_event(&mut self, event: PlatformEvent) {
    match event {
      PlatformEvent::Discovered { id, advertisement } => self.did_discover(id, advertisement),
      PlatformEvent::Connected(id) => match self.devices.lookup_by_internal_mut(&id) {
        Some(device) => device.did_connect(&*self.central),
        None => log::warn!("Unexpected connect notification | peripheral={}", id),
      },
      PlatformEvent::FailedToConnect { id, error } => match self.devices.lookup_by_internal_mut(&id) {
        Some(device) => device.did_fail_to_connect(error),
        None => log::warn!("Unexpected connect failure | peripheral={} | error={:?}", id, error),
      },
      PlatformEvent::Disconnected { id, error } => {
        let Some(device) = self.devices.lookup_by_internal_mut(&id) else {
          log::warn!("Unexpected disconnect notification | peripheral={}", id);
          return;
        };
        if device.did_disconnect(error, &*self.central) == AfterDisconnect::Release {
          self.devices.remove_internal(&id);
        }
      }
    }
  }

  fn did_discover(&mut self, id: PeripheralId, advertisement: Advertisement) {
    let Some(discovery) = &self.discovery else {
      return;
    };
    if !discovery.filters.includes(&advertisement) {
      log::debug!("Peripheral excluded by filters | peripheral={} | name={:?}", id, advertisement.name);
      return;
    }
    if self.candidates.iter().any(|candidate| candidate.id == id) {
      return;
    }

    log::info!("New peripheral discovered | peripheral={} | name={:?}", id, advertisement.name);
    self.candidates.push(Candidate { id, advertisement });
    sort_candidates(&mut self.candidates);

    if self.autoselect {
      self.select_device_at(0);
    } else {
      self.picker.update_picker(&picker_entries(&self.candidates));
    }
  }

  fn select_device_at(&mut self, index: usize) {
    let Some(discovery) = &self.discovery else {
      log::warn!("Device selected with no outstanding request | index={}", index);
      return;
    };
    let Some(candidate) = self.candidates.get(index).cloned() else {
      log::warn!("Selected index out of range | index={} | candidates={}", index, self.candidates.len());
      return;
    };
    let transaction = discovery.transaction.clone();

    if self.devices.contains_internal(&candidate.id) {
      log::warn!("Selected peripheral is already bound | peripheral={}", candidate.id);
      transaction.reject(&Error::DeviceAlreadySelected(candidate.title()));
    } else {
      self.bind_selection(candidate, &transaction);
    }
    self.finish_discovery();
  }

  fn bind_selection(&mut self, candidate: Candidate, transaction: &Transaction) {
    let context = transaction.context().clone();
    let Candidate { id, advertisement } = candidate;
    let external_id = self.devices.bind_with(id.clone(), |external_id| {
      DeviceProxy::new(id.clone(), external_id.clone(), advertisement, context)
    });
    let described = self.devices.lookup_by_external(&external_id).map(DeviceProxy::describe);

    match serde_json::to_value(described) {
      Ok(value) => {
        transaction.resolve_as_success(value);
      }
      Err(err) => {
        transaction.reject(&Error::from(err));
      }
    }

    if transaction.state() == TransactionState::Succeeded {
      log::info!("Device selected | device_id={} | peripheral={}", external_id, id);
    } else {
      self.devices.remove_external(&external_id);
    }
  }

  fn cancel_device_search(&mut self) {
    let Some(discovery) = &self.discovery else {
      log::warn!("Cancel with no outstanding device request");
      return;
    };
    log::info!("User cancelled device selection | key={}", discovery.transaction.key());
    discovery.transaction.reject(&Error::SelectionCancelled);
    self.finish_discovery();
  }

  fn autoselect_expired(&mut self, generation: u64) {
    let Some(discovery) = self.discovery.as_ref().filter(|d| d.generation == generation) else {
      log::debug!("Ignoring stale auto-select expiry | generation={}", generation);
      return;
    };
    log::info!("Auto-select timed out | key={}", discovery.transaction.key());
    let timeout_ms = self.autoselect_timeout.as_millis() as u64;
    discovery.transaction.reject(&Error::SelectionTimeout(timeout_ms));
    self.finish_discovery();
  }

  fn set_autoselect(&mut self, enabled: bool) {
    self.autoselect = enabled;
    if !enabled {
      if let Some(timer) = self.discovery.as_mut().and_then(|discovery| discovery.timer.take()) {
        timer.abort();
      }
    }
  }

  /// Leaves `AwaitingDeviceSelection`. The scan is stopped before the
  /// candidates are dropped so no late callback can refill the list.
  fn finish_discovery(&mut self) {
    if let Some(discovery) = self.discovery.take() {
      if let Some(timer) = discovery.timer {
        timer.abort();
      }
      if discovery.transaction.is_pending() {
        discovery.transaction.abandon();
      }
    }
    self.scan.stop();
    self.candidates.clear();
    self.release_unbound();
    self.picker.update_picker(&[]);
    self.picker.hide_picker();
  }

  fn release_unbound(&self) {
    let bound: Vec<PeripheralId> = self.devices.internal_ids().cloned().collect();
    self.central.release_unbound(&bound);
  }

  fn clear_state(&mut self) {
    log::info!(
      "Clearing manager state | outstanding={} | devices={}",
      self.discovery.is_some(),
      self.devices.len()
    );
    if let Some(discovery) = &self.discovery {
      discovery.transaction.abandon();
    }
    self.finish_discovery();
    for mut device in self.devices.drain() {
      device.clear_state(&*self.central);
    }
    self.release_unbound();
  }
}
