//! Recording fakes for the platform, picker and page collaborators.

use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc, Mutex as StdMutex,
};

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::{
  models::{PickerEntry, TransactionResponse},
  picker::Picker,
  platform::{Central, PeripheralId},
  request::GattRequest,
  transaction::{PageEvent, RequestingContext, Transaction, TransactionKey},
  webview::PageContext,
};

pub struct RecordingContext {
  alive: AtomicBool,
  responses: StdMutex<Vec<TransactionResponse>>,
  events: StdMutex<Vec<PageEvent>>,
}

impl RecordingContext {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      alive: AtomicBool::new(true),
      responses: StdMutex::new(Vec::new()),
      events: StdMutex::new(Vec::new()),
    })
  }

  pub fn tear_down(&self) {
    self.alive.store(false, Ordering::SeqCst);
  }

  pub fn responses(&self) -> Vec<TransactionResponse> {
    self.responses.lock().unwrap().clone()
  }

  pub fn events(&self) -> Vec<PageEvent> {
    self.events.lock().unwrap().clone()
  }
}

impl RequestingContext for RecordingContext {
  fn deliver(&self, response: TransactionResponse) {
    self.responses.lock().unwrap().push(response);
  }

  fn notify(&self, event: PageEvent) {
    self.events.lock().unwrap().push(event);
  }

  fn is_alive(&self) -> bool {
    self.alive.load(Ordering::SeqCst)
  }
}

impl PageContext for RecordingContext {
  fn tear_down(&self) {
    self.alive.store(false, Ordering::SeqCst);
  }
}

pub fn transaction(context: &Arc<RecordingContext>, components: &[&str]) -> Transaction {
  let key = TransactionKey {
    type_components: components.iter().map(|c| c.to_string()).collect(),
    id: json!(components.join(".")),
  };
  Transaction::new(key, Map::new(), context.clone())
}

#[derive(Debug, Clone, PartialEq)]
pub enum CentralCall {
  StartScan(Vec<Uuid>),
  StopScan,
  Connect(PeripheralId),
  Disconnect(PeripheralId),
  Gatt(PeripheralId),
}

pub struct FakeCentral {
  powered: AtomicBool,
  calls: StdMutex<Vec<CentralCall>>,
  retained: StdMutex<Option<Vec<PeripheralId>>>,
}

impl FakeCentral {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      powered: AtomicBool::new(true),
      calls: StdMutex::new(Vec::new()),
      retained: StdMutex::new(None),
    })
  }

  pub fn powered_off() -> Arc<Self> {
    let central = Self::new();
    central.powered.store(false, Ordering::SeqCst);
    central
  }

  pub fn calls(&self) -> Vec<CentralCall> {
    self.calls.lock().unwrap().clone()
  }

  /// Peripherals kept by the latest `release_unbound`, sorted.
  pub fn last_retained(&self) -> Option<Vec<PeripheralId>> {
    self.retained.lock().unwrap().clone()
  }

  pub fn scan_starts(&self) -> usize {
    self.count(|call| matches!(call, CentralCall::StartScan(_)))
  }

  pub fn scan_stops(&self) -> usize {
    self.count(|call| *call == CentralCall::StopScan)
  }

  fn count(&self, predicate: impl Fn(&CentralCall) -> bool) -> usize {
    self.calls.lock().unwrap().iter().filter(|call| predicate(call)).count()
  }

  fn record(&self, call: CentralCall) {
    self.calls.lock().unwrap().push(call);
  }
}

impl Central for FakeCentral {
  fn is_powered_on(&self) -> bool {
    self.powered.load(Ordering::SeqCst)
  }

  fn start_scan(&self, services: &[Uuid]) {
    self.record(CentralCall::StartScan(services.to_vec()));
  }

  fn stop_scan(&self) {
    self.record(CentralCall::StopScan);
  }

  fn connect(&self, id: &PeripheralId) {
    self.record(CentralCall::Connect(id.clone()));
  }

  fn disconnect(&self, id: &PeripheralId) {
    self.record(CentralCall::Disconnect(id.clone()));
  }

  fn release_unbound(&self, bound: &[PeripheralId]) {
    let mut bound = bound.to_vec();
    bound.sort();
    *self.retained.lock().unwrap() = Some(bound);
  }

  fn gatt(&self, id: &PeripheralId, _request: GattRequest, transaction: Transaction) {
    self.record(CentralCall::Gatt(id.clone()));
    transaction.resolve_as_success(Value::Null);
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PickerCall {
  Show,
  Update(Vec<String>),
  Hide,
}

pub struct FakePicker {
  calls: StdMutex<Vec<PickerCall>>,
}

impl FakePicker {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      calls: StdMutex::new(Vec::new()),
    })
  }

  pub fn calls(&self) -> Vec<PickerCall> {
    self.calls.lock().unwrap().clone()
  }

  pub fn last_titles(&self) -> Option<Vec<String>> {
    self.calls().into_iter().rev().find_map(|call| match call {
      PickerCall::Update(titles) => Some(titles),
      _ => None,
    })
  }
}

impl Picker for FakePicker {
  fn show_picker(&self) {
    self.calls.lock().unwrap().push(PickerCall::Show);
  }

  fn update_picker(&self, entries: &[PickerEntry]) {
    let titles = entries.iter().map(|entry| entry.title.clone()).collect();
    self.calls.lock().unwrap().push(PickerCall::Update(titles));
  }

  fn hide_picker(&self) {
    self.calls.lock().unwrap().push(PickerCall::Hide);
  }
}
