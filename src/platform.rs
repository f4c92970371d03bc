//! The native BLE central as seen by the device manager.

use std::{fmt, future::Future};

use tokio::{runtime::Handle, sync::mpsc};
use uuid::Uuid;

use crate::{filter::Advertisement, request::GattRequest, transaction::Transaction, Error};

/// Platform-assigned peripheral identifier. Never shown to the page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeripheralId(String);

impl PeripheralId {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for PeripheralId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<String> for PeripheralId {
  fn from(value: String) -> Self {
    Self(value)
  }
}

impl From<&str> for PeripheralId {
  fn from(value: &str) -> Self {
    Self(value.to_string())
  }
}

/// Callbacks from the platform stack, each keyed by the platform id.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
  Discovered {
    id: PeripheralId,
    advertisement: Advertisement,
  },
  Connected(PeripheralId),
  Disconnected {
    id: PeripheralId,
    error: Option<String>,
  },
  FailedToConnect {
    id: PeripheralId,
    error: Option<String>,
  },
}

/// Commands issued to the platform stack. Every call returns at once;
/// results come back as [`PlatformEvent`]s.
pub trait Central: Send + Sync + 'static {
  fn is_powered_on(&self) -> bool;

  /// An empty `services` slice means an unfiltered scan.
  fn start_scan(&self, services: &[Uuid]);

  fn stop_scan(&self);

  fn connect(&self, id: &PeripheralId);

  fn disconnect(&self, id: &PeripheralId);

  /// Drops whatever the central cached for peripherals outside `bound`.
  /// Called whenever a device request ends.
  fn release_unbound(&self, _bound: &[PeripheralId]) {}

  /// Runs a GATT operation on a connected peripheral and settles
  /// `transaction` with its result.
  fn gatt(&self, id: &PeripheralId, request: GattRequest, transaction: Transaction) {
    log::warn!("GATT request on a central without GATT support | id={} | request={:?}", id, request);
    transaction.reject(&Error::UnsupportedPlatform);
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanCommand {
  Start(Vec<Uuid>),
  Stop,
}

/// Runs scan commands one after another on a single task.
///
/// Starting a scan can take several awaited platform calls; a stop issued
/// meanwhile must not overtake it, or the radio keeps scanning after the
/// request that wanted it is gone.
#[derive(Clone)]
pub struct ScanQueue {
  tx: mpsc::UnboundedSender<ScanCommand>,
}

impl ScanQueue {
  pub fn spawn<F, Fut>(runtime: &Handle, mut run: F) -> Self
  where
    F: FnMut(ScanCommand) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let (tx, mut rx) = mpsc::unbounded_channel();
    runtime.spawn(async move {
      while let Some(command) = rx.recv().await {
        run(command).await;
      }
    });
    Self { tx }
  }

  pub fn push(&self, command: ScanCommand) {
    if let Err(err) = self.tx.send(command) {
      log::warn!("Scan worker is gone, dropping command | command={:?}", err.0);
    }
  }
}
