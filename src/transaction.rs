//! One page request and its single eventual resolution.
//!
//! A [`Transaction`] is created when a message arrives from the page and is
//! settled exactly once: as a success, as a failure, or abandoned when the
//! requesting page is gone. Completion handlers run after settlement whatever
//! the outcome, so cleanup tied to a request (scan stop, timer disarm) cannot
//! be skipped.

use std::{
  fmt,
  sync::{Arc, Mutex as StdMutex, PoisonError},
};

use serde_json::{Map, Value};

use crate::{
  models::{InboundMessage, TransactionResponse},
  Error,
};

/// The page surface a transaction answers to.
pub trait RequestingContext: Send + Sync + 'static {
  /// Hands one resolution back to the page.
  fn deliver(&self, response: TransactionResponse);
  /// Pushes an unsolicited event to the page.
  fn notify(&self, event: PageEvent);
  /// `false` once the surface has been torn down or navigated away.
  fn is_alive(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
  GattServerDisconnected { device_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionKey {
  pub type_components: Vec<String>,
  pub id: Value,
}

impl fmt::Display for TransactionKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}#{}", self.type_components.join("."), self.id)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
  Pending,
  Succeeded,
  Failed,
  Abandoned,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
  Success(Value),
  Failure(String),
  Abandoned,
}

impl Outcome {
  pub fn state(&self) -> TransactionState {
    match self {
      Outcome::Success(_) => TransactionState::Succeeded,
      Outcome::Failure(_) => TransactionState::Failed,
      Outcome::Abandoned => TransactionState::Abandoned,
    }
  }
}

type CompletionHandler = Box<dyn FnOnce(&Outcome) + Send>;

struct Slot {
  outcome: Option<Outcome>,
  handlers: Vec<CompletionHandler>,
}

struct TransactionInner {
  key: TransactionKey,
  data: Map<String, Value>,
  context: Arc<dyn RequestingContext>,
  slot: StdMutex<Slot>,
}

#[derive(Clone)]
pub struct Transaction {
  inner: Arc<TransactionInner>,
}

impl fmt::Debug for Transaction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Transaction")
      .field("key", &self.inner.key)
      .field("state", &self.state())
      .finish()
  }
}

impl Transaction {
  pub fn new(key: TransactionKey, data: Map<String, Value>, context: Arc<dyn RequestingContext>) -> Self {
    Self {
      inner: Arc::new(TransactionInner {
        key,
        data,
        context,
        slot: StdMutex::new(Slot {
          outcome: None,
          handlers: Vec::new(),
        }),
      }),
    }
  }

  pub fn from_message(message: InboundMessage, context: Arc<dyn RequestingContext>) -> Self {
    let key = TransactionKey {
      type_components: message.kind,
      id: message.id,
    };
    Self::new(key, message.data, context)
  }

  pub fn key(&self) -> &TransactionKey {
    &self.inner.key
  }

  pub fn data(&self) -> &Map<String, Value> {
    &self.inner.data
  }

  pub fn context(&self) -> &Arc<dyn RequestingContext> {
    &self.inner.context
  }

  pub fn state(&self) -> TransactionState {
    self
      .lock_slot()
      .outcome
      .as_ref()
      .map(Outcome::state)
      .unwrap_or(TransactionState::Pending)
  }

  pub fn is_pending(&self) -> bool {
    self.state() == TransactionState::Pending
  }

  /// Returns `false` if the transaction had already been settled.
  pub fn resolve_as_success(&self, value: Value) -> bool {
    self.settle(Outcome::Success(value))
  }

  pub fn resolve_as_failure(&self, message: impl Into<String>) -> bool {
    self.settle(Outcome::Failure(message.into()))
  }

  pub fn reject(&self, error: &Error) -> bool {
    self.resolve_as_failure(error.to_string())
  }

  /// Settles without answering the page. Completion handlers still run.
  pub fn abandon(&self) -> bool {
    self.settle(Outcome::Abandoned)
  }

  /// Runs `handler` once the transaction is settled, or right away if it
  /// already is.
  pub fn add_completion_handler<F>(&self, handler: F)
  where
    F: FnOnce(&Outcome) + Send + 'static,
  {
    let outcome = {
      let mut slot = self.lock_slot();
      match slot.outcome.clone() {
        Some(outcome) => outcome,
        None => {
          slot.handlers.push(Box::new(handler));
          return;
        }
      }
    };
    handler(&outcome);
  }

  fn settle(&self, outcome: Outcome) -> bool {
    let outcome = match outcome {
      Outcome::Abandoned => Outcome::Abandoned,
      other if !self.inner.context.is_alive() => {
        log::warn!(
          "Requesting context is gone, abandoning instead | key={} | outcome={:?}",
          self.inner.key,
          other.state()
        );
        Outcome::Abandoned
      }
      other => other,
    };

    let handlers = {
      let mut slot = self.lock_slot();
      if let Some(existing) = &slot.outcome {
        log::error!(
          "Transaction settled twice, ignoring | key={} | existing={:?} | attempted={:?}",
          self.inner.key,
          existing.state(),
          outcome.state()
        );
        return false;
      }
      slot.outcome = Some(outcome.clone());
      std::mem::take(&mut slot.handlers)
    };

    let response = match &outcome {
      Outcome::Success(value) => Some(TransactionResponse {
        id: self.inner.key.id.clone(),
        success: true,
        result: value.clone(),
      }),
      Outcome::Failure(message) => Some(TransactionResponse {
        id: self.inner.key.id.clone(),
        success: false,
        result: Value::String(message.clone()),
      }),
      Outcome::Abandoned => None,
    };
    if let Some(response) = response {
      self.inner.context.deliver(response);
    }

    for handler in handlers {
      handler(&outcome);
    }
    true
  }

  fn lock_slot(&self) -> std::sync::MutexGuard<'_, Slot> {
    self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner)
  }
}
