use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::platform::PeripheralId;

/// Identifier handed to the page for a selected device. Random per
/// selection, never derived from the platform identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ExternalId(String);

impl ExternalId {
  fn generate() -> Self {
    Self(Uuid::new_v4().to_string())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for ExternalId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<String> for ExternalId {
  fn from(value: String) -> Self {
    Self(value)
  }
}

impl From<&str> for ExternalId {
  fn from(value: &str) -> Self {
    Self(value.to_string())
  }
}

struct Entry<D> {
  internal_id: PeripheralId,
  device: D,
}

/// Selected devices indexed both by platform id and by external id.
///
/// The two maps are only touched through `bind_with` / `remove_*` / `clear`,
/// so an entry is always visible through both or through neither.
pub struct IdentityRegistry<D> {
  by_internal: HashMap<PeripheralId, ExternalId>,
  by_external: HashMap<ExternalId, Entry<D>>,
}

impl<D> Default for IdentityRegistry<D> {
  fn default() -> Self {
    Self {
      by_internal: HashMap::new(),
      by_external: HashMap::new(),
    }
  }
}

impl<D> IdentityRegistry<D> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn bind(&mut self, internal_id: PeripheralId, device: D) -> ExternalId {
    self.bind_with(internal_id, |_| device)
  }

  /// Like [`bind`](Self::bind) but lets the device be built knowing its
  /// external id. Rebinding an internal id replaces the previous entry.
  pub fn bind_with<F>(&mut self, internal_id: PeripheralId, make: F) -> ExternalId
  where
    F: FnOnce(&ExternalId) -> D,
  {
    self.remove_internal(&internal_id);
    let mut external_id = ExternalId::generate();
    while self.by_external.contains_key(&external_id) {
      external_id = ExternalId::generate();
    }
    let device = make(&external_id);
    self.by_internal.insert(internal_id.clone(), external_id.clone());
    self.by_external.insert(
      external_id.clone(),
      Entry {
        internal_id,
        device,
      },
    );
    external_id
  }

  pub fn contains_internal(&self, internal_id: &PeripheralId) -> bool {
    self.by_internal.contains_key(internal_id)
  }

  pub fn lookup_by_external(&self, external_id: &ExternalId) -> Option<&D> {
    self.by_external.get(external_id).map(|entry| &entry.device)
  }

  pub fn lookup_by_external_mut(&mut self, external_id: &ExternalId) -> Option<&mut D> {
    self.by_external.get_mut(external_id).map(|entry| &mut entry.device)
  }

  pub fn lookup_by_internal(&self, internal_id: &PeripheralId) -> Option<&D> {
    let external_id = self.by_internal.get(internal_id)?;
    self.lookup_by_external(external_id)
  }

  pub fn lookup_by_internal_mut(&mut self, internal_id: &PeripheralId) -> Option<&mut D> {
    let external_id = self.by_internal.get(internal_id)?;
    self.by_external.get_mut(external_id).map(|entry| &mut entry.device)
  }

  pub fn external_id_of(&self, internal_id: &PeripheralId) -> Option<&ExternalId> {
    self.by_internal.get(internal_id)
  }

  pub fn remove_internal(&mut self, internal_id: &PeripheralId) -> Option<D> {
    let external_id = self.by_internal.remove(internal_id)?;
    self.by_external.remove(&external_id).map(|entry| entry.device)
  }

  pub fn remove_external(&mut self, external_id: &ExternalId) -> Option<D> {
    let entry = self.by_external.remove(external_id)?;
    self.by_internal.remove(&entry.internal_id);
    Some(entry.device)
  }

  pub fn internal_ids(&self) -> impl Iterator<Item = &PeripheralId> {
    self.by_internal.keys()
  }

  /// Empties both indices, handing every device back to the caller.
  pub fn drain(&mut self) -> Vec<D> {
    self.by_internal.clear();
    self.by_external.drain().map(|(_, entry)| entry.device).collect()
  }

  pub fn len(&self) -> usize {
    self.by_external.len()
  }

  pub fn is_empty(&self) -> bool {
    self.by_external.is_empty()
  }
}
