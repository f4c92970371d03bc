use std::cmp::Ordering;

use tauri::{AppHandle, Emitter, Runtime};

use crate::{
  filter::Advertisement,
  models::{PickerEntry, PickerEventPayload, EVENT_PICKER},
  platform::PeripheralId,
};

/// A discovered peripheral the user may pick during a device request.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
  pub id: PeripheralId,
  pub advertisement: Advertisement,
}

impl Candidate {
  pub fn name(&self) -> Option<&str> {
    self.advertisement.name.as_deref()
  }

  pub fn title(&self) -> String {
    match self.name() {
      Some(name) => format!("{name} ({})", self.id),
      None => format!("({})", self.id),
    }
  }

  /// Named before unnamed, then by name, then by platform id.
  pub fn display_order(&self, other: &Self) -> Ordering {
    match (self.name(), other.name()) {
      (Some(_), None) => Ordering::Less,
      (None, Some(_)) => Ordering::Greater,
      (Some(a), Some(b)) => a.cmp(b).then_with(|| self.id.cmp(&other.id)),
      (None, None) => self.id.cmp(&other.id),
    }
  }
}

pub fn sort_candidates(candidates: &mut [Candidate]) {
  candidates.sort_by(Candidate::display_order);
}

pub fn picker_entries(candidates: &[Candidate]) -> Vec<PickerEntry> {
  candidates
    .iter()
    .enumerate()
    .map(|(index, candidate)| PickerEntry {
      index,
      title: candidate.title(),
      name: candidate.advertisement.name.clone(),
      rssi: candidate.advertisement.rssi,
    })
    .collect()
}

/// Presents candidates to the user. The user's answer comes back through
/// `select_device` / `cancel_device_search` on the manager handle.
pub trait Picker: Send + Sync + 'static {
  fn show_picker(&self);
  fn update_picker(&self, entries: &[PickerEntry]);
  fn hide_picker(&self);
}

/// Publishes picker state as app events for whatever UI renders it.
pub struct EventPicker<R: Runtime> {
  app: AppHandle<R>,
}

impl<R: Runtime> EventPicker<R> {
  pub fn new(app: AppHandle<R>) -> Self {
    Self { app }
  }

  fn emit(&self, visible: bool, devices: Vec<PickerEntry>) {
    let payload = PickerEventPayload { visible, devices };
    if let Err(err) = self.app.emit(EVENT_PICKER, payload) {
      log::warn!("Failed to emit picker update | event={} | err={:?}", EVENT_PICKER, err);
    }
  }
}

impl<R: Runtime> Picker for EventPicker<R> {
  fn show_picker(&self) {
    self.emit(true, Vec::new());
  }

  fn update_picker(&self, entries: &[PickerEntry]) {
    self.emit(true, entries.to_vec());
  }

  fn hide_picker(&self) {
    self.emit(false, Vec::new());
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn candidate(id: &str, name: Option<&str>) -> Candidate {
    Candidate {
      id: PeripheralId::from(id),
      advertisement: Advertisement {
        name: name.map(str::to_string),
        ..Default::default()
      },
    }
  }

  fn names(candidates: &[Candidate]) -> Vec<Option<&str>> {
    candidates.iter().map(Candidate::name).collect()
  }

  #[test]
  fn named_entries_sort_before_unnamed() {
    let mut candidates = vec![
      candidate("3", Some("Bravo")),
      candidate("1", None),
      candidate("2", Some("Alpha")),
    ];
    sort_candidates(&mut candidates);
    assert_eq!(names(&candidates), vec![Some("Alpha"), Some("Bravo"), None]);
  }

  #[test]
  fn unnamed_and_same_named_entries_sort_by_id() {
    let mut candidates = vec![
      candidate("b", None),
      candidate("z", Some("Puck")),
      candidate("a", None),
      candidate("y", Some("Puck")),
    ];
    sort_candidates(&mut candidates);
    let ids: Vec<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["y", "z", "a", "b"]);
  }

  #[test]
  fn resorting_is_stable() {
    let mut candidates = vec![candidate("b", None), candidate("a", Some("Alpha"))];
    sort_candidates(&mut candidates);
    let first = candidates.clone();
    candidates.push(candidate("c", None));
    sort_candidates(&mut candidates);
    assert_eq!(&candidates[..2], &first[..]);
  }

  #[test]
  fn titles_include_the_platform_id() {
    assert_eq!(candidate("82DF", Some("Puck.js 69c5")).title(), "Puck.js 69c5 (82DF)");
    assert_eq!(candidate("82DF", None).title(), "(82DF)");
  }

  #[test]
  fn entries_are_indexed_in_display_order() {
    let entries = picker_entries(&[candidate("a", Some("Alpha")), candidate("b", None)]);
    assert_eq!(entries[1].index, 1);
    assert_eq!(entries[1].title, "(b)");
  }
}
