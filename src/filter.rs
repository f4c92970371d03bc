use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::{
  models::{DeviceFilter, RequestDeviceOptions},
  Error, Result,
};

/// What a peripheral advertised at the time it was seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Advertisement {
  pub name: Option<String>,
  pub rssi: Option<i16>,
  pub tx_power: Option<i16>,
  pub services: Vec<Uuid>,
  pub manufacturer_data: HashMap<u16, Vec<u8>>,
  pub service_data: HashMap<Uuid, Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
  pub name: Option<String>,
  pub name_prefix: Option<String>,
  pub services: Vec<Uuid>,
}

impl Filter {
  /// All criteria present must hold.
  pub fn matches(&self, advertisement: &Advertisement) -> bool {
    if let Some(name) = &self.name {
      if advertisement.name.as_deref() != Some(name.as_str()) {
        return false;
      }
    }
    if let Some(prefix) = &self.name_prefix {
      if !advertisement
        .name
        .as_deref()
        .map(|value| value.starts_with(prefix.as_str()))
        .unwrap_or(false)
      {
        return false;
      }
    }
    if !self.services.is_empty() {
      let present: HashSet<&Uuid> = advertisement.services.iter().collect();
      if !self.services.iter().all(|uuid| present.contains(uuid)) {
        return false;
      }
    }
    true
  }
}

/// `true` if any single filter matches. An empty set matches nothing.
pub fn included(advertisement: &Advertisement, filters: &[Filter]) -> bool {
  filters.iter().any(|filter| filter.matches(advertisement))
}

/// The device criteria of one discovery request.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterSet {
  AcceptAll,
  Any(Vec<Filter>),
}

impl FilterSet {
  pub fn includes(&self, advertisement: &Advertisement) -> bool {
    match self {
      FilterSet::AcceptAll => true,
      FilterSet::Any(filters) => included(advertisement, filters),
    }
  }

  /// Services the platform scan can be narrowed to. Empty means an
  /// unfiltered scan, which is required as soon as one filter does not
  /// name services.
  pub fn scan_services(&self) -> Vec<Uuid> {
    let FilterSet::Any(filters) = self else {
      return Vec::new();
    };
    if filters.iter().any(|filter| filter.services.is_empty()) {
      return Vec::new();
    }
    let mut services = Vec::new();
    for uuid in filters.iter().flat_map(|filter| filter.services.iter()) {
      if !services.contains(uuid) {
        services.push(*uuid);
      }
    }
    services
  }
}

impl TryFrom<RequestDeviceOptions> for FilterSet {
  type Error = Error;

  fn try_from(options: RequestDeviceOptions) -> Result<Self> {
    match (options.accept_all_devices, options.filters.is_empty()) {
      (true, true) => Ok(FilterSet::AcceptAll),
      (true, false) => Err(Error::InvalidRequest(
        "acceptAllDevices cannot be combined with filters".into(),
      )),
      (false, true) => Err(Error::InvalidRequest(
        "Either acceptAllDevices must be true or filters must be provided".into(),
      )),
      (false, false) => {
        let filters = options
          .filters
          .into_iter()
          .map(Filter::try_from)
          .collect::<Result<Vec<_>>>()?;
        Ok(FilterSet::Any(filters))
      }
    }
  }
}

impl TryFrom<DeviceFilter> for Filter {
  type Error = Error;

  fn try_from(filter: DeviceFilter) -> Result<Self> {
    if filter.name.is_none() && filter.name_prefix.is_none() && filter.services.is_empty() {
      return Err(Error::InvalidRequest(
        "A filter must restrict the devices in some way".into(),
      ));
    }
    if filter.name_prefix.as_deref() == Some("") {
      return Err(Error::InvalidRequest("namePrefix, if present, must be non-empty".into()));
    }
    let services = filter
      .services
      .iter()
      .map(|value| parse_uuid(value))
      .collect::<Result<Vec<_>>>()?;
    Ok(Filter {
      name: filter.name,
      name_prefix: filter.name_prefix,
      services,
    })
  }
}

/// Accepts full UUIDs as well as 16 and 32 bit short forms.
pub fn parse_uuid(input: &str) -> Result<Uuid> {
  let trimmed = input.trim().trim_start_matches("0x");
  let normalized = match trimmed.len() {
    4 => format!("0000{trimmed}-0000-1000-8000-00805f9b34fb"),
    8 => format!("{trimmed}-0000-1000-8000-00805f9b34fb"),
    _ => trimmed.to_string(),
  };
  Ok(Uuid::parse_str(&normalized)?)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn named(name: &str) -> Advertisement {
    Advertisement {
      name: Some(name.into()),
      ..Default::default()
    }
  }

  fn prefix(value: &str) -> Filter {
    Filter {
      name_prefix: Some(value.into()),
      ..Default::default()
    }
  }

  #[test]
  fn empty_filter_list_includes_nothing() {
    assert!(!included(&named("Puck.js 69c5"), &[]));
  }

  #[test]
  fn unnamed_peripheral_never_matches_name_criteria() {
    let unnamed = Advertisement::default();
    let exact = Filter {
      name: Some("Puck".into()),
      ..Default::default()
    };
    assert!(!included(&unnamed, &[exact, prefix("P")]));
  }

  #[test]
  fn name_prefix_is_case_sensitive() {
    assert!(included(&named("Puck.js 69c5"), &[prefix("Puck")]));
    assert!(!included(&named("puck.js 69c5"), &[prefix("Puck")]));
    assert!(!included(&named("Other"), &[prefix("Puck")]));
  }

  #[test]
  fn name_filter_is_exact() {
    let exact = Filter {
      name: Some("Puck".into()),
      ..Default::default()
    };
    assert!(included(&named("Puck"), &[exact.clone()]));
    assert!(!included(&named("Puck.js"), &[exact]));
  }

  #[test]
  fn any_single_filter_is_enough() {
    let filters = vec![prefix("Bangle"), prefix("Puck")];
    assert!(included(&named("Puck.js 69c5"), &filters));
  }

  #[test]
  fn criteria_within_one_filter_are_all_required() {
    let heart_rate = parse_uuid("180d").unwrap();
    let filter = Filter {
      name_prefix: Some("Polar".into()),
      services: vec![heart_rate],
      ..Default::default()
    };
    let mut advertisement = named("Polar H10");
    assert!(!filter.matches(&advertisement));

    advertisement.services = vec![parse_uuid("180f").unwrap(), heart_rate];
    assert!(filter.matches(&advertisement));
  }

  #[test]
  fn short_uuids_expand_against_base_uuid() {
    assert_eq!(
      parse_uuid("0x180D").unwrap().to_string(),
      "0000180d-0000-1000-8000-00805f9b34fb"
    );
    assert!(parse_uuid("not-a-uuid").is_err());
  }

  #[test]
  fn options_need_exactly_one_of_accept_all_and_filters() {
    let neither = RequestDeviceOptions::default();
    assert!(FilterSet::try_from(neither).is_err());

    let both = RequestDeviceOptions {
      accept_all_devices: true,
      filters: vec![DeviceFilter {
        name: Some("x".into()),
        ..Default::default()
      }],
    };
    assert!(FilterSet::try_from(both).is_err());

    let accept_all = RequestDeviceOptions {
      accept_all_devices: true,
      ..Default::default()
    };
    assert_eq!(FilterSet::try_from(accept_all).unwrap(), FilterSet::AcceptAll);
  }

  #[test]
  fn empty_filter_is_rejected() {
    let options = RequestDeviceOptions {
      accept_all_devices: false,
      filters: vec![DeviceFilter::default()],
    };
    assert!(FilterSet::try_from(options).is_err());
  }

  #[test]
  fn scan_is_narrowed_only_when_every_filter_names_services() {
    let battery = parse_uuid("180f").unwrap();
    let with_services = Filter {
      services: vec![battery],
      ..Default::default()
    };

    let narrowed = FilterSet::Any(vec![with_services.clone(), with_services.clone()]);
    assert_eq!(narrowed.scan_services(), vec![battery]);

    let mixed = FilterSet::Any(vec![with_services, prefix("Puck")]);
    assert!(mixed.scan_services().is_empty());
    assert!(FilterSet::AcceptAll.scan_services().is_empty());
  }
}
