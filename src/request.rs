//! Decoding of page messages into typed requests.
//!
//! The `type` components and the loosely typed `data` map are decoded once
//! here; anything not recognised becomes [`Error::InvalidRequest`] before it
//! reaches the device manager.

use base64::{prelude::BASE64_STANDARD, Engine};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
  filter::{parse_uuid, FilterSet},
  models::*,
  registry::ExternalId,
  transaction::TransactionKey,
  Error, Result,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
  RequestDevice(FilterSet),
  Device {
    device_id: ExternalId,
    command: DeviceCommand,
  },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
  Connect,
  Disconnect,
  Gatt(GattRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub enum GattRequest {
  GetPrimaryServices {
    service_uuid: Option<Uuid>,
  },
  GetCharacteristics {
    service_uuid: Uuid,
    characteristic_uuid: Option<Uuid>,
  },
  ReadValue {
    service_uuid: Uuid,
    characteristic_uuid: Uuid,
  },
  WriteValue {
    service_uuid: Uuid,
    characteristic_uuid: Uuid,
    value: Vec<u8>,
    with_response: bool,
  },
}

impl Request {
  pub fn decode(key: &TransactionKey, data: &Map<String, Value>) -> Result<Self> {
    let components: Vec<&str> = key.type_components.iter().map(String::as_str).collect();
    match components.as_slice() {
      ["requestDevice"] => {
        let options: RequestDeviceOptions = payload(data)?;
        Ok(Request::RequestDevice(FilterSet::try_from(options)?))
      }
      ["device", rest @ ..] => {
        let target: DeviceRequest = payload(data)?;
        Ok(Request::Device {
          device_id: ExternalId::from(target.device_id),
          command: DeviceCommand::decode(rest, data)?,
        })
      }
      _ => Err(Error::InvalidRequest(format!(
        "Request type components not recognised {key}"
      ))),
    }
  }
}

impl DeviceCommand {
  fn decode(components: &[&str], data: &Map<String, Value>) -> Result<Self> {
    let command = match components {
      ["gatt", "connect"] => DeviceCommand::Connect,
      ["gatt", "disconnect"] => DeviceCommand::Disconnect,
      ["gatt", "getPrimaryServices"] => {
        let request: ServiceRequest = payload(data)?;
        DeviceCommand::Gatt(GattRequest::GetPrimaryServices {
          service_uuid: request.service_uuid.as_deref().map(parse_uuid).transpose()?,
        })
      }
      ["service", "getCharacteristics"] => {
        let request: CharacteristicsRequest = payload(data)?;
        DeviceCommand::Gatt(GattRequest::GetCharacteristics {
          service_uuid: parse_uuid(&request.service_uuid)?,
          characteristic_uuid: request.characteristic_uuid.as_deref().map(parse_uuid).transpose()?,
        })
      }
      ["characteristic", "readValue"] => {
        let request: ReadValueRequest = payload(data)?;
        DeviceCommand::Gatt(GattRequest::ReadValue {
          service_uuid: parse_uuid(&request.service_uuid)?,
          characteristic_uuid: parse_uuid(&request.characteristic_uuid)?,
        })
      }
      ["characteristic", "writeValue"] => {
        let request: WriteValueRequest = payload(data)?;
        DeviceCommand::Gatt(GattRequest::WriteValue {
          service_uuid: parse_uuid(&request.service_uuid)?,
          characteristic_uuid: parse_uuid(&request.characteristic_uuid)?,
          value: BASE64_STANDARD.decode(request.value)?,
          with_response: request.with_response,
        })
      }
      _ => {
        return Err(Error::InvalidRequest(format!(
          "Unknown device request {}",
          components.join(".")
        )))
      }
    };
    Ok(command)
  }
}

fn payload<T: DeserializeOwned>(data: &Map<String, Value>) -> Result<T> {
  serde_json::from_value(Value::Object(data.clone()))
    .map_err(|err| Error::InvalidRequest(format!("Malformed request payload: {err}")))
}
