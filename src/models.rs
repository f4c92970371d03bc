use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const EVENT_RESPONSE: &str = "web-bluetooth://response";
pub const EVENT_GATT_DISCONNECTED: &str = "web-bluetooth://gattserver-disconnected";
pub const EVENT_PICKER: &str = "web-bluetooth://picker";

/// A request posted by the page: `{ type, id, data }`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
  #[serde(rename = "type")]
  pub kind: Vec<String>,
  pub id: Value,
  #[serde(default)]
  pub data: Map<String, Value>,
}

/// The single resolution delivered back to the page for one request id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
  pub id: Value,
  pub success: bool,
  pub result: Value,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDeviceOptions {
  #[serde(default)]
  pub accept_all_devices: bool,
  #[serde(default)]
  pub filters: Vec<DeviceFilter>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFilter {
  #[serde(default)]
  pub services: Vec<String>,
  pub name: Option<String>,
  pub name_prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BluetoothDevice {
  pub id: String,
  pub name: Option<String>,
  #[serde(default)]
  pub uuids: Vec<String>,
  pub rssi: Option<i16>,
  pub tx_power: Option<i16>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BluetoothService {
  pub uuid: String,
  #[serde(default)]
  pub is_primary: bool,
  #[serde(default)]
  pub characteristics: Vec<BluetoothCharacteristic>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BluetoothCharacteristic {
  pub uuid: String,
  #[serde(default)]
  pub properties: CharacteristicProperties,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacteristicProperties {
  pub broadcast: bool,
  pub read: bool,
  pub write_without_response: bool,
  pub write: bool,
  pub notify: bool,
  pub indicate: bool,
  pub authenticated_signed_writes: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRequest {
  pub device_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequest {
  pub device_id: String,
  pub service_uuid: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacteristicsRequest {
  pub device_id: String,
  pub service_uuid: String,
  pub characteristic_uuid: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadValueRequest {
  pub device_id: String,
  pub service_uuid: String,
  pub characteristic_uuid: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteValueRequest {
  pub device_id: String,
  pub service_uuid: String,
  pub characteristic_uuid: String,
  /// base64 encoded payload
  pub value: String,
  #[serde(default = "default_with_response")]
  pub with_response: bool,
}

fn default_with_response() -> bool {
  true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BluetoothValue {
  /// base64 encoded value
  pub value: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEventPayload {
  pub device_id: String,
}

/// One row of the device picker, in display order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PickerEntry {
  pub index: usize,
  pub title: String,
  pub name: Option<String>,
  pub rssi: Option<i16>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PickerEventPayload {
  pub visible: bool,
  pub devices: Vec<PickerEntry>,
}
