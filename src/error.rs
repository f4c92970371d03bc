use serde::{ser::Serializer, Serialize};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error(transparent)]
  Btleplug(#[from] btleplug::Error),
  #[error(transparent)]
  UuidParse(#[from] uuid::Error),
  #[error(transparent)]
  Base64Decode(#[from] base64::DecodeError),
  #[error(transparent)]
  Json(#[from] serde_json::Error),
  #[error("Bluetooth adapter is not available on this system")]
  NoAdapter,
  #[error("{0}")]
  InvalidRequest(String),
  #[error("Bluetooth not activated.")]
  BluetoothNotActivated,
  #[error("Previous device request is still in progress")]
  RequestInProgress,
  #[error("No known device for device transaction {0}")]
  DeviceNotFound(String),
  #[error("Device {0} has already been selected by this page")]
  DeviceAlreadySelected(String),
  #[error("User cancelled")]
  SelectionCancelled,
  #[error("No device was selected within {0} ms")]
  SelectionTimeout(u64),
  #[error("GATT server of device {0} is not connected")]
  GattNotConnected(String),
  #[error("Failed to connect to device {device_id}: {reason}")]
  ConnectionFailed { device_id: String, reason: String },
  #[error("Device {0} disconnected")]
  Disconnected(String),
  #[error("Service {service_uuid} not found for device {device_id}")]
  ServiceNotFound {
    device_id: String,
    service_uuid: String,
  },
  #[error("Characteristic {characteristic_uuid} not found for device {device_id}")]
  CharacteristicNotFound {
    device_id: String,
    characteristic_uuid: String,
  },
  #[error("Bluetooth device manager is no longer running")]
  ManagerStopped,
  #[error("Web Bluetooth is not implemented for this platform yet")]
  UnsupportedPlatform,
}

impl Serialize for Error {
  fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    serializer.serialize_str(self.to_string().as_ref())
  }
}
