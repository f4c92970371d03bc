const COMMANDS: &[&str] = &[
  "post_message",
  "select_device",
  "cancel_device_search",
  "set_autoselect",
  "get_availability",
];

fn main() {
  tauri_plugin::Builder::new(COMMANDS).build();
}
