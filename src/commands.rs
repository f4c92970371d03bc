use tauri::{command, AppHandle, Runtime, Webview};

use crate::models::*;
use crate::{Result, WebBluetoothExt};

#[command]
pub(crate) async fn post_message<R: Runtime>(webview: Webview<R>, message: InboundMessage) -> Result<()> {
    webview.web_bluetooth().post_message(&webview, message)
}

#[command]
pub(crate) async fn select_device<R: Runtime>(app: AppHandle<R>, index: usize) -> Result<()> {
    app.web_bluetooth().manager().select_device_at(index)
}

#[command]
pub(crate) async fn cancel_device_search<R: Runtime>(app: AppHandle<R>) -> Result<()> {
    app.web_bluetooth().manager().cancel_device_search()
}

#[command]
pub(crate) async fn set_autoselect<R: Runtime>(app: AppHandle<R>, enabled: bool) -> Result<()> {
    app.web_bluetooth().manager().set_autoselect(enabled)
}

#[command]
pub(crate) async fn get_availability<R: Runtime>(app: AppHandle<R>) -> Result<bool> {
    Ok(app.web_bluetooth().get_availability())
}

pub(crate) fn handlers<R: Runtime>() -> impl Fn(tauri::ipc::Invoke<R>) -> bool {
    tauri::generate_handler![
        post_message,
        select_device,
        cancel_device_search,
        set_autoselect,
        get_availability
    ]
}
