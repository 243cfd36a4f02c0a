//! Server runtime: callback wiring and the standard-input pump.

use serde::de::DeserializeOwned;

pub use main_loop::{
    clear_interrupt_handle, install_interrupt_handle, interrupt, LspServer, EINTR,
};

mod main_loop;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub fn from_json<T: DeserializeOwned>(what: &'static str, json: &serde_json::Value) -> Result<T> {
    let res = serde_json::from_value(json.clone())
        .map_err(|e| format!("Failed to deserialize {}: {}; {}", what, e, json))?;
    Ok(res)
}
