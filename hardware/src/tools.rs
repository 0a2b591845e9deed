//! Hardware tool surface.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use servis_rpc::{input_schema_for, Tool, ToolError, ToolServer};

use crate::client::{GpioClient, GpioError, PinDirection};

impl From<GpioError> for ToolError {
    fn from(err: GpioError) -> Self {
        match err {
            GpioError::InvalidValue(_) => ToolError::invalid_params(err.to_string()),
            GpioError::Connect(_) | GpioError::Closed => ToolError::new(
                servis_rpc::ErrorCode::ServiceUnavailable,
                err.to_string(),
            ),
            other => ToolError::handler(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ControlHardwareParams {
    /// GPIO pin number.
    pub pin: u8,
    /// One of `on`, `off`, `toggle`, `read`, `write`.
    pub action: String,
    /// Value for `write` (0 or 1).
    pub value: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConfigurePinParams {
    pub pin: u8,
    pub direction: PinDirectionParam,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PinDirectionParam {
    Input,
    Output,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct NoParams {}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ToolError> {
    serde_json::from_value(params).map_err(|err| ToolError::invalid_params(err.to_string()))
}

/// Register the hardware tools onto a server.
pub fn register_tools(server: &mut ToolServer, client: Arc<GpioClient>) -> Result<(), ToolError> {
    let gpio = client.clone();
    server.register(Tool::new(
        "control_hardware",
        "Drive a GPIO pin: on, off, toggle, read or write",
        input_schema_for::<ControlHardwareParams>(),
        move |params| {
            let client = gpio.clone();
            async move {
                let p: ControlHardwareParams = parse(params)?;
                match p.action.as_str() {
                    "on" => {
                        client.set(p.pin, 1).await?;
                        Ok(json!({"pin": p.pin, "value": 1}))
                    }
                    "off" => {
                        client.set(p.pin, 0).await?;
                        Ok(json!({"pin": p.pin, "value": 0}))
                    }
                    "toggle" => {
                        let value = client.toggle(p.pin).await?;
                        Ok(json!({"pin": p.pin, "value": value}))
                    }
                    "read" => {
                        let value = client.get(p.pin).await?;
                        Ok(json!({"pin": p.pin, "value": value}))
                    }
                    "write" => {
                        let value = p.value.ok_or_else(|| {
                            ToolError::invalid_params("'value' is required for write")
                        })?;
                        client.set(p.pin, value).await?;
                        Ok(json!({"pin": p.pin, "value": value}))
                    }
                    other => Err(ToolError::invalid_params(format!(
                        "unknown hardware action '{other}'"
                    ))),
                }
            }
        },
    ))?;

    let gpio = client.clone();
    server.register(Tool::new(
        "configure_pin",
        "Configure a GPIO pin direction",
        input_schema_for::<ConfigurePinParams>(),
        move |params| {
            let client = gpio.clone();
            async move {
                let p: ConfigurePinParams = parse(params)?;
                let direction = match p.direction {
                    PinDirectionParam::Input => PinDirection::Input,
                    PinDirectionParam::Output => PinDirection::Output,
                };
                client.configure(p.pin, direction).await?;
                Ok(json!({"pin": p.pin, "configured": true}))
            }
        },
    ))?;

    let gpio = client;
    server.register(Tool::new(
        "gpio_status",
        "Status of every configured GPIO pin",
        input_schema_for::<NoParams>(),
        move |_params| {
            let client = gpio.clone();
            async move {
                let pins = client.status().await?;
                let pins: Vec<Value> = pins
                    .iter()
                    .map(|p| json!({"pin": p.pin, "direction": p.direction, "value": p.value}))
                    .collect();
                Ok(json!({"pins": pins}))
            }
        },
    ))?;

    Ok(())
}
