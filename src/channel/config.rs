// src/channel/config.rs
//
// Serial port configuration.
// PortConfig is always fully populated; sparse caller input goes through
// PortConfigBuilder, which applies the 115200/8/N/1/none defaults before
// hand-off. Conversion to serialport types happens at open time; settings
// the backend cannot represent (mark/space parity, 1.5 stop bits) are
// rejected there as invalid configuration.

use serde::{Deserialize, Serialize};
use serialport::{
    DataBits as SpDataBits, FlowControl as SpFlowControl, Parity as SpParity,
    StopBits as SpStopBits,
};

use crate::error::MonitorError;

pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_DATA_BITS: u8 = 8;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
    Mark,
    Space,
}

/// Stop bits, serialised as the numbers clients send (1, 1.5, 2).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub enum StopBits {
    #[default]
    One,
    OnePointFive,
    Two,
}

impl TryFrom<f64> for StopBits {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if value == 1.0 {
            Ok(StopBits::One)
        } else if value == 1.5 {
            Ok(StopBits::OnePointFive)
        } else if value == 2.0 {
            Ok(StopBits::Two)
        } else {
            Err(format!("stop bits must be 1, 1.5 or 2 (got {})", value))
        }
    }
}

impl From<StopBits> for f64 {
    fn from(value: StopBits) -> f64 {
        match value {
            StopBits::One => 1.0,
            StopBits::OnePointFive => 1.5,
            StopBits::Two => 2.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowControl {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "rtscts")]
    RtsCts,
    #[serde(rename = "xonxoff")]
    XonXoff,
}

/// Fully-populated port configuration, immutable once a channel opens.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortConfig {
    pub path: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
}

/// Sparse configuration as clients send it; unspecified fields default.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortConfigInput {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub baud_rate: Option<u32>,
    #[serde(default)]
    pub data_bits: Option<u8>,
    #[serde(default)]
    pub stop_bits: Option<StopBits>,
    #[serde(default)]
    pub parity: Option<Parity>,
    #[serde(default)]
    pub flow_control: Option<FlowControl>,
}

/// Builder applying defaults and validating before hand-off.
#[derive(Clone, Debug, Default)]
pub struct PortConfigBuilder {
    input: PortConfigInput,
}

impl PortConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_input(input: PortConfigInput) -> Self {
        PortConfigBuilder { input }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.input.path = Some(path.into());
        self
    }

    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.input.baud_rate = Some(baud);
        self
    }

    pub fn data_bits(mut self, bits: u8) -> Self {
        self.input.data_bits = Some(bits);
        self
    }

    pub fn stop_bits(mut self, bits: StopBits) -> Self {
        self.input.stop_bits = Some(bits);
        self
    }

    pub fn parity(mut self, parity: Parity) -> Self {
        self.input.parity = Some(parity);
        self
    }

    pub fn flow_control(mut self, flow: FlowControl) -> Self {
        self.input.flow_control = Some(flow);
        self
    }

    /// Apply defaults and validate. The device path is the only field
    /// without a default.
    pub fn build(self) -> Result<PortConfig, MonitorError> {
        let path = self
            .input
            .path
            .filter(|p| !p.is_empty())
            .ok_or_else(|| MonitorError::InvalidConfig("device path is required".to_string()))?;

        let baud_rate = self.input.baud_rate.unwrap_or(DEFAULT_BAUD_RATE);
        if baud_rate == 0 {
            return Err(MonitorError::InvalidConfig(
                "baud rate must be positive".to_string(),
            ));
        }

        let data_bits = self.input.data_bits.unwrap_or(DEFAULT_DATA_BITS);
        if !(5..=8).contains(&data_bits) {
            return Err(MonitorError::InvalidConfig(format!(
                "data bits must be 5-8 (got {})",
                data_bits
            )));
        }

        Ok(PortConfig {
            path,
            baud_rate,
            data_bits,
            stop_bits: self.input.stop_bits.unwrap_or_default(),
            parity: self.input.parity.unwrap_or_default(),
            flow_control: self.input.flow_control.unwrap_or_default(),
        })
    }
}

// ============================================================================
// serialport mappings
// ============================================================================

pub fn to_serialport_data_bits(bits: u8) -> SpDataBits {
    match bits {
        5 => SpDataBits::Five,
        6 => SpDataBits::Six,
        7 => SpDataBits::Seven,
        _ => SpDataBits::Eight,
    }
}

pub fn to_serialport_stop_bits(bits: StopBits) -> Result<SpStopBits, MonitorError> {
    match bits {
        StopBits::One => Ok(SpStopBits::One),
        StopBits::Two => Ok(SpStopBits::Two),
        StopBits::OnePointFive => Err(MonitorError::InvalidConfig(
            "driver does not support 1.5 stop bits".to_string(),
        )),
    }
}

pub fn to_serialport_parity(parity: Parity) -> Result<SpParity, MonitorError> {
    match parity {
        Parity::None => Ok(SpParity::None),
        Parity::Even => Ok(SpParity::Even),
        Parity::Odd => Ok(SpParity::Odd),
        Parity::Mark | Parity::Space => Err(MonitorError::InvalidConfig(format!(
            "driver does not support {:?} parity",
            parity
        ))),
    }
}

pub fn to_serialport_flow_control(flow: FlowControl) -> SpFlowControl {
    match flow {
        FlowControl::None => SpFlowControl::None,
        FlowControl::RtsCts => SpFlowControl::Hardware,
        FlowControl::XonXoff => SpFlowControl::Software,
    }
}
