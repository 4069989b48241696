//! Wire packets pushed by the algorithm engine.
//!
//! Every frame is a JSON object whose `eType` field names the packet kind.
//! Decoding is two-phase: [`PacketHeader`] reads only the discriminator, then
//! [`Packet::decode_as`] parses the payload with the schema for that kind.
//! Kinds this crate does not know are rejected with
//! [`DecodeError::UnknownKind`] without looking at the rest of the payload.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Name of the discriminator field carried by every packet.
pub const KIND_FIELD: &str = "eType";

/// Packet discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    AlgorithmStatus,
    LiveNode,
    AlgorithmNode,
    LiveResult,
    BacktestResult,
    Log,
    Debug,
    HandledError,
    OrderEvent,
    RuntimeError,
    SystemDebug,
}

impl PacketKind {
    /// Every kind this crate can decode.
    pub const ALL: [PacketKind; 11] = [
        PacketKind::AlgorithmStatus,
        PacketKind::LiveNode,
        PacketKind::AlgorithmNode,
        PacketKind::LiveResult,
        PacketKind::BacktestResult,
        PacketKind::Log,
        PacketKind::Debug,
        PacketKind::HandledError,
        PacketKind::OrderEvent,
        PacketKind::RuntimeError,
        PacketKind::SystemDebug,
    ];

    /// Maps a wire discriminator to a known kind.
    pub fn from_wire(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_wire() == value)
    }

    /// Wire spelling of the discriminator.
    pub fn as_wire(self) -> &'static str {
        match self {
            PacketKind::AlgorithmStatus => "AlgorithmStatus",
            PacketKind::LiveNode => "LiveNode",
            PacketKind::AlgorithmNode => "AlgorithmNode",
            PacketKind::LiveResult => "LiveResult",
            PacketKind::BacktestResult => "BacktestResult",
            PacketKind::Log => "Log",
            PacketKind::Debug => "Debug",
            PacketKind::HandledError => "HandledError",
            PacketKind::OrderEvent => "OrderEvent",
            PacketKind::RuntimeError => "RuntimeError",
            PacketKind::SystemDebug => "SystemDebug",
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Errors produced while turning frame text into a [`Packet`].
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Frame is not JSON or does not match the schema for its kind.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame has no string `eType` field.
    #[error("packet has no eType discriminator")]
    MissingKind,

    /// Discriminator names a kind this crate does not decode.
    #[error("unknown packet kind '{0}'")]
    UnknownKind(String),
}

/// First decoding phase: only the discriminator is read.
#[derive(Debug, Deserialize)]
pub struct PacketHeader {
    #[serde(rename = "eType", default)]
    kind: Option<Value>,
}

impl PacketHeader {
    /// Parses the frame just far enough to read `eType`.
    pub fn from_text(text: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Raw discriminator value, if it is a string.
    pub fn raw_kind(&self) -> Option<&str> {
        self.kind.as_ref().and_then(Value::as_str)
    }

    /// Resolves the discriminator into a known [`PacketKind`].
    pub fn kind(&self) -> Result<PacketKind, DecodeError> {
        let raw = self.raw_kind().ok_or(DecodeError::MissingKind)?;
        PacketKind::from_wire(raw).ok_or_else(|| DecodeError::UnknownKind(raw.to_string()))
    }
}

/// One decoded unit of the event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    AlgorithmStatus(AlgorithmStatusPacket),
    LiveNode(LiveNodePacket),
    AlgorithmNode(AlgorithmNodePacket),
    LiveResult(LiveResultPacket),
    BacktestResult(BacktestResultPacket),
    Log(LogPacket),
    Debug(DebugPacket),
    HandledError(HandledErrorPacket),
    OrderEvent(OrderEventPacket),
    RuntimeError(RuntimeErrorPacket),
    SystemDebug(DebugPacket),
}

impl Packet {
    /// Runs both decoding phases over one frame of text.
    pub fn from_text(text: &str) -> Result<Self, DecodeError> {
        let kind = PacketHeader::from_text(text)?.kind()?;
        Self::decode_as(kind, text)
    }

    /// Second decoding phase: parses the payload with the schema for `kind`.
    pub fn decode_as(kind: PacketKind, text: &str) -> Result<Self, DecodeError> {
        let packet = match kind {
            PacketKind::AlgorithmStatus => Packet::AlgorithmStatus(serde_json::from_str(text)?),
            PacketKind::LiveNode => Packet::LiveNode(serde_json::from_str(text)?),
            PacketKind::AlgorithmNode => Packet::AlgorithmNode(serde_json::from_str(text)?),
            PacketKind::LiveResult => Packet::LiveResult(serde_json::from_str(text)?),
            PacketKind::BacktestResult => Packet::BacktestResult(serde_json::from_str(text)?),
            PacketKind::Log => Packet::Log(serde_json::from_str(text)?),
            PacketKind::Debug => Packet::Debug(serde_json::from_str(text)?),
            PacketKind::HandledError => Packet::HandledError(serde_json::from_str(text)?),
            PacketKind::OrderEvent => Packet::OrderEvent(serde_json::from_str(text)?),
            PacketKind::RuntimeError => Packet::RuntimeError(serde_json::from_str(text)?),
            PacketKind::SystemDebug => Packet::SystemDebug(serde_json::from_str(text)?),
        };
        Ok(packet)
    }

    /// Encodes the packet as wire text, discriminator included.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        let mut value = match self {
            Packet::AlgorithmStatus(payload) => serde_json::to_value(payload)?,
            Packet::LiveNode(payload) => serde_json::to_value(payload)?,
            Packet::AlgorithmNode(payload) => serde_json::to_value(payload)?,
            Packet::LiveResult(payload) => serde_json::to_value(payload)?,
            Packet::BacktestResult(payload) => serde_json::to_value(payload)?,
            Packet::Log(payload) => serde_json::to_value(payload)?,
            Packet::Debug(payload) | Packet::SystemDebug(payload) => serde_json::to_value(payload)?,
            Packet::HandledError(payload) => serde_json::to_value(payload)?,
            Packet::OrderEvent(payload) => serde_json::to_value(payload)?,
            Packet::RuntimeError(payload) => serde_json::to_value(payload)?,
        };
        if let Value::Object(fields) = &mut value {
            fields.insert(
                KIND_FIELD.to_string(),
                Value::String(self.kind().as_wire().to_string()),
            );
        }
        serde_json::to_string(&value)
    }

    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::AlgorithmStatus(_) => PacketKind::AlgorithmStatus,
            Packet::LiveNode(_) => PacketKind::LiveNode,
            Packet::AlgorithmNode(_) => PacketKind::AlgorithmNode,
            Packet::LiveResult(_) => PacketKind::LiveResult,
            Packet::BacktestResult(_) => PacketKind::BacktestResult,
            Packet::Log(_) => PacketKind::Log,
            Packet::Debug(_) => PacketKind::Debug,
            Packet::HandledError(_) => PacketKind::HandledError,
            Packet::OrderEvent(_) => PacketKind::OrderEvent,
            Packet::RuntimeError(_) => PacketKind::RuntimeError,
            Packet::SystemDebug(_) => PacketKind::SystemDebug,
        }
    }
}

/// Lifecycle status reported by the engine for an algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlgorithmStatus {
    DeployError,
    InQueue,
    Running,
    Stopped,
    Liquidated,
    Deleted,
    Completed,
    RuntimeError,
    Invalid,
    LoggingIn,
    Initializing,
    History,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmStatusPacket {
    #[serde(rename = "sAlgorithmID", default, deserialize_with = "null_as_default")]
    pub algorithm_id: String,
    #[serde(rename = "iProjectID", default, deserialize_with = "null_as_default")]
    pub project_id: i64,
    #[serde(rename = "eStatus", default, deserialize_with = "null_as_default")]
    pub status: AlgorithmStatus,
    #[serde(rename = "sOptionalMessage", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "sChannelStatus", default, skip_serializing_if = "Option::is_none")]
    pub channel_status: Option<String>,
    #[serde(rename = "sChannel", default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

/// Job description shared by backtest and live deployments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmNodePacket {
    #[serde(rename = "iUserID", default, deserialize_with = "null_as_default")]
    pub user_id: i64,
    #[serde(rename = "iProjectID", default, deserialize_with = "null_as_default")]
    pub project_id: i64,
    #[serde(rename = "sProjectName", default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(rename = "sSessionID", default, deserialize_with = "null_as_default")]
    pub session_id: String,
    #[serde(rename = "sAlgorithmID", default, deserialize_with = "null_as_default")]
    pub algorithm_id: String,
    #[serde(rename = "sCompileID", default, deserialize_with = "null_as_default")]
    pub compile_id: String,
    #[serde(rename = "sVersion", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Live deployment description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveNodePacket {
    #[serde(flatten)]
    pub node: AlgorithmNodePacket,
    #[serde(rename = "sDeployID", default, deserialize_with = "null_as_default")]
    pub deploy_id: String,
    #[serde(rename = "sBrokerage", default, skip_serializing_if = "Option::is_none")]
    pub brokerage: Option<String>,
    #[serde(rename = "aBrokerageData", default, deserialize_with = "null_as_default")]
    pub brokerage_data: BTreeMap<String, String>,
    #[serde(rename = "sDataQueueHandler", default, skip_serializing_if = "Option::is_none")]
    pub data_queue_handler: Option<String>,
    #[serde(rename = "bDisableAcknowledgement", default, deserialize_with = "null_as_default")]
    pub disable_acknowledgement: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveResultPacket {
    #[serde(rename = "iUserID", default, deserialize_with = "null_as_default")]
    pub user_id: i64,
    #[serde(rename = "iProjectID", default, deserialize_with = "null_as_default")]
    pub project_id: i64,
    #[serde(rename = "sSessionID", default, deserialize_with = "null_as_default")]
    pub session_id: String,
    #[serde(rename = "sDeployID", default, deserialize_with = "null_as_default")]
    pub deploy_id: String,
    #[serde(rename = "sCompileID", default, deserialize_with = "null_as_default")]
    pub compile_id: String,
    #[serde(rename = "oResults", default, deserialize_with = "null_as_default")]
    pub results: ResultPayload,
    #[serde(rename = "dProcessingTime", default, deserialize_with = "null_as_default")]
    pub processing_time: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestResultPacket {
    #[serde(rename = "iUserID", default, deserialize_with = "null_as_default")]
    pub user_id: i64,
    #[serde(rename = "iProjectID", default, deserialize_with = "null_as_default")]
    pub project_id: i64,
    #[serde(rename = "sSessionID", default, deserialize_with = "null_as_default")]
    pub session_id: String,
    #[serde(rename = "sName", default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "sBacktestId", default, deserialize_with = "null_as_default")]
    pub backtest_id: String,
    #[serde(rename = "sOptimizationID", default, skip_serializing_if = "Option::is_none")]
    pub optimization_id: Option<String>,
    #[serde(rename = "sCompileID", default, deserialize_with = "null_as_default")]
    pub compile_id: String,
    #[serde(rename = "dtPeriodStart", default, skip_serializing_if = "Option::is_none")]
    pub period_start: Option<String>,
    #[serde(rename = "dtPeriodFinish", default, skip_serializing_if = "Option::is_none")]
    pub period_finish: Option<String>,
    /// Completion fraction in `[0, 1]`.
    #[serde(rename = "dProgress", default, deserialize_with = "null_as_default")]
    pub progress: f64,
    #[serde(rename = "oResults", default, deserialize_with = "null_as_default")]
    pub results: ResultPayload,
}

/// Result body shared by live and backtest result packets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    #[serde(rename = "Charts", default, deserialize_with = "null_as_default")]
    pub charts: BTreeMap<String, ChartPayload>,
    #[serde(rename = "Orders", default, deserialize_with = "null_as_default")]
    pub orders: BTreeMap<String, Value>,
    #[serde(rename = "ProfitLoss", default, deserialize_with = "null_as_default")]
    pub profit_loss: BTreeMap<String, f64>,
    #[serde(rename = "Statistics", default, deserialize_with = "null_as_default")]
    pub statistics: BTreeMap<String, String>,
    #[serde(rename = "RuntimeStatistics", default, deserialize_with = "null_as_default")]
    pub runtime_statistics: BTreeMap<String, String>,
    /// Sections (holdings, cash, server statistics, ...) kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartPayload {
    #[serde(rename = "Name", default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "Series", default, deserialize_with = "null_as_default")]
    pub series: BTreeMap<String, SeriesPayload>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesPayload {
    #[serde(rename = "Name", default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "Unit", default, deserialize_with = "null_as_default")]
    pub unit: String,
    #[serde(rename = "Index", default, deserialize_with = "null_as_default")]
    pub index: i64,
    #[serde(rename = "SeriesType", default, deserialize_with = "null_as_default")]
    pub series_type: SeriesType,
    #[serde(rename = "Color", default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(rename = "Values", default, deserialize_with = "null_as_default")]
    pub values: Vec<ChartPointPayload>,
}

/// Chart series rendering style.
///
/// Producers send either the numeric code or the name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum SeriesType {
    #[default]
    Line,
    Scatter,
    Candle,
    Bar,
    Flag,
    StackedArea,
    Pie,
    Treemap,
}

impl SeriesType {
    fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => SeriesType::Line,
            1 => SeriesType::Scatter,
            2 => SeriesType::Candle,
            3 => SeriesType::Bar,
            4 => SeriesType::Flag,
            5 => SeriesType::StackedArea,
            6 => SeriesType::Pie,
            7 => SeriesType::Treemap,
            _ => return None,
        })
    }

    fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "line" => SeriesType::Line,
            "scatter" => SeriesType::Scatter,
            "candle" => SeriesType::Candle,
            "bar" => SeriesType::Bar,
            "flag" => SeriesType::Flag,
            "stackedarea" => SeriesType::StackedArea,
            "pie" => SeriesType::Pie,
            "treemap" => SeriesType::Treemap,
            _ => return None,
        })
    }
}

impl<'de> Deserialize<'de> for SeriesType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Code(i64),
            Name(String),
        }

        let parsed = match Raw::deserialize(deserializer)? {
            Raw::Code(code) => SeriesType::from_code(code),
            Raw::Name(name) => SeriesType::from_name(&name),
        };
        // Styles added by newer producers render as lines.
        Ok(parsed.unwrap_or_default())
    }
}

/// One chart value as sent on the wire.
///
/// Older producers send `{"x": seconds, "y": value}`; newer ones send
/// `[seconds, value]` for points and `[seconds, open, high, low, close]` for
/// candles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChartPointPayload {
    Object { x: f64, y: Option<f64> },
    Array(Vec<Option<f64>>),
}

impl ChartPointPayload {
    /// Unix seconds and plotted value; candles plot their low.
    pub fn time_and_value(&self) -> Option<(DateTime<Utc>, Option<f64>)> {
        let (seconds, value) = match self {
            ChartPointPayload::Object { x, y } => (*x, *y),
            ChartPointPayload::Array(values) => match values.as_slice() {
                [Some(x), y] => (*x, *y),
                [Some(x), _open, _high, low, _close] => (*x, *low),
                _ => return None,
            },
        };
        if !seconds.is_finite() {
            return None;
        }
        let time = DateTime::<Utc>::from_timestamp(seconds.trunc() as i64, 0)?;
        Some((time, value))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogPacket {
    #[serde(rename = "sMessage", default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(rename = "sAlgorithmID", default, deserialize_with = "null_as_default")]
    pub algorithm_id: String,
}

/// Debug output from the algorithm; also used for system debug packets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugPacket {
    #[serde(rename = "sMessage", default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(rename = "sAlgorithmID", default, deserialize_with = "null_as_default")]
    pub algorithm_id: String,
    #[serde(rename = "sCompileID", default, deserialize_with = "null_as_default")]
    pub compile_id: String,
    #[serde(rename = "iProjectID", default, deserialize_with = "null_as_default")]
    pub project_id: i64,
    /// Show as a popup notification rather than console text.
    #[serde(rename = "bToast", default, deserialize_with = "null_as_default")]
    pub toast: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandledErrorPacket {
    #[serde(rename = "sMessage", default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(rename = "sStackTrace", default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(rename = "sAlgorithmID", default, deserialize_with = "null_as_default")]
    pub algorithm_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeErrorPacket {
    #[serde(rename = "sMessage", default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(rename = "sStackTrace", default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(rename = "sAlgorithmID", default, deserialize_with = "null_as_default")]
    pub algorithm_id: String,
    #[serde(rename = "iUserID", default, deserialize_with = "null_as_default")]
    pub user_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderEventPacket {
    #[serde(rename = "oOrderEvent", default, deserialize_with = "null_as_default")]
    pub event: OrderEvent,
    #[serde(rename = "sAlgorithmID", default, deserialize_with = "null_as_default")]
    pub algorithm_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderStatus {
    New,
    Submitted,
    PartiallyFilled,
    Filled,
    Canceled,
    #[serde(rename = "none")]
    NotSet,
    Invalid,
    CancelPending,
    UpdateSubmitted,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderDirection {
    Buy,
    Sell,
    Hold,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Fill, cancel, or status change of one order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OrderEvent {
    #[serde(default, deserialize_with = "null_as_default")]
    pub order_id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub order_event_id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub symbol: String,
    /// Unix seconds.
    #[serde(default, deserialize_with = "null_as_default")]
    pub time: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_fee_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_fee_currency: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fill_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_price_currency: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fill_quantity: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub direction: OrderDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_assignment: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub quantity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_in_the_money: bool,
}

impl OrderEvent {
    pub fn time_utc(&self) -> Option<DateTime<Utc>> {
        if !self.time.is_finite() {
            return None;
        }
        let seconds = self.time.trunc() as i64;
        let nanos = (self.time.fract() * 1e9).round().clamp(0.0, 999_999_999.0) as u32;
        DateTime::<Utc>::from_timestamp(seconds, nanos)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
