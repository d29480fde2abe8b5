//! FriendFinder payload: protobuf message and codec.
//!
//! Wire shape (one message per packet, on [`super::FRIEND_FINDER_PORTNUM`]):
//!
//! | tag | field           | type     | notes                         |
//! |-----|-----------------|----------|-------------------------------|
//! | 1   | `request_type`  | enum     | NONE/REQUEST/ACCEPT/REJECT/END_SESSION |
//! | 2   | `latitude_i`    | sfixed32 | degrees × 1e7                 |
//! | 3   | `longitude_i`   | sfixed32 | degrees × 1e7                 |
//! | 4   | `sats_in_view`  | uint32   |                               |
//! | 5   | `battery_level` | uint32   | percent, 0..=100              |
//! | 6   | `time`          | fixed32  | sender wall clock, unix secs  |
//!
//! Every packet carries a full telemetry snapshot, including handshake messages.

use bytes::Bytes;
use prost::Message;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What a FriendFinder packet asks of the receiver. `None` is a plain telemetry beacon.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum RequestType {
    None = 0,
    Request = 1,
    Accept = 2,
    Reject = 3,
    EndSession = 4,
}

impl RequestType {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestType::None => "NONE",
            RequestType::Request => "REQUEST",
            RequestType::Accept => "ACCEPT",
            RequestType::Reject => "REJECT",
            RequestType::EndSession => "END_SESSION",
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct FriendFinder {
    #[prost(enumeration = "RequestType", tag = "1")]
    pub request_type: i32,
    #[prost(sfixed32, tag = "2")]
    pub latitude_i: i32,
    #[prost(sfixed32, tag = "3")]
    pub longitude_i: i32,
    #[prost(uint32, tag = "4")]
    pub sats_in_view: u32,
    #[prost(uint32, tag = "5")]
    pub battery_level: u32,
    #[prost(fixed32, tag = "6")]
    pub time: u32,
}

/// Position/battery/satellite snapshot, with the request type stripped off.
///
/// Also the shape cached per friend in the persisted table, so every field is fixed width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Telemetry {
    pub latitude_i: i32,
    pub longitude_i: i32,
    pub sats_in_view: u32,
    pub battery_level: u32,
    pub time: u32,
}

impl Telemetry {
    /// (0, 0) is what a sender without a fix transmits; treat it as "no position".
    pub fn has_position(&self) -> bool {
        self.latitude_i != 0 || self.longitude_i != 0
    }

    pub fn latitude_deg(&self) -> f64 {
        self.latitude_i as f64 * 1e-7
    }

    pub fn longitude_deg(&self) -> f64 {
        self.longitude_i as f64 * 1e-7
    }
}

impl FriendFinder {
    pub fn new(kind: RequestType, telemetry: &Telemetry) -> Self {
        Self {
            request_type: kind as i32,
            latitude_i: telemetry.latitude_i,
            longitude_i: telemetry.longitude_i,
            sats_in_view: telemetry.sats_in_view,
            battery_level: telemetry.battery_level,
            time: telemetry.time,
        }
    }

    pub fn telemetry(&self) -> Telemetry {
        Telemetry {
            latitude_i: self.latitude_i,
            longitude_i: self.longitude_i,
            sats_in_view: self.sats_in_view,
            battery_level: self.battery_level,
            time: self.time,
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("unknown request type {0}")]
    UnknownRequestType(i32),
}

pub fn encode_payload(kind: RequestType, telemetry: &Telemetry) -> Bytes {
    Bytes::from(FriendFinder::new(kind, telemetry).encode_to_vec())
}

/// Decode a payload. Unknown request types are rejected rather than mapped to `NONE`.
pub fn decode_payload(bytes: &[u8]) -> Result<(RequestType, Telemetry), CodecError> {
    let msg = FriendFinder::decode(bytes)?;
    let kind = RequestType::try_from(msg.request_type)
        .map_err(|_| CodecError::UnknownRequestType(msg.request_type))?;
    Ok((kind, msg.telemetry()))
}
