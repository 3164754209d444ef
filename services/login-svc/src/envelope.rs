//! Uniform `{code, message, data}` wrapper around every response body.

use std::fmt;

use serde::de::{self, Unexpected};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const SUCCESS_MESSAGE: &str = "Login successful";

/// Outcome code carried in every envelope. Serialized as `0` or `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Success,
    Failure,
}

impl ResultCode {
    pub const fn as_u8(self) -> u8 {
        match self {
            ResultCode::Success => 0,
            ResultCode::Failure => 1,
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

impl Serialize for ResultCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for ResultCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u64::deserialize(deserializer)? {
            0 => Ok(ResultCode::Success),
            1 => Ok(ResultCode::Failure),
            other => Err(de::Error::invalid_value(
                Unexpected::Unsigned(other),
                &"result code 0 or 1",
            )),
        }
    }
}

/// Response body shared by every endpoint outcome.
///
/// A success always carries data and [`SUCCESS_MESSAGE`]; a failure never
/// carries data. `data` is serialized as `null` when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: ResultCode,
    pub message: String,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: ResultCode::Success,
            message: SUCCESS_MESSAGE.to_string(),
            data: Some(data),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            code: ResultCode::Failure,
            message: message.into(),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == ResultCode::Success
    }
}
