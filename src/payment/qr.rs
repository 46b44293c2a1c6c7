// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Decoded QR payment offer.

use serde_json::{Map, Value};

use crate::error::HandshakeError;

/// Payment offer scanned from a QR code:
/// `{"name": .., "token": .., "totalamt": .., "BLE": ..}`.
#[derive(Debug, Clone, PartialEq)]
pub struct QrPayload {
    pub name: String,
    pub token: Option<String>,
    pub amount: f64,
    /// Whether the payee accepts confirmation over BLE.
    pub ble: bool,
}

impl QrPayload {
    /// Parse the decoded QR text.
    ///
    /// `totalamt` is required and must be a finite number, either as a JSON
    /// number or a numeric string. Its sign is left for the peer to judge.
    pub fn parse(text: &str) -> Result<Self, HandshakeError> {
        let value: Value = serde_json::from_str(text)?;
        let object = value
            .as_object()
            .ok_or_else(|| HandshakeError::Parse("payload is not a JSON object".to_string()))?;

        let amount = parse_amount(object)?;

        Ok(Self {
            name: string_field(object, "name").unwrap_or_default(),
            token: string_field(object, "token").filter(|t| !t.is_empty()),
            amount,
            ble: object.get("BLE").map(is_truthy).unwrap_or(false),
        })
    }

    /// Key the selected device is remembered under: token, then name.
    pub fn remember_key(&self) -> &str {
        self.token.as_deref().unwrap_or(&self.name)
    }
}

fn parse_amount(object: &Map<String, Value>) -> Result<f64, HandshakeError> {
    let raw = match object.get("totalamt") {
        None | Some(Value::Null) => {
            return Err(HandshakeError::Parse("missing totalamt".to_string()))
        }
        Some(raw) => raw,
    };

    let amount = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match amount {
        Some(a) if a.is_finite() => Ok(a),
        _ => Err(HandshakeError::Parse(format!(
            "totalamt is not a valid amount: {}",
            raw
        ))),
    }
}

fn string_field(object: &Map<String, Value>, field: &str) -> Option<String> {
    match object.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => false,
    }
}
