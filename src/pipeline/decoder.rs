use serde_json::{Map, Value};

use crate::constants::*;
use crate::error::DecodeError;
use crate::types::DecodedRecord;

/// A field as it may appear on the wire: canonical name first, then aliases.
struct WireField {
    names: &'static [&'static str],
}

impl WireField {
    fn canonical(&self) -> &'static str {
        self.names[0]
    }
}

const REGION: WireField = WireField {
    names: &[FIELD_REGION],
};
const ORIGIN: WireField = WireField {
    names: &[FIELD_ORIGIN, ALIAS_ORIGIN],
};
const DESTINATION: WireField = WireField {
    names: &[FIELD_DESTINATION, ALIAS_DESTINATION],
};
const EVENT_TIME: WireField = WireField {
    names: &[FIELD_EVENT_TIME, ALIAS_EVENT_TIME],
};
const DATA_SOURCE: WireField = WireField {
    names: &[FIELD_DATA_SOURCE, ALIAS_DATA_SOURCE],
};

/// Decode one raw queue payload. Pure: the same bytes always give the same result.
pub fn decode(payload: &[u8]) -> Result<DecodedRecord, DecodeError> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| DecodeError::MalformedEncoding(format!("invalid UTF-8: {e}")))?;

    let value: Value = serde_json::from_str(text)
        .map_err(|e| DecodeError::MalformedEncoding(format!("invalid JSON: {e}")))?;

    let object = value.as_object().ok_or_else(|| {
        DecodeError::MalformedEncoding(format!(
            "expected a JSON object, found {}",
            json_kind(&value)
        ))
    })?;

    Ok(DecodedRecord {
        region: text_field(object, &REGION)?,
        origin_coordinate: text_field(object, &ORIGIN)?,
        destination_coordinate: text_field(object, &DESTINATION)?,
        event_time: text_field(object, &EVENT_TIME)?,
        data_source: text_field(object, &DATA_SOURCE)?,
    })
}

fn text_field(object: &Map<String, Value>, field: &WireField) -> Result<String, DecodeError> {
    // null counts as absent
    let value = field
        .names
        .iter()
        .find_map(|name| object.get(*name).filter(|v| !v.is_null()));

    match value {
        None => Err(DecodeError::MissingField(field.canonical())),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(DecodeError::WrongType {
            field: field.canonical(),
            found: json_kind(other),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
