//! AMF0 value encoding/decoding (§4.E), scoped to exactly what the RTMP
//! client's `connect`/`createStream`/`play`/`publish` dialogue and its
//! `_result`/`_error`/`onStatus` responses need: numbers, strings,
//! booleans, null, and plain (non-typed) objects/ECMA arrays.

use std::collections::BTreeMap;

use streamcore_codec::bytestream::ByteReader;

use crate::error::RtmpError;

const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const OBJECT_END_MARKER: u8 = 0x09;

#[derive(Debug, Clone, PartialEq)]
pub enum Amf0Value {
    Number(f64),
    Boolean(bool),
    String(String),
    /// Property order follows key order, matching the original encoder's
    /// use of an ordered (sorted-by-key) map for command objects.
    Object(BTreeMap<String, Amf0Value>),
    Null,
    Undefined,
    EcmaArray(BTreeMap<String, Amf0Value>),
}

impl Amf0Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Amf0Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Amf0Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Amf0Value>> {
        match self {
            Amf0Value::Object(m) | Amf0Value::EcmaArray(m) => Some(m),
            _ => None,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Amf0Value::Number(n) => {
                out.push(MARKER_NUMBER);
                out.extend_from_slice(&n.to_be_bytes());
            }
            Amf0Value::Boolean(b) => {
                out.push(MARKER_BOOLEAN);
                out.push(if *b { 1 } else { 0 });
            }
            Amf0Value::String(s) => {
                out.push(MARKER_STRING);
                encode_short_string(s, out);
            }
            Amf0Value::Object(map) => {
                out.push(MARKER_OBJECT);
                encode_properties(map, out);
            }
            Amf0Value::Null => out.push(MARKER_NULL),
            Amf0Value::Undefined => out.push(MARKER_UNDEFINED),
            Amf0Value::EcmaArray(map) => {
                out.push(MARKER_ECMA_ARRAY);
                out.extend_from_slice(&(map.len() as u32).to_be_bytes());
                encode_properties(map, out);
            }
        }
    }

    pub fn decode(r: &mut ByteReader) -> Result<Self, RtmpError> {
        let marker = r.read_u8().map_err(|e| RtmpError::Amf(e.to_string()))?;
        match marker {
            MARKER_NUMBER => {
                let bits = r.read_u64().map_err(|e| RtmpError::Amf(e.to_string()))?;
                Ok(Amf0Value::Number(f64::from_bits(bits)))
            }
            MARKER_BOOLEAN => {
                let b = r.read_u8().map_err(|e| RtmpError::Amf(e.to_string()))?;
                Ok(Amf0Value::Boolean(b != 0))
            }
            MARKER_STRING => Ok(Amf0Value::String(decode_short_string(r)?)),
            MARKER_OBJECT => Ok(Amf0Value::Object(decode_properties(r)?)),
            MARKER_NULL => Ok(Amf0Value::Null),
            MARKER_UNDEFINED => Ok(Amf0Value::Undefined),
            MARKER_ECMA_ARRAY => {
                let _count = r.read_u32().map_err(|e| RtmpError::Amf(e.to_string()))?;
                Ok(Amf0Value::EcmaArray(decode_properties(r)?))
            }
            other => Err(RtmpError::Amf(format!("unsupported AMF0 marker 0x{:02x}", other))),
        }
    }
}

fn encode_short_string(s: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn decode_short_string(r: &mut ByteReader) -> Result<String, RtmpError> {
    let len = r.read_u16().map_err(|e| RtmpError::Amf(e.to_string()))? as usize;
    let bytes = r.read_bytes(len).map_err(|e| RtmpError::Amf(e.to_string()))?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn encode_properties(map: &BTreeMap<String, Amf0Value>, out: &mut Vec<u8>) {
    for (key, value) in map {
        encode_short_string(key, out);
        value.encode(out);
    }
    out.extend_from_slice(&0u16.to_be_bytes());
    out.push(OBJECT_END_MARKER);
}

fn decode_properties(r: &mut ByteReader) -> Result<BTreeMap<String, Amf0Value>, RtmpError> {
    let mut map = BTreeMap::new();
    loop {
        let key = decode_short_string(r)?;
        if key.is_empty() {
            let end = r.read_u8().map_err(|e| RtmpError::Amf(e.to_string()))?;
            if end != OBJECT_END_MARKER {
                return Err(RtmpError::Amf(format!("expected object-end marker, got 0x{:02x}", end)));
            }
            break;
        }
        map.insert(key, Amf0Value::decode(r)?);
    }
    Ok(map)
}

/// Decodes every top-level AMF0 value in a command message payload, in
/// order: command name, transaction id, command object, then any
/// trailing arguments.
pub fn decode_all(data: &[u8]) -> Result<Vec<Amf0Value>, RtmpError> {
    let mut r = ByteReader::new(data);
    let mut values = Vec::new();
    while r.remaining() > 0 {
        values.push(Amf0Value::decode(&mut r)?);
    }
    Ok(values)
}

/// Flattens an AMF0 object into `string -> string`, per the control
/// callback surface's item-map contract: strings pass through, numbers
/// are formatted, booleans become `"enable"`/`"disable"`; other value
/// kinds are skipped.
pub fn flatten_to_items(value: &Amf0Value) -> BTreeMap<String, String> {
    let mut items = BTreeMap::new();
    let Some(map) = value.as_object() else { return items };
    for (key, v) in map {
        let rendered = match v {
            Amf0Value::String(s) => Some(s.clone()),
            Amf0Value::Number(n) => Some(n.to_string()),
            Amf0Value::Boolean(b) => Some(if *b { "enable".to_string() } else { "disable".to_string() }),
            _ => None,
        };
        if let Some(value) = rendered {
            items.insert(key.clone(), value);
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_round_trips() {
        let mut buf = Vec::new();
        Amf0Value::Number(3.5).encode(&mut buf);
        let mut r = ByteReader::new(&buf);
        assert_eq!(Amf0Value::decode(&mut r).unwrap(), Amf0Value::Number(3.5));
    }

    #[test]
    fn string_round_trips() {
        let mut buf = Vec::new();
        Amf0Value::String("connect".into()).encode(&mut buf);
        let mut r = ByteReader::new(&buf);
        assert_eq!(Amf0Value::decode(&mut r).unwrap(), Amf0Value::String("connect".into()));
    }

    #[test]
    fn object_round_trips_with_sorted_keys() {
        let mut map = BTreeMap::new();
        map.insert("app".to_string(), Amf0Value::String("live".into()));
        map.insert("tcUrl".to_string(), Amf0Value::String("rtmp://host/live".into()));
        let obj = Amf0Value::Object(map.clone());

        let mut buf = Vec::new();
        obj.encode(&mut buf);
        let mut r = ByteReader::new(&buf);
        let decoded = Amf0Value::decode(&mut r).unwrap();
        assert_eq!(decoded, Amf0Value::Object(map));
    }

    #[test]
    fn decode_all_parses_sequential_values() {
        let mut buf = Vec::new();
        Amf0Value::String("_result".into()).encode(&mut buf);
        Amf0Value::Number(1.0).encode(&mut buf);
        Amf0Value::Null.encode(&mut buf);

        let values = decode_all(&buf).unwrap();
        assert_eq!(values, vec![Amf0Value::String("_result".into()), Amf0Value::Number(1.0), Amf0Value::Null]);
    }

    #[test]
    fn flatten_skips_non_scalar_values() {
        let mut map = BTreeMap::new();
        map.insert("level".to_string(), Amf0Value::String("status".into()));
        map.insert("clientid".to_string(), Amf0Value::Number(42.0));
        map.insert("nested".to_string(), Amf0Value::Object(BTreeMap::new()));
        let items = flatten_to_items(&Amf0Value::Object(map));

        assert_eq!(items.get("level"), Some(&"status".to_string()));
        assert_eq!(items.get("clientid"), Some(&"42".to_string()));
        assert!(!items.contains_key("nested"));
    }
}
