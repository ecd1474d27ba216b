use std::fmt::Write as _;

use bytes::Bytes;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use quick_xml::escape::escape;
use serde_json::json;

use crate::status::{GmsecResult, Status, StatusClass, StatusCode};

/// Wire / schema type tags. The numeric values double as the binary encoding
/// tags, so they must not be reassigned.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FieldType {
    Char = 1,
    Bool = 2,
    I16 = 3,
    U16 = 4,
    I32 = 5,
    U32 = 6,
    F32 = 7,
    F64 = 8,
    String = 9,
    Binary = 10,
    I8 = 20,
    U8 = 21,
    I64 = 22,
    U64 = 23,
}

impl FieldType {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldType::Char => "CHAR",
            FieldType::Bool => "BOOL",
            FieldType::I8 => "I8",
            FieldType::I16 => "I16",
            FieldType::I32 => "I32",
            FieldType::I64 => "I64",
            FieldType::U8 => "U8",
            FieldType::U16 => "U16",
            FieldType::U32 => "U32",
            FieldType::U64 => "U64",
            FieldType::F32 => "F32",
            FieldType::F64 => "F64",
            FieldType::String => "STRING",
            FieldType::Binary => "BIN",
        }
    }

    /// Parses a type name as it appears in XML/JSON message forms and schema
    /// templates. Legacy aliases (SHORT, LONG, FLOAT, …) are accepted.
    pub fn from_type_name(name: &str) -> GmsecResult<FieldType> {
        let ftype = match name.to_uppercase().as_str() {
            "CHAR" => FieldType::Char,
            "BOOL" | "BOOLEAN" => FieldType::Bool,
            "I8" => FieldType::I8,
            "I16" | "SHORT" => FieldType::I16,
            "I32" | "LONG" => FieldType::I32,
            "I64" => FieldType::I64,
            "U8" => FieldType::U8,
            "U16" | "USHORT" => FieldType::U16,
            "U32" | "ULONG" => FieldType::U32,
            "U64" => FieldType::U64,
            "F32" | "FLOAT" => FieldType::F32,
            "F64" | "DOUBLE" => FieldType::F64,
            "STRING" => FieldType::String,
            "BIN" | "BINARY" | "BLOB" => FieldType::Binary,
            _ => {
                return Err(Status::new(
                    StatusClass::Field,
                    StatusCode::UnknownFieldType,
                    format!("Unknown field type: {}", name),
                ))
            }
        };
        Ok(ftype)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Char(char),
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Binary(Bytes),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Char(_) => FieldType::Char,
            FieldValue::Bool(_) => FieldType::Bool,
            FieldValue::I8(_) => FieldType::I8,
            FieldValue::I16(_) => FieldType::I16,
            FieldValue::I32(_) => FieldType::I32,
            FieldValue::I64(_) => FieldType::I64,
            FieldValue::U8(_) => FieldType::U8,
            FieldValue::U16(_) => FieldType::U16,
            FieldValue::U32(_) => FieldType::U32,
            FieldValue::U64(_) => FieldType::U64,
            FieldValue::F32(_) => FieldType::F32,
            FieldValue::F64(_) => FieldType::F64,
            FieldValue::String(_) => FieldType::String,
            FieldValue::Binary(_) => FieldType::Binary,
        }
    }

    /// Neutral value of the given type, used when materializing schema
    /// template fields that declare no default.
    pub fn default_for(ftype: FieldType) -> FieldValue {
        match ftype {
            FieldType::Char => FieldValue::Char(' '),
            FieldType::Bool => FieldValue::Bool(false),
            FieldType::I8 => FieldValue::I8(0),
            FieldType::I16 => FieldValue::I16(0),
            FieldType::I32 => FieldValue::I32(0),
            FieldType::I64 => FieldValue::I64(0),
            FieldType::U8 => FieldValue::U8(0),
            FieldType::U16 => FieldValue::U16(0),
            FieldType::U32 => FieldValue::U32(0),
            FieldType::U64 => FieldValue::U64(0),
            FieldType::F32 => FieldValue::F32(0.0),
            FieldType::F64 => FieldValue::F64(0.0),
            FieldType::String => FieldValue::String(String::new()),
            FieldType::Binary => FieldValue::Binary(Bytes::new()),
        }
    }

    /// Parses the textual representation used by the XML/JSON message forms
    /// and by template default values.
    pub fn parse(ftype: FieldType, text: &str) -> GmsecResult<FieldValue> {
        let bad_value = || {
            Status::new(
                StatusClass::Field,
                StatusCode::InvalidFieldValue,
                format!(
                    "Value '{}' cannot be parsed as type {}",
                    text,
                    ftype.type_name()
                ),
            )
        };

        let value = match ftype {
            FieldType::Char => {
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => FieldValue::Char(c),
                    _ => return Err(bad_value()),
                }
            }
            FieldType::Bool => {
                if text.eq_ignore_ascii_case("true") || text == "1" {
                    FieldValue::Bool(true)
                } else if text.eq_ignore_ascii_case("false") || text == "0" {
                    FieldValue::Bool(false)
                } else {
                    return Err(bad_value());
                }
            }
            FieldType::I8 => FieldValue::I8(text.trim().parse().map_err(|_| bad_value())?),
            FieldType::I16 => FieldValue::I16(text.trim().parse().map_err(|_| bad_value())?),
            FieldType::I32 => FieldValue::I32(text.trim().parse().map_err(|_| bad_value())?),
            FieldType::I64 => FieldValue::I64(text.trim().parse().map_err(|_| bad_value())?),
            FieldType::U8 => FieldValue::U8(text.trim().parse().map_err(|_| bad_value())?),
            FieldType::U16 => FieldValue::U16(text.trim().parse().map_err(|_| bad_value())?),
            FieldType::U32 => FieldValue::U32(text.trim().parse().map_err(|_| bad_value())?),
            FieldType::U64 => FieldValue::U64(text.trim().parse().map_err(|_| bad_value())?),
            FieldType::F32 => FieldValue::F32(text.trim().parse().map_err(|_| bad_value())?),
            FieldType::F64 => FieldValue::F64(text.trim().parse().map_err(|_| bad_value())?),
            FieldType::String => FieldValue::String(text.to_string()),
            FieldType::Binary => {
                let text = text.trim();
                if text.len() % 2 != 0 {
                    return Err(bad_value());
                }
                let mut bytes = Vec::with_capacity(text.len() / 2);
                for i in (0..text.len()).step_by(2) {
                    let byte =
                        u8::from_str_radix(&text[i..i + 2], 16).map_err(|_| bad_value())?;
                    bytes.push(byte);
                }
                FieldValue::Binary(Bytes::from(bytes))
            }
        };
        Ok(value)
    }
}

/// A single typed name/value entry of a [Message](crate::message::Message).
/// Immutable once constructed; messages store their own copies.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    name: String,
    value: FieldValue,
    header: bool,
    tracking: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, value: FieldValue) -> GmsecResult<Field> {
        let name = name.into();
        if name.is_empty() {
            return Err(Status::new(
                StatusClass::Field,
                StatusCode::InvalidFieldName,
                "Field name cannot be an empty string",
            ));
        }
        Ok(Field {
            name,
            value,
            header: false,
            tracking: false,
        })
    }

    pub fn with_header(mut self, header: bool) -> Field {
        self.header = header;
        self
    }

    pub(crate) fn set_tracking(&mut self, tracking: bool) {
        self.tracking = tracking;
    }

    /// Used when expanding schema templates into concrete fields; not part of
    /// the public contract.
    pub(crate) fn rename(&mut self, name: String) {
        debug_assert!(!name.is_empty());
        self.name = name;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    pub fn field_type(&self) -> FieldType {
        self.value.field_type()
    }

    pub fn is_header(&self) -> bool {
        self.header
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// Formats any value as a string; never fails.
    pub fn get_string_value(&self) -> String {
        match &self.value {
            FieldValue::Char(c) => c.to_string(),
            FieldValue::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            FieldValue::I8(v) => v.to_string(),
            FieldValue::I16(v) => v.to_string(),
            FieldValue::I32(v) => v.to_string(),
            FieldValue::I64(v) => v.to_string(),
            FieldValue::U8(v) => v.to_string(),
            FieldValue::U16(v) => v.to_string(),
            FieldValue::U32(v) => v.to_string(),
            FieldValue::U64(v) => v.to_string(),
            FieldValue::F32(v) => v.to_string(),
            FieldValue::F64(v) => v.to_string(),
            FieldValue::String(s) => s.clone(),
            FieldValue::Binary(b) => {
                let mut hex = String::with_capacity(b.len() * 2);
                for byte in b.iter() {
                    let _ = write!(hex, "{:02X}", byte);
                }
                hex
            }
        }
    }

    pub fn get_bool_value(&self) -> GmsecResult<bool> {
        match &self.value {
            FieldValue::Bool(b) => Ok(*b),
            FieldValue::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            FieldValue::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            _ => self.get_i64_value().map(|v| v != 0).map_err(|e| {
                Status::new(e.class, e.code, "Field cannot be represented as a boolean")
            }),
        }
    }

    pub fn get_i16_value(&self) -> GmsecResult<i16> {
        match &self.value {
            FieldValue::I16(v) => Ok(*v),
            FieldValue::Binary(b) => Ok(binary_to_u64(b, 2, "I16")? as i16),
            _ => {
                let v = self.widened().map_err(|_| conversion_err("I16"))?;
                if v < i16::MIN as f64 || v > i16::MAX as f64 {
                    return Err(conversion_err("I16"));
                }
                Ok(v as i16)
            }
        }
    }

    pub fn get_i32_value(&self) -> GmsecResult<i32> {
        match &self.value {
            FieldValue::I32(v) => Ok(*v),
            FieldValue::Binary(b) => Ok(binary_to_u64(b, 4, "I32")? as i32),
            _ => {
                let v = self.widened().map_err(|_| conversion_err("I32"))?;
                if v < i32::MIN as f64 || v > i32::MAX as f64 {
                    return Err(conversion_err("I32"));
                }
                Ok(v as i32)
            }
        }
    }

    pub fn get_i64_value(&self) -> GmsecResult<i64> {
        match &self.value {
            FieldValue::I64(v) => Ok(*v),
            FieldValue::Binary(b) => Ok(binary_to_u64(b, 8, "I64")? as i64),
            _ => {
                let v = self.widened().map_err(|_| conversion_err("I64"))?;
                if v < i64::MIN as f64 || v > i64::MAX as f64 {
                    return Err(conversion_err("I64"));
                }
                Ok(v as i64)
            }
        }
    }

    pub fn get_u16_value(&self) -> GmsecResult<u16> {
        match &self.value {
            FieldValue::U16(v) => Ok(*v),
            FieldValue::Binary(b) => Ok(binary_to_u64(b, 2, "U16")? as u16),
            _ => {
                let v = self.widened().map_err(|_| conversion_err("U16"))?;
                if v < 0.0 || v > u16::MAX as f64 {
                    return Err(conversion_err("U16"));
                }
                Ok(v as u16)
            }
        }
    }

    pub fn get_u32_value(&self) -> GmsecResult<u32> {
        match &self.value {
            FieldValue::U32(v) => Ok(*v),
            FieldValue::Binary(b) => Ok(binary_to_u64(b, 4, "U32")? as u32),
            _ => {
                let v = self.widened().map_err(|_| conversion_err("U32"))?;
                if v < 0.0 || v > u32::MAX as f64 {
                    return Err(conversion_err("U32"));
                }
                Ok(v as u32)
            }
        }
    }

    pub fn get_u64_value(&self) -> GmsecResult<u64> {
        match &self.value {
            FieldValue::U64(v) => Ok(*v),
            FieldValue::Binary(b) => binary_to_u64(b, 8, "U64"),
            _ => {
                let v = self.widened().map_err(|_| conversion_err("U64"))?;
                if v < 0.0 || v > u64::MAX as f64 {
                    return Err(conversion_err("U64"));
                }
                Ok(v as u64)
            }
        }
    }

    pub fn get_f64_value(&self) -> GmsecResult<f64> {
        self.widened()
    }

    fn widened(&self) -> GmsecResult<f64> {
        let v = match &self.value {
            FieldValue::Char(c) => *c as u32 as f64,
            FieldValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            FieldValue::I8(v) => *v as f64,
            FieldValue::I16(v) => *v as f64,
            FieldValue::I32(v) => *v as f64,
            FieldValue::I64(v) => *v as f64,
            FieldValue::U8(v) => *v as f64,
            FieldValue::U16(v) => *v as f64,
            FieldValue::U32(v) => *v as f64,
            FieldValue::U64(v) => *v as f64,
            // via the decimal rendering; widening the bit pattern directly
            // introduces noise digits
            FieldValue::F32(v) => v
                .to_string()
                .parse()
                .map_err(|_| conversion_err("F64"))?,
            FieldValue::F64(v) => *v,
            FieldValue::String(s) => s.trim().parse().map_err(|_| conversion_err("F64"))?,
            FieldValue::Binary(b) => f64::from_bits(binary_to_u64(b, 8, "F64")?),
        };
        Ok(v)
    }

    pub fn to_xml(&self) -> String {
        let head = if self.header { " HEAD=\"T\"" } else { "" };
        format!(
            "<FIELD NAME=\"{}\" TYPE=\"{}\"{}>{}</FIELD>",
            escape(&self.name),
            self.field_type().type_name(),
            head,
            escape(&self.get_string_value())
        )
    }

    pub fn to_json_value(&self) -> serde_json::Value {
        let mut value = json!({
            "NAME": self.name,
            "TYPE": self.field_type().type_name(),
            "VALUE": self.get_string_value(),
        });
        if self.header {
            value["HEAD"] = json!("T");
        }
        value
    }
}

fn conversion_err(target: &str) -> Status {
    Status::new(
        StatusClass::Field,
        StatusCode::InvalidField,
        format!("Field cannot be converted to {}", target),
    )
}

/// Interprets a blob as a big-endian unsigned integer of at most `width`
/// bytes.
fn binary_to_u64(blob: &Bytes, width: usize, target: &str) -> GmsecResult<u64> {
    if blob.len() > width {
        return Err(conversion_err(target));
    }
    let mut v = 0u64;
    for byte in blob.iter() {
        v = (v << 8) | *byte as u64;
    }
    Ok(v)
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    fn field(value: FieldValue) -> Field {
        Field::new("F", value).unwrap()
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = Field::new("", FieldValue::Bool(true)).unwrap_err();
        assert_eq!(err.class, StatusClass::Field);
        assert_eq!(err.code, StatusCode::InvalidFieldName);
    }

    #[rstest]
    #[case::short("SHORT", FieldType::I16)]
    #[case::ushort("USHORT", FieldType::U16)]
    #[case::long("LONG", FieldType::I32)]
    #[case::ulong("ULONG", FieldType::U32)]
    #[case::float("FLOAT", FieldType::F32)]
    #[case::double("DOUBLE", FieldType::F64)]
    #[case::blob("BLOB", FieldType::Binary)]
    #[case::boolean("BOOLEAN", FieldType::Bool)]
    #[case::lowercase("string", FieldType::String)]
    fn test_type_name_aliases(#[case] name: &str, #[case] expected: FieldType) {
        assert_eq!(FieldType::from_type_name(name).unwrap(), expected);
    }

    #[test]
    fn test_unknown_type_name() {
        let err = FieldType::from_type_name("QUATERNION").unwrap_err();
        assert_eq!(err.code, StatusCode::UnknownFieldType);
    }

    #[test]
    fn test_string_value_formatting() {
        assert_eq!(field(FieldValue::Bool(true)).get_string_value(), "true");
        assert_eq!(field(FieldValue::I32(-17)).get_string_value(), "-17");
        assert_eq!(
            field(FieldValue::Binary(Bytes::from_static(&[0xDE, 0xAD, 0x01]))).get_string_value(),
            "DEAD01"
        );
    }

    #[test]
    fn test_numeric_widening() {
        assert_eq!(field(FieldValue::U16(30)).get_i64_value().unwrap(), 30);
        assert_eq!(field(FieldValue::I8(-5)).get_f64_value().unwrap(), -5.0);
        assert_eq!(field(FieldValue::F32(1.5)).get_f64_value().unwrap(), 1.5);
        assert_eq!(
            field(FieldValue::String("42".to_string()))
                .get_i32_value()
                .unwrap(),
            42
        );
    }

    #[test]
    fn test_unrepresentable_conversions() {
        assert_eq!(
            field(FieldValue::String("abc".to_string()))
                .get_i64_value()
                .unwrap_err()
                .code,
            StatusCode::InvalidField
        );
        // negative source into unsigned target
        assert!(field(FieldValue::I32(-1)).get_u32_value().is_err());
        // out of range
        assert!(field(FieldValue::I64(70_000)).get_i16_value().is_err());
    }

    #[test]
    fn test_bool_conversion() {
        assert!(field(FieldValue::String("TRUE".to_string()))
            .get_bool_value()
            .unwrap());
        assert!(field(FieldValue::I32(7)).get_bool_value().unwrap());
        assert!(!field(FieldValue::U8(0)).get_bool_value().unwrap());
        assert!(field(FieldValue::String("yes".to_string()))
            .get_bool_value()
            .is_err());
    }

    #[test]
    fn test_binary_big_endian_conversion() {
        let f = field(FieldValue::Binary(Bytes::from_static(&[0x01, 0x00])));
        assert_eq!(f.get_u16_value().unwrap(), 256);
        assert_eq!(f.get_i64_value().unwrap(), 256);

        let too_wide = field(FieldValue::Binary(Bytes::from_static(&[0; 9])));
        assert!(too_wide.get_u64_value().is_err());
    }

    #[rstest]
    #[case::char(FieldType::Char, "x")]
    #[case::bool(FieldType::Bool, "true")]
    #[case::i64(FieldType::I64, "-9000000000")]
    #[case::u64(FieldType::U64, "18446744073709551615")]
    #[case::f64(FieldType::F64, "2.25")]
    #[case::string(FieldType::String, "hello world")]
    #[case::binary(FieldType::Binary, "CAFEBABE")]
    fn test_parse_round_trip(#[case] ftype: FieldType, #[case] text: &str) {
        let value = FieldValue::parse(ftype, text).unwrap();
        let f = Field::new("F", value).unwrap();
        assert_eq!(f.field_type(), ftype);
        assert_eq!(f.get_string_value(), text);
    }

    #[rstest]
    #[case::bad_int(FieldType::I16, "12.5")]
    #[case::bad_char(FieldType::Char, "ab")]
    #[case::bad_bool(FieldType::Bool, "maybe")]
    #[case::odd_hex(FieldType::Binary, "ABC")]
    #[case::bad_hex(FieldType::Binary, "ZZ")]
    fn test_parse_rejects(#[case] ftype: FieldType, #[case] text: &str) {
        let err = FieldValue::parse(ftype, text).unwrap_err();
        assert_eq!(err.code, StatusCode::InvalidFieldValue);
    }

    #[test]
    fn test_to_xml() {
        let f = Field::new("MISSION-ID", FieldValue::String("A<B".to_string()))
            .unwrap()
            .with_header(true);
        assert_eq!(
            f.to_xml(),
            "<FIELD NAME=\"MISSION-ID\" TYPE=\"STRING\" HEAD=\"T\">A&lt;B</FIELD>"
        );
    }

    #[test]
    fn test_to_json_value() {
        let f = Field::new("PUB-RATE", FieldValue::U16(30)).unwrap();
        let v = f.to_json_value();
        assert_eq!(v["NAME"], "PUB-RATE");
        assert_eq!(v["TYPE"], "U16");
        assert_eq!(v["VALUE"], "30");
        assert!(v.get("HEAD").is_none());
    }
}
