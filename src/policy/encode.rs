//! Binary wire form of a [Message]: a format version byte, subject, kind and
//! per-field records, closed by a CRC-64 checksum that is validated on
//! decode. Integers travel as varints, floats as the varint of their bit
//! pattern, so the encoding is independent of host width and endianness.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytes_varint::VarIntSupportMut;
use crc::Crc;

use crate::field::{Field, FieldType, FieldValue};
use crate::message::{Message, MessageKind};
use crate::status::{GmsecResult, Status, StatusClass, StatusCode};
use crate::util::buf::{
    put_bytes, put_string, truncated, try_get_bytes, try_get_i64_varint, try_get_string,
    try_get_u64, try_get_u64_varint, try_get_u8, try_get_usize_varint,
};

const FORMAT_VERSION: u8 = 1;

const FLAG_HEADER: u8 = 1;
const FLAG_TRACKING: u8 = 2;

fn checksum(payload: &[u8]) -> u64 {
    let hasher = Crc::<u64>::new(&crc::CRC_64_REDIS);
    let mut digest = hasher.digest();
    digest.update(payload);
    digest.finalize()
}

fn bad_format(detail: impl Into<String>) -> Status {
    Status::new(StatusClass::Msg, StatusCode::BadMessageFormat, detail.into())
}

pub fn encode_message(msg: &Message) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(FORMAT_VERSION);
    put_string(&mut buf, msg.subject());
    buf.put_u8(msg.kind().into());
    buf.put_usize_varint(msg.field_count());
    for field in msg.fields() {
        put_field(&mut buf, field);
    }
    let crc = checksum(&buf);
    buf.put_u64(crc);
    buf.freeze()
}

pub fn decode_message(data: Bytes) -> GmsecResult<Message> {
    if data.len() < size_of::<u64>() {
        return Err(truncated());
    }
    let payload_len = data.len() - size_of::<u64>();
    let mut trailer = data.slice(payload_len..);
    if try_get_u64(&mut trailer)? != checksum(&data[..payload_len]) {
        return Err(bad_format("message blob checksum mismatch"));
    }

    let mut buf = data.slice(..payload_len);
    let version = try_get_u8(&mut buf)?;
    if version != FORMAT_VERSION {
        return Err(bad_format(format!(
            "unsupported message blob version: {}",
            version
        )));
    }
    let subject = try_get_string(&mut buf)?;
    let kind_tag = try_get_u8(&mut buf)?;
    let kind = MessageKind::try_from(kind_tag)
        .map_err(|_| bad_format(format!("message blob contains an unknown message kind: {}", kind_tag)))?;

    let mut msg = Message::new(subject, kind)
        .map_err(|_| bad_format("message blob contains an empty subject"))?;
    let field_count = try_get_usize_varint(&mut buf)?;
    for _ in 0..field_count {
        msg.add_field(get_field(&mut buf)?);
    }
    if buf.has_remaining() {
        return Err(bad_format("message blob has trailing bytes"));
    }
    Ok(msg)
}

fn put_field(buf: &mut BytesMut, field: &Field) {
    buf.put_u8(field.field_type().into());
    put_string(buf, field.name());
    let mut flags = 0;
    if field.is_header() {
        flags |= FLAG_HEADER;
    }
    if field.is_tracking() {
        flags |= FLAG_TRACKING;
    }
    buf.put_u8(flags);

    match field.value() {
        FieldValue::Char(c) => buf.put_u64_varint(*c as u64),
        FieldValue::Bool(b) => buf.put_u8(*b as u8),
        FieldValue::I8(v) => buf.put_u8(*v as u8),
        FieldValue::U8(v) => buf.put_u8(*v),
        FieldValue::I16(v) => buf.put_i64_varint(*v as i64),
        FieldValue::I32(v) => buf.put_i64_varint(*v as i64),
        FieldValue::I64(v) => buf.put_i64_varint(*v),
        FieldValue::U16(v) => buf.put_u64_varint(*v as u64),
        FieldValue::U32(v) => buf.put_u64_varint(*v as u64),
        FieldValue::U64(v) => buf.put_u64_varint(*v),
        FieldValue::F32(v) => buf.put_u64_varint(v.to_bits() as u64),
        FieldValue::F64(v) => buf.put_u64_varint(v.to_bits()),
        FieldValue::String(s) => put_string(buf, s),
        FieldValue::Binary(b) => put_bytes(buf, b),
    }
}

fn get_field(buf: &mut Bytes) -> GmsecResult<Field> {
    let type_tag = try_get_u8(buf)?;
    let ftype = FieldType::try_from(type_tag)
        .map_err(|_| bad_format(format!("message blob contains an unknown field type: {}", type_tag)))?;
    let name = try_get_string(buf)?;
    let flags = try_get_u8(buf)?;

    let value = match ftype {
        FieldType::Char => {
            let code = narrowed_uint::<u32>(try_get_u64_varint(buf)?)?;
            let c = char::from_u32(code)
                .ok_or_else(|| bad_format("message blob contains an invalid character"))?;
            FieldValue::Char(c)
        }
        FieldType::Bool => FieldValue::Bool(try_get_u8(buf)? != 0),
        FieldType::I8 => FieldValue::I8(try_get_u8(buf)? as i8),
        FieldType::U8 => FieldValue::U8(try_get_u8(buf)?),
        FieldType::I16 => FieldValue::I16(narrowed_int(try_get_i64_varint(buf)?)?),
        FieldType::I32 => FieldValue::I32(narrowed_int(try_get_i64_varint(buf)?)?),
        FieldType::I64 => FieldValue::I64(try_get_i64_varint(buf)?),
        FieldType::U16 => FieldValue::U16(narrowed_uint(try_get_u64_varint(buf)?)?),
        FieldType::U32 => FieldValue::U32(narrowed_uint(try_get_u64_varint(buf)?)?),
        FieldType::U64 => FieldValue::U64(try_get_u64_varint(buf)?),
        FieldType::F32 => {
            FieldValue::F32(f32::from_bits(narrowed_uint::<u32>(try_get_u64_varint(buf)?)?))
        }
        FieldType::F64 => FieldValue::F64(f64::from_bits(try_get_u64_varint(buf)?)),
        FieldType::String => FieldValue::String(try_get_string(buf)?),
        FieldType::Binary => FieldValue::Binary(try_get_bytes(buf)?),
    };

    let mut field = Field::new(name, value)
        .map_err(|_| bad_format("message blob contains an empty field name"))?
        .with_header(flags & FLAG_HEADER != 0);
    field.set_tracking(flags & FLAG_TRACKING != 0);
    Ok(field)
}

fn narrowed_int<T: TryFrom<i64>>(v: i64) -> GmsecResult<T> {
    T::try_from(v).map_err(|_| bad_format("message blob contains an out-of-range integer"))
}

fn narrowed_uint<T: TryFrom<u64>>(v: u64) -> GmsecResult<T> {
    T::try_from(v).map_err(|_| bad_format("message blob contains an out-of-range integer"))
}
