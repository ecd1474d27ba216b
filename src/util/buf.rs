use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytes_varint::try_get_fixed::TryGetFixedSupport;
use bytes_varint::{VarIntSupport, VarIntSupportMut};

use crate::status::{GmsecResult, Status, StatusClass, StatusCode};

//TODO convenience for serializing / deserializing collections

pub fn truncated() -> Status {
    Status::new(
        StatusClass::Msg,
        StatusCode::BadMessageFormat,
        "message blob is truncated",
    )
}

pub fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_usize_varint(s.len());
    buf.put_slice(s.as_bytes());
}

pub fn try_get_string(buf: &mut impl Buf) -> GmsecResult<String> {
    let bytes = try_get_bytes(buf)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| {
        Status::new(
            StatusClass::Msg,
            StatusCode::BadMessageFormat,
            "message blob contains a non-UTF-8 string",
        )
    })
}

pub fn put_bytes(buf: &mut BytesMut, b: &[u8]) {
    buf.put_usize_varint(b.len());
    buf.put_slice(b);
}

pub fn try_get_bytes(buf: &mut impl Buf) -> GmsecResult<Bytes> {
    let len = try_get_usize_varint(buf)?;
    if buf.remaining() < len {
        return Err(truncated());
    }
    Ok(buf.copy_to_bytes(len))
}

pub fn try_get_u8(buf: &mut impl Buf) -> GmsecResult<u8> {
    buf.try_get_u8().map_err(|_| truncated())
}

pub fn try_get_u64(buf: &mut impl Buf) -> GmsecResult<u64> {
    buf.try_get_u64().map_err(|_| truncated())
}

pub fn try_get_u64_varint(buf: &mut impl Buf) -> GmsecResult<u64> {
    buf.try_get_u64_varint().map_err(|_| truncated())
}

pub fn try_get_i64_varint(buf: &mut impl Buf) -> GmsecResult<i64> {
    buf.try_get_i64_varint().map_err(|_| truncated())
}

pub fn try_get_usize_varint(buf: &mut impl Buf) -> GmsecResult<usize> {
    buf.try_get_usize_varint().map_err(|_| truncated())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_string_round_trip() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "GMSEC.MSSN.SAT");
        put_string(&mut buf, "");

        let mut buf = buf.freeze();
        assert_eq!(try_get_string(&mut buf).unwrap(), "GMSEC.MSSN.SAT");
        assert_eq!(try_get_string(&mut buf).unwrap(), "");
        assert!(!buf.has_remaining());
    }

    #[test]
    fn test_bytes_round_trip() {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, &[0xCA, 0xFE]);

        let mut buf = buf.freeze();
        assert_eq!(try_get_bytes(&mut buf).unwrap(), Bytes::from_static(&[0xCA, 0xFE]));
    }

    #[test]
    fn test_truncated_input() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "truncate me");
        let mut buf = buf.freeze().slice(0..4);

        let err = try_get_string(&mut buf).unwrap_err();
        assert_eq!(err.class, StatusClass::Msg);
        assert_eq!(err.code, StatusCode::BadMessageFormat);
    }

    #[test]
    fn test_non_utf8_rejected() {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, &[0xFF, 0xFE]);

        let err = try_get_string(&mut buf.freeze()).unwrap_err();
        assert_eq!(err.code, StatusCode::BadMessageFormat);
    }
}
