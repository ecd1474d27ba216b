//! Security policy layer: subject validation and authorization, plus the
//! transformation of messages to and from their transportable wire form.
//!
//! The policy in force is chosen by the `SEC-POLICY` config value from a
//! fixed registry of implementations. An unrecognized name yields a policy
//! that fails closed instead of an outright construction error, so the
//! failure surfaces when the connection is used rather than configured.

pub mod encode;
pub mod sub_policy;

use std::collections::BTreeMap;
use std::fmt::Write as _;

use bytes::{Bytes, BytesMut};
use bytes_varint::VarIntSupportMut;
use lz4_flex::block::{compress_prepend_size, decompress_size_prepended};
use tracing::warn;

use crate::config::{keys, Config};
use crate::message::Message;
use crate::policy::sub_policy::{
    Access, Cipher, NullCipher, NullSigner, OpenAccess, RotCipher, Sha256Signer, Signer,
};
use crate::status::{GmsecResult, Status, StatusClass, StatusCode};
use crate::subject;
use crate::util::buf::{put_string, try_get_string, try_get_usize_varint};

pub trait Policy: Send + Sync {
    fn is_valid_subject(&self, subject: &str) -> bool;
    fn is_valid_subscription(&self, pattern: &str) -> bool;

    fn check_subscribe(&self, pattern: &str) -> GmsecResult<()>;
    fn check_send(&self, subject: &str) -> GmsecResult<()>;

    /// Message to payload bytes in the policy's configured encoding.
    fn encode(&self, msg: &Message) -> GmsecResult<Bytes>;
    fn decode(&self, data: Bytes) -> GmsecResult<Message>;

    /// Full outbound transformation: encode, then compress / encrypt / sign
    /// as configured, with the applied steps recorded in a leading
    /// [WireMeta] block.
    fn package(&self, msg: &Message) -> GmsecResult<Bytes>;
    fn unpackage(&self, data: Bytes) -> GmsecResult<Message>;
}

#[cfg(test)]
impl std::fmt::Debug for dyn Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Policy").finish_non_exhaustive()
    }
}

/// Builds the policy selected by `SEC-POLICY` (default `API`).
pub fn from_config(config: &Config) -> GmsecResult<Box<dyn Policy>> {
    let name = config
        .get_value(keys::SEC_POLICY)
        .unwrap_or("API")
        .to_ascii_uppercase();
    match name.as_str() {
        "API" => Ok(Box::new(ApiPolicy::from_config(config)?)),
        _ => {
            warn!(policy = %name, "unrecognized security policy, failing closed");
            Ok(Box::new(InvalidPolicy::new(Status::new(
                StatusClass::Policy,
                StatusCode::InitializationError,
                format!("'{}' is not a recognized security policy", name),
            ))))
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum MessageEncoding {
    #[default]
    Binary,
    Xml,
    Json,
}

pub const META_COMPRESS: &str = "ZIP";
pub const META_ENCRYPT: &str = "ENC";
pub const META_SIGNATURE: &str = "SIG";

/// Key/value metadata prepended to a packaged message, recording the
/// transformations applied to the payload that follows it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WireMeta {
    entries: BTreeMap<String, String>,
}

impl WireMeta {
    pub fn new() -> WireMeta {
        WireMeta::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.entries.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn put(&self, buf: &mut BytesMut) {
        buf.put_usize_varint(self.entries.len());
        for (key, value) in &self.entries {
            put_string(buf, key);
            put_string(buf, value);
        }
    }

    pub fn try_read(buf: &mut Bytes) -> GmsecResult<WireMeta> {
        let count = try_get_usize_varint(buf)?;
        let mut meta = WireMeta::new();
        for _ in 0..count {
            let key = try_get_string(buf)?;
            let value = try_get_string(buf)?;
            meta.entries.insert(key, value);
        }
        Ok(meta)
    }
}

/// The standard policy. Subject validation and the wire pipeline are driven
/// by config; access control, cipher and signer are pluggable sub-policies.
pub struct ApiPolicy {
    validate_subjects: bool,
    lenient_subjects: bool,
    encoding: MessageEncoding,
    compress: bool,
    access: Box<dyn Access>,
    cipher: Box<dyn Cipher>,
    signer: Box<dyn Signer>,
}

impl ApiPolicy {
    /// Config keys: `SEC-VAL-SUB` (default false), `SEC-VAL-SUB-LENIENT`
    /// (default true), `GMSEC-ENCODE-XML` (legacy alias `SEC-ENCODE-XML`),
    /// `GMSEC-ENCODE-JSON`, `POL-COMPRESS` (default false),
    /// `SEC-CIPHER-DELTA` (enables [RotCipher]), `SEC-SIGNER`
    /// (`NONE` | `SHA256`).
    pub fn from_config(config: &Config) -> GmsecResult<ApiPolicy> {
        let validate_subjects = config.get_bool_value(keys::VALIDATE_SUBJECT, false);
        let lenient_subjects = config.get_bool_value(keys::VALIDATE_SUBJECT_LENIENT, true);

        let xml = config.get_bool_value(
            keys::ENCODE_XML,
            config.get_bool_value(keys::LEGACY_ENCODE_XML, false),
        );
        let json = config.get_bool_value(keys::ENCODE_JSON, false);
        let encoding = match (xml, json) {
            (true, true) => {
                return Err(Status::new(
                    StatusClass::Policy,
                    StatusCode::InvalidConfig,
                    "GMSEC-ENCODE-XML and GMSEC-ENCODE-JSON are mutually exclusive",
                ))
            }
            (true, false) => MessageEncoding::Xml,
            (false, true) => MessageEncoding::Json,
            (false, false) => MessageEncoding::Binary,
        };
        let compress = config.get_bool_value(keys::POL_COMPRESS, false);

        let cipher: Box<dyn Cipher> = match config.get_value(keys::SEC_CIPHER_DELTA) {
            None => Box::new(NullCipher),
            Some(raw) => match raw.trim().parse::<u8>() {
                Ok(delta) if delta > 0 => Box::new(RotCipher::new(delta)),
                _ => {
                    return Err(Status::new(
                        StatusClass::Policy,
                        StatusCode::InvalidConfig,
                        format!("'{}' is not a valid value for SEC-CIPHER-DELTA", raw),
                    ))
                }
            },
        };

        let signer_name = config
            .get_value(keys::SEC_SIGNER)
            .unwrap_or("NONE")
            .to_ascii_uppercase();
        let signer: Box<dyn Signer> = match signer_name.as_str() {
            "NONE" => Box::new(NullSigner),
            "SHA256" => Box::new(Sha256Signer),
            _ => {
                return Err(Status::new(
                    StatusClass::Policy,
                    StatusCode::InvalidConfig,
                    format!("'{}' is not a valid value for SEC-SIGNER", signer_name),
                ))
            }
        };

        Ok(ApiPolicy {
            validate_subjects,
            lenient_subjects,
            encoding,
            compress,
            access: Box::new(OpenAccess),
            cipher,
            signer,
        })
    }

    pub fn with_access(mut self, access: Box<dyn Access>) -> ApiPolicy {
        self.access = access;
        self
    }

    pub fn encoding(&self) -> MessageEncoding {
        self.encoding
    }
}

impl Policy for ApiPolicy {
    fn is_valid_subject(&self, subject_str: &str) -> bool {
        !self.validate_subjects || subject::is_valid(subject_str, self.lenient_subjects)
    }

    fn is_valid_subscription(&self, pattern: &str) -> bool {
        !self.validate_subjects || subject::is_valid_subscription(pattern, self.lenient_subjects)
    }

    fn check_subscribe(&self, pattern: &str) -> GmsecResult<()> {
        if !self.is_valid_subscription(pattern) {
            return Err(Status::new(
                StatusClass::Msg,
                StatusCode::InvalidSubjectName,
                format!("Subject '{}' is not valid", pattern),
            ));
        }
        if !self.access.can_subscribe(pattern) {
            return Err(Status::new(
                StatusClass::Policy,
                StatusCode::SubscribeNotAuthorized,
                format!("Subscribing to subject '{}' is not authorized", pattern),
            ));
        }
        Ok(())
    }

    fn check_send(&self, subject_str: &str) -> GmsecResult<()> {
        if !self.is_valid_subject(subject_str) {
            return Err(Status::new(
                StatusClass::Msg,
                StatusCode::InvalidSubjectName,
                format!("Subject '{}' is not valid", subject_str),
            ));
        }
        if !self.access.can_send(subject_str) {
            return Err(Status::new(
                StatusClass::Policy,
                StatusCode::PublishNotAuthorized,
                format!("Publishing to subject '{}' is not authorized", subject_str),
            ));
        }
        Ok(())
    }

    fn encode(&self, msg: &Message) -> GmsecResult<Bytes> {
        let encoded = match self.encoding {
            MessageEncoding::Binary => encode::encode_message(msg),
            MessageEncoding::Xml => Bytes::copy_from_slice(msg.to_xml().as_bytes()),
            MessageEncoding::Json => Bytes::copy_from_slice(msg.to_json().as_bytes()),
        };
        Ok(encoded)
    }

    fn decode(&self, data: Bytes) -> GmsecResult<Message> {
        match self.encoding {
            MessageEncoding::Binary => encode::decode_message(data),
            MessageEncoding::Xml => Message::from_xml(text_payload(&data)?),
            MessageEncoding::Json => Message::from_json(text_payload(&data)?),
        }
    }

    fn package(&self, msg: &Message) -> GmsecResult<Bytes> {
        let mut payload = self.encode(msg)?;
        let mut meta = WireMeta::new();

        if self.compress {
            payload = Bytes::from(compress_prepend_size(&payload));
            meta.set(META_COMPRESS, "1");
        }
        if !self.cipher.is_null() {
            payload = self.cipher.encrypt(payload)?;
            meta.set(META_ENCRYPT, "1");
        }
        if let Some(digest) = self.signer.digest(&payload) {
            meta.set(META_SIGNATURE, hex(&digest));
        }

        let mut buf = BytesMut::new();
        meta.put(&mut buf);
        buf.extend_from_slice(&payload);
        Ok(buf.freeze())
    }

    fn unpackage(&self, mut data: Bytes) -> GmsecResult<Message> {
        let meta = WireMeta::try_read(&mut data)?;
        let mut payload = data;

        let claimed = meta.get(META_SIGNATURE);
        let computed = self.signer.digest(&payload).map(|d| hex(&d));
        match (claimed, computed.as_deref()) {
            (None, None) => {}
            (Some(claimed), Some(computed)) if claimed == computed => {}
            _ => {
                return Err(Status::new(
                    StatusClass::Policy,
                    StatusCode::InvalidSignature,
                    "message signature verification failed",
                ))
            }
        }

        if meta.get(META_ENCRYPT).is_some() {
            if self.cipher.is_null() {
                return Err(Status::new(
                    StatusClass::Policy,
                    StatusCode::EncodingError,
                    "message is encrypted but no cipher is configured",
                ));
            }
            payload = self.cipher.decrypt(payload)?;
        }

        if meta.get(META_COMPRESS).is_some() {
            let decompressed = decompress_size_prepended(&payload).map_err(|_| {
                Status::new(
                    StatusClass::Msg,
                    StatusCode::BadMessageFormat,
                    "failed to decompress message payload",
                )
            })?;
            payload = Bytes::from(decompressed);
        }

        self.decode(payload)
    }
}

/// Placeholder policy bound to a construction failure; every operation
/// reports that failure.
pub struct InvalidPolicy {
    status: Status,
}

impl InvalidPolicy {
    pub fn new(status: Status) -> InvalidPolicy {
        InvalidPolicy { status }
    }
}

impl Policy for InvalidPolicy {
    fn is_valid_subject(&self, _subject: &str) -> bool {
        false
    }

    fn is_valid_subscription(&self, _pattern: &str) -> bool {
        false
    }

    fn check_subscribe(&self, _pattern: &str) -> GmsecResult<()> {
        Err(self.status.clone())
    }

    fn check_send(&self, _subject: &str) -> GmsecResult<()> {
        Err(self.status.clone())
    }

    fn encode(&self, _msg: &Message) -> GmsecResult<Bytes> {
        Err(self.status.clone())
    }

    fn decode(&self, _data: Bytes) -> GmsecResult<Message> {
        Err(self.status.clone())
    }

    fn package(&self, _msg: &Message) -> GmsecResult<Bytes> {
        Err(self.status.clone())
    }

    fn unpackage(&self, _data: Bytes) -> GmsecResult<Message> {
        Err(self.status.clone())
    }
}

fn text_payload(data: &[u8]) -> GmsecResult<&str> {
    std::str::from_utf8(data).map_err(|_| {
        Status::new(
            StatusClass::Msg,
            StatusCode::BadMessageFormat,
            "message payload is not valid UTF-8",
        )
    })
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod test {
    use rstest::*;

    use crate::field::{Field, FieldValue};
    use crate::message::MessageKind;

    use super::*;

    fn policy(args: &[&str]) -> Box<dyn Policy> {
        from_config(&Config::from_args(args)).unwrap()
    }

    fn sample_message() -> Message {
        let mut msg = Message::new("GMSEC.MSSN.SAT1.MSG.LOG.APP", MessageKind::Publish).unwrap();
        msg.add_field(
            Field::new("MISSION-ID", FieldValue::String("MSSN".to_string()))
                .unwrap()
                .with_header(true),
        );
        msg.add_field(Field::new("SEVERITY", FieldValue::I16(3)).unwrap());
        msg.add_field(
            Field::new("MSG-TEXT", FieldValue::String("all systems nominal".to_string())).unwrap(),
        );
        msg
    }

    #[rstest]
    #[case::binary(&[])]
    #[case::xml(&["gmsec-encode-xml=true"])]
    #[case::legacy_xml(&["sec-encode-xml=true"])]
    #[case::json(&["gmsec-encode-json=true"])]
    #[case::compressed(&["pol-compress=true"])]
    #[case::encrypted(&["sec-cipher-delta=13"])]
    #[case::signed(&["sec-signer=SHA256"])]
    #[case::kitchen_sink(&["pol-compress=true", "sec-cipher-delta=42", "sec-signer=sha256"])]
    fn test_package_round_trip(#[case] args: &[&str]) {
        let policy = policy(args);
        let msg = sample_message();
        let unpacked = policy.unpackage(policy.package(&msg).unwrap()).unwrap();
        assert_eq!(unpacked, msg);
    }

    #[test]
    fn test_xml_and_json_encoding_mutually_exclusive() {
        let config = Config::from_args(["gmsec-encode-xml=true", "gmsec-encode-json=true"]);
        let err = from_config(&config).unwrap_err();
        assert_eq!(err.class, StatusClass::Policy);
        assert_eq!(err.code, StatusCode::InvalidConfig);
    }

    #[test]
    fn test_unknown_policy_fails_closed() {
        let policy = policy(&["sec-policy=C2-NSS"]);
        assert!(!policy.is_valid_subject("A.B"));

        let err = policy.check_send("A.B").unwrap_err();
        assert_eq!(err.class, StatusClass::Policy);
        assert_eq!(err.code, StatusCode::InitializationError);
        assert_eq!(err.reason, "'C2-NSS' is not a recognized security policy");

        assert!(policy.package(&sample_message()).is_err());
    }

    #[test]
    fn test_subject_validation_off_by_default() {
        let policy = policy(&[]);
        assert!(policy.is_valid_subject("not..a..subject"));
        assert!(policy.check_send("not..a..subject").is_ok());
    }

    #[rstest]
    #[case::lenient_accepts_lowercase(&["sec-val-sub=true"], "gmsec.mssn.sat", true)]
    #[case::strict_rejects_lowercase(&["sec-val-sub=true", "sec-val-sub-lenient=false"], "gmsec.mssn.sat", false)]
    #[case::empty_element(&["sec-val-sub=true"], "GMSEC..SAT", false)]
    fn test_subject_validation(#[case] args: &[&str], #[case] subject: &str, #[case] valid: bool) {
        let policy = policy(args);
        assert_eq!(policy.is_valid_subject(subject), valid);
        if !valid {
            let err = policy.check_send(subject).unwrap_err();
            assert_eq!(err.code, StatusCode::InvalidSubjectName);
        }
    }

    #[test]
    fn test_subscription_wildcards_pass_subject_validation() {
        let policy = policy(&["sec-val-sub=true"]);
        assert!(policy.is_valid_subscription("GMSEC.*.SAT.>"));
        assert!(policy.check_subscribe("GMSEC.*.SAT.>").is_ok());
        assert!(!policy.is_valid_subject("GMSEC.*.SAT.>"));
    }

    struct DenyAll;

    impl Access for DenyAll {
        fn can_subscribe(&self, _pattern: &str) -> bool {
            false
        }

        fn can_send(&self, _subject: &str) -> bool {
            false
        }
    }

    #[test]
    fn test_access_denial() {
        let policy = ApiPolicy::from_config(&Config::new())
            .unwrap()
            .with_access(Box::new(DenyAll));

        let err = policy.check_send("A.B").unwrap_err();
        assert_eq!(err.code, StatusCode::PublishNotAuthorized);
        assert_eq!(err.reason, "Publishing to subject 'A.B' is not authorized");

        let err = policy.check_subscribe("A.>").unwrap_err();
        assert_eq!(err.code, StatusCode::SubscribeNotAuthorized);
    }

    #[test]
    fn test_tampered_payload_fails_signature_check() {
        let policy = policy(&["sec-signer=SHA256"]);
        let mut packaged = policy.package(&sample_message()).unwrap().to_vec();
        let last = packaged.len() - 1;
        packaged[last] ^= 0xFF;

        let err = policy.unpackage(Bytes::from(packaged)).unwrap_err();
        assert_eq!(err.class, StatusClass::Policy);
        assert_eq!(err.code, StatusCode::InvalidSignature);
    }

    #[test]
    fn test_unsigned_message_rejected_when_signer_configured() {
        let sender = policy(&[]);
        let receiver = policy(&["sec-signer=SHA256"]);

        let packaged = sender.package(&sample_message()).unwrap();
        let err = receiver.unpackage(packaged).unwrap_err();
        assert_eq!(err.code, StatusCode::InvalidSignature);
    }

    #[test]
    fn test_encrypted_message_needs_cipher() {
        let sender = policy(&["sec-cipher-delta=13"]);
        let receiver = policy(&[]);

        let packaged = sender.package(&sample_message()).unwrap();
        let err = receiver.unpackage(packaged).unwrap_err();
        assert_eq!(err.class, StatusClass::Policy);
        assert_eq!(err.code, StatusCode::EncodingError);
    }

    #[test]
    fn test_compression_shrinks_repetitive_payload() {
        let mut msg = Message::new("A.B", MessageKind::Publish).unwrap();
        msg.add_field(
            Field::new("DATA", FieldValue::String("abc".repeat(500))).unwrap(),
        );

        let plain = policy(&[]).package(&msg).unwrap();
        let compressed = policy(&["pol-compress=true"]).package(&msg).unwrap();
        assert!(compressed.len() < plain.len());
    }

    #[rstest]
    #[case::bad_delta("sec-cipher-delta=0")]
    #[case::non_numeric_delta("sec-cipher-delta=xyz")]
    #[case::unknown_signer("sec-signer=MD5")]
    fn test_invalid_sub_policy_config(#[case] arg: &str) {
        let err = from_config(&Config::from_args([arg])).unwrap_err();
        assert_eq!(err.class, StatusClass::Policy);
        assert_eq!(err.code, StatusCode::InvalidConfig);
    }

    #[test]
    fn test_wire_meta_round_trip() {
        let mut meta = WireMeta::new();
        meta.set(META_COMPRESS, "1");
        meta.set(META_SIGNATURE, "abc123");

        let mut buf = BytesMut::new();
        meta.put(&mut buf);
        buf.extend_from_slice(b"payload");

        let mut data = buf.freeze();
        let read = WireMeta::try_read(&mut data).unwrap();
        assert_eq!(read, meta);
        assert_eq!(&data[..], b"payload");
    }
}
