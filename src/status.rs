use std::fmt::{Display, Formatter};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

/// Broad category of a failure. The numeric identities are kept stable so
/// that statuses can be compared / logged across process boundaries.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum StatusClass {
    NoError = 0,
    Factory = 1,
    Connection = 2,
    Config = 3,
    Middleware = 4,
    Msg = 5,
    Field = 6,
    Callback = 7,
    CallbackLookup = 8,
    ConfigFile = 9,
    Iterator = 10,
    Policy = 11,
    Dispatcher = 12,
    Specification = 13,
    HeartbeatGenerator = 14,
    ResourceGenerator = 15,
    Custom = 49,
    Other = 50,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum StatusCode {
    InvalidConnectionType = 1,
    InvalidConnection = 3,
    FeatureNotSupported = 4,
    InvalidConfigValue = 5,
    InvalidMessage = 7,
    UnknownMsgType = 8,
    FieldTypeMismatch = 10,
    UnknownFieldType = 11,
    InvalidFieldName = 15,
    InvalidFieldValue = 16,
    InvalidConfigName = 17,
    InvalidSubjectName = 18,
    NoMessageAvailable = 19,
    TimeoutOccurred = 20,
    TrackingFailure = 21,
    InvalidField = 23,
    XmlParseError = 24,
    InvalidConfig = 25,
    EncodingError = 26,
    InvalidNext = 28,
    InitializationError = 29,
    UserAccessInvalid = 30,
    PublishNotAuthorized = 31,
    SubscribeNotAuthorized = 32,
    BadMessageFormat = 33,
    InvalidSignature = 34,
    UninitializedObject = 35,
    ConnectionLost = 39,
    JsonParseError = 42,
    OtherError = 50,
    TemplateDirNotFound = 100,
    TemplateDirError = 101,
    TemplateIdDoesNotExist = 102,
    SchemaFailedToParse = 103,
    MsgLookupFailure = 104,
    IndexOutOfRange = 105,
    MissingRequiredField = 106,
    IncorrectFieldType = 107,
    FieldFailedValidation = 108,
    NonAllowedField = 109,
    MessageFailedValidation = 110,
    ValueOutOfRange = 111,
    ResourceInfoSamplingError = 112,
}

impl Display for StatusClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}

impl Display for StatusCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}

/// The error type for every fallible operation in this crate: a status class,
/// a specific code within it, and a human-readable reason.
///
/// Rendered as `[class,code]: reason`, e.g. `[2,20]: request timed out`.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("[{class},{code}]: {reason}")]
pub struct Status {
    pub class: StatusClass,
    pub code: StatusCode,
    pub reason: String,
}

impl Status {
    pub fn new(class: StatusClass, code: StatusCode, reason: impl Into<String>) -> Status {
        Status {
            class,
            code,
            reason: reason.into(),
        }
    }
}

pub type GmsecResult<T> = Result<T, Status>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_display() {
        let status = Status::new(
            StatusClass::Connection,
            StatusCode::TimeoutOccurred,
            "request timed out",
        );
        assert_eq!(status.to_string(), "[2,20]: request timed out");
    }

    #[test]
    fn test_numeric_identity() {
        assert_eq!(u16::from(StatusClass::Specification), 13);
        assert_eq!(u16::from(StatusCode::MissingRequiredField), 106);
        assert_eq!(
            StatusCode::try_from(20u16).unwrap(),
            StatusCode::TimeoutOccurred
        );
        assert!(StatusClass::try_from(17u16).is_err());
    }
}
