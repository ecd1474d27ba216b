use std::collections::BTreeMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::status::{GmsecResult, Status, StatusClass, StatusCode};

/// Canonical configuration key strings understood by the core.
pub mod keys {
    pub const MW_ID: &str = "mw-id";
    pub const MW_SERVER: &str = "mw-server";

    pub const SPECIFICATION_VERSION: &str = "GMSEC-SPECIFICATION-VERSION";
    pub const SCHEMA_LEVEL: &str = "GMSEC-SCHEMA-LEVEL";
    pub const SCHEMA_PATH: &str = "GMSEC-SCHEMA-PATH";

    /// Synonymous with [`MSG_CONTENT_VALIDATE_SEND`].
    pub const MSG_CONTENT_VALIDATE: &str = "GMSEC-MSG-CONTENT-VALIDATE";
    pub const MSG_CONTENT_VALIDATE_ALL: &str = "GMSEC-MSG-CONTENT-VALIDATE-ALL";
    pub const MSG_CONTENT_VALIDATE_SEND: &str = "GMSEC-MSG-CONTENT-VALIDATE-SEND";
    pub const MSG_CONTENT_VALIDATE_RECV: &str = "GMSEC-MSG-CONTENT-VALIDATE-RECV";
    pub const VALIDATION_LEVEL: &str = "GMSEC-VALIDATION-LEVEL";

    pub const MSG_FLD_STORAGE_TYPE: &str = "GMSEC-MSGFLD-STORE-TYPE";
    pub const MSG_FLD_STORAGE_SIZE: &str = "GMSEC-MSGFLD-STORE-SIZE";
    pub const SORT_MSG_FIELDS: &str = "GMSEC-SORT-MSG-FIELDS";

    pub const ENCODE_XML: &str = "GMSEC-ENCODE-XML";
    pub const ENCODE_JSON: &str = "GMSEC-ENCODE-JSON";
    /// Legacy alias for [`ENCODE_XML`].
    pub const LEGACY_ENCODE_XML: &str = "SEC-ENCODE-XML";
    pub const POL_COMPRESS: &str = "POL-COMPRESS";

    pub const SEC_POLICY: &str = "SEC-POLICY";
    pub const SEC_AUTH: &str = "SEC-AUTH";
    pub const SEC_CIPHER: &str = "SEC-CIPHER";
    pub const SEC_CIPHER_DELTA: &str = "SEC-CIPHER-DELTA";
    pub const SEC_SIGNER: &str = "SEC-SIGNER";
    pub const VALIDATE_SUBJECT: &str = "SEC-VAL-SUB";
    pub const VALIDATE_SUBJECT_LENIENT: &str = "SEC-VAL-SUB-LENIENT";

    pub const REQ_RESP_BEHAVIOR: &str = "GMSEC-REQ-RESP";
    pub const MULTI_RESP: &str = "MW-MULTI-RESP";
    pub const REPUBLISH_MS: &str = "MW-REPUBLISH-MS";
    pub const ASYNC_PUBLISH: &str = "GMSEC-ASYNC-PUBLISH";

    pub const TRACKING: &str = "TRACKING";
    pub const TRACKING_NODE: &str = "TRACKING-NODE";
    pub const TRACKING_PROCESS_ID: &str = "TRACKING-PROCESS-ID";
    pub const TRACKING_USER_NAME: &str = "TRACKING-USER-NAME";
    pub const TRACKING_CONNECTION_ID: &str = "TRACKING-CONNECTION-ID";
    pub const TRACKING_PUBLISH_TIME: &str = "TRACKING-PUBLISH-TIME";
    pub const TRACKING_UNIQUE_ID: &str = "TRACKING-UNIQUE-ID";
    pub const TRACKING_MW_INFO: &str = "TRACKING-MW-INFO";
    pub const REMOVE_TRACKING_FIELDS: &str = "GMSEC-REMOVE-TRACKING-FIELDS";
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct Entry {
    name: String,
    value: String,
}

/// String key/value configuration attached to connections, messages and
/// generators. Key lookup is case-insensitive; iteration order is
/// deterministic (sorted by lowercased key).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Config {
    entries: BTreeMap<String, Entry>,
}

impl Config {
    pub fn new() -> Config {
        Config::default()
    }

    /// Builds a config from `key=value` tokens, e.g. command line arguments.
    /// Tokens without a `=` are ignored.
    pub fn from_args<I, S>(args: I) -> Config
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Config::new();
        for arg in args {
            if let Some((key, value)) = arg.as_ref().split_once('=') {
                if !key.is_empty() {
                    let _ = config.add_value(key, value);
                }
            }
        }
        config
    }

    /// Parses `<CONFIG><PARAMETER NAME="…">value</PARAMETER>…</CONFIG>`.
    pub fn from_xml(xml: &str) -> GmsecResult<Config> {
        let parse_err = |detail: String| {
            Status::new(
                StatusClass::Config,
                StatusCode::XmlParseError,
                format!("invalid config XML: {}", detail),
            )
        };

        let mut reader = Reader::from_str(xml);
        let mut config = Config::new();
        let mut seen_root = false;
        let mut param_name: Option<String> = None;
        let mut param_value = String::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => match e.name().as_ref() {
                    b"CONFIG" => seen_root = true,
                    b"PARAMETER" if seen_root => {
                        let name = e
                            .try_get_attribute("NAME")
                            .map_err(|e| parse_err(e.to_string()))?
                            .ok_or_else(|| parse_err("PARAMETER is missing NAME".to_string()))?;
                        let name = name
                            .unescape_value()
                            .map_err(|e| parse_err(e.to_string()))?;
                        param_name = Some(name.into_owned());
                        param_value.clear();
                    }
                    _ => {}
                },
                Ok(Event::Empty(e)) if e.name().as_ref() == b"PARAMETER" && seen_root => {
                    let name = e
                        .try_get_attribute("NAME")
                        .map_err(|e| parse_err(e.to_string()))?
                        .ok_or_else(|| parse_err("PARAMETER is missing NAME".to_string()))?;
                    let name = name
                        .unescape_value()
                        .map_err(|e| parse_err(e.to_string()))?;
                    config.add_value(&name, "")?;
                }
                Ok(Event::Text(t)) if param_name.is_some() => {
                    param_value.push_str(&t.unescape().map_err(|e| parse_err(e.to_string()))?);
                }
                Ok(Event::End(e)) if e.name().as_ref() == b"PARAMETER" => {
                    if let Some(name) = param_name.take() {
                        config.add_value(&name, param_value.trim())?;
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(parse_err(e.to_string())),
                _ => {}
            }
        }

        if !seen_root {
            return Err(parse_err("missing CONFIG root element".to_string()));
        }
        Ok(config)
    }

    pub fn add_value(&mut self, key: &str, value: impl Into<String>) -> GmsecResult<()> {
        if key.is_empty() {
            return Err(Status::new(
                StatusClass::Config,
                StatusCode::InvalidConfigName,
                "Config entry name cannot be an empty string",
            ));
        }
        self.entries.insert(
            key.to_lowercase(),
            Entry {
                name: key.to_string(),
                value: value.into(),
            },
        );
        Ok(())
    }

    pub fn clear_value(&mut self, key: &str) -> bool {
        self.entries.remove(&key.to_lowercase()).is_some()
    }

    pub fn get_value(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_lowercase())
            .map(|e| e.value.as_str())
    }

    /// Boolean lookup accepting `true`/`false`/`1`/`0` (case-insensitive);
    /// anything else, including an absent key, yields `default`.
    pub fn get_bool_value(&self, key: &str, default: bool) -> bool {
        match self.get_value(key) {
            Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => true,
            Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => false,
            _ => default,
        }
    }

    pub fn get_int_value(&self, key: &str, default: i64) -> i64 {
        self.get_value(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Copies `other`'s entries into `self`. Existing keys are replaced only
    /// when `overwrite` is set.
    pub fn merge(&mut self, other: &Config, overwrite: bool) {
        for (key, value) in other.entries() {
            if overwrite || self.get_value(key).is_none() {
                let _ = self.add_value(key, value);
            }
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|e| (e.name.as_str(), e.value.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let mut config = Config::new();
        config.add_value(keys::SCHEMA_LEVEL, "2").unwrap();
        assert_eq!(config.get_value("gmsec-schema-level"), Some("2"));
        assert_eq!(config.get_value("GMSEC-SCHEMA-LEVEL"), Some("2"));
        assert_eq!(config.get_value("no-such-key"), None);
    }

    #[test]
    fn test_empty_key_rejected() {
        let mut config = Config::new();
        let err = config.add_value("", "x").unwrap_err();
        assert_eq!(err.class, StatusClass::Config);
        assert_eq!(err.code, StatusCode::InvalidConfigName);
    }

    #[rstest]
    #[case::plain_true("true", false, true)]
    #[case::upper_true("TRUE", false, true)]
    #[case::numeric_true("1", false, true)]
    #[case::plain_false("false", true, false)]
    #[case::numeric_false("0", true, false)]
    #[case::garbage_falls_back("maybe", true, true)]
    fn test_get_bool_value(#[case] raw: &str, #[case] default: bool, #[case] expected: bool) {
        let mut config = Config::new();
        config.add_value("flag", raw).unwrap();
        assert_eq!(config.get_bool_value("flag", default), expected);
    }

    #[test]
    fn test_get_bool_value_missing_key() {
        let config = Config::new();
        assert!(config.get_bool_value("flag", true));
        assert!(!config.get_bool_value("flag", false));
    }

    #[test]
    fn test_get_int_value() {
        let mut config = Config::new();
        config.add_value("size", " 42 ").unwrap();
        config.add_value("bad", "forty-two").unwrap();
        assert_eq!(config.get_int_value("size", 7), 42);
        assert_eq!(config.get_int_value("bad", 7), 7);
        assert_eq!(config.get_int_value("absent", 7), 7);
    }

    #[test]
    fn test_from_args() {
        let config = Config::from_args(["mw-id=loopback", "loglevel", "GMSEC-SCHEMA-LEVEL=1"]);
        assert_eq!(config.get_value(keys::MW_ID), Some("loopback"));
        assert_eq!(config.get_value(keys::SCHEMA_LEVEL), Some("1"));
        assert_eq!(config.get_value("loglevel"), None);
    }

    #[test]
    fn test_from_xml() {
        let xml = r#"
            <CONFIG>
                <PARAMETER NAME="mw-id">loopback</PARAMETER>
                <PARAMETER NAME="GMSEC-MSG-CONTENT-VALIDATE-SEND">true</PARAMETER>
                <PARAMETER NAME="empty"/>
            </CONFIG>"#;
        let config = Config::from_xml(xml).unwrap();
        assert_eq!(config.get_value("mw-id"), Some("loopback"));
        assert!(config.get_bool_value(keys::MSG_CONTENT_VALIDATE_SEND, false));
        assert_eq!(config.get_value("empty"), Some(""));
    }

    #[test]
    fn test_from_xml_rejects_malformed() {
        assert!(Config::from_xml("<PARAMETER NAME=\"x\">1</PARAMETER>").is_err());
        assert!(Config::from_xml("not xml at all <<<").is_err());
    }

    #[test]
    fn test_merge() {
        let mut base = Config::from_args(["a=1", "b=2"]);
        let overlay = Config::from_args(["b=3", "c=4"]);
        let mut no_overwrite = base.clone();
        no_overwrite.merge(&overlay, false);
        assert_eq!(no_overwrite.get_value("b"), Some("2"));
        assert_eq!(no_overwrite.get_value("c"), Some("4"));

        base.merge(&overlay, true);
        assert_eq!(base.get_value("b"), Some("3"));
    }
}
