mod field_store;

use std::sync::OnceLock;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::json;

use crate::config::{keys, Config};
use crate::field::{Field, FieldType, FieldValue};
use crate::message::field_store::{FieldStore, StoreType, DEFAULT_ROLLOVER_LIMIT};
use crate::status::{GmsecResult, Status, StatusClass, StatusCode};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum MessageKind {
    Publish = 1,
    Request = 2,
    Reply = 3,
}

impl MessageKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            MessageKind::Publish => "PUBLISH",
            MessageKind::Request => "REQUEST",
            MessageKind::Reply => "REPLY",
        }
    }

    pub fn from_kind_name(name: &str) -> GmsecResult<MessageKind> {
        match name.to_uppercase().as_str() {
            "PUBLISH" => Ok(MessageKind::Publish),
            "REQUEST" => Ok(MessageKind::Request),
            "REPLY" => Ok(MessageKind::Reply),
            _ => Err(Status::new(
                StatusClass::Msg,
                StatusCode::UnknownMsgType,
                format!("Unknown message kind: {}", name),
            )),
        }
    }
}

/// A bus message: subject, kind, attached config and a set of uniquely named
/// fields.
///
/// Field storage starts as an ordered tree map and rolls over to a hash map
/// once the configured limit (default 50) is exceeded; see
/// `GMSEC-MSGFLD-STORE-TYPE` / `GMSEC-MSGFLD-STORE-SIZE`. Storage selection
/// keys take effect only at construction. XML/JSON renderings are cached and
/// recomputed after any mutation.
#[derive(Debug)]
pub struct Message {
    subject: String,
    kind: MessageKind,
    config: Config,
    store: FieldStore,
    sort_fields: bool,
    xml_cache: OnceLock<String>,
    json_cache: OnceLock<String>,
}

impl Clone for Message {
    fn clone(&self) -> Message {
        Message {
            subject: self.subject.clone(),
            kind: self.kind,
            config: self.config.clone(),
            store: self.store.clone(),
            sort_fields: self.sort_fields,
            xml_cache: OnceLock::new(),
            json_cache: OnceLock::new(),
        }
    }
}

/// Subject, kind and field set; attached config does not participate.
impl PartialEq for Message {
    fn eq(&self, other: &Message) -> bool {
        self.subject == other.subject
            && self.kind == other.kind
            && self.store.len() == other.store.len()
            && self
                .fields()
                .all(|f| other.get_field(f.name()) == Some(f))
    }
}

impl Message {
    pub fn new(subject: impl Into<String>, kind: MessageKind) -> GmsecResult<Message> {
        Message::with_config(subject, kind, Config::new())
    }

    pub fn with_config(
        subject: impl Into<String>,
        kind: MessageKind,
        config: Config,
    ) -> GmsecResult<Message> {
        let subject = subject.into();
        if subject.is_empty() {
            return Err(Status::new(
                StatusClass::Msg,
                StatusCode::InvalidSubjectName,
                "Subject cannot be an empty string",
            ));
        }

        let store_type = match config.get_value(keys::MSG_FLD_STORAGE_TYPE) {
            None => StoreType::Tree,
            Some(v) if v.eq_ignore_ascii_case("tree") => StoreType::Tree,
            Some(v) if v.eq_ignore_ascii_case("hash") => StoreType::Hash,
            Some(v) => {
                return Err(Status::new(
                    StatusClass::Config,
                    StatusCode::InvalidConfigValue,
                    format!(
                        "'{}' is not a valid value for {}; expected 'tree' or 'hash'",
                        v,
                        keys::MSG_FLD_STORAGE_TYPE
                    ),
                ))
            }
        };

        let rollover_limit = match config.get_value(keys::MSG_FLD_STORAGE_SIZE) {
            None => DEFAULT_ROLLOVER_LIMIT,
            Some(v) => v.trim().parse().map_err(|_| {
                Status::new(
                    StatusClass::Config,
                    StatusCode::InvalidConfigValue,
                    format!(
                        "'{}' is not a valid value for {}; expected a field count",
                        v,
                        keys::MSG_FLD_STORAGE_SIZE
                    ),
                )
            })?,
        };

        let sort_fields = config.get_bool_value(keys::SORT_MSG_FIELDS, false);

        Ok(Message {
            subject,
            kind,
            config,
            store: FieldStore::new(store_type, rollover_limit),
            sort_fields,
            xml_cache: OnceLock::new(),
            json_cache: OnceLock::new(),
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn set_subject(&mut self, subject: impl Into<String>) -> GmsecResult<()> {
        let subject = subject.into();
        if subject.is_empty() {
            return Err(Status::new(
                StatusClass::Msg,
                StatusCode::InvalidSubjectName,
                "Subject cannot be an empty string",
            ));
        }
        self.subject = subject;
        self.touch();
        Ok(())
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Merges `config` into the message's config (overwriting existing keys)
    /// and re-reads the serialization options it carries.
    pub fn add_config(&mut self, config: &Config) {
        self.config.merge(config, true);
        self.sort_fields = self.config.get_bool_value(keys::SORT_MSG_FIELDS, false);
        self.touch();
    }

    /// Adds a field, returning whether a field of the same name was replaced.
    pub fn add_field(&mut self, field: Field) -> bool {
        self.touch();
        self.store.add(field)
    }

    pub fn add_fields(&mut self, fields: impl IntoIterator<Item = Field>) {
        for field in fields {
            self.add_field(field);
        }
    }

    /// Removes the named field; false (and no change) if it was not present.
    pub fn clear_field(&mut self, name: &str) -> bool {
        self.touch();
        self.store.remove(name)
    }

    pub fn clear_fields(&mut self) {
        self.touch();
        self.store.clear();
    }

    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.store.get(name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.store.get(name).is_some()
    }

    pub fn field_count(&self) -> usize {
        self.store.len()
    }

    /// Iterates the backing store: deterministic (name) order before
    /// rollover, arbitrary order after.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.store.iter()
    }

    pub(crate) fn require_field(&self, name: &str) -> GmsecResult<&Field> {
        self.get_field(name).ok_or_else(|| {
            Status::new(
                StatusClass::Msg,
                StatusCode::InvalidField,
                format!("Message does not contain field with name: {}", name),
            )
        })
    }

    pub fn get_string_value(&self, name: &str) -> GmsecResult<String> {
        Ok(self.require_field(name)?.get_string_value())
    }

    pub fn get_bool_value(&self, name: &str) -> GmsecResult<bool> {
        self.require_field(name)?.get_bool_value()
    }

    pub fn get_i32_value(&self, name: &str) -> GmsecResult<i32> {
        self.require_field(name)?.get_i32_value()
    }

    pub fn get_i64_value(&self, name: &str) -> GmsecResult<i64> {
        self.require_field(name)?.get_i64_value()
    }

    pub fn get_u64_value(&self, name: &str) -> GmsecResult<u64> {
        self.require_field(name)?.get_u64_value()
    }

    pub fn get_f64_value(&self, name: &str) -> GmsecResult<f64> {
        self.require_field(name)?.get_f64_value()
    }

    /// Best-effort size of the binary wire form, in bytes.
    pub fn get_size(&self) -> usize {
        crate::policy::encode::encode_message(self).len()
    }

    pub fn to_xml(&self) -> &str {
        self.xml_cache.get_or_init(|| self.render_xml())
    }

    pub fn to_json(&self) -> &str {
        self.json_cache.get_or_init(|| self.render_json())
    }

    fn display_fields(&self) -> Vec<&Field> {
        self.store.display_fields(self.sort_fields)
    }

    fn render_xml(&self) -> String {
        let mut xml = format!(
            "<MESSAGE SUBJECT=\"{}\" KIND=\"{}\">\n",
            escape(&self.subject),
            self.kind.kind_name()
        );
        for field in self.display_fields() {
            xml.push('\t');
            xml.push_str(&field.to_xml());
            xml.push('\n');
        }
        xml.push_str("</MESSAGE>");
        xml
    }

    fn render_json(&self) -> String {
        let fields: Vec<serde_json::Value> = self
            .display_fields()
            .iter()
            .map(|f| f.to_json_value())
            .collect();
        json!({
            "MESSAGE": {
                "SUBJECT": self.subject,
                "KIND": self.kind.kind_name(),
                "FIELD": fields,
            }
        })
        .to_string()
    }

    pub fn from_xml(xml: &str) -> GmsecResult<Message> {
        let parse_err = |detail: String| {
            Status::new(
                StatusClass::Msg,
                StatusCode::XmlParseError,
                format!("invalid message XML: {}", detail),
            )
        };

        let get_attr = |e: &quick_xml::events::BytesStart, name: &str| -> GmsecResult<Option<String>> {
            match e.try_get_attribute(name) {
                Ok(Some(a)) => Ok(Some(
                    a.unescape_value()
                        .map_err(|e| parse_err(e.to_string()))?
                        .into_owned(),
                )),
                Ok(None) => Ok(None),
                Err(e) => Err(parse_err(e.to_string())),
            }
        };

        let field_attrs = |e: &quick_xml::events::BytesStart| -> GmsecResult<(String, FieldType, bool)> {
            let name = get_attr(e, "NAME")?
                .ok_or_else(|| parse_err("FIELD is missing NAME".to_string()))?;
            let ftype = get_attr(e, "TYPE")?
                .ok_or_else(|| parse_err("FIELD is missing TYPE".to_string()))?;
            let ftype = FieldType::from_type_name(&ftype).map_err(|e| parse_err(e.reason))?;
            let header = matches!(get_attr(e, "HEAD")?.as_deref(), Some("T"));
            Ok((name, ftype, header))
        };

        let mut reader = Reader::from_str(xml);
        let mut msg: Option<Message> = None;
        let mut pending: Option<(String, FieldType, bool)> = None;
        let mut text = String::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => match e.name().as_ref() {
                    b"MESSAGE" => {
                        let subject = get_attr(&e, "SUBJECT")?
                            .ok_or_else(|| parse_err("MESSAGE is missing SUBJECT".to_string()))?;
                        let kind = get_attr(&e, "KIND")?
                            .ok_or_else(|| parse_err("MESSAGE is missing KIND".to_string()))?;
                        let kind =
                            MessageKind::from_kind_name(&kind).map_err(|e| parse_err(e.reason))?;
                        msg = Some(Message::new(subject, kind).map_err(|e| parse_err(e.reason))?);
                    }
                    b"FIELD" if msg.is_some() => {
                        pending = Some(field_attrs(&e)?);
                        text.clear();
                    }
                    _ => {}
                },
                Ok(Event::Empty(e)) if e.name().as_ref() == b"FIELD" && msg.is_some() => {
                    let (name, ftype, header) = field_attrs(&e)?;
                    let value = FieldValue::parse(ftype, "").map_err(|e| parse_err(e.reason))?;
                    let field = Field::new(name, value).map_err(|e| parse_err(e.reason))?;
                    if let Some(m) = msg.as_mut() {
                        m.add_field(field.with_header(header));
                    }
                }
                Ok(Event::Text(t)) if pending.is_some() => {
                    text.push_str(&t.unescape().map_err(|e| parse_err(e.to_string()))?);
                }
                Ok(Event::End(e)) if e.name().as_ref() == b"FIELD" => {
                    if let Some((name, ftype, header)) = pending.take() {
                        let value = FieldValue::parse(ftype, text.trim())
                            .map_err(|e| parse_err(e.reason))?;
                        let field = Field::new(name, value).map_err(|e| parse_err(e.reason))?;
                        if let Some(m) = msg.as_mut() {
                            m.add_field(field.with_header(header));
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(parse_err(e.to_string())),
                _ => {}
            }
        }

        msg.ok_or_else(|| parse_err("missing MESSAGE root element".to_string()))
    }

    pub fn from_json(text: &str) -> GmsecResult<Message> {
        let parse_err = |detail: String| {
            Status::new(
                StatusClass::Msg,
                StatusCode::JsonParseError,
                format!("invalid message JSON: {}", detail),
            )
        };

        let root: serde_json::Value =
            serde_json::from_str(text).map_err(|e| parse_err(e.to_string()))?;
        let envelope = root
            .get("MESSAGE")
            .ok_or_else(|| parse_err("missing MESSAGE object".to_string()))?;
        let subject = envelope
            .get("SUBJECT")
            .and_then(|v| v.as_str())
            .ok_or_else(|| parse_err("missing SUBJECT".to_string()))?;
        let kind = envelope
            .get("KIND")
            .and_then(|v| v.as_str())
            .ok_or_else(|| parse_err("missing KIND".to_string()))?;
        let kind = MessageKind::from_kind_name(kind)
            .map_err(|e| parse_err(e.reason))?;

        let mut msg = Message::new(subject, kind).map_err(|e| parse_err(e.reason))?;

        if let Some(fields) = envelope.get("FIELD") {
            let fields = fields
                .as_array()
                .ok_or_else(|| parse_err("FIELD must be an array".to_string()))?;
            for entry in fields {
                let name = entry
                    .get("NAME")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| parse_err("field is missing NAME".to_string()))?;
                let ftype = entry
                    .get("TYPE")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| parse_err("field is missing TYPE".to_string()))?;
                let value = entry
                    .get("VALUE")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| parse_err("field is missing VALUE".to_string()))?;
                let header = entry.get("HEAD").and_then(|v| v.as_str()) == Some("T");

                let ftype = FieldType::from_type_name(ftype).map_err(|e| parse_err(e.reason))?;
                let value = FieldValue::parse(ftype, value).map_err(|e| parse_err(e.reason))?;
                let field =
                    Field::new(name, value).map_err(|e| parse_err(e.reason))?;
                msg.add_field(field.with_header(header));
            }
        }

        Ok(msg)
    }

    fn touch(&mut self) {
        self.xml_cache = OnceLock::new();
        self.json_cache = OnceLock::new();
    }
}
