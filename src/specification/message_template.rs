use crate::message::{Message, MessageKind};
use crate::specification::field_template::FieldTemplate;

/// Resolved schema for one message shape: the merged header + body field
/// templates of a schema ID, immutable once loaded.
#[derive(Clone, Debug)]
pub struct MessageTemplate {
    schema_id: String,
    definition: String,
    subject_template: Option<String>,
    fields: Vec<FieldTemplate>,
}

impl MessageTemplate {
    pub fn new(
        schema_id: impl Into<String>,
        definition: impl Into<String>,
        subject_template: Option<String>,
        fields: Vec<FieldTemplate>,
    ) -> MessageTemplate {
        MessageTemplate {
            schema_id: schema_id.into(),
            definition: definition.into(),
            subject_template,
            fields,
        }
    }

    pub fn schema_id(&self) -> &str {
        &self.schema_id
    }

    /// Dot-joined field names whose values identify this schema in a message,
    /// e.g. `MESSAGE-TYPE.MESSAGE-SUBTYPE`.
    pub fn definition(&self) -> &str {
        &self.definition
    }

    pub fn definition_field_names(&self) -> impl Iterator<Item = &str> {
        self.definition.split('.')
    }

    pub fn fields(&self) -> &[FieldTemplate] {
        &self.fields
    }

    /// Message kind implied by the schema ID's leading element.
    pub fn kind(&self) -> MessageKind {
        match self.schema_id.split('.').next() {
            Some("REQ") => MessageKind::Request,
            Some("RESP") => MessageKind::Reply,
            _ => MessageKind::Publish,
        }
    }

    /// Builds the subject for a message instantiated from this template.
    ///
    /// Elements of the subject template that name one of the schema's field
    /// templates resolve to the message's value for that field (uppercased,
    /// `FILL` when absent or empty); all other elements pass through as
    /// literals. Templates without a subject get a `GMSEC.FILL.FILL.` prefix
    /// in front of the schema ID.
    pub fn resolve_subject(&self, msg: &Message) -> String {
        let template = match &self.subject_template {
            Some(t) => t,
            None => return format!("GMSEC.FILL.FILL.{}", self.schema_id),
        };

        let mut elements = Vec::new();
        for element in template.split('.') {
            if self.fields.iter().any(|t| t.name == element) {
                let value = msg
                    .get_string_value(element)
                    .unwrap_or_default()
                    .to_uppercase();
                if value.is_empty() {
                    elements.push("FILL".to_string());
                } else {
                    elements.push(value);
                }
            } else {
                elements.push(element.to_string());
            }
        }
        elements.join(".")
    }
}
