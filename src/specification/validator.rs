use rustc_hash::FxHashSet;

use crate::message::Message;
use crate::specification::field_template::{FieldClass, FieldTemplate, Mode, TemplateKind};
use crate::specification::message_template::MessageTemplate;
use crate::status::{GmsecResult, Status, StatusClass, StatusCode};

/// Field names the API reserves for its own tracking metadata; user-supplied
/// fields with these names are rejected on the send path.
const RESERVED_TRACKING_FIELDS: &[&str] = &[
    "CONNECTION-ID",
    "CONNECTION-ENDPOINT",
    "MW-INFO",
    "NODE",
    "NUM-OF-SUBSCRIPTIONS",
    "PROCESS-ID",
    "PUBLISH-TIME",
    "UNIQUE-ID",
    "USER-NAME",
];

pub fn is_reserved_tracking_name(name: &str) -> bool {
    RESERVED_TRACKING_FIELDS.contains(&name)
        || (name.starts_with("SUBSCRIPTION.") && name.ends_with(".SUBJECT-PATTERN"))
}

/// Names the API itself stashes in messages, e.g. `__GMSEC-SCHEMA-ID__` and
/// `__GMSEC-REPLY-UNIQUE-ID__`. They are never user-defined fields.
fn is_reserved_api_name(name: &str) -> bool {
    name.starts_with("__GMSEC") && name.ends_with("__")
}

pub fn check_reserved_tracking_fields(msg: &Message) -> GmsecResult<()> {
    for field in msg.fields() {
        if !field.is_tracking() && is_reserved_tracking_name(field.name()) {
            return Err(Status::new(
                StatusClass::Msg,
                StatusCode::NonAllowedField,
                format!("{} is a reserved tracking field for the GMSEC API", field.name()),
            ));
        }
    }
    Ok(())
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidationEntry {
    pub field: String,
    pub code: StatusCode,
    pub description: String,
}

/// Aggregated result of one validation pass. Validation never fails fast: a
/// single pass reports every discrepancy it finds, in discovery order.
#[derive(Clone, Debug, Default)]
pub struct ValidationReport {
    entries: Vec<ValidationEntry>,
}

impl ValidationReport {
    pub(crate) fn new() -> ValidationReport {
        ValidationReport::default()
    }

    fn push(&mut self, field: &str, code: StatusCode, description: String) {
        self.entries.push(ValidationEntry {
            field: field.to_string(),
            code,
            description,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[ValidationEntry] {
        &self.entries
    }

    pub fn into_status(self, subject: &str) -> Status {
        let details = self
            .entries
            .iter()
            .map(|e| e.description.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        Status::new(
            StatusClass::Msg,
            StatusCode::MessageFailedValidation,
            format!(
                "Message validation failed for subject {} [{} error(s)]: {}",
                subject,
                self.entries.len(),
                details
            ),
        )
    }
}

/// One full compliance pass of `msg` against `template`.
///
/// `validation_level`: 3 (default) = all checks; 2 = skip the
/// extraneous-field check; 1 = additionally skip value/pattern checks on
/// OPTIONAL fields.
pub(super) fn check_compliance(
    template: &MessageTemplate,
    msg: &Message,
    validation_level: u8,
) -> ValidationReport {
    let mut report = ValidationReport::new();

    let mut expanded: Vec<FieldTemplate> = Vec::new();
    for t in template.fields() {
        expand_into(t, msg, &mut expanded, &mut report);
    }

    let mut known: FxHashSet<&str> = FxHashSet::default();
    for t in &expanded {
        known.insert(t.name.as_str());
        let resolved = t.resolved_for(msg);
        check_template(&resolved, msg, validation_level, &mut report);
    }

    if validation_level >= 3 {
        for field in msg.fields() {
            if field.is_tracking()
                || is_reserved_api_name(field.name())
                || known.contains(field.name())
            {
                continue;
            }
            report.push(
                field.name(),
                StatusCode::NonAllowedField,
                format!("Message contains user-defined field {}", field.name()),
            );
        }
    }

    report
}

/// Flattens array/container templates into concrete per-index templates,
/// driven by the message's own count field. The count field is read from the
/// message because the array size is a per-message property.
fn expand_into(
    t: &FieldTemplate,
    msg: &Message,
    out: &mut Vec<FieldTemplate>,
    report: &mut ValidationReport,
) {
    let (prefix, size_field, children) = match &t.kind {
        TemplateKind::Array {
            prefix,
            size_field,
            children,
        } => (prefix, size_field, children),
        _ => {
            out.push(t.clone());
            return;
        }
    };

    let size = match msg.get_i64_value(size_field) {
        Ok(n) if n >= 0 => n as usize,
        _ => {
            if t.mode != Mode::Optional {
                report.push(
                    &t.name,
                    StatusCode::MissingRequiredField,
                    format!("{} is an array of fields whose size is undefined", t.name),
                );
            }
            return;
        }
    };

    for i in 1..=size {
        for child in children {
            let mut child = child.clone();
            child.name = format!("{}.{}.{}", prefix, i, child.name);
            if let TemplateKind::Array {
                prefix: child_prefix,
                size_field: child_size,
                ..
            } = &mut child.kind
            {
                *child_prefix = format!("{}.{}.{}", prefix, i, child_prefix);
                *child_size = format!("{}.{}.{}", prefix, i, child_size);
            }
            expand_into(&child, msg, out, report);
        }
    }
}

fn check_template(t: &FieldTemplate, msg: &Message, level: u8, report: &mut ValidationReport) {
    if t.mode == Mode::Control || matches!(t.kind, TemplateKind::Array { .. }) {
        return;
    }

    let field = match msg.get_field(&t.name) {
        Some(f) => f,
        None => {
            if t.mode == Mode::Required {
                report.push(
                    &t.name,
                    StatusCode::MissingRequiredField,
                    format!("{} is a required field, but is missing from message", t.name),
                );
            }
            return;
        }
    };

    if let TemplateKind::Simple { types } = &t.kind {
        if !types.contains(&field.field_type()) {
            let valid = types
                .iter()
                .map(|ty| ty.type_name())
                .collect::<Vec<_>>()
                .join(", ");
            report.push(
                &t.name,
                StatusCode::IncorrectFieldType,
                format!(
                    "{} has incorrect field type of {}. Valid type(s): {}",
                    t.name,
                    field.field_type().type_name(),
                    valid
                ),
            );
            return;
        }
    }

    let skip_value_checks = level <= 1 && t.mode == Mode::Optional;
    if !skip_value_checks {
        let text = field.get_string_value();
        if !t.values.permits(field) {
            report.push(
                &t.name,
                StatusCode::FieldFailedValidation,
                format!("{} has illegal value '{}'", t.name, text),
            );
        }
        if !t.pattern.permits(&text) {
            report.push(
                &t.name,
                StatusCode::FieldFailedValidation,
                format!(
                    "{} has illegal value '{}'; expected {}",
                    t.name,
                    text,
                    t.pattern.describe()
                ),
            );
        }
    }

    if t.class == FieldClass::Header && !field.is_header() {
        report.push(
            &t.name,
            StatusCode::FieldFailedValidation,
            format!("{} is not identified as a header field", t.name),
        );
    }
}

#[cfg(test)]
mod test {
    use crate::field::{Field, FieldType, FieldValue};
    use crate::message::MessageKind;
    use crate::specification::field_template::{PatternConstraint, ValueConstraint};
    use crate::specification::SCHEMA_ID_FIELD;

    use super::*;

    fn hb_template() -> MessageTemplate {
        let mut pub_rate = FieldTemplate::simple(
            "PUB-RATE",
            Mode::Required,
            FieldClass::Standard,
            vec![FieldType::U16, FieldType::U32],
        );
        pub_rate.values = ValueConstraint::parse("1..3600").unwrap();

        let mut mission = FieldTemplate::simple(
            "MISSION-ID",
            Mode::Required,
            FieldClass::Header,
            vec![FieldType::String],
        );
        mission.pattern = PatternConstraint::HeaderString;

        MessageTemplate::new(
            "MSG.HB",
            "MESSAGE-TYPE.MESSAGE-SUBTYPE",
            None,
            vec![mission, pub_rate],
        )
    }

    fn compliant_hb() -> Message {
        let mut msg = Message::new("GMSEC.MSSN.SAT1.MSG.HB.APP", MessageKind::Publish).unwrap();
        msg.add_field(
            Field::new("MISSION-ID", FieldValue::String("MSSN".to_string()))
                .unwrap()
                .with_header(true),
        );
        msg.add_field(Field::new("PUB-RATE", FieldValue::U16(30)).unwrap());
        msg
    }

    #[test]
    fn test_compliant_message_passes() {
        let report = check_compliance(&hb_template(), &compliant_hb(), 3);
        assert!(report.is_empty(), "unexpected entries: {:?}", report.entries());
    }

    #[test]
    fn test_missing_required_field() {
        let mut msg = compliant_hb();
        msg.clear_field("PUB-RATE");

        let report = check_compliance(&hb_template(), &msg, 3);
        assert_eq!(report.len(), 1);
        let entry = &report.entries()[0];
        assert_eq!(entry.field, "PUB-RATE");
        assert_eq!(entry.code, StatusCode::MissingRequiredField);
        assert_eq!(
            entry.description,
            "PUB-RATE is a required field, but is missing from message"
        );
    }

    #[test]
    fn test_incorrect_field_type() {
        let mut msg = compliant_hb();
        msg.add_field(Field::new("PUB-RATE", FieldValue::String("30".to_string())).unwrap());

        let report = check_compliance(&hb_template(), &msg, 3);
        assert_eq!(report.len(), 1);
        let entry = &report.entries()[0];
        assert_eq!(entry.code, StatusCode::IncorrectFieldType);
        assert_eq!(
            entry.description,
            "PUB-RATE has incorrect field type of STRING. Valid type(s): U16, U32"
        );
    }

    #[test]
    fn test_value_out_of_allowed_range() {
        let mut msg = compliant_hb();
        msg.add_field(Field::new("PUB-RATE", FieldValue::U16(0)).unwrap());

        let report = check_compliance(&hb_template(), &msg, 3);
        assert_eq!(report.len(), 1);
        assert_eq!(report.entries()[0].code, StatusCode::FieldFailedValidation);
        assert_eq!(
            report.entries()[0].description,
            "PUB-RATE has illegal value '0'"
        );
    }

    #[test]
    fn test_pattern_sentinel_failure() {
        let mut msg = compliant_hb();
        msg.add_field(
            Field::new("MISSION-ID", FieldValue::String("lower case".to_string()))
                .unwrap()
                .with_header(true),
        );

        let report = check_compliance(&hb_template(), &msg, 3);
        assert_eq!(report.len(), 1);
        assert!(report.entries()[0]
            .description
            .contains("expected a header string"));
    }

    #[test]
    fn test_header_flag_mismatch() {
        let mut msg = compliant_hb();
        // same value, header flag not set
        msg.add_field(Field::new("MISSION-ID", FieldValue::String("MSSN".to_string())).unwrap());

        let report = check_compliance(&hb_template(), &msg, 3);
        assert_eq!(report.len(), 1);
        assert_eq!(
            report.entries()[0].description,
            "MISSION-ID is not identified as a header field"
        );
    }

    #[test]
    fn test_extraneous_field_gated_by_level() {
        let mut msg = compliant_hb();
        msg.add_field(Field::new("MY-EXTRA", FieldValue::I32(1)).unwrap());

        let report = check_compliance(&hb_template(), &msg, 3);
        assert_eq!(report.len(), 1);
        assert_eq!(report.entries()[0].code, StatusCode::NonAllowedField);
        assert_eq!(
            report.entries()[0].description,
            "Message contains user-defined field MY-EXTRA"
        );

        assert!(check_compliance(&hb_template(), &msg, 2).is_empty());
    }

    #[test]
    fn test_tracking_fields_exempt_from_extraneous_check() {
        let mut msg = compliant_hb();
        let mut node = Field::new("NODE", FieldValue::String("host1".to_string())).unwrap();
        node.set_tracking(true);
        msg.add_field(node);
        msg.add_field(
            Field::new(SCHEMA_ID_FIELD, FieldValue::String("MSG.HB".to_string())).unwrap(),
        );
        msg.add_field(
            Field::new(
                "__GMSEC-REPLY-UNIQUE-ID__",
                FieldValue::String("12345.1.1".to_string()),
            )
            .unwrap(),
        );

        assert!(check_compliance(&hb_template(), &msg, 3).is_empty());
    }

    #[test]
    fn test_level_one_skips_optional_value_checks() {
        let mut optional = FieldTemplate::simple(
            "SW-VERSION",
            Mode::Optional,
            FieldClass::Standard,
            vec![FieldType::String],
        );
        optional.values = ValueConstraint::parse("5.0").unwrap();
        let template =
            MessageTemplate::new("MSG.LOG", "MESSAGE-TYPE.MESSAGE-SUBTYPE", None, vec![optional]);

        let mut msg = Message::new("A.B", MessageKind::Publish).unwrap();
        msg.add_field(Field::new("SW-VERSION", FieldValue::String("6.1".to_string())).unwrap());

        assert_eq!(check_compliance(&template, &msg, 3).len(), 1);
        assert!(check_compliance(&template, &msg, 1).is_empty());
    }

    fn rsrc_template() -> MessageTemplate {
        let mut util = FieldTemplate::simple(
            "UTIL-PERCENT",
            Mode::Required,
            FieldClass::Standard,
            vec![FieldType::F32],
        );
        util.values = ValueConstraint::parse("0..100").unwrap();

        let cpu_array = FieldTemplate {
            name: "CPU".to_string(),
            mode: Mode::Optional,
            class: FieldClass::Standard,
            description: String::new(),
            values: ValueConstraint::any(),
            pattern: PatternConstraint::None,
            kind: TemplateKind::Array {
                prefix: "CPU".to_string(),
                size_field: "NUM-OF-CPUS".to_string(),
                children: vec![util],
            },
            dependencies: Vec::new(),
        };
        let num_of_cpus = FieldTemplate::simple(
            "NUM-OF-CPUS",
            Mode::Optional,
            FieldClass::Standard,
            vec![FieldType::U16],
        );

        MessageTemplate::new(
            "MSG.RSRC",
            "MESSAGE-TYPE.MESSAGE-SUBTYPE",
            None,
            vec![num_of_cpus, cpu_array],
        )
    }

    #[test]
    fn test_array_expansion_per_count_field() {
        let mut msg = Message::new("A.B", MessageKind::Publish).unwrap();
        msg.add_field(Field::new("NUM-OF-CPUS", FieldValue::U16(2)).unwrap());
        msg.add_field(Field::new("CPU.1.UTIL-PERCENT", FieldValue::F32(12.5)).unwrap());
        // CPU.2.UTIL-PERCENT missing

        let report = check_compliance(&rsrc_template(), &msg, 3);
        assert_eq!(report.len(), 1);
        assert_eq!(report.entries()[0].field, "CPU.2.UTIL-PERCENT");
        assert_eq!(report.entries()[0].code, StatusCode::MissingRequiredField);
    }

    #[test]
    fn test_array_value_checks_apply_per_index() {
        let mut msg = Message::new("A.B", MessageKind::Publish).unwrap();
        msg.add_field(Field::new("NUM-OF-CPUS", FieldValue::U16(1)).unwrap());
        msg.add_field(Field::new("CPU.1.UTIL-PERCENT", FieldValue::F32(250.0)).unwrap());

        let report = check_compliance(&rsrc_template(), &msg, 3);
        assert_eq!(report.len(), 1);
        assert_eq!(
            report.entries()[0].description,
            "CPU.1.UTIL-PERCENT has illegal value '250'"
        );
    }

    #[test]
    fn test_optional_array_skipped_without_count_field() {
        let msg = Message::new("A.B", MessageKind::Publish).unwrap();
        assert!(check_compliance(&rsrc_template(), &msg, 3).is_empty());
    }

    #[test]
    fn test_required_array_reports_undefined_size() {
        let mut template = rsrc_template();
        // same shape, but the array is now REQUIRED
        let mut fields = template.fields().to_vec();
        fields[1].mode = Mode::Required;
        template = MessageTemplate::new("MSG.RSRC", "MESSAGE-TYPE.MESSAGE-SUBTYPE", None, fields);

        let msg = Message::new("A.B", MessageKind::Publish).unwrap();
        let report = check_compliance(&template, &msg, 3);
        assert_eq!(report.len(), 1);
        assert_eq!(
            report.entries()[0].description,
            "CPU is an array of fields whose size is undefined"
        );
    }

    #[test]
    fn test_reserved_tracking_field_rejected() {
        let mut msg = Message::new("A.B", MessageKind::Publish).unwrap();
        msg.add_field(Field::new("PROCESS-ID", FieldValue::U32(42)).unwrap());

        let err = check_reserved_tracking_fields(&msg).unwrap_err();
        assert_eq!(err.class, StatusClass::Msg);
        assert_eq!(err.code, StatusCode::NonAllowedField);
        assert_eq!(
            err.reason,
            "PROCESS-ID is a reserved tracking field for the GMSEC API"
        );

        assert!(is_reserved_tracking_name("SUBSCRIPTION.3.SUBJECT-PATTERN"));
        assert!(!is_reserved_tracking_name("MY-FIELD"));
    }

    #[test]
    fn test_into_status() {
        let mut msg = compliant_hb();
        msg.clear_field("PUB-RATE");
        let status = check_compliance(&hb_template(), &msg, 3).into_status(msg.subject());
        assert_eq!(status.class, StatusClass::Msg);
        assert_eq!(status.code, StatusCode::MessageFailedValidation);
        assert!(status.reason.contains("[1 error(s)]"));
        assert!(status.reason.contains("PUB-RATE"));
    }
}
