//! Message specification engine: loads C2MS-style template directories and
//! validates messages against them.
//!
//! A [Specification] is bound to one ISD version and one schema level at
//! construction time. Loading is all-or-nothing; a failed load returns an
//! error and leaves no partially constructed specification behind.

pub mod field_template;
pub mod message_template;
mod schema_xml;
pub mod validator;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

#[cfg(test)] use mockall::automock;
use tracing::{debug, info};

use crate::config::Config;
use crate::field::{Field, FieldType, FieldValue};
use crate::message::Message;
use crate::specification::field_template::{FieldClass, FieldTemplate, Mode, TemplateKind};
use crate::specification::message_template::MessageTemplate;
use crate::specification::schema_xml::Fragments;
use crate::specification::validator::ValidationReport;
use crate::status::{GmsecResult, Status, StatusClass, StatusCode};

pub const ISD_2014_00: u32 = 201400;
pub const ISD_2016_00: u32 = 201600;
pub const ISD_2019_00: u32 = 201900;
pub const CURRENT_ISD: u32 = ISD_2019_00;

pub const DEFAULT_SCHEMA_PATH: &str = "./templates";

/// Reserved string field that pins a message to a schema ID, bypassing
/// inference from the definition fields.
pub const SCHEMA_ID_FIELD: &str = "__GMSEC-SCHEMA-ID__";

/// Application-supplied validation hook, consulted before the template
/// compliance pass. An error from the hook is returned unchanged.
#[cfg_attr(test, automock)]
pub trait MessageValidator: Send + Sync {
    fn validate_message(&self, msg: &Message) -> GmsecResult<()>;
}

pub struct Specification {
    version: u32,
    schema_level: u8,
    validation_level: u8,
    templates: BTreeMap<String, Arc<MessageTemplate>>,
    defaults: BTreeMap<String, String>,
    custom_validator: Option<Box<dyn MessageValidator>>,
}

#[cfg(test)]
impl std::fmt::Debug for Specification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Specification")
            .field("version", &self.version)
            .field("schema_level", &self.schema_level)
            .field("validation_level", &self.validation_level)
            .finish_non_exhaustive()
    }
}

impl Specification {
    /// Builds a specification from config and loads its template directory.
    ///
    /// Config keys: `GMSEC-SPECIFICATION-VERSION` (201400 | 201600 | 201900,
    /// default 201900), `GMSEC-SCHEMA-LEVEL` (0..=6, default 0),
    /// `GMSEC-VALIDATION-LEVEL` (1..=3, default 3), `GMSEC-SCHEMA-PATH`
    /// (default `./templates`).
    pub fn from_config(config: &Config) -> GmsecResult<Specification> {
        let version = match config.get_value("GMSEC-SPECIFICATION-VERSION") {
            None => CURRENT_ISD,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(v @ (ISD_2014_00 | ISD_2016_00 | ISD_2019_00)) => v,
                _ => {
                    return Err(Status::new(
                        StatusClass::Config,
                        StatusCode::InvalidConfigValue,
                        format!(
                            "'{}' is not a valid value for GMSEC-SPECIFICATION-VERSION",
                            raw
                        ),
                    ))
                }
            },
        };
        let schema_level = bounded_level(config, "GMSEC-SCHEMA-LEVEL", 0..=6, 0)?;
        let validation_level = bounded_level(config, "GMSEC-VALIDATION-LEVEL", 1..=3, 3)?;
        let schema_path = config
            .get_value("GMSEC-SCHEMA-PATH")
            .unwrap_or(DEFAULT_SCHEMA_PATH)
            .to_string();

        let mut spec = Specification {
            version,
            schema_level,
            validation_level,
            templates: BTreeMap::new(),
            defaults: BTreeMap::new(),
            custom_validator: None,
        };
        spec.load_templates(Path::new(&schema_path))?;
        info!(
            version,
            schema_level,
            templates = spec.templates.len(),
            "loaded message specification"
        );
        Ok(spec)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn schema_level(&self) -> u8 {
        self.schema_level
    }

    pub fn validation_level(&self) -> u8 {
        self.validation_level
    }

    pub fn schema_ids(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn find_template(&self, schema_id: &str) -> GmsecResult<&Arc<MessageTemplate>> {
        self.templates.get(schema_id).ok_or_else(|| {
            Status::new(
                StatusClass::Specification,
                StatusCode::TemplateIdDoesNotExist,
                format!(
                    "SchemaID '{}' could not be found in list of available schema",
                    schema_id
                ),
            )
        })
    }

    /// Registers a template programmatically, replacing any loaded template
    /// with the same schema ID.
    pub fn register_template(&mut self, template: MessageTemplate) {
        self.templates
            .insert(template.schema_id().to_string(), Arc::new(template));
    }

    pub fn set_message_validator(&mut self, validator: Box<dyn MessageValidator>) {
        self.custom_validator = Some(validator);
    }

    /// Determines the schema ID governing `msg`: an explicit
    /// [SCHEMA_ID_FIELD] wins, otherwise the ID is inferred by reading the
    /// fields each template's definition names and comparing the resulting
    /// candidate against the template's own ID.
    pub fn lookup_schema_id(&self, msg: &Message) -> GmsecResult<String> {
        if let Some(field) = msg.get_field(SCHEMA_ID_FIELD) {
            return Ok(field.get_string_value());
        }

        for (id, template) in &self.templates {
            let mut candidate = String::new();
            let mut complete = true;
            for name in template.definition_field_names() {
                match msg.get_string_value(name) {
                    Ok(value) => {
                        if !candidate.is_empty() {
                            candidate.push('.');
                        }
                        candidate.push_str(&value.to_uppercase());
                    }
                    Err(_) => {
                        complete = false;
                        break;
                    }
                }
            }
            if complete && &candidate == id {
                return Ok(candidate);
            }
        }

        Err(Status::new(
            StatusClass::Specification,
            StatusCode::MsgLookupFailure,
            format!(
                "Message with subject {} does not match any known message schema",
                msg.subject()
            ),
        ))
    }

    /// Validates `msg` against its schema. The custom validator (if any) runs
    /// first and short-circuits; the compliance pass then collects every
    /// discrepancy into a single status.
    pub fn validate_message(&self, msg: &Message) -> GmsecResult<()> {
        if let Some(custom) = &self.custom_validator {
            custom.validate_message(msg)?;
        }
        let report = self.check_compliance(msg)?;
        if report.is_empty() {
            Ok(())
        } else {
            Err(report.into_status(msg.subject()))
        }
    }

    /// Runs the compliance pass and returns the full report. Errs only when
    /// the governing template cannot be determined.
    pub fn check_compliance(&self, msg: &Message) -> GmsecResult<ValidationReport> {
        let schema_id = self.lookup_schema_id(msg)?;
        let template = self.find_template(&schema_id)?;
        Ok(validator::check_compliance(template, msg, self.validation_level))
    }

    /// Builds a message skeleton for `schema_id`: kind and subject from the
    /// template, REQUIRED fields and defaulted header fields materialized.
    pub fn instantiate(&self, schema_id: &str) -> GmsecResult<Message> {
        let template = Arc::clone(self.find_template(schema_id)?);
        let mut msg = Message::new("GMSEC", template.kind())?;
        for t in template.fields() {
            self.materialize(t, &mut msg)?;
        }
        let subject = template.resolve_subject(&msg);
        msg.set_subject(subject)?;
        debug!(schema = schema_id, subject = msg.subject(), "instantiated message");
        Ok(msg)
    }

    /// Fills the missing REQUIRED fields of `schema_id` into an existing
    /// message, then validates it against that template.
    pub fn apply(&self, msg: &mut Message, schema_id: &str) -> GmsecResult<()> {
        let template = Arc::clone(self.find_template(schema_id)?);
        for t in template.fields() {
            self.materialize(t, msg)?;
        }
        if let Some(custom) = &self.custom_validator {
            custom.validate_message(msg)?;
        }
        let report = validator::check_compliance(&template, msg, self.validation_level);
        if report.is_empty() {
            Ok(())
        } else {
            Err(report.into_status(msg.subject()))
        }
    }

    fn materialize(&self, t: &FieldTemplate, msg: &mut Message) -> GmsecResult<()> {
        if t.mode == Mode::Control || msg.has_field(&t.name) {
            return Ok(());
        }
        let default = self
            .defaults
            .get(&t.name)
            .map(String::as_str)
            .or_else(|| t.values.first_literal());
        let wanted =
            t.mode == Mode::Required || (t.class == FieldClass::Header && default.is_some());
        if !wanted {
            return Ok(());
        }

        let ftype = match &t.kind {
            TemplateKind::Simple { types } => {
                types.first().copied().unwrap_or(FieldType::String)
            }
            TemplateKind::Variable => FieldType::String,
            // arrays have no fixed shape until a message defines their size
            TemplateKind::Array { .. } => return Ok(()),
        };
        let value = match default {
            Some(raw) => FieldValue::parse(ftype, raw).map_err(|e| {
                Status::new(
                    StatusClass::Specification,
                    StatusCode::SchemaFailedToParse,
                    format!("default value for {}: {}", t.name, e.reason),
                )
            })?,
            None => FieldValue::default_for(ftype),
        };
        let field = Field::new(t.name.clone(), value)?.with_header(t.class == FieldClass::Header);
        msg.add_field(field);
        Ok(())
    }

    fn load_templates(&mut self, root: &Path) -> GmsecResult<()> {
        let version_dir = root.join(version_dir_name(self.version));
        if !version_dir.is_dir() {
            return Err(Status::new(
                StatusClass::Specification,
                StatusCode::TemplateDirNotFound,
                format!("Template directory {} does not exist", version_dir.display()),
            ));
        }

        let mut header: Vec<FieldTemplate> = Vec::new();
        let mut fragments = Fragments::new();

        for level in 0..=self.schema_level {
            let level_dir = version_dir.join(level.to_string());
            if !level_dir.is_dir() {
                if level == 0 {
                    return Err(Status::new(
                        StatusClass::Specification,
                        StatusCode::TemplateDirNotFound,
                        format!("Template directory {} does not exist", level_dir.display()),
                    ));
                }
                debug!(level, "no template directory for schema level, skipping");
                continue;
            }
            self.load_level(&level_dir, level, &mut header, &mut fragments)?;
        }
        Ok(())
    }

    fn load_level(
        &mut self,
        dir: &Path,
        level: u8,
        header: &mut Vec<FieldTemplate>,
        fragments: &mut Fragments,
    ) -> GmsecResult<()> {
        let fields_file = dir.join("Fields.xsd");
        if fields_file.is_file() {
            for (name, fields) in schema_xml::parse_fragments(&read_template_file(&fields_file)?)? {
                fragments.insert(name, fields);
            }
        }

        let defaults_file = dir.join("Defaults.xsd");
        if defaults_file.is_file() {
            for (name, value) in schema_xml::parse_defaults(&read_template_file(&defaults_file)?)? {
                self.defaults.insert(name, value);
            }
        }

        let header_file = dir.join("Header.xsd");
        if header_file.is_file() {
            *header = schema_xml::parse_field_container(&read_template_file(&header_file)?, "HEADER")?;
        } else if level == 0 {
            return Err(Status::new(
                StatusClass::Specification,
                StatusCode::TemplateDirError,
                format!("Template directory {} has no Header.xsd", dir.display()),
            ));
        }

        let directory_file = dir.join(".DIRECTORY.xml");
        if !directory_file.is_file() {
            return Err(Status::new(
                StatusClass::Specification,
                StatusCode::TemplateDirError,
                format!("Template directory {} has no .DIRECTORY.xml", dir.display()),
            ));
        }
        for entry in schema_xml::parse_directory(&read_template_file(&directory_file)?)? {
            let schema_file = dir.join(&entry.file);
            let parsed = schema_xml::parse_schema(&read_template_file(&schema_file)?, fragments)?;
            if parsed.name != entry.id {
                return Err(Status::new(
                    StatusClass::Specification,
                    StatusCode::SchemaFailedToParse,
                    format!(
                        "schema file {} defines '{}' but the directory maps it to '{}'",
                        entry.file, parsed.name, entry.id
                    ),
                ));
            }
            let fields = merge_fields(header, parsed.fields);
            debug!(schema = %entry.id, level, "registering message template");
            self.templates.insert(
                entry.id.clone(),
                Arc::new(MessageTemplate::new(
                    entry.id,
                    parsed.definition,
                    parsed.subject,
                    fields,
                )),
            );
        }
        Ok(())
    }
}

fn bounded_level(
    config: &Config,
    key: &str,
    range: std::ops::RangeInclusive<u8>,
    default: u8,
) -> GmsecResult<u8> {
    match config.get_value(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<u8>() {
            Ok(v) if range.contains(&v) => Ok(v),
            _ => Err(Status::new(
                StatusClass::Config,
                StatusCode::InvalidConfigValue,
                format!("'{}' is not a valid value for {}", raw, key),
            )),
        },
    }
}

fn version_dir_name(version: u32) -> String {
    format!("{:04}.{:02}", version / 100, version % 100)
}

/// Starts from the shared header templates; a schema redefining a header
/// field by name replaces it in place, pinning e.g. MESSAGE-TYPE to one
/// literal value for that schema.
fn merge_fields(header: &[FieldTemplate], own: Vec<FieldTemplate>) -> Vec<FieldTemplate> {
    let mut merged = header.to_vec();
    for field in own {
        match merged.iter_mut().find(|f| f.name == field.name) {
            Some(slot) => *slot = field,
            None => merged.push(field),
        }
    }
    merged
}

fn read_template_file(path: &Path) -> GmsecResult<String> {
    std::fs::read_to_string(path).map_err(|e| {
        Status::new(
            StatusClass::Specification,
            StatusCode::TemplateDirError,
            format!("error reading template file {}: {}", path.display(), e),
        )
    })
}

#[cfg(test)]
mod test {
    use rstest::*;

    use crate::message::MessageKind;
    use crate::test_util::templates;

    use super::*;

    fn spec(extra: &[&str]) -> Specification {
        let root = templates::write_standard_templates();
        let mut args = vec![format!("gmsec-schema-path={}", root.display())];
        args.extend(extra.iter().map(|s| s.to_string()));
        Specification::from_config(&Config::from_args(args)).unwrap()
    }

    fn compliant_hb(spec: &Specification) -> Message {
        let mut msg = spec.instantiate("MSG.HB").unwrap();
        msg.add_field(Field::new("PUB-RATE", FieldValue::U16(30)).unwrap());
        msg.add_field(Field::new("COUNTER", FieldValue::U16(1)).unwrap());
        msg
    }

    #[rstest]
    #[case::isd_2014(201400, "2014.00")]
    #[case::isd_2016(201600, "2016.00")]
    #[case::isd_2019(201900, "2019.00")]
    fn test_version_dir_name(#[case] version: u32, #[case] expected: &str) {
        assert_eq!(version_dir_name(version), expected);
    }

    #[test]
    fn test_from_config_loads_standard_templates() {
        let spec = spec(&[]);
        assert_eq!(spec.version(), 201900);
        assert_eq!(spec.schema_level(), 0);
        assert_eq!(spec.validation_level(), 3);

        let ids: Vec<&str> = spec.schema_ids().collect();
        assert_eq!(ids, vec!["MSG.HB", "MSG.LOG", "MSG.RSRC", "REQ.DIR", "RESP.DIR"]);
    }

    #[test]
    fn test_missing_version_dir() {
        let root = templates::write_standard_templates();
        let config = Config::from_args([
            format!("gmsec-schema-path={}", root.display()),
            "gmsec-specification-version=201400".to_string(),
        ]);
        let err = Specification::from_config(&config).unwrap_err();
        assert_eq!(err.class, StatusClass::Specification);
        assert_eq!(err.code, StatusCode::TemplateDirNotFound);
    }

    #[rstest]
    #[case::bad_version("gmsec-specification-version=201500")]
    #[case::unparseable_version("gmsec-specification-version=latest")]
    #[case::bad_schema_level("gmsec-schema-level=7")]
    #[case::bad_validation_level("gmsec-validation-level=0")]
    fn test_invalid_config_values(#[case] arg: &str) {
        let root = templates::write_standard_templates();
        let config = Config::from_args([
            format!("gmsec-schema-path={}", root.display()),
            arg.to_string(),
        ]);
        let err = Specification::from_config(&config).unwrap_err();
        assert_eq!(err.class, StatusClass::Config);
        assert_eq!(err.code, StatusCode::InvalidConfigValue);
    }

    #[test]
    fn test_schema_level_merges_addendum() {
        let base = spec(&[]);
        let addendum = spec(&["gmsec-schema-level=1"]);

        // level 1 redefines MSG.LOG with an extra required field and adds MSG.TLM
        assert!(base.find_template("MSG.TLM").is_err());
        assert!(addendum.find_template("MSG.TLM").is_ok());

        let has_subclass = |s: &Specification| {
            s.find_template("MSG.LOG")
                .unwrap()
                .fields()
                .iter()
                .any(|f| f.name == "SUBCLASS")
        };
        assert!(!has_subclass(&base));
        assert!(has_subclass(&addendum));
    }

    #[test]
    fn test_configured_level_without_directory_is_skipped() {
        let addendum = spec(&["gmsec-schema-level=3"]);
        // levels 2 and 3 have no directories; level 1 still merges
        assert!(addendum.find_template("MSG.TLM").is_ok());
    }

    #[test]
    fn test_header_fields_prepended_to_every_schema() {
        let spec = spec(&[]);
        let template = spec.find_template("MSG.HB").unwrap();
        let mission = template
            .fields()
            .iter()
            .find(|f| f.name == "MISSION-ID")
            .unwrap();
        assert_eq!(mission.class, FieldClass::Header);

        // the schema's own MESSAGE-SUBTYPE pins the header template's generic one
        let subtype = template
            .fields()
            .iter()
            .find(|f| f.name == "MESSAGE-SUBTYPE")
            .unwrap();
        assert_eq!(subtype.values.first_literal(), Some("HB"));
    }

    #[test]
    fn test_lookup_schema_id_by_inference() {
        let spec = spec(&[]);
        let msg = compliant_hb(&spec);
        assert_eq!(spec.lookup_schema_id(&msg).unwrap(), "MSG.HB");
    }

    #[test]
    fn test_lookup_schema_id_override_field() {
        let spec = spec(&[]);
        let mut msg = compliant_hb(&spec);
        msg.add_field(
            Field::new(SCHEMA_ID_FIELD, FieldValue::String("MSG.LOG".to_string())).unwrap(),
        );
        assert_eq!(spec.lookup_schema_id(&msg).unwrap(), "MSG.LOG");
    }

    #[test]
    fn test_lookup_schema_id_failure() {
        let spec = spec(&[]);
        let msg = Message::new("A.B", MessageKind::Publish).unwrap();
        let err = spec.lookup_schema_id(&msg).unwrap_err();
        assert_eq!(err.class, StatusClass::Specification);
        assert_eq!(err.code, StatusCode::MsgLookupFailure);
    }

    #[test]
    fn test_find_template_unknown_id() {
        let spec = spec(&[]);
        let err = spec.find_template("MSG.NOPE").unwrap_err();
        assert_eq!(err.code, StatusCode::TemplateIdDoesNotExist);
        assert_eq!(
            err.reason,
            "SchemaID 'MSG.NOPE' could not be found in list of available schema"
        );
    }

    #[test]
    fn test_validate_message_passes_for_compliant_message() {
        let spec = spec(&[]);
        let msg = compliant_hb(&spec);
        assert!(spec.validate_message(&msg).is_ok());
    }

    #[test]
    fn test_validate_message_collects_all_errors() {
        let spec = spec(&[]);
        let mut msg = compliant_hb(&spec);
        msg.clear_field("PUB-RATE");
        msg.add_field(Field::new("MY-EXTRA", FieldValue::Bool(true)).unwrap());

        let err = spec.validate_message(&msg).unwrap_err();
        assert_eq!(err.code, StatusCode::MessageFailedValidation);
        assert!(err.reason.contains("[2 error(s)]"));
        assert!(err
            .reason
            .contains("PUB-RATE is a required field, but is missing from message"));
        assert!(err
            .reason
            .contains("Message contains user-defined field MY-EXTRA"));
    }

    #[test]
    fn test_custom_validator_runs_first() {
        let mut spec = spec(&[]);
        let mut mock = MockMessageValidator::new();
        mock.expect_validate_message().returning(|_| {
            Err(Status::new(
                StatusClass::Custom,
                StatusCode::OtherError,
                "rejected by policy",
            ))
        });
        spec.set_message_validator(Box::new(mock));

        let err = spec.validate_message(&compliant_hb(&spec)).unwrap_err();
        assert_eq!(err.class, StatusClass::Custom);
        assert_eq!(err.reason, "rejected by policy");
    }

    #[test]
    fn test_instantiate_heartbeat_skeleton() {
        let spec = spec(&[]);
        let msg = spec.instantiate("MSG.HB").unwrap();

        assert_eq!(msg.kind(), MessageKind::Publish);
        assert_eq!(msg.subject(), "C2MS.MSSN.FILL.MSG.HB.GMSEC-COMPONENT");

        // defaults from Defaults.xsd
        assert_eq!(msg.get_string_value("MISSION-ID").unwrap(), "MSSN");
        assert_eq!(msg.get_string_value("COMPONENT").unwrap(), "GMSEC-COMPONENT");
        assert!(msg.get_field("MISSION-ID").unwrap().is_header());

        // literal VALUE from the schema
        assert_eq!(msg.get_string_value("MESSAGE-TYPE").unwrap(), "MSG");
        assert_eq!(msg.get_string_value("MESSAGE-SUBTYPE").unwrap(), "HB");

        // required field without a default gets the type's zero value
        assert_eq!(msg.get_i64_value("PUB-RATE").unwrap(), 0);
        assert_eq!(msg.get_field("PUB-RATE").unwrap().field_type(), FieldType::U16);

        // optional headers without defaults stay out of the skeleton
        assert!(!msg.has_field("CONSTELLATION-ID"));

        assert!(spec.validate_message(&msg).is_ok());
    }

    #[test]
    fn test_instantiate_kind_follows_schema_id() {
        let spec = spec(&[]);
        assert_eq!(spec.instantiate("REQ.DIR").unwrap().kind(), MessageKind::Request);
        assert_eq!(spec.instantiate("RESP.DIR").unwrap().kind(), MessageKind::Reply);
    }

    #[test]
    fn test_apply_fills_missing_required_fields() {
        let spec = spec(&[]);
        let mut msg = Message::new("GMSEC.TEST.HB", MessageKind::Publish).unwrap();
        msg.add_field(Field::new("PUB-RATE", FieldValue::U16(5)).unwrap());

        spec.apply(&mut msg, "MSG.HB").unwrap();
        assert_eq!(msg.get_string_value("MISSION-ID").unwrap(), "MSSN");
        assert_eq!(msg.get_i64_value("PUB-RATE").unwrap(), 5);
        assert!(msg.has_field("COUNTER"));
    }

    #[test]
    fn test_register_template_replaces_loaded_one() {
        let mut spec = spec(&[]);
        spec.register_template(MessageTemplate::new(
            "MSG.HB",
            "MESSAGE-TYPE.MESSAGE-SUBTYPE",
            None,
            Vec::new(),
        ));
        assert!(spec.find_template("MSG.HB").unwrap().fields().is_empty());
    }
}
