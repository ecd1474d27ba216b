use std::borrow::Cow;

use regex::Regex;

use crate::field::{Field, FieldType};
use crate::message::Message;
use crate::status::{GmsecResult, Status, StatusClass, StatusCode};
use crate::subject;
use crate::util::time;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    Required,
    Optional,
    /// Directive templates (e.g. array controls); never checked for presence
    /// and never materialized.
    Control,
}

impl Mode {
    pub fn parse(s: &str) -> GmsecResult<Mode> {
        match s.to_uppercase().as_str() {
            "REQUIRED" => Ok(Mode::Required),
            "OPTIONAL" => Ok(Mode::Optional),
            "CONTROL" => Ok(Mode::Control),
            _ => Err(schema_err(format!("'{}' is not a valid field mode", s))),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldClass {
    Header,
    Standard,
}

impl FieldClass {
    pub fn parse(s: &str) -> GmsecResult<FieldClass> {
        match s.to_uppercase().as_str() {
            "HEADER" => Ok(FieldClass::Header),
            "STANDARD" => Ok(FieldClass::Standard),
            _ => Err(schema_err(format!("'{}' is not a valid field class", s))),
        }
    }
}

/// The allowed-values constraint of a template, parsed from a comma-separated
/// `VALUE` attribute. Tokens may be absolute literals, inclusive ranges
/// `a..b`, or open ranges `n+` (at least) / `n-` (at most). An empty
/// constraint permits everything; a multi-token constraint permits a value
/// matching any one token.
#[derive(Clone, Debug, Default)]
pub struct ValueConstraint {
    raw: String,
    tests: Vec<ValueTest>,
}

#[derive(Clone, Debug)]
enum ValueTest {
    Literal(String),
    Range { min: f64, max: f64 },
    AtLeast(f64),
    AtMost(f64),
}

impl ValueConstraint {
    pub fn any() -> ValueConstraint {
        ValueConstraint::default()
    }

    pub fn parse(raw: &str) -> GmsecResult<ValueConstraint> {
        let mut tests = Vec::new();
        for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            tests.push(ValueTest::parse(token)?);
        }
        Ok(ValueConstraint {
            raw: raw.to_string(),
            tests,
        })
    }

    pub fn is_unconstrained(&self) -> bool {
        self.tests.is_empty()
    }

    /// First absolute literal, used as a fallback default when materializing
    /// template fields.
    pub fn first_literal(&self) -> Option<&str> {
        self.tests.iter().find_map(|t| match t {
            ValueTest::Literal(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn permits(&self, field: &Field) -> bool {
        if self.tests.is_empty() {
            return true;
        }
        let text = field.get_string_value();
        let num = field.get_f64_value().ok();
        self.tests.iter().any(|t| t.permits(&text, num))
    }
}

impl ValueTest {
    fn parse(token: &str) -> GmsecResult<ValueTest> {
        if let Some((lo, hi)) = token.split_once("..") {
            let min = parse_bound(lo)?;
            let max = parse_bound(hi)?;
            if min > max {
                return Err(schema_err(format!("'{}' is an empty value range", token)));
            }
            return Ok(ValueTest::Range { min, max });
        }
        if token.len() > 1 {
            if let Some(rest) = token.strip_suffix('+') {
                if let Ok(min) = rest.trim().parse() {
                    return Ok(ValueTest::AtLeast(min));
                }
            }
            if let Some(rest) = token.strip_suffix('-') {
                if let Ok(max) = rest.trim().parse() {
                    return Ok(ValueTest::AtMost(max));
                }
            }
        }
        Ok(ValueTest::Literal(token.to_string()))
    }

    fn permits(&self, text: &str, num: Option<f64>) -> bool {
        match self {
            ValueTest::Literal(want) => match (num, want.parse::<f64>()) {
                (Some(n), Ok(w)) => n == w,
                _ => want == text,
            },
            ValueTest::Range { min, max } => num.is_some_and(|n| n >= *min && n <= *max),
            ValueTest::AtLeast(min) => num.is_some_and(|n| n >= *min),
            ValueTest::AtMost(max) => num.is_some_and(|n| n <= *max),
        }
    }
}

fn parse_bound(s: &str) -> GmsecResult<f64> {
    s.trim()
        .parse()
        .map_err(|_| schema_err(format!("'{}' is not a numeric range bound", s)))
}

/// Pattern constraint of a template: a regex, or one of the named sentinels
/// the schema files use for common header value shapes.
#[derive(Clone, Debug, Default)]
pub enum PatternConstraint {
    #[default]
    None,
    Regex(Regex),
    HeaderString,
    Time,
    IpAddress,
}

impl PatternConstraint {
    pub fn parse(raw: &str) -> GmsecResult<PatternConstraint> {
        let pattern = match raw {
            "HEADER_STRING_Type" => PatternConstraint::HeaderString,
            "TIME_Type" => PatternConstraint::Time,
            "IP_ADDRESS_Type" => PatternConstraint::IpAddress,
            _ => PatternConstraint::Regex(Regex::new(raw).map_err(|e| {
                schema_err(format!("'{}' is not a valid pattern: {}", raw, e))
            })?),
        };
        Ok(pattern)
    }

    pub fn permits(&self, text: &str) -> bool {
        match self {
            PatternConstraint::None => true,
            PatternConstraint::Regex(re) => re.is_match(text),
            PatternConstraint::HeaderString => subject::is_valid_element(text, false),
            PatternConstraint::Time => time::parse_timestamp(text).is_ok(),
            PatternConstraint::IpAddress => text.parse::<std::net::IpAddr>().is_ok(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            PatternConstraint::None => "any value".to_string(),
            PatternConstraint::Regex(re) => format!("a match for pattern '{}'", re.as_str()),
            PatternConstraint::HeaderString => "a header string".to_string(),
            PatternConstraint::Time => "a timestamp".to_string(),
            PatternConstraint::IpAddress => "an IP address".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub enum TemplateKind {
    /// Concrete field with one or more acceptable types.
    Simple { types: Vec<FieldType> },
    /// Any field type is acceptable (`VARIABLE` / `UNSET` in schema files).
    Variable,
    /// Container expanded per message against its `NUM-OF-…` count field;
    /// has no directly checkable value of its own.
    Array {
        prefix: String,
        size_field: String,
        children: Vec<FieldTemplate>,
    },
}

#[derive(Clone, Debug)]
pub enum TriggerPredicate {
    /// The trigger field merely has to exist.
    Present,
    Equals(String),
    GreaterThan(f64),
    LessThan(f64),
}

/// Conditional override: when the trigger holds for the message being
/// validated, mode/types/values/pattern of the owning template are replaced
/// for that validation pass only.
#[derive(Clone, Debug)]
pub struct Dependency {
    pub trigger_field: String,
    pub predicate: TriggerPredicate,
    pub mode: Option<Mode>,
    pub types: Option<Vec<FieldType>>,
    pub values: Option<ValueConstraint>,
    pub pattern: Option<PatternConstraint>,
}

impl Dependency {
    fn triggered_by(&self, msg: &Message) -> bool {
        let field = match msg.get_field(&self.trigger_field) {
            Some(f) => f,
            None => return false,
        };
        match &self.predicate {
            TriggerPredicate::Present => true,
            TriggerPredicate::Equals(want) => field.get_string_value() == *want,
            TriggerPredicate::GreaterThan(limit) => {
                field.get_f64_value().is_ok_and(|v| v > *limit)
            }
            TriggerPredicate::LessThan(limit) => field.get_f64_value().is_ok_and(|v| v < *limit),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FieldTemplate {
    pub name: String,
    pub mode: Mode,
    pub class: FieldClass,
    pub description: String,
    pub values: ValueConstraint,
    pub pattern: PatternConstraint,
    pub kind: TemplateKind,
    pub dependencies: Vec<Dependency>,
}

impl FieldTemplate {
    pub fn simple(name: impl Into<String>, mode: Mode, class: FieldClass, types: Vec<FieldType>) -> FieldTemplate {
        FieldTemplate {
            name: name.into(),
            mode,
            class,
            description: String::new(),
            values: ValueConstraint::any(),
            pattern: PatternConstraint::None,
            kind: TemplateKind::Simple { types },
            dependencies: Vec::new(),
        }
    }

    /// The template as it applies to `msg`: every dependency whose trigger
    /// holds is folded in, most recent last. Loaded templates are never
    /// mutated; an override produces a per-pass copy.
    pub fn resolved_for(&self, msg: &Message) -> Cow<'_, FieldTemplate> {
        let mut resolved = Cow::Borrowed(self);
        for dep in &self.dependencies {
            if !dep.triggered_by(msg) {
                continue;
            }
            let t = resolved.to_mut();
            if let Some(mode) = dep.mode {
                t.mode = mode;
            }
            if let Some(types) = &dep.types {
                if !matches!(t.kind, TemplateKind::Array { .. }) {
                    t.kind = TemplateKind::Simple {
                        types: types.clone(),
                    };
                }
            }
            if let Some(values) = &dep.values {
                t.values = values.clone();
            }
            if let Some(pattern) = &dep.pattern {
                t.pattern = pattern.clone();
            }
        }
        resolved
    }
}

fn schema_err(reason: String) -> Status {
    Status::new(
        StatusClass::Specification,
        StatusCode::SchemaFailedToParse,
        reason,
    )
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use crate::field::FieldValue;
    use crate::message::MessageKind;

    use super::*;

    fn field(value: FieldValue) -> Field {
        Field::new("F", value).unwrap()
    }

    #[rstest]
    #[case::literal_match("10, 30", FieldValue::U16(30), true)]
    #[case::literal_miss("10, 30", FieldValue::U16(20), false)]
    #[case::numeric_literal_across_types("30", FieldValue::F64(30.0), true)]
    #[case::string_literal("MSG", FieldValue::String("MSG".to_string()), true)]
    #[case::string_literal_case("MSG", FieldValue::String("msg".to_string()), false)]
    #[case::range_inside("1..3600", FieldValue::U16(60), true)]
    #[case::range_low_edge("1..3600", FieldValue::U16(1), true)]
    #[case::range_outside("1..3600", FieldValue::U16(0), false)]
    #[case::at_least("100+", FieldValue::I32(99), false)]
    #[case::at_least_edge("100+", FieldValue::I32(100), true)]
    #[case::at_most("5-", FieldValue::I32(5), true)]
    #[case::at_most_miss("5-", FieldValue::I32(6), false)]
    #[case::mixed_tokens("0, 10..20", FieldValue::I32(15), true)]
    #[case::non_numeric_against_range("1..10", FieldValue::String("abc".to_string()), false)]
    fn test_value_constraint(#[case] spec: &str, #[case] value: FieldValue, #[case] expected: bool) {
        let constraint = ValueConstraint::parse(spec).unwrap();
        assert_eq!(constraint.permits(&field(value)), expected);
    }

    #[test]
    fn test_unconstrained_permits_everything() {
        let constraint = ValueConstraint::any();
        assert!(constraint.is_unconstrained());
        assert!(constraint.permits(&field(FieldValue::String("anything".to_string()))));
    }

    #[test]
    fn test_negative_literal_is_not_an_open_range() {
        let constraint = ValueConstraint::parse("-5").unwrap();
        assert!(constraint.permits(&field(FieldValue::I32(-5))));
        assert!(!constraint.permits(&field(FieldValue::I32(-6))));
    }

    #[rstest]
    #[case::bad_range_bound("1..x")]
    #[case::inverted_range("10..1")]
    fn test_value_constraint_parse_rejects(#[case] spec: &str) {
        let err = ValueConstraint::parse(spec).unwrap_err();
        assert_eq!(err.class, StatusClass::Specification);
        assert_eq!(err.code, StatusCode::SchemaFailedToParse);
    }

    #[test]
    fn test_first_literal() {
        let constraint = ValueConstraint::parse("1..10, 42, 99").unwrap();
        assert_eq!(constraint.first_literal(), Some("42"));
        assert_eq!(ValueConstraint::parse("1..10").unwrap().first_literal(), None);
    }

    #[rstest]
    #[case::header_string("HEADER_STRING_Type", "MSSN-1_A", true)]
    #[case::header_string_lowercase("HEADER_STRING_Type", "mssn", false)]
    #[case::time("TIME_Type", "2019-088-14:03:55.372", true)]
    #[case::time_bad("TIME_Type", "yesterday", false)]
    #[case::ip("IP_ADDRESS_Type", "10.1.2.3", true)]
    #[case::ip_bad("IP_ADDRESS_Type", "10.1.2", false)]
    #[case::regex("^[A-Z]{3}$", "ABC", true)]
    #[case::regex_miss("^[A-Z]{3}$", "ABCD", false)]
    fn test_pattern_constraint(#[case] spec: &str, #[case] text: &str, #[case] expected: bool) {
        let pattern = PatternConstraint::parse(spec).unwrap();
        assert_eq!(pattern.permits(text), expected);
    }

    #[test]
    fn test_pattern_rejects_bad_regex() {
        let err = PatternConstraint::parse("[unterminated").unwrap_err();
        assert_eq!(err.code, StatusCode::SchemaFailedToParse);
    }

    fn msg_with(fields: Vec<Field>) -> Message {
        let mut msg = Message::new("A.B", MessageKind::Publish).unwrap();
        msg.add_fields(fields);
        msg
    }

    #[test]
    fn test_dependency_overrides_mode() {
        let mut template = FieldTemplate::simple(
            "PUB-RATE",
            Mode::Optional,
            FieldClass::Standard,
            vec![FieldType::U16],
        );
        template.dependencies.push(Dependency {
            trigger_field: "COMPONENT".to_string(),
            predicate: TriggerPredicate::Equals("HB-GEN".to_string()),
            mode: Some(Mode::Required),
            types: None,
            values: None,
            pattern: None,
        });

        let triggered = msg_with(vec![field_named("COMPONENT", "HB-GEN")]);
        assert_eq!(template.resolved_for(&triggered).mode, Mode::Required);

        let not_triggered = msg_with(vec![field_named("COMPONENT", "OTHER")]);
        assert_eq!(template.resolved_for(&not_triggered).mode, Mode::Optional);

        let absent = msg_with(vec![]);
        assert_eq!(template.resolved_for(&absent).mode, Mode::Optional);
        // loaded template untouched
        assert_eq!(template.mode, Mode::Optional);
    }

    fn field_named(name: &str, value: &str) -> Field {
        Field::new(name, FieldValue::String(value.to_string())).unwrap()
    }

    #[test]
    fn test_dependency_numeric_predicates() {
        let dep = Dependency {
            trigger_field: "NUM-OF-CPUS".to_string(),
            predicate: TriggerPredicate::GreaterThan(2.0),
            mode: Some(Mode::Required),
            types: None,
            values: None,
            pattern: None,
        };
        let mut msg = Message::new("A.B", MessageKind::Publish).unwrap();
        msg.add_field(Field::new("NUM-OF-CPUS", FieldValue::U16(4)).unwrap());
        assert!(dep.triggered_by(&msg));

        msg.add_field(Field::new("NUM-OF-CPUS", FieldValue::U16(2)).unwrap());
        assert!(!dep.triggered_by(&msg));
    }

    #[test]
    fn test_dependency_type_override_replaces_variable_kind() {
        let mut template = FieldTemplate::simple(
            "DATA",
            Mode::Optional,
            FieldClass::Standard,
            vec![],
        );
        template.kind = TemplateKind::Variable;
        template.dependencies.push(Dependency {
            trigger_field: "FORMAT".to_string(),
            predicate: TriggerPredicate::Present,
            mode: None,
            types: Some(vec![FieldType::String]),
            values: None,
            pattern: None,
        });

        let msg = msg_with(vec![field_named("FORMAT", "TEXT")]);
        let resolved = template.resolved_for(&msg);
        match &resolved.kind {
            TemplateKind::Simple { types } => assert_eq!(types, &vec![FieldType::String]),
            other => panic!("expected simple kind, got {:?}", other),
        }
    }
}
