//! Parsers for the template directory file formats: `.DIRECTORY.xml` index,
//! `Header.xsd` shared header templates, `Fields.xsd` named fragments,
//! `Defaults.xsd` instantiation defaults, and per-schema `<SCHEMA-ID>.xml`
//! files. All errors surface as `SPECIFICATION/SCHEMA_FAILED_TO_PARSE`; the
//! loader adds file context.

use std::collections::BTreeMap;

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::Reader;

use crate::field::FieldType;
use crate::specification::field_template::{
    Dependency, FieldClass, FieldTemplate, Mode, PatternConstraint, TemplateKind, TriggerPredicate,
    ValueConstraint,
};
use crate::status::{GmsecResult, Status, StatusClass, StatusCode};

#[derive(Debug)]
pub(super) struct DirectoryEntry {
    pub id: String,
    pub file: String,
}

#[derive(Debug)]
pub(super) struct ParsedSchema {
    pub name: String,
    pub definition: String,
    pub subject: Option<String>,
    pub fields: Vec<FieldTemplate>,
}

pub(super) type Fragments = BTreeMap<String, Vec<FieldTemplate>>;

fn parse_err(detail: impl Into<String>) -> Status {
    Status::new(
        StatusClass::Specification,
        StatusCode::SchemaFailedToParse,
        detail.into(),
    )
}

fn attr(e: &BytesStart, name: &str) -> GmsecResult<Option<String>> {
    match e.try_get_attribute(name) {
        Ok(Some(a)) => Ok(Some(
            a.unescape_value()
                .map_err(|e| parse_err(e.to_string()))?
                .into_owned(),
        )),
        Ok(None) => Ok(None),
        Err(e) => Err(parse_err(e.to_string())),
    }
}

fn required_attr(e: &BytesStart, name: &str, element: &str) -> GmsecResult<String> {
    attr(e, name)?
        .ok_or_else(|| parse_err(format!("{} is missing the {} attribute", element, name)))
}

pub(super) fn parse_directory(xml: &str) -> GmsecResult<Vec<DirectoryEntry>> {
    let mut reader = Reader::from_str(xml);
    let mut seen_root = false;
    let mut entries = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"DIRECTORY" => seen_root = true,
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.name().as_ref() == b"SCHEMA" && seen_root =>
            {
                entries.push(DirectoryEntry {
                    id: required_attr(&e, "ID", "SCHEMA")?,
                    file: required_attr(&e, "FILE", "SCHEMA")?,
                });
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_err(e.to_string())),
            _ => {}
        }
    }

    if !seen_root {
        return Err(parse_err("missing DIRECTORY root element"));
    }
    Ok(entries)
}

pub(super) fn parse_defaults(xml: &str) -> GmsecResult<BTreeMap<String, String>> {
    let mut reader = Reader::from_str(xml);
    let mut seen_root = false;
    let mut defaults = BTreeMap::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"DEFAULTS" => seen_root = true,
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.name().as_ref() == b"DEFAULT" && seen_root =>
            {
                defaults.insert(
                    required_attr(&e, "NAME", "DEFAULT")?,
                    required_attr(&e, "VALUE", "DEFAULT")?,
                );
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_err(e.to_string())),
            _ => {}
        }
    }

    if !seen_root {
        return Err(parse_err("missing DEFAULTS root element"));
    }
    Ok(defaults)
}

/// Parses a flat field-template container such as `Header.xsd` (`root_tag`
/// `HEADER`).
pub(super) fn parse_field_container(xml: &str, root_tag: &str) -> GmsecResult<Vec<FieldTemplate>> {
    let mut reader = Reader::from_str(xml);
    let mut seen_root = false;
    let mut parser = FieldListParser::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if parser.on_start(&e)? {
                    continue;
                }
                if e.name().as_ref() == root_tag.as_bytes() {
                    seen_root = true;
                }
            }
            Ok(Event::Empty(e)) => {
                parser.on_empty(&e)?;
            }
            Ok(Event::End(e)) => {
                parser.on_end(&e)?;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_err(e.to_string())),
            _ => {}
        }
    }

    if !seen_root {
        return Err(parse_err(format!("missing {} root element", root_tag)));
    }
    parser.finish()
}

/// Parses `Fields.xsd`: `<FIELDS>` holding named `<FRAGMENT>` sections, each
/// a reusable field-template list targeted by `<INCLUDE>`.
pub(super) fn parse_fragments(xml: &str) -> GmsecResult<Fragments> {
    let mut reader = Reader::from_str(xml);
    let mut seen_root = false;
    let mut fragments = Fragments::new();
    let mut current: Option<(String, FieldListParser)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let consumed = match current.as_mut() {
                    Some((_, parser)) => parser.on_start(&e)?,
                    None => false,
                };
                if consumed {
                    continue;
                }
                match e.name().as_ref() {
                    b"FIELDS" => seen_root = true,
                    b"FRAGMENT" if seen_root => {
                        current = Some((
                            required_attr(&e, "NAME", "FRAGMENT")?,
                            FieldListParser::default(),
                        ));
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                let consumed = match current.as_mut() {
                    Some((_, parser)) => parser.on_empty(&e)?,
                    None => false,
                };
                if !consumed && current.is_none() && seen_root && e.name().as_ref() == b"FRAGMENT"
                {
                    fragments.insert(required_attr(&e, "NAME", "FRAGMENT")?, Vec::new());
                }
            }
            Ok(Event::End(e)) => {
                let consumed = match current.as_mut() {
                    Some((_, parser)) => parser.on_end(&e)?,
                    None => false,
                };
                if !consumed && e.name().as_ref() == b"FRAGMENT" {
                    if let Some((name, parser)) = current.take() {
                        fragments.insert(name, parser.finish()?);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_err(e.to_string())),
            _ => {}
        }
    }

    if !seen_root {
        return Err(parse_err("missing FIELDS root element"));
    }
    Ok(fragments)
}

pub(super) fn parse_schema(xml: &str, fragments: &Fragments) -> GmsecResult<ParsedSchema> {
    let mut reader = Reader::from_str(xml);
    let mut root: Option<(String, String, Option<String>)> = None;
    let mut parser = FieldListParser::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if parser.on_start(&e)? {
                    continue;
                }
                if e.name().as_ref() == b"SCHEMA" {
                    root = Some((
                        required_attr(&e, "NAME", "SCHEMA")?,
                        required_attr(&e, "DEFINITION", "SCHEMA")?,
                        attr(&e, "SUBJECT")?,
                    ));
                }
            }
            Ok(Event::Empty(e)) => {
                if parser.on_empty(&e)? {
                    continue;
                }
                if e.name().as_ref() == b"INCLUDE" {
                    let name = required_attr(&e, "NAME", "INCLUDE")?;
                    let fragment = fragments
                        .get(&name)
                        .ok_or_else(|| parse_err(format!("unknown include '{}'", name)))?;
                    parser.include(fragment)?;
                }
            }
            Ok(Event::End(e)) => {
                parser.on_end(&e)?;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_err(e.to_string())),
            _ => {}
        }
    }

    let (name, definition, subject) =
        root.ok_or_else(|| parse_err("missing SCHEMA root element"))?;
    Ok(ParsedSchema {
        name,
        definition,
        subject,
        fields: parser.finish()?,
    })
}

/// Event-driven assembly of (possibly nested) FIELD elements and their
/// DEPENDENCY children.
#[derive(Default)]
struct FieldListParser {
    stack: Vec<FieldBuilder>,
    out: Vec<FieldTemplate>,
}

impl FieldListParser {
    fn on_start(&mut self, e: &BytesStart) -> GmsecResult<bool> {
        match e.name().as_ref() {
            b"FIELD" => {
                self.stack.push(FieldBuilder::from_start(e)?);
                Ok(true)
            }
            b"DEPENDENCY" => {
                self.push_dependency(parse_dependency(e)?)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn on_empty(&mut self, e: &BytesStart) -> GmsecResult<bool> {
        match e.name().as_ref() {
            b"FIELD" => {
                let template = FieldBuilder::from_start(e)?.finish()?;
                self.attach(template);
                Ok(true)
            }
            b"DEPENDENCY" => {
                self.push_dependency(parse_dependency(e)?)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn on_end(&mut self, e: &BytesEnd) -> GmsecResult<bool> {
        if e.name().as_ref() != b"FIELD" {
            return Ok(false);
        }
        let builder = self
            .stack
            .pop()
            .ok_or_else(|| parse_err("unbalanced FIELD element"))?;
        let template = builder.finish()?;
        self.attach(template);
        Ok(true)
    }

    fn include(&mut self, templates: &[FieldTemplate]) -> GmsecResult<()> {
        if !self.stack.is_empty() {
            return Err(parse_err("INCLUDE inside a FIELD element"));
        }
        self.out.extend(templates.iter().cloned());
        Ok(())
    }

    fn attach(&mut self, template: FieldTemplate) {
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(template),
            None => self.out.push(template),
        }
    }

    fn push_dependency(&mut self, dep: Dependency) -> GmsecResult<()> {
        self.stack
            .last_mut()
            .map(|b| b.dependencies.push(dep))
            .ok_or_else(|| parse_err("DEPENDENCY outside of a FIELD element"))
    }

    fn finish(self) -> GmsecResult<Vec<FieldTemplate>> {
        if !self.stack.is_empty() {
            return Err(parse_err("unbalanced FIELD element"));
        }
        Ok(self.out)
    }
}

enum TypeSpec {
    Types(Vec<FieldType>),
    Variable,
    Container,
}

struct FieldBuilder {
    name: String,
    mode: Mode,
    class: FieldClass,
    description: String,
    values: ValueConstraint,
    pattern: PatternConstraint,
    type_spec: TypeSpec,
    prefix: Option<String>,
    size_field: Option<String>,
    dependencies: Vec<Dependency>,
    children: Vec<FieldTemplate>,
}

impl FieldBuilder {
    fn from_start(e: &BytesStart) -> GmsecResult<FieldBuilder> {
        let name = required_attr(e, "NAME", "FIELD")?;
        let mode = match attr(e, "MODE")? {
            Some(s) => Mode::parse(&s)?,
            None => Mode::Optional,
        };
        let class = match attr(e, "FIELD_CLASS")? {
            Some(s) => FieldClass::parse(&s)?,
            None => FieldClass::Standard,
        };
        let type_spec = match required_attr(e, "TYPE", "FIELD")?.to_uppercase().as_str() {
            "CONTAINER" => TypeSpec::Container,
            "VARIABLE" | "UNSET" => TypeSpec::Variable,
            other => TypeSpec::Types(parse_types(other)?),
        };
        let values = match attr(e, "VALUE")? {
            Some(s) => ValueConstraint::parse(&s)?,
            None => ValueConstraint::any(),
        };
        let pattern = match attr(e, "PATTERN")? {
            Some(s) => PatternConstraint::parse(&s)?,
            None => PatternConstraint::None,
        };

        Ok(FieldBuilder {
            name,
            mode,
            class,
            description: attr(e, "DESCRIPTION")?.unwrap_or_default(),
            values,
            pattern,
            type_spec,
            prefix: attr(e, "PREFIX")?,
            size_field: attr(e, "SIZE")?,
            dependencies: Vec::new(),
            children: Vec::new(),
        })
    }

    fn finish(self) -> GmsecResult<FieldTemplate> {
        let kind = match self.type_spec {
            TypeSpec::Container => TemplateKind::Array {
                prefix: self.prefix.unwrap_or_else(|| self.name.clone()),
                size_field: self.size_field.ok_or_else(|| {
                    parse_err(format!(
                        "CONTAINER field {} is missing the SIZE attribute",
                        self.name
                    ))
                })?,
                children: self.children,
            },
            TypeSpec::Variable => {
                if !self.children.is_empty() {
                    return Err(parse_err(format!(
                        "only CONTAINER fields may have child fields ({})",
                        self.name
                    )));
                }
                TemplateKind::Variable
            }
            TypeSpec::Types(types) => {
                if !self.children.is_empty() {
                    return Err(parse_err(format!(
                        "only CONTAINER fields may have child fields ({})",
                        self.name
                    )));
                }
                TemplateKind::Simple { types }
            }
        };

        Ok(FieldTemplate {
            name: self.name,
            mode: self.mode,
            class: self.class,
            description: self.description,
            values: self.values,
            pattern: self.pattern,
            kind,
            dependencies: self.dependencies,
        })
    }
}

fn parse_types(spec: &str) -> GmsecResult<Vec<FieldType>> {
    let mut types = Vec::new();
    for token in spec.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        types.push(FieldType::from_type_name(token).map_err(|e| parse_err(e.reason))?);
    }
    if types.is_empty() {
        return Err(parse_err("FIELD has an empty TYPE list"));
    }
    Ok(types)
}

fn parse_dependency(e: &BytesStart) -> GmsecResult<Dependency> {
    let trigger_field = required_attr(e, "NAME", "DEPENDENCY")?;

    let predicate = if let Some(v) = attr(e, "VALUE_EQUALS")? {
        TriggerPredicate::Equals(v)
    } else if let Some(v) = attr(e, "GREATER_THAN")? {
        TriggerPredicate::GreaterThan(parse_limit(&v)?)
    } else if let Some(v) = attr(e, "LESS_THAN")? {
        TriggerPredicate::LessThan(parse_limit(&v)?)
    } else {
        TriggerPredicate::Present
    };

    let mode = attr(e, "MODE")?.map(|s| Mode::parse(&s)).transpose()?;
    let types = attr(e, "TYPE")?.map(|s| parse_types(&s)).transpose()?;
    let values = attr(e, "VALUE")?
        .map(|s| ValueConstraint::parse(&s))
        .transpose()?;
    let pattern = attr(e, "PATTERN")?
        .map(|s| PatternConstraint::parse(&s))
        .transpose()?;

    Ok(Dependency {
        trigger_field,
        predicate,
        mode,
        types,
        values,
        pattern,
    })
}

fn parse_limit(s: &str) -> GmsecResult<f64> {
    s.trim()
        .parse()
        .map_err(|_| parse_err(format!("'{}' is not a numeric dependency limit", s)))
}
