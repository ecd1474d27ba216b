//! Canned message template directories.
//!
//! [write_standard_templates] materializes a miniature C2MS-like directory
//! tree in the system temp dir: schema level 0 with header, defaults,
//! reusable tracking fragment and five message schemas, plus a level 1
//! addendum that redefines MSG.LOG and adds MSG.TLM. Directories are unique
//! per call and left behind for the OS to clean up.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const HEADER_XSD: &str = r#"<HEADER>
    <FIELD NAME="MISSION-ID" MODE="REQUIRED" FIELD_CLASS="HEADER" TYPE="STRING" PATTERN="HEADER_STRING_Type" DESCRIPTION="Mission identifier"/>
    <FIELD NAME="CONSTELLATION-ID" MODE="OPTIONAL" FIELD_CLASS="HEADER" TYPE="STRING" PATTERN="HEADER_STRING_Type"/>
    <FIELD NAME="SAT-ID-PHYSICAL" MODE="OPTIONAL" FIELD_CLASS="HEADER" TYPE="STRING" PATTERN="HEADER_STRING_Type"/>
    <FIELD NAME="COMPONENT" MODE="REQUIRED" FIELD_CLASS="HEADER" TYPE="STRING" PATTERN="HEADER_STRING_Type" DESCRIPTION="Publishing component"/>
    <FIELD NAME="MESSAGE-TYPE" MODE="REQUIRED" FIELD_CLASS="HEADER" TYPE="STRING" VALUE="MSG,REQ,RESP"/>
    <FIELD NAME="MESSAGE-SUBTYPE" MODE="REQUIRED" FIELD_CLASS="HEADER" TYPE="STRING"/>
    <FIELD NAME="CONTENT-VERSION" MODE="REQUIRED" FIELD_CLASS="HEADER" TYPE="F32" VALUE="2019"/>
</HEADER>
"#;

pub const FIELDS_XSD: &str = r#"<FIELDS>
    <FRAGMENT NAME="TRACKING">
        <FIELD NAME="NODE" MODE="OPTIONAL" TYPE="STRING"/>
        <FIELD NAME="PROCESS-ID" MODE="OPTIONAL" TYPE="I32,U32"/>
        <FIELD NAME="USER-NAME" MODE="OPTIONAL" TYPE="STRING"/>
        <FIELD NAME="CONNECTION-ID" MODE="OPTIONAL" TYPE="U32"/>
        <FIELD NAME="MW-INFO" MODE="OPTIONAL" TYPE="STRING"/>
        <FIELD NAME="PUBLISH-TIME" MODE="OPTIONAL" TYPE="STRING" PATTERN="TIME_Type"/>
        <FIELD NAME="UNIQUE-ID" MODE="OPTIONAL" TYPE="STRING"/>
    </FRAGMENT>
</FIELDS>
"#;

pub const DEFAULTS_XSD: &str = r#"<DEFAULTS>
    <DEFAULT NAME="MISSION-ID" VALUE="MSSN"/>
    <DEFAULT NAME="COMPONENT" VALUE="GMSEC-COMPONENT"/>
</DEFAULTS>
"#;

pub const DIRECTORY_XML: &str = r#"<DIRECTORY>
    <SCHEMA ID="MSG.HB" FILE="MSG.HB.xml" DEFINITION="MESSAGE-TYPE.MESSAGE-SUBTYPE"/>
    <SCHEMA ID="MSG.LOG" FILE="MSG.LOG.xml" DEFINITION="MESSAGE-TYPE.MESSAGE-SUBTYPE"/>
    <SCHEMA ID="MSG.RSRC" FILE="MSG.RSRC.xml" DEFINITION="MESSAGE-TYPE.MESSAGE-SUBTYPE"/>
    <SCHEMA ID="REQ.DIR" FILE="REQ.DIR.xml" DEFINITION="MESSAGE-TYPE.MESSAGE-SUBTYPE"/>
    <SCHEMA ID="RESP.DIR" FILE="RESP.DIR.xml" DEFINITION="MESSAGE-TYPE.MESSAGE-SUBTYPE"/>
</DIRECTORY>
"#;

pub const MSG_HB_XML: &str = r#"<SCHEMA NAME="MSG.HB" DEFINITION="MESSAGE-TYPE.MESSAGE-SUBTYPE" SUBJECT="C2MS.MISSION-ID.SAT-ID-PHYSICAL.MESSAGE-TYPE.MESSAGE-SUBTYPE.COMPONENT">
    <INCLUDE NAME="TRACKING"/>
    <FIELD NAME="MESSAGE-TYPE" MODE="REQUIRED" FIELD_CLASS="HEADER" TYPE="STRING" VALUE="MSG"/>
    <FIELD NAME="MESSAGE-SUBTYPE" MODE="REQUIRED" FIELD_CLASS="HEADER" TYPE="STRING" VALUE="HB"/>
    <FIELD NAME="PUB-RATE" MODE="REQUIRED" TYPE="U16,U32" VALUE="0..86400" DESCRIPTION="Publish rate in seconds"/>
    <FIELD NAME="COUNTER" MODE="REQUIRED" TYPE="U16,U32" DESCRIPTION="Rolling counter of published heartbeats"/>
    <FIELD NAME="SW-VERSION" MODE="OPTIONAL" TYPE="STRING"/>
</SCHEMA>
"#;

pub const MSG_LOG_XML: &str = r#"<SCHEMA NAME="MSG.LOG" DEFINITION="MESSAGE-TYPE.MESSAGE-SUBTYPE" SUBJECT="C2MS.MISSION-ID.SAT-ID-PHYSICAL.MESSAGE-TYPE.MESSAGE-SUBTYPE.COMPONENT">
    <INCLUDE NAME="TRACKING"/>
    <FIELD NAME="MESSAGE-TYPE" MODE="REQUIRED" FIELD_CLASS="HEADER" TYPE="STRING" VALUE="MSG"/>
    <FIELD NAME="MESSAGE-SUBTYPE" MODE="REQUIRED" FIELD_CLASS="HEADER" TYPE="STRING" VALUE="LOG"/>
    <FIELD NAME="SEVERITY" MODE="REQUIRED" TYPE="I16" VALUE="0..5" DESCRIPTION="Log severity"/>
    <FIELD NAME="MSG-TEXT" MODE="REQUIRED" TYPE="STRING"/>
    <FIELD NAME="EVENT-TIME" MODE="OPTIONAL" TYPE="STRING" PATTERN="TIME_Type"/>
    <FIELD NAME="OCCURRENCE-TYPE" MODE="OPTIONAL" TYPE="STRING"/>
</SCHEMA>
"#;

pub const MSG_RSRC_XML: &str = r#"<SCHEMA NAME="MSG.RSRC" DEFINITION="MESSAGE-TYPE.MESSAGE-SUBTYPE" SUBJECT="C2MS.MISSION-ID.SAT-ID-PHYSICAL.MESSAGE-TYPE.MESSAGE-SUBTYPE.COMPONENT">
    <INCLUDE NAME="TRACKING"/>
    <FIELD NAME="MESSAGE-TYPE" MODE="REQUIRED" FIELD_CLASS="HEADER" TYPE="STRING" VALUE="MSG"/>
    <FIELD NAME="MESSAGE-SUBTYPE" MODE="REQUIRED" FIELD_CLASS="HEADER" TYPE="STRING" VALUE="RSRC"/>
    <FIELD NAME="PUB-RATE" MODE="REQUIRED" TYPE="U16,U32" VALUE="0..86400"/>
    <FIELD NAME="COUNTER" MODE="REQUIRED" TYPE="U16,U32"/>
    <FIELD NAME="OPER-SYS" MODE="OPTIONAL" TYPE="STRING"/>
    <FIELD NAME="NUM-OF-CPUS" MODE="OPTIONAL" TYPE="U16"/>
    <FIELD NAME="CPU" MODE="OPTIONAL" TYPE="CONTAINER" PREFIX="CPU" SIZE="NUM-OF-CPUS">
        <FIELD NAME="UTIL-PERCENT" MODE="REQUIRED" TYPE="F32" VALUE="0..100"/>
    </FIELD>
    <FIELD NAME="MEM-UTIL-PERCENT" MODE="OPTIONAL" TYPE="F32" VALUE="0..100"/>
    <FIELD NAME="UPTIME" MODE="OPTIONAL" TYPE="U32" DESCRIPTION="Seconds since system boot"/>
</SCHEMA>
"#;

pub const REQ_DIR_XML: &str = r#"<SCHEMA NAME="REQ.DIR" DEFINITION="MESSAGE-TYPE.MESSAGE-SUBTYPE" SUBJECT="C2MS.MISSION-ID.SAT-ID-PHYSICAL.MESSAGE-TYPE.MESSAGE-SUBTYPE.COMPONENT">
    <INCLUDE NAME="TRACKING"/>
    <FIELD NAME="MESSAGE-TYPE" MODE="REQUIRED" FIELD_CLASS="HEADER" TYPE="STRING" VALUE="REQ"/>
    <FIELD NAME="MESSAGE-SUBTYPE" MODE="REQUIRED" FIELD_CLASS="HEADER" TYPE="STRING" VALUE="DIR"/>
    <FIELD NAME="DIRECTIVE-STRING" MODE="REQUIRED" TYPE="STRING"/>
    <FIELD NAME="DESTINATION-COMPONENT" MODE="REQUIRED" TYPE="STRING" PATTERN="HEADER_STRING_Type"/>
    <FIELD NAME="REQUEST-ID" MODE="REQUIRED" TYPE="U16,U32"/>
    <FIELD NAME="RESPONSE" MODE="OPTIONAL" TYPE="BOOL" DESCRIPTION="Whether a reply is expected"/>
</SCHEMA>
"#;

pub const RESP_DIR_XML: &str = r#"<SCHEMA NAME="RESP.DIR" DEFINITION="MESSAGE-TYPE.MESSAGE-SUBTYPE" SUBJECT="C2MS.MISSION-ID.SAT-ID-PHYSICAL.MESSAGE-TYPE.MESSAGE-SUBTYPE.COMPONENT">
    <INCLUDE NAME="TRACKING"/>
    <FIELD NAME="MESSAGE-TYPE" MODE="REQUIRED" FIELD_CLASS="HEADER" TYPE="STRING" VALUE="RESP"/>
    <FIELD NAME="MESSAGE-SUBTYPE" MODE="REQUIRED" FIELD_CLASS="HEADER" TYPE="STRING" VALUE="DIR"/>
    <FIELD NAME="RESPONSE-STATUS" MODE="REQUIRED" TYPE="I16" VALUE="1..6" DESCRIPTION="Acknowledgement or final status"/>
    <FIELD NAME="REQUEST-ID" MODE="OPTIONAL" TYPE="U16,U32"/>
    <FIELD NAME="DATA" MODE="OPTIONAL" TYPE="STRING"/>
</SCHEMA>
"#;

pub const ADDENDUM_DIRECTORY_XML: &str = r#"<DIRECTORY>
    <SCHEMA ID="MSG.LOG" FILE="MSG.LOG.xml"/>
    <SCHEMA ID="MSG.TLM" FILE="MSG.TLM.xml"/>
</DIRECTORY>
"#;

pub const ADDENDUM_MSG_LOG_XML: &str = r#"<SCHEMA NAME="MSG.LOG" DEFINITION="MESSAGE-TYPE.MESSAGE-SUBTYPE" SUBJECT="C2MS.MISSION-ID.SAT-ID-PHYSICAL.MESSAGE-TYPE.MESSAGE-SUBTYPE.COMPONENT">
    <INCLUDE NAME="TRACKING"/>
    <FIELD NAME="MESSAGE-TYPE" MODE="REQUIRED" FIELD_CLASS="HEADER" TYPE="STRING" VALUE="MSG"/>
    <FIELD NAME="MESSAGE-SUBTYPE" MODE="REQUIRED" FIELD_CLASS="HEADER" TYPE="STRING" VALUE="LOG"/>
    <FIELD NAME="SUBCLASS" MODE="REQUIRED" TYPE="STRING" DESCRIPTION="Mission log subclass"/>
    <FIELD NAME="SEVERITY" MODE="REQUIRED" TYPE="I16" VALUE="0..5"/>
    <FIELD NAME="MSG-TEXT" MODE="REQUIRED" TYPE="STRING"/>
</SCHEMA>
"#;

pub const ADDENDUM_MSG_TLM_XML: &str = r#"<SCHEMA NAME="MSG.TLM" DEFINITION="MESSAGE-TYPE.MESSAGE-SUBTYPE" SUBJECT="C2MS.MISSION-ID.SAT-ID-PHYSICAL.MESSAGE-TYPE.MESSAGE-SUBTYPE.COMPONENT">
    <FIELD NAME="MESSAGE-TYPE" MODE="REQUIRED" FIELD_CLASS="HEADER" TYPE="STRING" VALUE="MSG"/>
    <FIELD NAME="MESSAGE-SUBTYPE" MODE="REQUIRED" FIELD_CLASS="HEADER" TYPE="STRING" VALUE="TLM"/>
    <FIELD NAME="FORMAT" MODE="REQUIRED" TYPE="STRING" VALUE="CCSDS_PACKET,CCSDS_FRAME"/>
    <FIELD NAME="DATA" MODE="REQUIRED" TYPE="BIN"/>
</SCHEMA>
"#;

static NEXT_DIR_ID: AtomicUsize = AtomicUsize::new(0);

/// Writes `(relative path, content)` pairs into a fresh unique directory
/// under the system temp dir and returns its root.
pub fn write_template_tree(files: &[(&str, &str)]) -> PathBuf {
    let root = std::env::temp_dir().join(format!(
        "gmsec-templates-{}-{}",
        std::process::id(),
        NEXT_DIR_ID.fetch_add(1, Ordering::Relaxed),
    ));
    for (rel, content) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
    }
    root
}

pub fn write_standard_templates() -> PathBuf {
    write_template_tree(&[
        ("2019.00/0/.DIRECTORY.xml", DIRECTORY_XML),
        ("2019.00/0/Header.xsd", HEADER_XSD),
        ("2019.00/0/Fields.xsd", FIELDS_XSD),
        ("2019.00/0/Defaults.xsd", DEFAULTS_XSD),
        ("2019.00/0/MSG.HB.xml", MSG_HB_XML),
        ("2019.00/0/MSG.LOG.xml", MSG_LOG_XML),
        ("2019.00/0/MSG.RSRC.xml", MSG_RSRC_XML),
        ("2019.00/0/REQ.DIR.xml", REQ_DIR_XML),
        ("2019.00/0/RESP.DIR.xml", RESP_DIR_XML),
        ("2019.00/1/.DIRECTORY.xml", ADDENDUM_DIRECTORY_XML),
        ("2019.00/1/MSG.LOG.xml", ADDENDUM_MSG_LOG_XML),
        ("2019.00/1/MSG.TLM.xml", ADDENDUM_MSG_TLM_XML),
    ])
}
