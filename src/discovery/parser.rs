//! Module config XML reader.
//!
//! Recognised elements:
//!
//! ```xml
//! <configuration description="Config for FooModuleA">
//!     <option name="config-descriptor:metadata" key="component" value="foo" />
//!     <target_preparer class="com.example.TokenRequirement">
//!         <option name="token" value="sim-card" />
//!     </target_preparer>
//!     <test class="com.example.TestStub">
//!         <option name="module" value="FooModuleA" />
//!     </test>
//! </configuration>
//! ```
//!
//! Anything else is skipped.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::debug;

use super::{ConfigParseError, ParseResult};
use crate::module::{Metadata, PreparerSpec};

const METADATA_OPTION: &str = "config-descriptor:metadata";
const TOKEN_PREPARER: &str = "TokenRequirement";
const TOKEN_OPTION: &str = "token";

/// The elements of a config document, before the test class is resolved.
#[derive(Debug, Default, PartialEq, Eq)]
pub(super) struct Document {
    pub description: String,
    pub metadata: Metadata,
    pub preparers: Vec<PreparerSpec>,
    pub test_class: String,
    pub test_options: Vec<(String, String)>,
}

enum Open {
    Preparer {
        class: String,
        options: Vec<(String, String)>,
    },
    Test {
        class: String,
        options: Vec<(String, String)>,
    },
}

pub(super) fn parse_document(xml: &str) -> ParseResult<Document> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut doc = Document::default();
    let mut open: Option<Open> = None;
    let mut tests = 0usize;
    let mut saw_root = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ConfigParseError::Xml(e.to_string()))?;
        match event {
            Event::Start(e) => {
                if let Some(element) = start_element(&e, &mut doc, &mut open, &mut saw_root)? {
                    open = Some(element);
                }
            }
            Event::Empty(e) => {
                if let Some(element) = start_element(&e, &mut doc, &mut open, &mut saw_root)? {
                    close_element(element, &mut doc, &mut tests)?;
                }
            }
            Event::End(e) => {
                let name = e.name();
                let closes_open = matches!(
                    (name.as_ref(), &open),
                    (b"target_preparer", Some(Open::Preparer { .. }))
                        | (b"test", Some(Open::Test { .. }))
                );
                if closes_open {
                    if let Some(element) = open.take() {
                        close_element(element, &mut doc, &mut tests)?;
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(ConfigParseError::Xml(
            "missing <configuration> root element".to_string(),
        ));
    }
    match tests {
        0 => Err(ConfigParseError::MissingTest),
        1 => Ok(doc),
        n => Err(ConfigParseError::MultipleTests(n)),
    }
}

fn start_element(
    e: &BytesStart<'_>,
    doc: &mut Document,
    open: &mut Option<Open>,
    saw_root: &mut bool,
) -> ParseResult<Option<Open>> {
    match e.name().as_ref() {
        b"configuration" => {
            *saw_root = true;
            doc.description = attribute(e, "description")?.unwrap_or_default();
            Ok(None)
        }
        b"target_preparer" | b"multi_target_preparer" => Ok(Some(Open::Preparer {
            class: required(e, "class")?,
            options: Vec::new(),
        })),
        b"test" => Ok(Some(Open::Test {
            class: required(e, "class")?,
            options: Vec::new(),
        })),
        b"option" => {
            let name = required(e, "name")?;
            match open {
                Some(Open::Preparer { options, .. }) | Some(Open::Test { options, .. }) => {
                    options.push((name, attribute(e, "value")?.unwrap_or_default()));
                }
                None if name == METADATA_OPTION => {
                    let key = required(e, "key")?;
                    let value = required(e, "value")?;
                    doc.metadata.entry(key).or_default().push(value);
                }
                None => debug!("Ignoring configuration option {}", name),
            }
            Ok(None)
        }
        other => {
            debug!("Ignoring element <{}>", String::from_utf8_lossy(other));
            Ok(None)
        }
    }
}

fn close_element(element: Open, doc: &mut Document, tests: &mut usize) -> ParseResult<()> {
    match element {
        Open::Preparer { class, options } => {
            if simple_name(&class) == TOKEN_PREPARER {
                let tokens: Vec<String> = options
                    .into_iter()
                    .filter(|(name, _)| name == TOKEN_OPTION)
                    .map(|(_, value)| value)
                    .collect();
                if tokens.is_empty() || tokens.iter().any(String::is_empty) {
                    return Err(ConfigParseError::MissingToken(class));
                }
                doc.preparers.extend(
                    tokens
                        .into_iter()
                        .map(|token| PreparerSpec::TokenRequirement { token }),
                );
            } else {
                doc.preparers.push(PreparerSpec::Generic { class, options });
            }
        }
        Open::Test { class, options } => {
            *tests += 1;
            doc.test_class = class;
            doc.test_options = options;
        }
    }
    Ok(())
}

fn simple_name(class: &str) -> &str {
    class.rsplit('.').next().unwrap_or(class)
}

fn attribute(e: &BytesStart<'_>, key: &str) -> ParseResult<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| ConfigParseError::Xml(err.to_string()))?;
        if attr.key.as_ref() == key.as_bytes() {
            let value = attr
                .unescape_value()
                .map_err(|err| ConfigParseError::Xml(err.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn required(e: &BytesStart<'_>, key: &str) -> ParseResult<String> {
    attribute(e, key)?.ok_or_else(|| ConfigParseError::MissingAttribute {
        element: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
        attribute: key.to_string(),
    })
}
