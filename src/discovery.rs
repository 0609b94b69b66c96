//! Module config discovery and parsing.
//!
//! A tests directory is flat: every `<name>.config` file in it is one test
//! module named `<name>`. Discovery lists those files; parsing turns one into
//! a [`RawConfig`] whose test object has been created from the
//! [`ClassRegistry`] and configured with the config's `<option>` values.
//!
//! ```text
//! tests_dir/
//! ├── FooModuleA.config   ──► RawConfig { test: Plain(TestStub), .. }
//! ├── FooModuleB.config
//! ├── FooModuleC.config   ──► preparers: [TokenRequirement { "foobar" }]
//! └── suite.config        (reserved, never a module)
//! ```
//!
//! The same `RawConfig` is cloned once per ABI by the index; parsing happens
//! at most once per file.

mod parser;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::module::{Metadata, PreparerSpec};
use crate::options::OptionError;
use crate::runnable::{ClassRegistry, Test};

/// Extension of module config files.
pub const CONFIG_EXT: &str = ".config";

/// Config files that live next to modules but describe the suite itself.
pub const RESERVED_CONFIGS: &[&str] = &["suite.config", "common-compatibility-config.config"];

pub type ParseResult<T> = Result<T, ConfigParseError>;

/// Errors from reading or interpreting a module config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigParseError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not well-formed XML or has no `<configuration>` root.
    #[error("malformed config: {0}")]
    Xml(String),

    #[error("<{element}> is missing the '{attribute}' attribute")]
    MissingAttribute { element: String, attribute: String },

    #[error("config declares no <test>")]
    MissingTest,

    #[error("config declares {0} <test> elements, expected one")]
    MultipleTests(usize),

    /// A `TokenRequirement` preparer without a usable `token` option.
    #[error("preparer {0} does not name a token")]
    MissingToken(String),

    #[error("unknown test class '{0}'")]
    UnknownClass(String),

    #[error("invalid option for test class {class}: {source}")]
    InvalidOption {
        class: String,
        #[source]
        source: OptionError,
    },
}

/// A parsed module config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawConfig {
    pub description: String,
    pub metadata: Metadata,
    pub preparers: Vec<PreparerSpec>,
    /// The configured test, not yet bound to an abi.
    pub test: Test,
}

/// Lists module config files in `dir`, sorted by file name.
///
/// Hidden files and the reserved suite configs are skipped.
pub fn config_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if file_name.starts_with('.')
            || !file_name.ends_with(CONFIG_EXT)
            || RESERVED_CONFIGS.contains(&file_name)
        {
            continue;
        }
        files.push(path);
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    debug!("Found {} config files in {}", files.len(), dir.display());
    Ok(files)
}

/// The module name a config file defines: its file name minus `.config`.
pub fn module_name(path: &Path) -> Option<&str> {
    path.file_name()?.to_str()?.strip_suffix(CONFIG_EXT)
}

/// Names of modules in `dir` whose name contains `pattern`.
///
/// An exact name match wins over partial matches, so asking for `Foo` when
/// both `Foo` and `FooBar` exist returns only `Foo`.
pub fn module_names_matching(dir: &Path, pattern: &str) -> std::io::Result<Vec<String>> {
    let names: Vec<String> = config_files(dir)?
        .iter()
        .filter_map(|path| module_name(path))
        .filter(|name| name.contains(pattern))
        .map(str::to_string)
        .collect();
    if names.iter().any(|name| name == pattern) {
        return Ok(vec![pattern.to_string()]);
    }
    Ok(names)
}

/// Reads and parses a module config file.
pub fn parse_config(path: &Path, registry: &ClassRegistry) -> ParseResult<RawConfig> {
    let xml = fs::read_to_string(path).map_err(|source| ConfigParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config_str(&xml, registry)
}

/// Parses a module config document.
///
/// The test class must be registered and every `<option>` under `<test>`
/// must be declared by it.
pub fn parse_config_str(xml: &str, registry: &ClassRegistry) -> ParseResult<RawConfig> {
    let doc = parser::parse_document(xml)?;

    let mut test = registry
        .instantiate(&doc.test_class)
        .ok_or_else(|| ConfigParseError::UnknownClass(doc.test_class.clone()))?;
    for (name, value) in &doc.test_options {
        test.object_mut()
            .set_option(name, value)
            .map_err(|source| ConfigParseError::InvalidOption {
                class: doc.test_class.clone(),
                source,
            })?;
    }

    Ok(RawConfig {
        description: doc.description,
        metadata: doc.metadata,
        preparers: doc.preparers,
        test,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionKind;
    use crate::runnable::TestClass;
    use tempfile::TempDir;

    const STUB: &str = "com.example.TestStub";

    fn registry() -> ClassRegistry {
        ClassRegistry::new().with_class(
            STUB,
            TestClass::default()
                .with_option("foo", OptionKind::String)
                .with_option("list", OptionKind::List),
        )
    }

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    fn stub_config(module: &str) -> String {
        format!(
            r#"<configuration description="{module}">
                <test class="{STUB}"><option name="module" value="{module}" /></test>
            </configuration>"#
        )
    }

    #[test]
    fn test_config_files_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "FooModuleB.config", &stub_config("FooModuleB"));
        write(dir.path(), "FooModuleA.config", &stub_config("FooModuleA"));
        write(dir.path(), ".hidden.config", "");
        write(dir.path(), "suite.config", "");
        write(dir.path(), "common-compatibility-config.config", "");
        write(dir.path(), "README.txt", "");
        fs::create_dir(dir.path().join("nested.config")).unwrap();

        let files = config_files(dir.path()).unwrap();
        let names: Vec<_> = files.iter().filter_map(|p| module_name(p)).collect();
        assert_eq!(names, vec!["FooModuleA", "FooModuleB"]);
    }

    #[test]
    fn test_config_files_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert!(config_files(&dir.path().join("absent")).is_err());
    }

    #[test]
    fn test_module_names_matching() {
        let dir = TempDir::new().unwrap();
        for name in ["Foo", "FooBar", "BarFoo", "Other"] {
            write(dir.path(), &format!("{name}.config"), "");
        }

        assert_eq!(module_names_matching(dir.path(), "Foo").unwrap(), vec!["Foo"]);
        assert_eq!(
            module_names_matching(dir.path(), "Bar").unwrap(),
            vec!["BarFoo", "FooBar"]
        );
        assert!(module_names_matching(dir.path(), "Nope").unwrap().is_empty());
    }

    #[test]
    fn test_parse_config_applies_options() {
        let xml = format!(
            r#"<configuration description="desc">
                <test class="{STUB}">
                    <option name="foo" value="bar" />
                    <option name="list" value="a" />
                    <option name="list" value="b" />
                </test>
            </configuration>"#
        );
        let raw = parse_config_str(&xml, &registry()).unwrap();
        assert_eq!(raw.description, "desc");
        let options = raw.test.object().options();
        assert_eq!(options.get_str("foo"), Some("bar"));
        assert_eq!(options.get_list("list"), ["a", "b"]);
    }

    #[test]
    fn test_parse_config_unknown_class_and_option() {
        let unknown_class = r#"<configuration><test class="com.example.Missing" /></configuration>"#;
        assert!(matches!(
            parse_config_str(unknown_class, &registry()),
            Err(ConfigParseError::UnknownClass(c)) if c == "com.example.Missing"
        ));

        let unknown_option = format!(
            r#"<configuration><test class="{STUB}"><option name="nope" value="1" /></test></configuration>"#
        );
        assert!(matches!(
            parse_config_str(&unknown_option, &registry()),
            Err(ConfigParseError::InvalidOption { .. })
        ));
    }

    #[test]
    fn test_parse_config_rejects_overflowing_runtime_hint() {
        let xml = format!(
            r#"<configuration><test class="{STUB}">
                <option name="runtime-hint" value="99999999999999999h" />
            </test></configuration>"#
        );
        let err = parse_config_str(&xml, &registry()).unwrap_err();
        assert!(matches!(
            err,
            ConfigParseError::InvalidOption {
                source: OptionError::InvalidValue { ref name, .. },
                ..
            } if name == "runtime-hint"
        ));
    }

    #[test]
    fn test_parse_config_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "FooModuleA.config", &stub_config("FooModuleA"));
        let raw = parse_config(&dir.path().join("FooModuleA.config"), &registry()).unwrap();
        assert_eq!(raw.test.object().options().get_str("module"), Some("FooModuleA"));

        let missing = parse_config(&dir.path().join("Missing.config"), &registry());
        assert!(matches!(missing, Err(ConfigParseError::Io { .. })));
    }
}
