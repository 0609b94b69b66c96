//! Typed test options and command-line overrides.
//!
//! Test classes declare their options up front in an [`OptionSchema`]
//! (option name → [`OptionKind`]). Values are then applied by name, either
//! from `<option>` elements in a module config or from `--module-arg` /
//! `--test-arg` overrides, without any runtime reflection.
//!
//! # Override format
//!
//! Overrides arrive as `"<target>:<option>:<value>"` strings. The target is a
//! module name or module id for module args, and a test class name for test
//! args. [`parse_args`] groups them into an [`ArgMap`]; [`inject`] applies one
//! target's options onto an [`OptionSet`]:
//!
//! | Value shape | Scalar option | List option | Map option |
//! |-------------|---------------|-------------|------------|
//! | `value` | replaced (last wins) | appended verbatim | rejected |
//! | `key:=value` | rejected | rejected | `key` → `value` inserted |
//!
//! Rejected values and unknown option names are logged and skipped;
//! injection is best-effort per value.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Separator between a map key and its value inside an override value.
pub const MAP_SEPARATOR: &str = ":=";

/// Errors from setting or parsing option values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionError {
    /// The option is not declared by the target's schema.
    #[error("unknown option '{0}'")]
    Unknown(String),

    /// The value shape does not fit the declared kind.
    #[error("option '{name}' is a {kind} option and cannot take {shape}")]
    KindMismatch {
        name: String,
        kind: OptionKind,
        shape: &'static str,
    },

    /// The value cannot be parsed as the declared kind.
    #[error("invalid value '{value}' for {kind} option '{name}'")]
    InvalidValue {
        name: String,
        value: String,
        kind: OptionKind,
    },

    /// An override string is not `<target>:<option>:<value>`.
    #[error("could not parse argument '{0}', expected <target>:<option>:<value>")]
    MalformedArg(String),
}

/// The declared type of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    String,
    Bool,
    Int,
    Duration,
    List,
    Map,
}

impl OptionKind {
    fn is_scalar(self) -> bool {
        !matches!(self, OptionKind::List | OptionKind::Map)
    }
}

impl std::fmt::Display for OptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OptionKind::String => "string",
            OptionKind::Bool => "bool",
            OptionKind::Int => "int",
            OptionKind::Duration => "duration",
            OptionKind::List => "list",
            OptionKind::Map => "map",
        };
        f.write_str(name)
    }
}

/// Option name → declared kind.
pub type OptionSchema = BTreeMap<String, OptionKind>;

/// Target → option → values, as produced by [`parse_args`].
pub type ArgMap = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// A stored option value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    Scalar(String),
    List(Vec<String>),
    Map(BTreeMap<String, String>),
}

/// The option values of one test object, validated against its schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSet {
    schema: OptionSchema,
    values: BTreeMap<String, OptionValue>,
}

impl OptionSet {
    /// Creates an empty set for the given schema.
    pub fn new(schema: OptionSchema) -> Self {
        Self {
            schema,
            values: BTreeMap::new(),
        }
    }

    /// Returns the declared kind of an option.
    pub fn kind(&self, name: &str) -> Option<OptionKind> {
        self.schema.get(name).copied()
    }

    /// Applies a plain value: scalars are replaced, lists appended.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), OptionError> {
        let kind = self
            .kind(name)
            .ok_or_else(|| OptionError::Unknown(name.to_string()))?;

        match kind {
            OptionKind::List => {
                let entry = self
                    .values
                    .entry(name.to_string())
                    .or_insert_with(|| OptionValue::List(Vec::new()));
                if let OptionValue::List(items) = entry {
                    items.push(value.to_string());
                }
            }
            OptionKind::Map => {
                return Err(OptionError::KindMismatch {
                    name: name.to_string(),
                    kind,
                    shape: "a plain value",
                });
            }
            scalar => {
                validate_scalar(name, value, scalar)?;
                self.values
                    .insert(name.to_string(), OptionValue::Scalar(value.to_string()));
            }
        }
        Ok(())
    }

    /// Sets a duration option to an exact value.
    pub fn set_duration(&mut self, name: &str, value: Duration) -> Result<(), OptionError> {
        let kind = self
            .kind(name)
            .ok_or_else(|| OptionError::Unknown(name.to_string()))?;
        if kind != OptionKind::Duration {
            return Err(OptionError::KindMismatch {
                name: name.to_string(),
                kind,
                shape: "a duration",
            });
        }
        let text = format!("{}s{}ms", value.as_secs(), value.subsec_millis());
        self.values
            .insert(name.to_string(), OptionValue::Scalar(text));
        Ok(())
    }

    /// Inserts a key/value pair into a map option.
    pub fn set_entry(&mut self, name: &str, key: &str, value: &str) -> Result<(), OptionError> {
        let kind = self
            .kind(name)
            .ok_or_else(|| OptionError::Unknown(name.to_string()))?;
        if kind != OptionKind::Map {
            return Err(OptionError::KindMismatch {
                name: name.to_string(),
                kind,
                shape: "a key/value pair",
            });
        }

        let entry = self
            .values
            .entry(name.to_string())
            .or_insert_with(|| OptionValue::Map(BTreeMap::new()));
        if let OptionValue::Map(map) = entry {
            map.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    /// Returns the raw stored value.
    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.values.get(name)
    }

    /// Returns a scalar option as a string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.values.get(name)? {
            OptionValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get_str(name).and_then(|s| s.parse().ok())
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get_str(name).and_then(|s| s.parse().ok())
    }

    pub fn get_duration(&self, name: &str) -> Option<Duration> {
        self.get_str(name).and_then(parse_duration)
    }

    /// Returns a list option; unset lists are empty.
    pub fn get_list(&self, name: &str) -> &[String] {
        match self.values.get(name) {
            Some(OptionValue::List(items)) => items,
            _ => &[],
        }
    }

    /// Returns a map option, if any entry was set.
    pub fn get_map(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        match self.values.get(name)? {
            OptionValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Iterates over every option that has a value.
    pub fn values(&self) -> impl Iterator<Item = (&String, &OptionValue)> {
        self.values.iter()
    }
}

fn validate_scalar(name: &str, value: &str, kind: OptionKind) -> Result<(), OptionError> {
    debug_assert!(kind.is_scalar());
    let ok = match kind {
        OptionKind::Bool => value.parse::<bool>().is_ok(),
        OptionKind::Int => value.parse::<i64>().is_ok(),
        OptionKind::Duration => parse_duration(value).is_some(),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(OptionError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            kind,
        })
    }
}

/// Parses a duration such as `1m30s`, `250ms`, `2h` or bare milliseconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(millis) = value.parse::<u64>() {
        return Some(Duration::from_millis(millis));
    }

    let mut total = Duration::ZERO;
    let mut rest = value;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let amount: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let secs = |per_unit: u64| amount.checked_mul(per_unit).map(Duration::from_secs);
        let step = match unit {
            "ms" => Some(Duration::from_millis(amount)),
            "s" => Some(Duration::from_secs(amount)),
            "m" => secs(60),
            "h" => secs(3600),
            "d" => secs(86_400),
            _ => return None,
        }?;
        total = total.checked_add(step)?;
    }
    Some(total)
}

/// Applies an option map onto a set of options.
///
/// Values containing `:=` are treated as map entries; everything else is a
/// plain value. Failures are logged and skipped.
pub fn inject(option_map: &BTreeMap<String, Vec<String>>, target: &mut OptionSet) {
    for (name, values) in option_map {
        for value in values {
            let result = match value.split_once(MAP_SEPARATOR) {
                Some((key, entry)) => target.set_entry(name, key, entry),
                None => target.set(name, value),
            };
            match result {
                Ok(()) => debug!("Injected option {}={}", name, value),
                Err(e) => warn!("Skipping option {}={}: {}", name, value, e),
            }
        }
    }
}

/// Groups `"<target>:<option>:<value>"` strings by target and option.
///
/// Everything after the second `:` is the value, so `Mod:opt:key:=value`
/// keeps `key:=value` intact.
pub fn parse_args(args: &[String]) -> Result<ArgMap, OptionError> {
    let mut map = ArgMap::new();
    for arg in args {
        let mut parts = arg.splitn(3, ':');
        let (Some(target), Some(name), Some(value)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(OptionError::MalformedArg(arg.clone()));
        };
        if target.is_empty() || name.is_empty() {
            return Err(OptionError::MalformedArg(arg.clone()));
        }
        map.entry(target.to_string())
            .or_default()
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
    }
    Ok(map)
}

/// Merges the option maps of several targets; later targets replace the
/// value lists of earlier ones option by option.
pub fn merged_options<'a>(
    args: &'a ArgMap,
    targets: impl IntoIterator<Item = &'a str>,
) -> BTreeMap<String, Vec<String>> {
    let mut merged = BTreeMap::new();
    for target in targets {
        if let Some(options) = args.get(target) {
            for (name, values) in options {
                merged.insert(name.clone(), values.clone());
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inject_schema() -> OptionSchema {
        OptionSchema::from([
            ("simple-string".to_string(), OptionKind::String),
            ("list-string".to_string(), OptionKind::List),
            ("map-string".to_string(), OptionKind::Map),
            ("retries".to_string(), OptionKind::Int),
        ])
    }

    #[test]
    fn test_inject_string_list_and_map() {
        let mut options = OptionSet::new(inject_schema());
        let list = vec![
            "value2".to_string(),
            "value3".to_string(),
            "set-option:moreoption".to_string(),
        ];
        let option_map = BTreeMap::from([
            ("simple-string".to_string(), vec!["value1".to_string()]),
            ("list-string".to_string(), list.clone()),
            (
                "map-string".to_string(),
                vec!["set-option:=moreoption".to_string()],
            ),
        ]);

        inject(&option_map, &mut options);

        assert_eq!(options.get_str("simple-string"), Some("value1"));
        assert_eq!(options.get_list("list-string"), list.as_slice());
        let expected = BTreeMap::from([("set-option".to_string(), "moreoption".to_string())]);
        assert_eq!(options.get_map("map-string"), Some(&expected));
    }

    #[test]
    fn test_scalar_takes_last_value() {
        let mut options = OptionSet::new(inject_schema());
        let option_map = BTreeMap::from([(
            "simple-string".to_string(),
            vec!["first".to_string(), "second".to_string()],
        )]);
        inject(&option_map, &mut options);
        assert_eq!(options.get_str("simple-string"), Some("second"));
    }

    #[test]
    fn test_unknown_option_is_skipped() {
        let mut options = OptionSet::new(inject_schema());
        let option_map = BTreeMap::from([
            ("does-not-exist".to_string(), vec!["x".to_string()]),
            ("retries".to_string(), vec!["3".to_string()]),
        ]);
        inject(&option_map, &mut options);
        assert!(options.get("does-not-exist").is_none());
        assert_eq!(options.get_int("retries"), Some(3));
    }

    #[test]
    fn test_typed_scalar_rejects_garbage() {
        let mut options = OptionSet::new(inject_schema());
        let err = options.set("retries", "many").unwrap_err();
        assert!(matches!(err, OptionError::InvalidValue { .. }));
        assert!(options.get("retries").is_none());
    }

    #[test]
    fn test_map_needs_key() {
        let mut options = OptionSet::new(inject_schema());
        assert!(matches!(
            options.set("map-string", "plain"),
            Err(OptionError::KindMismatch { .. })
        ));
        assert!(matches!(
            options.set_entry("list-string", "k", "v"),
            Err(OptionError::KindMismatch { .. })
        ));
    }

    #[test]
    fn test_parse_args_groups_by_target() {
        let args = vec![
            "FooModuleA:blah:foobar".to_string(),
            "FooModuleA:blah:again".to_string(),
            "com.example.TestStub:foo:bar".to_string(),
            "FooModuleB:map-string:key:=value".to_string(),
        ];
        let map = parse_args(&args).unwrap();

        assert_eq!(map["FooModuleA"]["blah"], vec!["foobar", "again"]);
        assert_eq!(map["com.example.TestStub"]["foo"], vec!["bar"]);
        assert_eq!(map["FooModuleB"]["map-string"], vec!["key:=value"]);
    }

    #[test]
    fn test_parse_args_rejects_short_form() {
        let err = parse_args(&["FooModuleA:blah".to_string()]).unwrap_err();
        assert_eq!(err, OptionError::MalformedArg("FooModuleA:blah".to_string()));
    }

    #[test]
    fn test_merged_options_later_target_wins() {
        let args = parse_args(&[
            "FooModuleA:blah:by-name".to_string(),
            "FooModuleA:other:kept".to_string(),
            "arm64-v8a FooModuleA:blah:by-id".to_string(),
        ])
        .unwrap();
        let merged = merged_options(&args, ["FooModuleA", "arm64-v8a FooModuleA"]);
        assert_eq!(merged["blah"], vec!["by-id"]);
        assert_eq!(merged["other"], vec!["kept"]);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1500"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration("1m30s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("fast"), None);
        assert_eq!(parse_duration("5x"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_set_duration() {
        let mut options = OptionSet::new(OptionSchema::from([
            ("hint".to_string(), OptionKind::Duration),
            ("name".to_string(), OptionKind::String),
        ]));
        options
            .set_duration("hint", Duration::from_millis(90_250))
            .unwrap();
        assert_eq!(options.get_duration("hint"), Some(Duration::from_millis(90_250)));
        options.set_duration("hint", Duration::from_secs(u64::MAX)).unwrap();
        assert_eq!(options.get_duration("hint"), Some(Duration::from_secs(u64::MAX)));

        assert!(matches!(
            options.set_duration("name", Duration::from_secs(1)),
            Err(OptionError::KindMismatch { .. })
        ));
        assert!(matches!(
            options.set_duration("missing", Duration::from_secs(1)),
            Err(OptionError::Unknown(_))
        ));
    }

    #[test]
    fn test_parse_duration_overflow() {
        assert_eq!(parse_duration("99999999999999999h"), None);
        assert_eq!(parse_duration("9999999999999999999d"), None);
        assert_eq!(parse_duration("18446744073709551615s1s"), None);
        assert_eq!(
            parse_duration("18446744073709551615s"),
            Some(Duration::from_secs(u64::MAX))
        );
    }
}
