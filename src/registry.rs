// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Flag registry.
//!
//! A __flag__ is a symbolic toggle for one constant inside one configuration
//! file of an X2CRM installation. The registry maps each flag key to the file
//! holding the constant, and to a __locator pattern__ that finds the constant
//! and captures its current value.
//!
//! # Locator Patterns
//!
//! Locator patterns are used twice: by [`regex`] to read values in process,
//! and by `sed -E` to rewrite values in place. Thus, a locator must stick to
//! the syntax both of them agree on, i.e., POSIX extended regular expressions
//! with bracketed character classes like `[[:space:]]`. Backslash may only
//! escape metacharacters, and bracket expressions cannot nest, escape, or use
//! set operators. Matching runs line by line, the same way `sed` does. Each
//! locator has exactly two capture groups:
//!
//! 1. Constant name plus separator, kept verbatim on rewrite.
//! 2. Current value, replaced on rewrite and returned on read.
//!
//! # Built-in Registry
//!
//! The registry for stock X2CRM installations is compiled into the binary
//! from `data/flags.toml`. A registry file with the same layout can replace
//! it, so adding a new toggle never needs new code.

use crate::{
    config::{ConfigError, FlagEntry, RegistryDefinition},
    shell::pick_sed_delimiter,
};

use regex::{Regex, RegexBuilder};
use std::{
    borrow::Borrow,
    iter::Peekable,
    str::Chars,
    collections::HashMap,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
};
use tracing::debug;

const BUILTIN_REGISTRY: &str = include_str!("../data/flags.toml");

/// Symbolic flag identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlagKey(String);

impl FlagKey {
    /// Construct new flag key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Treat flag key as string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for FlagKey {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

impl Borrow<str> for FlagKey {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl From<&str> for FlagKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for FlagKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Validated registry entry.
#[derive(Debug, Clone)]
pub struct FlagDescriptor {
    key: FlagKey,
    description: String,
    target_path: PathBuf,
    locator: Regex,
    delimiter: char,
}

impl FlagDescriptor {
    /// Construct new flag descriptor.
    ///
    /// # Errors
    ///
    /// - Return [`RegistryError::EmptyKey`] if key is empty.
    /// - Return [`RegistryError::AbsolutePath`] if target path is absolute.
    /// - Return [`RegistryError::Locator`] if locator does not compile.
    /// - Return [`RegistryError::CaptureGroups`] if locator does not have
    ///   exactly two capture groups.
    /// - Return [`RegistryError::NonCapturingGroup`] if locator uses `(?`
    ///   syntax that `sed` does not understand.
    /// - Return [`RegistryError::UnportableSyntax`] if locator uses any other
    ///   syntax that `regex` and `sed -E` read differently.
    /// - Return [`RegistryError::NoDelimiter`] if no `sed` delimiter is free.
    pub fn new(
        key: impl Into<FlagKey>,
        target_path: impl Into<PathBuf>,
        locator: &str,
    ) -> Result<Self> {
        let key = key.into();
        let target_path = target_path.into();

        if key.as_str().is_empty() {
            return Err(RegistryError::EmptyKey);
        }

        if target_path.is_absolute() {
            return Err(RegistryError::AbsolutePath {
                key: key.to_string(),
                path: target_path,
            });
        }

        check_portable(&key, locator)?;

        let regex = RegexBuilder::new(locator)
            .multi_line(true)
            .build()
            .map_err(|err| RegistryError::Locator {
                source: err,
                key: key.to_string(),
            })?;

        // INVARIANT: Group zero is the whole match, so two groups means three.
        if regex.captures_len() != 3 {
            return Err(RegistryError::CaptureGroups {
                key: key.to_string(),
                found: regex.captures_len() - 1,
            });
        }

        let delimiter = pick_sed_delimiter(locator).ok_or_else(|| RegistryError::NoDelimiter {
            key: key.to_string(),
        })?;

        Ok(Self {
            key,
            description: String::new(),
            target_path,
            locator: regex,
            delimiter,
        })
    }

    /// Attach brief description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn key(&self) -> &FlagKey {
        &self.key
    }

    pub fn description(&self) -> &str {
        self.description.as_str()
    }

    /// Path of configuration file relative to installation root.
    pub fn target_path(&self) -> &Path {
        self.target_path.as_path()
    }

    /// Locator pattern as written.
    pub fn locator_pattern(&self) -> &str {
        self.locator.as_str()
    }

    /// Delimiter safe to use for `sed` instructions built from locator.
    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Extract current value of constant from file content.
    ///
    /// Returns captured value of first match, or [`None`] if nothing matches.
    pub fn extract<'a>(&self, content: &'a str) -> Option<&'a str> {
        content
            .split('\n')
            .find_map(|line| self.locator.captures(line).and_then(|captures| captures.get(2)))
            .map(|value| value.as_str())
    }

    /// Count assignments matching locator in file content.
    pub fn count_matches(&self, content: &str) -> usize {
        content
            .split('\n')
            .map(|line| self.locator.find_iter(line).count())
            .sum()
    }
}

/// Characters a backslash may escape in a locator.
const ESCAPABLE: &str = r"\.[]()*+?{}|^$/";

/// Reject locator syntax that `regex` and `sed -E` disagree on.
fn check_portable(key: &FlagKey, locator: &str) -> Result<()> {
    let unportable = |reason: String| RegistryError::UnportableSyntax {
        key: key.to_string(),
        reason,
    };

    let mut chars = locator.chars().peekable();
    let mut after_quantifier = false;
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) if ESCAPABLE.contains(escaped) => {}
                Some(escaped) => return Err(unportable(format!("escape \\{escaped}"))),
                None => return Err(unportable("trailing backslash".into())),
            },
            '(' if chars.peek() == Some(&'?') => {
                return Err(RegistryError::NonCapturingGroup {
                    key: key.to_string(),
                })
            }
            '?' if after_quantifier => return Err(unportable("lazy quantifier".into())),
            '[' => check_bracket(&mut chars).map_err(unportable)?,
            _ => {}
        }
        after_quantifier = matches!(c, '*' | '+' | '?' | '}');
    }

    Ok(())
}

/// Scan bracket expression up to and including its closing bracket.
fn check_bracket(chars: &mut Peekable<Chars<'_>>) -> Result<(), String> {
    chars.next_if_eq(&'^');
    chars.next_if_eq(&']');

    let mut previous = None;
    while let Some(c) = chars.next() {
        match c {
            ']' => return Ok(()),
            '\\' => return Err("backslash inside bracket expression".into()),
            '[' if chars.next_if_eq(&':').is_some() => {
                let name = chars.by_ref().take_while(|c| *c != ':').collect::<String>();
                if name.is_empty() || chars.next() != Some(']') {
                    return Err(format!("malformed character class [:{name}"));
                }
                previous = None;
                continue;
            }
            '[' => return Err("nested bracket expression".into()),
            '&' | '-' | '~' if previous == Some(c) => {
                return Err(format!("class set operator {c}{c}"))
            }
            _ => {}
        }
        previous = Some(c);
    }

    Err("unterminated bracket expression".into())
}

impl TryFrom<FlagEntry> for FlagDescriptor {
    type Error = RegistryError;

    fn try_from(entry: FlagEntry) -> Result<Self> {
        Ok(FlagDescriptor::new(entry.key, entry.path, entry.locator.as_str())?
            .with_description(entry.description))
    }
}

/// Process-wide table of known flags.
///
/// # Invariant
///
/// - Flag keys are unique.
/// - Every descriptor holds a valid locator.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    order: Vec<FlagKey>,
    flags: HashMap<FlagKey, FlagDescriptor>,
}

impl Registry {
    /// Construct new registry from a listing of descriptors.
    ///
    /// # Errors
    ///
    /// - Return [`RegistryError::DuplicateKey`] if two descriptors share a key.
    pub fn new(descriptors: impl IntoIterator<Item = FlagDescriptor>) -> Result<Self> {
        let mut registry = Self::default();
        for descriptor in descriptors {
            let key = descriptor.key().clone();
            if registry.flags.contains_key(&key) {
                return Err(RegistryError::DuplicateKey {
                    key: key.to_string(),
                });
            }
            registry.order.push(key.clone());
            registry.flags.insert(key, descriptor);
        }

        Ok(registry)
    }

    /// Load registry shipped with x2deploy for stock X2CRM installations.
    ///
    /// # Errors
    ///
    /// - Return [`RegistryError::Config`] if built-in data is malformed.
    /// - Return any validation error of [`Registry::from_definition`].
    pub fn builtin() -> Result<Self> {
        Self::from_definition(BUILTIN_REGISTRY.parse()?)
    }

    /// Load registry from file.
    ///
    /// # Errors
    ///
    /// - Return [`RegistryError::ReadFile`] if file cannot be read.
    /// - Return [`RegistryError::Config`] if file is malformed.
    /// - Return any validation error of [`Registry::from_definition`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        debug!("load flag registry: {:?}", path.as_ref().display());
        let content = read_to_string(path.as_ref()).map_err(|err| RegistryError::ReadFile {
            source: err,
            path: path.as_ref().into(),
        })?;

        Self::from_definition(content.parse()?)
    }

    /// Validate registry file layout into registry.
    ///
    /// # Errors
    ///
    /// - Return [`RegistryError`] if any entry fails validation.
    pub fn from_definition(definition: RegistryDefinition) -> Result<Self> {
        let descriptors = definition
            .flags
            .into_iter()
            .map(FlagDescriptor::try_from)
            .collect::<Result<Vec<_>>>()?;

        Self::new(descriptors)
    }

    /// Look up descriptor of flag.
    pub fn get(&self, key: &str) -> Option<&FlagDescriptor> {
        self.flags.get(key)
    }

    /// Iterate through descriptors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &FlagDescriptor> {
        self.order.iter().filter_map(|key| self.flags.get(key))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Flag registry error types.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Registry file cannot be read.
    #[error("failed to read flag registry at {:?}", path.display())]
    ReadFile {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Registry file layout is malformed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Flag entry has empty key.
    #[error("flag key cannot be empty")]
    EmptyKey,

    /// Two flag entries share the same key.
    #[error("flag {key:?} registered more than once")]
    DuplicateKey { key: String },

    /// Target path escapes installation root.
    #[error("flag {key:?} target path {:?} must be relative", path.display())]
    AbsolutePath { key: String, path: PathBuf },

    /// Locator is not a valid regular expression.
    #[error("flag {key:?} has invalid locator")]
    Locator {
        #[source]
        source: regex::Error,
        key: String,
    },

    /// Locator does not capture both name and value.
    #[error("flag {key:?} locator needs exactly 2 capture groups, found {found}")]
    CaptureGroups { key: String, found: usize },

    /// Locator uses group syntax unknown to `sed`.
    #[error("flag {key:?} locator cannot use (?...) groups")]
    NonCapturingGroup { key: String },

    /// Locator uses syntax that `regex` and `sed -E` read differently.
    #[error("flag {key:?} locator is not portable to sed: {reason}")]
    UnportableSyntax { key: String, reason: String },

    /// Locator uses every available `sed` delimiter.
    #[error("flag {key:?} locator leaves no free sed delimiter")]
    NoDelimiter { key: String },
}

/// Friendly result alias :3
pub type Result<T, E = RegistryError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn builtin_registry_is_valid() -> anyhow::Result<()> {
        let registry = Registry::builtin()?;
        assert!(!registry.is_empty());

        let debug = registry.get("d").expect("debug flag registered");
        assert_eq!(debug.target_path(), Path::new("constants.php"));

        Ok(())
    }

    #[test]
    fn builtin_locators_match_stock_constants() -> anyhow::Result<()> {
        let registry = Registry::builtin()?;
        let constants = indoc! {r#"
            <?php
            defined('YII_DEBUG') or define('YII_DEBUG',false);
            defined('YII_TRACE_LEVEL') or define('YII_TRACE_LEVEL',0);
            defined('YII_UNIT_TESTING') or define('YII_UNIT_TESTING',false);
            defined('X2_DEBUG_EMAIL') or define('X2_DEBUG_EMAIL',false);
            defined('PRO_VERSION') or define('PRO_VERSION',1);
        "#};

        let expect = [("d", "false"), ("l", "0"), ("u", "false"), ("e", "false")];
        for (key, value) in expect {
            let descriptor = registry.get(key).expect("flag registered");
            assert_eq!(descriptor.count_matches(constants), 1, "flag {key}");
            assert_eq!(descriptor.extract(constants), Some(value), "flag {key}");
        }

        Ok(())
    }

    #[test]
    fn descriptor_extracts_second_group() -> anyhow::Result<()> {
        let descriptor =
            FlagDescriptor::new("d", "constants.cfg", "(DEBUG_MODE',[[:space:]]*)([[:alnum:]_]+)")?;
        assert_eq!(descriptor.extract("DEBUG_MODE', false"), Some("false"));
        assert_eq!(descriptor.extract("NOTHING_HERE"), None);
        assert_eq!(descriptor.delimiter(), '/');

        Ok(())
    }

    #[test]
    fn descriptor_validation() {
        assert!(matches!(
            FlagDescriptor::new("", "constants.cfg", "(a)(b)"),
            Err(RegistryError::EmptyKey)
        ));
        assert!(matches!(
            FlagDescriptor::new("d", "/etc/constants.cfg", "(a)(b)"),
            Err(RegistryError::AbsolutePath { .. })
        ));
        assert!(matches!(
            FlagDescriptor::new("d", "constants.cfg", "(a"),
            Err(RegistryError::Locator { .. })
        ));
        assert!(matches!(
            FlagDescriptor::new("d", "constants.cfg", "(a)"),
            Err(RegistryError::CaptureGroups { found: 1, .. })
        ));
        assert!(matches!(
            FlagDescriptor::new("d", "constants.cfg", "(?:a)(b)(c)"),
            Err(RegistryError::NonCapturingGroup { .. })
        ));
        assert!(matches!(
            FlagDescriptor::new("d", "constants.cfg", "(/|#@%~!)(b)"),
            Err(RegistryError::NoDelimiter { .. })
        ));
    }

    #[test]
    fn descriptor_rejects_regex_only_syntax() {
        let rejected = [
            r"(A = )(\d+)",
            r"(A = )(\pL+)",
            r"\A(A = )(.*)",
            r"(A = )(.*)\",
            r"(A = )([^\]]*)",
            r"(A = )([a&&b])",
            r"(A = )([[a]b])",
            r"(A = )([[:alpha:]",
            r"(A = )(.+?)",
        ];
        for locator in rejected {
            assert!(
                matches!(
                    FlagDescriptor::new("d", "constants.cfg", locator),
                    Err(RegistryError::UnportableSyntax { .. })
                ),
                "locator {locator}"
            );
        }
        assert!(matches!(
            FlagDescriptor::new("d", "constants.cfg", "(?i)(a)(b)"),
            Err(RegistryError::NonCapturingGroup { .. })
        ));
    }

    #[test]
    fn descriptor_accepts_shared_syntax() -> anyhow::Result<()> {
        let accepted = [
            r"(a\(?)(b)",
            r"(\$host[[:space:]]*=[[:space:]]*)([^;]*)",
            r"(A = )([]a-z]+)",
            r"(A\.B = )([^]]*)",
            r"^(A = )(.{1,3})$",
        ];
        for locator in accepted {
            FlagDescriptor::new("d", "constants.cfg", locator)?;
        }

        Ok(())
    }

    #[test]
    fn descriptor_matches_line_by_line() -> anyhow::Result<()> {
        let descriptor = FlagDescriptor::new("h", "db.php", "(A = )([^;]*)")?;
        assert_eq!(descriptor.extract("A = x\nB;"), Some("x"));

        let descriptor = FlagDescriptor::new("h", "db.php", "^(A = )(.*)$")?;
        let content = "<?php\nA = one\nA = two\n";
        assert_eq!(descriptor.extract(content), Some("one"));
        assert_eq!(descriptor.count_matches(content), 2);

        Ok(())
    }

    #[test]
    fn registry_rejects_duplicate_keys() -> anyhow::Result<()> {
        let result = Registry::new([
            FlagDescriptor::new("d", "a.php", "(a)(b)")?,
            FlagDescriptor::new("d", "b.php", "(c)(d)")?,
        ]);
        assert!(matches!(result, Err(RegistryError::DuplicateKey { .. })));

        Ok(())
    }

    #[test]
    fn registry_keeps_registration_order() -> anyhow::Result<()> {
        let definition: RegistryDefinition = indoc! {r#"
            [[flag]]
            key = "z"
            path = "z.php"
            locator = "(z = )(.*)"

            [[flag]]
            key = "a"
            path = "a.php"
            locator = "(a = )(.*)"
        "#}
        .parse()?;
        let registry = Registry::from_definition(definition)?;
        let keys = registry
            .iter()
            .map(|descriptor| descriptor.key().to_string())
            .collect::<Vec<_>>();
        assert_eq!(keys, vec!["z".to_string(), "a".to_string()]);

        Ok(())
    }
}
