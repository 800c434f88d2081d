// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Quoting and escaping rules.
//!
//! Two boundaries need text escaped before it crosses them: the remote shell
//! that SSH hands its command line to, and the replacement side of a `sed`
//! substitution instruction.

/// Delimiters tried, in order, for `sed` substitution instructions.
pub const SED_DELIMITERS: [char; 7] = ['/', '|', '#', '@', '%', '~', '!'];

/// Quote a word for a POSIX shell.
///
/// Wraps the word in single quotes. A single quote inside the word closes
/// the quoted string, emits an escaped quote, and reopens it, i.e., `'`
/// becomes `'\''`. Nothing else is special inside single quotes.
pub fn shell_quote(word: &str) -> String {
    let mut quoted = String::with_capacity(word.len() + 2);
    quoted.push('\'');
    for ch in word.chars() {
        if ch == '\'' {
            quoted.push_str(r"'\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

/// Pick first delimiter from [`SED_DELIMITERS`] that never occurs in pattern.
pub fn pick_sed_delimiter(pattern: &str) -> Option<char> {
    SED_DELIMITERS
        .into_iter()
        .find(|delimiter| !pattern.contains(*delimiter))
}

/// Escape text for the replacement side of a `sed` substitution.
///
/// Backslash, ampersand, and the active delimiter are made literal. Returns
/// [`None`] if text spans multiple lines.
pub fn escape_sed_replacement(text: &str, delimiter: char) -> Option<String> {
    if text.contains(['\n', '\r']) {
        return None;
    }

    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch == '\\' || ch == '&' || ch == delimiter {
            escaped.push('\\');
        }
        escaped.push(ch);
    }

    Some(escaped)
}

/// Build `sed` instruction that keeps the first capture group of the locator
/// and replaces the second with the given value.
///
/// Returns [`None`] if value spans multiple lines.
pub fn sed_substitution(locator: &str, delimiter: char, value: &str) -> Option<String> {
    let value = escape_sed_replacement(value, delimiter)?;
    Some(format!("s{delimiter}{locator}{delimiter}\\1{value}{delimiter}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    #[test_case("plain", "'plain'"; "plain word")]
    #[test_case("", "''"; "empty word")]
    #[test_case("two words", "'two words'"; "whitespace")]
    #[test_case("it's", r"'it'\''s'"; "single quote")]
    #[test_case("$HOME `id` \"x\"", "'$HOME `id` \"x\"'"; "shell metacharacters")]
    #[test]
    fn shell_quote_word(word: &str, expect: &str) {
        assert_eq!(shell_quote(word), expect);
    }

    #[test_case("(DEBUG_MODE',[[:space:]]*)([[:alnum:]_]+)", Some('/'); "no slash")]
    #[test_case("(url = )(http://[^ ]*)", Some('|'); "slash taken")]
    #[test_case("/|#@%~!", None; "every delimiter taken")]
    #[test]
    fn pick_delimiter(pattern: &str, expect: Option<char>) {
        assert_eq!(pick_sed_delimiter(pattern), expect);
    }

    #[test]
    fn escape_replacement_special_characters() {
        assert_eq!(
            escape_sed_replacement(r"a\b&c/d|e", '/'),
            Some(r"a\\b\&c\/d|e".to_string())
        );
        assert_eq!(
            escape_sed_replacement(r"a/b|c", '|'),
            Some(r"a/b\|c".to_string())
        );
        assert_eq!(escape_sed_replacement("two\nlines", '/'), None);
    }

    #[test]
    fn build_substitution_instruction() {
        let result = sed_substitution("(DEBUG_MODE',[[:space:]]*)([[:alnum:]_]+)", '/', "true");
        assert_eq!(
            result.as_deref(),
            Some(r"s/(DEBUG_MODE',[[:space:]]*)([[:alnum:]_]+)/\1true/")
        );
    }
}
