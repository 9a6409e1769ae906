//! Bind-marker substitution and literal normalization
//!
//! Drivers hand statements over with their bind markers still in place
//! (`%s`, `%(name)s`, `?`, `$1`, `:name`). The parser only accepts complete
//! SQL, so every marker outside quoted text is swapped for a dummy literal
//! before parsing. Normalization goes one step further and also replaces
//! inline literals, so two statements that only differ by the values they
//! filter on compare equal. [`rewrite_markers`] hands every marker to a
//! callback, which is how captured parameters are inlined as literals.

/// Literal substituted for bind markers before parsing
pub const DUMMY_LITERAL: &str = "'dummy_value'";

/// Token standing in for every value in a normalized statement
pub const CANONICAL_TOKEN: &str = "?";

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Replace bind markers only, keep everything else verbatim
    Placeholders,
    /// Replace bind markers and literals, drop comments
    Normalize,
}

/// A bind marker found in statement text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindMarker {
    /// `%s` or `?`, with its 0-based position among such markers
    Positional(usize),
    /// `$n`, 1-based as written
    Numbered(usize),
    /// `%(name)s` or `:name`
    Named(String),
}

/// Replace every bind marker outside of quoted text with [`DUMMY_LITERAL`].
pub fn substitute_placeholders(sql: &str) -> String {
    rewrite(sql, Mode::Placeholders, &mut |_| DUMMY_LITERAL.to_string())
}

/// Replace every bind marker outside of quoted text with whatever `replace`
/// returns for it. Everything else is kept verbatim.
pub fn rewrite_markers(sql: &str, mut replace: impl FnMut(BindMarker) -> String) -> String {
    rewrite(sql, Mode::Placeholders, &mut replace)
}

/// Canonical form of a statement used to group repeated queries.
///
/// Bind markers, string literals and numeric literals all collapse to
/// [`CANONICAL_TOKEN`]; runs of whitespace collapse to a single space.
pub fn normalize(sql: &str) -> String {
    let rewritten = rewrite(sql, Mode::Normalize, &mut |_| CANONICAL_TOKEN.to_string());
    rewritten.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn rewrite(sql: &str, mode: Mode, replace: &mut dyn FnMut(BindMarker) -> String) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut positional = 0;

    let mut out = String::with_capacity(sql.len() + 16);
    let mut i = 0;
    // Whether the previous emitted character belongs to an identifier
    let mut in_word = false;

    while i < chars.len() {
        let c = chars[i];

        match c {
            '\'' => {
                let end = skip_quoted(&chars, i, '\'');
                match mode {
                    Mode::Placeholders => out.extend(&chars[i..end]),
                    Mode::Normalize => out.push_str(CANONICAL_TOKEN),
                }
                i = end;
                in_word = false;
                continue;
            }
            '"' | '`' => {
                let end = skip_quoted(&chars, i, c);
                out.extend(&chars[i..end]);
                i = end;
                in_word = true;
                continue;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                let end = chars[i..]
                    .iter()
                    .position(|&ch| ch == '\n')
                    .map(|p| i + p)
                    .unwrap_or(chars.len());
                if mode == Mode::Placeholders {
                    out.extend(&chars[i..end]);
                } else {
                    out.push(' ');
                }
                i = end;
                in_word = false;
                continue;
            }
            '%' => match chars.get(i + 1) {
                Some('s') => {
                    out.push_str(&replace(BindMarker::Positional(positional)));
                    positional += 1;
                    i += 2;
                    in_word = false;
                    continue;
                }
                Some('%') => {
                    out.push('%');
                    i += 2;
                    in_word = false;
                    continue;
                }
                Some('(') => {
                    if let Some(end) = named_pyformat_end(&chars, i) {
                        let name: String = chars[i + 2..end - 2].iter().collect();
                        out.push_str(&replace(BindMarker::Named(name)));
                        i = end;
                        in_word = false;
                        continue;
                    }
                }
                _ => {}
            },
            '?' => {
                out.push_str(&replace(BindMarker::Positional(positional)));
                positional += 1;
                i += 1;
                in_word = false;
                continue;
            }
            '$' if !in_word && chars.get(i + 1).is_some_and(|ch| ch.is_ascii_digit()) => {
                let mut end = i + 1;
                while end < chars.len() && chars[end].is_ascii_digit() {
                    end += 1;
                }
                let number: String = chars[i + 1..end].iter().collect();
                let number = number.parse().unwrap_or(usize::MAX);
                out.push_str(&replace(BindMarker::Numbered(number)));
                i = end;
                in_word = false;
                continue;
            }
            ':' if !in_word
                && (i == 0 || chars[i - 1] != ':')
                && chars
                    .get(i + 1)
                    .is_some_and(|ch| ch.is_ascii_alphabetic() || *ch == '_') =>
            {
                let mut end = i + 1;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_')
                {
                    end += 1;
                }
                let name: String = chars[i + 1..end].iter().collect();
                out.push_str(&replace(BindMarker::Named(name)));
                i = end;
                in_word = false;
                continue;
            }
            _ if mode == Mode::Normalize && !in_word && c.is_ascii_digit() => {
                let mut end = i;
                while end < chars.len() && (chars[end].is_ascii_digit() || chars[end] == '.') {
                    end += 1;
                }
                out.push_str(CANONICAL_TOKEN);
                i = end;
                in_word = false;
                continue;
            }
            _ => {}
        }

        out.push(c);
        in_word = c.is_alphanumeric() || c == '_';
        i += 1;
    }

    out
}

/// Index one past the closing quote of the quoted run starting at `start`.
/// Doubled quotes inside the run are escapes.
fn skip_quoted(chars: &[char], start: usize, quote: char) -> usize {
    let mut j = start + 1;
    while j < chars.len() {
        if chars[j] == quote {
            if chars.get(j + 1) == Some(&quote) {
                j += 2;
                continue;
            }
            return j + 1;
        }
        j += 1;
    }
    chars.len()
}

/// End of a `%(name)s` marker starting at `start`, if it is one.
fn named_pyformat_end(chars: &[char], start: usize) -> Option<usize> {
    let close = chars[start + 2..].iter().position(|&ch| ch == ')')? + start + 2;
    let name = &chars[start + 2..close];
    if name.is_empty() || !name.iter().all(|ch| ch.is_alphanumeric() || *ch == '_') {
        return None;
    }
    (chars.get(close + 1) == Some(&'s')).then_some(close + 2)
}
