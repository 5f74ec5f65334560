//! Static safety gate for submitted source.
//!
//! Two jobs: reject source that would break sandbox or resource assumptions
//! before paying container costs, and discover stdin-reading call sites so
//! the runtime can guess when a program is waiting for input. The rejection
//! list is a coarse blocklist; the container is the real isolation boundary.
//!
//! Input-op discovery scans a comment- and literal-stripped view of the
//! source against a closed table of standard-library readers. A shallow
//! structural check (package clause, balanced delimiters, terminated
//! literals) guards the scan; sources that fail it are rejected as
//! unanalyzable.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{DISALLOWED_PATTERNS, MAX_CODE_SIZE, MAX_FUNCTION_COUNT, MAX_LOOP_COUNT};
use crate::errors::ValidationError;
use crate::types::InputOperation;

static BLOCKLIST: Lazy<Vec<Regex>> = Lazy::new(|| {
    DISALLOWED_PATTERNS
        .iter()
        .map(|pattern| Regex::new(pattern).expect("disallowed pattern must compile"))
        .collect()
});

static PACKAGE_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*package\s+[A-Za-z_][A-Za-z0-9_]*").expect("package clause pattern must compile"));

/// The closed set of standard-library input operations the gate looks for.
const INPUT_FUNCS: &[(&str, &str)] = &[
    ("fmt", "Scan"),
    ("fmt", "Scanf"),
    ("fmt", "Scanln"),
    ("fmt", "Fscan"),
    ("fmt", "Fscanf"),
    ("fmt", "Fscanln"),
    ("fmt", "Sscan"),
    ("fmt", "Sscanf"),
    ("fmt", "Sscanln"),
    ("bufio", "NewScanner"),
    ("os", "Stdin"),
];

struct InputPattern {
    package: &'static str,
    ident: &'static str,
    re: Regex,
}

static INPUT_PATTERNS: Lazy<Vec<InputPattern>> = Lazy::new(|| {
    INPUT_FUNCS
        .iter()
        .map(|&(package, ident)| {
            // os.Stdin is a value, not a callable, so it is matched on
            // reference rather than call position.
            let pattern = if (package, ident) == ("os", "Stdin") {
                format!(r"\b{package}\.{ident}\b")
            } else {
                format!(r"\b{package}\.{ident}\s*\(")
            };
            InputPattern {
                package,
                ident,
                re: Regex::new(&pattern).expect("input pattern must compile"),
            }
        })
        .collect()
});

/// Validate raw submission text against the rejection patterns and the
/// structural caps. Any match rejects; no analysis of the source is needed
/// to fail here.
pub fn validate(source: &str) -> Result<(), ValidationError> {
    if source.len() > MAX_CODE_SIZE {
        return Err(ValidationError::TooLarge);
    }
    for pattern in BLOCKLIST.iter() {
        if pattern.is_match(source) {
            return Err(ValidationError::Unsafe);
        }
    }
    if source.matches("func").count() > MAX_FUNCTION_COUNT {
        return Err(ValidationError::Unsafe);
    }
    if source.matches("for").count() > MAX_LOOP_COUNT {
        return Err(ValidationError::Unsafe);
    }
    Ok(())
}

/// Discover stdin-reading call sites.
///
/// Comments and string/rune literals are blanked out first so a mention of
/// `fmt.Scanln` in a string does not count as a read. Sources that fail the
/// structural check are reported as unanalyzable.
pub fn detect_input_ops(source: &str) -> Result<Vec<InputOperation>, ValidationError> {
    let stripped = strip_literals(source).map_err(ValidationError::Analysis)?;
    structural_check(&stripped).map_err(ValidationError::Analysis)?;

    let mut operations = Vec::new();
    for (index, line) in stripped.lines().enumerate() {
        for pattern in INPUT_PATTERNS.iter() {
            if pattern.re.is_match(line) {
                operations.push(InputOperation {
                    line: index + 1,
                    kind: format!("{}.{}", pattern.package, pattern.ident),
                    package: pattern.package.to_string(),
                });
            }
        }
    }
    Ok(operations)
}

/// Replace comments and string/rune literal contents with spaces, preserving
/// newlines so line numbers survive the transformation.
fn strip_literals(source: &str) -> Result<String, String> {
    enum State {
        Code,
        LineComment,
        BlockComment,
        Str,
        RawStr,
        Rune,
    }

    let mut out = String::with_capacity(source.len());
    let mut state = State::Code;
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    out.push_str("  ");
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push_str("  ");
                    state = State::BlockComment;
                }
                '"' => {
                    out.push(' ');
                    state = State::Str;
                }
                '`' => {
                    out.push(' ');
                    state = State::RawStr;
                }
                '\'' => {
                    out.push(' ');
                    state = State::Rune;
                }
                _ => out.push(c),
            },
            State::LineComment => {
                if c == '\n' {
                    out.push('\n');
                    state = State::Code;
                } else {
                    out.push(' ');
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("  ");
                    state = State::Code;
                } else if c == '\n' {
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            State::Str => match c {
                '\\' => {
                    if chars.next().is_none() {
                        return Err("unterminated string literal".to_string());
                    }
                    out.push_str("  ");
                }
                '"' => {
                    out.push(' ');
                    state = State::Code;
                }
                '\n' => return Err("newline in string literal".to_string()),
                _ => out.push(' '),
            },
            State::RawStr => {
                if c == '`' {
                    out.push(' ');
                    state = State::Code;
                } else if c == '\n' {
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            State::Rune => match c {
                '\\' => {
                    if chars.next().is_none() {
                        return Err("unterminated rune literal".to_string());
                    }
                    out.push_str("  ");
                }
                '\'' => {
                    out.push(' ');
                    state = State::Code;
                }
                '\n' => return Err("newline in rune literal".to_string()),
                _ => out.push(' '),
            },
        }
    }

    match state {
        State::Code | State::LineComment => Ok(out),
        State::BlockComment => Err("unterminated block comment".to_string()),
        State::Str => Err("unterminated string literal".to_string()),
        State::RawStr => Err("unterminated raw string literal".to_string()),
        State::Rune => Err("unterminated rune literal".to_string()),
    }
}

/// Shallow parse: a leading package clause and balanced delimiters. Runs on
/// the stripped view so literals cannot confuse the counts.
fn structural_check(stripped: &str) -> Result<(), String> {
    if !PACKAGE_CLAUSE.is_match(stripped) {
        return Err("expected package clause".to_string());
    }

    let mut stack = Vec::new();
    for c in stripped.chars() {
        match c {
            '(' | '[' | '{' => stack.push(c),
            ')' => {
                if stack.pop() != Some('(') {
                    return Err("unbalanced ')'".to_string());
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return Err("unbalanced ']'".to_string());
                }
            }
            '}' => {
                if stack.pop() != Some('{') {
                    return Err("unbalanced '}'".to_string());
                }
            }
            _ => {}
        }
    }
    if !stack.is_empty() {
        return Err("missing closing delimiter".to_string());
    }
    Ok(())
}
