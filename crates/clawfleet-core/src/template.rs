//! Name templates for pattern rules.
//!
//! A template is literal text around exactly one integer placeholder:
//! `{n}` or `{n:0W}` (zero padded to width W). A trailing `d` as in
//! `{n:03d}` is accepted. `{}` is shorthand for `{n}`.

use std::fmt;

use crate::error::{CoreError, CoreResult};
use crate::types::{is_name_char, validate_name};

const MAX_WIDTH: usize = 10;

/// A validated name template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTemplate {
    prefix: String,
    suffix: String,
    width: usize,
}

impl NameTemplate {
    pub fn parse(pattern: &str) -> CoreResult<Self> {
        let invalid = |reason: &str| CoreError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        let open = pattern
            .find('{')
            .ok_or_else(|| invalid("missing {n} placeholder"))?;
        let close = pattern[open..]
            .find('}')
            .map(|i| open + i)
            .ok_or_else(|| invalid("unterminated placeholder"))?;

        let prefix = &pattern[..open];
        let inner = &pattern[open + 1..close];
        let suffix = &pattern[close + 1..];

        if suffix.contains('{') || suffix.contains('}') || prefix.contains('}') {
            return Err(invalid("exactly one placeholder is allowed"));
        }
        if let Some(c) = prefix.chars().chain(suffix.chars()).find(|c| !is_name_char(*c)) {
            return Err(invalid(&format!("character {c:?} is not allowed in names")));
        }

        let width = parse_spec(inner).map_err(|reason| invalid(&reason))?;

        Ok(Self {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            width,
        })
    }

    /// Template for `create-range`: `<prefix>-{n}`.
    pub fn with_prefix(prefix: &str) -> CoreResult<Self> {
        validate_name(prefix)?;
        Ok(Self {
            prefix: format!("{prefix}-"),
            suffix: String::new(),
            width: 0,
        })
    }

    /// Render the name for `n`, validating the result.
    pub fn render(&self, n: u32) -> CoreResult<String> {
        let name = format!(
            "{}{:0width$}{}",
            self.prefix,
            n,
            self.suffix,
            width = self.width
        );
        validate_name(&name)?;
        Ok(name)
    }
}

impl fmt::Display for NameTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.width > 0 {
            write!(f, "{}{{n:0{}}}{}", self.prefix, self.width, self.suffix)
        } else {
            write!(f, "{}{{n}}{}", self.prefix, self.suffix)
        }
    }
}

/// Parse the text between the braces, returning the pad width.
fn parse_spec(inner: &str) -> Result<usize, String> {
    let format = match inner {
        "" | "n" => return Ok(0),
        _ => inner
            .strip_prefix("n:")
            .or_else(|| inner.strip_prefix(':'))
            .ok_or_else(|| format!("unknown placeholder {{{inner}}}, expected {{n}} or {{n:0W}}"))?,
    };

    let format = format.strip_suffix('d').unwrap_or(format);
    if format.is_empty() {
        return Ok(0);
    }
    let digits = format
        .strip_prefix('0')
        .ok_or_else(|| "only zero padding is supported, e.g. {n:03}".to_string())?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("invalid width in {{{inner}}}"));
    }
    let width: usize = digits
        .parse()
        .map_err(|_| format!("invalid width in {{{inner}}}"))?;
    if width > MAX_WIDTH {
        return Err(format!("width {width} exceeds {MAX_WIDTH}"));
    }
    Ok(width)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_padded_substitution() {
        let t = NameTemplate::parse("user-{n:03}").unwrap();
        assert_eq!(t.render(1).unwrap(), "user-001");
        assert_eq!(t.render(42).unwrap(), "user-042");
        assert_eq!(t.render(1234).unwrap(), "user-1234");
    }

    #[test]
    fn accepts_format_style_suffix() {
        let t = NameTemplate::parse("user-{n:03d}").unwrap();
        assert_eq!(t.render(7).unwrap(), "user-007");
    }

    #[test]
    fn plain_placeholder_with_suffix() {
        let t = NameTemplate::parse("node{n}_eu").unwrap();
        assert_eq!(t.render(12).unwrap(), "node12_eu");
        let t = NameTemplate::parse("w-{}").unwrap();
        assert_eq!(t.render(3).unwrap(), "w-3");
    }

    #[test]
    fn rejects_bad_templates() {
        for pattern in [
            "user",
            "user-{n",
            "user-{n}-{n}",
            "user-{x}",
            "user-{n:3}",
            "user-{n:0}",
            "user-{n:099}",
            "us er-{n}",
            "user/{n}",
        ] {
            assert!(NameTemplate::parse(pattern).is_err(), "{pattern}");
        }
    }

    #[test]
    fn leading_placeholder_renders_valid_name() {
        let t = NameTemplate::parse("{n:02}-worker").unwrap();
        assert_eq!(t.render(5).unwrap(), "05-worker");
    }

    #[test]
    fn prefix_template() {
        let t = NameTemplate::with_prefix("bot").unwrap();
        assert_eq!(t.render(5).unwrap(), "bot-5");
        assert_eq!(t.to_string(), "bot-{n}");
        assert!(NameTemplate::with_prefix("bad prefix").is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        let t = NameTemplate::parse("user-{n:04}").unwrap();
        assert_eq!(NameTemplate::parse(&t.to_string()).unwrap(), t);
    }
}
