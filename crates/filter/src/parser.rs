//! Filter string → [`FilterExpression`].

use regex::{Regex, RegexBuilder};

use mc_domain::error::{Error, Result};

const OR: &str = " or ";
const AND: &str = " and ";

/// A parsed filter: an OR of AND-groups of predicates.
#[derive(Debug, Clone)]
pub struct FilterExpression {
    pub(crate) any_of: Vec<Vec<Predicate>>,
}

/// One field test.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Empty predicate; matches every device.
    All,
    User(String),
    Ip(String),
    Group(String),
    /// Empty value matches devices without tags.
    Tag(String),
    /// Empty value matches devices without an agent tag.
    AgentTag(String),
    Os(String),
    /// `None` matches any device reporting an AMT state.
    Amt(Option<u8>),
    /// Empty value matches devices with a non-empty description.
    Desc(String),
    Wsc(WscCheck),
    Name(Regex),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WscCheck {
    /// Antivirus, updates and firewall all OK.
    Ok,
    NoAntiVirus,
    NoUpdate,
    NoFirewall,
    /// At least one of the three not OK.
    Any,
}

impl FilterExpression {
    /// Parse a filter string. The empty string matches everything.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedFilter`] for an unknown `prefix:` or an invalid
    /// `amt:`/`wsc:` value.
    pub fn parse(input: &str) -> Result<Self> {
        let any_of = split_ci(input, OR)
            .into_iter()
            .map(|group| {
                split_ci(group, AND)
                    .into_iter()
                    .map(parse_predicate)
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { any_of })
    }

    /// The OR-groups, each an AND of predicates.
    pub fn groups(&self) -> &[Vec<Predicate>] {
        &self.any_of
    }
}

/// Split on `sep`, matching it case-insensitively.
fn split_ci<'a>(input: &'a str, sep: &str) -> Vec<&'a str> {
    // ASCII lower-casing keeps byte offsets aligned with `input`.
    let lowered = input.to_ascii_lowercase();
    let mut parts = Vec::new();
    let mut start = 0;
    while let Some(pos) = lowered[start..].find(sep) {
        parts.push(&input[start..start + pos]);
        start += pos + sep.len();
    }
    parts.push(&input[start..]);
    parts
}

fn parse_predicate(raw: &str) -> Result<Predicate> {
    let text = raw.trim();
    if text.is_empty() {
        return Ok(Predicate::All);
    }

    let Some((prefix, value)) = text
        .split_once(':')
        .filter(|(p, _)| !p.is_empty() && p.chars().all(|c| c.is_ascii_alphabetic()))
    else {
        return name_regex(text).map(Predicate::Name);
    };

    let value = value.trim();
    let lowered = value.to_lowercase();
    let predicate = match prefix.to_ascii_lowercase().as_str() {
        "user" | "u" => Predicate::User(lowered),
        "ip" => Predicate::Ip(lowered),
        "group" | "g" => Predicate::Group(lowered),
        "tag" | "t" => Predicate::Tag(lowered),
        "atag" => Predicate::AgentTag(lowered),
        "os" => Predicate::Os(lowered),
        "desc" => Predicate::Desc(lowered),
        "amt" => Predicate::Amt(parse_amt(value)?),
        "wsc" => Predicate::Wsc(parse_wsc(&lowered)?),
        _ => {
            return Err(Error::UnsupportedFilter(format!(
                "unknown prefix '{prefix}:' in '{text}'"
            )))
        }
    };
    Ok(predicate)
}

fn parse_amt(value: &str) -> Result<Option<u8>> {
    match value {
        "" => Ok(None),
        "0" | "1" | "2" => Ok(value.parse().ok()),
        other => Err(Error::UnsupportedFilter(format!(
            "amt: expects 0, 1 or 2, got '{other}'"
        ))),
    }
}

fn parse_wsc(value: &str) -> Result<WscCheck> {
    match value {
        "ok" => Ok(WscCheck::Ok),
        "noav" => Ok(WscCheck::NoAntiVirus),
        "noupdate" => Ok(WscCheck::NoUpdate),
        "nofirewall" => Ok(WscCheck::NoFirewall),
        "any" => Ok(WscCheck::Any),
        other => Err(Error::UnsupportedFilter(format!(
            "wsc: expects ok, noav, noupdate, nofirewall or any, got '{other}'"
        ))),
    }
}

/// Case-insensitive name regex. Text that is not a valid pattern is
/// searched literally.
fn name_regex(text: &str) -> Result<Regex> {
    let build = |pattern: &str| RegexBuilder::new(pattern).case_insensitive(true).build();
    build(text)
        .or_else(|e| {
            tracing::debug!(pattern = %text, error = %e, "invalid name pattern, matching literally");
            build(&regex::escape(text))
        })
        .map_err(|e| Error::UnsupportedFilter(format!("name pattern '{text}': {e}")))
}
