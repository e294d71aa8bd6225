//! Policy rules

use crate::descriptor::{DESCRIPTOR_FIELDS, Descriptor, Field};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Outcome of evaluating one rule against a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Permit,
    Prohibit,
    Ignore,
}

/// Errors parsing a rule line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleParseError {
    #[error("missing {field}")]
    MissingToken { field: &'static str },

    #[error("invalid {field} '{token}'")]
    InvalidNumber { field: &'static str, token: String },

    #[error("invalid permission '{0}', expected 0 or 1")]
    InvalidPermission(String),
}

/// A descriptor pattern plus an allow/deny bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rule {
    pattern: Descriptor,
    permission: bool,
}

impl Rule {
    pub fn new(pattern: Descriptor, permission: bool) -> Self {
        Self {
            pattern,
            permission,
        }
    }

    pub fn permit(pattern: Descriptor) -> Self {
        Self::new(pattern, true)
    }

    pub fn prohibit(pattern: Descriptor) -> Self {
        Self::new(pattern, false)
    }

    pub fn pattern(&self) -> &Descriptor {
        &self.pattern
    }

    pub fn permission(&self) -> bool {
        self.permission
    }

    pub fn evaluate(&self, candidate: &Descriptor) -> Verdict {
        if !self.pattern.relevant(candidate) {
            Verdict::Ignore
        } else if self.permission {
            Verdict::Permit
        } else {
            Verdict::Prohibit
        }
    }

    /// Render the rule as six tokens
    ///
    /// The readable form labels the pattern fields and prefixes the
    /// permission with `[PERMISSION]`; it still loads through
    /// [`Rule::parse_annotated`].
    pub fn render(&self, readable: bool) -> String {
        let label = if readable { "[PERMISSION]" } else { "" };
        format!(
            "{} {}{}",
            self.pattern.render(readable),
            label,
            u8::from(self.permission)
        )
    }

    /// Parse a line that may carry labels or other decoration
    ///
    /// Every character that is neither a digit nor whitespace is dropped
    /// before tokenizing.
    pub fn parse_annotated(line: &str) -> Result<Self, RuleParseError> {
        sanitize(line).parse()
    }
}

/// Keep only digits and whitespace (normalized to single spaces)
pub fn sanitize(line: &str) -> String {
    line.chars()
        .filter_map(|c| match c {
            '0'..='9' => Some(c),
            c if c.is_whitespace() => Some(' '),
            _ => None,
        })
        .collect()
}

impl FromStr for Rule {
    type Err = RuleParseError;

    /// Parse `bus port vendor product class permission`
    ///
    /// Tokens past the sixth are ignored.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut tokens = line.split_whitespace();
        let mut fields = [0u16; DESCRIPTOR_FIELDS];

        for field in Field::ALL {
            let label = field.label();
            let token = tokens
                .next()
                .ok_or(RuleParseError::MissingToken { field: label })?;
            fields[field as usize] = token.parse().map_err(|_| RuleParseError::InvalidNumber {
                field: label,
                token: token.to_string(),
            })?;
        }

        let permission = match tokens.next() {
            Some("0") => false,
            Some("1") => true,
            Some(other) => return Err(RuleParseError::InvalidPermission(other.to_string())),
            None => {
                return Err(RuleParseError::MissingToken {
                    field: "PERMISSION",
                });
            }
        };

        Ok(Self::new(Descriptor::from(fields), permission))
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::WILDCARD;
    use proptest::prelude::*;

    #[test]
    fn test_evaluate() {
        let rule = Rule::prohibit(Descriptor::new(WILDCARD, WILDCARD, 0x1234, WILDCARD, WILDCARD));

        assert_eq!(
            rule.evaluate(&Descriptor::new(1, 2, 0x1234, 1, 3)),
            Verdict::Prohibit
        );
        assert_eq!(
            rule.evaluate(&Descriptor::new(1, 2, 0x9999, 1, 3)),
            Verdict::Ignore
        );
        assert_eq!(
            Rule::permit(Descriptor::ANY).evaluate(&Descriptor::new(1, 2, 3, 4, 5)),
            Verdict::Permit
        );
    }

    #[test]
    fn test_machine_form_round_trip() {
        let rule = Rule::new(Descriptor::new(3, 0, 1133, 49948, 3), false);
        let text = rule.render(false);
        assert_eq!(text, "3 0 1133 49948 3 0");
        assert_eq!(text.parse::<Rule>().unwrap(), rule);
    }

    #[test]
    fn test_readable_form_loads_after_sanitizing() {
        let rule = Rule::new(Descriptor::new(1, 4, 2, 65535, 8), true);
        let readable = rule.render(true);
        assert_eq!(
            readable,
            "[BUS:1] [PORT:4] [VENDOR ID:2] [PRODUCT ID:65535] [INTERFACE CLASS:8] [PERMISSION]1"
        );
        assert_eq!(Rule::parse_annotated(&readable).unwrap(), rule);
    }

    #[test]
    fn test_tabs_separate_tokens() {
        assert_eq!(
            Rule::parse_annotated("1\t2\t3\t4\t5\t1").unwrap(),
            Rule::permit(Descriptor::new(1, 2, 3, 4, 5))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "1 2 3".parse::<Rule>(),
            Err(RuleParseError::MissingToken { field: "PRODUCT ID" })
        );
        assert_eq!(
            "1 2 3 4 5".parse::<Rule>(),
            Err(RuleParseError::MissingToken { field: "PERMISSION" })
        );
        assert_eq!(
            "1 2 x 4 5 1".parse::<Rule>(),
            Err(RuleParseError::InvalidNumber {
                field: "VENDOR ID",
                token: "x".to_string()
            })
        );
        assert!(matches!(
            "1 2 3 4 70000 1".parse::<Rule>(),
            Err(RuleParseError::InvalidNumber { field: "INTERFACE CLASS", .. })
        ));
        assert_eq!(
            "1 2 3 4 5 2".parse::<Rule>(),
            Err(RuleParseError::InvalidPermission("2".to_string()))
        );
    }

    #[test]
    fn test_display_is_machine_form() {
        let rule = Rule::permit(Descriptor::ANY);
        assert_eq!(rule.to_string(), "0 0 0 0 0 1");
    }

    proptest! {
        #[test]
        fn prop_render_parse_round_trip(
            fields in prop::array::uniform5(any::<u16>()),
            permission in any::<bool>(),
        ) {
            let rule = Rule::new(Descriptor::from(fields), permission);
            prop_assert_eq!(rule.render(false).parse::<Rule>().unwrap(), rule);
            prop_assert_eq!(Rule::parse_annotated(&rule.render(true)).unwrap(), rule);
        }
    }
}
