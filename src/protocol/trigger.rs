//! GPIO trigger rules.
//!
//! A rule maps a class/score condition to a GPIO action. On the wire one rule
//! is `classId,condition,threshold,gpio,initLevel,triggerLevel` and several
//! rules are joined with `|`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors building or parsing trigger rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("expected 6 comma-separated fields, got {0}")]
    FieldCount(usize),

    #[error("field '{field}' is not a number: {value:?}")]
    NotANumber { field: &'static str, value: String },

    #[error("unknown condition code {0}")]
    UnknownCondition(u8),

    #[error("{field} must be at most {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        max: u32,
    },
}

/// Comparison between a class score and the rule threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    Neq,
}

impl Condition {
    /// Numeric code used on the wire.
    pub fn code(self) -> u8 {
        match self {
            Self::Gt => 0,
            Self::Lt => 1,
            Self::Gte => 2,
            Self::Lte => 3,
            Self::Eq => 4,
            Self::Neq => 5,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, RuleError> {
        Ok(match code {
            0 => Self::Gt,
            1 => Self::Lt,
            2 => Self::Gte,
            3 => Self::Lte,
            4 => Self::Eq,
            5 => Self::Neq,
            other => return Err(RuleError::UnknownCondition(other)),
        })
    }
}

/// One device-side GPIO trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRule {
    pub class_id: u32,
    pub condition: Condition,
    /// Score threshold, 0-100.
    pub threshold: u8,
    pub gpio_pin: u8,
    /// Level the pin idles at, 0 or 1.
    pub init_level: u8,
    /// Level the pin is driven to while the condition holds, 0 or 1.
    pub trigger_level: u8,
}

impl TriggerRule {
    /// Check the numeric contracts the firmware expects.
    pub fn validate(&self) -> Result<(), RuleError> {
        check_max("threshold", self.threshold, 100)?;
        check_max("init_level", self.init_level, 1)?;
        check_max("trigger_level", self.trigger_level, 1)?;
        Ok(())
    }
}

fn check_max(field: &'static str, value: u8, max: u8) -> Result<(), RuleError> {
    if value > max {
        return Err(RuleError::OutOfRange {
            field,
            value: u32::from(value),
            max: u32::from(max),
        });
    }
    Ok(())
}

impl fmt::Display for TriggerRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{}",
            self.class_id,
            self.condition.code(),
            self.threshold,
            self.gpio_pin,
            self.init_level,
            self.trigger_level
        )
    }
}

impl FromStr for TriggerRule {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(',').map(str::trim).collect();
        if fields.len() != 6 {
            return Err(RuleError::FieldCount(fields.len()));
        }

        let rule = Self {
            class_id: number("class_id", fields[0])?,
            condition: Condition::from_code(number("condition", fields[1])?)?,
            threshold: number("threshold", fields[2])?,
            gpio_pin: number("gpio_pin", fields[3])?,
            init_level: number("init_level", fields[4])?,
            trigger_level: number("trigger_level", fields[5])?,
        };
        rule.validate()?;
        Ok(rule)
    }
}

fn number<T: FromStr>(field: &'static str, value: &str) -> Result<T, RuleError> {
    value.parse().map_err(|_| RuleError::NotANumber {
        field,
        value: value.to_string(),
    })
}

/// Join rules into the `|`-separated wire form.
pub fn encode_rules(rules: &[TriggerRule]) -> String {
    rules
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("|")
}

/// Parse the `|`-separated wire form. Empty input means no rules.
pub fn parse_rules(text: &str) -> Result<Vec<TriggerRule>, RuleError> {
    let text = text.trim().trim_matches('"');
    if text.is_empty() {
        return Ok(Vec::new());
    }
    text.split('|').map(str::parse).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn person_rule() -> TriggerRule {
        TriggerRule {
            class_id: 0,
            condition: Condition::Gte,
            threshold: 50,
            gpio_pin: 1,
            init_level: 0,
            trigger_level: 1,
        }
    }

    #[test]
    fn test_single_rule_encoding() {
        assert_eq!(person_rule().to_string(), "0,2,50,1,0,1");
    }

    #[test]
    fn test_multiple_rules_joined_with_pipe() {
        let second = TriggerRule {
            class_id: 3,
            condition: Condition::Lt,
            threshold: 20,
            gpio_pin: 2,
            init_level: 1,
            trigger_level: 0,
        };
        assert_eq!(encode_rules(&[person_rule(), second]), "0,2,50,1,0,1|3,1,20,2,1,0");
        assert_eq!(encode_rules(&[]), "");
    }

    #[test]
    fn test_parse_rules() {
        let rules = parse_rules("\"0,2,50,1,0,1|3,5,99,4,0,1\"").unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0], person_rule());
        assert_eq!(rules[1].condition, Condition::Neq);
        assert_eq!(rules[1].gpio_pin, 4);
        assert!(parse_rules("").unwrap().is_empty());
    }

    #[test]
    fn test_condition_codes() {
        for code in 0..6 {
            assert_eq!(Condition::from_code(code).unwrap().code(), code);
        }
        assert_eq!(Condition::from_code(6), Err(RuleError::UnknownCondition(6)));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "0,2,50".parse::<TriggerRule>(),
            Err(RuleError::FieldCount(3))
        );
        assert!(matches!(
            "0,2,high,1,0,1".parse::<TriggerRule>(),
            Err(RuleError::NotANumber { field: "threshold", .. })
        ));
        assert!(matches!(
            "0,2,150,1,0,1".parse::<TriggerRule>(),
            Err(RuleError::OutOfRange { field: "threshold", .. })
        ));
    }

    #[test]
    fn test_validate_levels() {
        let mut rule = person_rule();
        rule.trigger_level = 2;
        assert!(matches!(
            rule.validate(),
            Err(RuleError::OutOfRange { field: "trigger_level", value: 2, max: 1 })
        ));
    }
}
