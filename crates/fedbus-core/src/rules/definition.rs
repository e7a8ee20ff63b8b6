//! Rule file format.
//!
//! ```toml
//! [[rule]]
//! name = "potato goes to b"
//! salience = 10
//! when = "fact.payload == 'potato'"
//! channel = "b"
//! payload = "'Hello ' + fact.payload"
//! [rule.headers]
//! route = "'rules'"
//! ```

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::{INBOUND_ENTRY_POINT, RuleError};

/// A parsed rule file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleFile {
    #[serde(default, rename = "rule")]
    pub rules: Vec<RuleDefinition>,
}

/// One routing rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDefinition {
    /// Unique within the file.
    pub name: String,
    /// Higher fires first. Ties keep declaration order.
    #[serde(default)]
    pub salience: i32,
    /// Entry point whose facts this rule matches.
    #[serde(default = "default_entry_point")]
    pub entry_point: String,
    /// JEXL condition over `fact`. Coerced with JS-like truthiness.
    pub when: String,
    /// Translator name, or `outbound` to reach every translator.
    pub channel: String,
    /// Optional JEXL producing the derived payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    /// JEXL per header set on the derived message.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

fn default_entry_point() -> String {
    INBOUND_ENTRY_POINT.to_string()
}

impl RuleFile {
    /// Parse and validate rule source text.
    pub fn parse(source: &str) -> Result<Self, RuleError> {
        let file: RuleFile = toml::from_str(source)?;
        file.validate()?;
        Ok(file)
    }

    fn validate(&self) -> Result<(), RuleError> {
        if self.rules.is_empty() {
            return Err(RuleError::Invalid("rule set declares no rules".to_string()));
        }

        let mut names = HashSet::new();
        for rule in &self.rules {
            if rule.name.trim().is_empty() {
                return Err(RuleError::Invalid("rule name must not be empty".to_string()));
            }
            if !names.insert(rule.name.as_str()) {
                return Err(RuleError::Invalid(format!(
                    "duplicate rule name '{}'",
                    rule.name
                )));
            }
            for (field, value) in [
                ("when", &rule.when),
                ("channel", &rule.channel),
                ("entry_point", &rule.entry_point),
            ] {
                if value.trim().is_empty() {
                    return Err(RuleError::Invalid(format!(
                        "rule '{}': {field} must not be empty",
                        rule.name
                    )));
                }
            }
        }
        Ok(())
    }
}
