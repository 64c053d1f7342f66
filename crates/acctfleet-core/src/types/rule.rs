use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::account::AccountId;

pub type RuleId = i64;

/// Outbound message configured for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRule {
    pub id: RuleId,
    pub account_id: AccountId,
    pub target_handle: String,
    pub template: String,
    pub active: bool,
    pub last_sent_at: Option<DateTime<Utc>>,
}

/// Fields for creating a rule. A rule for an existing
/// `(account_id, target_handle)` pair replaces that rule's template and flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessageRule {
    pub account_id: AccountId,
    pub target_handle: String,
    pub template: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Partial update; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleUpdate {
    pub target_handle: Option<String>,
    pub template: Option<String>,
    pub active: Option<bool>,
}

impl RuleUpdate {
    pub fn apply(&self, rule: &mut MessageRule) {
        if let Some(target) = &self.target_handle {
            rule.target_handle = target.clone();
        }
        if let Some(template) = &self.template {
            rule.template = template.clone();
        }
        if let Some(active) = self.active {
            rule.active = active;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_only_touches_given_fields() {
        let mut rule = MessageRule {
            id: 3,
            account_id: 1,
            target_handle: "bob".into(),
            template: "hi".into(),
            active: true,
            last_sent_at: None,
        };
        RuleUpdate {
            active: Some(false),
            ..Default::default()
        }
        .apply(&mut rule);
        assert!(!rule.active);
        assert_eq!(rule.template, "hi");
        assert_eq!(rule.target_handle, "bob");
    }

    #[test]
    fn new_rule_defaults_to_active() {
        let rule: NewMessageRule =
            serde_json::from_str(r#"{"account_id":1,"target_handle":"x","template":"y"}"#).unwrap();
        assert!(rule.active);
    }
}
