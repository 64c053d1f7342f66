mod account;
mod proxy_record;
mod rule;

pub use account::{
    AccountId, AccountInput, AccountRecord, AuthErrorKind, ProxyId, SessionArtifact, SessionStatus,
};
pub use proxy_record::{ProxyRecord, ProxyUpdate};
pub use rule::{MessageRule, NewMessageRule, RuleId, RuleUpdate};
