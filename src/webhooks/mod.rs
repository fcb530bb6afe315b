//! GitHub webhook deliveries: signature checks and event parsing.

pub mod events;
pub mod parser;
pub mod signature;

pub use events::{GitHubEvent, IssueEvent, PrAction, PullRequestEvent};
pub use parser::{ParseError, parse_webhook};
pub use signature::{SignatureError, signature_header, verify_signature};
