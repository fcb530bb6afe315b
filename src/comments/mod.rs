//! Comment posting and message rendering.
//!
//! Every comment the bot posts goes through [`CommentGuard`], which makes
//! posting a given message idempotent by checking the bot's own comment
//! history first.

pub mod guard;
pub mod template;

pub use guard::{CommentGuard, CriticalSection, GuardError, PostOutcome, message_by_user_contains};
pub use template::{render, render_completion, render_for_user};
