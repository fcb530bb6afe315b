//! Rendering message templates.
//!
//! Templates are plain strings with placeholder tokens (configurable, by
//! default `USERNAME`, `SPINMINT_LINK` and `INSTANCE_ID`). Rendering is pure
//! textual replacement of every occurrence.

use crate::config::Placeholders;

/// Replaces every occurrence of each placeholder with its value, in order.
pub fn render(template: &str, substitutions: &[(&str, &str)]) -> String {
    substitutions
        .iter()
        .filter(|(placeholder, _)| !placeholder.is_empty())
        .fold(template.to_string(), |acc, (placeholder, value)| {
            acc.replace(*placeholder, value)
        })
}

/// Renders a label-rule message for the entity author.
pub fn render_for_user(placeholders: &Placeholders, template: &str, username: &str) -> String {
    render(template, &[(placeholders.username.as_str(), username)])
}

/// Renders a completion message carrying an access link and an instance id.
pub fn render_completion(
    placeholders: &Placeholders,
    template: &str,
    link: &str,
    instance_id: &str,
) -> String {
    render(
        template,
        &[
            (placeholders.link.as_str(), link),
            (placeholders.instance_id.as_str(), instance_id),
        ],
    )
}
