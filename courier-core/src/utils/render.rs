//! `{{ name }}` placeholder substitution for message templates.

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("unknown template: {0}")]
    UnknownTemplate(String),
    #[error("missing template variable: {0}")]
    MissingVariable(String),
    #[error("unterminated placeholder at byte {0}")]
    Unterminated(usize),
}

/// Substitute every `{{ name }}` in `template` with `variables[name]`.
///
/// Whitespace inside the braces is ignored. A placeholder without a value
/// is an error rather than an empty string, so a half-rendered message is
/// never sent.
pub fn render(template: &str, variables: &BTreeMap<String, String>) -> Result<String, RenderError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            return Err(RenderError::Unterminated(offset + start));
        };
        let name = after_open[..end].trim();
        let value = variables
            .get(name)
            .ok_or_else(|| RenderError::MissingVariable(name.to_string()))?;
        out.push_str(value);

        let consumed = start + 2 + end + 2;
        offset += consumed;
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    Ok(out)
}
