//! Placeholder derivation.
//!
//! Each placeholder name is matched against a fixed precedence:
//!
//! | name contains                   | value                               |
//! |---------------------------------|-------------------------------------|
//! | `message`, `response`, `body`   | sanitized agent reply               |
//! | `name`                          | display name, else `"Customer"`     |
//! | `language`                      | resolved locale                     |
//! | `phone`, `msisdn`               | masked identity                     |
//! | anything else                   | empty (derivation fails)            |

use switchboard_security::mask_identity;

use crate::registry::{ApprovedTemplate, TemplateError};

const DEFAULT_DISPLAY_NAME: &str = "Customer";

/// Everything a placeholder can be derived from.
#[derive(Debug, Clone, Copy)]
pub struct TemplateInputs<'a> {
    pub response_text: &'a str,
    pub display_name: Option<&'a str>,
    pub locale: &'a str,
    pub identity: &'a str,
}

/// Collapse whitespace runs, trim, and cap at `max_chars` characters.
///
/// A truncated body ends with `…`, counted inside the cap.
pub fn sanitize_body(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let keep = max_chars.saturating_sub(1);
    let mut out: String = collapsed.chars().take(keep).collect();
    out.truncate(out.trim_end().len());
    out.push('…');
    out
}

fn derive_one(placeholder: &str, inputs: &TemplateInputs<'_>, max_body_chars: usize) -> String {
    let key = placeholder.to_lowercase();
    if ["message", "response", "body"].iter().any(|k| key.contains(k)) {
        sanitize_body(inputs.response_text, max_body_chars)
    } else if key.contains("name") {
        inputs
            .display_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_DISPLAY_NAME)
            .to_string()
    } else if key.contains("language") {
        inputs.locale.to_string()
    } else if key.contains("phone") || key.contains("msisdn") {
        mask_identity(inputs.identity)
    } else {
        String::new()
    }
}

/// Values for every placeholder, in template order.
///
/// Fails with `MissingParameter` on the first placeholder that derives to
/// an empty string.
pub fn derive_parameters(
    template: &ApprovedTemplate,
    inputs: &TemplateInputs<'_>,
    max_body_chars: usize,
) -> Result<Vec<(String, String)>, TemplateError> {
    template
        .placeholders
        .iter()
        .map(|placeholder| {
            let value = derive_one(placeholder, inputs, max_body_chars);
            if value.is_empty() {
                Err(TemplateError::MissingParameter {
                    template_key: template.template_key.clone(),
                    placeholder: placeholder.clone(),
                })
            } else {
                Ok((placeholder.clone(), value))
            }
        })
        .collect()
}
