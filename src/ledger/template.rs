//! Template identifier helpers
//!
//! Template ids are package-qualified: `<package>:<Module.Path>:<Entity>`.
//! Older artifacts and file names use dots throughout
//! (`<package>.<Module.Path>.<Entity>`), so suffix matching accepts both.

/// Module and entity of the amulet holding template
pub const AMULET_TEMPLATE: &str = "Splice.Amulet:Amulet";

/// Module and entity of the locked amulet template
pub const LOCKED_AMULET_TEMPLATE: &str = "Splice.Amulet:LockedAmulet";

/// Storage-safe form of a template id; separators become dots
pub fn sanitize_template_id(template_id: &str) -> String {
    template_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '.'
            }
        })
        .collect()
}

/// Whether `template_id` ends with `suffix` in colon or legacy dot notation
///
/// The match must start at a segment boundary, so `Splice.Amulet:Amulet`
/// never matches a `...:LockedAmulet` template.
pub fn template_matches_suffix(template_id: &str, suffix: &str) -> bool {
    if suffix.is_empty() {
        return false;
    }
    let dotted = suffix.replace(':', ".");
    [suffix, dotted.as_str()]
        .iter()
        .any(|candidate| ends_at_boundary(template_id, candidate))
}

fn ends_at_boundary(template_id: &str, suffix: &str) -> bool {
    if !template_id.ends_with(suffix) {
        return false;
    }
    let start = template_id.len() - suffix.len();
    if start == 0 {
        return true;
    }
    matches!(template_id.as_bytes()[start - 1], b':' | b'.')
}
