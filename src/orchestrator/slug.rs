//! Session id generation: `agent-<kind>-<slug>`, collision-resistant
//! across both existing ids and existing working directories (two
//! sessions opened on the same directory must not collide either).

use crate::agents::AgentKind;

const MAX_SLUG_LEN: usize = 20;

/// Lowercase `text`, keep `[a-z0-9-_]`, replace everything else with `-`,
/// trim leading/trailing `-`, and cap at [`MAX_SLUG_LEN`] chars. Falls
/// back to `"session"` if nothing survives.
fn base_slug(text: &str) -> String {
    let lowered = text.to_lowercase();
    let mapped: String = lowered
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = mapped.trim_matches('-');
    let capped: String = trimmed.chars().take(MAX_SLUG_LEN).collect();
    let capped = capped.trim_matches('-');
    if capped.is_empty() {
        "session".to_string()
    } else {
        capped.to_string()
    }
}

/// Build a collision-free `agent-<kind>-<slug>` id. Collisions are
/// checked against both existing session ids and existing working
/// directories, so reopening the same directory under the same agent
/// always produces a fresh id rather than reusing a dead one.
pub fn slugify(
    title: &str,
    kind: AgentKind,
    working_dir: &str,
    existing_ids: &[String],
    existing_dirs: &[String],
) -> String {
    let slug = base_slug(title);
    let base = format!("agent-{}-{slug}", kind.as_str());

    if !existing_ids.iter().any(|id| id == &base) && !existing_dirs.iter().any(|d| d == working_dir)
    {
        return base;
    }

    let mut n = 2;
    loop {
        let candidate = format!("{base}-{n}");
        if !existing_ids.iter().any(|id| id == &candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_slug_lowercases_and_replaces_invalid_chars() {
        assert_eq!(base_slug("My Project!"), "my-project");
    }

    #[test]
    fn base_slug_caps_length() {
        let long = "a".repeat(50);
        assert_eq!(base_slug(&long).len(), MAX_SLUG_LEN);
    }

    #[test]
    fn base_slug_falls_back_to_session() {
        assert_eq!(base_slug("!!!"), "session");
    }

    #[test]
    fn slugify_avoids_id_and_dir_collisions() {
        let existing_ids = vec!["agent-claude-foo".to_string()];
        let existing_dirs = vec!["/work/foo".to_string()];
        let id = slugify(
            "foo",
            AgentKind::Claude,
            "/work/foo",
            &existing_ids,
            &existing_dirs,
        );
        assert_eq!(id, "agent-claude-foo-2");
    }

    #[test]
    fn slugify_is_stable_for_fresh_dir() {
        let existing_ids = vec!["agent-claude-foo".to_string()];
        let existing_dirs = vec!["/work/foo".to_string()];
        let id = slugify(
            "bar",
            AgentKind::Claude,
            "/work/bar",
            &existing_ids,
            &existing_dirs,
        );
        assert_eq!(id, "agent-claude-bar");
    }
}
