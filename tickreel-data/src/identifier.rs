use crate::error::DataError;
use std::path::{Component, Path, PathBuf};

/// Maximum length of an identifier that may be used as a file or directory name.
pub const IDENTIFIER_MAX_LEN: usize = 128;

fn is_allowed(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.')
}

/// Validate an external identifier (session id, episode id) before it is used in a path.
///
/// Accepts `[A-Za-z0-9._-]{1,128}` that does not start with `.`, so separators, traversal
/// segments, absolute paths & hidden files are all rejected before any file is opened.
pub fn validate_identifier(id: &str) -> Result<&str, DataError> {
    let invalid = |reason| DataError::InvalidIdentifier {
        id: id.to_string(),
        reason,
    };

    if id.is_empty() {
        return Err(invalid("empty"));
    }
    if id.len() > IDENTIFIER_MAX_LEN {
        return Err(invalid("too long"));
    }
    if id.starts_with('.') {
        return Err(invalid("leading '.'"));
    }
    if !id.chars().all(is_allowed) {
        return Err(invalid("contains characters outside [A-Za-z0-9._-]"));
    }

    Ok(id)
}

/// Sanitise an identifier to the allow-listed character set, replacing anything else with `_`.
///
/// Used for identifiers that name files but are not looked up again by callers (eg/ writer ids),
/// so lossy mapping is acceptable. The output always passes [`validate_identifier`].
pub fn sanitise_identifier(raw: &str) -> String {
    let mut sanitised = raw
        .chars()
        .take(IDENTIFIER_MAX_LEN)
        .map(|ch| if is_allowed(ch) { ch } else { '_' })
        .collect::<String>();

    if sanitised.is_empty() || sanitised.starts_with('.') {
        sanitised.insert(0, '_');
        sanitised.truncate(IDENTIFIER_MAX_LEN);
    }

    sanitised
}

/// Resolve `file_name` (derived from `id`) to a path strictly inside `root`.
///
/// The root is canonicalised and the resolved path is verified to remain one of its descendants,
/// including through symlinks when the target already exists.
pub fn resolve_within(root: &Path, id: &str, file_name: &str) -> Result<PathBuf, DataError> {
    let root = root
        .canonicalize()
        .map_err(|error| DataError::io(root, error))?;

    let relative = Path::new(file_name);
    let mut components = relative.components();
    if !matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) {
        return Err(DataError::PathEscapesRoot {
            id: id.to_string(),
            path: relative.to_path_buf(),
            root,
        });
    }

    let candidate = root.join(relative);
    let resolved = match candidate.canonicalize() {
        Ok(resolved) => resolved,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => candidate,
        Err(error) => return Err(DataError::io(candidate, error)),
    };

    if resolved.parent() != Some(root.as_path()) || !resolved.starts_with(&root) {
        return Err(DataError::PathEscapesRoot {
            id: id.to_string(),
            path: resolved,
            root,
        });
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        struct TestCase {
            input: &'static str,
            expected_ok: bool,
        }

        let cases = vec![
            // TC0: typical game id
            TestCase {
                input: "20251018-a7b3c9",
                expected_ok: true,
            },
            // TC1: dots & underscores inside are fine
            TestCase {
                input: "game_01.v2",
                expected_ok: true,
            },
            // TC2: traversal
            TestCase {
                input: "../etc/passwd",
                expected_ok: false,
            },
            // TC3: absolute path
            TestCase {
                input: "/etc/passwd",
                expected_ok: false,
            },
            // TC4: windows separator
            TestCase {
                input: "..\\secrets",
                expected_ok: false,
            },
            // TC5: bare parent dir
            TestCase {
                input: "..",
                expected_ok: false,
            },
            // TC6: empty
            TestCase {
                input: "",
                expected_ok: false,
            },
            // TC7: nul byte
            TestCase {
                input: "game\0id",
                expected_ok: false,
            },
        ];

        for (index, test) in cases.into_iter().enumerate() {
            assert_eq!(
                validate_identifier(test.input).is_ok(),
                test.expected_ok,
                "TC{index} failed"
            );
        }
    }

    #[test]
    fn test_sanitise_identifier_output_is_always_valid() {
        for raw in ["../../x", "/abs/path", "", ".hidden", "ok-id", "a b\tc", "ünïcode"] {
            let sanitised = sanitise_identifier(raw);
            assert!(
                validate_identifier(&sanitised).is_ok(),
                "{raw:?} sanitised to invalid {sanitised:?}"
            );
        }
        assert_eq!(sanitise_identifier("../../x"), "_.._.._x");
        assert_eq!(sanitise_identifier("writer 1"), "writer_1");
        assert_eq!(sanitise_identifier(""), "_");
    }

    #[test]
    fn test_resolve_within_stays_inside_root() {
        let root = tempfile::tempdir().unwrap();

        let resolved = resolve_within(root.path(), "game-1", "game-1.jsonl").unwrap();
        assert_eq!(
            resolved,
            root.path().canonicalize().unwrap().join("game-1.jsonl")
        );

        let escaped = resolve_within(root.path(), "x", "../x.jsonl");
        assert!(matches!(escaped, Err(DataError::PathEscapesRoot { .. })));

        let nested = resolve_within(root.path(), "x", "a/x.jsonl");
        assert!(matches!(nested, Err(DataError::PathEscapesRoot { .. })));
    }
}
