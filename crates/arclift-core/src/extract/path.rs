//! Destination path sanitization.

use std::path::MAIN_SEPARATOR;

/// Characters that cannot appear in file names on the strictest supported
/// filesystem. Separators are handled structurally, not here.
const ILLEGAL: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

fn clean_component(component: &str, keep_colon: bool) -> String {
    component
        .chars()
        .map(|ch| {
            let illegal = ch.is_control() || (ILLEGAL.contains(&ch) && !(keep_colon && ch == ':'));
            if illegal { '_' } else { ch }
        })
        .collect()
}

/// Sanitizes a destination path for the target filesystem.
///
/// Replaces characters invalid in file names, preserves a drive-letter
/// style prefix in the leading component, keeps a single leading separator
/// (absolute paths), and collapses a doubled leading separator down to
/// exactly two (network-share style prefixes).
pub(crate) fn sanitize_path(text: &str, preserve_drive: bool) -> String {
    let leading = text
        .chars()
        .take_while(|c| *c == '/' || *c == '\\')
        .count();

    let parts: Vec<String> = text
        .split(['/', '\\'])
        .filter(|c| !c.is_empty())
        .enumerate()
        .map(|(i, c)| clean_component(c, preserve_drive && leading == 0 && i == 0))
        .collect();

    let body = parts.join(&MAIN_SEPARATOR.to_string());
    match leading {
        0 => body,
        1 => format!("{MAIN_SEPARATOR}{body}"),
        _ => format!("{MAIN_SEPARATOR}{MAIN_SEPARATOR}{body}"),
    }
}

/// Sanitizes an archive entry name into a relative path.
///
/// On top of [`sanitize_path`], leading separators are dropped and dot
/// components are removed, so a hostile entry name cannot climb out of the
/// destination directory.
pub(crate) fn sanitize_entry_name(name: &str) -> String {
    let parts: Vec<String> = name
        .split(['/', '\\'])
        .filter(|c| !c.is_empty() && *c != "." && *c != "..")
        .map(|c| clean_component(c, false))
        .collect();
    parts.join(&MAIN_SEPARATOR.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn native(parts: &[&str]) -> String {
        parts.join(&MAIN_SEPARATOR.to_string())
    }

    #[test]
    fn test_illegal_characters_are_replaced() {
        assert_eq!(sanitize_entry_name("a<b>c.txt"), "a_b_c.txt");
        assert_eq!(sanitize_entry_name("what?.txt"), "what_.txt");
        assert_eq!(sanitize_entry_name("tab\there"), "tab_here");
    }

    #[test]
    fn test_entry_colon_is_never_kept() {
        assert_eq!(sanitize_entry_name("C:/evil.txt"), native(&["C_", "evil.txt"]));
    }

    #[test]
    fn test_drive_prefix_survives_in_destination() {
        assert_eq!(sanitize_path("C:\\out\\dir", true), native(&["C:", "out", "dir"]));
        assert_eq!(sanitize_path("C:\\out\\dir", false), native(&["C_", "out", "dir"]));
    }

    #[test]
    fn test_absolute_destination_keeps_leading_separator() {
        let sanitized = sanitize_path("/tmp/out", true);
        assert_eq!(sanitized, format!("{MAIN_SEPARATOR}{}", native(&["tmp", "out"])));
    }

    #[test]
    fn test_doubled_leading_separator_collapses_to_two() {
        let sanitized = sanitize_path("\\\\\\server\\share", true);
        assert_eq!(
            sanitized,
            format!("{MAIN_SEPARATOR}{MAIN_SEPARATOR}{}", native(&["server", "share"]))
        );
    }

    #[test]
    fn test_entry_names_cannot_traverse() {
        assert_eq!(sanitize_entry_name("../../etc/passwd"), native(&["etc", "passwd"]));
        assert_eq!(sanitize_entry_name("/abs/path"), native(&["abs", "path"]));
        assert_eq!(sanitize_entry_name("a/./b"), native(&["a", "b"]));
    }

    #[test]
    fn test_empty_components_collapse() {
        assert_eq!(sanitize_entry_name("a//b"), native(&["a", "b"]));
    }
}
