//! Path policy for archive paths.
//!
//! Paths handed to the session are normalized to an absolute form first. Mutations
//! additionally check the path against a restricted character set and refuse to touch the
//! manifest, which can only be written through [`crate::DatArchive::configure`].

use std::borrow::Cow;

use crate::error::{ArchiveError, Result};

/// Path of the manifest inside every archive.
pub const MANIFEST_PATH: &str = "/dat.json";

/// Punctuation allowed in addition to ASCII letters, digits and whitespace.
const ALLOWED_PUNCTUATION: &str = "-._~!$&'()*+,;=:@/";

/// Normalizes a user supplied path.
///
/// An empty path is the root, percent escapes are decoded, runs of `/` are collapsed and a
/// leading `/` is added if missing. A trailing `/` is kept. Undecodable escapes are kept as
/// they are.
pub fn normalize(raw: Option<&str>) -> String {
    let raw = raw.unwrap_or_default();
    if raw.is_empty() {
        return "/".to_string();
    }
    let decoded = urlencoding::decode(raw).unwrap_or(Cow::Borrowed(raw));
    let mut path = String::with_capacity(decoded.len() + 1);
    path.push('/');
    for c in decoded.chars() {
        if c == '/' && path.ends_with('/') {
            continue;
        }
        path.push(c);
    }
    path
}

/// Checks that `path` only contains characters which are safe to use in an archive.
pub fn validate_syntax(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(ArchiveError::invalid_path(path, "path is empty"));
    }
    if !path.chars().all(is_allowed_char) {
        return Err(ArchiveError::invalid_path(
            path,
            "path contains invalid characters",
        ));
    }
    Ok(())
}

/// Checks a path that has to name a file: valid syntax and no trailing `/`.
pub fn validate_file_path(path: &str) -> Result<()> {
    validate_syntax(path)?;
    if path.ends_with('/') {
        return Err(ArchiveError::invalid_path(
            path,
            "files can not have a trailing slash",
        ));
    }
    Ok(())
}

/// Rejects direct mutation of the manifest.
pub fn validate_unprotected(path: &str) -> Result<()> {
    if is_protected(path) {
        return Err(ArchiveError::ProtectedFileNotWritable {
            path: path.to_string(),
        });
    }
    Ok(())
}

/// Whether `path` names the manifest.
pub fn is_protected(path: &str) -> bool {
    let name = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>();
    name == [MANIFEST_PATH.trim_start_matches('/')]
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c.is_whitespace() || ALLOWED_PUNCTUATION.contains(c)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(None), "/");
        assert_eq!(normalize(Some("")), "/");
        assert_eq!(normalize(Some("foo.txt")), "/foo.txt");
        assert_eq!(normalize(Some("/foo.txt")), "/foo.txt");
        assert_eq!(normalize(Some("/hello%20world.txt")), "/hello world.txt");
        assert_eq!(normalize(Some("sub%2Fdir")), "/sub/dir");
        assert_eq!(normalize(Some("//dat.json")), "/dat.json");
        assert_eq!(normalize(Some("/a//b///c/")), "/a/b/c/");
        assert_eq!(normalize(Some("%2F%2Fdat%2Ejson")), "/dat.json");
        // invalid utf-8 after decoding, left alone
        assert_eq!(normalize(Some("/bad%ff")), "/bad%ff");
    }

    #[test]
    fn test_validate_syntax() {
        for ok in [
            "/foo.txt",
            "/sub/dir/",
            "/with space.md",
            "/a-b_c~d!e$f&g'h(i)j*k+l,m;n=o:p@q",
        ] {
            validate_syntax(ok).unwrap();
        }
        for bad in ["", "/foo`bar", "/quote\"", "/angle<", "/pipe|", "/back\\slash", "/ü"] {
            let err = validate_syntax(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidPath, "{bad}");
        }
    }

    #[test]
    fn test_validate_file_path() {
        validate_file_path("/foo.txt").unwrap();
        let err = validate_file_path("/foo/").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPath);
    }

    #[test]
    fn test_protected() {
        for protected in ["/dat.json", "dat.json", "/dat.json/", "//dat.json", "///dat.json//"] {
            let err = validate_unprotected(protected).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ProtectedFileNotWritable);
        }
        validate_unprotected("/sub/dat.json").unwrap();
        validate_unprotected("/dat.json.bak").unwrap();
    }

    proptest! {
        #[test]
        fn normalized_paths_are_absolute(raw in "[a-zA-Z0-9 ./_-]{0,40}") {
            let path = normalize(Some(&raw));
            prop_assert!(path.starts_with('/'));
        }

        #[test]
        fn normalized_paths_have_no_empty_segments(raw in "[a-z/]{0,40}") {
            let path = normalize(Some(&raw));
            prop_assert!(!path.contains("//"));
        }

        #[test]
        fn manifest_is_protected_however_spelled(
            lead in "/{0,4}",
            trail in "/{0,4}",
        ) {
            let raw = format!("{lead}dat.json{trail}");
            prop_assert!(is_protected(&normalize(Some(&raw))));
            prop_assert!(is_protected(&raw));
        }

        #[test]
        fn safe_paths_validate(raw in "/[a-zA-Z0-9._~-]{1,20}(/[a-zA-Z0-9._~-]{1,20}){0,3}") {
            prop_assert!(validate_file_path(&raw).is_ok());
        }

        #[test]
        fn backtick_never_validates(prefix in "/[a-z]{0,10}", suffix in "[a-z]{0,10}") {
            let path = format!("{prefix}`{suffix}");
            prop_assert!(validate_syntax(&path).is_err());
        }
    }
}
