//! Device endpoint discovery.
//!
//! Serial endpoints are configured as a list of glob patterns
//! (e.g. `/dev/ttyUSB*`) or literal paths. Discovery expands them into a
//! sorted, de-duplicated list, which fixes the order channel IDs are
//! assigned in.

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::{Error, Result};

/// Returns true if the pattern contains glob metacharacters.
pub fn is_pattern(entry: &str) -> bool {
    entry.contains(['*', '?', '['])
}

/// Expand endpoint patterns into a sorted list of device paths.
///
/// Literal entries are passed through even if the path does not exist yet;
/// opening them later reports the failure for that channel only. Paths listed
/// in `exclude` are dropped from the result.
pub fn discover_endpoints<S, E>(patterns: &[S], exclude: &[E]) -> Result<Vec<String>>
where
    S: AsRef<str>,
    E: AsRef<str>,
{
    let mut found = BTreeSet::new();

    for entry in patterns {
        let entry = entry.as_ref();

        if !is_pattern(entry) {
            found.insert(entry.to_string());
            continue;
        }

        let paths = glob::glob(entry).map_err(|e| Error::Pattern {
            pattern: entry.to_string(),
            message: e.to_string(),
        })?;

        for path in paths {
            match path {
                Ok(path) => {
                    found.insert(path.display().to_string());
                }
                Err(e) => {
                    debug!(pattern = %entry, error = %e, "Skipping unreadable path");
                }
            }
        }
    }

    for excluded in exclude {
        found.remove(excluded.as_ref());
    }

    Ok(found.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    const NONE: &[&str] = &[];

    #[test]
    fn test_is_pattern() {
        assert!(is_pattern("/dev/ttyUSB*"));
        assert!(is_pattern("/dev/ttyACM[0-3]"));
        assert!(!is_pattern("/dev/ttyUSB0"));
    }

    #[test]
    fn test_glob_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["ttyUSB2", "ttyUSB0", "ttyUSB1", "other"] {
            File::create(dir.path().join(name)).unwrap();
        }

        let pattern = format!("{}/ttyUSB*", dir.path().display());
        let endpoints = discover_endpoints(&[pattern], NONE).unwrap();

        let names: Vec<_> = endpoints
            .iter()
            .map(|p| p.rsplit('/').next().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["ttyUSB0", "ttyUSB1", "ttyUSB2"]);
    }

    #[test]
    fn test_literal_passthrough_and_dedup() {
        let endpoints =
            discover_endpoints(&["/dev/ttyUSB1", "/dev/ttyUSB0", "/dev/ttyUSB1"], NONE).unwrap();
        assert_eq!(endpoints, vec!["/dev/ttyUSB0", "/dev/ttyUSB1"]);
    }

    #[test]
    fn test_exclude() {
        let endpoints =
            discover_endpoints(&["/dev/ttyUSB0", "/dev/ttyUSB1"], &["/dev/ttyUSB1"]).unwrap();
        assert_eq!(endpoints, vec!["/dev/ttyUSB0"]);
    }

    #[test]
    fn test_no_matches() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/ttyUSB*", dir.path().display());
        assert!(discover_endpoints(&[pattern], NONE).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_pattern() {
        let result = discover_endpoints(&["/dev/tty[USB"], NONE);
        assert!(matches!(result, Err(Error::Pattern { .. })));
    }
}
