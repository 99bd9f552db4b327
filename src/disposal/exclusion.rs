//! Exclusion filter: user-configured path prefixes that are never modified.

#![allow(missing_docs)]

use crate::core::paths::{is_network_path, normalize_network_path, redact_credentials};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExclusionFilter {
    enabled: bool,
    prefixes: Vec<String>,
}

impl ExclusionFilter {
    /// Blank prefixes are dropped; they would otherwise exclude everything.
    #[must_use]
    pub fn new(enabled: bool, prefixes: Vec<String>) -> Self {
        let prefixes = prefixes
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        Self { enabled, prefixes }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Whether `path` is protected from modification.
    ///
    /// Network paths are compared as lowercase `host/share/...` with protocol
    /// and credentials removed. A path that cannot be normalized is excluded.
    #[must_use]
    pub fn is_excluded(&self, path: &str) -> bool {
        if !self.enabled {
            return false;
        }

        if is_network_path(path) {
            let Ok(candidate) = normalize_network_path(path) else {
                eprintln!(
                    "[MFC-2004] cannot normalize {}; treating as excluded",
                    redact_credentials(path)
                );
                return true;
            };
            return self
                .prefixes
                .iter()
                .filter(|prefix| is_network_path(prefix))
                .any(|prefix| match normalize_network_path(prefix) {
                    Ok(prefix) => candidate.starts_with(&prefix),
                    Err(_) => {
                        eprintln!(
                            "[MFC-2004] malformed exclusion path {}; treating as excluded",
                            redact_credentials(prefix)
                        );
                        true
                    }
                });
        }

        self.prefixes
            .iter()
            .filter(|prefix| !is_network_path(prefix))
            .any(|prefix| local_prefix_matches(path, prefix))
    }
}

#[cfg(windows)]
fn local_prefix_matches(path: &str, prefix: &str) -> bool {
    path.to_lowercase().starts_with(&prefix.to_lowercase())
}

#[cfg(not(windows))]
fn local_prefix_matches(path: &str, prefix: &str) -> bool {
    path.starts_with(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn filter(paths: &[&str]) -> ExclusionFilter {
        ExclusionFilter::new(true, paths.iter().map(ToString::to_string).collect())
    }

    #[test]
    fn disabled_never_excludes() {
        let f = ExclusionFilter::new(false, vec!["/media".to_string()]);
        assert!(!f.is_excluded("/media/movies/X.mkv"));
        assert!(!ExclusionFilter::disabled().is_excluded("smb://bad host/x"));
    }

    #[test]
    fn local_prefixes() {
        let f = filter(&["/media/keep", "", "/srv/archive"]);
        assert_eq!(f.prefixes().len(), 2);
        assert!(f.is_excluded("/media/keep/X/X.mkv"));
        assert!(f.is_excluded("/srv/archive/Y.avi"));
        assert!(!f.is_excluded("/media/movies/X/X.mkv"));
    }

    #[test]
    #[cfg(unix)]
    fn local_match_is_case_sensitive_on_unix() {
        let f = filter(&["/media/Keep"]);
        assert!(!f.is_excluded("/media/keep/X.mkv"));
    }

    #[test]
    fn network_paths_ignore_credentials_protocol_and_case() {
        let f = filter(&["smb://NAS/Share/Kids"]);
        assert!(f.is_excluded("smb://user:pw@nas/share/kids/Film/Film.mkv"));
        assert!(f.is_excluded("nfs://nas/SHARE/kids/a.mkv"));
        assert!(!f.is_excluded("smb://nas/share/adults/a.mkv"));
        assert!(!f.is_excluded("/share/kids/a.mkv"));
    }

    #[test]
    fn malformed_network_path_is_excluded() {
        let f = filter(&["/media/keep"]);
        assert!(f.is_excluded("smb:///share/file.mkv"));
        assert!(f.is_excluded("smb://user:pw@/share/file.mkv"));
    }

    #[test]
    fn malformed_network_prefix_excludes_network_candidates() {
        let f = filter(&["smb://@/broken"]);
        assert!(f.is_excluded("smb://nas/share/a.mkv"));
        assert!(!f.is_excluded("/media/a.mkv"));
    }

    proptest! {
        #[test]
        fn credentials_never_change_the_verdict(
            user in "[a-z]{1,8}",
            pass in "[a-zA-Z0-9@]{1,8}",
            host in "[a-z]{1,8}",
            share in "[a-z]{1,8}",
            file in "[a-z]{1,8}",
        ) {
            let f = filter(&[&format!("smb://{host}/{share}")]);
            let bare = format!("smb://{host}/{share}/{file}.mkv");
            let with_creds = format!("smb://{user}:{pass}@{}/{share}/{file}.mkv", host.to_uppercase());
            prop_assert!(f.is_excluded(&bare));
            prop_assert_eq!(f.is_excluded(&bare), f.is_excluded(&with_creds));
        }
    }
}
