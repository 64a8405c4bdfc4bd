// Copyright 2024 Golem Cloud
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Parsing of `*.war` archive filenames into the context/path/version triple
//! the manager endpoint expects.

use crate::error::TomcatError;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static WAR_FILENAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?P<path>/.+?)(##(?P<ver>.+?))?\.war$").unwrap());

/// A parsed reference to a web application archive: the context it deploys
/// to, the bare path it serves, and the optional version suffix. Both
/// `context` and `path` carry the leading `/` a manager context is addressed
/// by; only the basename of `filename` matters; a single `/` is synthesized
/// in front of it when the input has no directory component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebArchiveRef {
    pub context: String,
    pub path: String,
    pub version: Option<String>,
}

impl WebArchiveRef {
    /// Parses a filesystem path such as `/tmp/app##3.war` into its
    /// constituent parts.
    pub fn parse(filename: impl AsRef<Path>) -> Result<Self, TomcatError> {
        let filename = filename.as_ref();
        let base = filename
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                TomcatError::InvalidArchive(filename.display().to_string())
            })?;
        let candidate = format!("/{base}");

        let caps = WAR_FILENAME
            .captures(&candidate)
            .ok_or_else(|| TomcatError::InvalidArchive(filename.display().to_string()))?;

        let path = caps.name("path").unwrap().as_str().to_string();
        let version = caps.name("ver").map(|m| m.as_str().to_string());
        let context = match &version {
            Some(v) => format!("{path}##{v}"),
            None => path.clone(),
        };

        Ok(WebArchiveRef {
            context,
            path,
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unversioned_archive() {
        let r = WebArchiveRef::parse("/tmp/myapp.war").unwrap();
        assert_eq!(r.path, "/myapp");
        assert_eq!(r.version, None);
        assert_eq!(r.context, "/myapp");
    }

    #[test]
    fn parses_versioned_archive() {
        let r = WebArchiveRef::parse("/tmp/myapp##3.war").unwrap();
        assert_eq!(r.path, "/myapp");
        assert_eq!(r.version, Some("3".to_string()));
        assert_eq!(r.context, "/myapp##3");
    }

    #[test]
    fn is_case_insensitive_on_extension() {
        let r = WebArchiveRef::parse("/tmp/myapp.WAR").unwrap();
        assert_eq!(r.path, "/myapp");
    }

    #[test]
    fn rejects_non_war_filenames() {
        assert!(WebArchiveRef::parse("/tmp/myapp.zip").is_err());
    }

    #[test]
    fn works_without_a_directory_component() {
        let r = WebArchiveRef::parse("myapp.war").unwrap();
        assert_eq!(r.path, "/myapp");
    }

    #[test]
    fn matches_the_original_parser_selftest_table() {
        assert_eq!(
            WebArchiveRef::parse("app1.war").unwrap(),
            WebArchiveRef { context: "/app1".to_string(), path: "/app1".to_string(), version: None }
        );
        assert_eq!(
            WebArchiveRef::parse("/tmp/app1.war").unwrap(),
            WebArchiveRef { context: "/app1".to_string(), path: "/app1".to_string(), version: None }
        );
        assert_eq!(
            WebArchiveRef::parse("app1##1.0.1.war").unwrap(),
            WebArchiveRef {
                context: "/app1##1.0.1".to_string(),
                path: "/app1".to_string(),
                version: Some("1.0.1".to_string()),
            }
        );
        assert_eq!(
            WebArchiveRef::parse("/tmp/app1##1.0.1.war").unwrap(),
            WebArchiveRef {
                context: "/app1##1.0.1".to_string(),
                path: "/app1".to_string(),
                version: Some("1.0.1".to_string()),
            }
        );
    }
}
