//! Expected failure messages for the negative scenarios.
//!
//! The texts are whatever the deployment under test prints, so they live in
//! data rather than code. Built-in defaults match the stock client and
//! service; a TOML file may replace any of the three tables:
//!
//! ```toml
//! [[create_size]]
//! value = "-1"
//! pattern = "Invalid volume size provided for create request"
//! ```

use std::io;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::toml;
use regex::Regex;
use serde::Deserialize;

use super::ScenarioError;

/// An invalid input and the pattern its failure output must match.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct FailureCase {
    /// Value passed to the client.
    pub value: String,
    /// Regular expression searched for in the failure output.
    pub pattern: String,
}

impl FailureCase {
    /// Builds a case.
    #[must_use]
    pub fn new(value: &str, pattern: &str) -> Self {
        Self {
            value: value.to_owned(),
            pattern: pattern.to_owned(),
        }
    }

    /// Tests `output` against the pattern.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::InvalidPattern`] when the pattern does not
    /// compile.
    pub fn matches(&self, output: &str) -> Result<bool, ScenarioError> {
        let regex = Regex::new(&self.pattern).map_err(|err| ScenarioError::InvalidPattern {
            pattern: self.pattern.clone(),
            message: err.to_string(),
        })?;
        Ok(regex.is_match(output))
    }
}

/// Failure cases for each negative scenario.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct FailureFixtures {
    /// Invalid sizes for `create`.
    pub create_size: Vec<FailureCase>,
    /// Invalid sizes for `extend`.
    pub extend_size: Vec<FailureCase>,
    /// Invalid volume references for `extend`.
    pub volume_id: Vec<FailureCase>,
}

const SHARED_SIZE_CASES: [(&str, &str); 5] = [
    ("0", "Invalid input received"),
    ("size", "invalid int value"),
    ("0.2", "invalid int value"),
    ("2 GB", "unrecognized arguments"),
    ("999999999", "VolumeSizeExceedsAvailableQuota"),
];

impl Default for FailureFixtures {
    fn default() -> Self {
        let shared = SHARED_SIZE_CASES
            .iter()
            .map(|(value, pattern)| FailureCase::new(value, pattern));

        let mut create_size = vec![
            FailureCase::new("", "Size is a required parameter"),
            FailureCase::new("-1", "Invalid volume size provided for create request"),
        ];
        create_size.extend(shared.clone());

        let mut extend_size = vec![
            FailureCase::new("", "too few arguments"),
            FailureCase::new("-1", "New size for extend must be greater than current size"),
        ];
        extend_size.extend(shared);

        Self {
            create_size,
            extend_size,
            volume_id: vec![
                FailureCase::new("", "too few arguments"),
                FailureCase::new("1234-1234-1234", "No volume with a name or ID of"),
                FailureCase::new("my_volume", "No volume with a name or ID of"),
                FailureCase::new("1234 1234", "unrecognized arguments"),
            ],
        }
    }
}

impl FailureFixtures {
    /// Parses fixtures from TOML. Missing tables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::Fixtures`] when the text is not valid TOML
    /// for this shape.
    pub fn from_toml(contents: &str) -> Result<Self, ScenarioError> {
        toml::from_str(contents).map_err(|err| ScenarioError::Fixtures {
            path: String::from("<inline>"),
            message: err.to_string(),
        })
    }

    /// Loads fixtures from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::Fixtures`] when the file cannot be read or
    /// parsed.
    pub fn load(path: &Utf8Path) -> Result<Self, ScenarioError> {
        let fixtures_error = |message: String| ScenarioError::Fixtures {
            path: path.to_string(),
            message,
        };
        let parent = match path.parent() {
            Some(dir) if !dir.as_str().is_empty() => dir,
            _ => Utf8Path::new("."),
        };
        let file_name = path
            .file_name()
            .ok_or_else(|| fixtures_error(String::from("path has no file name")))?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority())
            .map_err(|err: io::Error| fixtures_error(err.to_string()))?;
        let contents = dir
            .read_to_string(file_name)
            .map_err(|err| fixtures_error(err.to_string()))?;
        toml::from_str(&contents).map_err(|err| fixtures_error(err.to_string()))
    }
}
