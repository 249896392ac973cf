use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Prompt category a task is audited under.
///
/// Each category selects one named prompt template. The set is closed:
/// adding a category means adding a variant and its template.
///
/// # Examples
///
/// ```
/// use warden_core::Category;
///
/// let c: Category = serde_json::from_str("\"common\"").unwrap();
/// assert_eq!(c, Category::Common);
/// assert_eq!(c.to_string(), "common");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// General-purpose critical vulnerability hunt over the whole document.
    Common,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Common => write!(f, "common"),
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "common" => Ok(Category::Common),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

/// Severity tag attached to a finding.
///
/// Reviewed findings are always [`Severity::Critical`]; [`Severity::Error`]
/// marks a sentinel produced when a task could not be completed.
///
/// # Examples
///
/// ```
/// use warden_core::Severity;
///
/// assert_eq!(serde_json::to_string(&Severity::Error).unwrap(), "\"error\"");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// A proposed critical issue that went through validation.
    Critical,
    /// The task failed; the finding carries the failure text.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Terminal state of one audited task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The validator confirmed the proposed issue.
    Validated,
    /// The validator rejected the proposed issue.
    Rejected,
    /// Retries were exhausted (or the deadline hit) before a verdict.
    Error,
}

/// One reviewed unit of pipeline output.
///
/// Exactly one finding is produced per admitted task, whether the task ends
/// in a verdict or in an error.
///
/// # Examples
///
/// ```
/// use warden_core::{Category, Finding, Outcome};
///
/// let finding = Finding::reviewed(
///     "Vault",
///     Category::Common,
///     "Reentrancy in withdraw().",
///     "Analysis is correct. YES",
///     "contract Vault {}",
///     true,
/// );
/// assert_eq!(finding.outcome(), Outcome::Validated);
/// assert!(!finding.is_sentinel());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    /// Reference id of the task that produced this finding.
    pub reference_id: String,
    /// Prompt category of the task.
    pub category: Category,
    /// Proposer narrative, or the failure text for a sentinel.
    pub narrative: String,
    /// Validator response text; `None` for sentinels.
    pub verdict: Option<String>,
    /// Severity tag.
    pub severity: Severity,
    /// Excerpt of the source the finding refers to.
    pub excerpt: String,
    /// Whether the validator's decision was affirmative.
    pub validated: bool,
}

impl Finding {
    /// Build a finding that completed both proposer and validator passes.
    pub fn reviewed(
        reference_id: impl Into<String>,
        category: Category,
        narrative: impl Into<String>,
        verdict: impl Into<String>,
        excerpt: impl Into<String>,
        validated: bool,
    ) -> Self {
        Self {
            reference_id: reference_id.into(),
            category,
            narrative: narrative.into(),
            verdict: Some(verdict.into()),
            severity: Severity::Critical,
            excerpt: excerpt.into(),
            validated,
        }
    }

    /// Build an error sentinel carrying the failure text.
    ///
    /// # Examples
    ///
    /// ```
    /// use warden_core::{Category, Finding, Severity};
    ///
    /// let f = Finding::sentinel("Vault", Category::Common, "timed out", "");
    /// assert_eq!(f.severity, Severity::Error);
    /// assert!(f.narrative.contains("timed out"));
    /// assert!(!f.validated);
    /// ```
    pub fn sentinel(
        reference_id: impl Into<String>,
        category: Category,
        failure: impl fmt::Display,
        excerpt: impl Into<String>,
    ) -> Self {
        Self {
            reference_id: reference_id.into(),
            category,
            narrative: format!("Error during analysis: {failure}"),
            verdict: None,
            severity: Severity::Error,
            excerpt: excerpt.into(),
            validated: false,
        }
    }

    /// Report description: the narrative followed by the critic's verdict.
    ///
    /// Sentinels have no verdict and describe only the failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use warden_core::{Category, Finding};
    ///
    /// let f = Finding::reviewed("Vault", Category::Common, "Reentrancy.", "Valid. YES", "", true);
    /// assert_eq!(
    ///     f.description(),
    ///     "VULNERABILITY ANALYSIS:\nReentrancy.\n\nCRITIC'S VALIDATION:\nValid. YES"
    /// );
    /// ```
    pub fn description(&self) -> String {
        match &self.verdict {
            Some(verdict) => format!(
                "VULNERABILITY ANALYSIS:\n{}\n\nCRITIC'S VALIDATION:\n{verdict}",
                self.narrative
            ),
            None => self.narrative.clone(),
        }
    }

    /// Returns `true` for error sentinels.
    pub fn is_sentinel(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Classify the finding into its terminal state.
    pub fn outcome(&self) -> Outcome {
        if self.is_sentinel() {
            Outcome::Error
        } else if self.validated {
            Outcome::Validated
        } else {
            Outcome::Rejected
        }
    }
}

/// Output format for CLI subcommands.
///
/// Implements [`FromStr`] so it can be used directly with `clap` argument parsing.
///
/// # Examples
///
/// ```
/// use warden_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
///
/// let fmt: OutputFormat = "md".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Markdown);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable summary.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
    /// Markdown-formatted output.
    Markdown,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}
