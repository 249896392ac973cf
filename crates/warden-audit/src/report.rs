use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use warden_core::Finding;

/// Findings after aggregation: sentinels split off, verdicts ordered.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    /// Validated findings followed by rejected ones, each group in
    /// arrival order.
    pub findings: Vec<Finding>,
    /// Error sentinels in arrival order.
    pub errors: Vec<Finding>,
    /// Number of validated findings.
    pub validated: usize,
    /// Number of rejected findings.
    pub rejected: usize,
}

impl Aggregate {
    /// Validated plus rejected; sentinels are not counted.
    pub fn total(&self) -> usize {
        self.validated + self.rejected
    }
}

/// Order findings validated-first and separate out error sentinels.
///
/// The partition is stable: findings keep their arrival order within the
/// validated, rejected and error groups.
///
/// # Examples
///
/// ```
/// use warden_audit::report::aggregate;
/// use warden_core::{Category, Finding};
///
/// let rejected = Finding::reviewed("a", Category::Common, "n", "NO", "", false);
/// let validated = Finding::reviewed("b", Category::Common, "n", "YES", "", true);
/// let error = Finding::sentinel("c", Category::Common, "boom", "");
///
/// let agg = aggregate(vec![rejected, error, validated]);
/// assert_eq!(agg.findings[0].reference_id, "b");
/// assert_eq!(agg.total(), 2);
/// assert_eq!(agg.errors.len(), 1);
/// ```
pub fn aggregate(findings: Vec<Finding>) -> Aggregate {
    let mut validated = Vec::new();
    let mut rejected = Vec::new();
    let mut errors = Vec::new();
    for finding in findings {
        if finding.is_sentinel() {
            errors.push(finding);
        } else if finding.validated {
            validated.push(finding);
        } else {
            rejected.push(finding);
        }
    }
    let validated_count = validated.len();
    let rejected_count = rejected.len();
    validated.extend(rejected);
    Aggregate {
        findings: validated,
        errors,
        validated: validated_count,
        rejected: rejected_count,
    }
}

/// Result of a completed audit run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    /// Validated findings first, then rejected ones. Sentinels excluded.
    pub findings: Vec<Finding>,
    /// Error sentinels, reported apart from the verdict tallies.
    pub errors: Vec<Finding>,
    /// Statistics about the run.
    pub stats: AuditStats,
}

/// Statistics about an audit run.
///
/// # Examples
///
/// ```
/// use warden_audit::report::AuditStats;
///
/// let stats = AuditStats {
///     tasks: 3,
///     total: 2,
///     validated: 1,
///     rejected: 1,
///     errors: 1,
///     model_used: "gpt-4o".into(),
///     started_at: chrono::Utc::now(),
///     elapsed_ms: 1200,
/// };
/// assert_eq!(stats.tasks, stats.total + stats.errors);
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStats {
    /// Tasks admitted by the scheduler.
    pub tasks: usize,
    /// Findings with a verdict (validated + rejected).
    pub total: usize,
    /// Findings confirmed by the validator.
    pub validated: usize,
    /// Findings rejected by the validator.
    pub rejected: usize,
    /// Tasks that ended as error sentinels.
    pub errors: usize,
    /// Model identifier used for the run.
    pub model_used: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration of the run.
    pub elapsed_ms: u64,
}

impl AuditReport {
    /// Assemble a report from unordered pipeline output.
    pub fn from_findings(
        findings: Vec<Finding>,
        model_used: impl Into<String>,
        started_at: DateTime<Utc>,
        elapsed_ms: u64,
    ) -> Self {
        let tasks = findings.len();
        let agg = aggregate(findings);
        let stats = AuditStats {
            tasks,
            total: agg.total(),
            validated: agg.validated,
            rejected: agg.rejected,
            errors: agg.errors.len(),
            model_used: model_used.into(),
            started_at,
            elapsed_ms,
        };
        Self {
            findings: agg.findings,
            errors: agg.errors,
            stats,
        }
    }

    /// Findings confirmed by the validator.
    pub fn validated(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.validated)
    }

    /// Findings rejected by the validator.
    pub fn rejected(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| !f.validated)
    }

    /// Render the report as markdown.
    ///
    /// # Examples
    ///
    /// ```
    /// use warden_audit::report::AuditReport;
    ///
    /// let report = AuditReport::from_findings(vec![], "gpt-4o", chrono::Utc::now(), 0);
    /// let md = report.to_markdown();
    /// assert!(md.contains("# Audit Summary"));
    /// ```
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# Audit Summary\n\n");
        out.push_str(&format!(
            "**Model:** {} | **Tasks:** {} | **Findings:** {} | **Confirmed:** {} | **Rejected:** {} | **Errors:** {}\n\n",
            self.stats.model_used,
            self.stats.tasks,
            self.stats.total,
            self.stats.validated,
            self.stats.rejected,
            self.stats.errors,
        ));

        if self.findings.is_empty() {
            out.push_str("No critical or major issues found.\n");
        }
        if self.stats.validated > 0 {
            out.push_str("## \u{1f534} Confirmed vulnerabilities\n\n");
            for (i, f) in self.validated().enumerate() {
                push_markdown_finding(&mut out, i + 1, f, "\u{2713} Confirmed");
            }
        }
        if self.stats.rejected > 0 {
            out.push_str("## \u{26a0}\u{fe0f} Rejected findings\n\n");
            for (i, f) in self.rejected().enumerate() {
                push_markdown_finding(&mut out, i + 1, f, "\u{2717} Rejected");
            }
        }
        if !self.errors.is_empty() {
            out.push_str("## Errors\n\n");
            for f in &self.errors {
                out.push_str(&format!(
                    "- `{}` ({}): {}\n",
                    f.reference_id, f.category, f.narrative
                ));
            }
            out.push('\n');
        }
        out
    }
}

fn push_markdown_finding(out: &mut String, index: usize, f: &Finding, label: &str) {
    out.push_str(&format!(
        "### Issue #{index} (Critic: {label}) `{}`\n\n",
        f.reference_id
    ));
    out.push_str(&format!(
        "**Category:** {} | **Severity:** {}\n\n",
        f.category, f.severity
    ));
    out.push_str(&format!("{}\n\n", f.narrative));
    if let Some(verdict) = &f.verdict {
        out.push_str(&format!("> **Critic:** {}\n\n", verdict.replace('\n', "\n> ")));
    }
    if !f.excerpt.is_empty() {
        out.push_str(&format!(
            "<details><summary>Relevant code</summary>\n\n```\n{}\n```\n\n</details>\n\n",
            f.excerpt.trim_end()
        ));
    }
}

impl fmt::Display for AuditReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Audit Summary")?;
        writeln!(f, "=============")?;
        writeln!(
            f,
            "Model: {} | Tasks: {} | Elapsed: {:.1}s",
            self.stats.model_used,
            self.stats.tasks,
            self.stats.elapsed_ms as f64 / 1000.0,
        )?;
        writeln!(f, "Total issues found: {}", self.stats.total)?;
        writeln!(f, "Issues confirmed by critic: {}", self.stats.validated)?;
        writeln!(f, "Issues rejected by critic: {}", self.stats.rejected)?;
        if self.stats.errors > 0 {
            writeln!(f, "Tasks failed: {}", self.stats.errors)?;
        }
        writeln!(f)?;

        if self.findings.is_empty() {
            writeln!(f, "No critical or major issues found.")?;
        }
        if self.stats.validated > 0 {
            writeln!(f, "CONFIRMED VULNERABILITIES:")?;
            writeln!(f, "--------------------------")?;
            for (i, finding) in self.validated().enumerate() {
                write_finding(f, i + 1, finding, "Confirmed")?;
            }
        }
        if self.stats.rejected > 0 {
            writeln!(f, "REJECTED FINDINGS:")?;
            writeln!(f, "------------------")?;
            for (i, finding) in self.rejected().enumerate() {
                write_finding(f, i + 1, finding, "Rejected")?;
            }
        }
        if !self.errors.is_empty() {
            writeln!(f, "ERRORS:")?;
            writeln!(f, "-------")?;
            for e in &self.errors {
                writeln!(f, "[{}] {} ({})", e.reference_id, e.narrative, e.category)?;
            }
        }
        Ok(())
    }
}

fn write_finding(
    f: &mut fmt::Formatter<'_>,
    index: usize,
    finding: &Finding,
    label: &str,
) -> fmt::Result {
    writeln!(f, "\nIssue #{index} (Critic: {label}) [{}]", finding.reference_id)?;
    writeln!(f, "Category: {}", finding.category)?;
    writeln!(f, "Severity: {}", finding.severity)?;
    writeln!(f, "Description: {}", finding.description())?;
    if !finding.excerpt.is_empty() {
        writeln!(f, "\nRelevant Code:")?;
        writeln!(f, "--------------")?;
        writeln!(f, "{}", finding.excerpt.trim_end())?;
        writeln!(f, "--------------")?;
    }
    writeln!(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::{Category, Outcome};

    fn reviewed(id: &str, validated: bool) -> Finding {
        Finding::reviewed(
            id,
            Category::Common,
            format!("narrative {id}"),
            if validated { "YES" } else { "NO" },
            "contract C {}",
            validated,
        )
    }

    #[test]
    fn validated_precede_rejected_in_arrival_order() {
        let input = vec![
            reviewed("r1", false),
            reviewed("v1", true),
            Finding::sentinel("e1", Category::Common, "boom", ""),
            reviewed("r2", false),
            reviewed("v2", true),
        ];
        let agg = aggregate(input);
        let ids: Vec<&str> = agg.findings.iter().map(|f| f.reference_id.as_str()).collect();
        assert_eq!(ids, vec!["v1", "v2", "r1", "r2"]);
        assert_eq!(agg.validated, 2);
        assert_eq!(agg.rejected, 2);
        assert_eq!(agg.errors.len(), 1);
        assert_eq!(agg.errors[0].outcome(), Outcome::Error);
    }

    #[test]
    fn sentinels_are_not_counted_as_rejected() {
        let agg = aggregate(vec![
            Finding::sentinel("e1", Category::Common, "boom", ""),
            Finding::sentinel("e2", Category::Common, "boom", ""),
        ]);
        assert!(agg.findings.is_empty());
        assert_eq!(agg.total(), 0);
        assert_eq!(agg.rejected, 0);
        assert_eq!(agg.errors.len(), 2);
    }

    #[test]
    fn report_accounts_for_every_task() {
        let report = AuditReport::from_findings(
            vec![
                reviewed("a", true),
                Finding::sentinel("b", Category::Common, "boom", ""),
                reviewed("c", false),
            ],
            "test",
            Utc::now(),
            10,
        );
        assert_eq!(report.stats.tasks, 3);
        assert_eq!(report.stats.total, 2);
        assert_eq!(report.stats.tasks, report.stats.total + report.stats.errors);
        assert_eq!(report.validated().count(), 1);
        assert_eq!(report.rejected().count(), 1);
    }

    #[test]
    fn display_and_markdown_output() {
        let report = AuditReport::from_findings(
            vec![
                reviewed("Vault", true),
                reviewed("Token", false),
                Finding::sentinel("Broken", Category::Common, "retries exhausted", ""),
            ],
            "test",
            Utc::now(),
            0,
        );
        let text = report.to_string();
        assert!(text.contains("Issues confirmed by critic: 1"));
        assert!(text.contains("CONFIRMED VULNERABILITIES"));
        assert!(text.contains("REJECTED FINDINGS"));
        assert!(text.contains("retries exhausted"));
        assert!(text.find("[Vault]").unwrap() < text.find("[Token]").unwrap());
        assert!(text.contains("Description: VULNERABILITY ANALYSIS:\nnarrative Vault"));
        assert!(text.contains("CRITIC'S VALIDATION:\nYES"));
        assert_eq!(text.matches("Relevant Code:\n--------------\ncontract C {}").count(), 2);

        let md = report.to_markdown();
        assert!(md.contains("# Audit Summary"));
        assert!(md.contains("Confirmed vulnerabilities"));
        assert!(md.contains("> **Critic:** YES"));
        assert_eq!(md.matches("```\ncontract C {}\n```").count(), 2);
        assert!(md.contains("## Errors"));
    }

    #[test]
    fn json_uses_camel_case() {
        let report = AuditReport::from_findings(vec![reviewed("a", true)], "m", Utc::now(), 5);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["stats"]["modelUsed"], "m");
        assert_eq!(json["findings"][0]["validated"], true);
        assert!(json["stats"].get("elapsedMs").is_some());
    }
}
