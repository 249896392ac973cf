use warden_core::Category;

/// Literal token every proposer response must end with.
pub const END_MARKER: &str = "#END#";

const AFFIRMATIVE: &str = "YES";
const NEGATIVE: &str = "NO";

const AUDITOR_SYSTEM_PROMPT: &str = "You are an expert smart contract security auditor. \
Your task is to find critical vulnerabilities in the provided code.";

const CRITIC_SYSTEM_PROMPT: &str = "You are an expert smart contract security auditor \
with years of experience in detecting false positives.";

const COMMON_TEMPLATE: &str = "
URGENT SECURITY AUDIT!

Analyze the following smart contract. Identify any critical vulnerability in the contract \
and provide a concise explanation of the issue.

Smart Contract:
{code}
";

/// System instruction for the proposer pass.
pub fn proposer_system_prompt() -> &'static str {
    AUDITOR_SYSTEM_PROMPT
}

/// System instruction for the validator pass.
pub fn validator_system_prompt() -> &'static str {
    CRITIC_SYSTEM_PROMPT
}

/// Prompt template registered for `category`.
///
/// Templates contain a `{code}` placeholder for the document text.
///
/// # Examples
///
/// ```
/// use warden_audit::prompt::template_for;
/// use warden_core::Category;
///
/// assert!(template_for(Category::Common).contains("{code}"));
/// ```
pub fn template_for(category: Category) -> &'static str {
    match category {
        Category::Common => COMMON_TEMPLATE,
    }
}

/// Render the proposer prompt: the category template filled with the
/// document, followed by the end-marker instruction.
///
/// # Examples
///
/// ```
/// use warden_audit::prompt::{render_proposer_prompt, template_for, END_MARKER};
/// use warden_core::Category;
///
/// let prompt = render_proposer_prompt(template_for(Category::Common), "contract A {}");
/// assert!(prompt.contains("contract A {}"));
/// assert!(prompt.trim_end().ends_with(END_MARKER));
/// ```
pub fn render_proposer_prompt(template: &str, input: &str) -> String {
    let mut prompt = template.replace("{code}", input);
    prompt.push_str(&format!(
        "\n\nIMPORTANT: End your analysis with the marker {END_MARKER}"
    ));
    prompt
}

/// Render the validator prompt from the document and the proposer narrative.
pub fn render_validator_prompt(input: &str, narrative: &str) -> String {
    format!(
        "
URGENT SECURITY VALIDATION!

Evaluate the vulnerability analysis provided below for the given smart contract.
Decide if the analysis correctly identifies a critical vulnerability.
Your response must end with either '{AFFIRMATIVE}' if the analysis is valid or '{NEGATIVE}' if not.

Smart Contract:
{input}

Vulnerability analysis:
{narrative}
"
    )
}

/// A response that does not honor its stage's terminal-token contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractViolation {
    /// Proposer output did not end with [`END_MARKER`].
    #[error("response does not end with the required marker #END#")]
    MissingEndMarker,
    /// Validator output did not end with `YES` or `NO`.
    #[error("critic response does not end with YES or NO (ends with {tail:?})")]
    MissingVerdict {
        /// Last few characters of the offending response.
        tail: String,
    },
}

/// Validator decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The proposed issue is confirmed.
    Yes,
    /// The proposed issue is rejected.
    No,
}

impl Verdict {
    /// Returns `true` for [`Verdict::Yes`].
    pub fn is_affirmative(self) -> bool {
        self == Verdict::Yes
    }
}

/// Remove trailing [`END_MARKER`] tokens and the whitespace around them.
///
/// Text that does not end with the marker is returned unchanged, so the
/// operation is idempotent.
///
/// # Examples
///
/// ```
/// use warden_audit::prompt::strip_end_marker;
///
/// assert_eq!(strip_end_marker("Reentrancy bug found.#END#"), "Reentrancy bug found.");
/// assert_eq!(strip_end_marker("Reentrancy bug found."), "Reentrancy bug found.");
/// ```
pub fn strip_end_marker(text: &str) -> &str {
    let mut rest = text.trim_end();
    let mut stripped = false;
    while let Some(head) = rest.strip_suffix(END_MARKER) {
        rest = head.trim_end();
        stripped = true;
    }
    if stripped {
        rest
    } else {
        text
    }
}

/// Accept a proposer response and return its narrative.
///
/// # Errors
///
/// Returns [`ContractViolation::MissingEndMarker`] if the trimmed response
/// does not end with [`END_MARKER`].
///
/// # Examples
///
/// ```
/// use warden_audit::prompt::parse_narrative;
///
/// let narrative = parse_narrative("Reentrancy bug found.#END#\n").unwrap();
/// assert_eq!(narrative, "Reentrancy bug found.");
/// assert!(parse_narrative("Reentrancy bug found.").is_err());
/// ```
pub fn parse_narrative(response: &str) -> Result<String, ContractViolation> {
    let trimmed = response.trim();
    if !trimmed.ends_with(END_MARKER) {
        return Err(ContractViolation::MissingEndMarker);
    }
    Ok(strip_end_marker(trimmed).trim().to_string())
}

/// Accept a validator response and return its decision.
///
/// After trimming whitespace the response must end with the text `YES` or
/// `NO`. Matching is a case-sensitive suffix check, `YES` first, so a
/// token glued to the preceding word (`validYES`, `ConfirmedNO`) still
/// counts.
///
/// # Errors
///
/// Returns [`ContractViolation::MissingVerdict`] for any other ending.
///
/// # Examples
///
/// ```
/// use warden_audit::prompt::{parse_verdict, Verdict};
///
/// assert_eq!(parse_verdict("Looks correct. YES").unwrap(), Verdict::Yes);
/// assert_eq!(parse_verdict("False positive.\nNO\n").unwrap(), Verdict::No);
/// assert!(parse_verdict("Looks correct. yes").is_err());
/// ```
pub fn parse_verdict(response: &str) -> Result<Verdict, ContractViolation> {
    let trimmed = response.trim();
    if trimmed.ends_with(AFFIRMATIVE) {
        Ok(Verdict::Yes)
    } else if trimmed.ends_with(NEGATIVE) {
        Ok(Verdict::No)
    } else {
        let tail: String = {
            let chars: Vec<char> = trimmed.chars().rev().take(16).collect();
            chars.into_iter().rev().collect()
        };
        Err(ContractViolation::MissingVerdict { tail })
    }
}
