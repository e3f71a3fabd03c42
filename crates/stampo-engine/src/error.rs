use std::fmt;

use thiserror::Error;

/// One independent sub-failure raised while compiling or rendering a template.
///
/// Aggregated rather than surfaced one at a time so a template author sees
/// every malformed placeholder in a single round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateIssue {
    /// Name of the offending tag, when one can be attributed.
    pub tag: Option<String>,
    /// Archive part the issue was found in (e.g. `word/document.xml`).
    pub part: String,
    /// Human-readable explanation aimed at the template author.
    pub explanation: String,
}

impl TemplateIssue {
    pub fn new(
        part: impl Into<String>,
        tag: Option<String>,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            tag,
            part: part.into(),
            explanation: explanation.into(),
        }
    }
}

impl fmt::Display for TemplateIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.explanation)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// The supplied bytes could not be opened as a ZIP-backed document package.
    #[error("template archive could not be opened: {0}")]
    Archive(String),
    /// Malformed placeholder syntax detected before any substitution.
    #[error("{} template syntax issue(s)", .0.len())]
    Syntax(Vec<TemplateIssue>),
    /// Substitution failed at render time (bad loop binding, bad image payload).
    #[error("{} render issue(s)", .0.len())]
    Render(Vec<TemplateIssue>),
    /// The caller cancelled the render before it finished.
    #[error("rendering was cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn issues(&self) -> &[TemplateIssue] {
        match self {
            EngineError::Archive(_) | EngineError::Cancelled => &[],
            EngineError::Syntax(issues) | EngineError::Render(issues) => issues,
        }
    }

    /// Flatten every explanation into one newline-joined string.
    ///
    /// Projection for the response boundary only; internal code operates on
    /// the structured issues.
    pub fn joined_details(&self) -> String {
        match self {
            EngineError::Archive(message) => message.clone(),
            EngineError::Cancelled => self.to_string(),
            EngineError::Syntax(issues) | EngineError::Render(issues) => issues
                .iter()
                .map(|issue| issue.explanation.clone())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joined_details_concatenates_every_explanation() {
        let error = EngineError::Syntax(vec![
            TemplateIssue::new("word/document.xml", None, "first problem"),
            TemplateIssue::new("word/document.xml", Some("x".into()), "second problem"),
        ]);
        assert_eq!(error.joined_details(), "first problem\nsecond problem");
    }

    #[test]
    fn archive_error_reports_its_own_message() {
        let error = EngineError::Archive("not a zip".into());
        assert_eq!(error.joined_details(), "not a zip");
        assert!(error.issues().is_empty());
    }
}
