//! Error redirect rules.
//!
//! Admins configure rows of `substring|destination`, one per line. When a
//! login fails, the first rule whose substring occurs in the error message
//! decides where the user is sent. Without a match the host shows its
//! generic error page.

/// A single `substring|destination` rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRedirectRule {
    /// Text that must appear in the error message.
    pub pattern: String,
    /// Where to send the user.
    pub destination: String,
}

impl ErrorRedirectRule {
    /// Creates a rule.
    #[must_use]
    pub fn new(pattern: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            destination: destination.into(),
        }
    }

    /// Parses a single row.
    ///
    /// Returns `None` for rows without a `|`, or with an empty pattern or
    /// destination. An empty pattern would otherwise match every message.
    #[must_use]
    pub fn parse(row: &str) -> Option<Self> {
        let (pattern, destination) = row.split_once('|')?;
        let pattern = pattern.trim();
        let destination = destination.trim();
        if pattern.is_empty() || destination.is_empty() {
            return None;
        }
        Some(Self::new(pattern, destination))
    }

    /// Returns `true` if the rule applies to `message`.
    #[must_use]
    pub fn matches(&self, message: &str) -> bool {
        message.contains(self.pattern.as_str())
    }
}

/// Parses newline-delimited rule rows, skipping malformed ones.
#[must_use]
pub fn parse_rules(raw: &str) -> Vec<ErrorRedirectRule> {
    raw.lines()
        .filter(|row| !row.trim().is_empty())
        .filter_map(|row| {
            let rule = ErrorRedirectRule::parse(row);
            if rule.is_none() {
                tracing::debug!(row = %row, "Skipping malformed error redirect rule");
            }
            rule
        })
        .collect()
}

/// Returns the destination of the first rule matching `message`.
#[must_use]
pub fn route<'a>(message: &str, rules: &'a [ErrorRedirectRule]) -> Option<&'a str> {
    rules
        .iter()
        .find(|rule| rule.matches(message))
        .map(|rule| rule.destination.as_str())
}

/// Routes failure messages to redirect destinations.
///
/// Injected into the engine so hosts can replace the matching strategy.
pub trait ErrorRouter: Send + Sync {
    /// Returns the redirect destination for `message`, if any rule applies.
    fn route(&self, message: &str, rules: &[ErrorRedirectRule]) -> Option<String>;
}

/// First-match substring router.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubstringErrorRouter;

impl ErrorRouter for SubstringErrorRouter {
    fn route(&self, message: &str, rules: &[ErrorRedirectRule]) -> Option<String> {
        route(message, rules).map(str::to_string)
    }
}
