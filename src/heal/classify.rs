// Error classification for targeted healing

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Infrastructure,
    Code,
    Auth,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Infrastructure => "infrastructure",
            ErrorCategory::Code => "code",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checked in order; the first category with a matching token wins
const RULES: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::Infrastructure,
        &["connection refused", "docker", "network", "econnrefused", "econnreset"],
    ),
    (
        ErrorCategory::Auth,
        &["401", "unauthorized", "invalid token", "authentication", "api key", "forbidden"],
    ),
    (
        ErrorCategory::Code,
        &[
            "syntax",
            "undefined",
            "type error",
            "cannot find",
            "module not found",
            "is not a function",
        ],
    ),
];

pub fn classify(error: &str) -> ErrorCategory {
    let text = error.to_lowercase();
    RULES
        .iter()
        .find(|(_, tokens)| tokens.iter().any(|t| text.contains(t)))
        .map(|(category, _)| *category)
        .unwrap_or(ErrorCategory::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_examples() {
        assert_eq!(classify("connection refused while dialing"), ErrorCategory::Infrastructure);
        assert_eq!(classify("401 unauthorized"), ErrorCategory::Auth);
        assert_eq!(classify("SyntaxError: unexpected token"), ErrorCategory::Code);
        assert_eq!(classify("disk full"), ErrorCategory::Unknown);
    }

    #[test]
    fn test_precedence() {
        // Infrastructure beats auth beats code
        assert_eq!(classify("Docker: 401 syntax"), ErrorCategory::Infrastructure);
        assert_eq!(classify("Forbidden: undefined is not a function"), ErrorCategory::Auth);
        assert_eq!(classify("TypeError: x is not a function"), ErrorCategory::Code);
        assert_eq!(classify(""), ErrorCategory::Unknown);
    }

    proptest! {
        #[test]
        fn prop_infrastructure_token_always_wins(prefix in ".{0,40}", suffix in ".{0,40}", idx in 0usize..5) {
            let token = RULES[0].1[idx].to_uppercase();
            let text = format!("{}{}{}", prefix, token, suffix);
            prop_assert_eq!(classify(&text), ErrorCategory::Infrastructure);
        }

        #[test]
        fn prop_digits_and_spaces_are_unknown_unless_401(text in "[02-9 ]{0,30}") {
            prop_assert_eq!(classify(&text), ErrorCategory::Unknown);
        }

        #[test]
        fn prop_case_insensitive(text in "[a-zA-Z0-9 :]{0,60}") {
            prop_assert_eq!(classify(&text.to_uppercase()), classify(&text.to_lowercase()));
        }
    }
}
