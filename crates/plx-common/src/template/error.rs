//! Template error types

use std::fmt;

/// Errors that can occur during template operations
#[derive(Debug)]
pub enum TemplateError {
    /// Template rendering failed
    Render(minijinja::Error),
    /// Template syntax is invalid
    Syntax(String),
    /// Expression rendered to a value that cannot be used in place
    Unrepresentable(String),
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Render(e) => write!(f, "template render error: {}", e),
            Self::Syntax(msg) => write!(f, "template syntax error: {}", msg),
            Self::Unrepresentable(expr) => {
                write!(f, "template expression '{}' produced an unusable value", expr)
            }
        }
    }
}

impl std::error::Error for TemplateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Render(e) => Some(e),
            _ => None,
        }
    }
}

impl From<minijinja::Error> for TemplateError {
    fn from(err: minijinja::Error) -> Self {
        Self::Render(err)
    }
}
