//! Sandboxed `{{ ... }}` templating for operation documents
//!
//! - [`engine`] wraps minijinja with chainable-undefined semantics
//! - [`filters`] holds the `map_format` filter
//! - [`error`] defines [`TemplateError`]

mod engine;
mod error;
mod filters;

pub use engine::{RenderReport, TemplateEngine};
pub use error::TemplateError;
