//! Sandboxed template engine for operation documents
//!
//! Only `{{ ... }}` expressions are evaluated, each one through minijinja's
//! expression compiler; statement and comment delimiters are literal text.
//! The environment has no access to host identifiers; the only registered
//! extension is the `map_format` filter. Undefined identifiers (and chained
//! lookups on them) render as empty strings.

use minijinja::value::ValueKind;
use minijinja::{Environment, UndefinedBehavior, Value};

use super::error::TemplateError;
use super::filters;

/// Template engine used for context substitution
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine").finish_non_exhaustive()
    }
}

/// Result of walking a JSON tree through the engine
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RenderReport {
    /// JSON pointers of whole-expression strings that rendered empty
    pub empty_paths: Vec<String>,
    /// Expressions (inner text) that rendered empty, aligned with `empty_paths`
    pub empty_expressions: Vec<String>,
}

impl TemplateEngine {
    /// Create a new sandboxed engine
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        env.add_filter("map_format", filters::map_format);
        Self { env }
    }

    /// Check if a string contains any template syntax
    pub fn has_template_syntax(s: &str) -> bool {
        s.contains("{{")
    }

    /// Return the inner expression when the whole string is one `{{ expr }}`
    pub fn whole_expression(s: &str) -> Option<&str> {
        let trimmed = s.trim();
        let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
        if inner.contains("{{") || inner.contains("}}") {
            return None;
        }
        Some(inner.trim())
    }

    /// Render a template string with the given context
    pub fn render(&self, template: &str, ctx: &serde_json::Value) -> Result<String, TemplateError> {
        if !Self::has_template_syntax(template) {
            return Ok(template.to_string());
        }
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| TemplateError::Syntax(format!("unclosed expression in `{}`", template)))?;
            let expr = after[..end].trim();
            let value = self.evaluate(expr, ctx)?;
            out.push_str(&value_to_string(&value, expr)?);
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Evaluate a single expression (without delimiters) to a value
    pub fn evaluate(&self, expression: &str, ctx: &serde_json::Value) -> Result<Value, TemplateError> {
        let expr = self.env.compile_expression(expression)?;
        Ok(expr.eval(ctx)?)
    }

    /// Render every string inside a JSON tree in place.
    ///
    /// Whole-expression strings are evaluated so that sequence results can be
    /// spliced into a parent array (`args: ["{{ xs | map_format('-f={}') }}"]`).
    /// Scalars are rendered to their string form; typed fields coerce later.
    pub fn render_json(
        &self,
        value: &mut serde_json::Value,
        ctx: &serde_json::Value,
    ) -> Result<RenderReport, TemplateError> {
        let mut report = RenderReport::default();
        self.render_node(value, ctx, "", &mut report)?;
        Ok(report)
    }

    fn render_node(
        &self,
        value: &mut serde_json::Value,
        ctx: &serde_json::Value,
        pointer: &str,
        report: &mut RenderReport,
    ) -> Result<(), TemplateError> {
        match value {
            serde_json::Value::String(s) => {
                if let Some(rendered) = self.render_scalar(s, ctx, pointer, report)? {
                    *value = serde_json::Value::String(rendered);
                }
            }
            serde_json::Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (idx, mut item) in std::mem::take(items).into_iter().enumerate() {
                    let child = format!("{}/{}", pointer, idx);
                    if let serde_json::Value::String(s) = &item {
                        if let Some(expr) = Self::whole_expression(s) {
                            let evaluated = self.evaluate(expr, ctx)?;
                            if evaluated.kind() == ValueKind::Seq {
                                for element in evaluated.try_iter()? {
                                    out.push(serde_json::Value::String(element.to_string()));
                                }
                                continue;
                            }
                        }
                    }
                    self.render_node(&mut item, ctx, &child, report)?;
                    out.push(item);
                }
                *items = out;
            }
            serde_json::Value::Object(map) => {
                for (key, child_value) in map.iter_mut() {
                    let child = format!("{}/{}", pointer, key);
                    self.render_node(child_value, ctx, &child, report)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn render_scalar(
        &self,
        s: &str,
        ctx: &serde_json::Value,
        pointer: &str,
        report: &mut RenderReport,
    ) -> Result<Option<String>, TemplateError> {
        if !Self::has_template_syntax(s) {
            return Ok(None);
        }
        let Some(expr) = Self::whole_expression(s) else {
            return self.render(s, ctx).map(Some);
        };

        let evaluated = self.evaluate(expr, ctx)?;
        let rendered = value_to_string(&evaluated, expr)?;
        if rendered.is_empty() {
            report.empty_paths.push(pointer.to_string());
            report.empty_expressions.push(expr.to_string());
        }
        Ok(Some(rendered))
    }
}

fn value_to_string(value: &Value, expr: &str) -> Result<String, TemplateError> {
    if value.is_undefined() || value.is_none() {
        return Ok(String::new());
    }
    match value.kind() {
        ValueKind::Seq | ValueKind::Map => serde_json::to_string(value)
            .map_err(|_| TemplateError::Unrepresentable(expr.to_string())),
        _ => Ok(value.to_string()),
    }
}
