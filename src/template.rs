//! Template rendering behind a trait, with a minijinja implementation that loads
//! templates from a directory and carries the gateway's text filters.

use std::path::Path;

use minijinja::{AutoEscape, Environment, ErrorKind, State, Value as JinjaValue};
use serde_json::Value;
use thiserror::Error;

use crate::text;

/// Form used by the add-object endpoint when no type-specific template exists.
pub const DEFAULT_ADD_FORM: &str = "forms/add_object.html";

const DEFAULT_ADD_FORM_SOURCE: &str = r#"<form class="add-object" method="post" action="{{ submit_url }}" data-suggest-url="{{ suggest_url }}" data-success-url="{{ success_url }}">
  <input type="hidden" name="csrfmiddlewaretoken" value="{{ csrf_token }}">
  <label for="add-{{ field.name }}">{{ field.name }}</label>
  <input id="add-{{ field.name }}" type="text" name="obj_value" autocomplete="off"{% if field.help_text %} title="{{ field.help_text }}"{% endif %}>
  <ul class="suggestions"></ul>
  <button type="submit">Add {{ related_type }}</button>
</form>
"#;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("template not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Failed(String),
}

pub trait TemplateRenderer: Send + Sync {
    fn render(&self, name: &str, context: &Value) -> Result<String, RenderError>;
}

pub struct JinjaRenderer {
    env: Environment<'static>,
}

fn highlight(state: &State, value: String, query: Option<String>) -> JinjaValue {
    let query = query.unwrap_or_default();
    if matches!(state.auto_escape(), AutoEscape::Html) {
        JinjaValue::from_safe_string(text::highlight(&text::escape_html(&value), &text::escape_html(&query)))
    } else {
        JinjaValue::from(text::highlight(&value, &query))
    }
}

/// `replace("a|b")` or `replace("a", "b")`.
fn replace(value: String, what: String, with: Option<String>) -> String {
    match with {
        Some(with) => value.replace(&what, &with),
        None => text::replace_pair(&value, &what),
    }
}

fn split(value: String, sep: Option<String>) -> Vec<String> {
    match sep.as_deref() {
        None | Some("") => value.split_whitespace().map(str::to_string).collect(),
        Some(sep) => value.split(sep).map(str::to_string).collect(),
    }
}

fn markdown(state: &State, value: String) -> JinjaValue {
    let html = text::markdown(&value);
    if matches!(state.auto_escape(), AutoEscape::Html) {
        JinjaValue::from_safe_string(html)
    } else {
        JinjaValue::from(html)
    }
}

impl JinjaRenderer {
    /// Renderer with the built-in templates only.
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_filter("highlight", highlight);
        env.add_filter("replace", replace);
        env.add_filter("split", split);
        env.add_filter("markdown", markdown);
        env.add_template_owned(DEFAULT_ADD_FORM.to_string(), DEFAULT_ADD_FORM_SOURCE.to_string())
            .ok();
        JinjaRenderer { env }
    }

    /// Renderer loading templates from `dir` (`objects/<name>.<format>`, `forms/...`).
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let mut renderer = Self::new();
        renderer.env.set_loader(minijinja::path_loader(dir.as_ref()));
        renderer
    }

    /// Register or replace a template by name.
    pub fn add_template(&mut self, name: &str, source: &str) -> Result<(), RenderError> {
        self.env
            .add_template_owned(name.to_string(), source.to_string())
            .map_err(|e| RenderError::Failed(e.to_string()))
    }
}

impl Default for JinjaRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer for JinjaRenderer {
    fn render(&self, name: &str, context: &Value) -> Result<String, RenderError> {
        let tmpl = self.env.get_template(name).map_err(|e| match e.kind() {
            ErrorKind::TemplateNotFound => RenderError::NotFound(name.to_string()),
            _ => RenderError::Failed(e.to_string()),
        })?;
        tmpl.render(context).map_err(|e| RenderError::Failed(e.to_string()))
    }
}
