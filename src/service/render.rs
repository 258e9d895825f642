//! Attribute rendering through the template chain, with the string form as fallback.

use serde_json::{json, Map, Value};

use crate::error::AppError;
use crate::service::context::RequestContext;
use crate::store::Record;
use crate::template::RenderError;
use crate::text::value_to_string;

/// What is being rendered: a record of some type, or a plain field value.
#[derive(Clone, Copy, Debug)]
pub enum Renderable<'a> {
    Record(&'a Record),
    Scalar(&'a Value),
}

/// Template names tried in order for `derived` rendered under `owner`.
pub fn template_names(derived: &str, owner: &str, format: &str) -> [String; 2] {
    [
        format!("objects/{}.{}", derived, format),
        format!("objects/{}_{}.{}", owner, derived, format),
    ]
}

fn record_json(ctx: &RequestContext, record: &Record) -> Value {
    let mut v = record.to_json();
    if let (Some(entity), Value::Object(map)) = (ctx.state.registry.get_type(&record.entity), &mut v) {
        map.insert("display".into(), Value::String(entity.display(record)));
    }
    v
}

fn request_json(ctx: &RequestContext) -> Value {
    let params: Map<String, Value> = ctx
        .values
        .route_params()
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    json!({
        "path": ctx.values.path(),
        "method": ctx.values.method().as_str(),
        "params": params,
    })
}

/// Template context: the value under its derived name, the owning object under its type
/// name, plus `field`, `request`, `user`, `q` and any extras.
fn context(ctx: &RequestContext, derived: &str, value: &Value, extras: Map<String, Value>) -> Value {
    let mut map = Map::new();
    map.insert("request".into(), request_json(ctx));
    map.insert(
        "user".into(),
        json!({
            "id": ctx.principal.id,
            "username": ctx.principal.username,
            "is_authenticated": ctx.principal.is_authenticated,
            "is_staff": ctx.principal.is_staff,
        }),
    );
    map.insert("q".into(), ctx.q().map(Value::String).unwrap_or(Value::Null));
    let field = ctx
        .values
        .get("field")
        .and_then(|name| ctx.resolved().ok().and_then(|r| r.entity.field(&name).cloned()));
    if let Some(f) = field {
        map.insert(
            "field".into(),
            json!({
                "name": f.name,
                "kind": f.kind.describe(),
                "editable": f.editable,
                "help_text": f.help_text,
            }),
        );
    }
    if let (Ok(resolved), Some(obj)) = (ctx.resolved(), ctx.cached_object()) {
        let owner = record_json(ctx, obj);
        map.insert(resolved.entity.template_name(), owner.clone());
        map.insert("object".into(), owner);
    }
    // the rendered value wins over every key above
    map.insert("value".into(), value.clone());
    map.insert(derived.to_string(), value.clone());
    map.extend(extras);
    Value::Object(map)
}

/// Render one value. `json` output is parsed into a JSON value; other formats stay text.
/// Without a matching template the value's string form is returned and a debug message
/// is logged.
pub fn render(ctx: &mut RequestContext, value: Renderable<'_>, format: &str, extras: Map<String, Value>) -> Result<Value, AppError> {
    let (derived, as_json, fallback) = match value {
        Renderable::Record(record) => {
            let entity = ctx
                .state
                .registry
                .get_type(&record.entity)
                .cloned()
                .ok_or_else(|| AppError::Internal(format!("model '{}' is not registered", record.entity)))?;
            (entity.template_name(), record_json(ctx, record), entity.display(record))
        }
        Renderable::Scalar(v) => {
            let name = ctx.values.get("field").unwrap_or_else(|| "value".into());
            (name, v.clone(), value_to_string(v))
        }
    };
    let owner = ctx
        .resolved()
        .map(|r| r.entity.template_name())
        .unwrap_or_default();
    let names = template_names(&derived, &owner, format);
    let context = context(ctx, &derived, &as_json, extras);

    for name in &names {
        match ctx.state.renderer.render(name, &context) {
            Ok(text) => return finish(text, format),
            Err(RenderError::NotFound(_)) => continue,
            Err(RenderError::Failed(e)) => {
                tracing::warn!(template = %name, error = %e, "template rendering failed");
                ctx.messages.debug(format!("Error rendering template {}: {}", name, e));
                return Ok(Value::String(fallback));
            }
        }
    }
    ctx.messages.debug(format!(
        "No template found for {}, falling back to the string form",
        names.join(" or ")
    ));
    Ok(Value::String(fallback))
}

/// Render a named template chain directly: the first template that exists wins.
pub fn render_first(ctx: &mut RequestContext, names: &[String], context: &Value) -> Result<String, AppError> {
    for name in names {
        match ctx.state.renderer.render(name, context) {
            Ok(text) => return Ok(text),
            Err(RenderError::NotFound(_)) => continue,
            Err(RenderError::Failed(e)) => return Err(AppError::Render(format!("{}: {}", name, e))),
        }
    }
    Err(AppError::Render(format!("no template found for {}", names.join(" or "))))
}

fn finish(text: String, format: &str) -> Result<Value, AppError> {
    if format != "json" {
        return Ok(Value::String(text));
    }
    serde_json::from_str(&text).map_err(|e| AppError::Render(format!("invalid json output: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_try_plain_then_owner_prefixed() {
        let [a, b] = template_names("genre", "book", "html");
        assert_eq!(a, "objects/genre.html");
        assert_eq!(b, "objects/book_genre.html");
    }

    #[test]
    fn json_output_must_parse() {
        assert_eq!(finish("{\"a\": 1}".into(), "json").unwrap(), json!({"a": 1}));
        assert_eq!(finish("<b>x</b>".into(), "html").unwrap(), json!("<b>x</b>"));
        let err = finish("not json".into(), "json").unwrap_err();
        assert!(err.user_message().starts_with("Error rendering attribute: invalid json output"));
    }
}
