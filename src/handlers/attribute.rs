//! Attribute endpoints: read, suggest, set and the add-object form.
//! Every handler builds a request context and always answers with the envelope.

use axum::{extract::State, Extension};
use serde_json::{json, Map, Value};

use crate::config::{Action, FieldKind};
use crate::csrf;
use crate::error::AppError;
use crate::extractors::{CurrentPrincipal, RequestValues};
use crate::response::Envelope;
use crate::service::render::{render, render_first, Renderable};
use crate::service::{mutation, search, FieldValue, RequestContext, RouteInfo};
use crate::state::AppState;
use crate::store::{Filter, Query};
use crate::template::DEFAULT_ADD_FORM;

const DEFAULT_FORMAT: &str = "html";

/// GET: the rendered value(s) of one field of one object.
pub async fn get_attributes(
    State(state): State<AppState>,
    Extension(route): Extension<RouteInfo>,
    CurrentPrincipal(principal): CurrentPrincipal,
    values: RequestValues,
) -> Envelope {
    let mut ctx = RequestContext::new(state, values, principal, route);
    let result = read_attribute(&mut ctx).await;
    ctx.finish(result)
}

async fn read_attribute(ctx: &mut RequestContext) -> Result<(), AppError> {
    ctx.entity_type(Action::Read)?;
    ctx.object().await?;
    let field = ctx.field()?;
    let format = ctx.values.get_or("format", DEFAULT_FORMAT);

    match ctx.field_value().await? {
        FieldValue::Collection(query) => {
            let q = ctx.q();
            let query = search::search(&ctx.state.registry, query, q.as_deref(), &mut ctx.messages);
            let records = ctx.state.store.fetch(&query).await?;
            ctx.messages
                .debug(format!("Found {} related objects for {}", records.len(), field.name));
            for record in &records {
                let v = render(ctx, Renderable::Record(record), &format, Map::new())?;
                ctx.payload.push(v);
            }
        }
        FieldValue::Object(Some(record)) => {
            let v = render(ctx, Renderable::Record(&record), &format, Map::new())?;
            ctx.payload.push(v);
        }
        FieldValue::Object(None) => {
            ctx.messages.debug(format!("The field {} is not set", field.name));
        }
        FieldValue::Scalar(value) => {
            if matches!(field.kind, FieldKind::Callable(_)) {
                ctx.messages.debug(format!("The field {} is computed", field.name));
            }
            let v = render(ctx, Renderable::Scalar(&value), &format, Map::new())?;
            ctx.payload.push(v);
        }
    }
    Ok(())
}

/// GET: related records not yet linked through a relation field, optionally narrowed by `q`.
pub async fn get_suggestions(
    State(state): State<AppState>,
    Extension(route): Extension<RouteInfo>,
    CurrentPrincipal(principal): CurrentPrincipal,
    values: RequestValues,
) -> Envelope {
    let mut ctx = RequestContext::new(state, values, principal, route);
    let result = suggest(&mut ctx).await;
    ctx.finish(result)
}

async fn suggest(ctx: &mut RequestContext) -> Result<(), AppError> {
    ctx.entity_type(Action::Suggest)?;
    let obj = ctx.object().await?;
    let field = ctx.field()?;
    let related = ctx.state.registry.related_type(&field)?;
    let read = ctx
        .state
        .registry
        .resolve(&related.label, Action::Read, &ctx.principal)?;

    let linked = match ctx.field_value().await? {
        FieldValue::Collection(query) => query,
        _ => {
            let current = obj.related_pk(&field.name).map(Filter::Pk).unwrap_or(Filter::Nothing);
            Query::all(&related.label).filter(current)
        }
    };
    let extra = if read.owner_scoped() {
        related.owner_filter(&ctx.principal).unwrap_or(Filter::Nothing)
    } else {
        Filter::All
    };
    let candidates = search::unused_related(ctx.state.store.as_ref(), &related, &linked, extra).await?;
    let q = ctx.q();
    let candidates = search::search(&ctx.state.registry, candidates, q.as_deref(), &mut ctx.messages);
    let records = ctx.state.store.fetch(&candidates).await?;
    ctx.messages
        .debug(format!("Found {} suggestions for {}", records.len(), field.name));

    let format = ctx.values.get_or("format", "json");
    for record in &records {
        let v = render(ctx, Renderable::Record(record), &format, Map::new())?;
        ctx.payload.push(v);
    }
    Ok(())
}

/// GET or POST: toggle or assign a field of one object.
pub async fn set_attribute(
    State(state): State<AppState>,
    Extension(route): Extension<RouteInfo>,
    CurrentPrincipal(principal): CurrentPrincipal,
    values: RequestValues,
) -> Envelope {
    let mut ctx = RequestContext::new(state, values, principal, route);
    let result = set(&mut ctx).await;
    ctx.finish(result)
}

async fn set(ctx: &mut RequestContext) -> Result<(), AppError> {
    ctx.entity_type(Action::Set)?;
    csrf::check(&ctx.state.settings, &ctx.values, &mut ctx.messages)?;
    ctx.object().await?;
    ctx.field()?;
    mutation::apply(ctx).await
}

/// GET: HTML form for adding a related object to a relation field.
pub async fn add_form(
    State(state): State<AppState>,
    Extension(route): Extension<RouteInfo>,
    CurrentPrincipal(principal): CurrentPrincipal,
    values: RequestValues,
) -> Envelope {
    let mut ctx = RequestContext::new(state, values, principal, route);
    let result = render_add_form(&mut ctx).await;
    ctx.finish(result)
}

/// `<pk>:<slug>`, `<slug>` or `self`, as the object was addressed.
fn ident(ctx: &RequestContext) -> String {
    if ctx.route.self_scoped {
        return "self".to_string();
    }
    let slug = ctx.values.get("slug").unwrap_or_default();
    match ctx.values.get("pk") {
        Some(pk) => format!("{}:{}", pk, slug),
        None => slug,
    }
}

async fn render_add_form(ctx: &mut RequestContext) -> Result<(), AppError> {
    let resolved = ctx.entity_type(Action::Set)?;
    let obj = ctx.object().await?;
    let field = ctx.field()?;
    let related = ctx.state.registry.related_type(&field)?;

    let base = format!(
        "{}/{}/{}",
        ctx.state.settings.prefix.trim_end_matches('/'),
        resolved.entity.label,
        ident(ctx)
    );
    let csrf_token = ctx
        .values
        .cookie(&ctx.state.settings.session_cookie)
        .and_then(|session| csrf::issue_token(&ctx.state.settings.csrf_secret, &session))
        .unwrap_or_default();
    let mut object = obj.to_json();
    if let Value::Object(map) = &mut object {
        map.insert("display".into(), Value::String(resolved.entity.display(&obj)));
    }
    let context = json!({
        "object": object,
        "model": resolved.entity.label,
        "field": {
            "name": field.name,
            "kind": field.kind.describe(),
            "help_text": field.help_text,
        },
        "related_type": related.name,
        "submit_url": format!("{}/set/{}/", base, field.name),
        "suggest_url": format!("{}/suggest/{}/", base, field.name),
        "success_url": format!("{}/attribute/{}/", base, field.name),
        "csrf_token": csrf_token,
        "csrf_field": csrf::TOKEN_FIELD,
        "q": ctx.q(),
    });
    let names = [format!("forms/add_{}.html", related.template_name()), DEFAULT_ADD_FORM.to_string()];
    let html = render_first(ctx, &names, &context)?;
    ctx.payload.push(Value::String(html));
    Ok(())
}
