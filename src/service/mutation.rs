//! Attribute mutation: toggles for booleans and relations, assignment for text fields,
//! and lookup-or-create of related records.

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::config::{FieldDescriptor, FieldKind, ScalarType, TypeDescriptor};
use crate::error::AppError;
use crate::service::context::RequestContext;
use crate::service::new_value::NewValue;
use crate::store::{Filter, Query, Record};
use crate::text::{capitalize, slugify};

/// Fields a loose value is matched against when looking up a related record, in order.
pub const MATCH_FIELDS: [&str; 2] = ["name", "title"];

/// Apply the set request to the resolved object's field.
pub async fn apply(ctx: &mut RequestContext) -> Result<(), AppError> {
    let entity = ctx.entity()?;
    let field = ctx.field()?;
    let obj = ctx.object().await?;
    match &field.kind {
        FieldKind::Scalar(ScalarType::Boolean) => toggle_boolean(ctx, &entity, &obj, &field).await,
        FieldKind::ToOne { .. } => toggle_to_one(ctx, &entity, &obj, &field).await,
        FieldKind::ToMany { .. } => toggle_to_many(ctx, &entity, &obj, &field).await,
        FieldKind::Scalar(t) if t.is_textual() => update_text(ctx, &entity, &obj, &field).await,
        other => Err(AppError::InvalidRequest(format!(
            "field type \"{}\" not supported",
            other.describe()
        ))),
    }
}

async fn toggle_boolean(
    ctx: &mut RequestContext,
    entity: &TypeDescriptor,
    obj: &Record,
    field: &FieldDescriptor,
) -> Result<(), AppError> {
    let old = obj.get(&field.name).and_then(Value::as_bool).unwrap_or(false);
    let new = !old;
    let mut changes = Map::new();
    changes.insert(field.name.clone(), Value::Bool(new));
    let updated = ctx
        .state
        .store
        .update(&entity.label, obj.pk, changes)
        .await
        .map_err(|e| {
            AppError::InvalidRequest(format!(
                "error when toggling {} of {}: {}",
                field.name,
                entity.display(obj),
                e
            ))
        })?;
    let display = entity.display(&updated);
    tracing::info!(model = %entity.label, pk = obj.pk, field = %field.name, old, new, "boolean toggled");
    ctx.messages.success(format!("Toggled {} on {} from {} to {}", field.name, display, old, new));
    ctx.set_object(updated);
    Ok(())
}

async fn toggle_to_one(
    ctx: &mut RequestContext,
    entity: &TypeDescriptor,
    obj: &Record,
    field: &FieldDescriptor,
) -> Result<(), AppError> {
    let (related_type, related) = resolve_related(ctx, field).await?;
    let related_display = related_type.display(&related);
    let current = obj.related_pk(&field.name);
    let mut changes = Map::new();
    let message = if current == Some(related.pk) {
        changes.insert(field.name.clone(), Value::Null);
        format!("Removed {} from {}", related_display, field.name)
    } else {
        changes.insert(field.name.clone(), Value::from(related.pk));
        format!("Set {} to {}", field.name, related_display)
    };
    let updated = ctx.state.store.update(&entity.label, obj.pk, changes).await?;
    tracing::info!(model = %entity.label, pk = obj.pk, field = %field.name, related = related.pk, "relation toggled");
    ctx.messages.success(message);
    ctx.set_object(updated);
    Ok(())
}

async fn toggle_to_many(
    ctx: &mut RequestContext,
    entity: &TypeDescriptor,
    obj: &Record,
    field: &FieldDescriptor,
) -> Result<(), AppError> {
    let (related_type, related) = resolve_related(ctx, field).await?;
    let related_display = related_type.display(&related);
    let linked = ctx
        .state
        .store
        .related_pks(&entity.label, obj.pk, &field.name)
        .await?;
    let display = entity.display(obj);
    let message = if linked.contains(&related.pk) {
        ctx.state
            .store
            .remove_related(&entity.label, obj.pk, &field.name, related.pk)
            .await?;
        format!("Removed \"{}\" from {} {}", related_display, field.name, display)
    } else {
        ctx.state
            .store
            .add_related(&entity.label, obj.pk, &field.name, related.pk)
            .await?;
        format!("Added \"{}\" to {} {}", related_display, field.name, display)
    };
    tracing::info!(model = %entity.label, pk = obj.pk, field = %field.name, related = related.pk, "membership toggled");
    ctx.messages.success(message);
    ctx.set_object(obj.clone());
    Ok(())
}

/// Assign the new value as sent. Store failures are reported as an error message on an
/// otherwise successful response.
async fn update_text(
    ctx: &mut RequestContext,
    entity: &TypeDescriptor,
    obj: &Record,
    field: &FieldDescriptor,
) -> Result<(), AppError> {
    if !field.editable {
        return Err(AppError::InvalidRequest(format!("field '{}' is not editable", field.name)));
    }
    let text = ctx.new_value()?.raw_text();
    let display = entity.display(obj);
    let mut changes = Map::new();
    changes.insert(field.name.clone(), Value::String(text.clone()));
    match ctx.state.store.update(&entity.label, obj.pk, changes).await {
        Ok(updated) => {
            tracing::info!(model = %entity.label, pk = obj.pk, field = %field.name, "field updated");
            ctx.messages
                .success(format!("Updated field \"{}\" on \"{}\"", field.name, display));
            ctx.set_object(updated);
        }
        Err(e) => {
            tracing::error!(model = %entity.label, pk = obj.pk, field = %field.name, error = %e, "field update failed");
            ctx.messages.error(capitalize(&format!(
                "error when setting {} {} to {}: {}",
                display, field.name, text, e
            )));
        }
    }
    Ok(())
}

/// The related record the new value identifies. Ids and slugs must match an existing
/// record; loose values are looked up case-insensitively and created when missing.
pub async fn resolve_related(
    ctx: &mut RequestContext,
    field: &FieldDescriptor,
) -> Result<(Arc<TypeDescriptor>, Record), AppError> {
    let related = ctx.state.registry.related_type(field)?;
    let record = match ctx.new_value()? {
        NewValue::ById(id) => exact(ctx, &related, Filter::Pk(id), "id", &id.to_string()).await?,
        NewValue::BySlug(slug) => {
            if !related.has_field("slug") {
                return Err(AppError::InvalidRequest(format!(
                    "the model '{}' cannot be addressed by slug",
                    related.name
                )));
            }
            let filter = Filter::Eq {
                field: "slug".into(),
                value: Value::String(slug.clone()),
            };
            exact(ctx, &related, filter, "slug", &slug).await?
        }
        NewValue::ByValue { text, .. } => get_or_create(ctx, &related, &text).await?,
    };
    Ok((related, record))
}

async fn exact(
    ctx: &RequestContext,
    related: &TypeDescriptor,
    filter: Filter,
    key: &str,
    value: &str,
) -> Result<Record, AppError> {
    let query = Query::all(&related.label).filter(filter).limit(2);
    let mut rows = ctx.state.store.fetch(&query).await?;
    match rows.len() {
        0 => Err(AppError::NotFound(format!(
            "related {} object not found with {}: {}",
            capitalize(&related.name),
            key,
            value
        ))),
        1 => Ok(rows.remove(0)),
        _ => Err(AppError::Conflict(format!(
            "multiple related {} objects found with {}: {}",
            related.name, key, value
        ))),
    }
}

async fn get_or_create(ctx: &mut RequestContext, related: &TypeDescriptor, text: &str) -> Result<Record, AppError> {
    let match_field = MATCH_FIELDS
        .into_iter()
        .find(|f| related.has_field(f))
        .ok_or_else(|| AppError::InvalidRequest("no valid field found to search for related object".into()))?;

    let query = Query::all(&related.label)
        .filter(Filter::IExact {
            field: match_field.to_string(),
            value: text.to_string(),
        })
        .limit(2);
    let mut rows = ctx.state.store.fetch(&query).await?;
    match rows.len() {
        0 => {}
        1 => {
            let existing = rows.remove(0);
            ctx.messages.debug(format!(
                "Using existing {} {}",
                related.name,
                related.display(&existing)
            ));
            return Ok(existing);
        }
        _ => {
            return Err(AppError::InvalidRequest(format!(
                "multiple {} objects match {} '{}'",
                related.name, match_field, text
            )))
        }
    }

    let mut values = related.defaults.clone();
    if related.has_field("slug") {
        values.insert("slug".into(), Value::String(slugify(text)));
    }
    values.insert(match_field.to_string(), Value::String(text.to_string()));
    if let (Some(owner), Some(id)) = (related.owner_field.as_deref(), ctx.principal.id) {
        if owner != "id" && related.has_field(owner) {
            values.insert(owner.to_string(), Value::from(id));
        }
    }
    let created = ctx
        .state
        .store
        .create(&related.label, values)
        .await
        .map_err(|e| AppError::InvalidRequest(format!("error when creating {}: {}", related.name, e)))?;
    tracing::info!(model = %related.label, pk = created.pk, "related object created");
    ctx.messages.info(format!(
        "Created new {} with {}",
        related.name,
        related.display(&created)
    ));
    Ok(created)
}
