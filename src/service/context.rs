//! Per-request state: the resolved type, object, field and values are computed once
//! and reused by the handlers, the renderer and the mutation engine.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{Action, FieldDescriptor, FieldKind, ResolvedType, TypeDescriptor};
use crate::error::AppError;
use crate::extractors::{Principal, RequestValues};
use crate::messages::{Level, MessageLog};
use crate::response::{Envelope, Meta, RequestMeta, RequestUser};
use crate::service::new_value::NewValue;
use crate::state::AppState;
use crate::store::{Filter, Query, Record};
use crate::text::{markdown, value_to_string};

/// Route identity, attached to each route as an extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteInfo {
    /// Route name; `-by-pk-slug` is appended in diagnostics when a pk was given.
    pub name: &'static str,
    pub handler: &'static str,
    /// The object is the one owned by the principal rather than addressed by pk/slug.
    pub self_scoped: bool,
}

/// Current value of a field on the resolved object.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Scalar(Value),
    Object(Option<Record>),
    /// Lazy, re-executable selection of the linked records.
    Collection(Query),
}

pub struct RequestContext {
    pub state: AppState,
    pub values: RequestValues,
    pub principal: Principal,
    pub route: RouteInfo,
    pub messages: MessageLog,
    pub payload: Vec<Value>,
    resolved: Option<ResolvedType>,
    object: Option<Record>,
    field: Option<FieldDescriptor>,
    field_value: Option<FieldValue>,
    new_value: Option<NewValue>,
}

impl RequestContext {
    pub fn new(state: AppState, values: RequestValues, principal: Principal, route: RouteInfo) -> Self {
        RequestContext {
            state,
            values,
            principal,
            route,
            messages: MessageLog::new(),
            payload: Vec::new(),
            resolved: None,
            object: None,
            field: None,
            field_value: None,
            new_value: None,
        }
    }

    /// Type named by the `model` param, checked against `action`. The first resolution
    /// is kept for the rest of the request.
    pub fn entity_type(&mut self, action: Action) -> Result<ResolvedType, AppError> {
        if let Some(r) = &self.resolved {
            return Ok(r.clone());
        }
        let name = self
            .values
            .get("model")
            .ok_or_else(|| AppError::InvalidRequest("no model was given".into()))?;
        let resolved = self.state.registry.resolve(&name, action, &self.principal)?;
        self.messages
            .debug(format!("Resolved model {} for {}", resolved.entity.label, action));
        self.resolved = Some(resolved.clone());
        Ok(resolved)
    }

    pub fn resolved(&self) -> Result<&ResolvedType, AppError> {
        self.resolved
            .as_ref()
            .ok_or_else(|| AppError::Internal("the model must be resolved before the object".into()))
    }

    pub fn entity(&self) -> Result<Arc<TypeDescriptor>, AppError> {
        Ok(Arc::clone(&self.resolved()?.entity))
    }

    fn owner_scope(&self, resolved: &ResolvedType) -> Result<Filter, AppError> {
        if !self.principal.is_authenticated {
            return Err(AppError::InvalidRequest(format!(
                "{} access to the model '{}' requires an authenticated user",
                resolved.action, resolved.entity.name
            )));
        }
        resolved.entity.owner_filter(&self.principal).ok_or_else(|| {
            AppError::InvalidRequest(format!(
                "the model '{}' has no owner to match the user against",
                resolved.entity.name
            ))
        })
    }

    /// The single object addressed by the request.
    pub async fn object(&mut self) -> Result<Record, AppError> {
        if let Some(o) = &self.object {
            return Ok(o.clone());
        }
        let resolved = self.resolved()?.clone();
        let entity = Arc::clone(&resolved.entity);

        let mut filter = Filter::All;
        if self.route.self_scoped {
            if !resolved.owner_scoped() {
                return Err(AppError::InvalidRequest(format!(
                    "{} access to the model '{}' is not available for the own object",
                    resolved.action, entity.name
                )));
            }
            filter = filter.and(self.owner_scope(&resolved)?);
        } else {
            let pk = self.values.get("pk");
            let slug = self.values.get("slug");
            if pk.is_none() && slug.is_none() {
                return Err(AppError::InvalidRequest(
                    "a pk or a slug is required to identify the object".into(),
                ));
            }
            if let Some(pk) = pk {
                let pk: i64 = pk
                    .parse()
                    .map_err(|_| AppError::InvalidRequest(format!("the pk '{}' is not an integer", pk)))?;
                filter = filter.and(Filter::Pk(pk));
            }
            if let Some(slug) = slug {
                if !entity.has_field("slug") {
                    return Err(AppError::InvalidRequest(format!(
                        "the model '{}' cannot be addressed by slug",
                        entity.name
                    )));
                }
                filter = filter.and(Filter::Eq {
                    field: "slug".into(),
                    value: Value::String(slug),
                });
            }
            if resolved.owner_scoped() {
                filter = filter.and(self.owner_scope(&resolved)?);
            }
        }
        filter = filter.and(entity.visibility_filter());

        let query = Query::all(&entity.label).filter(filter).limit(2);
        let mut rows = self.state.store.fetch(&query).await?;
        let record = match rows.len() {
            0 => return Err(AppError::NotFound("the requested object does no longer exist".into())),
            1 => rows.remove(0),
            _ => return Err(AppError::Conflict("multiple objects were found".into())),
        };
        self.messages
            .debug(format!("Resolved object {}", entity.display(&record)));
        self.object = Some(record.clone());
        Ok(record)
    }

    /// Replace the cached object after it was persisted; drops the cached field value.
    pub fn set_object(&mut self, record: Record) {
        self.object = Some(record);
        self.field_value = None;
    }

    pub fn cached_object(&self) -> Option<&Record> {
        self.object.as_ref()
    }

    /// Field named by the `field` param.
    pub fn field(&mut self) -> Result<FieldDescriptor, AppError> {
        if let Some(f) = &self.field {
            return Ok(f.clone());
        }
        let entity = self.entity()?;
        let name = self
            .values
            .get("field")
            .ok_or_else(|| AppError::InvalidRequest("no field was given".into()))?;
        let field = entity.field(&name).cloned().ok_or_else(|| {
            AppError::NotFound(format!("the model '{}' has no field '{}'", entity.name, name))
        })?;
        self.field = Some(field.clone());
        Ok(field)
    }

    pub async fn field_value(&mut self) -> Result<FieldValue, AppError> {
        if let Some(v) = &self.field_value {
            return Ok(v.clone());
        }
        let field = self.field()?;
        let entity = self.entity()?;
        let obj = self.object().await?;
        let value = match &field.kind {
            FieldKind::ToMany { target } => FieldValue::Collection(Query::all(target).filter(Filter::MemberOf {
                owner: entity.label.clone(),
                owner_pk: obj.pk,
                field: field.name.clone(),
            })),
            FieldKind::Callable(computed) => {
                let v = computed
                    .compute(self.state.store.as_ref(), &entity, &obj)
                    .await
                    .map_err(|e| AppError::InvalidRequest(format!("error when computing '{}': {}", field.name, e)))?;
                FieldValue::Scalar(v)
            }
            FieldKind::ToOne { target } => match obj.related_pk(&field.name) {
                Some(pk) => FieldValue::Object(self.state.store.get(target, pk).await?),
                None => FieldValue::Object(None),
            },
            FieldKind::Scalar(_) if field.is_markdown() => {
                let raw = obj.get(&field.name).map(value_to_string).unwrap_or_default();
                FieldValue::Scalar(Value::String(markdown(&raw)))
            }
            FieldKind::Scalar(_) => FieldValue::Scalar(obj.get(&field.name).cloned().unwrap_or(Value::Null)),
        };
        self.field_value = Some(value.clone());
        Ok(value)
    }

    pub fn new_value(&mut self) -> Result<NewValue, AppError> {
        if let Some(v) = &self.new_value {
            return Ok(v.clone());
        }
        let v = NewValue::from_request(&self.values)?;
        self.new_value = Some(v.clone());
        Ok(v)
    }

    /// Search term, if any.
    pub fn q(&self) -> Option<String> {
        self.values.get("q")
    }

    /// Staff on a debug-enabled system see debug messages and tracebacks.
    pub fn privileged_debug(&self) -> bool {
        self.principal.is_staff && self.state.settings.debug
    }

    fn meta(&self) -> Meta {
        let resolver = if !self.route.self_scoped && self.values.get("pk").is_some() {
            format!("{}-by-pk-slug", self.route.name)
        } else {
            self.route.name.to_string()
        };
        let params: BTreeMap<String, String> = self
            .values
            .route_params()
            .iter()
            .map(|(k, v)| (format!("url_{}", k), v.clone()))
            .collect();
        let object = match (&self.resolved, &self.object) {
            (Some(r), Some(o)) => Some(r.entity.display(o)),
            _ => None,
        };
        Meta {
            model: self.resolved.as_ref().map(|r| r.entity.label.clone()),
            object,
            attribute: self.values.get("field"),
            debug: self.state.settings.debug,
            request_user: RequestUser {
                id: self.principal.id,
                username: self.principal.username.clone(),
                is_staff: self.principal.is_staff,
                is_superuser: self.principal.is_superuser,
            },
            request: RequestMeta {
                path: self.values.path().to_string(),
                method: self.values.method().to_string(),
                handler: self.route.handler.to_string(),
                resolver,
                params,
                q: self.q(),
            },
        }
    }

    /// Build the response envelope from the handler outcome.
    pub fn finish(mut self, result: Result<(), AppError>) -> Envelope {
        let privileged_debug = self.privileged_debug();
        let mut traceback = None;
        let status = match &result {
            Ok(()) => axum::http::StatusCode::OK,
            Err(err) => {
                if err.is_internal() {
                    tracing::error!(code = err.code(), error = ?err, route = self.route.name, "request failed");
                } else {
                    tracing::debug!(code = err.code(), error = %err, route = self.route.name, "request rejected");
                }
                self.messages.add(err.user_message(), Level::Error);
                if err.is_internal() && privileged_debug {
                    traceback = Some(format!("{:?}", err));
                }
                self.payload.clear();
                err.status()
            }
        };
        let mut envelope = Envelope::new(status, self.messages.get(privileged_debug), std::mem::take(&mut self.payload));
        if self.principal.is_staff {
            envelope.meta = Some(self.meta());
        }
        envelope.traceback = traceback;
        envelope
    }
}
