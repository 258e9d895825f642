//! Resolved entity registry: config validated and flattened for runtime use.
//! Built once at load time and shared read-only across requests.

use crate::config::{AccessPolicy, Computed};
use crate::error::AppError;
use crate::extractors::Principal;
use crate::store::{Filter, Record};
use crate::text::{is_markdown_hint, value_to_string};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Actions an access policy is declared for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Read,
    Suggest,
    Set,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Suggest => "suggest",
            Action::Set => "set",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarType {
    Boolean,
    Text,
    String,
    Slug,
    Integer,
    Float,
    Date,
    DateTime,
}

impl ScalarType {
    /// Types a text update may assign to.
    pub fn is_textual(self) -> bool {
        matches!(self, ScalarType::Text | ScalarType::String | ScalarType::Slug)
    }

    pub fn sql_type(self) -> &'static str {
        match self {
            ScalarType::Boolean => "boolean",
            ScalarType::Text | ScalarType::String | ScalarType::Slug => "text",
            ScalarType::Integer => "bigint",
            ScalarType::Float => "double precision",
            ScalarType::Date => "date",
            ScalarType::DateTime => "timestamptz",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScalarType::Boolean => "boolean",
            ScalarType::Text => "text",
            ScalarType::String => "string",
            ScalarType::Slug => "slug",
            ScalarType::Integer => "integer",
            ScalarType::Float => "float",
            ScalarType::Date => "date",
            ScalarType::DateTime => "datetime",
        }
    }
}

/// Closed set of field kinds; resolvers and the mutation engine switch over it.
#[derive(Clone)]
pub enum FieldKind {
    Scalar(ScalarType),
    /// Target is the related type's qualified label.
    ToOne { target: String },
    ToMany { target: String },
    Callable(Arc<dyn Computed>),
}

impl FieldKind {
    pub fn target(&self) -> Option<&str> {
        match self {
            FieldKind::ToOne { target } | FieldKind::ToMany { target } => Some(target),
            _ => None,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            FieldKind::Scalar(t) => t.as_str(),
            FieldKind::ToOne { .. } => "to-one relation",
            FieldKind::ToMany { .. } => "to-many relation",
            FieldKind::Callable(_) => "callable",
        }
    }
}

impl fmt::Debug for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Scalar(t) => write!(f, "Scalar({:?})", t),
            FieldKind::ToOne { target } => write!(f, "ToOne({})", target),
            FieldKind::ToMany { target } => write!(f, "ToMany({})", target),
            FieldKind::Callable(c) => write!(f, "Callable({:?})", c),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    pub editable: bool,
    pub unique: bool,
    pub help_text: Option<String>,
}

impl FieldDescriptor {
    /// Text fields whose help text mentions markdown are expanded to HTML on read.
    pub fn is_markdown(&self) -> bool {
        matches!(self.kind, FieldKind::Scalar(ScalarType::Text)) && is_markdown_hint(self.help_text.as_deref())
    }

    /// Stored directly on the record (scalars and to-one keys).
    pub fn is_column(&self) -> bool {
        matches!(self.kind, FieldKind::Scalar(_) | FieldKind::ToOne { .. })
    }
}

#[derive(Clone, Debug)]
pub struct TypeDescriptor {
    pub app: String,
    pub name: String,
    /// `app.name`, unique across the registry.
    pub label: String,
    pub table: String,
    pub fields: Vec<FieldDescriptor>,
    pub access: HashMap<Action, AccessPolicy>,
    pub searchable_fields: Vec<String>,
    pub defaults: Map<String, Value>,
    pub owner_field: Option<String>,
    pub display_field: Option<String>,
    pub visible_when: Vec<(String, Vec<Value>)>,
}

impl TypeDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn scalar_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::Scalar(_)))
    }

    pub fn column_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_column())
    }

    pub fn policy(&self, action: Action) -> Option<AccessPolicy> {
        self.access.get(&action).copied()
    }

    /// Lower-cased type name used in template names and template context keys.
    pub fn template_name(&self) -> String {
        self.name.to_lowercase()
    }

    /// Display string of a record: the display field if set and non-empty,
    /// otherwise `"<Name> object (<pk>)"`.
    pub fn display(&self, record: &Record) -> String {
        self.display_field
            .as_deref()
            .and_then(|f| record.values.get(f))
            .map(value_to_string)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("{} object ({})", self.name, record.pk))
    }

    /// Status/visibility hook; `Filter::All` when the type declares none.
    pub fn visibility_filter(&self) -> Filter {
        self.visible_when
            .iter()
            .fold(Filter::All, |acc, (field, allowed)| {
                let any = allowed.iter().fold(Filter::Nothing, |or, v| {
                    or.or(Filter::Eq {
                        field: field.clone(),
                        value: v.clone(),
                    })
                });
                acc.and(any)
            })
    }

    /// Records owned by `principal`. None when the type has no owner field or the
    /// principal has no id.
    pub fn owner_filter(&self, principal: &Principal) -> Option<Filter> {
        let field = self.owner_field.as_deref()?;
        let id = principal.id?;
        if field == "id" {
            return Some(Filter::Pk(id));
        }
        Some(Filter::Eq {
            field: field.to_string(),
            value: Value::from(id),
        })
    }
}

/// A type resolved for an action, with the policy that granted access.
#[derive(Clone, Debug)]
pub struct ResolvedType {
    pub entity: Arc<TypeDescriptor>,
    pub action: Action,
    pub policy: AccessPolicy,
}

impl ResolvedType {
    /// `self` policies defer the decision to object resolution.
    pub fn owner_scoped(&self) -> bool {
        self.policy == AccessPolicy::SelfOnly
    }
}

#[derive(Clone, Debug, Default)]
pub struct EntityRegistry {
    types: Vec<Arc<TypeDescriptor>>,
    by_label: HashMap<String, Arc<TypeDescriptor>>,
    default_policy: AccessPolicy,
}

impl EntityRegistry {
    pub fn new(types: Vec<TypeDescriptor>, default_policy: AccessPolicy) -> Self {
        let types: Vec<Arc<TypeDescriptor>> = types.into_iter().map(Arc::new).collect();
        let by_label = types
            .iter()
            .map(|t| (t.label.clone(), Arc::clone(t)))
            .collect();
        EntityRegistry {
            types,
            by_label,
            default_policy,
        }
    }

    pub fn list_types(&self) -> &[Arc<TypeDescriptor>] {
        &self.types
    }

    /// Lookup by qualified label (`app.name`).
    pub fn get_type(&self, label: &str) -> Option<&Arc<TypeDescriptor>> {
        self.by_label.get(label)
    }

    pub fn default_policy(&self) -> AccessPolicy {
        self.default_policy
    }

    /// All types a name refers to: the exact label for `app.name`, otherwise every
    /// type with that name. Case-sensitive.
    pub fn matching(&self, name: &str) -> Vec<&Arc<TypeDescriptor>> {
        if name.contains('.') {
            return self.by_label.get(name).into_iter().collect();
        }
        self.types.iter().filter(|t| t.name == name).collect()
    }

    /// Exactly one type for `name`; never guesses between several.
    pub fn lookup(&self, name: &str) -> Result<Arc<TypeDescriptor>, AppError> {
        let matches = self.matching(name);
        match matches.as_slice() {
            [] => Err(AppError::NotFound(format!(
                "no model with the name '{}' could be found",
                name
            ))),
            [one] => Ok(Arc::clone(one)),
            _ => Err(AppError::Ambiguous(format!(
                "multiple models with the name '{}' were found. Specify 'app.name' instead",
                name
            ))),
        }
    }

    /// Resolve a type name and enforce its access policy for `action`.
    pub fn resolve(&self, name: &str, action: Action, principal: &Principal) -> Result<ResolvedType, AppError> {
        let entity = self.lookup(name)?;
        let policy = entity.policy(action).unwrap_or(self.default_policy);
        let denied = match policy {
            AccessPolicy::Disabled => Some(format!("{} access to the model '{}' is not allowed", action, name)),
            AccessPolicy::Authenticated if !principal.is_authenticated => Some(format!(
                "{} access to the model '{}' is not allowed for unauthenticated users",
                action, name
            )),
            AccessPolicy::Staff if !principal.is_staff => Some(format!(
                "{} access to the model '{}' is not allowed for non-staff users",
                action, name
            )),
            _ => None,
        };
        if let Some(reason) = denied {
            tracing::warn!(model = %entity.label, %action, %policy, "access denied");
            return Err(AppError::Forbidden(reason));
        }
        tracing::debug!(model = %entity.label, %action, %policy, "model resolved");
        Ok(ResolvedType {
            entity,
            action,
            policy,
        })
    }

    /// Related type of a relation field.
    pub fn related_type(&self, field: &FieldDescriptor) -> Result<Arc<TypeDescriptor>, AppError> {
        let target = field.kind.target().ok_or_else(|| {
            AppError::InvalidRequest(format!("the field '{}' is not a relation", field.name))
        })?;
        self.get_type(target)
            .cloned()
            .ok_or_else(|| AppError::Internal(format!("related model '{}' is not registered", target)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(app: &str, name: &str, read: Option<AccessPolicy>) -> TypeDescriptor {
        let mut access = HashMap::new();
        if let Some(p) = read {
            access.insert(Action::Read, p);
        }
        TypeDescriptor {
            app: app.into(),
            name: name.into(),
            label: format!("{}.{}", app, name),
            table: format!("{}_{}", app, name),
            fields: vec![FieldDescriptor {
                name: "name".into(),
                kind: FieldKind::Scalar(ScalarType::String),
                editable: true,
                unique: false,
                help_text: None,
            }],
            access,
            searchable_fields: vec![],
            defaults: Map::new(),
            owner_field: Some("user".into()),
            display_field: Some("name".into()),
            visible_when: vec![],
        }
    }

    fn registry() -> EntityRegistry {
        EntityRegistry::new(
            vec![
                entity("library", "book", Some(AccessPolicy::Public)),
                entity("library", "tag", Some(AccessPolicy::Staff)),
                entity("blog", "tag", Some(AccessPolicy::Public)),
                entity("library", "secret", None),
                entity("library", "note", Some(AccessPolicy::Authenticated)),
                entity("library", "diary", Some(AccessPolicy::SelfOnly)),
            ],
            AccessPolicy::Disabled,
        )
    }

    #[test]
    fn zero_matches_is_not_found() {
        let err = registry().resolve("movie", Action::Read, &Principal::anonymous()).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn lookup_is_case_sensitive() {
        assert!(registry().lookup("Book").is_err());
        assert!(registry().lookup("book").is_ok());
    }

    #[test]
    fn ambiguous_name_is_never_guessed() {
        let err = registry().resolve("tag", Action::Read, &Principal::anonymous()).unwrap_err();
        assert!(matches!(err, AppError::Ambiguous(ref m) if m.contains("app.name")));
        let resolved = registry()
            .resolve("blog.tag", Action::Read, &Principal::anonymous())
            .unwrap();
        assert_eq!(resolved.entity.label, "blog.tag");
    }

    #[test]
    fn undeclared_policy_falls_back_to_default() {
        let err = registry().resolve("secret", Action::Read, &Principal::staff(1, "admin")).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let reg = EntityRegistry::new(vec![entity("library", "secret", None)], AccessPolicy::Public);
        assert!(reg.resolve("secret", Action::Read, &Principal::anonymous()).is_ok());
    }

    #[test]
    fn authenticated_and_staff_policies() {
        let reg = registry();
        assert!(reg.resolve("note", Action::Read, &Principal::anonymous()).is_err());
        assert!(reg.resolve("note", Action::Read, &Principal::user(3, "bob")).is_ok());
        assert!(reg.resolve("library.tag", Action::Read, &Principal::user(3, "bob")).is_err());
        assert!(reg.resolve("library.tag", Action::Read, &Principal::staff(1, "admin")).is_ok());
    }

    #[test]
    fn self_policy_is_deferred() {
        let resolved = registry().resolve("diary", Action::Read, &Principal::anonymous()).unwrap();
        assert!(resolved.owner_scoped());
    }

    #[test]
    fn display_falls_back_to_type_and_pk() {
        let e = entity("library", "book", None);
        let mut record = Record::new("library.book", 4);
        assert_eq!(e.display(&record), "book object (4)");
        record.values.insert("name".into(), Value::from("Dune"));
        assert_eq!(e.display(&record), "Dune");
    }

    #[test]
    fn owner_filter_uses_owner_field() {
        let e = entity("library", "book", None);
        assert_eq!(
            e.owner_filter(&Principal::user(9, "x")),
            Some(Filter::Eq {
                field: "user".into(),
                value: Value::from(9)
            })
        );
        assert_eq!(e.owner_filter(&Principal::anonymous()), None);
    }
}
