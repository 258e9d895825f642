//! Load registry config from a JSON file or in-memory structs and resolve it.

use crate::config::computed::{ComputedRegistry, DisplayString, RelationCount};
use crate::config::resolved::{Action, EntityRegistry, FieldDescriptor, FieldKind, ScalarType, TypeDescriptor};
use crate::config::types::*;
use crate::config::validator::{find_target, label_of, validate};
use crate::config::AccessPolicy;
use crate::error::ConfigError;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Build the registry from config (validates first). `fallback_policy` applies when the
/// config itself declares no default policy.
pub fn resolve(config: &RegistryConfig, fallback_policy: AccessPolicy) -> Result<EntityRegistry, ConfigError> {
    resolve_with_computed(config, fallback_policy, &ComputedRegistry::new())
}

/// Like [`resolve`], with application-provided implementations for `custom` callables.
pub fn resolve_with_computed(
    config: &RegistryConfig,
    fallback_policy: AccessPolicy,
    computed: &ComputedRegistry,
) -> Result<EntityRegistry, ConfigError> {
    validate(config)?;
    let default_policy = config.default_policy.unwrap_or(fallback_policy);

    let mut types = Vec::with_capacity(config.entities.len());
    for e in &config.entities {
        let label = label_of(e);
        let mut fields = Vec::with_capacity(e.fields.len());
        for f in &e.fields {
            fields.push(FieldDescriptor {
                name: f.name.clone(),
                kind: field_kind(config, &label, f, computed)?,
                editable: f.editable,
                unique: f.unique,
                help_text: f.help_text.clone(),
            });
        }

        let mut access = HashMap::new();
        for (action, policy) in [
            (Action::Read, e.access.read),
            (Action::Suggest, e.access.suggest),
            (Action::Set, e.access.set),
        ] {
            if let Some(p) = policy {
                access.insert(action, p);
            }
        }

        let display_field = e
            .display_field
            .clone()
            .or_else(|| e.fields.iter().find(|f| f.name == "name").map(|f| f.name.clone()));

        types.push(TypeDescriptor {
            app: e.app.clone(),
            name: e.name.clone(),
            table: e.table.clone().unwrap_or_else(|| format!("{}_{}", e.app, e.name)),
            label,
            fields,
            access,
            searchable_fields: e.searchable_fields.clone(),
            defaults: e.defaults.clone(),
            owner_field: e.owner_field.clone(),
            display_field,
            visible_when: e.visible_when.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        });
    }

    tracing::debug!(types = types.len(), %default_policy, "entity registry resolved");
    Ok(EntityRegistry::new(types, default_policy))
}

fn field_kind(
    config: &RegistryConfig,
    label: &str,
    f: &FieldConfig,
    computed: &ComputedRegistry,
) -> Result<FieldKind, ConfigError> {
    let kind = match f.type_ {
        FieldTypeConfig::Boolean => FieldKind::Scalar(ScalarType::Boolean),
        FieldTypeConfig::Text => FieldKind::Scalar(ScalarType::Text),
        FieldTypeConfig::String => FieldKind::Scalar(ScalarType::String),
        FieldTypeConfig::Slug => FieldKind::Scalar(ScalarType::Slug),
        FieldTypeConfig::Integer => FieldKind::Scalar(ScalarType::Integer),
        FieldTypeConfig::Float => FieldKind::Scalar(ScalarType::Float),
        FieldTypeConfig::Date => FieldKind::Scalar(ScalarType::Date),
        FieldTypeConfig::Datetime => FieldKind::Scalar(ScalarType::DateTime),
        FieldTypeConfig::ToOne | FieldTypeConfig::ToMany => {
            let target = f.target.as_deref().ok_or_else(|| ConfigError::MissingReference {
                kind: "relation target",
                id: format!("{}.{}", label, f.name),
            })?;
            let target = label_of(find_target(config, target)?);
            if f.type_ == FieldTypeConfig::ToOne {
                FieldKind::ToOne { target }
            } else {
                FieldKind::ToMany { target }
            }
        }
        FieldTypeConfig::Callable => {
            let compute = f.compute.as_ref().ok_or_else(|| {
                ConfigError::Validation(format!("{}.{}: callable fields need a 'compute' definition", label, f.name))
            })?;
            let c: Arc<dyn crate::config::Computed> = match compute {
                ComputeConfig::Count { relation } => Arc::new(RelationCount {
                    relation: relation.clone(),
                }),
                ComputeConfig::Display => Arc::new(DisplayString),
                ComputeConfig::Custom { name } => {
                    computed.get(name).cloned().ok_or_else(|| ConfigError::MissingReference {
                        kind: "computed implementation",
                        id: name.clone(),
                    })?
                }
            };
            FieldKind::Callable(c)
        }
    };
    Ok(kind)
}

/// Read and parse a registry file. Does not validate; call [`resolve`] next.
pub async fn load_from_path(path: impl AsRef<Path>) -> Result<RegistryConfig, ConfigError> {
    let path = path.as_ref();
    tracing::debug!(path = %path.display(), "loading registry config");
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> RegistryConfig {
        serde_json::from_value(serde_json::json!({
            "entities": [
                {"app": "library", "name": "genre", "access": {"read": "public"}, "fields": [
                    {"name": "name", "type": "string"},
                    {"name": "slug", "type": "slug"}
                ]},
                {"app": "library", "name": "book", "table": "books", "owner_field": "user", "fields": [
                    {"name": "title", "type": "string"},
                    {"name": "user", "type": "integer"},
                    {"name": "genre", "type": "to_one", "target": "genre"},
                    {"name": "tags", "type": "to_many", "target": "library.genre"},
                    {"name": "tag_count", "type": "callable", "compute": {"kind": "count", "relation": "tags"}}
                ]}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn resolves_targets_to_labels_and_defaults() {
        let reg = resolve(&library(), AccessPolicy::Disabled).unwrap();
        let book = reg.get_type("library.book").unwrap();
        assert_eq!(book.table, "books");
        assert_eq!(book.field("genre").unwrap().kind.target(), Some("library.genre"));
        assert_eq!(book.field("tags").unwrap().kind.target(), Some("library.genre"));
        assert!(matches!(book.field("tag_count").unwrap().kind, FieldKind::Callable(_)));
        assert_eq!(book.display_field, None);

        let genre = reg.get_type("library.genre").unwrap();
        assert_eq!(genre.table, "library_genre");
        assert_eq!(genre.display_field.as_deref(), Some("name"));
        assert_eq!(genre.policy(Action::Read), Some(AccessPolicy::Public));
        assert_eq!(genre.policy(Action::Set), None);
    }

    #[test]
    fn config_default_policy_wins_over_fallback() {
        let mut config = library();
        config.default_policy = Some(AccessPolicy::Staff);
        let reg = resolve(&config, AccessPolicy::Public).unwrap();
        assert_eq!(reg.default_policy(), AccessPolicy::Staff);
    }

    #[test]
    fn unknown_custom_computed_is_rejected() {
        let config: RegistryConfig = serde_json::from_value(serde_json::json!({
            "entities": [{"app": "a", "name": "b", "fields": [
                {"name": "score", "type": "callable", "compute": {"kind": "custom", "name": "score"}}
            ]}]
        }))
        .unwrap();
        assert!(matches!(
            resolve(&config, AccessPolicy::Disabled),
            Err(ConfigError::MissingReference { kind: "computed implementation", .. })
        ));
    }

    #[tokio::test]
    async fn load_from_path_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, serde_json::to_string(&library()).unwrap()).unwrap();
        let config = load_from_path(&path).await.unwrap();
        assert_eq!(config.entities.len(), 2);
        assert!(matches!(
            load_from_path(dir.path().join("missing.json")).await,
            Err(ConfigError::Load(_))
        ));
    }
}
