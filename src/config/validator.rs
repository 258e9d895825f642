//! Registry config validation: referential integrity of relations, callables and hooks.

use crate::config::{AccessPolicy, ComputeConfig, EntityTypeConfig, FieldTypeConfig, RegistryConfig};
use crate::error::ConfigError;
use std::collections::HashSet;

pub fn label_of(entity: &EntityTypeConfig) -> String {
    format!("{}.{}", entity.app, entity.name)
}

/// The single entity a relation target (`name` or `app.name`) refers to.
pub fn find_target<'a>(config: &'a RegistryConfig, target: &str) -> Result<&'a EntityTypeConfig, ConfigError> {
    let matches: Vec<&EntityTypeConfig> = if target.contains('.') {
        config.entities.iter().filter(|e| label_of(e) == target).collect()
    } else {
        config.entities.iter().filter(|e| e.name == target).collect()
    };
    match matches.as_slice() {
        [] => Err(ConfigError::MissingReference {
            kind: "entity type",
            id: target.to_string(),
        }),
        [one] => Ok(one),
        _ => Err(ConfigError::AmbiguousReference {
            kind: "entity type",
            id: target.to_string(),
        }),
    }
}

pub fn validate(config: &RegistryConfig) -> Result<(), ConfigError> {
    let mut labels = HashSet::new();
    for e in &config.entities {
        if e.app.is_empty() || e.name.is_empty() || e.app.contains('.') || e.name.contains('.') {
            return Err(ConfigError::Validation(format!(
                "entity app and name must be non-empty and must not contain '.': '{}'",
                label_of(e)
            )));
        }
        if !labels.insert(label_of(e)) {
            return Err(ConfigError::DuplicateType(label_of(e)));
        }
    }

    let default_policy = config.default_policy.unwrap_or_default();
    for e in &config.entities {
        validate_entity(config, e, default_policy)?;
    }
    Ok(())
}

fn validate_entity(config: &RegistryConfig, e: &EntityTypeConfig, default_policy: AccessPolicy) -> Result<(), ConfigError> {
    let label = label_of(e);
    let mut names = HashSet::new();
    for f in &e.fields {
        if f.name == "id" || f.name == "pk" {
            return Err(ConfigError::Validation(format!(
                "{}: '{}' is reserved for the primary key",
                label, f.name
            )));
        }
        if !names.insert(f.name.as_str()) {
            return Err(ConfigError::DuplicateField {
                entity: label.clone(),
                field: f.name.clone(),
            });
        }
    }

    for f in &e.fields {
        match f.type_ {
            FieldTypeConfig::ToOne | FieldTypeConfig::ToMany => {
                let target = f.target.as_deref().ok_or_else(|| ConfigError::MissingReference {
                    kind: "relation target",
                    id: format!("{}.{}", label, f.name),
                })?;
                find_target(config, target)?;
            }
            FieldTypeConfig::Callable => match &f.compute {
                None => {
                    return Err(ConfigError::Validation(format!(
                        "{}.{}: callable fields need a 'compute' definition",
                        label, f.name
                    )))
                }
                Some(ComputeConfig::Count { relation }) => {
                    let ok = e
                        .fields
                        .iter()
                        .any(|r| r.name == *relation && r.type_ == FieldTypeConfig::ToMany);
                    if !ok {
                        return Err(ConfigError::MissingReference {
                            kind: "to-many relation",
                            id: format!("{}.{}", label, relation),
                        });
                    }
                }
                Some(_) => {}
            },
            _ => {}
        }
    }

    let known = |name: &str| names.contains(name);
    if let Some(owner) = e.owner_field.as_deref() {
        if owner != "id" && !known(owner) {
            return Err(ConfigError::MissingReference {
                kind: "owner field",
                id: format!("{}.{}", label, owner),
            });
        }
    }
    if let Some(display) = e.display_field.as_deref() {
        if !known(display) {
            return Err(ConfigError::MissingReference {
                kind: "display field",
                id: format!("{}.{}", label, display),
            });
        }
    }
    for field in e.visible_when.keys().chain(e.defaults.keys()) {
        if !known(field) {
            return Err(ConfigError::MissingReference {
                kind: "field",
                id: format!("{}.{}", label, field),
            });
        }
    }

    let policies = [e.access.read, e.access.suggest, e.access.set];
    let uses_self = policies
        .iter()
        .any(|p| p.unwrap_or(default_policy) == AccessPolicy::SelfOnly);
    if uses_self && e.owner_field.is_none() {
        return Err(ConfigError::Validation(format!(
            "{}: a 'self' access policy requires an owner_field",
            label
        )));
    }
    Ok(())
}
