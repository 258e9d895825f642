//! Free-text narrowing of record queries and the candidate set for suggestions.

use crate::config::{EntityRegistry, FieldKind, TypeDescriptor};
use crate::error::AppError;
use crate::messages::MessageLog;
use crate::store::{DataStore, Filter, Query};

/// Fields searched on every type that has them, before its configured ones.
pub const DEFAULT_SEARCH_FIELDS: [&str; 3] = ["name", "title", "description"];

fn search_fields(entity: &TypeDescriptor) -> Vec<&str> {
    let mut names: Vec<&str> = DEFAULT_SEARCH_FIELDS.to_vec();
    for f in &entity.searchable_fields {
        if !names.contains(&f.as_str()) {
            names.push(f);
        }
    }
    names
}

/// Case-insensitive substring filter for `q` over the searchable fields of `entity`.
/// `Filter::Nothing` when the type has none of them.
pub fn search_filter(registry: &EntityRegistry, entity: &TypeDescriptor, q: &str, messages: &mut MessageLog) -> Filter {
    let mut filter = Filter::Nothing;
    let mut searched = Vec::new();
    for name in search_fields(entity) {
        let Some(field) = entity.field(name) else {
            continue;
        };
        let clause = match &field.kind {
            FieldKind::Scalar(_) => Filter::icontains(name, q),
            FieldKind::ToOne { target } => {
                let Some(related) = registry.get_type(target) else {
                    continue;
                };
                let any = related
                    .scalar_fields()
                    .fold(Filter::Nothing, |acc, f| acc.or(Filter::icontains(&f.name, q)));
                Filter::Related {
                    field: name.to_string(),
                    filter: Box::new(any),
                }
            }
            FieldKind::ToMany { target } => {
                if !registry.get_type(target).is_some_and(|t| t.has_field("name")) {
                    continue;
                }
                Filter::AnyRelated {
                    field: name.to_string(),
                    filter: Box::new(Filter::icontains("name", q)),
                }
            }
            _ => continue,
        };
        searched.push(name);
        filter = filter.or(clause);
    }
    if searched.is_empty() {
        messages.debug(format!("No searchable fields found on {}", entity.name));
    } else {
        messages.debug(format!("Searching {} for '{}' in {}", entity.name, q, searched.join(", ")));
    }
    filter
}

/// Narrow `query` by the search term. An absent or blank term leaves it unchanged.
pub fn search(registry: &EntityRegistry, query: Query, q: Option<&str>, messages: &mut MessageLog) -> Query {
    let Some(q) = q.map(str::trim).filter(|q| !q.is_empty()) else {
        return query;
    };
    let Some(entity) = registry.get_type(&query.entity).cloned() else {
        return query;
    };
    let filter = search_filter(registry, &entity, q, messages);
    query.filter(filter)
}

/// Visible records of `entity` not selected by `linked`, narrowed by `extra`.
pub async fn unused_related(
    store: &dyn DataStore,
    entity: &TypeDescriptor,
    linked: &Query,
    extra: Filter,
) -> Result<Query, AppError> {
    let used = store.pks(linked).await?;
    let mut query = Query::all(&entity.label)
        .filter(entity.visibility_filter())
        .filter(extra);
    if !used.is_empty() {
        query = query.exclude(Filter::PkIn(used));
    }
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, AccessPolicy, RegistryConfig};
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn registry() -> Arc<EntityRegistry> {
        let config: RegistryConfig = serde_json::from_value(json!({
            "entities": [
                {"app": "library", "name": "genre", "fields": [
                    {"name": "name", "type": "string"}
                ]},
                {"app": "library", "name": "author", "fields": [
                    {"name": "name", "type": "string"}
                ]},
                {"app": "library", "name": "book", "searchable_fields": ["author", "genres"], "fields": [
                    {"name": "title", "type": "string"},
                    {"name": "pages", "type": "integer"},
                    {"name": "author", "type": "to_one", "target": "author"},
                    {"name": "genres", "type": "to_many", "target": "genre"}
                ]},
                {"app": "library", "name": "shelf", "fields": [
                    {"name": "position", "type": "integer"}
                ]},
                {"app": "library", "name": "edition", "searchable_fields": ["year"], "fields": [
                    {"name": "year", "type": "integer"}
                ]}
            ]
        }))
        .unwrap();
        Arc::new(resolve(&config, AccessPolicy::Public).unwrap())
    }

    fn store(reg: &Arc<EntityRegistry>) -> MemoryStore {
        let store = MemoryStore::new(Arc::clone(reg));
        store
            .seed(&json!({
                "library.author": [{"id": 1, "name": "Frank Herbert"}, {"id": 2, "name": "Ursula Le Guin"}],
                "library.genre": [
                    {"id": 1, "name": "Sci-Fi"}, {"id": 2, "name": "Fantasy"}, {"id": 3, "name": "Horror"},
                    {"id": 4, "name": "Poetry"}, {"id": 5, "name": "Crime"}
                ],
                "library.book": [
                    {"id": 1, "title": "Dune", "author": 1, "genres": [1, 2]},
                    {"id": 2, "title": "Earthsea", "author": 2}
                ],
                "library.edition": [{"id": 1, "year": 1965}, {"id": 2, "year": 1984}]
            }))
            .unwrap();
        store
    }

    #[tokio::test]
    async fn blank_term_is_identity() {
        let reg = registry();
        let mut log = MessageLog::new();
        let q = Query::all("library.book");
        assert_eq!(search(&reg, q.clone(), None, &mut log), q);
        assert_eq!(search(&reg, q.clone(), Some("  "), &mut log), q);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn matches_own_and_related_fields() {
        let reg = registry();
        let store = store(&reg);
        let mut log = MessageLog::new();

        let q = search(&reg, Query::all("library.book"), Some("dune"), &mut log);
        assert_eq!(store.pks(&q).await.unwrap(), vec![1]);

        let q = search(&reg, Query::all("library.book"), Some("le guin"), &mut log);
        assert_eq!(store.pks(&q).await.unwrap(), vec![2]);

        let q = search(&reg, Query::all("library.book"), Some("fantasy"), &mut log);
        assert_eq!(store.pks(&q).await.unwrap(), vec![1]);

        let q = search(&reg, Query::all("library.book"), Some("zzz"), &mut log);
        assert!(store.pks(&q).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn searches_non_text_fields_by_their_string_form() {
        let reg = registry();
        let store = store(&reg);
        let mut log = MessageLog::new();
        let q = search(&reg, Query::all("library.edition"), Some("196"), &mut log);
        assert_ne!(q.filter, Filter::Nothing);
        assert_eq!(store.pks(&q).await.unwrap(), vec![1]);
        assert_eq!(log.get(true)[0].text, "Searching edition for '196' in year");
    }

    #[tokio::test]
    async fn type_without_search_fields_matches_nothing() {
        let reg = registry();
        let mut log = MessageLog::new();
        let q = search(&reg, Query::all("library.shelf"), Some("x"), &mut log);
        assert_eq!(q.filter, Filter::Nothing);
        assert_eq!(log.get(true)[0].text, "No searchable fields found on shelf");
    }

    #[tokio::test]
    async fn unused_related_excludes_linked() {
        let reg = registry();
        let store = store(&reg);
        let genre = reg.get_type("library.genre").unwrap().clone();
        let linked = Query::all("library.genre").filter(Filter::MemberOf {
            owner: "library.book".into(),
            owner_pk: 1,
            field: "genres".into(),
        });
        let q = unused_related(&store, &genre, &linked, Filter::All).await.unwrap();
        assert_eq!(store.pks(&q).await.unwrap(), vec![3, 4, 5]);

        let q = unused_related(&store, &genre, &linked, Filter::icontains("name", "o"))
            .await
            .unwrap();
        assert_eq!(store.pks(&q).await.unwrap(), vec![3, 4]);
    }
}
