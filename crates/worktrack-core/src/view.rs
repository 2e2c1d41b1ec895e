//! Outbound resource views for work items and iterations.
//!
//! A view is built from the domain record, then each [`ViewTransform`] in
//! the caller's list runs over it in order. Transforms are how optional
//! decorations such as per-iteration counts get attached.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use crate::config::ApiConfig;
use crate::filter::FilterExpression;
use crate::model::field::format_timestamp;
use crate::model::item_type::SYSTEM_ITERATION;
use crate::model::{FieldValue, Iteration, IterationCounts, IterationId, WorkItem};
use crate::page::PageLinks;
use crate::repository::WorkItemPage;

pub const WORKITEMS_TYPE: &str = "workitems";
pub const WORKITEMTYPES_TYPE: &str = "workitemtypes";
pub const ITERATIONS_TYPE: &str = "iterations";
pub const SPACES_TYPE: &str = "spaces";

/// Post-processing step applied to a freshly built view.
pub type ViewTransform<'a, T> = Box<dyn Fn(&T, &mut ResourceView) + 'a>;

/// Reference to another resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Relationship {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResourceRef>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub links: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

impl Relationship {
    fn to(kind: &str, id: impl Into<String>, self_url: String) -> Self {
        Self {
            data: Some(ResourceRef {
                kind: kind.to_string(),
                id: id.into(),
            }),
            links: BTreeMap::from([("self".to_string(), self_url)]),
            meta: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceView {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub attributes: Map<String, Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<String, Relationship>,
    pub links: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

impl ResourceView {
    fn new(kind: &str, id: String, self_url: String) -> Self {
        Self {
            kind: kind.to_string(),
            id,
            attributes: Map::new(),
            relationships: BTreeMap::new(),
            links: BTreeMap::from([("self".to_string(), self_url)]),
            meta: Map::new(),
        }
    }

    fn apply<T>(mut self, record: &T, transforms: &[ViewTransform<'_, T>]) -> Self {
        for transform in transforms {
            transform(record, &mut self);
        }
        self
    }
}

/// Build the view of a work item.
#[must_use]
pub fn work_item_view(
    item: &WorkItem,
    api: &ApiConfig,
    transforms: &[ViewTransform<'_, WorkItem>],
) -> ResourceView {
    let base = api.base_url.trim_end_matches('/');
    let mut view = ResourceView::new(
        WORKITEMS_TYPE,
        item.id.to_string(),
        format!("{}/{}", api.workitems_url(), item.id),
    );
    view.attributes = item.fields_json();
    view.attributes.insert("version".to_string(), Value::from(item.version));
    view.relationships.insert(
        "baseType".to_string(),
        Relationship::to(
            WORKITEMTYPES_TYPE,
            item.type_name.as_str(),
            format!("{base}/workitemtypes/{}", item.type_name),
        ),
    );
    if let Some(FieldValue::Identifier(iteration)) = item.field(SYSTEM_ITERATION) {
        view.relationships.insert(
            "iteration".to_string(),
            Relationship::to(
                ITERATIONS_TYPE,
                iteration.as_str(),
                format!("{}/{iteration}", api.iterations_url()),
            ),
        );
    }
    view.apply(item, transforms)
}

/// Build the view of an iteration.
#[must_use]
pub fn iteration_view(
    iteration: &Iteration,
    api: &ApiConfig,
    transforms: &[ViewTransform<'_, Iteration>],
) -> ResourceView {
    let base = api.base_url.trim_end_matches('/');
    let mut view = ResourceView::new(
        ITERATIONS_TYPE,
        iteration.id.to_string(),
        format!("{}/{}", api.iterations_url(), iteration.id),
    );

    let attrs = &mut view.attributes;
    attrs.insert("name".to_string(), Value::from(iteration.name.as_str()));
    attrs.insert("state".to_string(), Value::from(iteration.state.as_str()));
    if let Some(description) = &iteration.description {
        attrs.insert("description".to_string(), Value::from(description.as_str()));
    }
    if let Some(start) = &iteration.start_at {
        attrs.insert("start_at".to_string(), Value::from(format_timestamp(start)));
    }
    if let Some(end) = &iteration.end_at {
        attrs.insert("end_at".to_string(), Value::from(format_timestamp(end)));
    }

    view.relationships.insert(
        "space".to_string(),
        Relationship::to(
            SPACES_TYPE,
            iteration.space_id.as_str(),
            format!("{base}/spaces/{}", iteration.space_id),
        ),
    );
    view.relationships.insert(
        "workitems".to_string(),
        Relationship {
            links: BTreeMap::from([(
                "related".to_string(),
                format!(
                    "{}?filter={}",
                    api.workitems_url(),
                    encode_query_value(&iteration_filter(&iteration.id).to_json().to_string())
                ),
            )]),
            ..Relationship::default()
        },
    );
    if let Some(parent) = &iteration.parent_id {
        view.relationships.insert(
            "parent".to_string(),
            Relationship::to(
                ITERATIONS_TYPE,
                parent.as_str(),
                format!("{}/{parent}", api.iterations_url()),
            ),
        );
    }
    view.apply(iteration, transforms)
}

/// The list filter selecting work items planned into `id`.
fn iteration_filter(id: &IterationId) -> FilterExpression {
    FilterExpression::Equals {
        field: SYSTEM_ITERATION.to_string(),
        value: FieldValue::Identifier(id.to_string()),
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn encode_query_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

/// Attach `meta.total` and `meta.closed` to the `workitems` relationship.
/// Iterations missing from `counts` get zeros.
#[must_use]
pub fn with_iteration_counts(
    counts: &HashMap<IterationId, IterationCounts>,
) -> ViewTransform<'_, Iteration> {
    Box::new(move |iteration, view| {
        let c = counts.get(&iteration.id).copied().unwrap_or_default();
        let rel = view.relationships.entry("workitems".to_string()).or_default();
        rel.meta.insert("total".to_string(), Value::from(c.total));
        rel.meta.insert("closed".to_string(), Value::from(c.closed));
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListMeta {
    pub total_count: u64,
}

/// One page of work items with navigation links.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListDocument {
    pub data: Vec<ResourceView>,
    pub links: PageLinks,
    pub meta: ListMeta,
}

impl ListDocument {
    #[must_use]
    pub fn from_page(
        page: &WorkItemPage,
        api: &ApiConfig,
        transforms: &[ViewTransform<'_, WorkItem>],
    ) -> Self {
        Self {
            data: page
                .items
                .iter()
                .map(|item| work_item_view(item, api, transforms))
                .collect(),
            links: page.window.links(&api.workitems_url()),
            meta: ListMeta {
                total_count: page.total,
            },
        }
    }
}
