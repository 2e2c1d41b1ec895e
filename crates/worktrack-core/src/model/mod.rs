//! Domain model: field values, type schemas, work items, iterations.

pub mod field;
pub mod item;
pub mod item_type;
pub mod iteration;

pub use field::{FieldKind, FieldValue};
pub use item::{INITIAL_VERSION, ItemId, WorkItem, WorkItemUpdate};
pub use item_type::{FieldCatalog, FieldDefinition, WorkItemType};
pub use iteration::{Iteration, IterationCounts, IterationId, IterationState};
