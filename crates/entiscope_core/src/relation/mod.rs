//! Relation end points.
//!
//! A relation between two objects is seen from each side as an end point:
//! the pair (object, relation name). An end point holds either a single
//! related object or an ordered collection, and is loaded lazily.

mod end_point;

pub use end_point::{Completeness, EndPointData, RelationEndPoint};

use crate::entity::EntityId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one side of a relation on one object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationEndPointId {
    /// The owning object.
    pub object: EntityId,
    /// The relation name, as declared in the schema.
    pub relation: String,
}

impl RelationEndPointId {
    /// Creates an end point ID.
    pub fn new(object: EntityId, relation: impl Into<String>) -> Self {
        Self {
            object,
            relation: relation.into(),
        }
    }
}

impl fmt::Display for RelationEndPointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.object, self.relation)
    }
}
