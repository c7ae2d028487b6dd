//! Entity identities, values and containers.

mod container;
mod id;
mod value;

pub use container::{DataContainer, EntityState};
pub use id::EntityId;
pub use value::PropertyValue;
