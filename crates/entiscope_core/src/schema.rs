//! Class and relation metadata.
//!
//! The engine needs to know which properties a class declares (to create
//! new objects and validate writes) and how relations pair up (to keep both
//! sides of a bidirectional relation consistent). How classes map onto a
//! relational schema is not the engine's concern.

use crate::entity::PropertyValue;
use crate::error::{CoreError, CoreResult};
use crate::types::ClassId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Number of objects on the far side of a relation end point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// At most one related object.
    One,
    /// An ordered, duplicate-free collection of related objects.
    Many,
}

/// A class and its declared properties.
#[derive(Debug, Clone)]
pub struct ClassDefinition {
    id: ClassId,
    name: String,
    defaults: BTreeMap<String, PropertyValue>,
}

impl ClassDefinition {
    /// Returns the class ID.
    #[must_use]
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// Returns the class name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the default value of every declared property.
    #[must_use]
    pub fn defaults(&self) -> &BTreeMap<String, PropertyValue> {
        &self.defaults
    }

    /// Returns `true` if the class declares the property.
    #[must_use]
    pub fn has_property(&self, name: &str) -> bool {
        self.defaults.contains_key(name)
    }
}

/// One side of a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDefinition {
    name: String,
    owner: ClassId,
    target: ClassId,
    cardinality: Cardinality,
    inverse: Option<String>,
}

impl RelationDefinition {
    /// Returns the relation name (unique across the schema).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the class owning this end.
    #[must_use]
    pub fn owner(&self) -> ClassId {
        self.owner
    }

    /// Returns the class of related objects.
    #[must_use]
    pub fn target(&self) -> ClassId {
        self.target
    }

    /// Returns the cardinality of this end.
    #[must_use]
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Returns the name of the opposite end, if the relation is bidirectional.
    #[must_use]
    pub fn inverse(&self) -> Option<&str> {
        self.inverse.as_deref()
    }
}

/// One side of a bidirectional relation, used with [`SchemaBuilder::bidirectional`].
#[derive(Debug, Clone)]
pub struct RelationSide {
    name: String,
    class: ClassId,
    cardinality: Cardinality,
}

impl RelationSide {
    /// A side holding at most one related object.
    pub fn one(name: impl Into<String>, class: ClassId) -> Self {
        Self {
            name: name.into(),
            class,
            cardinality: Cardinality::One,
        }
    }

    /// A side holding a collection of related objects.
    pub fn many(name: impl Into<String>, class: ClassId) -> Self {
        Self {
            name: name.into(),
            class,
            cardinality: Cardinality::Many,
        }
    }
}

/// Runtime metadata for all classes and relations.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    classes: HashMap<ClassId, ClassDefinition>,
    relations: HashMap<String, RelationDefinition>,
    by_class: HashMap<ClassId, Vec<String>>,
}

impl Schema {
    /// Starts building a schema.
    #[must_use]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Looks up a class.
    pub fn class(&self, id: ClassId) -> CoreResult<&ClassDefinition> {
        self.classes
            .get(&id)
            .ok_or(CoreError::UnknownClass { class: id })
    }

    /// Looks up a class by name.
    #[must_use]
    pub fn class_by_name(&self, name: &str) -> Option<&ClassDefinition> {
        self.classes.values().find(|c| c.name == name)
    }

    /// Iterates over all classes.
    pub fn classes(&self) -> impl Iterator<Item = &ClassDefinition> {
        self.classes.values()
    }

    /// Looks up a relation end by name.
    pub fn relation(&self, name: &str) -> CoreResult<&RelationDefinition> {
        self.relations
            .get(name)
            .ok_or_else(|| CoreError::UnknownRelation {
                relation: name.to_string(),
            })
    }

    /// Returns the opposite end of a bidirectional relation.
    #[must_use]
    pub fn inverse_of(&self, relation: &RelationDefinition) -> Option<&RelationDefinition> {
        relation
            .inverse
            .as_deref()
            .and_then(|name| self.relations.get(name))
    }

    /// Iterates over the relation ends owned by a class, in declaration order.
    pub fn relations_of(&self, class: ClassId) -> impl Iterator<Item = &RelationDefinition> {
        self.by_class
            .get(&class)
            .into_iter()
            .flatten()
            .filter_map(|name| self.relations.get(name))
    }

    /// Fails unless the class declares the property.
    pub fn check_property(&self, class: ClassId, property: &str) -> CoreResult<()> {
        if self.class(class)?.has_property(property) {
            Ok(())
        } else {
            Err(CoreError::UnknownProperty {
                class,
                property: property.to_string(),
            })
        }
    }
}

/// Builder for [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    classes: Vec<ClassDefinition>,
    relations: Vec<RelationDefinition>,
}

impl SchemaBuilder {
    /// Declares a class with its properties and their default values.
    #[must_use]
    pub fn class<I, K>(mut self, id: ClassId, name: impl Into<String>, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, PropertyValue)>,
        K: Into<String>,
    {
        self.classes.push(ClassDefinition {
            id,
            name: name.into(),
            defaults: properties
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
        });
        self
    }

    /// Declares a relation that is only navigable from its owner.
    #[must_use]
    pub fn relation(
        mut self,
        name: impl Into<String>,
        owner: ClassId,
        target: ClassId,
        cardinality: Cardinality,
    ) -> Self {
        self.relations.push(RelationDefinition {
            name: name.into(),
            owner,
            target,
            cardinality,
            inverse: None,
        });
        self
    }

    /// Declares a relation navigable from both sides.
    #[must_use]
    pub fn bidirectional(mut self, left: RelationSide, right: RelationSide) -> Self {
        self.relations.push(RelationDefinition {
            name: left.name.clone(),
            owner: left.class,
            target: right.class,
            cardinality: left.cardinality,
            inverse: Some(right.name.clone()),
        });
        self.relations.push(RelationDefinition {
            name: right.name,
            owner: right.class,
            target: left.class,
            cardinality: right.cardinality,
            inverse: Some(left.name),
        });
        self
    }

    /// Validates and builds the schema.
    pub fn build(self) -> CoreResult<Schema> {
        let mut schema = Schema::default();
        for class in self.classes {
            if schema.classes.values().any(|c| c.name == class.name) {
                return Err(CoreError::invalid_schema(format!(
                    "class name `{}` declared twice",
                    class.name
                )));
            }
            if schema.classes.insert(class.id, class).is_some() {
                return Err(CoreError::invalid_schema("class id declared twice"));
            }
        }
        for relation in self.relations {
            for class in [relation.owner, relation.target] {
                if !schema.classes.contains_key(&class) {
                    return Err(CoreError::invalid_schema(format!(
                        "relation `{}` refers to undeclared {class}",
                        relation.name
                    )));
                }
            }
            if relation.inverse.as_deref() == Some(relation.name.as_str()) {
                return Err(CoreError::invalid_schema(format!(
                    "relation `{}` cannot be its own inverse",
                    relation.name
                )));
            }
            schema
                .by_class
                .entry(relation.owner)
                .or_default()
                .push(relation.name.clone());
            let name = relation.name.clone();
            if schema.relations.insert(name.clone(), relation).is_some() {
                return Err(CoreError::invalid_schema(format!(
                    "relation `{name}` declared twice"
                )));
            }
        }
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CUSTOMER: ClassId = ClassId::new(1);
    const ORDER: ClassId = ClassId::new(2);

    fn schema() -> Schema {
        Schema::builder()
            .class(CUSTOMER, "Customer", [("name", PropertyValue::Null)])
            .class(ORDER, "Order", [("number", PropertyValue::Int(0))])
            .bidirectional(
                RelationSide::one("Order.customer", ORDER),
                RelationSide::many("Customer.orders", CUSTOMER),
            )
            .relation("Customer.favorite", CUSTOMER, ORDER, Cardinality::One)
            .build()
            .unwrap()
    }

    #[test]
    fn bidirectional_pairs_inverse() {
        let schema = schema();
        let order_customer = schema.relation("Order.customer").unwrap();
        assert_eq!(order_customer.cardinality(), Cardinality::One);
        assert_eq!(order_customer.target(), CUSTOMER);
        let inverse = schema.inverse_of(order_customer).unwrap();
        assert_eq!(inverse.name(), "Customer.orders");
        assert_eq!(inverse.cardinality(), Cardinality::Many);
        assert_eq!(inverse.inverse(), Some("Order.customer"));
    }

    #[test]
    fn relations_of_class_in_declaration_order() {
        let schema = schema();
        let names: Vec<_> = schema.relations_of(CUSTOMER).map(|r| r.name()).collect();
        assert_eq!(names, vec!["Customer.orders", "Customer.favorite"]);
        assert!(schema.inverse_of(schema.relation("Customer.favorite").unwrap()).is_none());
    }

    #[test]
    fn unknown_lookups_fail() {
        let schema = schema();
        assert!(matches!(
            schema.relation("Nope"),
            Err(CoreError::UnknownRelation { .. })
        ));
        assert!(matches!(
            schema.class(ClassId::new(99)),
            Err(CoreError::UnknownClass { .. })
        ));
        assert!(schema.check_property(ORDER, "number").is_ok());
        assert!(matches!(
            schema.check_property(ORDER, "name"),
            Err(CoreError::UnknownProperty { .. })
        ));
    }

    #[test]
    fn duplicate_relation_rejected() {
        let result = Schema::builder()
            .class(CUSTOMER, "Customer", Vec::<(&str, PropertyValue)>::new())
            .relation("x", CUSTOMER, CUSTOMER, Cardinality::One)
            .relation("x", CUSTOMER, CUSTOMER, Cardinality::Many)
            .build();
        assert!(matches!(result, Err(CoreError::InvalidSchema { .. })));
    }

    #[test]
    fn relation_to_undeclared_class_rejected() {
        let result = Schema::builder()
            .class(CUSTOMER, "Customer", Vec::<(&str, PropertyValue)>::new())
            .relation("x", CUSTOMER, ORDER, Cardinality::One)
            .build();
        assert!(matches!(result, Err(CoreError::InvalidSchema { .. })));
    }

    #[test]
    fn class_by_name() {
        let schema = schema();
        assert_eq!(schema.class_by_name("Order").unwrap().id(), ORDER);
        assert!(schema.class_by_name("Invoice").is_none());
    }
}
