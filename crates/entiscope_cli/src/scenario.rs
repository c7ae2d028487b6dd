//! Scenario files.
//!
//! A scenario is a JSON document declaring a schema, the objects and
//! relations the store starts with, and a list of steps to run against a
//! fresh scope manager. Objects and scopes are referred to by alias.
//!
//! ```json
//! {
//!   "classes": [
//!     { "name": "Customer", "properties": { "name": null } },
//!     { "name": "Order", "properties": { "number": 0 } }
//!   ],
//!   "relations": [
//!     { "name": "Order.customer", "owner": "Order", "target": "Customer",
//!       "cardinality": "one",
//!       "inverse": { "name": "Customer.orders", "cardinality": "many" } }
//!   ],
//!   "objects": [ { "alias": "ada", "class": "Customer", "properties": { "name": "Ada" } } ],
//!   "steps": [
//!     { "op": "create_root", "scope": "root" },
//!     { "op": "set", "scope": "root", "object": "ada", "property": "name", "value": "Ada L." },
//!     { "op": "commit", "scope": "root" }
//!   ]
//! }
//! ```

use crate::error::{CliError, CliResult};
use entiscope_core::{
    Cardinality, ClassId, EntityId, InMemoryStore, PropertyValue, RelationData,
    RelationEndPointId, RelationSide, Schema,
};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// A parsed scenario file.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    /// Optional title shown in reports.
    #[serde(default)]
    pub name: Option<String>,
    /// Declared classes; IDs are assigned in declaration order from 1.
    pub classes: Vec<ClassSpec>,
    /// Declared relations.
    #[serde(default)]
    pub relations: Vec<RelationSpec>,
    /// Objects the store starts with.
    #[serde(default)]
    pub objects: Vec<ObjectSpec>,
    /// Relation data the store starts with.
    #[serde(default)]
    pub links: Vec<LinkSpec>,
    /// Steps to run, in order.
    pub steps: Vec<Step>,
}

impl Scenario {
    /// Reads and parses a scenario file.
    pub fn from_path(path: &Path) -> CliResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parses a scenario from JSON text.
    pub fn parse(text: &str) -> CliResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// A class declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassSpec {
    /// Class name.
    pub name: String,
    /// Property names with their default values.
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

/// A relation declaration, optionally with its inverse.
#[derive(Debug, Clone, Deserialize)]
pub struct RelationSpec {
    /// Relation name.
    pub name: String,
    /// Owning class name.
    pub owner: String,
    /// Target class name.
    pub target: String,
    /// Cardinality of the owner's end point.
    pub cardinality: Cardinality,
    /// The opposite side, for bidirectional relations.
    #[serde(default)]
    pub inverse: Option<InverseSpec>,
}

/// The opposite side of a bidirectional relation.
#[derive(Debug, Clone, Deserialize)]
pub struct InverseSpec {
    /// Relation name of the opposite side.
    pub name: String,
    /// Cardinality of the opposite end point.
    pub cardinality: Cardinality,
}

/// A stored object.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectSpec {
    /// Alias used by steps.
    pub alias: String,
    /// Class name.
    pub class: String,
    /// Stored property values. Missing properties take the class default.
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

/// Stored relation data of one end point. The inverse side, if any, is
/// seeded to match.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkSpec {
    /// Owner alias.
    pub owner: String,
    /// Relation name.
    pub relation: String,
    /// Related aliases, in order.
    pub targets: Vec<String>,
}

/// One step of a scenario.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Opens a root scope.
    CreateRoot {
        /// Alias for the new scope.
        scope: String,
    },
    /// Opens a sub-scope.
    CreateSub {
        /// Alias for the new scope.
        scope: String,
        /// Alias of the parent scope.
        parent: String,
    },
    /// Reads a property, a relation, or just loads the object.
    Get {
        /// Scope alias.
        scope: String,
        /// Object alias.
        object: String,
        /// Property to read.
        #[serde(default)]
        property: Option<String>,
        /// Relation to read.
        #[serde(default)]
        relation: Option<String>,
    },
    /// Sets a property.
    Set {
        /// Scope alias.
        scope: String,
        /// Object alias.
        object: String,
        /// Property name.
        property: String,
        /// New value.
        value: PropertyValue,
    },
    /// Creates a new object under a fresh alias.
    New {
        /// Scope alias.
        scope: String,
        /// Class name.
        class: String,
        /// Alias for the new object.
        alias: String,
    },
    /// Deletes an object.
    Delete {
        /// Scope alias.
        scope: String,
        /// Object alias.
        object: String,
    },
    /// Sets (or clears) a single-valued relation.
    Link {
        /// Scope alias.
        scope: String,
        /// Owner alias.
        object: String,
        /// Relation name.
        relation: String,
        /// Target alias, `null` to clear.
        #[serde(default)]
        target: Option<String>,
    },
    /// Appends to a collection relation.
    Add {
        /// Scope alias.
        scope: String,
        /// Owner alias.
        object: String,
        /// Relation name.
        relation: String,
        /// Item alias.
        item: String,
    },
    /// Removes from a collection relation.
    Remove {
        /// Scope alias.
        scope: String,
        /// Owner alias.
        object: String,
        /// Relation name.
        relation: String,
        /// Item alias.
        item: String,
    },
    /// Commits a scope.
    Commit {
        /// Scope alias.
        scope: String,
    },
    /// Rolls a scope back.
    Rollback {
        /// Scope alias.
        scope: String,
    },
    /// Discards a scope.
    Discard {
        /// Scope alias.
        scope: String,
    },
    /// Runs the nested step and requires it to fail with the named error
    /// kind.
    ExpectError {
        /// Expected error kind, e.g. `read_only_violation`.
        error: String,
        /// The step that must fail.
        step: Box<Step>,
    },
}

impl Step {
    /// Returns the operation name as written in scenario files.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateRoot { .. } => "create_root",
            Self::CreateSub { .. } => "create_sub",
            Self::Get { .. } => "get",
            Self::Set { .. } => "set",
            Self::New { .. } => "new",
            Self::Delete { .. } => "delete",
            Self::Link { .. } => "link",
            Self::Add { .. } => "add",
            Self::Remove { .. } => "remove",
            Self::Commit { .. } => "commit",
            Self::Rollback { .. } => "rollback",
            Self::Discard { .. } => "discard",
            Self::ExpectError { .. } => "expect_error",
        }
    }
}

/// The schema of a scenario plus its alias tables.
#[derive(Debug, Clone)]
pub struct World {
    /// The built schema.
    pub schema: Schema,
    classes: HashMap<String, ClassId>,
    objects: HashMap<String, EntityId>,
    names: HashMap<EntityId, String>,
}

impl World {
    /// Builds the schema and registers the aliases of the stored objects.
    pub fn build(scenario: &Scenario) -> CliResult<Self> {
        let mut builder = Schema::builder();
        let mut classes = HashMap::new();
        for (position, class) in scenario.classes.iter().enumerate() {
            let id = ClassId::new(position as u32 + 1);
            if classes.insert(class.name.clone(), id).is_some() {
                return Err(CliError::Invalid(format!(
                    "class `{}` declared twice",
                    class.name
                )));
            }
            builder = builder.class(id, class.name.clone(), class.properties.clone());
        }

        let class_of = |name: &str| {
            classes
                .get(name)
                .copied()
                .ok_or_else(|| CliError::unknown("class", name))
        };
        for relation in &scenario.relations {
            let owner = class_of(&relation.owner)?;
            let target = class_of(&relation.target)?;
            builder = match &relation.inverse {
                None => builder.relation(relation.name.clone(), owner, target, relation.cardinality),
                Some(inverse) => builder.bidirectional(
                    side(&relation.name, owner, relation.cardinality),
                    side(&inverse.name, target, inverse.cardinality),
                ),
            };
        }
        let schema = builder.build().map_err(CliError::Schema)?;

        let mut world = Self {
            schema,
            classes,
            objects: HashMap::new(),
            names: HashMap::new(),
        };
        for object in &scenario.objects {
            let class = world.class(&object.class)?;
            world.define(&object.alias, class)?;
        }
        Ok(world)
    }

    /// Seeds `store` with the scenario's objects and links.
    pub fn seed(&self, scenario: &Scenario, store: &InMemoryStore) -> CliResult<()> {
        for object in &scenario.objects {
            let id = self.object(&object.alias)?;
            let class = self.schema.class(id.class()).map_err(CliError::Schema)?;
            let mut properties = class.defaults().clone();
            for (name, value) in &object.properties {
                if !class.has_property(name) {
                    return Err(CliError::unknown("property", name));
                }
                properties.insert(name.clone(), value.clone());
            }
            store.insert(id, properties);
        }

        let mut seeded: HashMap<RelationEndPointId, RelationData> = HashMap::new();
        for link in &scenario.links {
            let owner = self.object(&link.owner)?;
            let relation = self
                .schema
                .relation(&link.relation)
                .map_err(|_| CliError::unknown("relation", &link.relation))?;
            if relation.owner() != owner.class() {
                return Err(CliError::Invalid(format!(
                    "`{}` does not own relation `{}`",
                    link.owner, link.relation
                )));
            }
            let targets = link
                .targets
                .iter()
                .map(|alias| self.object(alias))
                .collect::<CliResult<Vec<_>>>()?;
            let data = match relation.cardinality() {
                Cardinality::One if targets.len() > 1 => {
                    return Err(CliError::Invalid(format!(
                        "`{}` holds at most one object",
                        link.relation
                    )));
                }
                Cardinality::One => RelationData::One(targets.first().copied()),
                Cardinality::Many => RelationData::Many(targets.clone()),
            };
            seeded.insert(RelationEndPointId::new(owner, relation.name()), data);

            if let Some(inverse) = self.schema.inverse_of(relation) {
                for target in targets {
                    let end_point = RelationEndPointId::new(target, inverse.name());
                    let entry = seeded
                        .entry(end_point)
                        .or_insert_with(|| RelationData::empty(inverse.cardinality()));
                    match entry {
                        RelationData::One(related) => *related = Some(owner),
                        RelationData::Many(items) => {
                            if !items.contains(&owner) {
                                items.push(owner);
                            }
                        }
                    }
                }
            }
        }
        for (end_point, data) in seeded {
            store.seed_relation(end_point, data);
        }
        Ok(())
    }

    /// Resolves a class name.
    pub fn class(&self, name: &str) -> CliResult<ClassId> {
        self.classes
            .get(name)
            .copied()
            .ok_or_else(|| CliError::unknown("class", name))
    }

    /// Returns the class name of an ID, if declared.
    pub fn class_name(&self, id: ClassId) -> Option<&str> {
        self.schema.class(id).ok().map(|c| c.name())
    }

    /// Resolves an object alias.
    pub fn object(&self, alias: &str) -> CliResult<EntityId> {
        self.objects
            .get(alias)
            .copied()
            .ok_or_else(|| CliError::unknown("object", alias))
    }

    /// Returns `true` if `alias` names an object.
    pub fn is_defined(&self, alias: &str) -> bool {
        self.objects.contains_key(alias)
    }

    /// Registers a fresh alias; its identity is derived from class and
    /// alias so that runs are reproducible.
    pub fn define(&mut self, alias: &str, class: ClassId) -> CliResult<EntityId> {
        if self.objects.contains_key(alias) {
            return Err(CliError::Invalid(format!("object `{alias}` declared twice")));
        }
        let id = EntityId::named(class, alias);
        self.objects.insert(alias.to_string(), id);
        self.names.insert(id, alias.to_string());
        Ok(id)
    }

    /// Returns the alias of an object, or its ID if it has none.
    pub fn alias_of(&self, id: EntityId) -> String {
        self.names.get(&id).cloned().unwrap_or_else(|| id.to_string())
    }

    /// Returns every alias with its identity, sorted by alias.
    pub fn aliases(&self) -> Vec<(&str, EntityId)> {
        let mut aliases: Vec<_> = self
            .objects
            .iter()
            .map(|(alias, id)| (alias.as_str(), *id))
            .collect();
        aliases.sort_by(|a, b| a.0.cmp(b.0));
        aliases
    }
}

fn side(name: &str, class: ClassId, cardinality: Cardinality) -> RelationSide {
    match cardinality {
        Cardinality::One => RelationSide::one(name, class),
        Cardinality::Many => RelationSide::many(name, class),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDERS: &str = r#"{
        "classes": [
            { "name": "Customer", "properties": { "name": null } },
            { "name": "Order", "properties": { "number": 0 } }
        ],
        "relations": [
            { "name": "Order.customer", "owner": "Order", "target": "Customer",
              "cardinality": "one",
              "inverse": { "name": "Customer.orders", "cardinality": "many" } }
        ],
        "objects": [
            { "alias": "ada", "class": "Customer", "properties": { "name": "Ada" } },
            { "alias": "o1", "class": "Order", "properties": { "number": 1 } }
        ],
        "links": [ { "owner": "ada", "relation": "Customer.orders", "targets": ["o1"] } ],
        "steps": [
            { "op": "create_root", "scope": "root" },
            { "op": "expect_error", "error": "read_only_violation",
              "step": { "op": "commit", "scope": "root" } }
        ]
    }"#;

    #[test]
    fn parses_steps_by_op_tag() {
        let scenario = Scenario::parse(ORDERS).unwrap();
        assert_eq!(scenario.steps.len(), 2);
        assert_eq!(scenario.steps[0].name(), "create_root");
        match &scenario.steps[1] {
            Step::ExpectError { error, step } => {
                assert_eq!(error, "read_only_violation");
                assert_eq!(step.name(), "commit");
            }
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn seeding_fills_both_sides_of_a_link() {
        let scenario = Scenario::parse(ORDERS).unwrap();
        let world = World::build(&scenario).unwrap();
        let store = InMemoryStore::new();
        world.seed(&scenario, &store).unwrap();

        let ada = world.object("ada").unwrap();
        let order = world.object("o1").unwrap();
        assert_eq!(
            store.relation(&RelationEndPointId::new(order, "Order.customer")),
            Some(RelationData::One(Some(ada)))
        );
        assert_eq!(
            store.relation(&RelationEndPointId::new(ada, "Customer.orders")),
            Some(RelationData::Many(vec![order]))
        );
        assert_eq!(world.class_name(ada.class()), Some("Customer"));
    }

    #[test]
    fn unknown_names_are_reported() {
        let mut scenario = Scenario::parse(ORDERS).unwrap();
        scenario.objects[0].class = "Supplier".to_string();
        let err = World::build(&scenario).unwrap_err();
        assert!(matches!(err, CliError::Unknown { what: "class", .. }));
    }

    #[test]
    fn aliases_are_unique() {
        let scenario = Scenario::parse(ORDERS).unwrap();
        let mut world = World::build(&scenario).unwrap();
        let class = world.class("Order").unwrap();
        assert!(world.define("o1", class).is_err());
        let id = world.define("o2", class).unwrap();
        assert_eq!(world.alias_of(id), "o2");
    }
}
