//! Run command implementation.

use crate::error::{CliError, CliResult};
use crate::scenario::{Scenario, Step, World};
use entiscope_core::{
    Cardinality, CollectionOperation, CoreError, EngineConfig, EntityId, EventKind, EventRecord,
    InMemoryStore, PropertyValue, RelationData, RelationEndPointId, RelationModification, ScopeId,
    ScopeManager,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Everything a scenario run produced.
#[derive(Debug, Serialize)]
pub struct RunReport {
    /// Scenario title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// One entry per step.
    pub steps: Vec<StepOutcome>,
    /// Every event dispatched, oldest first.
    pub events: Vec<EventLine>,
    /// Store contents after the last step.
    pub store: Vec<StoredObject>,
}

/// Outcome of one step.
#[derive(Debug, Serialize)]
pub struct StepOutcome {
    /// Zero-based step index.
    pub index: usize,
    /// Operation name.
    pub op: &'static str,
    /// What the step returned, if anything.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// One dispatched event, with aliases in place of IDs.
#[derive(Debug, Serialize)]
pub struct EventLine {
    /// Scope alias.
    pub scope: String,
    /// Event kind.
    pub kind: EventKind,
    /// Object alias.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    /// Kind-specific detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One object as stored after the run.
#[derive(Debug, Serialize)]
pub struct StoredObject {
    /// Object alias.
    pub alias: String,
    /// Class name.
    pub class: String,
    /// Stored version.
    pub version: u64,
    /// Stored property values.
    pub properties: BTreeMap<String, PropertyValue>,
    /// Stored relation data by relation name.
    pub relations: BTreeMap<String, Vec<String>>,
}

/// Runs the run command.
pub fn run(path: &Path, format: &str) -> CliResult<()> {
    let scenario = Scenario::from_path(path)?;
    info!(path = %path.display(), steps = scenario.steps.len(), "running scenario");
    let report = execute(&scenario)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    Ok(())
}

/// Runs every step of `scenario` against a fresh manager and store.
pub fn execute(scenario: &Scenario) -> CliResult<RunReport> {
    let world = World::build(scenario)?;
    let store = Arc::new(InMemoryStore::new());
    world.seed(scenario, &store)?;

    let config = EngineConfig::default();
    let recorder = config.recorder();
    let log = recorder.log();
    let mut manager =
        ScopeManager::with_config(Arc::new(world.schema.clone()), Arc::clone(&store), config);
    manager.add_listener_factory(recorder);

    let mut runner = Runner {
        manager,
        world,
        scopes: HashMap::new(),
        scope_names: HashMap::new(),
    };
    let mut steps = Vec::with_capacity(scenario.steps.len());
    for (index, step) in scenario.steps.iter().enumerate() {
        debug!(index, op = step.name(), "running step");
        let result = runner.step(index, step)?;
        steps.push(StepOutcome {
            index,
            op: step.name(),
            result,
        });
    }

    let events = log
        .snapshot()
        .iter()
        .map(|record| runner.describe_event(record))
        .collect();
    let store = runner.stored_objects(&store);
    Ok(RunReport {
        name: scenario.name.clone(),
        steps,
        events,
        store,
    })
}

enum Failure {
    Engine(CoreError),
    Scenario(CliError),
}

impl From<CoreError> for Failure {
    fn from(err: CoreError) -> Self {
        Self::Engine(err)
    }
}

impl From<CliError> for Failure {
    fn from(err: CliError) -> Self {
        Self::Scenario(err)
    }
}

struct Runner {
    manager: ScopeManager,
    world: World,
    scopes: HashMap<String, ScopeId>,
    scope_names: HashMap<ScopeId, String>,
}

impl Runner {
    fn step(&mut self, index: usize, step: &Step) -> CliResult<Option<String>> {
        if let Step::ExpectError { error, step: inner } = step {
            return match self.apply(inner) {
                Ok(_) => Err(CliError::Expectation {
                    index,
                    expected: error.clone(),
                    actual: "success".to_string(),
                }),
                Err(Failure::Engine(err)) if err.kind() == error.as_str() => {
                    Ok(Some(format!("{}: {err}", err.kind())))
                }
                Err(Failure::Engine(err)) => Err(CliError::Expectation {
                    index,
                    expected: error.clone(),
                    actual: err.kind().to_string(),
                }),
                Err(Failure::Scenario(err)) => Err(err),
            };
        }
        self.apply(step).map_err(|failure| match failure {
            Failure::Engine(source) => CliError::StepFailed {
                index,
                op: step.name(),
                source,
            },
            Failure::Scenario(err) => err,
        })
    }

    fn apply(&mut self, step: &Step) -> Result<Option<String>, Failure> {
        match step {
            Step::CreateRoot { scope } => {
                self.check_scope_alias(scope)?;
                let id = self.manager.create_root();
                self.name_scope(scope, id);
                Ok(None)
            }
            Step::CreateSub { scope, parent } => {
                self.check_scope_alias(scope)?;
                let parent = self.scope(parent)?;
                let id = self.manager.create_sub_scope(parent)?;
                self.name_scope(scope, id);
                Ok(None)
            }
            Step::Get {
                scope,
                object,
                property,
                relation,
            } => {
                let scope = self.scope(scope)?;
                let id = self.world.object(object)?;
                if let Some(property) = property {
                    return Ok(Some(self.manager.property(scope, id, property)?.to_string()));
                }
                if let Some(relation) = relation {
                    return Ok(Some(self.read_relation(scope, id, relation)?));
                }
                self.manager.get_or_load(scope, id)?;
                Ok(Some(format!("{:?}", self.manager.object_state(scope, id)?)))
            }
            Step::Set {
                scope,
                object,
                property,
                value,
            } => {
                let scope = self.scope(scope)?;
                let id = self.world.object(object)?;
                self.manager.set_property(scope, id, property, value.clone())?;
                Ok(None)
            }
            Step::New {
                scope,
                class,
                alias,
            } => {
                let scope = self.scope(scope)?;
                let class = self.world.class(class)?;
                if self.world.is_defined(alias) {
                    return Err(CliError::Invalid(format!("object `{alias}` declared twice")).into());
                }
                self.manager
                    .new_object_with_id(scope, EntityId::named(class, alias))?;
                self.world.define(alias, class)?;
                Ok(None)
            }
            Step::Delete { scope, object } => {
                let scope = self.scope(scope)?;
                let id = self.world.object(object)?;
                self.manager.delete_object(scope, id)?;
                Ok(None)
            }
            Step::Link {
                scope,
                object,
                relation,
                target,
            } => {
                let scope = self.scope(scope)?;
                let id = self.world.object(object)?;
                let target = target
                    .as_deref()
                    .map(|alias| self.world.object(alias))
                    .transpose()?;
                self.manager.set_related(scope, id, relation, target)?;
                Ok(None)
            }
            Step::Add {
                scope,
                object,
                relation,
                item,
            } => {
                let scope = self.scope(scope)?;
                let (id, item) = (self.world.object(object)?, self.world.object(item)?);
                self.manager.add_related(scope, id, relation, item)?;
                Ok(None)
            }
            Step::Remove {
                scope,
                object,
                relation,
                item,
            } => {
                let scope = self.scope(scope)?;
                let (id, item) = (self.world.object(object)?, self.world.object(item)?);
                let removed = self.manager.remove_related(scope, id, relation, item)?;
                Ok(Some(removed.to_string()))
            }
            Step::Commit { scope } => {
                let scope = self.scope(scope)?;
                self.manager.commit(scope)?;
                Ok(None)
            }
            Step::Rollback { scope } => {
                let scope = self.scope(scope)?;
                self.manager.rollback(scope)?;
                Ok(None)
            }
            Step::Discard { scope: alias } => {
                let scope = self.scope(alias)?;
                self.manager.discard(scope)?;
                self.scopes.remove(alias);
                Ok(None)
            }
            Step::ExpectError { .. } => Err(Failure::Scenario(CliError::Invalid(
                "expect_error cannot be nested".to_string(),
            ))),
        }
    }

    fn read_relation(
        &mut self,
        scope: ScopeId,
        id: EntityId,
        relation: &str,
    ) -> Result<String, Failure> {
        let definition = self.manager.schema().relation(relation)?.clone();
        let related = match definition.cardinality() {
            Cardinality::One => self
                .manager
                .related_object(scope, id, relation)?
                .into_iter()
                .collect(),
            Cardinality::Many => self.manager.related_ids(scope, id, relation)?,
        };
        let aliases: Vec<_> = related.into_iter().map(|id| self.world.alias_of(id)).collect();
        Ok(format!("[{}]", aliases.join(", ")))
    }

    fn check_scope_alias(&self, alias: &str) -> CliResult<()> {
        if self.scopes.contains_key(alias) {
            return Err(CliError::Invalid(format!("scope `{alias}` is already open")));
        }
        Ok(())
    }

    fn name_scope(&mut self, alias: &str, id: ScopeId) {
        self.scopes.insert(alias.to_string(), id);
        self.scope_names.insert(id, alias.to_string());
    }

    fn scope(&self, alias: &str) -> CliResult<ScopeId> {
        self.scopes
            .get(alias)
            .copied()
            .ok_or_else(|| CliError::unknown("scope", alias))
    }

    fn scope_name(&self, id: ScopeId) -> String {
        self.scope_names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }

    fn describe_event(&self, record: &EventRecord) -> EventLine {
        let detail = match (&record.property, &record.value) {
            (Some(property), Some(value)) => Some(format!("{property} = {value}")),
            _ => None,
        };
        let detail = detail
            .or_else(|| {
                let end_point = record.end_point.as_ref()?;
                let modification = record.modification?;
                Some(self.describe_modification(end_point, modification))
            })
            .or_else(|| record.child.map(|child| format!("child {}", self.scope_name(child))));

        EventLine {
            scope: self.scope_name(record.scope),
            kind: record.kind,
            object: record.object.map(|id| self.world.alias_of(id)),
            detail,
        }
    }

    fn describe_modification(
        &self,
        end_point: &RelationEndPointId,
        modification: RelationModification,
    ) -> String {
        let alias = |id: Option<EntityId>| {
            id.map_or_else(|| "none".to_string(), |id| self.world.alias_of(id))
        };
        let change = match modification {
            RelationModification::Set { old, new } => format!("{} -> {}", alias(old), alias(new)),
            RelationModification::Collection(change) => {
                let at = change.index.map(|i| format!(" at {i}")).unwrap_or_default();
                match change.operation {
                    CollectionOperation::Insert => format!("insert {}{at}", alias(change.item)),
                    CollectionOperation::Remove => format!("remove {}{at}", alias(change.item)),
                    CollectionOperation::Replace => format!(
                        "replace {} with {}{at}",
                        alias(change.replaced),
                        alias(change.item)
                    ),
                    CollectionOperation::Sort => "sort".to_string(),
                }
            }
        };
        format!("{}: {change}", end_point.relation)
    }

    fn stored_objects(&self, store: &InMemoryStore) -> Vec<StoredObject> {
        self.world
            .aliases()
            .into_iter()
            .filter_map(|(alias, id)| {
                let object = store.get(id)?;
                let relations = self
                    .world
                    .schema
                    .relations_of(id.class())
                    .filter_map(|relation| {
                        let data = store.relation(&RelationEndPointId::new(id, relation.name()))?;
                        let related = match data {
                            RelationData::One(related) => related.into_iter().collect(),
                            RelationData::Many(items) => items,
                        };
                        let aliases = related.into_iter().map(|id| self.world.alias_of(id));
                        Some((relation.name().to_string(), aliases.collect()))
                    })
                    .collect();
                Some(StoredObject {
                    alias: alias.to_string(),
                    class: self
                        .world
                        .class_name(id.class())
                        .unwrap_or_default()
                        .to_string(),
                    version: object.version.as_u64(),
                    properties: object.properties,
                    relations,
                })
            })
            .collect()
    }
}

fn print_text_output(report: &RunReport) {
    if let Some(name) = &report.name {
        println!("Scenario: {name}");
        println!();
    }
    println!("Steps:");
    for step in &report.steps {
        match &step.result {
            Some(result) => println!("  [{}] {} -> {}", step.index, step.op, result),
            None => println!("  [{}] {}", step.index, step.op),
        }
    }
    println!();
    println!("Events:");
    for event in &report.events {
        let object = event.object.as_deref().unwrap_or("-");
        match &event.detail {
            Some(detail) => println!(
                "  {:<8} {:<26} {:<10} {}",
                event.scope,
                event.kind.as_str(),
                object,
                detail
            ),
            None => println!("  {:<8} {:<26} {}", event.scope, event.kind.as_str(), object),
        }
    }
    println!();
    println!("Store:");
    for object in &report.store {
        println!("  {} ({}, v{})", object.alias, object.class, object.version);
        for (name, value) in &object.properties {
            println!("    {name} = {value}");
        }
        for (name, related) in &object.relations {
            println!("    {name} -> [{}]", related.join(", "));
        }
    }
}
