//! Entity construction for transactions.

use uuid::Uuid;

use crate::edn::{Keyword, Record, Value};
use crate::map::kebab_case;

/// Attribute naming the entity's type.
pub const ENTITY_TYPE_ATTR: &str = "schema/entity-type";
/// Attribute holding the entity's local reference.
pub const ENTITY_REF_ATTR: &str = "schema/entity";

/// System attributes that do not count as facts.
const SYSTEM_ATTRS: &[&str] = &[ENTITY_REF_ATTR, ENTITY_TYPE_ATTR, "db/id"];

/// A typed entity to transact.
///
/// Attribute names without a namespace are expanded to
/// `<type with dots>/<kebab-case name>`, so `entity("git/commit")` with
/// attribute `sha` writes `git.commit/sha`.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    entity_type: Keyword,
    entity_ref: String,
    attributes: Record,
}

impl Entity {
    /// Create an entity with a generated `$<name>-<uuid>` reference.
    pub fn new(entity_type: &str) -> Self {
        let entity_type = Keyword::new(entity_type);
        let entity_ref = format!("${}-{}", entity_type.name(), Uuid::new_v4());
        Self {
            entity_type,
            entity_ref,
            attributes: Record::new(),
        }
    }

    /// Create an entity with an explicit reference.
    pub fn with_ref(entity_type: &str, entity_ref: impl Into<String>) -> Self {
        Self {
            entity_type: Keyword::new(entity_type),
            entity_ref: entity_ref.into(),
            attributes: Record::new(),
        }
    }

    pub fn entity_type(&self) -> &Keyword {
        &self.entity_type
    }

    pub fn entity_ref(&self) -> &str {
        &self.entity_ref
    }

    /// Set an attribute.
    pub fn attr(mut self, name: &str, value: impl Into<Value>) -> Self {
        let key = self.attribute_key(name);
        self.attributes.insert(key, Some(value.into()));
        self
    }

    /// Set an attribute if the value is present; skip it otherwise.
    pub fn maybe_attr(self, name: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(value) => self.attr(name, value),
            None => self,
        }
    }

    /// Reference another entity by its local reference.
    pub fn reference(self, name: &str, other: &Entity) -> Self {
        let entity_ref = other.entity_ref.clone();
        self.attr(name, entity_ref)
    }

    /// Full record including the type and reference attributes.
    pub fn to_record(&self) -> Record {
        let mut record = Record::new()
            .field(ENTITY_TYPE_ATTR, self.entity_type.clone())
            .field(ENTITY_REF_ATTR, self.entity_ref.clone());
        for (key, value) in self.attributes.iter() {
            record.insert(key, value.cloned());
        }
        record
    }

    fn attribute_key(&self, name: &str) -> String {
        if name.contains('/') {
            name.to_string()
        } else {
            format!(
                "{}/{}",
                self.entity_type.as_str().replace('/', "."),
                kebab_case(name)
            )
        }
    }
}

impl From<Entity> for Record {
    fn from(entity: Entity) -> Self {
        entity.to_record()
    }
}

impl From<&Entity> for Record {
    fn from(entity: &Entity) -> Self {
        entity.to_record()
    }
}

/// Number of non-system attributes in a record.
pub fn fact_count(record: &Record) -> usize {
    record.keys().filter(|k| !SYSTEM_ATTRS.contains(k)).count()
}

/// `{:set [...]}`: replace all values of a cardinality-many attribute.
pub fn set_values<T: Into<Value>>(values: Vec<T>) -> Value {
    Record::new().field("set", values).into()
}

/// `{:add [...]}`: add values to a cardinality-many attribute.
pub fn add_values<T: Into<Value>>(values: Vec<T>) -> Value {
    Record::new().field("add", values).into()
}

/// References of all entities, optionally only those of `entity_type`.
pub fn entity_refs<'a>(entities: &'a [Entity], entity_type: Option<&str>) -> Vec<&'a str> {
    let wanted = entity_type.map(Keyword::new);
    entities
        .iter()
        .filter(|e| wanted.as_ref().is_none_or(|t| *t == e.entity_type))
        .map(|e| e.entity_ref.as_str())
        .collect()
}

/// First reference of [`entity_refs`].
pub fn entity_ref<'a>(entities: &'a [Entity], entity_type: Option<&str>) -> Option<&'a str> {
    entity_refs(entities, entity_type).into_iter().next()
}
