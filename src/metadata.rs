//! Metadata Store - settings and person-derived aggregates
//!
//! Settings are `{key, value, value_type}` entries. Values are typed
//! ([`MetaValue`]) and stored as JSON next to their type tag.
//!
//! The aggregates are kept in their own containers:
//! - `gender_stats`: per given name, how many people of each gender carry it
//! - `surname`: usage count of every surname
//! - `name_group`: user-defined surname grouping

use crate::Result;
use crate::engine::StorageEngine;
use crate::model::{Gender, Person, PrimaryObject};
use crate::object::ObjectType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A typed metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum MetaValue {
    Int(i64),
    Str(String),
    Bool(bool),
    List(Vec<MetaValue>),
    Set(BTreeSet<String>),
    Tuple(Vec<MetaValue>),
    Json(serde_json::Value),
}

impl MetaValue {
    /// Tag stored in the `value_type` column
    pub fn type_tag(&self) -> &'static str {
        match self {
            MetaValue::Int(_) => "int",
            MetaValue::Str(_) => "str",
            MetaValue::Bool(_) => "bool",
            MetaValue::List(_) => "list",
            MetaValue::Set(_) => "set",
            MetaValue::Tuple(_) => "tuple",
            MetaValue::Json(_) => "json",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetaValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetaValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Int(v)
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::Str(v.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        MetaValue::Str(v)
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        MetaValue::Bool(v)
    }
}

/// How often a given name was recorded for each gender
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenderStats {
    pub female: u32,
    pub male: u32,
    pub unknown: u32,
}

impl GenderStats {
    pub fn count(&self, gender: Gender) -> u32 {
        match gender {
            Gender::Female => self.female,
            Gender::Male => self.male,
            Gender::Unknown => self.unknown,
        }
    }

    fn slot(&mut self, gender: Gender) -> &mut u32 {
        match gender {
            Gender::Female => &mut self.female,
            Gender::Male => &mut self.male,
            Gender::Unknown => &mut self.unknown,
        }
    }

    pub fn add(&mut self, gender: Gender) {
        *self.slot(gender) += 1;
    }

    pub fn remove(&mut self, gender: Gender) {
        let slot = self.slot(gender);
        *slot = slot.saturating_sub(1);
    }

    pub fn is_empty(&self) -> bool {
        self.female == 0 && self.male == 0 && self.unknown == 0
    }

    /// Most likely gender for a new person with this given name
    pub fn guess(&self) -> Gender {
        if self.female > self.male && self.female > self.unknown {
            Gender::Female
        } else if self.male > self.female && self.male > self.unknown {
            Gender::Male
        } else {
            Gender::Unknown
        }
    }
}

/// Surnames a person contributes to the surname container, without repeats
fn distinct_surnames(person: &Person) -> BTreeSet<&str> {
    person.surnames().collect()
}

fn adjust(engine: &mut dyn StorageEngine, person: &Person, add: bool) -> Result<()> {
    if let Some(given) = person.primary_name.given_key() {
        let mut stats = engine.gender_stats(given)?.unwrap_or_default();
        if add {
            stats.add(person.gender);
        } else {
            stats.remove(person.gender);
        }
        engine.set_gender_stats(given, stats)?;
    }

    for surname in distinct_surnames(person) {
        let count = engine.surname_count(surname)?;
        let count = if add { count + 1 } else { count.saturating_sub(1) };
        engine.set_surname_count(surname, count)?;
    }
    Ok(())
}

/// Move a person's aggregate contribution from `old` to `new`
///
/// Either side may be absent (add or remove).
pub fn apply_person_delta(
    engine: &mut dyn StorageEngine,
    old: Option<&Person>,
    new: Option<&Person>,
) -> Result<()> {
    if let Some(person) = old {
        adjust(engine, person, false)?;
    }
    if let Some(person) = new {
        adjust(engine, person, true)?;
    }
    Ok(())
}

/// Counts produced by [`rebuild_aggregates`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateCounts {
    pub people: usize,
    pub given_names: usize,
    pub surnames: usize,
    pub skipped: usize,
}

/// Recompute gender statistics and surname counts from the person container
pub fn rebuild_aggregates(engine: &mut dyn StorageEngine) -> Result<AggregateCounts> {
    let mut given: BTreeMap<String, GenderStats> = BTreeMap::new();
    let mut surnames: BTreeMap<String, u32> = BTreeMap::new();
    let mut counts = AggregateCounts::default();

    engine.scan(ObjectType::Person, &mut |record| {
        let person = match record.decode(ObjectType::Person).map(Person::from_payload) {
            Ok(Some(person)) => person,
            Ok(None) => return Ok(()),
            Err(e) if e.is_encoding() => {
                tracing::warn!("Skipping person {} while rebuilding aggregates: {}", record.handle, e);
                counts.skipped += 1;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        counts.people += 1;
        if let Some(name) = person.primary_name.given_key() {
            given.entry(name.to_string()).or_default().add(person.gender);
        }
        for surname in distinct_surnames(&person) {
            *surnames.entry(surname.to_string()).or_default() += 1;
        }
        Ok(())
    })?;

    engine.clear_aggregates()?;
    for (name, stats) in &given {
        engine.set_gender_stats(name, *stats)?;
    }
    for (surname, count) in &surnames {
        engine.set_surname_count(surname, *count)?;
    }

    counts.given_names = given.len();
    counts.surnames = surnames.len();
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_value_json_shape() {
        let value = MetaValue::Tuple(vec![MetaValue::Int(1), MetaValue::from("a")]);
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["type"], "tuple");
        assert_eq!(json["value"][0]["value"], 1);

        let back: MetaValue = serde_json::from_value(json).unwrap();
        assert_eq!(back, value);
        assert_eq!(value.type_tag(), "tuple");
    }

    #[test]
    fn test_gender_stats_guess() {
        let mut stats = GenderStats::default();
        assert_eq!(stats.guess(), Gender::Unknown);
        stats.add(Gender::Female);
        stats.add(Gender::Female);
        stats.add(Gender::Male);
        assert_eq!(stats.guess(), Gender::Female);
        stats.remove(Gender::Female);
        assert_eq!(stats.guess(), Gender::Unknown);
        stats.remove(Gender::Unknown);
        assert_eq!(stats.unknown, 0);
    }
}
