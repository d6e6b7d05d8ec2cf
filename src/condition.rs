//! The condition model: OR-of-AND groups over field comparisons.

use std::fmt;

use crate::error::{DbError, DbResult};
use crate::schema::ModelRegistry;
use crate::value::FieldValue;

/// Comparison operators a condition can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Operator {
    pub fn is_equality(&self) -> bool {
        matches!(self, Operator::Eq)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::Eq => "=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
        };
        write!(f, "{s}")
    }
}

/// One field comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: FieldValue,
}

impl Condition {
    pub fn new(field: &str, operator: Operator, value: impl Into<FieldValue>) -> Self {
        Condition { field: field.to_string(), operator, value: value.into() }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.operator, self.value)
    }
}

/// A finalized, registry-validated condition set: either `includes_all` or a
/// disjunction of conjunction groups.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionSet {
    pub includes_all: bool,
    pub groups: Vec<Vec<Condition>>,
}

impl ConditionSet {
    pub fn all() -> Self {
        ConditionSet { includes_all: true, groups: Vec::new() }
    }

    /// The single conjunction group, or `UnsupportedOrCondition` when more
    /// than one is present. Backends that cannot express disjunction call
    /// this at synthesis time.
    pub fn single_group(&self) -> DbResult<&[Condition]> {
        if self.groups.len() > 1 {
            return Err(DbError::UnsupportedOrCondition);
        }
        Ok(self.groups.first().map(|g| g.as_slice()).unwrap_or(&[]))
    }
}

impl fmt::Display for ConditionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.includes_all {
            return write!(f, "all");
        }
        let mut first_group = true;
        for group in &self.groups {
            if !first_group {
                write!(f, " || ")?;
            }
            first_group = false;
            let mut first = true;
            for condition in group {
                if !first {
                    write!(f, " && ")?;
                }
                first = false;
                write!(f, "{condition}")?;
            }
        }
        Ok(())
    }
}

/// Accumulates builder steps and finalizes into a [`ConditionSet`].
///
/// The grouping rules: the bare root selector may be used once, `and` appends
/// to the current group, `or` opens a new group unless the current one is
/// still empty, and `all` excludes every field condition.
#[derive(Debug, Default)]
pub struct ConditionLog {
    includes_all: bool,
    rooted: bool,
    groups: Vec<Vec<Condition>>,
}

impl ConditionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&mut self, condition: Condition) -> DbResult<()> {
        if self.includes_all {
            return Err(DbError::IncludesAllConflict);
        }
        if self.rooted {
            return Err(DbError::DuplicateRootSelector);
        }
        self.rooted = true;
        self.groups.push(vec![condition]);
        Ok(())
    }

    pub fn and(&mut self, condition: Condition) -> DbResult<()> {
        if self.includes_all {
            return Err(DbError::IncludesAllConflict);
        }
        match self.groups.last_mut() {
            Some(group) => group.push(condition),
            None => {
                self.rooted = true;
                self.groups.push(vec![condition]);
            }
        }
        Ok(())
    }

    pub fn or(&mut self, condition: Condition) -> DbResult<()> {
        if self.includes_all {
            return Err(DbError::IncludesAllConflict);
        }
        match self.groups.last_mut() {
            Some(group) if group.is_empty() => group.push(condition),
            _ => self.groups.push(vec![condition]),
        }
        Ok(())
    }

    pub fn all(&mut self) -> DbResult<()> {
        if self.rooted || self.groups.iter().any(|g| !g.is_empty()) {
            return Err(DbError::IncludesAllConflict);
        }
        self.includes_all = true;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        !self.includes_all && self.groups.iter().all(|g| g.is_empty())
    }

    /// Validates every referenced field against the registry and freezes the
    /// set. No I/O happens before this step succeeds.
    pub fn finish(self, registry: &ModelRegistry, model: &str) -> DbResult<ConditionSet> {
        if self.includes_all {
            return Ok(ConditionSet::all());
        }
        for group in &self.groups {
            for condition in group {
                registry.check_condition(model, &condition.field, &condition.value)?;
            }
        }
        Ok(ConditionSet { includes_all: false, groups: self.groups })
    }
}
