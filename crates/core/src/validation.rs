//! Attribute validation rules and the per-model registry that holds them.
//!
//! Rules are registered against attribute names, either one name at a time or as a
//! set of names sharing one rule ([`Attrs`]). Both shapes go through the same
//! registry write.
//!
//! ## Conflict policy
//!
//! A rule's identity is its constraint name (`"required"`, `"min"`, a custom
//! predicate's name, ...). Registering a rule whose identity already exists for an
//! attribute replaces the earlier rule **in its original position**
//! (last-write-wins). Rules with different identities accumulate.
//!
//! ## Evaluation policy
//!
//! Evaluation collects **all** failures. Attributes are visited in first
//! registration order and each attribute's rules in registration order, so the
//! failure list is deterministic.
//!
//! Absent and `null` attributes are only checked by [`Constraint::Required`]; every
//! other constraint treats them as "nothing to check".

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{ValidationErrors, ValidationFailure};

/// JSON value kinds a [`Constraint::Type`] can demand.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::Bool => value.is_boolean(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "boolean",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// What a rule checks.
#[derive(Clone)]
pub enum Constraint {
    /// Present, non-null, and not an empty string or array.
    Required,
    Type(ValueKind),
    /// Numeric lower bound (inclusive).
    Min(f64),
    /// Numeric upper bound (inclusive).
    Max(f64),
    /// Character count for strings, element count for arrays.
    MinLength(usize),
    MaxLength(usize),
    OneOf(Vec<Value>),
    /// Named predicate; the name is the rule identity.
    Custom { name: String, predicate: Predicate },
}

impl Constraint {
    pub fn custom<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self::Custom {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Rule identity used for conflict resolution and failure reports.
    pub fn name(&self) -> &str {
        match self {
            Self::Required => "required",
            Self::Type(_) => "type",
            Self::Min(_) => "min",
            Self::Max(_) => "max",
            Self::MinLength(_) => "min_length",
            Self::MaxLength(_) => "max_length",
            Self::OneOf(_) => "one_of",
            Self::Custom { name, .. } => name,
        }
    }

    /// Checks `value`; `Err` carries the default failure message.
    fn check(&self, value: Option<&Value>) -> Result<(), String> {
        let value = match (self, value) {
            (Self::Required, None | Some(Value::Null)) => return Err("can't be blank".into()),
            (Self::Required, Some(Value::String(s))) if s.is_empty() => {
                return Err("can't be blank".into());
            }
            (Self::Required, Some(Value::Array(a))) if a.is_empty() => {
                return Err("can't be blank".into());
            }
            (_, None | Some(Value::Null)) => return Ok(()),
            (_, Some(v)) => v,
        };

        match self {
            Self::Required => Ok(()),
            Self::Type(kind) => {
                if kind.matches(value) {
                    Ok(())
                } else {
                    Err(format!("must be a {}", kind.as_str()))
                }
            }
            Self::Min(min) => match value.as_f64() {
                Some(n) if n >= *min => Ok(()),
                Some(_) => Err(format!("must be greater than or equal to {min}")),
                None => Err("is not a number".into()),
            },
            Self::Max(max) => match value.as_f64() {
                Some(n) if n <= *max => Ok(()),
                Some(_) => Err(format!("must be less than or equal to {max}")),
                None => Err("is not a number".into()),
            },
            Self::MinLength(min) => match length(value) {
                Some(len) if len >= *min => Ok(()),
                Some(_) => Err(format!("is too short (minimum is {min})")),
                None => Err("has no length".into()),
            },
            Self::MaxLength(max) => match length(value) {
                Some(len) if len <= *max => Ok(()),
                Some(_) => Err(format!("is too long (maximum is {max})")),
                None => Err("has no length".into()),
            },
            Self::OneOf(allowed) => {
                if allowed.contains(value) {
                    Ok(())
                } else {
                    Err("is not included in the list".into())
                }
            }
            Self::Custom { predicate, .. } => {
                if predicate(value) {
                    Ok(())
                } else {
                    Err("is invalid".into())
                }
            }
        }
    }
}

fn length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(a) => Some(a.len()),
        _ => None,
    }
}

impl core::fmt::Debug for Constraint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Required => f.write_str("Required"),
            Self::Type(kind) => f.debug_tuple("Type").field(kind).finish(),
            Self::Min(n) => f.debug_tuple("Min").field(n).finish(),
            Self::Max(n) => f.debug_tuple("Max").field(n).finish(),
            Self::MinLength(n) => f.debug_tuple("MinLength").field(n).finish(),
            Self::MaxLength(n) => f.debug_tuple("MaxLength").field(n).finish(),
            Self::OneOf(values) => f.debug_tuple("OneOf").field(values).finish(),
            Self::Custom { name, .. } => f.debug_struct("Custom").field("name", name).finish(),
        }
    }
}

impl PartialEq for Constraint {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Required, Self::Required) => true,
            (Self::Type(a), Self::Type(b)) => a == b,
            (Self::Min(a), Self::Min(b)) | (Self::Max(a), Self::Max(b)) => a == b,
            (Self::MinLength(a), Self::MinLength(b)) | (Self::MaxLength(a), Self::MaxLength(b)) => {
                a == b
            }
            (Self::OneOf(a), Self::OneOf(b)) => a == b,
            (
                Self::Custom { name: a, predicate: pa },
                Self::Custom { name: b, predicate: pb },
            ) => a == b && Arc::ptr_eq(pa, pb),
            _ => false,
        }
    }
}

/// Whether a failing rule blocks persistence.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum Severity {
    #[default]
    Error,
    /// Reported and logged, never blocks.
    Warning,
}

/// Constraint + optional message + severity.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    constraint: Constraint,
    message: Option<String>,
    severity: Severity,
}

impl Rule {
    pub fn new(constraint: Constraint) -> Self {
        Self {
            constraint,
            message: None,
            severity: Severity::Error,
        }
    }

    pub fn required() -> Self {
        Self::new(Constraint::Required)
    }

    pub fn kind(kind: ValueKind) -> Self {
        Self::new(Constraint::Type(kind))
    }

    pub fn min(min: f64) -> Self {
        Self::new(Constraint::Min(min))
    }

    pub fn max(max: f64) -> Self {
        Self::new(Constraint::Max(max))
    }

    pub fn min_length(min: usize) -> Self {
        Self::new(Constraint::MinLength(min))
    }

    pub fn max_length(max: usize) -> Self {
        Self::new(Constraint::MaxLength(max))
    }

    pub fn one_of(values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Self::new(Constraint::OneOf(values.into_iter().map(Into::into).collect()))
    }

    pub fn custom<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self::new(Constraint::custom(name, predicate))
    }

    /// Overrides the default failure message.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn warning(mut self) -> Self {
        self.severity = Severity::Warning;
        self
    }

    pub fn constraint(&self) -> &Constraint {
        &self.constraint
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn name(&self) -> &str {
        self.constraint.name()
    }

    fn evaluate(&self, attribute: &str, value: Option<&Value>) -> Option<ValidationFailure> {
        self.constraint.check(value).err().map(|default| ValidationFailure {
            attribute: attribute.to_string(),
            rule: self.name().to_string(),
            message: self.message.clone().unwrap_or(default),
        })
    }
}

/// Attribute target of a registration: one name, or a set of names sharing a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attrs {
    One(String),
    Many(Vec<String>),
}

impl Attrs {
    pub fn names(&self) -> &[String] {
        match self {
            Self::One(name) => core::slice::from_ref(name),
            Self::Many(names) => names,
        }
    }
}

impl From<&str> for Attrs {
    fn from(value: &str) -> Self {
        Self::One(value.to_string())
    }
}

impl From<String> for Attrs {
    fn from(value: String) -> Self {
        Self::One(value)
    }
}

impl From<Vec<String>> for Attrs {
    fn from(value: Vec<String>) -> Self {
        Self::Many(value)
    }
}

impl From<Vec<&str>> for Attrs {
    fn from(value: Vec<&str>) -> Self {
        Self::Many(value.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Attrs {
    fn from(value: &[&str]) -> Self {
        Self::Many(value.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Attrs {
    fn from(value: [&str; N]) -> Self {
        Self::Many(value.iter().map(|s| s.to_string()).collect())
    }
}

/// Outcome of one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<ValidationFailure>,
    pub warnings: Vec<ValidationFailure>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Drops warnings; `Err` when any error-severity rule failed.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors::new(self.errors))
        }
    }
}

/// Per-model store of attribute rules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationRegistry {
    entries: Vec<(String, Vec<Rule>)>,
}

impl ValidationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `rule` to every attribute named by `attrs`.
    pub fn register(&mut self, attrs: impl Into<Attrs>, rule: Rule) -> &mut Self {
        let attrs = attrs.into();
        for name in attrs.names() {
            self.insert(name, rule.clone());
        }
        self
    }

    fn insert(&mut self, attribute: &str, rule: Rule) {
        let rules = match self.entries.iter().position(|(name, _)| name == attribute) {
            Some(idx) => &mut self.entries[idx].1,
            None => {
                self.entries.push((attribute.to_string(), Vec::new()));
                let last = self.entries.len() - 1;
                &mut self.entries[last].1
            }
        };

        match rules.iter().position(|existing| existing.name() == rule.name()) {
            Some(idx) => rules[idx] = rule,
            None => rules.push(rule),
        }
    }

    pub fn rules_for(&self, attribute: &str) -> &[Rule] {
        self.entries
            .iter()
            .find(|(name, _)| name == attribute)
            .map(|(_, rules)| rules.as_slice())
            .unwrap_or(&[])
    }

    /// Attribute names in first registration order.
    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Total number of rules across all attributes.
    pub fn len(&self) -> usize {
        self.entries.iter().map(|(_, rules)| rules.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Runs every rule against an entity's attribute map.
    pub fn evaluate(&self, attributes: &Map<String, Value>) -> ValidationReport {
        let mut report = ValidationReport::default();

        for (attribute, rules) in &self.entries {
            let value = attributes.get(attribute);
            for rule in rules {
                if let Some(failure) = rule.evaluate(attribute, value) {
                    match rule.severity() {
                        Severity::Error => report.errors.push(failure),
                        Severity::Warning => report.warnings.push(failure),
                    }
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn attrs(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn min_rejects_negative_age() {
        let mut registry = ValidationRegistry::new();
        registry.register("age", Rule::min(0.0));

        let report = registry.evaluate(&attrs(json!({"name": "Ann", "age": -1})));
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].attribute, "age");
        assert_eq!(report.errors[0].rule, "min");
    }

    #[test]
    fn required_treats_missing_null_and_empty_as_blank() {
        let mut registry = ValidationRegistry::new();
        registry.register("name", Rule::required());

        for candidate in [json!({}), json!({"name": null}), json!({"name": ""})] {
            let report = registry.evaluate(&attrs(candidate));
            assert_eq!(report.errors.len(), 1);
            assert_eq!(report.errors[0].message, "can't be blank");
        }
        assert!(registry.evaluate(&attrs(json!({"name": "Ann"}))).is_valid());
    }

    #[test]
    fn non_required_constraints_skip_absent_values() {
        let mut registry = ValidationRegistry::new();
        registry
            .register("age", Rule::min(0.0))
            .register("age", Rule::kind(ValueKind::Integer))
            .register("email", Rule::max_length(10));

        assert!(registry.evaluate(&attrs(json!({"age": null}))).is_valid());
    }

    #[test]
    fn collects_all_failures_in_registration_order() {
        let mut registry = ValidationRegistry::new();
        registry
            .register("name", Rule::required())
            .register("age", Rule::kind(ValueKind::Integer))
            .register("name", Rule::min_length(2));

        let report = registry.evaluate(&attrs(json!({"name": "A", "age": "x"})));
        let got: Vec<_> = report
            .errors
            .iter()
            .map(|f| (f.attribute.as_str(), f.rule.as_str()))
            .collect();
        assert_eq!(got, vec![("name", "min_length"), ("age", "type")]);
    }

    #[test]
    fn same_rule_identity_replaces_in_place() {
        let mut registry = ValidationRegistry::new();
        registry
            .register("age", Rule::min(0.0))
            .register("age", Rule::max(150.0))
            .register("age", Rule::min(18.0));

        let rules = registry.rules_for("age");
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0], Rule::min(18.0));
        assert_eq!(rules[1], Rule::max(150.0));
    }

    #[test]
    fn fan_out_attaches_rule_to_each_attribute() {
        let mut registry = ValidationRegistry::new();
        registry.register(["first_name", "last_name"], Rule::required());

        assert_eq!(registry.rules_for("first_name"), &[Rule::required()]);
        assert_eq!(registry.rules_for("last_name"), &[Rule::required()]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn custom_message_and_warning_severity() {
        let mut registry = ValidationRegistry::new();
        registry.register(
            "email",
            Rule::custom("email_format", |v| v.as_str().is_some_and(|s| s.contains('@')))
                .message("must look like an email")
                .warning(),
        );

        let report = registry.evaluate(&attrs(json!({"email": "nope"})));
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].rule, "email_format");
        assert_eq!(report.warnings[0].message, "must look like an email");
    }

    #[test]
    fn one_of_and_non_numeric_bounds() {
        let mut registry = ValidationRegistry::new();
        registry
            .register("role", Rule::one_of(["admin", "member"]))
            .register("age", Rule::max(10.0));

        let report = registry.evaluate(&attrs(json!({"role": "guest", "age": "old"})));
        let messages: Vec<_> = report.errors.iter().map(|f| f.message.as_str()).collect();
        assert_eq!(messages, vec!["is not included in the list", "is not a number"]);
    }

    #[test]
    fn clear_empties_registry() {
        let mut registry = ValidationRegistry::new();
        registry.register("a", Rule::required());
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.rules_for("a").is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            .. ProptestConfig::default()
        })]

        #[test]
        fn single_and_singleton_set_registration_agree(
            name in "[a-z]{1,8}",
            min in -1000.0f64..1000.0,
            required in any::<bool>(),
        ) {
            let rule = if required { Rule::required() } else { Rule::min(min) };

            let mut single = ValidationRegistry::new();
            single.register(name.as_str(), rule.clone());

            let mut set = ValidationRegistry::new();
            set.register(vec![name.clone()], rule);

            prop_assert_eq!(single.rules_for(&name), set.rules_for(&name));
            prop_assert_eq!(single, set);
        }
    }
}
