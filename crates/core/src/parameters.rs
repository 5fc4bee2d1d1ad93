//! Job parameters and their validation.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Typed value of a single job parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParameterValue {
    String(String),
    Long(i64),
    Double(f64),
    Date(DateTime<Utc>),
}

impl core::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ParameterValue::String(v) => f.write_str(v),
            ParameterValue::Long(v) => write!(f, "{v}"),
            ParameterValue::Double(v) => write!(f, "{v}"),
            ParameterValue::Date(v) => f.write_str(&v.to_rfc3339()),
        }
    }
}

/// A parameter value plus whether it takes part in job instance identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    pub value: ParameterValue,
    pub identifying: bool,
}

impl JobParameter {
    pub fn new(value: ParameterValue, identifying: bool) -> Self {
        Self { value, identifying }
    }

    fn type_tag(&self) -> &'static str {
        match self.value {
            ParameterValue::String(_) => "string",
            ParameterValue::Long(_) => "long",
            ParameterValue::Double(_) => "double",
            ParameterValue::Date(_) => "date",
        }
    }
}

/// Ordered set of named parameters for one launch.
///
/// Two parameter sets identify the same job instance iff their identifying
/// parameters are equal; see [`JobParameters::to_identity_key`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobParameters {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> JobParametersBuilder {
        JobParametersBuilder::default()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn get(&self, key: &str) -> Option<&JobParameter> {
        self.parameters.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.parameters.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.parameters.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JobParameter)> {
        self.parameters.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.get(key).map(|p| &p.value) {
            Some(ParameterValue::String(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.get(key).map(|p| &p.value) {
            Some(ParameterValue::Long(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        match self.get(key).map(|p| &p.value) {
            Some(ParameterValue::Double(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_date(&self, key: &str) -> Option<DateTime<Utc>> {
        match self.get(key).map(|p| &p.value) {
            Some(ParameterValue::Date(v)) => Some(*v),
            _ => None,
        }
    }

    /// Only the identifying parameters.
    pub fn identifying(&self) -> JobParameters {
        JobParameters {
            parameters: self
                .parameters
                .iter()
                .filter(|(_, p)| p.identifying)
                .map(|(k, p)| (k.clone(), p.clone()))
                .collect(),
        }
    }

    /// Canonical string form of the identifying parameters
    /// (`key=type:value;` in key order). Empty for an empty set.
    ///
    /// Backslash, `=`, `:` and `;` inside names and values are backslash-escaped,
    /// so distinct parameter sets never share a key.
    pub fn to_identity_key(&self) -> String {
        let mut key = String::new();
        for (name, parameter) in self.parameters.iter().filter(|(_, p)| p.identifying) {
            push_escaped(&mut key, name);
            key.push('=');
            key.push_str(parameter.type_tag());
            key.push(':');
            push_escaped(&mut key, &parameter.value.to_string());
            key.push(';');
        }
        key
    }
}

fn push_escaped(out: &mut String, raw: &str) {
    for c in raw.chars() {
        if matches!(c, '\\' | '=' | ':' | ';') {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Fluent builder for [`JobParameters`].
#[derive(Debug, Clone, Default)]
pub struct JobParametersBuilder {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParametersBuilder {
    pub fn add(mut self, key: impl Into<String>, parameter: JobParameter) -> Self {
        self.parameters.insert(key.into(), parameter);
        self
    }

    pub fn add_string(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add(key, JobParameter::new(ParameterValue::String(value.into()), true))
    }

    pub fn add_long(self, key: impl Into<String>, value: i64) -> Self {
        self.add(key, JobParameter::new(ParameterValue::Long(value), true))
    }

    pub fn add_double(self, key: impl Into<String>, value: f64) -> Self {
        self.add(key, JobParameter::new(ParameterValue::Double(value), true))
    }

    pub fn add_date(self, key: impl Into<String>, value: DateTime<Utc>) -> Self {
        self.add(key, JobParameter::new(ParameterValue::Date(value), true))
    }

    /// Adds a parameter that is passed to the job but does not affect which
    /// instance is launched.
    pub fn add_non_identifying(self, key: impl Into<String>, value: ParameterValue) -> Self {
        self.add(key, JobParameter::new(value, false))
    }

    pub fn build(self) -> JobParameters {
        JobParameters {
            parameters: self.parameters,
        }
    }
}

/// Validates parameters before any execution record is created.
pub trait JobParametersValidator: Send + Sync {
    fn validate(&self, parameters: &JobParameters) -> DomainResult<()>;
}

/// Checks for required keys and, when optional keys are declared, rejects
/// keys that are neither required nor optional.
#[derive(Debug, Clone, Default)]
pub struct DefaultJobParametersValidator {
    required_keys: BTreeSet<String>,
    optional_keys: BTreeSet<String>,
}

impl DefaultJobParametersValidator {
    pub fn new<R, O>(required_keys: R, optional_keys: O) -> DomainResult<Self>
    where
        R: IntoIterator,
        R::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        let required_keys: BTreeSet<String> = required_keys.into_iter().map(Into::into).collect();
        let optional_keys: BTreeSet<String> = optional_keys.into_iter().map(Into::into).collect();

        if let Some(both) = required_keys.intersection(&optional_keys).next() {
            return Err(DomainError::illegal_state(format!(
                "key '{both}' cannot be both required and optional"
            )));
        }

        Ok(Self {
            required_keys,
            optional_keys,
        })
    }
}

impl JobParametersValidator for DefaultJobParametersValidator {
    fn validate(&self, parameters: &JobParameters) -> DomainResult<()> {
        let missing: Vec<&str> = self
            .required_keys
            .iter()
            .filter(|k| !parameters.contains_key(k))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(DomainError::invalid_parameters(format!(
                "missing required keys: {missing:?}"
            )));
        }

        if !self.optional_keys.is_empty() {
            let unexpected: Vec<&str> = parameters
                .keys()
                .filter(|k| !self.required_keys.contains(*k) && !self.optional_keys.contains(*k))
                .collect();
            if !unexpected.is_empty() {
                return Err(DomainError::invalid_parameters(format!(
                    "keys neither required nor optional: {unexpected:?}"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_key_ignores_non_identifying_parameters() {
        let a = JobParameters::builder()
            .add_string("file", "input.csv")
            .add_non_identifying("run.note", ParameterValue::String("first".into()))
            .build();
        let b = JobParameters::builder()
            .add_string("file", "input.csv")
            .add_non_identifying("run.note", ParameterValue::String("second".into()))
            .build();

        assert_ne!(a, b);
        assert_eq!(a.to_identity_key(), b.to_identity_key());
        assert_eq!(a.to_identity_key(), "file=string:input.csv;");
        assert_eq!(a.identifying().len(), 1);
    }

    #[test]
    fn identity_key_distinguishes_types() {
        let long = JobParameters::builder().add_long("n", 1).build();
        let string = JobParameters::builder().add_string("n", "1").build();
        assert_ne!(long.to_identity_key(), string.to_identity_key());
    }

    #[test]
    fn identity_key_escapes_separators() {
        let two = JobParameters::builder()
            .add_string("a", "x")
            .add_string("b", "y")
            .build();
        let smuggled = JobParameters::builder()
            .add_string("a", "x;b=string:y")
            .build();

        assert_ne!(two.to_identity_key(), smuggled.to_identity_key());
        assert_eq!(smuggled.to_identity_key(), r"a=string:x\;b\=string\:y;");

        let name_with_separator = JobParameters::builder().add_string("a=b", "c").build();
        let value_with_separator = JobParameters::builder().add_string("a", "b=c").build();
        assert_ne!(
            name_with_separator.to_identity_key(),
            value_with_separator.to_identity_key()
        );
    }

    #[test]
    fn typed_getters() {
        let params = JobParameters::builder()
            .add_string("s", "x")
            .add_long("l", 7)
            .add_double("d", 1.5)
            .build();

        assert_eq!(params.get_string("s"), Some("x"));
        assert_eq!(params.get_long("l"), Some(7));
        assert_eq!(params.get_double("d"), Some(1.5));
        assert_eq!(params.get_long("s"), None);
        assert!(params.get_date("missing").is_none());
    }

    #[test]
    fn validator_rejects_missing_required_key() {
        let validator =
            DefaultJobParametersValidator::new(["missing-and-required"], Vec::<String>::new())
                .unwrap();

        let err = validator.validate(&JobParameters::new()).unwrap_err();
        match err {
            DomainError::InvalidParameters(msg) => assert!(msg.contains("missing-and-required")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn validator_rejects_unexpected_key_when_optional_keys_declared() {
        let validator = DefaultJobParametersValidator::new(["name"], ["date"]).unwrap();

        let ok = JobParameters::builder().add_string("name", "a").add_string("date", "b").build();
        assert!(validator.validate(&ok).is_ok());

        let bad = JobParameters::builder().add_string("name", "a").add_long("other", 1).build();
        assert!(matches!(validator.validate(&bad), Err(DomainError::InvalidParameters(_))));
    }

    #[test]
    fn validator_accepts_anything_without_optional_keys() {
        let validator =
            DefaultJobParametersValidator::new(["name"], Vec::<String>::new()).unwrap();
        let params = JobParameters::builder().add_string("name", "a").add_long("x", 1).build();
        assert!(validator.validate(&params).is_ok());
    }

    #[test]
    fn overlapping_keys_are_rejected() {
        assert!(DefaultJobParametersValidator::new(["a"], ["a"]).is_err());
    }
}
