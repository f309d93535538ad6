//! URI template filling (RFC 6570)
//!
//! Expansion is done by `iri-string`; this module only maps link
//! parameters onto its variable context. Undefined variables expand to
//! nothing.

use std::collections::BTreeMap;

use iri_string::spec::UriSpec;
use iri_string::template::simple_context::{SimpleContext, Value};
use iri_string::template::UriTemplateStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Malformed URI template '{template}': {message}")]
    Syntax { template: String, message: String },

    #[error("Cannot expand '{template}': {message}")]
    Expansion { template: String, message: String },
}

/// A single template variable value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Scalar(String),
    List(Vec<String>),
    Pairs(Vec<(String, String)>),
}

impl From<&ParamValue> for Value {
    fn from(value: &ParamValue) -> Self {
        match value {
            ParamValue::Scalar(s) => Value::String(s.clone()),
            ParamValue::List(items) => Value::List(items.clone()),
            ParamValue::Pairs(pairs) => Value::Assoc(pairs.clone()),
        }
    }
}

/// Named values used to fill a template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateParams {
    values: BTreeMap<String, ParamValue>,
}

impl TemplateParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.values
            .insert(name.into(), ParamValue::Scalar(value.to_string()));
        self
    }

    pub fn with_list<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        let list = values.into_iter().map(|v| v.to_string()).collect();
        self.values.insert(name.into(), ParamValue::List(list));
        self
    }

    pub fn with_pairs<I, K, V>(mut self, name: impl Into<String>, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: ToString,
        V: ToString,
    {
        let pairs = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.values.insert(name.into(), ParamValue::Pairs(pairs));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn context(&self) -> SimpleContext {
        let mut context = SimpleContext::new();
        for (name, value) in &self.values {
            context.insert(name.clone(), Value::from(value));
        }
        context
    }
}

/// Expand `template` with `params`.
pub fn expand(template: &str, params: &TemplateParams) -> Result<String, TemplateError> {
    let parsed = UriTemplateStr::new(template).map_err(|e| TemplateError::Syntax {
        template: template.to_string(),
        message: e.to_string(),
    })?;
    let context = params.context();
    let expanded = parsed
        .expand::<UriSpec, _>(&context)
        .map_err(|e| TemplateError::Expansion {
            template: template.to_string(),
            message: e.to_string(),
        })?;
    Ok(expanded.to_string())
}
