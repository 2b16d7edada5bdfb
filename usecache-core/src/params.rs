//! Route parameters as seen by cached computations.
//!
//! During a static pass some parameters of a dynamic route are not known yet
//! (fallback parameters). They still flow into computations as [`RouteParam`]
//! values; touching the value of a fallback is what turns a computation into
//! a dynamic hole.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;

use crate::context;
use crate::dynamic;
use crate::error::CacheError;

/// Value of a single route parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamValue {
    Known(String),
    /// Not known until a real request arrives.
    Fallback,
}

/// A named route parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteParam {
    name: String,
    value: ParamValue,
}

impl RouteParam {
    pub fn known(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: ParamValue::Known(value.into()),
        }
    }

    pub fn fallback(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: ParamValue::Fallback,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw(&self) -> &ParamValue {
        &self.value
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.value, ParamValue::Fallback)
    }

    /// Reads the parameter.
    ///
    /// A fallback parameter read under a dynamic-access tracker reports the
    /// access and never resolves; the generation racing it is abandoned and
    /// becomes a dynamic hole. Without a tracker the read fails with
    /// [`CacheError::DynamicUsage`].
    pub async fn value(&self) -> Result<String, CacheError> {
        match &self.value {
            ParamValue::Known(value) => Ok(value.clone()),
            ParamValue::Fallback => {
                let expression = format!("params.{}", self.name);
                if dynamic::report_access(&expression) {
                    return std::future::pending().await;
                }
                Err(CacheError::DynamicUsage {
                    route: context::current_route(),
                    expression,
                })
            }
        }
    }
}

/// Per-unit table of route parameters.
///
/// Parameter objects are created once per name and handed out again on every
/// lookup, so repeated reads within one request or pass observe the same value.
#[derive(Debug, Default)]
pub struct RouteParams {
    known: HashMap<String, String>,
    fallback: HashSet<String>,
    memo: DashMap<String, RouteParam>,
}

impl RouteParams {
    pub fn new<K, F>(known: K, fallback: F) -> Self
    where
        K: IntoIterator<Item = (String, String)>,
        F: IntoIterator<Item = String>,
    {
        Self {
            known: known.into_iter().collect(),
            fallback: fallback.into_iter().collect(),
            memo: DashMap::new(),
        }
    }

    /// Only known values, as seen by a live request.
    pub fn known<K>(known: K) -> Self
    where
        K: IntoIterator<Item = (String, String)>,
    {
        Self::new(known, std::iter::empty())
    }

    /// Looks a parameter up; fallback names win over known values.
    pub fn get(&self, name: &str) -> Option<RouteParam> {
        if let Some(param) = self.memo.get(name) {
            return Some(param.clone());
        }
        let param = if self.fallback.contains(name) {
            RouteParam::fallback(name)
        } else {
            RouteParam::known(name, self.known.get(name)?.clone())
        };
        Some(self.memo.entry(name.to_string()).or_insert(param).clone())
    }

    pub fn is_fallback(&self, name: &str) -> bool {
        self.fallback.contains(name)
    }

    pub fn has_fallbacks(&self) -> bool {
        !self.fallback.is_empty()
    }

    pub fn fallback_names(&self) -> impl Iterator<Item = &str> {
        self.fallback.iter().map(String::as_str)
    }
}
