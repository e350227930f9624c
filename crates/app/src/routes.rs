use std::fmt;

use crate::errors::AppError;

/// `controller#action` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub controller: String,
    pub action: String,
}

impl RouteTarget {
    pub fn new(controller: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
            action: action.into(),
        }
    }

    pub fn parse(target: &str) -> Result<Self, AppError> {
        match target.split_once('#') {
            Some((controller, action))
                if !controller.trim().is_empty()
                    && !action.trim().is_empty()
                    && !action.contains('#') =>
            {
                Ok(Self::new(controller.trim(), action.trim()))
            }
            _ => Err(AppError::InvalidTarget(target.to_string())),
        }
    }
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.controller, self.action)
    }
}

/// Path → target table. One target per path; a later entry for the same
/// path replaces the earlier one in place.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    entries: Vec<(String, RouteTarget)>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, target: RouteTarget) {
        let path = path.into();
        match self.entries.iter_mut().find(|(p, _)| *p == path) {
            Some((_, existing)) => *existing = target,
            None => self.entries.push((path, target)),
        }
    }

    pub fn get(&self, path: &str) -> Option<&RouteTarget> {
        self.entries.iter().find(|(p, _)| p == path).map(|(_, t)| t)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RouteTarget)> {
        self.entries.iter().map(|(p, t)| (p.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
