//! Static worker/cron registry.
//!
//! The set of routes is fixed at startup. Names must be unique across
//! workers and crons together; a collision is a startup error.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::worker::{BoxedCron, BoxedWorker, WorkerContext};

/// Names that collide with framework endpoints.
const RESERVED: &[&str] = &["health"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("route name '{0}' is registered more than once")]
    DuplicateName(String),

    #[error("route name '{0}' is not usable as a path segment")]
    InvalidName(String),

    #[error("no worker or cron registered under '{0}'")]
    Unknown(String),
}

pub enum Route<C> {
    Worker(BoxedWorker<C>),
    Cron(BoxedCron<C>),
}

impl<C> Clone for Route<C> {
    fn clone(&self) -> Self {
        match self {
            Route::Worker(w) => Route::Worker(w.clone()),
            Route::Cron(c) => Route::Cron(c.clone()),
        }
    }
}

pub struct Registry<C> {
    routes: BTreeMap<&'static str, Route<C>>,
}

impl<C: WorkerContext> Registry<C> {
    pub fn new(
        workers: Vec<BoxedWorker<C>>,
        crons: Vec<BoxedCron<C>>,
    ) -> Result<Self, RegistryError> {
        let mut routes = BTreeMap::new();

        let named = workers
            .into_iter()
            .map(|w| (w.subscription(), Route::Worker(w)))
            .chain(crons.into_iter().map(|c| (c.name(), Route::Cron(c))));

        for (name, route) in named {
            validate_name(name)?;
            if routes.insert(name, route).is_some() {
                return Err(RegistryError::DuplicateName(name.to_string()));
            }
        }

        Ok(Self { routes })
    }

    pub fn route(&self, name: &str) -> Option<&Route<C>> {
        self.routes.get(name)
    }

    pub fn routes(&self) -> impl Iterator<Item = (&'static str, &Route<C>)> {
        self.routes.iter().map(|(name, route)| (*name, route))
    }

    pub fn worker_names(&self) -> Vec<&'static str> {
        self.routes()
            .filter(|(_, r)| matches!(r, Route::Worker(_)))
            .map(|(n, _)| n)
            .collect()
    }

    pub fn cron_names(&self) -> Vec<&'static str> {
        self.routes()
            .filter(|(_, r)| matches!(r, Route::Cron(_)))
            .map(|(n, _)| n)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn validate_name(name: &str) -> Result<(), RegistryError> {
    let usable = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !RESERVED.contains(&name);
    if usable {
        Ok(())
    } else {
        Err(RegistryError::InvalidName(name.to_string()))
    }
}
