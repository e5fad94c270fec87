use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::limits::MAX_SERVICES_PER_BOOKING;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("no services selected")]
    Empty,
    #[error("unknown service {0:?}")]
    UnknownService(String),
    #[error("too many services selected")]
    TooMany,
    #[error("total duration {0} is not positive")]
    NonPositive(i64),
    #[error("reading catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("catalog has duplicate service id {0:?}")]
    DuplicateId(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub title: String,
    /// Minutes.
    pub duration: i64,
    pub price: i64,
}

/// Read-only service → duration/price mapping, handed to each request.
#[derive(Debug, Clone)]
pub struct Catalog {
    services: Vec<Service>,
}

impl Catalog {
    pub fn new(services: Vec<Service>) -> Result<Self, CatalogError> {
        let mut seen = BTreeSet::new();
        for s in &services {
            if !seen.insert(s.id.as_str()) {
                return Err(CatalogError::DuplicateId(s.id.clone()));
            }
        }
        Ok(Self { services })
    }

    pub fn builtin() -> Self {
        let service = |id: &str, title: &str, duration, price| Service {
            id: id.into(),
            title: title.into(),
            duration,
            price,
        };
        Self {
            services: vec![
                service("haircut", "Haircut", 30, 30),
                service("beard-trim", "Beard Trim", 25, 20),
                service("hair-wash", "Hair Wash", 15, 10),
                service("hairdressing", "Hairdressing", 15, 20),
                service("curly", "Curly", 10, 20),
                service("kids-haircut", "Kids Haircut", 30, 30),
            ],
        }
    }

    /// Load a JSON array of services.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        let services: Vec<Service> = serde_json::from_str(&raw)?;
        Self::new(services)
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn get(&self, id: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.id == id)
    }

    /// Sum of the durations of the selected services. Each distinct id counts
    /// once.
    pub fn total_duration<S: AsRef<str>>(&self, ids: &[S]) -> Result<i64, CatalogError> {
        if ids.is_empty() {
            return Err(CatalogError::Empty);
        }
        if ids.len() > MAX_SERVICES_PER_BOOKING {
            return Err(CatalogError::TooMany);
        }
        let distinct: BTreeSet<&str> = ids.iter().map(|s| s.as_ref()).collect();
        let mut total = 0i64;
        for id in distinct {
            let service = self
                .get(id)
                .ok_or_else(|| CatalogError::UnknownService(id.to_string()))?;
            total = total.saturating_add(service.duration);
        }
        if total <= 0 {
            return Err(CatalogError::NonPositive(total));
        }
        Ok(total)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}
