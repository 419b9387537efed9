//! Location collaborator.
//!
//! The platform location service lives outside this crate; callers ask for
//! a location and get one back, there is no listener to register.

use async_trait::async_trait;

use crate::types::{Location, LocationError};

#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Most recent known location.
    async fn current_location(&self) -> Result<Location, LocationError>;
}

/// A location fixed at construction, typically from configuration.
#[derive(Debug, Clone)]
pub struct StaticLocation {
    location: Option<Location>,
}

impl StaticLocation {
    pub fn new(location: Location) -> Self {
        Self {
            location: Some(location),
        }
    }

    /// A provider that never has a location.
    pub fn unavailable() -> Self {
        Self { location: None }
    }
}

#[async_trait]
impl LocationProvider for StaticLocation {
    async fn current_location(&self) -> Result<Location, LocationError> {
        self.location.clone().ok_or(LocationError::Unavailable)
    }
}
