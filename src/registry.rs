//! Registry of configured chat destinations.

use crate::config::Config;
use crate::core::Destination;
use std::collections::HashMap;
use thiserror::Error;

/// Logical name of the main group.
pub const MAIN_GROUP: &str = "main";
/// Logical name of the report group.
pub const REPORT_GROUP: &str = "report";
/// Logical name of the group receiving forwarded log events.
pub const ERROR_GROUP: &str = "error";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("destination not found: {0}")]
    NotFound(String),

    #[error("destination name registered twice: {0}")]
    DuplicateName(String),
}

/// An immutable set of destinations, addressable by name and by chat id.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct DestinationRegistry {
    destinations: Vec<Destination>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<String, usize>,
}

impl DestinationRegistry {
    /// Builds a registry from an ordered list of destinations.
    ///
    /// Names must be unique. When several destinations share a chat id, lookups
    /// by id return the first one.
    pub fn new(destinations: Vec<Destination>) -> Result<Self, LookupError> {
        let mut by_name = HashMap::new();
        let mut by_id = HashMap::new();
        for (index, destination) in destinations.iter().enumerate() {
            if let Some(name) = destination.name() {
                if by_name.insert(name.to_string(), index).is_some() {
                    return Err(LookupError::DuplicateName(name.to_string()));
                }
            }
            by_id.entry(destination.id().to_string()).or_insert(index);
        }
        Ok(Self {
            destinations,
            by_name,
            by_id,
        })
    }

    /// Builds the registry from the `[group]` and `[[groups]]` configuration.
    /// Groups without a chat id are skipped.
    pub fn from_config(config: &Config) -> Result<Self, LookupError> {
        let group = &config.group;
        let well_known = [
            (MAIN_GROUP, &group.id, group.topic_id),
            (REPORT_GROUP, &group.report_id, group.report_topic_id),
            (ERROR_GROUP, &group.error_id, group.error_topic_id),
        ];

        let mut destinations: Vec<Destination> = well_known
            .into_iter()
            .filter_map(|(name, id, topic)| {
                let id = id.as_deref().map(str::trim).filter(|id| !id.is_empty())?;
                Some(Destination::new(id, topic, Some(name.to_string())))
            })
            .collect();

        destinations.extend(
            config
                .groups
                .iter()
                .filter(|g| !g.chat_id.trim().is_empty())
                .map(|g| Destination::new(g.chat_id.trim(), g.topic_id, Some(g.name.clone()))),
        );

        Self::new(destinations)
    }

    pub fn resolve_by_name(&self, name: &str) -> Result<&Destination, LookupError> {
        self.by_name
            .get(name)
            .map(|&i| &self.destinations[i])
            .ok_or_else(|| LookupError::NotFound(name.to_string()))
    }

    pub fn resolve_by_id(&self, id: &str) -> Result<&Destination, LookupError> {
        self.by_id
            .get(id)
            .map(|&i| &self.destinations[i])
            .ok_or_else(|| LookupError::NotFound(id.to_string()))
    }

    /// All destinations in registration order.
    pub fn all(&self) -> &[Destination] {
        &self.destinations
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }
}
