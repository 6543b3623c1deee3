use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use kitflow_core::traits::KitHooks;

/// Zero-argument constructor producing fresh hooks for one kit run.
pub type KitFactory = Arc<dyn Fn() -> Box<dyn KitHooks> + Send + Sync>;

/// Rough effort level of a kit kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    #[default]
    Simple,
    Moderate,
    Complex,
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
        })
    }
}

impl FromStr for Complexity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "moderate" => Ok(Self::Moderate),
            "complex" => Ok(Self::Complex),
            other => Err(format!("unknown complexity: {}", other)),
        }
    }
}

/// Descriptor of a kit kind.
#[derive(Clone)]
pub struct KitMetadata {
    /// Unique kind identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    pub description: String,
    /// Legal domains the kit applies to (e.g., "tenancy", "employment").
    pub domains: BTreeSet<String>,
    pub estimated_duration_minutes: u32,
    pub complexity: Complexity,
    /// Free-form tags for search.
    pub tags: BTreeSet<String>,
    pub factory: KitFactory,
    /// Inactive kits stay registered but cannot be instantiated or found.
    pub is_active: bool,
}

impl KitMetadata {
    /// Create an active descriptor with no domains or tags.
    pub fn new<F, H>(id: impl Into<String>, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: KitHooks,
    {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            domains: BTreeSet::new(),
            estimated_duration_minutes: 0,
            complexity: Complexity::default(),
            tags: BTreeSet::new(),
            factory: Arc::new(move || Box::new(factory()) as Box<dyn KitHooks>),
            is_active: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.estimated_duration_minutes = minutes;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Redacted view without the factory.
    pub fn summary(&self) -> KitSummary {
        KitSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            domains: self.domains.iter().cloned().collect(),
            tags: self.tags.iter().cloned().collect(),
            complexity: self.complexity,
            estimated_duration_minutes: self.estimated_duration_minutes,
        }
    }
}

impl PartialEq for KitMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.description == other.description
            && self.domains == other.domains
            && self.estimated_duration_minutes == other.estimated_duration_minutes
            && self.complexity == other.complexity
            && self.tags == other.tags
            && self.is_active == other.is_active
            && Arc::ptr_eq(&self.factory, &other.factory)
    }
}

impl fmt::Debug for KitMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KitMetadata")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("domains", &self.domains)
            .field("tags", &self.tags)
            .field("complexity", &self.complexity)
            .field("estimated_duration_minutes", &self.estimated_duration_minutes)
            .field("is_active", &self.is_active)
            .finish_non_exhaustive()
    }
}

/// Kit descriptor safe to hand to presentation code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KitSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub domains: Vec<String>,
    pub tags: Vec<String>,
    pub complexity: Complexity,
    pub estimated_duration_minutes: u32,
}
