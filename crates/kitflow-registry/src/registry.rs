use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use kitflow_core::config::RegistryConfig;
use kitflow_core::{KitError, Result, SessionId};
use kitflow_engine::Kit;

use crate::metadata::{Complexity, KitMetadata, KitSummary};

/// Multi-criteria filter for [`KitRegistry::search_kits`].
///
/// Empty lists and `None` fields do not constrain the result.
#[derive(Debug, Clone, Default)]
pub struct KitQuery {
    /// Kit must cover at least one of these domains.
    pub domains: Vec<String>,
    /// Kit must carry at least one of these tags.
    pub tags: Vec<String>,
    pub complexity: Option<Complexity>,
    /// Upper bound on estimated duration, inclusive.
    pub max_duration: Option<u32>,
}

impl KitQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domains.push(domain.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = Some(complexity);
        self
    }

    pub fn max_duration(mut self, minutes: u32) -> Self {
        self.max_duration = Some(minutes);
        self
    }

    fn matches(&self, meta: &KitMetadata) -> bool {
        if !self.domains.is_empty() && !self.domains.iter().any(|d| meta.domains.contains(d)) {
            return false;
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| meta.tags.contains(t)) {
            return false;
        }
        if let Some(c) = self.complexity {
            if meta.complexity != c {
                return false;
            }
        }
        if let Some(max) = self.max_duration {
            if meta.estimated_duration_minutes > max {
                return false;
            }
        }
        true
    }
}

/// Registry counts plus redacted descriptors of the active kits.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySummary {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub kits: Vec<KitSummary>,
}

/// Catalog of kit kinds keyed by id.
#[derive(Default)]
pub struct KitRegistry {
    kits: HashMap<String, KitMetadata>,
}

impl KitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kit kind. Fails if the id is already taken.
    pub fn register_kit(&mut self, metadata: KitMetadata) -> Result<()> {
        if self.kits.contains_key(&metadata.id) {
            return Err(KitError::DuplicateKit(metadata.id));
        }
        info!(kit = %metadata.id, domains = metadata.domains.len(), "Registered kit");
        self.kits.insert(metadata.id.clone(), metadata);
        Ok(())
    }

    /// Register several kits in order, stopping at the first failure.
    ///
    /// Kits registered before the failure stay registered.
    pub fn register_kits(&mut self, kits: impl IntoIterator<Item = KitMetadata>) -> Result<()> {
        for metadata in kits {
            self.register_kit(metadata)?;
        }
        Ok(())
    }

    pub fn get_kit(&self, id: &str) -> Option<&KitMetadata> {
        self.kits.get(id)
    }

    /// Every registered kit, active or not, sorted by id.
    pub fn get_all_kits(&self) -> Vec<&KitMetadata> {
        let mut kits: Vec<&KitMetadata> = self.kits.values().collect();
        kits.sort_by(|a, b| a.id.cmp(&b.id));
        kits
    }

    /// Active kits sorted by id.
    pub fn get_active_kits(&self) -> Vec<&KitMetadata> {
        self.filtered(|_| true)
    }

    /// Build a fresh kit instance of the given kind.
    ///
    /// Returns `Ok(None)` for an unknown id and `KitInactive` for a
    /// disabled one. Each call invokes the factory, so instances never
    /// share state.
    pub fn create_kit(
        &self,
        id: &str,
        session_id: Option<SessionId>,
        user_id: Option<String>,
    ) -> Result<Option<Kit>> {
        let Some(meta) = self.kits.get(id) else {
            debug!(kit = %id, "create_kit for unknown kit");
            return Ok(None);
        };
        if !meta.is_active {
            return Err(KitError::KitInactive(id.to_string()));
        }
        let hooks = (meta.factory)();
        Ok(Some(Kit::from_boxed(hooks, session_id, user_id)))
    }

    pub fn find_kits_by_domain(&self, domain: &str) -> Vec<&KitMetadata> {
        self.filtered(|k| k.domains.contains(domain))
    }

    pub fn find_kits_by_tag(&self, tag: &str) -> Vec<&KitMetadata> {
        self.filtered(|k| k.tags.contains(tag))
    }

    /// Active kits matching every populated criterion in `query`.
    pub fn search_kits(&self, query: &KitQuery) -> Vec<&KitMetadata> {
        self.filtered(|k| query.matches(k))
    }

    /// Case-insensitive substring match over id, name, description and tags.
    pub fn search_text(&self, text: &str) -> Vec<&KitMetadata> {
        let needle = text.to_lowercase();
        self.filtered(|k| {
            k.id.to_lowercase().contains(&needle)
                || k.name.to_lowercase().contains(&needle)
                || k.description.to_lowercase().contains(&needle)
                || k.tags.iter().any(|t| t.to_lowercase().contains(&needle))
        })
    }

    pub fn set_kit_active(&mut self, id: &str, active: bool) -> Result<()> {
        let meta = self
            .kits
            .get_mut(id)
            .ok_or_else(|| KitError::KitNotFound(id.to_string()))?;
        meta.is_active = active;
        info!(kit = %id, active, "Kit activation changed");
        Ok(())
    }

    /// Remove a kit kind. Returns whether it was present.
    pub fn unregister_kit(&mut self, id: &str) -> bool {
        let removed = self.kits.remove(id).is_some();
        if removed {
            info!(kit = %id, "Unregistered kit");
        }
        removed
    }

    /// Union of domains across active kits, sorted.
    pub fn get_covered_domains(&self) -> Vec<String> {
        let domains: BTreeSet<&String> = self
            .kits
            .values()
            .filter(|k| k.is_active)
            .flat_map(|k| k.domains.iter())
            .collect();
        domains.into_iter().cloned().collect()
    }

    /// Counts over every kit; the listing holds active kits only.
    pub fn get_summary(&self) -> RegistrySummary {
        let kits: Vec<KitSummary> = self.get_active_kits().iter().map(|k| k.summary()).collect();
        let active = self.kits.values().filter(|k| k.is_active).count();
        RegistrySummary {
            total: self.kits.len(),
            active,
            inactive: self.kits.len() - active,
            kits,
        }
    }

    /// Deactivate the kits listed in `disabled_kits`.
    pub fn apply_config(&mut self, config: &RegistryConfig) {
        for id in &config.disabled_kits {
            if self.set_kit_active(id, false).is_err() {
                warn!(kit = %id, "disabled_kits names an unregistered kit");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.kits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kits.is_empty()
    }

    fn filtered(&self, pred: impl Fn(&KitMetadata) -> bool) -> Vec<&KitMetadata> {
        let mut kits: Vec<&KitMetadata> = self
            .kits
            .values()
            .filter(|k| k.is_active && pred(k))
            .collect();
        kits.sort_by(|a, b| a.id.cmp(&b.id));
        kits
    }
}

static GLOBAL_REGISTRY: OnceLock<Arc<RwLock<KitRegistry>>> = OnceLock::new();

/// Process-wide registry, created empty on first access.
pub fn global_registry() -> Arc<RwLock<KitRegistry>> {
    GLOBAL_REGISTRY
        .get_or_init(|| Arc::new(RwLock::new(KitRegistry::new())))
        .clone()
}

/// Drop every kit from the process-wide registry.
pub async fn reset_global_registry() {
    *global_registry().write().await = KitRegistry::new();
}

#[cfg(test)]
mod tests {
    use super::*;
    use kitflow_core::{IntakeData, WorkflowStage};
    use kitflow_test_utils::ScriptedKit;

    fn meta(id: &str) -> KitMetadata {
        let owned = id.to_string();
        KitMetadata::new(id, id.to_uppercase(), move || ScriptedKit::new(owned.clone()))
    }

    fn sample() -> KitRegistry {
        let mut registry = KitRegistry::new();
        registry
            .register_kits([
                meta("eviction")
                    .with_domains(["tenancy", "housing"])
                    .with_tags(["urgent", "court"])
                    .with_complexity(Complexity::Complex)
                    .with_duration(60),
                meta("deposit")
                    .with_domains(["tenancy"])
                    .with_tags(["money"])
                    .with_complexity(Complexity::Simple)
                    .with_duration(15),
                meta("wage-claim")
                    .with_domains(["employment"])
                    .with_tags(["money", "court"])
                    .with_complexity(Complexity::Moderate)
                    .with_duration(30),
                meta("retired")
                    .with_domains(["immigration"])
                    .with_tags(["money"])
                    .inactive(),
            ])
            .unwrap();
        registry
    }

    fn ids(kits: Vec<&KitMetadata>) -> Vec<&str> {
        kits.into_iter().map(|k| k.id.as_str()).collect()
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = KitRegistry::new();
        registry.register_kit(meta("a")).unwrap();
        let err = registry.register_kit(meta("a")).unwrap_err();
        assert!(matches!(err, KitError::DuplicateKit(id) if id == "a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn batch_registration_stops_at_first_duplicate() {
        let mut registry = KitRegistry::new();
        let result = registry.register_kits([meta("a"), meta("b"), meta("a"), meta("c")]);
        assert!(result.is_err());
        assert!(registry.get_kit("a").is_some());
        assert!(registry.get_kit("b").is_some());
        assert!(registry.get_kit("c").is_none());
    }

    #[test]
    fn get_kit_is_stable() {
        let registry = sample();
        let first = registry.get_kit("deposit").unwrap();
        let second = registry.get_kit("deposit").unwrap();
        assert_eq!(first, second);
        assert!(registry.get_kit("missing").is_none());
    }

    #[tokio::test]
    async fn create_kit_returns_independent_instances() {
        let registry = sample();
        let session = SessionId::from_string("s1");
        let mut one = registry
            .create_kit("deposit", Some(session.clone()), Some("u1".into()))
            .unwrap()
            .unwrap();
        let two = registry.create_kit("deposit", None, None).unwrap().unwrap();

        one.intake(IntakeData::new("landlord kept my deposit")).await.unwrap();

        assert_eq!(one.session_id(), &session);
        assert_eq!(one.current_stage(), WorkflowStage::Analysis);
        assert_eq!(two.current_stage(), WorkflowStage::Intake);
        assert_eq!(two.progress(), 0);
        assert_ne!(two.session_id(), &session);
    }

    #[test]
    fn create_kit_unknown_and_inactive() {
        let registry = sample();
        assert!(registry.create_kit("missing", None, None).unwrap().is_none());
        let err = registry.create_kit("retired", None, None).unwrap_err();
        assert!(matches!(err, KitError::KitInactive(id) if id == "retired"));
    }

    #[test]
    fn find_by_domain_and_tag_skip_inactive() {
        let registry = sample();
        assert_eq!(ids(registry.find_kits_by_domain("tenancy")), vec!["deposit", "eviction"]);
        assert!(registry.find_kits_by_domain("immigration").is_empty());
        assert_eq!(ids(registry.find_kits_by_tag("money")), vec!["deposit", "wage-claim"]);
    }

    #[test]
    fn search_intersects_criteria() {
        let registry = sample();

        assert_eq!(registry.search_kits(&KitQuery::new()).len(), 3);

        let q = KitQuery::new().domain("tenancy").domain("employment").tag("court");
        assert_eq!(ids(registry.search_kits(&q)), vec!["eviction", "wage-claim"]);

        let q = KitQuery::new().tag("money").max_duration(30);
        assert_eq!(ids(registry.search_kits(&q)), vec!["deposit", "wage-claim"]);

        let q = KitQuery::new().complexity(Complexity::Complex).max_duration(45);
        assert!(registry.search_kits(&q).is_empty());
    }

    #[test]
    fn text_search_matches_name_and_tags() {
        let registry = sample();
        assert_eq!(ids(registry.search_text("WAGE")), vec!["wage-claim"]);
        assert_eq!(ids(registry.search_text("urg")), vec!["eviction"]);
    }

    #[test]
    fn activation_and_removal() {
        let mut registry = sample();
        registry.set_kit_active("retired", true).unwrap();
        assert_eq!(ids(registry.find_kits_by_domain("immigration")), vec!["retired"]);

        let err = registry.set_kit_active("missing", false).unwrap_err();
        assert!(matches!(err, KitError::KitNotFound(_)));

        assert!(registry.unregister_kit("deposit"));
        assert!(!registry.unregister_kit("deposit"));
        assert!(registry.create_kit("deposit", None, None).unwrap().is_none());
    }

    #[test]
    fn covered_domains_sorted_and_deduplicated() {
        let registry = sample();
        assert_eq!(
            registry.get_covered_domains(),
            vec!["employment".to_string(), "housing".into(), "tenancy".into()]
        );
    }

    #[test]
    fn summary_counts_and_redacts() {
        let registry = sample();
        let summary = registry.get_summary();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.active, 3);
        assert_eq!(summary.inactive, 1);
        let listed: Vec<&str> = summary.kits.iter().map(|k| k.id.as_str()).collect();
        assert_eq!(listed, vec!["deposit", "eviction", "wage-claim"]);
        assert!(!listed.contains(&"retired"));

        let json = serde_json::to_value(&summary).unwrap();
        assert!(json["kits"][0].get("factory").is_none());
    }

    #[test]
    fn apply_config_disables_listed_kits() {
        let mut registry = sample();
        let config = RegistryConfig {
            disabled_kits: vec!["eviction".into(), "nonexistent".into()],
        };
        registry.apply_config(&config);
        assert!(!registry.get_kit("eviction").unwrap().is_active);
        assert_eq!(registry.get_summary().inactive, 2);
    }

    #[tokio::test]
    async fn global_registry_is_shared_and_resettable() {
        reset_global_registry().await;
        global_registry().write().await.register_kit(meta("global-kit")).unwrap();
        assert!(global_registry().read().await.get_kit("global-kit").is_some());

        reset_global_registry().await;
        assert!(global_registry().read().await.is_empty());
    }
}
