//! Built-in demonstration kits.

use futures::future::BoxFuture;
use serde_json::{json, Value};

use kitflow_core::{
    GuidanceArtifact, IntakeData, JsonMap, KitError, KitHooks, Result, WorkflowResult,
    WorkflowState,
};
use kitflow_registry::{Complexity, KitMetadata, KitRegistry};

/// Small-claims ceiling used when no jurisdiction-specific limit applies.
const DEFAULT_SMALL_CLAIMS_LIMIT: f64 = 10_000.0;

/// Registry pre-loaded with every built-in kit.
pub fn builtin_registry() -> kitflow_core::Result<KitRegistry> {
    let mut registry = KitRegistry::new();
    registry.register_kits([
        KitMetadata::new("tenancy-dispute", "Tenancy Dispute", || TenancyDisputeKit)
            .with_description(
                "Landlord and tenant disagreements over deposits, repairs and notices",
            )
            .with_domains(["tenancy", "housing"])
            .with_tags(["deposit", "repairs", "eviction", "rent"])
            .with_complexity(Complexity::Moderate)
            .with_duration(45),
        KitMetadata::new("small-claims", "Small Claims", || SmallClaimsKit)
            .with_description("Prepare a claim for a small-claims court")
            .with_domains(["civil", "consumer"])
            .with_tags(["court", "money"])
            .with_complexity(Complexity::Simple)
            .with_duration(30),
    ])?;
    Ok(registry)
}

fn hook_err(state: &WorkflowState, msg: &str) -> KitError {
    KitError::hook(format!("{}: {}", state.workflow_id, msg))
}

fn analysis_field<'a>(state: &'a WorkflowState, key: &str) -> Option<&'a Value> {
    state.analysis_result.as_ref().and_then(|a| a.get(key))
}

pub struct TenancyDisputeKit;

impl TenancyDisputeKit {
    fn classify(description: &str) -> &'static str {
        let text = description.to_lowercase();
        if text.contains("evict") || text.contains("notice to quit") {
            "eviction"
        } else if text.contains("deposit") {
            "deposit"
        } else if text.contains("repair") || text.contains("mould") || text.contains("mold") {
            "repairs"
        } else if text.contains("rent") {
            "rent-increase"
        } else {
            "general"
        }
    }
}

impl KitHooks for TenancyDisputeKit {
    fn workflow_id(&self) -> &str {
        "tenancy-dispute"
    }

    fn validate_intake(&self, data: &IntakeData) -> std::result::Result<(), String> {
        if data.description.trim().is_empty() {
            return Err("description is required".to_string());
        }
        if data.jurisdiction.as_deref().map_or(true, |j| j.trim().is_empty()) {
            return Err("jurisdiction is required for tenancy disputes".to_string());
        }
        Ok(())
    }

    fn perform_intake<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, Result<JsonMap>> {
        Box::pin(async move {
            let description = state.input_str("description").unwrap_or_default();
            let mut derived = JsonMap::new();
            derived.insert("issueType".into(), json!(Self::classify(description)));
            derived.insert(
                "jurisdiction".into(),
                json!(state.input_str("jurisdiction").unwrap_or_default().to_uppercase()),
            );
            Ok(derived)
        })
    }

    fn perform_analysis<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let issue = state
                .context_str("issueType")
                .ok_or_else(|| hook_err(state, "intake did not classify the issue"))?;
            let urgency = match issue {
                "eviction" => "high",
                "repairs" => "medium",
                _ => "low",
            };
            Ok(json!({
                "issueType": issue,
                "urgency": urgency,
                "jurisdiction": state.context_str("jurisdiction"),
            }))
        })
    }

    fn perform_document_generation<'a>(
        &'a self,
        state: &'a WorkflowState,
    ) -> BoxFuture<'a, Result<Vec<Value>>> {
        Box::pin(async move {
            let issue = analysis_field(state, "issueType")
                .and_then(Value::as_str)
                .unwrap_or("general");
            let mut documents = vec![json!({
                "kind": "letter",
                "title": format!("Letter to landlord regarding {}", issue),
            })];
            documents.push(json!({
                "kind": "checklist",
                "title": "Evidence checklist",
                "items": ["Tenancy agreement", "Photos", "Correspondence"],
            }));
            if issue == "eviction" {
                documents.push(json!({ "kind": "form", "title": "Defence to possession claim" }));
            }
            Ok(documents)
        })
    }

    fn perform_guidance<'a>(
        &'a self,
        state: &'a WorkflowState,
    ) -> BoxFuture<'a, Result<GuidanceArtifact>> {
        Box::pin(async move {
            let urgent = analysis_field(state, "urgency").and_then(Value::as_str) == Some("high");
            let mut steps = vec!["Gather the evidence on the checklist", "Send the letter"];
            if urgent {
                steps.insert(0, "Contact a housing adviser within 48 hours");
            }
            let narrative = if urgent {
                "Your case is time-sensitive. Act on the first step immediately."
            } else {
                "Start with the letter and allow the landlord 14 days to respond."
            };
            Ok(GuidanceArtifact::new(json!({ "steps": steps }), narrative))
        })
    }

    fn finalize<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, Result<WorkflowResult>> {
        Box::pin(async move {
            let guidance = state
                .guidance
                .as_ref()
                .ok_or_else(|| hook_err(state, "guidance missing"))?;
            let documents = state.documents.clone().unwrap_or_default();
            let urgent = analysis_field(state, "urgency").and_then(Value::as_str) == Some("high");
            Ok(WorkflowResult {
                workflow_id: state.workflow_id.clone(),
                session_id: state.session_id.clone(),
                classification: state.analysis_result.clone().unwrap_or_default(),
                action_plan: guidance.action_plan.clone(),
                estimated_time_to_complete_minutes: 20 + 10 * documents.len() as u32,
                documents,
                guidance: guidance.narrative.clone(),
                next_steps: vec!["Review and send the letter".into()],
                risks: urgent.then(|| vec!["Possession order if no defence is filed".into()]),
                opportunities: None,
            })
        })
    }
}

pub struct SmallClaimsKit;

impl SmallClaimsKit {
    fn amount(state: &WorkflowState) -> Option<f64> {
        state.user_inputs.get("amount").and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().trim_start_matches('$').parse().ok(),
            _ => None,
        })
    }
}

impl KitHooks for SmallClaimsKit {
    fn workflow_id(&self) -> &str {
        "small-claims"
    }

    fn perform_intake<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, Result<JsonMap>> {
        Box::pin(async move {
            let mut derived = JsonMap::new();
            if let Some(amount) = Self::amount(state) {
                derived.insert("claimAmount".into(), json!(amount));
            }
            Ok(derived)
        })
    }

    fn perform_analysis<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let amount = state.system_context.get("claimAmount").and_then(Value::as_f64);
            let eligible = amount.map(|a| a > 0.0 && a <= DEFAULT_SMALL_CLAIMS_LIMIT);
            Ok(json!({
                "claimAmount": amount,
                "limit": DEFAULT_SMALL_CLAIMS_LIMIT,
                "eligible": eligible,
            }))
        })
    }

    fn perform_document_generation<'a>(
        &'a self,
        state: &'a WorkflowState,
    ) -> BoxFuture<'a, Result<Vec<Value>>> {
        Box::pin(async move {
            let eligible = analysis_field(state, "eligible").and_then(Value::as_bool);
            if eligible == Some(false) {
                return Err(hook_err(state, "claim exceeds the small-claims limit"));
            }
            Ok(vec![
                json!({ "kind": "letter", "title": "Letter before claim" }),
                json!({ "kind": "form", "title": "Claim form" }),
            ])
        })
    }

    fn perform_guidance<'a>(
        &'a self,
        _state: &'a WorkflowState,
    ) -> BoxFuture<'a, Result<GuidanceArtifact>> {
        Box::pin(async move {
            let plan = json!({
                "steps": [
                    "Send the letter before claim",
                    "Wait 14 days for a response",
                    "File the claim form with the court",
                ]
            });
            Ok(GuidanceArtifact::new(
                plan,
                "Most claims settle after the letter before claim.",
            ))
        })
    }

    fn finalize<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, Result<WorkflowResult>> {
        Box::pin(async move {
            let guidance = state
                .guidance
                .as_ref()
                .ok_or_else(|| hook_err(state, "guidance missing"))?;
            Ok(WorkflowResult {
                workflow_id: state.workflow_id.clone(),
                session_id: state.session_id.clone(),
                classification: state.analysis_result.clone().unwrap_or_default(),
                action_plan: guidance.action_plan.clone(),
                documents: state.documents.clone().unwrap_or_default(),
                guidance: guidance.narrative.clone(),
                next_steps: vec!["Send the letter before claim".into()],
                estimated_time_to_complete_minutes: 30,
                risks: None,
                opportunities: Some(vec!["Settlement before filing".into()]),
            })
        })
    }
}
