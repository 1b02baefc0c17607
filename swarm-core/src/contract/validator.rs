use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;

use crate::error::{CoreError, CoreResult};

use super::types::{
    BreakerCounters, Constraints, GitInfo, HandoffData, Specification, TaskContract, TaskStatus,
    Timestamps, SCHEMA_VERSION,
};

pub use super::types::Complexity;

/// A proposal as authored by the external Super-Manager, already parsed
/// into explicit fields. No guessing: every field here was present in the
/// source text, or `parse_proposal` would have rejected it.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub project: String,
    pub slug: String,
    pub complexity: Complexity,
    pub specification: Specification,
    pub constraints: Constraints,
}

/// Parse a proposal document (JSON) into a [`Proposal`].
///
/// Required keys: `project`, `slug`, `target_file`, `requirements`
/// (non-empty array), `complexity`. Missing or malformed fields are
/// collected and reported together — the caller gets one error naming
/// every offending field, not a single swallowed exception.
pub fn parse_proposal(text: &str) -> CoreResult<Proposal> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| CoreError::validation(format!("proposal is not valid JSON: {e}")))?;

    let mut missing = Vec::new();

    let project = value
        .get("project")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    if project.as_deref().map(str::is_empty).unwrap_or(true) {
        missing.push("project");
    }

    let slug = value
        .get("slug")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    if slug.as_deref().map(str::is_empty).unwrap_or(true) {
        missing.push("slug");
    }

    let target_file = value
        .get("target_file")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    if target_file.as_deref().map(str::is_empty).unwrap_or(true) {
        missing.push("target_file");
    }

    let requirements: Vec<String> = value
        .get("requirements")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    if requirements.is_empty() {
        missing.push("requirements");
    }

    let complexity = value
        .get("complexity")
        .and_then(|v| v.as_str())
        .and_then(|s| match s {
            "trivial" => Some(Complexity::Trivial),
            "minor" => Some(Complexity::Minor),
            "major" => Some(Complexity::Major),
            "critical" => Some(Complexity::Critical),
            _ => None,
        });
    if complexity.is_none() {
        missing.push("complexity (one of trivial|minor|major|critical)");
    }

    if !missing.is_empty() {
        return Err(CoreError::validation(format!(
            "proposal is missing or has invalid field(s): {}",
            missing.join(", ")
        )));
    }

    let source_files = value
        .get("source_files")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let acceptance_criteria = value
        .get("acceptance_criteria")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let allowed_paths = value
        .get("allowed_paths")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let forbidden_paths = value
        .get("forbidden_paths")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let delete_allowed = value
        .get("delete_allowed")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    Ok(Proposal {
        project: project.unwrap(),
        slug: slug.unwrap(),
        complexity: complexity.unwrap(),
        specification: Specification {
            source_files,
            target_file: target_file.unwrap(),
            requirements,
            acceptance_criteria,
        },
        constraints: Constraints {
            allowed_paths,
            forbidden_paths,
            delete_allowed,
        },
    })
}

/// Build the deterministic task id `{PROJECT}-{SEQ:03}-{SLUG}`.
pub fn task_id(project: &str, sequence: u32, slug: &str) -> String {
    format!(
        "{}-{:03}-{}",
        project.to_uppercase(),
        sequence,
        slug.to_uppercase()
    )
}

/// Materialize a [`TaskContract`] from a parsed proposal and its
/// monotonic per-project sequence number. The contract starts in
/// `pending_implementer` with an armed breaker and no git info attached
/// yet (the Listener fills `git` in once the task branch exists).
pub fn create_contract(proposal: &Proposal, sequence: u32, base_branch: &str) -> TaskContract {
    let now = Utc::now();
    let id = task_id(&proposal.project, sequence, &proposal.slug);

    TaskContract {
        schema_version: SCHEMA_VERSION.to_string(),
        task_id: id,
        project: proposal.project.clone(),
        status: TaskStatus::PendingImplementer,
        status_reason: "contract created from proposal".to_string(),
        complexity: proposal.complexity,
        specification: proposal.specification.clone(),
        constraints: proposal.constraints.clone(),
        limits: proposal.complexity.default_limits(),
        breaker: BreakerCounters::default(),
        lock: None,
        git: GitInfo {
            base_branch: base_branch.to_string(),
            base_commit: None,
            task_branch: None,
            checkpoint_shas: Vec::new(),
        },
        handoff_data: HandoffData::default(),
        history: Vec::new(),
        timestamps: Timestamps {
            created_at: now,
            updated_at: now,
        },
    }
}

/// Check every invariant from §3. Returns a human-readable error per
/// violation; an empty vec means the contract is valid.
pub fn validate(contract: &TaskContract) -> Vec<String> {
    let mut errors = Vec::new();

    if contract.schema_version != SCHEMA_VERSION {
        errors.push(format!(
            "schema_version must be \"{SCHEMA_VERSION}\", got \"{}\"",
            contract.schema_version
        ));
    }

    let allowed: HashSet<&str> = contract
        .constraints
        .allowed_paths
        .iter()
        .map(String::as_str)
        .collect();
    let forbidden: HashSet<&str> = contract
        .constraints
        .forbidden_paths
        .iter()
        .map(String::as_str)
        .collect();
    let overlap: Vec<&str> = allowed.intersection(&forbidden).copied().collect();
    if !overlap.is_empty() {
        errors.push(format!(
            "allowed_paths and forbidden_paths overlap: {}",
            overlap.join(", ")
        ));
    }

    if contract.specification.target_file.is_empty() {
        errors.push("specification.target_file must not be empty".to_string());
    }

    if contract.specification.requirements.is_empty() {
        errors.push("specification.requirements must not be empty".to_string());
    }

    if contract.breaker.cost_usd > contract.limits.cost_ceiling_usd
        && contract.status != TaskStatus::ErikConsultation
    {
        errors.push(format!(
            "breaker.cost_usd ({:.2}) exceeds limits.cost_ceiling_usd ({:.2}) without status erik_consultation",
            contract.breaker.cost_usd, contract.limits.cost_ceiling_usd
        ));
    }

    if contract.breaker.rebuttal_count > contract.limits.max_rebuttals {
        errors.push(format!(
            "breaker.rebuttal_count ({}) exceeds limits.max_rebuttals ({})",
            contract.breaker.rebuttal_count, contract.limits.max_rebuttals
        ));
    }

    errors
}

/// §3 requires `target_file` to exist at contract creation. Kept separate
/// from `validate` because it touches the filesystem and callers running
/// against a snapshot (e.g. replay) should be able to skip it.
pub fn validate_target_file_exists(contract: &TaskContract, workspace_root: &Path) -> Vec<String> {
    let path = workspace_root.join(&contract.specification.target_file);
    if path.exists() {
        Vec::new()
    } else {
        vec![format!(
            "specification.target_file does not exist: {}",
            path.display()
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal_json() -> String {
        serde_json::json!({
            "project": "ver",
            "slug": "version",
            "target_file": "src/watchdog.py",
            "requirements": ["add --version flag"],
            "complexity": "minor",
        })
        .to_string()
    }

    #[test]
    fn parses_a_well_formed_proposal() {
        let proposal = parse_proposal(&proposal_json()).unwrap();
        assert_eq!(proposal.project, "ver");
        assert_eq!(proposal.slug, "version");
        assert_eq!(proposal.complexity, Complexity::Minor);
        assert_eq!(proposal.specification.requirements.len(), 1);
    }

    #[test]
    fn rejects_missing_fields_by_name() {
        let err = parse_proposal("{}").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("project"));
        assert!(message.contains("slug"));
        assert!(message.contains("target_file"));
        assert!(message.contains("requirements"));
        assert!(message.contains("complexity"));
    }

    #[test]
    fn rejects_invalid_complexity_value() {
        let json = serde_json::json!({
            "project": "ver",
            "slug": "version",
            "target_file": "src/x.py",
            "requirements": ["r1"],
            "complexity": "urgent",
        })
        .to_string();
        let err = parse_proposal(&json).unwrap_err();
        assert!(err.to_string().contains("complexity"));
    }

    #[test]
    fn task_id_is_deterministic() {
        assert_eq!(task_id("ver", 1, "version"), "VER-001-VERSION");
        assert_eq!(task_id("VER", 1, "version"), "VER-001-VERSION");
    }

    #[test]
    fn create_contract_starts_pending_implementer() {
        let proposal = parse_proposal(&proposal_json()).unwrap();
        let contract = create_contract(&proposal, 1, "main");
        assert_eq!(contract.status, TaskStatus::PendingImplementer);
        assert_eq!(contract.task_id, "VER-001-VERSION");
        assert_eq!(contract.limits.cost_ceiling_usd, 0.50);
        assert_eq!(contract.limits.global_timeout_hours, 3.0);
        assert!(validate(&contract).is_empty());
    }

    #[test]
    fn complexity_default_limits_match_spec_table() {
        assert_eq!(Complexity::Trivial.default_limits().cost_ceiling_usd, 0.25);
        assert_eq!(Complexity::Minor.default_limits().cost_ceiling_usd, 0.50);
        assert_eq!(Complexity::Major.default_limits().cost_ceiling_usd, 2.00);
        assert_eq!(Complexity::Critical.default_limits().cost_ceiling_usd, 5.00);
        assert_eq!(Complexity::Critical.default_limits().global_timeout_hours, 6.0);
    }

    #[test]
    fn validate_flags_overlapping_paths() {
        let proposal = parse_proposal(&proposal_json()).unwrap();
        let mut contract = create_contract(&proposal, 1, "main");
        contract.constraints.allowed_paths = vec!["src/a.rs".into()];
        contract.constraints.forbidden_paths = vec!["src/a.rs".into()];
        let errors = validate(&contract);
        assert!(errors.iter().any(|e| e.contains("overlap")));
    }

    #[test]
    fn validate_flags_cost_over_ceiling_without_halt_status() {
        let proposal = parse_proposal(&proposal_json()).unwrap();
        let mut contract = create_contract(&proposal, 1, "main");
        contract.breaker.cost_usd = 999.0;
        let errors = validate(&contract);
        assert!(errors.iter().any(|e| e.contains("cost_usd")));
    }

    #[test]
    fn validate_allows_cost_over_ceiling_in_erik_consultation() {
        let proposal = parse_proposal(&proposal_json()).unwrap();
        let mut contract = create_contract(&proposal, 1, "main");
        contract.breaker.cost_usd = 999.0;
        contract.status = TaskStatus::ErikConsultation;
        let errors = validate(&contract);
        assert!(!errors.iter().any(|e| e.contains("cost_usd")));
    }

    #[test]
    fn validate_rejects_wrong_schema_version() {
        let proposal = parse_proposal(&proposal_json()).unwrap();
        let mut contract = create_contract(&proposal, 1, "main");
        contract.schema_version = "1.0".to_string();
        let errors = validate(&contract);
        assert!(errors.iter().any(|e| e.contains("schema_version")));
    }
}
