// waymark-core/tests/blocking.rs
// ============================================================================
// Module: Blocking Decision Tests
// Description: Autonomy table, guardrails, and blocker report budgets.
// ============================================================================
//! ## Overview
//! Validates the full autonomy decision table, guardrail demotion, blocker
//! ordering, and the byte budgets enforced on blocker construction.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use waymark_core::AutonomyMode;
use waymark_core::MAX_BLOCKERS;
use waymark_core::ReasonError;
use waymark_core::ReasonV1;
use waymark_core::StepId;
use waymark_core::build_blocker_report;
use waymark_core::reason_to_blocker;
use waymark_core::should_block;

/// One representative reason of every kind.
fn all_reason_kinds() -> Vec<ReasonV1> {
    vec![
        ReasonV1::MissingRequiredOutput {
            contract_ref: "contract-1".to_string(),
        },
        ReasonV1::InvalidRequiredOutput {
            contract_ref: "contract-1".to_string(),
            issues: vec!["too short".to_string()],
        },
        ReasonV1::MissingContextKey {
            key: "plan".to_string(),
        },
        ReasonV1::RequiredCapabilityUnavailable {
            capability: "browser".to_string(),
        },
        ReasonV1::UserOnlyDependency {
            detail: "sign the form".to_string(),
            step_id: StepId::new("step-1"),
        },
        ReasonV1::InvariantViolation {
            detail: "broken".to_string(),
        },
        ReasonV1::StorageCorruptionDetected {
            detail: "bad digest".to_string(),
        },
        ReasonV1::EvaluationError {
            detail: "engine died".to_string(),
        },
    ]
}

/// The full decision table: mode by reason-set emptiness.
#[test]
fn test_should_block_table() {
    let reasons = all_reason_kinds();
    for mode in [
        AutonomyMode::Guided,
        AutonomyMode::FullAutoStopOnUserDeps,
        AutonomyMode::FullAutoNeverStop,
    ] {
        assert!(!should_block(mode, &[]));
    }
    assert!(should_block(AutonomyMode::Guided, &reasons));
    assert!(should_block(AutonomyMode::FullAutoStopOnUserDeps, &reasons));
    assert!(!should_block(AutonomyMode::FullAutoNeverStop, &reasons));
}

/// Every reason kind projects into a blocker with its code.
#[test]
fn test_every_reason_projects() {
    for reason in all_reason_kinds() {
        let blocker = reason_to_blocker(&reason).unwrap();
        assert_eq!(blocker.code, reason.code());
        assert!(!blocker.message.is_empty());
    }
}

/// Reports cap at the blocker budget.
#[test]
fn test_report_caps_at_budget() {
    let reasons: Vec<ReasonV1> = (0..(MAX_BLOCKERS + 10))
        .map(|index| ReasonV1::MissingContextKey {
            key: format!("key-{index:03}"),
        })
        .collect();
    let report = build_blocker_report(&reasons).unwrap();
    assert_eq!(report.blockers.len(), MAX_BLOCKERS);
}

/// A malformed step id inside a reason fails closed.
#[test]
fn test_malformed_step_id_rejected() {
    let reason = ReasonV1::UserOnlyDependency {
        detail: "needs a human".to_string(),
        step_id: StepId::new("Step One!"),
    };
    assert!(matches!(
        reason_to_blocker(&reason),
        Err(ReasonError::InvalidDelimiterSafeId { .. })
    ));
}

/// A malformed contract ref fails closed.
#[test]
fn test_malformed_contract_ref_rejected() {
    let reason = ReasonV1::MissingRequiredOutput {
        contract_ref: "has whitespace".to_string(),
    };
    assert!(matches!(
        reason_to_blocker(&reason),
        Err(ReasonError::InvalidContractRef { .. })
    ));
}
