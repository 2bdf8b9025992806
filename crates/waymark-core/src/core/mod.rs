// waymark-core/src/core/mod.rs
// ============================================================================
// Module: Waymark Core Types
// Description: Canonical Waymark data model for events, snapshots, and tokens.
// Purpose: Provide stable, serializable types for the durable execution substrate.
// Dependencies: serde, sha2, hmac, subtle
// ============================================================================

//! ## Overview
//! Waymark core types define the event vocabulary, attestation manifest,
//! execution snapshots, workflow programs, reason/blocker model, capability
//! tokens, and export bundles. These types are the canonical source of truth
//! for any derived API surfaces (CLI, RPC wrappers, or consoles).

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod bundle;
pub mod canonical;
pub mod context;
pub mod encoding;
pub mod event;
pub mod hashing;
pub mod identifiers;
pub mod manifest;
pub mod reason;
pub mod snapshot;
pub mod token;
pub mod trace;
pub mod workflow;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use bundle::BUNDLE_INTEGRITY_KIND;
pub use bundle::BUNDLE_SCHEMA_VERSION;
pub use bundle::BundleBuildError;
pub use bundle::BundleExportInputs;
pub use bundle::BundleImportError;
pub use bundle::BundleIntegrity;
pub use bundle::BundleProducer;
pub use bundle::BundleSession;
pub use bundle::ExportBundle;
pub use bundle::IntegrityEntry;
pub use bundle::build_export_bundle;
pub use bundle::validate_import_bundle;
pub use canonical::CanonicalJsonError;
pub use canonical::canonical_byte_len;
pub use canonical::canonical_json_bytes;
pub use canonical::canonical_json_string;
pub use canonical::canonical_jsonl_line;
pub use context::ContextError;
pub use context::MAX_CONTEXT_BYTES;
pub use context::RESERVED_CONTEXT_KEYS;
pub use context::context_value_truthy;
pub use context::merge_context;
pub use context::narrow_context_object;
pub use encoding::Base32Error;
pub use encoding::base32_lower_nopad_decode;
pub use encoding::base32_lower_nopad_encode;
pub use event::AdvanceOutcome;
pub use event::AppendPlan;
pub use event::CauseKind;
pub use event::DedupeDisposition;
pub use event::DomainEvent;
pub use event::EVENT_SCHEMA_VERSION;
pub use event::EdgeCause;
pub use event::EdgeKind;
pub use event::EventError;
pub use event::EventPayload;
pub use event::EventScope;
pub use event::NodeKind;
pub use event::OutputChannel;
pub use event::OutputPayload;
pub use event::SnapshotPin;
pub use event::advance_recorded_dedupe_key;
pub use event::context_set_dedupe_key;
pub use event::decision_trace_dedupe_key;
pub use event::edge_created_dedupe_key;
pub use event::gap_recorded_dedupe_key;
pub use event::node_created_dedupe_key;
pub use event::node_output_dedupe_key;
pub use event::observation_recorded_dedupe_key;
pub use event::run_started_dedupe_key;
pub use event::session_created_dedupe_key;
pub use event::validation_performed_dedupe_key;
pub use hashing::ContentDigest;
pub use hashing::DigestError;
pub use hashing::SnapshotRef;
pub use hashing::WorkflowHash;
pub use identifiers::AttemptId;
pub use identifiers::BundleId;
pub use identifiers::EventId;
pub use identifiers::GapId;
pub use identifiers::ID_BODY_BYTES;
pub use identifiers::IdentifierError;
pub use identifiers::LoopId;
pub use identifiers::NodeId;
pub use identifiers::ObservationId;
pub use identifiers::OutputId;
pub use identifiers::RunId;
pub use identifiers::SessionId;
pub use identifiers::StepId;
pub use identifiers::TraceId;
pub use identifiers::WorkflowId;
pub use identifiers::is_delimiter_safe;
pub use manifest::MANIFEST_SCHEMA_VERSION;
pub use manifest::ManifestEntry;
pub use manifest::ManifestError;
pub use manifest::ManifestRecord;
pub use reason::BlockerPointer;
pub use reason::BlockerReport;
pub use reason::BlockerV1;
pub use reason::GapReason;
pub use reason::GapSeverity;
pub use reason::GapV1;
pub use reason::GuardrailSplit;
pub use reason::MAX_BLOCKER_MESSAGE_BYTES;
pub use reason::MAX_BLOCKER_SUGGESTED_FIX_BYTES;
pub use reason::MAX_BLOCKERS;
pub use reason::OutputRequirement;
pub use reason::ReasonError;
pub use reason::ReasonV1;
pub use reason::UserOnlyDependency;
pub use reason::apply_guardrails;
pub use reason::build_blocker_report;
pub use reason::detect_blocking_reasons;
pub use reason::reason_to_blocker;
pub use reason::should_block;
pub use reason::validate_contract_ref;
pub use snapshot::EnginePayload;
pub use snapshot::EngineState;
pub use snapshot::ExecutionSnapshot;
pub use snapshot::LoopFrame;
pub use snapshot::PendingStep;
pub use snapshot::SNAPSHOT_KIND;
pub use snapshot::SNAPSHOT_SCHEMA_VERSION;
pub use token::TOKEN_KEY_BYTES;
pub use token::TokenError;
pub use token::TokenKey;
pub use token::TokenKind;
pub use token::TokenPayload;
pub use token::mint_token;
pub use token::verify_token;
pub use trace::MAX_DECISION_TRACE_ENTRIES;
pub use trace::MAX_TRACE_SUMMARY_BYTES;
pub use trace::MAX_TRACE_TOTAL_BYTES;
pub use trace::TRACE_TRUNCATION_MARKER;
pub use trace::TraceEntry;
pub use trace::TraceEntryKind;
pub use trace::budget_trace;
pub use workflow::AutonomyMode;
pub use workflow::LoopSpec;
pub use workflow::OutputContract;
pub use workflow::RecommendedPrefs;
pub use workflow::RiskPolicy;
pub use workflow::RunCondition;
pub use workflow::StepNode;
pub use workflow::StepSpec;
pub use workflow::ValidationCriteria;
pub use workflow::ValidationResult;
pub use workflow::WORKFLOW_SCHEMA_VERSION;
pub use workflow::WorkflowError;
pub use workflow::WorkflowSpec;
