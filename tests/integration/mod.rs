//! Integration Tests Module
//!
//! End-to-end runs of the analysis pipeline against a scripted completion
//! service, plus statistical checks through the public validator API.

// Shared campaign data and scripted replies
mod fixtures;

// Two-sample validation through the public API
mod validator_test;

// Full orchestrator runs: happy path, replanning, forced recommendation
mod orchestrator_test;

// Failure, repair, cancellation and run budget handling
mod resilience_test;
