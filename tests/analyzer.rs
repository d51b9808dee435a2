//! Model pipeline behavior against a scripted client and a manual clock.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use compliance_checker::analyzer::{
    AnalysisError, AttemptState, FileState, ModelAnalyzer, RateLimiter, ServiceError,
};
use compliance_checker::audit::{run_model_audit, SourceDocument};
use compliance_checker::config::ModelConfig;
use compliance_checker::models::Status;
use compliance_checker::progress::{AuditProgressEvent, NoProgress};

fn config(max_retries: u32) -> ModelConfig {
    ModelConfig {
        max_retries,
        ..ModelConfig::default()
    }
}

/// Analyzer with no request pacing, so recorded sleeps are only retry
/// delays and readiness polls.
fn analyzer(
    client: &Arc<ScriptedClient>,
    clock: &Arc<ManualClock>,
    max_retries: u32,
) -> ModelAnalyzer {
    let limiter = Arc::new(RateLimiter::new(clock.clone(), Duration::ZERO));
    ModelAnalyzer::new(client.clone(), limiter, &config(max_retries))
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

/// Sleeps other than the readiness poll interval.
fn retry_sleeps(clock: &ManualClock) -> Vec<Duration> {
    clock
        .sleeps()
        .into_iter()
        .filter(|d| *d != secs(2))
        .collect()
}

#[tokio::test]
async fn fenced_response_is_parsed_and_cleaned_up() {
    let client = Arc::new(ScriptedClient::new());
    client.respond(&format!("Here you go:\n```json\n{}\n```", TWO_FINDINGS));
    let clock = Arc::new(ManualClock::new());

    let analysis = analyzer(&client, &clock, 2)
        .analyze("policy.pdf", &minimal_pdf("Privacy policy"), &two_rules(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(analysis.attempts, 1);
    assert!(!analysis.degraded);
    assert_eq!(analysis.findings.len(), 2);
    assert_eq!(analysis.findings[0].rule, "Data Privacy");
    assert_eq!(analysis.findings[0].status, Status::Pass);
    assert_eq!(analysis.findings[1].rule, "Financial Reporting");
    assert_eq!(analysis.findings[1].status, Status::Fail);
    assert_eq!(analysis.findings[1].details, "missing disclosure");

    assert_eq!(
        client.calls(),
        vec!["upload", "state files/1", "generate files/1", "delete files/1"]
    );
    for path in client.staged_paths() {
        assert!(!path.exists(), "temporary file left behind: {}", path.display());
    }
}

#[tokio::test]
async fn quota_errors_back_off_exponentially() {
    let client = Arc::new(ScriptedClient::new());
    client
        .fail_generate(ServiceError::quota("429 Resource has been exhausted"))
        .fail_generate(ServiceError::quota("429 Resource has been exhausted"))
        .respond(TWO_FINDINGS);
    let clock = Arc::new(ManualClock::new());

    let analysis = analyzer(&client, &clock, 3)
        .analyze("policy.pdf", &minimal_pdf("x"), &two_rules(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(analysis.attempts, 3);
    assert_eq!(retry_sleeps(&clock), vec![secs(10), secs(20)]);
    assert!(clock.total_slept() >= secs(30));
    // Every attempt removes its own upload.
    assert_eq!(client.count("upload"), 3);
    assert_eq!(client.count("delete"), 3);
    assert!(client.calls().contains(&"delete files/3".to_string()));
}

#[tokio::test]
async fn quota_exhaustion_is_reported() {
    let client = Arc::new(ScriptedClient::new());
    client
        .fail_generate(ServiceError::quota("quota exceeded"))
        .fail_generate(ServiceError::quota("quota exceeded"));
    let clock = Arc::new(ManualClock::new());

    let err = analyzer(&client, &clock, 2)
        .analyze("policy.pdf", &minimal_pdf("x"), &two_rules(), &NoProgress)
        .await
        .unwrap_err();

    assert!(matches!(err, AnalysisError::QuotaExhausted { attempts: 2, .. }));
    assert_eq!(client.count("delete"), 2);
}

#[tokio::test]
async fn unknown_status_becomes_warning() {
    let client = Arc::new(ScriptedClient::new());
    client.respond(
        r#"{"findings":[
            {"rule":"data privacy","status":"MAYBE","details":"unclear"},
            {"rule":"Financial Reporting","status":" pass ","details":"ok"}
        ]}"#,
    );
    let clock = Arc::new(ManualClock::new());

    let analysis = analyzer(&client, &clock, 2)
        .analyze("policy.pdf", &minimal_pdf("x"), &two_rules(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(analysis.findings[0].rule, "Data Privacy");
    assert_eq!(analysis.findings[0].status, Status::Warning);
    assert_eq!(analysis.findings[0].details, "unclear");
    assert_eq!(analysis.findings[1].status, Status::Pass);
}

#[tokio::test]
async fn rule_missing_from_response_gets_warning() {
    let client = Arc::new(ScriptedClient::new());
    client.respond(
        r#"{"findings":[
            {"rule":"Financial Reporting","status":"FAIL","details":"no"},
            {"rule":"Space Law","status":"PASS","details":"extra"}
        ]}"#,
    );
    let clock = Arc::new(ManualClock::new());

    let analysis = analyzer(&client, &clock, 2)
        .analyze("policy.pdf", &minimal_pdf("x"), &two_rules(), &NoProgress)
        .await
        .unwrap();

    let names: Vec<_> = analysis.findings.iter().map(|f| f.rule.as_str()).collect();
    assert_eq!(names, vec!["Data Privacy", "Financial Reporting"]);
    assert_eq!(analysis.findings[0].status, Status::Warning);
    assert_eq!(analysis.findings[1].status, Status::Fail);
}

#[tokio::test]
async fn unparseable_output_degrades_to_warnings() {
    let client = Arc::new(ScriptedClient::new());
    client
        .respond("I'm sorry, I cannot help with that.")
        .respond("{\"findings\": [");
    let clock = Arc::new(ManualClock::new());

    let analysis = analyzer(&client, &clock, 2)
        .analyze("policy.pdf", &minimal_pdf("x"), &two_rules(), &NoProgress)
        .await
        .unwrap();

    assert!(analysis.degraded);
    assert_eq!(analysis.attempts, 2);
    assert_eq!(analysis.findings.len(), 2);
    for (finding, name) in analysis.findings.iter().zip(["Data Privacy", "Financial Reporting"]) {
        assert_eq!(finding.rule, name);
        assert_eq!(finding.status, Status::Warning);
        assert!(finding.details.contains("Manual review"));
    }
    assert_eq!(retry_sleeps(&clock), vec![secs(3)]);
}

#[tokio::test]
async fn format_error_then_valid_response_succeeds() {
    let client = Arc::new(ScriptedClient::new());
    client.respond(r#"{"result": []}"#).respond(TWO_FINDINGS);
    let clock = Arc::new(ManualClock::new());

    let analysis = analyzer(&client, &clock, 2)
        .analyze("policy.pdf", &minimal_pdf("x"), &two_rules(), &NoProgress)
        .await
        .unwrap();

    assert!(!analysis.degraded);
    assert_eq!(analysis.attempts, 2);
    assert_eq!(analysis.findings[0].status, Status::Pass);
}

#[tokio::test]
async fn authentication_failure_is_not_retried() {
    let client = Arc::new(ScriptedClient::new());
    client.fail_upload(ServiceError::authentication("API key not valid"));
    let clock = Arc::new(ManualClock::new());

    let err = analyzer(&client, &clock, 3)
        .analyze("policy.pdf", &minimal_pdf("x"), &two_rules(), &NoProgress)
        .await
        .unwrap_err();

    assert!(err.is_authentication());
    assert_eq!(client.calls(), vec!["upload"]);
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn upload_is_retried_before_the_attempt_fails() {
    let client = Arc::new(ScriptedClient::new());
    client
        .fail_upload(ServiceError::transient("connection reset"))
        .fail_upload(ServiceError::transient("connection reset"))
        .respond(TWO_FINDINGS);
    let clock = Arc::new(ManualClock::new());

    let analysis = analyzer(&client, &clock, 2)
        .analyze("policy.pdf", &minimal_pdf("x"), &two_rules(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(analysis.attempts, 1);
    assert_eq!(client.count("upload"), 3);
    // Two upload retry pauses plus one readiness poll.
    assert_eq!(clock.sleeps(), vec![secs(2), secs(2), secs(2)]);
}

#[tokio::test]
async fn exhausted_upload_retries_fail_the_attempt() {
    let client = Arc::new(ScriptedClient::new());
    for _ in 0..3 {
        client.fail_upload(ServiceError::transient("503 unavailable"));
    }
    client.respond(TWO_FINDINGS);
    let clock = Arc::new(ManualClock::new());

    let analysis = analyzer(&client, &clock, 2)
        .analyze("policy.pdf", &minimal_pdf("x"), &two_rules(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(analysis.attempts, 2);
    assert_eq!(client.count("upload"), 4);
    assert_eq!(retry_sleeps(&clock), vec![secs(10)]);
    // Nothing was uploaded by the failed attempt, so only one delete.
    assert_eq!(client.count("delete"), 1);
}

#[tokio::test]
async fn slow_file_processing_is_waited_for() {
    let client = Arc::new(ScriptedClient::new());
    client
        .state(FileState::Processing)
        .state_error(ServiceError::transient("timeout"))
        .state(FileState::Processing)
        .state(FileState::Active)
        .respond(TWO_FINDINGS);
    let clock = Arc::new(ManualClock::new());

    let analysis = analyzer(&client, &clock, 2)
        .analyze("policy.pdf", &minimal_pdf("x"), &two_rules(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(analysis.attempts, 1);
    assert_eq!(client.count("state"), 4);
    assert_eq!(clock.sleeps(), vec![secs(2); 4]);
}

#[tokio::test]
async fn file_never_ready_is_a_transient_failure() {
    let client = Arc::new(ScriptedClient::new());
    client.default_state(FileState::Processing);
    let clock = Arc::new(ManualClock::new());

    let err = analyzer(&client, &clock, 2)
        .analyze("policy.pdf", &minimal_pdf("x"), &two_rules(), &NoProgress)
        .await
        .unwrap_err();

    match err {
        AnalysisError::Exhausted { attempts, message } => {
            assert_eq!(attempts, 2);
            assert!(message.contains("not ready"), "{}", message);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    // 15 polls of 2s fill the 30s window, then one final check.
    assert_eq!(client.count("state"), 2 * 16);
    assert_eq!(retry_sleeps(&clock), vec![secs(5)]);
    assert_eq!(client.count("generate"), 0);
    assert_eq!(client.count("delete"), 2);
}

#[tokio::test]
async fn failed_file_processing_retries_with_upload_delay() {
    let client = Arc::new(ScriptedClient::new());
    client.state(FileState::Failed).respond(TWO_FINDINGS);
    let clock = Arc::new(ManualClock::new());

    let analysis = analyzer(&client, &clock, 2)
        .analyze("policy.pdf", &minimal_pdf("x"), &two_rules(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(analysis.attempts, 2);
    assert_eq!(retry_sleeps(&clock), vec![secs(10)]);
    assert_eq!(
        client.calls(),
        vec![
            "upload",
            "state files/1",
            "delete files/1",
            "upload",
            "state files/2",
            "generate files/2",
            "delete files/2",
        ]
    );
}

#[tokio::test]
async fn requests_are_paced_by_the_limiter() {
    let client = Arc::new(ScriptedClient::new());
    client.respond(TWO_FINDINGS);
    let clock = Arc::new(ManualClock::new());
    let limiter = Arc::new(RateLimiter::new(clock.clone(), secs(5)));
    let analyzer = ModelAnalyzer::new(client.clone(), limiter, &config(2));

    analyzer
        .analyze("policy.pdf", &minimal_pdf("x"), &two_rules(), &NoProgress)
        .await
        .unwrap();

    // Upload, one 2s poll, then generate waits out the remaining 3s.
    assert_eq!(clock.sleeps(), vec![secs(2), secs(3)]);
}

#[tokio::test]
async fn progress_reports_states_and_retries() {
    let client = Arc::new(ScriptedClient::new());
    client.respond("not json").respond(TWO_FINDINGS);
    let clock = Arc::new(ManualClock::new());
    let progress = Collect::default();

    analyzer(&client, &clock, 2)
        .analyze("policy.pdf", &minimal_pdf("x"), &two_rules(), &progress)
        .await
        .unwrap();

    let states: Vec<(u32, AttemptState)> = progress
        .events()
        .into_iter()
        .filter_map(|e| match e {
            AuditProgressEvent::Attempt { attempt, state, .. } => Some((attempt, state)),
            _ => None,
        })
        .collect();
    assert_eq!(states.first(), Some(&(0, AttemptState::Pending)));
    assert!(states.contains(&(0, AttemptState::Parsing)));
    assert!(states.contains(&(0, AttemptState::Retrying)));
    assert_eq!(states.last(), Some(&(1, AttemptState::Done)));

    let retries = progress
        .events()
        .into_iter()
        .filter(|e| matches!(e, AuditProgressEvent::Retry { delay_secs, .. } if *delay_secs == 3.0))
        .count();
    assert_eq!(retries, 1);
}

#[tokio::test]
async fn cancelled_attempt_still_deletes_upload() {
    let client = Arc::new(ScriptedClient::new());
    client.hang_on_state();
    let clock = Arc::new(ManualClock::new());
    let analyzer = analyzer(&client, &clock, 2);

    let bytes = minimal_pdf("x");
    let rules = two_rules();
    let run = analyzer.analyze("policy.pdf", &bytes, &rules, &NoProgress);
    let outcome = tokio::time::timeout(Duration::from_millis(50), run).await;
    assert!(outcome.is_err(), "analysis should still be waiting");

    // The guard spawns the delete when the attempt future is dropped.
    for _ in 0..50 {
        if client.count("delete") > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(client.count("delete"), 1);
    for path in client.staged_paths() {
        assert!(!path.exists());
    }
}

// ============ Batch ============

#[tokio::test]
async fn batch_report_counts_outcomes() {
    let client = Arc::new(ScriptedClient::new());
    client.respond(TWO_FINDINGS);
    let clock = Arc::new(ManualClock::new());
    let analyzer = analyzer(&client, &clock, 2);
    let docs = vec![SourceDocument::memory("policy.pdf", minimal_pdf("Privacy"))];

    let report = run_model_audit(&analyzer, &docs, &two_rules(), &NoProgress).await;

    assert_eq!(report.passed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.warnings, 0);
    assert_eq!(report.compliance_rate, 50);
    assert_eq!(report.document_results.len(), 1);
    assert_eq!(report.document_results[0].document_name, "policy.pdf");
    assert!(report.document_errors.is_empty());
    assert!(report.aborted.is_none());
}

#[tokio::test]
async fn authentication_failure_aborts_the_batch() {
    let client = Arc::new(ScriptedClient::new());
    client.respond(TWO_FINDINGS);
    client.fail_generate(ServiceError::authentication("API key not valid"));
    let clock = Arc::new(ManualClock::new());
    let analyzer = analyzer(&client, &clock, 3);
    let docs = vec![
        SourceDocument::memory("a.pdf", minimal_pdf("a")),
        SourceDocument::memory("b.pdf", minimal_pdf("b")),
        SourceDocument::memory("c.pdf", minimal_pdf("c")),
    ];

    let report = run_model_audit(&analyzer, &docs, &two_rules(), &NoProgress).await;

    assert_eq!(report.document_results.len(), 1);
    assert_eq!(report.document_errors.len(), 1);
    assert_eq!(report.document_errors[0].document_name, "b.pdf");
    let aborted = report.aborted.expect("batch should be aborted");
    assert!(aborted.contains("1 remaining"), "{}", aborted);
    // c.pdf was never uploaded.
    assert_eq!(client.count("upload"), 2);
    assert_eq!(client.count("delete"), 2);
}

#[tokio::test]
async fn rejected_request_fails_only_its_document() {
    let client = Arc::new(ScriptedClient::new());
    client
        .fail_generate(ServiceError::from_status(
            400,
            r#"{"error":{"code":400,"message":"Request payload size exceeds the limit","status":"INVALID_ARGUMENT"}}"#,
        ))
        .respond(TWO_FINDINGS);
    let clock = Arc::new(ManualClock::new());
    let analyzer = analyzer(&client, &clock, 1);
    let docs = vec![
        SourceDocument::memory("huge.pdf", minimal_pdf("h")),
        SourceDocument::memory("policy.pdf", minimal_pdf("p")),
    ];

    let report = run_model_audit(&analyzer, &docs, &two_rules(), &NoProgress).await;

    assert!(report.aborted.is_none());
    assert_eq!(report.document_errors.len(), 1);
    assert_eq!(report.document_errors[0].document_name, "huge.pdf");
    assert!(report.document_errors[0].error.contains("INVALID_ARGUMENT"));
    assert_eq!(report.document_results.len(), 1);
    assert_eq!(report.document_results[0].document_name, "policy.pdf");
    assert_eq!(report.compliance_rate, 50);
}

#[tokio::test]
async fn document_failures_do_not_stop_the_batch() {
    let client = Arc::new(ScriptedClient::new());
    client
        .fail_generate(ServiceError::quota("429"))
        .respond(TWO_FINDINGS);
    let clock = Arc::new(ManualClock::new());
    let analyzer = analyzer(&client, &clock, 1);
    let docs = vec![
        SourceDocument::memory("broken.pdf", b"not a pdf".to_vec()),
        SourceDocument::memory("quota.pdf", minimal_pdf("q")),
        SourceDocument::memory("good.pdf", minimal_pdf("g")),
    ];

    let report = run_model_audit(&analyzer, &docs, &two_rules(), &NoProgress).await;

    let failed: Vec<_> = report
        .document_errors
        .iter()
        .map(|e| e.document_name.as_str())
        .collect();
    assert_eq!(failed, vec!["broken.pdf", "quota.pdf"]);
    assert!(report.document_errors[0].error.contains("unreadable"));
    assert_eq!(report.document_results.len(), 1);
    assert_eq!(report.document_results[0].document_name, "good.pdf");
    assert!(report.aborted.is_none());
    // The unreadable file never reached the service.
    assert_eq!(client.count("upload"), 2);
}

#[tokio::test]
async fn empty_rule_set_makes_no_requests() {
    let client = Arc::new(ScriptedClient::new());
    let clock = Arc::new(ManualClock::new());

    let analysis = analyzer(&client, &clock, 2)
        .analyze("policy.pdf", &minimal_pdf("x"), &[], &NoProgress)
        .await
        .unwrap();

    assert!(analysis.findings.is_empty());
    assert!(client.calls().is_empty());
}
