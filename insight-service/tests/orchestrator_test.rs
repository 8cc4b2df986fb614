mod common;

use common::{Harness, HarnessConfig, PDF_BYTES, PNG_BYTES};
use futures::future::join_all;
use insight_service::backends::{BackendError, Capability, MockBackend};
use insight_service::models::{
    AnalysisPayload, AnalysisProfile, AnalysisStatus, Direction, Navigation, SessionId,
};
use insight_service::orchestrator::{
    ErrorClass, OrchestratorError, Reanalysis, UnitOutcome, UploadRequest,
};
use insight_service::services::{StoreConfig, StoreError};
use insight_service::sessions::{BusyPolicy, RegistryConfig, RegistryError};
use std::sync::Arc;
use std::time::Duration;

fn pdf() -> UploadRequest {
    UploadRequest {
        bytes: PDF_BYTES.to_vec(),
        declared_kind: "application/pdf".to_string(),
        profile: None,
        language: None,
    }
}

fn png(profile: Option<AnalysisProfile>) -> UploadRequest {
    UploadRequest {
        bytes: PNG_BYTES.to_vec(),
        declared_kind: "form.png".to_string(),
        profile,
        language: Some("en".to_string()),
    }
}

fn session_of(outcome: &UnitOutcome) -> SessionId {
    outcome.session.session_id.clone()
}

fn next() -> Navigation {
    Navigation::Relative(Direction::Next)
}

#[tokio::test]
async fn unit_count_matches_rendered_pages() {
    let harness = Harness::new(MockBackend::new());

    for pages in [1, 3, 7] {
        harness.mock.set_pages(pages);
        let outcome = harness.orchestrator.upload(pdf()).await.unwrap();
        assert_eq!(outcome.session.unit_count, pages);
        assert_eq!(outcome.unit, 0);
    }

    let image = harness.orchestrator.upload(png(None)).await.unwrap();
    assert_eq!(image.session.unit_count, 1);
    assert_eq!(image.session.profile, AnalysisProfile::Form);
}

#[tokio::test]
async fn first_unit_is_analyzed_eagerly_and_the_rest_lazily() {
    let harness = Harness::new(MockBackend::new().with_pages(3));

    let outcome = harness.orchestrator.upload(pdf()).await.unwrap();
    assert_eq!(outcome.result.status, AnalysisStatus::Succeeded);
    assert!(!outcome.cached);
    assert_eq!(harness.mock.calls(Capability::Render), 1);
    // Only page 1 is summarized on upload.
    assert_eq!(harness.mock.calls(Capability::Summarize), 1);

    match outcome.result.payload.as_ref() {
        Some(AnalysisPayload::Page { text, explanation }) => {
            assert_eq!(text, "Page 1 text");
            assert_eq!(explanation, "[en] Summary of Page 1 text");
        }
        other => panic!("unexpected payload {:?}", other),
    }
}

#[tokio::test]
async fn navigation_clamps_at_both_ends() {
    let harness = Harness::new(MockBackend::new().with_pages(3));
    let id = session_of(&harness.orchestrator.upload(pdf()).await.unwrap());

    let before_first = harness
        .orchestrator
        .navigate(&id, Navigation::Relative(Direction::Previous))
        .await
        .unwrap();
    assert_eq!(before_first.unit, 0);
    assert_eq!(before_first.session.cursor, 0);

    let far = harness
        .orchestrator
        .navigate(&id, Navigation::Index(42))
        .await
        .unwrap();
    assert_eq!(far.unit, 2);

    let past_last = harness.orchestrator.navigate(&id, next()).await.unwrap();
    assert_eq!(past_last.unit, 2);
    assert_eq!(past_last.session.cursor, 2);

    let negative = harness
        .orchestrator
        .navigate(&id, Navigation::Index(-5))
        .await
        .unwrap();
    assert_eq!(negative.unit, 0);
}

#[tokio::test]
async fn cached_units_are_served_without_backend_calls() {
    let harness = Harness::new(MockBackend::new().with_pages(3));
    let id = session_of(&harness.orchestrator.upload(pdf()).await.unwrap());

    let first = harness
        .orchestrator
        .navigate(&id, Navigation::Index(1))
        .await
        .unwrap();
    assert!(!first.cached);
    let calls = harness.mock.total_calls();

    let second = harness
        .orchestrator
        .navigate(&id, Navigation::Index(1))
        .await
        .unwrap();
    let third = harness.orchestrator.unit(&id, 1, None).await.unwrap();

    assert!(second.cached);
    assert!(third.cached);
    assert_eq!(harness.mock.total_calls(), calls);
    assert!(Arc::ptr_eq(&first.result, &second.result));
    assert_eq!(
        serde_json::to_vec(&*first.result).unwrap(),
        serde_json::to_vec(&*third.result).unwrap()
    );
}

#[tokio::test]
async fn three_page_document_scenario() {
    let harness = Harness::new(MockBackend::new().with_pages(3));

    let upload = harness.orchestrator.upload(pdf()).await.unwrap();
    let id = session_of(&upload);
    assert_eq!(upload.session.unit_count, 3);
    assert!(upload.result.is_success());

    let lazy = harness
        .orchestrator
        .navigate(&id, Navigation::Index(2))
        .await
        .unwrap();
    assert!(lazy.result.is_success());
    assert!(!lazy.cached);
    let calls = harness.mock.total_calls();

    let again = harness
        .orchestrator
        .navigate(&id, Navigation::Index(2))
        .await
        .unwrap();
    assert!(again.cached);
    assert_eq!(again.result, lazy.result);
    assert_eq!(harness.mock.total_calls(), calls);

    harness.orchestrator.close(&id).await.unwrap();
    assert!(matches!(
        harness.orchestrator.session(&id),
        Err(OrchestratorError::Registry(RegistryError::NotFound(_)))
    ));
    assert_eq!(harness.store.staged_count(), 0);
}

#[tokio::test]
async fn timeouts_past_the_retry_budget_yield_a_failed_unit() {
    let harness = Harness::new(MockBackend::new().with_pages(3));
    let id = session_of(&harness.orchestrator.upload(pdf()).await.unwrap());

    harness.mock.stall_next(Capability::Summarize, 2);
    let failed = harness
        .orchestrator
        .navigate(&id, Navigation::Index(1))
        .await
        .unwrap();
    assert_eq!(failed.unit, 1);
    assert_eq!(failed.result.status, AnalysisStatus::Failed);
    assert_eq!(failed.result.attempts, 2);
    assert!(failed.result.payload.is_none());
    assert!(failed.result.error.is_some());

    // The session stays usable for other units.
    let other = harness
        .orchestrator
        .navigate(&id, Navigation::Index(2))
        .await
        .unwrap();
    assert!(other.result.is_success());

    // Failures are not cached: the next visit asks the backend again.
    let retried = harness
        .orchestrator
        .navigate(&id, Navigation::Index(1))
        .await
        .unwrap();
    assert!(retried.result.is_success());
    assert!(!retried.cached);
}

#[tokio::test]
async fn one_transient_failure_is_absorbed_by_the_retry() {
    let harness = Harness::new(MockBackend::new().with_pages(2));
    let id = session_of(&harness.orchestrator.upload(pdf()).await.unwrap());

    harness.mock.stall_next(Capability::Summarize, 1);
    let outcome = harness
        .orchestrator
        .navigate(&id, Navigation::Index(1))
        .await
        .unwrap();
    assert!(outcome.result.is_success());
    assert_eq!(outcome.result.attempts, 2);
}

#[tokio::test]
async fn analysis_deadline_marks_the_unit_timed_out() {
    let mut config = HarnessConfig::default();
    config.orchestrator.retry.max_retries = 5;
    config.orchestrator.analysis_deadline = Duration::from_millis(150);
    let harness = Harness::with_config(MockBackend::new().with_pages(2), config);
    let id = session_of(&harness.orchestrator.upload(pdf()).await.unwrap());

    harness.mock.stall_next(Capability::Summarize, 6);
    let outcome = harness
        .orchestrator
        .navigate(&id, Navigation::Index(1))
        .await
        .unwrap();
    assert_eq!(outcome.result.status, AnalysisStatus::TimedOut);
}

#[tokio::test]
async fn invalid_input_is_not_retried_and_propagates() {
    let harness = Harness::new(MockBackend::new().with_pages(2));
    let id = session_of(&harness.orchestrator.upload(pdf()).await.unwrap());

    harness.mock.fail_next(
        Capability::Summarize,
        BackendError::InvalidInput("unreadable page".to_string()),
    );
    let before = harness.mock.calls(Capability::Summarize);
    let result = harness
        .orchestrator
        .navigate(&id, Navigation::Index(1))
        .await;

    assert!(matches!(
        result,
        Err(OrchestratorError::Backend(BackendError::InvalidInput(_)))
    ));
    assert_eq!(harness.mock.calls(Capability::Summarize), before + 1);
    let session = harness.orchestrator.session(&id).unwrap();
    assert_eq!(session.cursor, 0, "a rejected navigation must not move the cursor");
}

#[tokio::test]
async fn distinct_sessions_proceed_in_parallel() {
    let harness = Harness::new(
        MockBackend::new()
            .with_pages(3)
            .with_latency(Duration::from_millis(30)),
    );

    let mut ids = Vec::new();
    for _ in 0..8 {
        ids.push(session_of(&harness.orchestrator.upload(pdf()).await.unwrap()));
    }

    let results = join_all(
        ids.iter()
            .map(|id| harness.orchestrator.navigate(id, Navigation::Index(2))),
    )
    .await;

    assert!(results.iter().all(|result| result.is_ok()));
    assert!(harness.mock.peak_in_flight() > 1);
}

#[tokio::test]
async fn same_session_requests_serialize() {
    let mut config = HarnessConfig::default();
    config.registry.busy_policy = BusyPolicy::Wait(Duration::from_secs(5));
    let harness = Harness::with_config(
        MockBackend::new()
            .with_pages(5)
            .with_latency(Duration::from_millis(20)),
        config,
    );
    let id = session_of(&harness.orchestrator.upload(pdf()).await.unwrap());

    let results = join_all(
        (1..5).map(|index| harness.orchestrator.navigate(&id, Navigation::Index(index))),
    )
    .await;

    for (offset, result) in results.into_iter().enumerate() {
        let outcome = result.unwrap();
        assert_eq!(outcome.unit, offset + 1);
        assert!(outcome.result.is_success());
    }
    // Never two backend calls for the same session at once.
    assert_eq!(harness.mock.peak_in_flight(), 1);
}

#[tokio::test]
async fn second_request_on_a_busy_session_fails_fast() {
    let harness = Harness::new(
        MockBackend::new()
            .with_pages(3)
            .with_latency(Duration::from_millis(50)),
    );
    let id = session_of(&harness.orchestrator.upload(pdf()).await.unwrap());

    let (slow, busy) = tokio::join!(
        harness.orchestrator.navigate(&id, Navigation::Index(1)),
        harness.orchestrator.navigate(&id, Navigation::Index(2)),
    );

    assert!(slow.is_ok());
    assert!(matches!(
        busy,
        Err(OrchestratorError::Registry(RegistryError::Busy(_)))
    ));
}

#[tokio::test]
async fn expired_sessions_are_swept_and_release_their_artifact() {
    let mut config = HarnessConfig::default();
    config.registry.ttl = Duration::from_millis(50);
    let harness = Harness::with_config(MockBackend::new(), config);

    let id = session_of(&harness.orchestrator.upload(png(None)).await.unwrap());
    assert_eq!(harness.store.staged_count(), 1);

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(harness.registry.sweep_expired().await, 1);

    assert!(matches!(
        harness.orchestrator.session(&id),
        Err(OrchestratorError::Registry(RegistryError::NotFound(_)))
    ));
    assert_eq!(harness.store.staged_count(), 0);
}

#[tokio::test]
async fn capacity_evicts_the_least_recently_accessed_session() {
    let mut config = HarnessConfig::default();
    config.registry = RegistryConfig {
        capacity: 2,
        ..Default::default()
    };
    let harness = Harness::with_config(MockBackend::new(), config);

    let first = session_of(&harness.orchestrator.upload(png(None)).await.unwrap());
    let second = session_of(&harness.orchestrator.upload(png(None)).await.unwrap());
    harness.orchestrator.session(&first).unwrap();

    let third = session_of(&harness.orchestrator.upload(png(None)).await.unwrap());

    assert!(harness.orchestrator.session(&first).is_ok());
    assert!(harness.orchestrator.session(&third).is_ok());
    assert!(matches!(
        harness.orchestrator.navigate(&second, next()).await,
        Err(OrchestratorError::Registry(RegistryError::NotFound(_)))
    ));
    assert_eq!(harness.store.staged_count(), 2);
}

#[tokio::test]
async fn failed_upload_leaves_no_state_behind() {
    let mut config = HarnessConfig::default();
    config.store = StoreConfig {
        max_staged: 1,
        ..Default::default()
    };
    let harness = Harness::with_config(MockBackend::new(), config);

    harness.mock.fail_next(
        Capability::Render,
        BackendError::InvalidInput("corrupt pdf".to_string()),
    );
    assert!(matches!(
        harness.orchestrator.upload(pdf()).await,
        Err(OrchestratorError::Backend(BackendError::InvalidInput(_)))
    ));
    assert_eq!(harness.store.staged_count(), 0);
    assert!(harness.registry.is_empty());

    harness.orchestrator.upload(png(None)).await.unwrap();
    assert!(matches!(
        harness.orchestrator.upload(png(None)).await,
        Err(OrchestratorError::Store(StoreError::CapacityExceeded { max: 1 }))
    ));
    assert_eq!(harness.registry.len(), 1);
}

#[tokio::test]
async fn rejects_bad_uploads_before_staging() {
    let harness = Harness::new(MockBackend::new());

    let unsupported = harness
        .orchestrator
        .upload(UploadRequest {
            bytes: b"hello".to_vec(),
            declared_kind: "text/plain".to_string(),
            profile: None,
            language: None,
        })
        .await;
    assert!(matches!(
        unsupported,
        Err(OrchestratorError::Store(StoreError::UnsupportedKind(_)))
    ));

    let mismatch = harness
        .orchestrator
        .upload(UploadRequest {
            profile: Some(AnalysisProfile::Currency),
            ..pdf()
        })
        .await;
    assert!(matches!(
        mismatch,
        Err(OrchestratorError::ProfileMismatch { .. })
    ));

    harness.mock.set_pages(0);
    assert!(matches!(
        harness.orchestrator.upload(pdf()).await,
        Err(OrchestratorError::NoUnits)
    ));

    harness.mock.set_pages(500);
    assert!(matches!(
        harness.orchestrator.upload(pdf()).await,
        Err(OrchestratorError::TooManyUnits { count: 500, .. })
    ));

    assert_eq!(harness.store.staged_count(), 0);
    assert_eq!(harness.mock.calls(Capability::Summarize), 0);
}

#[tokio::test]
async fn rendered_pages_beyond_the_byte_cap_are_rejected() {
    let mut config = HarnessConfig::default();
    // Three mock pages of six bytes each.
    config.orchestrator.max_rendered_bytes = 17;
    let harness = Harness::with_config(MockBackend::new().with_pages(3), config);

    let rejected = harness.orchestrator.upload(pdf()).await;
    assert!(matches!(
        rejected,
        Err(OrchestratorError::RenderedTooLarge { size: 18, max: 17 })
    ));
    assert_eq!(rejected.unwrap_err().class(), ErrorClass::Input);
    assert_eq!(harness.store.staged_count(), 0);
    assert!(harness.registry.is_empty());
    assert_eq!(harness.mock.calls(Capability::Summarize), 0);

    harness.mock.set_pages(2);
    let accepted = harness.orchestrator.upload(pdf()).await.unwrap();
    assert_eq!(accepted.session.unit_count, 2);
}

#[tokio::test]
async fn saturated_admission_gate_rejects_with_overloaded() {
    let mut config = HarnessConfig::default();
    config.orchestrator.max_in_flight = 1;
    let harness = Harness::with_config(
        MockBackend::new().with_latency(Duration::from_millis(50)),
        config,
    );

    let (first, second) = tokio::join!(
        harness.orchestrator.upload(png(None)),
        harness.orchestrator.upload(png(None)),
    );

    assert!(first.is_ok());
    assert!(matches!(
        second,
        Err(OrchestratorError::Overloaded { limit: 1 })
    ));
    assert_eq!(harness.orchestrator.gate().in_flight(), 0);
}

#[tokio::test]
async fn overloaded_requests_leave_the_cursor_in_place() {
    let mut config = HarnessConfig::default();
    config.orchestrator.max_in_flight = 1;
    let harness = Harness::with_config(MockBackend::new().with_pages(3), config);
    let id = session_of(&harness.orchestrator.upload(pdf()).await.unwrap());

    let held = harness.orchestrator.gate().try_admit().unwrap();

    let navigation = harness
        .orchestrator
        .navigate(&id, Navigation::Index(2))
        .await;
    assert!(matches!(
        navigation,
        Err(OrchestratorError::Overloaded { limit: 1 })
    ));
    assert_eq!(harness.orchestrator.session(&id).unwrap().cursor, 0);

    let read = harness.orchestrator.unit(&id, 1, None).await;
    assert!(matches!(read, Err(OrchestratorError::Overloaded { .. })));
    let reanalysis = harness
        .orchestrator
        .reanalyze(&id, 2, Reanalysis::default())
        .await;
    assert!(matches!(reanalysis, Err(OrchestratorError::Overloaded { .. })));
    assert_eq!(harness.orchestrator.session(&id).unwrap().cursor, 0);

    drop(held);
    let retried = harness.orchestrator.navigate(&id, next()).await.unwrap();
    assert_eq!(retried.unit, 1, "a retried relative step must not skip a unit");
    assert_eq!(retried.session.cursor, 1);
}

#[tokio::test]
async fn close_during_analysis_discards_the_late_result() {
    let harness = Harness::new(
        MockBackend::new()
            .with_pages(2)
            .with_latency(Duration::from_millis(60)),
    );
    let id = session_of(&harness.orchestrator.upload(pdf()).await.unwrap());

    let (navigation, closed) = tokio::join!(
        harness.orchestrator.navigate(&id, Navigation::Index(1)),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            harness.orchestrator.close(&id).await
        }
    );

    assert!(closed.is_ok());
    assert!(matches!(
        navigation,
        Err(OrchestratorError::Registry(RegistryError::NotFound(_)))
    ));
    assert!(harness.registry.is_empty());
}

#[tokio::test]
async fn reanalysis_adds_a_version_and_keeps_the_original() {
    let harness = Harness::new(MockBackend::new());
    let upload = harness.orchestrator.upload(png(None)).await.unwrap();
    let id = session_of(&upload);
    assert_eq!(upload.result.version, 0);

    let reanalyzed = harness
        .orchestrator
        .reanalyze(
            &id,
            0,
            Reanalysis {
                language: Some("fr".to_string()),
                hint: Some("The second field is a birth date".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(reanalyzed.result.version, 1);
    assert!(!reanalyzed.cached);

    let original = harness.orchestrator.unit(&id, 0, Some(0)).await.unwrap();
    assert!(original.cached);
    assert_eq!(original.result, upload.result);

    let latest = harness.orchestrator.unit(&id, 0, None).await.unwrap();
    assert_eq!(latest.result.version, 1);

    assert!(matches!(
        harness.orchestrator.unit(&id, 0, Some(2)).await,
        Err(OrchestratorError::UnknownVersion { unit: 0, version: 2 })
    ));
    assert!(matches!(
        harness.orchestrator.unit(&id, 3, None).await,
        Err(OrchestratorError::InvalidUnit {
            index: 3,
            unit_count: 1
        })
    ));
}

#[tokio::test]
async fn form_profile_associates_text_with_detected_fields() {
    let harness = Harness::new(MockBackend::new());
    let outcome = harness.orchestrator.upload(png(None)).await.unwrap();

    match outcome.result.payload.as_ref() {
        Some(AnalysisPayload::Form {
            fields,
            explanation,
            ..
        }) => {
            assert_eq!(fields.len(), 2);
            assert_eq!(fields[0].field_type, "name");
            assert_eq!(fields[0].value.as_deref(), Some("Jane Doe"));
            assert_eq!(fields[1].value.as_deref(), Some("2024-01-31"));
            assert!(explanation.starts_with("[en] Summary of"));
        }
        other => panic!("unexpected payload {:?}", other),
    }
}

#[tokio::test]
async fn currency_profile_reads_the_image() {
    let harness = Harness::new(MockBackend::new());
    let outcome = harness
        .orchestrator
        .upload(png(Some(AnalysisProfile::Currency)))
        .await
        .unwrap();

    assert_eq!(harness.mock.calls(Capability::DetectRegions), 0);
    match outcome.result.payload.as_ref() {
        Some(AnalysisPayload::Currency { reading }) => {
            assert!(reading.starts_with("[en] Summary of"));
        }
        other => panic!("unexpected payload {:?}", other),
    }
}

#[tokio::test]
async fn unit_speech_is_synthesized_once_per_version() {
    let harness = Harness::new(MockBackend::new().with_pages(2));
    let id = session_of(&harness.orchestrator.upload(pdf()).await.unwrap());

    let first = harness.orchestrator.speak_unit(&id, 0).await.unwrap();
    let second = harness.orchestrator.speak_unit(&id, 0).await.unwrap();

    assert_eq!(first.version, 0);
    assert_eq!(first.clip.mime_type, "audio/wav");
    assert!(Arc::ptr_eq(&first.clip, &second.clip));
    assert_eq!(harness.mock.calls(Capability::SynthesizeSpeech), 1);

    // Unit 1 was never visited; it is analyzed before it is narrated.
    harness.orchestrator.speak_unit(&id, 1).await.unwrap();
    assert_eq!(harness.mock.calls(Capability::Summarize), 2);
}

#[tokio::test]
async fn stateless_synthesis_rejects_empty_text() {
    let harness = Harness::new(MockBackend::new());

    assert!(matches!(
        harness.orchestrator.synthesize("   ", None).await,
        Err(OrchestratorError::InvalidRequest(_))
    ));

    let clip = harness
        .orchestrator
        .synthesize("مرحبا", Some("ar"))
        .await
        .unwrap();
    assert_eq!(clip.language, "ar");
    assert!(!clip.audio.is_empty());
}
