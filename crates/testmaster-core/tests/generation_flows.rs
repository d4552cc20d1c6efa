//! End-to-end generation scenarios against in-memory storage and a scripted
//! provider.

mod common;

use std::sync::Arc;

use uuid::Uuid;

use common::{ScriptedProvider, executor, fenced};
use testmaster_core::ai::{GenerationError, GenerationTask, ModelPatch};
use testmaster_core::generate::{
    BatchFlow, BatchKind, BatchRequest, FlowError, GenerationOptions, GenerationRequest,
    SingleItemFlow,
};
use testmaster_core::records::{DomainRecord, GeneratedRecord};
use testmaster_core::review::{ReviewError, ReviewStatus};
use testmaster_core::storage::{MemoryStorage, Storage};
use testmaster_db::models::{CaseType, ExecutionStatus, NewTestCase, NewTestPlan, Priority};

const PLAN_JSON: &str = r#"{
    "title": "Checkout test plan",
    "description": "Covers the checkout flow",
    "objective": "Verify payments",
    "scope": "Web checkout",
    "approach": "Manual and automated",
    "acceptance_criteria": "No critical defects",
    "resources": "2 testers",
    "schedule": "Sprint 12",
    "risks": "Payment gateway sandbox outages"
}"#;

fn plan_request(description: &str) -> GenerationRequest {
    GenerationRequest::Plan {
        description: description.into(),
        requirements: "Card and PayPal".into(),
        context: None,
    }
}

#[tokio::test]
async fn single_plan_generation_persists_ai_plan() {
    let provider = ScriptedProvider::new(&[fenced(PLAN_JSON)]);
    let storage = Arc::new(MemoryStorage::new());
    let flow = SingleItemFlow::new(executor(provider.clone()), storage.clone());
    let owner = Uuid::new_v4();

    let record = flow
        .generate_one(plan_request("Online checkout"), owner)
        .await
        .unwrap();

    let DomainRecord::Plan(plan) = record else {
        panic!("expected a plan");
    };
    assert!(plan.generated_by_ai);
    assert_eq!(plan.owner_id, owner);
    assert_eq!(plan.title, "Checkout test plan");
    assert_eq!(plan.risks, "Payment gateway sandbox outages");
    assert_eq!(storage.get_plan(plan.id).await.unwrap(), Some(plan));

    let prompt = provider.last_prompt().unwrap();
    assert!(prompt.contains("Online checkout"));
    assert!(prompt.contains("Card and PayPal"));
    assert!(!prompt.contains("Additional context"));
}

#[tokio::test]
async fn validation_happens_before_any_provider_call() {
    let provider = ScriptedProvider::new(&[fenced(PLAN_JSON)]);
    let storage = Arc::new(MemoryStorage::new());
    let flow = SingleItemFlow::new(executor(provider.clone()), storage);
    let owner = Uuid::new_v4();

    let err = flow.generate_one(plan_request("   "), owner).await.unwrap_err();
    assert!(matches!(err, FlowError::Validation(_)));

    let err = flow
        .generate_one(
            GenerationRequest::Case {
                plan_id: Some(Uuid::new_v4()),
                feature: "Login".into(),
                requirements: String::new(),
                case_type: CaseType::Functional,
                priority: Priority::High,
            },
            owner,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Validation(msg) if msg.contains("not found")));

    let err = flow
        .generate_one(
            GenerationRequest::Execution {
                case_id: Some(Uuid::new_v4()),
                plan_id: None,
                environment: String::new(),
                notes: String::new(),
            },
            owner,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Validation(_)));

    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn case_generation_uses_plan_context_and_request_defaults() {
    let provider = ScriptedProvider::new(&[fenced(
        r#"{"title": "Login with valid credentials",
            "steps": [{"step_number": 1, "action": "Open login", "expected_result": "Form shown"}],
            "expected_result": "User is signed in"}"#,
    )]);
    let storage = Arc::new(MemoryStorage::new());
    let owner = Uuid::new_v4();
    let plan = storage
        .create_plan(&NewTestPlan {
            owner_id: owner,
            title: "Auth plan".into(),
            scope: "SSO and password login".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let flow = SingleItemFlow::new(executor(provider.clone()), storage.clone());

    let record = flow
        .generate_one(
            GenerationRequest::Case {
                plan_id: Some(plan.id),
                feature: "Password login".into(),
                requirements: String::new(),
                case_type: CaseType::Security,
                priority: Priority::Critical,
            },
            owner,
        )
        .await
        .unwrap();

    let DomainRecord::Case(case) = record else {
        panic!("expected a case");
    };
    assert_eq!(case.plan_id, Some(plan.id));
    assert_eq!(case.priority, Priority::Critical);
    assert_eq!(case.case_type, CaseType::Security);
    assert_eq!(case.steps.len(), 1);
    assert!(case.generated_by_ai);

    let prompt = provider.last_prompt().unwrap();
    assert!(prompt.contains("Auth plan"));
    assert!(prompt.contains("SSO and password login"));
}

#[tokio::test]
async fn another_users_plan_or_case_cannot_be_referenced() {
    let provider = ScriptedProvider::new(&[fenced(r#"{"cases": [{"title": "x"}]}"#)]);
    let storage = Arc::new(MemoryStorage::new());
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let plan = storage
        .create_plan(&NewTestPlan {
            owner_id: alice,
            title: "Alice's plan".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let case = storage
        .create_case(&NewTestCase {
            owner_id: alice,
            plan_id: Some(plan.id),
            title: "Alice's case".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let single = SingleItemFlow::new(executor(provider.clone()), storage.clone());
    let batch = BatchFlow::new(executor(provider.clone()), storage.clone());

    let err = single
        .generate_one(
            GenerationRequest::Case {
                plan_id: Some(plan.id),
                feature: "Password login".into(),
                requirements: String::new(),
                case_type: CaseType::Functional,
                priority: Priority::Medium,
            },
            bob,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Validation(_)));

    let err = single
        .generate_one(
            GenerationRequest::Execution {
                case_id: Some(case.id),
                plan_id: Some(plan.id),
                environment: String::new(),
                notes: String::new(),
            },
            bob,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Validation(_)));

    let err = batch
        .generate_batch(
            BatchRequest {
                kind: BatchKind::Cases,
                document: "Users log in.".into(),
                context: None,
                plan_id: Some(plan.id),
            },
            bob,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Validation(_)));

    // Rejected before the provider was asked for anything.
    assert_eq!(provider.calls(), 0);
    assert!(storage.list_cases(bob, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn execution_generation_without_active_model_fails_fast() {
    let provider = ScriptedProvider::new(&["{}"]);
    let storage = Arc::new(MemoryStorage::new());
    let owner = Uuid::new_v4();
    let plan = storage
        .create_plan(&NewTestPlan {
            owner_id: owner,
            title: "p".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let case = storage
        .create_case(&NewTestCase {
            owner_id: owner,
            plan_id: Some(plan.id),
            title: "c".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let exec = executor(provider.clone());
    {
        let mut registry = exec.registry().write().await;
        let ids: Vec<String> = registry.models().iter().map(|m| m.id.clone()).collect();
        for id in ids {
            registry.update_model(
                &id,
                ModelPatch {
                    active: Some(false),
                    ..Default::default()
                },
            );
        }
    }
    let flow = SingleItemFlow::new(exec, storage.clone());

    let err = flow
        .generate_one(
            GenerationRequest::Execution {
                case_id: Some(case.id),
                plan_id: Some(plan.id),
                environment: "staging".into(),
                notes: String::new(),
            },
            owner,
        )
        .await
        .unwrap_err();

    match err {
        FlowError::Generation(e @ GenerationError::NoActiveModel { .. }) => {
            assert_eq!(e.user_message(), "generation unavailable, check configuration");
        }
        other => panic!("expected NoActiveModel, got {other:?}"),
    }
    assert_eq!(provider.calls(), 0);
    assert!(storage.list_executions(owner, None, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn prose_response_persists_nothing() {
    let provider = ScriptedProvider::new(&["I think the plan should focus on checkout."]);
    let storage = Arc::new(MemoryStorage::new());
    let flow = SingleItemFlow::new(executor(provider), storage.clone());
    let owner = Uuid::new_v4();

    let err = flow
        .generate_one(plan_request("Checkout"), owner)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        FlowError::Generation(GenerationError::MalformedResponse { .. })
    ));
    assert!(storage.list_plans(owner).await.unwrap().is_empty());
}

#[tokio::test]
async fn execution_generation_links_parents() {
    let provider = ScriptedProvider::new(&[fenced(
        r#"{"status": "passed", "actual_result": "Signed in", "notes": "Chrome 120"}"#,
    )]);
    let storage = Arc::new(MemoryStorage::new());
    let owner = Uuid::new_v4();
    let plan = storage
        .create_plan(&NewTestPlan {
            owner_id: owner,
            title: "p".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let case = storage
        .create_case(&NewTestCase {
            owner_id: owner,
            plan_id: Some(plan.id),
            title: "c".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let flow = SingleItemFlow::new(executor(provider), storage.clone());

    let record = flow
        .generate_one(
            GenerationRequest::Execution {
                case_id: Some(case.id),
                plan_id: Some(plan.id),
                environment: "staging".into(),
                notes: String::new(),
            },
            owner,
        )
        .await
        .unwrap();
    let DomainRecord::Execution(exec) = record else {
        panic!("expected an execution");
    };
    assert_eq!(exec.status, ExecutionStatus::Passed);
    assert_eq!((exec.plan_id, exec.case_id), (plan.id, case.id));
}

#[tokio::test]
async fn persistence_failure_returns_generated_content() {
    let provider = ScriptedProvider::new(&[fenced(PLAN_JSON)]);
    let storage = Arc::new(MemoryStorage::new());
    let flow = SingleItemFlow::new(executor(provider), storage.clone());

    // Context loading for plans touches no storage, so only the insert fails.
    storage.set_unavailable(true);
    let err = flow
        .generate_one(plan_request("Checkout"), Uuid::new_v4())
        .await
        .unwrap_err();

    match err {
        FlowError::Persistence { record, .. } => {
            assert_eq!(record.title(), "Checkout test plan");
        }
        other => panic!("expected Persistence, got {other:?}"),
    }
}

#[tokio::test]
async fn explicit_template_choice_is_honoured() {
    let provider = ScriptedProvider::new(&[fenced(PLAN_JSON)]);
    let exec = executor(provider.clone());
    let custom = {
        let mut registry = exec.registry().write().await;
        registry.add_template(testmaster_core::ai::NewTemplate {
            name: "terse".into(),
            task: GenerationTask::PlanGeneration,
            content: "PLAN FOR {{description}}".into(),
            parameters: vec![],
            active: true,
        })
    };
    let flow = SingleItemFlow::new(exec, Arc::new(MemoryStorage::new()));

    flow.generate_one_with(
        plan_request("payments"),
        Uuid::new_v4(),
        &GenerationOptions {
            model_id: Some("openai-default".into()),
            template_id: Some(custom.id),
        },
    )
    .await
    .unwrap();

    assert_eq!(provider.last_prompt().unwrap(), "PLAN FOR payments");
}

// ---------------------------------------------------------------------------
// Batch + review
// ---------------------------------------------------------------------------

const THREE_CASES: &str = r#"{"cases": [
    {"title": "Valid login", "priority": "high", "type": "functional"},
    {"title": "Wrong password", "priority": "medium", "type": "security"},
    {"title": "Locked account", "priority": "low", "type": "security"}
]}"#;

#[tokio::test]
async fn batch_review_persists_only_approved() {
    let provider = ScriptedProvider::new(&[fenced(THREE_CASES)]);
    let storage = Arc::new(MemoryStorage::new());
    let flow = BatchFlow::new(executor(provider.clone()), storage.clone());
    let owner = Uuid::new_v4();

    let mut session = flow
        .generate_batch(
            BatchRequest {
                kind: BatchKind::Cases,
                document: "Users sign in with email and password.".into(),
                context: None,
                plan_id: None,
            },
            owner,
        )
        .await
        .unwrap();

    assert_eq!(session.items().len(), 3);
    assert!(session.items().iter().all(|i| i.status == ReviewStatus::Pending));
    assert!(storage.list_cases(owner, None).await.unwrap().is_empty());

    let ids: Vec<Uuid> = session.items().iter().map(|i| i.id).collect();
    session.approve(ids[1]).unwrap();
    session.reject(ids[0]).unwrap();
    session.reject(ids[2]).unwrap();

    let report = session.persist_approved(storage.as_ref()).await;
    assert_eq!(report.persisted.len(), 1);

    let stored = storage.list_cases(owner, None).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].title, "Wrong password");
    assert!(stored[0].generated_by_ai);

    // The decomposition prompt went through the general completion template.
    let prompt = provider.last_prompt().unwrap();
    assert!(prompt.contains("Users sign in with email and password."));
    assert!(prompt.contains("\"cases\""));
}

#[tokio::test]
async fn batch_requires_item_array() {
    let provider = ScriptedProvider::new(&[fenced(r#"{"plans": {"title": "not an array"}}"#)]);
    let flow = BatchFlow::new(executor(provider), Arc::new(MemoryStorage::new()));

    let err = flow
        .generate_batch(
            BatchRequest {
                kind: BatchKind::Plans,
                document: "doc".into(),
                context: None,
                plan_id: None,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FlowError::Generation(GenerationError::InvalidBatchShape { expected: "plans" })
    ));
}

#[tokio::test]
async fn batch_skips_non_object_elements_and_allows_empty() {
    let provider = ScriptedProvider::new(&[
        fenced(r#"{"plans": [{"title": "A"}, "stray", 3, {"title": "B"}]}"#),
        fenced(r#"{"plans": []}"#),
    ]);
    let flow = BatchFlow::new(executor(provider), Arc::new(MemoryStorage::new()));
    let request = BatchRequest {
        kind: BatchKind::Plans,
        document: "doc".into(),
        context: Some("web only".into()),
        plan_id: None,
    };

    let session = flow
        .generate_batch(request.clone(), Uuid::new_v4())
        .await
        .unwrap();
    let titles: Vec<String> = session.items().iter().map(|i| i.record.title()).collect();
    assert_eq!(titles, vec!["A", "B"]);

    let session = flow.generate_batch(request, Uuid::new_v4()).await.unwrap();
    assert!(session.is_empty());
}

#[tokio::test]
async fn regeneration_round_trip_returns_item_to_pending() {
    let provider = ScriptedProvider::new(&[
        fenced(THREE_CASES),
        fenced(r#"{"title": "Locked account after 5 failures", "priority": "critical"}"#),
    ]);
    let storage = Arc::new(MemoryStorage::new());
    let flow = BatchFlow::new(executor(provider.clone()), storage.clone());
    let owner = Uuid::new_v4();

    let mut session = flow
        .generate_batch(
            BatchRequest {
                kind: BatchKind::Cases,
                document: "login".into(),
                context: None,
                plan_id: None,
            },
            owner,
        )
        .await
        .unwrap();
    let ids: Vec<Uuid> = session.items().iter().map(|i| i.id).collect();
    let untouched = session.items()[0].clone();

    let item = session
        .regenerate(ids[2], "mention the failure threshold", &flow)
        .await
        .unwrap();
    assert_eq!(item.status, ReviewStatus::Pending);
    assert_eq!(item.record.title(), "Locked account after 5 failures");
    assert_eq!(item.feedback, vec!["mention the failure threshold".to_string()]);
    match &item.record {
        GeneratedRecord::Case(c) => {
            assert_eq!(c.priority, Priority::Critical);
            assert_eq!(c.case_type, CaseType::Security);
            assert_eq!(c.owner_id, owner);
        }
        other => panic!("expected a case, got {other:?}"),
    }
    assert!(provider.last_prompt().unwrap().contains("mention the failure threshold"));
    assert_eq!(session.items()[0], untouched);

    // Approved items cannot be regenerated.
    session.approve(ids[0]).unwrap();
    let err = session.regenerate(ids[0], "x", &flow).await.unwrap_err();
    assert!(matches!(err, ReviewError::InvalidTransition { .. }));
}

#[tokio::test]
async fn failed_regeneration_still_returns_item_to_pending() {
    let provider = ScriptedProvider::new(&[fenced(THREE_CASES), "no json here".to_string()]);
    let flow = BatchFlow::new(executor(provider), Arc::new(MemoryStorage::new()));

    let mut session = flow
        .generate_batch(
            BatchRequest {
                kind: BatchKind::Cases,
                document: "login".into(),
                context: None,
                plan_id: None,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();
    let id = session.items()[1].id;
    let before = session.items()[1].record.clone();

    let err = session.regenerate(id, "shorter", &flow).await.unwrap_err();
    assert!(matches!(
        err,
        ReviewError::Generation(GenerationError::MalformedResponse { .. })
    ));
    let item = session.view_details(id).unwrap();
    assert_eq!(item.status, ReviewStatus::Pending);
    assert_eq!(item.record, before);
}
