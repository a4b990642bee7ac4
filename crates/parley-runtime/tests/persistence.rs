#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;

use parley_core::{AgentRole, Message, ThreadId, ThreadStatus};
use parley_runtime::{
    Agent, EventSink, Orchestrator, OrchestratorConfig, OrchestratorError, Route, Router,
    RouterPolicy, ScriptedAgent, ScriptedReply, SubmitRequest,
};
use parley_store::{CheckpointStore, SqliteCheckpointStore};

use AgentRole::{BusinessAnalyst as Ba, Customer, FrontendDeveloper as Fe};

fn policy() -> RouterPolicy {
    RouterPolicy::new(vec![Customer, Fe, Ba], 3).unwrap()
}

/// A fresh "process": new store handle on the same file, new agents.
fn boot(path: &Path, agents: Vec<Arc<dyn Agent>>) -> (Orchestrator, Arc<SqliteCheckpointStore>) {
    let store = Arc::new(SqliteCheckpointStore::open(path).unwrap());
    let orch = Orchestrator::new(
        Arc::new(policy()),
        agents,
        Arc::clone(&store) as Arc<dyn CheckpointStore>,
        OrchestratorConfig::default(),
    )
    .unwrap();
    (orch, store)
}

fn scripted(role: AgentRole, replies: Vec<ScriptedReply>) -> Arc<dyn Agent> {
    Arc::new(ScriptedAgent::new(role, replies))
}

fn contents(store: &SqliteCheckpointStore, thread: &str) -> Vec<String> {
    store
        .get(&ThreadId::from(thread))
        .unwrap()
        .unwrap()
        .state
        .history()
        .iter()
        .map(|m| m.content().to_string())
        .collect()
}

#[tokio::test]
async fn submissions_across_restarts_concatenate() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("parley.db");

    {
        let (orch, store) = boot(
            &path,
            vec![
                scripted(Customer, vec![ScriptedReply::text("Lamps, please.")]),
                scripted(Fe, vec![ScriptedReply::fail("connection reset")]),
                scripted(Ba, vec![]),
            ],
        );
        let err = orch
            .run(SubmitRequest::new("p", "first"), &EventSink::discard())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::AgentInvocationFailed { turn_index: 1, .. }
        ));
        assert_eq!(contents(&store, "p"), vec!["first", "Lamps, please."]);
    }

    let fe = Arc::new(ScriptedAgent::new(Fe, vec![ScriptedReply::text("One page.")]));
    let (orch, store) = boot(
        &path,
        vec![
            scripted(Customer, vec![]),
            fe.clone(),
            scripted(Ba, vec![ScriptedReply::text("Agreed.")]),
        ],
    );
    let outcome = orch
        .run(SubmitRequest::new("p", "second"), &EventSink::discard())
        .await
        .unwrap();
    assert_eq!(outcome.status, ThreadStatus::Terminated);
    assert_eq!(fe.seen_history_lens(), vec![3]);

    assert_eq!(
        contents(&store, "p"),
        vec!["first", "Lamps, please.", "second", "One page.", "Agreed."]
    );
    let state = store.get(&ThreadId::from("p")).unwrap().unwrap().state;
    let seqs: Vec<u64> = state.history().iter().map(Message::sequence_id).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    let turns: Vec<u32> = state.history().iter().map(Message::turn_index).collect();
    assert_eq!(turns, vec![0, 0, 1, 1, 2]);
}

#[tokio::test]
async fn restart_after_reopen_opens_a_new_epoch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("parley.db");

    {
        let (orch, _) = boot(
            &path,
            vec![
                scripted(Customer, vec![ScriptedReply::text("a")]),
                scripted(Fe, vec![ScriptedReply::text("b")]),
                scripted(Ba, vec![ScriptedReply::text("c")]),
            ],
        );
        let _ = orch
            .run(SubmitRequest::new("e", "go"), &EventSink::discard())
            .await
            .unwrap();
    }

    let (orch, store) = boot(
        &path,
        vec![
            scripted(Customer, vec![ScriptedReply::text("d")]),
            scripted(Fe, vec![ScriptedReply::text("e")]),
            scripted(Ba, vec![ScriptedReply::text("f")]),
        ],
    );
    assert!(matches!(
        orch.run(SubmitRequest::new("e", "more"), &EventSink::discard()).await,
        Err(OrchestratorError::ThreadTerminated { .. })
    ));
    let _ = orch
        .run(SubmitRequest::new("e", "again").restart(), &EventSink::discard())
        .await
        .unwrap();

    assert_eq!(
        contents(&store, "e"),
        vec!["go", "a", "b", "c", "again", "d", "e", "f"]
    );
    let cp = store.get(&ThreadId::from("e")).unwrap().unwrap();
    assert_eq!(cp.state.epoch_start(), 4);
    assert!(cp.state.is_terminated());
}

#[tokio::test]
async fn reloaded_checkpoint_reproduces_routing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("parley.db");

    let original = {
        let (orch, store) = boot(
            &path,
            vec![
                scripted(Customer, vec![ScriptedReply::text("a")]),
                scripted(Fe, vec![ScriptedReply::text("b")]),
                scripted(Ba, vec![ScriptedReply::fail("down")]),
            ],
        );
        let _ = orch
            .run(SubmitRequest::new("r", "go"), &EventSink::discard())
            .await
            .unwrap_err();
        store.get(&ThreadId::from("r")).unwrap().unwrap()
    };

    let reopened = SqliteCheckpointStore::open(&path).unwrap();
    let reloaded = reopened.get(&ThreadId::from("r")).unwrap().unwrap();
    assert_eq!(reloaded, original);
    reloaded.state.validate().unwrap();

    let router = policy();
    let replay = |turn: u32| router.next(turn, reloaded.state.history());
    assert_eq!(
        router.next(original.state.turn_index(), original.state.history()),
        replay(reloaded.state.turn_index())
    );
    assert_eq!(replay(reloaded.state.turn_index()), Route::Agent(Ba));
    assert_eq!(reloaded.state.policy_fingerprint(), router.fingerprint());
}

#[tokio::test]
async fn other_policy_cannot_resume_stored_thread() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("parley.db");
    {
        let (orch, _) = boot(
            &path,
            vec![
                scripted(Customer, vec![ScriptedReply::fail("down")]),
                scripted(Fe, vec![]),
                scripted(Ba, vec![]),
            ],
        );
        let _ = orch
            .run(SubmitRequest::new("x", "go"), &EventSink::discard())
            .await
            .unwrap_err();
    }

    let store = Arc::new(SqliteCheckpointStore::open(&path).unwrap());
    let orch = Orchestrator::new(
        Arc::new(RouterPolicy::pair_review()),
        vec![scripted(Fe, vec![]), scripted(Ba, vec![])],
        store as Arc<dyn CheckpointStore>,
        OrchestratorConfig::default(),
    )
    .unwrap();
    assert!(matches!(
        orch.run(SubmitRequest::retry("x"), &EventSink::discard()).await,
        Err(OrchestratorError::PolicyMismatch(_))
    ));
}
