mod common;

use agentfleet::distributor::AckState;
use agentfleet::model::{AgentDistributionState, DistributionOutcome, DistributionTarget};
use common::{make_policy, registered_agent, test_state};

// ══════════════════════════════════════════════════════════════════
// Policy distribution integration tests (no running server)
//
// Exercises the pull-based wire contract end to end: distribute a
// policy, have the agent "pull" it via a heartbeat, then ack it.
// ══════════════════════════════════════════════════════════════════

#[tokio::test]
async fn distribute_deliver_and_ack_completes_the_rollout() {
    let state = test_state();
    registered_agent(&state, "agent-a", "mac-a.local", &["engineering"]).await;
    registered_agent(&state, "agent-b", "mac-b.local", &["engineering"]).await;

    let policy = make_policy("weekly-cache-sweep", agentfleet::model::Priority::Normal, &["r1"]);
    state.policies.save(policy, false).await.unwrap();

    let distribution_id = state
        .distributor
        .distribute("weekly-cache-sweep", DistributionTarget::All)
        .await
        .unwrap();

    let pending = state.distributor.pending_for_agent("agent-a").await;
    assert_eq!(pending, vec!["weekly-cache-sweep".to_string()]);

    // A second heartbeat before acking sees nothing new to deliver.
    let pending_again = state.distributor.pending_for_agent("agent-a").await;
    assert!(pending_again.is_empty());

    let dist = state.distributor.status(&distribution_id).await.unwrap();
    let version = dist.version;

    let acked = state
        .distributor
        .record_ack(&distribution_id, "agent-a", version, AckState::Acknowledged, None)
        .await;
    assert!(acked);
    let completed = state
        .distributor
        .record_ack(&distribution_id, "agent-a", version, AckState::Completed, None)
        .await;
    assert!(completed);

    let dist = state.distributor.status(&distribution_id).await.unwrap();
    assert_eq!(
        dist.agents["agent-a"].state,
        AgentDistributionState::Completed
    );
    assert_eq!(dist.agents["agent-b"].state, AgentDistributionState::Pending);
    assert_eq!(dist.outcome, DistributionOutcome::InProgress);
}

#[tokio::test]
async fn failed_ack_is_recorded_with_its_reason() {
    let state = test_state();
    registered_agent(&state, "agent-c", "mac-c.local", &[]).await;
    let policy = make_policy("log-cleanup", agentfleet::model::Priority::Low, &["r1"]);
    state.policies.save(policy, false).await.unwrap();

    let distribution_id = state
        .distributor
        .distribute("log-cleanup", DistributionTarget::All)
        .await
        .unwrap();
    state.distributor.pending_for_agent("agent-c").await;
    let version = state.distributor.status(&distribution_id).await.unwrap().version;

    let accepted = state
        .distributor
        .record_ack(&distribution_id, "agent-c", version, AckState::Failed, Some("disk full".to_string()))
        .await;
    assert!(accepted);

    let dist = state.distributor.status(&distribution_id).await.unwrap();
    let agent_status = &dist.agents["agent-c"];
    assert_eq!(agent_status.state, AgentDistributionState::Failed);
    assert_eq!(agent_status.error.as_deref(), Some("disk full"));
}

#[tokio::test]
async fn cancel_stops_further_delivery() {
    let state = test_state();
    registered_agent(&state, "agent-d", "mac-d.local", &[]).await;
    let policy = make_policy("browser-cache", agentfleet::model::Priority::Normal, &["r1"]);
    state.policies.save(policy, false).await.unwrap();

    let distribution_id = state
        .distributor
        .distribute("browser-cache", DistributionTarget::All)
        .await
        .unwrap();

    state.distributor.cancel(&distribution_id).await.unwrap();

    let pending = state.distributor.pending_for_agent("agent-d").await;
    assert!(pending.is_empty());
}
