mod helpers;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use helpers::{harness, USER};
use triai::adapters::generators::{MockGenerator, MockStep};
use triai::adapters::mcp::connect_local;
use triai::application::{AgentLoop, AgentLoopConfig, LoopState, Runtime};
use triai::domain::models::{Agent, Message, ToolInvocation};
use triai::domain::ports::BrokerLink;
use triai::services::{BrokerError, SessionBroker};

fn loop_config(max_tool_rounds: u32) -> AgentLoopConfig {
    AgentLoopConfig {
        poll_interval: Duration::from_millis(50),
        max_tool_rounds,
    }
}

async fn query_bot(runtime: &Runtime) -> Agent {
    runtime
        .agents()
        .await
        .unwrap()
        .into_iter()
        .find(|agent| agent.name == "QueryBot")
        .unwrap()
}

async fn agent_loop(
    runtime: &Runtime,
    generator: Arc<MockGenerator>,
    max_tool_rounds: u32,
) -> AgentLoop {
    let link: Arc<dyn BrokerLink> =
        Arc::new(connect_local(&runtime.broker(), "QueryBot").await.unwrap());
    AgentLoop::new(query_bot(runtime).await, link, generator, loop_config(max_tool_rounds))
}

async fn conversation(broker: &SessionBroker) -> Vec<Message> {
    broker.history(USER, "QueryBot", 50).await.unwrap()
}

#[tokio::test]
async fn test_reply_marks_read_and_remembers() {
    let h = harness().await;
    let broker = h.runtime.broker();
    let mut agent = agent_loop(&h.runtime, Arc::new(MockGenerator::new()), 2).await;

    broker
        .send_message(USER, "QueryBot", "Please remember that billing runs monthly")
        .await
        .unwrap();
    assert_eq!(agent.run_cycle().await.unwrap(), 1);
    assert_eq!(agent.state(), LoopState::Idle);

    let history = conversation(&broker).await;
    assert_eq!(history.len(), 2);
    assert!(history[0].read_at.is_some());
    assert_eq!(history[1].from, "QueryBot");
    assert_eq!(history[1].body, "QueryBot received: Please remember that billing runs monthly");

    let memories = broker.agent_memories("QueryBot", 10).await.unwrap();
    assert_eq!(memories.len(), 1);
    assert_eq!(memories[0].label, "Please remember that billing runs monthly");
    assert!(memories[0].tags.contains("billing"));
    assert_eq!(agent.stats().memories_stored, 1);

    broker
        .send_message(USER, "QueryBot", "When does billing happen?")
        .await
        .unwrap();
    assert_eq!(agent.run_cycle().await.unwrap(), 1);
    let history = conversation(&broker).await;
    assert_eq!(
        history.last().unwrap().body,
        "QueryBot received: When does billing happen? (1 memories recalled)"
    );
}

#[tokio::test]
async fn test_tool_round_feeds_reply() {
    let h = harness().await;
    let broker = h.runtime.broker();
    let generator = Arc::new(MockGenerator::with_script([MockStep::UseTools(vec![
        ToolInvocation {
            tool: "execute_query".to_string(),
            parameters: json!({
                "database_name": "triai",
                "sql_query": "SELECT COUNT(*) AS shipped FROM orders WHERE status = 'shipped'"
            }),
        },
    ])]));
    let mut agent = agent_loop(&h.runtime, generator.clone(), 2).await;

    broker.send_message(USER, "QueryBot", "How many orders shipped?").await.unwrap();
    assert_eq!(agent.run_cycle().await.unwrap(), 1);

    assert_eq!(generator.calls(), 2);
    assert_eq!(agent.stats().tool_calls, 1);
    assert_eq!(conversation(&broker).await.last().unwrap().body, "QueryBot ran execute_query ok");
    assert_eq!(broker.agent_query_history("QueryBot", 5).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_tool_round_limit_sends_fallback() {
    let h = harness().await;
    let broker = h.runtime.broker();
    let list = || MockStep::UseTools(vec![ToolInvocation {
        tool: "list_databases".to_string(),
        parameters: json!({}),
    }]);
    let generator = Arc::new(MockGenerator::with_script([list(), list(), list()]));
    let mut agent = agent_loop(&h.runtime, generator.clone(), 1).await;

    broker.send_message(USER, "QueryBot", "Loop forever").await.unwrap();
    assert_eq!(agent.run_cycle().await.unwrap(), 1);

    assert_eq!(generator.calls(), 2);
    assert_eq!(agent.stats().tool_calls, 1);
    assert_eq!(
        conversation(&broker).await.last().unwrap().body,
        "I could not finish answering within 1 tool rounds."
    );
}

#[tokio::test]
async fn test_generation_failure_leaves_message_unread() {
    let h = harness().await;
    let broker = h.runtime.broker();
    let generator = Arc::new(MockGenerator::with_script([MockStep::Fail("model offline".into())]));
    let mut agent = agent_loop(&h.runtime, generator, 2).await;

    broker.send_message(USER, "QueryBot", "first").await.unwrap();
    broker.send_message(USER, "QueryBot", "second").await.unwrap();

    assert_eq!(agent.run_cycle().await.unwrap(), 0);
    assert_eq!(agent.stats().generation_failures, 1);
    let history = conversation(&broker).await;
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(Message::is_unread));

    // The next cycle replays both, oldest first.
    assert_eq!(agent.run_cycle().await.unwrap(), 2);
    let bodies: Vec<String> = conversation(&broker)
        .await
        .into_iter()
        .filter(|m| m.from == "QueryBot")
        .map(|m| m.body)
        .collect();
    assert_eq!(bodies, vec!["QueryBot received: first", "QueryBot received: second"]);
}

#[tokio::test]
async fn test_supervised_worker_answers_and_stops() {
    let h = harness().await;
    let broker = h.runtime.broker();
    let mut supervisor = h.runtime.local_supervisor();
    supervisor.spawn_with(query_bot(&h.runtime).await, Arc::new(MockGenerator::new()));
    assert_eq!(supervisor.len(), 1);

    for _ in 0..100 {
        if broker.is_connected("QueryBot").await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    broker.send_message(USER, "QueryBot", "ping").await.unwrap();

    let mut replied = false;
    for _ in 0..200 {
        if conversation(&broker).await.iter().any(|m| m.from == "QueryBot") {
            replied = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(replied, "worker never replied");

    let reports = supervisor.shutdown().await;
    assert_eq!(reports.len(), 1);
    assert!(reports[0].result.is_ok());
}

#[tokio::test]
async fn test_loop_follows_poll_interval_changes() {
    let h = harness().await;
    let broker = h.runtime.broker();
    let registered = query_bot(&h.runtime).await.poll_interval_secs;
    let mut agent = agent_loop(&h.runtime, Arc::new(MockGenerator::new()), 1).await;
    assert_eq!(agent.poll_interval(), Duration::from_millis(50));

    agent.run_cycle().await.unwrap();
    assert_eq!(agent.poll_interval(), Duration::from_secs(registered));

    broker.set_poll_interval("QueryBot", 7).await.unwrap();
    agent.run_cycle().await.unwrap();
    assert_eq!(agent.poll_interval(), Duration::from_secs(7));
    assert_eq!(query_bot(&h.runtime).await.poll_interval_secs, 7);

    assert!(matches!(
        broker.set_poll_interval("QueryBot", 0).await,
        Err(BrokerError::Validation(_))
    ));
    assert!(matches!(
        broker.set_poll_interval("Nobody", 5).await,
        Err(BrokerError::UnknownAgent(_))
    ));
}
