//! End-to-end coverage of the distributed build path: a queue manager
//! dispatching real processes to a build agent served over HTTP on an
//! ephemeral port.

use conveyor::agent::{BuildAgent, api::build_agent_routes};
use conveyor::build::ProcessRunner;
use conveyor::config::{AgentConfig, Config, Definitions};
use conveyor::manager::{IntegrationEvent, QueueManager, project::Project};
use conveyor::types::BuildStatus;
use std::collections::BTreeMap;
use std::future::IntoFuture as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

async fn spawn_agent(allowed: usize) -> url::Url {
    let config = AgentConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        allowed,
        status_retention: Duration::from_secs(3600),
    };
    let agent = Arc::new(BuildAgent::new(&config, Arc::new(ProcessRunner::new())));

    let listener = tokio::net::TcpListener::bind(config.bind).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(
        axum::serve(listener, build_agent_routes(agent).into_make_service()).into_future(),
    );

    format!("http://{addr}").parse().unwrap()
}

fn config() -> Arc<Config> {
    Arc::new(Config {
        definitions_path: "conveyor.toml".into(),
        queue_lock_timeout: Duration::from_secs(5),
        integrator_poll_interval: Duration::from_millis(50),
        remote_poll_interval: Duration::from_millis(20),
        rpc_call_retries: 0,
        web_bind: "127.0.0.1:0".parse().unwrap(),
    })
}

fn remote_project(name: &str, agent: &url::Url, command: &str, args: &[&str]) -> Project {
    Project {
        name: name.into(),
        queue: None,
        queue_priority: 0,
        command: command.into(),
        args: args.iter().map(|arg| (*arg).to_string()).collect(),
        working_dir: None,
        agent: Some(agent.clone()),
    }
}

async fn manager_with(projects: Vec<Project>) -> Arc<QueueManager> {
    let manager = Arc::new(
        QueueManager::new(
            config(),
            Definitions {
                projects,
                queues: vec![],
            },
            Arc::new(ProcessRunner::new()),
        )
        .unwrap(),
    );
    manager.start_all_projects().await.unwrap();
    manager
}

async fn next_completion(
    events: &mut broadcast::Receiver<IntegrationEvent>,
) -> (String, BuildStatus) {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("timed out waiting for a completion event")
            .unwrap();
        if let IntegrationEvent::Completed { project, status } = event {
            return (project, status);
        }
    }
}

#[tokio::test]
async fn a_remote_build_runs_on_the_agent_and_reports_success() {
    let agent = spawn_agent(2).await;
    let manager = manager_with(vec![remote_project("app", &agent, "true", &[])]).await;
    let mut events = manager.subscribe();

    manager
        .force_build("app", "alice", BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(
        next_completion(&mut events).await,
        ("app".to_owned(), BuildStatus::Success)
    );

    manager.stop_all_projects().await.unwrap();
}

#[tokio::test]
async fn a_failing_remote_build_reports_failure_not_an_error() {
    let agent = spawn_agent(2).await;
    let manager = manager_with(vec![remote_project("app", &agent, "false", &[])]).await;
    let mut events = manager.subscribe();

    manager
        .force_build("app", "alice", BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(
        next_completion(&mut events).await,
        ("app".to_owned(), BuildStatus::Failure)
    );

    manager.stop_all_projects().await.unwrap();
}

#[tokio::test]
async fn build_values_reach_the_remote_process_environment() {
    let agent = spawn_agent(2).await;
    let manager = manager_with(vec![remote_project(
        "app",
        &agent,
        "sh",
        &["-c", "test \"$CONVEYOR_VALUE_TARGET\" = release"],
    )])
    .await;
    let mut events = manager.subscribe();

    manager
        .force_build(
            "app",
            "alice",
            BTreeMap::from([("target".to_owned(), "release".to_owned())]),
        )
        .await
        .unwrap();

    assert_eq!(
        next_completion(&mut events).await,
        ("app".to_owned(), BuildStatus::Success)
    );

    manager.stop_all_projects().await.unwrap();
}

#[tokio::test]
async fn aborting_the_scheduler_cancels_the_remote_build() {
    let agent = spawn_agent(2).await;
    let manager = manager_with(vec![remote_project("app", &agent, "sleep", &["30"])]).await;
    let mut events = manager.subscribe();

    manager
        .force_build("app", "alice", BTreeMap::new())
        .await
        .unwrap();

    // wait until the build is reported as started before aborting
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("timed out waiting for the start event")
            .unwrap();
        if matches!(event, IntegrationEvent::Started { .. }) {
            break;
        }
    }
    // give the dispatch a moment to land on the agent
    tokio::time::sleep(Duration::from_millis(100)).await;

    manager.abort().await.unwrap();

    assert_eq!(
        next_completion(&mut events).await,
        ("app".to_owned(), BuildStatus::Cancelled)
    );
}

#[tokio::test]
async fn two_projects_share_one_agent() {
    let agent = spawn_agent(2).await;
    let manager = manager_with(vec![
        remote_project("app-a", &agent, "true", &[]),
        remote_project("app-b", &agent, "true", &[]),
    ])
    .await;
    let mut events = manager.subscribe();

    manager
        .force_build("app-a", "alice", BTreeMap::new())
        .await
        .unwrap();
    manager
        .force_build("app-b", "alice", BTreeMap::new())
        .await
        .unwrap();

    let mut completed = vec![
        next_completion(&mut events).await,
        next_completion(&mut events).await,
    ];
    completed.sort();
    assert_eq!(
        completed,
        vec![
            ("app-a".to_owned(), BuildStatus::Success),
            ("app-b".to_owned(), BuildStatus::Success),
        ]
    );

    manager.stop_all_projects().await.unwrap();
}
