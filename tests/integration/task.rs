//! Task file integration tests.
//!
//! Tests that take a task file from YAML through the dispatcher to rendered
//! output.

use tempfile::TempDir;
use xsh::testing::{HostScript, MockTransport, directory, group};
use xsh::{
    ActionBuilder, DispatchConfig, OutputFormat, StepSpec, TargetSpec, TaskFileBuilder, YamlLoader,
    render_task,
};

use crate::common::{commands, dispatcher, dispatcher_over, fleet, write_file};

const ROLLOUT: &str = r#"
name: rollout
actions:
  - name: stop
    group: web
    steps:
      - type: command
        commands: ["echo stopping", "systemctl stop app"]
        privileged: true
  - name: check-db
    group: db
    address: 10.0.1.1
    steps:
      - type: command
        commands: ["echo db ok"]
  - name: start
    group: web
    steps:
      - type: command
        commands: ["systemctl start app", "echo started"]
"#;

#[tokio::test]
async fn test_task_file_runs_actions_in_order() {
    let workdir = TempDir::new().unwrap();
    let path = write_file(workdir.path(), "rollout.yaml", ROLLOUT);
    let task = YamlLoader::load_task_file(&path).unwrap();
    let actions = TaskFileBuilder::build(&task, &ActionBuilder::new(fleet())).unwrap();

    let unreachable = HostScript::new().refuse_connection("no route to host");
    let transport = MockTransport::new().script("10.0.0.2", unreachable);
    let (dispatcher, _) = dispatcher(transport, DispatchConfig::default());

    let result = dispatcher.run_task(&task.name, &actions).await;

    let names: Vec<&str> = result.actions.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["stop", "check-db", "start"]);
    assert_eq!(result.actions[1].target, "10.0.1.1");
    assert_eq!(
        result.actions[1].steps("10.0.1.1").unwrap()[0].stdout,
        "db ok\n"
    );
    assert_eq!(
        result.actions[2].steps("10.0.0.1").unwrap()[0].stdout,
        "started\n"
    );
    for action in [&result.actions[0], &result.actions[2]] {
        assert_eq!(
            action.host_error("10.0.0.2"),
            Some("connection failed: no route to host")
        );
    }
    assert!(result.error.is_none());
    assert!(!result.success());
}

#[tokio::test]
async fn test_unresolvable_action_does_not_stop_the_task() {
    let stale = commands("gone", &["echo never"], TargetSpec::group("db"));
    let live = commands("here", &["echo hello"], TargetSpec::group("web"));
    let (dispatcher, transport) = dispatcher_over(
        directory([group("web", &["10.0.0.1"])]),
        MockTransport::new(),
        DispatchConfig::default(),
    );

    let result = dispatcher.run_task("mixed", &[stale, live]).await;

    assert_eq!(result.actions.len(), 2);
    assert_eq!(
        result.actions[0].error.as_deref(),
        Some("unknown group: db")
    );
    assert!(result.actions[0].hosts.is_empty());
    assert!(result.actions[1].success());
    assert_eq!(transport.contacted(), vec!["10.0.0.1"]);
}

#[tokio::test]
async fn test_duplicate_target_ends_the_batch() {
    let doubled = directory([group("web", &["10.0.0.1", "10.0.0.1"])]);
    let builder = ActionBuilder::new(doubled.clone());
    let specs = [StepSpec::command_line("echo x", false)];
    let web = TargetSpec::group("web");
    let first = builder.build("first", &specs, &web).unwrap();
    let second = builder.build("second", &specs, &web).unwrap();
    let (dispatcher, transport) =
        dispatcher_over(doubled, MockTransport::new(), DispatchConfig::default());

    let result = dispatcher.run_task("dup", &[first, second]).await;

    assert!(result.actions.is_empty());
    assert_eq!(
        result.error.as_deref(),
        Some("duplicate target address: 10.0.0.1")
    );
    assert!(transport.contacted().is_empty());
}

#[tokio::test]
async fn test_rendered_task_is_deterministic() {
    let actions = vec![commands("hello", &["echo hi"], TargetSpec::group("web"))];
    let (dispatcher, _) = dispatcher(MockTransport::new(), DispatchConfig::default());
    let result = dispatcher.run_task("render", &actions).await;

    let json = render_task(&result, OutputFormat::Json).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["name"], "render");
    assert_eq!(value["run_id"], result.run_id.to_string());
    let hosts: Vec<&String> = value["actions"][0]["hosts"]
        .as_object()
        .unwrap()
        .keys()
        .collect();
    assert_eq!(hosts, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);

    let text = render_task(&result, OutputFormat::Text).unwrap();
    assert_eq!(text, render_task(&result, OutputFormat::Text).unwrap());
    let first = text.find("[10.0.0.1").unwrap();
    let third = text.find("[10.0.0.3").unwrap();
    assert!(first < third);

    let yaml = render_task(&result, OutputFormat::Yaml).unwrap();
    assert!(yaml.contains("name: render"));
}
