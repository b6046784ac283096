//! Dispatch integration tests.
//!
//! Tests that run actions built from the shared inventory against scripted
//! hosts and check the per-host results.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use xsh::testing::{Call, HostScript, MockTransport, directory, group};
use xsh::{
    ActionBuilder, CommandFailurePolicy, DispatchConfig, DispatchError, PrivilegeType, SpecError,
    StepSpec, TargetSpec,
};

use crate::common::{commands, dispatcher, dispatcher_over, fleet, write_file};

#[tokio::test]
async fn test_every_member_reports_every_step_in_order() {
    let (dispatcher, _) = dispatcher(MockTransport::new(), DispatchConfig::default());
    let action = commands(
        "sequence",
        &["echo first", "echo second; echo third", "echo fourth"],
        TargetSpec::group("web"),
    );

    let result = dispatcher.dispatch(&action).await.unwrap();

    assert_eq!(
        result.hosts.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]
    );
    for steps in result.hosts.values() {
        let stdout: Vec<&str> = steps.iter().map(|s| s.stdout.as_str()).collect();
        assert_eq!(stdout, vec!["first\n", "second\nthird\n", "fourth\n"]);
    }
    assert!(result.success());
    assert_eq!(result.target, "web");
}

#[tokio::test]
async fn test_failures_stay_with_their_host() {
    let transport = MockTransport::new()
        .script(
            "10.0.0.1",
            HostScript::new().fail_command("systemctl restart app", 5),
        )
        .script(
            "10.0.0.2",
            HostScript::new().reject_auth("Permission denied (publickey)"),
        );
    let (dispatcher, _) = dispatcher(transport, DispatchConfig::default());
    let action = commands(
        "restart",
        &["systemctl restart app", "echo done"],
        TargetSpec::group("web"),
    );

    let result = dispatcher.dispatch(&action).await.unwrap();

    let first = result.steps("10.0.0.1").unwrap();
    assert_eq!(
        first[0].error.as_deref(),
        Some("command `systemctl restart app` exited with code 5")
    );
    assert_eq!(first[1].stdout, "done\n");
    assert!(result.host_error("10.0.0.1").is_none());

    assert!(result.steps("10.0.0.2").unwrap().is_empty());
    assert!(
        result
            .host_error("10.0.0.2")
            .unwrap()
            .starts_with("authentication failed")
    );

    let healthy = result.steps("10.0.0.3").unwrap();
    assert!(healthy.iter().all(|s| s.success()));
    assert_eq!(result.failed_hosts(), vec!["10.0.0.1", "10.0.0.2"]);
}

#[tokio::test]
async fn test_abort_step_policy() {
    let transport =
        MockTransport::new().with_default(HostScript::new().fail_command("false", 1));
    let config = DispatchConfig::default().with_command_failure(CommandFailurePolicy::AbortStep);
    let (dispatcher, transport) = dispatcher(transport, config);
    let action = commands(
        "x",
        &["false; echo skipped", "echo next"],
        TargetSpec::host("10.0.0.1"),
    );

    let result = dispatcher.dispatch(&action).await.unwrap();

    let steps = result.steps("10.0.0.1").unwrap();
    assert_eq!(steps[0].stdout, "");
    assert!(steps[0].error.is_some());
    assert_eq!(steps[1].stdout, "next\n");
    let calls = transport.calls_for("10.0.0.1");
    assert!(!calls.contains(&Call::Run {
        command: "echo skipped".into(),
        escalation: None,
    }));
}

#[tokio::test]
async fn test_privileged_steps_follow_inventory_escalation() {
    let (dispatcher, transport) = dispatcher(MockTransport::new(), DispatchConfig::default());
    let steps = [StepSpec::command_line("whoami", true)];
    let action = ActionBuilder::new(fleet())
        .build("whoami", &steps, &TargetSpec::group("db"))
        .unwrap();

    dispatcher.dispatch(&action).await.unwrap();

    let escalation_of = |address: &str| {
        transport
            .calls_for(address)
            .into_iter()
            .find_map(|call| match call {
                Call::Run { escalation, .. } => Some(escalation),
                _ => None,
            })
            .flatten()
    };
    assert_eq!(escalation_of("10.0.1.1"), Some(PrivilegeType::Su));
    assert_eq!(escalation_of("10.0.1.2"), Some(PrivilegeType::Sudo));
}

#[tokio::test]
async fn test_copy_steps_use_validated_paths() {
    let workdir = TempDir::new().unwrap();
    let archive = write_file(workdir.path(), "app.tar", "payload");
    let builder = ActionBuilder::new(fleet());

    let line = format!("{} -> /opt/app/", archive.display());
    let ship = [StepSpec::copy_line(line)];
    let upload = builder
        .build("ship", &ship, &TargetSpec::host_in("web", "10.0.0.2"))
        .unwrap();
    let download = builder
        .build(
            "fetch",
            &[StepSpec::copy_line(format!(
                "{} <- /var/log/app/",
                workdir.path().display()
            ))],
            &TargetSpec::host("10.0.0.2"),
        )
        .unwrap();

    let (dispatcher, transport) = dispatcher(MockTransport::new(), DispatchConfig::default());
    let up = dispatcher.dispatch(&upload).await.unwrap();
    let down = dispatcher.dispatch(&download).await.unwrap();

    assert_eq!(
        up.steps("10.0.0.2").unwrap()[0].status,
        Some(vec![format!("{} -> 10.0.0.2:/opt/app/", archive.display())])
    );
    assert!(down.success());
    let calls = transport.calls_for("10.0.0.2");
    assert!(calls.contains(&Call::Download {
        remote: "/var/log/app".into(),
        local: workdir.path().join(""),
    }));
}

#[tokio::test]
async fn test_copy_to_remote_file_is_rejected_before_dispatch() {
    let workdir = TempDir::new().unwrap();
    let archive = write_file(workdir.path(), "app.tar", "payload");

    let line = format!("{} -> /opt/app.tar", archive.display());
    let ship = [StepSpec::copy_line(line)];
    let err = ActionBuilder::new(fleet())
        .build("ship", &ship, &TargetSpec::group("web"))
        .unwrap_err();

    assert!(matches!(err, SpecError::InvalidPath(_)));
}

#[tokio::test]
async fn test_empty_group_contacts_nobody() {
    let (dispatcher, transport) = dispatcher(MockTransport::new(), DispatchConfig::default());

    let steps = [StepSpec::command_line("ls", false)];
    let err = ActionBuilder::new(fleet())
        .build("x", &steps, &TargetSpec::group("empty"))
        .unwrap_err();
    assert_eq!(err, SpecError::EmptyGroup("empty".into()));

    let stale = commands("x", &["ls"], TargetSpec::group("web"));
    let (shrunk, _) = dispatcher_over(
        directory([group("db", &["h"])]),
        MockTransport::new(),
        DispatchConfig::default(),
    );
    assert_eq!(
        shrunk.dispatch(&stale).await.unwrap_err(),
        DispatchError::InvalidSpec(SpecError::UnknownGroup("web".into()))
    );

    drop(dispatcher);
    assert!(transport.contacted().is_empty());
}

#[tokio::test]
async fn test_large_group_respects_pool_size() {
    let addresses: Vec<String> = (1..=24).map(|i| format!("192.168.0.{i}")).collect();
    let refs: Vec<&str> = addresses.iter().map(String::as_str).collect();
    let fleet = directory([group("rack", &refs)]);
    let script = HostScript::new()
        .connect_delay(Duration::from_millis(5))
        .command_delay(Duration::from_millis(10));
    let transport = MockTransport::new().with_default(script);
    let (dispatcher, transport) = dispatcher_over(
        fleet.clone(),
        transport,
        DispatchConfig::default().with_max_concurrency(4),
    );
    let steps = [StepSpec::command_line("uptime; echo ok", false)];
    let action = ActionBuilder::new(fleet)
        .build("uptime", &steps, &TargetSpec::group("rack"))
        .unwrap();

    let result = dispatcher.dispatch(&action).await.unwrap();

    assert_eq!(result.hosts.len(), 24);
    assert!(result.success());
    let gauge = transport.gauge();
    assert!(gauge.peak() <= 4, "peak was {}", gauge.peak());
    assert_eq!(gauge.total_opened(), 24);
    assert_eq!(gauge.current(), 0);
}

#[tokio::test]
async fn test_single_host_dispatches_run_concurrently() {
    let transport = MockTransport::new()
        .with_default(HostScript::new().command_delay(Duration::from_millis(150)));
    let (dispatcher, _) = dispatcher(transport, DispatchConfig::default());
    let dispatcher = Arc::new(dispatcher);
    let web = commands("a", &["echo web"], TargetSpec::host("10.0.0.1"));
    let db = commands("b", &["echo db"], TargetSpec::host("10.0.1.1"));

    let start = Instant::now();
    let (web, db) = tokio::join!(
        dispatcher.dispatch(&web),
        dispatcher.dispatch(&db)
    );
    let elapsed = start.elapsed();

    assert_eq!(web.unwrap().steps("10.0.0.1").unwrap()[0].stdout, "web\n");
    assert_eq!(db.unwrap().steps("10.0.1.1").unwrap()[0].stdout, "db\n");
    assert!(elapsed < Duration::from_millis(290), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_timeout_and_cancel_are_explicit() {
    let slow = HostScript::new().command_delay(Duration::from_millis(120));
    let transport = MockTransport::new().script("10.0.0.3", slow);
    let config = DispatchConfig::default().with_host_timeout(Duration::from_millis(200));
    let (dispatcher, _) = dispatcher(transport, config);
    let action = commands(
        "slow",
        &["echo 1", "echo 2", "echo 3"],
        TargetSpec::group("web"),
    );

    let result = dispatcher.dispatch(&action).await.unwrap();

    assert_eq!(result.steps("10.0.0.3").unwrap().len(), 1);
    let timed_out = result.host_error("10.0.0.3").unwrap();
    assert!(timed_out.starts_with("timed out"));
    assert!(result.host_error("10.0.0.1").is_none());

    dispatcher.cancel_handle().cancel();
    let after = dispatcher.dispatch(&action).await.unwrap();
    assert_eq!(after.hosts.len(), 3);
    assert!(after.hosts.values().all(|steps| steps.is_empty()));
    assert_eq!(after.host_error("10.0.0.1"), Some("cancelled"));
}
