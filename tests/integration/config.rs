//! Configuration integration tests.
//!
//! Tests that load settings and inventory from disk and wire them into a
//! dispatcher.

use std::time::Duration;
use tempfile::TempDir;
use xsh::testing::MockTransport;
use xsh::{
    ActionBuilder, CommandFailurePolicy, ConfigError, Directory, DispatchConfig,
    InMemoryDirectory, OutputFormat, SpecError, StepSpec, SystemSshConfig, TargetSpec, YamlLoader,
};

use crate::common::{INVENTORY, dispatcher_over, write_file};

const SETTINGS: &str = r#"
command_separator: "&&"
max_concurrency: 2
host_timeout_secs: 60
command_failure: abort_step
output: yaml
connect_timeout_secs: 4
sshpass_program: /usr/bin/sshpass
"#;

#[tokio::test]
async fn test_settings_and_inventory_from_disk() {
    let dir = TempDir::new().unwrap();
    let settings = write_file(dir.path(), "xsh.yaml", SETTINGS);
    let hosts = write_file(dir.path(), "hosts.yaml", INVENTORY);

    let global = YamlLoader::load_global_config(&settings).unwrap();
    let inventory = YamlLoader::load_inventory(&hosts).unwrap();
    let directory = std::sync::Arc::new(InMemoryDirectory::from_inventory(&inventory).unwrap());

    assert_eq!(global.output, Some(OutputFormat::Yaml));
    assert_eq!(directory.group_names(), vec!["db", "empty", "web"]);

    let dispatch = DispatchConfig::from(&global);
    assert_eq!(dispatch.max_concurrency, 2);
    assert_eq!(dispatch.host_timeout, Some(Duration::from_secs(60)));
    assert_eq!(dispatch.command_failure, CommandFailurePolicy::AbortStep);

    let ssh = SystemSshConfig::from(&global);
    assert_eq!(ssh.sshpass_program, "/usr/bin/sshpass");
    assert_eq!(ssh.connect_timeout, Duration::from_secs(4));

    let builder = ActionBuilder::new(directory.clone())
        .separator(global.command_separator());
    let action = builder
        .build(
            "chain",
            &[StepSpec::command_line("echo a && echo b", false)],
            &TargetSpec::host("10.0.0.1"),
        )
        .unwrap();
    let (dispatcher, transport) = dispatcher_over(directory, MockTransport::new(), dispatch);
    let result = dispatcher.dispatch(&action).await.unwrap();

    assert_eq!(result.steps("10.0.0.1").unwrap()[0].stdout, "a\nb\n");
    assert_eq!(transport.gauge().peak(), 1);

    let err = builder
        .build(
            "chain",
            &[StepSpec::command_line("echo a &&&& echo b", false)],
            &TargetSpec::host("10.0.0.1"),
        )
        .unwrap_err();
    assert!(matches!(err, SpecError::MalformedSeparator(_)));
}

#[test]
fn test_invalid_files_name_their_path() {
    let dir = TempDir::new().unwrap();
    let broken = write_file(dir.path(), "hosts.yaml", "groups: {not: [a list}\n");

    match YamlLoader::load_inventory(&broken).unwrap_err() {
        ConfigError::YamlFileError { path, .. } => assert_eq!(path, broken),
        other => panic!("unexpected error {other:?}"),
    }

    let invalid = write_file(dir.path(), "xsh.yaml", "max_concurrency: 0\n");
    let err = YamlLoader::load_global_config(&invalid).unwrap_err();
    assert_eq!(
        err.to_string(),
        "invalid configuration: max_concurrency cannot be zero"
    );
}
