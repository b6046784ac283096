//! Common test utilities shared across integration tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use xsh::testing::MockTransport;
use xsh::{
    Action, ActionBuilder, DispatchConfig, Dispatcher, InMemoryDirectory, StepSpec, TargetSpec,
    YamlLoader,
};

/// Inventory used across the integration tests.
pub const INVENTORY: &str = r#"
auths:
  ops:
    username: ops
    password: secret
  root:
    username: admin
    private_key: /keys/admin
    su_type: su
    su_pass: rootpw
groups:
  - name: web
    auth: ops
    hosts: [10.0.0.1, 10.0.0.2, 10.0.0.3]
  - name: db
    auth: root
    hosts:
      - 10.0.1.1
      - address: 10.0.1.2
        auth: ops
  - name: empty
    auth: ops
    hosts: []
"#;

/// Directory built from [`INVENTORY`].
pub fn fleet() -> Arc<InMemoryDirectory> {
    let inventory = YamlLoader::parse_inventory(INVENTORY).unwrap();
    Arc::new(InMemoryDirectory::from_inventory(&inventory).unwrap())
}

/// A dispatcher over [`fleet`] driving `transport`.
pub fn dispatcher(
    transport: MockTransport,
    config: DispatchConfig,
) -> (Dispatcher, Arc<MockTransport>) {
    dispatcher_over(fleet(), transport, config)
}

/// A dispatcher over `directory` driving `transport`.
pub fn dispatcher_over(
    directory: Arc<InMemoryDirectory>,
    transport: MockTransport,
    config: DispatchConfig,
) -> (Dispatcher, Arc<MockTransport>) {
    let transport = Arc::new(transport);
    (Dispatcher::new(directory, transport.clone(), config), transport)
}

/// An action of plain command lines, one step per line.
pub fn commands(name: &str, lines: &[&str], target: TargetSpec) -> Action {
    let specs: Vec<StepSpec> = lines
        .iter()
        .map(|line| StepSpec::command_line(*line, false))
        .collect();
    ActionBuilder::new(fleet())
        .build(name, &specs, &target)
        .unwrap()
}

/// Write `content` to `dir/name` and return the path.
pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}
