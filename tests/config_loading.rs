//! Behaviour-driven tests for `gostrap.toml` loading.

use std::cell::RefCell;
use std::convert::Infallible;
use std::str::FromStr;

use gostrap::{BuildStep, GostrapConfig};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

#[derive(Default)]
struct ConfigWorld {
    source: RefCell<Vec<String>>,
    result: RefCell<Option<Result<GostrapConfig, String>>>,
}

#[fixture]
fn config_world() -> ConfigWorld {
    ConfigWorld::default()
}

#[derive(Debug)]
struct ErrorSnippet(String);

impl FromStr for ErrorSnippet {
    type Err = Infallible;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input
            .trim()
            .trim_matches(|candidate| matches!(candidate, '"' | '\''));
        Ok(Self(trimmed.to_owned()))
    }
}

impl ConfigWorld {
    fn push(&self, fragment: impl Into<String>) {
        self.source.borrow_mut().push(fragment.into());
    }

    fn config(&self) -> GostrapConfig {
        match self.result.borrow().as_ref() {
            Some(Ok(config)) => config.clone(),
            Some(Err(error)) => panic!("expected configuration to parse: {error}"),
            None => panic!("configuration should be parsed"),
        }
    }
}

#[given("no configuration text has been provided")]
fn no_configuration(config_world: &ConfigWorld) {
    config_world.source.borrow_mut().clear();
}

#[given("the configuration pins Go version {version}")]
fn pin_go_version(config_world: &ConfigWorld, version: String) {
    config_world.push(format!("[env]\nversion = \"{version}\"\n"));
}

#[given("the configuration disables the sandbox")]
fn disable_sandbox(config_world: &ConfigWorld) {
    // Keys merge into the `[env]` table pushed by the version step.
    config_world.push("use_sandbox = false\n");
}

#[given("the configuration includes unknown fields")]
fn unknown_fields(config_world: &ConfigWorld) {
    config_world.push("unexpected = true\n[env]\nversion = \"1.12\"\n");
}

#[given("the configuration sets GOOS to {value} for the build step")]
fn build_goos(config_world: &ConfigWorld, value: String) {
    config_world.push(format!("[build]\nenvs = {{ GOOS = \"{value}\" }}\n"));
}

#[given("the configuration pins the Go archive digest {digest}")]
fn pin_go_digest(config_world: &ConfigWorld, digest: String) {
    config_world.push(format!("[env]\nsha256 = \"{digest}\"\n"));
}

#[given("the configuration pins the protoc archive digest {digest}")]
fn pin_protoc_digest(config_world: &ConfigWorld, digest: String) {
    config_world.push(format!("[dep]\nproto_sha256 = \"{digest}\"\n"));
}

#[when("the project configuration is parsed")]
fn parse_configuration(config_world: &ConfigWorld) {
    let text = config_world.source.borrow().concat();
    let outcome = GostrapConfig::from_toml_str(&text).map_err(|error| error.to_string());
    config_world.result.replace(Some(outcome));
}

#[then("the Go version is {expected}")]
fn assert_go_version(config_world: &ConfigWorld, expected: String) {
    assert_eq!(config_world.config().env.version, expected);
}

#[then("the sandbox toolchain is used")]
fn assert_sandbox(config_world: &ConfigWorld) {
    assert!(config_world.config().env.use_sandbox);
}

#[then("the system toolchain is used")]
fn assert_system(config_world: &ConfigWorld) {
    assert!(!config_world.config().env.use_sandbox);
}

#[then("no archive digest is pinned")]
fn assert_no_digest(config_world: &ConfigWorld) {
    let config = config_world.config();
    assert_eq!(config.env.sha256, None);
    assert_eq!(config.dep.proto_sha256, None);
}

#[then("the Go archive digest is {digest}")]
fn assert_go_digest(config_world: &ConfigWorld, digest: String) {
    assert_eq!(config_world.config().env.sha256, Some(digest));
}

#[then("the protoc archive digest is {digest}")]
fn assert_protoc_digest(config_world: &ConfigWorld, digest: String) {
    assert_eq!(config_world.config().dep.proto_sha256, Some(digest));
}

#[then("a configuration error mentioning {snippet} is reported")]
fn assert_error_with_snippet(config_world: &ConfigWorld, snippet: ErrorSnippet) {
    match config_world.result.borrow().as_ref() {
        Some(Err(error)) => assert!(
            error.contains(snippet.0.as_str()),
            "expected error '{error}' to mention '{}'",
            snippet.0
        ),
        Some(Ok(config)) => panic!("expected parsing to fail but got {config:?}"),
        None => panic!("configuration should be parsed"),
    }
}

#[then("the build step environment sets GOOS to {value}")]
fn assert_build_env(config_world: &ConfigWorld, value: String) {
    let config = config_world.config();
    let options = config.step_options(BuildStep::Build);
    assert_eq!(options.extra_env.get("GOOS"), Some(&value));
}

#[then("the test step environment is empty")]
fn assert_test_env_empty(config_world: &ConfigWorld) {
    let config = config_world.config();
    assert!(config.step_options(BuildStep::Test).extra_env.is_empty());
}

#[scenario("tests/features/config_loading.feature", index = 0)]
fn scenario_defaults(config_world: ConfigWorld) {
    let _ = config_world;
}

#[scenario("tests/features/config_loading.feature", index = 1)]
fn scenario_env_override(config_world: ConfigWorld) {
    let _ = config_world;
}

#[scenario("tests/features/config_loading.feature", index = 2)]
fn scenario_unknown_fields(config_world: ConfigWorld) {
    let _ = config_world;
}

#[scenario("tests/features/config_loading.feature", index = 3)]
fn scenario_step_overrides(config_world: ConfigWorld) {
    let _ = config_world;
}

#[scenario("tests/features/config_loading.feature", index = 4)]
fn scenario_archive_digests(config_world: ConfigWorld) {
    let _ = config_world;
}
