//! Unit tests for Scaleway lifecycle helpers.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::StatusCode;
use rstest::rstest;
use scaleway_rs::{ScalewayApi, ScalewayImage};

use super::InstanceSnapshot;
use super::create::{creation_error, instance_tags};
use crate::config::ScalewayConfig;
use crate::provider::{ExecRequest, InstanceSpec, Provider, ProviderFailure};
use crate::remote::{CONNECTION_LOST_EXIT_CODE, RemoteShell, SshConfig};
use crate::scaleway::types::{Action, InstanceId, InstanceState, Zone};
use crate::scaleway::{ScalewayProvider, ScalewayProviderError};
use crate::status::ProcessorStatus;
use crate::test_support::ScriptedRunner;

fn snapshot(
    id: impl Into<InstanceId>,
    state: impl Into<InstanceState>,
    allowed: impl IntoIterator<Item = impl Into<Action>>,
    public_ip: Option<&str>,
) -> InstanceSnapshot {
    InstanceSnapshot {
        id: id.into(),
        state: state.into(),
        allowed_actions: allowed.into_iter().map(Into::into).collect(),
        public_ip: public_ip.map(str::to_owned),
    }
}

#[derive(Copy, Clone)]
struct ImageSpec {
    id: &'static str,
    arch: &'static str,
    state: &'static str,
    creation_date: &'static str,
}

fn image(spec: ImageSpec) -> ScalewayImage {
    ScalewayImage {
        id: spec.id.to_owned(),
        name: String::new(),
        arch: spec.arch.to_owned(),
        creation_date: spec.creation_date.to_owned(),
        modification_date: String::new(),
        from_server: None,
        organization: String::new(),
        public: true,
        state: spec.state.to_owned(),
        project: String::new(),
        tags: vec![],
        zone: String::new(),
        root_volume: scaleway_rs::ScalewayImageRootVolume {
            id: String::new(),
            name: String::new(),
            size: 0,
            volume_type: String::new(),
        },
        default_bootscript: None,
        extra_volumes: scaleway_rs::ScalewayImageExtraVolumes {
            volumes: HashMap::new(),
        },
    }
}

fn dummy_config() -> ScalewayConfig {
    ScalewayConfig {
        secret_key: String::from("dummy"),
        default_organization_id: None,
        default_project_id: String::from("proj"),
        default_zone: String::from("zone"),
        default_instance_type: String::from("type"),
        default_image: String::from("img"),
        default_architecture: String::from("x86_64"),
    }
}

fn ssh_config() -> SshConfig {
    SshConfig {
        ssh_bin: String::from("ssh"),
        ssh_user: String::from("root"),
        ssh_port: 22,
        ssh_batch_mode: true,
        ssh_strict_host_key_checking: false,
        ssh_known_hosts_file: String::from("/dev/null"),
        ssh_identity_file: None,
    }
}

fn base_spec() -> InstanceSpec {
    InstanceSpec::builder()
        .name("aligner")
        .resources(4, 16, 100)
        .zone("zone")
        .instance_type("type")
        .image_label("label")
        .project_id("proj")
        .architecture("x86_64")
        .preemptible(true)
        .hourly_price(0.5)
        .build()
        .unwrap_or_else(|err| panic!("spec should build: {err}"))
}

fn provider_fixture(runner: ScriptedRunner) -> ScalewayProvider<ScriptedRunner> {
    let shell = RemoteShell::new(ssh_config(), runner)
        .unwrap_or_else(|err| panic!("ssh config should be valid: {err}"));
    ScalewayProvider {
        api: ScalewayApi::new("dummy"),
        config: dummy_config(),
        shell,
        servers: Mutex::new(HashMap::new()),
        poll_interval: Duration::from_millis(1),
        wait_timeout: Duration::from_millis(5),
    }
}

#[tokio::test]
async fn power_on_if_needed_returns_ok_for_running() {
    let snap = snapshot("id", "running", [Action::from("poweron")], Some("1.1.1.1"));
    let zone = Zone::from("zone");
    let result = provider_fixture(ScriptedRunner::new())
        .power_on_if_needed(&zone, &snap)
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn power_on_if_needed_errors_when_not_allowed() {
    let snap = snapshot("id", "stopped", Vec::<Action>::new(), None);
    let zone = Zone::from("zone");
    let result = provider_fixture(ScriptedRunner::new())
        .power_on_if_needed(&zone, &snap)
        .await;
    assert!(matches!(
        result,
        Err(ScalewayProviderError::PowerOnNotAllowed { .. })
    ));
}

#[test]
fn tags_record_the_pricing_tier() {
    let mut spec = base_spec();
    assert_eq!(instance_tags(&spec), vec!["respawn", "preemptible"]);
    spec.preemptible = false;
    assert_eq!(instance_tags(&spec), vec!["respawn", "standard"]);
}

#[rstest]
#[case(StatusCode::CONFLICT, false, true)]
#[case(StatusCode::TOO_MANY_REQUESTS, true, false)]
#[case(StatusCode::INTERNAL_SERVER_ERROR, false, false)]
fn rejected_creations_surface_engine_markers(
    #[case] status: StatusCode,
    #[case] rate_limited: bool,
    #[case] already_exists: bool,
) {
    let spec = base_spec();
    let failure = ProviderFailure::from(creation_error(status, b"not json", &spec));
    assert_eq!(failure.is_rate_limited(), rate_limited);
    assert_eq!(failure.is_already_exists(), already_exists);
    assert_eq!(failure.return_code, Some(1));
}

#[test]
fn unrecognised_rejections_keep_the_body() {
    let spec = base_spec();
    let err = creation_error(StatusCode::BAD_GATEWAY, b"upstream down", &spec);
    assert!(
        matches!(&err, ScalewayProviderError::Provider { message } if message == "upstream down"),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn untracked_servers_read_as_off() {
    let provider = provider_fixture(ScriptedRunner::new());
    let handle = base_spec().handle();

    let status = provider
        .poll_status(&handle)
        .await
        .unwrap_or_else(|err| panic!("status poll should succeed: {err}"));
    assert_eq!(status, ProcessorStatus::Off);

    let ready = provider
        .poll_startup_complete(&handle)
        .await
        .unwrap_or_else(|err| panic!("startup poll should succeed: {err}"));
    assert!(!ready);
}

#[tokio::test]
async fn destroying_an_untracked_server_is_a_no_op() {
    let provider = provider_fixture(ScriptedRunner::new());
    provider
        .destroy(&base_spec().handle())
        .await
        .unwrap_or_else(|err| panic!("destroy should succeed: {err}"));
}

#[tokio::test]
async fn executing_without_an_address_reports_a_lost_connection() {
    let runner = ScriptedRunner::new();
    let provider = provider_fixture(runner.clone());
    let request = ExecRequest {
        command: String::from("bwa mem ref.fa reads.fq"),
        sandbox_image: None,
    };

    let output = provider
        .execute(&base_spec().handle(), &request)
        .await
        .unwrap_or_else(|err| panic!("execute should report through output: {err}"));

    assert_eq!(output.code, Some(CONNECTION_LOST_EXIT_CODE));
    assert!(runner.invocations().is_empty(), "ssh must not be spawned");
}
