use eipkeeper::{
    config::ProviderConfig,
    provider::{
        AddressProvider, AddressProviderFactory, Ec2AddressProvider, Ec2ProviderFactory,
        ProviderCredentials, ProviderErrorKind,
    },
};

use super::StubEc2;

const ALLOCATE_OK: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<AllocateAddressResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
    <requestId>59dbff89-35bd-4eac-99ed-be587EXAMPLE</requestId>
    <publicIp>43.204.6.17</publicIp>
    <domain>vpc</domain>
    <allocationId>eipalloc-0a1b2c3d</allocationId>
</AllocateAddressResponse>"#;

const RELEASE_OK: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ReleaseAddressResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
    <requestId>59dbff89-35bd-4eac-99ed-be587EXAMPLE</requestId>
    <return>true</return>
</ReleaseAddressResponse>"#;

const THROTTLED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Response><Errors><Error><Code>RequestLimitExceeded</Code><Message>Request limit exceeded.</Message></Error></Errors><RequestID>ea966190</RequestID></Response>"#;

const AUTH_FAILURE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Response><Errors><Error><Code>AuthFailure</Code><Message>AWS was not able to validate the provided access credentials</Message></Error></Errors><RequestID>1a2b</RequestID></Response>"#;

fn credentials() -> ProviderCredentials {
    ProviderCredentials::new("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY", "ap-south-1")
}

fn config_for(stub: &StubEc2) -> ProviderConfig {
    ProviderConfig {
        endpoint: Some(stub.endpoint.clone()),
        request_timeout_ms: 5_000,
        ..ProviderConfig::default()
    }
}

#[tokio::test]
async fn acquire_sends_signed_allocate_address_and_parses_the_result() {
    let stub = StubEc2::start(vec![(200, ALLOCATE_OK)]).await;
    let provider = Ec2AddressProvider::new(&config_for(&stub), credentials())
        .expect("provider should build");

    let address = provider.acquire().await.expect("acquire should succeed");
    assert_eq!(address.public_ip, "43.204.6.17");
    assert_eq!(address.allocation_id, "eipalloc-0a1b2c3d");

    let requests = stub.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert!(request.request_line.starts_with("POST / "));
    assert!(request.body.contains("Action=AllocateAddress"));
    assert!(request.body.contains("Domain=vpc"));
    assert!(request.body.contains("Version=2016-11-15"));

    let authorization = request
        .header("authorization")
        .expect("request should be signed");
    assert!(authorization.starts_with(
        "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"
    ));
    assert!(authorization.contains("/ap-south-1/ec2/aws4_request"));
    assert!(authorization.contains("SignedHeaders=content-type;host;x-amz-date"));
    assert!(request.header("x-amz-date").is_some());
    assert!(request.header("x-amz-security-token").is_none());
    assert!(
        !request
            .headers
            .iter()
            .any(|(_, value)| value.contains("wJalrXUtnFEMI"))
    );
}

#[tokio::test]
async fn release_sends_allocation_id_and_accepts_true_return() {
    let stub = StubEc2::start(vec![(200, RELEASE_OK)]).await;
    let provider = Ec2AddressProvider::new(
        &config_for(&stub),
        credentials().with_session_token(Some("session-token".to_string())),
    )
    .expect("provider should build");

    provider
        .release("eipalloc-0a1b2c3d")
        .await
        .expect("release should succeed");

    let requests = stub.requests();
    let request = &requests[0];
    assert!(request.body.contains("Action=ReleaseAddress"));
    assert!(request.body.contains("AllocationId=eipalloc-0a1b2c3d"));
    assert_eq!(request.header("x-amz-security-token"), Some("session-token"));
    assert!(
        request
            .header("authorization")
            .is_some_and(|value| value.contains("x-amz-security-token"))
    );
}

#[tokio::test]
async fn throttled_response_maps_to_throttled_error() {
    let stub = StubEc2::start(vec![(400, THROTTLED)]).await;
    let provider = Ec2AddressProvider::new(&config_for(&stub), credentials())
        .expect("provider should build");

    let err = provider
        .release("eipalloc-0a1b2c3d")
        .await
        .expect_err("throttled release must fail");
    assert_eq!(err.kind, ProviderErrorKind::Throttled);
    assert_eq!(err.provider_code.as_deref(), Some("RequestLimitExceeded"));
    assert_eq!(err.http_status, Some(400));
}

#[tokio::test]
async fn factory_builds_providers_per_credential_set() {
    let stub = StubEc2::start(vec![(401, AUTH_FAILURE)]).await;
    let factory = Ec2ProviderFactory::new(config_for(&stub));

    let provider = factory
        .connect(&credentials())
        .expect("factory should build a provider");
    let err = provider
        .acquire()
        .await
        .expect_err("rejected credentials must fail");
    assert_eq!(err.kind, ProviderErrorKind::Authentication);
}

#[tokio::test]
async fn unreachable_endpoint_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("port should bind");
    let addr = listener.local_addr().expect("listener should have an address");
    drop(listener);

    let config = ProviderConfig {
        endpoint: Some(format!("http://{addr}/")),
        request_timeout_ms: 2_000,
        ..ProviderConfig::default()
    };
    let provider =
        Ec2AddressProvider::new(&config, credentials()).expect("provider should build");

    let err = provider.acquire().await.expect_err("nothing is listening");
    assert_eq!(err.kind, ProviderErrorKind::Transport);
}

#[test]
fn malformed_endpoint_is_rejected_up_front() {
    let config = ProviderConfig {
        endpoint: Some("not a url".to_string()),
        ..ProviderConfig::default()
    };
    let err = Ec2AddressProvider::new(&config, credentials())
        .err()
        .expect("malformed endpoint must fail");
    assert_eq!(err.kind, ProviderErrorKind::InvalidRequest);
}
