use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode, Url, header};
use time::OffsetDateTime;

use crate::{
    config::ProviderConfig,
    provider::{
        credentials::ProviderCredentials,
        error::{
            ProviderError, classify_response_error, invalid_request, protocol_violation,
            transport_error,
        },
        ports::{AcquiredAddress, AddressProvider, AddressProviderFactory},
        sigv4::{self, FORM_CONTENT_TYPE},
    },
};

const SERVICE: &str = "ec2";

/// Elastic IP gateway speaking the EC2 Query API directly.
#[derive(Clone)]
pub struct Ec2AddressProvider {
    client: Client,
    endpoint: Url,
    api_version: String,
    credentials: ProviderCredentials,
}

impl Ec2AddressProvider {
    pub fn new(config: &ProviderConfig, credentials: ProviderCredentials) -> Result<Self, ProviderError> {
        let endpoint_text = config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://ec2.{}.amazonaws.com/", credentials.region));
        let endpoint = Url::parse(&endpoint_text)
            .map_err(|err| invalid_request(format!("invalid ec2 endpoint '{endpoint_text}': {err}")))?;
        if endpoint.host_str().is_none() {
            return Err(invalid_request(format!(
                "ec2 endpoint '{endpoint_text}' has no host"
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| transport_error(format!("failed to build http client: {err}")))?;

        Ok(Self {
            client,
            endpoint,
            api_version: config.api_version.clone(),
            credentials,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn host_header(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    async fn call(&self, action: &str, params: &[(&str, &str)]) -> Result<String, ProviderError> {
        let mut form = vec![("Action", action), ("Version", self.api_version.as_str())];
        form.extend_from_slice(params);
        let body = sigv4::encode_form(&form);

        let signed = sigv4::sign_form_post(
            &self.credentials,
            SERVICE,
            &self.host_header(),
            &body,
            OffsetDateTime::now_utc(),
        )?;

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header(header::CONTENT_TYPE, FORM_CONTENT_TYPE)
            .header("x-amz-date", &signed.amz_date)
            .header(header::AUTHORIZATION, &signed.authorization);
        if let Some(token) = &signed.security_token {
            request = request.header("x-amz-security-token", token);
        }

        tracing::debug!(target: "provider", action = action, endpoint = %self.endpoint, "ec2_request");

        let response = request.body(body).send().await.map_err(|err| {
            let kind = if err.is_timeout() { "timed out" } else { "failed" };
            transport_error(format!("ec2 {action} request {kind}: {err}"))
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| transport_error(format!("failed to read ec2 {action} response: {err}")))?;

        if status != StatusCode::OK {
            return Err(response_error(action, status.as_u16(), &text));
        }

        Ok(text)
    }
}

#[async_trait]
impl AddressProvider for Ec2AddressProvider {
    async fn acquire(&self) -> Result<AcquiredAddress, ProviderError> {
        let body = self.call("AllocateAddress", &[("Domain", "vpc")]).await?;
        parse_allocate_response(&body)
    }

    async fn release(&self, allocation_id: &str) -> Result<(), ProviderError> {
        if allocation_id.trim().is_empty() {
            return Err(invalid_request("allocation id cannot be empty"));
        }
        let body = self
            .call("ReleaseAddress", &[("AllocationId", allocation_id)])
            .await?;
        parse_release_response(&body)
    }
}

/// Builds one [`Ec2AddressProvider`] per caller credential set.
#[derive(Debug, Clone, Default)]
pub struct Ec2ProviderFactory {
    config: ProviderConfig,
}

impl Ec2ProviderFactory {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

impl AddressProviderFactory for Ec2ProviderFactory {
    fn connect(
        &self,
        credentials: &ProviderCredentials,
    ) -> Result<Arc<dyn AddressProvider>, ProviderError> {
        Ok(Arc::new(Ec2AddressProvider::new(
            &self.config,
            credentials.clone(),
        )?))
    }
}

/// Text of the first `<tag>...</tag>` leaf, with the predefined XML entities
/// decoded. Numeric character references are left as-is.
fn tag_value(body: &str, tag: &str) -> Option<String> {
    static TAGS: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = TAGS
        .get_or_init(|| Regex::new(r"<([A-Za-z]+)>([^<]*)</([A-Za-z]+)>").ok())
        .as_ref()?;

    pattern.captures_iter(body).find_map(|captures| {
        let (open, value, close) = (captures.get(1)?, captures.get(2)?, captures.get(3)?);
        (open.as_str() == tag && close.as_str() == tag)
            .then(|| decode_entities(value.as_str().trim()))
    })
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

pub fn parse_allocate_response(body: &str) -> Result<AcquiredAddress, ProviderError> {
    let public_ip = tag_value(body, "publicIp")
        .filter(|value| !value.is_empty())
        .ok_or_else(|| protocol_violation("AllocateAddress response is missing publicIp"))?;
    let allocation_id = tag_value(body, "allocationId")
        .filter(|value| !value.is_empty())
        .ok_or_else(|| protocol_violation("AllocateAddress response is missing allocationId"))?;

    Ok(AcquiredAddress {
        public_ip,
        allocation_id,
    })
}

pub fn parse_release_response(body: &str) -> Result<(), ProviderError> {
    match tag_value(body, "return").as_deref() {
        Some("true") => Ok(()),
        Some(other) => Err(protocol_violation(format!(
            "ReleaseAddress returned '{other}'"
        ))),
        None => Err(protocol_violation("ReleaseAddress response is missing return")),
    }
}

fn response_error(action: &str, status: u16, body: &str) -> ProviderError {
    let code = tag_value(body, "Code");
    let message = tag_value(body, "Message")
        .unwrap_or_else(|| "no error message in response".to_string());
    let mut err = ProviderError::new(
        classify_response_error(status, code.as_deref()),
        format!("ec2 {action} failed: {message}"),
    )
    .with_http_status(status);
    if let Some(code) = code {
        err = err.with_provider_code(code);
    }
    err
}
