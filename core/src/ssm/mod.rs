//! Production session control speaking the SSM `x-amz-json-1.1` wire API.

mod sigv4;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use time::OffsetDateTime;

use crate::request::TunnelRequest;
use crate::session_control::SessionControl;
use crate::session_control::SessionControlError;
use crate::session_control::StartedSession;

/// SSM document driving remote-host port forwarding.
pub const SESSION_DOCUMENT_NAME: &str = "AWS-StartPortForwardingSessionToRemoteHost";

const SERVICE: &str = "ssm";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const USER_AGENT: &str = concat!("ssmtun/", env!("CARGO_PKG_VERSION"));

pub fn endpoint(region: &str) -> String {
    format!("https://ssm.{region}.amazonaws.com")
}

pub struct SsmClient {
    http: reqwest::Client,
}

impl SsmClient {
    pub fn new() -> Result<Self, SessionControlError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| SessionControlError::Request {
                operation: "client setup",
                message: err.to_string(),
            })?;
        Ok(Self { http })
    }

    async fn call(
        &self,
        operation: &'static str,
        region: &str,
        target: &str,
        body: &Value,
    ) -> Result<Value, SessionControlError> {
        let credentials = sigv4::Credentials::from_env()?;
        let payload = body.to_string().into_bytes();
        let host = format!("ssm.{region}.amazonaws.com");
        let signed = sigv4::sign(
            &credentials,
            region,
            SERVICE,
            &host,
            target,
            CONTENT_TYPE,
            &payload,
            OffsetDateTime::now_utc(),
        );

        let mut request = self
            .http
            .post(format!("{}/", endpoint(region)))
            .header("content-type", CONTENT_TYPE)
            .header("x-amz-target", target)
            .header("x-amz-date", &signed.amz_date)
            .header("authorization", &signed.authorization);
        if let Some(token) = &credentials.session_token {
            request = request.header("x-amz-security-token", token);
        }

        let response = request.body(payload).send().await.map_err(|err| {
            SessionControlError::Request {
                operation,
                message: err.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SessionControlError::Api {
                operation,
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|err| SessionControlError::Request {
                operation,
                message: format!("invalid response body: {err}"),
            })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StartSessionResponse {
    session_id: Option<String>,
    stream_url: Option<String>,
    token_value: Option<String>,
}

#[async_trait]
impl SessionControl for SsmClient {
    async fn start_session(
        &self,
        request: &TunnelRequest,
    ) -> Result<StartedSession, SessionControlError> {
        let body = json!({
            "Target": request.target,
            "DocumentName": SESSION_DOCUMENT_NAME,
            "Parameters": {
                "host": [request.host],
                "portNumber": [request.remote_port],
                "localPortNumber": [request.local_port],
            },
        });
        let value = self
            .call("StartSession", &request.region, "AmazonSSM.StartSession", &body)
            .await?;
        let response: StartSessionResponse =
            serde_json::from_value(value).map_err(|err| SessionControlError::Request {
                operation: "StartSession",
                message: format!("unexpected response shape: {err}"),
            })?;
        Ok(StartedSession {
            session_id: response.session_id,
            stream_url: response.stream_url,
            token_value: response.token_value,
        })
    }

    async fn terminate_session(
        &self,
        session_id: &str,
        region: &str,
    ) -> Result<(), SessionControlError> {
        let body = json!({ "SessionId": session_id });
        self.call(
            "TerminateSession",
            region,
            "AmazonSSM.TerminateSession",
            &body,
        )
        .await?;
        Ok(())
    }
}
