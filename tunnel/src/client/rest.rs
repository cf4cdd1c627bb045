//! HTTP implementation of the client traits.
//!
//! Table sessions live under `/projects/{project}/schemas/{schema}/tables/{table}/sessions`,
//! instances under `/projects/{project}/instances`. Request and response bodies are JSON with
//! PascalCase keys. Block data is uploaded as a chunked `application/octet-stream` body fed from
//! an in-process channel, so a block can be streamed while its batches are still being encoded.

use std::collections::BTreeMap;
use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use futures::channel::mpsc;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error};
use tunnel_config::shared::ServiceConfig;

use crate::client::{
    BlockStream, InstanceClient, ReadSessionClient, TableSessionClient, WriteSessionClient,
};
use crate::error::{ErrorKind, TunnelError, TunnelResult};
use crate::types::{
    BlockOpenRequest, CommitMessage, InstanceId, InstanceRequest, PaginationMarker, ScanScope,
    SessionId, SessionKind, SessionStatus, Split, SplitPage, TableIdentifier, TableSession,
    TaskStatus, WriteSessionOptions,
};
use crate::{bail, tunnel_error};

/// Header carrying the id the service assigned to a request.
pub const REQUEST_ID_HEADER: &str = "x-odps-request-id";

/// Number of encoded chunks buffered between a block writer and its upload.
const BLOCK_CHANNEL_CAPACITY: usize = 16;

/// Task type of interactive SQL sessions.
const SQL_RT_TASK_TYPE: &str = "SQLRT";

/// Hours a generated log view link stays valid.
const LOG_VIEW_HOURS: u32 = 7 * 24;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceFault {
    request_id: Option<String>,
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateSessionBody<'a> {
    session_type: SessionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<ScopeBody<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    overwrite: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    partition_spec: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ScopeBody<'a> {
    required_partitions: &'a [String],
    required_columns: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    filter_predicate: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SessionBody {
    session_id: SessionId,
    session_type: SessionKind,
    session_status: SessionStatus,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    log_view: Option<String>,
}

impl SessionBody {
    fn into_session(self, table: &TableIdentifier) -> TableSession {
        TableSession {
            id: self.session_id,
            table: table.clone(),
            kind: self.session_type,
            status: self.session_status,
            message: self.message.filter(|message| !message.is_empty()),
            log_view: self.log_view,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SplitBody {
    key: String,
    locator: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListSplitsBody {
    #[serde(default)]
    splits: Vec<SplitBody>,
    #[serde(default)]
    marker: Option<PaginationMarker>,
    #[serde(default)]
    max_items: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlockCommitBody {
    #[serde(default)]
    commit_message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CommitSessionBody<'a> {
    commit_messages: Vec<CommitMessageBody<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CommitMessageBody<'a> {
    block_number: u64,
    attempt_number: u32,
    message: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateInstanceBody<'a> {
    instance: InstanceBody<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    priority: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    running_cluster: Option<&'a str>,
    tasks: Vec<TaskBody<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct TaskBody<'a> {
    #[serde(rename = "Type")]
    kind: &'static str,
    name: &'a str,
    properties: BTreeMap<&'static str, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateInstanceResponse {
    instance_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct TaskInfoBody<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TasksBody<T> {
    #[serde(default = "Vec::new")]
    tasks: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TaskStatusBody {
    name: String,
    status: TaskStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TaskResultBody {
    name: String,
    #[serde(default)]
    result: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StopInstanceBody {
    instance: StopStatusBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StopStatusBody {
    status: &'static str,
}

/// Client for the table service REST API.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: Client,
    endpoint: String,
    access_token: Option<SecretString>,
    request_timeout: Duration,
    log_view_host: Option<String>,
}

impl RestClient {
    /// Creates a client from a validated service configuration.
    pub fn new(config: &ServiceConfig) -> TunnelResult<Self> {
        config.validate()?;

        let endpoint = Url::parse(&config.endpoint).map_err(|err| {
            tunnel_error!(
                ErrorKind::ValidationError,
                "Invalid service endpoint",
                config.endpoint,
                source: err
            )
        })?;
        if endpoint.host_str().is_none_or(str::is_empty) {
            bail!(
                ErrorKind::ValidationError,
                "Invalid service endpoint",
                format!("endpoint '{}' has no host", config.endpoint)
            );
        }

        // Round trips get a per-request timeout; block uploads stream for as long as needed.
        let http = Client::builder().build()?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            log_view_host: config.log_view_host.clone(),
        })
    }

    fn sessions_url(&self, table: &TableIdentifier) -> String {
        format!(
            "{}/projects/{}/schemas/{}/tables/{}/sessions",
            self.endpoint, table.project, table.schema, table.table
        )
    }

    fn session_url(&self, table: &TableIdentifier, session_id: &SessionId) -> String {
        format!("{}/{}", self.sessions_url(table), session_id)
    }

    fn instances_url(&self, project: &str) -> String {
        format!("{}/projects/{}/instances", self.endpoint, project)
    }

    fn instance_url(&self, instance: &InstanceId) -> String {
        format!("{}/{}", self.instances_url(instance.project()), instance)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let request = self.http.request(method, url);
        match &self.access_token {
            Some(token) => {
                request.header(AUTHORIZATION, format!("Bearer {}", token.expose_secret()))
            }
            None => request,
        }
    }

    /// Sends a request-response round trip and fails on a non-success status.
    async fn send(&self, request: RequestBuilder) -> TunnelResult<Response> {
        let response = request.timeout(self.request_timeout).send().await?;
        check_response(response).await
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> TunnelResult<T> {
        let response = self.send(request).await?;
        let body = response.text().await?;

        Ok(serde_json::from_str(&body)?)
    }

    /// Like [`RestClient::send`] but treats `accepted` statuses as success.
    async fn send_tolerating(
        &self,
        request: RequestBuilder,
        accepted: &[StatusCode],
    ) -> TunnelResult<()> {
        let response = request.timeout(self.request_timeout).send().await?;
        if accepted.contains(&response.status()) {
            debug!(status = %response.status(), "tolerated service status");
            return Ok(());
        }

        check_response(response).await?;
        Ok(())
    }
}

/// Converts a non-success response into a transport fault.
async fn check_response(response: Response) -> TunnelResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    Err(fault_error(response).await)
}

async fn fault_error(response: Response) -> TunnelError {
    let status = response.status();
    let header_request_id = response
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unable to read body>".to_string());

    let fault: ServiceFault = serde_json::from_str(&body).unwrap_or_default();
    let request_id = header_request_id
        .or(fault.request_id)
        .unwrap_or_else(|| "unknown".to_string());
    let code = fault
        .code
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown").to_string());
    let message = fault.message.unwrap_or(body);

    error!(
        status = %status,
        request_id = %request_id,
        code = %code,
        "table service request failed"
    );

    tunnel_error!(
        ErrorKind::ServiceRequestFailed,
        "Table service returned an error",
        format!(
            "status {}, request id {request_id}, code {code}: {message}",
            status.as_u16()
        )
    )
}

impl TableSessionClient for RestClient {
    async fn get_session(
        &self,
        table: &TableIdentifier,
        session_id: &SessionId,
        kind: SessionKind,
    ) -> TunnelResult<TableSession> {
        let request = self
            .request(Method::GET, &self.session_url(table, session_id))
            .query(&[("session_type", kind.to_string())]);
        let body: SessionBody = self.send_json(request).await?;

        Ok(body.into_session(table))
    }

    async fn cleanup_session(&self, session: &TableSession) -> TunnelResult<()> {
        let request = self.request(
            Method::DELETE,
            &self.session_url(&session.table, &session.id),
        );

        self.send_tolerating(request, &[StatusCode::NOT_FOUND])
            .await
    }
}

impl ReadSessionClient for RestClient {
    async fn create_read_session(
        &self,
        table: &TableIdentifier,
        scope: &ScanScope,
    ) -> TunnelResult<TableSession> {
        let body = CreateSessionBody {
            session_type: SessionKind::BatchRead,
            scope: Some(ScopeBody {
                required_partitions: &scope.partitions,
                required_columns: &scope.columns,
                filter_predicate: scope.filter.as_deref(),
            }),
            overwrite: None,
            partition_spec: None,
        };

        let request = self
            .request(Method::POST, &self.sessions_url(table))
            .json(&body);
        let body: SessionBody = self.send_json(request).await?;

        Ok(body.into_session(table))
    }

    /// The projection and filter of `scope` are fixed when the session is created; only the
    /// page size is sent with each page request.
    async fn list_splits(
        &self,
        session: &TableSession,
        scope: &ScanScope,
        marker: Option<&PaginationMarker>,
    ) -> TunnelResult<SplitPage> {
        let mut params = vec![("expectmarker", "true".to_string())];
        if let Some(marker) = marker {
            params.push(("marker", marker.to_string()));
        }
        if let Some(page_size) = scope.page_size {
            params.push(("maxitems", page_size.to_string()));
        }

        let url = format!("{}/splits", self.session_url(&session.table, &session.id));
        let request = self.request(Method::GET, &url).query(&params);
        let body: ListSplitsBody = self.send_json(request).await?;

        Ok(SplitPage {
            splits: body
                .splits
                .into_iter()
                .map(|split| Split::new(split.key, split.locator))
                .collect(),
            next_marker: body.marker,
            max_items: body.max_items,
        })
    }

    async fn list_splits_in_range(
        &self,
        session: &TableSession,
        lower: &str,
        upper: Option<&str>,
    ) -> TunnelResult<Vec<Split>> {
        let mut params = vec![("min_value", lower)];
        if let Some(upper) = upper {
            params.push(("max_value", upper));
        }

        let url = format!("{}/splits", self.session_url(&session.table, &session.id));
        let request = self.request(Method::GET, &url).query(&params);
        let body: ListSplitsBody = self.send_json(request).await?;

        Ok(body
            .splits
            .into_iter()
            .map(|split| Split::new(split.key, split.locator))
            .collect())
    }
}

/// Chunked upload of one block attempt.
///
/// Dropping the stream before [`BlockStream::finish`] cancels the upload so the service never
/// mistakes a partial body for a complete block.
#[derive(Debug)]
pub struct RestBlockStream {
    sender: Option<mpsc::Sender<Result<Bytes, io::Error>>>,
    response: Option<JoinHandle<Result<Response, reqwest::Error>>>,
}

impl RestBlockStream {
    async fn take_response(&mut self) -> TunnelResult<Response> {
        let Some(handle) = self.response.take() else {
            bail!(ErrorKind::InvalidState, "Block upload already completed");
        };

        match handle.await {
            Ok(Ok(response)) => check_response(response).await,
            Ok(Err(err)) => Err(err.into()),
            Err(err) => bail!(
                ErrorKind::ServiceIoError,
                "Block upload task failed",
                err
            ),
        }
    }

    fn cancel(&mut self) {
        if let Some(mut sender) = self.sender.take() {
            let _ = sender.try_send(Err(io::Error::other("block upload aborted")));
        }

        if let Some(handle) = self.response.take() {
            handle.abort();
        }
    }
}

impl Drop for RestBlockStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl BlockStream for RestBlockStream {
    async fn send(&mut self, chunk: Bytes) -> TunnelResult<()> {
        let Some(sender) = self.sender.as_mut() else {
            bail!(ErrorKind::InvalidState, "Block upload is closed");
        };

        if sender.send(Ok(chunk)).await.is_err() {
            // The request ended early, which only happens when the service rejected it.
            self.sender = None;
            self.take_response().await?;
            bail!(
                ErrorKind::ServiceIoError,
                "Block upload ended before all data was sent"
            );
        }

        Ok(())
    }

    async fn finish(mut self) -> TunnelResult<String> {
        // Closing the channel ends the chunked body.
        self.sender = None;

        let response = self.take_response().await?;
        let body = response.text().await?;
        let commit: BlockCommitBody = serde_json::from_str(&body).map_err(|err| {
            tunnel_error!(
                ErrorKind::DeserializationError,
                "Parsing the block commit response failed",
                body,
                source: err
            )
        })?;

        Ok(commit.commit_message.unwrap_or_default())
    }

    async fn abort(mut self) {
        self.cancel();
    }
}

impl WriteSessionClient for RestClient {
    type Stream = RestBlockStream;

    async fn create_write_session(
        &self,
        table: &TableIdentifier,
        options: &WriteSessionOptions,
    ) -> TunnelResult<TableSession> {
        let body = CreateSessionBody {
            session_type: SessionKind::BatchWrite,
            scope: None,
            overwrite: Some(options.overwrite),
            partition_spec: options.partition.as_deref(),
        };

        let request = self
            .request(Method::POST, &self.sessions_url(table))
            .json(&body);
        let body: SessionBody = self.send_json(request).await?;

        Ok(body.into_session(table))
    }

    async fn open_block(&self, request: &BlockOpenRequest) -> TunnelResult<Self::Stream> {
        let url = format!(
            "{}/data",
            self.session_url(&request.table, &request.session_id)
        );
        let params = [
            ("block_number", request.block_number.to_string()),
            ("attempt_number", request.attempt.to_string()),
            ("data_format_type", request.data_format.kind.to_string()),
            ("data_format_version", request.data_format.version.to_string()),
        ];

        let (sender, receiver) = mpsc::channel(BLOCK_CHANNEL_CAPACITY);
        let upload = self
            .request(Method::POST, &url)
            .query(&params)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(reqwest::Body::wrap_stream(receiver));

        debug!(
            session_id = %request.session_id,
            block = request.block_number,
            attempt = %request.attempt,
            "opening block upload"
        );

        Ok(RestBlockStream {
            sender: Some(sender),
            response: Some(tokio::spawn(upload.send())),
        })
    }

    async fn commit_session(
        &self,
        session: &TableSession,
        messages: &[CommitMessage],
    ) -> TunnelResult<TableSession> {
        let body = CommitSessionBody {
            commit_messages: messages
                .iter()
                .map(|message| CommitMessageBody {
                    block_number: message.block_number(),
                    attempt_number: message.attempt().attempt_number(),
                    message: message.token(),
                })
                .collect(),
        };

        let url = format!("{}/commit", self.session_url(&session.table, &session.id));
        let request = self.request(Method::POST, &url).json(&body);
        let body: SessionBody = self.send_json(request).await?;

        Ok(body.into_session(&session.table))
    }
}

impl InstanceClient for RestClient {
    async fn create_instance(&self, request: &InstanceRequest) -> TunnelResult<InstanceId> {
        let settings = serde_json::to_string(&request.settings)?;
        let body = CreateInstanceBody {
            instance: InstanceBody {
                priority: request.priority,
                running_cluster: request.running_cluster.as_deref(),
                tasks: vec![TaskBody {
                    kind: SQL_RT_TASK_TYPE,
                    name: &request.task_name,
                    properties: BTreeMap::from([("settings", settings)]),
                }],
            },
        };

        let http_request = self
            .request(Method::POST, &self.instances_url(&request.project))
            .json(&body);
        let response: CreateInstanceResponse = self.send_json(http_request).await?;

        Ok(InstanceId::new(
            request.project.clone(),
            response.instance_id,
        ))
    }

    async fn task_info(
        &self,
        instance: &InstanceId,
        task_name: &str,
        key: &str,
    ) -> TunnelResult<Option<String>> {
        let request = self
            .request(Method::GET, &self.instance_url(instance))
            .query(&[("info", ""), ("taskname", task_name), ("key", key)]);
        let body = self.send(request).await?.text().await?;

        Ok(Some(body).filter(|body| !body.is_empty()))
    }

    async fn set_task_info(
        &self,
        instance: &InstanceId,
        task_name: &str,
        key: &str,
        value: &str,
    ) -> TunnelResult<String> {
        let request = self
            .request(Method::PUT, &self.instance_url(instance))
            .query(&[("info", ""), ("taskname", task_name)])
            .json(&TaskInfoBody { key, value });

        Ok(self.send(request).await?.text().await?)
    }

    async fn task_status(
        &self,
        instance: &InstanceId,
        task_name: &str,
    ) -> TunnelResult<Option<TaskStatus>> {
        let request = self
            .request(Method::GET, &self.instance_url(instance))
            .query(&[("taskstatus", "")]);
        let body: TasksBody<TaskStatusBody> = self.send_json(request).await?;

        Ok(body
            .tasks
            .into_iter()
            .find(|task| task.name == task_name)
            .map(|task| task.status))
    }

    async fn task_result(
        &self,
        instance: &InstanceId,
        task_name: &str,
    ) -> TunnelResult<Option<String>> {
        let request = self
            .request(Method::GET, &self.instance_url(instance))
            .query(&[("result", "")]);
        let body: TasksBody<TaskResultBody> = self.send_json(request).await?;

        Ok(body
            .tasks
            .into_iter()
            .find(|task| task.name == task_name)
            .and_then(|task| task.result))
    }

    async fn stop_instance(&self, instance: &InstanceId) -> TunnelResult<()> {
        let request = self
            .request(Method::PUT, &self.instance_url(instance))
            .json(&StopInstanceBody {
                instance: StopStatusBody {
                    status: "Terminated",
                },
            });

        // The service answers 409 for instances that already ended.
        self.send_tolerating(request, &[StatusCode::CONFLICT])
            .await
    }

    async fn log_view(&self, instance: &InstanceId) -> TunnelResult<Option<String>> {
        let Some(host) = &self.log_view_host else {
            return Ok(None);
        };

        let url = Url::parse_with_params(
            &format!("{}/logview/", host.trim_end_matches('/')),
            &[
                ("h", self.endpoint.as_str()),
                ("p", instance.project()),
                ("i", instance.as_str()),
                ("hours", &LOG_VIEW_HOURS.to_string()),
            ],
        )
        .map_err(|err| {
            tunnel_error!(
                ErrorKind::ConfigError,
                "Invalid log view host",
                host,
                source: err
            )
        })?;

        Ok(Some(url.to_string()))
    }
}
