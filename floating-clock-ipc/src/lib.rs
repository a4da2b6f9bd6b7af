//! Inter-process communication between floating-clockd and its UI surfaces
//!
//! We use Unix domain sockets for local IPC. Every message is one JSON value
//! on its own line, and a connection stays open for as many calls as the
//! caller wants to make, much like a long-lived extension port.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::io::ErrorKind;
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

pub const SOCKET_PATH: &str = "/tmp/floating-clock.sock";

/// A call as it travels on the wire, before validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub call: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub input: Value,
}

/// Calls a UI surface can make against the timer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    SwitchTimer,
    IsRunning,
    ChangeTime { time: u64 },
    ResetTime,
    GetTime,
    IsVisible { site: Option<String> },
    SetVisibility { is_visible: bool, site: Option<String> },
    IsSuspended,
    SetSuspended { is_suspended: bool },
}

impl Request {
    /// Name of the call on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Request::SwitchTimer => "switchTimer",
            Request::IsRunning => "isRunning",
            Request::ChangeTime { .. } => "changeTime",
            Request::ResetTime => "resetTime",
            Request::GetTime => "getTime",
            Request::IsVisible { .. } => "isVisible",
            Request::SetVisibility { .. } => "setVisibility",
            Request::IsSuspended => "isSuspended",
            Request::SetSuspended { .. } => "setSuspended",
        }
    }

    /// Queries never touch stored state
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            Request::IsRunning | Request::GetTime | Request::IsVisible { .. } | Request::IsSuspended
        )
    }
}

impl From<&Request> for Call {
    fn from(request: &Request) -> Self {
        let input = match request {
            Request::ChangeTime { time } => json!({ "time": time }),
            Request::IsVisible { site } => with_site(Map::new(), site),
            Request::SetVisibility { is_visible, site } => {
                let mut input = Map::new();
                input.insert("isVisible".to_string(), Value::Bool(*is_visible));
                with_site(input, site)
            }
            Request::SetSuspended { is_suspended } => json!({ "isSuspended": is_suspended }),
            Request::SwitchTimer
            | Request::IsRunning
            | Request::ResetTime
            | Request::GetTime
            | Request::IsSuspended => Value::Null,
        };
        Call {
            call: request.name().to_string(),
            input,
        }
    }
}

fn with_site(mut input: Map<String, Value>, site: &Option<String>) -> Value {
    if let Some(site) = site {
        input.insert("site".to_string(), Value::String(site.clone()));
    }
    Value::Object(input)
}

impl TryFrom<Call> for Request {
    type Error = RpcError;

    /// Validates the raw input of a call. Nothing is applied on failure.
    fn try_from(call: Call) -> Result<Self, RpcError> {
        let input = Input(&call.input);
        let request = match call.call.as_str() {
            "switchTimer" => Request::SwitchTimer,
            "isRunning" => Request::IsRunning,
            "changeTime" => Request::ChangeTime {
                time: input.seconds("time")?,
            },
            "resetTime" => Request::ResetTime,
            "getTime" => Request::GetTime,
            "isVisible" => Request::IsVisible {
                site: input.site("site")?,
            },
            "setVisibility" => Request::SetVisibility {
                is_visible: input.flag("isVisible")?,
                site: input.site("site")?,
            },
            "isSuspended" => Request::IsSuspended,
            "setSuspended" => Request::SetSuspended {
                is_suspended: input.flag("isSuspended")?,
            },
            other => return Err(RpcError::UnknownCall(other.to_string())),
        };
        Ok(request)
    }
}

struct Input<'a>(&'a Value);

impl Input<'_> {
    fn field(&self, name: &str) -> Result<Option<&Value>, RpcError> {
        match self.0 {
            Value::Null => Ok(None),
            Value::Object(map) => Ok(map.get(name).filter(|value| !value.is_null())),
            _ => Err(RpcError::invalid("input", "expected an object")),
        }
    }

    fn required(&self, name: &str) -> Result<&Value, RpcError> {
        self.field(name)?
            .ok_or_else(|| RpcError::invalid(name, "required"))
    }

    fn seconds(&self, name: &str) -> Result<u64, RpcError> {
        let value = self.required(name)?;
        match value.as_u64() {
            Some(seconds) => Ok(seconds),
            None if value.is_number() => {
                Err(RpcError::invalid(name, "expected a non-negative integer"))
            }
            None => Err(RpcError::invalid(name, "expected a number")),
        }
    }

    fn flag(&self, name: &str) -> Result<bool, RpcError> {
        self.required(name)?
            .as_bool()
            .ok_or_else(|| RpcError::invalid(name, "expected a boolean"))
    }

    fn site(&self, name: &str) -> Result<Option<String>, RpcError> {
        match self.field(name)? {
            None => Ok(None),
            Some(Value::String(site)) if site.is_empty() => {
                Err(RpcError::invalid(name, "must contain at least 1 character"))
            }
            Some(Value::String(site)) => Ok(Some(site.clone())),
            Some(_) => Err(RpcError::invalid(name, "expected a string")),
        }
    }
}

/// Value returned by a successful call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Done,
    Flag(bool),
    Seconds(u64),
}

/// Errors the daemon reports back to the caller
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RpcError {
    #[error("invalid `{field}`: {message}")]
    Validation { field: String, message: String },

    #[error("unknown call `{0}`")]
    UnknownCall(String),

    #[error("malformed call: {0}")]
    Malformed(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("timer service is not running")]
    Unavailable,
}

impl RpcError {
    pub fn invalid(field: &str, message: &str) -> Self {
        RpcError::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

/// Responses from floating-clockd, one per call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Response {
    Ok(Reply),
    Error(RpcError),
}

impl From<Result<Reply, RpcError>> for Response {
    fn from(result: Result<Reply, RpcError>) -> Self {
        match result {
            Ok(reply) => Response::Ok(reply),
            Err(e) => Response::Error(e),
        }
    }
}

impl Response {
    pub fn into_result(self) -> Result<Reply, RpcError> {
        match self {
            Response::Ok(reply) => Ok(reply),
            Response::Error(e) => Err(e),
        }
    }
}

/// Serializes a message followed by the line terminator
pub fn encode_line<T: Serialize>(message: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    Ok(line)
}

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection refused - is floating-clockd running?")]
    ConnectionRefused,

    #[error("Connection closed by floating-clockd")]
    Disconnected,

    #[error(transparent)]
    Rejected(#[from] RpcError),

    #[error("Unexpected reply to `{call}`: {reply:?}")]
    UnexpectedReply { call: &'static str, reply: Reply },
}

impl IpcError {
    /// The connection is unusable and a fresh one is needed
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            IpcError::Io(_) | IpcError::ConnectionRefused | IpcError::Disconnected
        )
    }
}

/// Typed proxy over one connection to floating-clockd.
///
/// Calls are sent one at a time and never retried; a failed call leaves
/// it to the caller to try again on its own cadence.
pub struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, IpcError> {
        let stream = UnixStream::connect(path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::ConnectionRefused => IpcError::ConnectionRefused,
            _ => IpcError::Io(e),
        })?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    pub async fn call(&mut self, request: &Request) -> Result<Reply, IpcError> {
        let line = encode_line(&Call::from(request))?;
        self.writer.write_all(&line).await.map_err(dropped)?;

        let line = self
            .lines
            .next_line()
            .await
            .map_err(dropped)?
            .ok_or(IpcError::Disconnected)?;
        let response: Response = serde_json::from_str(&line)?;
        Ok(response.into_result()?)
    }

    pub async fn switch_timer(&mut self) -> Result<(), IpcError> {
        self.call(&Request::SwitchTimer).await.map(drop)
    }

    pub async fn is_running(&mut self) -> Result<bool, IpcError> {
        let reply = self.call(&Request::IsRunning).await?;
        flag("isRunning", reply)
    }

    pub async fn change_time(&mut self, time: u64) -> Result<(), IpcError> {
        self.call(&Request::ChangeTime { time }).await.map(drop)
    }

    pub async fn reset_time(&mut self) -> Result<(), IpcError> {
        self.call(&Request::ResetTime).await.map(drop)
    }

    pub async fn get_time(&mut self) -> Result<u64, IpcError> {
        match self.call(&Request::GetTime).await? {
            Reply::Seconds(seconds) => Ok(seconds),
            reply => Err(IpcError::UnexpectedReply {
                call: "getTime",
                reply,
            }),
        }
    }

    pub async fn is_visible(&mut self, site: Option<String>) -> Result<bool, IpcError> {
        let reply = self.call(&Request::IsVisible { site }).await?;
        flag("isVisible", reply)
    }

    pub async fn set_visibility(
        &mut self,
        is_visible: bool,
        site: Option<String>,
    ) -> Result<(), IpcError> {
        self.call(&Request::SetVisibility { is_visible, site })
            .await
            .map(drop)
    }

    pub async fn is_suspended(&mut self) -> Result<bool, IpcError> {
        let reply = self.call(&Request::IsSuspended).await?;
        flag("isSuspended", reply)
    }

    pub async fn set_suspended(&mut self, is_suspended: bool) -> Result<(), IpcError> {
        self.call(&Request::SetSuspended { is_suspended })
            .await
            .map(drop)
    }
}

fn dropped(e: std::io::Error) -> IpcError {
    match e.kind() {
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::UnexpectedEof => {
            IpcError::Disconnected
        }
        _ => IpcError::Io(e),
    }
}

fn flag(call: &'static str, reply: Reply) -> Result<bool, IpcError> {
    match reply {
        Reply::Flag(value) => Ok(value),
        reply => Err(IpcError::UnexpectedReply { call, reply }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    fn parse(line: &str) -> Result<Request, RpcError> {
        let call: Call = serde_json::from_str(line).unwrap();
        Request::try_from(call)
    }

    fn field_of(err: RpcError) -> String {
        match err {
            RpcError::Validation { field, .. } => field,
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn calls_without_input_parse() {
        assert_eq!(parse(r#"{"call":"switchTimer"}"#), Ok(Request::SwitchTimer));
        assert_eq!(parse(r#"{"call":"getTime","input":null}"#), Ok(Request::GetTime));
        assert_eq!(parse(r#"{"call":"isSuspended"}"#), Ok(Request::IsSuspended));
    }

    #[test]
    fn queries_are_told_apart_from_mutations() {
        assert!(Request::GetTime.is_query());
        assert!(Request::IsVisible { site: None }.is_query());
        assert!(!Request::ResetTime.is_query());
        assert!(!Request::SetSuspended { is_suspended: true }.is_query());
    }

    #[test]
    fn change_time_requires_a_non_negative_integer() {
        assert_eq!(
            parse(r#"{"call":"changeTime","input":{"time":90}}"#),
            Ok(Request::ChangeTime { time: 90 })
        );
        assert_eq!(
            field_of(parse(r#"{"call":"changeTime","input":{"time":"90"}}"#).unwrap_err()),
            "time"
        );
        assert_eq!(
            field_of(parse(r#"{"call":"changeTime","input":{"time":-1}}"#).unwrap_err()),
            "time"
        );
        assert_eq!(
            field_of(parse(r#"{"call":"changeTime","input":{"time":1.5}}"#).unwrap_err()),
            "time"
        );
        assert_eq!(
            field_of(parse(r#"{"call":"changeTime"}"#).unwrap_err()),
            "time"
        );
    }

    #[test]
    fn set_visibility_rejects_empty_site() {
        assert_eq!(
            parse(r#"{"call":"setVisibility","input":{"isVisible":false,"site":"a.com"}}"#),
            Ok(Request::SetVisibility {
                is_visible: false,
                site: Some("a.com".to_string())
            })
        );
        assert_eq!(
            parse(r#"{"call":"setVisibility","input":{"isVisible":true}}"#),
            Ok(Request::SetVisibility {
                is_visible: true,
                site: None
            })
        );
        assert_eq!(
            field_of(
                parse(r#"{"call":"setVisibility","input":{"isVisible":true,"site":""}}"#)
                    .unwrap_err()
            ),
            "site"
        );
        assert_eq!(
            field_of(parse(r#"{"call":"setVisibility","input":{"site":"a.com"}}"#).unwrap_err()),
            "isVisible"
        );
    }

    #[test]
    fn is_visible_site_is_optional() {
        assert_eq!(
            parse(r#"{"call":"isVisible","input":{}}"#),
            Ok(Request::IsVisible { site: None })
        );
        assert_eq!(
            parse(r#"{"call":"isVisible"}"#),
            Ok(Request::IsVisible { site: None })
        );
        assert_eq!(
            field_of(parse(r#"{"call":"isVisible","input":{"site":7}}"#).unwrap_err()),
            "site"
        );
    }

    #[test]
    fn set_suspended_requires_flag() {
        assert_eq!(
            parse(r#"{"call":"setSuspended","input":{"isSuspended":true}}"#),
            Ok(Request::SetSuspended { is_suspended: true })
        );
        assert_eq!(
            field_of(parse(r#"{"call":"setSuspended","input":{}}"#).unwrap_err()),
            "isSuspended"
        );
        assert_eq!(
            field_of(parse(r#"{"call":"setSuspended","input":[true]}"#).unwrap_err()),
            "input"
        );
    }

    #[test]
    fn unknown_call_is_rejected() {
        assert_eq!(
            parse(r#"{"call":"startStopTime"}"#),
            Err(RpcError::UnknownCall("startStopTime".to_string()))
        );
    }

    #[test]
    fn requests_survive_the_wire() {
        let requests = [
            Request::SwitchTimer,
            Request::ChangeTime { time: 1500 },
            Request::IsVisible {
                site: Some("example.org".to_string()),
            },
            Request::SetVisibility {
                is_visible: false,
                site: None,
            },
            Request::SetSuspended { is_suspended: true },
        ];
        for request in requests {
            let line = serde_json::to_string(&Call::from(&request)).unwrap();
            assert_eq!(parse(&line), Ok(request));
        }
    }

    #[test]
    fn response_wire_shape() {
        let ok = serde_json::to_string(&Response::Ok(Reply::Seconds(97))).unwrap();
        assert_eq!(ok, r#"{"ok":97}"#);
        let done = serde_json::to_string(&Response::Ok(Reply::Done)).unwrap();
        assert_eq!(done, r#"{"ok":null}"#);

        let parsed: Response = serde_json::from_str(r#"{"ok":null}"#).unwrap();
        assert_eq!(parsed, Response::Ok(Reply::Done));
        let parsed: Response = serde_json::from_str(r#"{"ok":true}"#).unwrap();
        assert_eq!(parsed, Response::Ok(Reply::Flag(true)));

        let err = Response::Error(RpcError::invalid("time", "expected a number"));
        let line = serde_json::to_string(&err).unwrap();
        let parsed: Response = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, err);
    }

    #[tokio::test]
    async fn connect_without_daemon_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let result = Client::connect(dir.path().join("missing.sock")).await;
        assert!(matches!(result, Err(IpcError::ConnectionRefused)));
    }

    #[tokio::test]
    async fn closed_connection_reports_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clock.sock");
        let listener = UnixListener::bind(&path).unwrap();

        // Answers a single call, then hangs up
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            lines.next_line().await.unwrap();
            let reply = encode_line(&Response::Ok(Reply::Seconds(7))).unwrap();
            writer.write_all(&reply).await.unwrap();
        });

        let mut client = Client::connect(&path).await.unwrap();
        assert_eq!(client.get_time().await.unwrap(), 7);

        let err = client.get_time().await.unwrap_err();
        assert!(matches!(err, IpcError::Disconnected), "got {err:?}");
        assert!(err.is_transport());
        assert!(!IpcError::Rejected(RpcError::Unavailable).is_transport());
    }

    #[tokio::test]
    async fn client_decodes_replies_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clock.sock");
        let listener = UnixListener::bind(&path).unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            while let Some(line) = lines.next_line().await.unwrap() {
                let call: Call = serde_json::from_str(&line).unwrap();
                let response = match call.call.as_str() {
                    "getTime" => Response::Ok(Reply::Seconds(42)),
                    "isRunning" => Response::Ok(Reply::Seconds(1)),
                    _ => Response::Error(RpcError::invalid("time", "expected a number")),
                };
                writer
                    .write_all(&encode_line(&response).unwrap())
                    .await
                    .unwrap();
            }
        });

        let mut client = Client::connect(&path).await.unwrap();
        assert_eq!(client.get_time().await.unwrap(), 42);
        assert!(matches!(
            client.is_running().await,
            Err(IpcError::UnexpectedReply {
                call: "isRunning",
                ..
            })
        ));
        assert!(matches!(
            client.change_time(5).await,
            Err(IpcError::Rejected(RpcError::Validation { .. }))
        ));
    }
}
