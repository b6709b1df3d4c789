//! Request/response ports
//!
//! A port is a named boundary `{port id, request type, response type}`
//! through which the workflow exchanges request/response pairs with its
//! host. Each declared port is owned by a [`RequestInputExecutor`] whose
//! handler has two arms:
//!
//! - a raw request payload is wrapped as an [`ExternalRequest`], surfaced
//!   to the host as a `RequestInfo` event, and echoed into the graph so
//!   downstream executors can observe that a request is outstanding;
//! - an [`ExternalResponse`] enqueued by the host is validated against the
//!   port's declared response type and, on success, sent downstream as a
//!   regular message.

use crate::context::WorkflowContext;
use crate::error::{Result, WorkflowError};
use crate::executor::Executor;
use crate::message::{Envelope, MessageType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use weft_checkpoint::{PortDescriptor, RequestRecord, ResponseRecord};

/// Declared request/response boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPort {
    /// Port id; doubles as the owning executor's id in the graph
    pub port_id: String,
    /// Declared type of request payloads
    pub request_type: MessageType,
    /// Declared type responses must carry
    pub response_type: MessageType,
}

impl RequestPort {
    pub fn new(
        port_id: impl Into<String>,
        request_type: MessageType,
        response_type: MessageType,
    ) -> Self {
        Self {
            port_id: port_id.into(),
            request_type,
            response_type,
        }
    }

    /// Structural descriptor for fingerprinting
    pub fn descriptor(&self) -> PortDescriptor {
        PortDescriptor {
            port_id: self.port_id.clone(),
            request_type: self.request_type.as_str().to_string(),
            response_type: self.response_type.as_str().to_string(),
        }
    }
}

/// A request that has left the workflow and awaits a host response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalRequest {
    pub request_id: String,
    pub port_id: String,
    pub payload: Value,
    pub request_type: MessageType,
    pub response_type: MessageType,
}

impl ExternalRequest {
    /// Declared type id of request echoes inside the graph
    pub const TYPE_ID: &'static str = "external.request";

    pub fn to_record(&self) -> RequestRecord {
        RequestRecord {
            request_id: self.request_id.clone(),
            port_id: self.port_id.clone(),
            payload: self.payload.clone(),
            request_type: self.request_type.as_str().to_string(),
            response_type: self.response_type.as_str().to_string(),
        }
    }

    pub fn from_record(record: RequestRecord) -> Self {
        Self {
            request_id: record.request_id,
            port_id: record.port_id,
            payload: record.payload,
            request_type: MessageType::named(record.request_type),
            response_type: MessageType::named(record.response_type),
        }
    }
}

/// A host-supplied answer to an outstanding request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalResponse {
    /// The request being answered, when the host tracked it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub port_id: String,
    pub data: Value,
    /// Declared type of `data`
    pub response_type: MessageType,
}

impl ExternalResponse {
    /// Declared type id of response envelopes inside the graph
    pub const TYPE_ID: &'static str = "external.response";

    /// Response with the declared type inferred from the payload's shape
    pub fn new(port_id: impl Into<String>, data: Value) -> Self {
        let response_type = MessageType::of_value(&data);
        Self {
            request_id: None,
            port_id: port_id.into(),
            data,
            response_type,
        }
    }

    /// Response with an explicit declared type
    pub fn typed(port_id: impl Into<String>, data: Value, response_type: MessageType) -> Self {
        Self {
            request_id: None,
            port_id: port_id.into(),
            data,
            response_type,
        }
    }

    /// Response addressed to a specific request
    pub fn to_request(request: &ExternalRequest, data: Value) -> Self {
        let response_type = MessageType::of_value(&data);
        Self {
            request_id: Some(request.request_id.clone()),
            port_id: request.port_id.clone(),
            data,
            response_type,
        }
    }

    /// The graph-internal envelope carrying this response to its port
    pub(crate) fn into_envelope(self) -> Result<Envelope> {
        Ok(Envelope::new(
            serde_json::to_value(&self)?,
            MessageType::named(Self::TYPE_ID),
        ))
    }

    pub fn to_record(&self) -> ResponseRecord {
        ResponseRecord {
            request_id: self.request_id.clone(),
            port_id: self.port_id.clone(),
            data: self.data.clone(),
            response_type: self.response_type.as_str().to_string(),
        }
    }

    pub fn from_record(record: ResponseRecord) -> Self {
        Self {
            request_id: record.request_id,
            port_id: record.port_id,
            data: record.data,
            response_type: MessageType::named(record.response_type),
        }
    }
}

/// Built-in executor owning one declared port
///
/// Registered automatically by the workflow builder for every
/// `add_input_port` call, under the port's id.
pub struct RequestInputExecutor {
    port: RequestPort,
}

impl RequestInputExecutor {
    pub fn new(port: RequestPort) -> Self {
        Self { port }
    }

    pub fn port(&self) -> &RequestPort {
        &self.port
    }

    async fn handle_response(&self, envelope: Envelope, ctx: WorkflowContext) -> Result<()> {
        let response: ExternalResponse = envelope.decode()?;
        if !self.port.response_type.accepts(&response.response_type) {
            return Err(WorkflowError::type_mismatch(
                &self.port.port_id,
                self.port.response_type.as_str(),
                response.response_type.as_str(),
            ));
        }

        ctx.run()
            .complete_request(&self.port.port_id, response.request_id.as_deref());
        ctx.send_message(response.data, Some(response.response_type))
            .await
    }

    async fn handle_request(&self, envelope: Envelope, ctx: WorkflowContext) -> Result<()> {
        let request = ExternalRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            port_id: self.port.port_id.clone(),
            payload: envelope.payload,
            request_type: self.port.request_type.clone(),
            response_type: self.port.response_type.clone(),
        };

        ctx.run().publish_request(request.clone());

        // Echo the request into the graph so downstream executors can
        // observe that it is outstanding.
        ctx.send_message(
            serde_json::to_value(&request)?,
            Some(MessageType::named(ExternalRequest::TYPE_ID)),
        )
        .await
    }
}

#[async_trait]
impl Executor for RequestInputExecutor {
    fn id(&self) -> &str {
        &self.port.port_id
    }

    fn type_id(&self) -> &str {
        "request_input"
    }

    fn can_handle(&self, declared: &MessageType) -> bool {
        declared.as_str() == ExternalResponse::TYPE_ID
            || self.port.request_type.accepts(declared)
    }

    async fn execute(&self, envelope: Envelope, ctx: WorkflowContext) -> Result<()> {
        if envelope.declared_type.as_str() == ExternalResponse::TYPE_ID {
            self.handle_response(envelope, ctx).await
        } else {
            self.handle_request(envelope, ctx).await
        }
    }
}
