//! Server error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use ferry_node::NodeError;
use ferry_wire::WireError;

use crate::health::NodeStatus;

/// A channel could not be activated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The part before `/` names no known channel category.
    #[error("unknown topic category {0}")]
    UnknownCategory(String),
    /// A block channel was given a parameter.
    #[error("unexpected param to block subscription")]
    UnexpectedParam,
    /// An address channel was subscribed without an address.
    #[error("address param missing from address subscription")]
    MissingAddress,
    /// The parameter is neither an address nor a namespace id.
    #[error("invalid address param {0}")]
    InvalidParam(String),
}

/// A client control message was rejected; the session is closed.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not JSON.
    #[error("parse error for data {data}")]
    Parse {
        /// Raw message.
        data: String,
        /// Underlying parse failure.
        #[source]
        source: serde_json::Error,
    },
    /// Missing or foreign `uid`.
    #[error("client data does not have proper uid: {0}")]
    Uid(String),
    /// Both `subscribe` and `unsubscribe` present.
    #[error("client data cannot specify both subscribe and unsubscribe")]
    Ambiguous,
    /// A binary frame that is not UTF-8 text.
    #[error("client data is not valid UTF-8 ({0} bytes)")]
    NotUtf8(usize),
    /// The channel name is not a string.
    #[error("client subscription request ({0}) must be string")]
    NotString(&'static str),
    /// The registry refused the subscription.
    #[error("subscribe error for data {data}")]
    Subscribe {
        /// Raw message.
        data: String,
        /// Activation failure.
        #[source]
        source: ChannelError,
    },
}

/// Error returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The peer node could not be reached or did not answer.
    #[error(transparent)]
    Node(#[from] NodeError),
    /// A request packet could not be framed.
    #[error(transparent)]
    Encode(#[from] WireError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Node(e) => {
                let mut body = NodeStatus::Down.body();
                body["code"] = json!(e.code());
                body["message"] = json!(e.to_string());
                (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
            }
            Self::Encode(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "code": "Internal", "message": e.to_string() })),
            )
                .into_response(),
        }
    }
}
