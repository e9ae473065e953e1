//! Client control messages.
//!
//! Clients send `{"uid": <own id>, "subscribe": <channel>}` or
//! `{"uid": <own id>, "unsubscribe": <channel>}`. Anything else is a
//! [`ProtocolError`] and ends the session.

use std::sync::Arc;

use serde_json::Value;

use super::connection::ClientConnection;
use super::registry::SubscriptionRegistry;
use crate::errors::ProtocolError;

/// What a control message asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionRequest {
    /// Join a channel.
    Subscribe(String),
    /// Leave a channel.
    Unsubscribe(String),
}

/// Parse a control message sent by `uid`.
pub fn parse_message(uid: &str, text: &str) -> Result<SubscriptionRequest, ProtocolError> {
    let request: Value = serde_json::from_str(text).map_err(|source| ProtocolError::Parse {
        data: text.to_string(),
        source,
    })?;

    if request.get("uid").and_then(Value::as_str) != Some(uid) {
        return Err(ProtocolError::Uid(text.to_string()));
    }

    match (request.get("subscribe"), request.get("unsubscribe")) {
        (Some(_), Some(_)) => Err(ProtocolError::Ambiguous),
        (None, Some(channel)) => Ok(SubscriptionRequest::Unsubscribe(require_string(
            channel,
            "unsubscribe",
        )?)),
        (subscribe, None) => Ok(SubscriptionRequest::Subscribe(require_string(
            subscribe.unwrap_or(&Value::Null),
            "subscribe",
        )?)),
    }
}

/// Apply one control message from `client` to the registry.
///
/// Returns `Ok` when the message was applied; any error means the session
/// must be closed.
pub fn handle_message(
    client: &Arc<ClientConnection>,
    text: &str,
    registry: &SubscriptionRegistry,
) -> Result<(), ProtocolError> {
    match parse_message(client.id.as_str(), text)? {
        SubscriptionRequest::Subscribe(channel) => registry
            .add(&channel, Arc::clone(client))
            .map_err(|source| ProtocolError::Subscribe {
                data: text.to_string(),
                source,
            }),
        SubscriptionRequest::Unsubscribe(channel) => {
            registry.delete(&channel, &client.id);
            Ok(())
        }
    }
}

fn require_string(value: &Value, field: &'static str) -> Result<String, ProtocolError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or(ProtocolError::NotString(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ChannelError;
    use crate::websocket::registry::{ChannelCallbacks, Subscribers};
    use assert_matches::assert_matches;
    use ferry_core::ClientId;
    use tokio::sync::mpsc;

    const UID: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

    /// Accepts `block` only.
    struct BlockOnly;

    impl ChannelCallbacks for BlockOnly {
        fn channel_activated(&self, channel: &str, _: Subscribers) -> Result<(), ChannelError> {
            if channel == "block" {
                Ok(())
            } else {
                Err(ChannelError::UnknownCategory(channel.to_string()))
            }
        }

        fn client_added(&self, _: &str, _: &ClientConnection) {}

        fn channel_deactivated(&self, _: &str) {}
    }

    fn setup() -> (Arc<ClientConnection>, SubscriptionRegistry, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(4);
        let client = Arc::new(ClientConnection::new(ClientId::from(UID), tx));
        (client, SubscriptionRegistry::new(Arc::new(BlockOnly)), rx)
    }

    #[test]
    fn parses_subscribe() {
        let text = format!(r#"{{"uid": "{UID}", "subscribe": "block"}}"#);
        assert_eq!(
            parse_message(UID, &text).unwrap(),
            SubscriptionRequest::Subscribe("block".into())
        );
    }

    #[test]
    fn parses_unsubscribe() {
        let text = format!(r#"{{"uid": "{UID}", "unsubscribe": "status/x"}}"#);
        assert_eq!(
            parse_message(UID, &text).unwrap(),
            SubscriptionRequest::Unsubscribe("status/x".into())
        );
    }

    #[test]
    fn rejects_non_json() {
        let err = parse_message(UID, "{not json").unwrap_err();
        assert_matches!(&err, ProtocolError::Parse { data, .. } if data == "{not json");
        assert_eq!(err.to_string(), "parse error for data {not json");
    }

    #[test]
    fn rejects_wrong_or_missing_uid() {
        let foreign = r#"{"uid": "OTHER", "subscribe": "block"}"#;
        assert_matches!(parse_message(UID, foreign), Err(ProtocolError::Uid(t)) if t == foreign);

        let missing = r#"{"subscribe": "block"}"#;
        assert_matches!(parse_message(UID, missing), Err(ProtocolError::Uid(_)));
    }

    #[test]
    fn rejects_both_actions() {
        let text = format!(r#"{{"uid": "{UID}", "subscribe": "block", "unsubscribe": "block"}}"#);
        assert_matches!(parse_message(UID, &text), Err(ProtocolError::Ambiguous));
    }

    #[test]
    fn both_keys_are_ambiguous_whatever_their_values() {
        for other in ["null", r#""""#, "false", "0", "[]"] {
            let text = format!(r#"{{"uid": "{UID}", "subscribe": "block", "unsubscribe": {other}}}"#);
            assert_matches!(
                parse_message(UID, &text),
                Err(ProtocolError::Ambiguous),
                "unsubscribe: {other}"
            );

            let text = format!(r#"{{"uid": "{UID}", "subscribe": {other}, "unsubscribe": "block"}}"#);
            assert_matches!(
                parse_message(UID, &text),
                Err(ProtocolError::Ambiguous),
                "subscribe: {other}"
            );
        }
    }

    #[test]
    fn present_but_non_string_channel_is_rejected() {
        for value in ["null", "false", "0", "{}"] {
            let text = format!(r#"{{"uid": "{UID}", "subscribe": {value}}}"#);
            assert_matches!(
                parse_message(UID, &text),
                Err(ProtocolError::NotString("subscribe")),
                "subscribe: {value}"
            );

            let text = format!(r#"{{"uid": "{UID}", "unsubscribe": {value}}}"#);
            assert_matches!(
                parse_message(UID, &text),
                Err(ProtocolError::NotString("unsubscribe")),
                "unsubscribe: {value}"
            );
        }
    }

    #[test]
    fn empty_channel_reaches_the_registry_and_fails_there() {
        let (client, registry, _rx) = setup();
        let text = format!(r#"{{"uid": "{UID}", "subscribe": ""}}"#);
        assert_eq!(
            parse_message(UID, &text).unwrap(),
            SubscriptionRequest::Subscribe(String::new())
        );
        assert_matches!(
            handle_message(&client, &text, &registry),
            Err(ProtocolError::Subscribe { .. })
        );
        assert_eq!(registry.channel_count(), 0);
    }

    #[test]
    fn rejects_missing_action_as_subscribe() {
        let text = format!(r#"{{"uid": "{UID}"}}"#);
        let err = parse_message(UID, &text).unwrap_err();
        assert_eq!(
            err.to_string(),
            "client subscription request (subscribe) must be string"
        );
    }

    #[test]
    fn rejects_non_string_channel() {
        let text = format!(r#"{{"uid": "{UID}", "unsubscribe": 42}}"#);
        assert_matches!(
            parse_message(UID, &text),
            Err(ProtocolError::NotString("unsubscribe"))
        );

        let text = format!(r#"{{"uid": "{UID}", "subscribe": ["block"]}}"#);
        assert_matches!(
            parse_message(UID, &text),
            Err(ProtocolError::NotString("subscribe"))
        );
    }

    #[test]
    fn subscribe_and_unsubscribe_update_registry() {
        let (client, registry, _rx) = setup();

        let subscribe = format!(r#"{{"uid": "{UID}", "subscribe": "block"}}"#);
        handle_message(&client, &subscribe, &registry).unwrap();
        assert_eq!(registry.client_channels(&client.id), ["block"]);

        let unsubscribe = format!(r#"{{"uid": "{UID}", "unsubscribe": "block"}}"#);
        handle_message(&client, &unsubscribe, &registry).unwrap();
        assert!(registry.client_channels(&client.id).is_empty());
        assert_eq!(registry.channel_count(), 0);
    }

    #[test]
    fn unsubscribe_unknown_channel_is_ok() {
        let (client, registry, _rx) = setup();
        let text = format!(r#"{{"uid": "{UID}", "unsubscribe": "nope"}}"#);
        assert!(handle_message(&client, &text, &registry).is_ok());
    }

    #[test]
    fn activation_failure_is_subscribe_error() {
        let (client, registry, _rx) = setup();
        let text = format!(r#"{{"uid": "{UID}", "subscribe": "foo"}}"#);

        let err = handle_message(&client, &text, &registry).unwrap_err();

        assert_matches!(
            &err,
            ProtocolError::Subscribe { source: ChannelError::UnknownCategory(c), .. } if c == "foo"
        );
        assert_eq!(err.to_string(), format!("subscribe error for data {text}"));
        assert_eq!(registry.channel_count(), 0);
    }
}
