//! Tests for the HTTP client.

use super::*;
use crate::decode::{CONTENT_TYPE_JSON, CONTENT_TYPE_MSGPACK, CONTENT_TYPE_TEXT};
use crate::error::{MessageError, PropertyError};
use serde_json::json;
use wiremock::matchers::{body_json, body_string, header, method, path, query_param,
    query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> HttpClient {
    let config = ClientConfig::default().with_base_url(server.uri());
    HttpClient::new(config).unwrap()
}

fn message_response(queue: &str, id: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header(HEADER_MESSAGE_ID, id)
        .insert_header(HEADER_QUEUE_NAME, queue)
        .insert_header(HEADER_MESSAGE_TYPE, "normal")
        .insert_header(HEADER_RETRY_REMAINING, "2")
}

// ============================================================================
// Construction Tests
// ============================================================================

mod construction_tests {
    use super::*;

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = ClientConfig::default().with_base_url("not a url");
        assert!(matches!(
            HttpClient::new(config),
            Err(ClientError::Configuration { .. })
        ));
    }

    #[test]
    fn test_with_registry_shares_registry() {
        let registry = Arc::new(DecoderRegistry::with_builtins());
        let client = HttpClient::with_registry(ClientConfig::default(), Arc::clone(&registry))
            .unwrap();
        assert!(Arc::ptr_eq(client.registry(), &registry));
    }

    #[test]
    fn test_reply_type_wire_names() {
        assert_eq!(ReplyType::Ack.to_string(), "ack");
        assert_eq!(ReplyType::Nack.to_string(), "nack");
        assert_eq!(ReplyType::Ext.to_string(), "ext");
    }
}

// ============================================================================
// Header Mapping Tests
// ============================================================================

mod header_tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_all_headers_mapped() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_MESSAGE_ID, HeaderValue::from_static("m-1"));
        headers.insert(HEADER_QUEUE_NAME, HeaderValue::from_static("jobs"));
        headers.insert(HEADER_MESSAGE_TYPE, HeaderValue::from_static("compound"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_MSGPACK));
        headers.insert(HEADER_RETRY_REMAINING, HeaderValue::from_static("3"));

        let delivery = delivery_from_headers(&headers, Bytes::from_static(b"\x90"));
        assert_eq!(delivery.id, "m-1");
        assert_eq!(delivery.queue, "jobs");
        assert_eq!(delivery.message_type, MessageType::Compound);
        assert_eq!(delivery.content_type, CONTENT_TYPE_MSGPACK);
        assert_eq!(delivery.retry_remaining, Some(3));
        assert_eq!(&delivery.body[..], b"\x90");
    }

    #[test]
    fn test_unparsable_retry_count_is_unknown() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_RETRY_REMAINING, HeaderValue::from_static("many"));
        let delivery = delivery_from_headers(&headers, Bytes::new());
        assert_eq!(delivery.retry_remaining, None);
    }

    #[test]
    fn test_missing_headers_are_empty() {
        let delivery = delivery_from_headers(&HeaderMap::new(), Bytes::new());
        assert_eq!(delivery.id, "");
        assert_eq!(delivery.queue, "");
        assert_eq!(delivery.retry_remaining, None);
        assert_eq!(delivery.message_type, MessageType::Other(String::new()));
    }
}

// ============================================================================
// Push Tests
// ============================================================================

mod push_tests {
    use super::*;

    #[tokio::test]
    async fn test_push_sends_body_and_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages/jobs"))
            .and(header("content-type", CONTENT_TYPE_TEXT))
            .and(body_string("hello"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accum": "no"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let response = client
            .push("jobs", CONTENT_TYPE_TEXT, Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(response.accum, "no");
    }

    #[tokio::test]
    async fn test_push_escapes_slash_in_queue_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages/q%2F1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accum": "yes"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let response = client
            .push("q/1", CONTENT_TYPE_TEXT, Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(response.accum, "yes");
    }

    #[tokio::test]
    async fn test_push_all_returns_result_per_queue() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(query_param("qre", "^jobs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobs-a": {"accum": "no"},
                "jobs-b": {"accum": "yes"}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let results = client
            .push_all("^jobs", CONTENT_TYPE_JSON, Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results["jobs-b"].accum, "yes");
    }

    #[tokio::test]
    async fn test_push_all_rejects_invalid_pattern_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .push_all("(", CONTENT_TYPE_TEXT, Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidPattern(_)));
    }

    #[tokio::test]
    async fn test_push_unparsable_response_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .push("jobs", CONTENT_TYPE_TEXT, Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse { .. }));
    }
}

// ============================================================================
// Pull Tests
// ============================================================================

mod pull_tests {
    use super::*;

    #[tokio::test]
    async fn test_pull_empty_queue_returns_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages/jobs"))
            .and(query_param("cf", "msgpack"))
            .and(query_param_is_missing("t"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(client.pull("jobs", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pull_sends_wait_in_whole_seconds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages/jobs"))
            .and(query_param("t", "3"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let pulled = client
            .pull("jobs", Some(Duration::from_millis(3500)))
            .await
            .unwrap();
        assert!(pulled.is_none());
    }

    #[tokio::test]
    async fn test_pull_with_maximum_wait_does_not_overflow_deadline() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages/jobs"))
            .and(query_param("t", u64::MAX.to_string()))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let pulled = client.pull("jobs", Some(Duration::MAX)).await.unwrap();
        assert!(pulled.is_none());
    }

    #[tokio::test]
    async fn test_pull_normal_message_and_decode() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages/jobs"))
            .respond_with(
                message_response("jobs", "m-1")
                    .set_body_raw(r#"{"ID":7}"#, CONTENT_TYPE_JSON),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let mut message = client.pull("jobs", None).await.unwrap().unwrap();
        assert_eq!(message.id(), "m-1");
        assert_eq!(message.queue(), "jobs");
        assert_eq!(message.message_type(), &MessageType::Normal);
        assert_eq!(message.content_type(), CONTENT_TYPE_JSON);
        assert_eq!(message.retry_remaining(), Some(2));

        let value: serde_json::Value = message.decode().unwrap();
        assert_eq!(value, json!({"ID": 7}));
        assert!(matches!(
            message.decode::<serde_json::Value>(),
            Err(MessageError::EndOfMessage)
        ));
    }

    #[tokio::test]
    async fn test_pull_compound_message_yields_parts() {
        let part = |content_type: &str, content: &[u8]| {
            rmpv::Value::Array(vec![
                rmpv::Value::Map(vec![(
                    rmpv::Value::from("content-type"),
                    rmpv::Value::from(content_type),
                )]),
                rmpv::Value::Binary(content.to_vec()),
            ])
        };
        let mut body = Vec::new();
        rmpv::encode::write_value(
            &mut body,
            &rmpv::Value::Array(vec![
                part(CONTENT_TYPE_TEXT, b"first"),
                part(CONTENT_TYPE_TEXT, b"second"),
            ]),
        )
        .unwrap();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages/logs"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(HEADER_MESSAGE_ID, "m-2")
                    .insert_header(HEADER_QUEUE_NAME, "logs")
                    .insert_header(HEADER_MESSAGE_TYPE, "compound")
                    .set_body_raw(body, CONTENT_TYPE_MSGPACK),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let mut message = client.pull("logs", None).await.unwrap().unwrap();
        assert_eq!(message.retry_remaining(), None);
        assert_eq!(message.decode::<String>().unwrap(), "first");
        assert_eq!(message.decode::<String>().unwrap(), "second");
        assert!(message.decode::<String>().unwrap_err().is_end_of_message());
    }

    #[tokio::test]
    async fn test_pulled_message_uses_client_registry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages/jobs"))
            .respond_with(message_response("jobs", "m-3").set_body_raw("abc", "text/x-upper"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.registry().register_fn("text/x-upper", |body, destination| {
            match destination {
                crate::decode::Destination::Payload(payload) => {
                    *payload = crate::decode::Payload::Text(
                        String::from_utf8_lossy(body).to_uppercase(),
                    );
                    Ok(())
                }
                other => Err(crate::error::DecodeError::custom(format!(
                    "unsupported destination {}",
                    other.kind()
                ))),
            }
        });

        let mut message = client.pull("jobs", None).await.unwrap().unwrap();
        let payload = message.decode_payload().unwrap();
        assert_eq!(payload.as_text(), Some("ABC"));
    }

    #[tokio::test]
    async fn test_pull_any_sends_pattern() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages"))
            .and(query_param("qre", "^jobs-.*"))
            .and(query_param("cf", "msgpack"))
            .respond_with(message_response("jobs-a", "m-4").set_body_raw("x", CONTENT_TYPE_TEXT))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let message = client.pull_any("^jobs-.*", None).await.unwrap().unwrap();
        assert_eq!(message.queue(), "jobs-a");
    }

    #[tokio::test]
    async fn test_pull_any_rejects_invalid_pattern() {
        let server = MockServer::start().await;
        let client = client_for(&server);
        let err = client.pull_any("[", None).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidPattern(_)));
    }

    #[tokio::test]
    async fn test_pull_unexpected_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.pull("jobs", None).await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "LMQ error: 500 boom");
    }
}

// ============================================================================
// Reply and Queue Management Tests
// ============================================================================

mod reply_tests {
    use super::*;

    #[tokio::test]
    async fn test_reply_sends_reply_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages/jobs"))
            .respond_with(message_response("jobs", "m-1").set_body_raw("x", CONTENT_TYPE_TEXT))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/messages/jobs/m-1"))
            .and(query_param("reply", "nack"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let message = client.pull("jobs", None).await.unwrap().unwrap();
        client.reply(&message, ReplyType::Nack).await.unwrap();
    }

    #[tokio::test]
    async fn test_reply_to_unknown_message_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages/jobs/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_string("message not found"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .reply_to("jobs", "gone", ReplyType::Ack)
            .await
            .unwrap_err();
        match err {
            ClientError::Status { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "message not found");
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_queue() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/queues/a%2Fb"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.delete_queue("a/b").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_missing_queue_is_not_transient() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404).set_body_string("queue not found"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.delete_queue("missing").await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert!(!err.is_transient());
    }
}

// ============================================================================
// Property Tests
// ============================================================================

mod property_tests {
    use super::*;

    #[tokio::test]
    async fn test_get_property() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/properties/jobs"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"accum": 0.5, "retry": 2, "timeout": 30})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let property = client.get_property("jobs").await.unwrap();
        assert_eq!(
            property,
            Property::new()
                .with_accum(Duration::from_millis(500))
                .with_retry(2)
                .with_timeout(Duration::from_secs(30))
        );
    }

    #[tokio::test]
    async fn test_get_property_with_bad_body_is_property_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/properties/jobs"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"retry":"x"}"#))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.get_property("jobs").await.unwrap_err();
        assert!(matches!(err, ClientError::Property(PropertyError::Parse(_))));
    }

    #[tokio::test]
    async fn test_update_property_sends_only_set_fields() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/properties/jobs"))
            .and(body_json(json!({"retry": 5})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client
            .update_property("jobs", &Property::new().with_retry(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_property() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/properties/jobs"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.delete_property("jobs").await.unwrap();
    }

    #[tokio::test]
    async fn test_get_default_properties_preserves_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/properties"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                ["^z", {"retry": 1}],
                ["^a", {"timeout": 5}]
            ])))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let defaults = client.get_default_properties().await.unwrap();
        assert_eq!(
            defaults,
            vec![
                DefaultProperty::new("^z", Property::new().with_retry(1)),
                DefaultProperty::new("^a", Property::new().with_timeout(Duration::from_secs(5))),
            ]
        );
    }

    #[tokio::test]
    async fn test_set_default_properties() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/properties"))
            .and(body_json(json!([["^jobs", {"retry": 3}]])))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client
            .set_default_properties(&[DefaultProperty::new(
                "^jobs",
                Property::new().with_retry(3),
            )])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_set_default_properties_rejects_invalid_pattern() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .set_default_properties(&[DefaultProperty::new("(", Property::new())])
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Property(PropertyError::Pattern(_))));
    }

    #[tokio::test]
    async fn test_delete_default_properties() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/properties"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.delete_default_properties().await.unwrap();
    }
}
