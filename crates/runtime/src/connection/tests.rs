use std::time::Duration;

use pw_test_protocol::ServerEventKind;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

use super::*;
use crate::transport::{NulFramer, PipeTransport, encode_frame};

struct FakeServer {
	requests: DuplexStream,
	replies: DuplexStream,
	framer: NulFramer,
	queued: Vec<Value>,
}

impl FakeServer {
	async fn next_request(&mut self) -> Value {
		let mut buf = [0u8; 1024];
		while self.queued.is_empty() {
			let n = self.requests.read(&mut buf).await.unwrap();
			assert!(n > 0, "client closed its write side");
			for message in self.framer.dispatch(&buf[..n]) {
				self.queued.push(message.unwrap());
			}
		}
		self.queued.remove(0)
	}

	async fn reply(&mut self, message: Value) {
		self.replies
			.write_all(&encode_frame(&message).unwrap())
			.await
			.unwrap();
	}
}

fn create_test_connection() -> (Arc<Connection>, FakeServer) {
	let (stdin_read, stdin_write) = duplex(64 * 1024);
	let (stdout_read, stdout_write) = duplex(64 * 1024);

	let (transport, message_rx) = PipeTransport::new(stdin_write, stdout_read);
	let parts = transport.into_transport_parts(message_rx);
	let connection = Arc::new(Connection::new(parts, EventHub::new()));

	let server = FakeServer {
		requests: stdin_read,
		replies: stdout_write,
		framer: NulFramer::new(),
		queued: Vec::new(),
	};
	(connection, server)
}

fn spawn_run(connection: &Arc<Connection>) -> tokio::task::JoinHandle<()> {
	let connection = Arc::clone(connection);
	tokio::spawn(async move { connection.run().await })
}

#[test]
fn test_request_ids_are_monotonic() {
	let a = next_request_id();
	let b = next_request_id();
	let c = next_request_id();
	assert!(a >= 1);
	assert!(b > a);
	assert!(c > b);
}

#[test]
fn test_request_format() {
	let request = Request {
		id: 4,
		guid: DEFAULT_GUID.to_string(),
		method: "runTests".to_string(),
		params: json!({"locations": []}),
		metadata: Metadata::default(),
	};

	let value = serde_json::to_value(&request).unwrap();
	assert_eq!(
		value,
		json!({
			"id": 4,
			"guid": "DebugController",
			"method": "runTests",
			"params": {"locations": []},
			"metadata": {}
		})
	);
}

#[test]
fn test_message_discrimination() {
	let response: Message = serde_json::from_value(json!({"id": 3, "result": {}})).unwrap();
	assert!(matches!(response, Message::Response(Response { id: 3, .. })));

	let event: Message =
		serde_json::from_value(json!({"method": "listChanged", "params": {}})).unwrap();
	assert!(matches!(event, Message::Event(Event { ref method, .. }) if method == "listChanged"));

	let unknown: Message = serde_json::from_value(json!({"hello": "world"})).unwrap();
	assert!(matches!(unknown, Message::Unknown(_)));
}

#[tokio::test]
async fn test_dispatch_response_success() {
	let (connection, _server) = create_test_connection();

	let (tx, rx) = oneshot::channel();
	connection.callbacks.lock().insert(7, tx);

	connection.dispatch(Message::Response(Response {
		id: 7,
		result: Some(json!({"status": "ok"})),
		error: None,
	}));

	let result = rx.await.unwrap().unwrap();
	assert_eq!(result["status"], "ok");
	assert_eq!(connection.pending_requests(), 0);
}

#[tokio::test]
async fn test_dispatch_response_error() {
	let (connection, _server) = create_test_connection();

	let (tx, rx) = oneshot::channel();
	connection.callbacks.lock().insert(8, tx);

	connection.dispatch(Message::Response(Response {
		id: 8,
		result: None,
		error: Some(ResponseError::Wrapped {
			error: Some(ErrorPayload {
				message: "No tests found".to_string(),
				name: None,
				stack: Some("at run (runner.js:1:1)".to_string()),
			}),
			value: None,
		}),
	}));

	let err = rx.await.unwrap().unwrap_err();
	assert_eq!(err.error_message(), Some("No tests found"));
	assert_eq!(err.stack_trace(), Some("at run (runner.js:1:1)"));
	assert!(matches!(err, Error::Remote { ref name, .. } if name == "Error"));
}

#[tokio::test]
async fn test_flat_error_response_keeps_message_and_stack() {
	let (connection, _server) = create_test_connection();

	let (tx, rx) = oneshot::channel();
	connection.callbacks.lock().insert(91, tx);

	let message: Message = serde_json::from_value(json!({
		"id": 91,
		"error": {"message": "boom", "stack": "at x"}
	}))
	.unwrap();
	assert!(matches!(
		message,
		Message::Response(Response {
			error: Some(ResponseError::Payload(_)),
			..
		})
	));
	connection.dispatch(message);

	let err = rx.await.unwrap().unwrap_err();
	assert_eq!(err.error_message(), Some("boom"));
	assert_eq!(err.stack_trace(), Some("at x"));
}

#[tokio::test]
async fn test_wrapped_error_response_decodes() {
	let (connection, _server) = create_test_connection();

	let (tx, rx) = oneshot::channel();
	connection.callbacks.lock().insert(92, tx);

	let message: Message = serde_json::from_value(json!({
		"id": 92,
		"error": {"error": {"message": "nested", "name": "TimeoutError"}}
	}))
	.unwrap();
	connection.dispatch(message);

	let err = rx.await.unwrap().unwrap_err();
	assert_eq!(err.error_message(), Some("nested"));
	assert_eq!(err.stack_trace(), None);
	assert!(matches!(err, Error::Remote { ref name, .. } if name == "TimeoutError"));
}

#[test]
fn test_error_value_fallback() {
	let err = parse_protocol_error(ResponseError::Wrapped {
		error: None,
		value: Some(json!("thrown string")),
	});
	assert_eq!(err.error_message(), Some("thrown string"));
	assert_eq!(err.stack_trace(), None);

	let err = parse_protocol_error(ResponseError::Wrapped {
		error: None,
		value: Some(json!(42)),
	});
	assert_eq!(err.error_message(), Some("42"));

	let err = parse_protocol_error(ResponseError::default());
	assert_eq!(err.error_message(), Some("Unknown server error"));
}

#[tokio::test]
async fn test_unknown_response_id_is_ignored() {
	let (connection, _server) = create_test_connection();

	connection.dispatch(Message::Response(Response {
		id: 999_999,
		result: Some(json!(1)),
		error: None,
	}));
	assert_eq!(connection.pending_requests(), 0);
	assert!(!connection.is_closed());
}

#[tokio::test]
async fn test_concurrent_requests_resolve_out_of_order() {
	let (connection, mut server) = create_test_connection();
	let run = spawn_run(&connection);

	let mut calls = Vec::new();
	for n in 0..4 {
		let connection = Arc::clone(&connection);
		calls.push(tokio::spawn(async move {
			connection.send("echo", json!({"n": n})).await
		}));
	}

	let mut requests = Vec::new();
	for _ in 0..4 {
		requests.push(server.next_request().await);
	}
	assert!(requests.iter().all(|r| r["guid"] == DEFAULT_GUID));
	assert!(requests.iter().all(|r| r["metadata"] == json!({})));

	for request in requests.iter().rev() {
		server
			.reply(json!({"id": request["id"], "result": {"n": request["params"]["n"]}}))
			.await;
	}

	for (n, call) in calls.into_iter().enumerate() {
		let result = call.await.unwrap().unwrap();
		assert_eq!(result["n"], n);
	}
	assert_eq!(connection.pending_requests(), 0);

	drop(server);
	run.await.unwrap();
}

#[tokio::test]
async fn test_events_reach_subscribers() {
	let (connection, mut server) = create_test_connection();
	let mut stream = connection
		.events()
		.stream(&[EventKind::Server(ServerEventKind::TestFilesChanged)]);
	let run = spawn_run(&connection);

	server
		.reply(json!({"method": "testFilesChanged", "params": {"testFiles": ["a.spec.ts"]}}))
		.await;

	match stream.recv().await {
		Some(ConnectionEvent::Server(ServerEvent::TestFilesChanged(params))) => {
			assert_eq!(params.test_files, vec!["a.spec.ts".to_string()]);
		}
		other => panic!("unexpected event: {:?}", other),
	}

	drop(server);
	run.await.unwrap();
}

#[tokio::test]
async fn test_close_emitted_when_pipe_ends() {
	let (connection, server) = create_test_connection();
	let mut stream = connection.events().stream(&[EventKind::Close]);
	let run = spawn_run(&connection);

	drop(server);
	run.await.unwrap();

	assert!(matches!(stream.recv().await, Some(ConnectionEvent::Close)));
	assert!(connection.is_closed());
	assert!(connection.events().is_closed());
}

#[tokio::test]
async fn test_malformed_frame_emits_error() {
	let (connection, mut server) = create_test_connection();
	let mut stream = connection
		.events()
		.stream(&[EventKind::Error, EventKind::Server(ServerEventKind::ListChanged)]);
	let run = spawn_run(&connection);

	server.replies.write_all(b"{oops\0").await.unwrap();
	server.reply(json!({"method": "listChanged", "params": {}})).await;

	assert!(matches!(stream.recv().await, Some(ConnectionEvent::Error(_))));
	assert!(matches!(
		stream.recv().await,
		Some(ConnectionEvent::Server(ServerEvent::ListChanged))
	));

	drop(server);
	run.await.unwrap();
}

#[tokio::test]
async fn test_send_after_close_fails_fast() {
	let (connection, _server) = create_test_connection();
	connection.close();

	let err = connection.send("ping", Value::Null).await.unwrap_err();
	assert!(matches!(err, Error::TransportClosed));
	assert!(connection.send_no_reply("ping", Value::Null).is_err());
}

#[tokio::test]
async fn test_send_with_cancel_abandons_request() {
	let (connection, mut server) = create_test_connection();
	let run = spawn_run(&connection);
	let token = CancellationToken::new();

	let call = {
		let connection = Arc::clone(&connection);
		let token = token.clone();
		tokio::spawn(async move {
			connection
				.send_with_cancel("runTests", json!({}), &token)
				.await
		})
	};

	let request = server.next_request().await;
	token.cancel();
	let err = call.await.unwrap().unwrap_err();
	assert!(matches!(err, Error::Cancelled));
	assert_eq!(connection.pending_requests(), 0);

	// A late reply is unmatched and dropped.
	server.reply(json!({"id": request["id"], "result": {}})).await;
	tokio::time::sleep(Duration::from_millis(20)).await;
	assert!(!connection.is_closed());

	drop(server);
	run.await.unwrap();
}

#[tokio::test]
async fn test_send_no_reply_leaves_no_pending_callback() {
	let (connection, mut server) = create_test_connection();
	let run = spawn_run(&connection);

	connection
		.send_no_reply("stopTests", json!({}))
		.unwrap();
	let request = server.next_request().await;
	assert_eq!(request["method"], "stopTests");
	assert!(request["id"].as_u64().is_some_and(|id| id > 0));
	assert_eq!(connection.pending_requests(), 0);

	// A reply to it matches nothing and the connection keeps running.
	server.reply(json!({"id": request["id"], "result": {}})).await;
	tokio::time::sleep(Duration::from_millis(20)).await;
	assert!(!connection.is_closed());
	assert_eq!(connection.pending_requests(), 0);

	drop(server);
	run.await.unwrap();
}
