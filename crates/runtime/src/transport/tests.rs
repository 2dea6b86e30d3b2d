use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::*;
use crate::error::Error;

fn frames(messages: &[Value]) -> Vec<u8> {
	messages
		.iter()
		.flat_map(|m| encode_frame(m).unwrap())
		.collect()
}

fn decode_all(framer: &mut NulFramer, chunks: &[&[u8]]) -> Vec<Value> {
	chunks
		.iter()
		.flat_map(|chunk| framer.dispatch(chunk))
		.map(|m| m.unwrap())
		.collect()
}

#[test]
fn test_frame_format() {
	let frame = encode_frame(&json!({"id": 1})).unwrap();
	assert_eq!(frame, b"{\"id\":1}\0");
}

#[test]
fn test_multiple_messages_in_one_chunk() {
	let messages = vec![json!({"id": 1}), json!({"method": "x"}), json!([1, 2])];
	let bytes = frames(&messages);

	let mut framer = NulFramer::new();
	assert_eq!(decode_all(&mut framer, &[&bytes]), messages);
	assert!(framer.pending().is_empty());
}

#[test]
fn test_chunk_without_terminator_is_held() {
	let mut framer = NulFramer::new();
	assert!(framer.dispatch(b"{\"id\":").is_empty());
	assert_eq!(framer.pending(), b"{\"id\":");

	let out = decode_all(&mut framer, &[b"7}", b"\0"]);
	assert_eq!(out, vec![json!({"id": 7})]);
}

#[test]
fn test_split_at_every_offset_matches_whole_buffer() {
	let messages = vec![
		json!({"id": 1, "result": {"text": "héllo"}}),
		json!({"method": "report", "params": {"method": "onBegin"}}),
		json!({"id": 2, "error": {"error": {"message": "boom"}}}),
	];
	let bytes = frames(&messages);

	for split in 0..=bytes.len() {
		let mut framer = NulFramer::new();
		let (a, b) = bytes.split_at(split);
		assert_eq!(decode_all(&mut framer, &[a, b]), messages, "split at {split}");
	}

	let mut framer = NulFramer::new();
	let single_bytes: Vec<&[u8]> = bytes.chunks(1).collect();
	assert_eq!(decode_all(&mut framer, &single_bytes), messages);
}

#[test]
fn test_malformed_frame_does_not_poison_stream() {
	let mut framer = NulFramer::new();
	let out = framer.dispatch(b"{not json}\0{\"id\":3}\0");
	assert_eq!(out.len(), 2);
	assert!(matches!(out[0], Err(Error::ProtocolError(_))));
	assert_eq!(out[1].as_ref().unwrap(), &json!({"id": 3}));
}

#[tokio::test]
async fn test_send_message() {
	let (mut stdin_read, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, _stdout_write) = tokio::io::duplex(1024);

	let (transport, _rx) = PipeTransport::new(stdin_write, stdout_read);
	let (mut sender, _receiver) = transport.into_parts();

	let test_message = json!({
		"id": 1,
		"method": "test",
		"params": {"foo": "bar"}
	});
	sender.send(test_message.clone()).await.unwrap();
	sender.close().await.unwrap();

	let mut written = Vec::new();
	stdin_read.read_to_end(&mut written).await.unwrap();

	assert_eq!(written.last(), Some(&0));
	let received: Value = serde_json::from_slice(&written[..written.len() - 1]).unwrap();
	assert_eq!(received, test_message);
}

#[tokio::test]
async fn test_send_after_close_fails_fast() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, _stdout_write) = tokio::io::duplex(1024);

	let (transport, _rx) = PipeTransport::new(stdin_write, stdout_read);
	let (mut sender, _receiver) = transport.into_parts();

	sender.close().await.unwrap();
	assert!(sender.is_closed());
	let err = sender.send(json!({"id": 1})).await.unwrap_err();
	assert!(matches!(err, Error::TransportClosed));
}

#[tokio::test]
async fn test_messages_split_across_writes() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(4096);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(4096);

	let (mut transport, mut rx) = PipeTransport::new(stdin_write, stdout_read);
	let read_task = tokio::spawn(async move { transport.run().await });

	let messages = vec![
		json!({"id": 1, "method": "first"}),
		json!({"id": 2, "method": "second"}),
		json!({"id": 3, "method": "third"}),
	];
	let bytes = frames(&messages);
	for piece in bytes.chunks(5) {
		stdout_write.write_all(piece).await.unwrap();
		stdout_write.flush().await.unwrap();
	}

	for expected in &messages {
		let received = rx.recv().await.unwrap().unwrap();
		assert_eq!(&received, expected);
	}

	drop(stdout_write);
	assert!(read_task.await.unwrap().is_ok());
	assert!(rx.recv().await.is_none(), "channel closes after EOF");
}

#[tokio::test]
async fn test_large_message() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024 * 1024);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(1024 * 1024);

	let (mut transport, mut rx) = PipeTransport::new(stdin_write, stdout_read);
	let read_task = tokio::spawn(async move { transport.run().await });

	// Larger than one read chunk.
	let large_message = json!({"id": 1, "data": "x".repeat(100_000)});
	stdout_write
		.write_all(&encode_frame(&large_message).unwrap())
		.await
		.unwrap();
	stdout_write.flush().await.unwrap();

	let received = rx.recv().await.unwrap().unwrap();
	assert_eq!(received, large_message);

	drop(stdout_write);
	drop(rx);
	let _ = read_task.await;
}

#[tokio::test]
async fn test_eof_with_partial_frame_closes_cleanly() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(1024);

	let (mut transport, mut rx) = PipeTransport::new(stdin_write, stdout_read);

	stdout_write.write_all(b"{\"id\": 1").await.unwrap();
	drop(stdout_write);

	assert!(transport.run().await.is_ok());
	drop(transport);
	assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_websocket_roundtrip() {
	use futures_util::{SinkExt, StreamExt};
	use tokio_tungstenite::tungstenite::Message as WsMessage;

	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();

	let server = tokio::spawn(async move {
		let (socket, _) = listener.accept().await.unwrap();
		let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
		let request = ws.next().await.unwrap().unwrap();
		let request: Value = serde_json::from_str(request.to_text().unwrap()).unwrap();
		let reply = json!({"id": request["id"], "result": {"echo": request["params"]}});
		ws.send(WsMessage::Text(reply.to_string())).await.unwrap();
		ws.close(None).await.unwrap();
	});

	let url = format!("ws://{}", addr);
	let (transport, mut rx) = WebSocketTransport::connect(&url, &[]).await.unwrap();
	let (mut sender, receiver) = transport.into_parts();
	let read_task = tokio::spawn(async move { Box::new(receiver).run().await });

	sender
		.send(json!({"id": 9, "method": "ping", "params": {"n": 1}}))
		.await
		.unwrap();

	let reply = rx.recv().await.unwrap().unwrap();
	assert_eq!(reply["id"], 9);
	assert_eq!(reply["result"]["echo"]["n"], 1);

	assert!(rx.recv().await.is_none(), "close frame ends the stream");
	let _ = read_task.await;
	server.await.unwrap();
}
