//! End-to-end scenarios over a live pipe server with a mock adapter.

#![cfg(unix)]

mod common;

use common::{test_config, MockAdapter, PipeClient};
use serial_test::serial;
use std::time::{Duration, Instant};
use vibedbg::extension::Extension;
use vibedbg::protocol::{self, MESSAGE_DELIMITER};

fn wait_until(deadline: Duration, mut probe: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if probe() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    probe()
}

#[test]
#[serial]
fn happy_path_runs_command_and_echoes_request_id() {
    let adapter = MockAdapter::new();
    let config = test_config();
    let extension = Extension::initialize(adapter.clone(), config.clone()).unwrap();

    let mut client = PipeClient::connect(&config.pipe_name);
    client.send_raw(
        b"{\"protocol_version\":1,\"message_type\":1,\"payload\":\
          {\"request_id\":\"r1\",\"command\":\"lm\",\"timeout_ms\":5000,\"timestamp\":0}}\r\n\r\n",
    );

    let response = client.read_response();
    assert_eq!(response.request_id, "r1");
    assert!(response.success);
    assert_eq!(response.output, "output of lm");
    assert!(response.error_message.is_empty());
    assert_eq!(adapter.calls(), vec!["lm"]);

    extension.shutdown();
}

#[test]
#[serial]
fn dangerous_command_rejected_without_adapter_call() {
    let adapter = MockAdapter::new();
    let config = test_config();
    let extension = Extension::initialize(adapter.clone(), config.clone()).unwrap();

    let mut client = PipeClient::connect(&config.pipe_name);
    client.send_command("r1", "ed 0x1000 0x41");

    let response = client.read_response();
    assert_eq!(response.request_id, "r1");
    assert!(!response.success);
    assert!(
        response.error_message.contains("Invalid") || response.error_message.contains("unsafe"),
        "unexpected message: {}",
        response.error_message
    );
    assert!(adapter.calls().is_empty());

    extension.shutdown();
}

#[test]
#[serial]
fn breakpoint_by_symbol_passes_text_through() {
    let adapter = MockAdapter::new();
    let config = test_config();
    let extension = Extension::initialize(adapter.clone(), config.clone()).unwrap();

    let mut client = PipeClient::connect(&config.pipe_name);
    client.send_command("r1", "bp main");

    let response = client.read_response();
    assert!(response.success);
    assert_eq!(adapter.calls(), vec!["bp main"]);

    extension.shutdown();
}

#[test]
#[serial]
fn breakpoint_by_address_formats_hex() {
    let adapter = MockAdapter::new();
    let config = test_config();
    let extension = Extension::initialize(adapter.clone(), config.clone()).unwrap();

    let mut client = PipeClient::connect(&config.pipe_name);
    client.send_command("r1", "bp 0x7ffaa120");

    let response = client.read_response();
    assert!(response.success);
    let calls = adapter.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].starts_with("bp 0x7ffaa120"));

    extension.shutdown();
}

#[test]
#[serial]
fn malformed_argument_reports_error_without_adapter_call() {
    let adapter = MockAdapter::new();
    let config = test_config();
    let extension = Extension::initialize(adapter.clone(), config.clone()).unwrap();

    let mut client = PipeClient::connect(&config.pipe_name);
    client.send_command("r1", "bc abc");

    let response = client.read_response();
    assert_eq!(response.request_id, "r1");
    assert!(response.output.starts_with("Error:"));
    assert!(response.output.contains("abc"));
    assert!(adapter.calls().is_empty());

    extension.shutdown();
}

#[test]
#[serial]
fn half_message_then_disconnect_cleans_up_connection() {
    let adapter = MockAdapter::new();
    let config = test_config();
    let extension = Extension::initialize(adapter.clone(), config.clone()).unwrap();

    {
        let mut client = PipeClient::connect(&config.pipe_name);
        assert!(wait_until(Duration::from_secs(2), || {
            extension.server().stats().active_connections == 1
        }));

        let mut request = protocol::serialize_command(&protocol::CommandRequest::new("lm")).unwrap();
        request.truncate(request.len() / 2);
        client.send_raw(&request);
        // Client drops here without finishing the message.
    }

    assert!(wait_until(Duration::from_secs(2), || {
        extension.server().stats().active_connections == 0
    }));
    assert!(extension.server().active_connection_ids().is_empty());
    assert!(adapter.calls().is_empty());

    extension.shutdown();
}

#[test]
#[serial]
fn partial_message_is_buffered_until_complete() {
    let adapter = MockAdapter::new();
    let config = test_config();
    let extension = Extension::initialize(adapter.clone(), config.clone()).unwrap();

    let mut client = PipeClient::connect(&config.pipe_name);
    let request = protocol::serialize_command(&{
        let mut request = protocol::CommandRequest::new("lm");
        request.request_id = "r7".to_string();
        request
    })
    .unwrap();

    let (head, tail) = request.split_at(request.len() / 2);
    client.send_raw(head);
    assert!(client.try_read_frame(Duration::from_millis(200)).is_none());

    client.send_raw(tail);
    let response = client.read_response();
    assert_eq!(response.request_id, "r7");
    assert!(response.success);

    extension.shutdown();
}

#[test]
#[serial]
fn oversized_message_rejected_connection_survives() {
    let adapter = MockAdapter::new();
    let config = test_config();
    let extension = Extension::initialize(adapter.clone(), config.clone()).unwrap();

    let mut client = PipeClient::connect(&config.pipe_name);

    // A syntactically valid 2 MiB command message.
    let mut request = protocol::CommandRequest::new("x".repeat(2 * 1024 * 1024));
    request.request_id = "big".to_string();
    let mut bytes = serde_json::to_vec(&serde_json::json!({
        "protocol_version": 1,
        "message_type": 1,
        "payload": request,
    }))
    .unwrap();
    bytes.extend_from_slice(MESSAGE_DELIMITER);
    client.send_raw(&bytes);

    let response = client.read_response();
    assert!(!response.success);
    assert_eq!(response.request_id, "unknown");
    assert!(adapter.calls().is_empty());

    // The same connection keeps working.
    client.send_command("after", "lm");
    let response = client.read_response();
    assert_eq!(response.request_id, "after");
    assert!(response.success);

    extension.shutdown();
}

#[test]
#[serial]
fn concurrent_clients_get_ordered_matching_responses() {
    let adapter = MockAdapter::new();
    let config = test_config();
    let extension = Extension::initialize(adapter.clone(), config.clone()).unwrap();

    const COMMANDS_PER_CLIENT: usize = 100;
    let mut handles = Vec::new();
    for client_index in 0..2 {
        let pipe_name = config.pipe_name.clone();
        handles.push(std::thread::spawn(move || {
            let mut client = PipeClient::connect(&pipe_name);
            for i in 0..COMMANDS_PER_CLIENT {
                client.send_command(&format!("c{client_index}-{i}"), "lm");
            }
            for i in 0..COMMANDS_PER_CLIENT {
                let response = client.read_response();
                assert_eq!(response.request_id, format!("c{client_index}-{i}"));
                assert!(response.success);
            }
        }));
    }
    for handle in handles {
        handle.join().expect("client thread");
    }

    assert_eq!(
        adapter.calls().len(),
        2 * COMMANDS_PER_CLIENT,
        "every command must reach the adapter exactly once"
    );

    extension.shutdown();
}

#[test]
#[serial]
fn idle_connection_receives_heartbeats() {
    let adapter = MockAdapter::new();
    let mut config = test_config();
    config.heartbeat_interval = Some(Duration::from_millis(100));
    let extension = Extension::initialize(adapter, config.clone()).unwrap();

    let mut client = PipeClient::connect(&config.pipe_name);
    let frame = client
        .try_read_frame(Duration::from_secs(3))
        .expect("heartbeat frame");
    let heartbeat = protocol::parse_heartbeat(&frame).expect("heartbeat payload");
    assert_eq!(heartbeat.session_info["connected"], true);

    extension.shutdown();
}

#[test]
#[serial]
fn stop_leaves_no_workers_and_empty_connection_list() {
    let adapter = MockAdapter::new();
    let config = test_config();
    let extension = Extension::initialize(adapter, config.clone()).unwrap();

    let _client = PipeClient::connect(&config.pipe_name);
    assert!(wait_until(Duration::from_secs(2), || {
        extension.server().stats().active_connections == 1
    }));

    extension.shutdown();
    assert!(!extension.server().is_running());
    assert!(extension.server().active_connection_ids().is_empty());
    assert_eq!(extension.server().stats().active_connections, 0);

    // Idempotent.
    extension.shutdown();
}
