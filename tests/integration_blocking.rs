use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use restpipe::prelude::{BlockingRestClient, ErrorCode, RestClient, RestRequest};
use serde::Deserialize;

#[derive(Clone)]
struct MockResponse {
    status: u16,
    body: Vec<u8>,
}

impl MockResponse {
    fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

#[derive(Clone, Debug)]
struct CapturedRequest {
    method: String,
    path: String,
    headers: BTreeMap<String, String>,
}

struct MockServer {
    base_url: String,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    join: Option<JoinHandle<()>>,
}

impl MockServer {
    fn start(responses: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let address = listener.local_addr().expect("read local address");
        listener
            .set_nonblocking(true)
            .expect("set listener nonblocking");

        let captured = Arc::new(Mutex::new(Vec::new()));
        let captured_clone = Arc::clone(&captured);

        let join = thread::spawn(move || {
            let deadline = std::time::Instant::now() + Duration::from_secs(2);
            let mut response_index = 0;

            while response_index < responses.len() && std::time::Instant::now() < deadline {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        if let Ok(request) = read_request(&mut stream) {
                            captured_clone
                                .lock()
                                .expect("lock captured requests")
                                .push(request);
                        }
                        let response = &responses[response_index];
                        response_index += 1;
                        let _ = write_response(&mut stream, response);
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            base_url: format!("http://{address}"),
            captured,
            join: Some(join),
        }
    }

    fn requests(&self) -> Vec<CapturedRequest> {
        self.captured
            .lock()
            .expect("lock captured requests")
            .clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn read_request(stream: &mut TcpStream) -> std::io::Result<CapturedRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(1)))?;

    let mut raw = Vec::new();
    loop {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..read]);
        if raw.windows(4).any(|window| window == b"\r\n\r\n") {
            break;
        }
    }

    let text = String::from_utf8_lossy(&raw);
    let head = text.split("\r\n\r\n").next().unwrap_or_default();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_owned();
    let path = request_line.next().unwrap_or_default().to_owned();
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_owned()))
        .collect();

    Ok(CapturedRequest {
        method,
        path,
        headers,
    })
}

fn write_response(stream: &mut TcpStream, response: &MockResponse) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        status_text(response.status),
        response.body.len()
    );
    stream.write_all(head.as_bytes())?;
    stream.write_all(&response.body)?;
    stream.flush()
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        409 => "Conflict",
        _ => "Unknown",
    }
}

#[derive(Debug, Deserialize, PartialEq)]
struct Health {
    status: String,
}

#[test]
fn blocking_client_runs_requests_from_synchronous_code() {
    let server = MockServer::start(vec![
        MockResponse::new(200, r#"{"status":"up"}"#),
        MockResponse::new(200, "plain text"),
    ]);
    let client = RestClient::json(server.base_url.clone()).expect("client should build");
    let blocking = BlockingRestClient::new(client).expect("blocking client should start");

    let health: Option<Health> = blocking.get("health").expect("typed request should succeed");
    let text = blocking.get_string("motd").expect("text request should succeed");

    assert_eq!(
        health,
        Some(Health {
            status: "up".to_owned(),
        })
    );
    assert_eq!(text, "plain text");

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/health");
    assert_eq!(
        requests[0].headers.get("accept"),
        Some(&"application/json".to_owned())
    );
    assert_eq!(requests[1].path, "/motd");
}

#[test]
fn blocking_client_returns_protocol_failures() {
    let server = MockServer::start(vec![MockResponse::new(409, "already exists")]);
    let client = RestClient::json(server.base_url.clone()).expect("client should build");
    let blocking = BlockingRestClient::new(client).expect("blocking client should start");

    let error = blocking
        .dispatch(&RestRequest::get("items/1"))
        .expect_err("409 should fail");

    assert_eq!(error.code(), ErrorCode::Protocol);
    let failure = error.protocol_failure().expect("protocol failure");
    assert_eq!(failure.status().as_u16(), 409);
    assert_eq!(failure.body(), "already exists");
}
