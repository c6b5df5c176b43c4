use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use http::Method;
use restpipe::prelude::{CancellationToken, Error, ErrorCode, RestClient, RestRequest};
use restpipe::xml::{XmlMapped, XmlSchema};
use restpipe::{DispatchContext, ErrorEvent, ErrorObserver, ResponseStatus, TimeoutPhase};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone)]
struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    delay: Duration,
}

impl MockResponse {
    fn new(
        status: u16,
        headers: Vec<(impl Into<String>, impl Into<String>)>,
        body: impl Into<String>,
        delay: Duration,
    ) -> Self {
        Self {
            status,
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
            body: body.into().into_bytes(),
            delay,
        }
    }
}

#[derive(Clone, Debug)]
struct CapturedRequest {
    method: String,
    path: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

struct MockServer {
    base_url: String,
    served: Arc<AtomicUsize>,
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

        let served = Arc::new(AtomicUsize::new(0));
        let captured = Arc::new(Mutex::new(Vec::new()));
        let served_clone = Arc::clone(&served);
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

                        served_clone.fetch_add(1, Ordering::SeqCst);
                        let response = &responses[response_index];
                        response_index += 1;

                        if !response.delay.is_zero() {
                            thread::sleep(response.delay);
                        }

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
            served,
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

    fn served_count(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Sends the response head right away and the body after `body_delay`.
struct SplitBodyServer {
    base_url: String,
    join: Option<JoinHandle<()>>,
}

impl SplitBodyServer {
    fn start(status: u16, body: Vec<u8>, body_delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind split body server");
        let address = listener
            .local_addr()
            .expect("read split body server address");
        listener
            .set_nonblocking(true)
            .expect("set split body listener nonblocking");

        let join = thread::spawn(move || {
            let deadline = std::time::Instant::now() + Duration::from_secs(2);
            while std::time::Instant::now() < deadline {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        let _ = read_request(&mut stream);

                        let head = format!(
                            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            status,
                            status_text(status),
                            body.len()
                        );
                        let _ = stream.write_all(head.as_bytes());
                        let _ = stream.flush();
                        thread::sleep(body_delay);
                        let _ = stream.write_all(&body);
                        let _ = stream.flush();
                        break;
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
            join: Some(join),
        }
    }
}

impl Drop for SplitBodyServer {
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
        if find_header_end(&raw).is_some() {
            break;
        }
    }

    let header_end = find_header_end(&raw).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "malformed request without header terminator",
        )
    })?;

    let header_text = String::from_utf8_lossy(&raw[..header_end]);
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "missing request line")
    })?;
    let mut request_line_parts = request_line.split_whitespace();
    let method = request_line_parts.next().unwrap_or_default().to_owned();
    let path = request_line_parts.next().unwrap_or_default().to_owned();

    let mut headers = BTreeMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
        }
    }

    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = raw[header_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok(CapturedRequest {
        method,
        path,
        headers,
        body,
    })
}

fn write_response(stream: &mut TcpStream, response: &MockResponse) -> std::io::Result<()> {
    let body = &response.body;
    let mut raw = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        status_text(response.status),
        body.len()
    );
    for (name, value) in &response.headers {
        raw.push_str(name);
        raw.push_str(": ");
        raw.push_str(value);
        raw.push_str("\r\n");
    }
    raw.push_str("\r\n");

    stream.write_all(raw.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        404 => "Not Found",
        409 => "Conflict",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

#[derive(Clone, Default)]
struct OutcomeLog {
    outcomes: Arc<Mutex<Vec<(ResponseStatus, ErrorCode)>>>,
}

impl OutcomeLog {
    fn outcomes(&self) -> Vec<(ResponseStatus, ErrorCode)> {
        self.outcomes.lock().expect("lock outcomes").clone()
    }
}

impl ErrorObserver for OutcomeLog {
    fn on_error(&self, _context: &DispatchContext, event: &ErrorEvent<'_>) {
        self.outcomes
            .lock()
            .expect("lock outcomes")
            .push((event.status(), event.error().code()));
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Order {
    id: u32,
    item: String,
}

#[derive(Debug, Default, PartialEq)]
struct Owner {
    display_name: String,
}

impl XmlMapped for Owner {
    fn schema() -> &'static XmlSchema<Self> {
        static SCHEMA: OnceLock<XmlSchema<Owner>> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            XmlSchema::builder("Owner")
                .field("DisplayName", |owner: &mut Owner| &mut owner.display_name)
                .build()
        })
    }
}

#[derive(Debug, Default, PartialEq)]
struct Product {
    sku: String,
    name: String,
    price: Decimal,
}

impl XmlMapped for Product {
    fn schema() -> &'static XmlSchema<Self> {
        static SCHEMA: OnceLock<XmlSchema<Product>> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            XmlSchema::builder("Product")
                .field("Sku", |product: &mut Product| &mut product.sku)
                .field("Name", |product: &mut Product| &mut product.name)
                .field("Price", |product: &mut Product| &mut product.price)
                .build()
        })
    }
}

#[derive(Debug, Default, PartialEq)]
struct Catalog {
    version: u32,
    owner: Owner,
    products: Vec<Product>,
}

impl XmlMapped for Catalog {
    fn schema() -> &'static XmlSchema<Self> {
        static SCHEMA: OnceLock<XmlSchema<Catalog>> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            XmlSchema::builder("Catalog")
                .field("Version", |catalog: &mut Catalog| &mut catalog.version)
                .nested("Owner", |catalog: &mut Catalog| &mut catalog.owner)
                .object_list("Products", |catalog: &mut Catalog| &mut catalog.products)
                .build()
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn typed_get_decodes_json_over_http() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        vec![("Content-Type", "application/json")],
        r#"{"id":7,"item":"gear"}"#,
        Duration::ZERO,
    )]);
    let client = RestClient::json(server.base_url.clone()).expect("client should build");

    let order: Option<Order> = client.get("/orders/7").await.expect("request should succeed");

    assert_eq!(
        order,
        Some(Order {
            id: 7,
            item: "gear".to_owned(),
        })
    );
    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/orders/7");
    assert_eq!(
        requests[0].headers.get("accept"),
        Some(&"application/json".to_owned())
    );
    assert!(requests[0].body.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn post_sends_serialized_payload() {
    let server = MockServer::start(vec![MockResponse::new(
        201,
        vec![("Content-Type", "application/json")],
        r#"{"id":8,"item":"bolt"}"#,
        Duration::ZERO,
    )]);
    let client = RestClient::json(server.base_url.clone()).expect("client should build");

    let created: Option<Order> = client
        .post_typed(
            "orders",
            &Order {
                id: 0,
                item: "bolt".to_owned(),
            },
        )
        .await
        .expect("request should succeed");

    assert_eq!(created.map(|order| order.id), Some(8));
    let requests = server.requests();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(
        requests[0].headers.get("content-type"),
        Some(&"application/json; charset=utf-8".to_owned())
    );
    assert_eq!(requests[0].body, br#"{"id":0,"item":"bolt"}"#.to_vec());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn non_success_status_surfaces_protocol_failure_with_body() {
    let server = MockServer::start(vec![MockResponse::new(
        404,
        Vec::<(String, String)>::new(),
        "order 9 not found",
        Duration::ZERO,
    )]);
    let log = OutcomeLog::default();
    let client = RestClient::builder(server.base_url.clone())
        .observer(log.clone())
        .try_build()
        .expect("client should build");

    let error = client
        .get_string("orders/9")
        .await
        .expect_err("404 should fail");

    let failure = error.protocol_failure().expect("protocol failure");
    assert_eq!(failure.status(), http::StatusCode::NOT_FOUND);
    assert_eq!(failure.reason(), "Not Found");
    assert_eq!(failure.body(), "order 9 not found");
    assert_eq!(log.outcomes(), vec![(ResponseStatus::Error, ErrorCode::Protocol)]);
    assert_eq!(server.served_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn xml_client_maps_attributes_nested_objects_and_lists() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        vec![("Content-Type", "text/xml")],
        r#"<?xml version="1.0" encoding="utf-8"?>
<catalog version="2">
  <owner><display_name>Ada</display_name></owner>
  <products>
    <product sku="A1"><name>Bolt</name><price>0.25</price></product>
    <product sku="B2"><name>Nut</name><price>0.10</price></product>
  </products>
</catalog>"#,
        Duration::ZERO,
    )]);
    let client = RestClient::xml(server.base_url.clone()).expect("client should build");

    let catalog: Option<Catalog> = client.get("catalog").await.expect("request should succeed");

    assert_eq!(
        catalog,
        Some(Catalog {
            version: 2,
            owner: Owner {
                display_name: "Ada".to_owned(),
            },
            products: vec![
                Product {
                    sku: "A1".to_owned(),
                    name: "Bolt".to_owned(),
                    price: Decimal::new(25, 2),
                },
                Product {
                    sku: "B2".to_owned(),
                    name: "Nut".to_owned(),
                    price: Decimal::new(10, 2),
                },
            ],
        })
    );
    assert_eq!(
        server.requests()[0].headers.get("accept"),
        Some(&"text/xml".to_owned())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn soap_call_posts_envelope_with_action_header() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        vec![("Content-Type", "text/xml")],
        "<Envelope><Body><Quote>12</Quote></Body></Envelope>",
        Duration::ZERO,
    )]);
    let client = RestClient::xml(server.base_url.clone()).expect("client should build");
    let request = RestRequest::soap(
        "GetQuote",
        "http://services.test/quotes",
        "<Envelope><Body><GetQuote/></Body></Envelope>",
    );

    let response = client
        .dispatch(&request, &CancellationToken::new())
        .await
        .expect("request should succeed");

    assert!(response.body().contains("<Quote>12</Quote>"));
    let requests = server.requests();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path, "/GetQuote");
    assert_eq!(
        requests[0].headers.get("soapaction"),
        Some(&"http://services.test/quotes/GetQuote".to_owned())
    );
    assert_eq!(
        requests[0].body,
        b"<Envelope><Body><GetQuote/></Body></Envelope>".to_vec()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_response_body_times_out_in_body_phase() {
    let server = SplitBodyServer::start(200, b"late".to_vec(), Duration::from_millis(400));
    let log = OutcomeLog::default();
    let client = RestClient::builder(server.base_url.clone())
        .timeout(Duration::from_millis(150))
        .observer(log.clone())
        .try_build()
        .expect("client should build");

    let error = client
        .dispatch(&RestRequest::get("slow"), &CancellationToken::new())
        .await
        .expect_err("body read should time out");

    match error {
        Error::Timeout { phase, .. } => assert_eq!(phase, TimeoutPhase::ResponseBody),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(log.outcomes(), vec![(ResponseStatus::TimedOut, ErrorCode::Timeout)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_connection_is_reported_as_aborted() {
    let address = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe listener");
        listener.local_addr().expect("read probe address")
    };
    let log = OutcomeLog::default();
    let client = RestClient::builder(format!("http://{address}"))
        .timeout(Duration::from_secs(2))
        .observer(log.clone())
        .try_build()
        .expect("client should build");

    let error = client
        .dispatch(
            &RestRequest::new(Method::GET, "orders"),
            &CancellationToken::new(),
        )
        .await
        .expect_err("connection should be refused");

    assert_eq!(error.code(), ErrorCode::Transport);
    assert_eq!(log.outcomes(), vec![(ResponseStatus::Aborted, ErrorCode::Transport)]);
}
