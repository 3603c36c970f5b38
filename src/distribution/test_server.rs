//! Minimal HTTP fixture server for protocol tests.
//!
//! Serves canned responses over a loopback listener. Connections that open
//! with a TLS ClientHello are dropped straight away, so HTTPS attempts
//! against the fixture fail the way they would against a plain-HTTP
//! registry.

use std::cell::Cell;
use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Debug, Clone)]
pub struct Request {
    /// Position of this request in arrival order, starting at 1.
    pub count: usize,
    pub method: String,
    /// Path including the query string, as sent by the client.
    pub path: String,
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

pub struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Response {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }
}

pub struct TestServer {
    host: String,
    listener: Cell<Option<TcpListener>>,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl TestServer {
    pub fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let host = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
        TestServer {
            host,
            listener: Cell::new(Some(listener)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// `host:port` of the listener, usable as a registry host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Serve connections sequentially with the given handler. May be called
    /// once per server.
    pub fn serve<F>(&self, handler: F)
    where
        F: Fn(&Request) -> Response + Send + 'static,
    {
        let listener = self.listener.take().expect("serve called twice");
        let requests = self.requests.clone();
        thread::spawn(move || {
            let mut count = 0;
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(_) => break,
                };
                handle(stream, &handler, &requests, &mut count);
            }
        });
    }

    /// Requests parsed so far, in arrival order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

fn handle<F>(
    mut stream: TcpStream,
    handler: &F,
    requests: &Arc<Mutex<Vec<Request>>>,
    count: &mut usize,
) where
    F: Fn(&Request) -> Response,
{
    let mut first = [0u8; 1];
    match stream.peek(&mut first) {
        // 0x16 opens a TLS handshake record; dropping the connection makes
        // the client's HTTPS attempt fail.
        Ok(1) if first[0] != 0x16 => {}
        _ => return,
    }

    let reader = match stream.try_clone() {
        Ok(clone) => clone,
        Err(_) => return,
    };
    let mut reader = BufReader::new(reader);

    let mut line = String::new();
    if reader.read_line(&mut line).is_err() {
        return;
    }
    let mut parts = line.split_whitespace();
    let (method, path) = match (parts.next(), parts.next()) {
        (Some(method), Some(path)) => (method.to_string(), path.to_string()),
        _ => return,
    };

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_lowercase(), value.trim().to_string());
        }
    }

    let len: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0; len];
    if len > 0 && reader.read_exact(&mut body).is_err() {
        return;
    }

    *count += 1;
    let request = Request {
        count: *count,
        method,
        path,
        headers,
        body,
    };
    requests.lock().unwrap().push(request.clone());

    let response = handler(&request);
    let _ = write_response(&mut stream, &response);
}

fn write_response(stream: &mut TcpStream, res: &Response) -> io::Result<()> {
    write!(stream, "HTTP/1.1 {} {}\r\n", res.status, reason(res.status))?;
    for (name, value) in &res.headers {
        write!(stream, "{}: {}\r\n", name, value)?;
    }
    write!(
        stream,
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        res.body.len()
    )?;
    stream.write_all(&res.body)
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        401 => "Unauthorized",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}
