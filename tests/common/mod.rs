//! Threaded local HTTP fixture server for scenario tests.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

/// Fixed body served by `/fixture`; tests assert on its prefix.
pub const FIXTURE_BODY: &str = "# fixture payload -- do not change\nhello from the fixture server\n";

pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A minimal HTTP/1.1 server on an ephemeral loopback port. One thread
/// per connection, `Connection: close` on every response.
pub struct TestServer {
    addr: SocketAddr,
}

impl TestServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fixture server");
        let addr = listener.local_addr().expect("fixture server addr");
        thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        thread::spawn(move || handle(stream));
                    }
                    Err(_) => break,
                }
            }
        });
        Self { addr }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// An address that refuses connections: bind, grab the port, drop the
/// listener.
pub fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind throwaway port");
    let addr = listener.local_addr().expect("throwaway addr");
    drop(listener);
    format!("http://{addr}/")
}

fn handle(mut stream: TcpStream) {
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .ok();
    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(s) => s,
        Err(_) => return,
    });

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_owned();
    let target = parts.next().unwrap_or("/").to_owned();

    let mut content_length = 0usize;
    let mut chunked = false;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).is_err() {
            return;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        let lower = line.to_ascii_lowercase();
        if let Some(value) = lower.strip_prefix("content-length:") {
            content_length = value.trim().parse().unwrap_or(0);
        }
        if let Some(value) = lower.strip_prefix("transfer-encoding:") {
            chunked = value.contains("chunked");
        }
    }

    let mut body = Vec::new();
    if chunked {
        if read_chunked_body(&mut reader, &mut body).is_err() {
            return;
        }
    } else if content_length > 0 {
        body.resize(content_length, 0);
        if reader.read_exact(&mut body).is_err() {
            return;
        }
    }

    let path = target.split('?').next().unwrap_or("/");
    match path {
        "/" | "/fixture" => respond(&mut stream, 200, "OK", FIXTURE_BODY.as_bytes()),
        "/slow" => {
            thread::sleep(Duration::from_millis(400));
            respond(&mut stream, 200, "OK", FIXTURE_BODY.as_bytes());
        }
        "/chunked" => respond_chunked(&mut stream),
        "/empty" => {
            let _ = stream.write_all(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n");
        }
        "/echo" => {
            let mut out = format!("{method}\n").into_bytes();
            out.extend_from_slice(&body);
            respond(&mut stream, 200, "OK", &out);
        }
        _ => respond(&mut stream, 404, "Not Found", b"not here\n"),
    }
}

fn read_chunked_body(
    reader: &mut BufReader<TcpStream>,
    body: &mut Vec<u8>,
) -> std::io::Result<()> {
    loop {
        let mut size_line = String::new();
        reader.read_line(&mut size_line)?;
        let size = usize::from_str_radix(size_line.trim(), 16).unwrap_or(0);
        if size == 0 {
            // Trailer section, up to the blank line.
            loop {
                let mut line = String::new();
                reader.read_line(&mut line)?;
                if line.trim_end().is_empty() {
                    break;
                }
            }
            return Ok(());
        }
        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..])?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
    }
}

fn respond(stream: &mut TcpStream, code: u16, reason: &str, body: &[u8]) {
    let head = format!(
        "HTTP/1.1 {code} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body);
}

fn respond_chunked(stream: &mut TcpStream) {
    let _ = stream.write_all(
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
    );
    let body = FIXTURE_BODY.as_bytes();
    let split = body.len() / 2;
    for part in [&body[..split], &body[split..]] {
        let _ = stream.write_all(format!("{:x}\r\n", part.len()).as_bytes());
        let _ = stream.write_all(part);
        let _ = stream.write_all(b"\r\n");
    }
    let _ = stream.write_all(b"0\r\n\r\n");
}
