//! Wire-level tests: a real server on an ephemeral port, driven by a
//! line-oriented TCP client.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use vcstore::config::Limits;
use vcstore::server::{Server, ServerConfig, ServerHandle};
use vcstore::store::Store;

struct TestServer {
    handle: Option<ServerHandle>,
}

impl TestServer {
    fn start() -> Self {
        Self::start_with(None)
    }

    fn start_with(max_connections: Option<NonZeroUsize>) -> Self {
        let server = Server::new(
            Arc::new(Store::new()),
            ServerConfig {
                listen_addr: "127.0.0.1:0".to_owned(),
                limits: Limits::default(),
                max_connections,
            },
        );
        let handle = server.start().expect("start server");
        Self {
            handle: Some(handle),
        }
    }

    fn addr(&self) -> SocketAddr {
        self.handle.as_ref().expect("running server").local_addr()
    }

    fn client(&self) -> Client {
        Client::connect(self.addr())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown();
        }
    }
}

struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Client {
    /// Connects and consumes the greeting prompt.
    fn connect(addr: SocketAddr) -> Self {
        let mut client = Self::connect_raw(addr);
        client.expect_line("READY");
        client
    }

    /// Connects without expecting a greeting (for cap/shutdown tests).
    fn connect_raw(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("read timeout");
        let reader = BufReader::new(stream.try_clone().expect("clone stream"));
        Self {
            reader,
            writer: stream,
        }
    }

    fn send(&mut self, data: &[u8]) {
        self.writer.write_all(data).expect("send");
    }

    fn send_line(&mut self, line: &str) {
        self.send(line.as_bytes());
        self.send(b"\n");
    }

    fn read_line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read line");
        line.trim_end_matches('\n').to_owned()
    }

    fn expect_line(&mut self, want: &str) {
        assert_eq!(self.read_line(), want);
    }

    fn read_body(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf).expect("read body");
        buf
    }

    /// Sends a PUT with its body and returns the `OK`/`ERR` line.
    fn put(&mut self, path: &str, body: &[u8]) -> String {
        self.send_line(&format!("PUT {path} {}", body.len()));
        self.send(body);
        let reply = self.read_line();
        self.expect_line("READY");
        reply
    }

    /// Sends a GET and returns the body after asserting the length line.
    fn get_ok(&mut self, request: &str) -> Vec<u8> {
        self.send_line(request);
        let header = self.read_line();
        let length: usize = header
            .strip_prefix("OK ")
            .unwrap_or_else(|| panic!("unexpected GET reply: {header}"))
            .parse()
            .expect("length header");
        let body = self.read_body(length);
        self.expect_line("READY");
        body
    }
}

#[test]
fn greets_and_answers_help() {
    let server = TestServer::start();
    let mut client = server.client();
    client.send_line("HELP");
    client.expect_line("OK usage: HELP|GET|PUT|LIST");
    client.expect_line("READY");
}

#[test]
fn put_then_get_round_trips() {
    let server = TestServer::start();
    let mut client = server.client();
    assert_eq!(client.put("/a.txt", b"hello"), "OK r1");
    assert_eq!(client.get_ok("GET /a.txt"), b"hello");
}

#[test]
fn tail_duplicates_keep_the_revision_id() {
    let server = TestServer::start();
    let mut client = server.client();
    assert_eq!(client.put("/x", b"foo"), "OK r1");
    assert_eq!(client.put("/x", b"foo"), "OK r1");
    assert_eq!(client.put("/x", b"bar"), "OK r2");
}

#[test]
fn historical_revisions_stay_fetchable() {
    let server = TestServer::start();
    let mut client = server.client();
    client.put("/x", b"foo");
    client.put("/x", b"bar");

    assert_eq!(client.get_ok("GET /x r1"), b"foo");
    assert_eq!(client.get_ok("GET /x R2"), b"bar");

    client.send_line("GET /x r9");
    client.expect_line("ERR no such revision");
    client.expect_line("READY");
}

#[test]
fn illegal_file_names_are_refused() {
    let server = TestServer::start();
    let mut client = server.client();

    // No body is sent: the server rejects the header without reading one.
    client.send_line("PUT bad 1");
    client.expect_line("ERR illegal file name");
    client.expect_line("READY");

    client.send_line("PUT /semi;colon 1");
    client.expect_line("ERR illegal file name");
    client.expect_line("READY");

    // The session is still usable.
    assert_eq!(client.put("/fine.txt", b"ok"), "OK r1");
}

#[test]
fn binary_payloads_are_refused() {
    let server = TestServer::start();
    let mut client = server.client();
    assert_eq!(
        client.put("/b.dat", b"\xDE\xAD\xBE\xEF"),
        "ERR text files only"
    );
    client.send_line("GET /b.dat");
    client.expect_line("ERR no such file");
    client.expect_line("READY");
}

#[test]
fn listings_collapse_subdirectories_in_order() {
    let server = TestServer::start();
    let mut client = server.client();
    client.put("/dir/a.txt", b"A");
    client.put("/dir/sub/b.txt", b"B");

    client.send_line("LIST /dir");
    client.expect_line("OK 2");
    client.expect_line("a.txt r1");
    client.expect_line("sub/ DIR");
    client.expect_line("READY");

    client.send_line("LIST /");
    client.expect_line("OK 1");
    client.expect_line("dir/ DIR");
    client.expect_line("READY");

    client.send_line("LIST /nothing/here");
    client.expect_line("OK 0");
    client.expect_line("READY");
}

#[test]
fn paths_are_case_insensitive_across_connections() {
    let server = TestServer::start();
    let mut writer = server.client();
    assert_eq!(writer.put("/Mixed/Case.TXT", b"body"), "OK r1");

    let mut reader = server.client();
    assert_eq!(reader.get_ok("GET /mixed/case.txt"), b"body");

    reader.send_line("LIST /MIXED");
    reader.expect_line("OK 1");
    reader.expect_line("case.txt r1");
    reader.expect_line("READY");
}

#[test]
fn get_bodies_are_raw_bytes_with_exact_framing() {
    let server = TestServer::start();
    let mut client = server.client();

    // Content that impersonates protocol chatter must ride the declared
    // length, not confuse the line framing.
    let body = b"READY\nOK r9\nERR no such file\n";
    assert_eq!(client.put("/tricky", body), "OK r1");
    assert_eq!(client.get_ok("GET /tricky"), body);

    // The connection still frames correctly afterwards.
    client.send_line("HELP");
    client.expect_line("OK usage: HELP|GET|PUT|LIST");
    client.expect_line("READY");
}

#[test]
fn blank_lines_are_skipped_without_a_prompt() {
    let server = TestServer::start();
    let mut client = server.client();
    client.send(b"\n   \n");
    client.send_line("HELP");
    // The first line back is HELP's reply: no extra READY was emitted.
    client.expect_line("OK usage: HELP|GET|PUT|LIST");
    client.expect_line("READY");
}

#[test]
fn unknown_verbs_report_the_method() {
    let server = TestServer::start();
    let mut client = server.client();
    client.send_line("frobnicate /x");
    client.expect_line("ERR illegal method: FROBNICATE");
    client.expect_line("READY");
}

#[test]
fn concurrent_puts_to_one_key_serialize() {
    let server = TestServer::start();
    let addr = server.addr();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            thread::spawn(move || {
                let mut client = Client::connect(addr);
                client.put("/shared", format!("body-{i}").as_bytes())
            })
        })
        .collect();

    let mut ids: Vec<u64> = handles
        .into_iter()
        .map(|handle| {
            let reply = handle.join().expect("client thread");
            reply
                .strip_prefix("OK r")
                .unwrap_or_else(|| panic!("unexpected PUT reply: {reply}"))
                .parse()
                .expect("revision id")
        })
        .collect();
    ids.sort_unstable();

    // Four distinct payloads: every put appends, ids are dense from 1.
    assert_eq!(ids, vec![1, 2, 3, 4]);
}

#[test]
fn connection_cap_drops_excess_clients() {
    let server = TestServer::start_with(NonZeroUsize::new(1));
    let first = server.client();

    // Past the cap the socket closes without a greeting.
    let mut second = Client::connect_raw(server.addr());
    assert_eq!(second.read_line(), "");

    // Releasing the slot lets a new client in.
    drop(first);
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let mut retry = Client::connect_raw(server.addr());
        if retry.read_line() == "READY" {
            break;
        }
        assert!(Instant::now() < deadline, "slot never freed");
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn shutdown_stops_accepting() {
    let server = TestServer::start_with(None);
    let addr = server.addr();
    drop(server);
    assert!(TcpStream::connect(addr).is_err());
}
