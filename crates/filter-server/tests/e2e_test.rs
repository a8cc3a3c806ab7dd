//! End-to-end session tests
//!
//! These tests run the real filter-server binary on a loopback port and talk
//! to it over TCP. They need `sh`, `cat`, `tr`, `gzip` and `gunzip` on the
//! PATH.

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Ask the OS for a port that is free right now
fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .expect("Failed to find a free port")
}

struct TestServer {
    process: Child,
    port: u16,
    logs: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    fn start(options: &[&str], command: &[&str]) -> Self {
        let port = free_port();
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_filter-server"));
        cmd.args(["--bind", "127.0.0.1"])
            .args(options)
            .arg("--")
            .arg(port.to_string())
            .args(command);
        Self::spawn(cmd, port)
    }

    fn start_with_config(config: &std::path::Path, port: u16) -> Self {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_filter-server"));
        cmd.arg("--config").arg(config);
        Self::spawn(cmd, port)
    }

    fn spawn(mut cmd: Command, port: u16) -> Self {
        let mut process = cmd
            .env("XDG_CONFIG_HOME", "/nonexistent/filter-server-test-config")
            .env_remove("RUST_LOG")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .expect("Failed to start filter-server");

        let logs = Arc::new(Mutex::new(Vec::new()));
        let stderr = process.stderr.take().expect("stderr is piped");
        let sink = Arc::clone(&logs);
        std::thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                eprintln!("[server] {}", line);
                sink.lock().unwrap().push(line);
            }
        });

        let server = Self {
            process,
            port,
            logs,
        };
        assert!(
            server.wait_for_log("waiting for connections", STARTUP_TIMEOUT),
            "server did not start: {:?}",
            server.logs()
        );
        server
    }

    fn logs(&self) -> Vec<String> {
        self.logs.lock().unwrap().clone()
    }

    fn count_logs(&self, needle: &str) -> usize {
        self.logs().iter().filter(|l| l.contains(needle)).count()
    }

    fn log_position(&self, needle: &str) -> Option<usize> {
        self.logs().iter().position(|l| l.contains(needle))
    }

    fn wait_for_log(&self, needle: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.count_logs(needle) > 0 {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    fn connect(&self) -> TcpStream {
        let stream =
            TcpStream::connect(("127.0.0.1", self.port)).expect("Failed to connect to server");
        stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
        stream
    }

    /// Send `input`, close the sending side, and collect everything returned
    fn exchange(&self, input: &[u8]) -> Vec<u8> {
        let mut stream = self.connect();
        stream.write_all(input).expect("Failed to send");
        stream.shutdown(Shutdown::Write).unwrap();
        let mut output = Vec::new();
        stream
            .read_to_end(&mut output)
            .expect("Failed to read response");
        output
    }

    fn is_running(&mut self) -> bool {
        matches!(self.process.try_wait(), Ok(None))
    }

    fn terminate(&mut self) -> Option<std::process::ExitStatus> {
        let _ = kill(Pid::from_raw(self.process.id() as i32), Signal::SIGTERM);
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Ok(Some(status)) = self.process.try_wait() {
                return Some(status);
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        None
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.terminate().is_none() {
            let _ = self.process.kill();
            let _ = self.process.wait();
        }
    }
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut output)
        .expect("response is not valid gzip");
    output
}

fn sample_payload() -> Vec<u8> {
    (0..2_000)
        .flat_map(|i| format!("line {} of the sample payload\n", i).into_bytes())
        .collect()
}

/// Read until EOF, treating a reset as the end of the stream
fn read_until_closed(stream: &mut TcpStream) -> Vec<u8> {
    let mut output = Vec::new();
    match stream.read_to_end(&mut output) {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::ConnectionReset => {}
        Err(e) => panic!("connection was not closed: {}", e),
    }
    output
}

#[test]
fn test_uppercase_filter() {
    let server = TestServer::start(&[], &["tr", "a-z", "A-Z"]);
    assert_eq!(server.exchange(b"hello"), b"HELLO");
}

#[test]
fn test_sessions_are_independent() {
    let server = TestServer::start(&[], &["tr", "a-z", "A-Z"]);
    assert_eq!(server.exchange(b"first"), b"FIRST");
    assert_eq!(server.exchange(b"second"), b"SECOND");
    assert!(server.wait_for_log("is complete, exit code: 0", IO_TIMEOUT));
}

#[test]
fn test_decompressed_input_reaches_command() {
    let server = TestServer::start(&["--unzip"], &["cat"]);
    let payload = sample_payload();
    assert_eq!(server.exchange(&gzip(&payload)), payload);
}

#[test]
fn test_compressed_output_round_trips() {
    let server = TestServer::start(&["--zip"], &["cat"]);
    let payload = sample_payload();
    let response = server.exchange(&payload);
    assert_ne!(response, payload);
    assert_eq!(gunzip(&response), payload);
}

#[test]
fn test_both_stages_compose() {
    let server = TestServer::start(&["-u", "-z"], &["tr", "a-z", "A-Z"]);
    let response = server.exchange(&gzip(b"mixed Case text\n"));
    assert_eq!(gunzip(&response), b"MIXED CASE TEXT\n");
}

#[test]
fn test_missing_command_only_ends_that_session() {
    let mut server = TestServer::start(&[], &["/nonexistent/filter-server-test-command"]);

    let mut stream = server.connect();
    let _ = stream.shutdown(Shutdown::Write);
    assert!(read_until_closed(&mut stream).is_empty());
    assert!(
        server.wait_for_log("exit code: 8", IO_TIMEOUT),
        "worker exit status not reported: {:?}",
        server.logs()
    );

    // The server keeps accepting
    let mut again = server.connect();
    let _ = again.shutdown(Shutdown::Write);
    assert!(read_until_closed(&mut again).is_empty());
    assert!(server.is_running());
}

#[test]
fn test_missing_filter_stage_ends_session() {
    let config_dir = tempfile::tempdir().unwrap();
    let config_path = config_dir.path().join("config.toml");
    let port = free_port();
    std::fs::write(
        &config_path,
        format!(
            r#"
bind_address = "127.0.0.1"
port = {}
compress_output = true
compress_command = ["/nonexistent/filter-server-test-gzip"]
command = ["cat"]
"#,
            port
        ),
    )
    .unwrap();

    let mut server = TestServer::start_with_config(&config_path, port);
    let mut stream = server.connect();
    let _ = stream.write_all(b"data");
    let _ = stream.shutdown(Shutdown::Write);
    assert!(read_until_closed(&mut stream).is_empty());
    assert!(server.wait_for_log("Failed to execute filter stage", IO_TIMEOUT));
    assert!(server.is_running());
}

#[test]
fn test_session_limit_is_enforced() {
    let server = TestServer::start(&["--sessions", "2", "--timeout", "none"], &["cat"]);

    let clients: Vec<TcpStream> = (0..4).map(|_| server.connect()).collect();
    std::thread::sleep(Duration::from_millis(500));

    assert_eq!(server.count_logs(" starting (slot"), 2, "{:?}", server.logs());
    drop(clients);
}

#[test]
fn test_saturated_server_resumes_when_slot_frees() {
    let server = TestServer::start(&["-s", "1", "-t", "none"], &["cat"]);

    let mut first = server.connect();
    first.write_all(b"first\n").unwrap();
    let mut echo = [0u8; 6];
    first.read_exact(&mut echo).unwrap();
    assert_eq!(&echo, b"first\n");

    // Queued by the kernel but not accepted while the only slot is busy
    let mut second = server.connect();
    second.write_all(b"second\n").unwrap();
    second
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();
    let mut buf = [0u8; 7];
    let err = second.read(&mut buf).unwrap_err();
    assert!(matches!(
        err.kind(),
        ErrorKind::WouldBlock | ErrorKind::TimedOut
    ));
    assert_eq!(server.count_logs(" starting (slot"), 1);

    // Ending the first session frees the slot
    first.shutdown(Shutdown::Write).unwrap();
    assert!(read_until_closed(&mut first).is_empty());

    second.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
    second.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"second\n");
}

#[test]
fn test_idle_session_is_terminated_after_timeout() {
    let server = TestServer::start(&["-s", "1", "-t", "1"], &["cat"]);

    let started = Instant::now();
    let mut stream = server.connect();
    assert!(read_until_closed(&mut stream).is_empty());
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(900), "closed after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(3), "closed after {:?}", elapsed);
    assert!(server.wait_for_log("Timeout: terminating process", IO_TIMEOUT));
    assert!(server.wait_for_log("is complete", IO_TIMEOUT));
    assert_eq!(server.count_logs("Timeout: killing process"), 0);
}

#[test]
fn test_timeout_closes_connection_held_by_filter_stage() {
    let server = TestServer::start(&["-s", "1", "-t", "1", "-u"], &["cat"]);

    // gunzip reads the connection directly; the session only ends when the
    // stage is signalled along with the command
    let started = Instant::now();
    let mut stream = server.connect();
    assert!(read_until_closed(&mut stream).is_empty());
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(900), "closed after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(8), "closed after {:?}", elapsed);
    assert!(server.wait_for_log("Timeout: terminating process", IO_TIMEOUT));
    assert!(server.wait_for_log("is complete", IO_TIMEOUT));

    // The freed slot serves a fresh session end to end
    let mut next = server.connect();
    next.write_all(&gzip(b"after timeout\n")).unwrap();
    next.shutdown(Shutdown::Write).unwrap();
    assert_eq!(read_until_closed(&mut next), b"after timeout\n");
}

#[test]
fn test_stubborn_session_is_killed_after_grace_window() {
    let server = TestServer::start(
        &["-s", "1", "-t", "1"],
        &["sh", "-c", "trap '' TERM; exec cat"],
    );

    let started = Instant::now();
    let mut stream = server.connect();
    assert!(read_until_closed(&mut stream).is_empty());
    let elapsed = started.elapsed();

    // One second to the deadline plus the two second grace window
    assert!(elapsed >= Duration::from_millis(2_900), "closed after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(8), "closed after {:?}", elapsed);

    assert!(server.wait_for_log("Timeout: killing process", IO_TIMEOUT));
    let terminated = server.log_position("Timeout: terminating process").unwrap();
    let killed = server.log_position("Timeout: killing process").unwrap();
    assert!(terminated < killed);
    assert_eq!(server.count_logs("Timeout: terminating process"), 1);
}

#[test]
fn test_sigterm_stops_server_and_sessions() {
    let mut server = TestServer::start(&["-t", "none"], &["cat"]);

    let mut stream = server.connect();
    stream.write_all(b"ping\n").unwrap();
    let mut echo = [0u8; 5];
    stream.read_exact(&mut echo).unwrap();

    let status = server.terminate().expect("server did not stop");
    assert!(status.success());
    assert!(server.wait_for_log("Terminating 1 running sessions", IO_TIMEOUT));
    assert!(read_until_closed(&mut stream).is_empty());
}
