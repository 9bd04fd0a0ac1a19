//! End-to-end rounds against an in-process load generator.
//!
//! A loader thread plays the external load generator over loopback: it
//! accepts the control connection, parses the handshake, opens the
//! requested number of echo connections, drives verified traffic with
//! randomized close ordering, and finally reports a canned result
//! payload. Each managed backend is run through a complete round.

use echo_bench::config::TestParams;
use echo_bench::harness;
use echo_bench::payload::{self, TestResult};
use echo_bench::runner::{Backend, TestHooks};
use echo_bench::backends::{GreenBackend, SelectorBackend, TasksBackend, ThreadsBackend};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

const MSIZE: usize = 64;
const READ_TIMEOUT: Duration = Duration::from_secs(10);

fn canned_result(messages: u64) -> TestResult {
    TestResult {
        messages,
        log_base: 10.0,
        histogram: BTreeMap::from([(1, 5), (3, 2), (5, 1)]),
        msg_percentiles: (1..=19).collect(),
    }
}

/// Connect `count` echo clients, then drive `frames` verified echoes on
/// each from its own thread, closing in randomized order.
fn drive_echo_clients(server: SocketAddr, count: usize, frames: usize) {
    let mut streams = Vec::with_capacity(count);
    for _ in 0..count {
        let stream = TcpStream::connect(server).expect("echo connect failed");
        stream.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
        streams.push(stream);
    }

    let mut delays: Vec<u64> = (0..count as u64).collect();
    delays.shuffle(&mut rand::rng());

    let mut clients = Vec::with_capacity(count);
    for (idx, mut stream) in streams.into_iter().enumerate() {
        let delay = delays[idx];
        clients.push(thread::spawn(move || {
            let frame = vec![idx as u8; MSIZE];
            let mut echo = vec![0u8; MSIZE];
            for _ in 0..frames {
                stream.write_all(&frame).expect("frame write failed");
                stream.read_exact(&mut echo).expect("echo read failed");
                assert_eq!(echo, frame, "echoed bytes differ");
            }
            thread::sleep(Duration::from_millis(delay % 20));
        }));
    }
    for client in clients {
        client.join().expect("echo client panicked");
    }
}

/// Run the external load generator's half of one round. Returns the
/// handshake line it received.
fn start_loader(frames: usize, result: TestResult) -> (SocketAddr, thread::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("loader bind failed");
    let addr = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let (mut control, _) = listener.accept().expect("control accept failed");
        control.set_read_timeout(Some(READ_TIMEOUT)).unwrap();

        let mut buf = [0u8; 256];
        let n = control.read(&mut buf).expect("handshake read failed");
        let handshake = String::from_utf8_lossy(&buf[..n]).to_string();

        let fields: Vec<&str> = handshake.split_whitespace().collect();
        assert_eq!(fields.len(), 7, "handshake has 7 fields: {handshake:?}");
        let server: SocketAddr = format!("{}:{}", fields[0], fields[1]).parse().unwrap();
        let count: usize = fields[2].parse().unwrap();
        let msize: usize = fields[6].parse().unwrap();
        assert_eq!(msize, MSIZE);

        drive_echo_clients(server, count, frames);

        control
            .write_all(payload::encode(&result).as_bytes())
            .expect("result send failed");
        handshake
    });

    (addr, handle)
}

fn round_params(loader_addr: SocketAddr, bind_port: u16, count: usize) -> TestParams {
    TestParams {
        loader_addr,
        bind_addr: format!("127.0.0.1:{bind_port}").parse().unwrap(),
        count,
        msize: MSIZE,
        runtime_secs: 1,
        timeout_ms: (0, 0),
    }
}

fn run_full_round(backend: &dyn Backend, bind_port: u16, count: usize, frames: usize) {
    let expected = canned_result((count * frames) as u64);
    let (loader_addr, loader) = start_loader(frames, expected.clone());
    let params = round_params(loader_addr, bind_port, count);

    let data = harness::run_round(backend, &params).expect("round failed");
    assert_eq!(data.result, expected);
    assert!(data.times.ctime >= 0.0);

    let handshake = loader.join().expect("loader panicked");
    assert_eq!(handshake, format!("127.0.0.1 {bind_port} {count} 1 0 0 {MSIZE}"));
}

#[test]
fn test_full_round_threads() {
    run_full_round(&ThreadsBackend, 36101, 8, 5);
}

#[test]
fn test_full_round_selector() {
    run_full_round(&SelectorBackend, 36102, 8, 5);
}

#[test]
fn test_full_round_tasks() {
    run_full_round(&TasksBackend, 36103, 8, 5);
}

#[test]
fn test_full_round_green() {
    run_full_round(&GreenBackend, 36104, 8, 5);
}

/// Hooks that verify `after_test` only fires once every client has
/// closed its socket, and release the client driver on ready.
struct ContractHooks {
    ready_tx: Option<mpsc::Sender<()>>,
    closed: Arc<AtomicUsize>,
    expected: usize,
    after_saw_all_closed: Arc<AtomicBool>,
    after_fired: usize,
}

impl TestHooks for ContractHooks {
    fn ready_to_connect(&mut self) {
        self.ready_tx
            .take()
            .expect("ready_to_connect fired twice")
            .send(())
            .unwrap();
    }

    fn before_test(&mut self) {}

    fn after_test(&mut self) {
        self.after_fired += 1;
        if self.closed.load(Ordering::SeqCst) == self.expected {
            self.after_saw_all_closed.store(true, Ordering::SeqCst);
        }
    }
}

#[test]
fn test_after_test_waits_for_all_sessions() {
    const COUNT: usize = 50;
    let bind_addr: SocketAddr = "127.0.0.1:36105".parse().unwrap();
    let closed = Arc::new(AtomicUsize::new(0));
    let after_saw_all_closed = Arc::new(AtomicBool::new(false));

    let (ready_tx, ready_rx) = mpsc::channel();
    let driver_closed = Arc::clone(&closed);
    let driver = thread::spawn(move || {
        ready_rx.recv().unwrap();

        let mut streams = Vec::with_capacity(COUNT);
        for _ in 0..COUNT {
            streams.push(TcpStream::connect(bind_addr).expect("connect failed"));
        }

        let mut clients = Vec::with_capacity(COUNT);
        for mut stream in streams {
            let closed = Arc::clone(&driver_closed);
            clients.push(thread::spawn(move || {
                stream.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
                let frame = vec![7u8; MSIZE];
                let mut echo = vec![0u8; MSIZE];
                let rounds = rand::rng().random_range(1..4);
                for _ in 0..rounds {
                    stream.write_all(&frame).unwrap();
                    stream.read_exact(&mut echo).unwrap();
                }
                thread::sleep(Duration::from_millis(rand::rng().random_range(0..30)));
                // Count the close before it happens so the server can
                // never observe EOF first.
                closed.fetch_add(1, Ordering::SeqCst);
                drop(stream);
            }));
        }
        for client in clients {
            client.join().expect("client panicked");
        }
    });

    let params = TestParams {
        loader_addr: "127.0.0.1:1".parse().unwrap(), // unused by backends
        bind_addr,
        count: COUNT,
        msize: MSIZE,
        runtime_secs: 1,
        timeout_ms: (0, 0),
    };
    let mut hooks = ContractHooks {
        ready_tx: Some(ready_tx),
        closed: Arc::clone(&closed),
        expected: COUNT,
        after_saw_all_closed: Arc::clone(&after_saw_all_closed),
        after_fired: 0,
    };

    ThreadsBackend.run(&params, &mut hooks).expect("run failed");
    driver.join().expect("driver panicked");

    assert_eq!(hooks.after_fired, 1);
    assert!(
        after_saw_all_closed.load(Ordering::SeqCst),
        "after_test fired before every session closed"
    );
}

/// Hooks that only unblock the client driver; contract bookkeeping is
/// checked elsewhere.
struct ReadyHooks {
    ready_tx: Option<mpsc::Sender<()>>,
}

impl TestHooks for ReadyHooks {
    fn ready_to_connect(&mut self) {
        if let Some(tx) = self.ready_tx.take() {
            tx.send(()).unwrap();
        }
    }

    fn before_test(&mut self) {}

    fn after_test(&mut self) {}
}

#[test]
fn test_framing_violation_kills_only_offending_session() {
    let bind_addr: SocketAddr = "127.0.0.1:36106".parse().unwrap();

    let (ready_tx, ready_rx) = mpsc::channel();
    let driver = thread::spawn(move || {
        ready_rx.recv().unwrap();

        let mut streams = Vec::with_capacity(3);
        for _ in 0..3 {
            let stream = TcpStream::connect(bind_addr).expect("connect failed");
            stream.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
            streams.push(stream);
        }

        let mut offender = streams.remove(0);
        let offender = thread::spawn(move || {
            // One byte short of a frame: the server must abort this
            // session without echoing.
            offender.write_all(&vec![9u8; MSIZE - 1]).unwrap();
            let mut buf = [0u8; 1];
            match offender.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => panic!("expected session abort, got {n} bytes"),
                Err(_) => {} // reset is also an abort
            }
        });

        let mut survivors = Vec::new();
        for (idx, mut stream) in streams.into_iter().enumerate() {
            survivors.push(thread::spawn(move || {
                let frame = vec![idx as u8; MSIZE];
                let mut echo = vec![0u8; MSIZE];
                for _ in 0..3 {
                    stream.write_all(&frame).unwrap();
                    stream.read_exact(&mut echo).unwrap();
                    assert_eq!(echo, frame, "survivor session corrupted");
                }
            }));
        }

        offender.join().expect("offender client panicked");
        for survivor in survivors {
            survivor.join().expect("survivor session failed");
        }
    });

    let params = TestParams {
        loader_addr: "127.0.0.1:1".parse().unwrap(), // unused by backends
        bind_addr,
        count: 3,
        msize: MSIZE,
        runtime_secs: 1,
        timeout_ms: (0, 0),
    };
    let mut hooks = ReadyHooks {
        ready_tx: Some(ready_tx),
    };

    SelectorBackend.run(&params, &mut hooks).expect("run failed");
    driver.join().expect("driver panicked");
}
