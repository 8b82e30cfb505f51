#![cfg(unix)]

mod common;

use common::{Log, new_host, new_loop};
use hostloop::{
    Direction, EventLoop, HostLoop, HostWaker, LoopError, Notifier, PollHost, RawFd, TimerId, net,
};
use std::cell::{Cell, RefCell};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn socket_pair() -> (UnixStream, UnixStream) {
    let (a, b) = UnixStream::pair().unwrap();
    a.set_nonblocking(true).unwrap();
    b.set_nonblocking(true).unwrap();
    (a, b)
}

#[test]
fn test_reader_called_when_data_arrives() {
    let event_loop = new_loop();
    let (mut a, mut b) = socket_pair();
    let fd = a.as_raw_fd();
    let log = Log::new();

    let stopper = event_loop.clone();
    let received = log.clone();
    event_loop
        .add_reader(fd, move || {
            let mut buffer = [0u8; 16];
            let n = a.read(&mut buffer).unwrap();
            received.push(buffer[..n].to_vec());
            stopper.remove_reader(fd);
            stopper.stop();
        })
        .unwrap();

    b.write_all(b"ping").unwrap();
    event_loop.run_forever().unwrap();

    assert_eq!(log.entries(), vec![b"ping".to_vec()]);
    assert_eq!(event_loop.notifier_enabled(fd, Direction::Read), None);
    event_loop.close().unwrap();
}

#[test]
fn test_notifier_disabled_while_callback_runs() {
    let event_loop = new_loop();
    let (a, mut b) = socket_pair();
    let fd = a.as_raw_fd();
    let log = Log::new();

    let inner = event_loop.clone();
    let seen = log.clone();
    event_loop
        .add_reader(fd, move || {
            seen.push(inner.notifier_enabled(fd, Direction::Read));
            inner.stop();
        })
        .unwrap();
    assert_eq!(event_loop.notifier_enabled(fd, Direction::Read), Some(true));

    b.write_all(b"x").unwrap();
    event_loop.run_forever().unwrap();

    assert_eq!(log.entries(), vec![Some(false)]);
    assert_eq!(event_loop.notifier_enabled(fd, Direction::Read), Some(true));

    assert!(event_loop.remove_reader(fd));
    assert!(!event_loop.remove_reader(fd));
    event_loop.close().unwrap();
    drop(a);
}

#[test]
fn test_level_triggered_until_removed() {
    let event_loop = new_loop();
    let (a, mut b) = socket_pair();
    let fd = a.as_raw_fd();
    let calls = Rc::new(Cell::new(0));

    let inner = event_loop.clone();
    let counter = calls.clone();
    event_loop
        .add_reader(fd, move || {
            counter.set(counter.get() + 1);
            if counter.get() == 3 {
                inner.remove_reader(fd);
                inner.call_later(Duration::from_millis(20), {
                    let inner = inner.clone();
                    move || inner.stop()
                });
            }
        })
        .unwrap();

    b.write_all(b"unread").unwrap();
    event_loop.run_forever().unwrap();

    assert_eq!(calls.get(), 3);
    event_loop.close().unwrap();
    drop(a);
}

#[test]
fn test_replacing_a_reader() {
    let event_loop = new_loop();
    let (a, mut b) = socket_pair();
    let fd = a.as_raw_fd();
    let log = Log::new();

    let first = log.clone();
    event_loop.add_reader(fd, move || first.push("first")).unwrap();

    let inner = event_loop.clone();
    let second = log.clone();
    event_loop
        .add_reader(fd, move || {
            second.push("second");
            inner.remove_reader(fd);
            inner.stop();
        })
        .unwrap();

    b.write_all(b"x").unwrap();
    event_loop.run_forever().unwrap();

    assert_eq!(log.entries(), vec!["second"]);
    event_loop.close().unwrap();
    drop(a);
}

/// Records every call the loop makes on one notifier.
struct RecordingNotifier {
    inner: Rc<dyn Notifier>,
    calls: RefCell<Vec<&'static str>>,
}

impl RecordingNotifier {
    fn calls(&self) -> Vec<&'static str> {
        self.calls.borrow().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn fd(&self) -> RawFd {
        self.inner.fd()
    }

    fn direction(&self) -> Direction {
        self.inner.direction()
    }

    fn set_enabled(&self, enabled: bool) {
        self.calls
            .borrow_mut()
            .push(if enabled { "enable" } else { "disable" });
        self.inner.set_enabled(enabled);
    }

    fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }

    fn connect(&self, slot: Box<dyn FnMut(RawFd)>) {
        self.calls.borrow_mut().push("connect");
        self.inner.connect(slot);
    }

    fn disconnect(&self) {
        self.calls.borrow_mut().push("disconnect");
        self.inner.disconnect();
    }
}

/// A `PollHost` that keeps every notifier it hands out.
struct RecordingHost {
    inner: Rc<PollHost>,
    notifiers: RefCell<Vec<Rc<RecordingNotifier>>>,
}

impl HostLoop for RecordingHost {
    fn exec(&self) -> i32 {
        self.inner.exec()
    }

    fn exit(&self, code: i32) {
        self.inner.exit(code);
    }

    fn process_events(&self) {
        self.inner.process_events();
    }

    fn start_timer(&self, interval_ms: u64, on_timeout: Box<dyn FnMut(TimerId)>) -> TimerId {
        self.inner.start_timer(interval_ms, on_timeout)
    }

    fn kill_timer(&self, id: TimerId) {
        self.inner.kill_timer(id);
    }

    fn create_notifier(&self, fd: RawFd, direction: Direction) -> io::Result<Rc<dyn Notifier>> {
        let notifier = Rc::new(RecordingNotifier {
            inner: self.inner.create_notifier(fd, direction)?,
            calls: RefCell::new(Vec::new()),
        });
        self.notifiers.borrow_mut().push(notifier.clone());
        Ok(notifier)
    }

    fn create_waker(&self, on_wake: Box<dyn FnMut()>) -> Arc<dyn HostWaker> {
        self.inner.create_waker(on_wake)
    }
}

#[test]
fn test_reader_replacing_itself_is_not_rearmed() {
    let host = Rc::new(RecordingHost {
        inner: new_host(),
        notifiers: RefCell::new(Vec::new()),
    });
    let event_loop = EventLoop::new(host.clone());
    let (a, mut b) = socket_pair();
    let a = Rc::new(a);
    let fd = a.as_raw_fd();
    let log = Log::new();
    b.write_all(b"x").unwrap();

    let inner = event_loop.clone();
    let first_log = log.clone();
    let first_stream = a.clone();
    event_loop
        .add_reader(fd, move || {
            let mut buffer = [0u8; 16];
            let _ = (&*first_stream).read(&mut buffer);
            first_log.push("first");

            let stopper = inner.clone();
            let second_log = first_log.clone();
            let second_stream = first_stream.clone();
            inner
                .add_reader(fd, move || {
                    let mut buffer = [0u8; 16];
                    let _ = (&*second_stream).read(&mut buffer);
                    second_log.push("second");
                    stopper.remove_reader(fd);
                    stopper.stop();
                })
                .unwrap();

            b.write_all(b"again").unwrap();
        })
        .unwrap();

    event_loop.run_forever().unwrap();

    assert_eq!(log.entries(), vec!["first", "second"]);

    let notifiers = host.notifiers.borrow();
    assert_eq!(notifiers.len(), 2);
    let old = notifiers[0].calls();
    assert_eq!(old.iter().filter(|call| **call == "enable").count(), 1);
    assert_eq!(old.last(), Some(&"disconnect"));
    assert!(!notifiers[0].is_enabled());
    assert_eq!(event_loop.notifier_enabled(fd, Direction::Read), None);

    drop(notifiers);
    event_loop.close().unwrap();
}

#[test]
fn test_writer_called_when_writable() {
    let event_loop = new_loop();
    let (a, _b) = socket_pair();
    let fd = a.as_raw_fd();
    let calls = Rc::new(Cell::new(0));

    let inner = event_loop.clone();
    let counter = calls.clone();
    event_loop
        .add_writer(fd, move || {
            counter.set(counter.get() + 1);
            inner.remove_writer(fd);
            inner.stop();
        })
        .unwrap();

    event_loop.run_forever().unwrap();

    assert_eq!(calls.get(), 1);
    assert!(!event_loop.remove_writer(fd));
    event_loop.close().unwrap();
    drop(a);
}

#[test]
fn test_invalid_fd_is_rejected() {
    let event_loop = new_loop();

    assert!(matches!(
        event_loop.add_reader(-1, || {}),
        Err(LoopError::InvalidFd(-1))
    ));
    assert!(matches!(
        event_loop.add_writer(-5, || {}),
        Err(LoopError::InvalidFd(-5))
    ));

    event_loop.close().unwrap();
}

#[test]
fn test_close_disables_registrations() {
    let event_loop = new_loop();
    let (a, _b) = socket_pair();
    let fd = a.as_raw_fd();

    event_loop.add_reader(fd, || {}).unwrap();
    event_loop.close().unwrap();

    assert_eq!(event_loop.notifier_enabled(fd, Direction::Read), None);
    assert!(!event_loop.remove_reader(fd));
}

#[test]
fn test_recv_and_send_all() {
    let event_loop = new_loop();
    let (a, b) = socket_pair();
    let (read_fd, write_fd) = (a.as_raw_fd(), b.as_raw_fd());

    let received = event_loop
        .run_until_complete(async move {
            net::send_all(write_fd, b"hello").await.unwrap();
            net::recv(read_fd, 64).await.unwrap()
        })
        .unwrap();

    assert_eq!(received, b"hello");
    event_loop.close().unwrap();
    drop((a, b));
}

#[test]
fn test_recv_waits_for_data() {
    let event_loop = new_loop();
    let (a, mut b) = socket_pair();
    let fd = a.as_raw_fd();

    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        b.write_all(b"late").unwrap();
        b
    });

    let received = event_loop
        .run_until_complete(async move { net::recv(fd, 64).await.unwrap() })
        .unwrap();

    assert_eq!(received, b"late");
    assert_eq!(event_loop.notifier_enabled(fd, Direction::Read), None);

    drop(writer.join().unwrap());
    event_loop.close().unwrap();
    drop(a);
}

#[test]
fn test_accept_and_connect() {
    let event_loop = new_loop();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let listener_fd = listener.as_raw_fd();

    let client = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
    assert!(client >= 0);
    let client = unsafe { OwnedFd::from_raw_fd(client) };
    let client_fd = client.as_raw_fd();
    let flags = unsafe { libc::fcntl(client_fd, libc::F_GETFL) };
    assert_eq!(
        unsafe { libc::fcntl(client_fd, libc::F_SETFL, flags | libc::O_NONBLOCK) },
        0
    );

    let spawner = event_loop.clone();
    let (accepted, peer) = event_loop
        .run_until_complete(async move {
            let accepting = spawner.spawn(net::accept(listener_fd));
            net::connect(client_fd, addr).await.unwrap();
            accepting.await.unwrap().unwrap()
        })
        .unwrap();

    let accepted = unsafe { OwnedFd::from_raw_fd(accepted) };
    assert!(peer.ip().is_loopback());

    let mut server = TcpStream::from(accepted);
    let mut client = TcpStream::from(client);
    client.set_nonblocking(false).unwrap();
    server.set_nonblocking(false).unwrap();
    client.write_all(b"hi").unwrap();
    let mut buffer = [0u8; 2];
    server.read_exact(&mut buffer).unwrap();
    assert_eq!(&buffer, b"hi");

    event_loop.close().unwrap();
    drop(listener);
}
