use std::io::IsTerminal;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use eyre::WrapErr;
use tcpkit::{Error, Listener, Status, StreamIo, WriteMode};
use tracing_subscriber::EnvFilter;

// test suite "constructor"
#[ctor::ctor]
fn init() {
    let in_ci = std::env::var("CI")
        .map(|val| val == "true")
        .unwrap_or(false);

    if std::io::stderr().is_terminal() || in_ci {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .json()
            .try_init();
    }

    // error traces
    let _ = color_eyre::install();
}

fn echo_line(_seq: u32, _peer: SocketAddr, stream: &mut StreamIo) -> tcpkit::Result<()> {
    let line = stream.read_string()?;
    stream.write_string(&line)
}

fn wait_until(what: &str, mut pred: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !pred() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn single_byte_then_end_of_file() -> eyre::Result<()> {
    let listener = Listener::bind("127.0.0.1:0", None).wrap_err("binding listener")?;
    let endpoint = listener.local_addr().to_string();

    let server = thread::spawn(move || {
        let handler = |_: u32, _: SocketAddr, stream: &mut StreamIo| -> tcpkit::Result<()> {
            stream.write_byte(0xAB)
        };
        let outcome = listener.dispatch_once(&handler);
        listener.close();
        outcome
    });

    let mut client = tcpkit::dial(&endpoint, Duration::from_secs(1), false)
        .wrap_err("dialling listener")?;
    assert_eq!(client.read_byte()?, 0xAB);
    assert!(matches!(client.read_byte(), Err(Error::EndOfFile)));

    server.join().expect("server thread panicked")?;
    Ok(())
}

#[test]
fn status_lines_follow_the_lifecycle() -> eyre::Result<()> {
    let (status_tx, status_rx) = crossbeam_channel::unbounded();
    let listener = Listener::bind("127.0.0.1:0", Some(status_tx))?;
    let endpoint = listener.local_addr().to_string();

    let client = thread::spawn(move || -> tcpkit::Result<String> {
        let mut client = tcpkit::dial(&endpoint, Duration::ZERO, false)?;
        client.write_string("hello\n")?;
        client.read_string()
    });

    listener.dispatch_once(&echo_line)?;
    assert_eq!(client.join().expect("client thread panicked")?, "hello\n");
    listener.close();
    listener.close();

    let statuses: Vec<Status> = status_rx.try_iter().collect();
    let lines: Vec<String> = statuses.iter().map(ToString::to_string).collect();
    tracing::debug!(?lines, "status lines");

    assert_eq!(lines.len(), 6);
    assert_eq!(lines[0], "Listener Created");
    assert_eq!(lines[1], "Listener Waiting");
    let Status::Connected { seq, peer } = &statuses[2] else {
        eyre::bail!("expected a connection status, got {}", lines[2]);
    };
    assert_eq!(*seq, 1);
    assert_eq!(lines[2], format!("Con1@{peer}"));
    assert_eq!(lines[3], format!("Dis1@{peer}(nil)"));
    assert_eq!(lines[4], "Listener Closed");
    assert_eq!(lines[5], "Listener Closed");
    Ok(())
}

#[test]
fn counts_after_concurrent_connections() -> eyre::Result<()> {
    const CLIENTS: u32 = 12;

    let listener = Arc::new(Listener::bind("127.0.0.1:0", None)?);
    let endpoint = listener.local_addr().to_string();

    let dispatcher = {
        let listener = Arc::clone(&listener);
        thread::spawn(move || listener.dispatch_loop(echo_line, None))
    };

    let clients: Vec<_> = (0..CLIENTS)
        .map(|i| {
            let endpoint = endpoint.clone();
            thread::spawn(move || -> tcpkit::Result<()> {
                let mut client = tcpkit::dial(&endpoint, Duration::from_secs(2), false)?;
                let message = format!("client {i}\n");
                client.write_string(&message)?;
                assert_eq!(client.read_string()?, message);
                Ok(())
            })
        })
        .collect();
    for client in clients {
        client.join().expect("client thread panicked")?;
    }

    wait_until("connections to drain", || listener.counts() == (0, CLIENTS));

    listener.close();
    let stopped = dispatcher.join().expect("dispatcher panicked");
    assert!(matches!(stopped, Error::NoConnection));
    Ok(())
}

#[test]
fn close_unblocks_pending_accept() {
    let listener = Arc::new(Listener::bind("127.0.0.1:0", None).unwrap());

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    {
        let listener = Arc::clone(&listener);
        thread::spawn(move || {
            let _ = done_tx.send(listener.accept_once().map(|conn| conn.seq()));
        });
    }

    thread::sleep(Duration::from_millis(50));
    listener.close();

    let outcome = done_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("accept did not return after close");
    assert!(matches!(outcome, Err(Error::NoConnection)));
    assert!(matches!(listener.accept_once(), Err(Error::NoConnection)));
    assert_eq!(listener.counts(), (0, 0));
}

#[test]
fn accept_deadline_ends_dispatch_loop() {
    let listener = Listener::bind("127.0.0.1:0", None).unwrap();
    listener.set_timeout(Duration::from_millis(40));
    let stopped = listener.dispatch_loop(echo_line, None);
    assert!(matches!(stopped, Error::Timeout));
}

#[test]
fn handler_errors_reach_the_error_sink() -> eyre::Result<()> {
    let (status_tx, status_rx) = crossbeam_channel::unbounded();
    let (error_tx, error_rx) = crossbeam_channel::unbounded();
    let listener = Arc::new(Listener::bind("127.0.0.1:0", Some(status_tx))?);
    let endpoint = listener.local_addr().to_string();

    let handler = |_: u32, _: SocketAddr, stream: &mut StreamIo| -> tcpkit::Result<()> {
        match stream.read_string()?.trim() {
            "done" => Err(Error::ClosedByUser),
            "pipe" => Err(Error::Io(std::io::ErrorKind::BrokenPipe.into())),
            other => stream.write_string(&format!("{other}\n")),
        }
    };
    let dispatcher = {
        let listener = Arc::clone(&listener);
        thread::spawn(move || listener.dispatch_loop(handler, Some(error_tx)))
    };

    for request in ["done", "pipe", "fine"] {
        let mut client = tcpkit::dial(&endpoint, Duration::ZERO, false)?;
        client.write_string(&format!("{request}\n"))?;
        // wait for the server side to finish with this connection
        let _ = client.read_string();
    }

    let errors = [
        error_rx.recv_timeout(Duration::from_secs(2))?,
        error_rx.recv_timeout(Duration::from_secs(2))?,
    ];
    assert!(errors.iter().any(|e| matches!(e, Error::ClosedByUser)));
    assert!(errors.iter().any(|e| matches!(e, Error::ClosedRemotely)));
    assert!(error_rx.recv_timeout(Duration::from_millis(100)).is_err());

    wait_until("connections to drain", || listener.counts() == (0, 3));
    listener.close();
    assert!(matches!(
        dispatcher.join().expect("dispatcher panicked"),
        Error::NoConnection
    ));

    let mut disconnects: Vec<String> = status_rx
        .try_iter()
        .filter(|status| matches!(status, Status::Disconnected { .. }))
        .map(|status| status.to_string())
        .collect();
    disconnects.sort();
    assert_eq!(disconnects.len(), 3);
    assert!(disconnects[0].starts_with("Dis1@") && disconnects[0].ends_with("(Closed by user)"));
    assert!(disconnects[1].starts_with("Dis2@"));
    assert!(disconnects[1].ends_with("(Broken pipe, closed remotely)"));
    assert!(disconnects[2].starts_with("Dis3@") && disconnects[2].ends_with("(nil)"));
    Ok(())
}

#[test]
fn panicking_handler_releases_its_slot() -> eyre::Result<()> {
    let listener = Arc::new(Listener::bind("127.0.0.1:0", None)?);
    let endpoint = listener.local_addr().to_string();

    let handler = |_: u32, _: SocketAddr, _: &mut StreamIo| -> tcpkit::Result<()> {
        panic!("handler failure");
    };
    let dispatcher = {
        let listener = Arc::clone(&listener);
        thread::spawn(move || listener.dispatch_loop(handler, None))
    };

    let mut client = tcpkit::dial(&endpoint, Duration::ZERO, false)?;
    assert!(client.read_byte().is_err());

    wait_until("panicked connection to drain", || {
        listener.counts() == (0, 1)
    });
    listener.close();
    dispatcher.join().expect("dispatcher panicked");
    Ok(())
}

#[test]
fn wrapped_connection_is_serviced_until_closed() -> eyre::Result<()> {
    let listener = Listener::bind("127.0.0.1:0", None)?;
    let endpoint = listener.local_addr().to_string();

    let mut client = tcpkit::dial(&endpoint, Duration::from_secs(1), false)?;
    client.set_read_timeout(Duration::from_secs(2));

    let connection = listener.accept_once()?;
    assert_eq!(connection.seq(), 1);
    assert_eq!(listener.counts(), (1, 1));

    let mut stream = connection.into_stream_io(WriteMode::Direct)?;
    assert_eq!(listener.counts(), (1, 1));
    stream.write_byte(0x5A)?;
    assert_eq!(client.read_byte()?, 0x5A);
    assert_eq!(listener.counts(), (1, 1));

    stream.close()?;
    assert_eq!(listener.counts(), (0, 1));
    assert!(matches!(client.read_byte(), Err(Error::EndOfFile)));

    // closing again must not release the slot twice
    stream.close()?;
    assert_eq!(listener.counts(), (0, 1));
    Ok(())
}

#[test]
fn dropping_a_wrapped_connection_releases_its_slot() -> eyre::Result<()> {
    let listener = Listener::bind("127.0.0.1:0", None)?;
    let endpoint = listener.local_addr().to_string();

    let _first = tcpkit::dial(&endpoint, Duration::from_secs(1), false)?;
    let _second = tcpkit::dial(&endpoint, Duration::from_secs(1), false)?;

    let unwrapped = listener.accept_once()?;
    let wrapped = listener.accept_once()?.into_stream_io(WriteMode::Buffered)?;
    assert_eq!(listener.counts(), (2, 2));

    drop(unwrapped);
    assert_eq!(listener.counts(), (1, 2));
    drop(wrapped);
    assert_eq!(listener.counts(), (0, 2));
    Ok(())
}
