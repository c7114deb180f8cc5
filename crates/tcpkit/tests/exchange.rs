use std::io::IsTerminal;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::Rng;
use tcpkit::{ByteOrder, Error, Listener, StreamIo};
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

const STORY: &str = "The lighthouse keeper counted the ships every night from his tower.
Some nights there were three, some nights there were none at all.
He wrote each one down in a thick blue book with a stubby pencil.
When the fog rolled in he rang the bell and listened for an answer.
Once a small boat answered with a whistle, and he laughed out loud.
In the morning he walked the beach looking for bits of rope and glass.
His cat followed at a distance, pretending not to be interested.
By winter the book was full, so he started a second, slightly thinner one.";

tcpkit::wire_struct! {
    #[derive(Debug, Clone, PartialEq)]
    struct Inbound {
        u32s: [u32; 4],
        f64s: [f64; 3],
        bytes: [u8; 8],
        u64s: [u64; 6],
        f32s: [f32; 5],
    }
}

tcpkit::wire_struct! {
    #[derive(Debug, Clone, PartialEq)]
    struct Outbound {
        f64s: [f64; 3],
        bytes: [u8; 8],
        u64s: [u64; 6],
        f32s: [f32; 5],
        u32s: [u32; 4],
    }
}

fn junk(rng: &mut impl Rng, len: usize, out: &mut Vec<u8>) {
    out.extend((0..len).map(|_| rng.gen_range(b'a'..=b'z')));
}

/// The story cut into random-length `>>>...<<<` records separated by junk.
fn record_chunks(rng: &mut impl Rng, text: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let len = rng.gen_range(4..19);
        junk(rng, len, &mut out);
        let take = rng.gen_range(4..28).min(rest.len());
        out.extend_from_slice(b">>>");
        out.extend_from_slice(&rest[..take]);
        out.extend_from_slice(b"<<<");
        rest = &rest[take..];
    }
    let len = rng.gen_range(13..28);
    junk(rng, len, &mut out);
    out
}

/// The story cut into `size`-byte records, each after junk and `>>>`. The
/// last one is padded with spaces.
fn sized_chunks(rng: &mut impl Rng, text: &[u8], size: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in text.chunks(size) {
        let len = rng.gen_range(4..19);
        junk(rng, len, &mut out);
        out.extend_from_slice(b">>>");
        out.extend_from_slice(chunk);
        out.resize(out.len() + size - chunk.len(), b' ');
    }
    let len = rng.gen_range(13..28);
    junk(rng, len, &mut out);
    out
}

/// Send `data` as a series of randomly sized writes.
fn write_fragmented(rng: &mut impl Rng, stream: &mut StreamIo, data: &[u8]) -> tcpkit::Result<()> {
    let mut rest = data;
    while !rest.is_empty() {
        let take = rng.gen_range(1..64).min(rest.len());
        stream.write(&rest[..take])?;
        rest = &rest[take..];
    }
    Ok(())
}

fn order_from(code: &str) -> tcpkit::Result<ByteOrder> {
    match code {
        "be" => Ok(ByteOrder::BigEndian),
        "le" => Ok(ByteOrder::LittleEndian),
        _ => Err(Error::BadData),
    }
}

/// One request per connection: `records`, `sized <n>` or `struct <be|le> <count>`.
fn story_server(_seq: u32, _peer: SocketAddr, stream: &mut StreamIo) -> tcpkit::Result<()> {
    let mut rng = rand::thread_rng();
    stream.set_read_timeout(Duration::from_secs(2));

    let request = stream.read_string()?;
    let words: Vec<&str> = request.split_whitespace().collect();
    match words.as_slice() {
        ["records"] => {
            let data = record_chunks(&mut rng, STORY.as_bytes());
            write_fragmented(&mut rng, stream, &data)
        }
        ["sized", size] => {
            let size = size.parse().map_err(|_| Error::BadData)?;
            let data = sized_chunks(&mut rng, STORY.as_bytes(), size);
            write_fragmented(&mut rng, stream, &data)
        }
        ["struct", order, count] => {
            let order = order_from(order)?;
            let count: usize = count.parse().map_err(|_| Error::BadData)?;
            for _ in 0..count {
                let inbound: Inbound = stream.read_struct(order)?;
                let outbound = Outbound {
                    f64s: inbound.f64s,
                    bytes: inbound.bytes,
                    u64s: inbound.u64s,
                    f32s: inbound.f32s,
                    u32s: inbound.u32s,
                };
                stream.write_struct(order, &outbound)?;
            }
            Ok(())
        }
        _ => Err(Error::BadData),
    }
}

struct Server {
    listener: Arc<Listener>,
    dispatcher: Option<thread::JoinHandle<Error>>,
    errors: crossbeam_channel::Receiver<Error>,
}

impl Server {
    fn start() -> Self {
        let listener = Arc::new(Listener::bind("127.0.0.1:0", None).expect("binding listener"));
        let (error_tx, errors) = crossbeam_channel::unbounded();
        let dispatcher = {
            let listener = Arc::clone(&listener);
            thread::spawn(move || listener.dispatch_loop(story_server, Some(error_tx)))
        };
        Self {
            listener,
            dispatcher: Some(dispatcher),
            errors,
        }
    }

    fn connect(&self) -> tcpkit::Result<StreamIo> {
        let endpoint = self.listener.local_addr().to_string();
        let mut stream = tcpkit::dial(&endpoint, Duration::from_millis(500), false)?;
        stream.set_read_timeout(Duration::from_secs(2));
        Ok(stream)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.listener.close();
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.join();
        }
        let errors: Vec<String> = self.errors.try_iter().map(|e| e.to_string()).collect();
        if !thread::panicking() {
            assert!(errors.is_empty(), "server reported errors: {errors:?}");
        }
    }
}

#[test]
fn story_exchanges() -> eyre::Result<()> {
    let server = Server::start();
    let mut rng = rand::thread_rng();

    for round in 0..8 {
        let mut client = server.connect()?;
        let mut received = Vec::new();

        if round % 2 == 0 {
            client.write_string("records\n")?;
            loop {
                match client.read_record(b">>>", b"<<<") {
                    Ok(record) => received.extend_from_slice(&record),
                    Err(Error::EndOfFile) => break,
                    Err(e) => return Err(e.into()),
                }
            }
        } else {
            let size: usize = rng.gen_range(4..19);
            client.write_string(&format!("sized {size}\n"))?;
            loop {
                match client.read_sized_record(b">>>", size) {
                    Ok(record) => {
                        assert_eq!(record.len(), size);
                        received.extend_from_slice(&record);
                    }
                    Err(Error::EndOfFile) => break,
                    Err(e) => return Err(e.into()),
                }
            }
        }

        let received = String::from_utf8(received)?;
        assert_eq!(received.trim_end(), STORY, "round {round}");
        client.close()?;
    }
    Ok(())
}

#[test]
fn struct_exchanges_in_both_orders() -> eyre::Result<()> {
    const COUNT: usize = 5;

    let server = Server::start();
    let mut rng = rand::thread_rng();

    for (code, order) in [("be", ByteOrder::BigEndian), ("le", ByteOrder::LittleEndian)] {
        let mut client = server.connect()?;
        client.write_string(&format!("struct {code} {COUNT}\n"))?;

        for _ in 0..COUNT {
            let sent = Inbound {
                u32s: rng.r#gen(),
                f64s: rng.r#gen(),
                bytes: rng.r#gen(),
                u64s: rng.r#gen(),
                f32s: rng.r#gen(),
            };
            client.write_struct(order, &sent)?;

            let echoed: Outbound = client.read_struct(order)?;
            assert_eq!(echoed.u32s, sent.u32s);
            assert_eq!(echoed.f64s, sent.f64s);
            assert_eq!(echoed.bytes, sent.bytes);
            assert_eq!(echoed.u64s, sent.u64s);
            assert_eq!(echoed.f32s, sent.f32s);
        }

        // server closes once the requested structs are done
        assert!(matches!(
            client.read_struct::<Outbound>(order),
            Err(Error::EndOfFile)
        ));
    }
    Ok(())
}

#[test]
fn truncated_struct_is_bad_data() -> eyre::Result<()> {
    let server = Server::start();
    let mut client = server.connect()?;

    client.write_string("struct le 1\n")?;
    client.write(&[0u8; 10])?;
    client.close()?;

    let error = server
        .errors
        .recv_timeout(Duration::from_secs(2))
        .expect("server should report the short struct");
    assert!(matches!(error, Error::BadData));
    Ok(())
}
