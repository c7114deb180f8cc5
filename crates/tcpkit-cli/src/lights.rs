use std::net::SocketAddr;

use rand::Rng;
use tcpkit::{Error, Handler, StreamIo, StreamSettings};

const LIGHTS: [&str; 3] = ["Red", "Yellow", "Green"];

/// Line protocol of the demo server.
///
/// After a greeting, each request line gets one reply:
/// `light` a colour line, `byte` a single byte in `1..=255`,
/// `I am: <name>` nothing, `done` ends the connection.
pub struct Lights {
    pub settings: StreamSettings,
}

impl Handler for Lights {
    fn handle(&self, seq: u32, peer: SocketAddr, stream: &mut StreamIo) -> tcpkit::Result<()> {
        stream.configure(&self.settings);
        stream.write_string(&format!("Hello {peer}, you are connection #{seq}\n"))?;
        stream.flush()?;

        let mut rng = rand::thread_rng();
        loop {
            let request = stream.read_string()?;
            match request.trim() {
                "light" => {
                    let light = LIGHTS[rng.gen_range(0..LIGHTS.len())];
                    stream.write_string(&format!("{light}\n"))?;
                }
                "byte" => stream.write_byte(rng.gen_range(1..=255))?,
                "done" => return Err(Error::ClosedByUser),
                other => match other.strip_prefix("I am: ") {
                    Some(name) => tracing::info!(seq, name, "client introduced itself"),
                    None => {
                        tracing::warn!(seq, request = other, "unknown request");
                        return Err(Error::BadData);
                    }
                },
            }
            stream.flush()?;
        }
    }
}
