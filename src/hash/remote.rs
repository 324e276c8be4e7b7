//! Line-delimited JSON client for a remote equivalence service.
//!
//! Every call opens a fresh connection, writes one request line and reads one
//! reply line:
//!
//! ```text
//! > {"method":"lookup","signature":"<hex>"}
//! < {"unified":"<hex>"}            or {"unified":null}
//! > {"method":"report","signature":"<hex>","output":"<hex>"}
//! < {"unified":"<hex>"}
//! ```

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{OutputId, Signature, UnifiedId};
use crate::error::ServiceUnavailable;
use crate::hash::EquivalenceService;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum Request {
    Lookup {
        signature: Signature,
    },
    Report {
        signature: Signature,
        output: OutputId,
    },
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reply {
    pub unified: Option<UnifiedId>,
}

pub struct RemoteEquivalence {
    address: SocketAddr,
    timeout: Duration,
}

impl RemoteEquivalence {
    pub fn new(address: impl ToSocketAddrs) -> Result<Self, ServiceUnavailable> {
        let address = address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ServiceUnavailable("address did not resolve".into()))?;

        Ok(Self {
            address,
            timeout: Duration::from_secs(5),
        })
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn call(&self, request: &Request) -> Result<Reply, ServiceUnavailable> {
        let stream = TcpStream::connect_timeout(&self.address, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        (&stream).write_all(line.as_bytes())?;

        let mut reply = String::new();
        BufReader::new(&stream).read_line(&mut reply)?;
        if reply.is_empty() {
            return Err(ServiceUnavailable("connection closed without reply".into()));
        }

        Ok(serde_json::from_str(&reply)?)
    }
}

impl EquivalenceService for RemoteEquivalence {
    fn lookup(&self, signature: Signature) -> Result<Option<UnifiedId>, ServiceUnavailable> {
        let reply = self.call(&Request::Lookup { signature })?;
        Ok(reply.unified)
    }

    fn report(
        &self,
        signature: Signature,
        output: OutputId,
    ) -> Result<UnifiedId, ServiceUnavailable> {
        let reply = self.call(&Request::Report { signature, output })?;
        reply
            .unified
            .ok_or_else(|| ServiceUnavailable("report reply carried no unified identity".into()))
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use super::*;
    use crate::core::Hash32;
    use crate::hash::MemoryEquivalence;

    /// Answers `count` requests from a [`MemoryEquivalence`].
    fn stub(count: usize) -> (SocketAddr, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let service = MemoryEquivalence::new();
            for stream in listener.incoming().take(count) {
                let stream = stream.unwrap();
                let mut line = String::new();
                BufReader::new(&stream).read_line(&mut line).unwrap();

                let reply = match serde_json::from_str(&line).unwrap() {
                    Request::Lookup { signature } => Reply {
                        unified: service.lookup(signature).unwrap(),
                    },
                    Request::Report { signature, output } => Reply {
                        unified: Some(service.report(signature, output).unwrap()),
                    },
                };

                let mut text = serde_json::to_string(&reply).unwrap();
                text.push('\n');
                (&stream).write_all(text.as_bytes()).unwrap();
            }
        });

        (address, handle)
    }

    #[test]
    fn test_wire_format() {
        let signature = Signature(Hash32::hash("s"));
        let json = serde_json::to_string(&Request::Lookup { signature }).unwrap();
        assert_eq!(
            json,
            format!(r#"{{"method":"lookup","signature":"{}"}}"#, signature.to_hex())
        );

        let reply: Reply = serde_json::from_str(r#"{"unified":null}"#).unwrap();
        assert_eq!(reply.unified, None);
    }

    #[test]
    fn test_round_trip_through_stub() {
        let (address, handle) = stub(3);
        let client = RemoteEquivalence::new(address).unwrap();
        let signature = Signature(Hash32::hash("s"));
        let output = OutputId(Hash32::hash("o"));

        assert_eq!(client.lookup(signature).unwrap(), None);
        let unified = client.report(signature, output).unwrap();
        assert_eq!(client.lookup(signature).unwrap(), Some(unified));

        handle.join().unwrap();
    }

    #[test]
    fn test_unreachable() {
        let address = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let client = RemoteEquivalence::new(address)
            .unwrap()
            .timeout(Duration::from_millis(200));
        assert!(client.lookup(Signature::default()).is_err());
    }
}
