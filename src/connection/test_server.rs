//! A scripted stand-in for memcached used by the connection tests.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// What the fake server does with one request line.
pub enum Reply {
    Send(Vec<u8>),
    /// Written one byte at a time
    Trickle(Vec<u8>),
    /// Written, then the socket is closed
    SendAndClose(Vec<u8>),
    /// Written after a pause; later requests wait behind it
    Delayed(Duration, Vec<u8>),
    Silent,
}

pub struct TestServer {
    pub addr: SocketAddr,
    /// Every request line seen, data blocks excluded
    pub received: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    pub fn count(&self, line: &str) -> usize {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.as_str() == line)
            .count()
    }
}

/// Answers like a small memcached that only knows `foo`.
pub fn memcached(line: &str) -> Reply {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        ["mn"] => Reply::Send(b"MN\r\n".to_vec()),
        ["set", ..] => Reply::Send(b"STORED\r\n".to_vec()),
        ["get", "foo"] => Reply::Send(b"VALUE foo 0 3\r\nbar\r\nEND\r\n".to_vec()),
        ["get", ..] => Reply::Send(b"END\r\n".to_vec()),
        ["mg", key, "v"] => Reply::Trickle(format!("VA {}\r\n{}\r\n", key.len(), key).into_bytes()),
        ["mg", key, "v", "h", "l"] => {
            Reply::Send(format!("VA {} h0 l7\r\n{}\r\n", key.len(), key).into_bytes())
        }
        // A return flag from a newer server
        ["mg", _, "v", "Y"] => Reply::Send(b"VA 3 Y1\r\nbar\r\n".to_vec()),
        ["late"] => Reply::Delayed(Duration::from_millis(150), b"HD\r\n".to_vec()),
        ["version"] => Reply::Send(b"VERSION 1.6.21\r\n".to_vec()),
        ["slow", ..] => Reply::Silent,
        ["hangup"] => Reply::SendAndClose(b"VALUE foo 0 10\r\nabc".to_vec()),
        _ => Reply::Send(b"ERROR\r\n".to_vec()),
    }
}

/// Starts a fake server on an ephemeral port.
pub async fn create_test_server(respond: fn(&str) -> Reply) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&received);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let (read, mut write) = stream.into_split();
                let mut lines = BufReader::new(read).lines();
                let mut data_follows = false;

                while let Ok(Some(line)) = lines.next_line().await {
                    if data_follows {
                        data_follows = false;
                        continue;
                    }
                    data_follows = line.starts_with("set ");
                    log.lock().unwrap().push(line.clone());

                    let written = match respond(&line) {
                        Reply::Send(bytes) => write.write_all(&bytes).await,
                        Reply::Trickle(bytes) => {
                            let mut result = Ok(());
                            for byte in bytes {
                                result = write.write_all(&[byte]).await;
                                if result.is_err() {
                                    break;
                                }
                                tokio::task::yield_now().await;
                            }
                            result
                        }
                        Reply::SendAndClose(bytes) => {
                            let _ = write.write_all(&bytes).await;
                            return;
                        }
                        Reply::Delayed(pause, bytes) => {
                            tokio::time::sleep(pause).await;
                            write.write_all(&bytes).await
                        }
                        Reply::Silent => Ok(()),
                    };
                    if written.is_err() {
                        return;
                    }
                }
            });
        }
    });

    TestServer { addr, received }
}
