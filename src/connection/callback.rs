//! Request Callbacks
//!
//! A [`RequestCallback`] is the I/O side of a single-use handoff; the caller
//! side is a [`PendingResponse`]. Resolving consumes the callback, so a
//! request can only ever be answered once.

use super::error::ConnectionError;
use crate::protocol::{Response, ResponseCode};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};

pub type ResponseResult = Result<Response, ConnectionError>;

/// Where a response goes once the I/O side has it.
#[derive(Debug)]
pub enum RequestCallback {
    /// A caller is waiting on the matching [`PendingResponse`].
    Client(oneshot::Sender<ResponseResult>),

    /// Issued by the connection itself (keepalive probes). Nobody waits.
    Server,
}

impl RequestCallback {
    /// Creates a callback together with the handle its caller waits on.
    pub fn client() -> (Self, PendingResponse) {
        let (tx, rx) = oneshot::channel();
        (RequestCallback::Client(tx), PendingResponse { rx })
    }

    pub fn server() -> Self {
        RequestCallback::Server
    }

    /// Returns true if the caller already gave up waiting.
    pub fn is_abandoned(&self) -> bool {
        match self {
            RequestCallback::Client(tx) => tx.is_closed(),
            RequestCallback::Server => false,
        }
    }

    /// Hands the result over. A caller that already timed out simply never
    /// sees it.
    pub fn resolve(self, result: ResponseResult) {
        match self {
            RequestCallback::Client(tx) => {
                if tx.send(result).is_err() {
                    trace!("Response arrived after the caller stopped waiting");
                }
            }
            RequestCallback::Server => match result {
                Ok(response) => trace!(code = %response.code(), "Server request answered"),
                Err(e) => debug!(error = %e, "Server request failed"),
            },
        }
    }
}

/// The caller's half of a request.
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<ResponseResult>,
}

impl PendingResponse {
    /// Waits for the response, at most `timeout` if one is given.
    ///
    /// A callback dropped without being resolved reads as
    /// [`ConnectionError::Closed`].
    pub async fn wait(self, timeout: Option<Duration>) -> ResponseResult {
        let received = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.rx)
                .await
                .map_err(|_| ConnectionError::Timeout)?,
            None => self.rx.await,
        };

        received.unwrap_or(Err(ConnectionError::Closed))
    }
}

/// Turns a parsed response into what the caller sees.
///
/// Error lines become errors for that caller alone; `request` is the text
/// that provoked them.
pub fn into_result(response: Response, request: &[u8]) -> ResponseResult {
    match response.code() {
        ResponseCode::Error => Err(ConnectionError::IncomprehensibleRequest(
            String::from_utf8_lossy(request).trim_end().to_string(),
        )),
        ResponseCode::ClientError => Err(ConnectionError::ClientError(
            response.message().unwrap_or_default().to_string(),
        )),
        ResponseCode::ServerError => Err(ConnectionError::ServerError(
            response.message().unwrap_or_default().to_string(),
        )),
        _ => Ok(response),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_delivers_response() {
        let (callback, pending) = RequestCallback::client();
        callback.resolve(Ok(Response::new(ResponseCode::Stored)));

        let response = pending.wait(None).await.unwrap();
        assert_eq!(response.code(), ResponseCode::Stored);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let (callback, pending) = RequestCallback::client();

        let started = std::time::Instant::now();
        let result = pending.wait(Some(Duration::from_millis(50))).await;

        assert!(matches!(result, Err(ConnectionError::Timeout)));
        assert!(started.elapsed() < Duration::from_millis(150));

        // Late resolution is harmless
        assert!(callback.is_abandoned());
        callback.resolve(Ok(Response::new(ResponseCode::Hd)));
    }

    #[tokio::test]
    async fn test_dropped_callback_reads_as_closed() {
        let (callback, pending) = RequestCallback::client();
        drop(callback);

        assert!(matches!(pending.wait(None).await, Err(ConnectionError::Closed)));
    }

    #[test]
    fn test_server_callback_is_never_abandoned() {
        let callback = RequestCallback::server();
        assert!(!callback.is_abandoned());
        callback.resolve(Err(ConnectionError::ServerClosed));
    }

    #[test]
    fn test_error_lines_map_to_caller_errors() {
        let err = into_result(Response::new(ResponseCode::Error), b"bogus foo\r\n").unwrap_err();
        assert!(matches!(err, ConnectionError::IncomprehensibleRequest(ref r) if r == "bogus foo"));

        let err = into_result(
            Response::error(ResponseCode::ClientError, "bad data chunk"),
            b"set foo 0 0 1\r\nab\r\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConnectionError::ClientError(ref m) if m == "bad data chunk"));

        let err = into_result(
            Response::error(ResponseCode::ServerError, "out of memory"),
            b"",
        )
        .unwrap_err();
        assert!(matches!(err, ConnectionError::ServerError(_)));

        assert!(into_result(Response::new(ResponseCode::NotFound), b"").is_ok());
    }
}
