use super::callback::{into_result, RequestCallback};
use super::error::ConnectionError;
use crate::protocol::Response;
use bytes::Bytes;
use tracing::trace;

/// One encoded request and its position in the connection's send order.
///
/// The sequence is for diagnostics and the blocking connection's callback
/// map; pipelined responses are matched by order alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBuffer {
    sequence: u64,
    request: Bytes,
}

impl CommandBuffer {
    pub fn new(sequence: u64, request: Bytes) -> Self {
        Self { sequence, request }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn request(&self) -> &Bytes {
        &self.request
    }

    pub fn len(&self) -> usize {
        self.request.len()
    }

    pub fn is_empty(&self) -> bool {
        self.request.is_empty()
    }
}

/// A request that has not been answered yet, tied to whoever wants the answer.
#[derive(Debug)]
pub struct MissingLink {
    callback: RequestCallback,
    buffer: CommandBuffer,
}

impl MissingLink {
    pub fn new(callback: RequestCallback, buffer: CommandBuffer) -> Self {
        Self { callback, buffer }
    }

    pub fn buffer(&self) -> &CommandBuffer {
        &self.buffer
    }

    pub fn sequence(&self) -> u64 {
        self.buffer.sequence
    }

    /// Resolves with the response this request provoked.
    pub fn complete(self, response: Response) {
        if self.callback.is_abandoned() {
            trace!(
                sequence = self.buffer.sequence,
                code = %response.code(),
                "Dropping response for a caller that stopped waiting"
            );
            return;
        }
        let result = into_result(response, &self.buffer.request);
        self.callback.resolve(result);
    }

    pub fn fail(self, err: ConnectionError) {
        self.callback.resolve(Err(err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ResponseCode;

    #[tokio::test]
    async fn test_complete_maps_error_line() {
        let (callback, pending) = RequestCallback::client();
        let link = MissingLink::new(
            callback,
            CommandBuffer::new(4, Bytes::from_static(b"frobnicate\r\n")),
        );
        assert_eq!(link.sequence(), 4);

        link.complete(Response::new(ResponseCode::Error));

        let err = pending.wait(None).await.unwrap_err();
        assert!(matches!(err, ConnectionError::IncomprehensibleRequest(ref r) if r == "frobnicate"));
    }

    #[tokio::test]
    async fn test_complete_after_caller_gave_up() {
        let (callback, pending) = RequestCallback::client();
        let link = MissingLink::new(callback, CommandBuffer::new(1, Bytes::from_static(b"mn\r\n")));

        let result = pending.wait(Some(std::time::Duration::from_millis(1))).await;
        assert!(matches!(result, Err(ConnectionError::Timeout)));

        link.complete(Response::new(ResponseCode::Mn));
    }

    #[tokio::test]
    async fn test_fail() {
        let (callback, pending) = RequestCallback::client();
        MissingLink::new(callback, CommandBuffer::new(0, Bytes::from_static(b"mn\r\n")))
            .fail(ConnectionError::ServerClosed);

        assert!(pending.wait(None).await.unwrap_err().is_io());
    }
}
