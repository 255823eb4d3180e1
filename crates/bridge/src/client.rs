//! Client transport - the WebSocket a debugger frontend connects over
//!
//! Text frames carry one JSON message each. Binary and control frames are
//! ignored; a close frame or a transport error ends the stream.

use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use crate::error::BridgeError;
use crate::protocol::Message;

/// Split `ws` into a stream of decoded messages and a sink that encodes them
pub fn websocket_transport<S>(
    ws: WebSocketStream<S>,
) -> (
    impl Stream<Item = Message> + Send + Unpin,
    impl Sink<Message, Error = BridgeError> + Send + Unpin,
)
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let (sink, stream) = ws.split();

    let stream = stream
        .take_while(|frame| {
            let open = match frame {
                Ok(WsMessage::Close(_)) => {
                    tracing::info!("[ClientTransport] Client closed the connection");
                    false
                }
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!("[ClientTransport] WebSocket error: {}", e);
                    false
                }
            };
            future::ready(open)
        })
        .filter_map(|frame| {
            let message = match frame {
                Ok(WsMessage::Text(text)) => match Message::from_json(&text) {
                    Ok(message) => Some(message),
                    Err(e) => {
                        tracing::warn!("[ClientTransport] Dropping malformed frame: {}", e);
                        None
                    }
                },
                _ => None,
            };
            future::ready(message)
        });

    let sink = sink.with(|message: Message| {
        future::ready(
            message
                .to_json()
                .map(WsMessage::Text)
                .map_err(BridgeError::from),
        )
    });

    (stream, sink)
}
