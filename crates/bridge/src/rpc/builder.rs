//! Outbound envelope construction

use plist::{Dictionary, Value as Plist};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::keys::*;
use super::{RpcCommand, RpcMode};
use crate::error::Result;

pub struct RpcMessageBuilder {
    connection_id: String,
    mode: Arc<RpcMode>,
    /// Ids for our `Target.sendMessageToTarget` wrappers
    next_wrapper_id: AtomicU64,
}

impl RpcMessageBuilder {
    pub fn new(connection_id: impl Into<String>, mode: Arc<RpcMode>) -> Self {
        Self {
            connection_id: connection_id.into(),
            mode,
            next_wrapper_id: AtomicU64::new(1),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn build(&self, command: RpcCommand) -> Result<Dictionary> {
        let mut argument = Dictionary::new();
        argument.insert(
            CONNECTION_ID.to_string(),
            Plist::String(self.connection_id.clone()),
        );

        let selector = match command {
            RpcCommand::ReportIdentifier => "_rpc_reportIdentifier:",
            RpcCommand::GetConnectedApplications => "_rpc_getConnectedApplications:",
            RpcCommand::ForwardGetListing { app_id } => {
                insert_str(&mut argument, APPLICATION_ID, app_id);
                "_rpc_forwardGetListing:"
            }
            RpcCommand::ForwardSocketSetup {
                app_id,
                page_id,
                sender_id,
            } => {
                insert_page(&mut argument, app_id, page_id);
                insert_str(&mut argument, SENDER, sender_id);
                argument.insert(AUTOMATICALLY_PAUSE.to_string(), Plist::Boolean(false));
                "_rpc_forwardSocketSetup:"
            }
            RpcCommand::ForwardSocketData {
                app_id,
                page_id,
                sender_id,
                target_id,
                message,
            } => {
                let mut payload = message.to_json()?;
                if self.mode.is_target_based() {
                    // Without a target id the device drops the wrapper
                    let target_id = target_id.unwrap_or_default();
                    let id = self.next_wrapper_id.fetch_add(1, Ordering::SeqCst);
                    payload = json!({
                        "id": id,
                        "method": "Target.sendMessageToTarget",
                        "params": { "targetId": target_id, "message": payload },
                    })
                    .to_string();
                }
                insert_page(&mut argument, app_id, page_id);
                insert_str(&mut argument, SENDER, sender_id);
                argument.insert(SOCKET_DATA.to_string(), Plist::Data(payload.into_bytes()));
                "_rpc_forwardSocketData:"
            }
            RpcCommand::ForwardDidClose {
                app_id,
                page_id,
                sender_id,
            } => {
                insert_page(&mut argument, app_id, page_id);
                insert_str(&mut argument, SENDER, sender_id);
                "_rpc_forwardDidClose:"
            }
            RpcCommand::ForwardIndicateWebView {
                app_id,
                page_id,
                enabled,
            } => {
                insert_page(&mut argument, app_id, page_id);
                argument.insert(INDICATE_ENABLED.to_string(), Plist::Boolean(enabled));
                "_rpc_forwardIndicateWebView:"
            }
        };

        let mut envelope = Dictionary::new();
        envelope.insert(SELECTOR.to_string(), Plist::String(selector.to_string()));
        envelope.insert(ARGUMENT.to_string(), Plist::Dictionary(argument));
        Ok(envelope)
    }
}

fn insert_str(dict: &mut Dictionary, key: &str, value: String) {
    dict.insert(key.to_string(), Plist::String(value));
}

fn insert_page(dict: &mut Dictionary, app_id: String, page_id: u64) {
    insert_str(dict, APPLICATION_ID, app_id);
    dict.insert(PAGE_ID.to_string(), Plist::Integer(page_id.into()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Message;
    use serde_json::Value;

    fn argument(envelope: &Dictionary) -> &Dictionary {
        envelope
            .get(ARGUMENT)
            .and_then(Plist::as_dictionary)
            .unwrap()
    }

    fn socket_json(envelope: &Dictionary) -> Value {
        let bytes = argument(envelope)
            .get(SOCKET_DATA)
            .and_then(Plist::as_data)
            .unwrap();
        serde_json::from_slice(bytes).unwrap()
    }

    fn data_command(target_id: Option<&str>) -> RpcCommand {
        RpcCommand::ForwardSocketData {
            app_id: "PID:1".to_string(),
            page_id: 2,
            sender_id: "sender".to_string(),
            target_id: target_id.map(str::to_string),
            message: Message::request(5, "Page.reload", None),
        }
    }

    #[test]
    fn test_identifier_envelope() {
        let builder = RpcMessageBuilder::new("conn", Arc::new(RpcMode::new(None)));
        let envelope = builder.build(RpcCommand::ReportIdentifier).unwrap();
        assert_eq!(
            envelope.get(SELECTOR).and_then(Plist::as_string),
            Some("_rpc_reportIdentifier:")
        );
        assert_eq!(
            argument(&envelope).get(CONNECTION_ID).and_then(Plist::as_string),
            Some("conn")
        );
    }

    #[test]
    fn test_socket_data_flat() {
        let builder = RpcMessageBuilder::new("conn", Arc::new(RpcMode::new(Some(false))));
        let envelope = builder.build(data_command(None)).unwrap();
        assert_eq!(
            socket_json(&envelope),
            json!({"id": 5, "method": "Page.reload"})
        );
        assert_eq!(
            argument(&envelope).get(PAGE_ID).and_then(Plist::as_unsigned_integer),
            Some(2)
        );
    }

    #[test]
    fn test_socket_data_wrapped_when_target_based() {
        let builder = RpcMessageBuilder::new("conn", Arc::new(RpcMode::new(Some(true))));
        let envelope = builder.build(data_command(Some("page-9"))).unwrap();

        let wrapper = socket_json(&envelope);
        assert_eq!(wrapper["method"], "Target.sendMessageToTarget");
        assert_eq!(wrapper["params"]["targetId"], "page-9");
        let inner: Value =
            serde_json::from_str(wrapper["params"]["message"].as_str().unwrap()).unwrap();
        assert_eq!(inner, json!({"id": 5, "method": "Page.reload"}));
    }

    #[test]
    fn test_socket_setup_and_indicate() {
        let builder = RpcMessageBuilder::new("conn", Arc::new(RpcMode::new(None)));
        let setup = builder
            .build(RpcCommand::ForwardSocketSetup {
                app_id: "PID:1".to_string(),
                page_id: 4,
                sender_id: "s".to_string(),
            })
            .unwrap();
        assert_eq!(
            argument(&setup).get(AUTOMATICALLY_PAUSE).and_then(Plist::as_boolean),
            Some(false)
        );

        let indicate = builder
            .build(RpcCommand::ForwardIndicateWebView {
                app_id: "PID:1".to_string(),
                page_id: 4,
                enabled: true,
            })
            .unwrap();
        assert_eq!(
            argument(&indicate).get(INDICATE_ENABLED).and_then(Plist::as_boolean),
            Some(true)
        );
    }
}
