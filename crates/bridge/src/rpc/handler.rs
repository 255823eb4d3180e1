//! Inbound envelope demultiplexer

use plist::{Dictionary, Value as Plist};
use serde_json::Value;
use std::sync::Arc;

use super::keys::*;
use super::{target_type_from_wir, RpcApplication, RpcEvent, RpcMode, RpcPage, SetupInfo};
use crate::protocol::Message;

/// Longest payload excerpt written to the log
const DUMP_LIMIT: usize = 256;

pub struct RpcMessageHandler {
    mode: Arc<RpcMode>,
}

impl RpcMessageHandler {
    pub fn new(mode: Arc<RpcMode>) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> &Arc<RpcMode> {
        &self.mode
    }

    /// Decode one envelope. `None` when it carries nothing for us or cannot
    /// be understood; never fails.
    pub fn handle_message(&self, envelope: &Plist) -> Option<RpcEvent> {
        let Some(dict) = envelope.as_dictionary() else {
            tracing::warn!("[RpcMessageHandler] Envelope is not a dictionary");
            return None;
        };
        let selector = dict.get(SELECTOR).and_then(Plist::as_string)?;
        let empty = Dictionary::new();
        let argument = dict
            .get(ARGUMENT)
            .and_then(Plist::as_dictionary)
            .unwrap_or(&empty);

        match selector {
            "_rpc_reportSetup:" => Some(RpcEvent::Setup(SetupInfo {
                simulator_name: string(argument, SIMULATOR_NAME),
                simulator_build: string(argument, SIMULATOR_BUILD),
                simulator_version: string(argument, SIMULATOR_VERSION),
            })),
            "_rpc_reportConnectedApplicationList:" => {
                let mut apps: Vec<RpcApplication> = argument
                    .get(APPLICATION_DICTIONARY)
                    .and_then(Plist::as_dictionary)
                    .map(|apps| {
                        apps.values()
                            .filter_map(Plist::as_dictionary)
                            .filter_map(parse_application)
                            .collect()
                    })
                    .unwrap_or_default();
                apps.sort_by(|a, b| a.id.cmp(&b.id));
                Some(RpcEvent::ApplicationList(apps))
            }
            "_rpc_applicationConnected:" => {
                parse_application(argument).map(RpcEvent::ApplicationConnected)
            }
            "_rpc_applicationUpdated:" => {
                parse_application(argument).map(RpcEvent::ApplicationUpdated)
            }
            "_rpc_applicationDisconnected:" => {
                parse_application(argument).map(RpcEvent::ApplicationDisconnected)
            }
            "_rpc_applicationSentListing:" => {
                let app_id = string(argument, APPLICATION_ID)?;
                let mut pages: Vec<RpcPage> = argument
                    .get(LISTING)
                    .and_then(Plist::as_dictionary)
                    .map(|listing| {
                        listing
                            .values()
                            .filter_map(Plist::as_dictionary)
                            .filter_map(parse_page)
                            .collect()
                    })
                    .unwrap_or_default();
                pages.sort_by_key(|page| page.page_id);
                Some(RpcEvent::Listing { app_id, pages })
            }
            "_rpc_applicationSentData:" => self.handle_data(argument),
            "_rpc_reportConnectedDriverList:" | "_rpc_reportCurrentState:" => {
                tracing::debug!("[RpcMessageHandler] Ignoring {}", selector);
                None
            }
            other => {
                tracing::debug!("[RpcMessageHandler] Unhandled selector {}", other);
                None
            }
        }
    }

    fn handle_data(&self, argument: &Dictionary) -> Option<RpcEvent> {
        let app_id = string(argument, APPLICATION_ID).unwrap_or_default();
        let sender_id = string(argument, DESTINATION).unwrap_or_default();

        let payload = match argument.get(MESSAGE_DATA) {
            Some(Plist::Data(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
            Some(Plist::String(text)) => text.clone(),
            _ => {
                tracing::warn!("[RpcMessageHandler] Data envelope without payload");
                return None;
            }
        };

        let json: Value = match serde_json::from_str(&payload) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(
                    "[RpcMessageHandler] Dropping unparsable payload ({}): {}",
                    e,
                    truncated(&payload)
                );
                return None;
            }
        };

        let params = json.get("params");
        let param = |name: &str| {
            params
                .and_then(|p| p.get(name))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let method = json
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string);
        match method.as_deref() {
            Some("Target.targetCreated") => {
                if self.mode.observe_target_created() {
                    tracing::info!("[RpcMessageHandler] Device is target-based");
                }
                let info = params.and_then(|p| p.get("targetInfo"));
                let target_id = info
                    .and_then(|i| i.get("targetId"))
                    .and_then(Value::as_str)?
                    .to_string();
                let provisional = info
                    .and_then(|i| i.get("isProvisional"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Some(RpcEvent::TargetCreated {
                    app_id,
                    sender_id,
                    target_id,
                    provisional,
                })
            }
            Some("Target.didCommitProvisionalTarget") => Some(RpcEvent::TargetCommitted {
                new_target_id: param("newTargetId")?,
                old_target_id: param("oldTargetId"),
                app_id,
                sender_id,
            }),
            Some("Target.targetDestroyed") => Some(RpcEvent::TargetDestroyed {
                target_id: param("targetId")?,
                app_id,
                sender_id,
            }),
            Some("Target.dispatchMessageFromTarget") if self.mode.is_target_based() => {
                let inner = param("message")?;
                let message = parse_message(&inner)?;
                Some(RpcEvent::Data {
                    app_id,
                    sender_id,
                    message,
                })
            }
            _ if self.mode.is_target_based() => {
                // Acks of our own Target.sendMessageToTarget calls
                tracing::trace!("[RpcMessageHandler] Discarding target envelope traffic");
                None
            }
            _ => {
                let message = match Message::from_value(json) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(
                            "[RpcMessageHandler] Dropping malformed message ({}): {}",
                            e,
                            truncated(&payload)
                        );
                        return None;
                    }
                };
                Some(RpcEvent::Data {
                    app_id,
                    sender_id,
                    message,
                })
            }
        }
    }
}

fn parse_message(text: &str) -> Option<Message> {
    match Message::from_json(text) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::warn!(
                "[RpcMessageHandler] Dropping unparsable target message ({}): {}",
                e,
                truncated(text)
            );
            None
        }
    }
}

fn truncated(text: &str) -> String {
    if text.chars().count() <= DUMP_LIMIT {
        return text.to_string();
    }
    let head: String = text.chars().take(DUMP_LIMIT).collect();
    format!("{}...", head)
}

fn string(dict: &Dictionary, key: &str) -> Option<String> {
    dict.get(key).and_then(Plist::as_string).map(str::to_string)
}

/// Booleans arrive as either plist booleans or integers
fn flag(dict: &Dictionary, key: &str) -> bool {
    match dict.get(key) {
        Some(Plist::Boolean(value)) => *value,
        Some(value) => value
            .as_unsigned_integer()
            .map(|n| n != 0)
            .or_else(|| value.as_signed_integer().map(|n| n != 0))
            .unwrap_or(false),
        None => false,
    }
}

fn parse_application(dict: &Dictionary) -> Option<RpcApplication> {
    let id = string(dict, APPLICATION_ID)?;
    let bundle_id = string(dict, BUNDLE_ID).unwrap_or_default();
    Some(RpcApplication {
        name: string(dict, APPLICATION_NAME).unwrap_or_else(|| bundle_id.clone()),
        host_id: string(dict, HOST_APPLICATION_ID),
        is_proxy: flag(dict, IS_PROXY),
        is_active: flag(dict, IS_ACTIVE),
        is_ready: flag(dict, IS_READY),
        bundle_id,
        id,
    })
}

fn parse_page(dict: &Dictionary) -> Option<RpcPage> {
    let page_id = dict.get(PAGE_ID).and_then(Plist::as_unsigned_integer)?;
    Some(RpcPage {
        page_id,
        title: string(dict, TITLE).unwrap_or_default(),
        url: string(dict, URL).unwrap_or_default(),
        page_type: string(dict, TYPE)
            .map(|wir| target_type_from_wir(&wir))
            .unwrap_or(discovery::TargetType::Web),
        connection_id: string(dict, CONNECTION_ID),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(selector: &str, argument: Dictionary) -> Plist {
        let mut dict = Dictionary::new();
        dict.insert(SELECTOR.to_string(), Plist::String(selector.to_string()));
        dict.insert(ARGUMENT.to_string(), Plist::Dictionary(argument));
        Plist::Dictionary(dict)
    }

    fn data_envelope(payload: &str) -> Plist {
        let mut argument = Dictionary::new();
        argument.insert(APPLICATION_ID.to_string(), Plist::String("PID:42".to_string()));
        argument.insert(DESTINATION.to_string(), Plist::String("sender-1".to_string()));
        argument.insert(MESSAGE_DATA.to_string(), Plist::Data(payload.as_bytes().to_vec()));
        envelope("_rpc_applicationSentData:", argument)
    }

    fn app_dict(id: &str, active: u64) -> Dictionary {
        let mut app = Dictionary::new();
        app.insert(APPLICATION_ID.to_string(), Plist::String(id.to_string()));
        app.insert(BUNDLE_ID.to_string(), Plist::String("com.apple.mobilesafari".to_string()));
        app.insert(APPLICATION_NAME.to_string(), Plist::String("Safari".to_string()));
        app.insert(IS_ACTIVE.to_string(), Plist::Integer(active.into()));
        app.insert(IS_PROXY.to_string(), Plist::Boolean(false));
        app
    }

    fn handler(forced: Option<bool>) -> RpcMessageHandler {
        RpcMessageHandler::new(Arc::new(RpcMode::new(forced)))
    }

    #[test]
    fn test_application_list() {
        let mut apps = Dictionary::new();
        apps.insert("PID:2".to_string(), Plist::Dictionary(app_dict("PID:2", 0)));
        apps.insert("PID:1".to_string(), Plist::Dictionary(app_dict("PID:1", 1)));
        let mut argument = Dictionary::new();
        argument.insert(APPLICATION_DICTIONARY.to_string(), Plist::Dictionary(apps));

        match handler(None).handle_message(&envelope("_rpc_reportConnectedApplicationList:", argument)) {
            Some(RpcEvent::ApplicationList(apps)) => {
                assert_eq!(apps.len(), 2);
                assert_eq!(apps[0].id, "PID:1");
                assert!(apps[0].is_active);
                assert!(!apps[1].is_active);
                assert_eq!(apps[0].name, "Safari");
            }
            other => panic!("Expected application list, got {:?}", other),
        }
    }

    #[test]
    fn test_listing() {
        let mut page = Dictionary::new();
        page.insert(PAGE_ID.to_string(), Plist::Integer(3u64.into()));
        page.insert(TITLE.to_string(), Plist::String("Example".to_string()));
        page.insert(URL.to_string(), Plist::String("https://example.com".to_string()));
        page.insert(TYPE.to_string(), Plist::String("WIRTypeWebPage".to_string()));
        let mut listing = Dictionary::new();
        listing.insert("3".to_string(), Plist::Dictionary(page));
        let mut argument = Dictionary::new();
        argument.insert(APPLICATION_ID.to_string(), Plist::String("PID:1".to_string()));
        argument.insert(LISTING.to_string(), Plist::Dictionary(listing));

        match handler(None).handle_message(&envelope("_rpc_applicationSentListing:", argument)) {
            Some(RpcEvent::Listing { app_id, pages }) => {
                assert_eq!(app_id, "PID:1");
                assert_eq!(pages[0].page_id, 3);
                assert_eq!(pages[0].page_type, discovery::TargetType::Page);
                assert_eq!(pages[0].connection_id, None);
            }
            other => panic!("Expected listing, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_data_is_the_message() {
        let event = handler(None).handle_message(&data_envelope(
            r#"{"method":"Page.loadEventFired","params":{"timestamp":1}}"#,
        ));
        match event {
            Some(RpcEvent::Data { app_id, sender_id, message }) => {
                assert_eq!(app_id, "PID:42");
                assert_eq!(sender_id, "sender-1");
                assert_eq!(message.method(), Some("Page.loadEventFired"));
            }
            other => panic!("Expected data, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_payload_emits_nothing() {
        let handler = handler(None);
        assert_eq!(handler.handle_message(&data_envelope("{not json")), None);
        assert_eq!(handler.handle_message(&data_envelope(r#"{"params":{}}"#)), None);
        assert_eq!(handler.handle_message(&Plist::String("junk".to_string())), None);
    }

    #[test]
    fn test_target_created_switches_mode() {
        let handler = handler(None);
        let created = json!({"method": "Target.targetCreated",
            "params": {"targetInfo": {"targetId": "page-1", "type": "page"}}});
        match handler.handle_message(&data_envelope(&created.to_string())) {
            Some(RpcEvent::TargetCreated { target_id, provisional, .. }) => {
                assert_eq!(target_id, "page-1");
                assert!(!provisional);
            }
            other => panic!("Expected target created, got {:?}", other),
        }
        assert!(handler.mode().is_target_based());

        // Only dispatched messages carry traffic now
        let ack = json!({"id": 1, "result": {}});
        assert_eq!(handler.handle_message(&data_envelope(&ack.to_string())), None);

        let inner = json!({"id": 7, "result": {"ok": true}}).to_string();
        let wrapped = json!({"method": "Target.dispatchMessageFromTarget",
            "params": {"targetId": "page-1", "message": inner}});
        match handler.handle_message(&data_envelope(&wrapped.to_string())) {
            Some(RpcEvent::Data { message, .. }) => assert_eq!(message.id(), Some(7)),
            other => panic!("Expected data, got {:?}", other),
        }

        let broken = json!({"method": "Target.dispatchMessageFromTarget",
            "params": {"targetId": "page-1", "message": "{oops"}});
        assert_eq!(handler.handle_message(&data_envelope(&broken.to_string())), None);
    }

    #[test]
    fn test_provisional_commit_and_destroy() {
        let handler = handler(Some(true));
        let commit = json!({"method": "Target.didCommitProvisionalTarget",
            "params": {"oldTargetId": "page-1", "newTargetId": "page-2"}});
        assert!(matches!(
            handler.handle_message(&data_envelope(&commit.to_string())),
            Some(RpcEvent::TargetCommitted { ref new_target_id, .. }) if new_target_id == "page-2"
        ));

        let destroyed = json!({"method": "Target.targetDestroyed", "params": {"targetId": "page-2"}});
        assert!(matches!(
            handler.handle_message(&data_envelope(&destroyed.to_string())),
            Some(RpcEvent::TargetDestroyed { ref target_id, .. }) if target_id == "page-2"
        ));
    }

    #[test]
    fn test_ignored_selectors() {
        assert_eq!(
            handler(None).handle_message(&envelope("_rpc_reportCurrentState:", Dictionary::new())),
            None
        );
    }

    #[test]
    fn test_truncated_dump() {
        let long = "x".repeat(500);
        assert_eq!(truncated(&long).len(), DUMP_LIMIT + 3);
        assert_eq!(truncated("short"), "short");
    }
}
