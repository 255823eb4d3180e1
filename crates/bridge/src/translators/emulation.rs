//! Emulation domain

use async_trait::async_trait;
use serde_json::json;

use super::{answer, client_keys, into_request, renamed, Translator};
use crate::adapter::ProtocolAdapter;
use crate::error::Result;
use crate::filter::{Direction, FilterKey, MessageFilter};
use crate::protocol::Message;

const LOCAL: &[&str] = &[
    "Emulation.setTouchEmulationEnabled",
    "Emulation.setEmitTouchEventsForMouse",
    "Emulation.setDeviceMetricsOverride",
    "Emulation.clearDeviceMetricsOverride",
    "Emulation.setFocusEmulationEnabled",
    "Emulation.setAutoDarkModeOverride",
];

const RENAMED: &[(&str, &str)] = &[
    (
        "Emulation.setScriptExecutionDisabled",
        "Page.setScriptExecutionDisabled",
    ),
    ("Emulation.setEmulatedMedia", "Page.setEmulatedMedia"),
];

pub struct EmulationTranslator;

impl Translator for EmulationTranslator {
    fn keys(&self) -> Vec<FilterKey> {
        client_keys(LOCAL)
            .chain(client_keys(&["Emulation.canEmulate"]))
            .chain(RENAMED.iter().map(|(from, _)| FilterKey::client(*from)))
            .collect()
    }
}

#[async_trait]
impl MessageFilter for EmulationTranslator {
    fn name(&self) -> &str {
        "emulation"
    }

    async fn filter(
        &self,
        adapter: &ProtocolAdapter,
        key: &FilterKey,
        msg: Message,
    ) -> Result<Option<Message>> {
        if key.direction != Direction::FromClient {
            return Ok(Some(msg));
        }
        let method = key.method.as_str();

        if method == "Emulation.canEmulate" {
            let request = into_request(msg)?;
            return Ok(answer(adapter, request.id, json!({ "result": true })));
        }
        if LOCAL.contains(&method) {
            let request = into_request(msg)?;
            return Ok(answer(adapter, request.id, json!({})));
        }
        if let Some((_, to)) = RENAMED.iter().find(|(from, _)| *from == method) {
            return Ok(renamed(into_request(msg)?, to));
        }
        Ok(Some(msg))
    }
}
