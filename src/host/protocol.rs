use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    ai::ProxyRequest,
    db::settings::StorageArea,
    domain::{GroupId, LabelColor, ProviderKind, TabGroup, TabId, TabSnapshot, TabStatus, WindowId},
    labels::SortDirection,
    platform::GroupMutation,
};

/// One line received from the extension.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum HostMessage {
    TabUpdated {
        tab: TabSnapshot,
        #[serde(default)]
        status: Option<TabStatus>,
    },
    TabRemoved {
        tab_id: TabId,
    },
    GroupUpdated {
        group: TabGroup,
    },
    GroupRemoved {
        group_id: GroupId,
    },
    RegroupWindow {
        window_id: WindowId,
    },
    ApplyProxy(ProxyRequest),
    ClearProxy,
    SetSettings {
        area: StorageArea,
        patch: Map<String, Value>,
    },
    DeleteLabel {
        label_id: String,
    },
    RenameLabel {
        label_id: String,
        name: String,
    },
    RecolorLabel {
        label_id: String,
        color: LabelColor,
    },
    SortLabels {
        direction: SortDirection,
    },
    MoveLabel {
        from: String,
        to: String,
    },
    UpsertRule {
        domain: String,
        label_id: String,
    },
    DeleteRule {
        domain: String,
    },
    ClearRules,
    ListModels {
        #[serde(default)]
        provider: Option<ProviderKind>,
        #[serde(default)]
        api_key: Option<String>,
    },
    Ungroup {
        #[serde(default)]
        window_id: Option<WindowId>,
    },
    Dedupe {
        #[serde(default)]
        window_id: Option<WindowId>,
    },
    ReadLogs,
    ClearLogs,
}

impl HostMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            HostMessage::TabUpdated { .. } => "TAB_UPDATED",
            HostMessage::TabRemoved { .. } => "TAB_REMOVED",
            HostMessage::GroupUpdated { .. } => "GROUP_UPDATED",
            HostMessage::GroupRemoved { .. } => "GROUP_REMOVED",
            HostMessage::RegroupWindow { .. } => "REGROUP_WINDOW",
            HostMessage::ApplyProxy(_) => "APPLY_PROXY",
            HostMessage::ClearProxy => "CLEAR_PROXY",
            HostMessage::SetSettings { .. } => "SET_SETTINGS",
            HostMessage::DeleteLabel { .. } => "DELETE_LABEL",
            HostMessage::RenameLabel { .. } => "RENAME_LABEL",
            HostMessage::RecolorLabel { .. } => "RECOLOR_LABEL",
            HostMessage::SortLabels { .. } => "SORT_LABELS",
            HostMessage::MoveLabel { .. } => "MOVE_LABEL",
            HostMessage::UpsertRule { .. } => "UPSERT_RULE",
            HostMessage::DeleteRule { .. } => "DELETE_RULE",
            HostMessage::ClearRules => "CLEAR_RULES",
            HostMessage::ListModels { .. } => "LIST_MODELS",
            HostMessage::Ungroup { .. } => "UNGROUP",
            HostMessage::Dedupe { .. } => "DEDUPE",
            HostMessage::ReadLogs => "READ_LOGS",
            HostMessage::ClearLogs => "CLEAR_LOGS",
        }
    }

    /// Commands that wait on a remote provider and must not hold up the
    /// messages behind them.
    pub fn calls_provider(&self) -> bool {
        matches!(self, HostMessage::RegroupWindow { .. } | HostMessage::ListModels { .. })
    }
}

/// Splits a raw line into its correlation id and the decoded message. The id
/// is recovered even when the message itself is malformed.
pub fn parse_line(line: &str) -> (Option<Value>, Result<HostMessage, serde_json::Error>) {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(err) => return (None, Err(err)),
    };
    let id = value.get("id").filter(|id| !id.is_null()).cloned();
    (id, serde_json::from_value(value))
}

pub fn ok_response(id: Option<Value>, fields: Map<String, Value>) -> Value {
    let mut body = fields;
    body.insert("ok".into(), Value::Bool(true));
    if let Some(id) = id {
        body.insert("id".into(), id);
    }
    Value::Object(body)
}

pub fn error_response(id: Option<Value>, error: String) -> Value {
    let mut body = Map::new();
    body.insert("ok".into(), Value::Bool(false));
    body.insert("error".into(), Value::String(error));
    if let Some(id) = id {
        body.insert("id".into(), id);
    }
    Value::Object(body)
}

/// Unsolicited lines sent to the extension.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Notification {
    GroupMutation { mutation: GroupMutation },
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_tagged_messages_with_camel_case_fields() {
        let (id, msg) = parse_line(r#"{"type":"REGROUP_WINDOW","windowId":4,"id":"r1"}"#);
        assert_eq!(id, Some(json!("r1")));
        assert!(matches!(msg.unwrap(), HostMessage::RegroupWindow { window_id: 4 }));

        let (_, msg) = parse_line(
            r#"{"type":"TAB_UPDATED","status":"complete","tab":{"id":1,"windowId":2,"url":"https://a.example","title":"A"}}"#,
        );
        match msg.unwrap() {
            HostMessage::TabUpdated { tab, status } => {
                assert_eq!(tab.window_id, 2);
                assert_eq!(status, Some(TabStatus::Complete));
            }
            other => panic!("unexpected message: {other:?}"),
        }

        let (_, msg) = parse_line(r#"{"type":"APPLY_PROXY","host":"127.0.0.1","port":8080}"#);
        assert!(matches!(msg.unwrap(), HostMessage::ApplyProxy(_)));

        let (_, msg) = parse_line(r#"{"type":"CLEAR_LOGS","id":7}"#);
        assert!(matches!(msg.unwrap(), HostMessage::ClearLogs));

        let (_, msg) = parse_line(
            r#"{"type":"GROUP_UPDATED","group":{"id":500,"windowId":2,"title":"Work","color":"blue"}}"#,
        );
        match msg.unwrap() {
            HostMessage::GroupUpdated { group } => {
                assert_eq!(group.id, 500);
                assert_eq!(group.color, LabelColor::Blue);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn only_provider_bound_commands_are_detached() {
        let (_, regroup) = parse_line(r#"{"type":"REGROUP_WINDOW","windowId":1}"#);
        let (_, models) = parse_line(r#"{"type":"LIST_MODELS"}"#);
        let (_, removed) = parse_line(r#"{"type":"TAB_REMOVED","tabId":1}"#);
        assert!(regroup.unwrap().calls_provider());
        assert!(models.unwrap().calls_provider());
        assert!(!removed.unwrap().calls_provider());
    }

    #[test]
    fn id_survives_unknown_message_type() {
        let (id, msg) = parse_line(r#"{"type":"SELF_DESTRUCT","id":9}"#);
        assert_eq!(id, Some(json!(9)));
        assert!(msg.is_err());

        let (id, msg) = parse_line("not json");
        assert_eq!(id, None);
        assert!(msg.is_err());
    }

    #[test]
    fn responses_echo_id() {
        let mut fields = Map::new();
        fields.insert("grouped".into(), json!(3));
        assert_eq!(
            ok_response(Some(json!("a")), fields),
            json!({ "ok": true, "grouped": 3, "id": "a" })
        );
        assert_eq!(
            error_response(None, "boom".into()),
            json!({ "ok": false, "error": "boom" })
        );
    }

    #[test]
    fn mutation_notification_shape() {
        let line = serde_json::to_value(Notification::GroupMutation {
            mutation: GroupMutation::Ungroup { tab_ids: vec![1, 2] },
        })
        .unwrap();
        assert_eq!(
            line,
            json!({ "type": "GROUP_MUTATION", "mutation": { "op": "ungroup", "tabIds": [1, 2] } })
        );
    }
}
