//! Relay wire messages (NIP-01 JSON arrays).

use serde_json::{Value, json};

use crate::error::{NostrError, Result};
use crate::event::Event;
use crate::filter::Filter;

/// Client → relay.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Event(Event),
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },
    Close(String),
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String> {
        let value = match self {
            ClientMessage::Event(ev) => json!(["EVENT", ev]),
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut arr = vec![json!("REQ"), json!(subscription_id)];
                for f in filters {
                    arr.push(serde_json::to_value(f)?);
                }
                Value::Array(arr)
            }
            ClientMessage::Close(id) => json!(["CLOSE", id]),
        };
        Ok(value.to_string())
    }
}

/// Relay → client.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Event {
        subscription_id: String,
        event: Event,
    },
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    EndOfStoredEvents(String),
    Closed {
        subscription_id: String,
        message: String,
    },
    Notice(String),
    Auth(String),
}

impl RelayMessage {
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let arr = value
            .as_array()
            .ok_or_else(|| NostrError::Protocol("expected a JSON array".to_string()))?;
        let label = arr
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| NostrError::Protocol("missing message label".to_string()))?;

        let str_at = |i: usize| -> Result<String> {
            arr.get(i)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| NostrError::Protocol(format!("{label}: missing string at {i}")))
        };
        // Optional trailing message: relays sometimes omit it.
        let opt_str_at = |i: usize| -> String {
            arr.get(i).and_then(Value::as_str).unwrap_or_default().to_string()
        };

        match label {
            "EVENT" => {
                let subscription_id = str_at(1)?;
                let raw = arr
                    .get(2)
                    .cloned()
                    .ok_or_else(|| NostrError::Protocol("EVENT: missing event".to_string()))?;
                let event: Event = serde_json::from_value(raw)?;
                Ok(RelayMessage::Event {
                    subscription_id,
                    event,
                })
            }
            "OK" => {
                let event_id = str_at(1)?;
                let accepted = arr
                    .get(2)
                    .and_then(Value::as_bool)
                    .ok_or_else(|| NostrError::Protocol("OK: missing status".to_string()))?;
                Ok(RelayMessage::Ok {
                    event_id,
                    accepted,
                    message: opt_str_at(3),
                })
            }
            "EOSE" => Ok(RelayMessage::EndOfStoredEvents(str_at(1)?)),
            "CLOSED" => Ok(RelayMessage::Closed {
                subscription_id: str_at(1)?,
                message: opt_str_at(2),
            }),
            "NOTICE" => Ok(RelayMessage::Notice(str_at(1)?)),
            "AUTH" => Ok(RelayMessage::Auth(str_at(1)?)),
            other => Err(NostrError::Protocol(format!("unknown label {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventBuilder, Kind};
    use crate::keys::Keys;

    #[test]
    fn req_encodes_all_filters() {
        let msg = ClientMessage::Req {
            subscription_id: "sub1".to_string(),
            filters: vec![
                Filter::new().kinds([Kind::TEXT_NOTE]),
                Filter::new().limit(5),
            ],
        };
        assert_eq!(msg.to_json().unwrap(), r#"["REQ","sub1",{"kinds":[1]},{"limit":5}]"#);
        assert_eq!(
            ClientMessage::Close("sub1".to_string()).to_json().unwrap(),
            r#"["CLOSE","sub1"]"#
        );
    }

    #[test]
    fn event_message_embeds_event_object() {
        let keys = Keys::generate();
        let ev = EventBuilder::text_note("hi").sign(&keys).unwrap();
        let json: Value = serde_json::from_str(&ClientMessage::Event(ev.clone()).to_json().unwrap()).unwrap();
        assert_eq!(json[0], "EVENT");
        assert_eq!(json[1]["id"], ev.id.as_str());
    }

    #[test]
    fn parses_relay_messages() {
        let keys = Keys::generate();
        let ev = EventBuilder::text_note("hi").sign(&keys).unwrap();
        let text = json!(["EVENT", "s", ev]).to_string();
        assert_eq!(
            RelayMessage::parse(&text).unwrap(),
            RelayMessage::Event {
                subscription_id: "s".to_string(),
                event: ev
            }
        );

        assert_eq!(
            RelayMessage::parse(r#"["OK","abc",false,"blocked: spam"]"#).unwrap(),
            RelayMessage::Ok {
                event_id: "abc".to_string(),
                accepted: false,
                message: "blocked: spam".to_string()
            }
        );
        assert_eq!(
            RelayMessage::parse(r#"["OK","abc",true]"#).unwrap(),
            RelayMessage::Ok {
                event_id: "abc".to_string(),
                accepted: true,
                message: String::new()
            }
        );
        assert_eq!(
            RelayMessage::parse(r#"["EOSE","s"]"#).unwrap(),
            RelayMessage::EndOfStoredEvents("s".to_string())
        );
        assert_eq!(
            RelayMessage::parse(r#"["CLOSED","s","error: shutting down"]"#).unwrap(),
            RelayMessage::Closed {
                subscription_id: "s".to_string(),
                message: "error: shutting down".to_string()
            }
        );
        assert_eq!(
            RelayMessage::parse(r#"["NOTICE","slow down"]"#).unwrap(),
            RelayMessage::Notice("slow down".to_string())
        );
        assert_eq!(
            RelayMessage::parse(r#"["AUTH","challenge"]"#).unwrap(),
            RelayMessage::Auth("challenge".to_string())
        );
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(matches!(RelayMessage::parse("{}"), Err(NostrError::Protocol(_))));
        assert!(matches!(RelayMessage::parse("[]"), Err(NostrError::Protocol(_))));
        assert!(matches!(RelayMessage::parse(r#"["WHAT"]"#), Err(NostrError::Protocol(_))));
        assert!(matches!(RelayMessage::parse(r#"["EOSE"]"#), Err(NostrError::Protocol(_))));
        assert!(matches!(RelayMessage::parse("not json"), Err(NostrError::Json(_))));
    }
}
