use serde_json::{json, Value};

use crate::common::{DeviceRecord, RegistrySnapshot, SimResult, SimulationError};
use crate::domains::topic_name;

#[derive(Debug, Clone, PartialEq)]
pub struct TopicMessage {
    pub topic: String,
    pub payload: String,
}

impl TopicMessage {
    fn new(topic: String, payload: impl Into<String>) -> Self {
        Self {
            topic,
            payload: payload.into(),
        }
    }
}

/// `{base}/devices/{topic-safe name}`
pub fn device_root(base_topic: &str, device_name: &str) -> String {
    format!(
        "{}/devices/{}",
        base_topic.trim_end_matches('/'),
        topic_name(device_name)
    )
}

/// MAC addresses of every other device in the snapshot.
fn peer_macs<'a>(snapshot: &'a RegistrySnapshot, device: &DeviceRecord) -> Vec<&'a str> {
    snapshot
        .devices
        .iter()
        .filter(|d| d.mac_address != device.mac_address)
        .map(|d| d.mac_address.as_str())
        .collect()
}

/// The full `dev/json` document of one device.
pub fn device_document(snapshot: &RegistrySnapshot, device: &DeviceRecord) -> Value {
    let peers = peer_macs(snapshot, device);

    let mut dev = json!({
        "position": device.position,
        "randomizer": device.randomizer,
        "created_at": device.created_at.to_rfc3339(),
        "updated_at": device.updated_at.to_rfc3339(),
    });
    if let Some(target) = device.target_point {
        dev["target_point"] = json!(target);
    }

    let mut document = json!({
        "mac_address": device.mac_address,
        "name": device.name,
        "type": device.kind,
        "cluster": {
            "name": device.cluster_name,
            "devices": peers,
        },
        "dev": dev,
    });
    if device.is_tag() {
        document["uwb"] = json!({ "ranging": snapshot.ranging_for(&device.name) });
    }
    document
}

/// Every message describing one device in the given tick.
pub fn device_messages(
    base_topic: &str,
    snapshot: &RegistrySnapshot,
    device: &DeviceRecord,
) -> SimResult<Vec<TopicMessage>> {
    let root = device_root(base_topic, &device.name);
    let topic = |suffix: &str| format!("{}/{}", root, suffix);
    let encode = |value: &Value| {
        serde_json::to_string(value)
            .map_err(|e| SimulationError::Transport(format!("Failed to encode payload: {}", e)))
    };

    let peers = peer_macs(snapshot, device);

    let mut messages = vec![
        TopicMessage::new(topic("name"), device.name.as_str()),
        TopicMessage::new(topic("type"), device.kind.as_str()),
        TopicMessage::new(topic("mac_address"), device.mac_address.as_str()),
        TopicMessage::new(topic("dev/position/x"), device.position.x.to_string()),
        TopicMessage::new(topic("dev/position/y"), device.position.y.to_string()),
        TopicMessage::new(topic("dev/randomizer"), device.randomizer.to_string()),
        TopicMessage::new(topic("dev/created_at"), device.created_at.to_rfc3339()),
        TopicMessage::new(topic("dev/updated_at"), device.updated_at.to_rfc3339()),
        TopicMessage::new(
            topic("uwb/cluster/name"),
            device.cluster_name.as_deref().unwrap_or("None"),
        ),
        TopicMessage::new(topic("uwb/cluster/stations"), encode(&json!(peers))?),
    ];

    if device.is_tag() {
        if let Some(target) = device.target_point {
            messages.push(TopicMessage::new(topic("dev/target_point/x"), target.x.to_string()));
            messages.push(TopicMessage::new(topic("dev/target_point/y"), target.y.to_string()));
        }
        let ranging = json!(snapshot.ranging_for(&device.name));
        messages.push(TopicMessage::new(topic("uwb/ranging"), encode(&ranging)?));
    }

    messages.push(TopicMessage::new(
        topic("dev/json"),
        encode(&device_document(snapshot, device))?,
    ));
    Ok(messages)
}

/// Messages for every device of a snapshot, devices in name order.
pub fn snapshot_messages(base_topic: &str, snapshot: &RegistrySnapshot) -> SimResult<Vec<TopicMessage>> {
    let mut messages = Vec::new();
    for device in &snapshot.devices {
        messages.extend(device_messages(base_topic, snapshot, device)?);
    }
    Ok(messages)
}
