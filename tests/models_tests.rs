// Model serialization tests (JSON camelCase, tagged enums, state parsing)

use dockboard::models::*;
use std::collections::HashMap;

fn record() -> ContainerRecord {
    ContainerRecord {
        id: "abc123".into(),
        name: "/web".into(),
        image: "nginx:latest".into(),
        image_id: "sha256:nginx".into(),
        command: "nginx".into(),
        created_at: "2024-01-02T03:04:05Z".parse().unwrap(),
        state: ContainerState::Running,
        ports: vec![PortMapping {
            private_port: 80,
            public_port: Some(8080),
            protocol: "tcp".into(),
        }],
        labels: HashMap::from([("app".to_string(), "web".to_string())]),
        mounts: vec![MountPoint {
            type_: "bind".into(),
            source: "/srv/www".into(),
            destination: "/usr/share/nginx/html".into(),
            read_write: false,
        }],
    }
}

#[test]
fn test_container_state_from_docker() {
    assert_eq!(ContainerState::from_docker("running"), ContainerState::Running);
    assert_eq!(ContainerState::from_docker("Paused"), ContainerState::Paused);
    assert_eq!(ContainerState::from_docker("dead"), ContainerState::Exited);
    assert_eq!(ContainerState::from_docker("removing"), ContainerState::Unknown);
    assert_eq!(ContainerState::Restarting.to_string(), "restarting");
}

#[test]
fn test_container_state_unknown_value_deserializes() {
    let s: ContainerState = serde_json::from_str("\"removing\"").unwrap();
    assert_eq!(s, ContainerState::Unknown);
}

#[test]
fn test_container_view_serialization_camel_case() {
    let view = ContainerView {
        record: record(),
        provenance: Provenance::Optimistic {
            previous: ContainerState::Exited,
        },
        stats: None,
    };
    let json: serde_json::Value = serde_json::to_value(&view).unwrap();
    assert_eq!(json["id"], "abc123");
    assert_eq!(json["imageId"], "sha256:nginx");
    assert_eq!(json["createdAt"], "2024-01-02T03:04:05Z");
    assert_eq!(json["state"], "running");
    assert_eq!(json["ports"][0]["privatePort"], 80);
    assert_eq!(json["ports"][0]["publicPort"], 8080);
    assert_eq!(json["mounts"][0]["type"], "bind");
    assert_eq!(json["mounts"][0]["readWrite"], false);
    assert_eq!(json["provenance"]["kind"], "optimistic");
    assert_eq!(json["provenance"]["previous"], "exited");
    assert!(json.get("stats").is_none());
}

#[test]
fn test_port_without_public_binding_omits_field() {
    let port = PortMapping {
        private_port: 6379,
        public_port: None,
        protocol: "tcp".into(),
    };
    let json = serde_json::to_string(&port).unwrap();
    assert!(!json.contains("publicPort"));
}

#[test]
fn test_container_stats_serialization() {
    let stats = ContainerStats {
        id: "abc123".into(),
        cpu_percentage: 150.5,
        memory_usage_bytes: 1000,
        memory_limit_bytes: 4000,
        memory_percentage: 25.0,
        network_rx_bytes: 1,
        network_tx_bytes: 2,
        block_read_bytes: 3,
        block_write_bytes: 4,
        pids: 10,
    };
    let json = serde_json::to_string(&stats).unwrap();
    assert!(json.contains("\"cpuPercentage\":150.5"));
    assert!(json.contains("\"memoryUsageBytes\""));
    let back: ContainerStats = serde_json::from_str(&json).unwrap();
    assert_eq!(back, stats);
}

#[test]
fn test_image_display_tags() {
    let mut image = ImageRecord {
        id: "sha256:abc".into(),
        repo_tags: vec![],
        created_at: "2024-01-01T00:00:00Z".parse().unwrap(),
        size_bytes: 10,
        arch: "arm64".into(),
        os: "linux".into(),
        labels: HashMap::new(),
        container_count: 0,
    };
    assert_eq!(image.display_tags(), vec![UNTAGGED]);
    image.repo_tags = vec!["app:1".into(), "app:latest".into()];
    assert_eq!(image.display_tags(), vec!["app:1", "app:latest"]);
    assert!(image.is_used_by("app", ""));
    assert!(image.is_used_by("app:1", ""));
    assert!(!image.is_used_by("app:2", ""));
    assert!(image.is_used_by("anything", "sha256:abc"));
}

#[test]
fn test_inventory_event_is_tagged() {
    let event = InventoryEvent::Containers {
        seq: 7,
        changes: ChangeSet {
            added: vec!["2".into()],
            removed: vec![],
            changed: vec![],
        },
    };
    let json: serde_json::Value = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "containers");
    assert_eq!(json["seq"], 7);
    assert_eq!(json["changes"]["added"][0], "2");

    let event = InventoryEvent::Provisional {
        id: "1".into(),
        state: ContainerState::Exited,
        rolled_back: true,
    };
    let json: serde_json::Value = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "provisional");
    assert_eq!(json["rolledBack"], true);
    let back: InventoryEvent = serde_json::from_value(json).unwrap();
    assert_eq!(back, event);
}

#[test]
fn test_log_entry_serialization() {
    let entry = LogEntry {
        timestamp: "2024-01-01T00:00:00.5Z".parse().unwrap(),
        stream: LogStream::Stderr,
        message: "oops".into(),
    };
    let json: serde_json::Value = serde_json::to_value(&entry).unwrap();
    assert_eq!(json["stream"], "stderr");
    assert_eq!(json["message"], "oops");
}
