/*!
 * The device message protocol.
 *
 * A closed, tagged set of request, response and notification shapes that
 * drive a device tree over any transport able to deliver them. Requests
 * carry a mandatory target path; responses and notifications carry a
 * mandatory source path. The wire form is an object tagged by `kind`.
 */
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use propbus_core::types::{DevicePath, Value};

use crate::device::{ActionDescriptor, DeviceError, LifecycleState, PropertyDescriptor};

/// A message exchanged with or emitted by a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DeviceMessage {
    /// Notification that a property value changed. Source is mandatory.
    #[serde(rename = "property.changed", rename_all = "camelCase")]
    PropertyChanged {
        /// The property name
        property: String,
        /// The new value
        value: Value,
        /// The emitting device
        #[serde(default)]
        source_device: DevicePath,
        /// Optional addressee
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_device: Option<DevicePath>,
        /// Free-text comment
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
        /// Message timestamp
        time: DateTime<Utc>,
    },

    /// Request to set or, when the value is absent, invalidate a property.
    /// Target is mandatory.
    #[serde(rename = "property.set", rename_all = "camelCase")]
    PropertySet {
        /// The property name
        property: String,
        /// The value to write; absent means invalidate
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        /// The requesting endpoint
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_device: Option<DevicePath>,
        /// The addressed device
        target_device: DevicePath,
        /// Free-text comment
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
        /// Message timestamp
        time: DateTime<Utc>,
    },

    /// Request to read a property. Target is mandatory; the value comes
    /// back as a [`DeviceMessage::PropertyChanged`].
    #[serde(rename = "property.get", rename_all = "camelCase")]
    PropertyGet {
        /// The property name
        property: String,
        /// The requesting endpoint
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_device: Option<DevicePath>,
        /// The addressed device
        target_device: DevicePath,
        /// Free-text comment
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
        /// Message timestamp
        time: DateTime<Utc>,
    },

    /// Request for a device description, answered by
    /// [`DeviceMessage::Description`]. Target is mandatory.
    #[serde(rename = "description.get", rename_all = "camelCase")]
    GetDescription {
        /// The requesting endpoint
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_device: Option<DevicePath>,
        /// The addressed device
        target_device: DevicePath,
        /// Free-text comment
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
        /// Message timestamp
        time: DateTime<Utc>,
    },

    /// The full device description. Source is mandatory.
    #[serde(rename = "description", rename_all = "camelCase")]
    Description {
        /// Static device configuration
        description: Value,
        /// Property descriptors
        properties: Vec<PropertyDescriptor>,
        /// Action descriptors
        actions: Vec<ActionDescriptor>,
        /// The described device
        #[serde(default)]
        source_device: DevicePath,
        /// Optional addressee
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_device: Option<DevicePath>,
        /// Free-text comment
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
        /// Message timestamp
        time: DateTime<Utc>,
    },

    /// Request to execute an action. Target is mandatory; the request id
    /// is echoed by the matching [`DeviceMessage::ActionResult`].
    #[serde(rename = "action.execute", rename_all = "camelCase")]
    ActionExecute {
        /// The action name
        action: String,
        /// Optional action argument
        #[serde(default, skip_serializing_if = "Option::is_none")]
        argument: Option<Value>,
        /// Correlation id for the result
        request_id: String,
        /// The requesting endpoint
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_device: Option<DevicePath>,
        /// The addressed device
        target_device: DevicePath,
        /// Free-text comment
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
        /// Message timestamp
        time: DateTime<Utc>,
    },

    /// Asynchronous action result. Source is mandatory.
    #[serde(rename = "action.result", rename_all = "camelCase")]
    ActionResult {
        /// The action name
        action: String,
        /// Optional action result
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        /// Correlation id from the request
        request_id: String,
        /// The executing device
        #[serde(default)]
        source_device: DevicePath,
        /// Optional addressee
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_device: Option<DevicePath>,
        /// Free-text comment
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
        /// Message timestamp
        time: DateTime<Utc>,
    },

    /// Notification that a binary with the given id is available out of
    /// band; the binary itself cannot travel in a message.
    #[serde(rename = "binary.notification", rename_all = "camelCase")]
    BinaryNotification {
        /// Identifier of the published binary
        #[serde(rename = "binaryID")]
        binary_id: String,
        /// The emitting device
        #[serde(default)]
        source_device: DevicePath,
        /// Optional addressee
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_device: Option<DevicePath>,
        /// Free-text comment
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
        /// Message timestamp
        time: DateTime<Utc>,
    },

    /// The message was received but produced no meaningful response;
    /// usable as a heartbeat.
    #[serde(rename = "empty", rename_all = "camelCase")]
    Empty {
        /// The answering endpoint
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_device: Option<DevicePath>,
        /// Optional addressee
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_device: Option<DevicePath>,
        /// Free-text comment
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
        /// Message timestamp
        time: DateTime<Utc>,
    },

    /// Informational log record emitted by a device
    #[serde(rename = "log", rename_all = "camelCase")]
    Log {
        /// The log text
        message: String,
        /// Optional structured payload
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        /// The emitting device
        #[serde(default)]
        source_device: DevicePath,
        /// Optional addressee
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_device: Option<DevicePath>,
        /// Free-text comment
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
        /// Message timestamp
        time: DateTime<Utc>,
    },

    /// Evaluation of a message produced a service error
    #[serde(rename = "error", rename_all = "camelCase")]
    Error {
        /// Human-readable error message
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        /// Short error classification
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_type: Option<String>,
        /// Diagnostic trace text
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_stack_trace: Option<String>,
        /// The failing device; empty when the target could not be resolved
        #[serde(default)]
        source_device: DevicePath,
        /// Optional addressee
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_device: Option<DevicePath>,
        /// Free-text comment
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
        /// Message timestamp
        time: DateTime<Utc>,
    },

    /// The device lifecycle state changed
    #[serde(rename = "lifecycle", rename_all = "camelCase")]
    Lifecycle {
        /// The new state
        state: LifecycleState,
        /// The emitting device
        #[serde(default)]
        source_device: DevicePath,
        /// Optional addressee
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_device: Option<DevicePath>,
        /// Free-text comment
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
        /// Message timestamp
        time: DateTime<Utc>,
    },
}

impl DeviceMessage {
    /// The wire kind tag of this message
    pub fn kind(&self) -> &'static str {
        match self {
            DeviceMessage::PropertyChanged { .. } => "property.changed",
            DeviceMessage::PropertySet { .. } => "property.set",
            DeviceMessage::PropertyGet { .. } => "property.get",
            DeviceMessage::GetDescription { .. } => "description.get",
            DeviceMessage::Description { .. } => "description",
            DeviceMessage::ActionExecute { .. } => "action.execute",
            DeviceMessage::ActionResult { .. } => "action.result",
            DeviceMessage::BinaryNotification { .. } => "binary.notification",
            DeviceMessage::Empty { .. } => "empty",
            DeviceMessage::Log { .. } => "log",
            DeviceMessage::Error { .. } => "error",
            DeviceMessage::Lifecycle { .. } => "lifecycle",
        }
    }

    /// Whether this message is a request answered by a dispatcher
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            DeviceMessage::PropertyGet { .. }
                | DeviceMessage::PropertySet { .. }
                | DeviceMessage::ActionExecute { .. }
                | DeviceMessage::GetDescription { .. }
        )
    }

    /// The source path, where present
    pub fn source_device(&self) -> Option<&DevicePath> {
        match self {
            DeviceMessage::PropertyChanged { source_device, .. }
            | DeviceMessage::Description { source_device, .. }
            | DeviceMessage::ActionResult { source_device, .. }
            | DeviceMessage::BinaryNotification { source_device, .. }
            | DeviceMessage::Log { source_device, .. }
            | DeviceMessage::Error { source_device, .. }
            | DeviceMessage::Lifecycle { source_device, .. } => Some(source_device),
            DeviceMessage::PropertySet { source_device, .. }
            | DeviceMessage::PropertyGet { source_device, .. }
            | DeviceMessage::GetDescription { source_device, .. }
            | DeviceMessage::ActionExecute { source_device, .. }
            | DeviceMessage::Empty { source_device, .. } => source_device.as_ref(),
        }
    }

    /// The target path, where present
    pub fn target_device(&self) -> Option<&DevicePath> {
        match self {
            DeviceMessage::PropertySet { target_device, .. }
            | DeviceMessage::PropertyGet { target_device, .. }
            | DeviceMessage::GetDescription { target_device, .. }
            | DeviceMessage::ActionExecute { target_device, .. } => Some(target_device),
            DeviceMessage::PropertyChanged { target_device, .. }
            | DeviceMessage::Description { target_device, .. }
            | DeviceMessage::ActionResult { target_device, .. }
            | DeviceMessage::BinaryNotification { target_device, .. }
            | DeviceMessage::Log { target_device, .. }
            | DeviceMessage::Error { target_device, .. }
            | DeviceMessage::Lifecycle { target_device, .. }
            | DeviceMessage::Empty { target_device, .. } => target_device.as_ref(),
        }
    }

    /// The message timestamp
    pub fn time(&self) -> DateTime<Utc> {
        match self {
            DeviceMessage::PropertyChanged { time, .. }
            | DeviceMessage::PropertySet { time, .. }
            | DeviceMessage::PropertyGet { time, .. }
            | DeviceMessage::GetDescription { time, .. }
            | DeviceMessage::Description { time, .. }
            | DeviceMessage::ActionExecute { time, .. }
            | DeviceMessage::ActionResult { time, .. }
            | DeviceMessage::BinaryNotification { time, .. }
            | DeviceMessage::Empty { time, .. }
            | DeviceMessage::Log { time, .. }
            | DeviceMessage::Error { time, .. }
            | DeviceMessage::Lifecycle { time, .. } => *time,
        }
    }

    /// Rewrite the source path for composition across a hub boundary.
    ///
    /// Mandatory sources are always rewritten; optional sources only when
    /// present.
    pub fn map_source<F>(self, f: F) -> DeviceMessage
    where
        F: FnOnce(DevicePath) -> DevicePath,
    {
        match self {
            DeviceMessage::PropertyChanged {
                property,
                value,
                source_device,
                target_device,
                comment,
                time,
            } => DeviceMessage::PropertyChanged {
                property,
                value,
                source_device: f(source_device),
                target_device,
                comment,
                time,
            },
            DeviceMessage::PropertySet {
                property,
                value,
                source_device,
                target_device,
                comment,
                time,
            } => DeviceMessage::PropertySet {
                property,
                value,
                source_device: source_device.map(f),
                target_device,
                comment,
                time,
            },
            DeviceMessage::PropertyGet {
                property,
                source_device,
                target_device,
                comment,
                time,
            } => DeviceMessage::PropertyGet {
                property,
                source_device: source_device.map(f),
                target_device,
                comment,
                time,
            },
            DeviceMessage::GetDescription {
                source_device,
                target_device,
                comment,
                time,
            } => DeviceMessage::GetDescription {
                source_device: source_device.map(f),
                target_device,
                comment,
                time,
            },
            DeviceMessage::Description {
                description,
                properties,
                actions,
                source_device,
                target_device,
                comment,
                time,
            } => DeviceMessage::Description {
                description,
                properties,
                actions,
                source_device: f(source_device),
                target_device,
                comment,
                time,
            },
            DeviceMessage::ActionExecute {
                action,
                argument,
                request_id,
                source_device,
                target_device,
                comment,
                time,
            } => DeviceMessage::ActionExecute {
                action,
                argument,
                request_id,
                source_device: source_device.map(f),
                target_device,
                comment,
                time,
            },
            DeviceMessage::ActionResult {
                action,
                result,
                request_id,
                source_device,
                target_device,
                comment,
                time,
            } => DeviceMessage::ActionResult {
                action,
                result,
                request_id,
                source_device: f(source_device),
                target_device,
                comment,
                time,
            },
            DeviceMessage::BinaryNotification {
                binary_id,
                source_device,
                target_device,
                comment,
                time,
            } => DeviceMessage::BinaryNotification {
                binary_id,
                source_device: f(source_device),
                target_device,
                comment,
                time,
            },
            DeviceMessage::Empty {
                source_device,
                target_device,
                comment,
                time,
            } => DeviceMessage::Empty {
                source_device: source_device.map(f),
                target_device,
                comment,
                time,
            },
            DeviceMessage::Log {
                message,
                data,
                source_device,
                target_device,
                comment,
                time,
            } => DeviceMessage::Log {
                message,
                data,
                source_device: f(source_device),
                target_device,
                comment,
                time,
            },
            DeviceMessage::Error {
                error_message,
                error_type,
                error_stack_trace,
                source_device,
                target_device,
                comment,
                time,
            } => DeviceMessage::Error {
                error_message,
                error_type,
                error_stack_trace,
                source_device: f(source_device),
                target_device,
                comment,
                time,
            },
            DeviceMessage::Lifecycle {
                state,
                source_device,
                target_device,
                comment,
                time,
            } => DeviceMessage::Lifecycle {
                state,
                source_device: f(source_device),
                target_device,
                comment,
                time,
            },
        }
    }

    /// Prefix the source path with a hub segment on the way out of a hub
    pub fn prefixed_source(self, segment: &str) -> DeviceMessage {
        self.map_source(|path| path.prefixed_with(segment))
    }

    /// Notification that `property` on `source` now holds `value`
    pub fn property_changed<S: Into<String>>(
        property: S,
        value: Value,
        source: DevicePath,
    ) -> DeviceMessage {
        DeviceMessage::PropertyChanged {
            property: property.into(),
            value,
            source_device: source,
            target_device: None,
            comment: None,
            time: Utc::now(),
        }
    }

    /// Lifecycle change notification from `source`
    pub fn lifecycle(state: LifecycleState, source: DevicePath) -> DeviceMessage {
        DeviceMessage::Lifecycle {
            state,
            source_device: source,
            target_device: None,
            comment: None,
            time: Utc::now(),
        }
    }

    /// Log record from `source`
    pub fn log<S: Into<String>>(message: S, data: Option<Value>, source: DevicePath) -> DeviceMessage {
        DeviceMessage::Log {
            message: message.into(),
            data,
            source_device: source,
            target_device: None,
            comment: None,
            time: Utc::now(),
        }
    }

    /// Error message for a failed operation on `source`, addressed back to
    /// `target`
    pub fn error(err: &DeviceError, source: DevicePath, target: Option<DevicePath>) -> DeviceMessage {
        DeviceMessage::Error {
            error_message: Some(err.to_string()),
            error_type: Some(err.error_type().to_string()),
            error_stack_trace: Some(format!("{:?}", err)),
            source_device: source,
            target_device: target,
            comment: None,
            time: Utc::now(),
        }
    }

    /// Attach a comment to this message
    pub fn with_comment<S: Into<String>>(self, comment: S) -> DeviceMessage {
        let comment = Some(comment.into());
        match self {
            DeviceMessage::PropertyChanged { property, value, source_device, target_device, time, .. } =>
                DeviceMessage::PropertyChanged { property, value, source_device, target_device, comment, time },
            DeviceMessage::PropertySet { property, value, source_device, target_device, time, .. } =>
                DeviceMessage::PropertySet { property, value, source_device, target_device, comment, time },
            DeviceMessage::PropertyGet { property, source_device, target_device, time, .. } =>
                DeviceMessage::PropertyGet { property, source_device, target_device, comment, time },
            DeviceMessage::GetDescription { source_device, target_device, time, .. } =>
                DeviceMessage::GetDescription { source_device, target_device, comment, time },
            DeviceMessage::Description { description, properties, actions, source_device, target_device, time, .. } =>
                DeviceMessage::Description { description, properties, actions, source_device, target_device, comment, time },
            DeviceMessage::ActionExecute { action, argument, request_id, source_device, target_device, time, .. } =>
                DeviceMessage::ActionExecute { action, argument, request_id, source_device, target_device, comment, time },
            DeviceMessage::ActionResult { action, result, request_id, source_device, target_device, time, .. } =>
                DeviceMessage::ActionResult { action, result, request_id, source_device, target_device, comment, time },
            DeviceMessage::BinaryNotification { binary_id, source_device, target_device, time, .. } =>
                DeviceMessage::BinaryNotification { binary_id, source_device, target_device, comment, time },
            DeviceMessage::Empty { source_device, target_device, time, .. } =>
                DeviceMessage::Empty { source_device, target_device, comment, time },
            DeviceMessage::Log { message, data, source_device, target_device, time, .. } =>
                DeviceMessage::Log { message, data, source_device, target_device, comment, time },
            DeviceMessage::Error { error_message, error_type, error_stack_trace, source_device, target_device, time, .. } =>
                DeviceMessage::Error { error_message, error_type, error_stack_trace, source_device, target_device, comment, time },
            DeviceMessage::Lifecycle { state, source_device, target_device, time, .. } =>
                DeviceMessage::Lifecycle { state, source_device, target_device, comment, time },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> DevicePath {
        DevicePath::parse(s).unwrap()
    }

    #[test]
    fn test_kind_tags() {
        let msg = DeviceMessage::property_changed("force", Value::Float(2.5), path("drive"));
        assert_eq!(msg.kind(), "property.changed");

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "property.changed");
        assert_eq!(json["property"], "force");
        assert_eq!(json["sourceDevice"], "drive");
    }

    #[test]
    fn test_request_round_trip() {
        let json = serde_json::json!({
            "kind": "property.set",
            "property": "force",
            "value": 2.5,
            "targetDevice": "rig/drive",
            "time": "2024-05-01T12:00:00Z",
        });
        let msg: DeviceMessage = serde_json::from_value(json).unwrap();
        match &msg {
            DeviceMessage::PropertySet {
                property,
                value,
                target_device,
                source_device,
                ..
            } => {
                assert_eq!(property, "force");
                assert_eq!(value, &Some(Value::Float(2.5)));
                assert_eq!(target_device, &path("rig/drive"));
                assert!(source_device.is_none());
            }
            other => panic!("Unexpected message: {:?}", other),
        }
        assert!(msg.is_request());
    }

    #[test]
    fn test_set_without_value_is_invalidate() {
        let json = serde_json::json!({
            "kind": "property.set",
            "property": "force",
            "targetDevice": "drive",
            "time": "2024-05-01T12:00:00Z",
        });
        let msg: DeviceMessage = serde_json::from_value(json).unwrap();
        match msg {
            DeviceMessage::PropertySet { value, .. } => assert!(value.is_none()),
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_action_execute_wire_fields() {
        let msg = DeviceMessage::ActionExecute {
            action: "reset".to_string(),
            argument: None,
            request_id: "r1".to_string(),
            source_device: None,
            target_device: path("dev"),
            comment: None,
            time: Utc::now(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "action.execute");
        assert_eq!(json["requestId"], "r1");
        assert!(json.get("argument").is_none());
    }

    #[test]
    fn test_error_message_fields() {
        let err = DeviceError::action_not_found("reset");
        let msg = DeviceMessage::error(&err, path("dev"), None);
        match &msg {
            DeviceMessage::Error {
                error_type,
                error_message,
                source_device,
                ..
            } => {
                assert_eq!(error_type.as_deref(), Some("ActionNotFound"));
                assert!(error_message.as_deref().unwrap().contains("reset"));
                assert_eq!(source_device, &path("dev"));
            }
            other => panic!("Unexpected message: {:?}", other),
        }
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "error");
        assert!(json["errorType"].as_str().unwrap().contains("NotFound"));
    }

    #[test]
    fn test_notification_kind_tags() {
        let log = DeviceMessage::log("calibration pass", None, path("drive"));
        assert_eq!(serde_json::to_value(&log).unwrap()["kind"], "log");

        let lifecycle = DeviceMessage::lifecycle(LifecycleState::Started, path("drive"));
        let json = serde_json::to_value(&lifecycle).unwrap();
        assert_eq!(json["kind"], "lifecycle");
        assert_eq!(json["state"], "started");

        let binary = DeviceMessage::BinaryNotification {
            binary_id: "frame-7".to_string(),
            source_device: path("camera"),
            target_device: None,
            comment: None,
            time: Utc::now(),
        };
        let json = serde_json::to_value(&binary).unwrap();
        assert_eq!(json["kind"], "binary.notification");
        assert_eq!(json["binaryID"], "frame-7");

        let empty = DeviceMessage::Empty {
            source_device: None,
            target_device: None,
            comment: Some("ignored".to_string()),
            time: Utc::now(),
        };
        let json = serde_json::to_value(&empty).unwrap();
        assert_eq!(json["kind"], "empty");
        let back: DeviceMessage = serde_json::from_value(json).unwrap();
        assert!(!back.is_request());
    }

    #[test]
    fn test_description_round_trip() {
        let msg = DeviceMessage::Description {
            description: Value::empty(),
            properties: vec![PropertyDescriptor::new("force").writable()],
            actions: vec![ActionDescriptor::new("reset")],
            source_device: path("drive"),
            target_device: None,
            comment: None,
            time: Utc::now(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "description");
        let back: DeviceMessage = serde_json::from_value(json).unwrap();
        match back {
            DeviceMessage::Description {
                properties, actions, ..
            } => {
                assert_eq!(properties[0].name, "force");
                assert!(properties[0].writable);
                assert_eq!(actions[0].name, "reset");
            }
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_source_prefixing() {
        let msg = DeviceMessage::property_changed("position", Value::Float(0.5), path("x"));
        let prefixed = msg.prefixed_source("axes").prefixed_source("rig");
        assert_eq!(
            prefixed.source_device().map(|p| p.to_string()),
            Some("rig/axes/x".to_string())
        );

        // optional sources are only rewritten when present
        let get = DeviceMessage::PropertyGet {
            property: "position".to_string(),
            source_device: None,
            target_device: path("x"),
            comment: None,
            time: Utc::now(),
        };
        assert!(get.prefixed_source("rig").source_device().is_none());
    }
}
