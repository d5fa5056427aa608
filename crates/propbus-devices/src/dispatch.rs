/*!
 * The message dispatcher.
 *
 * Stateless per message: every request produces exactly one response.
 * Failures raised while handling a request are caught at this boundary and
 * converted into error messages addressed back to the request's source;
 * the device itself is never terminated by a property or action failure.
 */
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use propbus_core::types::DevicePath;

use crate::device::{get_or_read_property, Device, Result};
use crate::hub::resolve;
use crate::message::DeviceMessage;

/// Execute a request against one device, assuming its tree path is
/// `device_target`, and produce the response message.
pub async fn respond_message(
    device: &dyn Device,
    device_target: &DevicePath,
    request: DeviceMessage,
) -> DeviceMessage {
    trace!("Dispatching {} to {}", request.kind(), device_target);
    let reply_to = request.source_device().cloned();
    match request {
        DeviceMessage::PropertyGet {
            property,
            source_device,
            ..
        } => wrap_failure(
            device_target,
            reply_to,
            None,
            async {
                let value = device.read_property(&property).await?;
                Ok(DeviceMessage::PropertyChanged {
                    property,
                    value,
                    source_device: device_target.clone(),
                    target_device: source_device,
                    comment: None,
                    time: Utc::now(),
                })
            }
            .await,
        ),

        DeviceMessage::PropertySet {
            property,
            value,
            source_device,
            ..
        } => wrap_failure(
            device_target,
            reply_to,
            None,
            async {
                match value {
                    Some(value) => device.write_property(&property, value).await?,
                    None => device.invalidate(&property).await?,
                }
                // report the resulting state
                let value = get_or_read_property(device, &property).await?;
                Ok(DeviceMessage::PropertyChanged {
                    property,
                    value,
                    source_device: device_target.clone(),
                    target_device: source_device,
                    comment: None,
                    time: Utc::now(),
                })
            }
            .await,
        ),

        DeviceMessage::ActionExecute {
            action,
            argument,
            request_id,
            source_device,
            ..
        } => wrap_failure(
            device_target,
            reply_to,
            Some(request_id.clone()),
            async {
                let result = device.execute(&action, argument).await?;
                Ok(DeviceMessage::ActionResult {
                    action,
                    result,
                    request_id,
                    source_device: device_target.clone(),
                    target_device: source_device,
                    comment: None,
                    time: Utc::now(),
                })
            }
            .await,
        ),

        DeviceMessage::GetDescription { source_device, .. } => DeviceMessage::Description {
            description: device.meta().clone(),
            properties: device.property_descriptors(),
            actions: device.action_descriptors(),
            source_device: device_target.clone(),
            target_device: source_device,
            comment: None,
            time: Utc::now(),
        },

        // not a request this dispatcher answers
        DeviceMessage::PropertyChanged { .. }
        | DeviceMessage::Description { .. }
        | DeviceMessage::ActionResult { .. }
        | DeviceMessage::BinaryNotification { .. }
        | DeviceMessage::Empty { .. }
        | DeviceMessage::Log { .. }
        | DeviceMessage::Error { .. }
        | DeviceMessage::Lifecycle { .. } => DeviceMessage::Empty {
            source_device: Some(device_target.clone()),
            target_device: reply_to,
            comment: Some("ignored".to_string()),
            time: Utc::now(),
        },
    }
}

fn wrap_failure(
    device_target: &DevicePath,
    reply_to: Option<DevicePath>,
    request_id: Option<String>,
    result: Result<DeviceMessage>,
) -> DeviceMessage {
    match result {
        Ok(response) => response,
        Err(err) => {
            debug!("Request failed on {}: {}", device_target, err);
            let message = DeviceMessage::error(&err, device_target.clone(), reply_to);
            match request_id {
                Some(request_id) => message.with_comment(request_id),
                None => message,
            }
        }
    }
}

/// Execute a request against a device tree, resolving the target path
/// first. An unresolved path yields the same error shape with an empty
/// source.
pub async fn respond_hub_message(root: Arc<dyn Device>, request: DeviceMessage) -> DeviceMessage {
    if !request.is_request() {
        return DeviceMessage::Empty {
            source_device: None,
            target_device: request.source_device().cloned(),
            comment: Some("ignored".to_string()),
            time: Utc::now(),
        };
    }
    // requests carry a mandatory target by construction
    let target = request.target_device().cloned().unwrap_or_default();
    match resolve(root, &target) {
        Ok(device) => respond_message(&*device, &target, request).await,
        Err(err) => DeviceMessage::error(&err, DevicePath::empty(), request.source_device().cloned()),
    }
}

/// Pump an in-process transport: requests come in on a channel, responses
/// and the tree's own notifications go out on a broadcast sender.
///
/// Runs until the request channel closes. Any transport able to feed the
/// channel and drain the sender can drive the device tree.
pub fn serve(
    root: Arc<dyn Device>,
    mut requests: mpsc::Receiver<DeviceMessage>,
    events: broadcast::Sender<DeviceMessage>,
) -> JoinHandle<()> {
    let mut notifications = root.messages();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => {
                        let response = respond_hub_message(root.clone(), request).await;
                        let _ = events.send(response);
                    }
                    None => break,
                },
                notification = notifications.recv() => match notification {
                    Ok(message) => {
                        let _ = events.send(message);
                    }
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        debug!("Serve loop lagged by {} notifications", count);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use propbus_core::convert::FloatConverter;
    use propbus_core::types::Value;

    use crate::device::DeviceError;
    use crate::hub::Hub;
    use crate::spec::{DeviceRef, DeviceSpec, SpecDevice};

    struct Register(std::sync::Mutex<f64>);

    fn register_device(value: f64) -> Arc<SpecDevice<Register>> {
        let mut spec = DeviceSpec::new();
        spec.mutable_property(
            FloatConverter,
            "level",
            |device: DeviceRef<Register>| async move {
                Ok(Some(*device.driver().0.lock().unwrap()))
            },
            |device: DeviceRef<Register>, value: f64| async move {
                *device.driver().0.lock().unwrap() = value;
                Ok(())
            },
        );
        spec.unit_action("zero", |device: DeviceRef<Register>| async move {
            *device.driver().0.lock().unwrap() = 0.0;
            Ok(())
        });
        spec
            .property(FloatConverter, "failing", |_: DeviceRef<Register>| async move {
                Err(DeviceError::communication("register bank offline"))
            });
        SpecDevice::new(spec, Register(std::sync::Mutex::new(value)), Value::empty())
    }

    fn hub_with_register(value: f64) -> Arc<dyn Device> {
        let hub = Hub::new(Value::empty());
        hub.install("dev", register_device(value)).unwrap();
        hub
    }

    fn path(s: &str) -> DevicePath {
        DevicePath::parse(s).unwrap()
    }

    fn get_request(property: &str, target: &str) -> DeviceMessage {
        DeviceMessage::PropertyGet {
            property: property.to_string(),
            source_device: Some(path("console")),
            target_device: path(target),
            comment: None,
            time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_property_get_produces_changed() {
        let root = hub_with_register(4.5);
        match respond_hub_message(root, get_request("level", "dev")).await {
            DeviceMessage::PropertyChanged {
                property,
                value,
                source_device,
                target_device,
                ..
            } => {
                assert_eq!(property, "level");
                assert_eq!(value, Value::Float(4.5));
                assert_eq!(source_device, path("dev"));
                assert_eq!(target_device, Some(path("console")));
            }
            other => panic!("Unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_property_set_reports_resulting_state() {
        let root = hub_with_register(0.0);
        let request = DeviceMessage::PropertySet {
            property: "level".to_string(),
            value: Some(Value::Float(2.5)),
            source_device: None,
            target_device: path("dev"),
            comment: None,
            time: Utc::now(),
        };
        match respond_hub_message(root, request).await {
            DeviceMessage::PropertyChanged { property, value, .. } => {
                assert_eq!(property, "level");
                assert_eq!(value, Value::Float(2.5));
            }
            other => panic!("Unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_set_without_value_equals_invalidate_then_read() {
        let root = hub_with_register(3.0);

        // prime the cache with a different logical value
        let device = crate::hub::resolve(root.clone(), &path("dev")).unwrap();
        device.read_property("level").await.unwrap();

        let request = DeviceMessage::PropertySet {
            property: "level".to_string(),
            value: None,
            source_device: None,
            target_device: path("dev"),
            comment: None,
            time: Utc::now(),
        };
        let via_dispatch = respond_hub_message(root.clone(), request).await;

        device.invalidate("level").await.unwrap();
        let expected = device.read_property("level").await.unwrap();

        match via_dispatch {
            DeviceMessage::PropertyChanged { property, value, source_device, .. } => {
                assert_eq!(property, "level");
                assert_eq!(value, expected);
                assert_eq!(source_device, path("dev"));
            }
            other => panic!("Unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_action_execute_round_trip() {
        let root = hub_with_register(9.0);
        let request = DeviceMessage::ActionExecute {
            action: "zero".to_string(),
            argument: None,
            request_id: "r1".to_string(),
            source_device: Some(path("console")),
            target_device: path("dev"),
            comment: None,
            time: Utc::now(),
        };
        match respond_hub_message(root.clone(), request).await {
            DeviceMessage::ActionResult {
                action,
                request_id,
                result,
                source_device,
                ..
            } => {
                assert_eq!(action, "zero");
                assert_eq!(request_id, "r1");
                assert_eq!(result, None);
                assert_eq!(source_device, path("dev"));
            }
            other => panic!("Unexpected response: {:?}", other),
        }

        match respond_hub_message(root, get_request("level", "dev")).await {
            DeviceMessage::PropertyChanged { value, .. } => assert_eq!(value, Value::Float(0.0)),
            other => panic!("Unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_action_yields_error_not_crash() {
        let root = hub_with_register(1.0);
        let request = DeviceMessage::ActionExecute {
            action: "reset".to_string(),
            argument: None,
            request_id: "r1".to_string(),
            source_device: Some(path("console")),
            target_device: path("dev"),
            comment: None,
            time: Utc::now(),
        };
        match respond_hub_message(root.clone(), request).await {
            DeviceMessage::Error {
                error_type,
                source_device,
                target_device,
                comment,
                ..
            } => {
                assert!(error_type.as_deref().unwrap().contains("NotFound"));
                assert_eq!(source_device, path("dev"));
                assert_eq!(target_device, Some(path("console")));
                assert_eq!(comment.as_deref(), Some("r1"));
            }
            other => panic!("Unexpected response: {:?}", other),
        }

        // the device survives and keeps answering
        match respond_hub_message(root, get_request("level", "dev")).await {
            DeviceMessage::PropertyChanged { value, .. } => assert_eq!(value, Value::Float(1.0)),
            other => panic!("Unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_failure_becomes_error_message() {
        let root = hub_with_register(1.0);
        match respond_hub_message(root, get_request("failing", "dev")).await {
            DeviceMessage::Error { error_type, .. } => {
                assert_eq!(error_type.as_deref(), Some("Communication"));
            }
            other => panic!("Unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unresolved_path_error_has_empty_source() {
        let root = hub_with_register(1.0);
        match respond_hub_message(root, get_request("level", "ghost")).await {
            DeviceMessage::Error {
                error_type,
                source_device,
                ..
            } => {
                assert!(error_type.as_deref().unwrap().contains("NotFound"));
                assert!(source_device.is_empty());
            }
            other => panic!("Unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_request_is_acknowledged_ignored() {
        let root = hub_with_register(1.0);
        let notification =
            DeviceMessage::property_changed("level", Value::Float(1.0), path("elsewhere"));
        match respond_hub_message(root, notification).await {
            DeviceMessage::Empty { comment, .. } => {
                assert_eq!(comment.as_deref(), Some("ignored"));
            }
            other => panic!("Unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_description_request() {
        let root = hub_with_register(1.0);
        let request = DeviceMessage::GetDescription {
            source_device: None,
            target_device: path("dev"),
            comment: None,
            time: Utc::now(),
        };
        match respond_hub_message(root, request).await {
            DeviceMessage::Description {
                properties,
                actions,
                source_device,
                ..
            } => {
                let names: Vec<&str> = properties.iter().map(|p| p.name.as_str()).collect();
                assert!(names.contains(&"level"));
                assert!(names.contains(&"@meta"));
                assert_eq!(actions.len(), 1);
                assert_eq!(source_device, path("dev"));
            }
            other => panic!("Unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_serve_pumps_requests_and_notifications() {
        let root = hub_with_register(1.0);
        let (request_tx, request_rx) = mpsc::channel(16);
        let (event_tx, mut event_rx) = broadcast::channel(16);

        let handle = serve(root, request_rx, event_tx);

        request_tx
            .send(get_request("level", "dev"))
            .await
            .unwrap();

        // the response arrives on the event stream, and the read also
        // produces a prefixed notification from the tree itself
        let mut changed = 0;
        while changed < 2 {
            let event = tokio::time::timeout(std::time::Duration::from_secs(1), event_rx.recv())
                .await
                .expect("event stream stalled")
                .unwrap();
            if let DeviceMessage::PropertyChanged {
                source_device,
                value,
                ..
            } = event
            {
                assert_eq!(source_device, path("dev"));
                assert_eq!(value, Value::Float(1.0));
                changed += 1;
            }
        }

        drop(request_tx);
        handle.await.unwrap();
    }
}
