/*!
 * Remote device client.
 *
 * [`RemoteDevice`] reconstructs a local view of a device living behind a
 * transport, purely from the message stream: property values and
 * descriptors are cached from inbound notifications, and every operation
 * is a request on the outbound channel awaiting its correlated response.
 * To a generic caller a remote device is interchangeable with a local one.
 */
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace};
use uuid::Uuid;

use propbus_core::types::{DevicePath, Value};

use crate::device::{
    ActionDescriptor, Device, DeviceError, LifecycleState, PropertyDescriptor, Result,
    DEFAULT_MESSAGE_BUFFER,
};
use crate::message::DeviceMessage;
use crate::scope::TaskScope;

/// A device driven entirely over a message transport.
///
/// `inbound` carries every message published by the remote tree; messages
/// whose source matches the device path are cached and re-broadcast on the
/// local stream. `outbound` accepts requests for the remote dispatcher.
pub struct RemoteDevice {
    path: DevicePath,
    meta: Value,
    outbound: mpsc::Sender<DeviceMessage>,
    local: broadcast::Sender<DeviceMessage>,
    cache: Mutex<HashMap<String, Value>>,
    property_descriptors: Mutex<Vec<PropertyDescriptor>>,
    action_descriptors: Mutex<Vec<ActionDescriptor>>,
    lifecycle: Mutex<LifecycleState>,
    scope: TaskScope,
}

impl RemoteDevice {
    /// Connect a client view of the remote device at `path`
    pub fn new(
        path: DevicePath,
        inbound: broadcast::Receiver<DeviceMessage>,
        outbound: mpsc::Sender<DeviceMessage>,
    ) -> Arc<Self> {
        let (local, _) = broadcast::channel(DEFAULT_MESSAGE_BUFFER);
        let device = Arc::new(Self {
            path,
            meta: Value::empty(),
            outbound,
            scope: TaskScope::new(local.clone()),
            local,
            cache: Mutex::new(HashMap::new()),
            property_descriptors: Mutex::new(Vec::new()),
            action_descriptors: Mutex::new(Vec::new()),
            lifecycle: Mutex::new(LifecycleState::Started),
        });
        Self::listen(&device, inbound);
        device
    }

    fn cache_guard(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn the caching task mirroring the inbound stream
    fn listen(device: &Arc<Self>, mut inbound: broadcast::Receiver<DeviceMessage>) {
        let weak: Weak<RemoteDevice> = Arc::downgrade(device);
        device.scope.spawn(async move {
            loop {
                let message = match inbound.recv().await {
                    Ok(message) => message,
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        debug!("Remote stream lagged by {} messages", count);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(device) = weak.upgrade() else { break };
                device.observe(message);
            }
            Ok(())
        });
    }

    /// Cache and re-broadcast one inbound message when it originates from
    /// the mirrored device
    fn observe(&self, message: DeviceMessage) {
        if message.source_device() != Some(&self.path) {
            return;
        }
        match &message {
            DeviceMessage::PropertyChanged { property, value, .. } => {
                trace!("Caching {} from remote", property);
                self.cache_guard().insert(property.clone(), value.clone());
            }
            DeviceMessage::Description {
                properties,
                actions,
                ..
            } => {
                *self
                    .property_descriptors
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()) = properties.clone();
                *self
                    .action_descriptors
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()) = actions.clone();
            }
            DeviceMessage::Lifecycle { state, .. } => {
                *self.lifecycle.lock().unwrap_or_else(|e| e.into_inner()) = *state;
            }
            _ => {}
        }
        let _ = self.local.send(message);
    }

    async fn send(&self, message: DeviceMessage) -> Result<()> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| DeviceError::closed("Remote transport closed"))
    }

    /// Await the next matching message on the local stream; subscription
    /// must predate the request send
    async fn await_response<F, T>(
        &self,
        mut subscription: broadcast::Receiver<DeviceMessage>,
        mut matcher: F,
    ) -> Result<T>
    where
        F: FnMut(DeviceMessage) -> Option<Result<T>>,
    {
        loop {
            match subscription.recv().await {
                Ok(message) => {
                    if let Some(result) = matcher(message) {
                        return result;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(DeviceError::closed("Remote stream closed"))
                }
            }
        }
    }

    /// Request the remote description and wait for the descriptors to
    /// arrive
    pub async fn refresh_description(&self) -> Result<()> {
        let subscription = self.local.subscribe();
        self.send(DeviceMessage::GetDescription {
            source_device: None,
            target_device: self.path.clone(),
            comment: None,
            time: Utc::now(),
        })
        .await?;
        self.await_response(subscription, |message| match message {
            DeviceMessage::Description { .. } => Some(Ok(())),
            _ => None,
        })
        .await
    }

    /// Fire-and-forget property write performed on the client scope
    pub fn write_detached(&self, name: &str, value: Value) {
        let message = DeviceMessage::PropertySet {
            property: name.to_string(),
            value: Some(value),
            source_device: None,
            target_device: self.path.clone(),
            comment: None,
            time: Utc::now(),
        };
        let outbound = self.outbound.clone();
        self.scope.spawn(async move {
            outbound
                .send(message)
                .await
                .map_err(|_| DeviceError::closed("Remote transport closed"))
        });
    }

    fn match_property_response(
        name: &str,
        message: DeviceMessage,
    ) -> Option<Result<Value>> {
        match message {
            DeviceMessage::PropertyChanged {
                property, value, ..
            } if property == name => Some(Ok(value)),
            DeviceMessage::Error {
                error_message,
                comment: None,
                ..
            } => Some(Err(DeviceError::ReadFailed(
                error_message.unwrap_or_else(|| "remote error".to_string()),
            ))),
            _ => None,
        }
    }
}

#[async_trait::async_trait]
impl Device for RemoteDevice {
    fn meta(&self) -> &Value {
        &self.meta
    }

    fn property_descriptors(&self) -> Vec<PropertyDescriptor> {
        self.property_descriptors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn action_descriptors(&self) -> Vec<ActionDescriptor> {
        self.action_descriptors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn lifecycle_state(&self) -> LifecycleState {
        *self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn messages(&self) -> broadcast::Receiver<DeviceMessage> {
        self.local.subscribe()
    }

    async fn read_property(&self, name: &str) -> Result<Value> {
        let subscription = self.local.subscribe();
        self.send(DeviceMessage::PropertyGet {
            property: name.to_string(),
            source_device: None,
            target_device: self.path.clone(),
            comment: None,
            time: Utc::now(),
        })
        .await?;
        self.await_response(subscription, |message| {
            Self::match_property_response(name, message)
        })
        .await
    }

    fn get_property(&self, name: &str) -> Option<Value> {
        self.cache_guard().get(name).cloned()
    }

    async fn invalidate(&self, name: &str) -> Result<()> {
        self.cache_guard().remove(name);
        Ok(())
    }

    async fn write_property(&self, name: &str, value: Value) -> Result<()> {
        let subscription = self.local.subscribe();
        self.send(DeviceMessage::PropertySet {
            property: name.to_string(),
            value: Some(value),
            source_device: None,
            target_device: self.path.clone(),
            comment: None,
            time: Utc::now(),
        })
        .await?;
        self.await_response(subscription, |message| {
            Self::match_property_response(name, message).map(|result| result.map(|_| ()))
        })
        .await
    }

    async fn execute(&self, name: &str, argument: Option<Value>) -> Result<Option<Value>> {
        let request_id = Uuid::new_v4().to_string();
        let subscription = self.local.subscribe();
        self.send(DeviceMessage::ActionExecute {
            action: name.to_string(),
            argument,
            request_id: request_id.clone(),
            source_device: None,
            target_device: self.path.clone(),
            comment: None,
            time: Utc::now(),
        })
        .await?;
        self.await_response(subscription, move |message| match message {
            DeviceMessage::ActionResult {
                result,
                request_id: response_id,
                ..
            } if response_id == request_id => Some(Ok(result)),
            DeviceMessage::Error {
                error_message,
                comment: Some(comment),
                ..
            } if comment == request_id => Some(Err(DeviceError::Other(
                error_message.unwrap_or_else(|| "remote error".to_string()),
            ))),
            _ => None,
        })
        .await
    }

    async fn open(&self) -> Result<()> {
        self.refresh_description().await
    }

    async fn close(&self) {
        *self.lifecycle.lock().unwrap_or_else(|e| e.into_inner()) = LifecycleState::Stopped;
        self.scope.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    use propbus_core::convert::FloatConverter;

    use crate::device::next_property_change;
    use crate::dispatch::serve;
    use crate::hub::Hub;
    use crate::spec::{DeviceRef, DeviceSpec, SpecDevice};

    struct Gauge(Mutex<f64>);

    fn gauge_device(value: f64) -> Arc<SpecDevice<Gauge>> {
        let mut spec = DeviceSpec::new();
        spec.mutable_property(
            FloatConverter,
            "pressure",
            |device: DeviceRef<Gauge>| async move {
                Ok(Some(*device.driver().0.lock().unwrap()))
            },
            |device: DeviceRef<Gauge>, value: f64| async move {
                *device.driver().0.lock().unwrap() = value;
                Ok(())
            },
        );
        spec.action(
            FloatConverter,
            FloatConverter,
            "double",
            |device: DeviceRef<Gauge>, input: Option<f64>| async move {
                let input = input.unwrap_or(*device.driver().0.lock().unwrap());
                Ok(Some(input * 2.0))
            },
        );
        SpecDevice::new(spec, Gauge(Mutex::new(value)), Value::empty())
    }

    /// Wire a remote client to a served hub over in-process channels
    fn connected_client(value: f64) -> (Arc<RemoteDevice>, tokio::task::JoinHandle<()>) {
        let hub = Hub::new(Value::empty());
        hub.install("gauge", gauge_device(value)).unwrap();

        let (request_tx, request_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = broadcast::channel(64);
        let handle = serve(hub, request_rx, event_tx);

        let client = RemoteDevice::new(
            DevicePath::parse("gauge").unwrap(),
            event_rx,
            request_tx,
        );
        (client, handle)
    }

    #[tokio::test]
    async fn test_remote_read_populates_cache() {
        let (client, _handle) = connected_client(0.7);

        assert_eq!(client.get_property("pressure"), None);
        let value = client.read_property("pressure").await.unwrap();
        assert_eq!(value, Value::Float(0.7));
        assert_eq!(client.get_property("pressure"), Some(Value::Float(0.7)));

        // let the duplicate tree notification for the same read drain
        // before invalidating, so it cannot repopulate the cache
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        client.invalidate("pressure").await.unwrap();
        assert_eq!(client.get_property("pressure"), None);
    }

    #[tokio::test]
    async fn test_remote_write_round_trip() {
        let (client, _handle) = connected_client(0.0);

        tokio_test::assert_ok!(client.write_property("pressure", Value::Float(2.5)).await);
        assert_eq!(client.get_property("pressure"), Some(Value::Float(2.5)));
    }

    #[tokio::test]
    async fn test_remote_execute_correlates_by_request_id() {
        let (client, _handle) = connected_client(3.0);

        let result = client
            .execute("double", Some(Value::Float(4.0)))
            .await
            .unwrap();
        assert_eq!(result, Some(Value::Float(8.0)));
    }

    #[tokio::test]
    async fn test_remote_execute_missing_action_surfaces_error() {
        let (client, _handle) = connected_client(3.0);

        let result = client.execute("reset", None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_remote_description_populates_descriptors() {
        let (client, _handle) = connected_client(1.0);

        assert!(client.property_descriptors().is_empty());
        client.open().await.unwrap();

        let names: Vec<String> = client
            .property_descriptors()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert!(names.contains(&"pressure".to_string()));
        assert_eq!(client.action_descriptors().len(), 1);
    }

    #[tokio::test]
    async fn test_remote_stream_mirrors_notifications() {
        let (client, _handle) = connected_client(0.0);
        let mut subscription = Device::messages(&*client);

        client.write_detached("pressure", Value::Float(1.5));

        let value = next_property_change(&mut subscription, "pressure").await;
        assert_eq!(value, Some(Value::Float(1.5)));
    }
}
