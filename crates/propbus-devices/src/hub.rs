/*!
 * Device hubs: containers of named child devices composing into a tree.
 *
 * A hub maps single path segments to child devices and routes segmented
 * paths recursively. Hubs are devices themselves; their aggregated message
 * stream re-prefixes every child message with the child's segment on the
 * way out, so sources stay correct across arbitrary nesting.
 */
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use propbus_core::types::{DevicePath, Value, PATH_SEPARATOR};

use crate::device::{
    ActionDescriptor, Device, DeviceError, LifecycleState, PropertyDescriptor, Result,
    DEFAULT_MESSAGE_BUFFER, META_PROPERTY,
};
use crate::message::DeviceMessage;
use crate::scope::TaskScope;

/// A container of child devices addressed by path segments
pub trait DeviceHub: Send + Sync {
    /// Names of the direct children
    fn device_names(&self) -> Vec<String>;

    /// Look up a direct child by segment name
    fn device(&self, name: &str) -> Option<Arc<dyn Device>>;
}

/// Resolve a segmented path against a device tree.
///
/// The empty path resolves to `root` itself. A multi-segment path recurses
/// left to right; descending through a device that is not a hub fails with
/// a not-a-hub error, a missing child with a not-found error.
pub fn resolve(root: Arc<dyn Device>, path: &DevicePath) -> Result<Arc<dyn Device>> {
    let Some(first) = path.first() else {
        return Ok(root);
    };
    let hub = root
        .hub()
        .ok_or_else(|| DeviceError::not_a_hub(path.to_string()))?;
    let child = hub
        .device(first)
        .ok_or_else(|| DeviceError::device_not_found(path))?;
    resolve(child, &path.rest())
}

/// Resolve a path, mapping any failure to `None`
pub fn resolve_or_none(root: Arc<dyn Device>, path: &DevicePath) -> Option<Arc<dyn Device>> {
    resolve(root, path).ok()
}

/// Flatten the whole subtree under `root` into path → device pairs by
/// recursive descent. `root` itself is not listed.
pub fn build_tree(root: &Arc<dyn Device>) -> Vec<(DevicePath, Arc<dyn Device>)> {
    let mut out = Vec::new();
    collect_tree(&DevicePath::empty(), root, &mut out);
    out
}

fn collect_tree(
    prefix: &DevicePath,
    device: &Arc<dyn Device>,
    out: &mut Vec<(DevicePath, Arc<dyn Device>)>,
) {
    let Some(hub) = device.hub() else {
        return;
    };
    for name in hub.device_names() {
        let Some(child) = hub.device(&name) else {
            continue;
        };
        let Ok(path) = prefix.child(&name) else {
            continue;
        };
        out.push((path.clone(), child.clone()));
        collect_tree(&path, &child, out);
    }
}

struct HubChild {
    device: Arc<dyn Device>,
    /// Present when the child was installed as a group, for
    /// construction-time descent without downcasting
    group: Option<Arc<Hub>>,
}

/// A concrete hub device.
///
/// Children are installed under unique segment names. The hub is itself a
/// device: its `@meta` property and any purely virtual properties written
/// to it are layered above the children. Closing the hub closes all
/// children first.
pub struct Hub {
    weak: Weak<Hub>,
    meta: Value,
    children: Mutex<HashMap<String, HubChild>>,
    state: Mutex<HashMap<String, Value>>,
    messages: broadcast::Sender<DeviceMessage>,
    scope: TaskScope,
    lifecycle: Mutex<LifecycleState>,
}

impl Hub {
    /// Create a new empty hub
    pub fn new(meta: Value) -> Arc<Self> {
        let (messages, _) = broadcast::channel(DEFAULT_MESSAGE_BUFFER);
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            meta,
            children: Mutex::new(HashMap::new()),
            state: Mutex::new(HashMap::new()),
            scope: TaskScope::new(messages.clone()),
            messages,
            lifecycle: Mutex::new(LifecycleState::Init),
        })
    }

    fn self_arc(&self) -> Result<Arc<Hub>> {
        self.weak
            .upgrade()
            .ok_or_else(|| DeviceError::closed("Hub handle dropped"))
    }

    fn children_guard(&self) -> MutexGuard<'_, HashMap<String, HubChild>> {
        self.children.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn state_guard(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lifecycle_guard(&self) -> MutexGuard<'_, LifecycleState> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install a child device under a unique segment name
    pub fn install(&self, name: &str, device: Arc<dyn Device>) -> Result<()> {
        self.install_child(name, device, None)
    }

    /// Install a child hub, keeping its group handle for construction-time
    /// descent
    pub fn install_group(&self, name: &str, group: Arc<Hub>) -> Result<()> {
        self.install_child(name, group.clone(), Some(group))
    }

    fn install_child(
        &self,
        name: &str,
        device: Arc<dyn Device>,
        group: Option<Arc<Hub>>,
    ) -> Result<()> {
        if name.is_empty() || name.contains(PATH_SEPARATOR) {
            return Err(DeviceError::other(format!(
                "Invalid child name: {:?}",
                name
            )));
        }
        {
            let mut children = self.children_guard();
            if children.contains_key(name) {
                return Err(DeviceError::other(format!(
                    "A child device named {} already exists",
                    name
                )));
            }
            self.forward_child(name, &device);
            children.insert(name.to_string(), HubChild { device: device.clone(), group });
        }
        debug!("Installed device {}", name);

        // children installed into a running hub are opened on the hub scope
        if matches!(
            self.lifecycle_state(),
            LifecycleState::Starting | LifecycleState::Started
        ) {
            self.scope.spawn(async move { device.open().await });
        }
        Ok(())
    }

    /// Remove a child device and close it
    pub async fn uninstall(&self, name: &str) -> Result<()> {
        let child = {
            let mut children = self.children_guard();
            children
                .remove(name)
                .ok_or_else(|| DeviceError::DeviceNotFound(name.to_string()))?
        };
        child.device.close().await;
        Ok(())
    }

    /// Forward a child's messages into the aggregated hub stream with the
    /// child's segment prefixed to the source
    fn forward_child(&self, name: &str, device: &Arc<dyn Device>) {
        let mut subscription = device.messages();
        let out = self.messages.clone();
        let name = name.to_string();
        self.scope.spawn(async move {
            loop {
                match subscription.recv().await {
                    Ok(message) => {
                        let _ = out.send(message.prefixed_source(&name));
                    }
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        warn!("Hub stream lagged by {} messages from {}", count, name);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            Ok(())
        });
    }

    /// Walk `path`, creating intermediate group hubs as needed, and return
    /// the final group. Construction-time convenience only; routing never
    /// creates nodes.
    pub fn get_or_create_group(&self, path: &DevicePath) -> Result<Arc<Hub>> {
        let mut current = self.self_arc()?;
        for segment in path.segments() {
            let existing = {
                let children = current.children_guard();
                match children.get(segment) {
                    Some(child) => Some(
                        child
                            .group
                            .clone()
                            .ok_or_else(|| DeviceError::not_a_hub(segment))?,
                    ),
                    None => None,
                }
            };
            let next = match existing {
                Some(group) => group,
                None => {
                    let group = Hub::new(Value::empty());
                    current.install_group(segment, group.clone())?;
                    group
                }
            };
            current = next;
        }
        Ok(current)
    }

    fn update_virtual(&self, name: &str, value: Value) {
        let changed = {
            let mut state = self.state_guard();
            if state.get(name) == Some(&value) {
                false
            } else {
                state.insert(name.to_string(), value.clone());
                true
            }
        };
        if changed {
            let _ = self.messages.send(DeviceMessage::property_changed(
                name,
                value,
                DevicePath::empty(),
            ));
        }
    }

    fn set_lifecycle(&self, state: LifecycleState) {
        let changed = {
            let mut lifecycle = self.lifecycle_guard();
            if *lifecycle == state {
                false
            } else {
                *lifecycle = state;
                true
            }
        };
        if changed {
            let _ = self
                .messages
                .send(DeviceMessage::lifecycle(state, DevicePath::empty()));
        }
    }

    fn child_devices(&self) -> Vec<Arc<dyn Device>> {
        self.children_guard()
            .values()
            .map(|child| child.device.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl Device for Hub {
    fn meta(&self) -> &Value {
        &self.meta
    }

    fn property_descriptors(&self) -> Vec<PropertyDescriptor> {
        vec![PropertyDescriptor::new(META_PROPERTY)
            .with_description("Static device configuration")]
    }

    fn action_descriptors(&self) -> Vec<ActionDescriptor> {
        Vec::new()
    }

    fn lifecycle_state(&self) -> LifecycleState {
        *self.lifecycle_guard()
    }

    fn messages(&self) -> broadcast::Receiver<DeviceMessage> {
        self.messages.subscribe()
    }

    async fn read_property(&self, name: &str) -> Result<Value> {
        if name == META_PROPERTY {
            return Ok(self.meta.clone());
        }
        // virtual properties are backed by the cache itself
        self.get_property(name)
            .ok_or_else(|| DeviceError::property_not_found(name))
    }

    fn get_property(&self, name: &str) -> Option<Value> {
        self.state_guard().get(name).cloned()
    }

    async fn invalidate(&self, name: &str) -> Result<()> {
        self.state_guard().remove(name);
        Ok(())
    }

    async fn write_property(&self, name: &str, value: Value) -> Result<()> {
        if name == META_PROPERTY {
            return Err(DeviceError::not_writable(name));
        }
        self.update_virtual(name, value);
        Ok(())
    }

    async fn execute(&self, name: &str, _argument: Option<Value>) -> Result<Option<Value>> {
        Err(DeviceError::action_not_found(name))
    }

    async fn open(&self) -> Result<()> {
        {
            let lifecycle = self.lifecycle_guard();
            if matches!(*lifecycle, LifecycleState::Starting | LifecycleState::Started) {
                return Ok(());
            }
        }
        self.set_lifecycle(LifecycleState::Starting);
        for child in self.child_devices() {
            if let Err(err) = child.open().await {
                self.set_lifecycle(LifecycleState::Error);
                return Err(err);
            }
        }
        self.set_lifecycle(LifecycleState::Started);
        Ok(())
    }

    async fn close(&self) {
        if self.lifecycle_state() == LifecycleState::Stopped {
            return;
        }
        // children must be stopped before the hub reports stopped
        for child in self.child_devices() {
            child.close().await;
        }
        self.set_lifecycle(LifecycleState::Stopped);
        self.scope.cancel_all();
    }

    fn hub(&self) -> Option<&dyn DeviceHub> {
        Some(self)
    }
}

impl DeviceHub for Hub {
    fn device_names(&self) -> Vec<String> {
        self.children_guard().keys().cloned().collect()
    }

    fn device(&self, name: &str) -> Option<Arc<dyn Device>> {
        self.children_guard()
            .get(name)
            .map(|child| child.device.clone())
    }
}

/// Install a device into a running hub and open it immediately
pub async fn install_and_open(hub: &Hub, name: &str, device: Arc<dyn Device>) -> Result<()> {
    hub.install(name, device.clone())?;
    device.open().await
}
