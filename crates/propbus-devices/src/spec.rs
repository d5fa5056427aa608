/*!
 * Property and action specifications, the per-device-type registry, and
 * the spec-driven device implementation.
 *
 * A [`DeviceSpec`] is defined once per device type and shared by every
 * instance: it binds property names to converters and async read/write
 * functions, and action names to converters and execute functions. A
 * [`SpecDevice`] pairs one spec with one hardware driver instance and
 * carries the runtime state: the logical-state cache, per-property write
 * locks, the broadcast message stream and the supervised task scope.
 */
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::future::BoxFuture;
use tokio::sync::broadcast;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, trace};

use propbus_core::config::Config;
use propbus_core::convert::ValueConverter;
use propbus_core::types::{DevicePath, Value};

use crate::device::{
    ActionDescriptor, Device, DeviceError, LifecycleState, PropertyDescriptor, Result,
    DEFAULT_MESSAGE_BUFFER, META_PROPERTY,
};
use crate::message::DeviceMessage;
use crate::scope::TaskScope;

/// Shared handle to a spec-driven device, passed to every bound function
pub type DeviceRef<H> = Arc<SpecDevice<H>>;

type ReadFn<H> = Arc<dyn Fn(DeviceRef<H>) -> BoxFuture<'static, Result<Option<Value>>> + Send + Sync>;
type WriteFn<H> = Arc<dyn Fn(DeviceRef<H>, Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;
type ExecuteFn<H> =
    Arc<dyn Fn(DeviceRef<H>, Option<Value>) -> BoxFuture<'static, Result<Option<Value>>> + Send + Sync>;
type HookFn<H> = Arc<dyn Fn(DeviceRef<H>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Specification of one named property: a descriptor plus bound accessor
/// functions working on the value tree
pub struct PropertySpec<H> {
    /// The property descriptor
    pub descriptor: PropertyDescriptor,
    read: ReadFn<H>,
    write: Option<WriteFn<H>>,
}

impl<H> Clone for PropertySpec<H> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            read: self.read.clone(),
            write: self.write.clone(),
        }
    }
}

impl<H> PropertySpec<H> {
    /// Create a read-only spec from a descriptor and an erased read function
    pub fn new(descriptor: PropertyDescriptor, read: ReadFn<H>) -> Self {
        Self {
            descriptor,
            read,
            write: None,
        }
    }

    /// Attach an erased write function, marking the descriptor writable
    pub fn with_write(mut self, write: WriteFn<H>) -> Self {
        self.descriptor.writable = true;
        self.write = Some(write);
        self
    }

    /// Whether the spec has a bound write function
    pub fn is_writable(&self) -> bool {
        self.write.is_some()
    }
}

/// Specification of one named action: a descriptor plus a bound execute
/// function working on the value tree
pub struct ActionSpec<H> {
    /// The action descriptor
    pub descriptor: ActionDescriptor,
    execute: ExecuteFn<H>,
}

impl<H> Clone for ActionSpec<H> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            execute: self.execute.clone(),
        }
    }
}

impl<H> ActionSpec<H> {
    /// Create a spec from a descriptor and an erased execute function
    pub fn new(descriptor: ActionDescriptor, execute: ExecuteFn<H>) -> Self {
        Self { descriptor, execute }
    }
}

/// The per-device-type registry of property and action specifications.
///
/// Specs are registered at device-type definition, not per instance, and
/// carry no instance state. Registration is idempotent by name: the last
/// registration wins. Every spec automatically exposes the read-only
/// `@meta` property carrying the device's static configuration.
pub struct DeviceSpec<H> {
    properties: HashMap<String, PropertySpec<H>>,
    actions: HashMap<String, ActionSpec<H>>,
    on_open: Option<HookFn<H>>,
    on_close: Option<HookFn<H>>,
}

impl<H: Send + Sync + 'static> Default for DeviceSpec<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Send + Sync + 'static> DeviceSpec<H> {
    /// Create a new spec with the built-in `@meta` property registered
    pub fn new() -> Self {
        let mut spec = Self {
            properties: HashMap::new(),
            actions: HashMap::new(),
            on_open: None,
            on_close: None,
        };
        spec.register_property(PropertySpec::new(
            PropertyDescriptor::new(META_PROPERTY)
                .with_description("Static device configuration"),
            Arc::new(|device: DeviceRef<H>| {
                Box::pin(async move { Ok(Some(device.meta().clone())) })
            }),
        ));
        spec
    }

    /// Register a property spec; replaces any previous spec with the same name
    pub fn register_property(&mut self, spec: PropertySpec<H>) -> &mut Self {
        let name = spec.descriptor.name.clone();
        if self.properties.insert(name.clone(), spec).is_some() {
            debug!("Replaced property spec {}", name);
        }
        self
    }

    /// Register an action spec; replaces any previous spec with the same name
    pub fn register_action(&mut self, spec: ActionSpec<H>) -> &mut Self {
        let name = spec.descriptor.name.clone();
        if self.actions.insert(name.clone(), spec).is_some() {
            debug!("Replaced action spec {}", name);
        }
        self
    }

    /// Register a read-only property with a typed read function
    pub fn property<T, C, F, Fut>(&mut self, converter: C, name: &str, read: F) -> &mut Self
    where
        T: Send + 'static,
        C: ValueConverter<T> + 'static,
        F: Fn(DeviceRef<H>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        let converter = Arc::new(converter);
        let descriptor = PropertyDescriptor::new(name).with_schema(converter.schema());
        self.register_property(PropertySpec::new(descriptor, erase_read(converter, read)))
    }

    /// Register a writable property with typed read and write functions
    pub fn mutable_property<T, C, F, FutR, W, FutW>(
        &mut self,
        converter: C,
        name: &str,
        read: F,
        write: W,
    ) -> &mut Self
    where
        T: Send + 'static,
        C: ValueConverter<T> + 'static,
        F: Fn(DeviceRef<H>) -> FutR + Send + Sync + 'static,
        FutR: Future<Output = Result<Option<T>>> + Send + 'static,
        W: Fn(DeviceRef<H>, T) -> FutW + Send + Sync + 'static,
        FutW: Future<Output = Result<()>> + Send + 'static,
    {
        let converter = Arc::new(converter);
        let descriptor = PropertyDescriptor::new(name).with_schema(converter.schema());
        let write_converter = converter.clone();
        let write_fn: WriteFn<H> = Arc::new(move |device, value| {
            let fut: BoxFuture<'static, Result<()>> = match write_converter.from_value(&value) {
                Ok(typed) => Box::pin(write(device, typed)),
                Err(err) => Box::pin(async move { Err(DeviceError::from(err)) }),
            };
            fut
        });
        self.register_property(
            PropertySpec::new(descriptor, erase_read(converter, read)).with_write(write_fn),
        )
    }

    /// Register an action with typed input and output
    pub fn action<I, O, CI, CO, F, Fut>(
        &mut self,
        input_converter: CI,
        output_converter: CO,
        name: &str,
        execute: F,
    ) -> &mut Self
    where
        I: Send + 'static,
        O: Send + 'static,
        CI: ValueConverter<I> + 'static,
        CO: ValueConverter<O> + 'static,
        F: Fn(DeviceRef<H>, Option<I>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<O>>> + Send + 'static,
    {
        let input_converter = Arc::new(input_converter);
        let output_converter = Arc::new(output_converter);
        let execute_fn: ExecuteFn<H> = Arc::new(move |device, argument| {
            let input = match argument
                .map(|value| input_converter.from_value(&value))
                .transpose()
            {
                Ok(input) => input,
                Err(err) => return Box::pin(async move { Err(DeviceError::from(err)) }),
            };
            let fut = execute(device, input);
            let output_converter = output_converter.clone();
            Box::pin(async move {
                match fut.await? {
                    Some(output) => Ok(Some(
                        output_converter
                            .to_value(&output)
                            .map_err(DeviceError::from)?,
                    )),
                    None => Ok(None),
                }
            })
        });
        self.register_action(ActionSpec::new(ActionDescriptor::new(name), execute_fn))
    }

    /// Register an action that takes no input and produces no output
    pub fn unit_action<F, Fut>(&mut self, name: &str, execute: F) -> &mut Self
    where
        F: Fn(DeviceRef<H>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let execute_fn: ExecuteFn<H> = Arc::new(move |device, _argument| {
            let fut = execute(device);
            Box::pin(async move {
                fut.await?;
                Ok(None)
            })
        });
        self.register_action(ActionSpec::new(ActionDescriptor::new(name), execute_fn))
    }

    /// Install an initialization hook, run while the device is starting
    pub fn on_open<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(DeviceRef<H>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_open = Some(Arc::new(move |device| Box::pin(hook(device))));
        self
    }

    /// Install a shutdown hook, run before the device scope is cancelled
    pub fn on_close<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(DeviceRef<H>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_close = Some(Arc::new(move |device| Box::pin(hook(device))));
        self
    }

    /// Look up a property spec by name
    pub fn property_spec(&self, name: &str) -> Option<&PropertySpec<H>> {
        self.properties.get(name)
    }

    /// Look up an action spec by name
    pub fn action_spec(&self, name: &str) -> Option<&ActionSpec<H>> {
        self.actions.get(name)
    }
}

fn erase_read<H, T, C, F, Fut>(converter: Arc<C>, read: F) -> ReadFn<H>
where
    T: Send + 'static,
    C: ValueConverter<T> + 'static,
    F: Fn(DeviceRef<H>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<T>>> + Send + 'static,
{
    Arc::new(move |device| {
        let fut = read(device);
        let converter = converter.clone();
        Box::pin(async move {
            match fut.await? {
                Some(value) => Ok(Some(converter.to_value(&value).map_err(DeviceError::from)?)),
                None => Ok(None),
            }
        })
    })
}

/// A device instance driven by a [`DeviceSpec`].
///
/// Pairs the shared spec with one hardware driver value and owns the
/// runtime state: the logical-state cache, the per-property write locks,
/// the broadcast message stream and the supervised task scope.
pub struct SpecDevice<H> {
    weak: Weak<SpecDevice<H>>,
    driver: H,
    spec: DeviceSpec<H>,
    meta: Value,
    state: Mutex<HashMap<String, Value>>,
    write_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    messages: broadcast::Sender<DeviceMessage>,
    scope: TaskScope,
    lifecycle: Mutex<LifecycleState>,
}

impl<H: Send + Sync + 'static> SpecDevice<H> {
    /// Create a device from a spec, a driver instance and static meta.
    ///
    /// The message buffer capacity may be overridden through the
    /// `message_buffer` meta entry.
    pub fn new(spec: DeviceSpec<H>, driver: H, meta: Value) -> Arc<Self> {
        let capacity = meta
            .get("message_buffer")
            .and_then(Value::as_integer)
            .map(|value| value as usize)
            .unwrap_or(DEFAULT_MESSAGE_BUFFER)
            .max(1);
        Self::with_capacity(spec, driver, meta, capacity)
    }

    /// Create a device taking the message buffer capacity from configuration
    pub fn with_config(spec: DeviceSpec<H>, driver: H, meta: Value, config: &Config) -> Arc<Self> {
        Self::with_capacity(spec, driver, meta, config.messaging.message_buffer.max(1))
    }

    fn with_capacity(spec: DeviceSpec<H>, driver: H, meta: Value, capacity: usize) -> Arc<Self> {
        let (messages, _) = broadcast::channel(capacity);
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            driver,
            spec,
            meta,
            state: Mutex::new(HashMap::new()),
            write_locks: Mutex::new(HashMap::new()),
            scope: TaskScope::new(messages.clone()),
            messages,
            lifecycle: Mutex::new(LifecycleState::Init),
        })
    }

    /// The hardware driver instance
    pub fn driver(&self) -> &H {
        &self.driver
    }

    /// Static configuration of the device
    pub fn meta(&self) -> &Value {
        &self.meta
    }

    fn self_ref(&self) -> Result<DeviceRef<H>> {
        self.weak
            .upgrade()
            .ok_or_else(|| DeviceError::closed("Device handle dropped"))
    }

    fn state_guard(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lifecycle_guard(&self) -> MutexGuard<'_, LifecycleState> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write_lock(&self, name: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.write_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Spawn a supervised task on the device scope
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.scope.spawn(task);
    }

    /// Emit a message on the device stream
    pub fn emit(&self, message: DeviceMessage) {
        let _ = self.messages.send(message);
    }

    /// Emit a log record on the device stream
    pub fn emit_log<S: Into<String>>(&self, message: S, data: Option<Value>) {
        self.emit(DeviceMessage::log(message, data, DevicePath::empty()));
    }

    /// Install a value into the logical-state cache, broadcasting a change
    /// notification iff it differs from the cached one. Returns whether a
    /// notification was emitted.
    ///
    /// This is the entry point for virtual state: simulated or derived
    /// properties push their updates here directly.
    pub fn update_logical(&self, name: &str, value: Value) -> bool {
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
            trace!("Property {} changed", name);
            self.emit(DeviceMessage::property_changed(
                name,
                value,
                DevicePath::empty(),
            ));
        }
        changed
    }

    fn invalidate_local(&self, name: &str) {
        self.state_guard().remove(name);
    }

    async fn read_physical(&self, name: &str) -> Result<Value> {
        let spec = self
            .spec
            .property_spec(name)
            .ok_or_else(|| DeviceError::property_not_found(name))?;
        let value = (spec.read)(self.self_ref()?)
            .await?
            .ok_or_else(|| DeviceError::read_failed(name))?;
        self.update_logical(name, value.clone());
        Ok(value)
    }

    /// Read a typed property through a converter
    pub async fn read_as<T>(&self, converter: &dyn ValueConverter<T>, name: &str) -> Result<T> {
        let value = self.read_physical(name).await?;
        converter.from_value(&value).map_err(DeviceError::from)
    }

    /// Write a typed property through a converter
    pub async fn write_as<T>(
        &self,
        converter: &dyn ValueConverter<T>,
        name: &str,
        value: T,
    ) -> Result<()> {
        let value = converter.to_value(&value).map_err(DeviceError::from)?;
        self.write_value(name, value).await
    }

    /// Fire-and-forget property write performed on the device scope
    pub fn write_detached(&self, name: &str, value: Value) {
        let weak = self.weak.clone();
        let name = name.to_string();
        self.scope.spawn(async move {
            match weak.upgrade() {
                Some(device) => device.write_value(&name, value).await,
                None => Ok(()),
            }
        });
    }

    /// Cached value of a property, or a physical read when invalid
    pub async fn get_or_read(&self, name: &str) -> Result<Value> {
        match self.get_cached(name) {
            Some(value) => Ok(value),
            None => self.read_physical(name).await,
        }
    }

    fn get_cached(&self, name: &str) -> Option<Value> {
        self.state_guard().get(name).cloned()
    }

    async fn write_value(&self, name: &str, value: Value) -> Result<()> {
        // a no-op write is skipped only while the cache is valid
        if let Some(current) = self.get_cached(name) {
            if current == value {
                debug!("Skipping write of {}: value already set", name);
                return Ok(());
            }
        }

        match self.spec.property_spec(name) {
            None => {
                // no physical property with this name: pure logical update
                self.update_logical(name, value);
                Ok(())
            }
            Some(spec) if spec.is_writable() => {
                let lock = self.write_lock(name);
                let _guard = lock.lock().await;
                // readers see "unknown" rather than a stale value while the
                // write is in flight
                self.invalidate_local(name);
                match &spec.write {
                    Some(write) => (write)(self.self_ref()?, value).await?,
                    None => return Err(DeviceError::not_writable(name)),
                }
                // refresh unless the writer already set the logical state
                if self.get_cached(name).is_none() {
                    if let Some(value) = (spec.read)(self.self_ref()?).await? {
                        self.update_logical(name, value);
                    }
                }
                Ok(())
            }
            Some(_) => Err(DeviceError::not_writable(name)),
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
            self.emit(DeviceMessage::lifecycle(state, DevicePath::empty()));
        }
    }

    /// Run a callback on every change of one property, on the device scope
    pub fn on_property_change<F, Fut>(&self, property: &str, callback: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut subscription = self.messages.subscribe();
        let property = property.to_string();
        self.scope.spawn(async move {
            while let Some(value) =
                crate::device::next_property_change(&mut subscription, &property).await
            {
                callback(value).await;
            }
            Ok(())
        });
    }
}

#[async_trait::async_trait]
impl<H: Send + Sync + 'static> Device for SpecDevice<H> {
    fn meta(&self) -> &Value {
        &self.meta
    }

    fn property_descriptors(&self) -> Vec<PropertyDescriptor> {
        self.spec
            .properties
            .values()
            .map(|spec| spec.descriptor.clone())
            .collect()
    }

    fn action_descriptors(&self) -> Vec<ActionDescriptor> {
        self.spec
            .actions
            .values()
            .map(|spec| spec.descriptor.clone())
            .collect()
    }

    fn lifecycle_state(&self) -> LifecycleState {
        *self.lifecycle_guard()
    }

    fn messages(&self) -> broadcast::Receiver<DeviceMessage> {
        self.messages.subscribe()
    }

    async fn read_property(&self, name: &str) -> Result<Value> {
        self.read_physical(name).await
    }

    fn get_property(&self, name: &str) -> Option<Value> {
        self.get_cached(name)
    }

    async fn invalidate(&self, name: &str) -> Result<()> {
        self.invalidate_local(name);
        Ok(())
    }

    async fn write_property(&self, name: &str, value: Value) -> Result<()> {
        self.write_value(name, value).await
    }

    async fn execute(&self, name: &str, argument: Option<Value>) -> Result<Option<Value>> {
        let action = self
            .spec
            .action_spec(name)
            .ok_or_else(|| DeviceError::action_not_found(name))?;
        (action.execute)(self.self_ref()?, argument).await
    }

    async fn open(&self) -> Result<()> {
        {
            let lifecycle = self.lifecycle_guard();
            if matches!(*lifecycle, LifecycleState::Starting | LifecycleState::Started) {
                debug!("Device is already started");
                return Ok(());
            }
        }
        self.set_lifecycle(LifecycleState::Starting);
        if let Some(hook) = self.spec.on_open.clone() {
            if let Err(err) = hook(self.self_ref()?).await {
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
        if let Some(hook) = self.spec.on_close.clone() {
            if let Ok(device) = self.self_ref() {
                if let Err(err) = hook(device).await {
                    self.emit(DeviceMessage::error(&err, DevicePath::empty(), None));
                }
            }
        }
        self.set_lifecycle(LifecycleState::Stopped);
        self.scope.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use propbus_core::convert::FloatConverter;

    use crate::device::next_property_change;

    /// Test driver counting physical accesses
    struct Probe {
        reads: AtomicUsize,
        writes: AtomicUsize,
        value: Mutex<f64>,
    }

    impl Probe {
        fn new(value: f64) -> Self {
            Self {
                reads: AtomicUsize::new(0),
                writes: AtomicUsize::new(0),
                value: Mutex::new(value),
            }
        }
    }

    fn probe_spec() -> DeviceSpec<Probe> {
        let mut spec = DeviceSpec::new();
        spec.mutable_property(
            FloatConverter,
            "level",
            |device: DeviceRef<Probe>| async move {
                device.driver().reads.fetch_add(1, Ordering::SeqCst);
                let value = *device.driver().value.lock().unwrap();
                Ok(Some(value))
            },
            |device: DeviceRef<Probe>, value: f64| async move {
                device.driver().writes.fetch_add(1, Ordering::SeqCst);
                *device.driver().value.lock().unwrap() = value;
                Ok(())
            },
        );
        spec
    }

    fn probe_device(value: f64) -> Arc<SpecDevice<Probe>> {
        SpecDevice::new(probe_spec(), Probe::new(value), Value::empty())
    }

    #[tokio::test]
    async fn test_get_after_read_until_invalidate() {
        let device = probe_device(4.0);

        let read = device.read_property("level").await.unwrap();
        assert_eq!(read, Value::Float(4.0));
        assert_eq!(device.get_property("level"), Some(read));

        device.invalidate("level").await.unwrap();
        assert_eq!(device.get_property("level"), None);

        // the next read never short-circuits to a cached value
        device.read_property("level").await.unwrap();
        assert_eq!(device.driver().reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_meta_property_is_registered() {
        let meta = Value::Object(HashMap::from([(
            "model".to_string(),
            Value::String("probe".to_string()),
        )]));
        let device = SpecDevice::new(probe_spec(), Probe::new(0.0), meta.clone());

        let names: Vec<String> = device
            .property_descriptors()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert!(names.contains(&META_PROPERTY.to_string()));
        assert_eq!(device.read_property(META_PROPERTY).await.unwrap(), meta);
    }

    #[tokio::test]
    async fn test_unknown_property_not_found() {
        let device = probe_device(0.0);
        match device.read_property("missing").await {
            Err(DeviceError::PropertyNotFound(name)) => assert_eq!(name, "missing"),
            other => panic!("Unexpected result: {:?}", other),
        }
        assert_eq!(device.read_property_or_none("missing").await, None);
    }

    #[tokio::test]
    async fn test_all_properties_snapshot() {
        use crate::device::all_properties;

        let device = probe_device(4.0);
        device.read_property("level").await.unwrap();

        let snapshot = all_properties(&*device);
        assert_eq!(snapshot.get("level"), Some(&Value::Float(4.0)));
        // never-read properties are absent from the snapshot
        assert!(snapshot.get(META_PROPERTY).is_none());

        assert_eq!(
            device.get_or_read("level").await.unwrap(),
            Value::Float(4.0)
        );
        assert_eq!(device.driver().reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_noop_write_skips_physical_write_and_notification() {
        let device = probe_device(1.0);
        let mut subscription = device.messages();

        device
            .write_property("level", Value::Float(2.0))
            .await
            .unwrap();
        device
            .write_property("level", Value::Float(2.0))
            .await
            .unwrap();

        assert_eq!(device.driver().writes.load(Ordering::SeqCst), 1);
        assert_eq!(
            next_property_change(&mut subscription, "level").await,
            Some(Value::Float(2.0))
        );
        // no second notification pending
        assert!(matches!(
            subscription.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_write_after_invalidate_is_never_skipped() {
        let device = probe_device(1.0);
        device
            .write_property("level", Value::Float(2.0))
            .await
            .unwrap();
        device.invalidate("level").await.unwrap();
        // same value, but the stale comparison would be meaningless
        device
            .write_property("level", Value::Float(2.0))
            .await
            .unwrap();
        assert_eq!(device.driver().writes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_virtual_write_without_spec() {
        let device = probe_device(0.0);
        let mut subscription = device.messages();

        device
            .write_property("setpoint", Value::Float(7.5))
            .await
            .unwrap();

        assert_eq!(device.get_property("setpoint"), Some(Value::Float(7.5)));
        assert_eq!(device.driver().writes.load(Ordering::SeqCst), 0);
        assert_eq!(
            next_property_change(&mut subscription, "setpoint").await,
            Some(Value::Float(7.5))
        );
    }

    #[tokio::test]
    async fn test_read_only_property_rejects_write() {
        let mut spec: DeviceSpec<Probe> = DeviceSpec::new();
        spec.property(FloatConverter, "level", |device: DeviceRef<Probe>| async move {
            Ok(Some(*device.driver().value.lock().unwrap()))
        });
        let device = SpecDevice::new(spec, Probe::new(1.0), Value::empty());

        match device.write_property("level", Value::Float(2.0)).await {
            Err(DeviceError::NotWritable(name)) => assert_eq!(name, "level"),
            other => panic!("Unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_writes_are_serialized() {
        let device = probe_device(0.0);

        let first = {
            let device = device.clone();
            tokio::spawn(async move { device.write_property("level", Value::Float(1.0)).await })
        };
        let second = {
            let device = device.clone();
            tokio::spawn(async move { device.write_property("level", Value::Float(2.0)).await })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        assert_eq!(device.driver().writes.load(Ordering::SeqCst), 2);
        let final_value = device.get_property("level").unwrap();
        let physical = *device.driver().value.lock().unwrap();
        // the cache reflects whichever write completed last
        assert_eq!(final_value, Value::Float(physical));
    }

    #[tokio::test]
    async fn test_execute_unknown_action() {
        let device = probe_device(0.0);
        match device.execute("reset", None).await {
            Err(DeviceError::ActionNotFound(name)) => assert_eq!(name, "reset"),
            other => panic!("Unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_action_with_conversion() {
        let mut spec = probe_spec();
        spec.action(
            FloatConverter,
            FloatConverter,
            "scale",
            |device: DeviceRef<Probe>, factor: Option<f64>| async move {
                let factor = factor.unwrap_or(1.0);
                let value = *device.driver().value.lock().unwrap() * factor;
                Ok(Some(value))
            },
        );
        let device = SpecDevice::new(spec, Probe::new(3.0), Value::empty());

        let result = device
            .execute("scale", Some(Value::Float(2.0)))
            .await
            .unwrap();
        assert_eq!(result, Some(Value::Float(6.0)));

        // conversion failure surfaces as an error, not a panic
        let result = device
            .execute("scale", Some(Value::String("two".to_string())))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_lifecycle_transitions_and_messages() {
        let device = probe_device(0.0);
        let mut subscription = device.messages();
        assert_eq!(device.lifecycle_state(), LifecycleState::Init);

        device.open().await.unwrap();
        assert_eq!(device.lifecycle_state(), LifecycleState::Started);
        // second open is a no-op
        device.open().await.unwrap();

        let mut states = Vec::new();
        while let Ok(message) = subscription.try_recv() {
            if let DeviceMessage::Lifecycle { state, .. } = message {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![LifecycleState::Starting, LifecycleState::Started]
        );

        device.close().await;
        assert_eq!(device.lifecycle_state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_close_cancels_scope_tasks() {
        let device = probe_device(0.0);
        device.open().await.unwrap();

        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        device.spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            let _ = done_tx.send(());
            Ok(())
        });

        device.close().await;
        assert!(done_rx.await.is_err());
    }

    #[tokio::test]
    async fn test_on_property_change_callback() {
        let device = probe_device(0.0);
        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
        device.on_property_change("level", move |value| {
            let seen_tx = seen_tx.clone();
            async move {
                let _ = seen_tx.send(value);
            }
        });

        device
            .write_property("level", Value::Float(1.5))
            .await
            .unwrap();

        assert_eq!(seen_rx.recv().await, Some(Value::Float(1.5)));
    }

    #[tokio::test]
    async fn test_typed_access_helpers() {
        let device = probe_device(1.5);
        assert_eq!(
            device.read_as(&FloatConverter, "level").await.unwrap(),
            1.5
        );
        device.write_as(&FloatConverter, "level", 2.5).await.unwrap();
        assert_eq!(device.get_property("level"), Some(Value::Float(2.5)));
    }
}
