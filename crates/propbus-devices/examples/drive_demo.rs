//! End-to-end demo: a virtual drive inside a hub tree, driven both
//! locally and through the message protocol by a remote client.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};

use propbus_core::types::{DevicePath, Value};
use propbus_devices::devices::virtual_drive;
use propbus_devices::{serve, Device, Hub, RemoteDevice};

#[tokio::main]
async fn main() -> Result<()> {
    propbus_core::logging::init_with_filter("debug")?;

    // build the device tree: rig/drive
    let root = Hub::new(Value::empty());
    let rig = root.get_or_create_group(&DevicePath::parse("rig")?)?;
    let meta = Value::Object(HashMap::from([
        ("mass".to_string(), Value::Float(2.0)),
        ("tick_ms".to_string(), Value::Integer(20)),
    ]));
    rig.install("drive", virtual_drive(meta))?;
    root.open().await?;

    // expose the tree over an in-process transport
    let (request_tx, request_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = broadcast::channel(256);
    let server = serve(root.clone(), request_rx, event_tx);

    // drive it remotely
    let drive = RemoteDevice::new(DevicePath::parse("rig/drive")?, event_rx, request_tx);
    drive.open().await?;

    drive
        .write_property("force", Value::Float(2.5))
        .await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let position = drive.read_property("position").await?;
    let velocity = drive.read_property("velocity").await?;
    println!("after 200ms under force 2.5: position={:?} velocity={:?}", position, velocity);

    drive.execute("reset", None).await?;
    let position = drive.read_property("position").await?;
    println!("after reset: position={:?}", position);

    drive.close().await;
    Device::close(&*root).await;
    server.abort();
    Ok(())
}
