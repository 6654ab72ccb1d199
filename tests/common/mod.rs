#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use gattq::prelude::*;
use gattq::simulated::SimPeripheral;
use uuid::Uuid;

pub const RX_HANDLE: u16 = 0x0010;
pub const TX_HANDLE: u16 = 0x0012;
pub const INFO_HANDLE: u16 = 0x0014;
pub const CCCD_HANDLE: u16 = 0x0013;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Writable characteristic the peer echoes back on [`TX_HANDLE`].
pub fn rx() -> Attribute {
    Attribute::characteristic(
        RX_HANDLE,
        Uuid::nil(),
        Properties::WRITE | Properties::WRITE_WITHOUT_RESPONSE,
    )
}

pub fn tx() -> Attribute {
    Attribute::characteristic(
        TX_HANDLE,
        Uuid::nil(),
        Properties::NOTIFY | Properties::INDICATE,
    )
}

pub fn info() -> Attribute {
    Attribute::characteristic(INFO_HANDLE, Uuid::nil(), Properties::READ)
}

pub fn cccd() -> Attribute {
    Attribute::descriptor(CCCD_HANDLE, Uuid::nil())
}

pub fn spawn(peripheral: &SimPeripheral) -> GattClient {
    spawn_with(peripheral, GattConfig::default())
}

pub fn spawn_with(peripheral: &SimPeripheral, config: GattConfig) -> GattClient {
    init_logging();
    GattClient::spawn(peripheral.driver(), config).unwrap()
}

pub async fn connected(peripheral: &SimPeripheral) -> GattClient {
    let client = spawn(peripheral);
    client
        .execute(ConnectOperation::new(peripheral.peer()))
        .await
        .unwrap();
    client
}

/// Counts how often a callback ran.
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Records values handed to callbacks.
#[derive(Clone)]
pub struct Recorder<T>(Arc<Mutex<Vec<T>>>);

impl<T: Clone> Recorder<T> {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn push(&self, value: T) {
        self.0.lock().unwrap().push(value);
    }

    pub fn take(&self) -> Vec<T> {
        self.0.lock().unwrap().clone()
    }
}
