use gridprim_common::storage::MemoryStorage;
use gridprim_runtime::testing::{DummyBackend, DummyCommand, LaunchRecord};
use gridprim_runtime::tune::{Autotuner, CacheStore, TunePolicy};
use gridprim_runtime::{BaseType, ComputeDevice, ElemType};
use std::sync::Arc;

pub fn gpu() -> ComputeDevice<DummyBackend> {
    ComputeDevice::new(DummyBackend::gpu())
}

pub fn cpu() -> ComputeDevice<DummyBackend> {
    ComputeDevice::new(DummyBackend::cpu())
}

/// A tuner over a fresh in-memory cache, printing nothing.
pub fn tuner() -> (Autotuner, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let tuner = Autotuner::new(
        CacheStore::from_storage(storage.clone()),
        TunePolicy::silent(),
    );

    (tuner, storage)
}

pub fn elem(base: BaseType, length: u32) -> ElemType {
    ElemType::new(base, length).unwrap()
}

pub fn kernels(device: &ComputeDevice<DummyBackend>) -> Vec<&'static str> {
    device
        .backend()
        .launches()
        .iter()
        .map(|launch: &LaunchRecord| launch.kernel)
        .collect()
}

pub fn copies(device: &ComputeDevice<DummyBackend>) -> Vec<(u64, u64, usize)> {
    device
        .backend()
        .commands()
        .into_iter()
        .filter_map(|command| match command {
            DummyCommand::Copy { src, dst, size } => Some((src, dst, size)),
            _ => None,
        })
        .collect()
}
