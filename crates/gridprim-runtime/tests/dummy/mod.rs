use gridprim_runtime::{DeviceFeature, DeviceKind, DeviceProperties};
use gridprim_runtime::tune::{CandidateSpace, TuningParameters};
use std::path::PathBuf;

pub fn properties() -> DeviceProperties {
    DeviceProperties {
        name: "Integration GPU".into(),
        vendor: "gridprim".into(),
        vendor_id: 0x1d1f,
        platform_name: "Integration Platform".into(),
        driver_version: "2.1.0".into(),
        kind: DeviceKind::Gpu,
        compute_units: 8,
        max_work_group_size: 512,
        local_mem_size: 48 * 1024,
        warp_size_mem: 32,
        warp_size_schedule: 32,
        features: [DeviceFeature::Fp64].into_iter().collect(),
    }
}

/// Work group sizes from 1 to `max`, staged after a fixed block count.
pub fn space(max: usize) -> CandidateSpace {
    let base = TuningParameters::new()
        .with("work_group_size", 1usize)
        .with("blocks", 64usize);
    let mut sizes = Vec::new();
    let mut size = 1;
    while size <= max {
        sizes.push(TuningParameters::new().with("work_group_size", size));
        size *= 2;
    }

    CandidateSpace::new(base).with_stage(sizes)
}

/// Pretend cost, fastest at a work group size of 64.
pub fn cost(parameters: &TuningParameters) -> Result<f64, String> {
    let size = parameters
        .get_usize("work_group_size")
        .map_err(|err| err.to_string())?;

    Ok((size as f64 - 64.0).abs() + 1.0)
}

pub fn temp_root(name: &str) -> PathBuf {
    let suffix: u64 = rand::random();
    std::env::temp_dir().join(format!("gridprim-it-{name}-{suffix:016x}"))
}
