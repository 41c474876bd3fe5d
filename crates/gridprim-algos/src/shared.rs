use gridprim_runtime::backend::ProgramSource;
use gridprim_runtime::tune::TuningParameters;
use gridprim_runtime::{BaseType, DeviceProperties, ElemType, PrimitiveError};

pub(crate) const WARP_SIZE_MEM: &str = "warp_size_mem";
pub(crate) const WARP_SIZE_SCHEDULE: &str = "warp_size_schedule";

/// Enable the device extensions the element types need.
pub(crate) fn with_extensions(mut source: ProgramSource, types: &[ElemType]) -> ProgramSource {
    if types.iter().any(|elem| elem.base() == BaseType::Half) {
        source = source.define("ENABLE_KHR_FP16", 1);
    }
    if types.iter().any(|elem| elem.base() == BaseType::Double) {
        source = source.define("ENABLE_KHR_FP64", 1);
    }
    source
}

/// Record the warp sizes of the device in a set of parameters.
pub(crate) fn with_warp_sizes(
    parameters: TuningParameters,
    device: &DeviceProperties,
) -> TuningParameters {
    parameters
        .with(WARP_SIZE_MEM, device.warp_size_mem)
        .with(WARP_SIZE_SCHEDULE, device.warp_size_schedule)
}

/// Warp sizes aren't part of the device fingerprint, parameters tuned for other warp sizes
/// are rejected here.
pub(crate) fn check_warp_sizes(
    parameters: &TuningParameters,
    device: &DeviceProperties,
) -> Result<(), PrimitiveError> {
    let mem = parameters.get_usize(WARP_SIZE_MEM)?;
    let schedule = parameters.get_usize(WARP_SIZE_SCHEDULE)?;

    if mem != device.warp_size_mem || schedule != device.warp_size_schedule {
        return Err(PrimitiveError::internal(format!(
            "Parameters were tuned for warp sizes {mem}/{schedule}, the device has {}/{}",
            device.warp_size_mem, device.warp_size_schedule
        )));
    }

    Ok(())
}

/// Fail with an internal error unless `condition` holds.
pub(crate) fn ensure(
    condition: bool,
    reason: impl FnOnce() -> String,
) -> Result<(), PrimitiveError> {
    match condition {
        true => Ok(()),
        false => Err(PrimitiveError::internal(reason())),
    }
}

/// Convert a kernel argument, failing with an internal error when it doesn't fit in 32 bits.
pub(crate) fn kernel_u32(what: &str, value: usize) -> Result<u32, PrimitiveError> {
    u32::try_from(value).map_err(|_| {
        PrimitiveError::internal(format!("{what} {value} doesn't fit in a 32-bit kernel argument"))
    })
}

/// The events the next command waits for: the last enqueued command if any, the caller's
/// events otherwise.
pub(crate) fn after<'a, E>(events: &'a [E], wait_for: &'a [E]) -> &'a [E] {
    match events.last() {
        Some(last) => core::slice::from_ref(last),
        None => wait_for,
    }
}
