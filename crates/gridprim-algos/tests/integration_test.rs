mod dummy;

use dummy::{copies, cpu, elem, gpu, kernels, tuner};
use gridprim_algos::{
    Radixsort, RadixsortArgs, RadixsortProblem, Reduce, ReduceArgs, ReduceProblem, Scan,
    ScanArgs, ScanProblem, TuneTarget, tune_targets,
};
use gridprim_common::storage::MemoryStorage;
use gridprim_runtime::algorithm::{EventCallback, Resolution};
use gridprim_runtime::backend::{BufferAccess, ComputeBackend};
use gridprim_runtime::config::autotune::TuneVerbosity;
use gridprim_runtime::config::{OutputSink, SharedBuffer};
use gridprim_runtime::testing::{ArgRecord, DummyBackend, DummyCommand, DummyEvent};
use gridprim_runtime::tune::{Autotuner, CacheStore, TunePolicy};
use gridprim_runtime::{BaseType, ElemType};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[test_log::test]
fn scan_launches_the_block_reduction_only_for_many_blocks() {
    let device = gpu();
    let (tuner, storage) = tuner();
    let mut scan = Scan::new(&device, ScanProblem::new(elem(BaseType::UInt, 1)), &tuner).unwrap();

    assert_eq!(scan.resolution().unwrap().evaluated(), 32);
    assert_eq!(storage.len(), 1);

    let geometry = *scan.plan().unwrap().geometry();
    let backend = device.backend();
    let elements = 1 << 20;
    let buffer = backend
        .create_buffer(elements * 4, BufferAccess::ReadWrite)
        .unwrap();
    backend.clear_records();

    let event = scan.execute(ScanArgs::new(&buffer, elements)).unwrap();

    let blocks = elements.div_ceil(geometry.block_size(elements));
    let mut expected = Vec::new();
    if blocks > 1 {
        expected.push("reduce");
    }
    expected.extend(["scanExclusiveSmall", "scanExclusive"]);
    assert_eq!(kernels(&device), expected);
    assert_eq!(event.command(), "scanExclusive");

    let launches = backend.launches();
    let last = launches.last().unwrap();
    assert_eq!(last.global_size, geometry.scan_work_group_size * blocks);
    assert_eq!(last.args[0], ArgRecord::Buffer(buffer.id()));
    assert_eq!(last.args[3], ArgRecord::U32(elements as u32));
    assert!(launches[0].wait_for.is_empty());
    for launch in launches.iter().skip(1) {
        assert_eq!(launch.wait_for.len(), 1);
    }

    backend.clear_records();
    scan.execute(ScanArgs::new(&buffer, 100)).unwrap();
    assert_eq!(
        kernels(&device),
        vec!["scanExclusiveSmall", "scanExclusive"]
    );
}

#[test_log::test]
fn scan_offsets_select_the_small_scan_kernel() {
    let device = gpu();
    let (tuner, _) = tuner();
    let mut scan = Scan::new(&device, ScanProblem::new(elem(BaseType::UInt, 1)), &tuner).unwrap();
    let backend = device.backend();
    let buffer = backend.create_buffer(4096, BufferAccess::ReadWrite).unwrap();
    let offsets = backend.create_buffer(16, BufferAccess::ReadOnly).unwrap();

    backend.clear_records();
    scan.execute(ScanArgs::new(&buffer, 1024).with_host_offset(&7u32.to_le_bytes()))
        .unwrap();
    let small = &backend.launches()[0];
    assert_eq!(small.kernel, "scanExclusiveSmall");
    assert_eq!(small.args[1], ArgRecord::Bytes(vec![7, 0, 0, 0]));

    backend.clear_records();
    scan.execute(ScanArgs::new(&buffer, 1024).with_device_offset(&offsets, 3))
        .unwrap();
    let small = &backend.launches()[0];
    assert_eq!(small.kernel, "scanExclusiveSmallOffset");
    assert_eq!(
        &small.args[1..],
        &[ArgRecord::Buffer(offsets.id()), ArgRecord::U32(3)]
    );

    backend.clear_records();
    scan.execute(ScanArgs::new(&buffer, 1024)).unwrap();
    assert_eq!(backend.launches()[0].args[1], ArgRecord::Bytes(vec![0; 4]));
}

#[test_log::test]
fn invalid_scan_arguments_enqueue_nothing() {
    let device = gpu();
    let (tuner, _) = tuner();
    let mut scan = Scan::new(&device, ScanProblem::new(elem(BaseType::Int, 2)), &tuner).unwrap();
    let backend = device.backend();
    let buffer = backend.create_buffer(800, BufferAccess::ReadWrite).unwrap();
    let read_only = backend.create_buffer(800, BufferAccess::ReadOnly).unwrap();
    let offsets = backend.create_buffer(16, BufferAccess::ReadOnly).unwrap();
    backend.clear_records();

    let errors = [
        scan.execute(ScanArgs::new(&buffer, 0)),
        scan.execute(ScanArgs::new(&buffer, 101)),
        scan.execute(ScanArgs::new(&read_only, 100)),
        scan.execute(ScanArgs::new(&buffer, 100).with_host_offset(&[0; 4])),
        scan.execute(ScanArgs::new(&buffer, 100).with_device_offset(&offsets, 2)),
    ];

    for error in errors {
        assert!(error.unwrap_err().is_internal());
    }
    assert_eq!(backend.launch_count(), 0);

    scan.execute(ScanArgs::new(&buffer, 100).with_device_offset(&offsets, 1))
        .unwrap();
}

#[test_log::test]
fn scan_arguments_beyond_32_bits_are_rejected() {
    let device = gpu();
    let (tuner, _) = tuner();
    let mut scan = Scan::new(&device, ScanProblem::new(elem(BaseType::Int, 2)), &tuner).unwrap();
    let backend = device.backend();
    let huge = (u32::MAX as usize + 1) * 8;
    let buffer = backend.create_buffer(huge, BufferAccess::ReadWrite).unwrap();
    let offsets = backend.create_buffer(huge + 8, BufferAccess::ReadOnly).unwrap();
    backend.clear_records();

    let errors = [
        scan.execute(ScanArgs::new(&buffer, 100).with_device_offset(&offsets, usize::MAX)),
        scan.execute(ScanArgs::new(&buffer, 100).with_device_offset(&offsets, 1 << 32)),
        scan.execute(ScanArgs::new(&buffer, 1 << 32)),
    ];

    for error in errors {
        assert!(error.unwrap_err().is_internal());
    }
    assert_eq!(backend.launch_count(), 0);
}

#[test_log::test]
fn signed_and_unsigned_scans_share_the_tuned_parameters() {
    let device = gpu();
    let (tuner, storage) = tuner();
    let first = Scan::new(&device, ScanProblem::new(elem(BaseType::UShort, 4)), &tuner).unwrap();
    device.backend().clear_records();

    let second = Scan::new(&device, ScanProblem::new(elem(BaseType::Short, 4)), &tuner).unwrap();

    assert!(matches!(
        second.resolution().unwrap(),
        Resolution::Cached { .. }
    ));
    assert_eq!(second.parameters().unwrap(), first.parameters().unwrap());
    assert_eq!(storage.len(), 1);
    assert_eq!(device.backend().launch_count(), 0);
    assert_eq!(device.backend().programs_built(), 1);
}

#[test_log::test]
fn scan_runs_on_a_cpu_device() {
    let device = cpu();
    let (tuner, _) = tuner();
    let mut scan = Scan::new(&device, ScanProblem::new(elem(BaseType::ULong, 1)), &tuner).unwrap();
    let buffer = device
        .backend()
        .create_buffer(8 * 1000, BufferAccess::ReadWrite)
        .unwrap();

    let event = scan.execute(ScanArgs::new(&buffer, 1000)).unwrap();

    assert_eq!(event.command(), "scanExclusive");
    assert_eq!(
        scan.details().unwrap().get("elem").map(String::as_str),
        Some("ulong")
    );
}

#[test_log::test]
fn scan_callback_runs_once_per_execution() {
    let device = gpu();
    let (tuner, _) = tuner();
    let mut scan = Scan::new(&device, ScanProblem::new(elem(BaseType::UInt, 1)), &tuner).unwrap();
    let buffer = device
        .backend()
        .create_buffer(4 * 1024, BufferAccess::ReadWrite)
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let last = Arc::new(AtomicU64::new(0));
    let (calls_cb, last_cb) = (calls.clone(), last.clone());
    scan.set_event_callback(EventCallback::new(move |event: &DummyEvent| {
        calls_cb.fetch_add(1, Ordering::SeqCst);
        last_cb.store(event.id(), Ordering::SeqCst);
    }))
    .unwrap();

    let first = scan.execute(ScanArgs::new(&buffer, 1024)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(last.load(Ordering::SeqCst), first.id());

    let second = scan.execute(ScanArgs::new(&buffer, 512)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(last.load(Ordering::SeqCst), second.id());

    assert!(scan.execute(ScanArgs::new(&buffer, 0)).is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    scan.clear_event_callback().unwrap();
    scan.execute(ScanArgs::new(&buffer, 1024)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test_log::test]
fn reduce_writes_into_a_buffer_or_reads_back_to_the_host() {
    let device = gpu();
    let (tuner, _) = tuner();
    let mut reduce = Reduce::new(
        &device,
        ReduceProblem::new(elem(BaseType::Float, 1)),
        &tuner,
    )
    .unwrap();
    assert_eq!(reduce.resolution().unwrap().evaluated(), 25);

    let backend = device.backend();
    let input = backend.create_buffer(4 * 10_000, BufferAccess::ReadOnly).unwrap();
    let output = backend.create_buffer(4 * 4, BufferAccess::WriteOnly).unwrap();
    let plan_blocks = reduce.plan().unwrap().blocks();
    let work_group_size = reduce.plan().unwrap().work_group_size();
    backend.clear_records();

    let event = reduce
        .execute(ReduceArgs::to_buffer(&input, 10, 9_000, &output, 3))
        .unwrap();
    assert_eq!(event.command(), "reduce");
    let launch = &backend.launches()[0];
    assert_eq!(launch.global_size, work_group_size * plan_blocks);
    assert_eq!(launch.args[1], ArgRecord::Buffer(output.id()));
    assert_eq!(launch.args[2], ArgRecord::U32(3));
    assert_eq!(launch.args[3], ArgRecord::Buffer(input.id()));
    assert_eq!(launch.args[4], ArgRecord::U32(10));
    assert_eq!(launch.args[5], ArgRecord::U32(9_000));

    backend.clear_records();
    let mut out = [0xffu8; 4];
    let event = reduce
        .execute(ReduceArgs::to_host(&input, 0, 10_000, &mut out))
        .unwrap();
    assert_eq!(event.command(), "read");
    assert_eq!(out, [0; 4]);
    let commands = backend.commands();
    assert_eq!(commands.len(), 2);
    assert!(matches!(
        &commands[1],
        DummyCommand::Read { offset, len: 4, .. } if *offset == plan_blocks * 4
    ));
}

#[test_log::test]
fn invalid_reduce_arguments_enqueue_nothing() {
    let device = gpu();
    let (tuner, _) = tuner();
    let mut reduce =
        Reduce::new(&device, ReduceProblem::new(elem(BaseType::Int, 4)), &tuner).unwrap();
    let backend = device.backend();
    let input = backend.create_buffer(16 * 100, BufferAccess::ReadOnly).unwrap();
    let output = backend.create_buffer(16 * 2, BufferAccess::ReadWrite).unwrap();
    let read_only = backend.create_buffer(16 * 2, BufferAccess::ReadOnly).unwrap();
    backend.clear_records();

    let mut short = [0u8; 4];
    let errors = [
        reduce.execute(ReduceArgs::to_buffer(&input, 50, 51, &output, 0)),
        reduce.execute(ReduceArgs::to_buffer(&input, 0, 100, &output, 2)),
        reduce.execute(ReduceArgs::to_buffer(&input, 0, 100, &read_only, 0)),
        reduce.execute(ReduceArgs::to_host(&input, 0, 100, &mut short)),
    ];

    for error in errors {
        assert!(error.unwrap_err().is_internal());
    }
    assert!(backend.commands().is_empty());
}

#[test_log::test]
fn reduce_ranges_beyond_32_bits_are_rejected() {
    let device = gpu();
    let (tuner, _) = tuner();
    let mut reduce =
        Reduce::new(&device, ReduceProblem::new(elem(BaseType::Int, 1)), &tuner).unwrap();
    let backend = device.backend();
    let huge = (u32::MAX as usize + 16) * 4;
    let input = backend.create_buffer(huge, BufferAccess::ReadOnly).unwrap();
    let output = backend.create_buffer(huge, BufferAccess::ReadWrite).unwrap();
    backend.clear_records();

    let mut host = [0u8; 4];
    let errors = [
        reduce.execute(ReduceArgs::to_buffer(&input, 1 << 32, 4, &output, 0)),
        reduce.execute(ReduceArgs::to_buffer(&input, 0, 100, &output, 1 << 32)),
        reduce.execute(ReduceArgs::to_host(&input, 0, 1 << 32, &mut host)),
    ];

    for error in errors {
        assert!(error.unwrap_err().is_internal());
    }
    assert!(backend.commands().is_empty());
}

#[test_log::test]
fn radixsort_on_all_key_bits_ends_in_the_key_buffer() {
    let device = gpu();
    let (tuner, _) = tuner();
    let mut sort = Radixsort::new(
        &device,
        RadixsortProblem::keys_only(elem(BaseType::UInt, 1)),
        &tuner,
    )
    .unwrap();
    let backend = device.backend();
    let keys = backend.create_buffer(4 * 1000, BufferAccess::ReadWrite).unwrap();
    backend.clear_records();

    let event = sort.execute(RadixsortArgs::new(&keys, 1000)).unwrap();

    let passes = 32 / sort.plan().unwrap().geometry().radix_bits;
    let expected: Vec<_> = (0..passes)
        .flat_map(|_| ["radixsortReduce", "radixsortScan", "radixsortScatter"])
        .collect();
    assert_eq!(kernels(&device), expected);
    assert_eq!(event.command(), "radixsortScatter");
    assert!(copies(&device).is_empty());

    let radix_bits = sort.plan().unwrap().geometry().radix_bits as u32;
    let launches = backend.launches();
    assert_eq!(launches[0].args[1], ArgRecord::Buffer(keys.id()));
    assert_eq!(launches[2].args[1], ArgRecord::Buffer(keys.id()));
    assert_eq!(launches[3].args[4], ArgRecord::U32(radix_bits));
    assert_eq!(
        launches.last().unwrap().args[0],
        ArgRecord::Buffer(keys.id())
    );
}

#[test_log::test]
fn radixsort_with_an_odd_number_of_passes_copies_back() {
    let device = gpu();
    let (tuner, _) = tuner();
    let uint = elem(BaseType::UInt, 1);
    let mut sort =
        Radixsort::new(&device, RadixsortProblem::new(uint, uint), &tuner).unwrap();
    let radix_bits = sort.plan().unwrap().geometry().radix_bits as u32;
    let backend = device.backend();
    let keys = backend.create_buffer(4 * 1000, BufferAccess::ReadWrite).unwrap();
    let values = backend.create_buffer(4 * 1000, BufferAccess::ReadWrite).unwrap();
    backend.clear_records();

    let event = sort
        .execute(
            RadixsortArgs::new(&keys, 1000)
                .with_values(&values)
                .with_max_bits(radix_bits),
        )
        .unwrap();

    assert_eq!(
        kernels(&device),
        vec!["radixsortReduce", "radixsortScan", "radixsortScatter"]
    );
    assert_eq!(backend.launches()[2].args.len(), 8);
    assert_eq!(event.command(), "copy");
    let copies = copies(&device);
    assert_eq!(copies.len(), 2);
    assert_eq!((copies[0].1, copies[0].2), (keys.id(), 4000));
    assert_eq!((copies[1].1, copies[1].2), (values.id(), 4000));
}

#[test_log::test]
fn radixsort_reuses_large_enough_temporary_buffers() {
    let device = gpu();
    let (tuner, _) = tuner();
    let mut sort = Radixsort::new(
        &device,
        RadixsortProblem::keys_only(elem(BaseType::UShort, 1)),
        &tuner,
    )
    .unwrap();
    let radix_bits = sort.plan().unwrap().geometry().radix_bits as u32;
    let backend = device.backend();
    let keys = backend.create_buffer(2 * 1000, BufferAccess::ReadWrite).unwrap();
    let temporary = backend.create_buffer(2 * 1000, BufferAccess::ReadWrite).unwrap();
    sort.plan_mut()
        .unwrap()
        .set_temporary_buffers(Some(temporary.clone()), None);
    backend.clear_records();

    sort.execute(RadixsortArgs::new(&keys, 1000).with_max_bits(radix_bits))
        .unwrap();
    assert_eq!(backend.buffers_created(), 0);
    assert_eq!(copies(&device), vec![(temporary.id(), keys.id(), 2000)]);

    backend.clear_records();
    let larger = backend.create_buffer(2 * 2000, BufferAccess::ReadWrite).unwrap();
    sort.execute(RadixsortArgs::new(&larger, 2000)).unwrap();
    assert_eq!(backend.buffers_created(), 2);
}

#[test_log::test]
fn invalid_radixsort_arguments_are_internal_errors() {
    let device = gpu();
    let (tuner, _) = tuner();
    let uint = elem(BaseType::UInt, 1);
    let mut keys_only = Radixsort::new(&device, RadixsortProblem::keys_only(uint), &tuner).unwrap();
    let mut with_values =
        Radixsort::new(&device, RadixsortProblem::new(uint, uint), &tuner).unwrap();
    let backend = device.backend();
    let keys = backend.create_buffer(4 * 100, BufferAccess::ReadWrite).unwrap();
    let values = backend.create_buffer(4 * 100, BufferAccess::ReadWrite).unwrap();
    let read_only = backend.create_buffer(4 * 100, BufferAccess::ReadOnly).unwrap();
    backend.clear_records();

    let errors = [
        keys_only.execute(RadixsortArgs::new(&keys, 100).with_max_bits(33)),
        keys_only.execute(RadixsortArgs::new(&keys, 100).with_values(&values)),
        keys_only.execute(RadixsortArgs::new(&keys, 101)),
        keys_only.execute(RadixsortArgs::new(&keys, 0)),
        keys_only.execute(RadixsortArgs::new(&read_only, 100)),
        with_values.execute(RadixsortArgs::new(&keys, 100)),
        with_values.execute(RadixsortArgs::new(&keys, 100).with_values(&read_only)),
    ];

    for error in errors {
        assert!(error.unwrap_err().is_internal());
    }
    assert!(backend.commands().is_empty());
}

#[test_log::test]
fn tuning_progress_goes_to_the_configured_output() {
    let device = gpu();
    let output = SharedBuffer::new();
    let tuner = Autotuner::new(
        CacheStore::in_memory(),
        TunePolicy::silent()
            .with_verbosity(TuneVerbosity::Terse)
            .with_output(OutputSink::Buffer(output.clone())),
    );

    Scan::new(&device, ScanProblem::new(elem(BaseType::UInt, 1)), &tuner).unwrap();
    assert_eq!(
        output.contents().lines().collect::<Vec<_>>(),
        vec!["Tuning scan on Dummy GPU"]
    );

    Scan::new(&device, ScanProblem::new(elem(BaseType::Int, 1)), &tuner).unwrap();
    assert_eq!(output.contents().lines().count(), 1);
}

#[test_log::test]
fn disabled_tuning_only_uses_the_cache() {
    let device = gpu();
    let storage = Arc::new(MemoryStorage::new());
    let cache = CacheStore::from_storage(storage.clone());
    let disabled = Autotuner::new(cache.clone(), TunePolicy::silent().with_enabled(false));
    let problem = ReduceProblem::new(elem(BaseType::Double, 2));

    assert!(Reduce::new(&device, problem, &disabled).is_err());
    assert!(storage.is_empty());

    let enabled = Autotuner::new(cache, TunePolicy::silent());
    Reduce::new(&device, problem, &enabled).unwrap();

    let cached = Reduce::new(&device, problem, &disabled).unwrap();
    assert!(matches!(
        cached.resolution().unwrap(),
        Resolution::Cached { .. }
    ));
}

#[test_log::test]
fn every_supported_problem_is_a_target_once() {
    let properties = DummyBackend::gpu().properties();
    let targets = TuneTarget::all::<DummyBackend>(&properties);
    let count = |algorithm: &str| {
        targets
            .iter()
            .filter(|target| target.algorithm() == algorithm)
            .count()
    };

    assert_eq!(count("scan"), 24);
    assert_eq!(count("reduce"), 42);
    assert_eq!(count("radixsort"), 36);
    assert!(targets.contains(&TuneTarget::Radixsort(RadixsortProblem::keys_only(elem(
        BaseType::ULong,
        1
    )))));
    assert!(!targets.contains(&TuneTarget::Scan(ScanProblem::new(elem(
        BaseType::Float,
        1
    )))));
}

#[test_log::test]
fn tune_targets_reports_each_problem() {
    let device = gpu();
    let (tuner, storage) = tuner();
    let targets = [
        TuneTarget::Scan(ScanProblem::new(elem(BaseType::UInt, 1))),
        TuneTarget::Scan(ScanProblem::new(elem(BaseType::Int, 1))),
        TuneTarget::Scan(ScanProblem::new(elem(BaseType::Float, 1))),
        TuneTarget::Reduce(ReduceProblem::new(elem(BaseType::Float, 1))),
    ];

    let report = tune_targets(&device, &tuner, &targets);

    assert_eq!(
        (report.tuned(), report.cached(), report.failed()),
        (2, 1, 1)
    );
    assert_eq!(storage.len(), 2);
    let display = report.to_string();
    assert!(display.starts_with(
        "scan uint: tuned over 32 candidates\nscan int: cached\nscan float: failed ("
    ));
    assert!(display.contains("\nreduce float: tuned over 25 candidates\n"));
    assert!(display.ends_with("\n2 tuned, 1 cached, 1 failed"));

    let again = tune_targets(&device, &tuner, &targets);
    assert_eq!((again.tuned(), again.cached(), again.failed()), (0, 3, 1));
}

#[test_log::test]
fn vec3_problems_use_padded_buffers() {
    let device = gpu();
    let (tuner, _) = tuner();
    let float3 = ElemType::new(BaseType::Float, 3).unwrap();
    let mut reduce = Reduce::new(&device, ReduceProblem::new(float3), &tuner).unwrap();
    let backend = device.backend();
    let input = backend.create_buffer(16 * 10, BufferAccess::ReadOnly).unwrap();
    let mut out = [0u8; 16];

    reduce
        .execute(ReduceArgs::to_host(&input, 0, 10, &mut out))
        .unwrap();
    assert!(reduce
        .execute(ReduceArgs::to_host(&input, 0, 11, &mut out))
        .unwrap_err()
        .is_internal());
}
