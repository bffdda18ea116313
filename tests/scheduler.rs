//! End-to-end scheduler scenarios over the real CPU device.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rstest::rstest;

use cadence::{ComputeFn, DagScheduler, DeviceId, DeviceManager, FnCompute, Shape};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn scheduler_with_devices(count: u64) -> DagScheduler {
    DagScheduler::new(DeviceManager::with_cpu_devices(count), DeviceId(0))
}

fn ones() -> Arc<dyn ComputeFn> {
    Arc::new(FnCompute::new(
        "ones",
        |_inputs: &[&[f32]], outputs: &mut [Vec<f32>]| {
            for out in outputs.iter_mut() {
                out.fill(1.0);
            }
            Ok(())
        },
    ))
}

fn slow_ones(delay: Duration) -> Arc<dyn ComputeFn> {
    Arc::new(FnCompute::new(
        "slow_ones",
        move |_inputs: &[&[f32]], outputs: &mut [Vec<f32>]| {
            thread::sleep(delay);
            for out in outputs.iter_mut() {
                out.fill(1.0);
            }
            Ok(())
        },
    ))
}

fn add() -> Arc<dyn ComputeFn> {
    Arc::new(FnCompute::new(
        "add",
        |inputs: &[&[f32]], outputs: &mut [Vec<f32>]| {
            for (i, slot) in outputs[0].iter_mut().enumerate() {
                *slot = inputs.iter().map(|input| input[i]).sum();
            }
            Ok(())
        },
    ))
}

fn increment() -> Arc<dyn ComputeFn> {
    Arc::new(FnCompute::new(
        "increment",
        |inputs: &[&[f32]], outputs: &mut [Vec<f32>]| {
            for (i, slot) in outputs[0].iter_mut().enumerate() {
                *slot = inputs[0][i] + 1.0;
            }
            Ok(())
        },
    ))
}

fn identity() -> Arc<dyn ComputeFn> {
    Arc::new(FnCompute::new(
        "identity",
        |inputs: &[&[f32]], outputs: &mut [Vec<f32>]| {
            outputs[0].copy_from_slice(inputs[0]);
            Ok(())
        },
    ))
}

#[test]
fn test_ones_roundtrip_then_empty_dag() {
    init_logs();
    let scheduler = scheduler_with_devices(1);

    let a = scheduler.create(&[], &[Shape::new([4])], ones()).remove(0);
    scheduler.wait(&a);
    assert_eq!(scheduler.get_value(&a).unwrap(), vec![1.0; 4]);

    drop(a);
    assert_eq!(scheduler.node_count(), 0);
    assert_eq!(scheduler.pending_count(), 0);
}

#[test]
fn test_add_with_params_dropped_before_wait() {
    init_logs();
    let scheduler = scheduler_with_devices(1);
    let shape = Shape::new([4]);

    let a = scheduler.create(&[], &[shape.clone()], ones()).remove(0);
    let b = scheduler.create(&[], &[shape.clone()], ones()).remove(0);
    let c = scheduler.create(&[&a, &b], &[shape], add()).remove(0);
    drop(a);
    drop(b);

    scheduler.wait(&c);
    assert_eq!(scheduler.get_value(&c).unwrap(), vec![2.0; 4]);
    // The params died with their last consumer; only c is left.
    assert_eq!(scheduler.node_count(), 1);

    drop(c);
    assert_eq!(scheduler.node_count(), 0);
}

#[rstest]
#[case(10)]
#[case(100)]
fn test_chain_reclaims_everything_upstream(#[case] n: usize) {
    init_logs();
    let scheduler = scheduler_with_devices(1);
    let shape = Shape::new([8]);

    let mut current = scheduler.create(&[], &[shape.clone()], ones()).remove(0);
    for _ in 1..n {
        current = scheduler
            .create(&[&current], &[shape.clone()], increment())
            .remove(0);
    }
    scheduler.wait(&current);

    assert_eq!(scheduler.get_value(&current).unwrap(), vec![n as f32; 8]);
    // Only the externally held tail survives.
    assert_eq!(scheduler.node_count(), 1);

    drop(current);
    assert_eq!(scheduler.node_count(), 0);
}

#[test]
fn test_concurrent_chains_drain_to_empty() {
    init_logs();
    let scheduler = scheduler_with_devices(1);
    let shape = Shape::new([8]);

    thread::scope(|s| {
        for _ in 0..2 {
            s.spawn(|| {
                let mut current = scheduler.create(&[], &[shape.clone()], ones()).remove(0);
                for _ in 1..10 {
                    current = scheduler
                        .create(&[&current], &[shape.clone()], increment())
                        .remove(0);
                }
            });
        }
    });

    scheduler.wait_for_all();
    assert_eq!(scheduler.node_count(), 0);
    assert_eq!(scheduler.pending_count(), 0);
}

#[test]
fn test_results_dropped_before_completion_are_reclaimed() {
    init_logs();
    let scheduler = scheduler_with_devices(1);

    let results = scheduler.create(
        &[],
        &[Shape::new([4]), Shape::new([2, 2])],
        slow_ones(Duration::from_millis(200)),
    );
    drop(results);

    scheduler.wait_for_all();
    assert_eq!(scheduler.node_count(), 0);
    assert_eq!(scheduler.pending_count(), 0);
}

#[test]
fn test_fan_out_source_outlives_consumers() {
    init_logs();
    let scheduler = scheduler_with_devices(1);
    let shape = Shape::new([4]);

    let a = scheduler.create(&[], &[shape.clone()], ones()).remove(0);
    let b = scheduler.create(&[&a], &[shape.clone()], increment()).remove(0);
    let c = scheduler.create(&[&a], &[shape], increment()).remove(0);
    scheduler.wait(&b);
    scheduler.wait(&c);

    assert_eq!(scheduler.get_value(&b).unwrap(), vec![2.0; 4]);
    assert_eq!(scheduler.get_value(&c).unwrap(), vec![2.0; 4]);
    // a survives on its external handle alone.
    assert_eq!(scheduler.node_count(), 3);

    drop(a);
    assert_eq!(scheduler.node_count(), 2);
    drop(b);
    drop(c);
    assert_eq!(scheduler.node_count(), 0);
}

#[test]
fn test_unread_outputs_are_reclaimed() {
    init_logs();
    let scheduler = scheduler_with_devices(1);

    let results = scheduler.create(&[], &[Shape::new([4]), Shape::new([4])], ones());
    drop(results);
    scheduler.wait_for_all();

    assert_eq!(scheduler.node_count(), 0);
}

#[test]
fn test_extern_updates_on_ready_nodes_change_nothing() {
    init_logs();
    let scheduler = scheduler_with_devices(1);

    let a = scheduler
        .create(&[], &[Shape::new([4])], slow_ones(Duration::from_millis(200)))
        .remove(0);
    let before = scheduler.node_count();

    // Clone/drop cycles on a node still in flight must leave the DAG as is.
    for _ in 0..3 {
        let clone = a.clone();
        drop(clone);
    }
    assert_eq!(scheduler.node_count(), before);

    scheduler.wait(&a);
    assert_eq!(scheduler.get_value(&a).unwrap(), vec![1.0; 4]);
}

#[test]
fn test_identity_round_trip() {
    init_logs();
    let scheduler = scheduler_with_devices(1);
    let shape = Shape::new([2, 3]);

    let a = scheduler.create(&[], &[shape.clone()], ones()).remove(0);
    let b = scheduler.create(&[&a], &[shape.clone()], identity()).remove(0);
    scheduler.wait(&b);

    assert_eq!(scheduler.get_value(&b).unwrap(), vec![1.0; 6]);
    assert_eq!(b.shape(), &shape);
}

#[test]
fn test_wait_is_reentrant_after_completion() {
    init_logs();
    let scheduler = scheduler_with_devices(1);

    let a = scheduler.create(&[], &[Shape::new([1])], ones()).remove(0);
    scheduler.wait(&a);
    scheduler.wait(&a);
    scheduler.wait_for_all();
}

#[test]
fn test_create_on_explicit_device() {
    init_logs();
    let scheduler = scheduler_with_devices(2);

    let a = scheduler
        .create_on(DeviceId(1), &[], &[Shape::new([4])], ones())
        .remove(0);
    scheduler.wait(&a);
    assert_eq!(scheduler.get_value(&a).unwrap(), vec![1.0; 4]);
}

#[test]
#[should_panic(expected = "holds no data")]
fn test_zero_sized_result_is_rejected() {
    let scheduler = scheduler_with_devices(1);
    scheduler.create(&[], &[Shape::new([4, 0])], ones());
}

#[test]
#[should_panic(expected = "at least one result")]
fn test_resultless_op_is_rejected() {
    let scheduler = scheduler_with_devices(1);
    scheduler.create(&[], &[], ones());
}

#[test]
#[should_panic(expected = "no device #7 registered")]
fn test_unknown_device_is_rejected() {
    let scheduler = scheduler_with_devices(1);
    scheduler.create_on(DeviceId(7), &[], &[Shape::new([1])], ones());
}
