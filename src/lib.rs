//! Cadence: the dataflow scheduling core of a tensor-computation runtime.
//!
//! Clients submit compute requests that produce output arrays from input
//! arrays. Cadence grows a bipartite DAG of data and op nodes, dispatches
//! ops to per-device execution engines the moment their inputs are ready,
//! and reclaims the memory behind an array as soon as no consumer and no
//! client handle can reach it.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use cadence::{DagScheduler, DeviceId, DeviceManager, FnCompute, Shape};
//!
//! let dm = DeviceManager::with_cpu_devices(1);
//! let scheduler = DagScheduler::new(dm, DeviceId(0));
//!
//! let ones = Arc::new(FnCompute::new(
//!     "ones",
//!     |_inputs: &[&[f32]], outputs: &mut [Vec<f32>]| {
//!         outputs[0].fill(1.0);
//!         Ok(())
//!     },
//! ));
//! let result = scheduler.create(&[], &[Shape::new([4])], ones);
//! scheduler.wait(&result[0]);
//! assert_eq!(scheduler.get_value(&result[0]).unwrap(), vec![1.0; 4]);
//! ```

pub mod compute;
pub mod dag;
pub mod device;
pub mod handle;
pub mod scheduler;
pub mod shape;
pub mod task;

pub use compute::{ComputeFn, FnCompute};
pub use dag::{DataId, DeviceId, NodeId, PhysicalData};
pub use device::{CpuDevice, DataStorage, Device, DeviceError, DeviceListener, DeviceManager};
pub use handle::ArrayRef;
pub use scheduler::DagScheduler;
pub use shape::Shape;
pub use task::{Task, TaskData, TaskOp};
