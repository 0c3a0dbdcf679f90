//! End-to-end runs against a real OpenCL device. Every test returns early
//! with a note when the machine has no usable platform.

use clpipe::{
    add::{ramp_inputs, vec_add_device, VEC_ADD_ENTRY, VEC_ADD_SOURCE},
    rotate::{rotate_device, rotate_host, rotate_pipeline, ROTATE_ENTRY, ROTATE_SOURCE},
    Access, Angle, ClError, DeviceClass, ErrorKind, Grid, KernelArg, Pipeline, PlatformSelector,
    ResourceKind, ResourceTracker, Session, SessionConfig,
};

fn config() -> SessionConfig {
    SessionConfig { device_class: DeviceClass::All, ..SessionConfig::default() }
}

/// `None` (and a note on stderr) when there is nothing to run on.
fn session() -> Option<Session> {
    match Session::acquire(&config()) {
        Ok(s) => Some(s),
        Err(e) if e.kind() == ErrorKind::Discovery => {
            eprintln!("no OpenCL device, skipping: {e}");
            None
        }
        Err(e) => panic!("unexpected acquisition error: {e}"),
    }
}

#[test]
fn vec_add_sums_to_n() {
    let Some(_probe) = session() else { return };
    let n = 1000;
    let (a, b) = ramp_inputs(n);
    let out = vec_add_device(&config(), &a, &b).unwrap();
    assert_eq!(out.len(), n);
    assert!(out.iter().all(|&v| v == n as f32));
}

#[test]
fn staged_vec_add_matches_the_pipeline() {
    let Some(session) = session() else { return };
    let n = 64;
    let (h_a, h_b) = ramp_inputs(n);
    let program = session.build_program(VEC_ADD_SOURCE, "").unwrap();
    let a = session.upload(Access::ReadOnly, &h_a).unwrap();
    let b = session.upload(Access::ReadOnly, &h_b).unwrap();
    let out = session.create_buffer::<f32>(Access::WriteOnly, n).unwrap();
    let kernel = program
        .kernel(VEC_ADD_ENTRY)
        .unwrap()
        .bind(&[KernelArg::buffer(&a), KernelArg::buffer(&b), KernelArg::buffer(&out)], None)
        .unwrap();
    session.enqueue(&kernel, &Grid::linear(n).unwrap()).unwrap().wait().unwrap();
    assert_eq!(session.read(&out).unwrap(), vec![n as f32; n]);
}

#[test]
fn device_rotation_matches_host_for_int_pixels() {
    let Some(_probe) = session() else { return };
    for (w, h, deg) in [(6, 6, 90.0), (6, 6, 0.0), (16, 9, 0.0), (8, 8, 90.0), (8, 8, 360.0)] {
        let src: Vec<i32> = (0..(w * h) as i32).collect();
        let angle = Angle::from_degrees(deg);
        let device = rotate_device(&config(), &src, w, h, angle).unwrap();
        assert_eq!(device, rotate_host(&src, w, h, angle).unwrap(), "{deg}° on {w}x{h}");
    }
}

#[test]
fn device_rotation_matches_host_for_byte_pixels() {
    let Some(_probe) = session() else { return };
    let (w, h) = (6, 6);
    let src: Vec<u8> = (0..(w * h) as u8).collect();
    let angle = Angle::from_sin_cos(1.0, 0.0);
    let device = rotate_device(&config(), &src, w, h, angle).unwrap();
    assert_eq!(device, rotate_host(&src, w, h, angle).unwrap());
}

#[test]
fn zero_angle_on_device_is_identity() {
    let Some(_probe) = session() else { return };
    let (w, h) = (12, 5);
    let src: Vec<f32> = (0..w * h).map(|i| i as f32 * 0.5).collect();
    assert_eq!(rotate_device(&config(), &src, w, h, Angle::ZERO).unwrap(), src);
}

#[test]
fn broken_source_reports_its_build_log() {
    let Some(session) = session() else { return };
    let src = "__kernel void broken(__global int *a) { a[0] = undeclared_q; }";
    match session.build_program(src, "") {
        Err(ClError::BuildFailed { log }) => assert!(!log.trim().is_empty()),
        Err(other) => panic!("expected BuildFailed, got {other}"),
        Ok(_) => panic!("broken source compiled"),
    }
}

#[test]
fn unknown_entry_point_is_kernel_not_found() {
    let Some(session) = session() else { return };
    let program = session.build_program(ROTATE_SOURCE, "").unwrap();
    assert!(program.kernel(ROTATE_ENTRY).is_ok());
    match program.kernel("rotate_image") {
        Err(ClError::KernelNotFound { name }) => assert_eq!(name, "rotate_image"),
        Err(other) => panic!("expected KernelNotFound, got {other}"),
        Ok(_) => panic!("unknown entry point resolved"),
    }
}

#[test]
fn short_argument_list_is_rejected_at_binding() {
    let Some(session) = session() else { return };
    let program = session.build_program(VEC_ADD_SOURCE, "").unwrap();
    let a = session.upload(Access::ReadOnly, &[1.0_f32; 4]).unwrap();
    let err = program
        .kernel(VEC_ADD_ENTRY)
        .unwrap()
        .bind(&[KernelArg::buffer(&a), KernelArg::buffer(&a)], None)
        .err()
        .unwrap();
    assert!(matches!(err, ClError::ArgumentBinding { slot: 2, .. }), "{err}");
}

#[test]
fn tracked_run_releases_everything_once() {
    let Some(_probe) = session() else { return };
    let tracker = ResourceTracker::new();
    let src: Vec<i32> = (0..36).collect();
    rotate_pipeline(&src, 6, 6, Angle::from_degrees(90.0))
        .unwrap()
        .platform(PlatformSelector::First)
        .device_class(DeviceClass::All)
        .tracker(tracker.clone())
        .run()
        .unwrap();

    let report = tracker.report();
    // context, queue, program, kernel, two buffers
    assert_eq!(report.created, 6);
    assert_eq!(report.released, 6);
    tracker.assert_balanced().unwrap();

    // queue and context go last, in that order
    let releases: Vec<ResourceKind> = tracker
        .events()
        .into_iter()
        .filter(|e| e.op == clpipe::tracker::Op::Release)
        .map(|e| e.kind)
        .collect();
    assert_eq!(&releases[releases.len() - 2..], &[ResourceKind::Queue, ResourceKind::Context]);
}

#[test]
fn failed_build_still_releases_everything() {
    let Some(_probe) = session() else { return };
    let tracker = ResourceTracker::new();
    let err = Pipeline::new("__kernel void k(__global int *a) { a[0] = ; }", "k")
        .device_class(DeviceClass::All)
        .grid(Grid::linear(1).unwrap())
        .tracker(tracker.clone())
        .run()
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Compilation);
    assert_eq!(tracker.report().created, 3);
    tracker.assert_balanced().unwrap();
}

#[test]
fn out_of_range_platform_is_a_discovery_failure() {
    let Some(_probe) = session() else { return };
    let cfg = SessionConfig { platform: PlatformSelector::Index(usize::MAX), ..config() };
    let err = Session::acquire(&cfg).err().unwrap();
    assert!(matches!(err, ClError::NoPlatformFound));
}

#[test]
fn oversized_work_group_is_a_dispatch_failure() {
    let Some(session) = session() else { return };
    let n = 1 << 16;
    let (h_a, h_b) = ramp_inputs(n);
    let program = session.build_program(VEC_ADD_SOURCE, "").unwrap();
    let a = session.upload(Access::ReadOnly, &h_a).unwrap();
    let b = session.upload(Access::ReadOnly, &h_b).unwrap();
    let out = session.create_buffer::<f32>(Access::WriteOnly, n).unwrap();
    let kernel = program
        .kernel(VEC_ADD_ENTRY)
        .unwrap()
        .bind(&[KernelArg::buffer(&a), KernelArg::buffer(&b), KernelArg::buffer(&out)], None)
        .unwrap();
    // one work-group of 65536 items is past every device's limit
    let grid = Grid::linear(n).unwrap().with_local(&[n]).unwrap();
    let err = session.enqueue(&kernel, &grid).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Dispatch, "{err}");
    assert!(matches!(err, ClError::DispatchFailure(_)));
}

#[test]
fn dropped_dispatch_guard_waits_for_the_kernel() {
    let Some(session) = session() else { return };
    let n = 4096;
    let (h_a, h_b) = ramp_inputs(n);
    let program = session.build_program(VEC_ADD_SOURCE, "").unwrap();
    let a = session.upload(Access::ReadOnly, &h_a).unwrap();
    let b = session.upload(Access::ReadOnly, &h_b).unwrap();
    let out = session.create_buffer::<f32>(Access::WriteOnly, n).unwrap();
    let kernel = program
        .kernel(VEC_ADD_ENTRY)
        .unwrap()
        .bind(&[KernelArg::buffer(&a), KernelArg::buffer(&b), KernelArg::buffer(&out)], None)
        .unwrap();
    let in_flight = session.enqueue(&kernel, &Grid::linear(n).unwrap()).unwrap();
    drop(in_flight);
    assert_eq!(session.read(&out).unwrap(), vec![n as f32; n]);
}
